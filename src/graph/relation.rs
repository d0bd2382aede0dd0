// src/graph/relation.rs

//! Parser for Debian relationship fields
//!
//! A field is a comma-separated list of or-groups, each group a `|`-separated
//! list of relations of the form `name[:arch] [(op version)]`. Architecture
//! restrictions (`[amd64 !i386]`) and build profiles (`<!nocheck>`) are
//! accepted and dropped.

use crate::error::{Error, Result};
use crate::version::VersionConstraint;

/// A single unresolved relation as written in a control field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    /// Architecture qualifier after `:`, e.g. `any` or `i386`
    pub arch: Option<String>,
    pub constraint: VersionConstraint,
}

impl Relation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch: None,
            constraint: VersionConstraint::Any,
        }
    }
}

/// Parse a whole relationship field into or-groups
pub fn parse_relations(field: &str) -> Result<Vec<Vec<Relation>>> {
    let mut groups = Vec::new();

    for group in field.split(',') {
        let group = group.trim();
        if group.is_empty() {
            continue;
        }

        let mut alternatives = Vec::new();
        for alt in group.split('|') {
            alternatives.push(parse_relation(alt)?);
        }
        groups.push(alternatives);
    }

    Ok(groups)
}

/// Parse one relation such as `libc6:any (>= 2.36)`
pub fn parse_relation(s: &str) -> Result<Relation> {
    let stripped = strip_restrictions(s)?;
    let s = stripped.trim();

    let (head, constraint) = match s.find('(') {
        Some(open) => {
            let close = s
                .rfind(')')
                .filter(|&c| c > open)
                .ok_or_else(|| Error::Parse(format!("unbalanced parenthesis in '{}'", s)))?;
            if !s[close + 1..].trim().is_empty() {
                return Err(Error::Parse(format!("trailing data in '{}'", s)));
            }
            let constraint = VersionConstraint::parse(&s[open + 1..close])?;
            if constraint.is_any() {
                return Err(Error::Parse(format!("empty version constraint in '{}'", s)));
            }
            (s[..open].trim(), constraint)
        }
        None => (s, VersionConstraint::Any),
    };

    if head.is_empty() {
        return Err(Error::Parse(format!("missing package name in '{}'", s)));
    }
    if head.contains(char::is_whitespace) {
        return Err(Error::Parse(format!("malformed relation '{}'", s)));
    }

    let (name, arch) = match head.split_once(':') {
        Some((n, a)) if !n.is_empty() && !a.is_empty() => (n, Some(a.to_string())),
        Some(_) => return Err(Error::Parse(format!("malformed relation '{}'", s))),
        None => (head, None),
    };

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return Err(Error::Parse(format!("invalid package name '{}'", name)));
    }

    Ok(Relation {
        name: name.to_ascii_lowercase(),
        arch,
        constraint,
    })
}

/// Drop `[...]` and `<...>` sections
fn strip_restrictions(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut closing: Option<char> = None;

    for c in s.chars() {
        match (closing, c) {
            (None, '[') => closing = Some(']'),
            (None, '<') if !out.contains('(') || out.contains(')') => closing = Some('>'),
            (Some(end), c) if c == end => closing = None,
            (Some(_), _) => {}
            (None, c) => out.push(c),
        }
    }

    if closing.is_some() {
        return Err(Error::Parse(format!("unterminated restriction in '{}'", s)));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::DebVersion;

    #[test]
    fn test_parse_simple_relations() {
        let groups = parse_relations("libc6, zlib1g").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![Relation::new("libc6")]);
        assert_eq!(groups[1], vec![Relation::new("zlib1g")]);
    }

    #[test]
    fn test_parse_versioned_alternatives() {
        let groups = parse_relations("mail-transport-agent | exim4 (>= 4.90), perl:any").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0][0].name, "mail-transport-agent");
        assert_eq!(
            groups[0][1].constraint,
            VersionConstraint::GreaterOrEqual(DebVersion::parse("4.90").unwrap())
        );
        assert_eq!(groups[1][0].arch.as_deref(), Some("any"));
    }

    #[test]
    fn test_parse_drops_restrictions() {
        let groups = parse_relations("foo [amd64 !i386] (<< 2) <!nocheck>, bar").unwrap();
        assert_eq!(groups[0][0].name, "foo");
        assert_eq!(
            groups[0][0].constraint,
            VersionConstraint::LessThan(DebVersion::parse("2").unwrap())
        );
        assert_eq!(groups[1][0].name, "bar");
    }

    #[test]
    fn test_parse_empty_field() {
        assert!(parse_relations("").unwrap().is_empty());
        assert!(parse_relations(" , ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_relations("foo (>= 1").is_err());
        assert!(parse_relations("foo bar").is_err());
        assert!(parse_relations("foo:").is_err());
        assert!(parse_relations("foo ()").is_err());
        assert!(parse_relations("foo [amd64").is_err());
    }
}
