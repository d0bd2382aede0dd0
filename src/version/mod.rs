// src/version/mod.rs

//! Version handling and constraint satisfaction for package relationships
//!
//! Versions follow the Debian `[epoch:]upstream[-revision]` format and are
//! ordered with the dpkg comparison rules: digit runs compare numerically,
//! letters sort before other characters and `~` sorts before everything,
//! including the end of the string.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A parsed Debian version with epoch, upstream version and revision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DebVersion {
    pub epoch: u64,
    pub upstream: String,
    pub revision: Option<String>,
}

impl DebVersion {
    /// Parse a Debian version string
    ///
    /// Format: [epoch:]upstream[-revision]
    /// - "1.2.3" → epoch=0, upstream="1.2.3", revision=None
    /// - "2:1.2.3" → epoch=2, upstream="1.2.3"
    /// - "1.2-3-4ubuntu1" → upstream="1.2-3", revision="4ubuntu1"
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidVersion(s.to_string(), "empty version".into()));
        }

        let (epoch, rest) = match s.split_once(':') {
            Some((e, r)) if e.is_empty() => (0, r),
            Some((e, r)) => {
                let epoch = e.parse::<u64>().map_err(|err| {
                    Error::InvalidVersion(s.to_string(), format!("bad epoch: {}", err))
                })?;
                (epoch, r)
            }
            None => (0, s),
        };

        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((u, r)) => (u.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if upstream.is_empty() {
            return Err(Error::InvalidVersion(
                s.to_string(),
                "empty upstream version".into(),
            ));
        }
        if upstream.chars().any(char::is_whitespace) {
            return Err(Error::InvalidVersion(
                s.to_string(),
                "embedded whitespace".into(),
            ));
        }

        Ok(Self {
            epoch,
            upstream,
            revision,
        })
    }

    /// Compare two versions with dpkg semantics
    pub fn compare(&self, other: &DebVersion) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match verrevcmp(&self.upstream, &other.upstream) {
            Ordering::Equal => {}
            ord => return ord,
        }
        verrevcmp(
            self.revision.as_deref().unwrap_or(""),
            other.revision.as_deref().unwrap_or(""),
        )
    }
}

/// Weight of a single non-digit character in the dpkg ordering
fn char_order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(b'~') => -1,
        Some(c) => c as i32 + 256,
    }
}

fn verrevcmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);

    while i < a.len() || j < b.len() {
        let mut first_diff = 0i32;

        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let ac = char_order(a.get(i).copied());
            let bc = char_order(b.get(j).copied());
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }

        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }

        while i < a.len() && a[i].is_ascii_digit() && j < b.len() && b[j].is_ascii_digit() {
            if first_diff == 0 {
                first_diff = a[i] as i32 - b[j] as i32;
            }
            i += 1;
            j += 1;
        }

        if i < a.len() && a[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != 0 {
            return first_diff.cmp(&0);
        }
    }

    Ordering::Equal
}

impl fmt::Display for DebVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if let Some(ref revision) = self.revision {
            write!(f, "-{}", revision)?;
        }
        Ok(())
    }
}

impl PartialEq for DebVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for DebVersion {}

impl Ord for DebVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for DebVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<String> for DebVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DebVersion> for String {
    fn from(value: DebVersion) -> Self {
        value.to_string()
    }
}

/// Version constraint operators on relationship edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    /// `=`
    Exact(DebVersion),
    /// `>>`
    GreaterThan(DebVersion),
    /// `>=`
    GreaterOrEqual(DebVersion),
    /// `<<`
    LessThan(DebVersion),
    /// `<=`
    LessOrEqual(DebVersion),
}

impl VersionConstraint {
    /// Parse an operator and a version, as found inside `( )` of a relation
    ///
    /// The obsolete single-character forms `<` and `>` mean `<=` and `>=`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        let ops: [(&str, fn(DebVersion) -> VersionConstraint); 7] = [
            (">>", VersionConstraint::GreaterThan),
            (">=", VersionConstraint::GreaterOrEqual),
            ("<<", VersionConstraint::LessThan),
            ("<=", VersionConstraint::LessOrEqual),
            ("=", VersionConstraint::Exact),
            (">", VersionConstraint::GreaterOrEqual),
            ("<", VersionConstraint::LessOrEqual),
        ];

        for (op, ctor) in ops {
            if let Some(rest) = s.strip_prefix(op) {
                return Ok(ctor(DebVersion::parse(rest)?));
            }
        }

        Err(Error::Parse(format!("missing relation operator in '{}'", s)))
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &DebVersion) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, VersionConstraint::Any)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(v) => write!(f, "= {}", v),
            VersionConstraint::GreaterThan(v) => write!(f, ">> {}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">= {}", v),
            VersionConstraint::LessThan(v) => write!(f, "<< {}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<= {}", v),
        }
    }
}
