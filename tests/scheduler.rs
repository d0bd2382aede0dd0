// tests/scheduler.rs

//! End-to-end ordering scenarios for the package manager.

mod common;

use common::{force_loop_break, graph, id, manager, position};
use orderly::{
    Config, EntryState, ErrorClass, Error, MultiArch, Operation, OrderResult, PackageManager,
    PackageRecord, Snapshot, StaticArchives, VersionRecord,
};

/// `p0` pre-depends `p1`, ... and the last pre-depends `p0` again
fn pre_depends_cycle(length: usize) -> Snapshot {
    (0..length).fold(Snapshot::new("amd64"), |snapshot, i| {
        let next = format!("p{}", (i + 1) % length);
        snapshot.package(
            PackageRecord::new(format!("p{}", i))
                .candidate(VersionRecord::new("1.0").pre_depends(next))
                .install(),
        )
    })
}

fn assert_cycle_completes(length: usize) {
    let graph = graph(pre_depends_cycle(length));
    let mut pm = manager(&graph, Config::default());

    assert!(pm.order_install().unwrap().is_completed());
    assert_eq!(pm.actions().len(), 2 * length);
    for i in 0..length {
        let name = format!("p{}", i);
        assert!(position(&pm, Operation::Install, &name) < position(&pm, Operation::Configure, &name));
        assert!(pm.list().is_configured(id(&graph, &name)));
    }
}

#[test]
fn test_all_keep_is_empty() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(PackageRecord::new("a").installed(VersionRecord::new("1.0").depends("b")))
            .package(PackageRecord::new("b").installed(VersionRecord::new("2.0"))),
    );
    let mut pm = manager(&graph, Config::default());

    assert!(pm.list().is_empty());
    assert_eq!(pm.order_install().unwrap(), OrderResult::Completed);
    assert!(pm.actions().is_empty());
}

#[test]
fn test_pre_depends_chain() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .candidate(VersionRecord::new("1.0").pre_depends("b"))
                    .install(),
            )
            .package(PackageRecord::new("b").candidate(VersionRecord::new("1.0")).install()),
    );
    let mut pm = manager(&graph, Config::default());

    assert!(pm.order_install().unwrap().is_completed());
    assert_eq!(
        pm.describe_actions(),
        vec![
            "Install(b:amd64)",
            "Configure(b:amd64)",
            "Install(a:amd64)",
            "Configure(a:amd64)",
        ]
    );
}

#[test]
fn test_pre_depends_cycle_terminates() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .candidate(VersionRecord::new("1.0").pre_depends("b"))
                    .install(),
            )
            .package(
                PackageRecord::new("b")
                    .candidate(VersionRecord::new("1.0").pre_depends("a"))
                    .install(),
            ),
    );
    let mut pm = manager(&graph, Config::default());

    assert!(pm.order_install().unwrap().is_completed());
    assert_eq!(pm.actions().len(), 4);
    for name in ["a", "b"] {
        assert!(position(&pm, Operation::Install, name) < position(&pm, Operation::Configure, name));
        assert!(pm.list().is_configured(id(&graph, name)));
    }
}

#[test]
fn test_three_cycle_with_conflict_terminates() {
    // a pre-depends b, b pre-depends c, c conflicts the installed a
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .installed(VersionRecord::new("1.0"))
                    .candidate(VersionRecord::new("2.0").pre_depends("b"))
                    .install(),
            )
            .package(
                PackageRecord::new("b")
                    .candidate(VersionRecord::new("1.0").pre_depends("c"))
                    .install(),
            )
            .package(
                PackageRecord::new("c")
                    .candidate(VersionRecord::new("1.0").conflicts("a (<< 2.0)"))
                    .install(),
            ),
    );
    let mut pm = manager(&graph, Config::default());

    assert!(pm.order_install().unwrap().is_completed());
    for name in ["a", "b", "c"] {
        assert!(position(&pm, Operation::Install, name) < position(&pm, Operation::Configure, name));
    }

    // every entry ends configured; nothing is left half-done
    for entry in pm.list().entries() {
        assert_eq!(entry.state(), EntryState::Configured);
    }
}

#[test]
fn test_forced_early_removal() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .candidate(VersionRecord::new("1.0").conflicts("b"))
                    .install(),
            )
            .package(PackageRecord::new("b").installed(VersionRecord::new("1.0"))),
    );
    let b = id(&graph, "b");
    let mut pm = manager(&graph, Config::default());
    assert!(!pm.list().contains(b));

    assert!(pm.order_install().unwrap().is_completed());
    assert!(position(&pm, Operation::Remove, "b") < position(&pm, Operation::Install, "a"));

    let entry = pm.list().get(b).unwrap();
    assert!(entry.adopted);
    assert_eq!(entry.state(), EntryState::Removed);
}

#[test]
fn test_essential_removal_is_refused() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .candidate(VersionRecord::new("1.0").conflicts("base"))
                    .install(),
            )
            .package(
                PackageRecord::new("base")
                    .essential()
                    .installed(VersionRecord::new("1.0")),
            ),
    );
    let mut pm = manager(&graph, Config::default());

    let err = pm.order_install().unwrap_err();
    assert!(matches!(err, Error::EssentialRemoval { .. }));
    assert_eq!(err.class(), ErrorClass::FatalPolicy);
    assert!(pm.actions().is_empty());
}

#[test]
fn test_dependency_of_essential_is_protected() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .candidate(VersionRecord::new("1.0").conflicts("libbase"))
                    .install(),
            )
            .package(
                PackageRecord::new("base")
                    .essential()
                    .installed(VersionRecord::new("1.0").depends("libbase")),
            )
            .package(PackageRecord::new("libbase").installed(VersionRecord::new("1.0"))),
    );
    let mut pm = manager(&graph, Config::default());

    let err = pm.order_install().unwrap_err();
    assert_eq!(err.class(), ErrorClass::FatalPolicy);
}

#[test]
fn test_force_loop_break_removes_essential() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .candidate(VersionRecord::new("1.0").conflicts("base"))
                    .install(),
            )
            .package(
                PackageRecord::new("base")
                    .essential()
                    .installed(VersionRecord::new("1.0")),
            ),
    );
    let mut pm = manager(&graph, force_loop_break());

    assert!(pm.order_install().unwrap().is_completed());
    assert!(position(&pm, Operation::Remove, "base") < position(&pm, Operation::Install, "a"));
    assert!(pm.list().is_removed(id(&graph, "base")));
}

#[test]
fn test_multi_arch_same_lockstep() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("x")
                    .installed(VersionRecord::new("1.0").multi_arch(MultiArch::Same))
                    .candidate(VersionRecord::new("2.0").multi_arch(MultiArch::Same))
                    .install(),
            )
            .package(
                PackageRecord::new("x")
                    .arch("i386")
                    .candidate(VersionRecord::new("2.0").multi_arch(MultiArch::Same))
                    .install(),
            ),
    );
    let mut pm = manager(&graph, Config::default());

    assert!(pm.order_install().unwrap().is_completed());
    let native = position(&pm, Operation::Install, "x:amd64");
    let foreign = position(&pm, Operation::Install, "x:i386");
    assert!(native < foreign);
    assert!(pm.list().is_configured(id(&graph, "x:amd64")));
    assert!(pm.list().is_configured(id(&graph, "x:i386")));
}

#[test]
fn test_missing_pre_dependency_is_unsatisfiable() {
    let graph = graph(
        Snapshot::new("amd64").package(
            PackageRecord::new("a")
                .candidate(VersionRecord::new("1.0").pre_depends("ghost (>= 2)"))
                .install(),
        ),
    );
    let mut pm = manager(&graph, Config::default());

    let err = pm.order_install().unwrap_err();
    assert!(matches!(err, Error::Unsatisfiable { .. }));
    assert_eq!(err.class(), ErrorClass::Unsatisfiable);
    assert!(err.to_string().contains("ghost"));
}

#[test]
fn test_upgrade_unpacks_conflicting_package_first() {
    // new b no longer conflicts with a, so it can be upgraded in place
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .installed(VersionRecord::new("1.0"))
                    .candidate(VersionRecord::new("2.0").conflicts("b (<< 2.0)"))
                    .install(),
            )
            .package(
                PackageRecord::new("b")
                    .installed(VersionRecord::new("1.0"))
                    .candidate(VersionRecord::new("2.0"))
                    .install(),
            ),
    );
    let mut pm = manager(&graph, Config::default());

    assert!(pm.order_install().unwrap().is_completed());
    assert!(position(&pm, Operation::Install, "b") < position(&pm, Operation::Install, "a"));
    assert!(pm.actions().position(Operation::Remove, id(&graph, "b")).is_none());
}

#[test]
fn test_loop_limit_is_configurable() {
    let mut config = Config::default();
    config.scheduler.max_loop_count = 1;
    assert!(config.validate().is_ok());

    config.scheduler.max_loop_count = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.scheduler.max_depth = 20_000;
    assert!(config.validate().is_err());
}

#[test]
fn test_pre_depends_three_cycle_completes() {
    assert_cycle_completes(3);
}

#[test]
fn test_pre_depends_five_cycle_completes() {
    assert_cycle_completes(5);
}

#[test]
fn test_breaks_upgrades_broken_package_first() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .installed(VersionRecord::new("1.0"))
                    .candidate(VersionRecord::new("2.0").breaks("b (<< 2.0)"))
                    .install(),
            )
            .package(
                PackageRecord::new("b")
                    .installed(VersionRecord::new("1.0"))
                    .candidate(VersionRecord::new("2.0"))
                    .install(),
            ),
    );
    let mut pm = manager(&graph, Config::default());

    assert!(pm.order_install().unwrap().is_completed());
    assert!(position(&pm, Operation::Install, "b") < position(&pm, Operation::Install, "a"));
    assert!(pm.actions().position(Operation::Remove, id(&graph, "b")).is_none());
}

#[test]
fn test_breaks_removes_scheduled_removal_first() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .candidate(VersionRecord::new("1.0").breaks("b"))
                    .install(),
            )
            .package(PackageRecord::new("b").installed(VersionRecord::new("1.0")).remove()),
    );
    let mut pm = manager(&graph, Config::default());

    assert!(pm.order_install().unwrap().is_completed());
    assert!(position(&pm, Operation::Remove, "b") < position(&pm, Operation::Install, "a"));
    assert!(pm.list().is_removed(id(&graph, "b")));
}

#[test]
fn test_breaks_accepted_when_broken_package_pre_depends_on_breaker() {
    // new b needs new a unpacked first, so the breakage is left to dpkg
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .installed(VersionRecord::new("1.0"))
                    .candidate(VersionRecord::new("2.0").breaks("b (<< 2.0)"))
                    .install(),
            )
            .package(
                PackageRecord::new("b")
                    .installed(VersionRecord::new("1.0"))
                    .candidate(VersionRecord::new("2.0").pre_depends("a (>= 2.0)"))
                    .install(),
            ),
    );
    let mut pm = manager(&graph, Config::default());

    assert_eq!(pm.order_install().unwrap(), OrderResult::Completed);
    assert!(position(&pm, Operation::Install, "a") < position(&pm, Operation::Install, "b"));
    assert!(position(&pm, Operation::Configure, "a") < position(&pm, Operation::Install, "b"));
    assert!(pm.actions().position(Operation::Remove, id(&graph, "b")).is_none());
}

#[test]
fn test_reverse_conflict_through_provides() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("old-mta")
                    .installed(VersionRecord::new("1.0").conflicts("mail-transport-agent")),
            )
            .package(
                PackageRecord::new("postfix")
                    .candidate(VersionRecord::new("3.7").provides("mail-transport-agent"))
                    .install(),
            ),
    );
    let old = id(&graph, "old-mta");
    let mut pm = manager(&graph, Config::default());
    assert!(!pm.list().contains(old));

    assert!(pm.order_install().unwrap().is_completed());
    assert!(position(&pm, Operation::Remove, "old-mta") < position(&pm, Operation::Install, "postfix"));

    let entry = pm.list().get(old).unwrap();
    assert!(entry.adopted);
    assert_eq!(entry.state(), EntryState::Removed);
}

#[test]
fn test_critical_order_still_configures_in_dependency_order() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("app")
                    .candidate(VersionRecord::new("1.0").depends("lib"))
                    .install(),
            )
            .package(PackageRecord::new("lib").candidate(VersionRecord::new("1.0")).install()),
    );
    let mut config = Config::default();
    config.scheduler.unpack_all = false;
    let mut pm = manager(&graph, config);

    assert!(pm.order_install().unwrap().is_completed());
    assert!(position(&pm, Operation::Configure, "lib") < position(&pm, Operation::Configure, "app"));
    for entry in pm.list().entries() {
        assert_eq!(entry.state(), EntryState::Configured);
    }
}

#[test]
fn test_loop_limit_stops_ordering() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(
                PackageRecord::new("a")
                    .candidate(VersionRecord::new("1.0").pre_depends("b"))
                    .install(),
            )
            .package(PackageRecord::new("b").candidate(VersionRecord::new("1.0")).install()),
    );
    let mut config = Config::default();
    config.scheduler.max_loop_count = 1;
    let mut pm = manager(&graph, config);

    let err = pm.order_install().unwrap_err();
    assert!(matches!(err, Error::LoopLimit { .. }), "got {}", err);
    assert_eq!(err.class(), ErrorClass::FatalInternal);
}

#[test]
fn test_depth_limit_stops_ordering() {
    let graph = graph(pre_depends_cycle(3));
    let mut config = Config::default();
    config.scheduler.max_depth = 2;
    let mut pm = manager(&graph, config);

    let err = pm.order_install().unwrap_err();
    assert!(matches!(err, Error::DepthLimit { limit: 2, .. }), "got {}", err);
    assert_eq!(err.class(), ErrorClass::FatalInternal);
}

#[test]
fn test_long_cycle_hits_depth_limit_on_small_caller_stack() {
    let caller = std::thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(|| {
            let graph = graph(pre_depends_cycle(1500));
            let mut pm = manager(&graph, Config::default());
            pm.order_install()
                .map_err(|e| (e.class(), matches!(e, Error::DepthLimit { .. })))
                .map(|_| ())
        })
        .unwrap();

    assert_eq!(caller.join().unwrap(), Err((ErrorClass::FatalInternal, true)));
}

#[test]
fn test_missing_archive_during_recursion_is_incomplete() {
    let graph = graph(
        Snapshot::new("amd64")
            .package(PackageRecord::new("a").candidate(VersionRecord::new("1.0")).install())
            .package(
                PackageRecord::new("b")
                    .candidate(VersionRecord::new("1.0").depends("a").pre_depends("c"))
                    .install(),
            )
            .package(PackageRecord::new("c").candidate(VersionRecord::new("1.0")).install()),
    );
    let mut pm = PackageManager::new(&graph, Config::default());
    let archives = StaticArchives::new()
        .with("a:amd64", "/pool/a_1.0_amd64.deb")
        .with("b:amd64", "/pool/b_1.0_amd64.deb");
    assert_eq!(pm.get_archives(&archives), 1);

    let result = pm.order_install().unwrap();
    assert!(matches!(result, OrderResult::Incomplete { actions: 1, .. }), "got {:?}", result);
    assert_eq!(pm.describe_actions(), vec!["Install(a:amd64)"]);
    assert_eq!(pm.list().state(id(&graph, "b")), Some(EntryState::Pending));
    assert_eq!(pm.list().state(id(&graph, "c")), Some(EntryState::Pending));
}
