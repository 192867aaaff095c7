use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use tracing_test::traced_test;

use super::*;
use crate::DirtyUnit;
use crate::DrainStatus;
use crate::FileIdentity;
use crate::InstrumentedFiles;
use crate::MockFileResolver;
use crate::MockWriteInterceptor;
use crate::TrackingConfig;
use crate::WatchError;

const FILE_A: FileIdentity = FileIdentity { dev: 1, ino: 10 };
const FILE_B: FileIdentity = FileIdentity { dev: 1, ino: 11 };

/// "/a" and "/b" resolve to two files, anything else is missing
fn resolver() -> MockFileResolver {
    let mut resolver = MockFileResolver::new();
    resolver.expect_resolve().returning(|path: &Path| {
        if path == Path::new("/a") {
            Ok(FILE_A)
        } else if path == Path::new("/b") {
            Ok(FILE_B)
        } else {
            Err(WatchError::NotFound {
                path: path.to_path_buf(),
                source: None,
            })
        }
    });
    resolver
}

fn config() -> TrackingConfig {
    TrackingConfig {
        max_ranges_per_watch: 8,
        max_watches_per_observer: 4,
        max_path_len: 64,
        max_instrumented_files: 16,
    }
}

fn setup() -> (WatchRegistry, Arc<InstrumentedFiles>) {
    let hooks = InstrumentedFiles::new(16);
    let registry = WatchRegistry::new(config(), Arc::new(resolver()), hooks.clone());
    (registry, hooks)
}

#[test]
#[traced_test]
fn monitor_write_query_scenario() {
    let (registry, hooks) = setup();
    let observer = registry.register_observer();

    let handle = registry.monitor(observer, Path::new("/a"), 4096).unwrap();
    assert_eq!(handle, 0);
    assert!(hooks.is_hooked(&FILE_A));

    hooks.notify_write(&FILE_A, 0, 10);
    hooks.notify_write(&FILE_A, 4100, 5);

    let changes = registry.query(observer, handle, 10).unwrap();
    assert_eq!(changes.status, DrainStatus::Ok);
    assert_eq!(changes.units, vec![DirtyUnit::Range { first: 0, length: 2 }]);

    // drained
    assert!(registry.query(observer, handle, 10).unwrap().units.is_empty());
    assert!(logs_contain("monitor"));
}

#[test]
fn overflow_scenario_reports_collapsed_range() {
    let mut tight = config();
    tight.max_ranges_per_watch = 2;
    let hooks = InstrumentedFiles::new(16);
    let registry = WatchRegistry::new(tight, Arc::new(resolver()), hooks.clone());
    let observer = registry.register_observer();
    let handle = registry.monitor(observer, Path::new("/a"), 1).unwrap();

    hooks.notify_write(&FILE_A, 0, 1);
    hooks.notify_write(&FILE_A, 5, 1);
    hooks.notify_write(&FILE_A, 10, 1);

    let changes = registry.query(observer, handle, 10).unwrap();
    assert_eq!(changes.status, DrainStatus::Overflowed);
    assert_eq!(changes.units, vec![DirtyUnit::Range { first: 0, length: 11 }]);
}

#[test]
fn rejects_non_positive_block_size() {
    let (registry, hooks) = setup();
    let observer = registry.register_observer();

    for block_size in [0, -4096] {
        let err = registry.monitor(observer, Path::new("/a"), block_size).unwrap_err();
        assert!(matches!(err, WatchError::InvalidBlockSize(_)));
    }
    assert_eq!(hooks.hook_count(), 0);
}

#[test]
fn rejects_overlong_path_before_resolving() {
    let mut resolver = MockFileResolver::new();
    resolver.expect_resolve().never();
    let registry = WatchRegistry::new(config(), Arc::new(resolver), InstrumentedFiles::new(4));

    let long = PathBuf::from(format!("/{}", "x".repeat(64)));
    let err = registry.monitor(1, &long, 512).unwrap_err();
    assert!(matches!(err, WatchError::PathTooLong { len: 65, max: 64 }));
}

#[test]
fn missing_target_leaves_no_state() {
    let (registry, hooks) = setup();
    let observer = registry.register_observer();

    let err = registry.monitor(observer, Path::new("/missing"), 512).unwrap_err();
    assert!(matches!(err, WatchError::NotFound { .. }));
    assert_eq!(registry.watch_count(observer), 0);
    assert_eq!(registry.tracked_file_count(), 0);
    assert_eq!(hooks.hook_count(), 0);
}

#[test]
fn watch_limit_is_per_observer() {
    let (registry, _hooks) = setup();
    let first = registry.register_observer();
    let second = registry.register_observer();

    for _ in 0..4 {
        registry.monitor(first, Path::new("/a"), 512).unwrap();
    }
    let err = registry.monitor(first, Path::new("/b"), 512).unwrap_err();
    assert!(matches!(err, WatchError::TooManyWatches { limit: 4 }));

    assert!(registry.monitor(second, Path::new("/b"), 512).is_ok());
}

#[test]
fn handles_are_reused_lowest_first() {
    let (registry, _hooks) = setup();
    let observer = registry.register_observer();

    let h0 = registry.monitor(observer, Path::new("/a"), 512).unwrap();
    let h1 = registry.monitor(observer, Path::new("/b"), 512).unwrap();
    let h2 = registry.monitor(observer, Path::new("/a"), 512).unwrap();
    assert_eq!((h0, h1, h2), (0, 1, 2));

    registry.forget(observer, h1).unwrap();
    assert_eq!(registry.monitor(observer, Path::new("/a"), 512).unwrap(), 1);
}

#[test]
fn forgotten_handle_is_bad_for_query_and_forget() {
    let (registry, hooks) = setup();
    let observer = registry.register_observer();
    let handle = registry.monitor(observer, Path::new("/a"), 512).unwrap();

    registry.forget(observer, handle).unwrap();

    assert!(matches!(
        registry.query(observer, handle, 10),
        Err(WatchError::BadHandle { .. })
    ));
    assert!(matches!(
        registry.forget(observer, handle),
        Err(WatchError::BadHandle { .. })
    ));
    assert!(!hooks.is_hooked(&FILE_A));
    assert_eq!(registry.tracked_file_count(), 0);
}

#[test]
fn handles_are_scoped_to_their_observer() {
    let (registry, _hooks) = setup();
    let owner = registry.register_observer();
    let stranger = registry.register_observer();
    let handle = registry.monitor(owner, Path::new("/a"), 512).unwrap();

    assert!(matches!(
        registry.query(stranger, handle, 10),
        Err(WatchError::BadHandle { .. })
    ));
    assert!(matches!(
        registry.forget(stranger, handle),
        Err(WatchError::BadHandle { .. })
    ));
    assert!(registry.query(owner, handle, 10).is_ok());
}

#[test]
fn duplicate_monitor_creates_independent_windows() {
    let (registry, hooks) = setup();
    let observer = registry.register_observer();
    let first = registry.monitor(observer, Path::new("/a"), 1).unwrap();
    let second = registry.monitor(observer, Path::new("/a"), 1).unwrap();
    assert_ne!(first, second);
    assert_eq!(registry.tracked_file_count(), 1);

    hooks.notify_write(&FILE_A, 3, 1);
    assert_eq!(
        registry.query(observer, first, 10).unwrap().units,
        vec![DirtyUnit::Block(3)]
    );
    hooks.notify_write(&FILE_A, 9, 1);
    assert_eq!(
        registry.query(observer, second, 10).unwrap().units,
        vec![DirtyUnit::Block(3), DirtyUnit::Block(9)]
    );
}

#[test]
fn observers_with_different_block_sizes_see_own_granularity() {
    let (registry, hooks) = setup();
    let coarse_observer = registry.register_observer();
    let fine_observer = registry.register_observer();
    let coarse = registry.monitor(coarse_observer, Path::new("/a"), 4096).unwrap();
    let fine = registry.monitor(fine_observer, Path::new("/a"), 1024).unwrap();

    hooks.notify_write(&FILE_A, 5000, 3000);

    assert_eq!(
        registry.query(coarse_observer, coarse, 10).unwrap().units,
        vec![DirtyUnit::Block(1)]
    );
    assert_eq!(
        registry.query(fine_observer, fine, 10).unwrap().units,
        vec![DirtyUnit::Range { first: 4, length: 4 }]
    );
}

#[test]
#[traced_test]
fn release_observer_detaches_everything_and_is_idempotent() {
    let (registry, hooks) = setup();
    let leaving = registry.register_observer();
    let staying = registry.register_observer();
    registry.monitor(leaving, Path::new("/a"), 512).unwrap();
    registry.monitor(leaving, Path::new("/b"), 512).unwrap();
    let kept = registry.monitor(staying, Path::new("/b"), 512).unwrap();

    registry.release_observer(leaving);
    registry.release_observer(leaving);

    assert_eq!(registry.watch_count(leaving), 0);
    assert!(!hooks.is_hooked(&FILE_A));
    assert!(hooks.is_hooked(&FILE_B));

    hooks.notify_write(&FILE_B, 0, 1);
    assert_eq!(
        registry.query(staying, kept, 10).unwrap().units,
        vec![DirtyUnit::Block(0)]
    );
    assert!(logs_contain("observer released"));
}

#[test]
fn released_observer_cannot_monitor_again() {
    let (registry, hooks) = setup();
    let observer = registry.register_observer();
    registry.monitor(observer, Path::new("/a"), 512).unwrap();
    registry.release_observer(observer);

    assert!(matches!(
        registry.monitor(observer, Path::new("/b"), 512),
        Err(WatchError::ObserverReleased)
    ));
    assert_eq!(registry.watch_count(observer), 0);
    assert_eq!(registry.tracked_file_count(), 0);
    assert_eq!(hooks.hook_count(), 0);

    // a shutdown after the rejected monitor has nothing left to release
    registry.shutdown();
    assert_eq!(hooks.hook_count(), 0);
}

#[test]
fn unregistered_observer_cannot_monitor() {
    let (registry, _hooks) = setup();

    assert!(matches!(
        registry.monitor(42, Path::new("/a"), 512),
        Err(WatchError::ObserverReleased)
    ));
    assert_eq!(registry.tracked_file_count(), 0);
}

#[test]
fn failed_hook_install_unwinds_tracker_and_handle() {
    let mut interceptor = MockWriteInterceptor::new();
    interceptor.expect_install().returning(|_, _| {
        Err(WatchError::HookInstallFailed {
            reason: "resource limit".into(),
        })
    });
    interceptor.expect_uninstall().never();
    let registry = WatchRegistry::new(config(), Arc::new(resolver()), Arc::new(interceptor));
    let observer = registry.register_observer();

    let err = registry.monitor(observer, Path::new("/a"), 512).unwrap_err();
    assert!(matches!(err, WatchError::HookInstallFailed { .. }));
    assert_eq!(registry.tracked_file_count(), 0);
    assert_eq!(registry.watch_count(observer), 0);
}

#[test]
fn hook_refusal_for_one_file_leaves_other_files_alone() {
    let hooks = InstrumentedFiles::new(1);
    let registry = WatchRegistry::new(config(), Arc::new(resolver()), hooks.clone());
    let observer = registry.register_observer();
    let handle = registry.monitor(observer, Path::new("/a"), 1).unwrap();

    let err = registry.monitor(observer, Path::new("/b"), 1).unwrap_err();
    assert!(matches!(err, WatchError::HookInstallFailed { .. }));

    hooks.notify_write(&FILE_A, 2, 1);
    assert_eq!(
        registry.query(observer, handle, 10).unwrap().units,
        vec![DirtyUnit::Block(2)]
    );
}

#[test]
fn truncate_is_reported_through_query() {
    let (registry, hooks) = setup();
    let observer = registry.register_observer();
    let handle = registry.monitor(observer, Path::new("/a"), 100).unwrap();

    hooks.notify_write(&FILE_A, 0, 1000);
    hooks.notify_truncate(&FILE_A, 250);

    let changes = registry.query(observer, handle, 10).unwrap();
    assert_eq!(changes.status, DrainStatus::Truncated);
    assert_eq!(changes.units, vec![DirtyUnit::Range { first: 0, length: 3 }]);
}

#[test]
fn shutdown_releases_all_hooks() {
    let (registry, hooks) = setup();
    let a = registry.register_observer();
    let b = registry.register_observer();
    registry.monitor(a, Path::new("/a"), 512).unwrap();
    registry.monitor(b, Path::new("/b"), 512).unwrap();

    registry.shutdown();

    assert_eq!(hooks.hook_count(), 0);
    assert_eq!(registry.tracked_file_count(), 0);
}

#[test]
fn registries_are_independent() {
    let (first, first_hooks) = setup();
    let (second, second_hooks) = setup();
    first.monitor(first.register_observer(), Path::new("/a"), 512).unwrap();

    assert_eq!(first.tracked_file_count(), 1);
    assert_eq!(second.tracked_file_count(), 0);
    assert!(first_hooks.is_hooked(&FILE_A));
    assert!(!second_hooks.is_hooked(&FILE_A));
}

#[test]
fn concurrent_monitor_forget_churn_keeps_hooks_consistent() {
    let (registry, hooks) = setup();
    let registry = Arc::new(registry);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let hooks = Arc::clone(&hooks);
            thread::spawn(move || {
                let observer = registry.register_observer();
                for i in 0..200u64 {
                    let handle = registry.monitor(observer, Path::new("/a"), 512).unwrap();
                    hooks.notify_write(&FILE_A, i * 512, 1);
                    registry.query(observer, handle, 16).unwrap();
                    registry.forget(observer, handle).unwrap();
                }
                registry.release_observer(observer);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(registry.tracked_file_count(), 0);
    assert_eq!(hooks.hook_count(), 0);
}
