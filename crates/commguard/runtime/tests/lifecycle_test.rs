// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Shadow store lifetime, stack canonicalization, lock depth and wait hooks

use commguard_runtime::{ContextPolicy, MonitorConfig, RuntimeMonitor, ShadowSlot, Stack};
use commguard_spec::{MethodUid, MissingSpecPolicy, ModuleDescription, SpecRegistry};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;

fn registry() -> SpecRegistry {
    let registry = SpecRegistry::empty(MissingSpecPolicy::Trust);
    registry
        .register(
            &ModuleDescription::builder("lib")
                .group("data", &["get()I", "helper()V"], &["put(I)V"])
                .interface_group("exposed", &["get()I"], &["put(I)V"])
                .comm("put(I)V", &[], &[])
                .comm("get()I", &[], &[])
                .comm("helper()V", &[], &[])
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            &ModuleDescription::builder("app")
                .group("flow", &["consume()V"], &["produce()V"])
                .comm("produce()V", &[], &[])
                .comm("consume()V", &[], &[])
                .comm("idle()V", &[], &[])
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

fn uid(monitor: &RuntimeMonitor, module: &str, signature: &str) -> MethodUid {
    monitor.registry().method_uid(module, signature).unwrap()
}

fn monitor(config: MonitorConfig) -> RuntimeMonitor {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    RuntimeMonitor::new(Arc::new(registry()), config).unwrap()
}

/// Enter `path` outermost first, run `f`, then unwind
fn within<R>(monitor: &RuntimeMonitor, path: &[MethodUid], f: impl FnOnce() -> R) -> R {
    for &method in path {
        monitor.enter(method);
    }
    let result = f();
    for _ in path {
        monitor.exit();
    }
    result
}

#[test]
fn test_equal_chains_share_one_stack() {
    let monitor = monitor(MonitorConfig::default());
    let path = [uid(&monitor, "app", "produce()V"), uid(&monitor, "lib", "put(I)V")];
    let threads = 8;
    let barrier = Barrier::new(threads);

    let (monitor_ref, barrier, path_ref) = (&monitor, &barrier, &path);
    let stacks: Vec<Arc<Stack>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(move || {
                    barrier.wait();
                    within(monitor_ref, path_ref, || Arc::clone(monitor_ref.current_state().stack()))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(stacks.iter().all(|s| Arc::ptr_eq(s, &stacks[0])));
    assert_eq!(monitor.stacks().len(), 2);

    let reversed = within(&monitor, &[path[1], path[0]], || Arc::clone(monitor.current_state().stack()));
    assert!(!Arc::ptr_eq(&reversed, &stacks[0]));
    assert_eq!(reversed.method(), stacks[0].parent().unwrap().method());
}

#[test]
fn test_shadow_entries_do_not_keep_objects_alive() {
    let monitor = monitor(MonitorConfig::default());
    let put = uid(&monitor, "lib", "put(I)V");

    let lock = Arc::new(parking_lot::Mutex::new(()));
    let array = Arc::new(vec![0u8; 32]);
    within(&monitor, &[put], || {
        monitor.acquire(&lock).unwrap();
        monitor.array_write(&array, 5);
        monitor.release(&lock);
    });
    assert_eq!(monitor.lock_shadows().len(), 1);
    assert_eq!(monitor.array_shadows().len(), 1);

    let weak_lock = Arc::downgrade(&lock);
    drop(lock);
    drop(array);
    assert!(weak_lock.upgrade().is_none());

    assert_eq!(monitor.sweep(), 2);
    assert!(monitor.lock_shadows().is_empty());
    assert!(monitor.array_shadows().is_empty());
}

#[test]
fn test_nested_acquires_check_once() {
    for n in [1, 3, 16] {
        let monitor = monitor(MonitorConfig::default().with_profile(true));
        let produce = uid(&monitor, "app", "produce()V");
        let consume = uid(&monitor, "app", "consume()V");
        let lock = Arc::new(());

        thread::scope(|scope| {
            scope
                .spawn(|| {
                    within(&monitor, &[produce], || {
                        monitor.acquire(&lock).unwrap();
                        monitor.release(&lock);
                    })
                })
                .join()
                .unwrap();

            scope
                .spawn(|| {
                    within(&monitor, &[consume], || {
                        for _ in 0..n {
                            monitor.acquire(&lock).unwrap();
                        }
                        for _ in 0..n {
                            monitor.release(&lock);
                        }
                    })
                })
                .join()
                .unwrap();
        });

        assert_eq!(monitor.lock_shadows().get(&lock).unwrap().depth(), 0, "n = {n}");
        let stats = monitor.stats();
        assert_eq!(stats.lock_acquires, n + 1, "n = {n}");
        assert_eq!(stats.lock_comm_acquires, 1, "n = {n}");
        assert_eq!(stats.violations, 0);
    }
}

#[test]
#[should_panic(expected = "never acquired")]
fn test_prewait_without_lock_is_fatal() {
    let monitor = monitor(MonitorConfig::default());
    monitor.prewait(&Arc::new(()));
}

#[test]
fn test_postwait_checks_new_holder() {
    let monitor = monitor(MonitorConfig::default());
    let produce = uid(&monitor, "app", "produce()V");
    let consume = uid(&monitor, "app", "consume()V");
    let lock = Arc::new(());
    let (to_waker, waker_rx) = mpsc::channel();
    let (to_waiter, waiter_rx) = mpsc::channel();

    let (monitor, lock) = (&monitor, &lock);
    let resumed = thread::scope(|scope| {
        let waiter = scope.spawn(move || {
            within(monitor, &[consume], || {
                monitor.acquire(lock).unwrap();
                monitor.acquire(lock).unwrap();
                let depth = monitor.prewait(lock);
                to_waker.send(()).unwrap();
                waiter_rx.recv().unwrap();
                let resumed = monitor.postwait(lock, depth);
                monitor.release(lock);
                monitor.release(lock);
                resumed
            })
        });
        scope.spawn(move || {
            waker_rx.recv().unwrap();
            within(monitor, &[produce], || {
                // consume -> produce is not an edge either way round
                let acquired = monitor.acquire(lock);
                monitor.release(lock);
                assert!(acquired.is_err());
            });
            to_waiter.send(()).unwrap();
        });
        waiter.join().unwrap()
    });

    // produce -> consume is allowed, so the wake-up handoff passes.
    assert!(resumed.is_ok());
    assert_eq!(monitor.lock_shadows().get(lock).unwrap().depth(), 0);
    assert_eq!(monitor.stats().violations, 1);
}

#[test]
fn test_layered_policy_follows_interfaces() {
    let monitor = monitor(MonitorConfig::default().with_context_policy(ContextPolicy::Layered).with_profile(true));
    let produce = uid(&monitor, "app", "produce()V");
    let consume = uid(&monitor, "app", "consume()V");
    let idle = uid(&monitor, "app", "idle()V");
    let put = uid(&monitor, "lib", "put(I)V");
    let get = uid(&monitor, "lib", "get()I");
    let helper = uid(&monitor, "lib", "helper()V");
    let field = ShadowSlot::new();
    let internal = ShadowSlot::new();

    thread::scope(|scope| {
        scope
            .spawn(|| {
                within(&monitor, &[produce, put], || {
                    monitor.write(&field);
                    monitor.write(&internal);
                })
            })
            .join()
            .unwrap();

        scope
            .spawn(|| {
                within(&monitor, &[consume, get], || {
                    assert!(monitor.read(&field).is_ok());
                    assert!(monitor.read(&field).is_ok());
                });
                within(&monitor, &[idle, get], || {
                    assert!(monitor.read(&field).unwrap_err().is_sharing_violation());
                });
                within(&monitor, &[idle, helper], || {
                    assert!(monitor.read(&internal).is_ok());
                });
            })
            .join()
            .unwrap();
    });

    // The repeated authorized read is answered from the reader's memo.
    let stats = monitor.stats();
    assert_eq!(stats.field_comm_reads, 4);
    assert_eq!(stats.slow_paths, 3);
    assert_eq!(stats.violations, 1);
}

#[test]
fn test_thread_identity_outlives_thread() {
    let monitor = monitor(MonitorConfig::default());
    let put = uid(&monitor, "lib", "put(I)V");
    let field = ShadowSlot::new();

    thread::scope(|scope| {
        thread::Builder::new()
            .name("writer".to_string())
            .spawn_scoped(scope, || within(&monitor, &[put], || monitor.write(&field)))
            .unwrap()
            .join()
            .unwrap();
    });

    let writer = field.load().unwrap();
    assert_eq!(writer.thread().name(), "writer");
    assert!(!writer.thread().is_live());
    assert!(writer.thread().to_string().contains("No longer live"));
}

#[test]
fn test_stats_track_threads_and_stacks() {
    let monitor = monitor(MonitorConfig::default().with_profile(true));
    let put = uid(&monitor, "lib", "put(I)V");
    let array = Arc::new([0u16; 8]);

    thread::scope(|scope| {
        for _ in 0..3 {
            scope.spawn(|| {
                within(&monitor, &[put], || {
                    monitor.array_write(&array, 0);
                    monitor.array_read(&array, 0).unwrap();
                })
            });
        }
    });

    let stats = monitor.stats();
    assert_eq!(stats.threads, 3);
    assert_eq!(stats.distinct_stacks, 1);
    assert_eq!(stats.array_reads, 3);
    assert_eq!(stats.cache_hits + stats.cache_misses, 6);
}

#[test]
fn test_reentered_context_reads_own_write() {
    let monitor = monitor(MonitorConfig::default().with_intra_thread(true));
    let produce = uid(&monitor, "app", "produce()V");
    let idle = uid(&monitor, "app", "idle()V");
    let put = uid(&monitor, "lib", "put(I)V");
    let field = ShadowSlot::new();

    let written = within(&monitor, &[produce, put], || monitor.write(&field));
    assert_eq!(monitor.depth(), 0);

    within(&monitor, &[produce, put], || {
        assert!(Arc::ptr_eq(&written, &monitor.current_state()));
        assert!(monitor.read(&field).is_ok());
    });

    // Same thread, different context: still checked.
    let err = within(&monitor, &[idle], || monitor.read(&field)).unwrap_err();
    assert!(err.is_sharing_violation());
}

#[test]
fn test_reentered_context_reacquires_own_lock() {
    let monitor = monitor(MonitorConfig::default().with_intra_thread(true).with_profile(true));
    let put = uid(&monitor, "lib", "put(I)V");
    let lock = Arc::new(parking_lot::Mutex::new(0u32));

    for _ in 0..3 {
        within(&monitor, &[put], || {
            let mut guard = lock.lock();
            monitor.acquire(&lock).unwrap();
            *guard += 1;
            monitor.release(&lock);
        });
    }

    let state = monitor.lock_shadows().get(&lock).unwrap();
    assert_eq!(state.depth(), 0);
    assert_eq!(*lock.lock(), 3);
    let stats = monitor.stats();
    assert_eq!(stats.lock_comm_acquires, 0);
    assert_eq!(stats.violations, 0);
}
