use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{DependencyManager, Immediate, JobHandle, ThreadPool};
use crate::comp::TypeIndex;
use crate::test_util::*;
use crate::Error;

const A: TypeIndex = TypeIndex(2);
const B: TypeIndex = TypeIndex(3);
const C: TypeIndex = TypeIndex(4);

#[test]
fn test_completed_handle() {
    let handle = JobHandle::default();
    assert!(handle.is_completed());
    handle.complete();
    assert!(handle.ptr_eq(&JobHandle::completed()));

    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = Arc::clone(&ran);
    handle.on_complete(move || ran_clone.store(true, Ordering::SeqCst));
    assert!(ran.load(Ordering::SeqCst), "continuations of completed handles run immediately");
}

#[test]
fn test_pending_handle() {
    init();

    let (handle, completer) = JobHandle::pending();
    let clone = handle.clone();
    assert!(!handle.is_completed());
    assert!(clone.ptr_eq(&handle));
    assert!(!clone.ptr_eq(&JobHandle::completed()));

    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = Arc::clone(&ran);
    handle.on_complete(move || ran_clone.store(true, Ordering::SeqCst));
    assert!(!ran.load(Ordering::SeqCst));

    completer.complete();
    assert!(ran.load(Ordering::SeqCst));
    assert!(clone.is_completed());
}

#[test]
fn test_dropped_completer_releases_waiters() {
    init();

    let (handle, completer) = JobHandle::pending();
    let thread = std::thread::spawn(move || drop(completer));
    handle.complete();
    assert!(handle.is_completed());
    thread.join().expect("completer thread");
}

#[test]
fn test_combine() {
    init();

    assert!(JobHandle::combine([]).is_completed());

    let (first, first_completer) = JobHandle::pending();
    let (second, second_completer) = JobHandle::pending();

    let single = JobHandle::combine([JobHandle::completed(), first.clone()]);
    assert!(single.ptr_eq(&first));

    let both = JobHandle::combine([first.clone(), JobHandle::completed(), second.clone()]);
    assert!(!both.is_completed());
    first_completer.complete();
    assert!(!both.is_completed());
    second_completer.complete();
    assert!(both.is_completed());
}

#[test]
fn test_manager_orders_readers_and_writers() {
    init();

    let mut manager = DependencyManager::new(5);
    let (writer, writer_completer) = JobHandle::pending();
    manager.add_dependency(&[], &[A], writer.clone());

    // readers wait for the last writer
    assert!(manager.get_dependency(&[A], &[]).ptr_eq(&writer));
    assert!(manager.get_dependency(&[B], &[C]).is_completed());

    let (reader, reader_completer) = JobHandle::pending();
    manager.add_dependency(&[A], &[], reader.clone());

    // a new writer waits for the writer and every reader
    let dependency = manager.get_dependency(&[], &[A]);
    writer_completer.complete();
    assert!(!dependency.is_completed());
    reader_completer.complete();
    assert!(dependency.is_completed());

    // registering a writer replaces the readers
    let (next, _next_completer) = JobHandle::pending();
    manager.add_dependency(&[], &[A], next.clone());
    assert!(manager.get_dependency(&[], &[A]).ptr_eq(&next));
}

#[test]
fn test_pending_job_count() {
    init();

    let mut manager = DependencyManager::new(2);
    assert_eq!(manager.pending_job_count(), 0);
    manager.add_dependency(&[], &[A], JobHandle::completed());
    assert!(manager.check_no_pending_jobs().is_ok());

    let (handle, completer) = JobHandle::pending();
    manager.add_dependency(&[A, B], &[C], handle);
    assert!(manager.type_count() > C.get());
    assert_eq!(manager.pending_job_count(), 1, "one job touching three types counts once");
    assert_eq!(
        manager.check_no_pending_jobs(),
        Err(Error::StructuralChangeWithPendingJobs { pending: 1 })
    );

    completer.complete();
    assert_eq!(manager.check_no_pending_jobs(), Ok(()));
}

#[test]
fn test_immediate_scheduler() {
    init();

    let mut manager = DependencyManager::new(5);
    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = Arc::clone(&ran);
    let handle =
        manager.schedule(&Immediate, &[A], &[B], move || ran_clone.store(true, Ordering::SeqCst));

    assert!(ran.load(Ordering::SeqCst));
    assert!(handle.is_completed());
    assert_eq!(manager.pending_job_count(), 0);
}

#[test]
fn test_readers_run_concurrently() {
    init();

    let pool = ThreadPool::new(2);
    let mut manager = DependencyManager::new(5);
    let semaphore = Arc::new(AntiSemaphore::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let semaphore = Arc::clone(&semaphore);
            manager.schedule(&pool, &[A], &[], move || semaphore.wait())
        })
        .collect();

    manager.complete_all();
    assert!(handles.iter().all(JobHandle::is_completed));
}

#[test]
fn test_writer_waits_for_readers() {
    init();

    let pool = ThreadPool::new(3);
    let mut manager = DependencyManager::new(5);
    let latch = Arc::new(Latch::default());
    let log = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..2 {
        let latch = Arc::clone(&latch);
        let log = Arc::clone(&log);
        manager.schedule(&pool, &[A], &[], move || {
            latch.wait();
            log.lock().push("read");
        });
    }
    let writer = {
        let log = Arc::clone(&log);
        manager.schedule(&pool, &[], &[A], move || log.lock().push("write"))
    };

    assert!(!writer.is_completed());
    assert_eq!(manager.pending_job_count(), 1, "the writer supersedes the readers");

    latch.open();
    manager.complete_write_dependency(A);
    assert_eq!(*log.lock(), ["read", "read", "write"]);
}

#[test]
fn test_pending_job_blocks_structural_changes() {
    init();

    let pool = ThreadPool::new(1);
    let (mut store, types) = store();
    let latch = Arc::new(Latch::default());

    let job_latch = Arc::clone(&latch);
    store.dependencies_mut().schedule(&pool, &[], &[types.position], move || job_latch.wait());
    assert_eq!(
        store.create_entity_with(&[types.health]),
        Err(Error::StructuralChangeWithPendingJobs { pending: 1 })
    );
    assert_eq!(store.entity_count(), 0);

    latch.open();
    store.complete_all_jobs();
    store.create_entity_with(&[types.health]).expect("no pending jobs");
}
