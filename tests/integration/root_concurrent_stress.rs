//! Root cell behavior under concurrent writers.
//!
//! Validates the optimistic publication protocol with real threads:
//! - exactly one of two racing writers wins a swap, the loser recovers
//! - every attempt, failed or not, lands in the attempt counter
//! - the update lock excludes other threads and is reentrant for its owner

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use bramble::root::RootCell;
use bramble::tree::PageRef;
use rand::Rng;

use common::TestPage;

fn new_cell(count: u64) -> Arc<RootCell> {
    Arc::new(RootCell::new(TestPage::unsaved(count, true, 16) as PageRef, 1))
}

#[test]
fn single_writer_wins() {
    common::init_tracing();
    let cell = new_cell(0);
    let barrier = Arc::new(Barrier::new(2));
    let wins = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let cell = Arc::clone(&cell);
            let barrier = Arc::clone(&barrier);
            let wins = Arc::clone(&wins);
            thread::spawn(move || {
                let stale = cell.load_full();
                barrier.wait();
                let attempt = cell.publish_new_root(
                    &stale,
                    TestPage::unsaved(1, true, 16) as PageRef,
                    1,
                    None,
                );
                if attempt.is_some() {
                    wins.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                // The loser sees the winner's snapshot and succeeds on it.
                let fresh = cell.load_full();
                assert!(!Arc::ptr_eq(&fresh, &stale));
                cell.publish_new_root(&fresh, TestPage::unsaved(2, true, 16) as PageRef, 2, None)
                    .expect("retry against the fresh snapshot succeeds");
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    let published = cell.load_full();
    assert_eq!(published.update_counter(), 3);
    assert_eq!(published.update_attempt_counter(), 4);
}

#[test]
fn counters_account_for_every_attempt() {
    common::init_tracing();
    const WRITERS: usize = 4;
    const UPDATES_PER_WRITER: usize = 250;

    let cell = new_cell(0);
    let barrier = Arc::new(Barrier::new(WRITERS));
    let total_attempts = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let cell = Arc::clone(&cell);
            let barrier = Arc::clone(&barrier);
            let total_attempts = Arc::clone(&total_attempts);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                barrier.wait();
                for _ in 0..UPDATES_PER_WRITER {
                    let mut delta = 1u64;
                    loop {
                        let current = cell.load_full();
                        let root =
                            TestPage::unsaved(rng.gen_range(0..100), true, 16) as PageRef;
                        if cell.publish_new_root(&current, root, delta, None).is_some() {
                            total_attempts.fetch_add(delta, Ordering::SeqCst);
                            break;
                        }
                        delta += 1;
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let published = cell.load_full();
    assert_eq!(
        published.update_counter(),
        1 + (WRITERS * UPDATES_PER_WRITER) as u64
    );
    assert_eq!(
        published.update_attempt_counter(),
        1 + total_attempts.load(Ordering::SeqCst)
    );
}

#[test]
fn update_lock_excludes_other_threads() {
    common::init_tracing();
    let cell = new_cell(0);
    let unlocked = cell.load_full();
    let locked = cell
        .try_acquire_update_lock(&unlocked, 1)
        .expect("uncontended acquisition");

    {
        let cell = Arc::clone(&cell);
        thread::spawn(move || {
            let current = cell.load_full();
            assert!(current.is_locked());
            assert!(!current.locked_by_current_thread());
            assert!(cell.try_acquire_update_lock(&current, 1).is_none());
            assert!(cell
                .publish_new_root(&current, TestPage::unsaved(1, true, 16) as PageRef, 1, None)
                .is_none());
        })
        .join()
        .unwrap();
    }

    let released = cell
        .publish_locked_update(
            &locked,
            TestPage::unsaved(2, true, 16) as PageRef,
            0,
            true,
            None,
        )
        .expect("owner releases");
    assert!(!released.is_locked());

    thread::spawn(move || {
        let current = cell.load_full();
        let relocked = cell
            .try_acquire_update_lock(&current, 1)
            .expect("lock is free again");
        assert_eq!(relocked.hold_count(), 1);
        cell.publish_locked_update(
            &relocked,
            TestPage::unsaved(3, true, 16) as PageRef,
            0,
            true,
            None,
        )
        .expect("owner releases");
    })
    .join()
    .unwrap();
}

#[test]
fn lock_reentrancy_requires_matching_releases() {
    common::init_tracing();
    let cell = new_cell(0);
    let mut snapshot = cell.load_full();
    for expected_holds in 1..=3u8 {
        snapshot = cell
            .try_acquire_update_lock(&snapshot, 1)
            .expect("same-thread reentry");
        assert_eq!(snapshot.hold_count(), expected_holds);
    }

    for remaining in (0..3u8).rev() {
        snapshot = cell
            .publish_locked_update(
                &snapshot,
                TestPage::unsaved(u64::from(remaining), true, 16) as PageRef,
                0,
                true,
                None,
            )
            .expect("owner releases one hold");
        assert_eq!(snapshot.hold_count(), remaining);

        let cell = Arc::clone(&cell);
        let expect_locked = remaining > 0;
        thread::spawn(move || {
            let current = cell.load_full();
            let acquired = cell.try_acquire_update_lock(&current, 1);
            if expect_locked {
                assert!(acquired.is_none(), "lock leaked with {remaining} holds left");
            } else {
                let relocked = acquired.expect("fully released lock is acquirable");
                cell.publish_locked_update(
                    &relocked,
                    TestPage::unsaved(0, true, 16) as PageRef,
                    0,
                    true,
                    None,
                )
                .expect("owner releases");
            }
        })
        .join()
        .unwrap();
    }
}
