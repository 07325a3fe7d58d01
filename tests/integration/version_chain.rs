//! Version-chain history: monotonicity, snapshot isolation, and pruning.

mod common;

use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use bramble::root::{RootCell, RootSnapshot};
use bramble::tree::PageRef;
use bramble::types::Version;

use common::TestPage;

fn chain_versions(head: &Arc<RootSnapshot>) -> Vec<Version> {
    let mut versions = Vec::new();
    let mut node = Some(Arc::clone(head));
    while let Some(snapshot) = node {
        versions.push(snapshot.version());
        node = snapshot.previous();
    }
    versions
}

/// Builds a cell whose chain holds one snapshot per version `1..=last`,
/// with a data change inside every version so nothing collapses.
fn chained_cell(last: Version) -> Arc<RootCell> {
    let cell = Arc::new(RootCell::new(TestPage::unsaved(0, true, 16) as PageRef, 1));
    for version in 2..=last {
        let before = cell.load_full();
        let swapped = cell
            .publish_new_root(&before, TestPage::unsaved(1, true, 16) as PageRef, 1, None)
            .expect("uncontended swap");
        cell.commit_version_boundary(&swapped, version, 1)
            .expect("monotonic version")
            .expect("uncontended commit");
    }
    cell
}

#[test]
fn committed_versions_strictly_increase() {
    common::init_tracing();
    const COMMITTERS: usize = 4;
    const COMMITS_PER_THREAD: usize = 50;

    let cell = Arc::new(RootCell::new(TestPage::unsaved(0, true, 16) as PageRef, 1));
    let barrier = Arc::new(Barrier::new(COMMITTERS));
    let committed = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..COMMITTERS)
        .map(|_| {
            let cell = Arc::clone(&cell);
            let barrier = Arc::clone(&barrier);
            let committed = Arc::clone(&committed);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..COMMITS_PER_THREAD {
                    loop {
                        let current = cell.load_full();
                        let target = current.version() + 1;
                        match cell.commit_version_boundary(&current, target, 1) {
                            Ok(Some(_)) => {
                                committed.lock().unwrap().push(target);
                                break;
                            }
                            Ok(None) => continue,
                            Err(err) => panic!("unexpected commit error: {err:?}"),
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut versions = committed.lock().unwrap().clone();
    versions.sort_unstable();
    let expected: Vec<Version> = (2..=(COMMITTERS * COMMITS_PER_THREAD + 1) as Version).collect();
    // Every committed version is distinct and the sequence has no holes:
    // each successful boundary moved the map forward by exactly one.
    assert_eq!(versions, expected);
    assert_eq!(cell.load_full().version(), *expected.last().unwrap());
}

#[test]
fn held_snapshots_are_immutable_views() {
    common::init_tracing();
    let cell = RootCell::new(TestPage::unsaved(5, true, 64) as PageRef, 1);
    let reader = cell.load_full();

    let swapped = cell
        .publish_new_root(&reader, TestPage::unsaved(9, true, 64) as PageRef, 1, None)
        .expect("uncontended swap");
    cell.commit_version_boundary(&swapped, 2, 1)
        .expect("monotonic version")
        .expect("uncontended commit");

    assert_eq!(reader.version(), 1);
    assert_eq!(reader.total_count(), 5);
    assert_eq!(cell.load_full().total_count(), 9);
}

#[test]
fn pruning_cuts_only_below_the_floor() {
    common::init_tracing();
    let cell = chained_cell(8);
    let head = cell.load_full();
    assert_eq!(chain_versions(&head), vec![8, 7, 6, 5, 4, 3, 2, 1]);

    cell.prune_versions_older_than(5);
    // The last root of version 4 survives: it is the first root of
    // version 5 and retaining version 5's history requires it. Everything
    // older is unreachable within one walk.
    assert_eq!(chain_versions(&head), vec![8, 7, 6, 5, 4]);

    // Pruning again at the same floor is a no-op.
    cell.prune_versions_older_than(5);
    assert_eq!(chain_versions(&head), vec![8, 7, 6, 5, 4]);
}

#[test]
fn pruning_races_with_chain_readers() {
    common::init_tracing();
    let cell = chained_cell(64);
    let head = cell.load_full();

    let walker = {
        let head = Arc::clone(&head);
        thread::spawn(move || {
            // Readers repeatedly walk whatever part of the chain is still
            // linked; a concurrent prune may shorten the walk but must
            // never corrupt it.
            for _ in 0..100 {
                let versions = chain_versions(&head);
                assert!(versions.windows(2).all(|w| w[0] > w[1]));
                assert_eq!(versions[0], 64);
            }
        })
    };
    // Raise the floor one version at a time, cutting one link per pass.
    for floor in 2..=64 {
        cell.prune_versions_older_than(floor);
    }
    walker.join().unwrap();

    assert_eq!(chain_versions(&head), vec![64, 63]);
}
