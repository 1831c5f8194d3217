//! Deterministic workload scenarios pinning down the fast-path behavior:
//! monotone bursts stay on the fast path, reversals force hard resets,
//! and the split chooser keeps hot regions intact around outliers.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use hotleaf::{BlockManager, QuitTree};

#[test]
fn strict_monotone_ascending() {
    let manager = BlockManager::new(8192);
    let tree: QuitTree = QuitTree::new(&manager);

    for k in 1..=10_000u64 {
        tree.insert(k, k);
    }

    let snap = tree.stats_snapshot();
    assert_eq!(snap.size, 10_000);
    // Only the transitions around splits may miss.
    assert!(
        snap.fast_hits >= 9_900,
        "fast hits {} below expectation",
        snap.fast_hits
    );
    assert!(snap.leaves >= 2, "10k keys cannot fit one leaf");
    assert!(tree.contains(5_000));
    assert!(!tree.contains(10_001));
}

#[test]
fn reverse_monotone_descending() {
    let manager = BlockManager::new(8192);
    let tree: QuitTree = QuitTree::new(&manager);

    for k in (1..=10_000u64).rev() {
        tree.insert(k, k);
    }

    let snap = tree.stats_snapshot();
    assert_eq!(snap.size, 10_000);
    assert!(
        snap.hard_resets > 0,
        "descending inserts must invalidate the fast path"
    );
    let keys: Vec<u64> = tree.scan_all().iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, (1..=10_000).collect::<Vec<_>>());
}

#[test]
fn uniform_random_permutation() {
    let manager = BlockManager::new(8192);
    let tree: QuitTree = QuitTree::new(&manager);

    let mut keys: Vec<u64> = (1..=10_000).collect();
    keys.shuffle(&mut ChaCha8Rng::seed_from_u64(42));
    for &k in &keys {
        tree.insert(k, k);
    }

    assert_eq!(tree.len(), 10_000);
    let scanned: Vec<u64> = tree.scan_all().iter().map(|(k, _)| *k).collect();
    assert_eq!(scanned, (1..=10_000).collect::<Vec<_>>());
}

#[test]
fn burst_with_outliers_keeps_hot_range() {
    let manager = BlockManager::new(8192);
    let tree: QuitTree = QuitTree::new(&manager);

    let mut inserted = 0u64;
    for rep in 0..50u64 {
        let base = rep * 200;
        for k in base + 1..=base + 100 {
            tree.insert(k, k);
            inserted += 1;
        }
        tree.insert(1_000_000 + rep, rep);
        inserted += 1;
        for k in base + 101..=base + 200 {
            tree.insert(k, k);
            inserted += 1;
        }
    }

    let snap = tree.stats_snapshot();
    assert_eq!(snap.size, inserted);
    // The hot range must survive each outlier; the fast path dominates.
    assert!(
        snap.fast_hits as u64 > inserted * 3 / 4,
        "fast hits {} of {} inserts",
        snap.fast_hits,
        inserted
    );
    assert!(
        snap.hard_resets <= 50,
        "at most one hard reset per burst boundary, got {}",
        snap.hard_resets
    );
    let keys: Vec<u64> = tree.scan_all().iter().map(|(k, _)| *k).collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn duplicate_key_inserts_update() {
    let manager = BlockManager::new(64);
    let tree: QuitTree = QuitTree::new(&manager);

    tree.insert(7, 1);
    tree.insert(7, 2);
    tree.insert(7, 3);

    assert_eq!(tree.len(), 1);
    assert_eq!(tree.get(7), Some(3));
}

#[test]
fn concurrent_disjoint_partitions() {
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 100_000;

    let manager = BlockManager::new(32_768);
    let tree: QuitTree = QuitTree::new(&manager);

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let tree = &tree;
            scope.spawn(move || {
                let base = t * 1_000_000;
                for k in base..base + PER_THREAD {
                    tree.insert(k, k);
                }
            });
        }
    });

    assert_eq!(tree.len(), THREADS * PER_THREAD);
    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let tree = &tree;
            scope.spawn(move || {
                let base = t * 1_000_000;
                for k in base..base + PER_THREAD {
                    assert!(tree.contains(k), "lost key {k}");
                }
            });
        }
    });

    let scanned: Vec<u64> = tree.scan_all().iter().map(|(k, _)| *k).collect();
    assert_eq!(scanned.len() as u64, THREADS * PER_THREAD);
    assert!(scanned.windows(2).all(|w| w[0] < w[1]));
}
