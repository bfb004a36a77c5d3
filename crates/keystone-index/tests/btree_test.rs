//! B+-tree integration tests.
//!
//! These drive the tree through the page pool exactly as the engine does:
//! small node capacities to force deep trees, small pools to force
//! eviction, and a structural audit after every interesting sequence.

use keystone_buffer::PagePool;
use keystone_common::config::{BufferPoolConfig, IndexConfig};
use keystone_common::error::KeystoneError;
use keystone_common::page::PageId;
use keystone_common::rid::Rid;
use keystone_common::types::TxnId;
use keystone_concurrency::Transaction;
use keystone_index::{
    BPlusTree, HeaderPage, IndexKey, IndexKeyComparator, KeyFromInteger, Node, OrdComparator,
};
use rand::Rng;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

type IntTree = BPlusTree<i64, i64, OrdComparator<i64>>;

struct Fixture {
    pool: Arc<PagePool<Node<i64, i64>>>,
    header: Arc<HeaderPage>,
    tree: IntTree,
    txn: Transaction,
}

fn fixture(leaf_max: usize, internal_max: usize, num_frames: usize) -> Fixture {
    let pool = Arc::new(PagePool::new(BufferPoolConfig { num_frames }));
    let header = Arc::new(HeaderPage::new());
    let tree = BPlusTree::new(
        "test_index",
        Arc::clone(&pool),
        Arc::clone(&header),
        OrdComparator::new(),
        &IndexConfig {
            leaf_max_size: leaf_max,
            internal_max_size: internal_max,
        },
    );
    Fixture {
        pool,
        header,
        tree,
        txn: Transaction::new(TxnId(0)),
    }
}

/// Depth-first structural audit: parent links, occupancy bounds, and the
/// left-to-right order of the leaves.
fn audit_node(
    pool: &PagePool<Node<i64, i64>>,
    page_id: PageId,
    expected_parent: PageId,
    leaves: &mut Vec<PageId>,
) {
    let handle = pool.fetch(page_id).expect("tree page should be fetchable");
    let (children, size, min_size, max_size, is_leaf, parent) = {
        let node = handle.read();
        let children = node
            .as_internal()
            .map(|internal| internal.children().to_vec())
            .unwrap_or_default();
        (
            children,
            node.size(),
            node.min_size(),
            node.max_size(),
            node.is_leaf(),
            node.parent_page_id(),
        )
    };
    pool.unpin(page_id, false);

    assert_eq!(parent, expected_parent, "bad parent link on {page_id}");
    assert!(size <= max_size, "overfull node {page_id}");
    let is_root = !expected_parent.is_valid();
    if is_root {
        if !is_leaf {
            assert!(size >= 2, "internal root of {page_id} kept too few children");
        }
    } else {
        assert!(size >= min_size, "underfull node {page_id}");
    }

    if is_leaf {
        leaves.push(page_id);
    }
    for child in children {
        audit_node(pool, child, page_id, leaves);
    }
}

fn check_invariants(f: &Fixture) {
    assert_eq!(
        f.pool.pinned_page_count(),
        0,
        "operations must release every pin"
    );
    let root_id = f.tree.root_page_id();
    if !root_id.is_valid() {
        return;
    }

    let mut leaves = Vec::new();
    audit_node(&f.pool, root_id, PageId::INVALID, &mut leaves);

    // The chain visits exactly the tree's leaves, left to right, with
    // strictly ascending keys across the whole chain.
    let mut chained = Vec::new();
    let mut all_keys = Vec::new();
    let mut current = leaves.first().copied();
    while let Some(page_id) = current {
        let handle = f.pool.fetch(page_id).expect("chained leaf should be fetchable");
        let next = {
            let node = handle.read();
            let leaf = node.as_leaf().expect("chained page is a leaf");
            for i in 0..leaf.size() {
                all_keys.push(*leaf.key_at(i));
            }
            leaf.next_page_id()
        };
        f.pool.unpin(page_id, false);
        chained.push(page_id);
        current = next.is_valid().then_some(next);
    }
    assert_eq!(chained, leaves, "leaf chain disagrees with tree order");

    let mut sorted = all_keys.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(all_keys, sorted, "keys must ascend strictly along the chain");

    assert_eq!(f.pool.pinned_page_count(), 0, "audit must release every pin");
}

fn collect_keys(f: &Fixture) -> Vec<i64> {
    f.tree
        .begin()
        .expect("iterator should start")
        .map(|(key, _)| key)
        .collect()
}

#[test]
fn test_empty_tree() {
    let f = fixture(3, 3, 16);

    assert!(f.tree.is_empty());
    let mut result = Vec::new();
    assert!(!f.tree.get_value(&1, &mut result));
    assert!(result.is_empty());
    assert!(f.tree.begin().unwrap().is_end());

    // Removing from an empty tree is a quiet no-op.
    f.tree.remove(&1, &f.txn).unwrap();
    check_invariants(&f);
}

#[test]
fn test_round_trip_small() {
    let f = fixture(3, 3, 64);

    for key in 1..=10 {
        assert!(f.tree.insert(key, key * 100, &f.txn).unwrap());
    }
    check_invariants(&f);

    for key in 1..=10 {
        let mut result = Vec::new();
        assert!(f.tree.get_value(&key, &mut result), "lookup of {key}");
        assert_eq!(result, vec![key * 100]);
    }
    assert_eq!(collect_keys(&f), (1..=10).collect::<Vec<_>>());

    for key in [3, 7, 5] {
        f.tree.remove(&key, &f.txn).unwrap();
        check_invariants(&f);
    }

    for key in [3, 7, 5] {
        let mut result = Vec::new();
        assert!(!f.tree.get_value(&key, &mut result));
    }
    for key in [1, 2, 4, 6, 8, 9, 10] {
        let mut result = Vec::new();
        assert!(f.tree.get_value(&key, &mut result));
        assert_eq!(result, vec![key * 100]);
    }
    assert_eq!(collect_keys(&f), vec![1, 2, 4, 6, 8, 9, 10]);
}

#[test]
fn test_duplicate_insert_rejected() {
    let f = fixture(3, 3, 16);

    assert!(f.tree.insert(5, 500, &f.txn).unwrap());
    assert!(!f.tree.insert(5, 501, &f.txn).unwrap());

    let mut result = Vec::new();
    assert!(f.tree.get_value(&5, &mut result));
    assert_eq!(result, vec![500], "first write wins");
    check_invariants(&f);
}

#[test]
fn test_descending_and_interleaved_inserts() {
    let f = fixture(3, 3, 64);

    for key in (1..=60).rev() {
        assert!(f.tree.insert(key, key, &f.txn).unwrap());
    }
    check_invariants(&f);
    assert_eq!(collect_keys(&f), (1..=60).collect::<Vec<_>>());

    // Interleave removals from both ends.
    for key in 1..=15 {
        f.tree.remove(&key, &f.txn).unwrap();
        f.tree.remove(&(61 - key), &f.txn).unwrap();
    }
    check_invariants(&f);
    assert_eq!(collect_keys(&f), (16..=45).collect::<Vec<_>>());
}

#[test]
fn test_iterator_termination() {
    const N: i64 = 50;
    let f = fixture(4, 4, 128);

    for key in 1..=N {
        f.tree.insert(key, key, &f.txn).unwrap();
    }

    let mut iter = f.tree.begin().unwrap();
    let mut count = 0;
    while !iter.is_end() {
        iter.current().unwrap();
        iter.advance().unwrap();
        count += 1;
    }
    assert_eq!(count, N);
    assert!(matches!(
        iter.current(),
        Err(KeystoneError::IteratorOutOfRange)
    ));
    assert!(matches!(
        iter.advance(),
        Err(KeystoneError::IteratorOutOfRange)
    ));

    drop(iter);
    check_invariants(&f);
}

#[test]
fn test_iterator_from_key() {
    let f = fixture(3, 3, 64);

    for key in (2..=40).step_by(2) {
        f.tree.insert(key, key, &f.txn).unwrap();
    }

    let keys: Vec<i64> = f.tree.begin_from(&20).unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (20..=40).step_by(2).collect::<Vec<_>>());

    // A key between entries starts at the next greater one.
    let keys: Vec<i64> = f.tree.begin_from(&21).unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (22..=40).step_by(2).collect::<Vec<_>>());

    // Past the maximum: immediately exhausted.
    assert!(f.tree.begin_from(&41).unwrap().is_end());
    check_invariants(&f);
}

#[test]
fn test_delete_until_empty_and_regrow() {
    let f = fixture(3, 3, 64);

    for key in 1..=20 {
        f.tree.insert(key, key, &f.txn).unwrap();
    }
    for key in 1..=20 {
        f.tree.remove(&key, &f.txn).unwrap();
        check_invariants(&f);
    }
    assert!(f.tree.is_empty());
    assert_eq!(f.header.get_record("test_index"), Some(PageId::INVALID));

    // The emptied index accepts a fresh workload.
    for key in 100..=120 {
        assert!(f.tree.insert(key, key, &f.txn).unwrap());
    }
    check_invariants(&f);
    assert_eq!(collect_keys(&f), (100..=120).collect::<Vec<_>>());
}

#[test]
fn test_header_tracks_root_changes() {
    let f = fixture(3, 3, 64);

    f.tree.insert(1, 1, &f.txn).unwrap();
    assert_eq!(
        f.header.get_record("test_index"),
        Some(f.tree.root_page_id())
    );

    // Push the tree through several root splits.
    for key in 2..=50 {
        f.tree.insert(key, key, &f.txn).unwrap();
    }
    assert_eq!(
        f.header.get_record("test_index"),
        Some(f.tree.root_page_id())
    );
    check_invariants(&f);
}

#[test]
fn test_eviction_under_small_pool() {
    // Far more pages than frames: the deep paths keep crossing in and out
    // of the pool's backing store.
    let f = fixture(4, 4, 16);

    for key in 1..=500 {
        assert!(f.tree.insert(key, key * 3, &f.txn).unwrap(), "insert {key}");
    }
    check_invariants(&f);

    for key in (1..=500).step_by(31) {
        let mut result = Vec::new();
        assert!(f.tree.get_value(&key, &mut result));
        assert_eq!(result, vec![key * 3]);
    }
    assert_eq!(collect_keys(&f).len(), 500);
}

#[test]
fn test_random_stress_against_oracle() {
    let f = fixture(4, 5, 32);
    let mut oracle: BTreeMap<i64, i64> = BTreeMap::new();
    let mut rng = rand::rng();

    for _ in 0..2_000 {
        let key = rng.random_range(0..300);
        if rng.random_range(0..3) == 0 {
            f.tree.remove(&key, &f.txn).unwrap();
            oracle.remove(&key);
        } else {
            let value = key * 7;
            let inserted = f.tree.insert(key, value, &f.txn).unwrap();
            assert_eq!(
                inserted,
                !oracle.contains_key(&key),
                "duplicate detection diverged on {key}"
            );
            oracle.entry(key).or_insert(value);
        }
    }
    check_invariants(&f);

    for key in 0..300 {
        let mut result = Vec::new();
        let found = f.tree.get_value(&key, &mut result);
        match oracle.get(&key) {
            Some(value) => {
                assert!(found, "oracle has {key} but the tree lost it");
                assert_eq!(result, vec![*value]);
            }
            None => assert!(!found, "tree kept removed key {key}"),
        }
    }

    let scanned: Vec<(i64, i64)> = f.tree.begin().unwrap().collect();
    let expected: Vec<(i64, i64)> = oracle.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(scanned, expected, "scan must match the oracle exactly");
    check_invariants(&f);
}

#[test]
fn test_insert_and_remove_from_file() {
    let pool: Arc<PagePool<Node<IndexKey, Rid>>> =
        Arc::new(PagePool::new(BufferPoolConfig { num_frames: 64 }));
    let header = Arc::new(HeaderPage::new());
    let tree: BPlusTree<IndexKey, Rid, IndexKeyComparator> = BPlusTree::new(
        "file_index",
        Arc::clone(&pool),
        header,
        IndexKeyComparator,
        &IndexConfig {
            leaf_max_size: 4,
            internal_max_size: 4,
        },
    );
    let txn = Transaction::new(TxnId(0));

    let dir = tempfile::tempdir().unwrap();
    let load_path = dir.path().join("keys.txt");
    let mut file = std::fs::File::create(&load_path).unwrap();
    for key in 1..=100i64 {
        writeln!(file, "{key}").unwrap();
    }
    drop(file);

    assert_eq!(tree.insert_from_file(&load_path, &txn).unwrap(), 100);
    // Reloading the same file inserts nothing new.
    assert_eq!(tree.insert_from_file(&load_path, &txn).unwrap(), 0);

    for key in 1..=100i64 {
        let mut result = Vec::new();
        assert!(tree.get_value(&IndexKey::from_integer(key), &mut result));
        assert_eq!(result, vec![Rid::from(key)]);
    }

    let remove_path = dir.path().join("removals.txt");
    let mut file = std::fs::File::create(&remove_path).unwrap();
    for key in (1..=100i64).filter(|k| k % 2 == 0) {
        writeln!(file, "{key}").unwrap();
    }
    drop(file);
    tree.remove_from_file(&remove_path, &txn).unwrap();

    for key in 1..=100i64 {
        let mut result = Vec::new();
        let found = tree.get_value(&IndexKey::from_integer(key), &mut result);
        assert_eq!(found, key % 2 == 1, "key {key}");
    }
    assert_eq!(pool.pinned_page_count(), 0);
}

#[test]
fn test_bad_key_file_is_rejected() {
    let f = fixture(3, 3, 16);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.txt");
    std::fs::write(&path, "1\ntwo\n3\n").unwrap();

    assert!(matches!(
        f.tree.insert_from_file(&path, &f.txn),
        Err(KeystoneError::InvalidInput(_))
    ));
    check_invariants(&f);
}
