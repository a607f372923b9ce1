//! End-to-end tree scenarios exercising growth, splits, rebalances, root
//! collapse, and cache-driven NID rewriting.

use pagetree::{CacheConfig, Error, MemoryCache, Tree, TreeConfig};

fn open(degree: usize, capacity: usize) -> (Tree<u32, u32, MemoryCache<u32, u32>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig {
        capacity,
        backing_path: dir.path().join("scenario.db"),
        block_size: 512,
    };
    let cache = MemoryCache::open(config).unwrap();
    let tree = Tree::from_config(TreeConfig { degree }, cache).unwrap();
    tree.init().unwrap();
    (tree, dir)
}

#[test]
fn growth_by_insertion() {
    let (tree, _dir) = open(16, 1024);
    for k in 0u32..100 {
        tree.insert(k, k * 10).unwrap();
    }
    for k in 0u32..100 {
        assert_eq!(tree.search(&k).unwrap(), k * 10);
    }
    assert!(tree.search(&1000).is_err());
}

#[test]
fn root_splits_into_index_node() {
    // degree 3: a fourth leaf key forces a split and creates an index root.
    let (tree, _dir) = open(3, 1024);
    for k in 0u32..40 {
        tree.insert(k, k).unwrap();
    }
    let mut out = String::new();
    tree.print(&mut out).unwrap();
    assert!(out.contains("index"), "expected an index root after growth:\n{out}");
    for k in 0u32..40 {
        assert_eq!(tree.search(&k).unwrap(), k);
    }
}

#[test]
fn remove_triggers_leaf_redistribution() {
    let (tree, _dir) = open(4, 1024);
    for k in 0u32..30 {
        tree.insert(k, k).unwrap();
    }
    // Draining the lowest keys repeatedly forces redistribution from a
    // right sibling before any merge becomes necessary.
    for k in 0u32..6 {
        tree.remove(k).unwrap();
    }
    for k in 6u32..30 {
        assert_eq!(tree.search(&k).unwrap(), k);
    }
    for k in 0u32..6 {
        assert!(matches!(tree.search(&k), Err(Error::KeyDoesNotExist)));
    }
}

#[test]
fn remove_triggers_merge_and_parent_underflow() {
    let (tree, _dir) = open(3, 1024);
    for k in 0u32..60 {
        tree.insert(k, k).unwrap();
    }
    // Remove most of the keyspace so siblings repeatedly fall below the
    // minimum fill and must merge, propagating underflow up toward the root.
    for k in 0u32..55 {
        tree.remove(k).unwrap();
    }
    for k in 55u32..60 {
        assert_eq!(tree.search(&k).unwrap(), k);
    }
}

#[test]
fn root_collapses_to_single_leaf() {
    let (tree, _dir) = open(3, 1024);
    for k in 0u32..40 {
        tree.insert(k, k).unwrap();
    }
    for k in 0u32..39 {
        tree.remove(k).unwrap();
    }
    let mut out = String::new();
    tree.print(&mut out).unwrap();
    assert!(out.contains("leaf"), "expected the root to collapse to a leaf:\n{out}");
    assert!(!out.contains("index"), "root should no longer be an index node:\n{out}");
    assert_eq!(tree.search(&39).unwrap(), 39);
}

#[test]
fn nid_rewrite_mid_descent_on_eviction() {
    // A capacity of 2 forces most of the tree out to the backing file
    // between operations, so every later descent must follow at least one
    // File NID and rewrite its parent's slot in place.
    let (tree, _dir) = open(4, 2);
    for k in 0u32..50 {
        tree.insert(k, k).unwrap();
    }
    for k in 0u32..50 {
        assert_eq!(tree.search(&k).unwrap(), k);
    }
    tree.flush().unwrap();
    for k in (0u32..50).rev() {
        assert_eq!(tree.search(&k).unwrap(), k);
    }
    let (resident, mapped) = tree.cache_state();
    assert!(resident <= mapped);
}

#[test]
fn duplicate_key_is_rejected() {
    let (tree, _dir) = open(8, 1024);
    tree.insert(1, 10).unwrap();
    assert!(matches!(tree.insert(1, 99), Err(Error::DuplicateKey)));
    assert_eq!(tree.search(&1).unwrap(), 10);
}
