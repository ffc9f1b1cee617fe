//! Tests for the prefix cache: lookup, insertion, and block accounting.

use radix_serve::cache::radix::{CacheError, InsertOutcome, NodeId, RadixCache, ROOT_NODE};
use radix_serve::config::CacheConfig;

fn cache_with_blocks(num_blocks: usize) -> RadixCache {
    RadixCache::new(&CacheConfig {
        num_blocks,
        block_size: 16,
    })
}

fn inserted(outcome: InsertOutcome) -> NodeId {
    match outcome {
        InsertOutcome::Inserted { node } => node,
        other => panic!("expected a fresh insert, got {other:?}"),
    }
}

#[test]
fn test_insert_then_match_round_trip() {
    let mut cache = cache_with_blocks(8);

    let node = inserted(cache.insert(&[1, 2, 3], ROOT_NODE).unwrap());

    let m = cache.match_prefix(&[1, 2, 3, 4, 5]);
    assert_eq!(m.node, node);
    assert_eq!(m.matched, 3);

    // Unrelated prompt matches nothing.
    let m = cache.match_prefix(&[7, 8, 9]);
    assert_eq!(m.node, ROOT_NODE);
    assert_eq!(m.matched, 0);
}

#[test]
fn test_partial_edge_earns_no_credit() {
    let mut cache = cache_with_blocks(8);

    // The whole sequence lives on a single edge. A prompt sharing only the
    // first three tokens diverges inside that edge, so nothing matches.
    cache.insert(&[101, 102, 103, 501], ROOT_NODE).unwrap();

    let m = cache.match_prefix(&[101, 102, 103, 777]);
    assert_eq!(m.node, ROOT_NODE);
    assert_eq!(m.matched, 0);
}

#[test]
fn test_split_insertion_matches_shared_prefix() {
    let mut cache = cache_with_blocks(8);

    // Same token material as above, but inserted as prefix + suffix edges.
    // Now the shared prefix is a whole edge and matches on its own.
    let prefix = inserted(cache.insert(&[101, 102, 103], ROOT_NODE).unwrap());
    cache.insert(&[501], prefix).unwrap();

    let m = cache.match_prefix(&[101, 102, 103, 777]);
    assert_eq!(m.node, prefix);
    assert_eq!(m.matched, 3);
}

#[test]
fn test_empty_suffix_insert_is_noop() {
    let mut cache = cache_with_blocks(4);
    let stats_before = cache.stats();

    let outcome = cache.insert(&[], ROOT_NODE).unwrap();
    assert_eq!(outcome, InsertOutcome::Noop);

    let stats = cache.stats();
    assert_eq!(stats.nodes, stats_before.nodes);
    assert_eq!(stats.free_blocks, stats_before.free_blocks);
}

#[test]
fn test_colliding_insert_reuses_node_and_frees_block() {
    let mut cache = cache_with_blocks(8);

    let winner = inserted(cache.insert(&[1, 2], ROOT_NODE).unwrap());
    let free_after_first = cache.free_blocks();

    // Same anchor, same first token, different tail: the established edge
    // wins and the loser's block goes back to the pool.
    let outcome = cache.insert(&[1, 9], ROOT_NODE).unwrap();
    assert_eq!(outcome, InsertOutcome::ReusedExisting { node: winner });
    assert_eq!(cache.free_blocks(), free_after_first);

    // The winning edge is intact; the losing tail is simply not cached.
    assert_eq!(cache.match_prefix(&[1, 2]).matched, 2);
    assert_eq!(cache.match_prefix(&[1, 9]).matched, 0);
}

#[test]
fn test_exact_duplicate_insert_reuses_node() {
    let mut cache = cache_with_blocks(8);

    let node = inserted(cache.insert(&[4, 5, 6], ROOT_NODE).unwrap());
    let outcome = cache.insert(&[4, 5, 6], ROOT_NODE).unwrap();
    assert_eq!(outcome, InsertOutcome::ReusedExisting { node });
    assert_eq!(cache.stats().nodes, 1);
}

#[test]
fn test_exhausted_insert_fails_cleanly() {
    let mut cache = cache_with_blocks(2);

    cache.insert(&[1], ROOT_NODE).unwrap();
    cache.insert(&[2], ROOT_NODE).unwrap();

    let err = cache.insert(&[3], ROOT_NODE).unwrap_err();
    assert!(matches!(err, CacheError::Exhausted));

    // The failed insert left no trace.
    assert_eq!(cache.stats().nodes, 2);
    assert_eq!(cache.match_prefix(&[3]).matched, 0);

    // After one eviction the insert goes through.
    assert!(cache.evict_one());
    cache.insert(&[3], ROOT_NODE).unwrap();
    assert_eq!(cache.match_prefix(&[3]).matched, 1);
}

#[test]
fn test_lookup_refreshes_recency() {
    let mut cache = cache_with_blocks(2);

    cache.insert(&[1], ROOT_NODE).unwrap();
    cache.insert(&[2], ROOT_NODE).unwrap();

    // Touch the older edge; the untouched one becomes the LRU victim.
    cache.match_prefix(&[1]);
    assert!(cache.evict_one());

    assert_eq!(cache.match_prefix(&[1]).matched, 1);
    assert_eq!(cache.match_prefix(&[2]).matched, 0);
}

#[test]
fn test_deep_path_matches_across_edges() {
    let mut cache = cache_with_blocks(8);

    let a = inserted(cache.insert(&[1, 2], ROOT_NODE).unwrap());
    let b = inserted(cache.insert(&[3, 4], a).unwrap());
    let c = inserted(cache.insert(&[5], b).unwrap());

    let m = cache.match_prefix(&[1, 2, 3, 4, 5, 6]);
    assert_eq!(m.node, c);
    assert_eq!(m.matched, 5);

    // A prompt ending mid-path stops at the last whole edge.
    let m = cache.match_prefix(&[1, 2, 3, 4]);
    assert_eq!(m.node, b);
    assert_eq!(m.matched, 4);
}
