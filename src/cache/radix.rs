//! Radix tree over token sequences for prefix reuse.
//!
//! Nodes hold whole token-sequence edges; a lookup walks edges that match
//! their full key, so a system prompt computed once is found by every request
//! that shares it. Each node owns exactly one block from the pool. Eviction
//! reclaims the least recently used unpinned leaf, and pinning brackets a
//! request's use of a path so its anchor cannot vanish mid-flight.
//!
//! Shape mutations (insert, evict) require `&mut self` and run under the
//! shared handle's write lock. Lookups and pinning only touch atomics, so any
//! number of them proceed in parallel under the read lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::allocator::{AllocError, BlockAllocator, BlockId};
use crate::config::CacheConfig;
use crate::TokenId;

/// Stable node handle. IDs are never reused.
pub type NodeId = u64;

/// The root of the tree. Always present, never evicted, owns no block.
pub const ROOT_NODE: NodeId = 0;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("block pool exhausted")]
    Exhausted,

    #[error("anchor node {0} no longer exists")]
    StaleAnchor(NodeId),

    #[error(transparent)]
    Allocator(#[from] AllocError),
}

/// One edge of the tree: a token run, its block, and its bookkeeping.
#[derive(Debug)]
struct RadixNode {
    /// Edge label. Non-empty except on the root.
    key: Vec<TokenId>,

    /// Parent node. The root is its own parent.
    parent: NodeId,

    /// Children keyed by the first token of their edge.
    children: HashMap<TokenId, NodeId>,

    /// Block backing this edge's computed state. `None` only on the root.
    block: Option<BlockId>,

    /// Logical tick of the last lookup that traversed this node.
    last_access: AtomicU64,

    /// Number of in-flight requests depending on this node.
    pins: Arc<AtomicU32>,
}

/// Result of a longest-prefix lookup.
#[derive(Debug, Clone, Copy)]
pub struct PrefixMatch {
    /// Deepest node whose full path matched.
    pub node: NodeId,

    /// Number of prompt tokens covered by the match.
    pub matched: usize,
}

/// Releases the pins taken by [`RadixCache::pin_path`] when dropped.
///
/// Holds only atomic handles, so dropping it never takes a lock. A request
/// future that is cancelled mid-compute still unpins its path.
#[derive(Debug, Default)]
pub struct PinGuard {
    pins: Vec<Arc<AtomicU32>>,
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        for pin in &self.pins {
            pin.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// Outcome of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new node was created under the anchor.
    Inserted { node: NodeId },

    /// Another writer already cached an edge with the same first token; the
    /// freshly allocated block was returned to the pool.
    ReusedExisting { node: NodeId },

    /// Empty suffix; nothing to cache.
    Noop,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    /// Number of cached edges (root excluded).
    pub nodes: usize,

    /// Total tokens held across all cached edges.
    pub cached_tokens: usize,

    /// Nodes currently pinned by in-flight requests.
    pub pinned_nodes: usize,

    /// Running total of tokens matched across all lookups.
    pub total_tokens_saved: u64,

    /// Free blocks in the pool.
    pub free_blocks: usize,

    /// Total blocks in the pool.
    pub total_blocks: usize,

    /// Allocated fraction of the pool.
    pub utilization: f64,
}

/// Prefix cache: radix tree plus the block pool backing it.
#[derive(Debug)]
pub struct RadixCache {
    /// Node arena. Handles stay valid until eviction removes the node.
    nodes: HashMap<NodeId, RadixNode>,

    /// Next node handle to hand out.
    next_node_id: NodeId,

    /// Block pool. Every node's block comes from here and returns on evict.
    allocator: BlockAllocator,

    /// Logical clock driving LRU ordering.
    clock: AtomicU64,

    /// Running total of tokens matched across all lookups.
    total_tokens_saved: AtomicU64,

    /// Tokens held across all cached edges.
    cached_tokens: usize,
}

/// Shared cache handle: lookups under the read lock, mutations under write.
pub type SharedRadixCache = Arc<RwLock<RadixCache>>;

/// Create a shared cache from configuration.
pub fn new_shared_cache(config: &CacheConfig) -> SharedRadixCache {
    Arc::new(RwLock::new(RadixCache::new(config)))
}

impl RadixCache {
    /// Create a cache with an empty tree and a full pool.
    pub fn new(config: &CacheConfig) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_NODE,
            RadixNode {
                key: Vec::new(),
                parent: ROOT_NODE,
                children: HashMap::new(),
                block: None,
                last_access: AtomicU64::new(0),
                pins: Arc::new(AtomicU32::new(0)),
            },
        );

        Self {
            nodes,
            next_node_id: ROOT_NODE + 1,
            allocator: BlockAllocator::new(config.num_blocks),
            clock: AtomicU64::new(0),
            total_tokens_saved: AtomicU64::new(0),
            cached_tokens: 0,
        }
    }

    fn next_tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn touch(&self, node: &RadixNode) {
        node.last_access.store(self.next_tick(), Ordering::Relaxed);
    }

    // ─── Lookup ────────────────────────────────────────────────────────────

    /// Walk the tree for the longest cached prefix of `tokens`.
    ///
    /// Only whole edges count: an edge that matches partially contributes
    /// nothing and the walk stops above it. Returns the deepest matching node
    /// and the number of tokens covered; `(ROOT_NODE, 0)` when nothing
    /// matches. Refreshes recency on every node traversed.
    pub fn match_prefix(&self, tokens: &[TokenId]) -> PrefixMatch {
        let mut node_id = ROOT_NODE;
        let mut matched = 0;

        loop {
            let child_id = {
                let node = match self.nodes.get(&node_id) {
                    Some(n) => n,
                    None => break,
                };
                match tokens.get(matched).and_then(|t| node.children.get(t)) {
                    Some(&c) => c,
                    None => break,
                }
            };

            let key_len = {
                let child = match self.nodes.get(&child_id) {
                    Some(c) => c,
                    None => break,
                };
                if !tokens[matched..].starts_with(&child.key) {
                    break;
                }
                self.touch(child);
                child.key.len()
            };

            matched += key_len;
            node_id = child_id;
        }

        if matched > 0 {
            self.total_tokens_saved
                .fetch_add(matched as u64, Ordering::Relaxed);
        }

        PrefixMatch {
            node: node_id,
            matched,
        }
    }

    /// Pin `node` and every ancestor up to the root.
    ///
    /// Pinned nodes are skipped by eviction until the returned guard drops.
    pub fn pin_path(&self, node: NodeId) -> PinGuard {
        let mut pins = Vec::new();
        let mut current = node;

        while current != ROOT_NODE {
            match self.nodes.get(&current) {
                Some(n) => {
                    n.pins.fetch_add(1, Ordering::Relaxed);
                    pins.push(n.pins.clone());
                    current = n.parent;
                }
                None => break,
            }
        }

        PinGuard { pins }
    }

    /// Blocks along the path from the root down to `node`, in path order.
    pub fn block_table(&self, node: NodeId) -> Vec<BlockId> {
        let mut blocks = Vec::new();
        let mut current = node;

        while current != ROOT_NODE {
            match self.nodes.get(&current) {
                Some(n) => {
                    if let Some(block) = n.block {
                        blocks.push(block);
                    }
                    current = n.parent;
                }
                None => break,
            }
        }

        blocks.reverse();
        blocks
    }

    // ─── Mutation ──────────────────────────────────────────────────────────

    /// Cache `suffix` as a new edge under `anchor`.
    ///
    /// An empty suffix is a no-op (the request was a full cache hit). When the
    /// pool is exhausted the insert fails cleanly with no tree change; the
    /// caller decides whether to evict and retry. When another writer already
    /// cached an edge starting with the same token under this anchor, the
    /// existing node wins and the block allocated here is returned to the
    /// pool.
    pub fn insert(
        &mut self,
        suffix: &[TokenId],
        anchor: NodeId,
    ) -> Result<InsertOutcome, CacheError> {
        if suffix.is_empty() {
            debug!(anchor = anchor, "Empty suffix insert ignored");
            return Ok(InsertOutcome::Noop);
        }

        let first = suffix[0];
        let existing = match self.nodes.get(&anchor) {
            Some(node) => node.children.get(&first).copied(),
            None => return Err(CacheError::StaleAnchor(anchor)),
        };

        let block = match self.allocator.allocate() {
            Ok(b) => b,
            Err(AllocError::Exhausted { .. }) => return Err(CacheError::Exhausted),
            Err(e) => return Err(e.into()),
        };

        if let Some(existing) = existing {
            // Lost the insert race: keep the established edge, give the
            // block back.
            self.allocator.free(block)?;
            if let Some(node) = self.nodes.get(&existing) {
                self.touch(node);
            }
            debug!(
                anchor = anchor,
                node = existing,
                "Suffix already cached under anchor, reusing existing node"
            );
            return Ok(InsertOutcome::ReusedExisting { node: existing });
        }

        let id = self.next_node_id;
        self.next_node_id += 1;

        let tick = self.next_tick();
        self.nodes.insert(
            id,
            RadixNode {
                key: suffix.to_vec(),
                parent: anchor,
                children: HashMap::new(),
                block: Some(block),
                last_access: AtomicU64::new(tick),
                pins: Arc::new(AtomicU32::new(0)),
            },
        );
        if let Some(parent) = self.nodes.get_mut(&anchor) {
            parent.children.insert(first, id);
        }
        self.cached_tokens += suffix.len();

        debug!(
            node = id,
            anchor = anchor,
            tokens = suffix.len(),
            block = block,
            "Cached new suffix"
        );
        Ok(InsertOutcome::Inserted { node: id })
    }

    /// Evict the least recently used unpinned leaf, returning its block to
    /// the pool.
    ///
    /// Returns whether an eviction occurred. Interior nodes and pinned nodes
    /// are never candidates; ties on recency fall to the older node.
    pub fn evict_one(&mut self) -> bool {
        let victim = self
            .nodes
            .iter()
            .filter(|(&id, node)| {
                id != ROOT_NODE
                    && node.children.is_empty()
                    && node.pins.load(Ordering::Relaxed) == 0
            })
            .map(|(&id, node)| (node.last_access.load(Ordering::Relaxed), id))
            .min();

        let (_, victim_id) = match victim {
            Some(v) => v,
            None => return false,
        };

        let node = match self.nodes.remove(&victim_id) {
            Some(n) => n,
            None => return false,
        };

        if let Some(&first) = node.key.first() {
            if let Some(parent) = self.nodes.get_mut(&node.parent) {
                parent.children.remove(&first);
            }
        }

        if let Some(block) = node.block {
            if let Err(e) = self.allocator.free(block) {
                warn!(block = block, error = %e, "Evicted block was not allocated");
            }
        }
        self.cached_tokens = self.cached_tokens.saturating_sub(node.key.len());

        debug!(
            node = victim_id,
            tokens = node.key.len(),
            "Evicted least recently used leaf"
        );
        true
    }

    // ─── Introspection ─────────────────────────────────────────────────────

    /// Number of blocks currently free in the pool.
    pub fn free_blocks(&self) -> usize {
        self.allocator.free_blocks()
    }

    /// Total blocks in the pool.
    pub fn total_blocks(&self) -> usize {
        self.allocator.total_blocks()
    }

    /// Allocated fraction of the pool.
    pub fn utilization(&self) -> f64 {
        self.allocator.utilization()
    }

    /// Snapshot of cache statistics.
    pub fn stats(&self) -> CacheStats {
        let pinned_nodes = self
            .nodes
            .values()
            .filter(|n| n.pins.load(Ordering::Relaxed) > 0)
            .count();

        CacheStats {
            nodes: self.nodes.len().saturating_sub(1),
            cached_tokens: self.cached_tokens,
            pinned_nodes,
            total_tokens_saved: self.total_tokens_saved.load(Ordering::Relaxed),
            free_blocks: self.allocator.free_blocks(),
            total_blocks: self.allocator.total_blocks(),
            utilization: self.allocator.utilization(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(num_blocks: usize) -> RadixCache {
        RadixCache::new(&CacheConfig {
            num_blocks,
            block_size: 16,
        })
    }

    #[test]
    fn test_empty_tree_matches_nothing() {
        let cache = cache(4);
        let m = cache.match_prefix(&[1, 2, 3]);
        assert_eq!(m.node, ROOT_NODE);
        assert_eq!(m.matched, 0);

        let m = cache.match_prefix(&[]);
        assert_eq!(m.node, ROOT_NODE);
        assert_eq!(m.matched, 0);
    }

    #[test]
    fn test_stale_anchor_rejected_without_allocation() {
        let mut cache = cache(4);
        let free_before = cache.free_blocks();

        let err = cache.insert(&[1, 2], 999).unwrap_err();
        assert!(matches!(err, CacheError::StaleAnchor(999)));
        assert_eq!(cache.free_blocks(), free_before);
    }

    #[test]
    fn test_tokens_saved_accumulates() {
        let mut cache = cache(4);
        cache.insert(&[1, 2, 3], ROOT_NODE).unwrap();

        cache.match_prefix(&[1, 2, 3]);
        cache.match_prefix(&[1, 2, 3, 4]);
        assert_eq!(cache.stats().total_tokens_saved, 6);
    }

    #[test]
    fn test_block_table_follows_path() {
        let mut cache = cache(4);
        let a = match cache.insert(&[1, 2], ROOT_NODE).unwrap() {
            InsertOutcome::Inserted { node } => node,
            other => panic!("unexpected outcome: {other:?}"),
        };
        let b = match cache.insert(&[3], a).unwrap() {
            InsertOutcome::Inserted { node } => node,
            other => panic!("unexpected outcome: {other:?}"),
        };

        let table = cache.block_table(b);
        assert_eq!(table.len(), 2);
        assert_eq!(cache.block_table(ROOT_NODE).len(), 0);
        assert_eq!(cache.block_table(a).len(), 1);
        assert_eq!(table[0], cache.block_table(a)[0]);
    }

    #[test]
    fn test_stats_track_nodes_and_tokens() {
        let mut cache = cache(4);
        assert_eq!(cache.stats().nodes, 0);

        cache.insert(&[1, 2, 3], ROOT_NODE).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.nodes, 1);
        assert_eq!(stats.cached_tokens, 3);
        assert_eq!(stats.free_blocks, 3);
        assert_eq!(stats.total_blocks, 4);

        cache.evict_one();
        let stats = cache.stats();
        assert_eq!(stats.nodes, 0);
        assert_eq!(stats.cached_tokens, 0);
        assert_eq!(stats.free_blocks, 4);
    }
}
