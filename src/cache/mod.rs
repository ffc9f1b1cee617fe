//! Prefix cache management.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`allocator`]: fixed-pool block allocator
//! - [`radix`]: radix tree over token sequences with LRU leaf eviction and
//!   request pinning

pub mod allocator;
pub mod radix;
