//! radix-serve: prefix-cached token serving engine.
//!
//! Reuses previously computed token state across requests by indexing it in
//! a radix tree over token-id sequences, backed by a fixed pool of cache
//! blocks. Each request runs a linear pipeline:
//!   lookup (longest cached prefix) → route (learned local/remote policy)
//!   → compute (uncached suffix only) → cache update → respond
//!
//! Exposes a small HTTP API for generation, health, cache statistics, and
//! Prometheus metrics.

pub mod cache;
pub mod config;
pub mod kernels;
pub mod metrics;
pub mod router;
pub mod server;
pub mod serving;

/// Token ID type.
pub type TokenId = i32;
