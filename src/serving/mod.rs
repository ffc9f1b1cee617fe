//! Request serving.
//!
//! - [`engine`]: per-request pipeline over the cache, router, and kernel

pub mod engine;
