//! Compute kernels.
//!
//! - [`paged_attn`]: paged-attention forward pass over pooled cache blocks

pub mod paged_attn;
