//! Request routing.
//!
//! - [`policy`]: epsilon-greedy local/remote routing policy with a learned
//!   value table

pub mod policy;
