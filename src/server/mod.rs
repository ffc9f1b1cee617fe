//! HTTP server.
//!
//! - [`api`]: request/response types and route handlers

pub mod api;
