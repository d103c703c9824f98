//! Load Runner Service Library
//!
//! HTTP front-end and per-client session isolation for the load engine.

pub mod server;
pub mod session;
