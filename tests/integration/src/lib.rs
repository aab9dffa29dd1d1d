//! Integration test utilities for the session managers
//!
//! This crate provides helpers for linking a client to a server in memory
//! and for running a real axum server on a loopback port.

pub mod helpers;

pub use helpers::*;
