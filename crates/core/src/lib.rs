//! Core domain types for the easel generation platform.
//!
//! Pure data and decision logic only: job identity and lifecycle,
//! process configuration, and the shared error types. No I/O lives
//! here -- the remote-service bridge is `easel-pixray`.

pub mod config;
pub mod error;
pub mod job;
pub mod types;
