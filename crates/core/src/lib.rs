//! Bizdesk Core - live feeds, table rows, and domain events.
//!
//! This crate holds the realtime list merging logic and the services that
//! feed it. It is database-agnostic and defines traits that are implemented
//! by the `storage-sqlite` crate.

pub mod errors;
pub mod events;
pub mod feeds;
pub mod live;
pub mod tables;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
