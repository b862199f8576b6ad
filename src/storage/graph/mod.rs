//! Graph storage backends for the weighted agent adjacency.
//!
//! # Available Backends
//!
//! | Backend | Use Case | Features |
//! |---------|----------|----------|
//! | [`SqliteGraphBackend`] | Default; embedded | Single-statement bulk decay |
//! | [`InMemoryGraphBackend`] | Testing | Fast, no persistence |
//!
//! # Example
//!
//! ```rust,ignore
//! use hyphanet::storage::graph::SqliteGraphBackend;
//! use hyphanet::storage::traits::GraphBackend;
//!
//! let backend = SqliteGraphBackend::new("graph.db")?;
//! let edge = backend.upsert_edge(&key, EdgeInit::default(), now)?;
//! let heaviest = backend.list_outgoing(&tenant, &agent, 8)?;
//! ```

mod memory;
mod sqlite;

pub use memory::InMemoryGraphBackend;
pub use sqlite::SqliteGraphBackend;

// Re-export trait for convenience
pub use crate::storage::traits::GraphBackend;
