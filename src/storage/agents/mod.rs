//! Agent registry storage.

mod sqlite;

pub use sqlite::SqliteAgentRegistry;

// Re-export trait for convenience
pub use crate::storage::traits::AgentBackend;
