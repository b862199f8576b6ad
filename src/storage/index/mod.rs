//! Memory index backends.
//!
//! # Available Backends
//!
//! | Backend | Use Case | Features |
//! |---------|----------|----------|
//! | [`SqliteMemoryIndex`] | Default; embedded | SQL pre-filtering, in-process cosine |
//! | [`InMemoryMemoryIndex`] | Testing | Fast, no persistence |

mod memory;
mod sqlite;

pub use memory::InMemoryMemoryIndex;
pub use sqlite::SqliteMemoryIndex;

// Re-export trait for convenience
pub use crate::storage::traits::{MemoryIndexBackend, MemoryQuery};

use crate::models::MemoryHit;

/// Sorts hits by relevance desc, then `created_at` desc, then id, and keeps
/// the first `limit`.
pub(crate) fn rank_hits(mut hits: Vec<MemoryHit>, limit: usize) -> Vec<MemoryHit> {
    hits.sort_by(|a, b| {
        b.relevance
            .total_cmp(&a.relevance)
            .then_with(|| b.record.created_at.cmp(&a.record.created_at))
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    hits.truncate(limit);
    hits
}
