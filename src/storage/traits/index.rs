//! Memory index backend trait.
//!
//! The index stores [`MemoryRecord`]s and returns the records nearest to a
//! query embedding. Ranking is plain cosine similarity; diversity re-ranking
//! happens above the backend in [`crate::services::MemoryService`].

use crate::Result;
use crate::models::{MemoryFilter, MemoryHit, MemoryId, MemoryRecord, TenantId};

/// A nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct MemoryQuery<'a> {
    /// Query embedding.
    pub embedding: &'a [f32],
    /// Maximum hits to return.
    pub limit: usize,
    /// Minimum record quality.
    pub min_quality: f32,
    /// Additional narrowing.
    pub filter: &'a MemoryFilter,
    /// Records with `expires_at <= now` are skipped.
    pub now: u64,
}

/// Trait for memory index backends.
///
/// # Implementor Notes
///
/// - Every method is tenant-scoped; a record is never visible to another tenant
/// - Records are immutable apart from `quality`
/// - `search` returns hits sorted by relevance desc, then `created_at` desc
pub trait MemoryIndexBackend: Send + Sync {
    /// Inserts a record.
    ///
    /// # Errors
    ///
    /// Returns an error if a record with the same id exists or the write fails.
    fn store(&self, record: &MemoryRecord) -> Result<()>;

    /// Fetches a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get(&self, tenant: &TenantId, id: &MemoryId) -> Result<Option<MemoryRecord>>;

    /// Returns the `query.limit` most similar live records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn search(&self, tenant: &TenantId, query: &MemoryQuery<'_>) -> Result<Vec<MemoryHit>>;

    /// Replaces a record's quality. Returns `false` if the record is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn rescore_quality(&self, tenant: &TenantId, id: &MemoryId, quality: f32) -> Result<bool>;

    /// Deletes up to `limit` records expired at `now`, across tenants.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn purge_expired(&self, now: u64, limit: usize) -> Result<usize>;

    /// Counts a tenant's records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn count(&self, tenant: &TenantId) -> Result<usize>;
}
