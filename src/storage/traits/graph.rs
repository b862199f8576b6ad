//! Graph backend trait for the weighted agent adjacency.
//!
//! Edges are addressed by their natural key `(tenant, source, destination)`.
//! There is no in-memory object graph: every traversal is a keyed lookup or a
//! range scan over one source's outgoing edges.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Features |
//! |---------|----------|----------|
//! | `SqliteGraphBackend` | Default; embedded | Bulk decay in one statement |
//! | `InMemoryGraphBackend` | Testing, benches | `RwLock<HashMap>`, no persistence |
//!
//! # Write Paths
//!
//! | Operation | Raises weight | Lowers weight | Notes |
//! |-----------|---------------|---------------|-------|
//! | `upsert_edge` | no | no | Creates lazily or touches `last_interaction` |
//! | `compare_and_swap` | yes | no | Only succeeds on matching `version` |
//! | `batch_decay` | no | yes | Bounded; at most once per sweep per edge |
//! | `update_base_similarity` | no | no | Leaves `version` unchanged |

use crate::Result;
use crate::models::{AgentId, DecayPass, Edge, EdgeInit, EdgeKey, EdgeStats, TenantId};

/// Trait for graph store backends.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn GraphBackend>`
/// - Use interior mutability (e.g., `Mutex<Connection>`) for mutable state
/// - Every successful weight write must bump `version`
/// - `batch_decay` must never delete edges
pub trait GraphBackend: Send + Sync {
    /// Returns the edge for a key, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_edge(&self, key: &EdgeKey) -> Result<Option<Edge>>;

    /// Creates the edge with `init` if absent, otherwise advances its
    /// `last_interaction` to `now`. The weight is never changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_edge(&self, key: &EdgeKey, init: EdgeInit, now: u64) -> Result<Edge>;

    /// Writes `edge`'s weight, `success_total` and `last_interaction` if the
    /// stored version still equals `expected_version`, bumping the version.
    ///
    /// Returns `false` when another writer got there first.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn compare_and_swap(&self, edge: &Edge, expected_version: u64) -> Result<bool>;

    /// Lists a source's outgoing edges, heaviest first.
    ///
    /// Ties are broken by `last_interaction` desc, then destination asc.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_outgoing(&self, tenant: &TenantId, source: &AgentId, limit: usize)
    -> Result<Vec<Edge>>;

    /// Counts a source's outgoing edges.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn count_outgoing(&self, tenant: &TenantId, source: &AgentId) -> Result<usize>;

    /// Applies one bounded decay batch and returns the number of edges decayed.
    ///
    /// Decays edges with `last_interaction < pass.cutoff` and
    /// `last_decayed_at < pass.sweep_at` to `max(min_weight, weight * factor)`,
    /// recording the removed amount in `decay_total`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn batch_decay(&self, tenant: &TenantId, pass: &DecayPass) -> Result<usize>;

    /// Lists edges whose similarity was computed before `refreshed_before`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_stale_similarity(
        &self,
        tenant: &TenantId,
        refreshed_before: u64,
        limit: usize,
    ) -> Result<Vec<EdgeKey>>;

    /// Replaces an edge's `base_similarity`.
    ///
    /// Returns `false` if the edge does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn update_base_similarity(&self, key: &EdgeKey, similarity: f32, now: u64) -> Result<bool>;

    /// Lists tenants that own at least one edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn tenant_ids(&self) -> Result<Vec<TenantId>>;

    /// Returns aggregate statistics for a tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn stats(&self, tenant: &TenantId) -> Result<EdgeStats>;
}
