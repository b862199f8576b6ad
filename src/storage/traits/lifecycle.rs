//! Nutrient and route store trait.
//!
//! Nutrients and their routes live in one store so a hop can be committed in a
//! single transaction: the routes are appended and `current_hop` advanced
//! together, or not at all.

use crate::Result;
use crate::models::{
    AgentId, Nutrient, NutrientId, NutrientState, Route, RouteId, TenantId, TraceId,
};

/// An atomic hop commit.
#[derive(Debug, Clone)]
pub struct HopCommit<'a> {
    /// Owning tenant.
    pub tenant: &'a TenantId,
    /// The nutrient.
    pub nutrient_id: &'a NutrientId,
    /// Hop being committed; `current_hop` must equal `hop - 1`.
    pub hop: u32,
    /// Routes to append. All carry `hop`.
    pub routes: &'a [Route],
    /// State after the commit.
    pub next_state: NutrientState,
}

/// Result of [`NutrientBackend::commit_hop`].
#[derive(Debug, Clone, PartialEq)]
pub enum HopCommitResult {
    /// The routes were written.
    Committed,
    /// Another writer advanced the hop first; these are its routes.
    Superseded(Vec<Route>),
}

/// Trait for nutrient and route stores.
///
/// # Implementor Notes
///
/// - Routes are append-only and unique on `(nutrient, hop, destination)`
/// - `attach_outcome` only writes when `outcome_score` is NULL
/// - `commit_hop` is the only writer of `current_hop`
pub trait NutrientBackend: Send + Sync {
    /// Persists a new nutrient.
    ///
    /// # Errors
    ///
    /// Returns an error if the id exists or the write fails.
    fn insert_nutrient(&self, nutrient: &Nutrient) -> Result<()>;

    /// Fetches a nutrient.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_nutrient(&self, tenant: &TenantId, id: &NutrientId) -> Result<Option<Nutrient>>;

    /// Returns the routes recorded for one hop, ordered by score desc.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn routes_for_hop(&self, tenant: &TenantId, id: &NutrientId, hop: u32) -> Result<Vec<Route>>;

    /// Returns every destination the nutrient has been routed to.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn visited_agents(&self, tenant: &TenantId, id: &NutrientId) -> Result<Vec<AgentId>>;

    /// Appends a hop's routes and advances `current_hop` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the nutrient is missing or the transaction fails.
    fn commit_hop(&self, commit: &HopCommit<'_>) -> Result<HopCommitResult>;

    /// Moves the nutrient from `from` to `to`. Returns `false` if the stored
    /// state no longer equals `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn transition_state(
        &self,
        tenant: &TenantId,
        id: &NutrientId,
        from: NutrientState,
        to: NutrientState,
    ) -> Result<bool>;

    /// Returns every route recorded under a trace, ordered by hop then score.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn routes_for_trace(&self, tenant: &TenantId, trace: &TraceId) -> Result<Vec<Route>>;

    /// Sets a route's outcome if it has none. Returns `true` if written.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn attach_outcome(&self, tenant: &TenantId, route: &RouteId, score: f32) -> Result<bool>;

    /// Clears an outcome written by [`Self::attach_outcome`] with `score`,
    /// so the route can be attributed again. Returns `true` if cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn detach_outcome(&self, tenant: &TenantId, route: &RouteId, score: f32) -> Result<bool>;

    /// Lists up to `limit` non-terminal nutrients with `expires_at <= now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_due(&self, now: u64, limit: usize) -> Result<Vec<Nutrient>>;

    /// Counts a tenant's nutrients by state.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn count_by_state(&self, tenant: &TenantId) -> Result<Vec<(NutrientState, u64)>>;
}
