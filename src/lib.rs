//! # Hyphanet
//!
//! An adaptive knowledge-propagation network for autonomous agents.
//!
//! Agents broadcast *nutrients* (packets of contextual knowledge) that are routed
//! hop by hop toward the agents most likely to use them. Routing runs over a
//! per-tenant weighted graph whose edges are reinforced by observed task outcomes
//! and decayed by disuse.
//!
//! ## Features
//!
//! - Composite routing score (edge weight, fuzzy semantic similarity, capability
//!   coverage) with epsilon-greedy exploration
//! - Explicit nutrient state machine with at-most-once routing per hop
//! - Outcome attribution with idempotent reinforcement
//! - Bulk, time-sliced edge decay
//! - Memory search with maximal-marginal-relevance diversity re-ranking
//! - Atomic per-tenant quota windows
//! - HMAC-chained audit trail for every state change
//!
//! ## Example
//!
//! ```rust,ignore
//! use hyphanet::{HyphaeNetwork, HyphanetConfig, NutrientDraft, TenantId, AgentId};
//!
//! let network = HyphaeNetwork::open(HyphanetConfig::default())?;
//! let result = network.broadcast(
//!     &TenantId::new("acme"),
//!     &AgentId::new("planner"),
//!     NutrientDraft::new("use the staging db for load tests", embedding),
//! )?;
//! println!("routed to {} agents", result.routes.len());
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod embedding;
pub mod models;
pub mod observability;
pub mod security;
pub mod services;
pub mod storage;

pub use config::{HyphanetConfig, TenantPolicy};
pub use models::{
    Agent, AgentId, AgentStatus, Edge, EdgeKey, MemoryFilter, MemoryHit, MemoryId, MemoryKind,
    MemoryRecord, MetricType, Nutrient, NutrientDraft, NutrientId, NutrientState, QuotaDecision,
    Route, RouteId, Sensitivity, TenantId, TerminalReason, TraceId,
};
pub use services::{
    BroadcastResult, HopOutcome, HyphaeNetwork, NetworkStats, NutrientLifecycleManager,
    OutcomeFeedbackLoop, OutcomeSummary, RoutingPolicyEngine, SweepReport,
};

/// Error type for hyphanet operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed hop counts, scores, embeddings or sensitivity |
/// | `InvalidTtl` | A broadcast TTL is zero or above the configured ceiling |
/// | `OutOfOrder` | A hop is propagated before the previous hop was recorded |
/// | `QuotaExceeded` | The tenant's window for a metric is exhausted |
/// | `AgentNotFound` | The broadcasting agent is not registered for the tenant |
/// | `UnknownTrace` | An outcome references a trace with no routes |
/// | `NotFound` | Any other tenant-scoped lookup misses |
/// | `TenantMismatch` | A record from one tenant is presented to another |
/// | `ConcurrencyConflict` | Optimistic updates kept losing races |
/// | `OperationFailed` | Store I/O, schema, or serialization failures |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised before any store write happens.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The nutrient time-to-live is outside the accepted range.
    #[error("invalid ttl: {ttl_secs}s (must be within 1..={max_ttl_secs})")]
    InvalidTtl {
        /// The requested TTL in seconds.
        ttl_secs: u64,
        /// The largest accepted TTL in seconds.
        max_ttl_secs: u64,
    },

    /// A hop was requested before its predecessor was recorded.
    #[error("nutrient {nutrient} cannot route hop {requested}: current hop is {current}")]
    OutOfOrder {
        /// The nutrient being propagated.
        nutrient: String,
        /// The hop that was requested.
        requested: u32,
        /// The last recorded hop.
        current: u32,
    },

    /// The tenant's quota for a metric is exhausted in the current window.
    ///
    /// No counter was changed; callers should back off until `retry_at`.
    #[error("quota exceeded for tenant '{tenant}' metric '{metric}': {used}/{limit}")]
    QuotaExceeded {
        /// The tenant.
        tenant: String,
        /// The metric type.
        metric: String,
        /// Units already consumed in the window.
        used: u64,
        /// The window limit.
        limit: u64,
        /// Start of the next window (Unix seconds).
        retry_at: u64,
    },

    /// The agent is not registered for the tenant.
    #[error("agent '{agent}' not found for tenant '{tenant}'")]
    AgentNotFound {
        /// The tenant.
        tenant: String,
        /// The agent.
        agent: String,
    },

    /// No routes exist for the trace.
    #[error("unknown trace '{trace}' for tenant '{tenant}'")]
    UnknownTrace {
        /// The tenant.
        tenant: String,
        /// The trace.
        trace: String,
    },

    /// A tenant-scoped record does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Kind of record (nutrient, memory, ...).
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A record belonging to one tenant was presented under another.
    #[error("tenant mismatch: expected '{expected}', got '{found}'")]
    TenantMismatch {
        /// The tenant the caller is scoped to.
        expected: String,
        /// The tenant the record belongs to.
        found: String,
    },

    /// An optimistic update lost its race on every attempt.
    #[error("concurrency conflict on {resource} after {attempts} attempts")]
    ConcurrencyConflict {
        /// The contended resource.
        resource: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail or the database is locked
    /// - Serialization of stored payloads fails
    /// - A circuit breaker is open for a backend
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from any displayable cause.
    pub fn operation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for hyphanet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// # Examples
///
/// ```rust
/// use hyphanet::current_timestamp;
///
/// assert!(current_timestamp() > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
