//! Storage layer.
//!
//! Five stores back the network, each behind a trait so services never see
//! `SQLite` directly:
//! - **Graph**: weighted directed edges between agents
//! - **Index**: memory records ranked by embedding similarity
//! - **Quota**: per-tenant, per-window usage counters
//! - **Lifecycle**: nutrients and their append-only routes
//! - **Agents**: agent profiles and outcome metrics
//!
//! With a data directory each store gets its own database file; without
//! one every store runs against an in-memory `SQLite` database.

// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod agents;
pub mod graph;
pub mod index;
pub mod lifecycle;
pub mod quota;
pub mod resilience;
pub mod sqlite;
pub mod traits;

pub use agents::SqliteAgentRegistry;
pub use graph::{InMemoryGraphBackend, SqliteGraphBackend};
pub use index::{InMemoryMemoryIndex, SqliteMemoryIndex};
pub use lifecycle::SqliteNutrientStore;
pub use quota::{InMemoryQuotaLedger, SqliteQuotaLedger};
pub use resilience::{
    CircuitBreaker, ResilientAgentBackend, ResilientGraphBackend, ResilientMemoryIndex,
    ResilientNutrientBackend, ResilientQuotaBackend, StorageResilienceConfig,
    is_retryable_storage_error, retry_with_backoff,
};
pub use traits::{
    AgentBackend, GraphBackend, HopCommit, HopCommitResult, MemoryIndexBackend, MemoryQuery,
    NutrientBackend, QuotaBackend,
};

use crate::Result;
use crate::config::HyphanetConfig;
use std::path::Path;
use std::sync::Arc;

/// Database file names under the data directory.
pub const GRAPH_DB: &str = "graph.db";
/// Memory index database file.
pub const MEMORY_DB: &str = "memory.db";
/// Quota ledger database file.
pub const QUOTA_DB: &str = "quota.db";
/// Nutrient and route database file.
pub const LIFECYCLE_DB: &str = "lifecycle.db";
/// Agent registry database file.
pub const AGENTS_DB: &str = "agents.db";

/// The set of stores a network runs on.
#[derive(Clone)]
pub struct NetworkStores {
    /// Weighted agent graph.
    pub graph: Arc<dyn GraphBackend>,
    /// Memory index.
    pub index: Arc<dyn MemoryIndexBackend>,
    /// Quota ledger.
    pub quota: Arc<dyn QuotaBackend>,
    /// Nutrients and routes.
    pub nutrients: Arc<dyn NutrientBackend>,
    /// Agent registry.
    pub agents: Arc<dyn AgentBackend>,
}

impl NetworkStores {
    /// Opens the stores described by `config`, wrapped in circuit breakers.
    ///
    /// # Errors
    ///
    /// Returns an error if any database cannot be opened or initialized.
    pub fn open(config: &HyphanetConfig) -> Result<Self> {
        match &config.data_dir {
            Some(dir) => Self::open_dir(dir, &config.storage),
            None => Self::open_sqlite_in_memory(&config.storage),
        }
    }

    /// Opens one database file per store under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if any database cannot be opened or initialized.
    pub fn open_dir(dir: &Path, resilience: &StorageResilienceConfig) -> Result<Self> {
        tracing::info!(data_dir = %dir.display(), "Opening network stores");
        Ok(Self::wrap(
            SqliteGraphBackend::new(dir.join(GRAPH_DB))?,
            SqliteMemoryIndex::new(dir.join(MEMORY_DB))?,
            SqliteQuotaLedger::new(dir.join(QUOTA_DB))?,
            SqliteNutrientStore::new(dir.join(LIFECYCLE_DB))?,
            SqliteAgentRegistry::new(dir.join(AGENTS_DB))?,
            resilience,
        ))
    }

    /// Opens every store against a private in-memory `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns an error if any database cannot be initialized.
    pub fn open_sqlite_in_memory(resilience: &StorageResilienceConfig) -> Result<Self> {
        Ok(Self::wrap(
            SqliteGraphBackend::in_memory()?,
            SqliteMemoryIndex::in_memory()?,
            SqliteQuotaLedger::in_memory()?,
            SqliteNutrientStore::in_memory()?,
            SqliteAgentRegistry::in_memory()?,
            resilience,
        ))
    }

    /// Uses map-backed graph, index and quota stores. Intended for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the lifecycle or agent database cannot be
    /// initialized.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            graph: Arc::new(InMemoryGraphBackend::new()),
            index: Arc::new(InMemoryMemoryIndex::new()),
            quota: Arc::new(InMemoryQuotaLedger::new()),
            nutrients: Arc::new(SqliteNutrientStore::in_memory()?),
            agents: Arc::new(SqliteAgentRegistry::in_memory()?),
        })
    }

    fn wrap(
        graph: SqliteGraphBackend,
        index: SqliteMemoryIndex,
        quota: SqliteQuotaLedger,
        nutrients: SqliteNutrientStore,
        agents: SqliteAgentRegistry,
        resilience: &StorageResilienceConfig,
    ) -> Self {
        Self {
            graph: Arc::new(ResilientGraphBackend::new(graph, resilience.clone(), "graph")),
            index: Arc::new(ResilientMemoryIndex::new(index, resilience.clone(), "index")),
            quota: Arc::new(ResilientQuotaBackend::new(quota, resilience.clone(), "quota")),
            nutrients: Arc::new(ResilientNutrientBackend::new(
                nutrients,
                resilience.clone(),
                "lifecycle",
            )),
            agents: Arc::new(ResilientAgentBackend::new(
                agents,
                resilience.clone(),
                "agents",
            )),
        }
    }
}
