//! Configuration management.
//!
//! Configuration is layered: built-in defaults, then a TOML file, then
//! `HYPHANET_*` environment variables.
//!
//! ```toml
//! data_dir = "/var/lib/hyphanet"
//! embedding_dimensions = 384
//!
//! [routing]
//! fan_out = 3
//! epsilon = 0.1
//!
//! [policy_defaults]
//! window_secs = 60
//!
//! [tenants.acme]
//! routes_limit = 200
//! fan_out = 5
//! ```

mod tenant;

pub use tenant::{ConfigFileTenantPolicy, QuotaLimits, TenantPolicy};

use crate::models::{MAX_EDGE_WEIGHT, MIN_EDGE_WEIGHT, TenantId, WeightBounds};
use crate::storage::resilience::StorageResilienceConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Embedding length used when none is configured.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Routing policy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Maximum destinations per routing pass.
    pub fan_out: usize,
    /// Probability of replacing the last slot with a random candidate.
    pub epsilon: f64,
    /// Weight of the edge term.
    pub edge_weight: f32,
    /// Weight of the effective-similarity term.
    pub similarity_weight: f32,
    /// Weight of the capability-boost term.
    pub capability_weight: f32,
    /// How strongly fuzzy tag overlap lifts cosine similarity.
    pub fuzzy_weight: f32,
    /// Maximum agents pulled in per pass for cold start.
    pub cold_start_limit: usize,
    /// Fixed RNG seed for reproducible exploration.
    pub seed: Option<u64>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fan_out: 1,
            epsilon: 0.1,
            edge_weight: 0.5,
            similarity_weight: 0.3,
            capability_weight: 0.2,
            fuzzy_weight: 0.5,
            cold_start_limit: 32,
            seed: None,
        }
    }
}

impl RoutingConfig {
    /// Sets the fan-out.
    #[must_use]
    pub const fn with_fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Sets the exploration rate.
    #[must_use]
    pub const fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Sets the RNG seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Graph store parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Weight of lazily-created edges.
    pub initial_weight: f32,
    /// Lower weight bound.
    pub min_weight: f32,
    /// Upper weight bound.
    pub max_weight: f32,
    /// Neighbour limit for sparse neighbourhoods.
    pub base_neighbor_limit: usize,
    /// Neighbour limit floor for dense neighbourhoods.
    pub min_neighbor_limit: usize,
    /// Out-degree at which a neighbourhood counts as dense.
    pub dense_threshold: usize,
    /// Attempts for optimistic edge updates.
    pub cas_max_attempts: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            initial_weight: crate::models::DEFAULT_INITIAL_WEIGHT,
            min_weight: MIN_EDGE_WEIGHT,
            max_weight: MAX_EDGE_WEIGHT,
            base_neighbor_limit: 32,
            min_neighbor_limit: 4,
            dense_threshold: 64,
            cas_max_attempts: 5,
        }
    }
}

impl GraphConfig {
    /// Returns the weight bounds.
    #[must_use]
    pub const fn bounds(&self) -> WeightBounds {
        WeightBounds {
            min: self.min_weight,
            max: self.max_weight,
        }
    }
}

/// Edge decay parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Multiplicative factor applied per sweep.
    pub factor: f32,
    /// Idle time after which an edge decays.
    pub stale_after_secs: u64,
    /// Age after which `base_similarity` is recomputed.
    pub similarity_refresh_secs: u64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            factor: 0.95,
            stale_after_secs: 86_400,
            similarity_refresh_secs: 7 * 86_400,
        }
    }
}

/// Outcome feedback parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Learning rate applied to reinforcement.
    pub learning_rate: f32,
    /// Outcome score counted as a success in agent metrics.
    pub success_threshold: f32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            success_threshold: 0.5,
        }
    }
}

/// Memory search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Candidate pool multiplier over `top_k`.
    pub pool_factor: usize,
    /// Mutual similarity at which results count as near-duplicates.
    pub diversity_threshold: f32,
    /// MMR trade-off between relevance (1.0) and diversity (0.0).
    pub mmr_lambda: f32,
    /// Largest accepted `top_k`.
    pub max_top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            pool_factor: 4,
            diversity_threshold: 0.9,
            mmr_lambda: 0.7,
            max_top_k: 100,
        }
    }
}

/// Background sweep parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Maximum rows touched per batch.
    pub batch_limit: usize,
    /// Maximum batches per sweep and task.
    pub max_batches: usize,
    /// Quota windows older than this are purged.
    pub quota_retention_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            batch_limit: 500,
            max_batches: 20,
            quota_retention_secs: 7 * 86_400,
        }
    }
}

/// Audit trail parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// JSONL file the chain is appended to.
    pub log_path: Option<PathBuf>,
    /// HMAC key (hex, or raw text when not valid hex).
    pub hmac_key: Option<String>,
    /// Entries kept in memory for replay.
    pub max_in_memory: Option<usize>,
}

/// Logging parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `json` or `pretty`.
    pub format: Option<String>,
    /// `EnvFilter` directive, e.g. `hyphanet=debug`.
    pub level: Option<String>,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

/// Main configuration for hyphanet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HyphanetConfig {
    /// Directory holding the SQLite databases. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Required embedding length.
    pub embedding_dimensions: usize,
    /// Routing policy.
    pub routing: RoutingConfig,
    /// Graph store.
    pub graph: GraphConfig,
    /// Edge decay.
    pub decay: DecayConfig,
    /// Outcome feedback.
    pub feedback: FeedbackConfig,
    /// Memory search.
    pub memory: MemoryConfig,
    /// Background sweeps.
    pub sweep: SweepConfig,
    /// Audit trail.
    pub audit: AuditSettings,
    /// Logging.
    pub logging: LoggingSettings,
    /// Storage circuit breaker and retry.
    pub storage: StorageResilienceConfig,
    /// Policy for tenants without an explicit entry.
    pub policy_defaults: TenantPolicy,
    /// Resolved per-tenant policies.
    pub tenants: BTreeMap<String, TenantPolicy>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Embedding length.
    pub embedding_dimensions: Option<usize>,
    /// Routing section.
    pub routing: Option<RoutingConfig>,
    /// Graph section.
    pub graph: Option<GraphConfig>,
    /// Decay section.
    pub decay: Option<DecayConfig>,
    /// Feedback section.
    pub feedback: Option<FeedbackConfig>,
    /// Memory section.
    pub memory: Option<MemoryConfig>,
    /// Sweep section.
    pub sweep: Option<SweepConfig>,
    /// Audit section.
    pub audit: Option<AuditSettings>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
    /// Storage section.
    pub storage: Option<StorageResilienceConfig>,
    /// Default tenant policy.
    pub policy_defaults: Option<TenantPolicy>,
    /// Per-tenant overrides.
    pub tenants: Option<BTreeMap<String, ConfigFileTenantPolicy>>,
}

impl Default for HyphanetConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            routing: RoutingConfig::default(),
            graph: GraphConfig::default(),
            decay: DecayConfig::default(),
            feedback: FeedbackConfig::default(),
            memory: MemoryConfig::default(),
            sweep: SweepConfig::default(),
            audit: AuditSettings::default(),
            logging: LoggingSettings::default(),
            storage: StorageResilienceConfig::default(),
            policy_defaults: TenantPolicy::default(),
            tenants: BTreeMap::new(),
        }
    }
}

impl HyphanetConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::operation("read_config_file", e))?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| Error::operation("parse_config_file", e))?;
        let config = Self::from_config_file(file);
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the default location, then applies
    /// environment overrides.
    ///
    /// Checks, in order, `HYPHANET_CONFIG`, the platform config dir
    /// (`~/.config/hyphanet/config.toml` on Linux) and returns defaults when
    /// no file is found.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load_default() -> Result<Self> {
        let explicit = std::env::var("HYPHANET_CONFIG").ok().map(PathBuf::from);
        let platform = directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("hyphanet").join("config.toml"));

        let config = match explicit.or(platform).filter(|p| p.exists()) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies `HYPHANET_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = parse_string_env("HYPHANET_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(dims) = parse_env::<usize>("HYPHANET_EMBEDDING_DIMENSIONS") {
            self.embedding_dimensions = dims;
        }
        if let Some(fan_out) = parse_env::<usize>("HYPHANET_ROUTING_FAN_OUT") {
            self.routing.fan_out = fan_out;
        }
        if let Some(epsilon) = parse_env::<f64>("HYPHANET_ROUTING_EPSILON") {
            self.routing.epsilon = epsilon.clamp(0.0, 1.0);
        }
        if let Some(seed) = parse_env::<u64>("HYPHANET_ROUTING_SEED") {
            self.routing.seed = Some(seed);
        }
        if let Some(interval) = parse_env::<u64>("HYPHANET_SWEEP_INTERVAL_SECS") {
            self.sweep.interval_secs = interval.max(1);
        }
        if let Some(path) = parse_string_env("HYPHANET_AUDIT_LOG") {
            self.audit.log_path = Some(PathBuf::from(path));
        }
        if let Some(key) = parse_string_env("HYPHANET_AUDIT_KEY") {
            self.audit.hmac_key = Some(key);
        }
        if let Some(format) = parse_string_env("HYPHANET_LOG_FORMAT") {
            self.logging.format = Some(format);
        }
        self.storage = self.storage.with_env_overrides();
        self
    }

    /// Converts a `ConfigFile` to `HyphanetConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = Some(PathBuf::from(data_dir));
        }
        if let Some(dims) = file.embedding_dimensions {
            config.embedding_dimensions = dims;
        }
        if let Some(routing) = file.routing {
            config.routing = routing;
        }
        if let Some(graph) = file.graph {
            config.graph = graph;
        }
        if let Some(decay) = file.decay {
            config.decay = decay;
        }
        if let Some(feedback) = file.feedback {
            config.feedback = feedback;
        }
        if let Some(memory) = file.memory {
            config.memory = memory;
        }
        if let Some(sweep) = file.sweep {
            config.sweep = sweep;
        }
        if let Some(audit) = file.audit {
            config.audit = audit;
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }
        if let Some(storage) = file.storage {
            config.storage = storage;
        }
        if let Some(defaults) = file.policy_defaults {
            config.policy_defaults = defaults;
        }
        if let Some(tenants) = file.tenants {
            config.tenants = tenants
                .into_iter()
                .map(|(id, overrides)| (id, overrides.apply(&config.policy_defaults)))
                .collect();
        }

        config
    }

    /// Checks cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimensions == 0 {
            return Err(Error::InvalidInput(
                "embedding_dimensions must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.routing.epsilon) {
            return Err(Error::InvalidInput(format!(
                "routing.epsilon must be within [0, 1], got {}",
                self.routing.epsilon
            )));
        }
        if self.graph.min_weight <= 0.0 || self.graph.min_weight >= self.graph.max_weight {
            return Err(Error::InvalidInput(format!(
                "graph weight bounds invalid: min {} max {}",
                self.graph.min_weight, self.graph.max_weight
            )));
        }
        if !(self.graph.min_weight..=self.graph.max_weight).contains(&self.graph.initial_weight) {
            return Err(Error::InvalidInput(format!(
                "graph.initial_weight {} outside bounds",
                self.graph.initial_weight
            )));
        }
        if self.decay.factor <= 0.0 || self.decay.factor > 1.0 {
            return Err(Error::InvalidInput(format!(
                "decay.factor must be within (0, 1], got {}",
                self.decay.factor
            )));
        }
        if !(0.0..=1.0).contains(&self.memory.mmr_lambda) {
            return Err(Error::InvalidInput(format!(
                "memory.mmr_lambda must be within [0, 1], got {}",
                self.memory.mmr_lambda
            )));
        }
        if self.sweep.batch_limit == 0 {
            return Err(Error::InvalidInput(
                "sweep.batch_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the policy for a tenant, falling back to `policy_defaults`.
    #[must_use]
    pub fn policy_for(&self, tenant: &TenantId) -> &TenantPolicy {
        self.tenants
            .get(tenant.as_str())
            .unwrap_or(&self.policy_defaults)
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Sets the embedding length.
    #[must_use]
    pub const fn with_embedding_dimensions(mut self, dims: usize) -> Self {
        self.embedding_dimensions = dims;
        self
    }

    /// Replaces the routing section.
    #[must_use]
    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    /// Replaces the default tenant policy.
    #[must_use]
    pub fn with_policy_defaults(mut self, policy: TenantPolicy) -> Self {
        self.policy_defaults = policy;
        self
    }

    /// Sets a tenant policy.
    #[must_use]
    pub fn with_tenant_policy(mut self, tenant: &TenantId, policy: TenantPolicy) -> Self {
        self.tenants.insert(tenant.as_str().to_string(), policy);
        self
    }

    /// Sets the audit HMAC key.
    #[must_use]
    pub fn with_audit_key(mut self, key: impl Into<String>) -> Self {
        self.audit.hmac_key = Some(key.into());
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

fn parse_string_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
