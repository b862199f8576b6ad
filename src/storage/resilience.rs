//! Storage resilience wrappers: circuit breaking and bounded retry.
//!
//! # Circuit Breaker States
//!
//! ```text
//! +--------+     failures >= threshold     +------+
//! | Closed | --------------------------->  | Open |
//! +--------+                               +------+
//!     ^                                        |
//!     |  success                               | timeout elapsed
//!     |                                        v
//!     +--------------------------------  +-----------+
//!                                        | Half-Open |
//!                                        +-----------+
//! ```
//!
//! # Retry
//!
//! Only idempotent operations are retried, and only on transient `SQLite`
//! errors (`database is locked`, busy, timeouts). Quota consumption, hop
//! commits, inserts and weight swaps are never retried here; their callers
//! own the retry policy.
//!
//! # Usage
//!
//! ```rust,ignore
//! use hyphanet::storage::graph::SqliteGraphBackend;
//! use hyphanet::storage::resilience::{ResilientGraphBackend, StorageResilienceConfig};
//!
//! let backend = SqliteGraphBackend::new(db_path)?;
//! let config = StorageResilienceConfig::default();
//! let resilient = ResilientGraphBackend::new(backend, config, "graph");
//! resilient.list_outgoing(&tenant, &agent, 8)?;
//! ```

use crate::models::{
    Agent, AgentId, AgentStatus, DecayPass, Edge, EdgeInit, EdgeKey, EdgeStats, MemoryHit,
    MemoryId, MemoryRecord, MetricType, Nutrient, NutrientId, NutrientState, QuotaDecision,
    QuotaWindow, Route, RouteId, TenantId, TraceId,
};
use crate::storage::traits::{
    AgentBackend, GraphBackend, HopCommit, HopCommitResult, MemoryIndexBackend, MemoryQuery,
    NutrientBackend, QuotaBackend,
};
use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Resilience configuration for storage backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageResilienceConfig {
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout_ms: u64,
    /// Maximum trial calls while half-open.
    pub breaker_half_open_max_calls: u32,
    /// Attempts per idempotent call, including the first.
    pub retry_max_attempts: u32,
    /// Base delay for exponential backoff.
    pub retry_base_delay_ms: u64,
}

impl Default for StorageResilienceConfig {
    fn default() -> Self {
        Self {
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_max_calls: 1,
            retry_max_attempts: 3,
            retry_base_delay_ms: 10,
        }
    }
}

impl StorageResilienceConfig {
    /// Loads resilience configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies `HYPHANET_STORAGE_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(parsed) = env_u64("HYPHANET_STORAGE_BREAKER_FAILURE_THRESHOLD") {
            self.breaker_failure_threshold = u32::try_from(parsed).unwrap_or(u32::MAX).max(1);
        }
        if let Some(parsed) = env_u64("HYPHANET_STORAGE_BREAKER_RESET_MS") {
            self.breaker_reset_timeout_ms = parsed;
        }
        if let Some(parsed) = env_u64("HYPHANET_STORAGE_BREAKER_HALF_OPEN_MAX_CALLS") {
            self.breaker_half_open_max_calls = u32::try_from(parsed).unwrap_or(u32::MAX).max(1);
        }
        if let Some(parsed) = env_u64("HYPHANET_STORAGE_RETRY_MAX_ATTEMPTS") {
            self.retry_max_attempts = u32::try_from(parsed).unwrap_or(u32::MAX).max(1);
        }
        if let Some(parsed) = env_u64("HYPHANET_STORAGE_RETRY_BASE_DELAY_MS") {
            self.retry_base_delay_ms = parsed;
        }
        self
    }

    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker_failure_threshold = threshold;
        self
    }

    /// Sets the reset timeout in milliseconds.
    #[must_use]
    pub const fn with_reset_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.breaker_reset_timeout_ms = timeout_ms;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.retry_max_attempts = max_attempts;
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    /// Backoff before attempt `attempt + 1`: `base * 2^(attempt - 1)` plus up
    /// to 50% jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.retry_base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let base = self
            .retry_base_delay_ms
            .saturating_mul(1 << (attempt - 1).min(10));
        let jitter = rand::rng().random_range(0..=base / 2);
        Duration::from_millis(base.saturating_add(jitter))
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Returns `true` if `err` looks like transient lock contention.
#[must_use]
pub fn is_retryable_storage_error(err: &Error) -> bool {
    match err {
        Error::OperationFailed { cause, .. } => {
            let cause = cause.to_lowercase();
            cause.contains("database is locked")
                || cause.contains("busy")
                || cause.contains("timeout")
                || cause.contains("timed out")
        },
        _ => false,
    }
}

/// Runs `call` up to `config.retry_max_attempts` times while it fails with a
/// retryable error.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted or a non-retryable
/// error occurs.
pub fn retry_with_backoff<T>(
    config: &StorageResilienceConfig,
    backend: &'static str,
    operation: &'static str,
    mut call: impl FnMut() -> Result<T>,
) -> Result<T> {
    let max_attempts = config.retry_max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call() {
            Err(err) if attempt < max_attempts && is_retryable_storage_error(&err) => {
                metrics::counter!(
                    "storage_retries_total",
                    "backend" => backend,
                    "operation" => operation
                )
                .increment(1);
                tracing::warn!(
                    backend,
                    operation,
                    attempt,
                    error = %err,
                    "Retrying transient storage failure"
                );
                std::thread::sleep(config.delay_for_attempt(attempt));
                attempt += 1;
            },
            result => return result,
        }
    }
}

/// Circuit breaker state machine.
#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { attempts: u32 },
}

/// Circuit breaker for storage backends.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
    backend_name: &'static str,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: &StorageResilienceConfig, backend_name: &'static str) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
            half_open_max_calls: config.breaker_half_open_max_calls.max(1),
            backend_name,
        }
    }

    /// Checks if a request is allowed through the circuit breaker.
    pub fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    tracing::info!(
                        backend = self.backend_name,
                        "Circuit breaker transitioning to half-open"
                    );
                    self.state = BreakerState::HalfOpen { attempts: 0 };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen { ref mut attempts } => {
                if *attempts >= self.half_open_max_calls {
                    false
                } else {
                    *attempts += 1;
                    true
                }
            },
        }
    }

    /// Records a successful operation, closing the circuit.
    pub fn on_success(&mut self) {
        if !matches!(self.state, BreakerState::Closed { failures: 0 }) {
            tracing::info!(
                backend = self.backend_name,
                "Circuit breaker closing after success"
            );
        }
        self.state = BreakerState::Closed { failures: 0 };
    }

    /// Records a failed operation. Returns `true` if the circuit just opened.
    pub fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    tracing::warn!(
                        backend = self.backend_name,
                        failures = *failures,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened after consecutive failures"
                    );
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            BreakerState::HalfOpen { .. } => {
                tracing::warn!(
                    backend = self.backend_name,
                    "Circuit breaker re-opened after half-open failure"
                );
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            BreakerState::Open { .. } => {},
        }
        false
    }

    /// Returns the current state for metrics: 0 closed, 1 open, 2 half-open.
    #[must_use]
    pub const fn state_value(&self) -> u8 {
        match self.state {
            BreakerState::Closed { .. } => 0,
            BreakerState::Open { .. } => 1,
            BreakerState::HalfOpen { .. } => 2,
        }
    }

    /// Returns the backend name.
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        self.backend_name
    }
}

/// Breaker plus retry policy shared by the wrappers below.
struct Guard {
    breaker: Mutex<CircuitBreaker>,
    config: StorageResilienceConfig,
    backend_name: &'static str,
}

impl Guard {
    fn new(config: StorageResilienceConfig, backend_name: &'static str) -> Self {
        Self {
            breaker: Mutex::new(CircuitBreaker::new(&config, backend_name)),
            config,
            backend_name,
        }
    }

    /// Runs an idempotent call with retry inside the breaker.
    fn idempotent<T>(&self, operation: &'static str, call: impl FnMut() -> Result<T>) -> Result<T> {
        self.execute(operation, || {
            retry_with_backoff(&self.config, self.backend_name, operation, call)
        })
    }

    fn execute<T>(&self, operation: &'static str, call: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut breaker = self
            .breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if !breaker.allow() {
            let state = breaker.state_value();
            drop(breaker);
            Self::record_metrics(self.backend_name, operation, "circuit_open", state);
            return Err(Error::OperationFailed {
                operation: format!("storage_{operation}"),
                cause: format!("circuit breaker open for backend '{}'", self.backend_name),
            });
        }
        drop(breaker);

        let result = call();

        let mut breaker = self
            .breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match &result {
            Ok(_) => {
                breaker.on_success();
                let state = breaker.state_value();
                drop(breaker);
                Self::record_metrics(self.backend_name, operation, "success", state);
            },
            Err(_) => {
                let tripped = breaker.on_failure();
                let state = breaker.state_value();
                drop(breaker);
                Self::record_metrics(self.backend_name, operation, "error", state);
                if tripped {
                    metrics::counter!(
                        "storage_circuit_breaker_trips_total",
                        "backend" => self.backend_name,
                        "operation" => operation
                    )
                    .increment(1);
                }
            },
        }

        result
    }

    fn record_metrics(
        backend: &'static str,
        operation: &'static str,
        status: &'static str,
        state: u8,
    ) {
        metrics::counter!(
            "storage_requests_total",
            "backend" => backend,
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        metrics::gauge!(
            "storage_circuit_breaker_state",
            "backend" => backend
        )
        .set(f64::from(state));
    }
}

// ============================================================================
// Resilient Graph Backend
// ============================================================================

/// Graph backend wrapper with circuit breaker protection.
pub struct ResilientGraphBackend<G: GraphBackend> {
    inner: G,
    guard: Guard,
}

impl<G: GraphBackend> ResilientGraphBackend<G> {
    /// Creates a new resilient graph backend wrapper.
    #[must_use]
    pub fn new(inner: G, config: StorageResilienceConfig, backend_name: &'static str) -> Self {
        Self {
            inner,
            guard: Guard::new(config, backend_name),
        }
    }
}

impl<G: GraphBackend> GraphBackend for ResilientGraphBackend<G> {
    fn get_edge(&self, key: &EdgeKey) -> Result<Option<Edge>> {
        self.guard.idempotent("get_edge", || self.inner.get_edge(key))
    }

    fn upsert_edge(&self, key: &EdgeKey, init: EdgeInit, now: u64) -> Result<Edge> {
        self.guard
            .idempotent("upsert_edge", || self.inner.upsert_edge(key, init, now))
    }

    fn compare_and_swap(&self, edge: &Edge, expected_version: u64) -> Result<bool> {
        self.guard.execute("compare_and_swap", || {
            self.inner.compare_and_swap(edge, expected_version)
        })
    }

    fn list_outgoing(
        &self,
        tenant: &TenantId,
        source: &AgentId,
        limit: usize,
    ) -> Result<Vec<Edge>> {
        self.guard.idempotent("list_outgoing", || {
            self.inner.list_outgoing(tenant, source, limit)
        })
    }

    fn count_outgoing(&self, tenant: &TenantId, source: &AgentId) -> Result<usize> {
        self.guard
            .idempotent("count_outgoing", || self.inner.count_outgoing(tenant, source))
    }

    fn batch_decay(&self, tenant: &TenantId, pass: &DecayPass) -> Result<usize> {
        self.guard
            .idempotent("batch_decay", || self.inner.batch_decay(tenant, pass))
    }

    fn list_stale_similarity(
        &self,
        tenant: &TenantId,
        refreshed_before: u64,
        limit: usize,
    ) -> Result<Vec<EdgeKey>> {
        self.guard.idempotent("list_stale_similarity", || {
            self.inner.list_stale_similarity(tenant, refreshed_before, limit)
        })
    }

    fn update_base_similarity(&self, key: &EdgeKey, similarity: f32, now: u64) -> Result<bool> {
        self.guard.idempotent("update_base_similarity", || {
            self.inner.update_base_similarity(key, similarity, now)
        })
    }

    fn tenant_ids(&self) -> Result<Vec<TenantId>> {
        self.guard.idempotent("tenant_ids", || self.inner.tenant_ids())
    }

    fn stats(&self, tenant: &TenantId) -> Result<EdgeStats> {
        self.guard.idempotent("stats", || self.inner.stats(tenant))
    }
}

// ============================================================================
// Resilient Memory Index
// ============================================================================

/// Memory index wrapper with circuit breaker protection.
pub struct ResilientMemoryIndex<I: MemoryIndexBackend> {
    inner: I,
    guard: Guard,
}

impl<I: MemoryIndexBackend> ResilientMemoryIndex<I> {
    /// Creates a new resilient memory index wrapper.
    #[must_use]
    pub fn new(inner: I, config: StorageResilienceConfig, backend_name: &'static str) -> Self {
        Self {
            inner,
            guard: Guard::new(config, backend_name),
        }
    }
}

impl<I: MemoryIndexBackend> MemoryIndexBackend for ResilientMemoryIndex<I> {
    fn store(&self, record: &MemoryRecord) -> Result<()> {
        self.guard.execute("store", || self.inner.store(record))
    }

    fn get(&self, tenant: &TenantId, id: &MemoryId) -> Result<Option<MemoryRecord>> {
        self.guard.idempotent("get", || self.inner.get(tenant, id))
    }

    fn search(&self, tenant: &TenantId, query: &MemoryQuery<'_>) -> Result<Vec<MemoryHit>> {
        self.guard.idempotent("search", || self.inner.search(tenant, query))
    }

    fn rescore_quality(&self, tenant: &TenantId, id: &MemoryId, quality: f32) -> Result<bool> {
        self.guard.idempotent("rescore_quality", || {
            self.inner.rescore_quality(tenant, id, quality)
        })
    }

    fn purge_expired(&self, now: u64, limit: usize) -> Result<usize> {
        self.guard
            .idempotent("purge_expired", || self.inner.purge_expired(now, limit))
    }

    fn count(&self, tenant: &TenantId) -> Result<usize> {
        self.guard.idempotent("count", || self.inner.count(tenant))
    }
}

// ============================================================================
// Resilient Quota Backend
// ============================================================================

/// Quota ledger wrapper with circuit breaker protection.
///
/// Consumption is not retried: a failed call may or may not have charged.
pub struct ResilientQuotaBackend<Q: QuotaBackend> {
    inner: Q,
    guard: Guard,
}

impl<Q: QuotaBackend> ResilientQuotaBackend<Q> {
    /// Creates a new resilient quota wrapper.
    #[must_use]
    pub fn new(inner: Q, config: StorageResilienceConfig, backend_name: &'static str) -> Self {
        Self {
            inner,
            guard: Guard::new(config, backend_name),
        }
    }
}

impl<Q: QuotaBackend> QuotaBackend for ResilientQuotaBackend<Q> {
    fn try_consume(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        window: QuotaWindow,
        cost: u64,
        limit: u64,
    ) -> Result<QuotaDecision> {
        self.guard.execute("try_consume", || {
            self.inner.try_consume(tenant, metric, window, cost, limit)
        })
    }

    fn refund(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        window: QuotaWindow,
        cost: u64,
    ) -> Result<u64> {
        self.guard
            .execute("refund", || self.inner.refund(tenant, metric, window, cost))
    }

    fn used(&self, tenant: &TenantId, metric: MetricType, window: QuotaWindow) -> Result<u64> {
        self.guard
            .idempotent("used", || self.inner.used(tenant, metric, window))
    }

    fn purge_before(&self, before: u64, limit: usize) -> Result<usize> {
        self.guard
            .idempotent("purge_before", || self.inner.purge_before(before, limit))
    }
}

// ============================================================================
// Resilient Nutrient Backend
// ============================================================================

/// Nutrient store wrapper with circuit breaker protection.
pub struct ResilientNutrientBackend<N: NutrientBackend> {
    inner: N,
    guard: Guard,
}

impl<N: NutrientBackend> ResilientNutrientBackend<N> {
    /// Creates a new resilient nutrient store wrapper.
    #[must_use]
    pub fn new(inner: N, config: StorageResilienceConfig, backend_name: &'static str) -> Self {
        Self {
            inner,
            guard: Guard::new(config, backend_name),
        }
    }
}

impl<N: NutrientBackend> NutrientBackend for ResilientNutrientBackend<N> {
    fn insert_nutrient(&self, nutrient: &Nutrient) -> Result<()> {
        self.guard
            .execute("insert_nutrient", || self.inner.insert_nutrient(nutrient))
    }

    fn get_nutrient(&self, tenant: &TenantId, id: &NutrientId) -> Result<Option<Nutrient>> {
        self.guard
            .idempotent("get_nutrient", || self.inner.get_nutrient(tenant, id))
    }

    fn routes_for_hop(&self, tenant: &TenantId, id: &NutrientId, hop: u32) -> Result<Vec<Route>> {
        self.guard
            .idempotent("routes_for_hop", || self.inner.routes_for_hop(tenant, id, hop))
    }

    fn visited_agents(&self, tenant: &TenantId, id: &NutrientId) -> Result<Vec<AgentId>> {
        self.guard
            .idempotent("visited_agents", || self.inner.visited_agents(tenant, id))
    }

    fn commit_hop(&self, commit: &HopCommit<'_>) -> Result<HopCommitResult> {
        self.guard.execute("commit_hop", || self.inner.commit_hop(commit))
    }

    fn transition_state(
        &self,
        tenant: &TenantId,
        id: &NutrientId,
        from: NutrientState,
        to: NutrientState,
    ) -> Result<bool> {
        self.guard.idempotent("transition_state", || {
            self.inner.transition_state(tenant, id, from, to)
        })
    }

    fn routes_for_trace(&self, tenant: &TenantId, trace: &TraceId) -> Result<Vec<Route>> {
        self.guard
            .idempotent("routes_for_trace", || self.inner.routes_for_trace(tenant, trace))
    }

    fn attach_outcome(&self, tenant: &TenantId, route: &RouteId, score: f32) -> Result<bool> {
        self.guard
            .idempotent("attach_outcome", || self.inner.attach_outcome(tenant, route, score))
    }

    fn detach_outcome(&self, tenant: &TenantId, route: &RouteId, score: f32) -> Result<bool> {
        self.guard
            .idempotent("detach_outcome", || self.inner.detach_outcome(tenant, route, score))
    }

    fn list_due(&self, now: u64, limit: usize) -> Result<Vec<Nutrient>> {
        self.guard
            .idempotent("list_due", || self.inner.list_due(now, limit))
    }

    fn count_by_state(&self, tenant: &TenantId) -> Result<Vec<(NutrientState, u64)>> {
        self.guard
            .idempotent("count_by_state", || self.inner.count_by_state(tenant))
    }
}

// ============================================================================
// Resilient Agent Backend
// ============================================================================

/// Agent registry wrapper with circuit breaker protection.
pub struct ResilientAgentBackend<A: AgentBackend> {
    inner: A,
    guard: Guard,
}

impl<A: AgentBackend> ResilientAgentBackend<A> {
    /// Creates a new resilient agent registry wrapper.
    #[must_use]
    pub fn new(inner: A, config: StorageResilienceConfig, backend_name: &'static str) -> Self {
        Self {
            inner,
            guard: Guard::new(config, backend_name),
        }
    }
}

impl<A: AgentBackend> AgentBackend for ResilientAgentBackend<A> {
    fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        self.guard
            .idempotent("upsert_agent", || self.inner.upsert_agent(agent))
    }

    fn get_agent(&self, tenant: &TenantId, id: &AgentId) -> Result<Option<Agent>> {
        self.guard
            .idempotent("get_agent", || self.inner.get_agent(tenant, id))
    }

    fn get_agents(&self, tenant: &TenantId, ids: &[AgentId]) -> Result<Vec<Agent>> {
        self.guard
            .idempotent("get_agents", || self.inner.get_agents(tenant, ids))
    }

    fn find_by_capabilities(
        &self,
        tenant: &TenantId,
        capabilities: &[String],
        limit: usize,
    ) -> Result<Vec<Agent>> {
        self.guard.idempotent("find_by_capabilities", || {
            self.inner.find_by_capabilities(tenant, capabilities, limit)
        })
    }

    fn set_status(&self, tenant: &TenantId, id: &AgentId, status: AgentStatus) -> Result<bool> {
        self.guard
            .idempotent("set_status", || self.inner.set_status(tenant, id, status))
    }

    fn record_outcome(
        &self,
        tenant: &TenantId,
        id: &AgentId,
        score: f32,
        success_threshold: f32,
        now: u64,
    ) -> Result<bool> {
        self.guard.execute("record_outcome", || {
            self.inner
                .record_outcome(tenant, id, score, success_threshold, now)
        })
    }

    fn count(&self, tenant: &TenantId) -> Result<usize> {
        self.guard.idempotent("count", || self.inner.count(tenant))
    }
}
