//! Audit logging.
//!
//! Every state change in the network (nutrient creation, route commits, edge
//! updates, quota denials, expiry, memory writes, outcomes) becomes an
//! [`AuditEntry`] scoped to a tenant and, where one exists, a trace.
//!
//! # HMAC Chain Integrity
//!
//! Entries are chained using HMAC-SHA256. Each signature covers the entry's
//! canonical JSON (with the signature fields omitted) followed by the previous
//! entry's signature, so editing, dropping or reordering an entry breaks the
//! chain. The first entry chains to [`GENESIS_HMAC`].
//!
//! To verify a live logger use [`AuditLogger::verify_chain`]; to verify a
//! JSONL file written by one use [`verify_file`].

use crate::config::AuditSettings;
use crate::models::{NetworkEvent, TenantId, TraceId};
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// HMAC-SHA256 type alias.
type HmacSha256 = Hmac<Sha256>;

/// Previous-signature value of the first entry in a chain.
pub const GENESIS_HMAC: &str = "genesis";

/// Default number of entries kept in memory.
pub const DEFAULT_MAX_IN_MEMORY: usize = 10_000;

/// Audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID.
    pub id: String,
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,
    /// Dotted event type, e.g. `route.created`.
    pub event_type: String,
    /// Emitting component or agent.
    pub actor: String,
    /// Owning tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Trace the change belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Resource affected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Action taken.
    pub action: String,
    /// Outcome of the action.
    pub outcome: AuditOutcome,
    /// Additional metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// HMAC signature of this entry (hex-encoded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_signature: Option<String>,
    /// Signature of the previous entry, or [`GENESIS_HMAC`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hmac: Option<String>,
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Action succeeded.
    Success,
    /// Action failed.
    Failure,
    /// Action was denied.
    Denied,
}

impl AuditEntry {
    /// Creates a new audit entry for the current time.
    #[must_use]
    pub fn new(event_type: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            actor: "system".to_string(),
            tenant: None,
            trace_id: None,
            resource: None,
            action: action.into(),
            outcome: AuditOutcome::Success,
            metadata: serde_json::Value::Null,
            hmac_signature: None,
            previous_hmac: None,
        }
    }

    /// Computes the canonical bytes for HMAC signing.
    ///
    /// Format: JSON of the entry without its signature fields, `|`, then
    /// `previous_hmac`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be serialized.
    pub fn canonical_bytes(&self, previous_hmac: &str) -> Result<Vec<u8>> {
        let unsigned = Self {
            hmac_signature: None,
            previous_hmac: None,
            ..self.clone()
        };
        let mut bytes =
            serde_json::to_vec(&unsigned).map_err(|e| Error::operation("audit_canonicalize", e))?;
        bytes.push(b'|');
        bytes.extend_from_slice(previous_hmac.as_bytes());
        Ok(bytes)
    }

    /// Computes the HMAC signature for this entry.
    ///
    /// Returns `None` if the entry cannot be canonicalized.
    #[must_use]
    pub fn compute_hmac(&self, key: &[u8], previous_hmac: &str) -> Option<String> {
        let canonical = self.canonical_bytes(previous_hmac).ok()?;
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        mac.update(&canonical);
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signs this entry, setting both signature and previous hash.
    ///
    /// Returns `false` if signing failed.
    pub fn sign(&mut self, key: &[u8], previous_hmac: &str) -> bool {
        if let Some(sig) = self.compute_hmac(key, previous_hmac) {
            self.previous_hmac = Some(previous_hmac.to_string());
            self.hmac_signature = Some(sig);
            true
        } else {
            false
        }
    }

    /// Verifies this entry's HMAC signature.
    #[must_use]
    pub fn verify(&self, key: &[u8]) -> bool {
        let Some(ref signature) = self.hmac_signature else {
            return false;
        };
        let Some(ref previous) = self.previous_hmac else {
            return false;
        };

        self.compute_hmac(key, previous)
            .is_some_and(|computed| computed == *signature)
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Sets the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant: &TenantId) -> Self {
        self.tenant = Some(tenant.to_string());
        self
    }

    /// Sets the trace.
    #[must_use]
    pub fn with_trace(mut self, trace: Option<&TraceId>) -> Self {
        self.trace_id = trace.map(ToString::to_string);
        self
    }

    /// Sets the resource.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Sets the outcome.
    #[must_use]
    pub const fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Sets metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the timestamp from Unix seconds.
    #[must_use]
    pub fn with_unix_timestamp(mut self, secs: u64) -> Self {
        if let Some(ts) = i64::try_from(secs)
            .ok()
            .and_then(|s| Utc.timestamp_opt(s, 0).single())
        {
            self.timestamp = ts;
        }
        self
    }
}

/// Audit logger configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// JSONL file the chain is appended to.
    pub log_path: Option<PathBuf>,
    /// HMAC key for chain integrity.
    pub hmac_key: Vec<u8>,
    /// Entries kept in memory; older ones are only in the file.
    pub max_in_memory: usize,
}

impl AuditConfig {
    /// Creates a config with the given key and no file.
    #[must_use]
    pub const fn new(hmac_key: Vec<u8>) -> Self {
        Self {
            log_path: None,
            hmac_key,
            max_in_memory: DEFAULT_MAX_IN_MEMORY,
        }
    }

    /// Builds a config from the `[audit]` settings.
    ///
    /// Without a configured key an ephemeral random key is generated; the
    /// resulting chain cannot be verified after the process exits.
    #[must_use]
    pub fn from_settings(settings: &AuditSettings) -> Self {
        let hmac_key = settings.hmac_key.as_deref().map_or_else(
            || {
                tracing::warn!(
                    "No audit HMAC key configured; signing with an ephemeral key. \
                     Set HYPHANET_AUDIT_KEY to make the audit file verifiable."
                );
                ephemeral_key()
            },
            decode_key,
        );
        Self {
            log_path: settings.log_path.clone(),
            hmac_key,
            max_in_memory: settings.max_in_memory.unwrap_or(DEFAULT_MAX_IN_MEMORY).max(1),
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the in-memory capacity.
    #[must_use]
    pub fn with_max_in_memory(mut self, max: usize) -> Self {
        self.max_in_memory = max.max(1);
        self
    }
}

/// Decodes a configured key: hex when it parses as hex, raw bytes otherwise.
#[must_use]
pub fn decode_key(key: &str) -> Vec<u8> {
    hex::decode(key.trim()).unwrap_or_else(|_| key.as_bytes().to_vec())
}

fn ephemeral_key() -> Vec<u8> {
    let mut key = [0_u8; 32];
    rand::rng().fill(&mut key);
    key.to_vec()
}

/// In-memory chain state, updated under one lock so signing order and
/// storage order agree.
#[derive(Debug)]
struct ChainState {
    entries: VecDeque<AuditEntry>,
    /// Signature of the newest entry.
    last_hmac: String,
    /// `previous_hmac` of the oldest retained entry.
    anchor: String,
}

/// HMAC-chained audit logger.
///
/// Entries are signed, kept in a bounded in-memory buffer and optionally
/// appended to a JSONL file. Each network owns one logger; there is no
/// global instance.
pub struct AuditLogger {
    config: AuditConfig,
    state: Mutex<ChainState>,
}

impl AuditLogger {
    /// Creates a logger with the given config.
    #[must_use]
    pub fn with_config(config: AuditConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ChainState {
                entries: VecDeque::new(),
                last_hmac: GENESIS_HMAC.to_string(),
                anchor: GENESIS_HMAC.to_string(),
            }),
        }
    }

    /// Creates a logger from the `[audit]` settings.
    #[must_use]
    pub fn from_settings(settings: &AuditSettings) -> Self {
        Self::with_config(AuditConfig::from_settings(settings))
    }

    /// Records a network event.
    pub fn record(&self, event: &NetworkEvent) {
        self.log_entry(Self::event_to_entry(event));
    }

    /// Signs, stores and persists an entry.
    pub fn log_entry(&self, mut entry: AuditEntry) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if entry.sign(&self.config.hmac_key, &state.last_hmac) {
            if let Some(ref sig) = entry.hmac_signature {
                state.last_hmac.clone_from(sig);
            }
        } else {
            tracing::error!(event_type = %entry.event_type, "Failed to sign audit entry");
        }

        if let Some(ref path) = self.config.log_path {
            if let Err(e) = append_to_file(path, &entry) {
                metrics::counter!("audit_write_failures_total").increment(1);
                tracing::error!(path = %path.display(), error = %e, "Failed to append audit entry");
            }
        }

        metrics::counter!("audit_entries_total", "event_type" => entry.event_type.clone())
            .increment(1);
        state.entries.push_back(entry);
        while state.entries.len() > self.config.max_in_memory {
            if let Some(evicted) = state.entries.pop_front() {
                state.anchor = evicted.hmac_signature.unwrap_or_default();
            }
        }
    }

    /// Returns up to `limit` most recent entries, newest first.
    #[must_use]
    pub fn recent_entries(&self, limit: usize) -> Vec<AuditEntry> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Replays a trace's retained entries in chain order.
    #[must_use]
    pub fn entries_for_trace(&self, tenant: &TenantId, trace: &TraceId) -> Vec<AuditEntry> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .entries
            .iter()
            .filter(|e| {
                e.tenant.as_deref() == Some(tenant.as_str())
                    && e.trace_id.as_deref() == Some(trace.as_str())
            })
            .cloned()
            .collect()
    }

    /// Returns a tenant's retained entries in chain order.
    #[must_use]
    pub fn entries_for_tenant(&self, tenant: &TenantId) -> Vec<AuditEntry> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .entries
            .iter()
            .filter(|e| e.tenant.as_deref() == Some(tenant.as_str()))
            .cloned()
            .collect()
    }

    /// Verifies the chain over the retained entries.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first entry whose signature is missing or
    /// invalid, or whose `previous_hmac` does not match its predecessor.
    pub fn verify_chain(&self) -> Result<()> {
        let (entries, anchor) = {
            let state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (
                state.entries.iter().cloned().collect::<Vec<_>>(),
                state.anchor.clone(),
            )
        };
        verify_entries(&self.config.hmac_key, anchor, entries.iter().map(Ok)).map(|_| ())
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entries
            .len()
    }

    /// Returns `true` if nothing has been retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts a `NetworkEvent` to an `AuditEntry`.
    fn event_to_entry(event: &NetworkEvent) -> AuditEntry {
        let meta = event.meta();
        let entry = match event {
            NetworkEvent::NutrientCreated {
                nutrient_id,
                origin,
                ..
            } => AuditEntry::new(event.event_type(), "create")
                .with_resource(nutrient_id.as_str())
                .with_metadata(serde_json::json!({ "origin": origin })),
            NetworkEvent::RouteCreated {
                nutrient_id,
                source,
                destination,
                hop,
                score,
                explored,
                ..
            } => AuditEntry::new(event.event_type(), "route")
                .with_resource(nutrient_id.as_str())
                .with_metadata(serde_json::json!({
                    "source": source,
                    "destination": destination,
                    "hop": hop,
                    "score": score,
                    "explored": explored,
                })),
            NetworkEvent::NutrientTerminated {
                nutrient_id,
                reason,
                hop,
                ..
            } => AuditEntry::new(event.event_type(), reason.as_str())
                .with_resource(nutrient_id.as_str())
                .with_metadata(serde_json::json!({ "hop": hop })),
            NetworkEvent::EdgeReinforced {
                edge,
                previous_weight,
                weight,
                ..
            } => AuditEntry::new(event.event_type(), "reinforce")
                .with_resource(edge.to_string())
                .with_metadata(serde_json::json!({
                    "previous_weight": previous_weight,
                    "weight": weight,
                })),
            NetworkEvent::EdgesDecayed { count, factor, .. } => {
                AuditEntry::new(event.event_type(), "decay").with_metadata(serde_json::json!({
                    "count": count,
                    "factor": factor,
                }))
            },
            NetworkEvent::QuotaDenied {
                metric,
                cost,
                used,
                limit,
                ..
            } => AuditEntry::new(event.event_type(), "consume")
                .with_resource(metric.as_str())
                .with_outcome(AuditOutcome::Denied)
                .with_metadata(serde_json::json!({
                    "cost": cost,
                    "used": used,
                    "limit": limit,
                })),
            NetworkEvent::MemoryStored {
                memory_id, agent, ..
            } => AuditEntry::new(event.event_type(), "create")
                .with_resource(memory_id.as_str())
                .with_metadata(serde_json::json!({ "agent": agent })),
            NetworkEvent::OutcomeRecorded {
                score,
                attributed_routes,
                updated_edges,
                ..
            } => AuditEntry::new(event.event_type(), "attribute").with_metadata(
                serde_json::json!({
                    "score": score,
                    "attributed_routes": attributed_routes,
                    "updated_edges": updated_edges,
                }),
            ),
        };
        AuditEntry {
            id: meta.event_id.clone(),
            ..entry
        }
        .with_actor(meta.source)
        .with_tenant(&meta.tenant)
        .with_trace(meta.trace_id.as_ref())
        .with_unix_timestamp(meta.timestamp)
    }
}

/// Verifies a JSONL audit file from genesis. Returns the number of entries.
///
/// # Errors
///
/// Returns an error if the file cannot be read, a line is not a valid entry,
/// or the chain is broken.
pub fn verify_file(path: &Path, key: &[u8]) -> Result<usize> {
    let file = std::fs::File::open(path).map_err(|e| Error::operation("open_audit_file", e))?;
    let entries = std::io::BufReader::new(file)
        .lines()
        .enumerate()
        .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
        .map(|(i, line)| {
            let line = line.map_err(|e| Error::operation("read_audit_file", e))?;
            serde_json::from_str::<AuditEntry>(&line).map_err(|e| {
                Error::operation("parse_audit_file", format!("line {}: {e}", i + 1))
            })
        });
    verify_entries(key, GENESIS_HMAC.to_string(), entries)
}

fn verify_entries<E, I>(key: &[u8], mut expected_previous: String, entries: I) -> Result<usize>
where
    E: std::borrow::Borrow<AuditEntry>,
    I: Iterator<Item = Result<E>>,
{
    let mut count = 0;
    for (i, entry) in entries.enumerate() {
        let entry = entry?;
        let entry = entry.borrow();
        let Some(ref signature) = entry.hmac_signature else {
            return Err(Error::operation(
                "verify_chain",
                format!("entry {i} missing hmac_signature"),
            ));
        };
        let Some(ref previous) = entry.previous_hmac else {
            return Err(Error::operation(
                "verify_chain",
                format!("entry {i} missing previous_hmac"),
            ));
        };
        if *previous != expected_previous {
            return Err(Error::operation(
                "verify_chain",
                format!(
                    "entry {i} chain broken: expected previous '{expected_previous}', got '{previous}'"
                ),
            ));
        }
        if !entry.verify(key) {
            return Err(Error::operation(
                "verify_chain",
                format!("entry {i} has invalid signature"),
            ));
        }
        expected_previous.clone_from(signature);
        count += 1;
    }
    Ok(count)
}

/// Appends an entry to the log file.
///
/// # Security
///
/// - The path is canonicalized before opening so a symlink swapped in after
///   validation cannot redirect the write.
/// - On Unix the file is created with mode 0o600 atomically.
fn append_to_file(path: &Path, entry: &AuditEntry) -> std::io::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    let canonical_path = canonicalize_path(path)?;

    #[cfg(unix)]
    let mut file = {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&canonical_path)?
    };

    #[cfg(not(unix))]
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&canonical_path)?;

    let json = serde_json::to_string(entry)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    writeln!(file, "{json}")?;
    Ok(())
}

/// Canonicalizes a path, canonicalizing the parent when the file is new.
fn canonicalize_path(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        return path.canonicalize();
    }

    let Some(parent) = path.parent() else {
        return Ok(path.to_path_buf());
    };

    if !parent.exists() {
        return Ok(path.to_path_buf());
    }

    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid file name")
    })?;

    Ok(parent.canonicalize()?.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentId, EventMeta, MetricType, NutrientId};

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn logger() -> AuditLogger {
        AuditLogger::with_config(AuditConfig::new(KEY.to_vec()))
    }

    fn route_event(tenant: &str, trace: &str) -> NetworkEvent {
        NetworkEvent::RouteCreated {
            meta: EventMeta::with_timestamp(
                "lifecycle",
                TenantId::new(tenant),
                Some(TraceId::new(trace)),
                1_700_000_000,
            ),
            nutrient_id: NutrientId::new("nut_1"),
            source: AgentId::new("a"),
            destination: AgentId::new("b"),
            hop: 1,
            score: 0.7,
            explored: false,
        }
    }

    #[test]
    fn test_hmac_sign_and_verify() {
        let mut entry = AuditEntry::new("route.created", "route");
        assert!(entry.sign(KEY, GENESIS_HMAC));
        assert!(entry.verify(KEY));
        assert!(!entry.verify(b"another key"));

        entry.action = "tampered".to_string();
        assert!(!entry.verify(KEY));
    }

    #[test]
    fn test_canonical_form_ignores_signature_fields() {
        let mut entry = AuditEntry::new("x", "y");
        let before = entry.canonical_bytes("p").unwrap();
        entry.sign(KEY, "p");
        assert_eq!(entry.canonical_bytes("p").unwrap(), before);
        assert_ne!(entry.canonical_bytes("q").unwrap(), before);
    }

    #[test]
    fn test_event_mapping_carries_tenant_and_trace() {
        let logger = logger();
        logger.record(&route_event("acme", "trc_1"));
        let entry = &logger.recent_entries(1)[0];
        assert_eq!(entry.event_type, "route.created");
        assert_eq!(entry.actor, "lifecycle");
        assert_eq!(entry.tenant.as_deref(), Some("acme"));
        assert_eq!(entry.trace_id.as_deref(), Some("trc_1"));
        assert_eq!(entry.resource.as_deref(), Some("nut_1"));
        assert_eq!(entry.metadata["destination"], "b");
        assert_eq!(entry.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_quota_denial_is_denied_outcome() {
        let logger = logger();
        logger.record(&NetworkEvent::QuotaDenied {
            meta: EventMeta::new("quota", TenantId::new("acme"), None),
            metric: MetricType::Routes,
            cost: 1,
            used: 10,
            limit: 10,
        });
        assert_eq!(logger.recent_entries(1)[0].outcome, AuditOutcome::Denied);
    }

    #[test]
    fn test_chain_verifies_and_detects_tampering() {
        let logger = logger();
        for i in 0..5 {
            logger.record(&route_event("acme", &format!("trc_{i}")));
        }
        assert!(logger.verify_chain().is_ok());

        {
            let mut state = logger.state.lock().unwrap();
            state.entries[2].action = "forged".to_string();
        }
        let err = logger.verify_chain().unwrap_err();
        assert!(err.to_string().contains("entry 2"));
    }

    #[test]
    fn test_bounded_buffer_keeps_anchor() {
        let logger = AuditLogger::with_config(AuditConfig::new(KEY.to_vec()).with_max_in_memory(3));
        for i in 0..10 {
            logger.record(&route_event("acme", &format!("trc_{i}")));
        }
        assert_eq!(logger.len(), 3);
        assert!(logger.verify_chain().is_ok());
    }

    #[test]
    fn test_entries_for_trace_is_tenant_scoped() {
        let logger = logger();
        logger.record(&route_event("acme", "trc_1"));
        logger.record(&route_event("globex", "trc_1"));
        logger.record(&route_event("acme", "trc_2"));
        let replay = logger.entries_for_trace(&TenantId::new("acme"), &TraceId::new("trc_1"));
        assert_eq!(replay.len(), 1);
        assert_eq!(logger.entries_for_tenant(&TenantId::new("acme")).len(), 2);
    }

    #[test]
    fn test_file_chain_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger =
            AuditLogger::with_config(AuditConfig::new(KEY.to_vec()).with_log_path(&path));
        for i in 0..4 {
            logger.record(&route_event("acme", &format!("trc_{i}")));
        }
        assert_eq!(verify_file(&path, KEY).unwrap(), 4);
        assert!(verify_file(&path, b"wrong").is_err());

        let content = std::fs::read_to_string(&path).unwrap();
        let truncated: Vec<&str> = content.lines().skip(1).collect();
        std::fs::write(&path, truncated.join("\n")).unwrap();
        assert!(verify_file(&path, KEY).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger =
            AuditLogger::with_config(AuditConfig::new(KEY.to_vec()).with_log_path(&path));
        logger.record(&route_event("acme", "trc_1"));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_decode_key() {
        assert_eq!(decode_key("00ff"), vec![0x00, 0xff]);
        assert_eq!(decode_key("not hex!"), b"not hex!".to_vec());
        let settings = AuditSettings::default();
        assert_eq!(AuditConfig::from_settings(&settings).hmac_key.len(), 32);
    }
}
