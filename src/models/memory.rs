//! Memory records and search types.

use super::{AgentId, MemoryId, Sensitivity, TenantId, TraceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of stored memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A distilled insight.
    Insight,
    /// A code or text snippet.
    Snippet,
    /// A hint about which tool to use.
    ToolHint,
    /// A plan or plan fragment.
    Plan,
    /// A recorded task outcome.
    Outcome,
}

impl MemoryKind {
    /// Returns all kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Insight,
            Self::Snippet,
            Self::ToolHint,
            Self::Plan,
            Self::Outcome,
        ]
    }

    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insight => "insight",
            Self::Snippet => "snippet",
            Self::ToolHint => "tool_hint",
            Self::Plan => "plan",
            Self::Outcome => "outcome",
        }
    }

    /// Parses a kind from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "insight" => Some(Self::Insight),
            "snippet" => Some(Self::Snippet),
            "tool_hint" | "toolhint" | "tool-hint" => Some(Self::ToolHint),
            "plan" => Some(Self::Plan),
            "outcome" => Some(Self::Outcome),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier.
    pub id: MemoryId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Authoring agent.
    pub agent: AgentId,
    /// Trace the memory was produced under, if any.
    pub trace_id: Option<TraceId>,
    /// Kind.
    pub kind: MemoryKind,
    /// Content.
    pub content: String,
    /// Content embedding.
    pub embedding: Vec<f32>,
    /// Quality in `[0, 1]`; the only mutable field.
    pub quality: f32,
    /// Classification.
    pub sensitivity: Sensitivity,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Expiration timestamp, `None` for no expiry.
    pub expires_at: Option<u64>,
}

impl MemoryRecord {
    /// Creates a record with a generated id and default quality of 0.5.
    #[must_use]
    pub fn new(
        tenant: TenantId,
        agent: AgentId,
        kind: MemoryKind,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: MemoryId::generate(),
            tenant,
            agent,
            trace_id: None,
            kind,
            content: content.into(),
            embedding,
            quality: 0.5,
            sensitivity: Sensitivity::Internal,
            created_at: crate::current_timestamp(),
            expires_at: None,
        }
    }

    /// Sets the quality.
    #[must_use]
    pub const fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    /// Sets the trace.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Sets the sensitivity.
    #[must_use]
    pub const fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Sets the expiration timestamp.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns `true` if the record has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Optional narrowing applied to a memory search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryFilter {
    /// Only these kinds (empty = all).
    pub kinds: Vec<MemoryKind>,
    /// Only memories authored by this agent.
    pub agent: Option<AgentId>,
    /// Only memories produced under this trace.
    pub trace_id: Option<TraceId>,
    /// Exclude memories above this sensitivity.
    pub max_sensitivity: Option<Sensitivity>,
}

impl MemoryFilter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a kind.
    #[must_use]
    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Restricts to an agent.
    #[must_use]
    pub fn with_agent(mut self, agent: AgentId) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Restricts to a trace.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Caps the sensitivity.
    #[must_use]
    pub const fn with_max_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.max_sensitivity = Some(sensitivity);
        self
    }

    /// Returns `true` if the record passes every set criterion.
    #[must_use]
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&record.kind) {
            return false;
        }
        if self.agent.as_ref().is_some_and(|a| *a != record.agent) {
            return false;
        }
        if self
            .trace_id
            .as_ref()
            .is_some_and(|t| record.trace_id.as_ref() != Some(t))
        {
            return false;
        }
        self.max_sensitivity
            .is_none_or(|max| record.sensitivity <= max)
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    /// The matched record.
    pub record: MemoryRecord,
    /// Cosine similarity to the query.
    pub relevance: f32,
}
