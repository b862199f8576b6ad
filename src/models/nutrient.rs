//! Nutrients: the knowledge packets routed through the network.

use super::{AgentId, NutrientId, TenantId, TraceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensitivity classification of a nutrient or memory.
///
/// Ordered: `Public < Internal < Confidential < Secret`. An agent may only
/// receive content whose sensitivity does not exceed its clearance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Shareable with any agent.
    Public,
    /// Internal to the tenant.
    #[default]
    Internal,
    /// Restricted to cleared agents.
    Confidential,
    /// Highest classification.
    Secret,
}

impl Sensitivity {
    /// Returns all levels, lowest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Public, Self::Internal, Self::Confidential, Self::Secret]
    }

    /// Returns the level as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Confidential => "confidential",
            Self::Secret => "secret",
        }
    }

    /// Numeric rank, `Public` = 0.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Public => 0,
            Self::Internal => 1,
            Self::Confidential => 2,
            Self::Secret => 3,
        }
    }

    /// Parses a level from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "public" => Some(Self::Public),
            "internal" => Some(Self::Internal),
            "confidential" => Some(Self::Confidential),
            "secret" => Some(Self::Secret),
            _ => None,
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a nutrient stopped propagating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalReason {
    /// The TTL elapsed.
    Expired,
    /// The hop budget was used up.
    Exhausted,
}

impl TerminalReason {
    /// Returns the reason as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a nutrient.
///
/// ```text
/// Created ──► Propagating ──► Expired
///    │             │    ▲
///    │             └────┘──► Exhausted
///    └──────────────────────► Expired | Exhausted
/// ```
///
/// `Expired` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NutrientState {
    /// Persisted, no hop routed yet.
    #[default]
    Created,
    /// At least one hop routed and budget remains.
    Propagating,
    /// The TTL elapsed before the hop budget was used.
    Expired,
    /// All hops were routed.
    Exhausted,
}

impl NutrientState {
    /// Returns the state as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Propagating => "propagating",
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
        }
    }

    /// Parses a state from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "propagating" => Some(Self::Propagating),
            "expired" => Some(Self::Expired),
            "exhausted" => Some(Self::Exhausted),
            _ => None,
        }
    }

    /// Returns `true` for `Expired` and `Exhausted`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Exhausted)
    }

    /// Returns the terminal reason, if any.
    #[must_use]
    pub const fn terminal_reason(&self) -> Option<TerminalReason> {
        match self {
            Self::Expired => Some(TerminalReason::Expired),
            Self::Exhausted => Some(TerminalReason::Exhausted),
            Self::Created | Self::Propagating => None,
        }
    }

    /// Returns `true` if moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Created => !matches!(next, Self::Created),
            Self::Propagating => !matches!(next, Self::Created),
            Self::Expired | Self::Exhausted => false,
        }
    }

    /// Applies a transition.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the transition is illegal.
    pub fn transition(self, next: Self) -> crate::Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(crate::Error::InvalidInput(format!(
                "illegal nutrient transition {} -> {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

impl From<TerminalReason> for NutrientState {
    fn from(reason: TerminalReason) -> Self {
        match reason {
            TerminalReason::Expired => Self::Expired,
            TerminalReason::Exhausted => Self::Exhausted,
        }
    }
}

impl fmt::Display for NutrientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted nutrient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nutrient {
    /// Unique identifier.
    pub id: NutrientId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Correlation id shared with routes and outcomes.
    pub trace_id: TraceId,
    /// Agent that broadcast the nutrient.
    pub origin: AgentId,
    /// Short human-readable summary.
    pub summary: String,
    /// Content embedding.
    pub embedding: Vec<f32>,
    /// Supporting snippets.
    pub snippets: Vec<String>,
    /// Tool hints for receivers.
    pub tool_hints: Vec<String>,
    /// Capabilities a receiver should have.
    pub required_capabilities: Vec<String>,
    /// Classification.
    pub sensitivity: Sensitivity,
    /// Last hop routed (0 before the first routing pass).
    pub current_hop: u32,
    /// Hop budget.
    pub max_hops: u32,
    /// Time-to-live in seconds.
    pub ttl_secs: u64,
    /// Quota units charged per routing pass.
    pub quota_cost: u64,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// `created_at + ttl_secs`.
    pub expires_at: u64,
    /// Lifecycle state.
    pub state: NutrientState,
}

impl Nutrient {
    /// Returns `true` if the TTL has elapsed at `now`.
    #[must_use]
    pub const fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the hop budget is used up.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.current_hop >= self.max_hops
    }
}

/// Caller-supplied fields for a new nutrient.
///
/// Unset limits fall back to the tenant policy.
#[derive(Debug, Clone, Default)]
pub struct NutrientDraft {
    /// Short human-readable summary.
    pub summary: String,
    /// Content embedding.
    pub embedding: Vec<f32>,
    /// Supporting snippets.
    pub snippets: Vec<String>,
    /// Tool hints.
    pub tool_hints: Vec<String>,
    /// Capabilities a receiver should have.
    pub required_capabilities: Vec<String>,
    /// Classification.
    pub sensitivity: Sensitivity,
    /// Hop budget override.
    pub max_hops: Option<u32>,
    /// TTL override in seconds.
    pub ttl_secs: Option<u64>,
    /// Quota cost override.
    pub quota_cost: Option<u64>,
    /// Existing trace to join; a new one is generated otherwise.
    pub trace_id: Option<TraceId>,
}

impl NutrientDraft {
    /// Creates a draft with a summary and embedding.
    #[must_use]
    pub fn new(summary: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            summary: summary.into(),
            embedding,
            ..Self::default()
        }
    }

    /// Adds a snippet.
    #[must_use]
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippets.push(snippet.into());
        self
    }

    /// Adds a tool hint.
    #[must_use]
    pub fn with_tool_hint(mut self, hint: impl Into<String>) -> Self {
        self.tool_hints.push(hint.into());
        self
    }

    /// Sets the required capabilities.
    #[must_use]
    pub fn with_required_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the sensitivity.
    #[must_use]
    pub const fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Sets the hop budget.
    #[must_use]
    pub const fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    /// Sets the TTL in seconds.
    #[must_use]
    pub const fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    /// Sets the quota cost.
    #[must_use]
    pub const fn with_quota_cost(mut self, cost: u64) -> Self {
        self.quota_cost = Some(cost);
        self
    }

    /// Joins an existing trace.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}
