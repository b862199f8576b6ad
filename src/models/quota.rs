//! Quota metrics, windows and decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A metered operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Routing passes, charged at the nutrient's quota cost.
    Routes,
    /// Memory stores.
    MemoryWrites,
    /// Memory searches.
    Searches,
    /// Recorded outcomes.
    Outcomes,
}

impl MetricType {
    /// Returns all metrics.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Routes,
            Self::MemoryWrites,
            Self::Searches,
            Self::Outcomes,
        ]
    }

    /// Returns the metric as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Routes => "routes",
            Self::MemoryWrites => "memory_writes",
            Self::Searches => "searches",
            Self::Outcomes => "outcomes",
        }
    }

    /// Parses a metric from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "routes" => Some(Self::Routes),
            "memory_writes" | "memory-writes" => Some(Self::MemoryWrites),
            "searches" => Some(Self::Searches),
            "outcomes" => Some(Self::Outcomes),
            _ => None,
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fixed, non-overlapping quota window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuotaWindow {
    /// Inclusive start (Unix epoch seconds).
    pub start: u64,
    /// Exclusive end (Unix epoch seconds).
    pub end: u64,
}

impl QuotaWindow {
    /// Returns the window of length `window_secs` containing `now`.
    ///
    /// Windows are aligned to multiples of `window_secs`. A zero length is
    /// treated as one second.
    #[must_use]
    pub const fn containing(now: u64, window_secs: u64) -> Self {
        let len = if window_secs == 0 { 1 } else { window_secs };
        let start = now - now % len;
        Self {
            start,
            end: start.saturating_add(len),
        }
    }
}

/// Result of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum QuotaDecision {
    /// The cost was charged.
    Allowed {
        /// Units used in the window after the charge.
        used: u64,
        /// The window limit.
        limit: u64,
        /// End of the charged window.
        window_end: u64,
    },
    /// The cost was not charged; nothing changed.
    Denied {
        /// Units used in the window.
        used: u64,
        /// The window limit.
        limit: u64,
        /// When the next window opens.
        retry_at: u64,
    },
}

impl QuotaDecision {
    /// Returns `true` if the cost was charged.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Usage of one metric in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// The metric.
    pub metric: MetricType,
    /// Units used.
    pub used: u64,
    /// The window limit.
    pub limit: u64,
    /// Window start.
    pub window_start: u64,
    /// Window end.
    pub window_end: u64,
}

impl QuotaUsage {
    /// Units left in the window.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}
