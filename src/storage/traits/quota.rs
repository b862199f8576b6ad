//! Quota ledger backend trait.

use crate::Result;
use crate::models::{MetricType, QuotaDecision, QuotaWindow, TenantId};

/// Trait for quota ledgers.
///
/// # Implementor Notes
///
/// - `try_consume` must be a single atomic check-and-increment: two callers
///   racing for the last unit cannot both be allowed
/// - A denied call must leave every counter unchanged
pub trait QuotaBackend: Send + Sync {
    /// Charges `cost` to the counter for `window` if it stays within `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; the caller must not assume the
    /// charge was or was not applied.
    fn try_consume(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        window: QuotaWindow,
        cost: u64,
        limit: u64,
    ) -> Result<QuotaDecision>;

    /// Returns `cost` units to the counter for `window`, never going below
    /// zero. Returns the units used afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn refund(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        window: QuotaWindow,
        cost: u64,
    ) -> Result<u64>;

    /// Returns units used in `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn used(&self, tenant: &TenantId, metric: MetricType, window: QuotaWindow) -> Result<u64>;

    /// Deletes up to `limit` counters whose window ended before `before`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn purge_before(&self, before: u64, limit: usize) -> Result<usize>;
}
