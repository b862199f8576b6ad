//! Quota ledger backends.
//!
//! | Backend | Use Case |
//! |---------|----------|
//! | [`SqliteQuotaLedger`] | Default; atomic conditional upsert |
//! | [`InMemoryQuotaLedger`] | Testing |

mod memory;
mod sqlite;

pub use memory::InMemoryQuotaLedger;
pub use sqlite::SqliteQuotaLedger;

// Re-export trait for convenience
pub use crate::storage::traits::QuotaBackend;
