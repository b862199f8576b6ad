//! Nutrient and route storage.
//!
//! Nutrients and routes share one database so that a hop commit is a single
//! transaction.

mod sqlite;

pub use sqlite::SqliteNutrientStore;

// Re-export trait for convenience
pub use crate::storage::traits::{HopCommit, HopCommitResult, NutrientBackend};
