//! Storage backend traits.

mod agents;
mod graph;
mod index;
mod lifecycle;
mod quota;

pub use agents::AgentBackend;
pub use graph::GraphBackend;
pub use index::{MemoryIndexBackend, MemoryQuery};
pub use lifecycle::{HopCommit, HopCommitResult, NutrientBackend};
pub use quota::QuotaBackend;
