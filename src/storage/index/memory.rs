//! In-memory memory index for testing.

use crate::embedding::cosine_similarity;
use crate::models::{MemoryHit, MemoryId, MemoryRecord, TenantId};
use crate::storage::traits::{MemoryIndexBackend, MemoryQuery};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::rank_hits;

type RecordMap = HashMap<(TenantId, MemoryId), MemoryRecord>;

/// In-memory memory index with brute-force cosine ranking.
#[derive(Debug, Default)]
pub struct InMemoryMemoryIndex {
    records: RwLock<RecordMap>,
}

impl InMemoryMemoryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, operation: &str) -> Result<RwLockReadGuard<'_, RecordMap>> {
        self.records
            .read()
            .map_err(|_| Error::operation(operation, "lock poisoned"))
    }

    fn write(&self, operation: &str) -> Result<RwLockWriteGuard<'_, RecordMap>> {
        self.records
            .write()
            .map_err(|_| Error::operation(operation, "lock poisoned"))
    }
}

impl MemoryIndexBackend for InMemoryMemoryIndex {
    fn store(&self, record: &MemoryRecord) -> Result<()> {
        let mut records = self.write("store_memory")?;
        let key = (record.tenant.clone(), record.id.clone());
        if records.contains_key(&key) {
            return Err(Error::operation(
                "store_memory",
                format!("memory {} already exists", record.id),
            ));
        }
        records.insert(key, record.clone());
        Ok(())
    }

    fn get(&self, tenant: &TenantId, id: &MemoryId) -> Result<Option<MemoryRecord>> {
        let records = self.read("get_memory")?;
        Ok(records.get(&(tenant.clone(), id.clone())).cloned())
    }

    fn search(&self, tenant: &TenantId, query: &MemoryQuery<'_>) -> Result<Vec<MemoryHit>> {
        let records = self.read("search_memories")?;
        let hits = records
            .values()
            .filter(|r| {
                r.tenant == *tenant
                    && !r.is_expired_at(query.now)
                    && r.quality >= query.min_quality
                    && query.filter.matches(r)
            })
            .map(|record| MemoryHit {
                relevance: cosine_similarity(query.embedding, &record.embedding),
                record: record.clone(),
            })
            .collect();
        Ok(rank_hits(hits, query.limit))
    }

    fn rescore_quality(&self, tenant: &TenantId, id: &MemoryId, quality: f32) -> Result<bool> {
        let mut records = self.write("rescore_quality")?;
        Ok(records
            .get_mut(&(tenant.clone(), id.clone()))
            .is_some_and(|r| {
                r.quality = quality.clamp(0.0, 1.0);
                true
            }))
    }

    fn purge_expired(&self, now: u64, limit: usize) -> Result<usize> {
        let mut records = self.write("purge_expired_memories")?;
        let expired: Vec<_> = records
            .iter()
            .filter(|(_, r)| r.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .take(limit)
            .collect();
        for key in &expired {
            records.remove(key);
        }
        Ok(expired.len())
    }

    fn count(&self, tenant: &TenantId) -> Result<usize> {
        let records = self.read("count_memories")?;
        Ok(records.keys().filter(|(t, _)| t == tenant).count())
    }
}
