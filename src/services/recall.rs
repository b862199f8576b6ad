//! Memory storage and retrieval.
//!
//! Searches rank tenant-scoped, unexpired records by cosine similarity over a
//! candidate pool of `top_k · pool_factor` hits, then diversify the result
//! with MMR when the top hits are near-duplicates.

use super::mmr::diversify;
use super::quota::{QuotaService, require_tenant};
use crate::config::HyphanetConfig;
use crate::embedding::validate_embedding;
use crate::models::{
    EventMeta, MemoryFilter, MemoryHit, MemoryId, MemoryRecord, MetricType, NetworkEvent, TenantId,
};
use crate::security::AuditLogger;
use crate::storage::{MemoryIndexBackend, MemoryQuery};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Service for storing and searching memory records.
pub struct MemoryService {
    index: Arc<dyn MemoryIndexBackend>,
    quota: Arc<QuotaService>,
    audit: Arc<AuditLogger>,
    config: Arc<HyphanetConfig>,
}

impl MemoryService {
    /// Creates a new memory service.
    #[must_use]
    pub fn new(
        index: Arc<dyn MemoryIndexBackend>,
        quota: Arc<QuotaService>,
        audit: Arc<AuditLogger>,
        config: Arc<HyphanetConfig>,
    ) -> Self {
        Self {
            index,
            quota,
            audit,
            config,
        }
    }

    /// Stores a record for `tenant` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TenantMismatch`] if the record belongs to another
    /// tenant, [`Error::InvalidInput`] for a bad embedding, quality or empty
    /// content, [`Error::QuotaExceeded`] when memory writes are exhausted, or
    /// a storage error.
    #[instrument(skip(self, record), fields(tenant = %tenant, memory_id = %record.id))]
    pub fn store_at(&self, tenant: &TenantId, record: MemoryRecord, now: u64) -> Result<MemoryId> {
        require_tenant(tenant)?;
        if record.tenant != *tenant {
            return Err(Error::TenantMismatch {
                expected: tenant.to_string(),
                found: record.tenant.to_string(),
            });
        }
        if record.agent.is_blank() {
            return Err(Error::InvalidInput("memory agent must not be empty".to_string()));
        }
        if record.content.trim().is_empty() {
            return Err(Error::InvalidInput("memory content must not be empty".to_string()));
        }
        validate_unit("quality", record.quality)?;
        validate_embedding(
            "memory embedding",
            &record.embedding,
            self.config.embedding_dimensions,
        )?;

        self.quota.require_at(
            tenant,
            MetricType::MemoryWrites,
            1,
            record.trace_id.as_ref(),
            now,
        )?;
        self.index.store(&record)?;

        self.audit.record(&NetworkEvent::MemoryStored {
            meta: EventMeta::with_timestamp("memory", tenant.clone(), record.trace_id.clone(), now),
            memory_id: record.id.clone(),
            agent: record.agent.clone(),
        });
        metrics::counter!("memories_stored_total", "kind" => record.kind.as_str()).increment(1);
        tracing::debug!(memory_id = %record.id, kind = %record.kind, "Stored memory");
        Ok(record.id)
    }

    /// Searches `tenant`'s records.
    ///
    /// Returns at most `top_k` hits with quality at least `min_quality`,
    /// diversified when the best hits are near-duplicates. `top_k` is capped
    /// at `memory.max_top_k`; zero returns nothing without charging quota.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a bad embedding or `min_quality`,
    /// [`Error::QuotaExceeded`] when searches are exhausted, or a storage
    /// error.
    #[instrument(skip(self, embedding, filter), fields(tenant = %tenant, top_k))]
    pub fn search_at(
        &self,
        tenant: &TenantId,
        embedding: &[f32],
        top_k: usize,
        min_quality: f32,
        filter: &MemoryFilter,
        now: u64,
    ) -> Result<Vec<MemoryHit>> {
        require_tenant(tenant)?;
        validate_embedding("query embedding", embedding, self.config.embedding_dimensions)?;
        validate_unit("min_quality", min_quality)?;
        let top_k = top_k.min(self.config.memory.max_top_k);
        if top_k == 0 {
            return Ok(Vec::new());
        }

        self.quota
            .require_at(tenant, MetricType::Searches, 1, filter.trace_id.as_ref(), now)?;

        let start = Instant::now();
        let pool = top_k.saturating_mul(self.config.memory.pool_factor.max(1));
        let hits = self.index.search(
            tenant,
            &MemoryQuery {
                embedding,
                limit: pool,
                min_quality,
                filter,
                now,
            },
        )?;
        let pool_size = hits.len();
        let results = diversify(
            hits,
            top_k,
            self.config.memory.diversity_threshold,
            self.config.memory.mmr_lambda,
        );

        metrics::histogram!("memory_search_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1_000.0);
        tracing::debug!(pool_size, returned = results.len(), "Memory search complete");
        Ok(results)
    }

    /// Gets a record by id within `tenant`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn get(&self, tenant: &TenantId, id: &MemoryId) -> Result<Option<MemoryRecord>> {
        require_tenant(tenant)?;
        self.index.get(tenant, id)
    }

    /// Re-scores a record's quality, the only mutable field of a memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a quality outside `[0, 1]`,
    /// [`Error::NotFound`] if the record does not exist in `tenant`, or a
    /// storage error.
    #[instrument(skip(self), fields(tenant = %tenant, memory_id = %id))]
    pub fn rescore_quality(&self, tenant: &TenantId, id: &MemoryId, quality: f32) -> Result<()> {
        require_tenant(tenant)?;
        validate_unit("quality", quality)?;
        if self.index.rescore_quality(tenant, id, quality)? {
            Ok(())
        } else {
            Err(Error::NotFound {
                kind: "memory",
                id: id.to_string(),
            })
        }
    }

    /// Deletes up to `limit` expired records across tenants.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_expired(&self, now: u64, limit: usize) -> Result<usize> {
        self.index.purge_expired(now, limit)
    }

    /// Number of records stored for `tenant`.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    pub fn count(&self, tenant: &TenantId) -> Result<usize> {
        self.index.count(tenant)
    }
}

fn validate_unit(field: &str, value: f32) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{field} must be within [0, 1], got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentId, MemoryKind, Sensitivity};
    use crate::security::AuditConfig;
    use crate::storage::{InMemoryMemoryIndex, InMemoryQuotaLedger};

    fn service() -> MemoryService {
        let config = Arc::new(HyphanetConfig::default().with_embedding_dimensions(2));
        let audit = Arc::new(AuditLogger::with_config(AuditConfig::new(b"k".to_vec())));
        let quota = Arc::new(QuotaService::new(
            Arc::new(InMemoryQuotaLedger::new()),
            Arc::clone(&audit),
            Arc::clone(&config),
        ));
        MemoryService::new(Arc::new(InMemoryMemoryIndex::new()), quota, audit, config)
    }

    fn record(tenant: &str, content: &str, embedding: Vec<f32>) -> MemoryRecord {
        MemoryRecord::new(
            TenantId::new(tenant),
            AgentId::new("writer"),
            MemoryKind::Insight,
            content,
            embedding,
        )
        .with_created_at(10)
    }

    #[test]
    fn test_store_validates() {
        let svc = service();
        let tenant = TenantId::new("acme");
        assert!(matches!(
            svc.store_at(&tenant, record("other", "x", vec![1.0, 0.0]), 10),
            Err(Error::TenantMismatch { .. })
        ));
        assert!(matches!(
            svc.store_at(&tenant, record("acme", "x", vec![1.0]), 10),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            svc.store_at(&tenant, record("acme", "x", vec![1.0, 0.0]).with_quality(1.5), 10),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            svc.store_at(&tenant, record("acme", "  ", vec![1.0, 0.0]), 10),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_search_is_tenant_scoped_and_ranked() {
        let svc = service();
        let acme = TenantId::new("acme");
        svc.store_at(&acme, record("acme", "near", vec![1.0, 0.1]), 10)
            .unwrap();
        svc.store_at(&acme, record("acme", "far", vec![0.0, 1.0]), 10)
            .unwrap();
        let globex = TenantId::new("globex");
        svc.store_at(&globex, record("globex", "leak", vec![1.0, 0.0]), 10)
            .unwrap();

        let hits = svc
            .search_at(&acme, &[1.0, 0.0], 5, 0.0, &MemoryFilter::new(), 20)
            .unwrap();
        let contents: Vec<_> = hits.iter().map(|h| h.record.content.as_str()).collect();
        assert_eq!(contents, vec!["near", "far"]);
    }

    #[test]
    fn test_search_filters_quality_and_sensitivity() {
        let svc = service();
        let t = TenantId::new("acme");
        svc.store_at(&t, record("acme", "low", vec![1.0, 0.0]).with_quality(0.1), 10)
            .unwrap();
        svc.store_at(
            &t,
            record("acme", "secret", vec![1.0, 0.0]).with_sensitivity(Sensitivity::Secret),
            10,
        )
        .unwrap();
        let filter = MemoryFilter::new().with_max_sensitivity(Sensitivity::Internal);
        let hits = svc.search_at(&t, &[1.0, 0.0], 5, 0.3, &filter, 20).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_diversifies_duplicates() {
        let svc = service();
        let t = TenantId::new("acme");
        for content in ["dup a", "dup b", "dup c"] {
            svc.store_at(&t, record("acme", content, vec![0.8, 0.6]), 10)
                .unwrap();
        }
        svc.store_at(&t, record("acme", "different", vec![0.6, -0.8]), 10)
            .unwrap();
        let hits = svc
            .search_at(&t, &[1.0, 0.0], 2, 0.0, &MemoryFilter::new(), 20)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|h| h.record.content == "different"));
    }

    #[test]
    fn test_zero_top_k_and_rescore() {
        let svc = service();
        let t = TenantId::new("acme");
        assert!(
            svc.search_at(&t, &[1.0, 0.0], 0, 0.0, &MemoryFilter::new(), 0)
                .unwrap()
                .is_empty()
        );
        let id = svc
            .store_at(&t, record("acme", "x", vec![1.0, 0.0]), 10)
            .unwrap();
        svc.rescore_quality(&t, &id, 0.9).unwrap();
        assert!((svc.get(&t, &id).unwrap().unwrap().quality - 0.9).abs() < f32::EPSILON);
        assert!(matches!(
            svc.rescore_quality(&TenantId::new("globex"), &id, 0.9),
            Err(Error::NotFound { .. })
        ));
    }
}
