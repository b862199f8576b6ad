//! In-memory graph backend for testing.
//!
//! Provides a fast, non-persistent implementation of [`GraphBackend`] with the
//! same ordering and decay semantics as the `SQLite` backend.

use crate::models::{AgentId, DecayPass, Edge, EdgeInit, EdgeKey, EdgeStats, TenantId};
use crate::storage::traits::GraphBackend;
use crate::{Error, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory graph backend for testing.
///
/// Edges live in a `BTreeMap` ordered by natural key, so one source's
/// outgoing edges are a contiguous range.
///
/// # Example
///
/// ```rust,ignore
/// use hyphanet::storage::graph::InMemoryGraphBackend;
/// use hyphanet::storage::traits::GraphBackend;
///
/// let backend = InMemoryGraphBackend::new();
/// backend.upsert_edge(&key, EdgeInit::default(), now)?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryGraphBackend {
    edges: RwLock<BTreeMap<EdgeKey, Edge>>,
}

impl InMemoryGraphBackend {
    /// Creates a new empty in-memory graph backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of edges stored across tenants.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.read().map(|e| e.len()).unwrap_or(0)
    }

    fn read(&self, operation: &str) -> Result<RwLockReadGuard<'_, BTreeMap<EdgeKey, Edge>>> {
        self.edges
            .read()
            .map_err(|_| Error::operation(operation, "lock poisoned"))
    }

    fn write(&self, operation: &str) -> Result<RwLockWriteGuard<'_, BTreeMap<EdgeKey, Edge>>> {
        self.edges
            .write()
            .map_err(|_| Error::operation(operation, "lock poisoned"))
    }

    fn outgoing<'a>(
        edges: &'a BTreeMap<EdgeKey, Edge>,
        tenant: &'a TenantId,
        source: &'a AgentId,
    ) -> impl Iterator<Item = &'a Edge> {
        let start = EdgeKey::new(tenant.clone(), source.clone(), AgentId::new(""));
        edges
            .range(start..)
            .take_while(move |(k, _)| k.tenant == *tenant && k.source == *source)
            .map(|(_, edge)| edge)
    }

    fn outgoing_order(a: &Edge, b: &Edge) -> Ordering {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| b.last_interaction.cmp(&a.last_interaction))
            .then_with(|| a.key.destination.cmp(&b.key.destination))
    }
}

impl GraphBackend for InMemoryGraphBackend {
    fn get_edge(&self, key: &EdgeKey) -> Result<Option<Edge>> {
        Ok(self.read("get_edge")?.get(key).cloned())
    }

    fn upsert_edge(&self, key: &EdgeKey, init: EdgeInit, now: u64) -> Result<Edge> {
        let mut edges = self.write("upsert_edge")?;
        let edge = edges
            .entry(key.clone())
            .and_modify(|edge| edge.last_interaction = edge.last_interaction.max(now))
            .or_insert_with(|| Edge::new(key.clone(), init, now));
        Ok(edge.clone())
    }

    fn compare_and_swap(&self, edge: &Edge, expected_version: u64) -> Result<bool> {
        let mut edges = self.write("compare_and_swap")?;
        let Some(stored) = edges.get_mut(&edge.key) else {
            return Ok(false);
        };
        if stored.version != expected_version {
            return Ok(false);
        }
        stored.weight = edge.weight;
        stored.success_total = edge.success_total;
        stored.last_interaction = stored.last_interaction.max(edge.last_interaction);
        stored.version += 1;
        Ok(true)
    }

    fn list_outgoing(
        &self,
        tenant: &TenantId,
        source: &AgentId,
        limit: usize,
    ) -> Result<Vec<Edge>> {
        let edges = self.read("list_outgoing")?;
        let mut out: Vec<Edge> = Self::outgoing(&edges, tenant, source).cloned().collect();
        out.sort_by(Self::outgoing_order);
        out.truncate(limit);
        Ok(out)
    }

    fn count_outgoing(&self, tenant: &TenantId, source: &AgentId) -> Result<usize> {
        let edges = self.read("count_outgoing")?;
        Ok(Self::outgoing(&edges, tenant, source).count())
    }

    fn batch_decay(&self, tenant: &TenantId, pass: &DecayPass) -> Result<usize> {
        let mut edges = self.write("batch_decay")?;
        let mut decayed = 0;
        for edge in edges.values_mut().filter(|e| e.key.tenant == *tenant) {
            if decayed >= pass.limit {
                break;
            }
            if edge.last_interaction >= pass.cutoff || edge.last_decayed_at >= pass.sweep_at {
                continue;
            }
            let next = edge.weight.min((edge.weight * pass.factor).max(pass.min_weight));
            edge.decay_total += edge.weight - next;
            edge.weight = next;
            edge.last_decayed_at = pass.sweep_at;
            edge.version += 1;
            decayed += 1;
        }
        Ok(decayed)
    }

    fn list_stale_similarity(
        &self,
        tenant: &TenantId,
        refreshed_before: u64,
        limit: usize,
    ) -> Result<Vec<EdgeKey>> {
        let edges = self.read("list_stale_similarity")?;
        let mut stale: Vec<&Edge> = edges
            .values()
            .filter(|e| e.key.tenant == *tenant && e.similarity_refreshed_at < refreshed_before)
            .collect();
        stale.sort_by_key(|e| e.similarity_refreshed_at);
        Ok(stale.into_iter().take(limit).map(|e| e.key.clone()).collect())
    }

    fn update_base_similarity(&self, key: &EdgeKey, similarity: f32, now: u64) -> Result<bool> {
        let mut edges = self.write("update_base_similarity")?;
        Ok(edges.get_mut(key).is_some_and(|edge| {
            edge.base_similarity = similarity.clamp(0.0, 1.0);
            edge.similarity_refreshed_at = now;
            true
        }))
    }

    fn tenant_ids(&self) -> Result<Vec<TenantId>> {
        let edges = self.read("tenant_ids")?;
        let tenants: BTreeSet<TenantId> = edges.keys().map(|k| k.tenant.clone()).collect();
        Ok(tenants.into_iter().collect())
    }

    #[allow(clippy::cast_precision_loss)]
    fn stats(&self, tenant: &TenantId) -> Result<EdgeStats> {
        let edges = self.read("edge_stats")?;
        let weights: Vec<f32> = edges
            .values()
            .filter(|e| e.key.tenant == *tenant)
            .map(|e| e.weight)
            .collect();
        if weights.is_empty() {
            return Ok(EdgeStats::default());
        }
        let sources: BTreeSet<&AgentId> = edges
            .keys()
            .filter(|k| k.tenant == *tenant)
            .map(|k| &k.source)
            .collect();
        Ok(EdgeStats {
            edge_count: weights.len() as u64,
            source_count: sources.len() as u64,
            avg_weight: weights.iter().sum::<f32>() / weights.len() as f32,
            min_weight: weights.iter().copied().fold(f32::INFINITY, f32::min),
            max_weight: weights.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        })
    }
}
