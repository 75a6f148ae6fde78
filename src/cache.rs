//! In-memory caching using moka
//!
//! Reference rows (products, OpCos, manufacturers and the rest) are owned by
//! other services and change rarely, so lookups made while building conflict
//! reports are served from a TTL cache in front of `ReferenceData`.

use async_trait::async_trait;
use moka::future::Cache;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{AssignmentKind, EntityId, ReferenceEntity};
use crate::store::ReferenceData;

/// Read-through cache of reference entities keyed by (kind, id)
#[derive(Clone)]
pub struct ReferenceCache {
    source: Arc<dyn ReferenceData>,
    entries: Cache<(AssignmentKind, EntityId), Arc<ReferenceEntity>>,
}

impl ReferenceCache {
    pub fn new(source: Arc<dyn ReferenceData>, ttl: Duration, max_capacity: u64) -> Self {
        Self {
            source,
            entries: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Entities for `ids`, fetching only the misses from the source.
    ///
    /// Unknown ids are absent from the result and are not cached.
    pub async fn get_many(
        &self,
        kind: AssignmentKind,
        ids: &BTreeSet<EntityId>,
    ) -> Result<Vec<Arc<ReferenceEntity>>> {
        let mut found = Vec::with_capacity(ids.len());
        let mut missing = BTreeSet::new();
        for id in ids {
            match self.entries.get(&(kind, *id)).await {
                Some(entity) => found.push(entity),
                None => {
                    missing.insert(*id);
                }
            }
        }
        debug!(%kind, hits = found.len(), misses = missing.len(), "Reference cache lookup");

        if !missing.is_empty() {
            for entity in self.source.entities(kind, &missing).await? {
                let entity = Arc::new(entity);
                self.entries.insert((kind, entity.id), entity.clone()).await;
                found.push(entity);
            }
        }

        found.sort_by_key(|e| e.id);
        Ok(found)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.entry_count(),
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
        info!("Reference cache invalidated");
    }
}

#[async_trait]
impl ReferenceData for ReferenceCache {
    async fn entities(
        &self,
        kind: AssignmentKind,
        ids: &BTreeSet<EntityId>,
    ) -> Result<Vec<ReferenceEntity>> {
        Ok(self
            .get_many(kind, ids)
            .await?
            .into_iter()
            .map(|e| e.as_ref().clone())
            .collect())
    }
}

/// Cache statistics for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: u64,
}
