//! Shared application state: the engine components wired over one store.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::ReferenceCache;
use crate::conflicts::{ConflictReporter, OverlapEngine};
use crate::proposals::ProposalLifecycle;
use crate::repository::ContractRepository;
use crate::store::{ContractStore, ReferenceData};
use crate::versioning::VersionStore;

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<ContractRepository>,
    pub engine: Arc<OverlapEngine>,
    pub reporter: Arc<ConflictReporter>,
    pub lifecycle: Arc<ProposalLifecycle>,
    pub cache: ReferenceCache,
}

/// Knobs that shape how the components are wired
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub lookup_cache_ttl: Duration,
    pub lookup_cache_capacity: u64,
    pub conflicts_include_suspended: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lookup_cache_ttl: Duration::from_secs(300),
            lookup_cache_capacity: 10_000,
            conflicts_include_suspended: false,
        }
    }
}

impl AppState {
    /// Reference validation on writes reads `references` directly; report
    /// names go through the TTL cache.
    pub fn new(
        store: Arc<dyn ContractStore>,
        references: Arc<dyn ReferenceData>,
        settings: &EngineSettings,
    ) -> Self {
        let versions = Arc::new(VersionStore::new(store.clone(), references.clone()));
        let repository = Arc::new(ContractRepository::new(store.clone(), versions));
        let engine = Arc::new(OverlapEngine::new(
            repository.clone(),
            settings.conflicts_include_suspended,
        ));
        let cache = ReferenceCache::new(
            references,
            settings.lookup_cache_ttl,
            settings.lookup_cache_capacity,
        );
        let reporter = Arc::new(ConflictReporter::new(cache.clone()));
        let lifecycle = Arc::new(ProposalLifecycle::new(
            store,
            repository.clone(),
            engine.clone(),
            reporter.clone(),
        ));

        Self {
            repository,
            engine,
            reporter,
            lifecycle,
            cache,
        }
    }
}
