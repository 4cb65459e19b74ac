//! Lookup engine
//!
//! Wires the backend, dispatcher, geographic resolver, batch orchestrator and
//! history together from one [`LookupConfig`].

use crate::backend::{HealthStatus, HttpBackend, LookupBackend};
use crate::batch::BatchOrchestrator;
use crate::config::LookupConfig;
use crate::credentials::{CredentialProvider, StaticCredentials};
use crate::dispatcher::QueryDispatcher;
use crate::error::Result;
use crate::geography::GeographicResolver;
use crate::history::SearchHistory;
use std::sync::Arc;
use tracing::info;

pub struct LookupEngine {
    backend: Arc<dyn LookupBackend>,
    dispatcher: Arc<QueryDispatcher>,
    geography: GeographicResolver,
    batch: BatchOrchestrator,
}

impl LookupEngine {
    /// HTTP engine with the token from the config (if any).
    pub fn from_config(config: LookupConfig) -> Result<Self> {
        let credentials: Arc<dyn CredentialProvider> =
            Arc::new(StaticCredentials::new(config.token.clone()));
        Self::with_credentials(config, credentials)
    }

    pub fn with_credentials(config: LookupConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn LookupBackend> = Arc::new(HttpBackend::new(&config, credentials)?);
        info!("Lookup engine targeting {}", config.base_url);
        Ok(Self::with_backend(config, backend))
    }

    /// Engine over any backend implementation.
    pub fn with_backend(config: LookupConfig, backend: Arc<dyn LookupBackend>) -> Self {
        let history = Arc::new(SearchHistory::new(config.history_capacity));
        let dispatcher = Arc::new(QueryDispatcher::new(
            backend.clone(),
            config.retry.clone(),
            history,
        ));
        let batch = BatchOrchestrator::new(dispatcher.clone(), config.batch_concurrency)
            .with_enrichment(config.batch_enrich);
        Self {
            geography: GeographicResolver::new(backend.clone()),
            backend,
            dispatcher,
            batch,
        }
    }

    pub fn dispatcher(&self) -> &QueryDispatcher {
        &self.dispatcher
    }

    pub fn geography(&self) -> &GeographicResolver {
        &self.geography
    }

    pub fn batch(&self) -> &BatchOrchestrator {
        &self.batch
    }

    pub fn history(&self) -> &SearchHistory {
        self.dispatcher.history()
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.backend.health().await
    }
}
