//! Shared handler state

use anyhow::Context;
use iop_core::{Pipeline, ServiceConfig};
use iop_rules::{CatalogHandle, RuleCatalog};
use iop_store::ResultStore;
use std::sync::Arc;

/// State cloned into every handler
#[derive(Debug, Clone)]
pub struct AppState {
    /// Upload pipeline, also owning the catalog handle and the store
    pub pipeline: Arc<Pipeline>,
    /// Effective configuration
    pub config: Arc<ServiceConfig>,
}

impl AppState {
    /// Wrap an assembled pipeline
    pub fn new(pipeline: Pipeline, config: ServiceConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
        }
    }

    /// Load the rule catalog, open the store and assemble the pipeline
    ///
    /// The catalog is loaded before anything is bound so a broken content
    /// tree shows up in the startup log rather than on the first upload.
    pub fn from_config(config: ServiceConfig) -> anyhow::Result<Self> {
        let catalog = RuleCatalog::load(&config.content_dir);

        let store = ResultStore::open(&config.database)
            .with_context(|| format!("opening result store at {}", config.database.display()))?;
        tracing::info!(location = store.location(), "result store ready");

        let pipeline = Pipeline::from_config(
            &config,
            Arc::new(CatalogHandle::new(catalog)),
            Arc::new(store),
        );
        Ok(Self::new(pipeline, config))
    }
}
