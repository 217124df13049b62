//! Wiring: build every component from one [`Config`].
//!
//! The CLI commands and the HTTP server share this assembly so both talk
//! to the same store, embedder and index with the same settings.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::index::{create_index, IndexClient};
use crate::ledger::SyncLedger;
use crate::migrate;
use crate::query::{QueryEngine, QueryParams};
use crate::retry::RetryPolicy;
use crate::source::{SourceStore, SqliteSource};
use crate::sync::{SyncSettings, Synchronizer};

#[derive(Clone)]
pub struct Engine {
    pub config: Arc<Config>,
    pub index: Arc<dyn IndexClient>,
    pub ledger: SyncLedger,
    pub synchronizer: Arc<Synchronizer>,
    pub query: Arc<QueryEngine>,
}

impl Engine {
    /// Connect to the database (migrating it), build the embedding and
    /// index clients, and assemble the synchronizer and query engine.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;

        let retry = RetryPolicy::from_config(&config.retry);
        let embedder = create_embedder(&config.embedding, retry.clone())
            .context("Failed to create embedding client")?;
        let index = create_index(&config.index, config.embedding.dims, retry)
            .context("Failed to create index client")?;
        let source: Arc<dyn SourceStore> = Arc::new(SqliteSource::new(pool.clone()));

        Ok(Self::assemble(
            config,
            source,
            embedder,
            index,
            SyncLedger::new(pool),
        ))
    }

    /// Assemble from already-built collaborators.
    pub fn assemble(
        config: &Config,
        source: Arc<dyn SourceStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn IndexClient>,
        ledger: SyncLedger,
    ) -> Self {
        let synchronizer = Synchronizer::new(
            source,
            embedder.clone(),
            index.clone(),
            ledger.clone(),
            SyncSettings::from_config(config),
        );
        let query = QueryEngine::new(
            embedder,
            index.clone(),
            QueryParams::from_config(&config.retrieval),
        );
        Self {
            config: Arc::new(config.clone()),
            index,
            ledger,
            synchronizer: Arc::new(synchronizer),
            query: Arc::new(query),
        }
    }
}
