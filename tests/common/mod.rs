//! Shared setup for integration tests: a temp data dir with a migrated
//! database, a knowledge store, and a retriever on the offline hash
//! embedder.

#![allow(dead_code)]

use anyhow::Result;
use comment_triage::config::Config;
use comment_triage::embedding::{EmbeddingProvider, HashEmbeddingProvider};
use comment_triage::knowledge::KnowledgeStore;
use comment_triage::search::Retriever;
use comment_triage::{db, migrate};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub const DIMS: usize = 64;

pub struct Harness {
    pub tmp: TempDir,
    pub config: Config,
    pub pool: SqlitePool,
    pub store: KnowledgeStore,
    pub retriever: Retriever,
}

impl Harness {
    /// Another retriever over the same store, config, and pool.
    pub fn retriever_with(&self, embedder: Arc<dyn EmbeddingProvider>) -> Result<Retriever> {
        Ok(Retriever::new(self.store.clone(), &self.config, embedder)?)
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn setup() -> Result<Harness> {
    setup_with(|_| {}).await
}

pub async fn setup_with(tweak: impl FnOnce(&mut Config)) -> Result<Harness> {
    init_tracing();
    let tmp = TempDir::new()?;
    let mut config = Config::with_data_dir(tmp.path());
    config.embedding.dims = Some(DIMS);
    tweak(&mut config);

    let pool = db::connect(&config).await?;
    migrate::run_migrations(&pool).await?;

    let store = KnowledgeStore::new(pool.clone(), &config.knowledge);
    let retriever = Retriever::new(
        store.clone(),
        &config,
        Arc::new(HashEmbeddingProvider::new(DIMS)),
    )?;

    Ok(Harness {
        tmp,
        config,
        pool,
        store,
        retriever,
    })
}
