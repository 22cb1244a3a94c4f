pub mod memory;
pub mod serve;

use std::sync::Arc;

use parley_config::AppConfig;
use parley_memory::MemoryStore;
use parley_providers::HttpEmbedder;
use parley_store::{Database, DatabaseOptions};

pub(crate) fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Open the configured database and memory store.
pub(crate) async fn open_memory(
    config: &AppConfig,
) -> Result<MemoryStore, Box<dyn std::error::Error>> {
    let db = Database::open(
        &config.database.path,
        &DatabaseOptions {
            cache_mb: config.database.cache_mb,
            max_connections: config.database.max_connections,
        },
    )
    .await?;
    let embedder = Arc::new(HttpEmbedder::new(config.memory.embeddings_url.clone()));
    Ok(MemoryStore::open(db, embedder, config.memory.vector_index).await?)
}
