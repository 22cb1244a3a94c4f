//! The memory store: embedding-backed records in SQLite plus the in-process
//! quantized index used for nearest-neighbour search.

use std::sync::Arc;
use std::time::Instant;

use parley_core::error::MemoryError;
use parley_core::memory::{
    Embedder, EmbeddingRequest, MemoryCandidate, MemoryRecord, MemorySettings,
};
use parley_store::Database;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::vector::{QuantizedIndex, decode_embedding, encode_embedding};

pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Map a sqlx failure to a storage error with context.
pub(crate) fn storage(context: &'static str) -> impl FnOnce(sqlx::Error) -> MemoryError {
    move |e| MemoryError::Storage(format!("{context}: {e}"))
}

pub(crate) fn field<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, MemoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| MemoryError::Storage(format!("{name} column: {e}")))
}

fn record_from_row(row: &SqliteRow) -> Result<MemoryRecord, MemoryError> {
    Ok(MemoryRecord {
        id: field(row, "id")?,
        title: field(row, "title")?,
        content: field(row, "content")?,
        source: field(row, "source")?,
        created_at: field(row, "created_at")?,
        updated_at: field(row, "updated_at")?,
        distance: None,
    })
}

/// Fields a manual edit may change. `None` keeps the stored value.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct MemoryPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

pub struct MemoryStore {
    db: Database,
    embedder: Arc<dyn Embedder>,
    index: RwLock<QuantizedIndex>,
    vector_index: bool,
}

impl MemoryStore {
    /// `vector_index` says whether search indexing is available in this
    /// process; when false every vector operation fails with `Unavailable`.
    pub fn new(db: Database, embedder: Arc<dyn Embedder>, vector_index: bool) -> Self {
        Self {
            db,
            embedder,
            index: RwLock::new(QuantizedIndex::default()),
            vector_index,
        }
    }

    /// Open the store and build the index from what is already on disk.
    pub async fn open(
        db: Database,
        embedder: Arc<dyn Embedder>,
        vector_index: bool,
    ) -> Result<Self, MemoryError> {
        let store = Self::new(db, embedder, vector_index);
        if vector_index {
            store.quantize().await?;
        }
        Ok(store)
    }

    pub fn vector_index_enabled(&self) -> bool {
        self.vector_index
    }

    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    pub(crate) fn ensure_index(&self) -> Result<(), MemoryError> {
        if self.vector_index {
            Ok(())
        } else {
            Err(MemoryError::Unavailable(
                "Vector search index is not available".into(),
            ))
        }
    }

    /// Embed a batch in one call, checking count and width.
    async fn embed(
        &self,
        texts: Vec<String>,
        settings: &MemorySettings,
        label: &'static str,
    ) -> Result<Vec<Vec<f32>>, MemoryError> {
        if !settings.has_api_key() {
            return Err(MemoryError::InvalidSettings(
                "OpenRouter API key is required for embeddings".into(),
            ));
        }
        let start = Instant::now();
        let expected = texts.len();
        let response = self
            .embedder
            .embed(
                &settings.api_key,
                EmbeddingRequest {
                    model: settings.embedding_model.clone(),
                    inputs: texts,
                },
            )
            .await
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;

        if response.embeddings.len() != expected {
            return Err(MemoryError::CountMismatch {
                expected,
                actual: response.embeddings.len(),
            });
        }
        if let Some(bad) = response
            .embeddings
            .iter()
            .find(|v| v.len() != settings.embedding_dimensions)
        {
            return Err(MemoryError::DimensionMismatch {
                expected: settings.embedding_dimensions,
                actual: bad.len(),
            });
        }
        info!(
            count = expected,
            ms = start.elapsed().as_millis() as u64,
            "{label} embeddings"
        );
        Ok(response.embeddings)
    }

    /// Rebuild the search index from the table. Returns the indexed count.
    pub async fn quantize(&self) -> Result<usize, MemoryError> {
        self.ensure_index()?;
        let settings = self.get_settings().await?;
        let rows = sqlx::query("SELECT id, embedding FROM memories")
            .fetch_all(self.db.pool())
            .await
            .map_err(storage("load embeddings"))?;

        let mut vectors = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = field(row, "id")?;
            let blob: Vec<u8> = field(row, "embedding")?;
            vectors.push((id, decode_embedding(&blob)));
        }

        let index = QuantizedIndex::build(settings.embedding_dimensions, vectors);
        let count = index.len();
        *self.index.write().await = index;
        debug!(count, "Memory index rebuilt");
        Ok(count)
    }

    pub(crate) async fn reset_index(&self, dimensions: usize) {
        *self.index.write().await = QuantizedIndex::new(dimensions);
    }

    /// The `limit` records nearest to `text`, closest first.
    pub async fn search(
        &self,
        text: &str,
        settings: &MemorySettings,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.ensure_index()?;
        if !settings.enabled {
            return Err(MemoryError::Unavailable("Memory is disabled".into()));
        }
        if text.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut vectors = self.embed(vec![text.to_string()], settings, "search").await?;
        let Some(query) = vectors.pop() else {
            return Ok(Vec::new());
        };

        let start = Instant::now();
        let hits = self.index.read().await.nearest(&query, limit);
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            // The index may briefly lag a delete.
            if let Some(mut record) = self.get(&hit.id).await? {
                record.distance = Some(hit.distance);
                results.push(record);
            }
        }
        info!(
            ms = start.elapsed().as_millis() as u64,
            count = results.len(),
            "Memory vector search"
        );
        Ok(results)
    }

    /// Embed and store candidates in one batch. Candidates whose trimmed title
    /// or content is empty are dropped. Returns the stored records in input order.
    pub async fn insert(
        &self,
        candidates: Vec<MemoryCandidate>,
        settings: &MemorySettings,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.ensure_index()?;
        let cleaned: Vec<MemoryCandidate> = candidates
            .into_iter()
            .map(|c| MemoryCandidate {
                title: c.title.trim().to_string(),
                content: c.content.trim().to_string(),
                source: c.source.map(|s| s.trim().to_string()),
            })
            .filter(|c| !c.title.is_empty() && !c.content.is_empty())
            .collect();
        if cleaned.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self
            .embed(
                cleaned.iter().map(|c| c.content.clone()).collect(),
                settings,
                "insert",
            )
            .await?;

        let now = parley_core::now_millis();
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(storage("begin insert"))?;
        let mut stored = Vec::with_capacity(cleaned.len());
        for (candidate, vector) in cleaned.into_iter().zip(vectors) {
            let record = MemoryRecord {
                id: Uuid::new_v4().to_string(),
                title: candidate.title,
                content: candidate.content,
                source: candidate.source.unwrap_or_default(),
                created_at: now,
                updated_at: now,
                distance: None,
            };
            sqlx::query(
                "INSERT INTO memories (id, title, content, source, embedding, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            )
            .bind(&record.id)
            .bind(&record.title)
            .bind(&record.content)
            .bind(&record.source)
            .bind(encode_embedding(&vector))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage("insert memory"))?;
            stored.push(record);
        }
        tx.commit().await.map_err(storage("commit insert"))?;

        self.quantize().await?;
        Ok(stored)
    }

    /// Re-embed `content` and overwrite the stored vector in place.
    pub async fn update_embedding(
        &self,
        id: &str,
        content: &str,
        settings: &MemorySettings,
    ) -> Result<(), MemoryError> {
        self.ensure_index()?;
        let mut vectors = self
            .embed(vec![content.to_string()], settings, "update")
            .await?;
        let Some(vector) = vectors.pop() else {
            return Ok(());
        };
        let result =
            sqlx::query("UPDATE memories SET embedding = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(id)
                .bind(encode_embedding(&vector))
                .bind(parley_core::now_millis())
                .execute(self.db.pool())
                .await
                .map_err(storage("update embedding"))?;
        if result.rows_affected() == 0 {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        self.quantize().await?;
        Ok(())
    }

    /// Manual edit. Trimmed fields replace stored ones; a content change is
    /// re-embedded with the stored settings.
    pub async fn update(&self, id: &str, patch: MemoryPatch) -> Result<MemoryRecord, MemoryError> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;

        let title = patch
            .title
            .map(|s| s.trim().to_string())
            .unwrap_or(existing.title.clone());
        let content = patch
            .content
            .map(|s| s.trim().to_string())
            .unwrap_or(existing.content.clone());
        let source = patch
            .source
            .map(|s| s.trim().to_string())
            .unwrap_or(existing.source.clone());

        let content_changed = content != existing.content;
        let settings = self.get_settings().await?;
        if content_changed && !settings.has_api_key() {
            return Err(MemoryError::InvalidSettings(
                "OpenRouter API key is required to update memory content".into(),
            ));
        }

        sqlx::query(
            "UPDATE memories SET title = ?2, content = ?3, source = ?4, updated_at = ?5 WHERE id = ?1",
        )
        .bind(id)
        .bind(&title)
        .bind(&content)
        .bind(&source)
        .bind(parley_core::now_millis())
        .execute(self.db.pool())
        .await
        .map_err(storage("update memory"))?;

        if content_changed {
            self.update_embedding(id, &content, &settings).await?;
        }

        self.get(id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        let row = sqlx::query(
            "SELECT id, title, content, source, created_at, updated_at FROM memories WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(storage("get memory"))?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// All records, most recently updated first.
    pub async fn list(&self) -> Result<Vec<MemoryRecord>, MemoryError> {
        let rows = sqlx::query(
            "SELECT id, title, content, source, created_at, updated_at FROM memories
             ORDER BY updated_at DESC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(storage("list memories"))?;
        rows.iter().map(record_from_row).collect()
    }

    /// Delete a record. Deleting a missing id is not an error.
    pub async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ?1")
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(storage("delete memory"))?;
        let deleted = result.rows_affected() > 0;
        if deleted && self.vector_index {
            self.quantize().await?;
        }
        Ok(deleted)
    }

    pub async fn count(&self) -> Result<i64, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM memories")
            .fetch_one(self.db.pool())
            .await
            .map_err(storage("count memories"))?;
        field(&row, "count")
    }

    /// Number of vectors currently searchable.
    pub async fn indexed(&self) -> usize {
        self.index.read().await.len()
    }
}
