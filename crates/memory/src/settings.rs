//! The singleton `memory_settings` row and embedding-dimension migration.

use std::time::Instant;

use parley_core::error::MemoryError;
use parley_core::memory::{DEFAULT_SETTINGS_ID, MemorySettings, MemorySettingsUpdate};
use parley_store::schema::{DROP_MEMORIES, MEMORIES_INDEX, MEMORIES_TABLE};
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info, warn};

use crate::store::{MemoryStore, field, storage};

const SELECT_SETTINGS: &str = "SELECT id, api_key, embedding_model, embedding_dimensions, enabled, created_at, updated_at FROM memory_settings WHERE id = ?1";

fn settings_from_row(row: &SqliteRow) -> Result<MemorySettings, MemoryError> {
    let dims: i64 = field(row, "embedding_dimensions")?;
    Ok(MemorySettings {
        id: field(row, "id")?,
        api_key: field(row, "api_key")?,
        embedding_model: field(row, "embedding_model")?,
        embedding_dimensions: usize::try_from(dims).unwrap_or(0),
        enabled: field::<i64>(row, "enabled")? != 0,
        created_at: field(row, "created_at")?,
        updated_at: field(row, "updated_at")?,
    })
}

async fn count_in(tx: &mut Transaction<'_, Sqlite>) -> Result<i64, MemoryError> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM memories")
        .fetch_one(&mut **tx)
        .await
        .map_err(storage("count memories"))?;
    field(&row, "count")
}

/// Drop and recreate the memories table. Refuses when records exist.
async fn rebuild_table(tx: &mut Transaction<'_, Sqlite>) -> Result<(), MemoryError> {
    let count = count_in(tx).await?;
    if count > 0 {
        return Err(MemoryError::DimensionLocked { count });
    }
    for sql in [DROP_MEMORIES, MEMORIES_TABLE, MEMORIES_INDEX] {
        sqlx::query(sql)
            .execute(&mut **tx)
            .await
            .map_err(storage("rebuild memories table"))?;
    }
    Ok(())
}

impl MemoryStore {
    pub async fn get_settings(&self) -> Result<MemorySettings, MemoryError> {
        let start = Instant::now();
        let row = sqlx::query(SELECT_SETTINGS)
            .bind(DEFAULT_SETTINGS_ID)
            .fetch_optional(self.database().pool())
            .await
            .map_err(storage("load memory settings"))?;
        let settings = match row {
            Some(row) => settings_from_row(&row)?,
            None => {
                warn!("Memory settings row missing, using defaults");
                MemorySettings::default()
            }
        };
        debug!(
            ms = start.elapsed().as_millis() as u64,
            "Memory settings loaded"
        );
        Ok(settings)
    }

    /// Validate and apply a settings update in one transaction. A dimension
    /// change rebuilds the empty memories table; it fails if any record exists.
    pub async fn update_settings(
        &self,
        update: MemorySettingsUpdate,
    ) -> Result<MemorySettings, MemoryError> {
        let mut tx = self
            .database()
            .pool()
            .begin()
            .await
            .map_err(storage("begin settings update"))?;

        let row = sqlx::query(SELECT_SETTINGS)
            .bind(DEFAULT_SETTINGS_ID)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage("load memory settings"))?;
        let existing = match row {
            Some(row) => settings_from_row(&row)?,
            None => return Err(MemoryError::NotFound("memory settings".into())),
        };

        let api_key = update
            .api_key
            .map(|s| s.trim().to_string())
            .unwrap_or(existing.api_key.clone());
        let embedding_model = update
            .embedding_model
            .map(|s| s.trim().to_string())
            .unwrap_or(existing.embedding_model.clone());
        let enabled = update.enabled.unwrap_or(existing.enabled);
        let dimensions = match update.embedding_dimensions {
            None => existing.embedding_dimensions,
            Some(d) if d > 0 => usize::try_from(d).map_err(|_| {
                MemoryError::InvalidSettings(
                    "Embedding dimensions must be a positive number".into(),
                )
            })?,
            Some(_) => {
                return Err(MemoryError::InvalidSettings(
                    "Embedding dimensions must be a positive number".into(),
                ));
            }
        };

        if enabled && api_key.is_empty() {
            return Err(MemoryError::InvalidSettings(
                "OpenRouter API key is required to enable memory".into(),
            ));
        }
        if embedding_model.is_empty() {
            return Err(MemoryError::InvalidSettings(
                "Embedding model is required".into(),
            ));
        }
        if dimensions == 0 {
            return Err(MemoryError::InvalidSettings(
                "Embedding dimensions must be a positive number".into(),
            ));
        }

        let dimension_changed = dimensions != existing.embedding_dimensions;
        if dimension_changed {
            self.ensure_index()?;
            rebuild_table(&mut tx).await?;
        }

        sqlx::query(
            "UPDATE memory_settings
             SET api_key = ?2, embedding_model = ?3, embedding_dimensions = ?4, enabled = ?5, updated_at = ?6
             WHERE id = ?1",
        )
        .bind(DEFAULT_SETTINGS_ID)
        .bind(&api_key)
        .bind(&embedding_model)
        .bind(dimensions as i64)
        .bind(enabled as i64)
        .bind(parley_core::now_millis())
        .execute(&mut *tx)
        .await
        .map_err(storage("update memory settings"))?;

        tx.commit().await.map_err(storage("commit settings update"))?;

        if dimension_changed {
            self.reset_index(dimensions).await;
            info!(
                from = existing.embedding_dimensions,
                to = dimensions,
                "Memory embedding dimension changed"
            );
        }
        self.get_settings().await
    }

    /// Move the store to a new embedding width. Only allowed while empty.
    pub async fn change_dimension(&self, dimensions: usize) -> Result<(), MemoryError> {
        self.ensure_index()?;
        if dimensions == 0 {
            return Err(MemoryError::InvalidSettings(
                "Embedding dimensions must be a positive number".into(),
            ));
        }
        let mut tx = self
            .database()
            .pool()
            .begin()
            .await
            .map_err(storage("begin dimension change"))?;
        rebuild_table(&mut tx).await?;
        sqlx::query(
            "UPDATE memory_settings SET embedding_dimensions = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(DEFAULT_SETTINGS_ID)
        .bind(dimensions as i64)
        .bind(parley_core::now_millis())
        .execute(&mut *tx)
        .await
        .map_err(storage("update memory settings"))?;
        tx.commit().await.map_err(storage("commit dimension change"))?;

        self.reset_index(dimensions).await;
        Ok(())
    }
}
