//! SQLite persistence for Parley.
//!
//! One database file holds conversations, messages, memory records and the
//! collaborator tables (providers, agents, tools, knowledge files). The
//! [`Database`] handle owns the connection pool; each table family adds its
//! queries in its own module.

mod catalog;
mod conversations;
mod messages;
pub mod schema;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use parley_core::error::StoreError;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info};

pub use sqlx::SqlitePool as Pool;

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub cache_mb: u32,
    pub max_connections: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            cache_mb: 64,
            max_connections: 4,
        }
    }
}

/// Handle to the relational store. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `path` and apply the schema.
    ///
    /// `:memory:` gives a private in-process database; it is pinned to a
    /// single connection so every query sees the same data.
    pub async fn open(path: &str, options: &DatabaseOptions) -> Result<Self, StoreError> {
        let in_memory = is_in_memory(path);
        if !in_memory
            && let Some(parent) = Path::new(path.trim_start_matches("sqlite://")).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Database(format!("create {}: {e}", parent.display())))?;
        }

        let url = if in_memory { "sqlite::memory:" } else { path };
        let connect = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Database(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON")
            .pragma("cache_size", format!("-{}", options.cache_mb.max(1) * 1024));

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(options.max_connections.max(1))
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to open SQLite: {e}")))?;

        let db = Self { pool };
        db.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(db)
    }

    /// Private in-memory database (tests, dry runs).
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:", &DatabaseOptions::default()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for (name, sql) in schema::MIGRATIONS {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{name}: {e}")))?;
        }

        let now = parley_core::now_millis();
        sqlx::query(
            "INSERT OR IGNORE INTO memory_settings (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
        )
        .bind(parley_core::memory::DEFAULT_SETTINGS_ID)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("memory settings seed: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_in_memory(path: &str) -> bool {
    matches!(path.trim(), ":memory:" | "sqlite::memory:" | "sqlite://:memory:")
}

/// Map a sqlx failure to a store error with context.
pub(crate) fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::Database(format!("{context}: {e}"))
}

/// Read one typed column.
pub(crate) fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Database(format!("{name} column: {e}")))
}
