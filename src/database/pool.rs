//! Database Connection Pool using sqlx (SQLite)

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::database::StoreError;
use crate::database::mappings::SqliteMappingStore;

pub struct DatabasePool {
    pool: SqlitePool,
    mappings: SqliteMappingStore,
}

impl DatabasePool {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, StoreError> {
        let in_memory = is_memory_url(connection_string);

        let mut options = SqliteConnectOptions::from_str(connection_string)
            .map_err(|e| StoreError::Unavailable(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true);

        let pool = if in_memory {
            // Every connection to :memory: is a separate database, so pin a single one
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            ensure_parent_dir(connection_string).await?;
            options = options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(options)
                .await
        }
        .map_err(|e| StoreError::Unavailable(format!("Failed to connect to SQLite: {}", e)))?;

        info!(in_memory = in_memory, "Connected to SQLite");

        let mappings = SqliteMappingStore::new(pool.clone());
        Ok(Self { pool, mappings })
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        info!("Initializing database schema...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS worker_mappings (
                worker_name     TEXT PRIMARY KEY NOT NULL,
                identity        TEXT NOT NULL,
                bound_at_micros INTEGER NOT NULL,
                signed_at       INTEGER NOT NULL,
                signature       TEXT NOT NULL,
                validator_scope TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_worker_mappings_identity ON worker_mappings(identity)",
        )
        .execute(&self.pool)
        .await?;

        info!("Database schema initialized");
        Ok(())
    }

    pub fn mappings(&self) -> &SqliteMappingStore {
        &self.mappings
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Create the directory holding a file-backed database
async fn ensure_parent_dir(url: &str) -> Result<(), StoreError> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }
    Ok(())
}
