//! SQLite-based persistence store

use crate::core::{Pipeline, PipelineDefinition};
use crate::persistence::PersistenceBackend;
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// SQLite pipeline store; definitions are kept as JSON text
pub struct SqlitePipelineStore {
    pool: SqlitePool,
}

impl SqlitePipelineStore {
    /// Open (creating if needed) a database at `db_path`
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            // An in-memory database lives and dies with its connection
            .max_connections(if db_path == ":memory:" { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("tool-pipeline");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        let db_path = db_dir.join("pipelines.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                definition TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_pipelines_name ON pipelines(name);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize schema")?;

        Ok(())
    }

    fn decode(id: String, definition: &str) -> Result<Pipeline> {
        let definition: PipelineDefinition = serde_json::from_str(definition)
            .with_context(|| format!("Corrupt definition stored for pipeline {}", id))?;
        Ok(Pipeline::from_definition(id, definition))
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqlitePipelineStore {
    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let definition = serde_json::to_string(&pipeline.to_definition())
            .context("Failed to serialize pipeline")?;

        sqlx::query(
            r#"
            INSERT INTO pipelines (id, name, description, definition)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                definition = excluded.definition,
                updated_at = datetime('now')
            "#,
        )
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(&pipeline.description)
        .bind(definition)
        .execute(&self.pool)
        .await
        .context("Failed to save pipeline")?;

        Ok(())
    }

    async fn load_pipeline(&self, id: &str) -> Result<Option<Pipeline>> {
        let row = sqlx::query("SELECT id, definition FROM pipelines WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load pipeline")?;

        row.map(|row| Self::decode(row.get("id"), row.get::<String, _>("definition").as_str()))
            .transpose()
    }

    async fn delete_pipeline(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete pipeline")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query("SELECT id, definition FROM pipelines ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pipelines")?;

        rows.iter()
            .map(|row| Self::decode(row.get("id"), row.get::<String, _>("definition").as_str()))
            .collect()
    }
}
