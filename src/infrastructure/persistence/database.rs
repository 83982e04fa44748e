use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Database wrapper owning the SQLite pool
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let in_memory = db_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(db_url)
            .context("Invalid DATABASE_URL")?
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency
        }

        // Every connection to an in-memory database would see its own empty schema
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. Model Artifacts Table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_artifacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_type TEXT NOT NULL,
                version TEXT NOT NULL,
                trained_at INTEGER NOT NULL,
                accuracy REAL,
                precision REAL,
                recall REAL,
                f1_score REAL,
                training_time_secs REAL NOT NULL DEFAULT 0,
                parameters_json TEXT NOT NULL,
                training_run_id TEXT NOT NULL,
                model_blob BLOB NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 0,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create model_artifacts table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_model_artifacts_type_active
            ON model_artifacts (model_type, is_active);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create model_artifacts index")?;

        // 2. Performance Records Table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS performance_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_type TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                accuracy REAL,
                improvement_delta REAL NOT NULL DEFAULT 0,
                precision REAL,
                recall REAL,
                f1_score REAL,
                training_time_secs REAL NOT NULL DEFAULT 0,
                data_points INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create performance_records table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_performance_records_type_time
            ON performance_records (model_type, timestamp);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create performance_records index")?;

        // Migration: score columns for databases created before they existed.
        // Errors mean the column is already there.
        for table in ["model_artifacts", "performance_records"] {
            for column in [
                "precision REAL",
                "recall REAL",
                "f1_score REAL",
                "training_time_secs REAL NOT NULL DEFAULT 0",
            ] {
                let _ = sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {}", table, column))
                    .execute(&mut *conn)
                    .await;
            }
        }
        let _ = sqlx::query(
            "ALTER TABLE performance_records ADD COLUMN data_points INTEGER NOT NULL DEFAULT 0",
        )
        .execute(&mut *conn)
        .await;

        info!("Database schema initialized.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.init().await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, vec!["model_artifacts", "performance_records"]);
    }
}
