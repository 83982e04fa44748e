use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::PersistenceEnvConfig;
use crate::domain::repositories::{ModelArtifactRepository, PerformanceRecordRepository};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteModelArtifactRepository, SqlitePerformanceRecordRepository,
};
use crate::infrastructure::repositories::{
    InMemoryModelArtifactRepository, InMemoryPerformanceRecordRepository,
};

pub struct PersistenceHandle {
    /// `None` for in-memory stores
    pub db: Option<Database>,
    pub artifact_repository: Arc<dyn ModelArtifactRepository>,
    pub performance_repository: Arc<dyn PerformanceRecordRepository>,
}

pub struct PersistenceBootstrap;

impl PersistenceBootstrap {
    pub async fn init(config: &PersistenceEnvConfig) -> Result<PersistenceHandle> {
        info!("Initializing Database at {}", config.database_url);

        let db = Database::new(&config.database_url)
            .await
            .context("Failed to initialize database")?;

        let artifact_repository = Arc::new(SqliteModelArtifactRepository::new(db.pool.clone()));
        let performance_repository =
            Arc::new(SqlitePerformanceRecordRepository::new(db.pool.clone()));

        Ok(PersistenceHandle {
            db: Some(db),
            artifact_repository,
            performance_repository,
        })
    }

    /// Process-local stores, for one-off runs and tests
    pub fn in_memory() -> PersistenceHandle {
        PersistenceHandle {
            db: None,
            artifact_repository: Arc::new(InMemoryModelArtifactRepository::new()),
            performance_repository: Arc::new(InMemoryPerformanceRecordRepository::new()),
        }
    }
}
