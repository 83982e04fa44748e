//! Repository Pattern Abstractions
//!
//! Persistence ports for trained models and their accuracy history, keeping the
//! training pipeline independent of the storage backend.
//!
//! # Implementations
//!
//! - `SqliteModelArtifactRepository` / `SqlitePerformanceRecordRepository` (sqlx)
//! - `InMemoryModelArtifactRepository` / `InMemoryPerformanceRecordRepository` for tests
//!   and mock mode, using `Arc<RwLock>` for concurrent access.

use crate::domain::ml::model::{ModelArtifact, PerformanceRecord};
use crate::domain::training::types::ModelType;
use anyhow::Result;
use async_trait::async_trait;

/// Artifact together with the serialized fitted model
#[derive(Debug, Clone, PartialEq)]
pub struct StoredModel {
    pub artifact: ModelArtifact,
    pub model_blob: Vec<u8>,
}

/// Repository for model artifacts
#[async_trait]
pub trait ModelArtifactRepository: Send + Sync {
    /// Persist `model` and mark it as the single active artifact of its type.
    /// Must be atomic: on error the previously active artifact stays active.
    async fn save_active(&self, model: &StoredModel) -> Result<()>;

    /// Currently active artifact for `model_type`
    async fn load_active(&self, model_type: ModelType) -> Result<Option<StoredModel>>;

    /// All stored versions for `model_type`, oldest first
    async fn list_versions(&self, model_type: ModelType) -> Result<Vec<ModelArtifact>>;
}

/// Repository for the append-only accuracy history
#[async_trait]
pub trait PerformanceRecordRepository: Send + Sync {
    async fn append(&self, record: &PerformanceRecord) -> Result<()>;

    /// History for `model_type`, oldest first
    async fn history(&self, model_type: ModelType) -> Result<Vec<PerformanceRecord>>;

    async fn latest(&self, model_type: ModelType) -> Result<Option<PerformanceRecord>> {
        Ok(self.history(model_type).await?.pop())
    }
}
