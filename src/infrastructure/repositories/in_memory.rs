//! In-Memory Repository Implementations
//!
//! This module provides thread-safe, in-memory implementations of the
//! repository traits defined in `domain::repositories`.
//!
//! # Features
//!
//! - **Thread-safe**: Uses `Arc<RwLock>` for concurrent access
//! - **Testing**: Ideal for unit tests and mock mode
//!
//! # Limitations
//!
//! - Data is lost on application restart
//! - No persistence across multiple instances

use crate::domain::ml::model::{ModelArtifact, PerformanceRecord};
use crate::domain::repositories::{
    ModelArtifactRepository, PerformanceRecordRepository, StoredModel,
};
use crate::domain::training::types::ModelType;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
struct ArtifactStore {
    versions: Vec<StoredModel>,
    active: HashMap<ModelType, usize>,
}

/// In-memory implementation of ModelArtifactRepository
pub struct InMemoryModelArtifactRepository {
    store: Arc<RwLock<ArtifactStore>>,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
}

impl InMemoryModelArtifactRepository {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(ArtifactStore::default())),
            fail_writes: AtomicBool::new(false),
            write_delay_ms: AtomicU64::new(0),
        }
    }

    /// Stalls every `save_active` before it touches the store (slow-disk simulation)
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes subsequent `save_active` calls fail, for exercising rollback paths
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn count(&self) -> usize {
        self.store.read().await.versions.len()
    }
}

impl Default for InMemoryModelArtifactRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelArtifactRepository for InMemoryModelArtifactRepository {
    async fn save_active(&self, model: &StoredModel) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("in-memory artifact store rejected the write");
        }
        let delay_ms = self.write_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        let mut store = self.store.write().await;
        store.versions.push(model.clone());
        let index = store.versions.len() - 1;
        store.active.insert(model.artifact.model_type, index);
        Ok(())
    }

    async fn load_active(&self, model_type: ModelType) -> Result<Option<StoredModel>> {
        let store = self.store.read().await;
        Ok(store
            .active
            .get(&model_type)
            .and_then(|&i| store.versions.get(i))
            .cloned())
    }

    async fn list_versions(&self, model_type: ModelType) -> Result<Vec<ModelArtifact>> {
        let store = self.store.read().await;
        Ok(store
            .versions
            .iter()
            .filter(|m| m.artifact.model_type == model_type)
            .map(|m| m.artifact.clone())
            .collect())
    }
}

/// In-memory implementation of PerformanceRecordRepository
pub struct InMemoryPerformanceRecordRepository {
    records: Arc<RwLock<Vec<PerformanceRecord>>>,
}

impl InMemoryPerformanceRecordRepository {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryPerformanceRecordRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PerformanceRecordRepository for InMemoryPerformanceRecordRepository {
    async fn append(&self, record: &PerformanceRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn history(&self, model_type: ModelType) -> Result<Vec<PerformanceRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.model_type == model_type)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::model::ModelParameters;
    use chrono::Utc;

    fn stored(model_type: ModelType, version: &str) -> StoredModel {
        let parameters = ModelParameters {
            algorithm: "random_forest_classifier".to_string(),
            seed: 1,
            n_trees: 1,
            max_depth: 1,
            min_samples_split: 2,
            window_size: 60,
            label_horizon: 5,
            validation_split: 0.2,
            training_samples: 1,
            validation_samples: 1,
            validation_accuracy: 0.5,
            feature_count: 62,
        };
        let mut artifact = ModelArtifact::new(model_type, Utc::now(), parameters, "run");
        artifact.version = version.to_string();
        StoredModel {
            artifact,
            model_blob: vec![7],
        }
    }

    #[tokio::test]
    async fn test_active_is_tracked_per_type() {
        let repo = InMemoryModelArtifactRepository::new();
        repo.save_active(&stored(ModelType::Analytical, "a1")).await.unwrap();
        repo.save_active(&stored(ModelType::Chatbot, "c1")).await.unwrap();
        repo.save_active(&stored(ModelType::Analytical, "a2")).await.unwrap();

        let active = repo.load_active(ModelType::Analytical).await.unwrap().unwrap();
        assert_eq!(active.artifact.version, "a2");
        let chatbot = repo.load_active(ModelType::Chatbot).await.unwrap().unwrap();
        assert_eq!(chatbot.artifact.version, "c1");
        assert_eq!(repo.list_versions(ModelType::Analytical).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_active() {
        let repo = InMemoryModelArtifactRepository::new();
        repo.save_active(&stored(ModelType::Analytical, "a1")).await.unwrap();

        repo.set_fail_writes(true);
        assert!(repo.save_active(&stored(ModelType::Analytical, "a2")).await.is_err());

        let active = repo.load_active(ModelType::Analytical).await.unwrap().unwrap();
        assert_eq!(active.artifact.version, "a1");
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn test_performance_history_filters_by_type() {
        let repo = InMemoryPerformanceRecordRepository::new();
        let now = Utc::now();
        repo.append(&PerformanceRecord::next(ModelType::Analytical, now, 0.7, None))
            .await
            .unwrap();
        repo.append(&PerformanceRecord::next(ModelType::Chatbot, now, 0.6, None))
            .await
            .unwrap();

        assert_eq!(repo.history(ModelType::Analytical).await.unwrap().len(), 1);
        assert_eq!(
            repo.latest(ModelType::Chatbot).await.unwrap().unwrap().accuracy,
            0.6
        );
    }
}
