use crate::domain::ml::model::{ModelArtifact, ModelParameters, PerformanceRecord};
use crate::domain::repositories::{
    ModelArtifactRepository, PerformanceRecordRepository, StoredModel,
};
use crate::domain::training::types::ModelType;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

fn timestamp_from_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .with_context(|| format!("Invalid stored timestamp {}", millis))
}

/// NULL scores are read back as NaN (never evaluated)
fn score_from_row(row: &SqliteRow, column: &str) -> Result<f64> {
    let score: Option<f64> = row.try_get(column)?;
    Ok(score.unwrap_or(f64::NAN))
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

pub struct SqliteModelArtifactRepository {
    pool: SqlitePool,
}

impl SqliteModelArtifactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn artifact_from_row(row: &SqliteRow) -> Result<ModelArtifact> {
        let model_type: String = row.try_get("model_type")?;
        let parameters_json: String = row.try_get("parameters_json")?;
        let parameters: ModelParameters = serde_json::from_str(&parameters_json)
            .context("Failed to decode stored model parameters")?;

        Ok(ModelArtifact {
            model_type: ModelType::from_str(&model_type)?,
            version: row.try_get("version")?,
            trained_at: timestamp_from_millis(row.try_get("trained_at")?)?,
            accuracy: score_from_row(row, "accuracy")?,
            precision: score_from_row(row, "precision")?,
            recall: score_from_row(row, "recall")?,
            f1_score: score_from_row(row, "f1_score")?,
            training_time_secs: row.try_get("training_time_secs")?,
            parameters,
            training_run_id: row.try_get("training_run_id")?,
        })
    }
}

#[async_trait]
impl ModelArtifactRepository for SqliteModelArtifactRepository {
    async fn save_active(&self, model: &StoredModel) -> Result<()> {
        let artifact = &model.artifact;
        let parameters_json = serde_json::to_string(&artifact.parameters)
            .context("Failed to encode model parameters")?;

        // Deactivate + insert in one transaction: a failure keeps the previous active row
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("UPDATE model_artifacts SET is_active = 0 WHERE model_type = ? AND is_active = 1")
            .bind(artifact.model_type.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to deactivate previous model")?;

        sqlx::query(
            r#"
            INSERT INTO model_artifacts
            (model_type, version, trained_at, accuracy, precision, recall, f1_score,
             training_time_secs, parameters_json, training_run_id, model_blob, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(artifact.model_type.as_str())
        .bind(&artifact.version)
        .bind(artifact.trained_at.timestamp_millis())
        .bind(finite(artifact.accuracy))
        .bind(finite(artifact.precision))
        .bind(finite(artifact.recall))
        .bind(finite(artifact.f1_score))
        .bind(artifact.training_time_secs)
        .bind(parameters_json)
        .bind(&artifact.training_run_id)
        .bind(model.model_blob.as_slice())
        .execute(&mut *tx)
        .await
        .context("Failed to insert model artifact")?;

        tx.commit().await.context("Failed to commit model artifact")?;

        info!(
            "SqliteModelArtifactRepository: Stored {} model {} ({} bytes) as active",
            artifact.model_type,
            artifact.version,
            model.model_blob.len()
        );
        Ok(())
    }

    async fn load_active(&self, model_type: ModelType) -> Result<Option<StoredModel>> {
        let row = sqlx::query(
            "SELECT * FROM model_artifacts WHERE model_type = ? AND is_active = 1 ORDER BY id DESC LIMIT 1",
        )
        .bind(model_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load active model")?;

        match row {
            Some(row) => Ok(Some(StoredModel {
                artifact: Self::artifact_from_row(&row)?,
                model_blob: row.try_get("model_blob")?,
            })),
            None => Ok(None),
        }
    }

    async fn list_versions(&self, model_type: ModelType) -> Result<Vec<ModelArtifact>> {
        let rows = sqlx::query(
            r#"
            SELECT model_type, version, trained_at, accuracy, precision, recall, f1_score,
                   training_time_secs, parameters_json, training_run_id
            FROM model_artifacts WHERE model_type = ? ORDER BY id ASC
            "#,
        )
        .bind(model_type.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list model versions")?;

        rows.iter().map(Self::artifact_from_row).collect()
    }
}

pub struct SqlitePerformanceRecordRepository {
    pool: SqlitePool,
}

impl SqlitePerformanceRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PerformanceRecordRepository for SqlitePerformanceRecordRepository {
    async fn append(&self, record: &PerformanceRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO performance_records
            (model_type, timestamp, accuracy, improvement_delta, precision, recall, f1_score,
             training_time_secs, data_points)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.model_type.as_str())
        .bind(record.timestamp.timestamp_millis())
        .bind(finite(record.accuracy))
        .bind(record.improvement_delta)
        .bind(finite(record.precision))
        .bind(finite(record.recall))
        .bind(finite(record.f1_score))
        .bind(record.training_time_secs)
        .bind(record.data_points as i64)
        .execute(&self.pool)
        .await
        .context("Failed to append performance record")?;

        Ok(())
    }

    async fn history(&self, model_type: ModelType) -> Result<Vec<PerformanceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM performance_records WHERE model_type = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(model_type.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load performance history")?;

        rows.iter()
            .map(|row| {
                Ok(PerformanceRecord {
                    model_type,
                    timestamp: timestamp_from_millis(row.try_get("timestamp")?)?,
                    accuracy: score_from_row(row, "accuracy")?,
                    improvement_delta: row.try_get("improvement_delta")?,
                    precision: score_from_row(row, "precision")?,
                    recall: score_from_row(row, "recall")?,
                    f1_score: score_from_row(row, "f1_score")?,
                    training_time_secs: row.try_get("training_time_secs")?,
                    data_points: row.try_get::<i64, _>("data_points")?.max(0) as usize,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;

    fn stored(version: &str, accuracy: f64) -> StoredModel {
        let parameters = ModelParameters {
            algorithm: "random_forest_classifier".to_string(),
            seed: 42,
            n_trees: 10,
            max_depth: 4,
            min_samples_split: 5,
            window_size: 60,
            label_horizon: 5,
            validation_split: 0.2,
            training_samples: 400,
            validation_samples: 100,
            validation_accuracy: 0.7,
            feature_count: 62,
        };
        StoredModel {
            artifact: ModelArtifact {
                model_type: ModelType::Analytical,
                version: version.to_string(),
                trained_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                accuracy,
                precision: 0.7,
                recall: accuracy,
                f1_score: f64::NAN,
                training_time_secs: 1.25,
                parameters,
                training_run_id: format!("run-{}", version),
            },
            model_blob: vec![1, 2, 3, 4],
        }
    }

    #[tokio::test]
    async fn test_save_active_replaces_previous_active() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = SqliteModelArtifactRepository::new(db.pool.clone());

        assert!(repo.load_active(ModelType::Analytical).await.unwrap().is_none());

        repo.save_active(&stored("v1", 0.8)).await.unwrap();
        repo.save_active(&stored("v2", 0.9)).await.unwrap();

        let active = repo.load_active(ModelType::Analytical).await.unwrap().unwrap();
        assert_eq!(active.artifact.version, "v2");
        assert_eq!(active.model_blob, vec![1, 2, 3, 4]);
        assert_eq!(active.artifact.parameters.n_trees, 10);
        assert_eq!(active.artifact.precision, 0.7);
        assert_eq!(active.artifact.training_time_secs, 1.25);
        assert!(active.artifact.f1_score.is_nan());

        let versions = repo.list_versions(ModelType::Analytical).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(repo.load_active(ModelType::Chatbot).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_performance_history_round_trip() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = SqlitePerformanceRecordRepository::new(db.pool.clone());

        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut first = PerformanceRecord::next(ModelType::Chatbot, t0, 0.6, None);
        first.precision = 0.55;
        first.recall = 0.6;
        first.f1_score = 0.57;
        first.training_time_secs = 3.0;
        first.data_points = 1200;
        let second = PerformanceRecord::next(
            ModelType::Chatbot,
            t0 + chrono::Duration::hours(12),
            0.7,
            Some(&first),
        );
        repo.append(&first).await.unwrap();
        repo.append(&second).await.unwrap();

        let history = repo.history(ModelType::Chatbot).await.unwrap();
        assert_eq!(history[0], first);
        assert_eq!(history[1].data_points, 0);
        // Unscored metrics come back as NaN, so compare field by field
        assert!(history[1].precision.is_nan());
        assert_eq!(history[1].accuracy, second.accuracy);
        assert_eq!(history[1].improvement_delta, second.improvement_delta);
        assert_eq!(
            repo.latest(ModelType::Chatbot).await.unwrap().map(|r| r.timestamp),
            Some(second.timestamp)
        );
        assert!(repo.history(ModelType::Analytical).await.unwrap().is_empty());
    }
}
