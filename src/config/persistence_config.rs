//! Persistence configuration parsing from environment variables.

use std::env;

#[derive(Debug, Clone)]
pub struct PersistenceEnvConfig {
    pub database_url: String,
}

impl Default for PersistenceEnvConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/autotrainer.db".to_string(),
        }
    }
}

impl PersistenceEnvConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| Self::default().database_url),
        }
    }
}
