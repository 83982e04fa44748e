// Wiring of config, providers and repositories into a running service
pub mod bootstrap;

// Data collection, feature engineering, training, evaluation and deployment
pub mod ml;

// Run lifecycle: orchestration, progress tracking and scheduling
pub mod training;
