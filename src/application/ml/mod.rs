pub mod data_collector;
pub mod deployment_gate;
pub mod evaluator;
pub mod feature_engine;
pub mod indicators;
pub mod rate_limiter;
pub mod trainer;
