pub mod cancel;
pub mod orchestrator;
pub mod scheduler;
pub mod tracker;
