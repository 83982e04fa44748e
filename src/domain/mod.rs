// Market data domain
pub mod market;

// Feature schema, labels and model artifacts
pub mod ml;

// Training run lifecycle
pub mod training;

// Data integrity checks
pub mod validation;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Domain-specific error types
pub mod errors;
