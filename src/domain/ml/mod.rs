pub mod feature_registry;
pub mod label;
pub mod model;
