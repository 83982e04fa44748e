// Market data domain
pub mod observation;
