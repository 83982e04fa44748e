//! Push-based observability for AutoTrainer
//!
//! This module provides observability through **outbound data only** - no HTTP server,
//! no incoming requests. Prometheus metrics are kept in-process and a periodic
//! `METRICS_JSON:` line carries model and run status to stdout.
//!
//! **Security**: This system only SENDS data, it never accepts requests.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
