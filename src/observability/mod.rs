//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! gateway / channel / payment produce:
//!     → logging.rs (tracing subscriber, EnvFilter)
//!     → metrics.rs (counters and histograms through the `metrics` facade)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured log level
//! - Metric calls are no-ops until an exporter is installed
//! - Every payment session logs with its own `session` id

pub mod logging;
pub mod metrics;
