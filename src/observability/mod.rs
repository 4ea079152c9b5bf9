//! Observability for the bridge
//!
//! Structured logging, a process-wide metrics collector and the health check
//! endpoints served next to the WebSocket route.

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::HealthServer;
pub use logging::{LogFormat, LogSettings, init_default_logging, init_logging};
pub use metrics::{MetricsCollector, MetricsSnapshot, metrics};

// Span macros for structured logging
pub use logging::{mqtt_span, session_span};
