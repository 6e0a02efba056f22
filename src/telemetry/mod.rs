//! Telemetry and logging infrastructure
//!
//! Provides structured logging with tracing and frame/inference timing.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogGuard, LoggingError};
pub use metrics::{FrameProfiler, LatencyTracker, TimingStats};
