//! Cross-cutting services module
//!
//! Proxy health, request pacing, metrics and lifecycle events shared by the
//! scheduler and every backend.

pub mod events;
pub mod metrics;
pub mod proxy;
pub mod timing;

// Re-export commonly used types
pub use events::{
    AttemptFinishedEvent, AttemptStartedEvent, BlockedEvent, EventDispatcher, EventHandler,
    LoggingHandler, MetricsHandler, RetryEvent, SourceFailedEvent, TraceEvent,
};
pub use metrics::{GlobalStats, MetricsCollector, MetricsSnapshot, SourceStats};
pub use proxy::{
    NoHealthyProxyError, ProxyConfig, ProxyEndpoint, ProxyHealthReport, ProxyHealthTracker,
    ProxyOutcome, ProxyStats, ProxyTracker,
};
pub use timing::{DelayStrategy, Pacing, TimingFeedback};
