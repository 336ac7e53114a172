//! Event system for the fetch pipeline.
//!
//! Provides hooks for metrics, logging, and custom reactions around attempt
//! activity.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::metrics::MetricsCollector;
use crate::fetch::BackendKind;
use crate::scheduler::{AttemptStatus, SourceStatus};
use crate::sources::Source;

#[derive(Debug, Clone)]
pub struct AttemptStartedEvent {
    pub source: Source,
    pub attempt: u32,
    pub proxy: String,
    pub backend: BackendKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttemptFinishedEvent {
    pub source: Source,
    pub attempt: u32,
    pub proxy: String,
    pub status: AttemptStatus,
    pub http_status: Option<u16>,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BlockedEvent {
    pub source: Source,
    pub proxy: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub source: Source,
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SourceFailedEvent {
    pub source: Source,
    pub status: SourceStatus,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum TraceEvent {
    AttemptStarted(AttemptStartedEvent),
    AttemptFinished(AttemptFinishedEvent),
    Blocked(BlockedEvent),
    Retry(RetryEvent),
    SourceFailed(SourceFailedEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &TraceEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: TraceEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &TraceEvent) {
        match event {
            TraceEvent::AttemptStarted(started) => {
                log::debug!(
                    "-> {} attempt {} via {} ({})",
                    started.source,
                    started.attempt,
                    started.proxy,
                    started.backend
                );
            }
            TraceEvent::AttemptFinished(finished) => {
                log::debug!(
                    "<- {} attempt {} -> {:?} status={} ({:.2}s)",
                    finished.source,
                    finished.attempt,
                    finished.status,
                    finished
                        .http_status
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "-".into()),
                    finished.latency.as_secs_f64()
                );
            }
            TraceEvent::Blocked(blocked) => {
                log::warn!(
                    "{} blocked via {} ({})",
                    blocked.source,
                    blocked.proxy,
                    blocked.signature
                );
            }
            TraceEvent::Retry(retry) => {
                log::info!(
                    "retry {} attempt {} after {:.2}s: {}",
                    retry.source,
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
            TraceEvent::SourceFailed(failed) => {
                log::warn!("{} gave up ({:?}): {}", failed.source, failed.status, failed.error);
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &TraceEvent) {
        if let TraceEvent::AttemptFinished(finished) = event {
            self.metrics.record_attempt(
                finished.source.name(),
                finished.status,
                finished.http_status,
                finished.latency,
            );
        }
    }
}
