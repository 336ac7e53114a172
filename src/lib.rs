//! # skiptracer-rs
//!
//! Resolve a US property address into public contact records (names, phone
//! numbers, city/state) by querying several people-search sites, while
//! surviving proxy failures, rate limits and anti-bot interstitials.
//!
//! ## Features
//!
//! - Address normalisation into per-source search URLs
//! - Direct HTTP, headless browser (feature `browser`) and hosted scraping API backends
//! - Per-proxy health tracking with exponential cooldown
//! - Block detection with optional CAPTCHA solving
//! - Deterministic merge of per-source results
//! - CSV batch mode with incremental, flushed output
//!
//! ## Example
//!
//! ```no_run
//! use skiptracer_rs::SkipTracer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracer = SkipTracer::builder().build()?;
//!     let report = tracer.trace("709 W High St, Portland, IN").await?;
//!     println!("{}", report.to_json()?);
//!     tracer.shutdown().await;
//!     Ok(())
//! }
//! ```

mod skiptracer;

pub mod aggregate;
pub mod batch;
pub mod challenges;
pub mod config;
pub mod diagnostics;
pub mod external_deps;
pub mod fetch;
pub mod modules;
pub mod query;
pub mod scheduler;
pub mod sources;

pub use crate::skiptracer::{
    SkipTracer,
    SkipTracerBuilder,
    SkipTracerConfig,
    SkipTracerError,
    SkipTracerResult,
    TraceReport,
};

pub use crate::aggregate::{BatchRow, ResultAggregator, RowStatus};

pub use crate::batch::{BatchError, BatchOptions, BatchSummary, InputRow};

pub use crate::challenges::detectors::{BlockDetection, BlockDetector, BlockKind, CaptchaKind};

pub use crate::challenges::handler::{BlockHandler, BlockVerdict};

pub use crate::challenges::user_agents::{
    UserAgentError,
    UserAgentOptions,
    UserAgentProfile,
    get_user_agent_profile,
};

pub use crate::config::{BackendChoice, ConfigError, Credentials, Settings};

pub use crate::diagnostics::DebugCapture;

pub use crate::external_deps::captcha::{
    CaptchaConfig,
    CaptchaError,
    CaptchaProvider,
    CaptchaResult,
    CaptchaSolution,
    CaptchaTask,
    TwoCaptchaProvider,
};

pub use crate::external_deps::remote_api::{
    RemoteApiClient,
    RemoteApiConfig,
    RemoteApiError,
    RemoteAuth,
};

pub use crate::fetch::{
    BackendKind,
    FetchBackend,
    FetchError,
    FetchErrorKind,
    FetchRequest,
    PlannedFetch,
    RawResponse,
    SessionStore,
};

pub use crate::modules::{
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    ProxyConfig,
    ProxyEndpoint,
    ProxyHealthReport,
    ProxyHealthTracker,
    ProxyOutcome,
    ProxyStats,
    ProxyTracker,
    TraceEvent,
};

pub use crate::query::{InvalidAddressError, SearchQuery};

pub use crate::scheduler::{AttemptStatus, FetchAttempt, Scheduler, SchedulerConfig, SourceOutcome, SourceStatus};

pub use crate::sources::{ContactRecord, ParseError, Source};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
