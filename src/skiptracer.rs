//! High level skip-trace orchestration.
//!
//! Wires together the proxy tracker, the selected fetch backend, the block
//! handler, the scheduler and the aggregator to expose one call per address
//! (or per batch file) that always yields an observable outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;

use crate::aggregate::{BatchRow, ResultAggregator, RowStatus};
use crate::batch::{self, BatchError, BatchOptions, BatchSummary};
use crate::challenges::detectors::BlockDetector;
use crate::challenges::handler::BlockHandler;
use crate::challenges::user_agents::UserAgentOptions;
use crate::config::{ConfigError, Credentials, Settings};
use crate::diagnostics::DebugCapture;
use crate::external_deps::captcha::{CaptchaError, CaptchaProvider, TwoCaptchaProvider};
use crate::external_deps::remote_api::{RemoteApiClient, RemoteApiConfig, RemoteApiError, RemoteAuth};
use crate::fetch::{
	BackendKind, BrowserBackend, DirectBackend, FetchBackend, FetchError, RemoteTaskBackend,
	SessionStore, SessionStoreError,
};
use crate::modules::events::{EventDispatcher, EventHandler, LoggingHandler, MetricsHandler};
use crate::modules::metrics::MetricsCollector;
use crate::modules::proxy::{ProxyHealthReport, ProxyHealthTracker, ProxyTracker};
use crate::query::{InvalidAddressError, SearchQuery};
use crate::scheduler::{Scheduler, SchedulerConfig, SourceOutcome};
use crate::sources::{ContactRecord, Source};

/// Result alias used across the orchestration layer.
pub type SkipTracerResult<T> = Result<T, SkipTracerError>;

/// High-level error surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum SkipTracerError {
	#[error("invalid address: {0}")]
	InvalidAddress(#[from] InvalidAddressError),
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("fetch backend initialisation failed: {0}")]
	Backend(#[from] FetchError),
	#[error("remote api error: {0}")]
	RemoteApi(#[from] RemoteApiError),
	#[error("captcha provider error: {0}")]
	Captcha(#[from] CaptchaError),
	#[error("session store error: {0}")]
	SessionStore(#[from] SessionStoreError),
	#[error("batch error: {0}")]
	Batch(#[from] BatchError),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("serialization error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Outcome of tracing one address.
#[derive(Debug, Clone)]
pub struct TraceReport {
	pub query: SearchQuery,
	/// Merged records, primary source first.
	pub records: Vec<ContactRecord>,
	pub outcomes: Vec<SourceOutcome>,
	pub status: RowStatus,
	/// Where the raw page was saved, when the query failed.
	pub debug_capture: Option<PathBuf>,
}

impl TraceReport {
	/// At least one source completed cleanly.
	pub fn any_clean(&self) -> bool {
		matches!(self.status, RowStatus::Ok | RowStatus::NoMatch)
	}

	pub fn batch_row(&self, input_address: &str) -> BatchRow {
		match self.records.first() {
			Some(record) => BatchRow::from_record(input_address, record),
			None => BatchRow::empty(input_address, self.status),
		}
	}

	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string_pretty(&self.records)
	}
}

/// Configuration consumed by [`SkipTracerBuilder::build`].
pub struct SkipTracerConfig {
	pub settings: Settings,
	pub credentials: Credentials,
	pub user_agent: UserAgentOptions,
	pub backend: Option<Arc<dyn FetchBackend>>,
	pub proxy_tracker: Option<Arc<dyn ProxyTracker>>,
	pub captcha_provider: Option<Arc<dyn CaptchaProvider>>,
	pub event_handlers: Vec<Arc<dyn EventHandler>>,
}

impl Default for SkipTracerConfig {
	fn default() -> Self {
		Self {
			settings: Settings::default(),
			credentials: Credentials::default(),
			user_agent: UserAgentOptions::default(),
			backend: None,
			proxy_tracker: None,
			captcha_provider: None,
			event_handlers: Vec::new(),
		}
	}
}

/// Fluent builder for [`SkipTracer`].
pub struct SkipTracerBuilder {
	config: SkipTracerConfig,
}

impl SkipTracerBuilder {
	pub fn new() -> Self {
		Self {
			config: SkipTracerConfig::default(),
		}
	}

	pub fn with_settings(mut self, settings: Settings) -> Self {
		self.config.settings = settings;
		self
	}

	pub fn with_credentials(mut self, credentials: Credentials) -> Self {
		self.config.credentials = credentials;
		self
	}

	pub fn with_user_agent_options(mut self, options: UserAgentOptions) -> Self {
		self.config.user_agent = options;
		self
	}

	/// Use `backend` instead of building one from the settings.
	pub fn with_backend(mut self, backend: Arc<dyn FetchBackend>) -> Self {
		self.config.backend = Some(backend);
		self
	}

	/// Use `tracker` instead of a [`ProxyHealthTracker`] over the configured
	/// proxy list.
	pub fn with_proxy_tracker(mut self, tracker: Arc<dyn ProxyTracker>) -> Self {
		self.config.proxy_tracker = Some(tracker);
		self
	}

	pub fn with_captcha_provider(mut self, provider: Arc<dyn CaptchaProvider>) -> Self {
		self.config.captcha_provider = Some(provider);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.config.event_handlers.push(handler);
		self
	}

	pub fn build(self) -> SkipTracerResult<SkipTracer> {
		SkipTracer::with_config(self.config)
	}
}

impl Default for SkipTracerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Main skip-trace orchestrator.
pub struct SkipTracer {
	settings: Settings,
	scheduler: Scheduler,
	proxies: Arc<dyn ProxyTracker>,
	session: Option<Arc<SessionStore>>,
	aggregator: ResultAggregator,
	debug: DebugCapture,
	metrics: MetricsCollector,
}

impl SkipTracer {
	/// Obtain a builder to customise the tracer instance.
	pub fn builder() -> SkipTracerBuilder {
		SkipTracerBuilder::new()
	}

	fn with_config(config: SkipTracerConfig) -> SkipTracerResult<Self> {
		let SkipTracerConfig {
			settings,
			credentials,
			user_agent,
			backend,
			proxy_tracker,
			captcha_provider,
			event_handlers,
		} = config;
		settings.validate()?;

		let session = match &settings.cookie_store {
			Some(path) => Some(Arc::new(SessionStore::open(path)?)),
			None => None,
		};

		let proxies: Arc<dyn ProxyTracker> = match proxy_tracker {
			Some(tracker) => tracker,
			None => Arc::new(build_proxy_tracker(&settings, &credentials, session.as_deref())),
		};

		let backend = match backend {
			Some(backend) => backend,
			None => build_backend(&settings, &credentials, session.as_ref())?,
		};
		log::info!("using {} backend", backend.kind());

		let captcha = match captcha_provider {
			Some(provider) => Some(provider),
			None => match &credentials.captcha_key {
				Some(key) => Some(Arc::new(TwoCaptchaProvider::new(key.clone())?) as Arc<dyn CaptchaProvider>),
				None => None,
			},
		};
		let mut blocks = BlockHandler::new(BlockDetector::new(settings.min_body_bytes));
		if let Some(provider) = captcha {
			log::debug!("captcha solving enabled via {}", provider.name());
			blocks = blocks.with_captcha_provider(provider);
		}

		let metrics = MetricsCollector::new();
		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		events.register_handler(Arc::new(MetricsHandler::new(metrics.clone())));
		for handler in event_handlers {
			events.register_handler(handler);
		}

		let scheduler = Scheduler::new(
			backend,
			proxies.clone(),
			Arc::new(blocks),
			Arc::new(events),
			SchedulerConfig {
				max_retries: settings.max_retries,
				max_concurrency: settings.max_concurrency,
				request_timeout: settings.request_timeout(),
				proxy_wait: settings.proxy_wait(),
				backoff_base: std::time::Duration::from_millis(settings.backoff_base_ms),
				run_deadline: settings.run_deadline(),
				retry_on_empty: settings.retry_on_empty,
			},
		)
		.with_pacing(settings.pacing())
		.with_user_agent_options(user_agent);

		Ok(Self {
			aggregator: ResultAggregator::new(settings.sources.iter().copied()),
			debug: DebugCapture::new(settings.debug_path.clone()),
			settings,
			scheduler,
			proxies,
			session,
			metrics,
		})
	}

	pub fn settings(&self) -> &Settings {
		&self.settings
	}

	/// Enabled sources in priority order.
	pub fn sources(&self) -> &[Source] {
		&self.settings.sources
	}

	pub fn backend(&self) -> &Arc<dyn FetchBackend> {
		self.scheduler.backend()
	}

	pub fn metrics(&self) -> &MetricsCollector {
		&self.metrics
	}

	pub fn proxy_health(&self) -> ProxyHealthReport {
		self.proxies.health_report()
	}

	/// Trace one free-text address.
	pub async fn trace(&self, address: &str) -> SkipTracerResult<TraceReport> {
		let query = SearchQuery::parse(address)?;
		Ok(self.trace_query(&query).await)
	}

	/// Trace one parsed query. Never fails: every source failure is folded
	/// into the report's status.
	pub async fn trace_query(&self, query: &SearchQuery) -> TraceReport {
		self.trace_query_until(query, self.scheduler.deadline()).await
	}

	/// [`SkipTracer::trace_query`] against a deadline shared with other
	/// queries of the same run.
	pub(crate) async fn trace_query_until(
		&self,
		query: &SearchQuery,
		deadline: Option<Instant>,
	) -> TraceReport {
		log::info!("tracing {}", query.raw_address());
		let outcomes = self
			.scheduler
			.run_until(query, &self.settings.sources, deadline)
			.await;
		let records = self.aggregator.merge(&outcomes);
		let status = self.aggregator.status(&outcomes);

		let debug_capture = match self.debug.capture(&outcomes).await {
			Ok(path) => path,
			Err(err) => {
				log::warn!("could not write {}: {err}", self.debug.path().display());
				None
			}
		};

		log::info!(
			"{} -> {} ({} record(s))",
			query.raw_address(),
			status,
			records.len()
		);
		TraceReport {
			query: query.clone(),
			records,
			outcomes,
			status,
			debug_capture,
		}
	}

	/// Deadline for a run starting now, from the configured limit.
	pub(crate) fn run_deadline(&self) -> Option<Instant> {
		self.scheduler.deadline()
	}

	/// Trace every row of a CSV file into an output CSV file. The run
	/// deadline covers the whole file; rows started after it expire are
	/// written with status `error`.
	pub async fn run_batch(&self, input: &Path, output: &Path) -> SkipTracerResult<BatchSummary> {
		let options = BatchOptions {
			batch_size: self.settings.batch_size,
			parallel: self.settings.parallel,
		};
		Ok(batch::run(self, input, output, options).await?)
	}

	/// Write `records` as a JSON array to `path`.
	pub fn save_results(&self, records: &[ContactRecord], path: &Path) -> SkipTracerResult<()> {
		if let Some(parent) = path.parent()
			&& !parent.as_os_str().is_empty()
		{
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, serde_json::to_string_pretty(records)?)?;
		log::info!("saved {} record(s) to {}", records.len(), path.display());
		Ok(())
	}

	/// Release backend resources and persist proxy health when a session
	/// store is configured.
	pub async fn shutdown(&self) {
		self.backend().shutdown().await;
		if let Some(store) = &self.session {
			let report = self.proxies.health_report();
			if let Err(err) = store.save_proxy_stats(&report.details) {
				log::warn!("could not persist proxy health: {err}");
			}
		}
	}
}

fn build_proxy_tracker(
	settings: &Settings,
	credentials: &Credentials,
	session: Option<&SessionStore>,
) -> ProxyHealthTracker {
	let mut specs: Vec<String> = Vec::new();
	for spec in settings.proxies.iter().chain(&credentials.proxies) {
		if !specs.contains(spec) {
			specs.push(spec.clone());
		}
	}
	let tracker = ProxyHealthTracker::new(settings.proxy_config(), specs);

	if let Some(store) = session {
		match store.load_proxy_stats() {
			Ok(saved) if !saved.is_empty() => {
				log::debug!("restoring health for {} proxies", saved.len());
				tracker.restore(&saved);
			}
			Ok(_) => {}
			Err(err) => log::warn!("ignoring stored proxy health: {err}"),
		}
	}
	tracker
}

fn build_backend(
	settings: &Settings,
	credentials: &Credentials,
	session: Option<&Arc<SessionStore>>,
) -> SkipTracerResult<Arc<dyn FetchBackend>> {
	let backend: Arc<dyn FetchBackend> = match settings.backend.resolve(credentials) {
		BackendKind::Direct => {
			let mut direct = DirectBackend::new();
			if let Some(store) = session {
				direct = direct.with_session_store(store.clone());
			}
			Arc::new(direct)
		}
		BackendKind::Browser => {
			let mut options = settings.browser_options();
			options.profile_root = session.map(|store| store.profile_root());
			Arc::new(BrowserBackend::new(options)?)
		}
		BackendKind::RemoteTask => {
			let auth = match (
				&credentials.api_token,
				&credentials.api_username,
				&credentials.api_password,
			) {
				(Some(token), _, _) => RemoteAuth::Token(token.clone()),
				(None, Some(username), Some(password)) => RemoteAuth::Basic {
					username: username.clone(),
					password: password.clone(),
				},
				_ => return Err(ConfigError::MissingRemoteCredentials.into()),
			};
			let config = RemoteApiConfig::new(settings.remote_api_base()?, auth)
				.with_request_timeout(settings.request_timeout());
			let client = RemoteApiClient::new(config)?;
			Arc::new(RemoteTaskBackend::new(
				Arc::new(client),
				settings.poll_interval(),
				settings.poll_budget(),
			))
		}
	};
	Ok(backend)
}
