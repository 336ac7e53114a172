//! Concurrency scheduler.
//!
//! For one [`SearchQuery`] the scheduler runs every enabled source as an
//! independent worker. Each worker retries with a freshly acquired proxy
//! until it obtains a non-blocked, non-empty result or exhausts its retry
//! budget. A shared semaphore caps attempts in flight across all workers
//! (and across rows when a batch runs several queries at once), and an
//! optional run deadline turns whatever is still pending into a `timeout`.
//!
//! Retry policy per failure class:
//! - network error: retry immediately on a different proxy
//! - HTTP 4xx/5xx: retry after a feedback-driven backoff
//! - timeout: retry once with a doubled timeout, then with the same one
//! - blocked page: report the proxy as failed and retry

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, timeout_at};

use crate::challenges::detectors::BlockDetection;
use crate::challenges::handler::{BlockHandler, BlockVerdict};
use crate::challenges::user_agents::{UserAgentOptions, get_user_agent_profile};
use crate::fetch::{BackendKind, FetchBackend, FetchError, FetchErrorKind, FetchRequest, RawResponse};
use crate::modules::events::{
    AttemptFinishedEvent, AttemptStartedEvent, BlockedEvent, EventDispatcher, RetryEvent,
    SourceFailedEvent, TraceEvent,
};
use crate::modules::proxy::{NoHealthyProxyError, ProxyEndpoint, ProxyOutcome, ProxyTracker};
use crate::modules::timing::{DelayStrategy, Pacing, TimingFeedback};
use crate::query::SearchQuery;
use crate::sources::{Source, SourceResult};

/// Terminal status of one fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Success,
    Blocked,
    Timeout,
    Error,
}

/// Summary status of one source for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Success,
    NoMatch,
    Blocked,
    Timeout,
    Error,
}

impl SourceStatus {
    /// Completed cleanly, with or without records.
    pub fn is_clean(&self) -> bool {
        matches!(self, SourceStatus::Success | SourceStatus::NoMatch)
    }
}

/// An attempt in flight. Consumed by [`PendingAttempt::finish`], so every
/// attempt reaches exactly one terminal status.
#[derive(Debug)]
pub struct PendingAttempt {
    query: String,
    source: Source,
    proxy: String,
    backend_kind: BackendKind,
    attempt: u32,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl PendingAttempt {
    pub fn start(
        query: &SearchQuery,
        source: Source,
        proxy: &ProxyEndpoint,
        backend_kind: BackendKind,
        attempt: u32,
    ) -> Self {
        Self {
            query: query.raw_address().to_string(),
            source,
            proxy: proxy.identifier().to_string(),
            backend_kind,
            attempt,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn finish(self, status: AttemptStatus, http_status: Option<u16>) -> FetchAttempt {
        FetchAttempt {
            query: self.query,
            source: self.source,
            proxy: self.proxy,
            backend_kind: self.backend_kind,
            attempt: self.attempt,
            started_at: self.started_at,
            latency: self.started.elapsed(),
            status,
            http_status,
        }
    }
}

/// A completed attempt.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub query: String,
    pub source: Source,
    pub proxy: String,
    pub backend_kind: BackendKind,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub latency: Duration,
    pub status: AttemptStatus,
    pub http_status: Option<u16>,
}

/// Everything one source produced for one query.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: Source,
    pub records: SourceResult,
    pub status: SourceStatus,
    pub attempts: Vec<FetchAttempt>,
    /// Last raw page seen for this source, kept for diagnostics.
    pub last_response: Option<RawResponse>,
    pub error: Option<String>,
}

impl SourceOutcome {
    fn failed(source: Source, error: impl Into<String>) -> Self {
        Self {
            source,
            records: Vec::new(),
            status: SourceStatus::Error,
            attempts: Vec::new(),
            last_response: None,
            error: Some(error.into()),
        }
    }

    /// Start time of the most recent attempt.
    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.attempts.last().map(|attempt| attempt.started_at)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_retries: u32,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    pub proxy_wait: Duration,
    pub backoff_base: Duration,
    pub run_deadline: Option<Duration>,
    pub retry_on_empty: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_concurrency: 4,
            request_timeout: Duration::from_secs(30),
            proxy_wait: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            run_deadline: None,
            retry_on_empty: true,
        }
    }
}

/// Mutable per-source state owned by one worker.
struct SourceRun {
    source: Source,
    records: SourceResult,
    status: SourceStatus,
    attempts: Vec<FetchAttempt>,
    pending: Option<PendingAttempt>,
    last_response: Option<RawResponse>,
    error: Option<String>,
}

impl SourceRun {
    fn new(source: Source) -> Self {
        Self {
            source,
            records: Vec::new(),
            status: SourceStatus::Error,
            attempts: Vec::new(),
            pending: None,
            last_response: None,
            error: None,
        }
    }

    /// A clean no-match is never downgraded by a later failed retry.
    fn settle(&mut self, status: SourceStatus, error: Option<String>) {
        if self.status == SourceStatus::NoMatch && !status.is_clean() {
            return;
        }
        self.status = status;
        self.error = error;
    }

    fn into_outcome(self) -> SourceOutcome {
        SourceOutcome {
            source: self.source,
            records: self.records,
            status: self.status,
            attempts: self.attempts,
            last_response: self.last_response,
            error: self.error,
        }
    }
}

enum Classified {
    Page(RawResponse),
    Blocked {
        response: RawResponse,
        detection: BlockDetection,
    },
    Failed(FetchError),
}

/// Runs sources for one query at a time; cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    backend: Arc<dyn FetchBackend>,
    proxies: Arc<dyn ProxyTracker>,
    blocks: Arc<BlockHandler>,
    events: Arc<EventDispatcher>,
    user_agents: UserAgentOptions,
    pacing: Pacing,
    permits: Arc<Semaphore>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        backend: Arc<dyn FetchBackend>,
        proxies: Arc<dyn ProxyTracker>,
        blocks: Arc<BlockHandler>,
        events: Arc<EventDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            backend,
            proxies,
            blocks,
            events,
            user_agents: UserAgentOptions::default(),
            pacing: Pacing::disabled(),
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_user_agent_options(mut self, options: UserAgentOptions) -> Self {
        self.user_agents = options;
        self
    }

    pub fn backend(&self) -> &Arc<dyn FetchBackend> {
        &self.backend
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every source in `sources` for `query`. Outcomes come back in the
    /// order of `sources`, whichever worker finished first.
    pub async fn run(&self, query: &SearchQuery, sources: &[Source]) -> Vec<SourceOutcome> {
        self.run_until(query, sources, self.deadline()).await
    }

    /// Absolute deadline for a run starting now, if one is configured.
    pub fn deadline(&self) -> Option<Instant> {
        self.config.run_deadline.map(|limit| Instant::now() + limit)
    }

    /// [`Scheduler::run`] against a caller-held deadline, so several queries
    /// can share one. Sources of a query started after the deadline are
    /// reported as `timeout` without any attempt.
    pub async fn run_until(
        &self,
        query: &SearchQuery,
        sources: &[Source],
        deadline: Option<Instant>,
    ) -> Vec<SourceOutcome> {
        let mut workers = JoinSet::new();

        for (index, &source) in sources.iter().enumerate() {
            let scheduler = self.clone();
            let query = query.clone();
            workers.spawn(async move {
                let mut run = SourceRun::new(source);
                let completed = match deadline {
                    Some(deadline) if Instant::now() >= deadline => false,
                    Some(deadline) => timeout_at(deadline, scheduler.drive(&query, &mut run))
                        .await
                        .is_ok(),
                    None => {
                        scheduler.drive(&query, &mut run).await;
                        true
                    }
                };
                if !completed {
                    scheduler.abort(&mut run);
                }
                (index, run.into_outcome())
            });
        }

        let mut slots: Vec<Option<SourceOutcome>> = sources.iter().map(|_| None).collect();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(err) => log::error!("source worker for {} failed: {err}", query.raw_address()),
            }
        }

        slots
            .into_iter()
            .zip(sources)
            .map(|(slot, &source)| {
                slot.unwrap_or_else(|| SourceOutcome::failed(source, "source worker aborted"))
            })
            .collect()
    }

    async fn drive(&self, query: &SearchQuery, run: &mut SourceRun) {
        let source = run.source;
        let url = match source.search_url(query) {
            Ok(url) => url,
            Err(err) => {
                run.settle(SourceStatus::Error, Some(format!("cannot build search url: {err}")));
                self.source_failed(run);
                return;
            }
        };

        let max_attempts = self.config.max_retries + 1;
        let mut timeout = self.config.request_timeout;
        let mut timeout_extended = false;
        let mut backoff = DelayStrategy::new(self.config.backoff_base.as_millis() as u64);

        for attempt in 1..=max_attempts {
            let mut delay = Duration::ZERO;

            let proxy = match self.acquire_proxy().await {
                Ok(proxy) => proxy,
                Err(err) => {
                    log::warn!("{source}: {err}");
                    run.settle(SourceStatus::Error, Some(err.to_string()));
                    self.schedule_retry(source, attempt, max_attempts, &err.to_string(), delay)
                        .await;
                    continue;
                }
            };

            self.pacing.pause().await;
            let Ok(permit) = self.permits.acquire().await else {
                run.settle(SourceStatus::Error, Some("scheduler shut down".into()));
                return;
            };

            let request = FetchRequest {
                query: query.clone(),
                source,
                url: url.clone(),
                proxy: proxy.clone(),
                headers: self.attempt_headers(),
                timeout,
                attempt,
            };

            run.pending = Some(PendingAttempt::start(
                query,
                source,
                &proxy,
                self.backend.kind(),
                attempt,
            ));
            self.events.dispatch(TraceEvent::AttemptStarted(AttemptStartedEvent {
                source,
                attempt,
                proxy: proxy.identifier().to_string(),
                backend: self.backend.kind(),
                timestamp: Utc::now(),
            }));

            let result = self.backend.fetch(&request).await;
            let reason = match self.classify(&request, result).await {
                Classified::Page(page) => {
                    let http_status = Some(page.status_code);
                    self.proxies.report(&proxy, ProxyOutcome::Success);
                    backoff.register_feedback(TimingFeedback::Success);
                    match source.parse(&page) {
                        Ok(records) if !records.is_empty() => {
                            self.close_attempt(run, AttemptStatus::Success, http_status);
                            log::info!("{source}: {} record(s) on attempt {attempt}", records.len());
                            run.records = records;
                            run.last_response = Some(page);
                            run.settle(SourceStatus::Success, None);
                            return;
                        }
                        Ok(_) => {
                            self.close_attempt(run, AttemptStatus::Success, http_status);
                            log::info!("{source}: no matches on attempt {attempt}");
                            run.last_response = Some(page);
                            run.settle(SourceStatus::NoMatch, None);
                            if !self.config.retry_on_empty {
                                return;
                            }
                            "empty results page".to_string()
                        }
                        Err(err) => {
                            self.close_attempt(run, AttemptStatus::Error, http_status);
                            log::warn!("{source}: {err}");
                            run.last_response = Some(page);
                            run.settle(SourceStatus::Error, Some(err.to_string()));
                            err.to_string()
                        }
                    }
                }
                Classified::Blocked {
                    response,
                    detection,
                } => {
                    self.close_attempt(run, AttemptStatus::Blocked, Some(response.status_code));
                    self.proxies.report(&proxy, ProxyOutcome::Failure);
                    backoff.register_feedback(TimingFeedback::Failure);
                    self.events.dispatch(TraceEvent::Blocked(BlockedEvent {
                        source,
                        proxy: proxy.identifier().to_string(),
                        signature: detection.signature_id.to_string(),
                        timestamp: Utc::now(),
                    }));
                    let reason = format!("blocked by {}", detection.signature_id);
                    run.last_response = Some(response);
                    run.settle(SourceStatus::Blocked, Some(reason.clone()));
                    reason
                }
                Classified::Failed(mut error) => {
                    self.proxies.report(&proxy, ProxyOutcome::Failure);
                    match error.kind() {
                        FetchErrorKind::Network => {
                            self.close_attempt(run, AttemptStatus::Error, None);
                            run.settle(SourceStatus::Error, Some(error.to_string()));
                        }
                        FetchErrorKind::Timeout => {
                            self.close_attempt(run, AttemptStatus::Timeout, None);
                            run.settle(SourceStatus::Timeout, Some(error.to_string()));
                            if !timeout_extended {
                                timeout *= 2;
                                timeout_extended = true;
                            }
                        }
                        FetchErrorKind::HttpStatus(code) => {
                            self.close_attempt(run, AttemptStatus::Error, Some(code));
                            run.settle(SourceStatus::Error, Some(error.to_string()));
                            backoff.register_feedback(if code == 429 {
                                TimingFeedback::RateLimited
                            } else {
                                TimingFeedback::Failure
                            });
                            delay = backoff.next_delay();
                            if let Some(page) = error.response.take() {
                                run.last_response = Some(*page);
                            }
                        }
                    }
                    error.to_string()
                }
            };

            drop(permit);
            self.schedule_retry(source, attempt, max_attempts, &reason, delay)
                .await;
        }

        if !run.status.is_clean() {
            self.source_failed(run);
        }
    }

    async fn classify(
        &self,
        request: &FetchRequest,
        result: Result<RawResponse, FetchError>,
    ) -> Classified {
        let page = match result {
            Ok(page) => page,
            Err(mut error) => match error.response.take() {
                Some(page) => *page,
                None => return Classified::Failed(error),
            },
        };

        match self.blocks.inspect(self.backend.as_ref(), request, page).await {
            BlockVerdict::Blocked {
                response,
                detection,
            } => Classified::Blocked {
                response,
                detection,
            },
            BlockVerdict::Clear(page) if page.is_success() => Classified::Page(page),
            BlockVerdict::Clear(page) => Classified::Failed(FetchError::http_status(page)),
        }
    }

    /// Acquire a proxy, waiting out cooldowns for at most `proxy_wait`.
    async fn acquire_proxy(&self) -> Result<ProxyEndpoint, NoHealthyProxyError> {
        let deadline = Instant::now() + self.config.proxy_wait;
        loop {
            match self.proxies.acquire() {
                Ok(proxy) => return Ok(proxy),
                Err(err) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(err);
                    }
                    let wait = err
                        .retry_after
                        .unwrap_or(Duration::from_millis(500))
                        .max(Duration::from_millis(50))
                        .min(deadline - now);
                    log::debug!("{err}; waiting {:.2}s", wait.as_secs_f64());
                    sleep(wait).await;
                }
            }
        }
    }

    fn attempt_headers(&self) -> http::HeaderMap {
        match get_user_agent_profile(&self.user_agents).and_then(|profile| profile.to_header_map()) {
            Ok(headers) => headers,
            Err(err) => {
                log::warn!("falling back to default headers: {err}");
                http::HeaderMap::new()
            }
        }
    }

    fn close_attempt(&self, run: &mut SourceRun, status: AttemptStatus, http_status: Option<u16>) {
        let Some(pending) = run.pending.take() else {
            return;
        };
        let attempt = pending.finish(status, http_status);
        self.events.dispatch(TraceEvent::AttemptFinished(AttemptFinishedEvent {
            source: attempt.source,
            attempt: attempt.attempt,
            proxy: attempt.proxy.clone(),
            status,
            http_status,
            latency: attempt.latency,
            timestamp: Utc::now(),
        }));
        run.attempts.push(attempt);
    }

    async fn schedule_retry(
        &self,
        source: Source,
        attempt: u32,
        max_attempts: u32,
        reason: &str,
        delay: Duration,
    ) {
        if attempt >= max_attempts {
            return;
        }
        self.events.dispatch(TraceEvent::Retry(RetryEvent {
            source,
            attempt: attempt + 1,
            reason: reason.to_string(),
            scheduled_after: delay,
            timestamp: Utc::now(),
        }));
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    /// Run deadline hit: the attempt in flight becomes a timeout.
    fn abort(&self, run: &mut SourceRun) {
        if run.status == SourceStatus::Success {
            return;
        }
        self.close_attempt(run, AttemptStatus::Timeout, None);
        run.settle(SourceStatus::Timeout, Some("run deadline exceeded".into()));
        if !run.status.is_clean() {
            self.source_failed(run);
        }
    }

    fn source_failed(&self, run: &SourceRun) {
        self.events.dispatch(TraceEvent::SourceFailed(SourceFailedEvent {
            source: run.source,
            status: run.status,
            error: run.error.clone().unwrap_or_default(),
            timestamp: Utc::now(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::challenges::detectors::BlockDetector;
    use crate::modules::proxy::{ProxyConfig, ProxyHealthTracker};

    const RESULTS: &str = r#"<html><body>
        <div class="card card-summary">
          <a href="/details?id=1">John D Smith</a>
          <div class="content-address">Portland, IN</div>
          <span>(260) 555-1234</span>
        </div></body></html>"#;
    const EMPTY: &str = r#"<html><body><div id="divNoResults">No records found</div></body></html>"#;
    const PRESS_AND_HOLD: &str =
        r#"<html><body><div id="px-captcha">Press &amp; Hold to confirm you are a human</div></body></html>"#;

    enum Reply {
        Page(&'static str),
        Network,
        Timeout,
        Status(u16),
        Hang,
    }

    struct ScriptedBackend {
        replies: Mutex<VecDeque<Reply>>,
        seen: Mutex<Vec<(String, Duration)>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FetchBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Direct
        }

        async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
            self.seen
                .lock()
                .unwrap()
                .push((request.proxy.identifier().to_string(), request.timeout));
            let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Page(EMPTY));
            match reply {
                Reply::Page(body) => Ok(RawResponse::html(request.url.clone(), body)),
                Reply::Network => Err(FetchError::network("connection reset")),
                Reply::Timeout => Err(FetchError::timeout("deadline elapsed")),
                Reply::Status(code) => Err(FetchError::http_status(RawResponse::new(
                    request.url.clone(),
                    code,
                    http::HeaderMap::new(),
                    EMPTY,
                ))),
                Reply::Hang => {
                    sleep(Duration::from_secs(3600)).await;
                    Err(FetchError::timeout("hung"))
                }
            }
        }
    }

    fn scheduler(backend: Arc<ScriptedBackend>, proxies: &[&str], config: SchedulerConfig) -> Scheduler {
        let tracker = ProxyHealthTracker::new(
            ProxyConfig::default(),
            proxies.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        );
        Scheduler::new(
            backend,
            Arc::new(tracker),
            Arc::new(BlockHandler::new(BlockDetector::new(16))),
            Arc::new(EventDispatcher::new()),
            config,
        )
    }

    fn query() -> SearchQuery {
        SearchQuery::parse("709 W High St, Portland, IN").unwrap()
    }

    #[tokio::test]
    async fn network_errors_retry_on_a_fresh_proxy() {
        let backend = ScriptedBackend::new(vec![Reply::Network, Reply::Page(RESULTS)]);
        let scheduler = scheduler(backend.clone(), &["http://a:1", "http://b:2"], SchedulerConfig::default());

        let outcomes = scheduler.run(&query(), &[Source::TruePeopleSearch]).await;
        let outcome = &outcomes[0];
        assert_eq!(outcome.status, SourceStatus::Success);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].status, AttemptStatus::Error);
        assert_eq!(outcome.attempts[1].status, AttemptStatus::Success);

        let seen = backend.seen.lock().unwrap();
        assert_ne!(seen[0].0, seen[1].0);
    }

    #[tokio::test]
    async fn blocked_pages_exhaust_into_blocked_status() {
        let backend = ScriptedBackend::new(vec![
            Reply::Page(PRESS_AND_HOLD),
            Reply::Page(PRESS_AND_HOLD),
            Reply::Page(PRESS_AND_HOLD),
        ]);
        let scheduler = scheduler(backend, &[], SchedulerConfig::default());

        let outcome = scheduler.run(&query(), &[Source::TruePeopleSearch]).await.remove(0);
        assert_eq!(outcome.status, SourceStatus::Blocked);
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.attempts.len(), 3);
        assert!(outcome.attempts.iter().all(|a| a.status == AttemptStatus::Blocked));
        assert!(outcome.last_response.unwrap().is_blocked);
    }

    #[tokio::test]
    async fn timeout_is_extended_once() {
        let backend = ScriptedBackend::new(vec![Reply::Timeout, Reply::Timeout, Reply::Timeout]);
        let config = SchedulerConfig {
            request_timeout: Duration::from_secs(10),
            ..SchedulerConfig::default()
        };
        let scheduler = scheduler(backend.clone(), &[], config);

        let outcome = scheduler.run(&query(), &[Source::FastPeopleSearch]).await.remove(0);
        assert_eq!(outcome.status, SourceStatus::Timeout);
        let timeouts: Vec<_> = backend.seen.lock().unwrap().iter().map(|(_, t)| *t).collect();
        assert_eq!(
            timeouts,
            vec![Duration::from_secs(10), Duration::from_secs(20), Duration::from_secs(20)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn http_status_failures_back_off() {
        let backend = ScriptedBackend::new(vec![Reply::Status(503), Reply::Page(RESULTS)]);
        let config = SchedulerConfig {
            backoff_base: Duration::from_secs(4),
            ..SchedulerConfig::default()
        };
        let scheduler = scheduler(backend, &[], config);

        let started = Instant::now();
        let outcome = scheduler.run(&query(), &[Source::TruePeopleSearch]).await.remove(0);
        assert_eq!(outcome.status, SourceStatus::Success);
        assert_eq!(outcome.attempts[0].http_status, Some(503));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn clean_no_match_survives_failed_retries() {
        let backend = ScriptedBackend::new(vec![Reply::Page(EMPTY), Reply::Network, Reply::Network]);
        let scheduler = scheduler(backend, &[], SchedulerConfig::default());

        let outcome = scheduler.run(&query(), &[Source::TruePeopleSearch]).await.remove(0);
        assert_eq!(outcome.status, SourceStatus::NoMatch);
        assert_eq!(outcome.attempts.len(), 3);
    }

    #[tokio::test]
    async fn empty_results_stop_without_retry_on_empty() {
        let backend = ScriptedBackend::new(vec![Reply::Page(EMPTY), Reply::Page(RESULTS)]);
        let config = SchedulerConfig {
            retry_on_empty: false,
            ..SchedulerConfig::default()
        };
        let scheduler = scheduler(backend, &[], config);

        let outcome = scheduler.run(&query(), &[Source::TruePeopleSearch]).await.remove(0);
        assert_eq!(outcome.status, SourceStatus::NoMatch);
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_deadline_marks_pending_sources_as_timeout() {
        let backend = ScriptedBackend::new(vec![Reply::Hang]);
        let config = SchedulerConfig {
            run_deadline: Some(Duration::from_secs(5)),
            ..SchedulerConfig::default()
        };
        let scheduler = scheduler(backend, &[], config);

        let outcome = scheduler.run(&query(), &[Source::TruePeopleSearch]).await.remove(0);
        assert_eq!(outcome.status, SourceStatus::Timeout);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].status, AttemptStatus::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_deadline_spans_consecutive_queries() {
        let backend = ScriptedBackend::new(vec![Reply::Hang, Reply::Page(RESULTS)]);
        let scheduler = scheduler(backend.clone(), &[], SchedulerConfig::default());
        let deadline = Some(Instant::now() + Duration::from_secs(5));

        let first = scheduler
            .run_until(&query(), &[Source::TruePeopleSearch], deadline)
            .await
            .remove(0);
        assert_eq!(first.status, SourceStatus::Timeout);

        let second = scheduler
            .run_until(&query(), &[Source::TruePeopleSearch], deadline)
            .await
            .remove(0);
        assert_eq!(second.status, SourceStatus::Timeout);
        assert!(second.attempts.is_empty());
        assert_eq!(second.error.as_deref(), Some("run deadline exceeded"));
        assert_eq!(backend.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn outcomes_follow_source_order() {
        let backend = ScriptedBackend::new(vec![]);
        let scheduler = scheduler(
            backend,
            &[],
            SchedulerConfig {
                retry_on_empty: false,
                ..SchedulerConfig::default()
            },
        );
        let order = [Source::FastPeopleSearch, Source::TruePeopleSearch];
        let outcomes = scheduler.run(&query(), &order).await;
        let sources: Vec<_> = outcomes.iter().map(|o| o.source).collect();
        assert_eq!(sources, order);
    }
}
