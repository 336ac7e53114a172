//! Fetch executor.
//!
//! One [`FetchBackend::fetch`] call performs exactly one attempt to retrieve
//! the raw page for a `(query, source, proxy)` tuple. Three interchangeable
//! backends exist: plain HTTP ([`DirectBackend`]), an automated browser
//! ([`BrowserBackend`]), and a third-party scraping API
//! ([`RemoteTaskBackend`]). All of them report failures as a [`FetchError`]
//! whose [`FetchErrorKind`] drives the scheduler's retry policy.

pub mod browser;
pub mod direct;
pub mod poller;
pub mod remote;
pub mod session;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::modules::proxy::ProxyEndpoint;
use crate::query::SearchQuery;
use crate::sources::Source;

pub use browser::{BrowserBackend, BrowserOptions};
pub use direct::DirectBackend;
pub use poller::{PollError, PollState, TaskPoller};
pub use remote::RemoteTaskBackend;
pub use session::{SessionStore, SessionStoreError};

/// Transport used to fetch a source's page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Direct,
    Browser,
    RemoteTask,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Direct => "direct",
            BackendKind::Browser => "browser",
            BackendKind::RemoteTask => "remote_task",
        })
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "direct" | "http" => Ok(BackendKind::Direct),
            "browser" | "headless" => Ok(BackendKind::Browser),
            "remote" | "remote_task" | "api" => Ok(BackendKind::RemoteTask),
            other => Err(format!("unknown backend `{other}`")),
        }
    }
}

/// Raw page handed from the executor to the block handler and parser.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub url: Url,
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: String,
    pub is_blocked: bool,
}

impl RawResponse {
    pub fn new(url: Url, status_code: u16, headers: HeaderMap, body: impl Into<String>) -> Self {
        Self {
            url,
            status_code,
            headers,
            body: body.into(),
            is_blocked: false,
        }
    }

    /// `200 OK` page with no headers, as produced by rendered backends.
    pub fn html(url: Url, body: impl Into<String>) -> Self {
        Self::new(url, 200, HeaderMap::new(), body)
    }

    pub fn mark_blocked(mut self) -> Self {
        self.is_blocked = true;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Failure classes the retry policy distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Connection-level failure; retried immediately on another proxy.
    Network,
    /// Deadline exceeded; retried once with a longer timeout.
    Timeout,
    /// Upstream answered 4xx/5xx; retried with backoff.
    HttpStatus(u16),
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Network => f.write_str("network error"),
            FetchErrorKind::Timeout => f.write_str("timeout"),
            FetchErrorKind::HttpStatus(code) => write!(f, "http status {code}"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
    /// Page that accompanied an HTTP status failure, kept so the block
    /// handler can inspect it and diagnostics can persist it.
    pub response: Option<Box<RawResponse>>,
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Network,
            message: message.into(),
            response: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Timeout,
            message: message.into(),
            response: None,
        }
    }

    pub fn http_status(response: RawResponse) -> Self {
        Self {
            kind: FetchErrorKind::HttpStatus(response.status_code),
            message: format!("{} answered {}", response.url, response.status_code),
            response: Some(Box::new(response)),
        }
    }

    pub fn kind(&self) -> FetchErrorKind {
        self.kind
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::timeout(err.to_string())
        } else {
            FetchError::network(err.to_string())
        }
    }
}

/// Scripted interaction performed before a rendered page is captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionStep {
    Scroll { y: u32 },
    Click { selector: String },
    Wait { millis: u64 },
}

/// Everything a backend needs for one attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub query: SearchQuery,
    pub source: Source,
    pub url: Url,
    pub proxy: ProxyEndpoint,
    pub headers: HeaderMap,
    pub timeout: Duration,
    pub attempt: u32,
}

impl FetchRequest {
    /// Sticky session identifier shared by attempts through one egress
    /// identity.
    pub fn session_id(&self) -> String {
        format!(
            "{}-{:016x}",
            self.source.name().to_lowercase(),
            fnv1a(self.proxy.identifier().as_bytes())
        )
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a; must stay stable across processes for session reuse.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// A query/source pair planned ahead of time (batch pre-submission).
#[derive(Debug, Clone)]
pub struct PlannedFetch {
    pub query: SearchQuery,
    pub source: Source,
    pub url: Url,
}

/// Form post that replays a solved CAPTCHA back to the site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSubmission {
    pub action: Url,
    pub form_fields: Vec<(String, String)>,
}

/// Common contract implemented by all fetch strategies.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// One attempt. Non-2xx pages come back as
    /// `FetchErrorKind::HttpStatus` with the page attached.
    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, FetchError>;

    /// Whether [`FetchBackend::submit_challenge`] can replay a solved CAPTCHA
    /// within the same session.
    fn supports_challenge_submission(&self) -> bool {
        false
    }

    async fn submit_challenge(
        &self,
        request: &FetchRequest,
        submission: &ChallengeSubmission,
    ) -> Result<RawResponse, FetchError> {
        let _ = submission;
        Err(FetchError::network(format!(
            "{} backend cannot replay challenges for {}",
            self.kind(),
            request.url
        )))
    }

    /// Hook for backends that can submit work ahead of the scheduler.
    async fn prepare_batch(&self, planned: &[PlannedFetch]) -> Result<(), FetchError> {
        let _ = planned;
        Ok(())
    }

    /// Release pooled resources (browser contexts, cookie jars).
    async fn shutdown(&self) {}
}
