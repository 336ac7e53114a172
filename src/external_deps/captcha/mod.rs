//! Captcha provider integrations.
//!
//! Adapters expose a unified interface for third-party captcha solvers so
//! the block handler can stay agnostic of vendor-specific details while
//! still retrieving challenge tokens when a CAPTCHA wall is hit.

mod twocaptcha;

pub use twocaptcha::TwoCaptchaProvider;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::challenges::detectors::CaptchaKind;

/// High-level configuration that controls captcha solving behaviour.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Details describing the captcha a site issued.
#[derive(Debug, Clone)]
pub struct CaptchaTask {
    pub kind: CaptchaKind,
    pub site_key: String,
    pub page_url: Url,
}

impl CaptchaTask {
    pub fn new(kind: CaptchaKind, site_key: impl Into<String>, page_url: Url) -> Self {
        Self {
            kind,
            site_key: site_key.into(),
            page_url,
        }
    }
}

/// Resolved captcha token.
#[derive(Debug, Clone)]
pub struct CaptchaSolution {
    pub token: String,
    pub metadata: HashMap<String, String>,
}

impl CaptchaSolution {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn insert_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Common result type returned by captcha providers.
pub type CaptchaResult = Result<CaptchaSolution, CaptchaError>;

/// Shared interface implemented by captcha vendors.
#[async_trait]
pub trait CaptchaProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn solve(&self, task: &CaptchaTask) -> CaptchaResult;
}

/// Errors surfaced by captcha providers.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha provider misconfigured: {0}")]
    Configuration(String),
    #[error("captcha provider request failed: {0}")]
    Provider(String),
    #[error("captcha solving timed out after {0:?}")]
    Timeout(Duration),
    #[error("captcha transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
