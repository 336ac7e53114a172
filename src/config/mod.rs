//! Runtime settings.
//!
//! [`Settings`] carries every tunable of a run with a documented default.
//! Values come from an optional JSON file; the binary layers CLI flags on
//! top. Secrets never live in the settings file: [`Credentials`] reads them
//! from the environment once at startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::fetch::{BackendKind, BrowserOptions};
use crate::modules::proxy::ProxyConfig;
use crate::modules::timing::Pacing;
use crate::sources::Source;

pub const DEFAULT_REMOTE_API_URL: &str = "http://127.0.0.1:8000/v1/";

pub const ENV_API_USERNAME: &str = "SKIPTRACE_API_USERNAME";
pub const ENV_API_PASSWORD: &str = "SKIPTRACE_API_PASSWORD";
pub const ENV_API_TOKEN: &str = "SKIPTRACE_API_TOKEN";
pub const ENV_API_URL: &str = "SKIPTRACE_API_URL";
pub const ENV_CAPTCHA_KEY: &str = "CAPTCHA_API_KEY";
pub const ENV_PROXIES: &str = "SKIPTRACE_PROXIES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("remote backend selected but no API credentials found (set {ENV_API_USERNAME}/{ENV_API_PASSWORD} or {ENV_API_TOKEN})")]
    MissingRemoteCredentials,
}

/// Backend selection; `Auto` picks the remote API when credentials are
/// present and plain HTTP otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    #[default]
    Auto,
    Direct,
    Browser,
    RemoteTask,
}

impl BackendChoice {
    pub fn resolve(self, credentials: &Credentials) -> BackendKind {
        match self {
            BackendChoice::Auto if credentials.has_remote_api() => BackendKind::RemoteTask,
            BackendChoice::Auto | BackendChoice::Direct => BackendKind::Direct,
            BackendChoice::Browser => BackendKind::Browser,
            BackendChoice::RemoteTask => BackendKind::RemoteTask,
        }
    }
}

impl std::str::FromStr for BackendChoice {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "auto" => Ok(BackendChoice::Auto),
            "direct" => Ok(BackendChoice::Direct),
            "browser" => Ok(BackendChoice::Browser),
            "remote" | "remote_task" => Ok(BackendChoice::RemoteTask),
            other => Err(format!(
                "unknown backend `{other}` (expected auto, direct, browser or remote)"
            )),
        }
    }
}

impl From<BackendKind> for BackendChoice {
    fn from(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Direct => BackendChoice::Direct,
            BackendKind::Browser => BackendChoice::Browser,
            BackendKind::RemoteTask => BackendChoice::RemoteTask,
        }
    }
}

/// All tunables of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Per-attempt request timeout (30 s).
    pub request_timeout_secs: u64,
    /// Retries after the first attempt, per source (2).
    pub max_retries: u32,
    /// Ceiling on attempts in flight across all sources and rows (4).
    pub max_concurrency: usize,
    /// Consecutive failures before a proxy cools down (3).
    pub proxy_failure_threshold: u32,
    pub cooldown_base_secs: u64,
    pub cooldown_max_secs: u64,
    /// Longest wait for a proxy to leave cooldown before giving up (10 s).
    pub proxy_wait_secs: u64,
    /// Base delay for HTTP-status backoff (1 s).
    pub backoff_base_ms: u64,
    pub poll_interval_secs: u64,
    pub poll_budget_secs: u64,
    /// Rows per batch chunk (25).
    pub batch_size: usize,
    /// Rows processed concurrently in batch mode (1).
    pub parallel: usize,
    /// Deadline for a whole run (one query, or every row of a batch); unset means unlimited.
    pub run_deadline_secs: Option<u64>,
    /// Bodies shorter than this are treated as empty shells (512).
    pub min_body_bytes: usize,
    pub pacing_min_ms: u64,
    pub pacing_max_ms: u64,
    /// Skip human-like pacing and shorten browser settle delays.
    pub fast: bool,
    /// Retry a source that returned a clean but empty page.
    pub retry_on_empty: bool,
    pub backend: BackendChoice,
    /// Enabled sources in priority order.
    pub sources: Vec<Source>,
    pub debug_path: PathBuf,
    pub results_path: PathBuf,
    pub batch_output_path: PathBuf,
    pub remote_api_url: Option<String>,
    pub cookie_store: Option<PathBuf>,
    pub visible_browser: bool,
    pub proxies: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_retries: 2,
            max_concurrency: 4,
            proxy_failure_threshold: 3,
            cooldown_base_secs: 30,
            cooldown_max_secs: 15 * 60,
            proxy_wait_secs: 10,
            backoff_base_ms: 1_000,
            poll_interval_secs: 3,
            poll_budget_secs: 120,
            batch_size: 25,
            parallel: 1,
            run_deadline_secs: None,
            min_body_bytes: 512,
            pacing_min_ms: 1_000,
            pacing_max_ms: 3_000,
            fast: false,
            retry_on_empty: true,
            backend: BackendChoice::Auto,
            sources: Source::ALL.to_vec(),
            debug_path: PathBuf::from("logs/debug_last.html"),
            results_path: PathBuf::from("results.json"),
            batch_output_path: PathBuf::from("skiptrace_results.csv"),
            remote_api_url: None,
            cookie_store: None,
            visible_browser: false,
            proxies: Vec::new(),
        }
    }
}

impl Settings {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Settings::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be positive"));
        }
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.parallel == 0 {
            return Err(invalid("parallel", "must be at least 1"));
        }
        if self.proxy_failure_threshold == 0 {
            return Err(invalid("proxy_failure_threshold", "must be at least 1"));
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "must be positive"));
        }
        if self.sources.is_empty() {
            return Err(invalid("sources", "at least one source must be enabled"));
        }
        if let Some(raw) = &self.remote_api_url {
            Url::parse(raw).map_err(|err| invalid("remote_api_url", err.to_string()))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn proxy_wait(&self) -> Duration {
        Duration::from_secs(self.proxy_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_budget(&self) -> Duration {
        Duration::from_secs(self.poll_budget_secs)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            failure_threshold: self.proxy_failure_threshold,
            cooldown_base: Duration::from_secs(self.cooldown_base_secs),
            cooldown_max: Duration::from_secs(self.cooldown_max_secs.max(self.cooldown_base_secs)),
        }
    }

    pub fn pacing(&self) -> Pacing {
        if self.fast {
            Pacing::disabled()
        } else {
            Pacing::new(
                Duration::from_millis(self.pacing_min_ms),
                Duration::from_millis(self.pacing_max_ms),
            )
        }
    }

    pub fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            visible: self.visible_browser,
            fast: self.fast,
            ..BrowserOptions::default()
        }
    }

    /// Base URL of the remote scraping API: settings file, then
    /// `SKIPTRACE_API_URL`, then the local default.
    pub fn remote_api_base(&self) -> Result<Url, ConfigError> {
        let raw = self
            .remote_api_url
            .clone()
            .or_else(|| std::env::var(ENV_API_URL).ok())
            .unwrap_or_else(|| DEFAULT_REMOTE_API_URL.to_string());
        let mut url = Url::parse(&raw).map_err(|err| invalid("remote_api_url", err.to_string()))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Secrets read from the environment.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_username: Option<String>,
    pub api_password: Option<String>,
    pub api_token: Option<String>,
    pub captcha_key: Option<String>,
    pub proxies: Vec<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_username", &self.api_username)
            .field("api_password", &self.api_password.as_ref().map(|_| "***"))
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("captcha_key", &self.captcha_key.as_ref().map(|_| "***"))
            .field("proxies", &self.proxies.len())
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Credentials::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            api_username: read(ENV_API_USERNAME),
            api_password: read(ENV_API_PASSWORD),
            api_token: read(ENV_API_TOKEN),
            captcha_key: read(ENV_CAPTCHA_KEY),
            proxies: read(ENV_PROXIES)
                .map(|raw| split_proxy_list(&raw))
                .unwrap_or_default(),
        }
    }

    pub fn has_remote_api(&self) -> bool {
        self.api_token.is_some() || (self.api_username.is_some() && self.api_password.is_some())
    }
}

/// Splits `a,b c` style proxy lists.
pub fn split_proxy_list(raw: &str) -> Vec<String> {
    raw.split(|ch: char| ch == ',' || ch.is_whitespace())
        .map(str::trim)
        .filter(|spec| !spec.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.sources, vec![Source::TruePeopleSearch, Source::FastPeopleSearch]);
        assert_eq!(settings.debug_path, PathBuf::from("logs/debug_last.html"));
    }

    #[test]
    fn file_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_retries": 5, "sources": ["FastPeopleSearch"], "backend": "direct"}}"#
        )
        .unwrap();
        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.sources, vec![Source::FastPeopleSearch]);
        assert_eq!(settings.backend, BackendChoice::Direct);
        assert_eq!(settings.batch_size, 25);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sources": []}}"#).unwrap();
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(ConfigError::Invalid { field: "sources", .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn credentials_select_auto_backend() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_TOKEN, "tok"),
            (ENV_PROXIES, "http://a:1, http://b:2"),
        ]);
        let creds = Credentials::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert!(creds.has_remote_api());
        assert_eq!(creds.proxies.len(), 2);
        assert_eq!(BackendChoice::Auto.resolve(&creds), BackendKind::RemoteTask);
        assert_eq!(
            BackendChoice::Auto.resolve(&Credentials::default()),
            BackendKind::Direct
        );
        assert!(!format!("{creds:?}").contains("tok"));
    }

    #[test]
    fn remote_base_gains_trailing_slash() {
        let settings = Settings {
            remote_api_url: Some("https://scrape.example.com/v1".into()),
            ..Settings::default()
        };
        assert_eq!(
            settings.remote_api_base().unwrap().as_str(),
            "https://scrape.example.com/v1/"
        );
    }

    #[test]
    fn backend_names_parse_from_cli_spelling() {
        assert_eq!("remote".parse::<BackendChoice>(), Ok(BackendChoice::RemoteTask));
        assert_eq!("Remote-Task".parse::<BackendChoice>(), Ok(BackendChoice::RemoteTask));
        assert_eq!("browser".parse::<BackendChoice>(), Ok(BackendChoice::Browser));
        assert!("selenium".parse::<BackendChoice>().is_err());
    }
}
