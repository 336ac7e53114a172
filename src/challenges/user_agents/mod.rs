//! User-Agent profile rotation.
//!
//! Responsibilities:
//! - Hold a built-in set of desktop browser identities.
//! - Pick one at random per attempt, pairing it with matching `Accept*`
//!   headers.
//! - Allow a fixed custom User-Agent while keeping the default header set.

use std::borrow::Cow;
use std::collections::HashMap;

use http::{HeaderMap, HeaderName, HeaderValue};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::thread_rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
}

#[derive(Debug, Clone)]
struct HeaderProfile {
    accept: &'static str,
    accept_language: &'static str,
    accept_encoding: &'static str,
}

static HEADER_PROFILES: Lazy<HashMap<BrowserFamily, HeaderProfile>> = Lazy::new(|| {
    HashMap::from([
        (
            BrowserFamily::Chrome,
            HeaderProfile {
                accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
                accept_language: "en-US,en;q=0.9",
                accept_encoding: "gzip, deflate, br",
            },
        ),
        (
            BrowserFamily::Firefox,
            HeaderProfile {
                accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                accept_language: "en-US,en;q=0.5",
                accept_encoding: "gzip, deflate, br",
            },
        ),
        (
            BrowserFamily::Safari,
            HeaderProfile {
                accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                accept_language: "en-US,en;q=0.9",
                accept_encoding: "gzip, deflate, br",
            },
        ),
    ])
});

static USER_AGENTS: &[(BrowserFamily, &str)] = &[
    (
        BrowserFamily::Chrome,
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0 Safari/537.36",
    ),
    (
        BrowserFamily::Chrome,
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    ),
    (
        BrowserFamily::Chrome,
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36",
    ),
    (
        BrowserFamily::Firefox,
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
    ),
    (
        BrowserFamily::Safari,
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    ),
];

/// Options to filter/select a profile.
#[derive(Debug, Clone)]
pub struct UserAgentOptions {
    pub custom: Option<String>,
    /// Advertise `br` in `Accept-Encoding`.
    pub allow_brotli: bool,
}

impl Default for UserAgentOptions {
    fn default() -> Self {
        Self {
            custom: None,
            allow_brotli: true,
        }
    }
}

/// Final selected profile.
#[derive(Debug, Clone)]
pub struct UserAgentProfile {
    pub headers: HashMap<String, String>,
}

impl UserAgentProfile {
    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get("User-Agent").map(String::as_str)
    }

    pub fn to_header_map(&self) -> Result<HeaderMap, UserAgentError> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| UserAgentError::InvalidHeader(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| UserAgentError::InvalidHeader(name.clone()))?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

/// Draw a fresh header profile.
pub fn get_user_agent_profile(opts: &UserAgentOptions) -> Result<UserAgentProfile, UserAgentError> {
    let (family, user_agent) = match &opts.custom {
        Some(custom) if custom.trim().is_empty() => {
            return Err(UserAgentError::InvalidOptions("custom user agent is empty".into()));
        }
        Some(custom) => (family_of(custom), custom.clone()),
        None => {
            let (family, agent) = USER_AGENTS
                .choose(&mut thread_rng())
                .ok_or(UserAgentError::ProfileNotFound)?;
            (*family, agent.to_string())
        }
    };

    let profile = HEADER_PROFILES
        .get(&family)
        .ok_or(UserAgentError::ProfileNotFound)?;

    let mut headers = HashMap::new();
    headers.insert("User-Agent".to_string(), user_agent);
    headers.insert("Accept".to_string(), profile.accept.to_string());
    headers.insert(
        "Accept-Language".to_string(),
        profile.accept_language.to_string(),
    );
    headers.insert(
        "Accept-Encoding".to_string(),
        profile.accept_encoding.to_string(),
    );
    headers.insert("Connection".to_string(), "keep-alive".to_string());
    if !opts.allow_brotli {
        strip_brotli(&mut headers);
    }

    Ok(UserAgentProfile { headers })
}

fn family_of(agent: &str) -> BrowserFamily {
    if agent.contains("Firefox/") {
        BrowserFamily::Firefox
    } else if agent.contains("Chrome/") || agent.contains("Chromium/") {
        BrowserFamily::Chrome
    } else if agent.contains("Safari/") {
        BrowserFamily::Safari
    } else {
        BrowserFamily::Chrome
    }
}

fn strip_brotli(headers: &mut HashMap<String, String>) {
    if let Some(encoding) = headers.get_mut("Accept-Encoding") {
        let filtered = encoding
            .split(',')
            .map(str::trim)
            .filter(|enc| !enc.eq_ignore_ascii_case("br"))
            .collect::<Vec<_>>()
            .join(", ");
        *encoding = filtered;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UserAgentError {
    #[error("invalid user-agent options: {0}")]
    InvalidOptions(Cow<'static, str>),
    #[error("no matching user-agent profile found")]
    ProfileNotFound,
    #[error("header `{0}` cannot be sent")]
    InvalidHeader(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selection_returns_full_header_set() {
        let profile = get_user_agent_profile(&UserAgentOptions::default()).unwrap();
        let agent = profile.user_agent().unwrap();
        assert!(USER_AGENTS.iter().any(|(_, known)| *known == agent));
        let headers = profile.to_header_map().unwrap();
        assert_eq!(headers.get("connection").unwrap(), "keep-alive");
        assert!(headers.contains_key("accept-language"));
    }

    #[test]
    fn custom_agent_keeps_family_headers() {
        let opts = UserAgentOptions {
            custom: Some("Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0".into()),
            allow_brotli: false,
        };
        let profile = get_user_agent_profile(&opts).unwrap();
        assert_eq!(profile.headers["Accept-Language"], "en-US,en;q=0.5");
        assert_eq!(profile.headers["Accept-Encoding"], "gzip, deflate");
    }

    #[test]
    fn rejects_blank_custom_agent() {
        let opts = UserAgentOptions {
            custom: Some("  ".into()),
            allow_brotli: true,
        };
        assert!(get_user_agent_profile(&opts).is_err());
    }
}
