use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;
use url::Url;

use super::{CaptchaConfig, CaptchaError, CaptchaProvider, CaptchaResult, CaptchaSolution, CaptchaTask};
use crate::challenges::detectors::CaptchaKind;

const DEFAULT_BASE_URL: &str = "https://2captcha.com/";
const NOT_READY: &str = "CAPCHA_NOT_READY";

/// Adapter for the 2Captcha `in.php` / `res.php` API.
#[derive(Debug, Clone)]
pub struct TwoCaptchaProvider {
    api_key: String,
    base_url: Url,
    config: CaptchaConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    status: u8,
    request: String,
}

impl TwoCaptchaProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CaptchaError> {
        Self::with_config(api_key, CaptchaConfig::default())
    }

    pub fn with_config(api_key: impl Into<String>, config: CaptchaConfig) -> Result<Self, CaptchaError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CaptchaError::Configuration("empty 2captcha api key".into()));
        }
        let base_url = Url::parse(DEFAULT_BASE_URL)
            .map_err(|err| CaptchaError::Configuration(err.to_string()))?;
        Ok(Self {
            api_key,
            base_url,
            config,
            http: reqwest::Client::new(),
        })
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, CaptchaError> {
        self.base_url
            .join(path)
            .map_err(|err| CaptchaError::Configuration(err.to_string()))
    }

    async fn submit(&self, task: &CaptchaTask) -> Result<String, CaptchaError> {
        let (method, key_field) = match task.kind {
            CaptchaKind::RecaptchaV2 => ("userrecaptcha", "googlekey"),
            CaptchaKind::Hcaptcha => ("hcaptcha", "sitekey"),
            CaptchaKind::Turnstile => ("turnstile", "sitekey"),
        };
        let form = [
            ("key", self.api_key.clone()),
            ("method", method.to_string()),
            (key_field, task.site_key.clone()),
            ("pageurl", task.page_url.to_string()),
            ("json", "1".to_string()),
        ];

        let reply: ApiReply = self
            .http
            .post(self.endpoint("in.php")?)
            .form(&form)
            .send()
            .await?
            .json()
            .await?;
        if reply.status != 1 {
            return Err(CaptchaError::Provider(reply.request));
        }
        Ok(reply.request)
    }

    async fn fetch_result(&self, id: &str) -> Result<Option<String>, CaptchaError> {
        let reply: ApiReply = self
            .http
            .get(self.endpoint("res.php")?)
            .query(&[
                ("key", self.api_key.as_str()),
                ("action", "get"),
                ("id", id),
                ("json", "1"),
            ])
            .send()
            .await?
            .json()
            .await?;
        match (reply.status, reply.request.as_str()) {
            (1, _) => Ok(Some(reply.request)),
            (_, NOT_READY) => Ok(None),
            _ => Err(CaptchaError::Provider(reply.request)),
        }
    }
}

#[async_trait]
impl CaptchaProvider for TwoCaptchaProvider {
    fn name(&self) -> &'static str {
        "twocaptcha"
    }

    async fn solve(&self, task: &CaptchaTask) -> CaptchaResult {
        let id = self.submit(task).await?;
        log::debug!("2captcha accepted {:?} task {id}", task.kind);

        let deadline = Instant::now() + self.config.timeout;
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            if let Some(token) = self.fetch_result(&id).await? {
                return Ok(CaptchaSolution::new(token).insert_metadata("task_id", id));
            }
            if Instant::now() >= deadline {
                return Err(CaptchaError::Timeout(self.config.timeout));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(prefix: &str) -> TwoCaptchaProvider {
        TwoCaptchaProvider::with_config(
            "key-123",
            CaptchaConfig {
                timeout: Duration::from_secs(2),
                poll_interval: Duration::from_millis(10),
            },
        )
        .unwrap()
        .with_base_url(Url::parse(&format!("{}/{prefix}/", mockito::server_url())).unwrap())
    }

    fn task() -> CaptchaTask {
        CaptchaTask::new(
            CaptchaKind::RecaptchaV2,
            "6Lc_site",
            Url::parse("https://www.fastpeoplesearch.com/address/x").unwrap(),
        )
    }

    #[tokio::test]
    async fn solves_after_not_ready() {
        let _submit = mockito::mock("POST", "/ok/in.php")
            .match_body(mockito::Matcher::Regex("method=userrecaptcha".into()))
            .with_body(r#"{"status":1,"request":"777"}"#)
            .create();
        let _ready = mockito::mock("GET", "/ok/res.php")
            .match_query(mockito::Matcher::UrlEncoded("id".into(), "777".into()))
            .with_body(r#"{"status":1,"request":"TOKEN-XYZ"}"#)
            .create();

        let solution = provider("ok").solve(&task()).await.unwrap();
        assert_eq!(solution.token, "TOKEN-XYZ");
        assert_eq!(solution.metadata["task_id"], "777");
    }

    #[tokio::test]
    async fn rejected_submission_is_a_provider_error() {
        let _submit = mockito::mock("POST", "/bad/in.php")
            .with_body(r#"{"status":0,"request":"ERROR_WRONG_USER_KEY"}"#)
            .create();
        let err = provider("bad").solve(&task()).await.unwrap_err();
        assert!(matches!(err, CaptchaError::Provider(ref msg) if msg == "ERROR_WRONG_USER_KEY"));
    }

    #[tokio::test]
    async fn never_ready_times_out() {
        let _submit = mockito::mock("POST", "/slow/in.php")
            .with_body(r#"{"status":1,"request":"1"}"#)
            .create();
        let _poll = mockito::mock("GET", "/slow/res.php")
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"status":0,"request":"CAPCHA_NOT_READY"}"#)
            .create();
        let provider = TwoCaptchaProvider::with_config(
            "k",
            CaptchaConfig {
                timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(10),
            },
        )
        .unwrap()
        .with_base_url(Url::parse(&format!("{}/slow/", mockito::server_url())).unwrap());
        assert!(matches!(
            provider.solve(&task()).await.unwrap_err(),
            CaptchaError::Timeout(_)
        ));
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(TwoCaptchaProvider::new(" ").is_err());
    }
}
