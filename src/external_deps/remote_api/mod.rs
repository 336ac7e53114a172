//! Client for the hosted scraping API.
//!
//! The provider renders a target URL through its own browser fleet and
//! returns the final HTML. Two modes are used:
//!
//! * realtime: `POST /scrape` blocks until the page is rendered;
//! * batch: `POST /task/batch` returns one task id per query, which is then
//!   polled through `GET /task/{id}/results`.
//!
//! Authentication is HTTP basic with the account username/password, or a
//! bearer token when one is configured instead.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::fetch::InteractionStep;
use crate::fetch::poller::{TaskApi, TaskPoll};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RemoteApiError {
    #[error("remote api transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote api answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("remote api returned no content for task {0}")]
    MissingContent(String),
    #[error("invalid remote api url: {0}")]
    Url(#[from] url::ParseError),
}

impl RemoteApiError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteApiError::Transport(err) if err.is_timeout())
    }
}

/// Account credentials: username/password pair or an API token.
#[derive(Clone)]
pub enum RemoteAuth {
    Basic { username: String, password: String },
    Token(String),
}

impl std::fmt::Debug for RemoteAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteAuth::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
            RemoteAuth::Token(_) => f.write_str("Token(***)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteApiConfig {
    pub base_url: Url,
    pub auth: RemoteAuth,
    pub geo: String,
    pub locale: String,
    pub device_type: String,
    /// Bound on batch submission and status requests.
    pub request_timeout: Duration,
}

impl RemoteApiConfig {
    pub fn new(base_url: Url, auth: RemoteAuth) -> Self {
        Self {
            base_url,
            auth,
            geo: "United States".to_string(),
            locale: "en-us".to_string(),
            device_type: "desktop".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Job description accepted by both the realtime and batch endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeSpec {
    pub target: &'static str,
    pub url: String,
    pub headless: &'static str,
    pub geo: String,
    pub locale: String,
    pub device_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_actions: Option<Vec<InteractionStep>>,
}

/// Rendered page as returned by the provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemotePage {
    pub content: String,
    pub status_code: u16,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeEnvelope {
    #[serde(default)]
    results: Vec<RemotePage>,
}

#[derive(Debug, Deserialize)]
struct BatchEnvelope {
    #[serde(default)]
    queries: Vec<QueuedTask>,
}

#[derive(Debug, Deserialize)]
struct QueuedTask {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    status: String,
    #[serde(default)]
    results: Vec<RemotePage>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteApiClient {
    http: reqwest::Client,
    config: RemoteApiConfig,
}

impl RemoteApiClient {
    pub fn new(config: RemoteApiConfig) -> Result<Self, RemoteApiError> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &RemoteApiConfig {
        &self.config
    }

    /// Spec for rendering `url` with the account's default geo settings.
    pub fn spec_for(
        &self,
        url: &Url,
        session_id: Option<String>,
        steps: Vec<InteractionStep>,
        headers: &http::HeaderMap,
    ) -> ScrapeSpec {
        let forwarded: BTreeMap<String, String> = headers
            .iter()
            .filter_map(|(name, value)| {
                Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();

        ScrapeSpec {
            target: "universal",
            url: url.to_string(),
            headless: "html",
            geo: self.config.geo.clone(),
            locale: self.config.locale.clone(),
            device_type: self.config.device_type.clone(),
            session_id,
            headers: (!forwarded.is_empty()).then_some(forwarded),
            browser_actions: (!steps.is_empty()).then_some(steps),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth {
            RemoteAuth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            RemoteAuth::Token(token) => builder.bearer_auth(token),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteApiError> {
        Ok(self.config.base_url.join(path)?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteApiError::Status {
            status: status.as_u16(),
            body: body.chars().take(300).collect(),
        })
    }

    /// Realtime render; blocks until the provider returns the page.
    pub async fn scrape(
        &self,
        spec: &ScrapeSpec,
        timeout: Duration,
    ) -> Result<RemotePage, RemoteApiError> {
        let request = self.http.post(self.endpoint("scrape")?).json(spec);
        let response = self
            .authorize(request)
            .timeout(timeout)
            .send()
            .await?;
        let envelope: ScrapeEnvelope = Self::check(response).await?.json().await?;
        envelope
            .results
            .into_iter()
            .next()
            .ok_or_else(|| RemoteApiError::MissingContent("realtime".to_string()))
    }

    /// Queue many jobs at once; returns task ids in input order.
    pub async fn submit_batch(&self, specs: &[ScrapeSpec]) -> Result<Vec<String>, RemoteApiError> {
        #[derive(Serialize)]
        struct BatchRequest<'a> {
            queries: &'a [ScrapeSpec],
        }

        let request = self
            .http
            .post(self.endpoint("task/batch")?)
            .json(&BatchRequest { queries: specs });
        let response = self
            .authorize(request)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let envelope: BatchEnvelope = Self::check(response).await?.json().await?;
        Ok(envelope.queries.into_iter().map(|task| task.id).collect())
    }
}

#[async_trait]
impl TaskApi for RemoteApiClient {
    async fn poll_task(&self, task_id: &str) -> Result<TaskPoll, RemoteApiError> {
        let request = self
            .http
            .get(self.endpoint(&format!("task/{task_id}/results"))?);
        let response = self
            .authorize(request)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let envelope: TaskEnvelope = Self::check(response).await?.json().await?;

        match envelope.status.as_str() {
            "done" | "completed" => envelope
                .results
                .into_iter()
                .next()
                .map(TaskPoll::Done)
                .ok_or_else(|| RemoteApiError::MissingContent(task_id.to_string())),
            "failed" | "faulted" => Ok(TaskPoll::Failed(
                envelope
                    .message
                    .unwrap_or_else(|| "provider reported failure".to_string()),
            )),
            _ => Ok(TaskPoll::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RemoteApiClient {
        let base = Url::parse(&format!("{}/v1/", mockito::server_url())).unwrap();
        RemoteApiClient::new(RemoteApiConfig::new(
            base,
            RemoteAuth::Basic {
                username: "user".into(),
                password: "pass".into(),
            },
        ))
        .unwrap()
    }

    fn spec(client: &RemoteApiClient) -> ScrapeSpec {
        client.spec_for(
            &Url::parse("https://www.truepeoplesearch.com/resultaddress?streetaddress=1").unwrap(),
            Some("tps-1".into()),
            vec![InteractionStep::Scroll { y: 1200 }],
            &http::HeaderMap::new(),
        )
    }

    #[test]
    fn spec_serializes_interaction_steps() {
        let client = client();
        let json = serde_json::to_value(spec(&client)).unwrap();
        assert_eq!(json["headless"], "html");
        assert_eq!(json["session_id"], "tps-1");
        assert_eq!(json["browser_actions"][0]["type"], "scroll");
        assert!(json.get("headers").is_none());
    }

    #[tokio::test]
    async fn realtime_scrape_returns_first_result() {
        let _m = mockito::mock("POST", "/v1/scrape")
            .match_header("authorization", mockito::Matcher::Regex("^Basic ".into()))
            .with_status(200)
            .with_body(r#"{"results":[{"content":"<html></html>","status_code":200}]}"#)
            .create();
        let client = client();
        let page = client
            .scrape(&spec(&client), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(page.status_code, 200);
        assert_eq!(page.content, "<html></html>");
    }

    #[tokio::test]
    async fn provider_errors_surface_status() {
        let _m = mockito::mock("POST", "/v1/task/batch")
            .with_status(401)
            .with_body("unauthorized")
            .create();
        let client = client();
        let err = client.submit_batch(&[spec(&client)]).await.unwrap_err();
        assert!(matches!(err, RemoteApiError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn task_status_maps_to_poll_states() {
        let _pending = mockito::mock("GET", "/v1/task/t-pending/results")
            .with_body(r#"{"status":"pending"}"#)
            .create();
        let _failed = mockito::mock("GET", "/v1/task/t-failed/results")
            .with_body(r#"{"status":"failed","message":"captcha wall"}"#)
            .create();
        let client = client();
        assert!(matches!(
            client.poll_task("t-pending").await.unwrap(),
            TaskPoll::Pending
        ));
        match client.poll_task("t-failed").await.unwrap() {
            TaskPoll::Failed(reason) => assert_eq!(reason, "captcha wall"),
            other => panic!("unexpected poll result {other:?}"),
        }
    }
}
