//! Plain HTTP backend.
//!
//! Keeps one `reqwest::Client` per egress identity so cookies set by a site
//! stay with the proxy that earned them. When a [`SessionStore`] is attached
//! the jars are seeded from disk on first use and written back on shutdown.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use tokio::sync::Mutex;
use url::Url;

use super::session::{SessionStore, StoredCookies};
use super::{
    BackendKind, ChallengeSubmission, FetchBackend, FetchError, FetchRequest, RawResponse,
};
use crate::modules::proxy::ProxyEndpoint;

struct PooledClient {
    client: reqwest::Client,
    jar: Arc<Jar>,
    hosts: HashSet<String>,
}

pub struct DirectBackend {
    clients: Mutex<HashMap<String, PooledClient>>,
    session: Option<Arc<SessionStore>>,
}

impl DirectBackend {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            session: None,
        }
    }

    pub fn with_session_store(mut self, store: Arc<SessionStore>) -> Self {
        self.session = Some(store);
        self
    }

    async fn client(&self, proxy: &ProxyEndpoint, url: &Url) -> Result<reqwest::Client, FetchError> {
        let mut guard = self.clients.lock().await;
        let host = url.host_str().unwrap_or_default().to_string();

        if let Some(pooled) = guard.get_mut(proxy.identifier()) {
            pooled.hosts.insert(host);
            return Ok(pooled.client.clone());
        }

        let jar = Arc::new(Jar::default());
        let mut hosts = HashSet::new();
        if let Some(store) = &self.session {
            match store.load_cookies(proxy.identifier()) {
                Ok(saved) => {
                    for entry in saved {
                        seed_jar(&jar, &entry);
                        hosts.insert(entry.host);
                    }
                }
                Err(err) => log::warn!("could not restore cookies for {proxy}: {err}"),
            }
        }
        hosts.insert(host);

        let mut builder = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .gzip(true)
            .brotli(true);
        if let Some(spec) = proxy.connection_spec() {
            let upstream = reqwest::Proxy::all(spec)
                .map_err(|err| FetchError::network(format!("invalid proxy {proxy}: {err}")))?;
            builder = builder.proxy(upstream);
        }
        let client = builder.build()?;

        guard.insert(
            proxy.identifier().to_string(),
            PooledClient {
                client: client.clone(),
                jar,
                hosts,
            },
        );
        Ok(client)
    }

    async fn persist_sessions(&self) {
        let Some(store) = &self.session else {
            return;
        };
        let guard = self.clients.lock().await;
        for (identity, pooled) in guard.iter() {
            let cookies: Vec<StoredCookies> = pooled
                .hosts
                .iter()
                .filter_map(|host| {
                    let url = Url::parse(&format!("https://{host}/")).ok()?;
                    let header = pooled.jar.cookies(&url)?;
                    Some(StoredCookies {
                        host: host.clone(),
                        header: header.to_str().ok()?.to_string(),
                    })
                })
                .collect();
            if cookies.is_empty() {
                continue;
            }
            if let Err(err) = store.save_cookies(identity, &cookies) {
                log::warn!("could not persist cookies for {identity}: {err}");
            }
        }
    }
}

impl Default for DirectBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn seed_jar(jar: &Jar, entry: &StoredCookies) {
    let Ok(url) = Url::parse(&format!("https://{}/", entry.host)) else {
        return;
    };
    for pair in entry.header.split(';') {
        let pair = pair.trim();
        if !pair.is_empty() {
            jar.add_cookie_str(pair, &url);
        }
    }
}

async fn into_raw(response: reqwest::Response) -> Result<RawResponse, FetchError> {
    let url = response.url().clone();
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.text().await?;

    let raw = RawResponse::new(url, status, headers, body);
    if raw.is_success() {
        Ok(raw)
    } else {
        Err(FetchError::http_status(raw))
    }
}

#[async_trait]
impl FetchBackend for DirectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
        let client = self.client(&request.proxy, &request.url).await?;
        let response = client
            .get(request.url.clone())
            .headers(request.headers.clone())
            .timeout(request.timeout)
            .send()
            .await?;
        into_raw(response).await
    }

    fn supports_challenge_submission(&self) -> bool {
        true
    }

    async fn submit_challenge(
        &self,
        request: &FetchRequest,
        submission: &ChallengeSubmission,
    ) -> Result<RawResponse, FetchError> {
        let client = self.client(&request.proxy, &submission.action).await?;
        let response = client
            .post(submission.action.clone())
            .headers(request.headers.clone())
            .header(reqwest::header::REFERER, request.url.as_str())
            .form(&submission.form_fields)
            .timeout(request.timeout)
            .send()
            .await?;
        into_raw(response).await
    }

    async fn shutdown(&self) {
        self.persist_sessions().await;
    }
}
