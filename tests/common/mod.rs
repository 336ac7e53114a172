#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use skiptracer_rs::{
    BackendChoice, BackendKind, FetchBackend, FetchError, FetchRequest, RawResponse, Settings,
    Source,
};

type Responder = dyn Fn(&FetchRequest) -> Result<RawResponse, FetchError> + Send + Sync;

/// One fetch as seen by the fake site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenFetch {
    pub source: Source,
    pub proxy: String,
    pub street: String,
    pub attempt: u32,
}

/// Backend answering from a closure instead of the network.
pub struct FakeSite {
    respond: Box<Responder>,
    latency: Box<dyn Fn(Source) -> Duration + Send + Sync>,
    seen: Mutex<Vec<SeenFetch>>,
}

impl FakeSite {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&FetchRequest) -> Result<RawResponse, FetchError> + Send + Sync + 'static,
    {
        Self::with_latency(respond, |_| Duration::ZERO)
    }

    pub fn with_latency<F, L>(respond: F, latency: L) -> Arc<Self>
    where
        F: Fn(&FetchRequest) -> Result<RawResponse, FetchError> + Send + Sync + 'static,
        L: Fn(Source) -> Duration + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            latency: Box::new(latency),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<SeenFetch> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchBackend for FakeSite {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
        self.seen.lock().unwrap().push(SeenFetch {
            source: request.source,
            proxy: request.proxy.identifier().to_string(),
            street: request.query.street().to_string(),
            attempt: request.attempt,
        });
        let latency = (self.latency)(request.source);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        (self.respond)(request)
    }
}

/// Wrap `inner` in a page long enough to clear the empty-shell check.
pub fn page(inner: &str) -> String {
    format!(
        "<html><head><title>Search results</title></head><body>{inner}<footer>{}</footer></body></html>",
        "<p>Public records directory. Information provided as is.</p>".repeat(12)
    )
}

pub fn tps_results() -> String {
    page(
        r#"<div class="card card-summary">
             <a href="/details?id=jds">John D Smith</a>
             <div class="content-address">Portland, IN</div>
             <span>(260) 555-1234</span> <span>260-555-1234</span>
           </div>"#,
    )
}

pub fn no_results() -> String {
    page(r#"<div id="divNoResults">We could not find any records for that search.</div>"#)
}

pub fn interstitial() -> String {
    page(
        r#"<title>Just a moment...</title>
           <form id="challenge-form" action="/cdn-cgi/challenge-platform/h/g/flow"></form>"#,
    )
}

pub fn ok(request: &FetchRequest, body: String) -> Result<RawResponse, FetchError> {
    Ok(RawResponse::html(request.url.clone(), body))
}

/// Settings for offline runs: no pacing, no backoff, files under `dir`.
pub fn offline_settings(dir: &Path) -> Settings {
    Settings {
        fast: true,
        backoff_base_ms: 0,
        backend: BackendChoice::Direct,
        proxy_failure_threshold: 10,
        debug_path: dir.join("logs/debug_last.html"),
        results_path: dir.join("results.json"),
        batch_output_path: dir.join("out.csv"),
        ..Settings::default()
    }
}
