//! Automated-browser backend.
//!
//! One Chromium instance per egress identity, launched lazily and reused for
//! every attempt through that identity. Each attempt opens a fresh tab,
//! navigates, waits for the source's ready selector, replays the source's
//! interaction steps and captures the rendered HTML. Tabs are always closed,
//! including on error paths.
//!
//! Requires the `browser` cargo feature.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Show the browser window instead of running headless.
    pub visible: bool,
    /// Shorten post-navigation waits.
    pub fast: bool,
    /// Root for per-identity profile directories (cookies survive runs).
    pub profile_root: Option<PathBuf>,
    pub settle_delay: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            visible: false,
            fast: false,
            profile_root: None,
            settle_delay: Duration::from_millis(1500),
        }
    }
}

impl BrowserOptions {
    fn settle(&self) -> Duration {
        if self.fast {
            self.settle_delay / 4
        } else {
            self.settle_delay
        }
    }
}

#[cfg(feature = "browser")]
pub use imp::BrowserBackend;

#[cfg(not(feature = "browser"))]
pub use disabled::BrowserBackend;

#[cfg(feature = "browser")]
mod imp {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chromiumoxide::Page;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;

    use super::BrowserOptions;
    use crate::fetch::session::profile_dir_name;
    use crate::fetch::{
        BackendKind, FetchBackend, FetchError, FetchRequest, InteractionStep, RawResponse,
    };
    use crate::modules::proxy::ProxyEndpoint;

    struct PooledBrowser {
        browser: Arc<Browser>,
        handler: JoinHandle<()>,
    }

    /// Closes the tab when dropped so error paths never leak pages.
    struct PageGuard {
        page: Option<Page>,
    }

    impl PageGuard {
        fn page(&self) -> Result<&Page, FetchError> {
            self.page
                .as_ref()
                .ok_or_else(|| FetchError::network("browser page already closed"))
        }

        async fn close(mut self) {
            if let Some(page) = self.page.take()
                && let Err(err) = page.close().await
            {
                log::debug!("closing browser page failed: {err}");
            }
        }
    }

    impl Drop for PageGuard {
        fn drop(&mut self) {
            if let Some(page) = self.page.take()
                && let Ok(runtime) = tokio::runtime::Handle::try_current()
            {
                runtime.spawn(async move {
                    let _ = page.close().await;
                });
            }
        }
    }

    pub struct BrowserBackend {
        options: BrowserOptions,
        pool: Mutex<HashMap<String, PooledBrowser>>,
    }

    impl BrowserBackend {
        pub fn new(options: BrowserOptions) -> Result<Self, FetchError> {
            Ok(Self {
                options,
                pool: Mutex::new(HashMap::new()),
            })
        }

        fn config_for(&self, proxy: &ProxyEndpoint) -> Result<BrowserConfig, FetchError> {
            let mut builder = BrowserConfig::builder().window_size(1366, 768).args([
                "--disable-blink-features=AutomationControlled",
                "--disable-dev-shm-usage",
                "--no-first-run",
                "--no-default-browser-check",
            ]);
            if self.options.visible {
                builder = builder.with_head();
            }
            if let Some(spec) = proxy.connection_spec() {
                if spec.contains('@') {
                    log::warn!("browser cannot authenticate to {proxy}; credentials ignored");
                }
                builder = builder.arg(format!("--proxy-server={}", proxy.identifier()));
            }
            if let Some(root) = &self.options.profile_root {
                builder = builder.user_data_dir(root.join(profile_dir_name(proxy.identifier())));
            }
            builder
                .build()
                .map_err(|err| FetchError::network(format!("browser config: {err}")))
        }

        async fn browser(&self, proxy: &ProxyEndpoint) -> Result<Arc<Browser>, FetchError> {
            let mut guard = self.pool.lock().await;
            if let Some(pooled) = guard.get(proxy.identifier()) {
                return Ok(pooled.browser.clone());
            }

            let (browser, mut handler) = Browser::launch(self.config_for(proxy)?)
                .await
                .map_err(|err| FetchError::network(format!("browser launch failed: {err}")))?;
            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(err) = event {
                        log::trace!("cdp handler: {err}");
                    }
                }
            });
            log::debug!("launched browser for {proxy}");

            let browser = Arc::new(browser);
            guard.insert(
                proxy.identifier().to_string(),
                PooledBrowser {
                    browser: browser.clone(),
                    handler,
                },
            );
            Ok(browser)
        }

        async fn render(&self, page: &Page, request: &FetchRequest) -> Result<String, FetchError> {
            let adapter = request.source.adapter();
            if let Some(agent) = request
                .headers
                .get(http::header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
            {
                page.set_user_agent(agent)
                    .await
                    .map_err(|err| FetchError::network(format!("set user agent: {err}")))?;
            }

            page.goto(request.url.as_str())
                .await
                .map_err(|err| FetchError::network(format!("navigation failed: {err}")))?;

            // The ready selector may never appear on blocked pages; the
            // block handler decides what the captured HTML means.
            if page.find_element(adapter.ready_selector()).await.is_err() {
                log::debug!(
                    "{}: ready selector `{}` not found",
                    request.source,
                    adapter.ready_selector()
                );
            }
            tokio::time::sleep(self.options.settle()).await;

            for step in adapter.interaction_steps() {
                match step {
                    InteractionStep::Scroll { y } => {
                        let _ = page.evaluate(format!("window.scrollTo(0, {y})")).await;
                    }
                    InteractionStep::Click { selector } => {
                        if let Ok(element) = page.find_element(selector.as_str()).await {
                            let _ = element.click().await;
                        }
                    }
                    InteractionStep::Wait { millis } => {
                        let wait = Duration::from_millis(millis);
                        let wait = if self.options.fast { wait / 4 } else { wait };
                        tokio::time::sleep(wait).await;
                    }
                }
            }

            page.content()
                .await
                .map_err(|err| FetchError::network(format!("capture failed: {err}")))
        }
    }

    #[async_trait]
    impl FetchBackend for BrowserBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Browser
        }

        async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
            let browser = self.browser(&request.proxy).await?;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|err| FetchError::network(format!("new page failed: {err}")))?;
            let guard = PageGuard { page: Some(page) };

            let rendered =
                tokio::time::timeout(request.timeout, self.render(guard.page()?, request)).await;
            guard.close().await;

            match rendered {
                Ok(Ok(body)) => Ok(RawResponse::html(request.url.clone(), body)),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(FetchError::timeout(format!(
                    "{} did not render within {:?}",
                    request.url, request.timeout
                ))),
            }
        }

        async fn shutdown(&self) {
            let mut guard = self.pool.lock().await;
            for (identity, pooled) in guard.drain() {
                match Arc::try_unwrap(pooled.browser) {
                    Ok(mut browser) => {
                        if let Err(err) = browser.close().await {
                            log::debug!("closing browser for {identity} failed: {err}");
                        }
                        let _ = browser.wait().await;
                    }
                    Err(_) => log::debug!("browser for {identity} still in use at shutdown"),
                }
                pooled.handler.abort();
            }
        }
    }
}

#[cfg(not(feature = "browser"))]
mod disabled {
    use async_trait::async_trait;

    use super::BrowserOptions;
    use crate::fetch::{BackendKind, FetchBackend, FetchError, FetchRequest, RawResponse};

    /// Placeholder used when the crate is built without the `browser`
    /// feature; construction always fails.
    pub struct BrowserBackend {
        _options: BrowserOptions,
    }

    impl BrowserBackend {
        pub fn new(options: BrowserOptions) -> Result<Self, FetchError> {
            let _ = options;
            Err(FetchError::network(
                "browser backend unavailable: rebuild with `--features browser`",
            ))
        }
    }

    #[async_trait]
    impl FetchBackend for BrowserBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Browser
        }

        async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
            Err(FetchError::network(format!(
                "browser backend unavailable for {}",
                request.url
            )))
        }
    }
}
