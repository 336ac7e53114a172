//! Remote scraping-API backend.
//!
//! Attempts either consume a task that was queued ahead of time through
//! [`FetchBackend::prepare_batch`] or fall back to a realtime render.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use tokio::sync::Mutex;
use url::Url;

use super::poller::{BatchTask, PollError, TaskPoller};
use super::{BackendKind, FetchBackend, FetchError, FetchRequest, PlannedFetch, RawResponse};
use crate::external_deps::remote_api::{RemoteApiClient, RemoteApiError, RemotePage};
use crate::sources::Source;

type TaskKey = (String, Source);

pub struct RemoteTaskBackend {
    client: Arc<RemoteApiClient>,
    poller: TaskPoller,
    queued: Mutex<HashMap<TaskKey, BatchTask>>,
}

impl RemoteTaskBackend {
    pub fn new(client: Arc<RemoteApiClient>, poll_interval: Duration, poll_budget: Duration) -> Self {
        let poller = TaskPoller::new(client.clone(), poll_interval, poll_budget);
        Self {
            client,
            poller,
            queued: Mutex::new(HashMap::new()),
        }
    }

    pub async fn queued_tasks(&self) -> usize {
        self.queued.lock().await.len()
    }

    async fn take_queued(&self, request: &FetchRequest) -> Option<BatchTask> {
        self.queued
            .lock()
            .await
            .remove(&(request.query.key(), request.source))
    }
}

fn page_to_raw(page: RemotePage, requested: &Url) -> Result<RawResponse, FetchError> {
    let url = page
        .url
        .as_deref()
        .and_then(|raw| Url::parse(raw).ok())
        .unwrap_or_else(|| requested.clone());
    let raw = RawResponse::new(url, page.status_code, HeaderMap::new(), page.content);
    if raw.is_success() {
        Ok(raw)
    } else {
        Err(FetchError::http_status(raw))
    }
}

impl From<RemoteApiError> for FetchError {
    fn from(err: RemoteApiError) -> Self {
        match err {
            err if err.is_timeout() => FetchError::timeout(err.to_string()),
            RemoteApiError::Status { status, body } => FetchError {
                kind: super::FetchErrorKind::HttpStatus(status),
                message: format!("remote api: {body}"),
                response: None,
            },
            other => FetchError::network(other.to_string()),
        }
    }
}

impl From<PollError> for FetchError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::TimedOut { .. } => FetchError::timeout(err.to_string()),
            PollError::BatchTaskFailed { .. } => FetchError::network(err.to_string()),
        }
    }
}

#[async_trait]
impl FetchBackend for RemoteTaskBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteTask
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
        if let Some(mut task) = self.take_queued(request).await {
            log::debug!(
                "{}: polling queued remote task {} for {}",
                request.source,
                task.task_id,
                request.query.raw_address()
            );
            let page = self.poller.wait(&mut task).await?;
            return page_to_raw(page, &request.url);
        }

        let spec = self.client.spec_for(
            &request.url,
            Some(request.session_id()),
            request.source.adapter().interaction_steps(),
            &request.headers,
        );
        let page = self.client.scrape(&spec, request.timeout).await?;
        page_to_raw(page, &request.url)
    }

    async fn prepare_batch(&self, planned: &[PlannedFetch]) -> Result<(), FetchError> {
        if planned.is_empty() {
            return Ok(());
        }
        let specs: Vec<_> = planned
            .iter()
            .map(|plan| {
                self.client.spec_for(
                    &plan.url,
                    None,
                    plan.source.adapter().interaction_steps(),
                    &HeaderMap::new(),
                )
            })
            .collect();

        let ids = self.client.submit_batch(&specs).await?;
        if ids.len() != planned.len() {
            log::warn!(
                "remote api queued {} of {} tasks; the rest fall back to realtime",
                ids.len(),
                planned.len()
            );
        }

        let mut queued = self.queued.lock().await;
        for (plan, id) in planned.iter().zip(ids) {
            let key = plan.query.key();
            queued.insert((key.clone(), plan.source), BatchTask::new(id, key, plan.source));
        }
        log::info!("queued {} remote tasks", queued.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_deps::remote_api::{RemoteApiConfig, RemoteAuth};
    use crate::fetch::FetchErrorKind;
    use crate::modules::proxy::ProxyEndpoint;
    use crate::query::SearchQuery;

    fn backend(prefix: &str, budget: Duration) -> RemoteTaskBackend {
        let base = Url::parse(&format!("{}/{prefix}/", mockito::server_url())).unwrap();
        let client = RemoteApiClient::new(RemoteApiConfig::new(
            base,
            RemoteAuth::Token("secret".into()),
        ))
        .unwrap();
        RemoteTaskBackend::new(Arc::new(client), Duration::from_millis(10), budget)
    }

    fn request(address: &str) -> FetchRequest {
        let query = SearchQuery::parse(address).unwrap();
        FetchRequest {
            url: Source::TruePeopleSearch.search_url(&query).unwrap(),
            query,
            source: Source::TruePeopleSearch,
            proxy: ProxyEndpoint::direct(),
            headers: HeaderMap::new(),
            timeout: Duration::from_secs(5),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn realtime_render_becomes_raw_response() {
        let _m = mockito::mock("POST", "/rt/scrape")
            .match_header("authorization", "Bearer secret")
            .with_body(r#"{"results":[{"content":"<html>ok</html>","status_code":200}]}"#)
            .create();
        let raw = backend("rt", Duration::from_secs(1))
            .fetch(&request("709 W High St, Portland, IN"))
            .await
            .unwrap();
        assert_eq!(raw.body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn rendered_error_status_is_an_http_failure() {
        let _m = mockito::mock("POST", "/st/scrape")
            .with_body(r#"{"results":[{"content":"denied","status_code":403}]}"#)
            .create();
        let err = backend("st", Duration::from_secs(1))
            .fetch(&request("709 W High St, Portland, IN"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::HttpStatus(403));
        assert_eq!(err.response.unwrap().body, "denied");
    }

    #[tokio::test]
    async fn queued_task_that_never_finishes_is_a_timeout() {
        let _batch = mockito::mock("POST", "/bt/task/batch")
            .with_body(r#"{"queries":[{"id":"task-9"}]}"#)
            .create();
        let _poll = mockito::mock("GET", "/bt/task/task-9/results")
            .with_body(r#"{"status":"pending"}"#)
            .expect_at_least(1)
            .create();

        let backend = backend("bt", Duration::from_millis(50));
        let req = request("709 W High St, Portland, IN");
        backend
            .prepare_batch(&[PlannedFetch {
                query: req.query.clone(),
                source: req.source,
                url: req.url.clone(),
            }])
            .await
            .unwrap();
        assert_eq!(backend.queued_tasks().await, 1);

        let err = backend.fetch(&req).await.unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Timeout);
        assert_eq!(backend.queued_tasks().await, 0);
    }
}
