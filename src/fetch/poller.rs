//! Remote task poller.
//!
//! A [`BatchTask`] moves through `Submitted -> Polling -> Done | Failed |
//! TimedOut`. [`TaskPoller::advance`] performs one transition; [`TaskPoller::wait`]
//! drives the machine with a fixed interval until it reaches a terminal state
//! or the wall-clock budget runs out.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::{Instant, timeout};

use crate::external_deps::remote_api::{RemoteApiError, RemotePage};
use crate::sources::Source;

/// Result of one status check.
#[derive(Debug, Clone)]
pub enum TaskPoll {
    Pending,
    Done(RemotePage),
    Failed(String),
}

/// Status endpoint of the remote provider.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn poll_task(&self, task_id: &str) -> Result<TaskPoll, RemoteApiError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Submitted,
    Polling { checks: u32 },
    Done(RemotePage),
    Failed(String),
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Done(_) | PollState::Failed(_) | PollState::TimedOut
        )
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollState::Submitted => f.write_str("submitted"),
            PollState::Polling { checks } => write!(f, "polling ({checks} checks)"),
            PollState::Done(_) => f.write_str("done"),
            PollState::Failed(_) => f.write_str("failed"),
            PollState::TimedOut => f.write_str("timed_out"),
        }
    }
}

/// A remote scrape job for one (query, source) pair.
#[derive(Debug, Clone)]
pub struct BatchTask {
    pub task_id: String,
    pub query_key: String,
    pub source: Source,
    pub submitted_at: DateTime<Utc>,
    pub state: PollState,
    started: Instant,
}

impl BatchTask {
    pub fn new(task_id: impl Into<String>, query_key: impl Into<String>, source: Source) -> Self {
        Self {
            task_id: task_id.into(),
            query_key: query_key.into(),
            source,
            submitted_at: Utc::now(),
            state: PollState::Submitted,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("remote task {task_id} failed: {reason}")]
    BatchTaskFailed { task_id: String, reason: String },
    #[error("remote task {task_id} still pending after {waited:?}")]
    TimedOut { task_id: String, waited: Duration },
}

pub struct TaskPoller {
    api: Arc<dyn TaskApi>,
    interval: Duration,
    budget: Duration,
}

impl TaskPoller {
    pub fn new(api: Arc<dyn TaskApi>, interval: Duration, budget: Duration) -> Self {
        Self {
            api,
            interval,
            budget,
        }
    }

    /// One transition. Provider errors while polling count as "still
    /// pending"; only the budget ends a task that never reports a status.
    pub async fn advance(&self, task: &mut BatchTask) {
        if task.state.is_terminal() {
            return;
        }
        // The budget covers polling, not time spent queued behind other rows.
        if task.state == PollState::Submitted {
            task.started = Instant::now();
        }
        let remaining = self.budget.saturating_sub(task.elapsed());
        if remaining.is_zero() {
            task.state = PollState::TimedOut;
            return;
        }

        let checks = match task.state {
            PollState::Polling { checks } => checks + 1,
            _ => 1,
        };

        // A status request that hangs must not outlive the budget.
        task.state = match timeout(remaining, self.api.poll_task(&task.task_id)).await {
            Err(_) => {
                log::warn!(
                    "status check of remote task {} outlived the {:?} budget",
                    task.task_id,
                    self.budget
                );
                PollState::TimedOut
            }
            Ok(Ok(TaskPoll::Done(page))) => PollState::Done(page),
            Ok(Ok(TaskPoll::Failed(reason))) => PollState::Failed(reason),
            Ok(Ok(TaskPoll::Pending)) => PollState::Polling { checks },
            Ok(Err(err)) => {
                log::warn!("poll of remote task {} failed: {err}", task.task_id);
                PollState::Polling { checks }
            }
        };
    }

    /// Drive `task` to a terminal state.
    pub async fn wait(&self, task: &mut BatchTask) -> Result<RemotePage, PollError> {
        loop {
            self.advance(task).await;
            match &task.state {
                PollState::Done(page) => {
                    log::debug!(
                        "remote task {} done after {:.1}s",
                        task.task_id,
                        task.elapsed().as_secs_f64()
                    );
                    return Ok(page.clone());
                }
                PollState::Failed(reason) => {
                    return Err(PollError::BatchTaskFailed {
                        task_id: task.task_id.clone(),
                        reason: reason.clone(),
                    });
                }
                PollState::TimedOut => {
                    return Err(PollError::TimedOut {
                        task_id: task.task_id.clone(),
                        waited: task.elapsed(),
                    });
                }
                PollState::Submitted | PollState::Polling { .. } => {}
            }

            let remaining = self.budget.saturating_sub(task.elapsed());
            tokio::time::sleep(self.interval.min(remaining)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct ScriptedApi {
        replies: Mutex<Vec<TaskPoll>>,
        calls: Mutex<u32>,
    }

    impl ScriptedApi {
        fn new(mut replies: Vec<TaskPoll>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl TaskApi for ScriptedApi {
        async fn poll_task(&self, _task_id: &str) -> Result<TaskPoll, RemoteApiError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.replies.lock().unwrap().pop().unwrap_or(TaskPoll::Pending))
        }
    }

    fn page() -> RemotePage {
        RemotePage {
            content: "<html></html>".into(),
            status_code: 200,
            url: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_done() {
        let api = ScriptedApi::new(vec![TaskPoll::Pending, TaskPoll::Pending, TaskPoll::Done(page())]);
        let poller = TaskPoller::new(api.clone(), Duration::from_secs(3), Duration::from_secs(60));
        let mut task = BatchTask::new("t-1", "709 w high st", Source::TruePeopleSearch);

        let result = poller.wait(&mut task).await.unwrap();
        assert_eq!(result, page());
        assert_eq!(*api.calls.lock().unwrap(), 3);
        assert!(matches!(task.state, PollState::Done(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tasks_surface_their_reason() {
        let api = ScriptedApi::new(vec![TaskPoll::Failed("blocked".into())]);
        let poller = TaskPoller::new(api, Duration::from_secs(3), Duration::from_secs(60));
        let mut task = BatchTask::new("t-2", "q", Source::FastPeopleSearch);

        let err = poller.wait(&mut task).await.unwrap_err();
        assert!(matches!(err, PollError::BatchTaskFailed { ref reason, .. } if reason == "blocked"));
    }

    #[tokio::test(start_paused = true)]
    async fn never_done_times_out_within_budget() {
        let api = ScriptedApi::new(Vec::new());
        let poller = TaskPoller::new(api.clone(), Duration::from_secs(3), Duration::from_secs(10));
        let mut task = BatchTask::new("t-3", "q", Source::TruePeopleSearch);

        let err = poller.wait(&mut task).await.unwrap_err();
        assert!(matches!(err, PollError::TimedOut { .. }));
        assert_eq!(task.state, PollState::TimedOut);
        // Checks at t = 0, 3, 6, 9; the budget is exhausted at t = 10.
        assert_eq!(*api.calls.lock().unwrap(), 4);
    }

    struct HangingApi;

    #[async_trait]
    impl TaskApi for HangingApi {
        async fn poll_task(&self, _task_id: &str) -> Result<TaskPoll, RemoteApiError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(TaskPoll::Pending)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_status_request_is_cut_at_the_budget() {
        let poller = TaskPoller::new(Arc::new(HangingApi), Duration::from_secs(3), Duration::from_secs(10));
        let mut task = BatchTask::new("t-4", "q", Source::TruePeopleSearch);

        let started = Instant::now();
        let err = poller.wait(&mut task).await.unwrap_err();
        assert!(matches!(err, PollError::TimedOut { .. }));
        assert_eq!(task.state, PollState::TimedOut);
        assert!(started.elapsed() <= Duration::from_secs(10));
    }
}
