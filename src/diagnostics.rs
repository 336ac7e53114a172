//! Debug capture.
//!
//! When a query ends without records and at least one source failed, the
//! most recent raw page is written to a fixed path for offline inspection.
//! Each capture overwrites the previous one.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::scheduler::SourceOutcome;

#[derive(Debug, Clone)]
pub struct DebugCapture {
    path: PathBuf,
}

impl DebugCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `outcomes` represent an overall failure worth capturing.
    pub fn should_capture(outcomes: &[SourceOutcome]) -> bool {
        outcomes.iter().all(|outcome| outcome.records.is_empty())
            && outcomes.iter().any(|outcome| !outcome.status.is_clean())
    }

    /// Persist the page of the most recent attempt across all sources.
    /// Returns the written path, or `None` when nothing was captured.
    pub async fn capture(&self, outcomes: &[SourceOutcome]) -> std::io::Result<Option<PathBuf>> {
        if !Self::should_capture(outcomes) {
            return Ok(None);
        }
        let Some(outcome) = outcomes
            .iter()
            .filter(|outcome| outcome.last_response.is_some())
            .max_by_key(|outcome| outcome.last_attempt_at())
        else {
            log::debug!("no raw response to capture");
            return Ok(None);
        };
        let Some(response) = outcome.last_response.as_ref() else {
            return Ok(None);
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, response.body.as_bytes()).await?;
        log::info!(
            "saved last {} response ({} {}) to {}",
            outcome.source,
            response.status_code,
            response.url,
            self.path.display()
        );
        Ok(Some(self.path.clone()))
    }
}
