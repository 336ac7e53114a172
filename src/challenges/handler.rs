//! CAPTCHA / block handler.
//!
//! Runs on every raw response before parsing. A blocked page must never be
//! handed to a parser, where it would look like a zero-result success.

use std::sync::Arc;

use scraper::{Html, Selector};
use url::Url;

use super::detectors::{BlockDetection, BlockDetector, CaptchaKind};
use crate::external_deps::captcha::{CaptchaProvider, CaptchaTask};
use crate::fetch::{ChallengeSubmission, FetchBackend, FetchRequest, RawResponse};

/// Classification of one response.
#[derive(Debug, Clone)]
pub enum BlockVerdict {
    Clear(RawResponse),
    Blocked {
        response: RawResponse,
        detection: BlockDetection,
    },
}

impl BlockVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, BlockVerdict::Blocked { .. })
    }

    pub fn response(&self) -> &RawResponse {
        match self {
            BlockVerdict::Clear(response) => response,
            BlockVerdict::Blocked { response, .. } => response,
        }
    }
}

pub struct BlockHandler {
    detector: BlockDetector,
    captcha: Option<Arc<dyn CaptchaProvider>>,
}

impl BlockHandler {
    pub fn new(detector: BlockDetector) -> Self {
        Self {
            detector,
            captcha: None,
        }
    }

    pub fn with_captcha_provider(mut self, provider: Arc<dyn CaptchaProvider>) -> Self {
        self.captcha = Some(provider);
        self
    }

    /// Classify `response`; at most one solve-and-resubmit cycle is tried for
    /// solvable CAPTCHA pages.
    pub async fn inspect(
        &self,
        backend: &dyn FetchBackend,
        request: &FetchRequest,
        response: RawResponse,
    ) -> BlockVerdict {
        let Some(detection) = self.detector.detect(&response) else {
            return BlockVerdict::Clear(response);
        };

        log::debug!(
            "{}: {} matched ({:.2}) on {}",
            request.source,
            detection.signature_id,
            detection.confidence,
            detection.url
        );

        if let Some(resubmitted) = self.try_solve(backend, request, &response, &detection).await {
            match self.detector.detect(&resubmitted) {
                None => {
                    log::info!("{}: captcha solved, page unblocked", request.source);
                    return BlockVerdict::Clear(resubmitted);
                }
                Some(still) => {
                    log::warn!(
                        "{}: still blocked after captcha resubmit ({})",
                        request.source,
                        still.signature_id
                    );
                    return blocked(resubmitted, still);
                }
            }
        }

        blocked(response, detection)
    }

    async fn try_solve(
        &self,
        backend: &dyn FetchBackend,
        request: &FetchRequest,
        response: &RawResponse,
        detection: &BlockDetection,
    ) -> Option<RawResponse> {
        let provider = self.captcha.as_ref()?;
        let kind = detection.kind.captcha()?;
        let site_key = detection.site_key.as_deref()?;
        if !backend.supports_challenge_submission() {
            log::debug!(
                "{} backend cannot resubmit a solved captcha; skipping solve",
                backend.kind()
            );
            return None;
        }

        let task = CaptchaTask::new(kind, site_key, response.url.clone());
        let solution = match provider.solve(&task).await {
            Ok(solution) => solution,
            Err(err) => {
                log::warn!("{} could not solve {:?}: {err}", provider.name(), kind);
                return None;
            }
        };

        let submission = build_submission(response, kind, &solution.token);
        match backend.submit_challenge(request, &submission).await {
            Ok(page) => Some(page),
            Err(err) => {
                log::warn!("captcha resubmit to {} failed: {err}", submission.action);
                err.response.map(|page| *page)
            }
        }
    }
}

fn blocked(response: RawResponse, detection: BlockDetection) -> BlockVerdict {
    BlockVerdict::Blocked {
        response: response.mark_blocked(),
        detection,
    }
}

/// Replays the challenge form: hidden inputs plus the solved token, posted
/// to the form's action (or the page itself when there is no form).
fn build_submission(response: &RawResponse, kind: CaptchaKind, token: &str) -> ChallengeSubmission {
    let document = Html::parse_document(&response.body);
    let mut action = response.url.clone();
    let mut form_fields = Vec::new();

    if let (Ok(form_selector), Ok(hidden_selector)) = (
        Selector::parse("form"),
        Selector::parse("input[type=\"hidden\"][name]"),
    ) {
        let form = document
            .select(&form_selector)
            .find(|form| form.html().to_ascii_lowercase().contains("captcha"))
            .or_else(|| document.select(&form_selector).next());

        if let Some(form) = form {
            if let Some(target) = form
                .value()
                .attr("action")
                .and_then(|raw| resolve(&response.url, raw))
            {
                action = target;
            }
            for input in form.select(&hidden_selector) {
                let Some(name) = input.value().attr("name") else {
                    continue;
                };
                if name == kind.response_field() {
                    continue;
                }
                form_fields.push((
                    name.to_string(),
                    input.value().attr("value").unwrap_or_default().to_string(),
                ));
            }
        }
    }

    form_fields.push((kind.response_field().to_string(), token.to_string()));
    ChallengeSubmission {
        action,
        form_fields,
    }
}

fn resolve(base: &Url, raw: &str) -> Option<Url> {
    if raw.trim().is_empty() {
        return None;
    }
    base.join(raw).ok()
}
