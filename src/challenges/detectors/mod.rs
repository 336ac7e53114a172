//! Block detection module.
//!
//! Provides signature-based identification of anti-bot interstitials
//! (Cloudflare, PerimeterX, DataDome, CAPTCHA walls) and empty-shell pages.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::fetch::RawResponse;

/// High level block categories supported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Interstitial,
    Turnstile,
    Recaptcha,
    Hcaptcha,
    PressAndHold,
    DataDome,
    AccessDenied,
    RateLimit,
    EmptyShell,
}

impl BlockKind {
    /// CAPTCHA family a solver could answer, if any.
    pub fn captcha(&self) -> Option<CaptchaKind> {
        match self {
            BlockKind::Turnstile => Some(CaptchaKind::Turnstile),
            BlockKind::Recaptcha => Some(CaptchaKind::RecaptchaV2),
            BlockKind::Hcaptcha => Some(CaptchaKind::Hcaptcha),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptchaKind {
    RecaptchaV2,
    Hcaptcha,
    Turnstile,
}

impl CaptchaKind {
    /// Form field the site expects the solved token in.
    pub fn response_field(&self) -> &'static str {
        match self {
            CaptchaKind::RecaptchaV2 => "g-recaptcha-response",
            CaptchaKind::Hcaptcha => "h-captcha-response",
            CaptchaKind::Turnstile => "cf-turnstile-response",
        }
    }
}

/// Signature used to match responses against known block pages.
#[derive(Debug, Clone)]
struct BlockSignature {
    id: &'static str,
    kind: BlockKind,
    base_confidence: f32,
    patterns: Vec<Regex>,
}

impl BlockSignature {
    fn new(id: &'static str, kind: BlockKind, base_confidence: f32, raw_patterns: &[&str]) -> Self {
        Self {
            id,
            kind,
            base_confidence,
            patterns: raw_patterns.iter().map(|pattern| build_regex(pattern)).collect(),
        }
    }
}

/// Signatures are ordered so solvable CAPTCHA kinds win ties against the
/// generic interstitial markers that usually surround them.
static KNOWN_SIGNATURES: Lazy<Vec<BlockSignature>> = Lazy::new(|| {
    vec![
        BlockSignature::new(
            "cf_turnstile",
            BlockKind::Turnstile,
            0.98,
            &[
                r#"class="cf-turnstile""#,
                r#"challenges\.cloudflare\.com/turnstile"#,
                r"cf-turnstile-response",
            ],
        ),
        BlockSignature::new(
            "recaptcha",
            BlockKind::Recaptcha,
            0.95,
            &[
                r#"class="g-recaptcha""#,
                r"www\.google\.com/recaptcha/api\.js",
                r"g-recaptcha-response",
            ],
        ),
        BlockSignature::new(
            "hcaptcha",
            BlockKind::Hcaptcha,
            0.95,
            &[r#"class="h-captcha""#, r"hcaptcha\.com/1/api\.js", r"h-captcha-response"],
        ),
        BlockSignature::new(
            "px_press_hold",
            BlockKind::PressAndHold,
            0.97,
            // Challenge widget only: sensor scripts also load on ordinary pages.
            &[r"px-captcha", r"Press\s*&(?:amp;)?\s*Hold"],
        ),
        BlockSignature::new(
            "datadome",
            BlockKind::DataDome,
            0.97,
            &[r"captcha-delivery\.com", r"geo\.captcha-delivery"],
        ),
        BlockSignature::new(
            "cf_interstitial",
            BlockKind::Interstitial,
            0.95,
            &[
                r"<title>\s*Just a moment\.\.\.\s*</title>",
                r"/cdn-cgi/challenge-platform/",
                r"window\._cf_chl_opt\s*=",
                r#"id="challenge-form""#,
            ],
        ),
        BlockSignature::new(
            "verify_human",
            BlockKind::Interstitial,
            0.90,
            &[
                r"verify (?:that )?you are (?:a )?human",
                r"are you a robot",
                r"unusual traffic from your (?:computer|network)",
                r"checking your browser before accessing",
            ],
        ),
        BlockSignature::new(
            "rate_limit",
            BlockKind::RateLimit,
            0.95,
            &[
                r#"<span[^>]*class="cf-error-code">1015<"#,
                r"You are being rate limited",
                r"Too Many Requests",
            ],
        ),
        BlockSignature::new(
            "access_denied",
            BlockKind::AccessDenied,
            0.95,
            &[
                r#"<span[^>]*class="cf-error-code">10(?:10|20)<"#,
                r"<title>\s*Access Denied\s*</title>",
                r"You don't have permission to access",
                r"has banned your access",
            ],
        ),
    ]
});

static SITE_KEY_RE: Lazy<Regex> = Lazy::new(|| build_regex(r#"data-sitekey\s*=\s*["']([^"']+)["']"#));

/// Detection output returned to the block handler.
#[derive(Debug, Clone)]
pub struct BlockDetection {
    pub signature_id: &'static str,
    pub kind: BlockKind,
    pub confidence: f32,
    pub status_code: u16,
    pub url: String,
    pub matched_indicators: Vec<String>,
    pub site_key: Option<String>,
}

/// Signature-based block detector.
#[derive(Debug, Clone)]
pub struct BlockDetector {
    min_body_bytes: usize,
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new(512)
    }
}

impl BlockDetector {
    pub fn new(min_body_bytes: usize) -> Self {
        Self { min_body_bytes }
    }

    /// Classify a response. `None` means the page looks like real content.
    pub fn detect(&self, response: &RawResponse) -> Option<BlockDetection> {
        let mut best: Option<BlockDetection> = None;

        for signature in KNOWN_SIGNATURES.iter() {
            if let Some((confidence, matched)) = evaluate(signature, response)
                && best
                    .as_ref()
                    .is_none_or(|current| confidence > current.confidence)
            {
                best = Some(BlockDetection {
                    signature_id: signature.id,
                    kind: signature.kind,
                    confidence,
                    status_code: response.status_code,
                    url: response.url.to_string(),
                    matched_indicators: matched,
                    site_key: None,
                });
            }
        }

        if best.is_none() && response.body.trim().len() < self.min_body_bytes {
            best = Some(BlockDetection {
                signature_id: "empty_shell",
                kind: BlockKind::EmptyShell,
                confidence: 0.6,
                status_code: response.status_code,
                url: response.url.to_string(),
                matched_indicators: vec![format!(
                    "body {} bytes < {}",
                    response.body.trim().len(),
                    self.min_body_bytes
                )],
                site_key: None,
            });
        }

        best.map(|mut detection| {
            if detection.kind.captcha().is_some() {
                detection.site_key = SITE_KEY_RE
                    .captures(&response.body)
                    .and_then(|caps| caps.get(1))
                    .map(|key| key.as_str().to_string());
            }
            detection
        })
    }
}

fn evaluate(signature: &BlockSignature, response: &RawResponse) -> Option<(f32, Vec<String>)> {
    let matches: Vec<_> = signature
        .patterns
        .iter()
        .filter(|regex| regex.is_match(&response.body))
        .map(|regex| regex.as_str().to_string())
        .collect();

    if matches.is_empty() {
        return None;
    }

    let ratio = matches.len() as f32 / signature.patterns.len() as f32;
    let mut confidence = signature.base_confidence * (0.6 + 0.4 * ratio);
    if matches!(response.status_code, 403 | 429 | 503) {
        confidence += 0.1;
    }

    Some((confidence.min(1.0), matches))
}

fn build_regex(pattern: &str) -> Regex {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid block detection regex `{}`: {}", pattern, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use url::Url;

    fn response(body: &str, status: u16) -> RawResponse {
        RawResponse::new(
            Url::parse("https://www.truepeoplesearch.com/resultaddress").unwrap(),
            status,
            HeaderMap::new(),
            body,
        )
    }

    fn padded(body: &str) -> String {
        format!("{body}{}", "<p>filler</p>".repeat(80))
    }

    #[test]
    fn detects_turnstile_with_site_key() {
        let html = padded(
            r#"
			<html><head><title>Just a moment...</title></head>
			<body>
				<div class="cf-turnstile" data-sitekey="0x4AAAAAAADnPIDROrmt1Wwj"></div>
				<script src="https://challenges.cloudflare.com/turnstile/v0/api.js"></script>
			</body>
			</html>
		"#,
        );

        let detection = BlockDetector::default()
            .detect(&response(&html, 403))
            .expect("should detect");
        assert_eq!(detection.kind, BlockKind::Turnstile);
        assert_eq!(detection.kind.captcha(), Some(CaptchaKind::Turnstile));
        assert_eq!(detection.site_key.as_deref(), Some("0x4AAAAAAADnPIDROrmt1Wwj"));
    }

    #[test]
    fn detects_press_and_hold() {
        let html = padded(r#"<div id="px-captcha"></div><p>Press &amp; Hold to confirm</p>"#);
        let detection = BlockDetector::default().detect(&response(&html, 200)).unwrap();
        assert_eq!(detection.kind, BlockKind::PressAndHold);
        assert!(detection.kind.captcha().is_none());
    }

    #[test]
    fn tiny_pages_are_empty_shells() {
        let detection = BlockDetector::new(512)
            .detect(&response("<html><body></body></html>", 200))
            .unwrap();
        assert_eq!(detection.kind, BlockKind::EmptyShell);
    }

    #[test]
    fn bot_sensor_snippets_on_results_pages_are_not_blocks() {
        let html = padded(
            r#"<html><head>
                <script>window._pxAppId = 'PXabc123';</script>
                <script src="https://client.perimeterx.net/PXabc123/main.min.js"></script>
                <script src="https://js.datadome.co/tags.js"></script>
              </head><body>
                <div class="card card-summary">
                  <a href="/details?id=1">John D Smith</a>
                  <div class="content-address">Portland, IN</div>
                  <span>(260) 555-1234</span>
                </div>
              </body></html>"#,
        );
        let page = response(&html, 200);
        assert!(BlockDetector::default().detect(&page).is_none());

        let records = crate::sources::Source::TruePeopleSearch.parse(&page).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name(), "John D Smith");
    }

    #[test]
    fn datadome_challenge_is_still_detected() {
        let html = padded(r#"<iframe src="https://geo.captcha-delivery.com/captcha/?initialCid=x"></iframe>"#);
        let detection = BlockDetector::default().detect(&response(&html, 403)).unwrap();
        assert_eq!(detection.kind, BlockKind::DataDome);
    }

    #[test]
    fn real_results_pass_through() {
        let html = padded(
            r#"<div class="card card-summary"><a href="/details?id=1">John Smith</a></div>"#,
        );
        assert!(BlockDetector::default().detect(&response(&html, 200)).is_none());
    }
}
