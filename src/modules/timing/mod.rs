//! Delay utilities.
//!
//! [`DelayStrategy`] computes feedback-driven backoff between retries of one
//! source; [`Pacing`] inserts a randomized, human-looking pause before each
//! attempt so requests do not arrive in machine-regular bursts.

use std::cmp::Ordering;
use std::time::Duration;

use rand::Rng;

/// Feedback emitted after an attempt.
#[derive(Debug, Clone, Copy)]
pub enum TimingFeedback {
    Success,
    Failure,
    RateLimited,
}

/// Backoff applied before retrying after an HTTP status failure.
#[derive(Debug, Clone)]
pub struct DelayStrategy {
    base_delay_ms: u64,
    min_delay_ms: u64,
    max_delay_ms: u64,
    variance_pct: f64,
    recent_failures: u32,
}

impl DelayStrategy {
    pub fn new(base_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            min_delay_ms: base_delay_ms / 2,
            max_delay_ms: base_delay_ms * 8,
            variance_pct: 0.25,
            recent_failures: 0,
        }
    }

    pub fn register_feedback(&mut self, feedback: TimingFeedback) {
        match feedback {
            TimingFeedback::Success => {
                self.recent_failures = self.recent_failures.saturating_sub(1);
            }
            TimingFeedback::Failure => {
                self.recent_failures = self.recent_failures.saturating_add(1);
            }
            TimingFeedback::RateLimited => {
                self.recent_failures = self.recent_failures.saturating_add(2);
            }
        }
    }

    pub fn next_delay(&self) -> Duration {
        let mut delay = self.base_delay_ms as f64;

        match self.recent_failures.cmp(&2) {
            Ordering::Less => {}
            Ordering::Equal => delay *= 2.0,
            Ordering::Greater => delay *= 4.0,
        }

        let variance = delay * self.variance_pct;
        let jitter = rand::random::<f64>() * variance - (variance / 2.0);
        delay = (delay + jitter).clamp(self.min_delay_ms as f64, self.max_delay_ms as f64);
        Duration::from_millis(delay.max(0.0) as u64)
    }
}

/// Randomized pause before each attempt.
#[derive(Debug, Clone)]
pub struct Pacing {
    min: Duration,
    max: Duration,
    enabled: bool,
}

impl Pacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn next_pause(&self) -> Duration {
        if !self.enabled || self.max.is_zero() {
            return Duration::ZERO;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    pub async fn pause(&self) {
        let pause = self.next_pause();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}
