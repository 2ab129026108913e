use std::time::Duration;

use crate::error::RunnerError;

const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Re-analysis schedule for items whose analyzer answer came back empty.
///
/// Only `AnalyzeError::EmptyResponse` is retried; failed and aborted items
/// are final on the first answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    retries: u32,
    backoff: Duration,
    factor: f64,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    /// Two retries two seconds apart, i.e. three attempts per item.
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRIES, DEFAULT_BACKOFF)
    }
}

impl RetryPolicy {
    /// First answer is final.
    pub const fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
            factor: 1.0,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    pub const fn fixed(retries: u32, backoff: Duration) -> Self {
        Self {
            retries,
            backoff,
            factor: 1.0,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    /// Backoff grows by `factor` per retry. Factors below 1 or not finite
    /// keep it fixed.
    pub fn exponential(retries: u32, initial: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor >= 1.0 {
            factor
        } else {
            1.0
        };
        Self {
            factor,
            ..Self::fixed(retries, initial)
        }
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Reads `PORTFOLIO_RUNNER_RETRIES`, `PORTFOLIO_RUNNER_RETRY_BACKOFF_MS`
    /// and `PORTFOLIO_RUNNER_RETRY_FACTOR`; unset values keep the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RunnerError> {
        let defaults = Self::default();
        let retries = parse_var(&lookup, "PORTFOLIO_RUNNER_RETRIES")?.unwrap_or(defaults.retries);
        let backoff = parse_var::<u64>(&lookup, "PORTFOLIO_RUNNER_RETRY_BACKOFF_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff);
        let factor = parse_var(&lookup, "PORTFOLIO_RUNNER_RETRY_FACTOR")?.unwrap_or(defaults.factor);
        Ok(Self::exponential(retries, backoff, factor))
    }

    pub fn can_retry(&self, retries_done: u32) -> bool {
        retries_done < self.retries
    }

    /// Total number of calls an item may receive.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Wait before retry number `retries_done + 1`.
    pub fn backoff_duration(&self, retries_done: u32) -> Duration {
        let cap = self.max_backoff.as_millis() as f64;
        let scaled = self.backoff.as_millis() as f64 * self.factor.powi(retries_done as i32);
        if !scaled.is_finite() || scaled >= cap {
            return self.max_backoff;
        }
        Duration::from_millis(scaled.round() as u64)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, RunnerError> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| RunnerError::Validation(format!("invalid {key}: {raw:?}")))
        })
        .transpose()
}
