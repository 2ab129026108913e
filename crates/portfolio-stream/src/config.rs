use std::time::Duration;

use crate::decoder::DEFAULT_MAX_RECORD_BYTES;
use crate::errors::ClientError;
use crate::supervisor::{BATCH_CALL_BUDGET, GENERIC_CALL_BUDGET};

const DEFAULT_BASE_URL: &str = "http://localhost:7777";

/// Configuration for `AnalysisClient`.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the job runner API.
    pub base_url: String,
    /// TCP connect timeout. Responses themselves are bounded by the budgets below.
    pub connect_timeout: Duration,
    /// Budget for single-company calls.
    pub call_budget: Duration,
    /// Budget for non-streaming batch calls.
    pub batch_budget: Duration,
    /// Optional maximum silence between stream events.
    pub idle_timeout: Option<Duration>,
    /// Bounded event buffer between the stream task and the consumer.
    pub stream_buffer_capacity: usize,
    /// Largest undelimited record the decoder will buffer.
    pub max_record_bytes: usize,
    /// How long fetched company lists stay fresh.
    pub company_cache_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ClientConfig {
    /// Creates a config with default budgets for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
            call_budget: GENERIC_CALL_BUDGET,
            batch_budget: BATCH_CALL_BUDGET,
            idle_timeout: None,
            stream_buffer_capacity: 128,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            company_cache_ttl: Duration::from_secs(60 * 60),
        }
    }

    /// Builds a config from `PORTFOLIO_*` environment variables.
    ///
    /// - `PORTFOLIO_API_BASE_URL` (default `http://localhost:7777`)
    /// - `PORTFOLIO_CALL_TIMEOUT_SECS`
    /// - `PORTFOLIO_BATCH_TIMEOUT_SECS`
    /// - `PORTFOLIO_IDLE_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Self::new(
            read("PORTFOLIO_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        );
        if let Some(secs) = read("PORTFOLIO_CALL_TIMEOUT_SECS") {
            config.call_budget = parse_secs("PORTFOLIO_CALL_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = read("PORTFOLIO_BATCH_TIMEOUT_SECS") {
            config.batch_budget = parse_secs("PORTFOLIO_BATCH_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = read("PORTFOLIO_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Some(parse_secs("PORTFOLIO_IDLE_TIMEOUT_SECS", &secs)?);
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn call_budget(mut self, budget: Duration) -> Self {
        self.call_budget = budget;
        self
    }

    pub fn batch_budget(mut self, budget: Duration) -> Self {
        self.batch_budget = budget;
        self
    }

    pub fn idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = Some(idle);
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub fn max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = max;
        self
    }

    pub fn company_cache_ttl(mut self, ttl: Duration) -> Self {
        self.company_cache_ttl = ttl;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "base_url must start with http:// or https://, got {url:?}"
            )));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(ClientError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.max_record_bytes == 0 {
            return Err(ClientError::Config(
                "max_record_bytes must be greater than 0".into(),
            ));
        }
        for (name, budget) in [
            ("call_budget", self.call_budget),
            ("batch_budget", self.batch_budget),
        ] {
            if budget.is_zero() {
                return Err(ClientError::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ClientError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| ClientError::Config(format!("{key} must be a positive integer, got {value:?}")))
}
