//! Reference job runner for the portfolio analysis protocol.
//!
//! Serves the streaming, batch, single-company and company-list endpoints
//! over axum. The per-ticker work is delegated to an [`Analyzer`].

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;

/// Analyzer contract and the dry-run analyzer.
pub mod analyzer;
/// Company lists served by the runner.
pub mod directory;
/// Request-level error type.
pub mod error;
/// Job execution and event encoding.
pub mod job;
/// Retry policy for empty analyzer responses.
pub mod retry;
mod routes;

pub use analyzer::{AnalysisWindow, AnalyzeError, Analyzer, QueryEchoAnalyzer};
pub use directory::CompanyDirectory;
pub use error::RunnerError;
pub use job::{BatchJob, analyze_item, encode_event, new_request_id};
pub use retry::RetryPolicy;

/// Runner-wide settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub retry: RetryPolicy,
    /// Reported by `GET /health`.
    pub version: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl RunnerConfig {
    /// Defaults with the retry policy read from `PORTFOLIO_RUNNER_RETRY*`.
    pub fn from_env() -> Result<Self, RunnerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RunnerError> {
        Ok(Self {
            retry: RetryPolicy::from_lookup(lookup)?,
            ..Self::default()
        })
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct RunnerState {
    pub analyzer: Arc<dyn Analyzer>,
    pub directory: Arc<CompanyDirectory>,
    pub config: RunnerConfig,
}

impl RunnerState {
    pub fn new(analyzer: Arc<dyn Analyzer>, directory: CompanyDirectory) -> Self {
        Self {
            analyzer,
            directory: Arc::new(directory),
            config: RunnerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }
}

/// Builds the runner's router.
pub fn router(state: RunnerState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/portfolio/analyze-stream", post(routes::analyze_stream))
        .route("/portfolio/analyze", post(routes::analyze_batch))
        .route("/portfolio/analyze-single", post(routes::analyze_single))
        .route("/companies/{category}", get(routes::company_list))
        .with_state(state)
}

/// Serves the runner on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: RunnerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "job runner listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
