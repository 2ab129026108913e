use serde_json::{Value, json};

/// Date parameters forwarded to the analyzer for every item of a job.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnalysisWindow {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Single-day form used when no range is given.
    pub analysis_date: Option<String>,
}

impl AnalysisWindow {
    /// Prompt-style description of the work for one ticker.
    ///
    /// A full range wins over `analysis_date`; with neither the analysis is
    /// for today.
    pub fn query(&self, symbol: &str) -> String {
        match (&self.start_date, &self.end_date, &self.analysis_date) {
            (Some(start), Some(end), _) => format!("Analyze {symbol} from {start} to {end}"),
            (_, _, Some(date)) => format!("Analyze {symbol} for {date}"),
            _ => format!("Analyze {symbol} for today"),
        }
    }
}

/// Failure of one analyzer call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalyzeError {
    /// The analyzer produced no output. Retried per the job's policy.
    #[error("analyzer returned an empty response")]
    EmptyResponse,
    /// Item-level failure; recorded as an error result and the job continues.
    #[error("{0}")]
    Failed(String),
    /// Failure that ends the whole job.
    #[error("{0}")]
    Aborted(String),
}

/// Produces the analysis payload for a single ticker.
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, symbol: &str, window: &AnalysisWindow) -> Result<Value, AnalyzeError>;
}

/// Analyzer that answers with the query it would run.
///
/// Lets the runner be exercised end to end without a model backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryEchoAnalyzer;

#[async_trait::async_trait]
impl Analyzer for QueryEchoAnalyzer {
    async fn analyze(&self, symbol: &str, window: &AnalysisWindow) -> Result<Value, AnalyzeError> {
        let query = window.query(symbol);
        Ok(json!({ "query": query, "raw_output": format!("dry run: {query}") }))
    }
}
