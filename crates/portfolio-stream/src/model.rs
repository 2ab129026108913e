use std::fmt;
use std::str::FromStr;

use crate::errors::ClientError;
use crate::event::{ResultRecord, SummaryRecord};

/// Body of a portfolio analysis request (streaming and non-streaming).
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnalysisRequest {
    /// Ticker symbols to analyze. The job runner may process them in any order.
    pub companies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investment_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenure_weeks: Option<u32>,
    /// `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// Single analysis day; superseded by `start_date`/`end_date`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_date: Option<String>,
}

impl AnalysisRequest {
    pub fn new<I, S>(companies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            companies: companies.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Rejects requests the job runner would refuse.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.companies.is_empty() {
            return Err(ClientError::Validation(
                "at least one company is required".into(),
            ));
        }
        if self.companies.iter().any(|c| c.trim().is_empty()) {
            return Err(ClientError::Validation(
                "company symbols must not be empty".into(),
            ));
        }
        if let Some(amount) = self.investment_amount
            && (!amount.is_finite() || amount < 0.0)
        {
            return Err(ClientError::Validation(format!(
                "investment_amount must be a non-negative number, got {amount}"
            )));
        }
        Ok(())
    }
}

/// Resolved value of a batch analysis, streamed or not.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PortfolioAnalysis {
    #[serde(flatten)]
    pub summary: SummaryRecord,
    /// Results in arrival order.
    #[serde(default)]
    pub results: Vec<ResultRecord>,
}

impl PortfolioAnalysis {
    /// Results ordered by item id, for callers that need a canonical order.
    pub fn results_by_item(&self) -> Vec<&ResultRecord> {
        let mut sorted: Vec<&ResultRecord> = self.results.iter().collect();
        sorted.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        sorted
    }

    /// Looks up the result for one ticker.
    pub fn result_for(&self, item_id: &str) -> Option<&ResultRecord> {
        self.results.iter().find(|r| r.item_id == item_id)
    }
}

/// Index constituent lists served by the companies endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompanyList {
    Nifty50,
    Nifty100,
    Nifty200,
}

impl CompanyList {
    pub const ALL: [CompanyList; 3] = [Self::Nifty50, Self::Nifty100, Self::Nifty200];

    /// Path segment / category name, e.g. `nifty50`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nifty50 => "nifty50",
            Self::Nifty100 => "nifty100",
            Self::Nifty200 => "nifty200",
        }
    }
}

impl fmt::Display for CompanyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompanyList {
    type Err = ClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', '_', ' '], "");
        Self::ALL
            .into_iter()
            .find(|list| list.as_str() == normalized)
            .ok_or_else(|| ClientError::Validation(format!("unknown company list: {value}")))
    }
}

/// Body returned by `GET /companies/{category}`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CompanyListResponse {
    pub category: String,
    pub companies: Vec<String>,
    pub count: usize,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}
