//! Common imports for typical client usage.
pub use crate::{
    AbortHandle, AnalysisClient, AnalysisStream, ClientConfig, ClientError, CompanyList,
    ItemOutcome, PortfolioAnalysis, PortfolioCall, ResultRecord, StreamEvent, SummaryRecord,
};
