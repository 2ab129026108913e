//! Client for streamed portfolio analysis jobs.
//!
//! A job runner analyzes a list of tickers and reports progress as a
//! server-sent event stream. This crate decodes that stream, folds it into a
//! final `PortfolioAnalysis`, and bounds every call by a time budget.
//!
//! # Streaming usage
//!
//! ```no_run
//! use portfolio_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let client = AnalysisClient::from_env()?;
//!
//! let analysis = client
//!     .portfolio(["TCS", "INFY", "HDFCBANK"])
//!     .investment_amount(100_000.0)
//!     .date_range("2024-01-01", "2024-03-31")
//!     .on_progress(|current, total, ticker| println!("[{current}/{total}] {ticker}"))
//!     .stream()
//!     .await?;
//!
//! println!(
//!     "{} succeeded, {} failed",
//!     analysis.summary.succeeded, analysis.summary.failed
//! );
//! # Ok(())
//! # }
//! ```

/// Session aggregation of decoded events.
pub mod aggregator;
/// Equal-weight split of an investment amount.
pub mod allocation;
/// Company-list cache and its clock.
pub mod cache;
/// Call builder, streaming handle, and cancellation handle.
pub mod call;
/// Client entry point and builder.
pub mod client;
/// Client configuration.
pub mod config;
/// Incremental SSE decoding.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Stream events and result records.
pub mod event;
/// reqwest-backed transport.
pub mod http;
/// Request and response models.
pub mod model;
/// Common imports for typical usage.
pub mod prelude;
/// Call budgets and idle windows.
pub mod supervisor;
/// Transport contract.
pub mod transport;

pub use aggregator::{Fold, SessionAggregator, SessionState, fold_events};
pub use allocation::{Allocation, equal_weight};
pub use cache::{Clock, CompanyListCache, SystemClock};
pub use call::{AbortHandle, AnalysisStream, PortfolioCall};
pub use client::{AnalysisClient, AnalysisClientBuilder};
pub use config::ClientConfig;
pub use decoder::{SseDecoder, decode_stream};
pub use errors::{ClientError, TimeoutScope};
pub use event::{ContractViolation, ItemOutcome, ResultRecord, StreamEvent, SummaryRecord};
pub use http::HttpTransport;
pub use model::{AnalysisRequest, CompanyList, CompanyListResponse, PortfolioAnalysis};
pub use supervisor::{BATCH_CALL_BUDGET, GENERIC_CALL_BUDGET, next_within, within_budget};
pub use transport::{AnalysisTransport, ByteStream};
