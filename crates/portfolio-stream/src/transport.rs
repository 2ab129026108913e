use std::pin::Pin;

use crate::errors::ClientError;
use crate::event::ResultRecord;
use crate::model::{AnalysisRequest, CompanyList, PortfolioAnalysis};

/// Raw response body of a streaming call, chunked as the transport delivers it.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, ClientError>> + Send + 'static>>;

/// Wire access to the job runner.
///
/// `HttpTransport` is the production implementation; tests plug in fakes
/// that replay canned byte chunks.
#[async_trait::async_trait]
pub trait AnalysisTransport: Send + Sync {
    /// Starts a streaming batch job and returns the undecoded response body.
    ///
    /// Fails with `ClientError::Transport` (carrying status and body) when
    /// the runner rejects the request before streaming.
    async fn open_stream(&self, request: &AnalysisRequest) -> Result<ByteStream, ClientError>;

    /// Runs a batch job and returns its result once every item is done.
    async fn analyze_batch(&self, request: &AnalysisRequest)
    -> Result<PortfolioAnalysis, ClientError>;

    /// Analyzes one ticker synchronously.
    async fn analyze_single(
        &self,
        symbol: &str,
        analysis_date: Option<&str>,
    ) -> Result<ResultRecord, ClientError>;

    /// Fetches one company list.
    async fn fetch_companies(&self, list: CompanyList) -> Result<Vec<String>, ClientError>;
}
