use futures::StreamExt as _;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::event::ResultRecord;
use crate::model::{AnalysisRequest, CompanyList, CompanyListResponse, PortfolioAnalysis};
use crate::transport::{AnalysisTransport, ByteStream};

/// `AnalysisTransport` over HTTP using reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        // No overall timeout here: streams run as long as the job does and
        // single-shot calls are bounded by the supervisor.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::http_status(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::transport(format!("failed to read response body: {e}")))?;
        serde_json::from_slice(&body)
            .map_err(|e| ClientError::Decode(format!("unexpected response body: {e}")))
    }
}

#[async_trait::async_trait]
impl AnalysisTransport for HttpTransport {
    async fn open_stream(&self, request: &AnalysisRequest) -> Result<ByteStream, ClientError> {
        let url = self.config.endpoint("portfolio/analyze-stream");
        debug!(%url, companies = request.companies.len(), "opening analysis stream");
        let response = self
            .send(
                self.client
                    .post(url)
                    .header(reqwest::header::ACCEPT, "text/event-stream")
                    .json(request),
            )
            .await?;
        let bytes = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| ClientError::transport(format!("stream read failed: {e}")))
        });
        Ok(Box::pin(bytes))
    }

    async fn analyze_batch(
        &self,
        request: &AnalysisRequest,
    ) -> Result<PortfolioAnalysis, ClientError> {
        let url = self.config.endpoint("portfolio/analyze");
        debug!(%url, companies = request.companies.len(), "requesting batch analysis");
        let response = self.send(self.client.post(url).json(request)).await?;
        Self::read_json(response).await
    }

    async fn analyze_single(
        &self,
        symbol: &str,
        analysis_date: Option<&str>,
    ) -> Result<ResultRecord, ClientError> {
        let url = self.config.endpoint("portfolio/analyze-single");
        debug!(%url, symbol, "requesting single analysis");
        let mut query = vec![("symbol", symbol)];
        if let Some(date) = analysis_date {
            query.push(("analysis_date", date));
        }
        let response = self.send(self.client.post(url).query(&query)).await?;
        Self::read_json(response).await
    }

    async fn fetch_companies(&self, list: CompanyList) -> Result<Vec<String>, ClientError> {
        let url = self.config.endpoint(&format!("companies/{list}"));
        debug!(%url, "fetching company list");
        let response = self.send(self.client.get(url)).await?;
        let body: CompanyListResponse = Self::read_json(response).await?;
        if !body.success {
            return Err(ClientError::transport(format!(
                "company list {list} reported failure"
            )));
        }
        Ok(body.companies)
    }
}
