use std::sync::Arc;

use tracing::debug;

use crate::cache::{Clock, CompanyListCache, SystemClock};
use crate::call::PortfolioCall;
use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::event::ResultRecord;
use crate::http::HttpTransport;
use crate::model::CompanyList;
use crate::supervisor::within_budget;
use crate::transport::AnalysisTransport;

pub(crate) struct ClientInner {
    pub(crate) transport: Arc<dyn AnalysisTransport>,
    pub(crate) config: ClientConfig,
    companies: CompanyListCache,
}

/// Entry point for analysis calls against a job runner.
///
/// Cheap to clone; clones share the transport and the company-list cache.
#[derive(Clone)]
pub struct AnalysisClient {
    inner: Arc<ClientInner>,
}

impl AnalysisClient {
    pub fn builder() -> AnalysisClientBuilder {
        AnalysisClientBuilder::default()
    }

    /// Builds an HTTP client from `PORTFOLIO_*` environment variables.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::builder().config(ClientConfig::from_env()?).build()
    }

    /// Starts a portfolio analysis call for `companies`.
    pub fn portfolio<I, S>(&self, companies: I) -> PortfolioCall
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PortfolioCall::new(
            self.inner.clone(),
            companies.into_iter().map(Into::into).collect(),
        )
    }

    /// Analyzes one ticker under the generic call budget.
    pub async fn analyze_single(
        &self,
        symbol: &str,
        analysis_date: Option<&str>,
    ) -> Result<ResultRecord, ClientError> {
        if symbol.trim().is_empty() {
            return Err(ClientError::Validation("symbol must not be empty".into()));
        }
        within_budget(
            self.inner.config.call_budget,
            self.inner.transport.analyze_single(symbol, analysis_date),
        )
        .await
    }

    /// Returns a company list, served from cache while it is fresh.
    pub async fn companies(&self, list: CompanyList) -> Result<Arc<[String]>, ClientError> {
        let transport = self.inner.transport.clone();
        let budget = self.inner.config.call_budget;
        self.inner
            .companies
            .get_or_fetch(list, || async move {
                within_budget(budget, transport.fetch_companies(list)).await
            })
            .await
    }

    /// Drops a cached company list so the next read refetches it.
    pub fn invalidate_companies(&self, list: CompanyList) {
        self.inner.companies.invalidate(list);
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

/// Builder for `AnalysisClient`.
///
/// Without an explicit transport, `build()` creates an `HttpTransport` from
/// the config.
#[derive(Default)]
pub struct AnalysisClientBuilder {
    config: Option<ClientConfig>,
    transport: Option<Arc<dyn AnalysisTransport>>,
    clock: Option<Arc<dyn Clock>>,
}

impl AnalysisClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the HTTP transport, e.g. with a test double.
    pub fn transport(mut self, transport: Arc<dyn AnalysisTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Time source for company-list freshness.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<AnalysisClient, ClientError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(config.clone())?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        debug!(base_url = %config.base_url, "analysis client ready");
        Ok(AnalysisClient {
            inner: Arc::new(ClientInner {
                transport,
                companies: CompanyListCache::with_clock(config.company_cache_ttl, clock),
                config,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::cache::tests::ManualClock;
    use crate::errors::TimeoutScope;
    use crate::model::{AnalysisRequest, PortfolioAnalysis};
    use crate::transport::ByteStream;

    #[derive(Default)]
    struct CountingTransport {
        fetches: AtomicUsize,
        stall_single: bool,
    }

    #[async_trait::async_trait]
    impl AnalysisTransport for CountingTransport {
        async fn open_stream(&self, _request: &AnalysisRequest) -> Result<ByteStream, ClientError> {
            unreachable!("not used in these tests")
        }

        async fn analyze_batch(
            &self,
            _request: &AnalysisRequest,
        ) -> Result<PortfolioAnalysis, ClientError> {
            unreachable!("not used in these tests")
        }

        async fn analyze_single(
            &self,
            symbol: &str,
            _analysis_date: Option<&str>,
        ) -> Result<ResultRecord, ClientError> {
            if self.stall_single {
                std::future::pending::<()>().await;
            }
            Ok(ResultRecord::failure(symbol, "no price data", "2024-01-05T10:00:00"))
        }

        async fn fetch_companies(&self, list: CompanyList) -> Result<Vec<String>, ClientError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![format!("{list}-first")])
        }
    }

    #[tokio::test]
    async fn company_lists_are_cached_until_ttl() {
        let transport = Arc::new(CountingTransport::default());
        let clock = Arc::new(ManualClock::new());
        let client = AnalysisClient::builder()
            .config(ClientConfig::default().company_cache_ttl(Duration::from_secs(60)))
            .transport(transport.clone())
            .clock(clock.clone())
            .build()
            .expect("client");

        let list = client.companies(CompanyList::Nifty50).await.expect("first");
        assert_eq!(&*list, ["nifty50-first".to_string()].as_slice());
        client.companies(CompanyList::Nifty50).await.expect("cached");
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(61));
        client.companies(CompanyList::Nifty50).await.expect("refetch");
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 2);

        client.invalidate_companies(CompanyList::Nifty50);
        client.companies(CompanyList::Nifty50).await.expect("after invalidate");
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn single_analysis_returns_item_failure_as_data() {
        let client = AnalysisClient::builder()
            .transport(Arc::new(CountingTransport::default()))
            .build()
            .expect("client");
        let record = client.analyze_single("TCS", None).await.expect("single");
        assert_eq!(record.error_message(), Some("no price data"));

        let err = client.analyze_single("  ", None).await.expect_err("blank");
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn single_analysis_uses_generic_budget() {
        let client = AnalysisClient::builder()
            .transport(Arc::new(CountingTransport {
                stall_single: true,
                ..CountingTransport::default()
            }))
            .build()
            .expect("client");
        let err = client.analyze_single("TCS", None).await.expect_err("timeout");
        assert_eq!(
            err,
            ClientError::Timeout {
                budget: Duration::from_secs(300),
                scope: TimeoutScope::Call,
            }
        );
        assert_eq!(err.to_string(), "analysis call timed out after 5 minutes");
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = AnalysisClient::builder()
            .config(ClientConfig::new("ftp://example.com"))
            .build();
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}
