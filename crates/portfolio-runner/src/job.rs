//! Sequential execution of one portfolio analysis job.

use std::sync::Arc;

use futures::StreamExt as _;
use futures::stream;
use portfolio_stream::{
    AnalysisRequest, ClientError, PortfolioAnalysis, ResultRecord, SessionAggregator, StreamEvent,
    SummaryRecord, fold_events,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::analyzer::{AnalysisWindow, AnalyzeError, Analyzer};
use crate::error::RunnerError;
use crate::retry::RetryPolicy;

/// `PA-YYYYMMDD-HHMMSS` in local time.
pub fn new_request_id() -> String {
    format!("PA-{}", chrono::Local::now().format("%Y%m%d-%H%M%S"))
}

/// Local ISO-8601 timestamp without offset, as carried by result records.
pub fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// Serializes one event as an SSE record.
pub fn encode_event(event: &StreamEvent) -> String {
    match event.to_sse_record() {
        Ok(record) => record,
        Err(err) => {
            error!(kind = event.kind(), error = %err, "failed to encode stream event");
            "data: {\"type\":\"error\",\"message\":\"failed to encode event\"}\n\n".to_string()
        }
    }
}

/// Runs the analyzer for one ticker, retrying empty responses.
///
/// Item failures come back as `Ok` with a failure record. Only
/// `AnalyzeError::Aborted` is returned as an error.
pub async fn analyze_item(
    analyzer: &dyn Analyzer,
    retry: &RetryPolicy,
    symbol: &str,
    window: &AnalysisWindow,
) -> Result<ResultRecord, AnalyzeError> {
    let mut retries_done = 0;
    loop {
        match analyzer.analyze(symbol, window).await {
            Ok(payload) => return Ok(ResultRecord::success(symbol, payload, timestamp())),
            Err(AnalyzeError::EmptyResponse) if retry.can_retry(retries_done) => {
                let backoff = retry.backoff_duration(retries_done);
                retries_done += 1;
                warn!(
                    item_id = symbol,
                    attempt = retries_done,
                    max_attempts = retry.max_attempts(),
                    backoff_ms = backoff.as_millis() as u64,
                    "analyzer returned an empty response; retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(AnalyzeError::EmptyResponse) => {
                return Ok(ResultRecord::failure(
                    symbol,
                    format!(
                        "analyzer returned an empty response after {} attempts",
                        retries_done + 1
                    ),
                    timestamp(),
                ));
            }
            Err(AnalyzeError::Failed(message)) => {
                warn!(item_id = symbol, error = %message, "item analysis failed");
                return Ok(ResultRecord::failure(symbol, message, timestamp()));
            }
            Err(err @ AnalyzeError::Aborted(_)) => return Err(err),
        }
    }
}

/// One submitted portfolio analysis.
pub struct BatchJob {
    analyzer: Arc<dyn Analyzer>,
    retry: RetryPolicy,
    request: AnalysisRequest,
    request_id: String,
}

impl BatchJob {
    pub fn new(analyzer: Arc<dyn Analyzer>, retry: RetryPolicy, request: AnalysisRequest) -> Self {
        Self {
            analyzer,
            retry,
            request,
            request_id: new_request_id(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Emits the job's events into `tx`, one item at a time in submission order.
    ///
    /// Stops early when the receiver is gone.
    pub async fn run(self, tx: mpsc::Sender<StreamEvent>) {
        let total = self.request.companies.len() as u32;
        let window = AnalysisWindow {
            start_date: self.request.start_date.clone(),
            end_date: self.request.end_date.clone(),
            analysis_date: self.request.analysis_date.clone(),
        };
        info!(request_id = %self.request_id, total, "portfolio job started");

        if tx.send(StreamEvent::Start { total_items: total }).await.is_err() {
            debug!(request_id = %self.request_id, "job receiver dropped before start");
            return;
        }

        let (mut succeeded, mut failed) = (0u32, 0u32);
        for (index, symbol) in self.request.companies.iter().enumerate() {
            let position = index as u32 + 1;
            let progress = StreamEvent::Progress {
                current: position,
                total,
                item_id: symbol.clone(),
            };
            if tx.send(progress).await.is_err() {
                debug!(request_id = %self.request_id, "job receiver dropped; stopping");
                return;
            }

            let record = match analyze_item(self.analyzer.as_ref(), &self.retry, symbol, &window).await {
                Ok(record) => record,
                Err(err) => {
                    error!(request_id = %self.request_id, item_id = %symbol, error = %err, "portfolio job aborted");
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                    return;
                }
            };
            if record.is_success() {
                succeeded += 1;
            } else {
                failed += 1;
            }

            let result = StreamEvent::Result {
                item: record,
                completed: position,
                total,
            };
            if tx.send(result).await.is_err() {
                debug!(request_id = %self.request_id, "job receiver dropped; stopping");
                return;
            }
        }

        info!(request_id = %self.request_id, succeeded, failed, "portfolio job complete");
        let summary = self.summary(succeeded, failed);
        let _ = tx.send(StreamEvent::Complete { summary }).await;
    }

    /// Runs the job to completion and returns the aggregated result.
    pub async fn collect(self) -> Result<PortfolioAnalysis, RunnerError> {
        let (tx, rx) = mpsc::channel(16);
        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .map(Ok::<_, ClientError>);

        let (_, outcome) = tokio::join!(
            self.run(tx),
            fold_events(Box::pin(events), SessionAggregator::new(), None)
        );
        outcome.map_err(|err| match err {
            ClientError::ServerReported { message } => RunnerError::Analysis(format!(
                "portfolio analysis failed: {message}"
            )),
            other => RunnerError::from(other),
        })
    }

    fn summary(&self, succeeded: u32, failed: u32) -> SummaryRecord {
        let analysis_date = self
            .request
            .analysis_date
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
        SummaryRecord {
            request_id: Some(self.request_id.clone()),
            total_items: self.request.companies.len() as u32,
            succeeded,
            failed,
            investment_amount: self.request.investment_amount,
            tenure_weeks: self.request.tenure_weeks,
            start_date: self.request.start_date.clone(),
            end_date: self.request.end_date.clone(),
            analysis_date: Some(analysis_date),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    /// Analyzer that replays a scripted sequence of answers per ticker.
    #[derive(Default)]
    struct ScriptedAnalyzer {
        script: Mutex<HashMap<String, Vec<Result<serde_json::Value, AnalyzeError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedAnalyzer {
        fn answer(self, symbol: &str, answers: Vec<Result<serde_json::Value, AnalyzeError>>) -> Self {
            self.script
                .lock()
                .expect("script")
                .insert(symbol.to_string(), answers.into_iter().rev().collect());
            self
        }
    }

    #[async_trait::async_trait]
    impl Analyzer for ScriptedAnalyzer {
        async fn analyze(
            &self,
            symbol: &str,
            _window: &AnalysisWindow,
        ) -> Result<serde_json::Value, AnalyzeError> {
            self.calls.lock().expect("calls").push(symbol.to_string());
            self.script
                .lock()
                .expect("script")
                .get_mut(symbol)
                .and_then(Vec::pop)
                .unwrap_or_else(|| Ok(json!({ "symbol": symbol })))
        }
    }

    async fn drain(job: BatchJob) -> Vec<StreamEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        job.run(tx).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn request_id_has_expected_shape() {
        let id = new_request_id();
        assert!(id.starts_with("PA-"));
        assert_eq!(id.len(), "PA-20240105-101500".len());
        assert_eq!(id.as_bytes()[11], b'-');
    }

    #[tokio::test]
    async fn emits_start_progress_result_complete_in_order() {
        let analyzer = Arc::new(
            ScriptedAnalyzer::default().answer("BBB", vec![Err(AnalyzeError::Failed("no data".into()))]),
        );
        let mut request = AnalysisRequest::new(["AAA", "BBB"]);
        request.investment_amount = Some(50_000.0);
        let events = drain(BatchJob::new(analyzer, RetryPolicy::none(), request)).await;

        let kinds: Vec<_> = events.iter().map(StreamEvent::kind).collect();
        assert_eq!(kinds, vec!["start", "progress", "result", "progress", "result", "complete"]);
        let StreamEvent::Complete { summary } = &events[5] else {
            panic!("expected complete");
        };
        assert_eq!((summary.total_items, summary.succeeded, summary.failed), (2, 1, 1));
        assert_eq!(summary.investment_amount, Some(50_000.0));
        assert!(summary.analysis_date.is_some());
        assert!(summary.request_id.as_deref().is_some_and(|id| id.starts_with("PA-")));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_responses_are_retried_then_recorded_as_failure() {
        let analyzer = Arc::new(ScriptedAnalyzer::default().answer(
            "AAA",
            vec![
                Err(AnalyzeError::EmptyResponse),
                Err(AnalyzeError::EmptyResponse),
                Err(AnalyzeError::EmptyResponse),
            ],
        ));
        let record = analyze_item(
            analyzer.as_ref(),
            &RetryPolicy::default(),
            "AAA",
            &AnalysisWindow::default(),
        )
        .await
        .expect("item result");
        assert_eq!(
            record.error_message(),
            Some("analyzer returned an empty response after 3 attempts")
        );
        assert_eq!(analyzer.calls.lock().expect("calls").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_after_empty_response() {
        let analyzer = Arc::new(ScriptedAnalyzer::default().answer(
            "AAA",
            vec![Err(AnalyzeError::EmptyResponse), Ok(json!({"rating": "buy"}))],
        ));
        let started = tokio::time::Instant::now();
        let record = analyze_item(
            analyzer.as_ref(),
            &RetryPolicy::fixed(2, Duration::from_secs(2)),
            "AAA",
            &AnalysisWindow::default(),
        )
        .await
        .expect("item result");
        assert_eq!(record.payload(), Some(&json!({"rating": "buy"})));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn failed_items_are_not_retried() {
        let analyzer = Arc::new(ScriptedAnalyzer::default().answer(
            "AAA",
            vec![Err(AnalyzeError::Failed("no price data".into())), Ok(json!({}))],
        ));
        let record = analyze_item(
            analyzer.as_ref(),
            &RetryPolicy::fixed(3, Duration::ZERO),
            "AAA",
            &AnalysisWindow::default(),
        )
        .await
        .expect("item result");
        assert_eq!(record.error_message(), Some("no price data"));
        assert_eq!(analyzer.calls.lock().expect("calls").len(), 1);
    }

    #[tokio::test]
    async fn aborted_item_ends_job_with_error_event() {
        let analyzer = Arc::new(
            ScriptedAnalyzer::default().answer("BBB", vec![Err(AnalyzeError::Aborted("quota exhausted".into()))]),
        );
        let events = drain(BatchJob::new(
            analyzer.clone(),
            RetryPolicy::none(),
            AnalysisRequest::new(["AAA", "BBB", "CCC"]),
        ))
        .await;
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Error {
                message: "quota exhausted".into()
            })
        );
        assert!(!analyzer.calls.lock().expect("calls").contains(&"CCC".to_string()));
    }

    #[tokio::test]
    async fn collect_folds_events_into_analysis() {
        let analyzer = Arc::new(ScriptedAnalyzer::default());
        let analysis = BatchJob::new(analyzer, RetryPolicy::none(), AnalysisRequest::new(["TCS", "INFY"]))
            .collect()
            .await
            .expect("collect");
        assert_eq!(analysis.summary.succeeded, 2);
        assert_eq!(analysis.results.len(), 2);
        assert_eq!(analysis.results[0].item_id, "TCS");

        let aborted = Arc::new(
            ScriptedAnalyzer::default().answer("TCS", vec![Err(AnalyzeError::Aborted("backend down".into()))]),
        );
        let err = BatchJob::new(aborted, RetryPolicy::none(), AnalysisRequest::new(["TCS"]))
            .collect()
            .await
            .expect_err("aborted");
        assert_eq!(err, RunnerError::Analysis("portfolio analysis failed: backend down".into()));
    }

    #[test]
    fn encoded_events_are_sse_records() {
        let record = encode_event(&StreamEvent::Start { total_items: 3 });
        assert!(record.starts_with("data: {"));
        assert!(record.ends_with("\n\n"));
    }
}
