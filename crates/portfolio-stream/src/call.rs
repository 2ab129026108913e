use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::aggregator::{Fold, ProgressCallback, ResultCallback, SessionAggregator};
use crate::client::ClientInner;
use crate::decoder::{SseDecoder, decode_stream};
use crate::errors::ClientError;
use crate::event::{ResultRecord, StreamEvent};
use crate::model::{AnalysisRequest, PortfolioAnalysis};
use crate::supervisor::{next_within, within_budget};
use crate::transport::AnalysisTransport;

/// Handle used to cancel a running stream.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The connection is dropped and the call resolves with a transport
    /// error, exactly as if the connection had been severed.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Builder for one portfolio analysis call.
///
/// Finish with `stream()` / `start_stream()` for incremental results or
/// `collect()` for the single-shot batch endpoint.
pub struct PortfolioCall {
    client: Arc<ClientInner>,
    request: AnalysisRequest,
    on_progress: Option<ProgressCallback>,
    on_result: Option<ResultCallback>,
    idle_timeout: Option<Duration>,
    batch_budget: Duration,
    stream_buffer_capacity: usize,
}

impl PortfolioCall {
    pub(crate) fn new(client: Arc<ClientInner>, companies: Vec<String>) -> Self {
        let config = &client.config;
        Self {
            idle_timeout: config.idle_timeout,
            batch_budget: config.batch_budget,
            stream_buffer_capacity: config.stream_buffer_capacity,
            request: AnalysisRequest {
                companies,
                ..AnalysisRequest::default()
            },
            on_progress: None,
            on_result: None,
            client,
        }
    }

    /// Total amount to invest across the portfolio.
    pub fn investment_amount(mut self, amount: f64) -> Self {
        self.request.investment_amount = Some(amount);
        self
    }

    pub fn tenure_weeks(mut self, weeks: u32) -> Self {
        self.request.tenure_weeks = Some(weeks);
        self
    }

    /// Analysis window, both ends `YYYY-MM-DD`.
    pub fn date_range(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.request.start_date = Some(start.into());
        self.request.end_date = Some(end.into());
        self
    }

    /// Single analysis day, for runners that predate date ranges.
    pub fn analysis_date(mut self, date: impl Into<String>) -> Self {
        self.request.analysis_date = Some(date.into());
        self
    }

    /// Called for every `progress` event of a streaming call.
    pub fn on_progress(mut self, callback: impl FnMut(u32, u32, &str) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Called for every `result` event of a streaming call.
    pub fn on_result(
        mut self,
        callback: impl FnMut(&ResultRecord, u32, u32) + Send + 'static,
    ) -> Self {
        self.on_result = Some(Box::new(callback));
        self
    }

    /// Fails a streaming call when no event arrives for `idle`.
    pub fn idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = Some(idle);
        self
    }

    /// Overrides the wall-clock budget of `collect()`.
    pub fn budget(mut self, budget: Duration) -> Self {
        self.batch_budget = budget;
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub fn request(&self) -> &AnalysisRequest {
        &self.request
    }

    /// Starts a streaming call and returns a handle to its events.
    pub async fn start_stream(self) -> Result<AnalysisStream, ClientError> {
        self.validate()?;

        let (tx, rx) = mpsc::channel(self.stream_buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);

        let call_id = uuid::Uuid::new_v4();
        let aggregator = SessionAggregator::new().with_callbacks(self.on_progress, self.on_result);
        let task = StreamTask {
            call_id,
            transport: self.client.transport.clone(),
            request: self.request,
            aggregator,
            idle_timeout: self.idle_timeout,
            max_record_bytes: self.client.config.max_record_bytes,
        };
        tokio::spawn(task.run(tx, final_tx, abort_rx));

        Ok(AnalysisStream {
            call_id,
            rx,
            final_rx,
            abort_handle: AbortHandle { tx: abort_tx },
            saw_terminal: false,
        })
    }

    /// Streams the call to completion and returns the aggregated result.
    pub async fn stream(self) -> Result<PortfolioAnalysis, ClientError> {
        self.start_stream().await?.finish().await
    }

    /// Runs the call on the non-streaming endpoint under the batch budget.
    ///
    /// Progress and result callbacks are not invoked on this path.
    pub async fn collect(self) -> Result<PortfolioAnalysis, ClientError> {
        self.validate()?;
        let transport = self.client.transport.clone();
        let request = self.request;
        debug!(companies = request.companies.len(), budget_secs = self.batch_budget.as_secs(), "starting batch analysis");
        let analysis = within_budget(self.batch_budget, transport.analyze_batch(&request)).await?;
        analysis
            .summary
            .validate()
            .map_err(|violation| ClientError::Decode(format!("invalid batch summary: {violation}")))?;
        Ok(analysis)
    }

    fn validate(&self) -> Result<(), ClientError> {
        self.request.validate()?;
        if self.stream_buffer_capacity == 0 {
            return Err(ClientError::Validation(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.batch_budget.is_zero() {
            return Err(ClientError::Validation("budget must be non-zero".into()));
        }
        Ok(())
    }
}

/// Streaming handle returned by `PortfolioCall::start_stream`.
///
/// Use `next_event()` to observe events as they arrive and `finish()` for
/// the resolved result. Dropping the handle cancels the call.
pub struct AnalysisStream {
    call_id: uuid::Uuid,
    rx: mpsc::Receiver<StreamEvent>,
    final_rx: oneshot::Receiver<Result<PortfolioAnalysis, ClientError>>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl AnalysisStream {
    /// Identifier used in this call's log records.
    pub fn call_id(&self) -> uuid::Uuid {
        self.call_id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for the next accepted event.
    ///
    /// Returns `None` once the call has resolved.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.rx.recv().await;
        if let Some(event) = &event
            && event.is_terminal()
        {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains remaining events and returns the resolved result.
    pub async fn finish(mut self) -> Result<PortfolioAnalysis, ClientError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(event) if event.is_terminal() => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }

        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Protocol(format!(
                "stream task for call {} ended without a result",
                self.call_id
            ))),
        }
    }
}

struct StreamTask {
    call_id: uuid::Uuid,
    transport: Arc<dyn AnalysisTransport>,
    request: AnalysisRequest,
    aggregator: SessionAggregator,
    idle_timeout: Option<Duration>,
    max_record_bytes: usize,
}

impl StreamTask {
    async fn run(
        mut self,
        tx: mpsc::Sender<StreamEvent>,
        final_tx: oneshot::Sender<Result<PortfolioAnalysis, ClientError>>,
        mut abort_rx: watch::Receiver<bool>,
    ) {
        let call_id = self.call_id;
        debug!(%call_id, companies = self.request.companies.len(), "starting analysis stream");

        let opened = tokio::select! {
            _ = aborted(&mut abort_rx) => Err(ClientError::cancelled()),
            opened = self.transport.open_stream(&self.request) => opened,
        };
        let bytes = match opened {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%call_id, error = %err, "analysis stream failed to open");
                let _ = final_tx.send(Err(err));
                return;
            }
        };

        let mut events = Box::pin(decode_stream(bytes, SseDecoder::new(self.max_record_bytes)));
        let outcome = loop {
            tokio::select! {
                _ = aborted(&mut abort_rx) => break Err(ClientError::cancelled()),
                next = next_within(&mut events, self.idle_timeout) => match next {
                    Some(Ok(event)) => {
                        let forwarded = event.clone();
                        let fold = self.aggregator.apply(event);
                        // A full buffer must not hold off cancellation.
                        let reserved = tokio::select! {
                            _ = aborted(&mut abort_rx) => break Err(ClientError::cancelled()),
                            permit = tx.reserve() => permit,
                        };
                        let Ok(permit) = reserved else {
                            debug!(%call_id, "stream handle dropped; abandoning call");
                            return;
                        };
                        permit.send(forwarded);
                        if let Fold::Resolved(outcome) = fold {
                            break outcome;
                        }
                    }
                    Some(Err(err)) => break Err(err),
                    None => break self.aggregator.end_of_stream(),
                }
            }
        };
        // Tears down the connection before the caller sees the result.
        drop(events);

        match &outcome {
            Ok(analysis) => info!(%call_id, results = analysis.results.len(), "analysis stream resolved"),
            Err(err) => warn!(%call_id, error = %err, "analysis stream failed"),
        }
        let _ = final_tx.send(outcome);
    }
}

/// Resolves once cancellation is requested or every abort handle is gone.
async fn aborted(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
