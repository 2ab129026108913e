//! Folding decoded events into the state of one analysis call.

use std::time::Duration;

use futures::Stream;
use tracing::{debug, info, warn};

use crate::errors::ClientError;
use crate::event::{ResultRecord, StreamEvent, SummaryRecord};
use crate::model::PortfolioAnalysis;
use crate::supervisor::next_within;

/// Called with `(current, total, item_id)` for every `progress` event.
pub type ProgressCallback = Box<dyn FnMut(u32, u32, &str) + Send>;

/// Called with `(result, completed, total)` for every `result` event.
pub type ResultCallback = Box<dyn FnMut(&ResultRecord, u32, u32) + Send>;

/// Running state of one call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    pub total: u32,
    pub current: u32,
    pub current_item_id: Option<String>,
    /// Results in arrival order.
    pub results: Vec<ResultRecord>,
    pub summary: Option<SummaryRecord>,
}

/// What the caller should do after applying an event.
#[derive(Debug)]
pub enum Fold {
    /// Keep reading events.
    Continue,
    /// A terminal event was applied; stop reading.
    Resolved(Result<PortfolioAnalysis, ClientError>),
}

/// Folds the events of exactly one call into `SessionState`.
///
/// Not reentrant: create one aggregator per call.
#[derive(Default)]
pub struct SessionAggregator {
    state: SessionState,
    started: bool,
    resolved: bool,
    on_progress: Option<ProgressCallback>,
    on_result: Option<ResultCallback>,
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the progress callback.
    pub fn on_progress(mut self, callback: impl FnMut(u32, u32, &str) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Registers the per-result callback.
    pub fn on_result(
        mut self,
        callback: impl FnMut(&ResultRecord, u32, u32) + Send + 'static,
    ) -> Self {
        self.on_result = Some(Box::new(callback));
        self
    }

    pub(crate) fn with_callbacks(
        mut self,
        on_progress: Option<ProgressCallback>,
        on_result: Option<ResultCallback>,
    ) -> Self {
        self.on_progress = on_progress;
        self.on_result = on_result;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Applies one event, firing callbacks synchronously.
    pub fn apply(&mut self, event: StreamEvent) -> Fold {
        if self.resolved {
            warn!(kind = event.kind(), "ignoring event after terminal event");
            return Fold::Continue;
        }
        match event {
            StreamEvent::Start { total_items } => {
                if self.started {
                    warn!(total_items, "ignoring repeated start event");
                } else {
                    self.started = true;
                    self.state.total = total_items;
                    debug!(total_items, "analysis job started");
                }
                Fold::Continue
            }
            StreamEvent::Progress {
                current,
                total,
                item_id,
            } => {
                debug!(current, total, item_id = %item_id, "analysis progress");
                if let Some(callback) = self.on_progress.as_mut() {
                    callback(current, total, &item_id);
                }
                self.state.current = current;
                self.state.current_item_id = Some(item_id);
                Fold::Continue
            }
            StreamEvent::Result {
                item,
                completed,
                total,
            } => {
                debug!(item_id = %item.item_id, success = item.is_success(), completed, total, "analysis result");
                if let Some(callback) = self.on_result.as_mut() {
                    callback(&item, completed, total);
                }
                self.state.results.push(item);
                Fold::Continue
            }
            StreamEvent::Error { message } => {
                self.resolved = true;
                let discarded = self.state.results.len();
                self.state.results.clear();
                warn!(%message, discarded, "analysis job reported an error");
                Fold::Resolved(Err(ClientError::ServerReported { message }))
            }
            StreamEvent::Complete { summary } => {
                self.resolved = true;
                let results = std::mem::take(&mut self.state.results);
                if summary.total_items as usize != results.len() {
                    warn!(
                        total_items = summary.total_items,
                        observed = results.len(),
                        "summary total differs from observed results"
                    );
                }
                info!(
                    total_items = summary.total_items,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "analysis job completed"
                );
                self.state.summary = Some(summary.clone());
                Fold::Resolved(Ok(PortfolioAnalysis { summary, results }))
            }
        }
    }

    /// Resolves a call whose stream ended without a terminal event.
    pub fn end_of_stream(&mut self) -> Result<PortfolioAnalysis, ClientError> {
        self.resolved = true;
        let results_seen = self.state.results.len();
        self.state.results.clear();
        warn!(results_seen, "analysis stream closed before completion");
        Err(ClientError::IncompleteStream { results_seen })
    }
}

/// Drives `events` through `aggregator` until the call resolves.
///
/// With `idle` set, a gap longer than the window between two events fails
/// the call with `ClientError::Timeout`.
pub async fn fold_events<S>(
    mut events: S,
    mut aggregator: SessionAggregator,
    idle: Option<Duration>,
) -> Result<PortfolioAnalysis, ClientError>
where
    S: Stream<Item = Result<StreamEvent, ClientError>> + Unpin,
{
    loop {
        match next_within(&mut events, idle).await {
            Some(Ok(event)) => {
                if let Fold::Resolved(outcome) = aggregator.apply(event) {
                    return outcome;
                }
            }
            Some(Err(err)) => return Err(err),
            None => return aggregator.end_of_stream(),
        }
    }
}
