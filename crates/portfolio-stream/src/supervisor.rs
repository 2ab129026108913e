//! Lifetime bounds for analysis calls.
//!
//! Single-shot calls get a wall-clock budget. Streams have no total ceiling
//! because their duration grows with the number of items; they can instead be
//! bounded by an idle window between events.

use std::future::Future;
use std::time::Duration;

use futures::{Stream, StreamExt as _};
use tracing::warn;

use crate::errors::{ClientError, TimeoutScope};

/// Budget of the generic single-company call path.
pub const GENERIC_CALL_BUDGET: Duration = Duration::from_secs(5 * 60);

/// Budget of the multi-company batch call path.
pub const BATCH_CALL_BUDGET: Duration = Duration::from_secs(15 * 60);

/// Runs `call` and fails with `ClientError::Timeout` once `budget` elapses.
///
/// The call future is dropped on timeout, which aborts the in-flight request.
pub async fn within_budget<T, F>(budget: Duration, call: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(budget_secs = budget.as_secs(), "analysis call exceeded its budget");
            Err(ClientError::Timeout {
                budget,
                scope: TimeoutScope::Call,
            })
        }
    }
}

/// Waits for the next stream item, failing if nothing arrives within `idle`.
pub async fn next_within<S, T>(stream: &mut S, idle: Option<Duration>) -> Option<Result<T, ClientError>>
where
    S: Stream<Item = Result<T, ClientError>> + Unpin,
{
    let Some(window) = idle else {
        return stream.next().await;
    };
    match tokio::time::timeout(window, stream.next()).await {
        Ok(next) => next,
        Err(_) => Some(Err(ClientError::Timeout {
            budget: window,
            scope: TimeoutScope::Idle,
        })),
    }
}

/// Human-readable budget, e.g. `15 minutes` or `90 seconds`.
///
/// Budgets with a sub-second part are spelled out in milliseconds.
pub(crate) fn describe_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 || duration.subsec_nanos() != 0 {
        return format!("{} milliseconds", duration.as_millis());
    }
    if secs % 60 == 0 {
        let minutes = secs / 60;
        return if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        };
    }
    if secs == 1 {
        "1 second".to_string()
    } else {
        format!("{secs} seconds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn describes_budgets() {
        assert_eq!(describe_duration(GENERIC_CALL_BUDGET), "5 minutes");
        assert_eq!(describe_duration(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe_duration(Duration::from_secs(45)), "45 seconds");
        assert_eq!(describe_duration(Duration::from_millis(250)), "250 milliseconds");
        assert_eq!(describe_duration(Duration::from_millis(1500)), "1500 milliseconds");
        assert_eq!(describe_duration(Duration::from_millis(120_500)), "120500 milliseconds");
    }

    #[tokio::test(start_paused = true)]
    async fn within_budget_times_out_pending_call() {
        let result: Result<(), ClientError> =
            within_budget(BATCH_CALL_BUDGET, std::future::pending()).await;
        let err = result.expect_err("pending call must time out");
        assert!(matches!(
            err,
            ClientError::Timeout {
                scope: TimeoutScope::Call,
                ..
            }
        ));
        assert!(err.to_string().contains("15 minutes"));
    }

    #[tokio::test]
    async fn within_budget_passes_through_fast_results() {
        let value = within_budget(GENERIC_CALL_BUDGET, async { Ok::<_, ClientError>(7) })
            .await
            .expect("fast call");
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn next_within_reports_idle_stream() {
        let mut silent = stream::pending::<Result<u8, ClientError>>();
        let next = next_within(&mut silent, Some(Duration::from_secs(30))).await;
        assert!(matches!(
            next,
            Some(Err(ClientError::Timeout {
                scope: TimeoutScope::Idle,
                ..
            }))
        ));

        let mut ready = stream::iter(vec![Ok::<u8, ClientError>(1)]);
        assert!(matches!(next_within(&mut ready, None).await, Some(Ok(1))));
        assert!(next_within(&mut ready, None).await.is_none());
    }
}
