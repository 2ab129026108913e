use std::time::Duration;

use crate::supervisor::describe_duration;

/// Which budget a `ClientError::Timeout` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
    /// Wall-clock budget of a single-shot (non-streaming) call.
    Call,
    /// Maximum silence between two decoded stream events.
    Idle,
}

/// Errors that fail a whole analysis call.
///
/// Per-item failures are not errors at this level: they travel inside
/// `PortfolioAnalysis::results` as `ItemOutcome::Failure`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Connection-level failure before or during streaming.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },
    /// Framing that cannot be recovered from; ends the stream.
    #[error("decode error: {0}")]
    Decode(String),
    /// Explicit `error` event emitted by the job runner.
    #[error("analysis failed: {message}")]
    ServerReported { message: String },
    /// The stream closed without a `complete` or `error` event.
    #[error("stream closed before completion ({results_seen} results received)")]
    IncompleteStream { results_seen: usize },
    /// A caller-side budget was exceeded.
    #[error("{}", describe_timeout(.budget, .scope))]
    Timeout {
        budget: Duration,
        scope: TimeoutScope,
    },
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid input to the call builder.
    #[error("validation error: {0}")]
    Validation(String),
    /// Internal misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Creates a transport error without HTTP details.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// Creates a transport error for a non-success HTTP response.
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::Transport {
            message: format!("request failed with status {status}: {body}"),
            status: Some(status),
            body: Some(body),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::transport("call cancelled")
    }

    /// HTTP status of a transport failure, when one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

fn describe_timeout(budget: &Duration, scope: &TimeoutScope) -> String {
    match scope {
        TimeoutScope::Call => {
            format!("analysis call timed out after {}", describe_duration(*budget))
        }
        TimeoutScope::Idle => {
            format!("no stream event received for {}", describe_duration(*budget))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_budget() {
        let err = ClientError::Timeout {
            budget: Duration::from_secs(15 * 60),
            scope: TimeoutScope::Call,
        };
        assert_eq!(err.to_string(), "analysis call timed out after 15 minutes");

        let idle = ClientError::Timeout {
            budget: Duration::from_secs(90),
            scope: TimeoutScope::Idle,
        };
        assert_eq!(idle.to_string(), "no stream event received for 90 seconds");

        let fractional = ClientError::Timeout {
            budget: Duration::from_millis(1500),
            scope: TimeoutScope::Call,
        };
        assert_eq!(
            fractional.to_string(),
            "analysis call timed out after 1500 milliseconds"
        );
    }

    #[test]
    fn http_status_keeps_status_and_body() {
        let err = ClientError::http_status(502, "bad gateway");
        assert_eq!(err.status_code(), Some(502));
        assert!(err.to_string().contains("502"));
        assert!(matches!(err, ClientError::Transport { body: Some(ref b), .. } if b == "bad gateway"));
    }
}
