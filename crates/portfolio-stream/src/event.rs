//! Typed events carried by the analysis stream and their wire contract.
//!
//! Every record on the wire is `data: <json>\n\n` where the JSON document
//! carries a `type` discriminator. Field aliases accept the names used by
//! older job runners (`symbol`, `analysis`, `total_companies`, ...).

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Field prefix of the payload line of every record.
pub const DATA_FIELD: &str = "data:";

const MISSING_ITEM_ERROR: &str = "analysis failed without a message";

/// One decoded event from the analysis stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// First event of every job.
    Start {
        #[serde(alias = "total_companies")]
        total_items: u32,
    },
    /// The job is about to process `item_id`.
    Progress {
        current: u32,
        total: u32,
        #[serde(alias = "symbol")]
        item_id: String,
    },
    /// One item finished, successfully or not.
    Result {
        #[serde(alias = "result")]
        item: ResultRecord,
        completed: u32,
        total: u32,
    },
    /// Terminal success.
    Complete { summary: SummaryRecord },
    /// Terminal failure; abandons the remaining items.
    Error {
        #[serde(alias = "error")]
        message: String,
    },
}

/// A decoded event broke its per-type invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ContractViolation(pub String);

impl StreamEvent {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Progress { .. } => "progress",
            Self::Result { .. } => "result",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// Returns true for `complete` and `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Checks the invariants of a single event.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            Self::Start { total_items } if *total_items == 0 => Err(ContractViolation(
                "start.total_items must be at least 1".into(),
            )),
            Self::Progress { current, total, .. } if *current == 0 || current > total => {
                Err(ContractViolation(format!(
                    "progress.current {current} outside 1..={total}"
                )))
            }
            Self::Result {
                completed, total, ..
            } if completed > total => Err(ContractViolation(format!(
                "result.completed {completed} exceeds total {total}"
            ))),
            Self::Complete { summary } => summary.validate(),
            _ => Ok(()),
        }
    }

    /// Encodes the event as one SSE record: `data: <json>\n\n`.
    pub fn to_sse_record(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{DATA_FIELD} {json}\n\n"))
    }
}

/// Per-item outcome. Success and failure are mutually exclusive.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemOutcome {
    /// Analysis succeeded; the payload is opaque to this crate.
    Success { payload: serde_json::Value },
    /// Analysis failed for this item only.
    Failure { message: String },
}

/// Result of analyzing one work item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResultRecord", into = "WireResultRecord")]
pub struct ResultRecord {
    pub item_id: String,
    pub outcome: ItemOutcome,
    pub timestamp: String,
}

impl ResultRecord {
    pub fn success(
        item_id: impl Into<String>,
        payload: serde_json::Value,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            outcome: ItemOutcome::Success { payload },
            timestamp: timestamp.into(),
        }
    }

    pub fn failure(
        item_id: impl Into<String>,
        message: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            outcome: ItemOutcome::Failure {
                message: message.into(),
            },
            timestamp: timestamp.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Success { .. })
    }

    /// Payload of a successful item.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            ItemOutcome::Success { payload } => Some(payload),
            ItemOutcome::Failure { .. } => None,
        }
    }

    /// Error message of a failed item.
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            ItemOutcome::Success { .. } => None,
            ItemOutcome::Failure { message } => Some(message),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireResultRecord {
    #[serde(alias = "symbol")]
    item_id: String,
    status: String,
    #[serde(default, alias = "analysis", skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
    #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(default)]
    timestamp: String,
}

impl TryFrom<WireResultRecord> for ResultRecord {
    type Error = ContractViolation;

    fn try_from(wire: WireResultRecord) -> Result<Self, Self::Error> {
        let outcome = match wire.status.as_str() {
            "success" => {
                if let Some(message) = wire.error_message {
                    return Err(ContractViolation(format!(
                        "successful result for {} carries error_message {message:?}",
                        wire.item_id
                    )));
                }
                ItemOutcome::Success {
                    payload: wire.payload.unwrap_or(serde_json::Value::Null),
                }
            }
            "error" => {
                if wire.payload.is_some() {
                    debug!(item_id = %wire.item_id, "ignoring payload on failed result");
                }
                ItemOutcome::Failure {
                    message: wire
                        .error_message
                        .unwrap_or_else(|| MISSING_ITEM_ERROR.to_string()),
                }
            }
            other => {
                return Err(ContractViolation(format!(
                    "unknown result status {other:?} for {}",
                    wire.item_id
                )));
            }
        };
        Ok(Self {
            item_id: wire.item_id,
            outcome,
            timestamp: wire.timestamp,
        })
    }
}

impl From<ResultRecord> for WireResultRecord {
    fn from(record: ResultRecord) -> Self {
        let (status, payload, error_message) = match record.outcome {
            ItemOutcome::Success { payload } => ("success", Some(payload), None),
            ItemOutcome::Failure { message } => ("error", None, Some(message)),
        };
        Self {
            item_id: record.item_id,
            status: status.to_string(),
            payload,
            error_message,
            timestamp: record.timestamp,
        }
    }
}

/// Aggregate counters of a finished job plus the echoed request parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(alias = "total_companies")]
    pub total_items: u32,
    #[serde(alias = "successful")]
    pub succeeded: u32,
    pub failed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investment_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenure_weeks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_date: Option<String>,
}

impl SummaryRecord {
    /// `succeeded + failed` must equal `total_items`.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        if self.succeeded.checked_add(self.failed) != Some(self.total_items) {
            return Err(ContractViolation(format!(
                "summary counters {} + {} do not add up to {}",
                self.succeeded, self.failed, self.total_items
            )));
        }
        Ok(())
    }
}
