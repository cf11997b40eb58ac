use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::Contract;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// A side-effecting request to the orchestration API. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    title: String,
    path: String,
    payload: Value,
}

impl Operation {
    pub fn new(title: impl Into<String>, path: impl Into<String>, payload: Value) -> Self {
        Self {
            title: title.into(),
            path: path.into(),
            payload,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

// ---------------------------------------------------------------------------
// OperationStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Produced by the executor when the poll budget runs out.
    TimedOut,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Pending | OperationStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Running => "RUNNING",
            OperationStatus::Succeeded => "SUCCEEDED",
            OperationStatus::Failed => "FAILED",
            OperationStatus::TimedOut => "TIMED_OUT",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Reference to a submitted operation, as returned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle(pub String);

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Submits operations and reports their asynchronous status.
///
/// Retrying a failed submission, if wanted, is the transport's business; the
/// executor treats any `Err` as fatal for the current operation.
#[async_trait]
pub trait OperationTransport: Send + Sync {
    async fn submit(&self, operation: &Operation) -> Result<OperationHandle>;

    /// Must not return `TimedOut`; that status belongs to the executor.
    async fn poll_status(&self, handle: &OperationHandle) -> Result<OperationStatus>;
}

// ---------------------------------------------------------------------------
// OperationContract
// ---------------------------------------------------------------------------

/// An operation together with the contract that defines its success.
#[derive(Debug, Clone)]
pub struct OperationContract {
    operation: Operation,
    contract: Contract,
}

impl OperationContract {
    pub fn new(operation: Operation, contract: Contract) -> Self {
        Self {
            operation,
            contract,
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_states() {
        assert!(!OperationStatus::Pending.is_terminal());
        assert!(!OperationStatus::Running.is_terminal());
        assert!(OperationStatus::Succeeded.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
        assert!(OperationStatus::TimedOut.is_terminal());
    }

    #[test]
    fn status_serializes_upper_case() {
        let json = serde_json::to_string(&OperationStatus::TimedOut).unwrap();
        assert_eq!(json, "\"TIMED_OUT\"");
        assert_eq!(OperationStatus::TimedOut.to_string(), "TIMED_OUT");
    }

    #[test]
    fn operation_accessors() {
        let op = Operation::new("create_app", "applications/app/tasks", json!({"job": []}));
        assert_eq!(op.title(), "create_app");
        assert_eq!(op.path(), "applications/app/tasks");
        assert_eq!(op.payload()["job"], json!([]));
    }
}
