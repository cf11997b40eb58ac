//! Drives one [`OperationContract`] through submission, status polling and
//! contract verification.
//!
//! ```text
//! Submitting ─▶ PollingStatus ─┬▶ StatusSucceeded ─┐
//!                              ├▶ StatusFailed ────┼▶ VerifyingContract ─▶ Passed | Failed
//!                              └▶ StatusTimedOut ──┘
//! ```
//!
//! `StatusFailed` only continues to verification when the caller tolerates it
//! (`failure_ok` or `timeout_ok`); `StatusTimedOut` only with `timeout_ok`.
//! Otherwise both short-circuit to `Failed` without reading any resources.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::contract::{ContractResult, VerifyStrategy};
use crate::operation::{OperationContract, OperationHandle, OperationStatus, OperationTransport};

// ---------------------------------------------------------------------------
// ExecutionOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub poll_interval: Duration,
    /// Wall-clock budget for the status to reach a terminal state.
    pub poll_timeout: Duration,
    /// Continue to verification when the status never became terminal.
    pub timeout_ok: bool,
    /// Continue to verification when the status reported failure.
    pub failure_ok: bool,
    /// Extra whole-contract verifications after a failed one.
    pub verify_retries: u32,
    pub verify_interval: Duration,
    pub strategy: VerifyStrategy,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(300),
            timeout_ok: false,
            failure_ok: false,
            verify_retries: 0,
            verify_interval: Duration::from_secs(5),
            strategy: VerifyStrategy::Sequential,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Submitting,
    PollingStatus,
    StatusSucceeded,
    StatusFailed,
    StatusTimedOut,
    VerifyingContract,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    StatusFailed,
    StatusTimedOut,
    ContractFailed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub title: String,
    pub passed: bool,
    pub failure: Option<FailureKind>,
    /// Phases visited, in order.
    pub phases: Vec<ExecutionPhase>,
    pub handle: Option<OperationHandle>,
    pub status: Option<OperationStatus>,
    pub contract: Option<ContractResult>,
    /// Number of times the contract was verified.
    pub verify_attempts: u32,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl ExecutionReport {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            passed: false,
            failure: None,
            phases: Vec::new(),
            handle: None,
            status: None,
            contract: None,
            verify_attempts: 0,
            error: None,
            elapsed_ms: 0,
        }
    }

    fn enter(&mut self, phase: ExecutionPhase) {
        debug!(operation = %self.title, ?phase, "entering phase");
        self.phases.push(phase);
    }

    fn fail(mut self, kind: FailureKind, error: impl Into<String>, start: Instant) -> Self {
        let error = error.into();
        warn!(operation = %self.title, ?kind, %error, "operation failed");
        self.enter(ExecutionPhase::Failed);
        self.failure = Some(kind);
        self.error = Some(error);
        self.elapsed_ms = start.elapsed().as_millis() as u64;
        self
    }

    fn pass(mut self, start: Instant) -> Self {
        info!(operation = %self.title, "operation passed");
        self.enter(ExecutionPhase::Passed);
        self.passed = true;
        self.elapsed_ms = start.elapsed().as_millis() as u64;
        self
    }

    /// Why the operation failed, or a pass confirmation.
    pub fn explanation(&self) -> String {
        if self.passed {
            return match &self.contract {
                Some(c) => c.summary(),
                None => "passed".to_string(),
            };
        }
        let mut text = self.error.clone().unwrap_or_else(|| "failed".to_string());
        if let Some(contract) = self.contract.as_ref().filter(|c| !c.passed) {
            text.push('\n');
            text.push_str(&contract.summary());
        }
        text
    }
}

// ---------------------------------------------------------------------------
// OperationExecutor
// ---------------------------------------------------------------------------

enum PollError {
    Transport(String),
    Cancelled,
}

pub struct OperationExecutor {
    transport: Arc<dyn OperationTransport>,
}

impl OperationExecutor {
    pub fn new(transport: Arc<dyn OperationTransport>) -> Self {
        Self { transport }
    }

    /// Run one operation contract to a final verdict. Never returns `Err`:
    /// every failure is folded into the report.
    pub async fn run(
        &self,
        target: &OperationContract,
        options: &ExecutionOptions,
        cancel: &CancelToken,
    ) -> ExecutionReport {
        let start = Instant::now();
        let operation = target.operation();
        let mut report = ExecutionReport::new(operation.title());

        if cancel.is_cancelled() {
            return report.fail(FailureKind::Cancelled, "run cancelled before submission", start);
        }

        report.enter(ExecutionPhase::Submitting);
        info!(operation = operation.title(), path = operation.path(), "submitting operation");
        let handle = match cancel.or_cancelled(self.transport.submit(operation)).await {
            None => {
                return report.fail(FailureKind::Cancelled, "cancelled during submission", start)
            }
            Some(Ok(handle)) => handle,
            Some(Err(e)) => return report.fail(FailureKind::Transport, e.to_string(), start),
        };
        report.handle = Some(handle.clone());

        report.enter(ExecutionPhase::PollingStatus);
        let status = match self.poll(&handle, options, cancel).await {
            Ok(status) => status,
            Err(PollError::Transport(message)) => {
                return report.fail(FailureKind::Transport, message, start)
            }
            Err(PollError::Cancelled) => {
                return report.fail(FailureKind::Cancelled, "cancelled while polling status", start)
            }
        };
        report.status = Some(status);

        match status {
            OperationStatus::Succeeded => report.enter(ExecutionPhase::StatusSucceeded),
            OperationStatus::Failed => {
                report.enter(ExecutionPhase::StatusFailed);
                if !(options.failure_ok || options.timeout_ok) {
                    return report.fail(
                        FailureKind::StatusFailed,
                        format!("operation {handle} reported FAILED"),
                        start,
                    );
                }
                warn!(operation = operation.title(), "status FAILED tolerated; verifying anyway");
            }
            _ => {
                report.enter(ExecutionPhase::StatusTimedOut);
                if !options.timeout_ok {
                    return report.fail(
                        FailureKind::StatusTimedOut,
                        format!(
                            "operation {handle} not finished after {:?}",
                            options.poll_timeout
                        ),
                        start,
                    );
                }
                warn!(operation = operation.title(), "status timed out; verifying anyway");
            }
        }

        report.enter(ExecutionPhase::VerifyingContract);
        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            let result = target.contract().verify(options.strategy, cancel).await;
            if result.passed || attempts > options.verify_retries {
                break result;
            }
            info!(
                operation = operation.title(),
                attempt = attempts,
                "contract not satisfied; verifying again in {:?}",
                options.verify_interval
            );
            if !cancel.sleep(options.verify_interval).await {
                break result;
            }
        };
        report.verify_attempts = attempts;

        let passed = result.passed;
        let summary = result.summary();
        report.contract = Some(result);
        if passed {
            report.pass(start)
        } else if cancel.is_cancelled() {
            report.fail(FailureKind::Cancelled, "cancelled during verification", start)
        } else {
            report.fail(FailureKind::ContractFailed, summary, start)
        }
    }

    /// Poll until terminal. Running out of budget yields `TimedOut`.
    async fn poll(
        &self,
        handle: &OperationHandle,
        options: &ExecutionOptions,
        cancel: &CancelToken,
    ) -> Result<OperationStatus, PollError> {
        let deadline = Instant::now() + options.poll_timeout;
        let mut last = None;
        loop {
            let status = cancel
                .or_cancelled(self.transport.poll_status(handle))
                .await
                .ok_or(PollError::Cancelled)?
                .map_err(|e| PollError::Transport(e.to_string()))?;
            if last != Some(status) {
                debug!(%handle, %status, "operation status");
                last = Some(status);
            }
            if status.is_terminal() {
                return Ok(status);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(OperationStatus::TimedOut);
            }
            let pause = options.poll_interval.min(deadline - now);
            if !cancel.sleep(pause).await {
                return Err(PollError::Cancelled);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
