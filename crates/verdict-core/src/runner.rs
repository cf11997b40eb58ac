use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::{self, CancelToken};
use crate::executor::{ExecutionOptions, ExecutionReport, OperationExecutor};
use crate::operation::OperationContract;

// ---------------------------------------------------------------------------
// StepOverrides
// ---------------------------------------------------------------------------

/// Per-step adjustments on top of the runner's default execution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOverrides {
    pub verify_retries: Option<u32>,
    pub verify_interval: Option<Duration>,
    pub poll_timeout: Option<Duration>,
    /// Soft pass on status timeout: verify anyway.
    pub timeout_ok: bool,
    pub failure_ok: bool,
}

impl StepOverrides {
    pub fn apply(&self, base: &ExecutionOptions) -> ExecutionOptions {
        ExecutionOptions {
            verify_retries: self.verify_retries.unwrap_or(base.verify_retries),
            verify_interval: self.verify_interval.unwrap_or(base.verify_interval),
            poll_timeout: self.poll_timeout.unwrap_or(base.poll_timeout),
            timeout_ok: base.timeout_ok || self.timeout_ok,
            failure_ok: base.failure_ok || self.failure_ok,
            ..*base
        }
    }
}

// ---------------------------------------------------------------------------
// TestStep / TestCase
// ---------------------------------------------------------------------------

/// One operation contract in a suite. `name` doubles as the ordering token:
/// steps run in ascending name order (`a_create_app` before `z_delete_app`).
#[derive(Debug, Clone)]
pub struct TestStep {
    name: String,
    target: OperationContract,
    overrides: StepOverrides,
}

impl TestStep {
    pub fn new(name: impl Into<String>, target: OperationContract) -> Self {
        Self {
            name: name.into(),
            target,
            overrides: StepOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: StepOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &OperationContract {
        &self.target
    }

    pub fn overrides(&self) -> &StepOverrides {
        &self.overrides
    }
}

#[derive(Debug, Clone)]
pub struct TestCase {
    name: String,
    steps: Vec<TestStep>,
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: TestStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps sorted by ordering token; ties keep insertion order.
    pub fn ordered_steps(&self) -> Vec<&TestStep> {
        let mut steps: Vec<&TestStep> = self.steps.iter().collect();
        steps.sort_by(|a, b| a.name.cmp(&b.name));
        steps
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    /// Not attempted because the run was cancelled first.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub explanation: String,
    pub elapsed_ms: u64,
    pub execution: Option<ExecutionReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub run_id: Uuid,
    pub suite: String,
    pub started_at: DateTime<Utc>,
    pub passed: bool,
    pub elapsed_ms: u64,
    pub steps: Vec<StepReport>,
}

impl SuiteReport {
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// SuiteRunner
// ---------------------------------------------------------------------------

pub struct SuiteRunner {
    executor: OperationExecutor,
    defaults: ExecutionOptions,
}

impl SuiteRunner {
    pub fn new(executor: OperationExecutor, defaults: ExecutionOptions) -> Self {
        Self { executor, defaults }
    }

    /// Run every step in order. A failed step never stops later ones (cleanup
    /// must still run); once `cancel` fires, remaining steps are skipped.
    pub async fn run(&self, case: &TestCase, cancel: &CancelToken) -> SuiteReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut steps = Vec::new();

        for step in case.ordered_steps() {
            if cancel.is_cancelled() {
                warn!(step = step.name(), "run cancelled; skipping step");
                steps.push(StepReport {
                    name: step.name.clone(),
                    status: StepStatus::Skipped,
                    explanation: "run cancelled before this step started".to_string(),
                    elapsed_ms: 0,
                    execution: None,
                });
                continue;
            }

            info!(suite = case.name(), step = step.name(), "running step");
            let options = step.overrides.apply(&self.defaults);
            let execution = self.executor.run(&step.target, &options, cancel).await;
            let status = if execution.passed {
                StepStatus::Passed
            } else {
                StepStatus::Failed
            };
            info!(step = step.name(), ?status, elapsed_ms = execution.elapsed_ms, "step finished");
            steps.push(StepReport {
                name: step.name.clone(),
                status,
                explanation: execution.explanation(),
                elapsed_ms: execution.elapsed_ms,
                execution: Some(execution),
            });
        }

        let passed = steps.iter().all(|s| s.status == StepStatus::Passed);
        SuiteReport {
            run_id: Uuid::new_v4(),
            suite: case.name().to_string(),
            started_at,
            passed,
            elapsed_ms: start.elapsed().as_millis() as u64,
            steps,
        }
    }

    /// Like [`SuiteRunner::run`], but the whole suite is cancelled once `limit`
    /// elapses.
    pub async fn run_with_timeout(
        &self,
        case: &TestCase,
        limit: Duration,
        cancel: &CancelToken,
    ) -> SuiteReport {
        let (handle, token) = cancel::channel();
        let outer = cancel.clone();
        let watchdog = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {
                    warn!("suite timeout of {limit:?} reached; cancelling");
                }
                _ = outer.cancelled() => {}
            }
            handle.cancel();
        });

        let report = self.run(case, &token).await;
        watchdog.abort();
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
