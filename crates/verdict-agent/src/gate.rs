//! HTTP transport for the orchestration gateway's task API.
//!
//! Submitting a task is `POST {base}/{path}` with a JSON job payload; the
//! gateway answers `{"ref": "/tasks/<id>"}`. Status is read back with
//! `GET {base}{ref}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use verdict_core::{
    Bindings, Operation, OperationHandle, OperationStatus, OperationTransport, VerdictError,
};

use crate::error::AgentError;
use crate::Result;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TaskRef {
    #[serde(rename = "ref")]
    reference: String,
}

#[derive(Debug, Deserialize)]
struct TaskState {
    status: String,
}

/// Map a gateway task status onto the engine's status set. Unknown values
/// yield `None`.
pub fn map_task_status(raw: &str) -> Option<OperationStatus> {
    let status = match raw {
        "NOT_STARTED" | "BUFFERED" => OperationStatus::Pending,
        "RUNNING" | "SUSPENDED" | "PAUSED" => OperationStatus::Running,
        "SUCCEEDED" => OperationStatus::Succeeded,
        "TERMINAL" | "CANCELED" | "STOPPED" | "FAILED_CONTINUE" => OperationStatus::Failed,
        _ => return None,
    };
    Some(status)
}

#[derive(Debug, Clone)]
pub struct GateClient {
    base_url: String,
    http: reqwest::Client,
}

impl GateClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a job payload; returns the task reference.
    pub async fn post_task(&self, path: &str, payload: &Value) -> Result<String> {
        let url = self.url(path);
        debug!(%url, "submitting task");
        let resp = self.http.post(&url).json(payload).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AgentError::Status {
                method: "POST",
                url,
                status: status.as_u16(),
                body,
            });
        }
        let task: TaskRef = serde_json::from_str(&body).map_err(|source| AgentError::Parse {
            what: format!("task reference from {url}"),
            source,
        })?;
        if task.reference.is_empty() {
            return Err(AgentError::Protocol(format!("empty task ref from {url}")));
        }
        Ok(task.reference)
    }

    /// GET the task and return its raw status string.
    pub async fn task_status(&self, reference: &str) -> Result<String> {
        let url = self.url(reference);
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AgentError::Status {
                method: "GET",
                url,
                status: status.as_u16(),
                body,
            });
        }
        let state: TaskState = serde_json::from_str(&body).map_err(|source| AgentError::Parse {
            what: format!("task state from {url}"),
            source,
        })?;
        Ok(state.status)
    }
}

#[async_trait]
impl OperationTransport for GateClient {
    async fn submit(&self, operation: &Operation) -> verdict_core::Result<OperationHandle> {
        self.post_task(operation.path(), operation.payload())
            .await
            .map(OperationHandle)
            .map_err(|e| VerdictError::Transport(format!("{}: {e}", operation.title())))
    }

    async fn poll_status(&self, handle: &OperationHandle) -> verdict_core::Result<OperationStatus> {
        let raw = self
            .task_status(&handle.0)
            .await
            .map_err(|e| VerdictError::Transport(e.to_string()))?;
        map_task_status(&raw).ok_or_else(|| {
            VerdictError::Transport(format!("unrecognised task status '{raw}' for {handle}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Task payloads
// ---------------------------------------------------------------------------

pub fn make_payload(job: Vec<Value>, description: &str, application: &str) -> Value {
    json!({
        "job": job,
        "description": description,
        "application": application,
    })
}

fn task_path(application: &str) -> String {
    format!("applications/{application}/tasks")
}

/// Register `application` with the gateway. Needs `TEST_EMAIL`; the account
/// comes from `GCE_CREDENTIALS`.
pub fn create_app_operation(bindings: &Bindings, application: &str) -> verdict_core::Result<Operation> {
    let account = bindings.get("GCE_CREDENTIALS")?;
    let email = bindings.get("TEST_EMAIL")?;
    let job = json!({
        "type": "createApplication",
        "account": account,
        "application": {
            "name": application,
            "description": format!("Smoke test application {application}"),
            "email": email,
        },
        "user": "[anonymous]",
    });
    Ok(Operation::new(
        "create_app",
        task_path(application),
        make_payload(vec![job], &format!("Create Application: {application}"), application),
    ))
}

pub fn delete_app_operation(bindings: &Bindings, application: &str) -> verdict_core::Result<Operation> {
    let account = bindings.get("GCE_CREDENTIALS")?;
    let job = json!({
        "type": "deleteApplication",
        "account": account,
        "application": { "name": application },
        "user": "[anonymous]",
    });
    Ok(Operation::new(
        "delete_app",
        task_path(application),
        make_payload(vec![job], &format!("Delete Application: {application}"), application),
    ))
}
