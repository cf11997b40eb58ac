use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;
use verdict_core::{ResourceObserver, ResourceSnapshot, VerdictError};

use crate::error::AgentError;
use crate::Result;

// ─── Collection scoping ───────────────────────────────────────────────────

const ZONAL: &[&str] = &["instances", "managed-instance-groups", "instance-groups", "disks"];
const REGIONAL: &[&str] = &["target-pools", "forwarding-rules", "addresses"];

/// `gcloud compute` words for a collection. Managed instance groups live
/// under `instance-groups managed`.
fn collection_words(collection: &str) -> Vec<&str> {
    match collection {
        "managed-instance-groups" => vec!["instance-groups", "managed"],
        other => vec![other],
    }
}

/// Upper bound on a single gcloud invocation.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Whether a failed describe reports that `id` itself is missing.
///
/// gcloud names the missing resource by its full path, e.g.
/// `The resource 'projects/p/zones/z/instances/web-1' was not found`. A
/// missing project or zone produces the same wording for a different path
/// and must stay an error.
fn is_not_found(stderr: &str, id: &str) -> bool {
    stderr.lines().any(|line| {
        line.contains("was not found")
            && (line.contains(&format!("/{id}'")) || line.contains(&format!("'{id}'")))
    })
}

// ─── GcloudObserver ───────────────────────────────────────────────────────

/// Reads Compute Engine resources by shelling out to
/// `gcloud compute <collection> list|describe --format=json`.
#[derive(Debug, Clone)]
pub struct GcloudObserver {
    program: PathBuf,
    /// Arguments placed before `compute`, e.g. a wrapper script path.
    prefix: Vec<String>,
    project: String,
    zone: Option<String>,
    region: Option<String>,
    timeout: Duration,
}

impl GcloudObserver {
    /// Locate `gcloud` on `PATH`.
    pub fn new(project: impl Into<String>) -> Result<Self> {
        let program = which::which("gcloud").map_err(|_| AgentError::GcloudNotFound)?;
        Ok(Self::with_command(program, Vec::new(), project))
    }

    pub fn with_command(
        program: impl Into<PathBuf>,
        prefix: Vec<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            prefix,
            project: project.into(),
            zone: None,
            region: None,
            timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn scope_arg(&self, collection: &str) -> Option<String> {
        if ZONAL.contains(&collection) {
            self.zone.as_ref().map(|z| format!("--zone={z}"))
        } else if REGIONAL.contains(&collection) {
            self.region.as_ref().map(|r| format!("--region={r}"))
        } else {
            None
        }
    }

    fn list_args(&self, collection: &str) -> Vec<String> {
        let mut args = vec!["compute".to_string()];
        args.extend(collection_words(collection).into_iter().map(String::from));
        args.push("list".into());
        args.push("--format=json".into());
        args.push(format!("--project={}", self.project));
        args
    }

    fn describe_args(&self, collection: &str, id: &str) -> Vec<String> {
        let mut args = vec!["compute".to_string()];
        args.extend(collection_words(collection).into_iter().map(String::from));
        args.push("describe".into());
        args.push(id.to_string());
        args.extend(self.scope_arg(collection));
        args.push("--format=json".into());
        args.push(format!("--project={}", self.project));
        args
    }

    fn build_command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix)
            .args(args)
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run gcloud to completion. The child is killed when the timeout fires
    /// or the caller drops the future.
    async fn output(&self, args: &[String]) -> Result<Output> {
        debug!(args = %args.join(" "), "running gcloud");
        tokio::time::timeout(self.timeout, self.build_command(args).output())
            .await
            .map_err(|_| AgentError::Timeout(self.timeout))?
            .map_err(AgentError::from)
    }

    fn parse(args: &[String], output: &Output) -> Result<Value> {
        serde_json::from_slice(&output.stdout).map_err(|source| AgentError::Parse {
            what: format!("gcloud {}", args.join(" ")),
            source,
        })
    }

    fn failure(output: &Output) -> AgentError {
        AgentError::Process {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    /// Any non-zero exit is an error.
    async fn run(&self, args: &[String]) -> Result<Value> {
        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(Self::failure(&output));
        }
        Self::parse(args, &output)
    }

    /// Like [`run`](Self::run), but `Ok(None)` when gcloud says `id` does not exist.
    async fn describe(&self, args: &[String], id: &str) -> Result<Option<Value>> {
        let output = self.output(args).await?;
        if !output.status.success() {
            if is_not_found(&String::from_utf8_lossy(&output.stderr), id) {
                return Ok(None);
            }
            return Err(Self::failure(&output));
        }
        Self::parse(args, &output).map(Some)
    }

    fn observer_error(&self, err: AgentError) -> VerdictError {
        VerdictError::observer(self.name(), err.to_string())
    }
}

#[async_trait]
impl ResourceObserver for GcloudObserver {
    fn name(&self) -> &str {
        "gcloud"
    }

    async fn list(&self, collection: &str) -> verdict_core::Result<ResourceSnapshot> {
        let value = self
            .run(&self.list_args(collection))
            .await
            .map_err(|e| self.observer_error(e))?;
        match value {
            Value::Array(items) => Ok(ResourceSnapshot::Records(items)),
            other => Err(self.observer_error(AgentError::Protocol(format!(
                "expected a JSON array from list {collection}, got {other}"
            )))),
        }
    }

    async fn inspect(&self, collection: &str, id: &str) -> verdict_core::Result<ResourceSnapshot> {
        let value = self
            .describe(&self.describe_args(collection, id), id)
            .await
            .map_err(|e| self.observer_error(e))?;
        Ok(match value {
            None => ResourceSnapshot::Absent,
            Some(record) => ResourceSnapshot::Record(record),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FAKE_GCLOUD: &str = r#"#!/bin/sh
case "$*" in
  *"target-pools list"*)
    echo '[{"name":"lb-tp","region":"us-central1"}]' ;;
  *"forwarding-rules list"*)
    echo "ERROR: (gcloud.compute.forwarding-rules.list) permission denied" >&2
    exit 1 ;;
  *"describe missing"*)
    echo "ERROR: (gcloud.compute.instance-groups.managed.describe) Could not fetch resource:" >&2
    echo " - The resource 'projects/my-project/zones/us-central1-f/instanceGroupManagers/missing' was not found" >&2
    exit 1 ;;
  *"describe orphan"*|*"disks list"*)
    echo "ERROR: (gcloud.compute) Could not fetch resource:" >&2
    echo " - The resource 'projects/typo-project' was not found" >&2
    exit 1 ;;
  *"addresses list"*)
    sleep 5
    echo '[]' ;;
  *"describe app-smoke-v000"*)
    printf '{"name":"app-smoke-v000","targetSize":2,"args":"%s"}\n' "$*" ;;
  *"instances list"*)
    echo 'not json' ;;
  *)
    echo '[]' ;;
esac
"#;

    fn fake() -> (TempDir, GcloudObserver) {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("gcloud.sh");
        std::fs::write(&script, FAKE_GCLOUD).unwrap();
        let observer = GcloudObserver::with_command(
            "sh",
            vec![script.to_string_lossy().into_owned()],
            "my-project",
        )
        .zone("us-central1-f")
        .region("us-central1");
        (dir, observer)
    }

    #[test]
    fn describe_args_are_scoped_by_collection() {
        let (_dir, observer) = fake();
        let args = observer.describe_args("managed-instance-groups", "g");
        assert_eq!(
            args,
            vec![
                "compute",
                "instance-groups",
                "managed",
                "describe",
                "g",
                "--zone=us-central1-f",
                "--format=json",
                "--project=my-project",
            ]
        );
        assert!(observer
            .describe_args("target-pools", "tp")
            .contains(&"--region=us-central1".to_string()));
        let global = observer.describe_args("http-health-checks", "hc");
        assert!(!global.iter().any(|a| a.starts_with("--zone") || a.starts_with("--region")));
    }

    #[tokio::test]
    async fn list_returns_records() {
        let (_dir, observer) = fake();
        let snapshot = observer.list("target-pools").await.unwrap();
        assert_eq!(snapshot.members().len(), 1);
        assert_eq!(snapshot.members()[0]["name"], "lb-tp");
    }

    #[tokio::test]
    async fn describe_not_found_is_absent() {
        let (_dir, observer) = fake();
        let snapshot = observer
            .inspect("managed-instance-groups", "missing")
            .await
            .unwrap();
        assert!(snapshot.is_absent());
    }

    #[tokio::test]
    async fn describe_of_missing_project_is_observer_error() {
        let (_dir, observer) = fake();
        let err = observer.inspect("instances", "orphan").await.unwrap_err();
        assert!(matches!(err, VerdictError::Observer { .. }));
        assert!(err.to_string().contains("projects/typo-project"));
    }

    #[tokio::test]
    async fn list_failure_is_never_absent() {
        let (_dir, observer) = fake();
        let err = observer.list("disks").await.unwrap_err();
        assert!(matches!(err, VerdictError::Observer { .. }));
        assert!(err.to_string().contains("was not found"));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let (_dir, observer) = fake();
        let observer = observer.timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = observer.list("addresses").await.unwrap_err();
        assert!(matches!(err, VerdictError::Observer { .. }));
        assert!(err.to_string().contains("did not finish"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn not_found_must_name_the_described_resource() {
        let missing = "ERROR: (gcloud.compute.instances.describe) Could not fetch resource:\n \
                       - The resource 'projects/p/zones/z/instances/web-1' was not found";
        assert!(is_not_found(missing, "web-1"));
        assert!(!is_not_found(missing, "web"));
        assert!(!is_not_found(" - The resource 'projects/p' was not found", "web-1"));
        assert!(!is_not_found("HTTP 404 from compute.googleapis.com", "web-1"));
    }

    #[tokio::test]
    async fn describe_passes_zone() {
        let (_dir, observer) = fake();
        let snapshot = observer
            .inspect("managed-instance-groups", "app-smoke-v000")
            .await
            .unwrap();
        let record = &snapshot.members()[0];
        assert_eq!(record["targetSize"], 2);
        let args = record["args"].as_str().unwrap();
        assert!(args.contains("instance-groups managed describe app-smoke-v000 --zone=us-central1-f"));
        assert!(args.ends_with("--quiet"));
    }

    #[tokio::test]
    async fn command_failure_is_observer_error() {
        let (_dir, observer) = fake();
        let err = observer.list("forwarding-rules").await.unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, VerdictError::Observer { .. }));
        assert!(msg.contains("permission denied"), "{msg}");
    }

    #[tokio::test]
    async fn invalid_json_is_observer_error() {
        let (_dir, observer) = fake();
        let err = observer.list("instances").await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[tokio::test]
    async fn empty_list_is_empty_records() {
        let (_dir, observer) = fake();
        let snapshot = observer.list("http-health-checks").await.unwrap();
        assert!(!snapshot.is_absent());
        assert!(snapshot.members().is_empty());
    }
}
