pub mod plan;
pub mod run;

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use verdict_agent::GcloudObserver;
use verdict_core::{Bindings, RunStamp};

use crate::scenario;

pub const DEFAULT_ZONE: &str = "us-central1-f";
pub const DEFAULT_REGION: &str = "us-central1";
pub const DEFAULT_CREDENTIALS: &str = "my-google-account";

/// Scenario inputs. Precedence: flag or env var, then the bindings file,
/// then built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct ScenarioArgs {
    /// YAML file of bindings (`KEY: value` per line)
    #[arg(long, global = true, env = "VERDICT_BINDINGS")]
    pub bindings: Option<PathBuf>,

    /// Base URL of the orchestration gateway
    #[arg(long, global = true, env = "GATE_URL")]
    pub gate_url: Option<String>,

    /// Google Cloud project to observe
    #[arg(long, global = true, env = "GCE_PROJECT")]
    pub project: Option<String>,

    #[arg(long, global = true, env = "GCE_ZONE")]
    pub zone: Option<String>,

    #[arg(long, global = true, env = "GCE_REGION")]
    pub region: Option<String>,

    /// Account name the gateway deploys with
    #[arg(long, global = true, env = "GCE_CREDENTIALS")]
    pub credentials: Option<String>,

    /// Application name (default: smoketestapp<HHMMSS>)
    #[arg(long, global = true)]
    pub app_name: Option<String>,

    #[arg(long, global = true)]
    pub stack: Option<String>,

    /// Component detail appended to load balancer names
    #[arg(long, global = true)]
    pub detail: Option<String>,

    #[arg(long, global = true)]
    pub email: Option<String>,

    /// gcloud executable (default: found on PATH)
    #[arg(long, global = true, env = "GCLOUD")]
    pub gcloud: Option<PathBuf>,
}

impl ScenarioArgs {
    pub fn resolve(&self, stamp: &RunStamp) -> anyhow::Result<Bindings> {
        let mut bindings = match &self.bindings {
            Some(path) => Bindings::load(path)
                .with_context(|| format!("failed to load bindings from {}", path.display()))?,
            None => Bindings::new(),
        };

        let flags = [
            ("GATE_URL", &self.gate_url),
            ("GCE_PROJECT", &self.project),
            ("GCE_ZONE", &self.zone),
            ("GCE_REGION", &self.region),
            ("GCE_CREDENTIALS", &self.credentials),
            ("TEST_APP_NAME", &self.app_name),
            ("TEST_STACK", &self.stack),
            ("TEST_COMPONENT_DETAIL", &self.detail),
            ("TEST_EMAIL", &self.email),
        ];
        for (key, value) in flags {
            if let Some(value) = value {
                bindings = bindings.with(key, value.clone());
            }
        }

        Ok(scenario::with_defaults(bindings, stamp)
            .with_default("GCE_ZONE", DEFAULT_ZONE)
            .with_default("GCE_REGION", DEFAULT_REGION)
            .with_default("GCE_CREDENTIALS", DEFAULT_CREDENTIALS))
    }

    /// Observer scoped to the bound zone and region. With `lookup`, a missing
    /// `--gcloud` is resolved on `PATH` and `GCE_PROJECT` is required.
    pub fn observer(&self, bindings: &Bindings, lookup: bool) -> anyhow::Result<GcloudObserver> {
        let observer = match (&self.gcloud, lookup) {
            (Some(program), _) => {
                let project = if lookup {
                    bindings.get("GCE_PROJECT")?
                } else {
                    bindings.get("GCE_PROJECT").unwrap_or("<unset>")
                };
                GcloudObserver::with_command(program, Vec::new(), project)
            }
            (None, true) => GcloudObserver::new(bindings.get("GCE_PROJECT")?)
                .context("gcloud is required to observe Compute Engine resources")?,
            (None, false) => GcloudObserver::with_command(
                "gcloud",
                Vec::new(),
                bindings.get("GCE_PROJECT").unwrap_or("<unset>"),
            ),
        };
        Ok(observer
            .zone(bindings.get("GCE_ZONE")?)
            .region(bindings.get("GCE_REGION")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn stamp() -> RunStamp {
        RunStamp::at(&chrono::Utc::now())
    }

    #[test]
    fn flags_override_file_and_defaults_fill_gaps() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "GCE_PROJECT: from-file\nTEST_STACK: filestack\nGCE_ZONE: europe-west1-b").unwrap();

        let args = ScenarioArgs {
            bindings: Some(file.path().to_path_buf()),
            project: Some("from-flag".into()),
            ..Default::default()
        };
        let bindings = args.resolve(&stamp()).unwrap();
        assert_eq!(bindings.get("GCE_PROJECT").unwrap(), "from-flag");
        assert_eq!(bindings.get("TEST_STACK").unwrap(), "filestack");
        assert_eq!(bindings.get("GCE_ZONE").unwrap(), "europe-west1-b");
        assert_eq!(bindings.get("GCE_REGION").unwrap(), DEFAULT_REGION);
        assert!(bindings.get("TEST_APP_NAME").unwrap().starts_with("smoketestapp"));
        assert!(!bindings.contains("GATE_URL"));
    }

    #[test]
    fn missing_bindings_file_is_an_error() {
        let args = ScenarioArgs {
            bindings: Some(PathBuf::from("/nonexistent/bindings.yaml")),
            ..Default::default()
        };
        let err = args.resolve(&stamp()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to load bindings"));
    }

    #[test]
    fn observer_requires_project_when_running() {
        let args = ScenarioArgs {
            gcloud: Some(PathBuf::from("/bin/true")),
            ..Default::default()
        };
        let bindings = args.resolve(&stamp()).unwrap();
        assert!(args.observer(&bindings, false).is_ok());
        let err = args.observer(&bindings, true).unwrap_err();
        assert!(err.to_string().contains("GCE_PROJECT"));
    }
}
