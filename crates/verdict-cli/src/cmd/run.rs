use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tracing::{info, warn};
use verdict_agent::GateClient;
use verdict_core::report::{records, to_junit_xml};
use verdict_core::{
    cancel, ExecutionOptions, OperationExecutor, RunStamp, StepStatus, SuiteReport, SuiteRunner,
    VerifyStrategy,
};

use super::ScenarioArgs;
use crate::output::{print_json, print_table};
use crate::scenario::SmokeScenario;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Write a JUnit XML report to this file
    #[arg(long)]
    pub junit: Option<PathBuf>,

    /// Verify up to N clauses of a contract concurrently (1 = sequential)
    #[arg(long, default_value_t = 1)]
    pub parallel: usize,

    /// Cancel the whole suite after this many seconds
    #[arg(long)]
    pub suite_timeout: Option<u64>,

    /// Seconds between task status polls (at least 1)
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,

    /// Give up waiting on a task's status after this many seconds
    #[arg(long, default_value_t = 300)]
    pub poll_timeout: u64,
}

impl RunArgs {
    fn execution_options(&self) -> ExecutionOptions {
        let strategy = if self.parallel > 1 {
            VerifyStrategy::Parallel {
                max_workers: self.parallel,
            }
        } else {
            VerifyStrategy::Sequential
        };
        ExecutionOptions {
            poll_interval: Duration::from_secs(self.poll_interval),
            poll_timeout: Duration::from_secs(self.poll_timeout),
            strategy,
            ..ExecutionOptions::default()
        }
    }
}

/// Execute the suite. Returns whether every step passed.
pub fn run(scenario_args: &ScenarioArgs, args: &RunArgs, json: bool) -> anyhow::Result<bool> {
    let bindings = scenario_args.resolve(&RunStamp::now())?;
    let gate_url = bindings
        .get("GATE_URL")
        .context("no gateway configured; pass --gate-url or set GATE_URL")?
        .to_string();
    let observer = Arc::new(scenario_args.observer(&bindings, true)?);
    let transport = Arc::new(GateClient::new(&gate_url).context("failed to build HTTP client")?);

    let scenario = SmokeScenario::new(bindings, observer)?;
    let case = scenario.test_case()?;
    let runner = SuiteRunner::new(OperationExecutor::new(transport), args.execution_options());

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let (handle, token) = cancel::channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling run");
                handle.cancel();
            }
        });

        info!(suite = case.name(), gate = %gate_url, "starting run");
        match args.suite_timeout {
            Some(secs) => {
                runner
                    .run_with_timeout(&case, Duration::from_secs(secs), &token)
                    .await
            }
            None => runner.run(&case, &token).await,
        }
    });

    if let Some(path) = &args.junit {
        std::fs::write(path, to_junit_xml(&report))
            .with_context(|| format!("failed to write JUnit report to {}", path.display()))?;
    }

    if json {
        print_json(&report)?;
    } else {
        print_summary(&report);
    }
    Ok(report.passed)
}

fn print_summary(report: &SuiteReport) {
    let rows = records(report)
        .into_iter()
        .map(|r| {
            let status = match r.status {
                StepStatus::Passed => "PASS",
                StepStatus::Failed => "FAIL",
                StepStatus::Skipped => "SKIP",
            };
            vec![
                r.name,
                status.to_string(),
                format!("{:.1}s", r.elapsed_ms as f64 / 1000.0),
                r.explanation.lines().next().unwrap_or_default().to_string(),
            ]
        })
        .collect();
    print_table(&["STEP", "STATUS", "TIME", "DETAIL"], rows);

    for step in report.steps.iter().filter(|s| s.status == StepStatus::Failed) {
        println!();
        println!("{} failed:", step.name);
        for line in step.explanation.lines() {
            println!("  {line}");
        }
    }

    println!();
    println!(
        "{}: {} passed, {} failed, {} skipped in {:.1}s",
        if report.passed { "PASSED" } else { "FAILED" },
        report.count(StepStatus::Passed),
        report.count(StepStatus::Failed),
        report.count(StepStatus::Skipped),
        report.elapsed_ms as f64 / 1000.0
    );
}
