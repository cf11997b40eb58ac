use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use verdict_core::{Predicate, RunStamp, Selector, TestCase};

use super::ScenarioArgs;
use crate::output::{print_json, print_table};
use crate::scenario::SmokeScenario;

#[derive(Serialize)]
struct PlanClause<'a> {
    name: &'a str,
    observer: &'a str,
    selector: &'a Selector,
    predicates: &'a [Predicate],
    timeout_secs: u64,
    no_resource_ok: bool,
}

#[derive(Serialize)]
struct PlanStep<'a> {
    name: &'a str,
    operation: &'a str,
    path: &'a str,
    payload: &'a Value,
    verify_retries: Option<u32>,
    timeout_ok: bool,
    clauses: Vec<PlanClause<'a>>,
}

#[derive(Serialize)]
struct Plan<'a> {
    suite: &'a str,
    application: &'a str,
    steps: Vec<PlanStep<'a>>,
}

fn describe(case: &TestCase) -> Vec<PlanStep<'_>> {
    case.ordered_steps()
        .into_iter()
        .map(|step| {
            let operation = step.target().operation();
            PlanStep {
                name: step.name(),
                operation: operation.title(),
                path: operation.path(),
                payload: operation.payload(),
                verify_retries: step.overrides().verify_retries,
                timeout_ok: step.overrides().timeout_ok,
                clauses: step
                    .target()
                    .contract()
                    .clauses()
                    .map(|c| PlanClause {
                        name: c.name(),
                        observer: c.observer_name(),
                        selector: c.selector(),
                        predicates: c.predicates(),
                        timeout_secs: c.policy().timeout.as_secs(),
                        no_resource_ok: c.policy().allow_missing_as_pass,
                    })
                    .collect(),
            }
        })
        .collect()
}

/// Print the steps and clauses a run would execute. No network access.
pub fn run(args: &ScenarioArgs, json: bool) -> anyhow::Result<()> {
    let bindings = args.resolve(&RunStamp::now())?;
    let observer = Arc::new(args.observer(&bindings, false)?);
    let scenario = SmokeScenario::new(bindings, observer)?;
    let case = scenario.test_case()?;
    let application = scenario.bindings().get("TEST_APP_NAME")?;

    let plan = Plan {
        suite: case.name(),
        application,
        steps: describe(&case),
    };

    if json {
        return print_json(&plan);
    }

    println!("Suite: {}  (application {})", plan.suite, plan.application);
    for step in &plan.steps {
        println!();
        println!("{}  POST {}", step.name, step.path);
        if step.clauses.is_empty() {
            println!("  (no clauses)");
            continue;
        }
        let rows = step
            .clauses
            .iter()
            .map(|c| {
                let expect: Vec<String> = c.predicates.iter().map(|p| p.to_string()).collect();
                vec![
                    c.name.to_string(),
                    c.selector.to_string(),
                    format!("{}s", c.timeout_secs),
                    expect.join(", "),
                ]
            })
            .collect();
        print_table(&["CLAUSE", "SELECTOR", "TIMEOUT", "EXPECT"], rows);
    }
    Ok(())
}
