//! Flattened records and JUnit XML for a finished suite.

use serde::{Deserialize, Serialize};

use crate::runner::{StepStatus, SuiteReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub passed: bool,
    pub status: StepStatus,
    pub explanation: String,
    pub elapsed_ms: u64,
}

pub fn records(report: &SuiteReport) -> Vec<StepRecord> {
    report
        .steps
        .iter()
        .map(|s| StepRecord {
            name: s.name.clone(),
            passed: s.status == StepStatus::Passed,
            status: s.status,
            explanation: s.explanation.clone(),
            elapsed_ms: s.elapsed_ms,
        })
        .collect()
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn secs(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

/// Render a JUnit-style `<testsuite>` document. Failed steps carry the full
/// explanation as failure text; skipped steps are marked `<skipped/>`.
pub fn to_junit_xml(report: &SuiteReport) -> String {
    let suite = escape(&report.suite);
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuite name=\"{suite}\" id=\"{}\" tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{}\" timestamp=\"{}\">\n",
        report.run_id,
        report.steps.len(),
        report.count(StepStatus::Failed),
        report.count(StepStatus::Skipped),
        secs(report.elapsed_ms),
        report.started_at.to_rfc3339(),
    ));

    for step in &report.steps {
        let open = format!(
            "  <testcase classname=\"{suite}\" name=\"{}\" time=\"{}\"",
            escape(&step.name),
            secs(step.elapsed_ms)
        );
        match step.status {
            StepStatus::Passed => {
                xml.push_str(&open);
                xml.push_str("/>\n");
            }
            StepStatus::Failed => {
                let headline = step.explanation.lines().next().unwrap_or("failed");
                xml.push_str(&open);
                xml.push_str(&format!(
                    ">\n    <failure message=\"{}\">{}</failure>\n  </testcase>\n",
                    escape(headline),
                    escape(&step.explanation)
                ));
            }
            StepStatus::Skipped => {
                xml.push_str(&open);
                xml.push_str(&format!(
                    ">\n    <skipped message=\"{}\"/>\n  </testcase>\n",
                    escape(&step.explanation)
                ));
            }
        }
    }

    xml.push_str("</testsuite>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::StepReport;
    use chrono::Utc;
    use uuid::Uuid;

    fn step(name: &str, status: StepStatus, explanation: &str) -> StepReport {
        StepReport {
            name: name.to_string(),
            status,
            explanation: explanation.to_string(),
            elapsed_ms: 1500,
            execution: None,
        }
    }

    fn report() -> SuiteReport {
        SuiteReport {
            run_id: Uuid::nil(),
            suite: "smoke".to_string(),
            started_at: Utc::now(),
            passed: false,
            elapsed_ms: 4500,
            steps: vec![
                step("a_create_app", StepStatus::Passed, "passed"),
                step(
                    "b_create_network_load_balancer",
                    StepStatus::Failed,
                    "Target Pool Added: mismatch after 1 attempt(s): 'name' is \"a\" & <b>\nsecond line",
                ),
                step("z_delete_app", StepStatus::Skipped, "run cancelled"),
            ],
        }
    }

    #[test]
    fn junit_counts_and_escapes() {
        let xml = to_junit_xml(&report());
        assert!(xml.contains("tests=\"3\" failures=\"1\" skipped=\"1\" time=\"4.500\""));
        assert!(xml.contains("<testcase classname=\"smoke\" name=\"a_create_app\" time=\"1.500\"/>"));
        assert!(xml.contains("&quot;a&quot; &amp; &lt;b&gt;"));
        assert!(xml.contains("<skipped message=\"run cancelled\"/>"));
        assert!(xml.trim_end().ends_with("</testsuite>"));
    }

    #[test]
    fn failure_message_is_first_line_only() {
        let xml = to_junit_xml(&report());
        assert!(xml.contains(
            "message=\"Target Pool Added: mismatch after 1 attempt(s): &apos;name&apos; is &quot;a&quot; &amp; &lt;b&gt;\">"
        ));
        assert!(xml.contains("second line</failure>"));
    }

    #[test]
    fn records_flatten_steps() {
        let records = records(&report());
        assert_eq!(records.len(), 3);
        assert!(records[0].passed);
        assert!(!records[1].passed);
        assert_eq!(records[2].status, StepStatus::Skipped);
    }
}
