use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::clause::{Clause, ClauseBuilder, ClauseOutcome, ClauseResult};
use crate::error::Result;
use crate::observer::ResourceObserver;

// ---------------------------------------------------------------------------
// VerifyStrategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerifyStrategy {
    #[default]
    Sequential,
    /// One task per clause, at most `max_workers` polling at once.
    Parallel { max_workers: usize },
}

// ---------------------------------------------------------------------------
// ContractResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractResult {
    pub passed: bool,
    /// Every clause result, passing ones included, in declaration order.
    pub clauses: Vec<ClauseResult>,
}

impl ContractResult {
    fn from_results(clauses: Vec<ClauseResult>) -> Self {
        Self {
            passed: clauses.iter().all(ClauseResult::passed),
            clauses,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ClauseResult> {
        self.clauses.iter().filter(|c| !c.passed())
    }

    /// Multi-line explanation: one line per failing clause, or a short
    /// confirmation when everything held.
    pub fn summary(&self) -> String {
        if self.passed {
            return format!("{} clause(s) passed", self.clauses.len());
        }
        self.failures()
            .map(ClauseResult::summary)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// The clauses that together define success for one operation.
///
/// A contract without clauses always passes.
#[derive(Debug, Clone, Default)]
pub struct Contract {
    clauses: Vec<Arc<Clause>>,
}

impl Contract {
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self {
            clauses: clauses.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn clauses(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter().map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub async fn verify(&self, strategy: VerifyStrategy, cancel: &CancelToken) -> ContractResult {
        let results = match strategy {
            VerifyStrategy::Sequential => {
                let mut results = Vec::with_capacity(self.clauses.len());
                for clause in &self.clauses {
                    results.push(clause.evaluate(cancel).await);
                }
                results
            }
            VerifyStrategy::Parallel { max_workers } => {
                self.verify_parallel(max_workers.max(1), cancel).await
            }
        };
        let result = ContractResult::from_results(results);
        debug!(passed = result.passed, clauses = result.clauses.len(), "contract verified");
        result
    }

    async fn verify_parallel(&self, max_workers: usize, cancel: &CancelToken) -> Vec<ClauseResult> {
        let semaphore = Arc::new(Semaphore::new(max_workers));
        let mut handles = Vec::with_capacity(self.clauses.len());

        for clause in &self.clauses {
            let clause = Arc::clone(clause);
            let sem = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match sem.acquire().await {
                    Ok(p) => p,
                    Err(_) => {
                        return ClauseResult {
                            clause: clause.name().to_string(),
                            outcome: ClauseOutcome::Cancelled,
                            attempts: 0,
                            elapsed_ms: 0,
                            snapshot: None,
                            explanation: "worker pool closed".to_string(),
                        }
                    }
                };
                clause.evaluate(&cancel).await
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .zip(&self.clauses)
            .map(|(joined, clause)| match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(clause = clause.name(), error = %e, "clause task failed");
                    ClauseResult {
                        clause: clause.name().to_string(),
                        outcome: ClauseOutcome::ObserverError,
                        attempts: 0,
                        elapsed_ms: 0,
                        snapshot: None,
                        explanation: format!("clause task join error: {e}"),
                    }
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ContractBuilder
// ---------------------------------------------------------------------------

/// Collects clauses that share one observer.
///
/// ```rust,ignore
/// let contract = ContractBuilder::new(observer)
///     .clause("Target Pool Added", |c| {
///         c.list_resources("target-pools").contains("name", "lb-tp")
///     })
///     .build()?;
/// ```
pub struct ContractBuilder {
    observer: Arc<dyn ResourceObserver>,
    builders: Vec<ClauseBuilder>,
}

impl ContractBuilder {
    pub fn new(observer: Arc<dyn ResourceObserver>) -> Self {
        Self {
            observer,
            builders: Vec::new(),
        }
    }

    pub fn clause(
        mut self,
        name: impl Into<String>,
        configure: impl FnOnce(ClauseBuilder) -> ClauseBuilder,
    ) -> Self {
        let builder = ClauseBuilder::new(name, Arc::clone(&self.observer));
        self.builders.push(configure(builder));
        self
    }

    /// Build every clause; the first misconfigured one aborts the contract.
    pub fn build(self) -> Result<Contract> {
        let clauses = self
            .builders
            .into_iter()
            .map(ClauseBuilder::build)
            .collect::<Result<Vec<_>>>()?;
        Ok(Contract::new(clauses))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::MemoryObserver;
    use serde_json::json;
    use std::time::Duration;

    fn seeded() -> Arc<MemoryObserver> {
        let observer = Arc::new(MemoryObserver::new("mem"));
        observer.insert("target-pools", json!({"name": "lb-tp"}));
        observer.insert("forwarding-rules", json!({"name": "lb", "target": "r/targetPools/lb-tp"}));
        observer
    }

    #[tokio::test]
    async fn empty_contract_passes() {
        let result = Contract::empty()
            .verify(VerifyStrategy::Sequential, &CancelToken::never())
            .await;
        assert!(result.passed);
        assert!(result.clauses.is_empty());
    }

    #[tokio::test]
    async fn all_clauses_must_pass() {
        let contract = ContractBuilder::new(seeded())
            .clause("Pool", |c| c.list_resources("target-pools").contains("name", "lb-tp"))
            .clause("Health Check", |c| {
                c.list_resources("http-health-checks").contains("name", "lb-hc")
            })
            .build()
            .unwrap();

        let result = contract
            .verify(VerifyStrategy::Sequential, &CancelToken::never())
            .await;
        assert!(!result.passed);
        assert_eq!(result.clauses.len(), 2);
        assert!(result.clauses[0].passed());
        assert_eq!(result.failures().count(), 1);
        assert!(result.summary().starts_with("Health Check: mismatch"));
    }

    #[tokio::test]
    async fn build_surfaces_first_misconfigured_clause() {
        let err = ContractBuilder::new(seeded())
            .clause("Good", |c| c.list_resources("target-pools").contains("name", "x"))
            .clause("Bad", |c| c.list_resources("target-pools").contains("name[", "x"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("name["));
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_keeps_passing_results_alongside_failures() {
        let contract = ContractBuilder::new(seeded())
            .clause("Never Appears", |c| {
                c.retryable_for_secs(20)
                    .retry_interval(Duration::from_secs(2))
                    .list_resources("instances")
                    .contains("name", "ghost")
            })
            .clause("Rule Added", |c| {
                c.list_resources("forwarding-rules").contains_group(vec![
                    crate::Predicate::field_equals("name", "lb").unwrap(),
                    crate::Predicate::field_contains("target", "targetPools/lb-tp").unwrap(),
                ])
            })
            .build()
            .unwrap();

        let result = contract
            .verify(VerifyStrategy::Parallel { max_workers: 4 }, &CancelToken::never())
            .await;
        assert!(!result.passed);
        assert_eq!(result.clauses[0].outcome, ClauseOutcome::TimedOut);
        assert!(result.clauses[1].passed());
        assert!(!result.clauses[1].explanation.is_empty());
    }
}
