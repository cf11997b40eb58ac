use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{Result, VerdictError};
use crate::observer::{ResourceObserver, Selector};
use crate::predicate::Predicate;
use crate::snapshot::ResourceSnapshot;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How long a clause keeps polling, and how often.
///
/// `timeout` of zero means exactly one attempt. Polling is on a fixed cadence;
/// the final sleep is clipped to the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub interval: Duration,
    /// Accept an `Absent` snapshot as a pass without evaluating predicates.
    pub allow_missing_as_pass: bool,
}

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            interval: DEFAULT_RETRY_INTERVAL,
            allow_missing_as_pass: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ClauseOutcome / ClauseResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseOutcome {
    Passed,
    /// Single-shot clause did not match.
    Mismatch,
    /// Retry budget exhausted without a match.
    TimedOut,
    /// The last attempt could not read the resource.
    ObserverError,
    Cancelled,
}

impl ClauseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClauseOutcome::Passed => "passed",
            ClauseOutcome::Mismatch => "mismatch",
            ClauseOutcome::TimedOut => "timed_out",
            ClauseOutcome::ObserverError => "observer_error",
            ClauseOutcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ClauseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseResult {
    pub clause: String,
    pub outcome: ClauseOutcome,
    /// Number of fetch/evaluate cycles performed.
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// Most recent snapshot the observer returned, if any.
    pub snapshot: Option<ResourceSnapshot>,
    pub explanation: String,
}

impl ClauseResult {
    pub fn passed(&self) -> bool {
        self.outcome == ClauseOutcome::Passed
    }

    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// One-line description naming the clause, outcome and reason, plus the
    /// last observed state for failures.
    pub fn summary(&self) -> String {
        if self.passed() {
            return format!("{}: passed ({})", self.clause, self.explanation);
        }
        let observed = self
            .snapshot
            .as_ref()
            .map(ResourceSnapshot::describe)
            .unwrap_or_else(|| "nothing observed".to_string());
        format!(
            "{}: {} after {} attempt(s): {}; last observed {}",
            self.clause, self.outcome, self.attempts, self.explanation, observed
        )
    }
}

// ---------------------------------------------------------------------------
// Clause
// ---------------------------------------------------------------------------

/// One verifiable expectation about external state. Immutable once built.
pub struct Clause {
    name: String,
    observer: Arc<dyn ResourceObserver>,
    selector: Selector,
    predicates: Vec<Predicate>,
    policy: RetryPolicy,
}

enum Attempt {
    Matched(ResourceSnapshot, String),
    Missed(ResourceSnapshot, String),
    Errored(String),
    Cancelled,
}

impl Clause {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn observer_name(&self) -> &str {
        self.observer.name()
    }

    /// Poll until the predicate chain holds or the deadline passes.
    ///
    /// Always yields exactly one result; observer failures and cancellation are
    /// reported through [`ClauseOutcome`], never as `Err`.
    pub async fn evaluate(&self, cancel: &CancelToken) -> ClauseResult {
        let start = Instant::now();
        let deadline = start + self.policy.timeout;
        let mut attempts = 0u32;
        let mut last_snapshot = None;

        let finish = |outcome: ClauseOutcome,
                      attempts: u32,
                      snapshot: Option<ResourceSnapshot>,
                      explanation: String| ClauseResult {
            clause: self.name.clone(),
            outcome,
            attempts,
            elapsed_ms: start.elapsed().as_millis() as u64,
            snapshot,
            explanation,
        };

        if cancel.is_cancelled() {
            return finish(
                ClauseOutcome::Cancelled,
                0,
                None,
                "run cancelled before first attempt".to_string(),
            );
        }

        loop {
            attempts += 1;
            let (failed_outcome, explanation) = match self.attempt(cancel).await {
                Attempt::Matched(snapshot, explanation) => {
                    info!(clause = %self.name, attempts, "clause passed");
                    return finish(ClauseOutcome::Passed, attempts, Some(snapshot), explanation);
                }
                Attempt::Missed(snapshot, explanation) => {
                    last_snapshot = Some(snapshot);
                    let outcome = if self.policy.timeout.is_zero() {
                        ClauseOutcome::Mismatch
                    } else {
                        ClauseOutcome::TimedOut
                    };
                    (outcome, explanation)
                }
                Attempt::Errored(message) => {
                    warn!(clause = %self.name, attempt = attempts, error = %message, "observer error");
                    (ClauseOutcome::ObserverError, message)
                }
                Attempt::Cancelled => {
                    return finish(
                        ClauseOutcome::Cancelled,
                        attempts,
                        last_snapshot,
                        "cancelled while reading the resource".to_string(),
                    );
                }
            };

            let now = Instant::now();
            if now >= deadline {
                warn!(clause = %self.name, attempts, outcome = %failed_outcome, "clause failed");
                return finish(failed_outcome, attempts, last_snapshot, explanation);
            }

            let pause = self.policy.interval.min(deadline - now);
            debug!(
                clause = %self.name,
                attempt = attempts,
                reason = %explanation,
                "no match yet; retrying in {pause:?}"
            );
            if !cancel.sleep(pause).await {
                return finish(
                    ClauseOutcome::Cancelled,
                    attempts,
                    last_snapshot,
                    format!("cancelled while waiting: {explanation}"),
                );
            }
        }
    }

    async fn attempt(&self, cancel: &CancelToken) -> Attempt {
        let snapshot = match cancel.or_cancelled(self.observer.fetch(&self.selector)).await {
            None => return Attempt::Cancelled,
            Some(Ok(snapshot)) => snapshot,
            Some(Err(e)) => return Attempt::Errored(e.to_string()),
        };

        if self.policy.allow_missing_as_pass && snapshot.is_absent() {
            return Attempt::Matched(snapshot, "resource absent, accepted".to_string());
        }

        for predicate in &self.predicates {
            let result = predicate.evaluate(&snapshot);
            if !result.matched {
                return Attempt::Missed(snapshot, result.explanation);
            }
        }
        let explanation = format!("{} predicate(s) matched", self.predicates.len());
        Attempt::Matched(snapshot, explanation)
    }
}

impl fmt::Debug for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clause")
            .field("name", &self.name)
            .field("observer", &self.observer.name())
            .field("selector", &self.selector)
            .field("predicates", &self.predicates)
            .field("policy", &self.policy)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ClauseBuilder
// ---------------------------------------------------------------------------

/// Fluent construction of a [`Clause`].
///
/// Predicate helpers that parse a field path record the first error and
/// surface it from [`ClauseBuilder::build`], so chains stay infallible.
///
/// ```rust,ignore
/// let clause = ClauseBuilder::new("Target Pool Added", observer)
///     .retryable_for_secs(30)
///     .list_resources("target-pools")
///     .contains("name", "app-smoke-fe-tp")
///     .build()?;
/// ```
pub struct ClauseBuilder {
    name: String,
    observer: Arc<dyn ResourceObserver>,
    selector: Option<Selector>,
    predicates: Vec<Predicate>,
    policy: RetryPolicy,
    error: Option<VerdictError>,
}

impl ClauseBuilder {
    pub fn new(name: impl Into<String>, observer: Arc<dyn ResourceObserver>) -> Self {
        Self {
            name: name.into(),
            observer,
            selector: None,
            predicates: Vec::new(),
            policy: RetryPolicy::default(),
            error: None,
        }
    }

    pub fn retryable_for_secs(self, secs: u64) -> Self {
        self.retryable_for(Duration::from_secs(secs))
    }

    pub fn retryable_for(mut self, timeout: Duration) -> Self {
        self.policy.timeout = timeout;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.policy.interval = interval;
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn list_resources(mut self, collection: impl Into<String>) -> Self {
        self.selector = Some(Selector::List {
            collection: collection.into(),
        });
        self
    }

    pub fn inspect_resource(mut self, collection: impl Into<String>, id: impl Into<String>) -> Self {
        self.selector = Some(Selector::Inspect {
            collection: collection.into(),
            id: id.into(),
        });
        self
    }

    /// Treat a missing resource as a pass.
    pub fn no_resource_ok(mut self, ok: bool) -> Self {
        self.policy.allow_missing_as_pass = ok;
        self
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    fn push(mut self, predicate: Result<Predicate>) -> Self {
        match predicate {
            Ok(p) => self.predicates.push(p),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
        self
    }

    /// Some record has `field == value`.
    pub fn contains(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(Predicate::collection_contains(field, value))
    }

    /// No record has `field == value`.
    pub fn excludes(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(Predicate::collection_excludes(field, value))
    }

    /// No record's `field` contains `value`.
    pub fn excludes_containing(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(Predicate::collection_excludes_containing(field, value))
    }

    /// The value at `path` equals `value`.
    pub fn contains_eq(self, path: &str, value: impl Into<Value>) -> Self {
        self.push(Predicate::field_equals(path, value))
    }

    /// The value at `path` contains `value` (substring, element or subset).
    pub fn contains_path(self, path: &str, value: impl Into<Value>) -> Self {
        self.push(Predicate::field_contains(path, value))
    }

    pub fn contains_subset(self, expected: Value) -> Self {
        let predicate = match expected {
            Value::Object(map) => Ok(Predicate::subset(map)),
            other => Err(VerdictError::InvalidClause {
                clause: self.name.clone(),
                reason: format!("subset expectation must be an object, got {other}"),
            }),
        };
        self.push(predicate)
    }

    pub fn contains_group(self, predicates: Vec<Predicate>) -> Self {
        self.push(Ok(Predicate::group(predicates)))
    }

    pub fn build(self) -> Result<Clause> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let invalid = |reason: &str| VerdictError::InvalidClause {
            clause: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("clause name is empty"));
        }
        let Some(selector) = self.selector.clone() else {
            return Err(invalid("no resource selector; call list_resources or inspect_resource"));
        };
        if self.predicates.is_empty() {
            return Err(invalid("no predicates"));
        }
        if !self.policy.timeout.is_zero() && self.policy.interval.is_zero() {
            return Err(invalid("retry interval must be positive when a timeout is set"));
        }
        Ok(Clause {
            name: self.name,
            observer: self.observer,
            selector,
            predicates: self.predicates,
            policy: self.policy,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::MemoryObserver;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Lists an empty collection until the `after`-th call, then the record.
    struct AppearsAfter {
        after: u32,
        calls: AtomicU32,
        record: Value,
    }

    #[async_trait]
    impl ResourceObserver for AppearsAfter {
        fn name(&self) -> &str {
            "appears-after"
        }

        async fn list(&self, _collection: &str) -> Result<ResourceSnapshot> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.after {
                Ok(ResourceSnapshot::Records(vec![self.record.clone()]))
            } else {
                Ok(ResourceSnapshot::Records(vec![]))
            }
        }

        async fn inspect(&self, _collection: &str, _id: &str) -> Result<ResourceSnapshot> {
            Ok(ResourceSnapshot::Absent)
        }
    }

    struct Broken;

    #[async_trait]
    impl ResourceObserver for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn list(&self, _collection: &str) -> Result<ResourceSnapshot> {
            Err(VerdictError::observer("broken", "connection refused"))
        }

        async fn inspect(&self, _collection: &str, _id: &str) -> Result<ResourceSnapshot> {
            Err(VerdictError::observer("broken", "connection refused"))
        }
    }

    /// Never answers, like a backend that hangs on a dead connection.
    struct Hung;

    #[async_trait]
    impl ResourceObserver for Hung {
        fn name(&self) -> &str {
            "hung"
        }

        async fn list(&self, _collection: &str) -> Result<ResourceSnapshot> {
            std::future::pending().await
        }

        async fn inspect(&self, _collection: &str, _id: &str) -> Result<ResourceSnapshot> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_makes_exactly_one_attempt() {
        let observer = Arc::new(MemoryObserver::new("mem"));
        let clause = ClauseBuilder::new("Pool Added", observer.clone())
            .list_resources("target-pools")
            .contains("name", "lb-tp")
            .build()
            .unwrap();

        let start = Instant::now();
        let result = clause.evaluate(&CancelToken::never()).await;
        assert_eq!(result.outcome, ClauseOutcome::Mismatch);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.retries(), 0);
        assert_eq!(observer.fetch_count(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn passes_on_third_poll() {
        let observer = Arc::new(AppearsAfter {
            after: 3,
            calls: AtomicU32::new(0),
            record: json!({"name": "X"}),
        });
        let clause = ClauseBuilder::new("X Added", observer)
            .retryable_for_secs(30)
            .retry_interval(Duration::from_secs(5))
            .list_resources("things")
            .contains("name", "X")
            .build()
            .unwrap();

        let result = clause.evaluate(&CancelToken::never()).await;
        assert!(result.passed());
        assert_eq!(result.attempts, 3);
        assert!((10_000..=15_000).contains(&result.elapsed_ms), "{}", result.elapsed_ms);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_deadline() {
        let observer = Arc::new(MemoryObserver::new("mem"));
        let clause = ClauseBuilder::new("Never", observer)
            .retryable_for_secs(12)
            .retry_interval(Duration::from_secs(5))
            .list_resources("things")
            .contains("name", "X")
            .build()
            .unwrap();

        let start = Instant::now();
        let result = clause.evaluate(&CancelToken::never()).await;
        assert_eq!(result.outcome, ClauseOutcome::TimedOut);
        // Attempts at 0s, 5s, 10s and the clipped final one at 12s.
        assert_eq!(result.attempts, 4);
        assert_eq!(start.elapsed(), Duration::from_secs(12));
        assert!(result.summary().contains("collection is empty"));
    }

    #[tokio::test(start_paused = true)]
    async fn absent_resource_accepted_when_allowed() {
        let observer = Arc::new(MemoryObserver::new("mem"));
        let clause = ClauseBuilder::new("Group Removed", observer)
            .retryable_for_secs(30)
            .inspect_resource("managed-instance-groups", "app-v000")
            .no_resource_ok(true)
            .contains_eq("targetSize", 0)
            .build()
            .unwrap();

        let result = clause.evaluate(&CancelToken::never()).await;
        assert!(result.passed());
        assert_eq!(result.retries(), 0);
        assert_eq!(result.snapshot, Some(ResourceSnapshot::Absent));
    }

    #[tokio::test(start_paused = true)]
    async fn absent_resource_fails_without_flag() {
        let observer = Arc::new(MemoryObserver::new("mem"));
        let clause = ClauseBuilder::new("Group Added", observer)
            .inspect_resource("managed-instance-groups", "app-v000")
            .contains_eq("targetSize", 2)
            .build()
            .unwrap();

        let result = clause.evaluate(&CancelToken::never()).await;
        assert_eq!(result.outcome, ClauseOutcome::Mismatch);
        assert!(result.explanation.contains("absent"));
    }

    #[tokio::test(start_paused = true)]
    async fn observer_error_is_reported_not_raised() {
        let clause = ClauseBuilder::new("Unreachable", Arc::new(Broken))
            .retryable_for_secs(10)
            .list_resources("things")
            .excludes("name", "X")
            .build()
            .unwrap();

        let result = clause.evaluate(&CancelToken::never()).await;
        assert_eq!(result.outcome, ClauseOutcome::ObserverError);
        assert!(result.explanation.contains("connection refused"));
        assert!(result.snapshot.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let observer = Arc::new(MemoryObserver::new("mem"));
        let clause = ClauseBuilder::new("Never", observer)
            .retryable_for_secs(600)
            .list_resources("things")
            .contains("name", "X")
            .build()
            .unwrap();

        let (handle, token) = crate::cancel::channel();
        let task = tokio::spawn(async move { clause.evaluate(&token).await });
        tokio::time::sleep(Duration::from_secs(7)).await;
        handle.cancel();

        let result = task.await.unwrap();
        assert_eq!(result.outcome, ClauseOutcome::Cancelled);
        assert_eq!(result.attempts, 2);
        assert!(result.elapsed_ms < 600_000);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_in_flight_fetch() {
        let clause = ClauseBuilder::new("Hung Backend", Arc::new(Hung))
            .retryable_for_secs(30)
            .list_resources("things")
            .excludes("name", "X")
            .build()
            .unwrap();

        let (handle, token) = crate::cancel::channel();
        let task = tokio::spawn(async move { clause.evaluate(&token).await });
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("clause should stop once cancelled")
            .unwrap();
        assert_eq!(result.outcome, ClauseOutcome::Cancelled);
        assert_eq!(result.attempts, 1);
        assert!(result.snapshot.is_none());
    }

    #[test]
    fn builder_rejects_misconfiguration() {
        let observer: Arc<dyn ResourceObserver> = Arc::new(MemoryObserver::new("mem"));

        let no_selector = ClauseBuilder::new("c", observer.clone())
            .contains("name", "x")
            .build();
        assert!(matches!(no_selector, Err(VerdictError::InvalidClause { .. })));

        let bad_path = ClauseBuilder::new("c", observer.clone())
            .list_resources("things")
            .contains_eq("a..b", 1)
            .build();
        assert!(matches!(bad_path, Err(VerdictError::InvalidPath { .. })));

        let no_predicates = ClauseBuilder::new("c", observer.clone())
            .list_resources("things")
            .build();
        assert!(no_predicates.is_err());

        let zero_interval = ClauseBuilder::new("c", observer.clone())
            .retryable_for_secs(5)
            .retry_interval(Duration::ZERO)
            .list_resources("things")
            .contains("name", "x")
            .build();
        assert!(zero_interval.is_err());

        let scalar_subset = ClauseBuilder::new("c", observer)
            .list_resources("things")
            .contains_subset(json!(3))
            .build();
        assert!(matches!(scalar_subset, Err(VerdictError::InvalidClause { .. })));
    }
}
