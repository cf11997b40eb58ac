//! `verdict-core`: asynchronous contract verification.
//!
//! An [`Operation`] is submitted through an [`OperationTransport`]; once its
//! status settles, a [`Contract`] of [`Clause`]s polls [`ResourceObserver`]s
//! until every clause's predicates hold or its retry budget runs out.
//!
//! ```text
//! SuiteRunner ─▶ OperationExecutor ─▶ transport.submit / poll_status
//!                       │
//!                       ▼
//!                Contract::verify ─▶ Clause::evaluate ─▶ observer.fetch ─▶ Predicate
//! ```

pub mod bindings;
pub mod cancel;
pub mod clause;
pub mod contract;
pub mod error;
pub mod executor;
pub mod observer;
pub mod operation;
pub mod predicate;
pub mod report;
pub mod runner;
pub mod snapshot;

pub use bindings::{Bindings, RunStamp};
pub use cancel::{CancelHandle, CancelToken};
pub use clause::{Clause, ClauseBuilder, ClauseOutcome, ClauseResult, RetryPolicy};
pub use contract::{Contract, ContractBuilder, ContractResult, VerifyStrategy};
pub use error::{Result, VerdictError};
pub use executor::{ExecutionOptions, ExecutionPhase, ExecutionReport, FailureKind, OperationExecutor};
pub use observer::{MemoryObserver, ResourceObserver, Selector};
pub use operation::{Operation, OperationContract, OperationHandle, OperationStatus, OperationTransport};
pub use predicate::{FieldPath, MatchResult, Predicate};
pub use runner::{StepOverrides, StepReport, StepStatus, SuiteReport, SuiteRunner, TestCase, TestStep};
pub use snapshot::ResourceSnapshot;
