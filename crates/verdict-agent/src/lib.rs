//! `verdict-agent`: concrete collaborators for the verdict engine.
//!
//! - [`GateClient`] submits orchestration tasks over HTTP and polls their
//!   status; it implements [`verdict_core::OperationTransport`].
//! - [`GcloudObserver`] reads Compute Engine resources through the `gcloud`
//!   CLI; it implements [`verdict_core::ResourceObserver`].

pub mod error;
pub mod gate;
pub mod gcloud;

pub use error::AgentError;
pub use gate::{map_task_status, GateClient};
pub use gcloud::GcloudObserver;

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AgentError>;
