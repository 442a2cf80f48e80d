//! # Client Components
//!
//! The relay client is split into pipeline stages, each with one job:
//!
//! ## Input ([`source`])
//! Picks exactly one artifact source (remote URL or inline base64) and turns it
//! into raw bytes, bounded by the payload ceiling.
//!
//! ## Remote Job Lifecycle ([`submit`], [`poll`], [`fetch`])
//! - Upload the artifact and obtain a job handle
//! - Poll the job status until it is ready, failed, or out of time
//! - Download the finished artifact
//!
//! ## Plumbing ([`transport`], [`retry`])
//! Every HTTP exchange goes through one [`transport::Transport`] per invocation,
//! which applies per-call timeouts, the retry policy and the overall deadline.
//!
//! ## Coordination ([`orchestrator`], [`metrics`])
//! The orchestrator composes the stages and records per-run metrics.

pub mod fetch;
pub mod metrics;
pub mod orchestrator;
pub mod poll;
pub mod retry;
pub mod source;
pub mod submit;
pub mod transport;

/// Raw bytes of an input or output artifact.
pub type Artifact = bytes::Bytes;

// Re-export for convenience
pub use metrics::{RelayMetrics, RunMetrics};
pub use orchestrator::{OrchestrationResult, Orchestrator};
pub use source::ArtifactSource;
pub use submit::JobHandle;
