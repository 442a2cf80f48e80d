//! # cloak-relay
//!
//! Client-side orchestration for a three-step remote job protocol:
//! submit an image, poll until the remote job settles, fetch the result.
//!
//! The library is split the same way the binaries use it:
//!
//! - [`common`]: configuration, hosting-boundary wire shapes and the error taxonomy
//! - [`client`]: transport, the three protocol stages and the [`Orchestrator`]
//!   that composes them into one call

pub mod client;
pub mod common;

pub use client::orchestrator::{OrchestrationResult, Orchestrator};
pub use common::config::{Overrides, RelayConfig};
pub use common::error::{ErrorKind, RelayError};
pub use common::messages::{JobRequest, JobResponse};
