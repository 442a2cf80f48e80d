//! # Common Components
//!
//! Shared data structures used by the client pipeline and both binaries.
//!
//! ## Modules
//!
//! - [`config`]: Immutable relay configuration, TOML/env loading and per-request overrides
//! - [`messages`]: Hosting-boundary request/response shapes and wire format selectors
//! - [`error`]: Failure taxonomy surfaced to callers

pub mod config;
pub mod error;
pub mod messages;
