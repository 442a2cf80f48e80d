//! # Error Taxonomy
//!
//! Every failure inside the pipeline ends up as a [`RelayError`], and every
//! [`RelayError`] maps onto exactly one [`ErrorKind`]. The kind is what callers
//! see on the hosting boundary; the error itself carries the detail used in
//! the message and in logs.
//!
//! [`TransportError`] is kept separate because it records the one distinction
//! the retry policy cares about: whether the remote side answered with an HTTP
//! status before the call failed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::client::poll::JobStatus;

/// Failure classification reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Neither or both input forms were supplied, an inline payload was malformed,
    /// or an override value was invalid.
    InvalidInput,
    /// The input artifact exceeded the configured byte ceiling.
    PayloadTooLarge,
    /// Connection or timeout error that survived the transport retry budget.
    TransportFailure,
    /// The upload was refused or answered with an unusable job handle.
    SubmissionRejected,
    /// The remote service reported the job as failed.
    JobFailed,
    /// The deadline passed while the job was still non-terminal.
    PollTimeout,
    /// The download stage failed or produced an empty artifact.
    FetchFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::TransportFailure => "TransportFailure",
            ErrorKind::SubmissionRejected => "SubmissionRejected",
            ErrorKind::JobFailed => "JobFailed",
            ErrorKind::PollTimeout => "PollTimeout",
            ErrorKind::FetchFailure => "FetchFailure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a network call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Source,
    Submit,
    Status,
    Download,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Source => "source",
            Stage::Submit => "submit",
            Stage::Status => "status",
            Stage::Download => "download",
        };
        f.write_str(name)
    }
}

/// Failure of a single network call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The TCP/TLS connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// No response arrived within the read timeout.
    #[error("timed out waiting for response: {0}")]
    Timeout(String),

    /// The request could not be built or sent for a non-transient reason.
    #[error("request failed: {0}")]
    Request(String),

    /// A status line was received but reading the body failed.
    #[error("failed to read response body: {0}")]
    Body(String),

    /// The response body grew past the caller's ceiling.
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// The invocation deadline passed before the call completed.
    #[error("invocation deadline exceeded")]
    DeadlineExceeded,
}

impl TransportError {
    /// Only failures that happened before any HTTP status was received are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout(_))
    }

    pub(crate) fn from_send(err: reqwest::Error) -> Self {
        if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Every way an orchestrated call can fail.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("could not decode inline payload: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("payload exceeds the {limit} byte ceiling")]
    PayloadTooLarge { limit: usize },

    #[error("{stage} call failed: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: TransportError,
    },

    #[error("could not fetch source image: {0}")]
    SourceFetch(String),

    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("remote job failed: {0}")]
    JobFailed(String),

    #[error("deadline reached while job was {last_status}")]
    PollTimeout { last_status: JobStatus },

    #[error("result fetch failed: {0}")]
    FetchFailure(String),
}

impl RelayError {
    pub fn transport(stage: Stage, source: TransportError) -> Self {
        RelayError::Transport { stage, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::InvalidInput(_) | RelayError::Decode(_) | RelayError::Config(_) => {
                ErrorKind::InvalidInput
            }
            RelayError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            RelayError::Transport {
                source: TransportError::BodyTooLarge { .. },
                ..
            } => ErrorKind::PayloadTooLarge,
            RelayError::Transport { .. } => ErrorKind::TransportFailure,
            RelayError::SubmissionRejected(_) => ErrorKind::SubmissionRejected,
            RelayError::JobFailed(_) => ErrorKind::JobFailed,
            RelayError::PollTimeout { .. } => ErrorKind::PollTimeout,
            RelayError::SourceFetch(_) | RelayError::FetchFailure(_) => ErrorKind::FetchFailure,
        }
    }
}
