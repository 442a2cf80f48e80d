//! # Status Poller
//!
//! Queries the status endpoint until the job settles or the deadline passes.
//!
//! ## Status normalization
//!
//! Deployments answer in one of three shapes, selected by [`StatusFormat`]:
//!
//! ```text
//! text         READY | PENDING | FAILED: reason
//! json_status  {"status": "done"}       {"status": "failed", "error": "..."}
//! json_done    {"done": true}           {"done": false}
//! ```
//!
//! Every shape maps onto [`JobStatus`]. Tokens the relay does not recognise
//! become [`JobStatus::Unknown`], which is polled like `Pending`.
//!
//! ## Loop
//!
//! ```text
//! query -> Ready          return
//!       -> Failed         return (remote message kept)
//!       -> Pending/Unknown  deadline passed? -> PollTimeout
//!                           sleep min(interval, time left), grow interval
//! ```
//!
//! A 404 means the job may not be registered yet and counts as `Pending` until
//! `max_not_found` consecutive 404s have been seen.

use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::client::submit::JobHandle;
use crate::client::transport::{HttpCall, HttpReply, Transport};
use crate::common::config::RelayConfig;
use crate::common::error::{RelayError, Stage, TransportError};
use crate::common::messages::StatusFormat;

/// Canonical job state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Ready,
    Failed { message: String },
    /// A state the relay does not recognise; polled like `Pending`.
    Unknown { raw: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed { .. })
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("pending"),
            JobStatus::Ready => f.write_str("ready"),
            JobStatus::Failed { message } => write!(f, "failed ({message})"),
            JobStatus::Unknown { raw } => write!(f, "unknown ({raw})"),
        }
    }
}

enum TokenClass {
    Pending,
    Ready,
    Failed,
}

fn classify_token(token: &str) -> Option<TokenClass> {
    let normalized = token
        .trim()
        .to_ascii_uppercase()
        .replace(|c: char| c == '-' || c == ' ', "_");
    match normalized.as_str() {
        "READY" | "DONE" | "COMPLETE" | "COMPLETED" | "SUCCESS" | "SUCCEEDED" | "FINISHED" => {
            Some(TokenClass::Ready)
        }
        "PENDING" | "QUEUED" | "RUNNING" | "PROCESSING" | "IN_PROGRESS" | "STARTED"
        | "WAITING" => Some(TokenClass::Pending),
        "FAILED" | "FAILURE" | "ERROR" | "ERRORED" | "CANCELLED" | "CANCELED" => {
            Some(TokenClass::Failed)
        }
        _ => None,
    }
}

fn status_from_token(token: &str, message: Option<String>) -> JobStatus {
    match classify_token(token) {
        Some(TokenClass::Ready) => JobStatus::Ready,
        Some(TokenClass::Pending) => JobStatus::Pending,
        Some(TokenClass::Failed) => JobStatus::Failed {
            message: message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("remote reported {}", token.trim())),
        },
        None => JobStatus::Unknown {
            raw: token.trim().to_string(),
        },
    }
}

const MESSAGE_KEYS: [&str; 4] = ["error", "message", "detail", "reason"];

/// Remote error detail from a JSON status object, first non-empty key wins.
fn json_message(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| match value.get(*key) {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Some(Value::Null) | Some(Value::Bool(false)) | None => None,
            Some(Value::String(_)) => None,
            Some(other) => Some(other.to_string()),
        })
}

/// Map a 2xx status body onto [`JobStatus`] according to the configured format.
pub fn normalize(format: StatusFormat, body: &[u8]) -> JobStatus {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();

    match format {
        StatusFormat::Text => {
            let line = text.lines().next().unwrap_or("").trim();
            let (token, rest) = match line.find(|c: char| c == ':' || c.is_whitespace()) {
                Some(idx) => (&line[..idx], line[idx..].trim_start_matches(':').trim()),
                None => (line, ""),
            };
            status_from_token(token, Some(rest.to_string()))
        }
        StatusFormat::JsonStatus => match serde_json::from_str::<Value>(text) {
            Ok(value) => match value.get("status").and_then(Value::as_str) {
                Some(token) => status_from_token(token, json_message(&value, &MESSAGE_KEYS)),
                None => JobStatus::Unknown {
                    raw: text.to_string(),
                },
            },
            Err(_) => JobStatus::Unknown {
                raw: text.to_string(),
            },
        },
        StatusFormat::JsonDone => match serde_json::from_str::<Value>(text) {
            Ok(value) => {
                // Only an explicit error field marks failure in this shape.
                if let Some(message) = json_message(&value, &["error"]) {
                    return JobStatus::Failed { message };
                }
                match value.get("done").and_then(Value::as_bool) {
                    Some(true) => JobStatus::Ready,
                    Some(false) => JobStatus::Pending,
                    None => JobStatus::Unknown {
                        raw: text.to_string(),
                    },
                }
            }
            Err(_) => JobStatus::Unknown {
                raw: text.to_string(),
            },
        },
    }
}

pub struct StatusPoller<'a> {
    transport: &'a Transport,
    config: &'a RelayConfig,
    queries: u32,
    not_found: u32,
}

impl<'a> StatusPoller<'a> {
    pub fn new(transport: &'a Transport, config: &'a RelayConfig) -> Self {
        Self {
            transport,
            config,
            queries: 0,
            not_found: 0,
        }
    }

    /// Status queries that reached the remote service.
    pub fn queries(&self) -> u32 {
        self.queries
    }

    /// Poll until the job is `Ready` or `Failed`.
    ///
    /// Returns the terminal status, or [`RelayError::PollTimeout`] carrying the
    /// last observed status once `deadline` passes.
    pub async fn poll_until_terminal(
        &mut self,
        handle: &JobHandle,
        deadline: Instant,
    ) -> Result<JobStatus, RelayError> {
        let mut interval = self.config.poll_interval();
        let max_interval = self.config.max_poll_interval();
        let mut last = JobStatus::Pending;

        loop {
            if Instant::now() >= deadline {
                return Err(RelayError::PollTimeout { last_status: last });
            }

            let call = HttpCall::get(
                Stage::Status,
                self.config.status_url(handle.as_str()),
                self.config.status_timeouts(),
            );
            let reply = match self.transport.call(call).await {
                Ok(reply) => reply,
                Err(TransportError::DeadlineExceeded) => {
                    return Err(RelayError::PollTimeout { last_status: last });
                }
                Err(e) => return Err(RelayError::transport(Stage::Status, e)),
            };
            self.queries += 1;

            let status = self.interpret(handle, &reply)?;
            debug!("Job {} status #{}: {}", handle, self.queries, status);

            match status {
                JobStatus::Ready => {
                    info!("✅ Job {} ready after {} status queries", handle, self.queries);
                    return Ok(status);
                }
                JobStatus::Failed { .. } => {
                    warn!("❌ Job {} failed: {}", handle, status);
                    return Ok(status);
                }
                JobStatus::Pending | JobStatus::Unknown { .. } => last = status,
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RelayError::PollTimeout { last_status: last });
            }
            sleep(interval.min(deadline - now)).await;
            interval = next_interval(interval, self.config.poll_backoff, max_interval);
        }
    }

    fn interpret(&mut self, handle: &JobHandle, reply: &HttpReply) -> Result<JobStatus, RelayError> {
        if reply.status == StatusCode::NOT_FOUND {
            self.not_found += 1;
            if self.not_found > self.config.max_not_found {
                return Err(RelayError::JobFailed(format!(
                    "job {} not found after {} consecutive status checks",
                    handle, self.not_found
                )));
            }
            debug!(
                "Job {} not registered yet ({}/{})",
                handle, self.not_found, self.config.max_not_found
            );
            return Ok(JobStatus::Pending);
        }
        self.not_found = 0;

        if reply.status.is_success() {
            return Ok(normalize(self.config.status_format, &reply.body));
        }
        if reply.status.is_server_error() || reply.status == StatusCode::TOO_MANY_REQUESTS {
            warn!("⚠️  Status endpoint answered {} for job {}", reply.status, handle);
            return Ok(JobStatus::Unknown {
                raw: format!("http {}", reply.status.as_u16()),
            });
        }
        Err(RelayError::JobFailed(format!(
            "status endpoint rejected query for job {} with {}: {}",
            handle,
            reply.status,
            reply.snippet()
        )))
    }
}

/// Grow the poll wait by `factor`, never past `max`.
fn next_interval(current: Duration, factor: f64, max: Duration) -> Duration {
    if factor <= 1.0 {
        return current;
    }
    let grown = current.as_secs_f64() * factor;
    if grown >= max.as_secs_f64() {
        max
    } else {
        Duration::try_from_secs_f64(grown).unwrap_or(max)
    }
}
