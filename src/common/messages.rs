//! # Message Shapes
//!
//! Defines the data exchanged across the two boundaries of the relay:
//!
//! - **Hosting boundary**: [`HostEvent`] / [`JobRequest`] come in from whatever
//!   invokes the relay, [`JobResponse`] goes back out. Responses are plain
//!   serializable values with a `status` discriminator, never errors.
//! - **Remote service**: [`HandleFormat`] and [`StatusFormat`] select how the
//!   upload and status endpoints encode their answers. They are chosen by
//!   configuration, never sniffed from the response body.

use serde::{Deserialize, Serialize};

use crate::common::config::Overrides;
use crate::common::error::ErrorKind;

// ============================================================================
// REMOTE WIRE FORMATS
// ============================================================================

/// How the upload endpoint returns the job handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleFormat {
    /// The whole response body is the handle.
    #[default]
    Text,
    /// The body is a JSON object and the handle sits in `handle_field`.
    Json,
}

/// How the status endpoint encodes job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFormat {
    /// Plain-text token such as `READY`, `PENDING` or `FAILED: reason`.
    #[default]
    Text,
    /// JSON object with a `status` string field, e.g. `{"status": "done"}`.
    JsonStatus,
    /// JSON object with a `done` boolean field, e.g. `{"done": true}`.
    JsonDone,
}

/// How a successful artifact is handed back across the hosting boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Inline the artifact as standard base64.
    #[default]
    Base64,
    /// Return the remote download URL instead of the bytes.
    Url,
}

// ============================================================================
// HOSTING BOUNDARY
// ============================================================================

/// Event envelope used by serverless hosts: `{"input": {...}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostEvent {
    #[serde(default)]
    pub input: serde_json::Value,
}

impl HostEvent {
    /// Health probes send `{"input": {"ping": ...}}` and expect `{"ok": true}` back.
    pub fn is_ping(&self) -> bool {
        self.input.get("ping").is_some()
    }
}

/// One orchestration request.
///
/// Exactly one of `url` and `data` must be set. Blank strings count as unset.
/// Override keys sit next to the input fields:
///
/// ```json
/// {"image_url": "https://example.com/cat.jpg", "total_timeout": 120}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Source image URL.
    #[serde(default, alias = "image_url", alias = "input_url")]
    pub url: Option<String>,

    /// Inline base64 payload, optionally with a `data:<type>;base64,` prefix.
    #[serde(default, alias = "image_base64", alias = "image")]
    pub data: Option<String>,

    /// Per-request configuration overrides.
    #[serde(flatten)]
    pub overrides: Overrides,
}

impl JobRequest {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn from_inline(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Structured reply returned across the hosting boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResponse {
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_handle: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_base64: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_url: Option<String>,
    },
    Failed {
        error_kind: ErrorKind,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_handle: Option<String>,
    },
}

impl JobResponse {
    pub fn failed(error_kind: ErrorKind, error: impl Into<String>) -> Self {
        JobResponse::Failed {
            error_kind,
            error: error.into(),
            job_handle: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobResponse::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_url_aliases() {
        for key in ["url", "image_url", "input_url"] {
            let raw = format!(r#"{{"{key}": "http://mock/cat.jpg"}}"#);
            let request: JobRequest = serde_json::from_str(&raw).unwrap();
            assert_eq!(request.url.as_deref(), Some("http://mock/cat.jpg"));
            assert!(request.data.is_none());
        }
    }

    #[test]
    fn test_request_reads_flattened_overrides() {
        let request: JobRequest = serde_json::from_str(
            r#"{"image_base64": "AAAA", "total_timeout": 30, "poll_interval": 0.5}"#,
        )
        .unwrap();
        assert_eq!(request.data.as_deref(), Some("AAAA"));
        assert_eq!(request.overrides.total_timeout, Some(30.0));
        assert_eq!(request.overrides.poll_interval, Some(0.5));
        assert!(request.overrides.endpoint_base.is_none());
    }

    #[test]
    fn test_ping_event() {
        let event: HostEvent = serde_json::from_str(r#"{"input": {"ping": "x"}}"#).unwrap();
        assert!(event.is_ping());
        let event: HostEvent = serde_json::from_str(r#"{"input": {"url": "x"}}"#).unwrap();
        assert!(!event.is_ping());
    }

    #[test]
    fn test_response_shapes() {
        let ok = JobResponse::Completed {
            job_handle: Some("abc123".into()),
            output_base64: Some("AQID".into()),
            output_url: None,
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["job_handle"], "abc123");
        assert!(json.get("output_url").is_none());

        let failed = JobResponse::failed(ErrorKind::PollTimeout, "still pending");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_kind"], "PollTimeout");
        assert!(json.get("job_handle").is_none());
    }

    #[test]
    fn test_formats_parse_from_snake_case() {
        let format: StatusFormat = serde_json::from_str("\"json_done\"").unwrap();
        assert_eq!(format, StatusFormat::JsonDone);
        let format: HandleFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, HandleFormat::Json);
    }
}
