//! # Job Submitter
//!
//! Uploads the artifact as a single multipart request and turns the reply into
//! a validated [`JobHandle`]. The reply format (plain text or a JSON field) is
//! fixed by configuration. A refused upload or an unusable handle is final:
//! resubmitting could start a duplicate remote job.

use log::info;
use serde_json::Value;
use std::fmt;

use crate::client::transport::{CallBody, HttpCall, Transport};
use crate::client::Artifact;
use crate::common::config::RelayConfig;
use crate::common::error::{RelayError, Stage};
use crate::common::messages::HandleFormat;

const MAX_HANDLE_LEN: usize = 128;

/// Opaque identifier of one remote job.
///
/// Always non-empty and safe to embed as a URL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    /// Validate a raw handle. With `hex_len` set the handle must be exactly that
    /// many hexadecimal digits.
    pub fn parse(raw: &str, hex_len: Option<usize>) -> Result<Self, RelayError> {
        let handle = raw.trim();
        if handle.is_empty() {
            return Err(RelayError::SubmissionRejected(
                "remote service returned an empty job handle".to_string(),
            ));
        }
        if handle.len() > MAX_HANDLE_LEN {
            return Err(RelayError::SubmissionRejected(format!(
                "job handle is {} characters long (max {MAX_HANDLE_LEN})",
                handle.len()
            )));
        }

        match hex_len {
            Some(expected) => {
                if handle.len() != expected || !handle.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(RelayError::SubmissionRejected(format!(
                        "job handle {handle:?} is not {expected} hex digits"
                    )));
                }
            }
            None => {
                let path_safe = handle
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
                if !path_safe || handle.chars().all(|c| c == '.') {
                    return Err(RelayError::SubmissionRejected(format!(
                        "job handle {handle:?} contains unsupported characters"
                    )));
                }
            }
        }

        Ok(JobHandle(handle.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the raw handle from an upload reply body.
pub fn extract_handle(format: HandleFormat, field: &str, body: &[u8]) -> Result<String, RelayError> {
    let text = std::str::from_utf8(body).map_err(|_| {
        RelayError::SubmissionRejected("upload reply is not valid UTF-8".to_string())
    })?;

    match format {
        HandleFormat::Text => Ok(text.trim().to_string()),
        HandleFormat::Json => {
            let value: Value = serde_json::from_str(text).map_err(|e| {
                RelayError::SubmissionRejected(format!("upload reply is not JSON: {e}"))
            })?;
            match value.get(field) {
                Some(Value::String(handle)) => Ok(handle.clone()),
                Some(Value::Number(number)) => Ok(number.to_string()),
                Some(other) => Err(RelayError::SubmissionRejected(format!(
                    "field {field:?} holds {other}, expected a string"
                ))),
                None => Err(RelayError::SubmissionRejected(format!(
                    "upload reply has no {field:?} field"
                ))),
            }
        }
    }
}

pub struct JobSubmitter<'a> {
    transport: &'a Transport,
    config: &'a RelayConfig,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(transport: &'a Transport, config: &'a RelayConfig) -> Self {
        Self { transport, config }
    }

    pub async fn submit(&self, artifact: Artifact) -> Result<JobHandle, RelayError> {
        let size = artifact.len();
        let body = CallBody::Multipart {
            field: self.config.upload_field.clone(),
            filename: self.config.upload_filename.clone(),
            content_type: self.config.upload_content_type.clone(),
            bytes: artifact,
        };
        let call = HttpCall::post(
            Stage::Submit,
            self.config.upload_url(),
            body,
            self.config.submit_timeouts(),
        );

        let reply = self
            .transport
            .call(call)
            .await
            .map_err(|e| RelayError::transport(Stage::Submit, e))?;

        if !reply.status.is_success() {
            return Err(RelayError::SubmissionRejected(format!(
                "upload returned {}: {}",
                reply.status,
                reply.snippet()
            )));
        }

        let raw = extract_handle(
            self.config.handle_format,
            &self.config.handle_field,
            &reply.body,
        )?;
        let handle = JobHandle::parse(&raw, self.config.handle_hex_len)?;

        info!("📤 Submitted {} bytes, job handle {}", size, handle);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_handle() {
        let raw = extract_handle(HandleFormat::Text, "job_id", b"  abc123\n").unwrap();
        assert_eq!(raw, "abc123");
    }

    #[test]
    fn test_json_handle() {
        let raw = extract_handle(HandleFormat::Json, "job_id", br#"{"job_id": "abc123"}"#).unwrap();
        assert_eq!(raw, "abc123");

        let raw = extract_handle(HandleFormat::Json, "id", br#"{"id": 42}"#).unwrap();
        assert_eq!(raw, "42");
    }

    #[test]
    fn test_json_handle_errors() {
        for body in [&b"abc123"[..], br#"{"other": "x"}"#, br#"{"job_id": null}"#] {
            let err = extract_handle(HandleFormat::Json, "job_id", body).unwrap_err();
            assert!(matches!(err, RelayError::SubmissionRejected(_)), "{err:?}");
        }
    }

    #[test]
    fn test_text_format_does_not_parse_json() {
        // Configured as text, a JSON body is taken verbatim and then fails validation.
        let raw = extract_handle(HandleFormat::Text, "job_id", br#"{"job_id":"a"}"#).unwrap();
        assert!(JobHandle::parse(&raw, None).is_err());
    }

    #[test]
    fn test_handle_validation() {
        assert_eq!(JobHandle::parse("abc123", None).unwrap().as_str(), "abc123");
        assert_eq!(JobHandle::parse("job-7_x.v2", None).unwrap().to_string(), "job-7_x.v2");
        assert!(JobHandle::parse("", None).is_err());
        assert!(JobHandle::parse("   ", None).is_err());
        assert!(JobHandle::parse("../etc", None).is_err());
        assert!(JobHandle::parse("..", None).is_err());
        assert!(JobHandle::parse("a b", None).is_err());
        assert!(JobHandle::parse(&"a".repeat(129), None).is_err());
    }

    #[test]
    fn test_fixed_length_hex_handle() {
        let hex = "0123456789abcdef0123456789ABCDEF";
        assert!(JobHandle::parse(hex, Some(32)).is_ok());
        assert!(JobHandle::parse(&hex[..31], Some(32)).is_err());
        assert!(JobHandle::parse("zz23456789abcdef0123456789abcdef", Some(32)).is_err());
        assert!(JobHandle::parse("abc123", Some(6)).is_ok());
    }
}
