//! # Byte Source Resolver
//!
//! Turns the caller's input into the artifact that gets uploaded. The input is
//! either a URL to download or an inline base64 payload, optionally wrapped in
//! a `data:<type>;base64,` prefix. Callers that already hold the bytes (the
//! multipart endpoint of the web adapter) pass them through directly.
//!
//! Input shape is checked before anything touches the network, so a request
//! with neither or both inputs fails without side effects.

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use log::info;

use crate::client::transport::{HttpCall, Transport};
use crate::client::Artifact;
use crate::common::config::RelayConfig;
use crate::common::error::{RelayError, Stage, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactSource {
    Url(String),
    Inline(String),
    Bytes(Artifact),
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl ArtifactSource {
    /// Pick the source from the two optional request fields.
    pub fn from_parts(url: Option<&str>, inline: Option<&str>) -> Result<Self, RelayError> {
        match (present(url), present(inline)) {
            (Some(url), None) => {
                let parsed = reqwest::Url::parse(url)
                    .map_err(|e| RelayError::InvalidInput(format!("invalid url {url:?}: {e}")))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(RelayError::InvalidInput(format!(
                        "unsupported url scheme {:?}",
                        parsed.scheme()
                    )));
                }
                Ok(ArtifactSource::Url(url.to_string()))
            }
            (None, Some(inline)) => Ok(ArtifactSource::Inline(inline.to_string())),
            (Some(_), Some(_)) => Err(RelayError::InvalidInput(
                "provide either a url or an inline payload, not both".to_string(),
            )),
            (None, None) => Err(RelayError::InvalidInput(
                "missing input: provide a url or an inline payload".to_string(),
            )),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ArtifactSource::Url(url) => format!("url {url}"),
            ArtifactSource::Inline(data) => format!("inline payload ({} chars)", data.len()),
            ArtifactSource::Bytes(bytes) => format!("{} raw bytes", bytes.len()),
        }
    }

    /// Produce the artifact, enforcing the configured byte ceiling.
    pub async fn resolve(
        self,
        transport: &Transport,
        config: &RelayConfig,
    ) -> Result<Artifact, RelayError> {
        let limit = config.max_payload_bytes;
        let artifact = match self {
            ArtifactSource::Url(url) => download(transport, config, &url, limit).await?,
            ArtifactSource::Inline(data) => decode_inline(&data, limit)?,
            ArtifactSource::Bytes(bytes) => {
                if bytes.len() > limit {
                    return Err(RelayError::PayloadTooLarge { limit });
                }
                bytes
            }
        };

        if artifact.is_empty() {
            return Err(RelayError::InvalidInput("input image is empty".to_string()));
        }
        Ok(artifact)
    }
}

async fn download(
    transport: &Transport,
    config: &RelayConfig,
    url: &str,
    limit: usize,
) -> Result<Artifact, RelayError> {
    let call = HttpCall::get(Stage::Source, url, config.source_timeouts()).with_max_body(limit);
    let reply = transport.call(call).await.map_err(|e| match e {
        TransportError::BodyTooLarge { limit } => RelayError::PayloadTooLarge { limit },
        other => RelayError::transport(Stage::Source, other),
    })?;

    if !reply.status.is_success() {
        return Err(RelayError::SourceFetch(format!(
            "GET {url} returned {}",
            reply.status
        )));
    }

    info!("📥 Downloaded source image ({} bytes)", reply.body.len());
    Ok(reply.body)
}

/// Decode an inline payload, stripping a `data:` URL prefix when present.
pub fn decode_inline(payload: &str, limit: usize) -> Result<Artifact, RelayError> {
    let trimmed = payload.trim();
    let is_data_url = trimmed
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"));
    let encoded = if is_data_url {
        match trimmed.split_once(',') {
            Some((_, rest)) => rest,
            None => {
                return Err(RelayError::Decode(
                    "data URL has no ',' before the payload".to_string(),
                ))
            }
        }
    } else {
        trimmed
    };

    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    // Reject obviously oversized payloads before allocating the decoded buffer.
    if compact.len() / 4 * 3 > limit.saturating_add(3) {
        return Err(RelayError::PayloadTooLarge { limit });
    }

    let decoded = general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| RelayError::Decode(e.to_string()))?;

    if decoded.len() > limit {
        return Err(RelayError::PayloadTooLarge { limit });
    }
    Ok(Bytes::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neither_or_both_inputs_are_rejected() {
        let err = ArtifactSource::from_parts(None, None).unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));

        let err = ArtifactSource::from_parts(Some("http://mock/cat.jpg"), Some("AAAA")).unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));

        let err = ArtifactSource::from_parts(Some("   "), Some("")).unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));
    }

    #[test]
    fn test_blank_field_does_not_count_as_input() {
        let source = ArtifactSource::from_parts(Some(""), Some("AAAA")).unwrap();
        assert_eq!(source, ArtifactSource::Inline("AAAA".to_string()));
    }

    #[test]
    fn test_url_must_be_http() {
        assert!(ArtifactSource::from_parts(Some("file:///etc/passwd"), None).is_err());
        assert!(ArtifactSource::from_parts(Some("not a url"), None).is_err());
        assert!(ArtifactSource::from_parts(Some("https://example.com/a.png"), None).is_ok());
    }

    #[test]
    fn test_decode_raw_and_data_url() {
        let raw = decode_inline("aGVsbG8=", 1024).unwrap();
        assert_eq!(&raw[..], b"hello");

        let prefixed = decode_inline("data:image/png;base64,aGVsbG8=", 1024).unwrap();
        assert_eq!(prefixed, raw);

        let wrapped = decode_inline("aGVs\nbG8=\n", 1024).unwrap();
        assert_eq!(wrapped, raw);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_inline("data:image/png;base64", 1024),
            Err(RelayError::Decode(_))
        ));
        assert!(matches!(
            decode_inline("!!not base64!!", 1024),
            Err(RelayError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_enforces_ceiling() {
        let encoded = general_purpose::STANDARD.encode(vec![7u8; 64]);
        assert!(decode_inline(&encoded, 64).is_ok());
        assert!(matches!(
            decode_inline(&encoded, 63),
            Err(RelayError::PayloadTooLarge { limit: 63 })
        ));
        assert!(matches!(
            decode_inline(&encoded, 8),
            Err(RelayError::PayloadTooLarge { limit: 8 })
        ));
    }
}
