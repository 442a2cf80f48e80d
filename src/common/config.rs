//! # Configuration
//!
//! The relay reads its configuration once at startup and never mutates it
//! afterwards. Layers are applied in this order, later layers winning:
//!
//! 1. Built-in defaults ([`RelayConfig::default`])
//! 2. TOML file ([`load_config`])
//! 3. Environment variables ([`RelayConfig::apply_env`])
//! 4. Per-request [`Overrides`] ([`RelayConfig::with_overrides`]), which produce
//!    a fresh value for a single invocation
//!
//! ## Example TOML
//!
//! ```toml
//! endpoint_base = "https://anon.example.com"
//! auth_header = "X-Auth-Token"
//! auth_scheme = ""
//! status_format = "json_status"
//! handle_format = "json"
//! handle_field = "job_id"
//! total_timeout = 900
//! poll_interval = 5
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 200
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::time::Duration;

use crate::common::error::RelayError;
use crate::common::messages::{HandleFormat, ResponseMode, StatusFormat};

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err`: File I/O or parsing error
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Transport retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, first one included.
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds).
    pub base_delay_ms: u64,
    /// Multiplier applied to the delay after each retry.
    pub factor: f64,
    /// Upper bound for a single retry delay (milliseconds).
    pub max_delay_ms: u64,
    /// Shave a random fraction off each delay so parallel invocations spread out.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            factor: 2.0,
            max_delay_ms: 2_000,
            jitter: true,
        }
    }
}

/// Process-wide relay configuration.
///
/// All durations are expressed in seconds so they can be written as plain
/// numbers in TOML and in request overrides.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the remote job service, e.g. `https://anon.example.com`.
    pub endpoint_base: String,
    /// Static token attached to every remote call when set.
    pub auth_token: Option<String>,
    /// Header carrying the token.
    pub auth_header: String,
    /// Scheme prefixed to the token (`Bearer`). Empty sends the raw token.
    pub auth_scheme: String,

    pub upload_path: String,
    pub status_path: String,
    pub download_path: String,

    /// Multipart field name for the uploaded artifact.
    pub upload_field: String,
    pub upload_filename: String,
    pub upload_content_type: String,

    pub handle_format: HandleFormat,
    /// JSON field holding the handle when `handle_format = "json"`.
    pub handle_field: String,
    /// Required handle length when the deployment issues fixed-length hex ids.
    pub handle_hex_len: Option<usize>,

    pub status_format: StatusFormat,

    /// Budget for one whole invocation.
    pub total_timeout: f64,
    /// First wait between status queries.
    pub poll_interval: f64,
    /// Cap for the wait between status queries.
    pub max_poll_interval: f64,
    /// Growth factor for the poll wait. `1.0` keeps it fixed.
    pub poll_backoff: f64,
    pub connect_timeout: f64,
    /// Read timeout for status queries and the default for every other stage.
    pub read_timeout: f64,
    pub submit_read_timeout: Option<f64>,
    pub download_read_timeout: Option<f64>,
    pub source_read_timeout: Option<f64>,

    /// Consecutive 404s from the status endpoint tolerated before giving up.
    pub max_not_found: u32,
    /// Ceiling for the input artifact.
    pub max_payload_bytes: usize,

    pub response_mode: ResponseMode,
    /// Answer URL requests by echoing the URL without contacting the remote service.
    pub smoke_mode: bool,

    pub retry: RetryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint_base: String::new(),
            auth_token: None,
            auth_header: "Authorization".to_string(),
            auth_scheme: "Bearer".to_string(),
            upload_path: "/upload".to_string(),
            status_path: "/status".to_string(),
            download_path: "/download".to_string(),
            upload_field: "file".to_string(),
            upload_filename: "input.jpg".to_string(),
            upload_content_type: "image/jpeg".to_string(),
            handle_format: HandleFormat::Text,
            handle_field: "job_id".to_string(),
            handle_hex_len: None,
            status_format: StatusFormat::Text,
            total_timeout: 900.0,
            poll_interval: 5.0,
            max_poll_interval: 30.0,
            poll_backoff: 1.0,
            connect_timeout: 10.0,
            read_timeout: 30.0,
            submit_read_timeout: None,
            download_read_timeout: None,
            source_read_timeout: Some(20.0),
            max_not_found: 5,
            max_payload_bytes: 25 * 1024 * 1024,
            response_mode: ResponseMode::Base64,
            smoke_mode: false,
            retry: RetryConfig::default(),
        }
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("endpoint_base", &self.endpoint_base)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("auth_header", &self.auth_header)
            .field("handle_format", &self.handle_format)
            .field("status_format", &self.status_format)
            .field("total_timeout", &self.total_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Per-request values that replace configured ones for a single invocation.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<f64>,
}

impl fmt::Debug for Overrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overrides")
            .field("endpoint_base", &self.endpoint_base)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("total_timeout", &self.total_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        *self == Overrides::default()
    }
}

/// Connect and read timeouts for one network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

/// Longest duration any timeout or interval may be set to (24 hours).
pub const MAX_DURATION_SECS: f64 = 86_400.0;

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.min(MAX_DURATION_SECS)).unwrap_or(Duration::ZERO)
}

fn check_positive(name: &str, value: f64) -> std::result::Result<(), RelayError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(RelayError::Config(format!(
            "{name} must be a positive number of seconds, got {value}"
        )));
    }
    if value > MAX_DURATION_SECS {
        return Err(RelayError::Config(format!(
            "{name} must not exceed {MAX_DURATION_SECS} seconds, got {value}"
        )));
    }
    Ok(())
}

impl RelayConfig {
    /// Load configuration from a TOML file, overlay the process environment and validate.
    pub fn from_file(path: &str) -> Result<Self> {
        let config: RelayConfig = load_config(path)?;
        let config = config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the process environment. Used when no file is given.
    pub fn from_env() -> Result<Self> {
        let config = RelayConfig::default().apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(self) -> std::result::Result<Self, RelayError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary lookup.
    ///
    /// `RELAY_*` names win over the legacy deployment names (`VPS_BASE_URL`,
    /// `AUTH_TOKEN`, `VPS_MAX_WAIT`, `VPS_POLL_INTERVAL`, `SMOKE_MODE`).
    pub fn apply_env_from<F>(mut self, lookup: F) -> std::result::Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |names: &[&str]| -> Option<String> {
            names
                .iter()
                .find_map(|name| lookup(name))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |names: &[&str]| -> std::result::Result<Option<f64>, RelayError> {
            match get(names) {
                Some(raw) => raw.parse::<f64>().map(Some).map_err(|_| {
                    RelayError::Config(format!("{} is not a number: {raw:?}", names[0]))
                }),
                None => Ok(None),
            }
        };

        if let Some(base) = get(&["RELAY_ENDPOINT_BASE", "VPS_BASE_URL"]) {
            self.endpoint_base = base;
        }
        if let Some(token) = get(&["RELAY_AUTH_TOKEN", "AUTH_TOKEN"]) {
            self.auth_token = Some(token);
        }
        if let Some(header) = get(&["RELAY_AUTH_HEADER"]) {
            self.auth_header = header;
        }
        if let Some(value) = number(&["RELAY_TOTAL_TIMEOUT", "VPS_MAX_WAIT"])? {
            self.total_timeout = value;
        }
        if let Some(value) = number(&["RELAY_POLL_INTERVAL", "VPS_POLL_INTERVAL"])? {
            self.poll_interval = value;
        }
        if let Some(value) = number(&["RELAY_CONNECT_TIMEOUT"])? {
            self.connect_timeout = value;
        }
        if let Some(value) = number(&["RELAY_READ_TIMEOUT"])? {
            self.read_timeout = value;
        }
        if let Some(flag) = get(&["RELAY_SMOKE_MODE", "SMOKE_MODE"]) {
            self.smoke_mode = flag.eq_ignore_ascii_case("true") || flag == "1";
        }
        Ok(self)
    }

    /// Produce the effective configuration for one invocation.
    pub fn with_overrides(&self, overrides: &Overrides) -> std::result::Result<Self, RelayError> {
        let mut config = self.clone();
        if let Some(base) = &overrides.endpoint_base {
            config.endpoint_base = base.trim().to_string();
        }
        if let Some(token) = &overrides.auth_token {
            config.auth_token = Some(token.clone()).filter(|t| !t.is_empty());
        }
        if let Some(value) = overrides.total_timeout {
            config.total_timeout = value;
        }
        if let Some(value) = overrides.poll_interval {
            config.poll_interval = value;
            if config.max_poll_interval < value {
                config.max_poll_interval = value;
            }
        }
        if let Some(value) = overrides.connect_timeout {
            config.connect_timeout = value;
        }
        if let Some(value) = overrides.read_timeout {
            config.read_timeout = value;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), RelayError> {
        let base = self.endpoint_base.trim();
        if base.is_empty() {
            return Err(RelayError::Config("endpoint_base is not set".to_string()));
        }
        let parsed = reqwest::Url::parse(base)
            .map_err(|e| RelayError::Config(format!("endpoint_base {base:?} is not a URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RelayError::Config(format!(
                "endpoint_base must be http or https, got {}",
                parsed.scheme()
            )));
        }

        check_positive("total_timeout", self.total_timeout)?;
        check_positive("poll_interval", self.poll_interval)?;
        check_positive("max_poll_interval", self.max_poll_interval)?;
        check_positive("connect_timeout", self.connect_timeout)?;
        check_positive("read_timeout", self.read_timeout)?;
        for (name, value) in [
            ("submit_read_timeout", self.submit_read_timeout),
            ("download_read_timeout", self.download_read_timeout),
            ("source_read_timeout", self.source_read_timeout),
        ] {
            if let Some(value) = value {
                check_positive(name, value)?;
            }
        }

        if self.max_poll_interval < self.poll_interval {
            return Err(RelayError::Config(
                "max_poll_interval must not be shorter than poll_interval".to_string(),
            ));
        }
        if !self.poll_backoff.is_finite() || self.poll_backoff < 1.0 {
            return Err(RelayError::Config(format!(
                "poll_backoff must be at least 1.0, got {}",
                self.poll_backoff
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(RelayError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.retry.factor.is_finite() || self.retry.factor < 1.0 {
            return Err(RelayError::Config(format!(
                "retry.factor must be at least 1.0, got {}",
                self.retry.factor
            )));
        }
        if self.max_payload_bytes == 0 {
            return Err(RelayError::Config(
                "max_payload_bytes must be positive".to_string(),
            ));
        }
        if self.handle_format == HandleFormat::Json && self.handle_field.trim().is_empty() {
            return Err(RelayError::Config(
                "handle_field is required for json handles".to_string(),
            ));
        }
        Ok(())
    }

    pub fn total_timeout(&self) -> Duration {
        secs(self.total_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval)
    }

    pub fn max_poll_interval(&self) -> Duration {
        secs(self.max_poll_interval)
    }

    fn timeouts(&self, read: Option<f64>) -> CallTimeouts {
        CallTimeouts {
            connect: secs(self.connect_timeout),
            read: secs(read.unwrap_or(self.read_timeout)),
        }
    }

    pub fn source_timeouts(&self) -> CallTimeouts {
        self.timeouts(self.source_read_timeout)
    }

    pub fn submit_timeouts(&self) -> CallTimeouts {
        self.timeouts(self.submit_read_timeout)
    }

    pub fn status_timeouts(&self) -> CallTimeouts {
        self.timeouts(None)
    }

    pub fn download_timeouts(&self) -> CallTimeouts {
        self.timeouts(self.download_read_timeout)
    }

    fn join(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint_base.trim().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn upload_url(&self) -> String {
        self.join(&self.upload_path)
    }

    pub fn status_url(&self, handle: &str) -> String {
        format!("{}/{}", self.join(&self.status_path).trim_end_matches('/'), handle)
    }

    pub fn download_url(&self, handle: &str) -> String {
        format!("{}/{}", self.join(&self.download_path).trim_end_matches('/'), handle)
    }

    /// Header name and value carrying the token, when a token is configured.
    pub fn auth_header_pair(&self) -> Option<(String, String)> {
        let token = self.auth_token.as_deref().filter(|t| !t.is_empty())?;
        let value = if self.auth_scheme.trim().is_empty() {
            token.to_string()
        } else {
            format!("{} {}", self.auth_scheme.trim(), token)
        };
        Some((self.auth_header.clone(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn base() -> RelayConfig {
        RelayConfig {
            endpoint_base: "http://mock".to_string(),
            ..RelayConfig::default()
        }
    }

    #[test]
    fn test_defaults_need_an_endpoint() {
        let err = RelayConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("endpoint_base"));
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
endpoint_base = "https://anon.example.com/"
auth_header = "X-Auth-Token"
auth_scheme = ""
status_format = "json_done"
handle_format = "json"
handle_hex_len = 32
total_timeout = 120
poll_interval = 2.5

[retry]
max_attempts = 4
"#
        )
        .unwrap();

        let config: RelayConfig = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.status_format, StatusFormat::JsonDone);
        assert_eq!(config.handle_format, HandleFormat::Json);
        assert_eq!(config.handle_hex_len, Some(32));
        assert_eq!(config.total_timeout(), Duration::from_secs(120));
        assert_eq!(config.poll_interval(), Duration::from_millis(2500));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.upload_url(), "https://anon.example.com/upload");
        assert_eq!(
            config.status_url("abc"),
            "https://anon.example.com/status/abc"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overlay_prefers_relay_names() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("VPS_BASE_URL", "http://legacy"),
            ("RELAY_ENDPOINT_BASE", "http://primary"),
            ("AUTH_TOKEN", "secret"),
            ("VPS_POLL_INTERVAL", "3"),
            ("SMOKE_MODE", "TRUE"),
        ]);
        let config = RelayConfig::default()
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.endpoint_base, "http://primary");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.poll_interval, 3.0);
        assert!(config.smoke_mode);
    }

    #[test]
    fn test_env_overlay_rejects_garbage_numbers() {
        let err = RelayConfig::default()
            .apply_env_from(|key| (key == "VPS_MAX_WAIT").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_overrides_replace_values() {
        let overrides = Overrides {
            endpoint_base: Some("http://other:9000".to_string()),
            total_timeout: Some(12.0),
            poll_interval: Some(60.0),
            ..Overrides::default()
        };
        let config = base().with_overrides(&overrides).unwrap();
        assert_eq!(config.endpoint_base, "http://other:9000");
        assert_eq!(config.total_timeout(), Duration::from_secs(12));
        assert_eq!(config.max_poll_interval, 60.0);
    }

    #[test]
    fn test_overrides_are_validated() {
        for overrides in [
            Overrides {
                total_timeout: Some(0.0),
                ..Overrides::default()
            },
            Overrides {
                read_timeout: Some(f64::NAN),
                ..Overrides::default()
            },
            Overrides {
                endpoint_base: Some("ftp://mock".to_string()),
                ..Overrides::default()
            },
            Overrides {
                total_timeout: Some(1e19),
                ..Overrides::default()
            },
            Overrides {
                connect_timeout: Some(1e300),
                ..Overrides::default()
            },
            Overrides {
                read_timeout: Some(MAX_DURATION_SECS + 1.0),
                ..Overrides::default()
            },
        ] {
            assert!(base().with_overrides(&overrides).is_err(), "{overrides:?}");
        }
    }

    #[test]
    fn test_duration_ceiling_is_inclusive() {
        let config = base()
            .with_overrides(&Overrides {
                total_timeout: Some(MAX_DURATION_SECS),
                ..Overrides::default()
            })
            .unwrap();
        assert_eq!(config.total_timeout(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_stage_timeouts_fall_back_to_read_timeout() {
        let config = RelayConfig {
            read_timeout: 7.0,
            download_read_timeout: Some(60.0),
            ..base()
        };
        assert_eq!(config.status_timeouts().read, Duration::from_secs(7));
        assert_eq!(config.submit_timeouts().read, Duration::from_secs(7));
        assert_eq!(config.download_timeouts().read, Duration::from_secs(60));
        assert_eq!(config.source_timeouts().read, Duration::from_secs(20));
    }

    #[test]
    fn test_auth_header_pair() {
        let mut config = base();
        assert!(config.auth_header_pair().is_none());

        config.auth_token = Some("tok".to_string());
        assert_eq!(
            config.auth_header_pair(),
            Some(("Authorization".to_string(), "Bearer tok".to_string()))
        );

        config.auth_header = "X-Auth-Token".to_string();
        config.auth_scheme = String::new();
        assert_eq!(
            config.auth_header_pair(),
            Some(("X-Auth-Token".to_string(), "tok".to_string()))
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = RelayConfig {
            auth_token: Some("hunter2".to_string()),
            ..base()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
