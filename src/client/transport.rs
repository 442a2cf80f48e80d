//! # Transport
//!
//! Performs individual HTTP calls for the pipeline stages. Each call carries its
//! own connect and read timeout, is capped by the invocation deadline, and is
//! retried through the [`RetryPolicy`] only while no HTTP status has been
//! received. Once the remote side answered, the reply is returned as-is and the
//! caller decides what the status means.
//!
//! A `Transport` belongs to exactly one invocation. It keeps one `reqwest`
//! client per timeout profile so repeated status queries reuse connections.

use bytes::{Bytes, BytesMut};
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

use crate::client::retry::RetryPolicy;
use crate::common::config::{CallTimeouts, RelayConfig};
use crate::common::error::{Stage, TransportError};

/// Request body for a call.
#[derive(Debug, Clone)]
pub enum CallBody {
    Empty,
    /// Single-file multipart form.
    Multipart {
        field: String,
        filename: String,
        content_type: String,
        bytes: Bytes,
    },
}

/// One network call as seen by the pipeline stages.
#[derive(Debug, Clone)]
pub struct HttpCall {
    pub stage: Stage,
    pub method: Method,
    pub url: String,
    pub body: CallBody,
    pub timeouts: CallTimeouts,
    /// Abort reading once the body grows past this many bytes.
    pub max_body: Option<usize>,
}

impl HttpCall {
    pub fn get(stage: Stage, url: impl Into<String>, timeouts: CallTimeouts) -> Self {
        Self {
            stage,
            method: Method::GET,
            url: url.into(),
            body: CallBody::Empty,
            timeouts,
            max_body: None,
        }
    }

    pub fn post(stage: Stage, url: impl Into<String>, body: CallBody, timeouts: CallTimeouts) -> Self {
        Self {
            stage,
            method: Method::POST,
            url: url.into(),
            body,
            timeouts,
            max_body: None,
        }
    }

    pub fn with_max_body(mut self, limit: usize) -> Self {
        self.max_body = Some(limit);
        self
    }
}

/// Status and fully read body of a response.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpReply {
    /// Short printable excerpt of the body for error messages.
    pub fn snippet(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        let trimmed = text.trim();
        match trimmed.char_indices().nth(200) {
            Some((cut, _)) => format!("{}…", &trimmed[..cut]),
            None => trimmed.to_string(),
        }
    }
}

pub struct Transport {
    retry: RetryPolicy,
    auth: Option<(String, String)>,
    deadline: Option<Instant>,
    clients: Mutex<HashMap<CallTimeouts, reqwest::Client>>,
    attempts: AtomicU32,
    retries: AtomicU32,
}

impl Transport {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            auth: None,
            deadline: None,
            clients: Mutex::new(HashMap::new()),
            attempts: AtomicU32::new(0),
            retries: AtomicU32::new(0),
        }
    }

    /// Transport for one invocation: retry policy and auth from `config`, every
    /// call capped by `deadline`.
    pub fn for_invocation(config: &RelayConfig, deadline: Instant) -> Self {
        let mut transport = Transport::new(RetryPolicy::from(&config.retry));
        transport.auth = config.auth_header_pair();
        transport.deadline = Some(deadline);
        transport
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Requests put on the wire so far, retries included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    pub async fn call(&self, call: HttpCall) -> Result<HttpReply, TransportError> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.call_inner(&call))
                .await
                .unwrap_or(Err(TransportError::DeadlineExceeded)),
            None => self.call_inner(&call).await,
        }
    }

    async fn call_inner(&self, call: &HttpCall) -> Result<HttpReply, TransportError> {
        let client = self.client_for(call.timeouts)?;
        let label = format!("{} {}", call.stage, call.url);

        let response = self
            .retry
            .run(
                &label,
                |attempt| {
                    self.attempts.fetch_add(1, Ordering::Relaxed);
                    if attempt > 1 {
                        self.retries.fetch_add(1, Ordering::Relaxed);
                    }
                    self.send_once(&client, call)
                },
                TransportError::is_retryable,
            )
            .await?;

        let status = response.status();
        debug!("{} {} -> {}", call.method, call.url, status);
        let body = read_body(response, call.max_body).await?;
        Ok(HttpReply { status, body })
    }

    async fn send_once(
        &self,
        client: &reqwest::Client,
        call: &HttpCall,
    ) -> Result<reqwest::Response, TransportError> {
        let mut request = client.request(call.method.clone(), &call.url);
        if let Some((header, value)) = &self.auth {
            request = request.header(header.as_str(), value.as_str());
        }

        // Forms are single-use, so every attempt builds its own.
        if let CallBody::Multipart {
            field,
            filename,
            content_type,
            bytes,
        } = &call.body
        {
            let part = Part::bytes(bytes.to_vec())
                .file_name(filename.clone())
                .mime_str(content_type)
                .map_err(|e| TransportError::Request(e.to_string()))?;
            request = request.multipart(Form::new().part(field.clone(), part));
        }

        request.send().await.map_err(TransportError::from_send)
    }

    fn client_for(&self, timeouts: CallTimeouts) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&timeouts) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;
        clients.insert(timeouts, client.clone());
        Ok(client)
    }
}

/// Read a response body chunk by chunk, aborting once `limit` is exceeded.
async fn read_body(
    mut response: reqwest::Response,
    limit: Option<usize>,
) -> Result<Bytes, TransportError> {
    if let (Some(limit), Some(declared)) = (limit, response.content_length()) {
        if declared > limit as u64 {
            return Err(TransportError::BodyTooLarge { limit });
        }
    }

    let mut buffer = BytesMut::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| TransportError::Body(e.to_string()))?
    {
        if let Some(limit) = limit {
            if buffer.len() + chunk.len() > limit {
                return Err(TransportError::BodyTooLarge { limit });
            }
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}
