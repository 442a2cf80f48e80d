//! In-process stand-in for the remote job service.
//!
//! Binds an axum router on `127.0.0.1:0` and counts every request so tests can
//! assert on exactly how much traffic a run produced.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use cloak_relay::common::config::RetryConfig;
use cloak_relay::common::messages::{HandleFormat, StatusFormat};
use cloak_relay::RelayConfig;

pub const CAT_JPG: &[u8] = b"\xFF\xD8\xFFcat-image-bytes\xFF\xD9";
pub const CLOAKED: &[u8] = b"cloaked-cat!";

#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub handle: String,
    /// Reply to the upload with `{"job_id": ...}` instead of plain text.
    pub json_handle: bool,
    pub upload_status: StatusCode,
    pub status_format: StatusFormat,
    /// Answered queries reporting pending before the job turns ready.
    pub pending_polls: u32,
    /// Answered queries reporting 404 before the job is known.
    pub not_found_polls: u32,
    pub never_ready: bool,
    pub fail_message: Option<String>,
    /// The first `slow_status_requests` status requests stall for `status_delay`.
    pub slow_status_requests: u32,
    pub status_delay: Duration,
    pub result: Vec<u8>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            handle: "abc123".to_string(),
            json_handle: false,
            upload_status: StatusCode::OK,
            status_format: StatusFormat::Text,
            pending_polls: 0,
            not_found_polls: 0,
            never_ready: false,
            fail_message: None,
            slow_status_requests: 0,
            status_delay: Duration::ZERO,
            result: CLOAKED.to_vec(),
        }
    }
}

#[derive(Default)]
pub struct Counters {
    pub source: AtomicU32,
    pub uploads: AtomicU32,
    pub status: AtomicU32,
    pub downloads: AtomicU32,
    pub uploaded_bytes: AtomicUsize,
    pub last_auth: Mutex<Option<String>>,
}

impl Counters {
    pub fn total(&self) -> u32 {
        self.source.load(Ordering::SeqCst)
            + self.uploads.load(Ordering::SeqCst)
            + self.status.load(Ordering::SeqCst)
            + self.downloads.load(Ordering::SeqCst)
    }

    pub fn status_queries(&self) -> u32 {
        self.status.load(Ordering::SeqCst)
    }
}

struct MockState {
    behavior: MockBehavior,
    counters: Arc<Counters>,
}

pub struct MockRemote {
    pub base: String,
    pub counters: Arc<Counters>,
    behavior: MockBehavior,
}

impl MockRemote {
    pub async fn start(behavior: MockBehavior) -> Self {
        let counters = Arc::new(Counters::default());
        let state = Arc::new(MockState {
            behavior: behavior.clone(),
            counters: counters.clone(),
        });

        let app = Router::new()
            .route("/cat.jpg", get(source_handler))
            .route("/upload", post(upload_handler))
            .route("/status/:id", get(status_handler))
            .route("/download/:id", get(download_handler))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            counters,
            behavior,
        }
    }

    pub fn cat_url(&self) -> String {
        format!("{}/cat.jpg", self.base)
    }

    /// Relay configuration pointed at this mock with test-sized timings.
    pub fn config(&self) -> RelayConfig {
        RelayConfig {
            endpoint_base: self.base.clone(),
            status_format: self.behavior.status_format,
            handle_format: if self.behavior.json_handle {
                HandleFormat::Json
            } else {
                HandleFormat::Text
            },
            total_timeout: 10.0,
            poll_interval: 0.05,
            max_poll_interval: 0.05,
            connect_timeout: 1.0,
            read_timeout: 1.0,
            source_read_timeout: None,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 10,
                factor: 2.0,
                max_delay_ms: 50,
                jitter: false,
            },
            ..RelayConfig::default()
        }
    }
}

async fn source_handler(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    state.counters.source.fetch_add(1, Ordering::SeqCst);
    CAT_JPG
}

async fn upload_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.counters.uploads.fetch_add(1, Ordering::SeqCst);
    state
        .counters
        .uploaded_bytes
        .store(body.len(), Ordering::SeqCst);
    if let Ok(mut auth) = state.counters.last_auth.lock() {
        *auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    let behavior = &state.behavior;
    if !behavior.upload_status.is_success() {
        return (behavior.upload_status, "upload refused").into_response();
    }
    if behavior.json_handle {
        Json(serde_json::json!({ "job_id": behavior.handle })).into_response()
    } else {
        format!("{}\n", behavior.handle).into_response()
    }
}

enum Reply {
    Pending,
    Ready,
    Failed(String),
}

async fn status_handler(State(state): State<Arc<MockState>>, Path(id): Path<String>) -> Response {
    let seen = state.counters.status.fetch_add(1, Ordering::SeqCst) + 1;
    let behavior = &state.behavior;

    if seen <= behavior.slow_status_requests {
        tokio::time::sleep(behavior.status_delay).await;
    }
    if id != behavior.handle {
        return StatusCode::NOT_FOUND.into_response();
    }

    let answered = seen.saturating_sub(behavior.slow_status_requests);
    if answered <= behavior.not_found_polls {
        return StatusCode::NOT_FOUND.into_response();
    }

    let reply = if let Some(message) = &behavior.fail_message {
        Reply::Failed(message.clone())
    } else if behavior.never_ready || answered <= behavior.not_found_polls + behavior.pending_polls {
        Reply::Pending
    } else {
        Reply::Ready
    };

    match (behavior.status_format, reply) {
        (StatusFormat::Text, Reply::Pending) => "PENDING".into_response(),
        (StatusFormat::Text, Reply::Ready) => "READY".into_response(),
        (StatusFormat::Text, Reply::Failed(m)) => format!("FAILED: {m}").into_response(),
        (StatusFormat::JsonStatus, Reply::Pending) => {
            Json(serde_json::json!({ "status": "processing" })).into_response()
        }
        (StatusFormat::JsonStatus, Reply::Ready) => {
            Json(serde_json::json!({ "status": "done" })).into_response()
        }
        (StatusFormat::JsonStatus, Reply::Failed(m)) => {
            Json(serde_json::json!({ "status": "failed", "error": m })).into_response()
        }
        (StatusFormat::JsonDone, Reply::Pending) => {
            Json(serde_json::json!({ "done": false, "error": null })).into_response()
        }
        (StatusFormat::JsonDone, Reply::Ready) => {
            Json(serde_json::json!({ "done": true })).into_response()
        }
        (StatusFormat::JsonDone, Reply::Failed(m)) => {
            Json(serde_json::json!({ "done": false, "error": m })).into_response()
        }
    }
}

async fn download_handler(State(state): State<Arc<MockState>>, Path(id): Path<String>) -> Response {
    state.counters.downloads.fetch_add(1, Ordering::SeqCst);
    if id != state.behavior.handle {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.behavior.result.clone().into_response()
}

/// Source server answering every request with a chunked body and no
/// `Content-Length`, so a reader only learns the size by consuming chunks.
pub struct ChunkedSource {
    pub url: String,
    pub hits: Arc<AtomicU32>,
}

impl ChunkedSource {
    pub async fn start(chunk: &'static [u8], chunks: usize) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }

                    let head = "HTTP/1.1 200 OK\r\ncontent-type: image/jpeg\r\ntransfer-encoding: chunked\r\n\r\n";
                    if socket.write_all(head.as_bytes()).await.is_err() {
                        return;
                    }
                    for _ in 0..chunks {
                        let frame = [
                            format!("{:x}\r\n", chunk.len()).as_bytes(),
                            chunk,
                            b"\r\n",
                        ]
                        .concat();
                        // The client hangs up once it has seen enough.
                        if socket.write_all(&frame).await.is_err() {
                            return;
                        }
                        let _ = socket.flush().await;
                    }
                    let _ = socket.write_all(b"0\r\n\r\n").await;
                });
            }
        });

        Self {
            url: format!("http://{addr}/stream.jpg"),
            hits,
        }
    }
}
