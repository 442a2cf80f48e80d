//! Web server exposing the relay as an HTTP endpoint

use axum::{
    extract::{multipart::Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use clap::Parser;
use env_logger::Builder;
use log::{error, info, LevelFilter};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use cloak_relay::client::source::ArtifactSource;
use cloak_relay::client::RelayMetrics;
use cloak_relay::common::messages::HostEvent;
use cloak_relay::{ErrorKind, JobRequest, JobResponse, Orchestrator, Overrides, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the relay configuration file (TOML format)
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

struct AppState {
    orchestrator: Orchestrator,
    metrics: Mutex<RelayMetrics>,
}

fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    let args = Args::parse();

    info!("🚀 Initializing web server...");

    let config = match &args.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::from_env()?,
    };
    if config.smoke_mode {
        info!("🧪 Smoke mode enabled: URL requests are echoed back");
    }

    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(Arc::new(config)),
        metrics: Mutex::new(RelayMetrics::new()),
    });

    let app = Router::new()
        .route("/run", post(run_handler))
        .route("/api/cloak", post(cloak_upload_handler))
        .route("/api/health", get(health_check))
        .route("/api/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("🌐 Web server running on http://{}", args.bind);
    info!("📡 API endpoint: http://{}/run", args.bind);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cloak-relay",
    }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = state.metrics.lock().await;
    Json(serde_json::json!({
        "uptime_secs": metrics.uptime().as_secs(),
        "stats": metrics.aggregate(),
    }))
}

/// Accepts either a bare request object or the `{"input": {...}}` envelope.
///
/// The body is parsed here rather than by an extractor so that malformed JSON
/// still gets a structured failure reply.
async fn run_handler(State(state): State<Arc<AppState>>, raw: Bytes) -> Json<Value> {
    let body = match parse_body(&raw) {
        Ok(body) => body,
        Err(response) => return respond(response),
    };
    let input = if body.get("input").is_some() {
        let event: HostEvent = match serde_json::from_value(body) {
            Ok(event) => event,
            Err(e) => return respond(JobResponse::failed(ErrorKind::InvalidInput, e.to_string())),
        };
        if event.is_ping() {
            return Json(serde_json::json!({ "ok": true }));
        }
        event.input
    } else {
        body
    };

    let request: JobRequest = match serde_json::from_value(input) {
        Ok(request) => request,
        Err(e) => {
            error!("❌ Malformed request: {}", e);
            return respond(JobResponse::failed(
                ErrorKind::InvalidInput,
                format!("malformed request: {e}"),
            ));
        }
    };

    if state.orchestrator.config().smoke_mode {
        if let Some(url) = request.url.as_deref().filter(|u| !u.trim().is_empty()) {
            info!("🧪 Smoke mode: echoing {}", url);
            return respond(JobResponse::Completed {
                job_handle: None,
                output_base64: None,
                output_url: Some(url.to_string()),
            });
        }
    }

    let overrides = request.overrides.clone();
    let source = match ArtifactSource::from_parts(request.url.as_deref(), request.data.as_deref()) {
        Ok(source) => source,
        Err(e) => return respond(JobResponse::failed(e.kind(), e.to_string())),
    };
    respond(execute(state, source, overrides).await)
}

/// Multipart upload for browser clients: one `image` field.
async fn cloak_upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let mut image: Option<Bytes> = None;
    let mut filename = String::from("uploaded_image.jpg");

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Failed to read multipart data: {}", e),
            }),
        )
    })? {
        let name = field.name().unwrap_or("").to_string();

        if name == "image" {
            filename = field.file_name().unwrap_or("image.jpg").to_string();
            let data = field.bytes().await.map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: format!("Failed to read image data: {}", e),
                    }),
                )
            })?;
            image = Some(data);
        }
    }

    let image = image.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "No image provided".to_string(),
            }),
        )
    })?;

    info!("📤 Received image: {} ({} bytes)", filename, image.len());

    let response = execute(state, ArtifactSource::Bytes(image), Overrides::default()).await;
    let status = if response.is_completed() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(response)))
}

/// Run one orchestration on its own task so a panic still yields a reply.
async fn execute(state: Arc<AppState>, source: ArtifactSource, overrides: Overrides) -> JobResponse {
    let task_state = state.clone();
    let task = tokio::spawn(async move {
        let orchestrator = &task_state.orchestrator;
        let (result, metrics) = orchestrator.run_source(source, &overrides).await;
        task_state.metrics.lock().await.record(metrics);

        let effective = orchestrator
            .config()
            .with_overrides(&overrides)
            .unwrap_or_else(|_| orchestrator.config().clone());
        result.to_response(&effective)
    });

    match task.await {
        Ok(response) => response,
        Err(e) => {
            error!("❌ Orchestration task aborted: {}", e);
            JobResponse::failed(
                ErrorKind::TransportFailure,
                format!("orchestration task aborted: {e}"),
            )
        }
    }
}

fn parse_body(raw: &[u8]) -> Result<Value, JobResponse> {
    let body: Value = serde_json::from_slice(raw).map_err(|e| {
        error!("❌ Request body is not JSON: {}", e);
        JobResponse::failed(ErrorKind::InvalidInput, format!("request body is not JSON: {e}"))
    })?;
    if !body.is_object() {
        return Err(JobResponse::failed(
            ErrorKind::InvalidInput,
            "request body must be a JSON object",
        ));
    }
    Ok(body)
}

fn respond(response: JobResponse) -> Json<Value> {
    match serde_json::to_value(&response) {
        Ok(value) => Json(value),
        Err(e) => Json(serde_json::json!({
            "status": "failed",
            "error_kind": "TransportFailure",
            "error": format!("failed to encode response: {e}"),
        })),
    }
}
