//! # Client Binary Entry Point
//!
//! Runs one remote job from the command line and writes the result.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin client -- --config config/client.toml \
//!   --url https://example.com/cat.jpg --output ./cloaked.jpg
//! ```
//!
//! From a local file, with metrics:
//! ```bash
//! cargo run --bin client -- --config config/client.toml \
//!   --file ./cat.jpg --output ./cloaked.jpg \
//!   --metrics-output ./metrics/run.json
//! ```
//!
//! The client will:
//! 1. Load configuration from the TOML file (or the environment alone)
//! 2. Build the request from exactly one of `--url`, `--file`, `--inline`
//! 3. Submit, poll and fetch through the orchestrator
//! 4. Write the artifact to `--output`, or print the JSON response to stdout
//! 5. Export run metrics to JSON (if metrics-output specified)

use anyhow::{anyhow, bail, Context};
use bytes::Bytes;
use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use std::io::Write;
use std::sync::Arc;

use cloak_relay::client::source::ArtifactSource;
use cloak_relay::{OrchestrationResult, Orchestrator, Overrides, RelayConfig};

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the relay configuration file (TOML format)
    ///
    /// Without it the configuration comes from defaults and `RELAY_*` variables.
    #[arg(short, long)]
    config: Option<String>,

    /// Source image URL
    #[arg(long, conflicts_with_all = ["file", "inline"])]
    url: Option<String>,

    /// Local image file
    #[arg(long, conflicts_with = "inline")]
    file: Option<String>,

    /// Inline base64 payload (a `data:` prefix is accepted)
    #[arg(long)]
    inline: Option<String>,

    /// Where to write the resulting artifact
    #[arg(short, long)]
    output: Option<String>,

    /// Path to write metrics JSON output (optional)
    #[arg(long)]
    metrics_output: Option<String>,

    /// Override the remote service base URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Override the invocation budget (seconds)
    #[arg(long)]
    total_timeout: Option<f64>,

    /// Override the wait between status queries (seconds)
    #[arg(long)]
    poll_interval: Option<f64>,
}

/// Initialize the logging system with timestamp, level, and message formatting.
///
/// Logs go to stderr so stdout stays clean for the JSON response.
/// Format: `[HH:MM:SS] [LEVEL] message`
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
    // Initialize logging
    init_logger();

    // Parse command-line arguments
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => RelayConfig::from_env().context("failed to load configuration from env")?,
    };
    info!("⚙️  Remote service: {}", config.endpoint_base);

    let overrides = Overrides {
        endpoint_base: args.endpoint.clone(),
        total_timeout: args.total_timeout,
        poll_interval: args.poll_interval,
        ..Overrides::default()
    };

    let source = match &args.file {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            ArtifactSource::Bytes(Bytes::from(bytes))
        }
        None if args.url.is_none() && args.inline.is_none() => {
            bail!("one of --url, --file or --inline is required")
        }
        None => ArtifactSource::from_parts(args.url.as_deref(), args.inline.as_deref())?,
    };

    let orchestrator = Orchestrator::new(Arc::new(config));
    let (result, metrics) = orchestrator.run_source(source, &overrides).await;

    // Export metrics if enabled
    if let Some(output_path) = &args.metrics_output {
        metrics.export_to_json(output_path)?;
        info!("📊 Metrics exported to: {}", output_path);
    }

    if let (Some(path), OrchestrationResult::Success { artifact, .. }) = (&args.output, &result) {
        tokio::fs::write(path, artifact)
            .await
            .with_context(|| format!("failed to write {path}"))?;
        info!("💾 Wrote {} bytes to {}", artifact.len(), path);
    } else {
        let effective = orchestrator
            .config()
            .with_overrides(&overrides)
            .unwrap_or_else(|_| orchestrator.config().clone());
        println!("{}", serde_json::to_string_pretty(&result.to_response(&effective))?);
    }

    match result {
        OrchestrationResult::Success { .. } => Ok(()),
        OrchestrationResult::Failure { kind, message, .. } => Err(anyhow!("{kind}: {message}")),
    }
}
