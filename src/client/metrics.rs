use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::client::orchestrator::OrchestrationResult;
use crate::common::error::{ErrorKind, Stage};

/// Timings and counters for one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub run_id: Uuid,
    pub started_at_ms: i64, // milliseconds since epoch
    pub resolve_ms: Option<u64>,
    pub submit_ms: Option<u64>,
    pub poll_ms: Option<u64>,
    pub fetch_ms: Option<u64>,
    pub total_ms: u64,
    pub status_queries: u32,
    pub transport_attempts: u32,
    pub transport_retries: u32,
    pub input_bytes: Option<usize>,
    pub output_bytes: Option<usize>,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub job_handle: Option<String>,
}

impl RunMetrics {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at_ms: chrono::Utc::now().timestamp_millis(),
            resolve_ms: None,
            submit_ms: None,
            poll_ms: None,
            fetch_ms: None,
            total_ms: 0,
            status_queries: 0,
            transport_attempts: 0,
            transport_retries: 0,
            input_bytes: None,
            output_bytes: None,
            success: false,
            error_kind: None,
            job_handle: None,
        }
    }

    pub fn record_stage(&mut self, stage: Stage, elapsed: Duration) {
        let ms = Some(elapsed.as_millis() as u64);
        match stage {
            Stage::Source => self.resolve_ms = ms,
            Stage::Submit => self.submit_ms = ms,
            Stage::Status => self.poll_ms = ms,
            Stage::Download => self.fetch_ms = ms,
        }
    }

    pub fn finish(&mut self, result: &OrchestrationResult, total: Duration) {
        self.total_ms = total.as_millis() as u64;
        self.success = result.is_success();
        self.error_kind = result.kind();
        self.job_handle = result.job_handle().map(|h| h.to_string());
        if let OrchestrationResult::Success { artifact, .. } = result {
            self.output_bytes = Some(artifact.len());
        }
    }

    pub fn export_to_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AggregatedStats {
    /// Runs recorded since startup, including those evicted from the window.
    pub lifetime_runs: u64,
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub failure_rate: f64,

    // End-to-end latency of successful runs (milliseconds)
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
    pub latency_avg_ms: f64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub latency_p99_ms: u64,

    pub avg_status_queries: f64,
    pub total_transport_retries: u64,

    // Failure kinds breakdown
    pub failure_kinds: HashMap<String, usize>,
}

/// Runs kept for aggregation unless configured otherwise.
pub const DEFAULT_WINDOW: usize = 1_000;

/// Rolling record of the most recent runs served by one process.
///
/// Only the last `window` runs are kept; older ones only count towards
/// `lifetime_runs`.
#[derive(Debug)]
pub struct RelayMetrics {
    start_time: Instant,
    window: usize,
    lifetime_runs: u64,
    runs: VecDeque<RunMetrics>,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        let window = window.max(1);
        Self {
            start_time: Instant::now(),
            window,
            lifetime_runs: 0,
            runs: VecDeque::with_capacity(window),
        }
    }

    pub fn record(&mut self, run: RunMetrics) {
        if self.runs.len() == self.window {
            self.runs.pop_front();
        }
        self.runs.push_back(run);
        self.lifetime_runs += 1;
    }

    /// Runs currently held in the window.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn aggregate(&self) -> AggregatedStats {
        let mut stats = AggregatedStats {
            lifetime_runs: self.lifetime_runs,
            ..AggregatedStats::default()
        };

        if self.runs.is_empty() {
            return stats;
        }

        stats.total_runs = self.runs.len();
        stats.successful_runs = self.runs.iter().filter(|r| r.success).count();
        stats.failed_runs = stats.total_runs - stats.successful_runs;
        stats.failure_rate = (stats.failed_runs as f64 / stats.total_runs as f64) * 100.0;

        let mut latencies: Vec<u64> = self
            .runs
            .iter()
            .filter(|r| r.success)
            .map(|r| r.total_ms)
            .collect();

        if !latencies.is_empty() {
            latencies.sort_unstable();

            stats.latency_min_ms = latencies[0];
            stats.latency_max_ms = latencies[latencies.len() - 1];
            stats.latency_avg_ms =
                latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;

            stats.latency_p50_ms = percentile(&latencies, 50.0);
            stats.latency_p95_ms = percentile(&latencies, 95.0);
            stats.latency_p99_ms = percentile(&latencies, 99.0);
        }

        stats.avg_status_queries = self
            .runs
            .iter()
            .map(|r| r.status_queries as f64)
            .sum::<f64>()
            / stats.total_runs as f64;
        stats.total_transport_retries = self.runs.iter().map(|r| r.transport_retries as u64).sum();

        for run in self.runs.iter().filter(|r| !r.success) {
            if let Some(kind) = run.error_kind {
                *stats.failure_kinds.entry(kind.to_string()).or_insert(0) += 1;
            }
        }

        stats
    }
}

fn percentile(sorted_data: &[u64], percentile: f64) -> u64 {
    if sorted_data.is_empty() {
        return 0;
    }

    let index = (percentile / 100.0 * (sorted_data.len() - 1) as f64).round() as usize;
    sorted_data[index.min(sorted_data.len() - 1)]
}
