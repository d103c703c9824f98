//! Result recording and summary statistics.
//!
//! [`ResultRecorder`] is the only state workers share. Every attempt reports
//! exactly one [`Outcome`]; after the pool is joined, [`ResultRecorder::drain`]
//! turns the accumulated data into a [`RunSummary`] and persists the error
//! records, if any.

use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::RequestType;
use crate::context::RunContext;
use crate::error::EngineResult;
use crate::request::RequestMeta;

/// Prefix of persisted error artifacts.
pub const ERROR_ARTIFACT_PREFIX: &str = "error_records_";

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        status: u16,
        elapsed: Duration,
    },
    /// `status` is `None` for transport failures, `elapsed` is `None` when
    /// timing never completed.
    Failure {
        status: Option<u16>,
        elapsed: Option<Duration>,
        detail: Value,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Diagnostic payload of one failed attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub timestamp: String,
    /// 0 means the call never produced an HTTP response.
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
    pub error_response: Value,
    pub request_info: RequestMeta,
}

#[derive(Serialize)]
struct ErrorArtifact<'a> {
    service_name: &'a str,
    concurrency: u32,
    errors: &'a [ErrorRecord],
}

/// Aggregate over all attempts of one (service, concurrency) cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub service_name: String,
    pub request_type: RequestType,
    pub concurrency: u32,
    pub total_requests: u64,
    pub total_elapsed_secs: f64,
    pub success_count: u64,
    pub failure_count: u64,

    // Latency (seconds)
    pub latency_avg_secs: f64,
    pub latency_max_secs: f64,
    pub latency_min_secs: f64,

    pub qps: f64,

    /// File name of the error artifact inside the run context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_file: Option<String>,
}

/// Min / avg / max over latency samples. All zero when there are none.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub min: Duration,
    pub avg: Duration,
    pub max: Duration,
}

impl LatencyStats {
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let total: Duration = samples.iter().sum();
        Self {
            min: samples.iter().copied().min().unwrap_or_default(),
            avg: total / samples.len() as u32,
            max: samples.iter().copied().max().unwrap_or_default(),
        }
    }
}

/// QPS for `total_requests` over `elapsed`; 0 when nothing elapsed.
pub fn compute_qps(total_requests: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        total_requests as f64 / secs
    } else {
        0.0
    }
}

#[derive(Default)]
struct RecorderState {
    success: u64,
    failure: u64,
    latencies: Vec<Duration>,
    errors: Vec<ErrorRecord>,
}

/// Concurrency-safe accumulator of outcomes for one cell.
pub struct ResultRecorder {
    service_name: String,
    request_type: RequestType,
    concurrency: u32,
    state: Mutex<RecorderState>,
}

impl ResultRecorder {
    pub fn new(service_name: impl Into<String>, request_type: RequestType, concurrency: u32) -> Self {
        Self {
            service_name: service_name.into(),
            request_type,
            concurrency,
            state: Mutex::new(RecorderState::default()),
        }
    }

    /// Record a successful attempt.
    pub async fn record_success(&self, elapsed: Duration) {
        let mut state = self.state.lock().await;
        state.success += 1;
        state.latencies.push(elapsed);
    }

    /// Record a failed attempt and keep its diagnostics.
    ///
    /// Application failures (a status is present) contribute a latency
    /// sample; transport failures do not.
    pub async fn record_failure(
        &self,
        status: Option<u16>,
        elapsed: Option<Duration>,
        detail: Value,
        request: RequestMeta,
    ) {
        let record = ErrorRecord {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            status_code: status.unwrap_or(0),
            elapsed_ms: elapsed.map(|e| e.as_secs_f64() * 1000.0),
            error_response: detail,
            request_info: request,
        };

        let mut state = self.state.lock().await;
        state.failure += 1;
        if let (Some(_), Some(elapsed)) = (status, elapsed) {
            state.latencies.push(elapsed);
        }
        state.errors.push(record);
    }

    /// Record any outcome.
    pub async fn record(&self, outcome: Outcome, request: RequestMeta) {
        match outcome {
            Outcome::Success { elapsed, .. } => self.record_success(elapsed).await,
            Outcome::Failure {
                status,
                elapsed,
                detail,
            } => self.record_failure(status, elapsed, detail, request).await,
        }
    }

    /// Outcomes recorded so far.
    pub async fn recorded(&self) -> u64 {
        let state = self.state.lock().await;
        state.success + state.failure
    }

    /// Build the summary and persist error records. Call only after every
    /// worker has been joined.
    ///
    /// The recorder is left empty afterwards; latency samples are not kept.
    /// A failure to persist the error records is logged and leaves
    /// `error_file` empty; the summary itself is always produced.
    pub async fn drain(&self, ctx: &RunContext, total_elapsed: Duration) -> RunSummary {
        let state = std::mem::take(&mut *self.state.lock().await);

        let total_requests = state.success + state.failure;
        let latency = LatencyStats::from_samples(&state.latencies);

        let error_file = if state.errors.is_empty() {
            None
        } else {
            match self.persist_errors(ctx, &state.errors) {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(
                        service = %self.service_name,
                        concurrency = self.concurrency,
                        errors = state.errors.len(),
                        error = %e,
                        "Failed to save error records"
                    );
                    None
                }
            }
        };

        let summary = RunSummary {
            service_name: self.service_name.clone(),
            request_type: self.request_type,
            concurrency: self.concurrency,
            total_requests,
            total_elapsed_secs: total_elapsed.as_secs_f64(),
            success_count: state.success,
            failure_count: state.failure,
            latency_avg_secs: latency.avg.as_secs_f64(),
            latency_max_secs: latency.max.as_secs_f64(),
            latency_min_secs: latency.min.as_secs_f64(),
            qps: compute_qps(total_requests, total_elapsed),
            error_file,
        };

        info!(
            service = %summary.service_name,
            concurrency = summary.concurrency,
            total_requests = summary.total_requests,
            success = summary.success_count,
            failure = summary.failure_count,
            elapsed_secs = summary.total_elapsed_secs,
            avg_latency_secs = summary.latency_avg_secs,
            qps = summary.qps,
            "Run drained"
        );

        summary
    }

    fn persist_errors(&self, ctx: &RunContext, errors: &[ErrorRecord]) -> EngineResult<String> {
        let name = format!(
            "{}{:03}_{}.json",
            ERROR_ARTIFACT_PREFIX,
            ctx.next_sequence(),
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let artifact = ErrorArtifact {
            service_name: &self.service_name,
            concurrency: self.concurrency,
            errors,
        };
        let json = serde_json::to_vec_pretty(&artifact)?;
        ctx.write_artifact(&name, &json)?;

        warn!(
            service = %self.service_name,
            concurrency = self.concurrency,
            errors = errors.len(),
            file = %name,
            "Saved error records"
        );
        Ok(name)
    }
}
