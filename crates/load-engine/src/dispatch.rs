//! Bounded-concurrency request dispatch.
//!
//! [`DispatchEngine::run`] spawns at most `concurrency` worker tasks. Workers
//! claim attempt indices from a shared counter until `total_requests` have
//! been claimed, so exactly that many attempts are issued and no more than
//! `concurrency` are ever in flight. Each attempt produces exactly one
//! [`Outcome`], including when the attempt itself panics.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::error::{EngineError, EngineResult};
use crate::recorder::{Outcome, ResultRecorder, RunSummary};
use crate::request::{Attempt, Payload, RequestSpec};

/// Issues a fixed number of attempts against one request template.
pub struct DispatchEngine {
    client: Client,
    show_progress: bool,
}

impl DispatchEngine {
    /// Create an engine whose calls are bounded by `request_timeout`.
    pub fn new(request_timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(10)))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| EngineError::Http(e.to_string()))?;

        Ok(Self::with_client(client))
    }

    /// Create an engine around an existing client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            show_progress: false,
        }
    }

    /// Show a progress bar on stderr while a run is active.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Issue exactly `total_requests` attempts with at most `concurrency` in
    /// flight, then return the drained summary.
    ///
    /// Individual attempt failures never fail the run, and neither does a
    /// failure to persist the error artifact; only a zero concurrency does.
    pub async fn run(
        &self,
        spec: Arc<RequestSpec>,
        concurrency: u32,
        total_requests: u64,
        ctx: &RunContext,
    ) -> EngineResult<RunSummary> {
        self.run_with(spec, concurrency, total_requests, ctx, execute_attempt)
            .await
    }

    /// [`Self::run`] with the per-attempt executor supplied by the caller.
    async fn run_with<F, Fut>(
        &self,
        spec: Arc<RequestSpec>,
        concurrency: u32,
        total_requests: u64,
        ctx: &RunContext,
        execute: F,
    ) -> EngineResult<RunSummary>
    where
        F: Fn(Client, Arc<RequestSpec>, Attempt) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        if concurrency == 0 {
            return Err(EngineError::config("concurrency must be > 0"));
        }

        info!(
            service = %spec.service_name,
            url = %spec.url,
            request_type = spec.request_type().as_str(),
            concurrency,
            total_requests,
            "Starting load run"
        );

        let recorder = Arc::new(ResultRecorder::new(
            spec.service_name.clone(),
            spec.request_type(),
            concurrency,
        ));
        let next_index = Arc::new(AtomicU64::new(0));
        let progress = self.progress_bar(total_requests);
        let workers = (concurrency as u64).min(total_requests);

        let start = Instant::now();

        let mut handles = Vec::with_capacity(workers as usize);
        for worker_id in 0..workers {
            let client = self.client.clone();
            let spec = spec.clone();
            let recorder = recorder.clone();
            let next_index = next_index.clone();
            let progress = progress.clone();
            let execute = execute.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let index = next_index.fetch_add(1, Ordering::Relaxed);
                    if index >= total_requests {
                        break;
                    }
                    let attempt = spec.build();
                    let meta = spec.meta(&attempt);
                    let correlation_id = attempt.correlation_id.clone();
                    let outcome = execute(client.clone(), spec.clone(), attempt).await;

                    debug!(
                        worker_id,
                        index,
                        correlation_id = correlation_id.as_deref().unwrap_or("-"),
                        success = outcome.is_success(),
                        "Attempt finished"
                    );

                    recorder.record(outcome, meta).await;
                    progress.inc(1);
                }
            }));
        }

        // join
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task terminated abnormally");
            }
        }

        let elapsed = start.elapsed();
        progress.finish_and_clear();

        // A worker that died between claiming an index and recording its
        // outcome still owes one outcome per claimed attempt.
        let recorded = recorder.recorded().await;
        if recorded < total_requests {
            let missing = total_requests - recorded;
            warn!(missing, "Synthesizing outcomes for attempts lost with their worker");
            let meta = spec.meta(&spec.build());
            for _ in 0..missing {
                recorder
                    .record_failure(
                        None,
                        None,
                        Value::String("worker terminated before recording an outcome".to_string()),
                        meta.clone(),
                    )
                    .await;
            }
        }

        Ok(recorder.drain(ctx, elapsed).await)
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }
}

/// Run one attempt, converting a panic into a failure without timing.
async fn execute_attempt(client: Client, spec: Arc<RequestSpec>, attempt: Attempt) -> Outcome {
    guard_attempt(async move { issue(&client, &spec, &attempt).await }).await
}

async fn guard_attempt<Fut>(attempt: Fut) -> Outcome
where
    Fut: Future<Output = Outcome>,
{
    match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Outcome::Failure {
            status: None,
            elapsed: None,
            detail: Value::String(format!("attempt aborted: {}", panic_message(panic.as_ref()))),
        },
    }
}

/// Issue the outbound call and classify the result.
async fn issue(client: &Client, spec: &RequestSpec, attempt: &Attempt) -> Outcome {
    let request = client.post(spec.url.clone()).headers(spec.headers.clone());
    let request = match &attempt.payload {
        Payload::Structured(body) => request.json(body),
        Payload::Blob(bytes) => request.body(bytes.clone()),
    };

    let start = Instant::now();
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            return Outcome::Failure {
                status: None,
                elapsed: Some(start.elapsed()),
                detail: Value::String(e.to_string()),
            }
        }
    };

    let status = response.status();
    let body = response.bytes().await;
    let elapsed = start.elapsed();

    match body {
        Ok(_) if status.is_success() => Outcome::Success {
            status: status.as_u16(),
            elapsed,
        },
        Ok(bytes) => Outcome::Failure {
            status: Some(status.as_u16()),
            elapsed: Some(elapsed),
            detail: decode_error_body(&bytes),
        },
        Err(e) => Outcome::Failure {
            status: Some(status.as_u16()),
            elapsed: Some(elapsed),
            detail: Value::String(format!("failed to read response body: {}", e)),
        },
    }
}

/// Structured error if the body is JSON, raw text otherwise.
pub fn decode_error_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
