//! Sweep orchestration over (service x concurrency) cells.
//!
//! Cells run strictly one after another. Each service is probed once before
//! its first cell; an unreachable service is skipped and reported, the rest
//! of the matrix still runs.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::LoadConfig;
use crate::context::RunContext;
use crate::dispatch::DispatchEngine;
use crate::error::{EngineError, EngineResult};
use crate::recorder::RunSummary;
use crate::request::RequestSpec;

/// One row of the sweep matrix.
#[derive(Debug, Clone)]
pub struct ServiceTarget {
    pub spec: Arc<RequestSpec>,
    /// Levels are swept in this order, duplicates included.
    pub concurrency_levels: Vec<u32>,
}

/// Orchestrator knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub cooldown: Duration,
    pub probe: bool,
    pub probe_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(2),
            probe: true,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// A service skipped because its probe failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreachableTarget {
    pub service_name: String,
    pub url: String,
    pub reason: String,
}

/// Everything one sweep produced, in target-then-concurrency order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixReport {
    pub summaries: Vec<RunSummary>,
    pub unreachable: Vec<UnreachableTarget>,
}

impl MatrixReport {
    pub fn is_unreachable(&self, service_name: &str) -> bool {
        self.unreachable
            .iter()
            .any(|target| target.service_name == service_name)
    }
}

/// Drives the dispatch engine across the whole matrix.
pub struct RunOrchestrator {
    engine: DispatchEngine,
    options: OrchestratorOptions,
}

impl RunOrchestrator {
    pub fn new(engine: DispatchEngine, options: OrchestratorOptions) -> Self {
        Self { engine, options }
    }

    /// Engine and options as described by a configuration document.
    pub fn from_config(config: &LoadConfig) -> EngineResult<Self> {
        config.validate()?;
        let engine = DispatchEngine::new(config.request_timeout())?;
        Ok(Self::new(
            engine,
            OrchestratorOptions {
                cooldown: config.cooldown(),
                probe: config.probe,
                probe_timeout: config.probe_timeout(),
            },
        ))
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Build the matrix for a configuration. Fails before any traffic if a
    /// service is malformed.
    pub fn plan(config: &LoadConfig) -> EngineResult<Vec<ServiceTarget>> {
        config.validate()?;
        config
            .services
            .iter()
            .map(|service| {
                Ok(ServiceTarget {
                    spec: Arc::new(RequestSpec::from_service(service)?),
                    concurrency_levels: config.concurrent_users.clone(),
                })
            })
            .collect()
    }

    /// Validate, plan and execute a configuration.
    pub async fn execute_config(
        &self,
        config: &LoadConfig,
        ctx: &RunContext,
    ) -> EngineResult<MatrixReport> {
        let matrix = Self::plan(config)?;
        self.execute(&matrix, config.requests_per_user, ctx).await
    }

    /// Run every cell of `matrix`, `concurrency * requests_per_user` attempts
    /// per cell.
    pub async fn execute(
        &self,
        matrix: &[ServiceTarget],
        requests_per_user: u32,
        ctx: &RunContext,
    ) -> EngineResult<MatrixReport> {
        if requests_per_user == 0 {
            return Err(EngineError::config("requests_per_user must be > 0"));
        }

        let mut report = MatrixReport::default();
        let mut cells_run = 0usize;

        for target in matrix {
            let spec = &target.spec;
            if target.concurrency_levels.is_empty() {
                continue;
            }

            info!(service = %spec.service_name, url = %spec.url, "Testing service");

            if self.options.probe {
                if let Err(e) = self.probe(spec).await {
                    warn!(service = %spec.service_name, error = %e, "Skipping unreachable service");
                    let reason = match e {
                        EngineError::Unreachable { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    report.unreachable.push(UnreachableTarget {
                        service_name: spec.service_name.clone(),
                        url: spec.url.to_string(),
                        reason,
                    });
                    continue;
                }
            }

            for &concurrency in &target.concurrency_levels {
                if cells_run > 0 && !self.options.cooldown.is_zero() {
                    sleep(self.options.cooldown).await;
                }

                let total_requests = concurrency as u64 * requests_per_user as u64;
                info!(
                    service = %spec.service_name,
                    concurrency,
                    total_requests,
                    "Starting cell"
                );

                let summary = self
                    .engine
                    .run(spec.clone(), concurrency, total_requests, ctx)
                    .await?;
                debug_assert_eq!(summary.total_requests, total_requests);

                report.summaries.push(summary);
                cells_run += 1;
            }
        }

        info!(
            cells = report.summaries.len(),
            unreachable = report.unreachable.len(),
            "Sweep complete"
        );
        Ok(report)
    }

    /// One lightweight request. Any HTTP response means the service is up.
    pub async fn probe(&self, spec: &RequestSpec) -> EngineResult<()> {
        let result = self
            .engine
            .client()
            .head(spec.url.clone())
            .headers(spec.headers.clone())
            .timeout(self.options.probe_timeout)
            .send()
            .await;

        match result {
            Ok(response) => {
                info!(
                    service = %spec.service_name,
                    status = response.status().as_u16(),
                    "Service reachable"
                );
                Ok(())
            }
            Err(e) => Err(EngineError::Unreachable {
                service: spec.service_name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}
