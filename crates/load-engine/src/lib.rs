//! Concurrent HTTP load generation and result aggregation.
//!
//! This crate provides tools to:
//! - Materialize per-attempt request payloads with correlation identifiers
//! - Dispatch a fixed number of requests with bounded concurrency
//! - Aggregate outcomes into per-cell summaries and error artifacts
//! - Sweep a (service x concurrency) matrix with reachability probes
//! - Output comparison tables (console, JSON, CSV)

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod recorder;
pub mod report;
pub mod request;

pub use config::{LoadConfig, RequestType, ServiceConfig};
pub use context::RunContext;
pub use dispatch::DispatchEngine;
pub use error::{EngineError, EngineResult};
pub use orchestrator::{
    MatrixReport, OrchestratorOptions, RunOrchestrator, ServiceTarget, UnreachableTarget,
};
pub use recorder::{ErrorRecord, Outcome, ResultRecorder, RunSummary};
pub use report::{ComparisonReport, SeriesView, ServiceSeries};
pub use request::{Attempt, BasePayload, Payload, RequestMeta, RequestSpec};
