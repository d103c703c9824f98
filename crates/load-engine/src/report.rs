//! Results reporting and formatting.

use std::path::PathBuf;

use chrono::Local;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{EngineError, EngineResult};
use crate::orchestrator::MatrixReport;
use crate::recorder::RunSummary;

/// Prefix of persisted comparison tables.
pub const COMPARISON_PREFIX: &str = "performance_comparison_";

/// Column order of the comparison table.
pub const COMPARISON_COLUMNS: [&str; 10] = [
    "service_name",
    "concurrent_users",
    "total_requests",
    "total_elapsed_secs",
    "success_count",
    "failure_count",
    "avg_latency_secs",
    "max_latency_secs",
    "min_latency_secs",
    "qps",
];

/// Per-service series, one point per concurrency level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSeries {
    pub name: String,
    pub qps: Vec<f64>,
    pub response_times: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesView {
    pub concurrent_users: Vec<u32>,
    pub services: Vec<ServiceSeries>,
}

/// Formats sweep results for output.
pub struct ComparisonReport;

impl ComparisonReport {
    /// One comparison row, in [`COMPARISON_COLUMNS`] order.
    pub fn row(summary: &RunSummary) -> [String; 10] {
        [
            summary.service_name.clone(),
            summary.concurrency.to_string(),
            summary.total_requests.to_string(),
            format!("{:.2}", summary.total_elapsed_secs),
            summary.success_count.to_string(),
            summary.failure_count.to_string(),
            format!("{:.3}", summary.latency_avg_secs),
            format!("{:.3}", summary.latency_max_secs),
            format!("{:.3}", summary.latency_min_secs),
            format!("{:.2}", summary.qps),
        ]
    }

    /// Comparison table as CSV text, header included.
    pub fn to_csv(summaries: &[RunSummary]) -> EngineResult<String> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(COMPARISON_COLUMNS)?;
        for summary in summaries {
            wtr.write_record(Self::row(summary))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// Persist the comparison table inside the run context.
    pub fn write_csv(ctx: &RunContext, summaries: &[RunSummary]) -> EngineResult<PathBuf> {
        let name = format!(
            "{}{}_{:03}.csv",
            COMPARISON_PREFIX,
            Local::now().format("%Y%m%d_%H%M%S"),
            ctx.next_sequence()
        );
        let csv = Self::to_csv(summaries)?;
        ctx.write_artifact(&name, csv.as_bytes())
    }

    /// Console table of the whole sweep.
    pub fn format_table(report: &MatrixReport) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                "Service",
                "Users",
                "Requests",
                "Elapsed (s)",
                "OK",
                "Failed",
                "Avg (s)",
                "Max (s)",
                "Min (s)",
                "QPS",
            ]);

        for summary in &report.summaries {
            table.add_row(Self::row(summary).to_vec());
        }

        let mut out = table.to_string();
        for target in &report.unreachable {
            out.push_str(&format!(
                "\nUnreachable: {} ({}) - {}",
                target.service_name, target.url, target.reason
            ));
        }
        out
    }

    /// Full sweep as pretty JSON.
    pub fn format_json(report: &MatrixReport) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(report)?)
    }

    /// QPS and average latency per swept service, in sweep order.
    ///
    /// Each service contributes one consecutive run of
    /// `concurrent_users.len()` summaries, so services sharing a name still
    /// get separate series.
    pub fn series(summaries: &[RunSummary], concurrent_users: &[u32]) -> SeriesView {
        let points = concurrent_users.len().max(1);
        let mut services: Vec<ServiceSeries> = Vec::new();
        for summary in summaries {
            let starts_new = match services.last() {
                Some(last) => last.name != summary.service_name || last.qps.len() >= points,
                None => true,
            };
            if starts_new {
                services.push(ServiceSeries {
                    name: summary.service_name.clone(),
                    qps: Vec::new(),
                    response_times: Vec::new(),
                });
            }
            if let Some(current) = services.last_mut() {
                current.qps.push(summary.qps);
                current.response_times.push(summary.latency_avg_secs);
            }
        }

        SeriesView {
            concurrent_users: concurrent_users.to_vec(),
            services,
        }
    }
}
