//! Run report generation.
//!
//! A run report wraps the outcome of one pipeline run (or its failure) with
//! metadata, and renders to JSON for downstream tools or Markdown for
//! operators.

use crate::error::{ErrorCategory, PipelineFailure};
use crate::models::{PipelineOutcome, QueryResponse, Rejection};
use crate::pipeline::timing::TimingReport;
use crate::pipeline::Stage;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata about a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Name of the query definition.
    pub query_name: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall time of the run in seconds.
    pub duration_seconds: f64,
    /// Gateway version that produced the report.
    pub gateway_version: String,
}

/// Summary of an aborted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummary {
    pub stage: Stage,
    pub error: String,
    pub category: ErrorCategory,
    pub timings: TimingReport,
}

impl From<&PipelineFailure> for FailureSummary {
    fn from(failure: &PipelineFailure) -> Self {
        Self {
            stage: failure.stage,
            error: failure.source.to_string(),
            category: failure.source.category(),
            timings: failure.timings.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunResult {
    Outcome(PipelineOutcome),
    Failed { failure: FailureSummary },
}

/// The complete report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub result: RunResult,
}

impl RunReport {
    pub fn status(&self) -> &'static str {
        match &self.result {
            RunResult::Outcome(outcome) => outcome.status(),
            RunResult::Failed { .. } => "failed",
        }
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str("# MedCo Query Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata, report.status()));

    match &report.result {
        RunResult::Outcome(PipelineOutcome::Completed(response)) => {
            output.push_str(&generate_result_section(response));
            if let Some(result) = &response.encrypted_result {
                output.push_str(&generate_timing_section(&result.timings));
            }
        }
        RunResult::Outcome(PipelineOutcome::Bypassed(response)) => {
            output.push_str("## Status Query\n\n");
            output.push_str("Connectivity test intercepted; no protocol was run.\n\n");
            output.push_str(&format!(
                "- **Result Instances:** {}\n\n",
                response.result_instances.len()
            ));
        }
        RunResult::Outcome(PipelineOutcome::Rejected(rejection)) => {
            output.push_str(&generate_rejection_section(rejection));
            output.push_str(&generate_timing_section(&rejection.timings));
        }
        RunResult::Failed { failure } => {
            output.push_str(&generate_failure_section(failure));
            output.push_str(&generate_timing_section(&failure.timings));
        }
    }

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &RunMetadata, status: &str) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Query:** {}\n", metadata.query_name));
    section.push_str(&format!("- **Status:** {}\n", status));
    section.push_str(&format!(
        "- **Started:** {}\n",
        metadata.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Duration:** {:.3}s\n",
        metadata.duration_seconds
    ));
    section.push_str(&format!("- **Gateway:** v{}\n\n", metadata.gateway_version));

    section
}

fn generate_result_section(response: &QueryResponse) -> String {
    let mut section = String::new();

    section.push_str("## Encrypted Result\n\n");
    match &response.encrypted_result {
        Some(result) => {
            section.push_str(&format!("- **Public Key:** `{}`\n", result.public_key));
            section.push_str(&format!("- **Aggregate:** `{}`\n", result.aggregate));
        }
        None => section.push_str("- No encrypted result attached\n"),
    }
    if let Some(ref id) = response.patient_set_id {
        section.push_str(&format!("- **Patient Set:** {}\n", id));
    }
    section.push('\n');

    section
}

fn generate_rejection_section(rejection: &Rejection) -> String {
    format!(
        "## Rejected\n\nQuery of user `{}` rejected: {}.\n\n",
        rejection.username, rejection.reason
    )
}

fn generate_failure_section(failure: &FailureSummary) -> String {
    let mut section = String::new();

    section.push_str("## Failure\n\n");
    section.push_str(&format!("- **Stage:** {}\n", failure.stage));
    section.push_str(&format!("- **Category:** {}\n", failure.category));
    section.push_str(&format!("- **Error:** {}\n\n", failure.error));

    section
}

/// Generate the timing tables.
fn generate_timing_section(timings: &TimingReport) -> String {
    let mut section = String::new();

    section.push_str("## Timings\n\n");
    if let Some(overall) = timings.overall_millis {
        section.push_str(&format!("**Overall:** {:.1} ms\n\n", overall));
    }

    if !timings.steps.is_empty() {
        section.push_str("| Step | Time (ms) |\n");
        section.push_str("|------|----------:|\n");
        for step in &timings.steps {
            section.push_str(&format!("| {} | {:.1} |\n", step.name, step.millis));
        }
        section.push('\n');
    }

    if !timings.protocol.is_empty() {
        section.push_str("### Protocol\n\n");
        section.push_str("| Measurement | Time (ms) |\n");
        section.push_str("|-------------|----------:|\n");
        for (name, millis) in &timings.protocol {
            section.push_str(&format!("| {} | {:.1} |\n", name, millis));
        }
        section.push('\n');
    }

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    "---\n\n*Report generated by medco-gateway*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
