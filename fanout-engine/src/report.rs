//! Batch result summarization, failed-subset selection, and export records.

use crate::attempt::Outcome;
use crate::batch::{BatchCounts, BatchResult};
use fanout_common::types::Target;
use fanout_common::util::excerpt;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Characters of output/error shown in table cells.
const EXCERPT_CHARS: usize = 100;

/// One row of the human summary, in completion order.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub target: Target,
    pub outcome: Outcome,
    pub cancelled: bool,
    pub attempt_count: usize,
    pub duration_ms: u64,
    /// First line of the last error, excerpted.
    pub last_error: String,
    /// First line of the last stdout, excerpted.
    pub last_output: String,
}

/// Counts plus the ordered per-target rows.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub counts: BatchCounts,
    pub rows: Vec<SummaryRow>,
}

/// Render a batch result into counts and ordered rows.
pub fn summarize(result: &BatchResult) -> BatchSummary {
    let rows = result
        .entries
        .values()
        .map(|report| SummaryRow {
            target: report.target.clone(),
            outcome: report.outcome,
            cancelled: report.cancelled,
            attempt_count: report.attempt_count(),
            duration_ms: report.duration_ms,
            last_error: excerpt(report.last_error().unwrap_or(""), EXCERPT_CHARS),
            last_output: excerpt(report.last_output(), EXCERPT_CHARS),
        })
        .collect();
    BatchSummary {
        counts: result.counts(),
        rows,
    }
}

/// Targets whose outcome was not Success, in completion order. The manual
/// retry path re-runs exactly this subset.
pub fn select_failed(result: &BatchResult) -> Vec<Target> {
    result
        .entries
        .values()
        .filter(|report| report.outcome != Outcome::Success)
        .map(|report| report.target.clone())
        .collect()
}

/// One export row per target. Field order and presence are stable across
/// invocations; downstream tooling depends on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub target_id: String,
    pub target_label: String,
    pub outcome: Outcome,
    pub attempt_count: usize,
    pub last_error: String,
}

/// Export rows in completion order.
pub fn export_records(result: &BatchResult) -> Vec<ExportRecord> {
    result
        .entries
        .values()
        .map(|report| ExportRecord {
            target_id: report.target.id.to_string(),
            target_label: report.target.label.clone(),
            outcome: report.outcome,
            attempt_count: report.attempt_count(),
            last_error: report.last_error().unwrap_or("").to_string(),
        })
        .collect()
}

/// Write export records as JSON lines.
pub fn write_jsonl<W: Write>(mut writer: W, records: &[ExportRecord]) -> std::io::Result<()> {
    for record in records {
        let line = serde_json::to_string(record)?;
        writeln!(writer, "{}", line)?;
    }
    Ok(())
}

/// Write export records as tab-separated rows with a header. Tabs and
/// newlines inside error text are flattened to spaces so rows stay rows.
pub fn write_tsv<W: Write>(mut writer: W, records: &[ExportRecord]) -> std::io::Result<()> {
    writeln!(
        writer,
        "target_id\ttarget_label\toutcome\tattempt_count\tlast_error"
    )?;
    for record in records {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}",
            flatten(&record.target_id),
            flatten(&record.target_label),
            record.outcome,
            record.attempt_count,
            flatten(&record.last_error),
        )?;
    }
    Ok(())
}

fn flatten(text: &str) -> String {
    text.replace(['\t', '\n', '\r'], " ")
}
