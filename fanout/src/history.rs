//! Results history storage.
//!
//! Every completed batch appends one JSONL record per target to a history
//! file under the platform data dir, pruned to the most recent entries so
//! the file never grows without bound.

use anyhow::{Context, Result};
use fanout_engine::{BatchResult, Outcome};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// One per-target history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// RFC-3339 batch start time.
    pub timestamp: String,
    /// Groups the entries of one batch invocation.
    pub batch_id: String,
    /// Masked command text.
    pub command: String,
    pub target_id: String,
    pub target_label: String,
    pub outcome: Outcome,
    pub attempt_count: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// JSONL-backed history store with a bounded entry count.
pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
}

impl HistoryStore {
    /// Store at the default location: `<data dir>/fanout/batches.jsonl`.
    pub fn open_default(limit: usize) -> Result<Self> {
        let dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fanout");
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating history dir {}", dir.display()))?;
        Ok(Self {
            path: dir.join("batches.jsonl"),
            limit,
        })
    }

    /// Store at an explicit path.
    pub fn at(path: PathBuf, limit: usize) -> Self {
        Self { path, limit }
    }

    /// Append one batch's per-target records, pruning the file to the most
    /// recent `limit` entries.
    pub fn record_batch(&self, result: &BatchResult, masked_command: &str) -> Result<()> {
        let batch_id = uuid::Uuid::new_v4().to_string();
        let timestamp = result.started_at.to_rfc3339();

        let mut lines = self.read_lines()?;
        for report in result.entries.values() {
            let entry = HistoryEntry {
                timestamp: timestamp.clone(),
                batch_id: batch_id.clone(),
                command: masked_command.to_string(),
                target_id: report.target.id.to_string(),
                target_label: report.target.label.clone(),
                outcome: report.outcome,
                attempt_count: report.attempt_count(),
                duration_ms: report.duration_ms,
                error: report.last_error().map(str::to_string),
            };
            lines.push(serde_json::to_string(&entry)?);
        }

        if lines.len() > self.limit {
            let drop = lines.len() - self.limit;
            lines.drain(..drop);
        }

        let mut body = lines.join("\n");
        body.push('\n');
        fs::write(&self.path, body)
            .with_context(|| format!("writing history file {}", self.path.display()))?;
        Ok(())
    }

    /// Recent entries, most recent first, optionally filtered by target id.
    pub fn recent(&self, limit: usize, target: Option<&str>) -> Result<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = self
            .read_lines()?
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        if let Some(target_id) = target {
            entries.retain(|e| e.target_id == target_id);
        }

        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("reading history file {}", self.path.display()))?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fanout_common::types::Target;
    use fanout_engine::{AttemptRecord, RawOutcome, TargetReport};

    fn result_of(ids: &[(&str, Outcome)]) -> BatchResult {
        let mut result = BatchResult {
            entries: Default::default(),
            started_at: Utc::now(),
            duration_ms: 100,
        };
        for (id, outcome) in ids {
            let target = Target::new(*id, format!("label-{}", id));
            let attempts = if *outcome == Outcome::Success {
                Vec::new()
            } else {
                vec![AttemptRecord {
                    attempt: 0,
                    started_at: Utc::now(),
                    finished_at: Utc::now(),
                    wait_before_ms: 0,
                    raw: RawOutcome::Failed {
                        reason: "boom".to_string(),
                    },
                    kind: None,
                    output: String::new(),
                    error: "boom".to_string(),
                }]
            };
            result.entries.insert(
                target.id.clone(),
                TargetReport {
                    target,
                    outcome: *outcome,
                    cancelled: false,
                    attempts,
                    duration_ms: 5,
                },
            );
        }
        result
    }

    fn store(limit: usize) -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::at(dir.path().join("batches.jsonl"), limit);
        (dir, store)
    }

    #[test]
    fn test_record_and_read_back() {
        let (_dir, store) = store(100);
        let result = result_of(&[("i-1", Outcome::Success), ("i-2", Outcome::Failure)]);
        store.record_batch(&result, "uptime").unwrap();

        let entries = store.recent(10, None).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.command == "uptime"));
        assert!(entries.iter().any(|e| e.outcome == Outcome::Failure));
        // One batch id for all entries of the batch.
        assert_eq!(entries[0].batch_id, entries[1].batch_id);
    }

    #[test]
    fn test_prunes_to_limit() {
        let (_dir, store) = store(5);
        for i in 0..4 {
            let result = result_of(&[
                (format!("i-{}a", i).as_str(), Outcome::Success),
                (format!("i-{}b", i).as_str(), Outcome::Success),
            ]);
            store.record_batch(&result, "uptime").unwrap();
        }

        let entries = store.recent(100, None).unwrap();
        assert_eq!(entries.len(), 5);
        // The newest batch survives in full.
        assert!(entries.iter().any(|e| e.target_id == "i-3b"));
        // The oldest entries were pruned.
        assert!(!entries.iter().any(|e| e.target_id == "i-0a"));
    }

    #[test]
    fn test_filter_by_target() {
        let (_dir, store) = store(100);
        store
            .record_batch(
                &result_of(&[("i-1", Outcome::Success), ("i-2", Outcome::Timeout)]),
                "uptime",
            )
            .unwrap();

        let entries = store.recent(10, Some("i-2")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target_id, "i-2");
        assert_eq!(entries[0].outcome, Outcome::Timeout);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (_dir, store) = store(100);
        assert!(store.recent(10, None).unwrap().is_empty());
    }

    #[test]
    fn test_failure_entries_carry_error_text() {
        let (_dir, store) = store(100);
        store
            .record_batch(&result_of(&[("i-1", Outcome::Failure)]), "deploy")
            .unwrap();
        let entries = store.recent(10, None).unwrap();
        assert_eq!(entries[0].error.as_deref(), Some("boom"));
    }
}
