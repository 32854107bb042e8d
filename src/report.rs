//! Aggregate batch outcome and its persisted JSON form.
//!
//! The JSON report doubles as the resume input: it carries the
//! configuration, every task with its status, and a computed summary.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::BatchConfig;
use crate::error::Result;
use crate::task::BookTask;
use crate::types::ProcessingStatus;

/// All tasks of one batch invocation, in discovery order.
///
/// Counts are derived from `tasks` on demand, so
/// `total == completed + failed + skipped + pending` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub config: BatchConfig,
    pub tasks: Vec<BookTask>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl BatchResult {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            tasks: Vec::new(),
            start_time: None,
            end_time: None,
        }
    }

    fn count(&self, status: ProcessingStatus) -> usize {
        self.tasks.iter().filter(|t| t.status() == status).count()
    }

    pub fn total(&self) -> usize {
        self.tasks.len()
    }

    pub fn completed(&self) -> usize {
        self.count(ProcessingStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(ProcessingStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(ProcessingStatus::Skipped)
    }

    /// Tasks that have not reached a terminal status, including any caught
    /// mid-pipeline.
    pub fn pending(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_terminal()).count()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.end_time? - self.start_time?)
    }

    pub fn task(&self, id: usize) -> Option<&BookTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub(crate) fn task_mut(&mut self, id: usize) -> Option<&mut BookTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Whether any task still needs work (PENDING or FAILED).
    pub fn has_unfinished(&self) -> bool {
        self.tasks.iter().any(|t| {
            !t.is_terminal() || t.status() == ProcessingStatus::Failed
        })
    }

    pub fn summary_counts(&self) -> BatchSummary {
        BatchSummary {
            total: self.total(),
            completed: self.completed(),
            failed: self.failed(),
            skipped: self.skipped(),
            pending: self.pending(),
            duration_seconds: self
                .duration()
                .map(|d| d.num_milliseconds() as f64 / 1000.0),
        }
    }

    /// Human-readable summary: counts, total time and per-status book lists.
    pub fn summary(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "BATCH PROCESSING SUMMARY");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out);
        let _ = writeln!(out, "Total books:     {}", self.total());
        let _ = writeln!(out, "Completed:       {}", self.completed());
        let _ = writeln!(out, "Failed:          {}", self.failed());
        let _ = writeln!(out, "Skipped:         {}", self.skipped());
        let _ = writeln!(out, "Pending:         {}", self.pending());
        let _ = writeln!(out);

        if let Some(duration) = self.duration() {
            let _ = writeln!(out, "Total time:      {}", format_minutes(duration));
            let _ = writeln!(out);
        }

        let completed: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| t.status() == ProcessingStatus::Completed)
            .collect();
        if !completed.is_empty() {
            let _ = writeln!(out, "Completed books:");
            for task in completed {
                match task.duration() {
                    Some(d) => {
                        let _ = writeln!(out, "  ✓ {} ({})", task.basename(), format_minutes(d));
                    }
                    None => {
                        let _ = writeln!(out, "  ✓ {}", task.basename());
                    }
                }
            }
            let _ = writeln!(out);
        }

        let failed: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| t.status() == ProcessingStatus::Failed)
            .collect();
        if !failed.is_empty() {
            let _ = writeln!(out, "Failed books:");
            for task in failed {
                let _ = writeln!(
                    out,
                    "  ✗ {}: {}",
                    task.basename(),
                    task.error_message().unwrap_or("Unknown error")
                );
            }
            let _ = writeln!(out);
        }

        let skipped: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| t.status() == ProcessingStatus::Skipped)
            .collect();
        if !skipped.is_empty() {
            let _ = writeln!(out, "Skipped books (already processed):");
            for task in skipped {
                let _ = writeln!(out, "  - {}", task.basename());
            }
            let _ = writeln!(out);
        }

        let _ = write!(out, "{rule}");
        out
    }

    pub fn to_report(&self) -> BatchReport {
        BatchReport {
            config: self.config.clone(),
            tasks: self.tasks.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            summary: self.summary_counts(),
        }
    }

    /// Writes the JSON report to `path`, creating parent directories.
    pub async fn save_report(&self, path: &Path) -> Result<()> {
        self.to_report().save(path).await
    }

    pub async fn load_report(path: &Path) -> Result<BatchReport> {
        BatchReport::load(path).await
    }
}

fn format_minutes(duration: chrono::Duration) -> String {
    let seconds = duration.num_seconds().max(0);
    format!("{}m {}s", seconds / 60, seconds % 60)
}

/// Counts stored alongside the tasks in a report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub duration_seconds: Option<f64>,
}

/// Persisted batch report; input to [`crate::batch::BatchProcessor::resume`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub config: BatchConfig,
    pub tasks: Vec<BookTask>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }

    /// The result the report was taken from. The stored summary is
    /// discarded; counts are recomputed from the tasks.
    pub fn into_result(self) -> BatchResult {
        BatchResult {
            config: self.config,
            tasks: self.tasks,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}
