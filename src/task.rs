//! Per-book task record and its guarded status transitions.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path_utils::file_stem_lossy;
use crate::types::ProcessingStatus;

/// One book moving through the export/convert pipeline.
///
/// Status changes go through the transition methods, which refuse anything
/// [`ProcessingStatus::can_transition_to`] rejects. Once a task is terminal
/// it is never modified again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookTask {
    /// Position in discovery order.
    pub id: usize,
    pub source_path: PathBuf,
    status: ProcessingStatus,
    pub derived_text_path: Option<PathBuf>,
    pub derived_audio_path: Option<PathBuf>,
    pub chapter_count: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl BookTask {
    pub fn new(id: usize, source_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            source_path: source_path.into(),
            status: ProcessingStatus::Pending,
            derived_text_path: None,
            derived_audio_path: None,
            chapter_count: 0,
            start_time: None,
            end_time: None,
            error_message: None,
        }
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    /// Set only when the task is FAILED.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// The book's file name without extension; output files are named after it.
    pub fn basename(&self) -> String {
        file_stem_lossy(&self.source_path)
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock time between entering the pipeline and reaching a terminal status.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.end_time? - self.start_time?)
    }

    fn transition(&mut self, next: ProcessingStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }

    /// PENDING → EXPORTING; stamps the start time.
    pub fn begin_export(&mut self) -> Result<()> {
        self.transition(ProcessingStatus::Exporting)?;
        self.start_time = Some(Utc::now());
        Ok(())
    }

    /// EXPORTING → CONVERTING.
    pub fn begin_convert(&mut self) -> Result<()> {
        self.transition(ProcessingStatus::Converting)
    }

    /// EXPORTING/CONVERTING → COMPLETED.
    pub fn complete(&mut self) -> Result<()> {
        self.transition(ProcessingStatus::Completed)
    }

    /// Any non-terminal status → FAILED with `message`.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(ProcessingStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// PENDING → SKIPPED.
    pub fn skip(&mut self) -> Result<()> {
        self.transition(ProcessingStatus::Skipped)
    }

    /// Fresh PENDING copy of this task for another run: derived paths,
    /// timing and error are cleared, the id and source are kept.
    pub fn reset(&self) -> Self {
        Self::new(self.id, self.source_path.clone())
    }
}
