//! Core enumerations and reports shared across chapterhouse.
//!
//! This module defines:
//! - Detection and formatting options (`DetectionMethod`, `HierarchyStyle`)
//! - The per-book state machine tag (`ProcessingStatus`)
//! - Resume reconciliation policy (`ResumePolicy`)
//! - Book-level metadata (`BookMetadata`)
//! - Reporting types (`StructureReport`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Strategy used to build a book's chapter tree.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub enum DetectionMethod {
    /// Convert the declared table of contents one-to-one.
    #[serde(rename = "toc")]
    TocOnly,
    /// Nest the heading elements of every content document.
    #[serde(rename = "headings")]
    HeadingsOnly,
    /// TOC tree with each leaf's document headings grafted beneath it.
    #[default]
    #[serde(rename = "combined")]
    Combined,
    /// Combined when a TOC exists, headings otherwise.
    #[serde(rename = "auto")]
    Auto,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::TocOnly => "toc",
            DetectionMethod::HeadingsOnly => "headings",
            DetectionMethod::Combined => "combined",
            DetectionMethod::Auto => "auto",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "toc" | "toc_only" => Ok(DetectionMethod::TocOnly),
            "headings" | "headings_only" => Ok(DetectionMethod::HeadingsOnly),
            "combined" => Ok(DetectionMethod::Combined),
            "auto" => Ok(DetectionMethod::Auto),
            other => Err(Error::Unsupported(format!("Detection method '{}'", other))),
        }
    }
}

/// How a chapter's position in the hierarchy is rendered into its title.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyStyle {
    #[default]
    Flat, // "Title"
    Numbered,   // "2.1 Title"
    Indented,   // "  ─ Title"
    Arrow,      // "Part 1 > Chapter 1"
    Breadcrumb, // "Part 1 / Chapter 1"
}

impl HierarchyStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchyStyle::Flat => "flat",
            HierarchyStyle::Numbered => "numbered",
            HierarchyStyle::Indented => "indented",
            HierarchyStyle::Arrow => "arrow",
            HierarchyStyle::Breadcrumb => "breadcrumb",
        }
    }
}

impl fmt::Display for HierarchyStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HierarchyStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(HierarchyStyle::Flat),
            "numbered" => Ok(HierarchyStyle::Numbered),
            "indented" => Ok(HierarchyStyle::Indented),
            "arrow" => Ok(HierarchyStyle::Arrow),
            "breadcrumb" => Ok(HierarchyStyle::Breadcrumb),
            other => Err(Error::Unsupported(format!("Hierarchy style '{}'", other))),
        }
    }
}

/// Status of a book in the processing queue.
///
/// `Pending → Exporting → Converting → Completed`, with `Pending → Skipped`
/// and any non-terminal status able to move to `Failed`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Exporting,
    Converting,
    Completed,
    Failed,
    Skipped,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Exporting => "exporting",
            ProcessingStatus::Converting => "converting",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Skipped => "skipped",
        }
    }

    /// Completed, failed and skipped tasks never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Completed | ProcessingStatus::Failed | ProcessingStatus::Skipped
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        match (self, next) {
            (Pending, Exporting) | (Pending, Skipped) | (Pending, Failed) => true,
            (Exporting, Converting) | (Exporting, Completed) | (Exporting, Failed) => true,
            (Converting, Completed) | (Converting, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a persisted report is reconciled with the input set when resuming.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumePolicy {
    /// Re-run exactly the reported books; the input path is not rescanned.
    ReportOnly,
    /// Rescan the input: reported books that vanished are dropped, new books
    /// are appended as fresh tasks.
    #[default]
    Reconcile,
}

impl FromStr for ResumePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reportonly" | "report_only" | "report-only" => Ok(ResumePolicy::ReportOnly),
            "reconcile" => Ok(ResumePolicy::Reconcile),
            other => Err(Error::Unsupported(format!("Resume policy '{}'", other))),
        }
    }
}

/// Title and author of a source book, used for the text export header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
}

impl BookMetadata {
    /// Metadata with the given title and an unknown author.
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: "Unknown".to_string(),
        }
    }
}

/// Report from the structure extraction stage of one book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureReport {
    pub method_requested: DetectionMethod,
    pub method_applied: DetectionMethod,
    pub fallback_used: bool,
    pub toc_entries: usize,
    pub toc_chapter_like_titles: usize,
    pub headings_found: usize,
    pub node_count: usize,
    pub depth: usize,
    pub chapters_without_text: usize,
}

impl StructureReport {
    pub fn new(method: DetectionMethod) -> Self {
        Self {
            method_requested: method,
            method_applied: method,
            fallback_used: false,
            toc_entries: 0,
            toc_chapter_like_titles: 0,
            headings_found: 0,
            node_count: 0,
            depth: 0,
            chapters_without_text: 0,
        }
    }
}
