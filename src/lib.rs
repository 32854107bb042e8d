//! Chapterhouse - Ebook to Audiobook Batch Library
//!
//! This crate reconstructs the chapter hierarchy of long-form documents
//! (EPUB, (X)HTML, plain text) and drives batches of them through a
//! conversion pipeline whose speech synthesis is supplied by the caller.
//!
//! # Getting Started
//!
//! Configure a batch with the [`BatchConfig`] builder, attach a
//! [`Synthesizer`](synthesis::Synthesizer) and run it with a
//! [`BatchProcessor`]. Failures are recorded per book; the batch itself only
//! fails when its input cannot be discovered.
//!
//! ```rust,no_run
//! use chapterhouse::prelude::*;
//!
//! struct SilentVoice;
//!
//! #[async_trait::async_trait]
//! impl Synthesizer for SilentVoice {
//!     async fn synthesize(&self, _request: &SynthesisRequest) -> chapterhouse::error::Result<Vec<u8>> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> chapterhouse::error::Result<()> {
//!     let config = BatchConfig::builder()
//!         .input_path("./library")
//!         .recursive(true)
//!         .output_dir("./audiobooks")
//!         .detection_method(DetectionMethod::Auto)
//!         .hierarchy_style(HierarchyStyle::Numbered)
//!         .build()?;
//!
//!     let mut processor = BatchProcessor::new(config).with_synthesizer(SilentVoice);
//!     let result = processor.process().await?;
//!     println!("{}", result.summary());
//!
//!     Ok(())
//! }
//! ```
//!
//! For structure extraction alone, open a [`SourceBook`](document::SourceBook)
//! and run a [`StructureExtractor`] over it.

pub mod batch;
pub mod classifier;
pub mod discovery;
pub mod document;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod markup;
pub mod path_utils;
mod pipeline;
pub mod report;
pub mod synthesis;
pub mod task;
pub mod tree;
pub mod types;

pub use batch::{BatchConfig, BatchConfigBuilder, BatchProcessor, CancelHandle};
pub use classifier::HeadingClassifier;
pub use extractor::StructureExtractor;
pub use filter::ContentFilter;
pub use report::{BatchReport, BatchResult};
pub use task::BookTask;
pub use tree::{ChapterNode, ChapterTree, NodeId};

// Re-export core types for direct access
pub use types::{
    BookMetadata, DetectionMethod, HierarchyStyle, ProcessingStatus, ResumePolicy,
    StructureReport,
};

/// Prelude module for convenient imports.
///
/// Re-exports the types needed to configure and run a batch, plus the
/// collaborator traits, with a single `use chapterhouse::prelude::*;`.
pub mod prelude {
    pub use super::{
        BatchConfig, BatchConfigBuilder, BatchProcessor, BatchReport, BatchResult, BookMetadata,
        BookTask, CancelHandle, ChapterNode, ChapterTree, ContentFilter, DetectionMethod,
        HeadingClassifier,
        HierarchyStyle, NodeId, ProcessingStatus, ResumePolicy, StructureExtractor,
        StructureReport, error, types,
    };
    pub use crate::document::SourceBook;
    pub use crate::synthesis::{
        ChapterSelection, Packager, PostProcessor, SynthesisPlan, SynthesisRequest, Synthesizer,
    };
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
}
