//! Collaborator interfaces for turning a chapter plan into audio.
//!
//! Speech synthesis, audio post-processing and final packaging are provided
//! by the embedding application. The batch pipeline only drives them in
//! order and records whether each step succeeded.

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub mod packager;
pub mod plan;

pub use packager::ConcatPackager;
pub use plan::{ChapterSelection, PlannedChapter, SynthesisPlan};

/// One unit of text to be spoken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    /// Speaking rate adjustment, e.g. `"+10%"`.
    pub rate: Option<String>,
    /// Volume adjustment, e.g. `"-5%"`.
    pub volume: Option<String>,
}

/// Speech synthesis service.
///
/// Implementations typically call out to a network TTS provider. Any error
/// is treated as a failure of the whole book.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesizes one chapter.
    ///
    /// # Parameters
    /// * `request` - Text, voice and optional prosody adjustments
    ///
    /// # Returns
    /// * `Result<Vec<u8>>` - Encoded audio for the request, or an error if synthesis failed
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>>;
}

/// Optional transform over a book's chapter audio files (normalization,
/// silence trimming and the like).
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    /// Processes the chapter files of one book.
    ///
    /// # Parameters
    /// * `files` - Chapter audio files in playback order
    /// * `output_dir` - Directory processed files should be written to
    ///
    /// # Returns
    /// * `Result<Vec<PathBuf>>` - Processed files, same count and order as `files`
    async fn process(&self, files: &[PathBuf], output_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Assembles processed chapter files into the book's final audio file.
#[async_trait]
pub trait Packager: Send + Sync {
    /// Writes the final audio file.
    ///
    /// # Parameters
    /// * `chapters` - Chapter audio files in playback order
    /// * `plan` - The plan the files were synthesized from (titles, levels)
    /// * `output_path` - Destination, named `<basename> (<voice>).<ext>`
    ///
    /// # Returns
    /// * `Result<()>` - Success indicator or an error if packaging fails
    async fn package(
        &self,
        chapters: &[PathBuf],
        plan: &SynthesisPlan,
        output_path: &Path,
    ) -> Result<()>;
}
