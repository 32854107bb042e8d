//! Input discovery and the skip-existing policy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;
use tokio::fs;

use crate::batch::BatchConfig;
use crate::document::{SUPPORTED_EXTENSIONS, is_supported};
use crate::error::{Error, Result};
use crate::path_utils::{
    audio_output_path, extension_lowercase, file_stem_lossy, get_file_name_lossy,
    is_derived_output, is_hidden_file,
};

/// Finds the books named by `config.input_path`.
///
/// A single file yields itself. A directory yields its supported, non-hidden
/// files in traversal order (not re-sorted), descending into subdirectories
/// only when `config.recursive` is set. Include/exclude patterns are matched
/// against file names. Text and structure exports written by earlier runs are
/// never returned, and each directory contributes at most one book per
/// basename.
pub async fn discover_books(config: &BatchConfig) -> Result<Vec<PathBuf>> {
    let input = &config.input_path;
    let metadata = match fs::metadata(input).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!(
                "Input path does not exist: {:?}",
                input
            )));
        }
        Err(e) => return Err(e.into()),
    };

    if metadata.is_file() {
        if !is_supported(input) {
            return Err(Error::Unsupported(format!(
                "Input file {:?} is not a supported book format",
                input
            )));
        }
        return Ok(vec![input.clone()]);
    }

    let filter = NameFilter::new(config)?;
    let mut books = Vec::new();
    let mut pending = vec![input.clone()];

    // A directory's files come first in read order, then its subdirectories
    // depth-first in read order.
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        let mut subdirs = Vec::new();
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_hidden_file(&path) {
                debug!("Skipping hidden entry {:?}", path);
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if config.recursive {
                    subdirs.push(path);
                }
            } else if is_derived_output(&path) {
                debug!("Skipping export {:?}", path);
            } else if is_supported(&path) && filter.accepts(&path) {
                files.push(path);
            }
        }
        books.extend(one_per_basename(files));
        pending.extend(subdirs.into_iter().rev());
    }

    debug!("Discovered {} book(s) under {:?}", books.len(), input);
    Ok(books)
}

/// Keeps one file per basename, preferring the format listed first in
/// [`SUPPORTED_EXTENSIONS`]. Outputs are keyed by basename, so two sources
/// sharing one would write the same files.
fn one_per_basename(files: Vec<PathBuf>) -> Vec<PathBuf> {
    fn rank(path: &Path) -> usize {
        extension_lowercase(path)
            .and_then(|ext| SUPPORTED_EXTENSIONS.iter().position(|&s| s == ext))
            .unwrap_or(usize::MAX)
    }

    let mut kept: Vec<PathBuf> = Vec::with_capacity(files.len());
    let mut by_stem: HashMap<String, usize> = HashMap::new();
    for path in files {
        let stem = file_stem_lossy(&path);
        match by_stem.get(&stem) {
            Some(&index) => {
                let existing = &mut kept[index];
                if rank(&path) < rank(existing) {
                    debug!("Ignoring {:?}: {:?} has the same basename", existing, path);
                    *existing = path;
                } else {
                    debug!("Ignoring {:?}: {:?} has the same basename", path, existing);
                }
            }
            None => {
                by_stem.insert(stem, kept.len());
                kept.push(path);
            }
        }
    }
    kept
}

struct NameFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl NameFilter {
    fn new(config: &BatchConfig) -> Result<Self> {
        Ok(Self {
            include: config.include_pattern.as_deref().map(Regex::new).transpose()?,
            exclude: config.exclude_pattern.as_deref().map(Regex::new).transpose()?,
        })
    }

    fn accepts(&self, path: &Path) -> bool {
        let name = get_file_name_lossy(path);
        self.include.as_ref().is_none_or(|re| re.is_match(&name))
            && !self.exclude.as_ref().is_some_and(|re| re.is_match(&name))
    }
}

/// Directory outputs for `book` are written to: the configured output
/// directory, else the book's own directory.
pub fn output_dir_for(book: &Path, config: &BatchConfig) -> PathBuf {
    match &config.output_dir {
        Some(dir) => dir.clone(),
        None => book
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

/// Final audio path for `book`: `<output>/<basename> (<voice>).<ext>`.
pub fn audio_path_for(book: &Path, config: &BatchConfig) -> PathBuf {
    audio_output_path(
        &output_dir_for(book, config),
        &file_stem_lossy(book),
        &config.voice,
        &config.output_extension,
    )
}

/// True only when `skip_existing` is set and the book's audio output
/// already exists.
pub fn should_skip(book: &Path, config: &BatchConfig) -> bool {
    config.skip_existing && audio_path_for(book, config).is_file()
}
