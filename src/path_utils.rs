//! Path helpers shared by discovery, the pipeline and report persistence.
//!
//! Output names are derived from book file names, so they go through
//! [`sanitize_filename`] before touching the file system. Long Windows paths
//! get the `\\?\` prefix when written.

use crate::error::{Error, Result};

use std::path::{Path, PathBuf};

/// Maximum path length for Windows without long path support
const WINDOWS_MAX_PATH: usize = 260;

/// Windows long path prefix
const WINDOWS_LONG_PATH_PREFIX: &str = r"\\?\";

/// Converts a path to UTF-8, failing with [`Error::PathUtf8Error`].
pub fn path_to_string_safe(path: &Path) -> Result<String> {
    path.to_str()
        .map(|s| s.to_string())
        .ok_or_else(|| Error::PathUtf8Error(path.to_path_buf()))
}

/// The file name of `path`, lossily converted. `"unknown"` when there is none.
pub fn get_file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// The file name of `path` without its final extension (the book basename).
pub fn file_stem_lossy(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Lowercased final extension of `path`, if any.
pub fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Rejects paths that are too long for Windows or contain characters that
/// are not allowed in file names.
pub fn validate_path(path: &Path) -> Result<()> {
    let path_str = path.to_string_lossy();

    if cfg!(windows)
        && path_str.len() > WINDOWS_MAX_PATH
        && !path_str.starts_with(WINDOWS_LONG_PATH_PREFIX)
    {
        return Err(Error::InvalidPath(
            path.to_path_buf(),
            format!("Path exceeds {} characters", WINDOWS_MAX_PATH),
        ));
    }

    // The long path prefix itself contains a '?'
    let path_to_check = path_str
        .strip_prefix(WINDOWS_LONG_PATH_PREFIX)
        .unwrap_or(&path_str);

    if path_to_check
        .chars()
        .any(|c| matches!(c, '<' | '>' | '"' | '|' | '?' | '*'))
    {
        return Err(Error::InvalidPath(
            path.to_path_buf(),
            "Path contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

/// Adds the Windows long path prefix to an absolute form of `path` when it
/// would otherwise exceed the limit. Other platforms get `path` back.
pub fn prepare_long_path(path: &Path) -> Result<PathBuf> {
    let path_str = path_to_string_safe(path)?;

    if cfg!(windows)
        && path_str.len() > WINDOWS_MAX_PATH
        && !path_str.starts_with(WINDOWS_LONG_PATH_PREFIX)
    {
        let absolute_path = std::path::absolute(path).map_err(|e| {
            Error::InvalidPath(path.to_path_buf(), format!("Cannot make path absolute: {}", e))
        })?;

        let absolute_str = path_to_string_safe(&absolute_path)?;
        Ok(PathBuf::from(format!("{}{}", WINDOWS_LONG_PATH_PREFIX, absolute_str)))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Whether the final component of `path` starts with a dot.
pub fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Replaces characters that are unsafe in file names. Used for book
/// basenames and voice names embedded in output file names.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | '"' | '|' | '?' | '*' => '-',
            ':' => '-',
            '/' | '\\' => '-',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Path of the synthesized audio file for a book: `<dir>/<basename> (<voice>).<ext>`.
pub fn audio_output_path(output_dir: &Path, basename: &str, voice: &str, extension: &str) -> PathBuf {
    output_dir.join(format!(
        "{} ({}).{}",
        sanitize_filename(basename),
        sanitize_filename(voice),
        extension.trim_start_matches('.')
    ))
}

/// Suffix of the per-book text export.
pub const TEXT_EXPORT_SUFFIX: &str = ".chapters.txt";
/// Suffix of the per-book structure export.
pub const STRUCTURE_EXPORT_SUFFIX: &str = ".structure.json";

/// Path of the exported text file for a book: `<dir>/<basename>.chapters.txt`.
///
/// The suffix keeps the export from overwriting a plain-text source with
/// the same basename.
pub fn text_output_path(output_dir: &Path, basename: &str) -> PathBuf {
    output_dir.join(format!("{}{}", sanitize_filename(basename), TEXT_EXPORT_SUFFIX))
}

/// Path of the structure export for a book: `<dir>/<basename>.structure.json`.
pub fn structure_output_path(output_dir: &Path, basename: &str) -> PathBuf {
    output_dir.join(format!(
        "{}{}",
        sanitize_filename(basename),
        STRUCTURE_EXPORT_SUFFIX
    ))
}

/// Whether `path` names one of the files the pipeline writes next to a book.
pub fn is_derived_output(path: &Path) -> bool {
    let name = get_file_name_lossy(path).to_lowercase();
    name.ends_with(TEXT_EXPORT_SUFFIX) || name.ends_with(STRUCTURE_EXPORT_SUFFIX)
}
