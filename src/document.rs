//! Source book loading: EPUB archives, standalone (X)HTML and plain text.
//!
//! A [`SourceBook`] carries the declared table of contents (if any) and the
//! content documents in reading order. Loading is blocking I/O and is meant
//! to run on a blocking thread.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use percent_encoding::percent_decode_str;
use quick_xml::Reader;
use quick_xml::events::Event;
use rayon::prelude::*;

use crate::classifier::HeadingClassifier;
use crate::error::{Error, Result};
use crate::markup::{self, DocumentOutline, collapse_whitespace, decode_document, lowercase_local_name};
use crate::path_utils::{extension_lowercase, file_stem_lossy};
use crate::types::BookMetadata;

/// File extensions accepted as books.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["epub", "xhtml", "html", "htm", "txt"];

/// Whether `path` has one of the [`SUPPORTED_EXTENSIONS`].
pub fn is_supported(path: &Path) -> bool {
    extension_lowercase(path).is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
}

/// One entry of a declared table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TocEntry {
    pub title: String,
    /// Target document path inside the book.
    pub href: Option<String>,
    /// Fragment identifier within the target document.
    pub anchor: Option<String>,
    pub children: Vec<TocEntry>,
}

impl TocEntry {
    pub fn new(title: impl Into<String>, href: Option<String>) -> Self {
        Self {
            title: title.into(),
            href,
            anchor: None,
            children: Vec::new(),
        }
    }

    /// Number of entries in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TocEntry::count).sum::<usize>()
    }
}

/// Raw content of a document inside a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Markup(String),
    PlainText(String),
}

/// A content document and its path inside the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDocument {
    pub href: String,
    pub content: DocumentContent,
}

impl ContentDocument {
    /// Scans the document into headings, sections and anchors.
    pub fn outline(&self, classifier: &HeadingClassifier) -> Result<DocumentOutline> {
        match &self.content {
            DocumentContent::Markup(markup) => markup::scan(markup),
            DocumentContent::PlainText(text) => Ok(markup::outline_plain_text(text, classifier)),
        }
    }
}

/// A loaded book ready for structure extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBook {
    pub path: PathBuf,
    pub metadata: BookMetadata,
    pub toc: Vec<TocEntry>,
    /// Content documents in reading order.
    pub documents: Vec<ContentDocument>,
}

impl SourceBook {
    /// Loads the book at `path`, dispatching on its extension.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(format!("Book does not exist: {:?}", path)));
        }
        let extension = extension_lowercase(path).unwrap_or_default();

        match extension.as_str() {
            "epub" => Self::from_epub_reader(File::open(path)?, path),
            "xhtml" | "html" | "htm" => {
                let markup = decode_document(&std::fs::read(path)?);
                Self::from_markup(path, markup)
            }
            "txt" => {
                let text = decode_document(&std::fs::read(path)?);
                Ok(Self::from_plain_text(path, text))
            }
            other => Err(Error::Unsupported(format!(
                "Book format '{}' for {:?}",
                other, path
            ))),
        }
    }

    /// Builds a single-document book from (X)HTML markup.
    pub fn from_markup(path: &Path, markup: String) -> Result<Self> {
        let title = markup::scan(&markup)?
            .title
            .unwrap_or_else(|| file_stem_lossy(path));
        Ok(Self {
            path: path.to_path_buf(),
            metadata: BookMetadata::with_title(title),
            toc: Vec::new(),
            documents: vec![ContentDocument {
                href: document_href(path),
                content: DocumentContent::Markup(markup),
            }],
        })
    }

    /// Builds a single-document book from plain text.
    pub fn from_plain_text(path: &Path, text: String) -> Self {
        Self {
            path: path.to_path_buf(),
            metadata: BookMetadata::with_title(file_stem_lossy(path)),
            toc: Vec::new(),
            documents: vec![ContentDocument {
                href: document_href(path),
                content: DocumentContent::PlainText(text),
            }],
        }
    }

    /// Reads an EPUB archive: container, package document, TOC and spine.
    pub fn from_epub_reader<R: Read + Seek>(reader: R, path: &Path) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(reader)?;

        let container = read_entry(&mut archive, "META-INF/container.xml")?;
        let opf_path = parse_container_xml(&container)?;
        let opf_dir = parent_dir(&opf_path);
        let package = parse_opf(&decode_document(&read_entry(&mut archive, &opf_path)?))?;

        let mut documents = Vec::new();
        for idref in &package.spine {
            let Some(item) = package.manifest.get(idref) else {
                warn!("Spine item '{}' is missing from the manifest", idref);
                continue;
            };
            if !is_content_media_type(&item.media_type) {
                continue;
            }
            let (href, _) = resolve_href(&opf_dir, &item.href);
            let Some(href) = href else { continue };
            match read_entry(&mut archive, &href) {
                Ok(bytes) => documents.push(ContentDocument {
                    href,
                    content: DocumentContent::Markup(decode_document(&bytes)),
                }),
                Err(Error::Zip(zip::result::ZipError::FileNotFound)) => {
                    warn!("Spine document '{}' is missing from {:?}", href, path);
                }
                Err(e) => return Err(e),
            }
        }

        let mut toc = Vec::new();
        if let Some(nav) = package.manifest.values().find(|item| item.is_nav()) {
            let (nav_href, _) = resolve_href(&opf_dir, &nav.href);
            if let Some(nav_href) = nav_href {
                let content = decode_document(&read_entry(&mut archive, &nav_href)?);
                toc = resolve_toc(parse_nav(&content)?, &parent_dir(&nav_href));
            }
        }
        if toc.is_empty() {
            let ncx = package
                .toc_id
                .as_ref()
                .and_then(|id| package.manifest.get(id))
                .or_else(|| {
                    package
                        .manifest
                        .values()
                        .find(|item| item.media_type == "application/x-dtbncx+xml")
                });
            if let Some(ncx) = ncx {
                let (ncx_href, _) = resolve_href(&opf_dir, &ncx.href);
                if let Some(ncx_href) = ncx_href {
                    let content = decode_document(&read_entry(&mut archive, &ncx_href)?);
                    toc = resolve_toc(parse_ncx(&content)?, &parent_dir(&ncx_href));
                }
            }
        }

        debug!(
            "Loaded {:?}: {} spine documents, {} top-level TOC entries",
            path,
            documents.len(),
            toc.len()
        );

        let title = package.title.unwrap_or_else(|| file_stem_lossy(path));
        Ok(Self {
            path: path.to_path_buf(),
            metadata: BookMetadata {
                title,
                author: package.author.unwrap_or_else(|| "Unknown".to_string()),
            },
            toc,
            documents,
        })
    }

    /// Index of the document `href` names: exact path first, then by file name.
    pub fn document_index(&self, href: &str) -> Option<usize> {
        self.documents
            .iter()
            .position(|d| d.href == href)
            .or_else(|| {
                let wanted = base_name(href);
                self.documents
                    .iter()
                    .position(|d| base_name(&d.href) == wanted)
            })
    }

    /// Scans every document in parallel, preserving reading order.
    pub fn outlines(&self, classifier: &HeadingClassifier) -> Result<Vec<DocumentOutline>> {
        self.documents
            .par_iter()
            .map(|document| document.outline(classifier))
            .collect()
    }

    /// Total number of TOC entries at every depth.
    pub fn toc_entry_count(&self) -> usize {
        self.toc.iter().map(TocEntry::count).sum()
    }
}

// ----------------------------------------------------------------------------
// EPUB package parsing
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ManifestItem {
    href: String,
    media_type: String,
    properties: Option<String>,
}

impl ManifestItem {
    fn is_nav(&self) -> bool {
        self.properties
            .as_ref()
            .is_some_and(|props| props.split_ascii_whitespace().any(|p| p == "nav"))
    }
}

#[derive(Debug, Default)]
struct PackageDocument {
    title: Option<String>,
    author: Option<String>,
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
    toc_id: Option<String>,
}

fn read_entry<R: Read + Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut file = archive.by_name(name)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

fn is_content_media_type(media_type: &str) -> bool {
    matches!(media_type, "application/xhtml+xml" | "text/html")
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

fn xml_error(reader: &Reader<&[u8]>, e: quick_xml::Error) -> Error {
    Error::Markup(format!("{} at position {}", e, reader.buffer_position()))
}

/// Parse META-INF/container.xml to find the package document path.
fn parse_container_xml(bytes: &[u8]) -> Result<String> {
    let content = decode_document(bytes);
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e))
                if lowercase_local_name(e.name().as_ref()) == "rootfile" =>
            {
                if let Some(path) = attribute(&e, b"full-path") {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(&reader, e)),
            _ => {}
        }
    }

    Err(Error::NotFound(
        "No rootfile found in container.xml".to_string(),
    ))
}

fn parse_opf(content: &str) -> Result<PackageDocument> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    reader.config_mut().allow_dangling_amp = true;

    let mut package = PackageDocument::default();
    let mut in_metadata = false;
    let mut current: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = lowercase_local_name(e.name().as_ref());
                match local.as_str() {
                    "metadata" => in_metadata = true,
                    "title" | "creator" if in_metadata => {
                        current = Some(local);
                        text.clear();
                    }
                    "spine" => package.toc_id = attribute(&e, b"toc"),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => match lowercase_local_name(e.name().as_ref()).as_str() {
                "item" => {
                    if let (Some(id), Some(href)) = (attribute(&e, b"id"), attribute(&e, b"href")) {
                        package.manifest.insert(
                            id,
                            ManifestItem {
                                href,
                                media_type: attribute(&e, b"media-type").unwrap_or_default(),
                                properties: attribute(&e, b"properties"),
                            },
                        );
                    }
                }
                "itemref" => {
                    let linear = attribute(&e, b"linear").unwrap_or_default();
                    if let Some(idref) = attribute(&e, b"idref")
                        && linear != "no"
                    {
                        package.spine.push(idref);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if current.is_some() {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if current.is_some()
                    && let Some(resolved) = markup::resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    text.push_str(&resolved);
                }
            }
            Ok(Event::End(e)) => {
                let local = lowercase_local_name(e.name().as_ref());
                if local == "metadata" {
                    in_metadata = false;
                }
                if current.as_deref() == Some(local.as_str()) {
                    let value = collapse_whitespace(&text);
                    let slot = if local == "title" {
                        &mut package.title
                    } else {
                        &mut package.author
                    };
                    if slot.is_none() && !value.is_empty() {
                        *slot = Some(value);
                    }
                    current = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(&reader, e)),
            _ => {}
        }
    }

    Ok(package)
}

/// Parse an EPUB3 navigation document. Entries keep their raw hrefs.
fn parse_nav(content: &str) -> Result<Vec<TocEntry>> {
    let entries = parse_nav_lists(content, true)?;
    if entries.is_empty() {
        return parse_nav_lists(content, false);
    }
    Ok(entries)
}

struct NavItemState {
    title: String,
    href: Option<String>,
    children: Vec<TocEntry>,
    /// Element that opened the label and how deeply it is nested in itself.
    label: Option<(String, usize)>,
    label_done: bool,
}

impl NavItemState {
    fn in_label(&self) -> bool {
        self.label.is_some()
    }
}

/// With `toc_only`, only a `<nav>` typed or identified as "toc" is read;
/// otherwise the first `<nav>` is.
fn parse_nav_lists(content: &str, toc_only: bool) -> Result<Vec<TocEntry>> {
    let mut reader = Reader::from_str(content);
    {
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.allow_dangling_amp = true;
    }

    let mut roots: Vec<TocEntry> = Vec::new();
    let mut stack: Vec<NavItemState> = Vec::new();
    let mut nav_depth = 0usize;
    let mut finished = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = lowercase_local_name(e.name().as_ref());
                if local == "nav" {
                    if nav_depth > 0 {
                        nav_depth += 1;
                    } else if !finished {
                        let is_toc = e.attributes().flatten().any(|attr| {
                            let key = lowercase_local_name(attr.key.as_ref());
                            let value = String::from_utf8_lossy(&attr.value).to_lowercase();
                            (key == "type" && value.split_whitespace().any(|v| v == "toc"))
                                || (key == "id" && value == "toc")
                        });
                        if is_toc || !toc_only {
                            nav_depth = 1;
                        }
                    }
                    continue;
                }
                if nav_depth == 0 {
                    continue;
                }
                match local.as_str() {
                    "li" => stack.push(NavItemState {
                        title: String::new(),
                        href: None,
                        children: Vec::new(),
                        label: None,
                        label_done: false,
                    }),
                    "a" | "span" => {
                        if let Some(item) = stack.last_mut()
                            && !item.label_done
                        {
                            if let Some((tag, depth)) = item.label.as_mut() {
                                if *tag == local {
                                    *depth += 1;
                                }
                            } else {
                                if local == "a" {
                                    item.href = attribute(&e, b"href");
                                }
                                item.label = Some((local.clone(), 1));
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(item) = stack.last_mut()
                    && item.in_label()
                {
                    item.title.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some(item) = stack.last_mut()
                    && item.in_label()
                    && let Some(resolved) = markup::resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    item.title.push_str(&resolved);
                }
            }
            Ok(Event::End(e)) => {
                if nav_depth == 0 {
                    continue;
                }
                match lowercase_local_name(e.name().as_ref()).as_str() {
                    "nav" => {
                        nav_depth -= 1;
                        if nav_depth == 0 {
                            finished = true;
                        }
                    }
                    local @ ("a" | "span") => {
                        if let Some(item) = stack.last_mut()
                            && let Some((tag, depth)) = item.label.as_mut()
                            && tag.as_str() == local
                        {
                            *depth -= 1;
                            if *depth == 0 {
                                item.label = None;
                                item.label_done = true;
                            }
                        }
                    }
                    "li" => {
                        if let Some(item) = stack.pop() {
                            let title = collapse_whitespace(&item.title);
                            if !title.is_empty() {
                                let entry = TocEntry {
                                    title,
                                    href: item.href.filter(|h| !h.is_empty()),
                                    anchor: None,
                                    children: item.children,
                                };
                                match stack.last_mut() {
                                    Some(parent) => parent.children.push(entry),
                                    None => roots.push(entry),
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(&reader, e)),
            _ => {}
        }
    }

    Ok(roots)
}

/// Parse an EPUB2 NCX table of contents. Entries keep their raw hrefs.
fn parse_ncx(content: &str) -> Result<Vec<TocEntry>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    reader.config_mut().allow_dangling_amp = true;

    struct NavPointState {
        children: Vec<TocEntry>,
        text: Option<String>,
        src: Option<String>,
    }

    let mut stack: Vec<NavPointState> = vec![NavPointState {
        children: Vec::new(),
        text: None,
        src: None,
    }];
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match lowercase_local_name(e.name().as_ref()).as_str() {
                "navpoint" => stack.push(NavPointState {
                    children: Vec::new(),
                    text: None,
                    src: None,
                }),
                "text" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if lowercase_local_name(e.name().as_ref()) == "content"
                    && let Some(state) = stack.last_mut()
                {
                    state.src = attribute(&e, b"src");
                }
            }
            Ok(Event::Text(e)) => {
                if in_text && let Some(state) = stack.last_mut() {
                    state
                        .text
                        .get_or_insert_with(String::new)
                        .push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text
                    && let Some(state) = stack.last_mut()
                    && let Some(resolved) = markup::resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    state.text.get_or_insert_with(String::new).push_str(&resolved);
                }
            }
            Ok(Event::End(e)) => match lowercase_local_name(e.name().as_ref()).as_str() {
                "text" => in_text = false,
                "navpoint" => {
                    if stack.len() > 1
                        && let Some(state) = stack.pop()
                        && let Some(text) = state.text
                    {
                        let title = collapse_whitespace(&text);
                        if !title.is_empty() {
                            let mut entry = TocEntry::new(title, state.src);
                            entry.children = state.children;
                            if let Some(parent) = stack.last_mut() {
                                parent.children.push(entry);
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(&reader, e)),
            _ => {}
        }
    }

    Ok(stack.into_iter().next().map(|s| s.children).unwrap_or_default())
}

// ----------------------------------------------------------------------------
// Path helpers
// ----------------------------------------------------------------------------

/// Resolves every entry's raw href against `base_dir`, splitting off anchors.
fn resolve_toc(entries: Vec<TocEntry>, base_dir: &str) -> Vec<TocEntry> {
    entries
        .into_iter()
        .map(|entry| {
            let (href, anchor) = match entry.href.as_deref() {
                Some(raw) => resolve_href(base_dir, raw),
                None => (None, None),
            };
            TocEntry {
                title: entry.title,
                href,
                anchor,
                children: resolve_toc(entry.children, base_dir),
            }
        })
        .collect()
}

/// Joins a relative href onto `base_dir` inside the archive, percent-decoding
/// it and collapsing `.`/`..` segments. Returns `(path, anchor)`.
pub(crate) fn resolve_href(base_dir: &str, href: &str) -> (Option<String>, Option<String>) {
    let (path, anchor) = match href.split_once('#') {
        Some((path, anchor)) => (path, Some(anchor.to_string()).filter(|a| !a.is_empty())),
        None => (href, None),
    };
    if path.is_empty() {
        return (None, anchor);
    }
    let decoded = percent_decode_str(path).decode_utf8_lossy();

    let mut segments: Vec<&str> = if decoded.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    (Some(segments.join("/")), anchor)
}

fn parent_dir(path: &str) -> String {
    path.rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
        .unwrap_or_default()
}

fn base_name(href: &str) -> &str {
    href.rsplit('/').next().unwrap_or(href)
}

fn document_href(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}
