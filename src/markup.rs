//! Single-pass heading and paragraph scanner for (X)HTML content documents.
//!
//! The scanner is tolerant of HTML that is not well-formed XML: end-tag
//! names are not checked, unmatched end tags are ignored, a bare `&` is kept
//! as text and unknown entities are dropped.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};

use crate::classifier::HeadingClassifier;
use crate::error::{Error, Result};

/// A heading element in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    /// 1..=6, from the element name.
    pub level: usize,
    pub text: String,
    /// The element's `id`, when declared.
    pub id: Option<String>,
}

/// A heading together with the paragraphs that follow it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub level: usize,
    pub anchor: Option<String>,
    pub paragraphs: Vec<String>,
}

/// Everything the structure extractor needs from one content document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentOutline {
    /// Contents of `<title>`, if any.
    pub title: Option<String>,
    pub sections: Vec<Section>,
    /// Paragraphs that precede the first heading.
    pub front_matter: Vec<String>,
    /// Element id -> index of the first section opening at or after it.
    anchors: HashMap<String, usize>,
}

impl DocumentOutline {
    pub fn headings(&self) -> Vec<Heading> {
        self.sections
            .iter()
            .map(|s| Heading {
                level: s.level,
                text: s.title.clone(),
                id: s.anchor.clone(),
            })
            .collect()
    }

    /// Section that an anchor id resolves to.
    pub fn section_for_anchor(&self, anchor: &str) -> Option<usize> {
        self.anchors
            .get(anchor)
            .copied()
            .filter(|&i| i < self.sections.len())
    }

    /// Section whose title matches `title`: the first one equal to it once
    /// case and punctuation are ignored, else the first one containing it
    /// (or contained in it) case-insensitively.
    pub fn section_matching_title(&self, title: &str) -> Option<usize> {
        let wanted = title.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        let normalized = normalized_title(&wanted);
        if !normalized.is_empty()
            && let Some(exact) = self
                .sections
                .iter()
                .position(|s| normalized_title(&s.title) == normalized)
        {
            return Some(exact);
        }
        self.sections.iter().position(|s| {
            let have = s.title.to_lowercase();
            have.contains(&wanted) || wanted.contains(&have)
        })
    }

    /// Paragraphs of section `index` and of every deeper section after it,
    /// stopping at the next heading of the same or a shallower level.
    pub fn paragraphs_from(&self, index: usize) -> Vec<String> {
        let Some(start) = self.sections.get(index) else {
            return Vec::new();
        };
        let mut paragraphs = start.paragraphs.clone();
        for section in &self.sections[index + 1..] {
            if section.level <= start.level {
                break;
            }
            paragraphs.extend(section.paragraphs.iter().cloned());
        }
        paragraphs
    }

    /// Every paragraph in the document, front matter included.
    pub fn all_paragraphs(&self) -> Vec<String> {
        let mut paragraphs = self.front_matter.clone();
        for section in &self.sections {
            paragraphs.extend(section.paragraphs.iter().cloned());
        }
        paragraphs
    }
}

/// Heading elements of `markup` in document order.
pub fn extract_headings(markup: &str) -> Result<Vec<Heading>> {
    Ok(scan(markup)?.headings())
}

/// Sections of `markup`; content before the first heading is dropped.
pub fn extract_sections(markup: &str) -> Result<Vec<Section>> {
    Ok(scan(markup)?.sections)
}

/// Scans `markup` once and builds its [`DocumentOutline`].
pub fn scan(markup: &str) -> Result<DocumentOutline> {
    let mut reader = Reader::from_str(markup);
    {
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.allow_dangling_amp = true;
    }

    let mut scanner = Scanner::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => scanner.open(&e, false),
            Ok(Event::Empty(e)) => scanner.open(&e, true),
            Ok(Event::End(e)) => {
                let name = e.name();
                scanner.close(&lowercase_local_name(name.as_ref()));
            }
            Ok(Event::Text(e)) => scanner.push_text(&String::from_utf8_lossy(e.as_ref())),
            Ok(Event::CData(e)) => scanner.push_text(&String::from_utf8_lossy(e.as_ref())),
            Ok(Event::GeneralRef(e)) => {
                let entity = String::from_utf8_lossy(e.as_ref());
                if let Some(resolved) = resolve_entity(&entity) {
                    scanner.push_text(&resolved);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Markup(format!(
                    "{} at position {}",
                    e,
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    Ok(scanner.finish())
}

/// Builds an outline for a plain-text document: lines the classifier
/// accepts open sections, blank-line separated runs of other lines become
/// paragraphs.
pub fn outline_plain_text(text: &str, classifier: &HeadingClassifier) -> DocumentOutline {
    let mut outline = DocumentOutline::default();
    let mut current = String::new();

    fn flush(outline: &mut DocumentOutline, current: &mut String) {
        let paragraph = collapse_whitespace(current);
        current.clear();
        if paragraph.is_empty() {
            return;
        }
        match outline.sections.last_mut() {
            Some(section) => section.paragraphs.push(paragraph),
            None => outline.front_matter.push(paragraph),
        }
    }

    for line in strip_bom_str(text).lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush(&mut outline, &mut current);
            continue;
        }
        if let Some(level) = classifier.classify(trimmed) {
            flush(&mut outline, &mut current);
            outline.sections.push(Section {
                title: collapse_whitespace(trimmed),
                level,
                anchor: None,
                paragraphs: Vec::new(),
            });
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(trimmed);
    }
    flush(&mut outline, &mut current);
    outline
}

// ----------------------------------------------------------------------------
// Scanner state
// ----------------------------------------------------------------------------

struct OpenHeading {
    level: usize,
    id: Option<String>,
    text: String,
}

#[derive(Default)]
struct Scanner {
    outline: DocumentOutline,
    /// Ids seen since the last heading opened.
    pending_ids: Vec<String>,
    heading: Option<OpenHeading>,
    paragraph: Option<String>,
    title: Option<String>,
    skip_depth: usize,
}

impl Scanner {
    fn open(&mut self, e: &BytesStart<'_>, empty: bool) {
        let name = e.name();
        let local = lowercase_local_name(name.as_ref());
        let id = element_id(e);

        if let Some(level) = heading_level(&local) {
            if let Some(id) = &id {
                self.pending_ids.push(id.clone());
            }
            let index = self.outline.sections.len();
            for pending in self.pending_ids.drain(..) {
                self.outline.anchors.entry(pending).or_insert(index);
            }
            self.finish_paragraph();
            if !empty {
                self.heading = Some(OpenHeading {
                    level,
                    id,
                    text: String::new(),
                });
            }
            return;
        }

        if let Some(id) = id {
            self.pending_ids.push(id);
        }

        match local.as_str() {
            "script" | "style" if !empty => self.skip_depth += 1,
            "title" if !empty && self.heading.is_none() => self.title = Some(String::new()),
            "br" => self.push_text(" "),
            "p" if !empty && self.heading.is_none() => {
                self.finish_paragraph();
                self.paragraph = Some(String::new());
            }
            _ => {}
        }
    }

    fn close(&mut self, local: &str) {
        if let Some(level) = heading_level(local) {
            if self.heading.as_ref().is_some_and(|h| h.level == level) {
                self.finish_heading();
            }
            return;
        }
        match local {
            "script" | "style" => self.skip_depth = self.skip_depth.saturating_sub(1),
            "title" => {
                if let Some(title) = self.title.take() {
                    let title = collapse_whitespace(&title);
                    if !title.is_empty() && self.outline.title.is_none() {
                        self.outline.title = Some(title);
                    }
                }
            }
            "p" => self.finish_paragraph(),
            _ => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        if self.skip_depth > 0 {
            return;
        }
        if let Some(title) = self.title.as_mut() {
            title.push_str(text);
        } else if let Some(heading) = self.heading.as_mut() {
            heading.text.push_str(text);
        } else if let Some(paragraph) = self.paragraph.as_mut() {
            paragraph.push_str(text);
        }
    }

    fn finish_heading(&mut self) {
        let Some(heading) = self.heading.take() else {
            return;
        };
        let text = collapse_whitespace(&heading.text);
        if text.is_empty() {
            return;
        }
        self.outline.sections.push(Section {
            title: text,
            level: heading.level,
            anchor: heading.id,
            paragraphs: Vec::new(),
        });
    }

    fn finish_paragraph(&mut self) {
        let Some(paragraph) = self.paragraph.take() else {
            return;
        };
        let text = collapse_whitespace(&paragraph);
        if text.is_empty() {
            return;
        }
        match self.outline.sections.last_mut() {
            Some(section) => section.paragraphs.push(text),
            None => self.outline.front_matter.push(text),
        }
    }

    fn finish(mut self) -> DocumentOutline {
        self.finish_heading();
        self.finish_paragraph();
        self.outline
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn heading_level(local: &str) -> Option<usize> {
    match local {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn element_id(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"id")
        .map(|attr| String::from_utf8_lossy(&attr.value).trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Lower-cased local part of a possibly prefixed element name.
pub(crate) fn lowercase_local_name(name: &[u8]) -> String {
    let local = name
        .iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name);
    String::from_utf8_lossy(local).to_ascii_lowercase()
}

/// Lower-cased alphanumeric characters of `title`.
pub(crate) fn normalized_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip UTF-8 BOM if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

fn strip_bom_str(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Decodes raw document bytes, replacing invalid UTF-8 sequences.
pub fn decode_document(data: &[u8]) -> String {
    String::from_utf8_lossy(strip_bom(data)).into_owned()
}

/// Resolve XML and common HTML entity references.
pub(crate) fn resolve_entity(entity: &str) -> Option<String> {
    let named = match entity {
        "apos" => Some("'"),
        "quot" => Some("\""),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "nbsp" => Some(" "),
        "mdash" => Some("\u{2014}"),
        "ndash" => Some("\u{2013}"),
        "hellip" => Some("\u{2026}"),
        "lsquo" => Some("\u{2018}"),
        "rsquo" => Some("\u{2019}"),
        "ldquo" => Some("\u{201c}"),
        "rdquo" => Some("\u{201d}"),
        _ => None,
    };
    if let Some(value) = named {
        return Some(value.to_string());
    }

    let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()
    } else {
        None
    };
    code.and_then(char::from_u32).map(|c| c.to_string())
}
