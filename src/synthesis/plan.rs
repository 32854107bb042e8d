//! Ordered chapter plan derived from a [`ChapterTree`], chapter selection
//! and the plain-text export format.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::ContentFilter;
use crate::tree::ChapterTree;
use crate::types::{BookMetadata, HierarchyStyle};

lazy_static! {
    static ref DOUBLE_QUOTES: Regex = Regex::new(r"[\u{201C}\u{201D}]").unwrap();
    static ref SINGLE_QUOTES: Regex = Regex::new(r"[\u{2018}\u{2019}]").unwrap();
}

/// Subset of chapters to synthesize, written as 1-based ranges:
/// `"1-5"`, `"1,3,7"`, `"3-"` (3 to the end), `"-4"` (the first four).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChapterSelection {
    ranges: Vec<(Option<usize>, Option<usize>)>,
}

impl ChapterSelection {
    /// 0-based indices selected out of `total` chapters. Order follows the
    /// selection string, duplicates are dropped and out-of-range numbers ignored.
    pub fn indices(&self, total: usize) -> Vec<usize> {
        let mut selected = Vec::new();
        for &(start, end) in &self.ranges {
            let start = start.unwrap_or(1);
            let end = end.unwrap_or(total).min(total);
            for number in start..=end {
                let index = number - 1;
                if !selected.contains(&index) {
                    selected.push(index);
                }
            }
        }
        selected
    }
}

fn parse_number(part: &str, raw: &str) -> Result<usize> {
    match part.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(Error::Other(format!(
            "Invalid chapter selection '{}': '{}' is not a chapter number",
            raw, part
        ))),
        Ok(n) => Ok(n),
    }
}

impl FromStr for ChapterSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let range = match part.split_once('-') {
                Some((start, end)) => {
                    let start = start.trim();
                    let end = end.trim();
                    if start.is_empty() && end.is_empty() {
                        return Err(Error::Other(format!(
                            "Invalid chapter selection '{}': empty range",
                            s
                        )));
                    }
                    let start = (!start.is_empty()).then(|| parse_number(start, s)).transpose()?;
                    let end = (!end.is_empty()).then(|| parse_number(end, s)).transpose()?;
                    if let (Some(a), Some(b)) = (start, end)
                        && a > b
                    {
                        return Err(Error::Other(format!(
                            "Invalid chapter selection '{}': {} is after {}",
                            s, a, b
                        )));
                    }
                    (start, end)
                }
                None => {
                    let n = parse_number(part, s)?;
                    (Some(n), Some(n))
                }
            };
            ranges.push(range);
        }
        if ranges.is_empty() {
            return Err(Error::Other("Empty chapter selection".to_string()));
        }
        Ok(Self { ranges })
    }
}

impl fmt::Display for ChapterSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|range| match *range {
                (Some(a), Some(b)) if a == b => a.to_string(),
                (a, b) => format!(
                    "{}-{}",
                    a.map(|n| n.to_string()).unwrap_or_default(),
                    b.map(|n| n.to_string()).unwrap_or_default()
                ),
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

impl TryFrom<String> for ChapterSelection {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ChapterSelection> for String {
    fn from(selection: ChapterSelection) -> Self {
        selection.to_string()
    }
}

/// A chapter scheduled for synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChapter {
    /// 1-based position in the flattened tree, before selection.
    pub index: usize,
    /// Title rendered with the configured [`HierarchyStyle`].
    pub title: String,
    pub original_title: String,
    pub level: usize,
    pub paragraphs: Vec<String>,
}

impl PlannedChapter {
    /// Text handed to the synthesizer: the title followed by the paragraphs.
    pub fn text(&self) -> String {
        let mut text = self.title.clone();
        for paragraph in &self.paragraphs {
            text.push_str("\n\n");
            text.push_str(&clean_paragraph(paragraph));
        }
        text
    }
}

/// Chapters of one book in playback order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisPlan {
    pub chapters: Vec<PlannedChapter>,
}

impl SynthesisPlan {
    /// Runs `filter` over `tree`, flattens what is left (down to
    /// `max_depth`), formats titles and applies `selection`. Selection
    /// numbers count chapters after filtering.
    pub fn from_tree(
        tree: &ChapterTree,
        style: HierarchyStyle,
        max_depth: Option<usize>,
        selection: Option<&ChapterSelection>,
        filter: Option<&ContentFilter>,
    ) -> Self {
        let filtered;
        let tree = match filter {
            Some(filter) if filter.is_enabled() => {
                filtered = filter.apply(tree).0;
                &filtered
            }
            _ => tree,
        };

        let all: Vec<PlannedChapter> = tree
            .flatten(tree.root(), max_depth)
            .into_iter()
            .enumerate()
            .map(|(i, id)| PlannedChapter {
                index: i + 1,
                title: tree.format_title(id, style),
                original_title: tree[id].title.clone(),
                level: tree[id].level(),
                paragraphs: tree[id].paragraphs.clone(),
            })
            .collect();

        let chapters = match selection {
            Some(selection) => selection
                .indices(all.len())
                .into_iter()
                .filter_map(|i| all.get(i).cloned())
                .collect(),
            None => all,
        };
        Self { chapters }
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedChapter> {
        self.chapters.iter()
    }

    /// Renders the text export: a `Title:`/`Author:` header, a title
    /// chapter, then every chapter as a `#` heading (one `#` per level, at
    /// most six) followed by its cleaned paragraphs.
    pub fn render_text(&self, metadata: &BookMetadata) -> String {
        let mut out = String::new();
        out.push_str(&format!("Title: {}\n", metadata.title));
        out.push_str(&format!("Author: {}\n\n", metadata.author));
        out.push_str("# Title\n");
        out.push_str(&format!("{}, by {}\n\n", metadata.title, metadata.author));

        for chapter in &self.chapters {
            let markers = "#".repeat(chapter.level.clamp(1, 6));
            out.push_str(&format!("{} {}\n\n", markers, chapter.title));
            for paragraph in &chapter.paragraphs {
                let clean = clean_paragraph(paragraph);
                if !clean.is_empty() {
                    out.push_str(&clean);
                    out.push_str("\n\n");
                }
            }
        }
        out
    }

    /// Writes [`render_text`](Self::render_text) to `path`.
    pub async fn write_text(&self, metadata: &BookMetadata, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.render_text(metadata)).await?;
        Ok(())
    }
}

/// Collapses whitespace and straightens curly quotes.
pub fn clean_paragraph(paragraph: &str) -> String {
    let collapsed = paragraph.split_whitespace().collect::<Vec<_>>().join(" ");
    let straightened = DOUBLE_QUOTES.replace_all(&collapsed, "\"");
    SINGLE_QUOTES.replace_all(&straightened, "'").into_owned()
}
