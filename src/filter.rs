//! Removal of front matter, back matter and trailing endnotes from a
//! chapter tree before it is planned for synthesis.
//!
//! Chapters are classified by title alone. A removed chapter takes its
//! whole subtree with it.

use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tree::{ChapterNode, ChapterTree, NodeId};

lazy_static! {
    static ref FRONT_MATTER: Vec<Regex> = compile(&[
        r"^cover\s*(page)?$",
        r"^half[\s-]?title(\s+page)?$",
        r"^title(\s+page)?$",
        r"^front\s*(page)?$",
        r"^copyright(\s+page)?$",
        r"^contents$",
        r"^table\s+of\s+contents$",
        r"^series(\s+page)?$",
        r"^series\s+editor",
        r"^epigraph$",
        r"^dedication$",
        r"^foreword$",
        r"^preface$",
        r"^introduction$",
        r"^editor'?s?\s+(introduction|preface|note)",
        r"^note\s+on\s+(the\s+)?text",
        r"^acknowledge?ments?$",
        r"^about\s+this\s+(e?book|edition)",
        r"^front\s*matter$",
        r"^exordium$",
    ]);
    static ref BACK_MATTER: Vec<Regex> = compile(&[
        r"^notes?$",
        r"^end\s*notes?$",
        r"^foot\s*notes?$",
        r"^index$",
        r"^bibliography$",
        r"^references?$",
        r"^sources?$",
        r"^works?\s+cited$",
        r"^further\s+reading$",
        r"^suggested\s+reading$",
        r"^about\s+the\s+author",
        r"^also\s+by",
        r"^other\s+(books|works)\s+by",
        r"^colophon$",
        r"^back\s*matter$",
        r"^appendix",
        r"^glossary$",
    ]);
    /// Checked before the front matter table, so "Translator's Preface" is
    /// not taken for a plain preface.
    static ref TRANSLATOR: Vec<Regex> = compile(&[
        r"^translator'?s?\s+(introduction|preface|note)",
        r"^introduction\s+by\s+.*translator",
        r"^preface\s+by\s+.*translator",
        r"^note\s+by\s+.*translator",
    ]);
    /// "1. ...", "[1] ...", "* ...".
    static ref NOTE_LINE: Regex = Regex::new(r"^\s*(\d+\.\s+|\[\d+\]|\*+)").unwrap();
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
        .collect()
}

/// Paragraphs that open a trailing notes block on their own.
const NOTES_MARKERS: [&str; 4] = ["notes", "notes:", "endnotes", "endnotes:"];

/// A run of at least this many note-like paragraphs counts as a notes block.
const MIN_NOTE_RUN: usize = 3;

/// What a chapter title says about its role in the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterKind {
    FrontMatter,
    BackMatter,
    TranslatorContent,
    MainContent,
}

/// Which kinds of content to drop. The default keeps everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentFilter {
    pub remove_front_matter: bool,
    pub remove_back_matter: bool,
    /// Translator prefaces and notes are kept unless this is set, even when
    /// front matter is removed.
    pub remove_translator_content: bool,
    /// Cut a numbered notes block off the end of each chapter.
    pub remove_inline_notes: bool,
}

/// What [`ContentFilter::apply`] took out of a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterReport {
    pub original_count: usize,
    pub filtered_count: usize,
    pub removed_front_matter: Vec<String>,
    pub removed_back_matter: Vec<String>,
    pub removed_translator_content: Vec<String>,
    pub chapters_with_notes_removed: usize,
}

impl FilterReport {
    pub fn removed_count(&self) -> usize {
        self.original_count - self.filtered_count
    }
}

impl ContentFilter {
    /// Drops front and back matter, keeping translator content.
    pub fn matter() -> Self {
        Self {
            remove_front_matter: true,
            remove_back_matter: true,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.remove_front_matter
            || self.remove_back_matter
            || self.remove_translator_content
            || self.remove_inline_notes
    }

    pub fn classify(title: &str) -> ChapterKind {
        let title = title.trim();
        let matches = |table: &[Regex]| table.iter().any(|re| re.is_match(title));
        if matches(&TRANSLATOR) {
            ChapterKind::TranslatorContent
        } else if matches(&FRONT_MATTER) {
            ChapterKind::FrontMatter
        } else if matches(&BACK_MATTER) {
            ChapterKind::BackMatter
        } else {
            ChapterKind::MainContent
        }
    }

    /// Whether a chapter titled `title` survives this filter.
    pub fn includes(&self, title: &str) -> bool {
        match Self::classify(title) {
            ChapterKind::FrontMatter => !self.remove_front_matter,
            ChapterKind::BackMatter => !self.remove_back_matter,
            ChapterKind::TranslatorContent => !self.remove_translator_content,
            ChapterKind::MainContent => true,
        }
    }

    /// Index of the first paragraph of a trailing notes block.
    ///
    /// A paragraph reading just "Notes" or "Endnotes" starts one. Otherwise
    /// the last 30% of the chapter is searched backwards for a run of at
    /// least three numbered or starred paragraphs.
    pub fn notes_start(paragraphs: &[String]) -> Option<usize> {
        if let Some(marker) = paragraphs
            .iter()
            .position(|p| NOTES_MARKERS.contains(&p.trim().to_lowercase().as_str()))
        {
            return Some(marker);
        }
        if paragraphs.len() < MIN_NOTE_RUN {
            return None;
        }

        let window_start = paragraphs.len() * 7 / 10;
        let mut run = 0;
        let mut start = None;
        for i in (window_start..paragraphs.len()).rev() {
            if NOTE_LINE.is_match(paragraphs[i].trim()) {
                run += 1;
                start = Some(i);
            } else if run >= MIN_NOTE_RUN {
                return start;
            } else {
                run = 0;
                start = None;
            }
        }
        start.filter(|_| run >= MIN_NOTE_RUN)
    }

    /// Copies `tree` without the chapters this filter removes.
    pub fn apply(&self, tree: &ChapterTree) -> (ChapterTree, FilterReport) {
        let mut report = FilterReport {
            original_count: tree.len(),
            ..FilterReport::default()
        };
        if !self.is_enabled() {
            report.filtered_count = tree.len();
            return (tree.clone(), report);
        }

        let mut filtered = ChapterTree::new();
        let root = filtered.root();
        for &child in tree[tree.root()].children() {
            self.copy_node(tree, child, &mut filtered, root, &mut report);
        }
        report.filtered_count = filtered.len();

        if report.removed_count() > 0 || report.chapters_with_notes_removed > 0 {
            info!(
                "Content filter: {} -> {} chapters",
                report.original_count, report.filtered_count
            );
        }
        (filtered, report)
    }

    fn copy_node(
        &self,
        source: &ChapterTree,
        id: NodeId,
        target: &mut ChapterTree,
        parent: NodeId,
        report: &mut FilterReport,
    ) {
        let node = &source[id];
        let removed = match Self::classify(&node.title) {
            ChapterKind::FrontMatter if self.remove_front_matter => {
                Some(&mut report.removed_front_matter)
            }
            ChapterKind::BackMatter if self.remove_back_matter => {
                Some(&mut report.removed_back_matter)
            }
            ChapterKind::TranslatorContent if self.remove_translator_content => {
                Some(&mut report.removed_translator_content)
            }
            _ => None,
        };
        if let Some(removed) = removed {
            debug!("Filtering out '{}'", node.title);
            removed.push(node.title.clone());
            return;
        }

        let mut paragraphs = node.paragraphs.clone();
        if self.remove_inline_notes
            && let Some(start) = Self::notes_start(&paragraphs)
        {
            debug!(
                "Removing {} note paragraph(s) from '{}'",
                paragraphs.len() - start,
                node.title
            );
            paragraphs.truncate(start);
            report.chapters_with_notes_removed += 1;
        }

        let copy = ChapterNode::new(node.title.clone())
            .with_href(node.href.clone())
            .with_anchor(node.anchor.clone())
            .with_paragraphs(paragraphs);
        let new_id = target.add_child(parent, copy);
        for &child in node.children() {
            self.copy_node(source, child, target, new_id, report);
        }
    }
}
