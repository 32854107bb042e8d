//! Chapter tree construction from a book's declared TOC and heading markup.

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::classifier::HeadingClassifier;
use crate::document::{SourceBook, TocEntry};
use crate::error::{Error, Result};
use crate::markup::{self, DocumentOutline, Heading, Section};
use crate::tree::{ChapterNode, ChapterTree, NodeId};
use crate::types::{DetectionMethod, StructureReport};

/// Chapter tree of one book together with how it was obtained.
#[derive(Debug, Clone)]
pub struct ExtractedStructure {
    pub tree: ChapterTree,
    pub report: StructureReport,
}

/// Builds a [`ChapterTree`] for a [`SourceBook`] using one detection strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureExtractor {
    method: DetectionMethod,
    classifier: HeadingClassifier,
}

impl StructureExtractor {
    pub fn new(method: DetectionMethod) -> Self {
        Self {
            method,
            classifier: HeadingClassifier::new(),
        }
    }

    /// Replaces the classifier used for plain-text headings and TOC title checks.
    pub fn with_classifier(mut self, classifier: HeadingClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn method(&self) -> DetectionMethod {
        self.method
    }

    /// Heading elements of `markup` in document order.
    pub fn extract_headings(markup: &str) -> Result<Vec<Heading>> {
        markup::extract_headings(markup)
    }

    /// Sections (heading plus following paragraphs) of `markup`.
    pub fn extract_sections(markup: &str) -> Result<Vec<Section>> {
        markup::extract_sections(markup)
    }

    /// Runs the configured strategy over `book`.
    ///
    /// Fails with [`Error::ChapterDetection`] when the strategy yields no
    /// nodes at all.
    pub fn extract(&self, book: &SourceBook) -> Result<ExtractedStructure> {
        let outlines = book.outlines(&self.classifier)?;
        let mut report = StructureReport::new(self.method);
        report.toc_entries = book.toc_entry_count();
        report.toc_chapter_like_titles = count_chapter_like(&book.toc, &self.classifier);
        report.headings_found = outlines.iter().map(|o| o.sections.len()).sum();

        debug!(
            "{:?}: {} TOC entries ({} chapter-like), {} headings",
            book.path, report.toc_entries, report.toc_chapter_like_titles, report.headings_found
        );

        let method = match self.method {
            DetectionMethod::Auto | DetectionMethod::Combined if book.toc.is_empty() => {
                info!(
                    "{:?} has no table of contents, falling back to heading detection",
                    book.path
                );
                report.fallback_used = true;
                DetectionMethod::HeadingsOnly
            }
            DetectionMethod::Auto => DetectionMethod::Combined,
            other => other,
        };
        report.method_applied = method;

        let mut tree = match method {
            DetectionMethod::HeadingsOnly => build_from_outlines(book, &outlines),
            DetectionMethod::TocOnly => build_from_toc(&book.toc),
            _ => build_combined(book, &outlines),
        };

        if tree.is_empty() {
            return Err(Error::chapter_detection(self.method));
        }

        if method != DetectionMethod::HeadingsOnly {
            populate_text(&mut tree, book, &outlines);
        }

        let root = tree.root();
        report.node_count = tree.len();
        report.depth = tree.get_depth(root);
        report.chapters_without_text = tree
            .leaves(root)
            .into_iter()
            .filter(|&id| tree[id].paragraphs.is_empty())
            .count();
        if report.chapters_without_text > 0 {
            warn!(
                "{:?}: {} chapter(s) have no text",
                book.path, report.chapters_without_text
            );
        }

        Ok(ExtractedStructure { tree, report })
    }
}

fn count_chapter_like(entries: &[TocEntry], classifier: &HeadingClassifier) -> usize {
    entries
        .iter()
        .map(|entry| {
            usize::from(classifier.is_chapter_title(&entry.title))
                + count_chapter_like(&entry.children, classifier)
        })
        .sum()
}

/// Builds a tree from headings with an ancestor stack: a heading becomes the
/// child of the nearest preceding heading with a smaller level. Skipped
/// levels are not filled in.
pub fn build_from_headings(headings: &[Heading]) -> ChapterTree {
    let mut tree = ChapterTree::new();
    let mut stack = Vec::new();
    for heading in headings {
        let node = ChapterNode::new(heading.text.clone()).with_anchor(heading.id.clone());
        push_nested(&mut tree, &mut stack, heading.level, node);
    }
    tree
}

/// Same nesting as [`build_from_headings`], keeping each section's paragraphs
/// and recording `href` as the source document.
pub fn build_from_sections(sections: &[Section], href: Option<&str>) -> ChapterTree {
    let mut tree = ChapterTree::new();
    let mut stack = Vec::new();
    append_sections(&mut tree, &mut stack, sections, href);
    tree
}

/// Converts a declared table of contents into a tree one-to-one.
pub fn build_from_toc(toc: &[TocEntry]) -> ChapterTree {
    fn add_entries(tree: &mut ChapterTree, parent: NodeId, entries: &[TocEntry]) {
        for entry in entries {
            let node = ChapterNode::new(entry.title.clone())
                .with_href(entry.href.clone())
                .with_anchor(entry.anchor.clone());
            let id = tree.add_child(parent, node);
            add_entries(tree, id, &entry.children);
        }
    }

    let mut tree = ChapterTree::new();
    let root = tree.root();
    add_entries(&mut tree, root, toc);
    tree
}

fn push_nested(
    tree: &mut ChapterTree,
    stack: &mut Vec<(usize, NodeId)>,
    level: usize,
    node: ChapterNode,
) {
    while stack.last().is_some_and(|&(top, _)| top >= level) {
        stack.pop();
    }
    let parent = stack.last().map(|&(_, id)| id).unwrap_or(tree.root());
    let id = tree.add_child(parent, node);
    stack.push((level, id));
}

fn append_sections(
    tree: &mut ChapterTree,
    stack: &mut Vec<(usize, NodeId)>,
    sections: &[Section],
    href: Option<&str>,
) {
    for section in sections {
        let node = ChapterNode::new(section.title.clone())
            .with_href(href.map(str::to_string))
            .with_anchor(section.anchor.clone())
            .with_paragraphs(section.paragraphs.clone());
        push_nested(tree, stack, section.level, node);
    }
}

/// HEADINGS_ONLY over a whole book: one ancestor stack across every document
/// in reading order, so chapters in later files nest under an earlier part.
fn build_from_outlines(book: &SourceBook, outlines: &[DocumentOutline]) -> ChapterTree {
    let mut tree = ChapterTree::new();
    let mut stack = Vec::new();
    for (document, outline) in book.documents.iter().zip(outlines) {
        append_sections(&mut tree, &mut stack, &outline.sections, Some(&document.href));
    }
    tree
}

/// COMBINED: the TOC tree, with each leaf re-based onto the part of its
/// target document it names.
///
/// A leaf starts at the section its anchor resolves to, else at the heading
/// matching its title. That section becomes the leaf itself (the TOC title
/// wins) and the deeper sections after it become its children. A leaf that
/// names no section takes the whole document, but only when no other leaf
/// starts inside that document and only once.
fn build_combined(book: &SourceBook, outlines: &[DocumentOutline]) -> ChapterTree {
    let mut tree = build_from_toc(&book.toc);
    let leaves = tree.leaves(tree.root());

    let targets: Vec<Option<(usize, Option<usize>)>> = leaves
        .iter()
        .map(|&leaf| {
            let node = &tree[leaf];
            let href = node.href.as_deref()?;
            let Some(doc_index) = book.document_index(href) else {
                debug!("TOC target '{}' is not a spine document", href);
                return None;
            };
            let outline = &outlines[doc_index];
            let start = node
                .anchor
                .as_deref()
                .and_then(|anchor| outline.section_for_anchor(anchor))
                .or_else(|| outline.section_matching_title(&node.title));
            Some((doc_index, start))
        })
        .collect();

    let mut claimed: HashSet<usize> = targets
        .iter()
        .flatten()
        .filter(|(_, start)| start.is_some())
        .map(|&(doc_index, _)| doc_index)
        .collect();

    for (&leaf, target) in leaves.iter().zip(targets) {
        let Some((doc_index, start)) = target else {
            continue;
        };
        let outline = &outlines[doc_index];
        let href = tree[leaf].href.clone();

        match start {
            Some(start) => {
                let sub = build_from_sections(section_slice(outline, start), href.as_deref());
                if let Some(&first) = sub[sub.root()].children().first() {
                    rebase_onto(&mut tree, leaf, &sub, first, Vec::new());
                }
            }
            None => {
                if !claimed.insert(doc_index) {
                    continue;
                }
                let sub = build_from_sections(&outline.sections, href.as_deref());
                let tops = sub[sub.root()].children().to_vec();
                let Some((&first, rest)) = tops.split_first() else {
                    continue;
                };
                rebase_onto(&mut tree, leaf, &sub, first, outline.front_matter.clone());
                for &top in rest {
                    tree.graft(leaf, &sub, top);
                }
            }
        }
    }
    tree
}

/// Makes `sub[section]` the TOC node `leaf`: the leaf keeps its title and
/// takes the section's text (after `lead`), anchor and children.
fn rebase_onto(
    tree: &mut ChapterTree,
    leaf: NodeId,
    sub: &ChapterTree,
    section: NodeId,
    mut lead: Vec<String>,
) {
    debug!(
        "Re-basing heading '{}' onto TOC entry '{}'",
        sub[section].title, tree[leaf].title
    );
    let node = &mut tree[leaf];
    if node.paragraphs.is_empty() {
        lead.extend(sub[section].paragraphs.iter().cloned());
        node.paragraphs = lead;
    }
    if node.anchor.is_none() {
        node.anchor = sub[section].anchor.clone();
    }
    tree.graft_children(leaf, sub, section);
}

/// The section at `start` and every deeper section after it.
fn section_slice(outline: &DocumentOutline, start: usize) -> &[Section] {
    let level = outline.sections[start].level;
    let end = outline.sections[start + 1..]
        .iter()
        .position(|s| s.level <= level)
        .map(|offset| start + 1 + offset)
        .unwrap_or(outline.sections.len());
    &outline.sections[start..end]
}

/// Fills nodes that still have no paragraphs from their target documents.
///
/// Anchor first, then a heading with a matching title, then (leaves only)
/// the whole document, at most once per document. Inner nodes only take
/// their own section's paragraphs, and never ones a descendant already
/// carries.
fn populate_text(tree: &mut ChapterTree, book: &SourceBook, outlines: &[DocumentOutline]) {
    let mut used_documents: HashSet<usize> = HashSet::new();
    let nodes = tree.flatten(tree.root(), None);

    for &id in &nodes {
        if !tree[id].paragraphs.is_empty()
            && let Some(index) = tree[id].href.as_deref().and_then(|h| book.document_index(h))
        {
            used_documents.insert(index);
        }
    }

    // Leaves in reading order, then inner nodes deepest first, so an inner
    // node sees what its descendants already carry.
    let (leaves, inner): (Vec<NodeId>, Vec<NodeId>) =
        nodes.into_iter().partition(|&id| tree[id].is_leaf());

    for id in leaves.into_iter().chain(inner.into_iter().rev()) {
        let node = &tree[id];
        if !node.paragraphs.is_empty() {
            continue;
        }
        let Some(doc_index) = node.href.as_deref().and_then(|h| book.document_index(h)) else {
            continue;
        };
        let outline = &outlines[doc_index];
        let is_leaf = node.is_leaf();

        let section = node
            .anchor
            .as_deref()
            .and_then(|anchor| outline.section_for_anchor(anchor))
            .or_else(|| outline.section_matching_title(&node.title));

        let paragraphs = match section {
            Some(index) if is_leaf => outline.paragraphs_from(index),
            Some(index) => {
                let own = &outline.sections[index].paragraphs;
                let carried_below = tree
                    .flatten(id, None)
                    .into_iter()
                    .any(|child| tree[child].paragraphs == *own);
                if carried_below {
                    Vec::new()
                } else {
                    own.clone()
                }
            }
            None if is_leaf && used_documents.insert(doc_index) => outline.all_paragraphs(),
            None => Vec::new(),
        };
        if !paragraphs.is_empty() {
            used_documents.insert(doc_index);
            tree[id].paragraphs = paragraphs;
        }
    }
}
