//! Chapter hierarchy stored as an index arena.
//!
//! Nodes own their children through [`NodeId`] lists; the parent link is a
//! plain id and never participates in ownership, so dropping the
//! [`ChapterTree`] drops every node at once.

use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

use crate::types::HierarchyStyle;

/// Handle to a node inside one [`ChapterTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A part, chapter or section of a book.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChapterNode {
    pub title: String,
    /// Content document this node points at.
    pub href: Option<String>,
    /// Fragment identifier inside `href`.
    pub anchor: Option<String>,
    pub paragraphs: Vec<String>,
    level: usize,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl ChapterNode {
    /// Creates a detached node; it gets its level once attached with
    /// [`ChapterTree::add_child`].
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_href(mut self, href: Option<String>) -> Self {
        self.href = href;
        self
    }

    pub fn with_anchor(mut self, anchor: Option<String>) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_paragraphs(mut self, paragraphs: Vec<String>) -> Self {
        self.paragraphs = paragraphs;
        self
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Nested, serializable view of a subtree (used for structure artifacts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterOutline {
    pub title: String,
    pub level: usize,
    pub href: Option<String>,
    pub anchor: Option<String>,
    pub paragraph_count: usize,
    pub children: Vec<ChapterOutline>,
}

/// A book's chapter hierarchy below an implicit, untitled root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterTree {
    nodes: Vec<ChapterNode>,
}

impl Default for ChapterTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ChapterTree {
    /// Creates a tree holding only the level-0 root.
    pub fn new() -> Self {
        Self {
            nodes: vec![ChapterNode::default()],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn get(&self, id: NodeId) -> Option<&ChapterNode> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut ChapterNode> {
        self.nodes.get_mut(id.0)
    }

    /// Number of nodes below the root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attaches `node` as the last child of `parent`, fixing its level to
    /// `parent.level + 1`.
    pub fn add_child(&mut self, parent: NodeId, mut node: ChapterNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = Some(parent);
        node.level = self[parent].level + 1;
        node.children.clear();
        self.nodes.push(node);
        self[parent].children.push(id);
        id
    }

    /// Copies `source_node` and its whole subtree from `source` beneath
    /// `parent`, returning the id of the copied subtree root.
    pub fn graft(&mut self, parent: NodeId, source: &ChapterTree, source_node: NodeId) -> NodeId {
        let detached = source[source_node].detached();
        let copied = self.add_child(parent, detached);
        self.graft_children(copied, source, source_node);
        copied
    }

    /// Copies the children of `source_node` (and their subtrees) beneath `parent`.
    pub fn graft_children(&mut self, parent: NodeId, source: &ChapterTree, source_node: NodeId) {
        for &child in source[source_node].children() {
            self.graft(parent, source, child);
        }
    }

    /// Ids from the root to `node` inclusive. The root is only part of the
    /// path when it carries a title.
    pub fn get_path(&self, node: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let entry = &self[id];
            if entry.parent.is_some() || !entry.title.is_empty() {
                path.push(id);
            }
            current = entry.parent;
        }
        path.reverse();
        path
    }

    /// Length of the longest downward path from `node` to a leaf.
    pub fn get_depth(&self, node: NodeId) -> usize {
        self[node]
            .children
            .iter()
            .map(|&child| 1 + self.get_depth(child))
            .max()
            .unwrap_or(0)
    }

    /// Pre-order descendants of `node` (excluding `node`). With `max_depth`,
    /// any node whose level exceeds it is omitted together with its subtree.
    pub fn flatten(&self, node: NodeId, max_depth: Option<usize>) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = self[node].children.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            let entry = &self[id];
            if max_depth.is_some_and(|max| entry.level > max) {
                continue;
            }
            result.push(id);
            stack.extend(entry.children.iter().rev().copied());
        }
        result
    }

    /// 1-based position of `node` among its parent's children.
    pub fn sibling_position(&self, node: NodeId) -> Option<usize> {
        let parent = self[node].parent?;
        self[parent]
            .children
            .iter()
            .position(|&c| c == node)
            .map(|i| i + 1)
    }

    /// Renders the title of `node` according to `style`.
    pub fn format_title(&self, node: NodeId, style: HierarchyStyle) -> String {
        let entry = &self[node];
        match style {
            HierarchyStyle::Flat => entry.title.clone(),
            HierarchyStyle::Numbered => {
                let numbers: Vec<String> = self
                    .get_path(node)
                    .into_iter()
                    .filter_map(|id| self.sibling_position(id))
                    .map(|n| n.to_string())
                    .collect();
                if numbers.is_empty() {
                    entry.title.clone()
                } else {
                    format!("{} {}", numbers.join("."), entry.title)
                }
            }
            HierarchyStyle::Indented => {
                let depth = entry.level.saturating_sub(1);
                let prefix = if entry.level > 1 { "─ " } else { "" };
                format!("{}{}{}", "  ".repeat(depth), prefix, entry.title)
            }
            HierarchyStyle::Arrow => self.join_path_titles(node, " > "),
            HierarchyStyle::Breadcrumb => self.join_path_titles(node, " / "),
        }
    }

    fn join_path_titles(&self, node: NodeId, separator: &str) -> String {
        self.get_path(node)
            .into_iter()
            .map(|id| self[id].title.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Nested view of the subtree below `node`.
    pub fn to_outline(&self, node: NodeId) -> ChapterOutline {
        let entry = &self[node];
        ChapterOutline {
            title: entry.title.clone(),
            level: entry.level,
            href: entry.href.clone(),
            anchor: entry.anchor.clone(),
            paragraph_count: entry.paragraphs.len(),
            children: entry
                .children
                .iter()
                .map(|&child| self.to_outline(child))
                .collect(),
        }
    }

    /// Leaves below `node` in document order.
    pub fn leaves(&self, node: NodeId) -> Vec<NodeId> {
        self.flatten(node, None)
            .into_iter()
            .filter(|&id| self[id].is_leaf())
            .collect()
    }
}

impl ChapterNode {
    fn detached(&self) -> ChapterNode {
        ChapterNode {
            title: self.title.clone(),
            href: self.href.clone(),
            anchor: self.anchor.clone(),
            paragraphs: self.paragraphs.clone(),
            ..Default::default()
        }
    }
}

impl Index<NodeId> for ChapterTree {
    type Output = ChapterNode;

    fn index(&self, id: NodeId) -> &ChapterNode {
        &self.nodes[id.0]
    }
}

impl IndexMut<NodeId> for ChapterTree {
    fn index_mut(&mut self, id: NodeId) -> &mut ChapterNode {
        &mut self.nodes[id.0]
    }
}
