//! Arena-backed page tree
//!
//! Nodes live in a flat `Vec` and reference each other by index. Every walk
//! (URL building, child lookup, subtree traversal) is a loop over indices, so
//! deep trees never recurse.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::{NodeDirectory, NodeTreeStore};
use crate::types::{FallbackRule, NodeId};
use crate::url::{join_links, unify};

/// Segment of the root page whose URL is the site base URL.
pub const HOME_SEGMENT: &str = "home";

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("Node {0} already exists")]
    DuplicateNode(NodeId),
    #[error("Parent node {0} does not exist")]
    UnknownParent(NodeId),
    #[error("Node {0} does not exist")]
    UnknownNode(NodeId),
    #[error("Node {0} has an empty URL segment")]
    EmptySegment(NodeId),
}

#[derive(Debug, Clone)]
struct TreeNode {
    id: NodeId,
    parent: Option<usize>,
    segment: String,
    published: bool,
    fallback: Option<FallbackRule>,
    children: Vec<usize>,
}

/// Page hierarchy with per-node fallback rules.
#[derive(Debug, Clone)]
pub struct SiteTree {
    nodes: Vec<TreeNode>,
    index: HashMap<NodeId, usize>,
    roots: Vec<usize>,
    base_url: String,
    root_fallback: Option<FallbackRule>,
}

impl Default for SiteTree {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SiteTree {
    pub fn new(base_url: &str) -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            roots: Vec::new(),
            base_url: base_url.to_string(),
            root_fallback: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Add a published node below `parent` (or at the top level).
    pub fn add_node(&mut self, id: NodeId, parent: Option<NodeId>, segment: &str) -> Result<(), TreeError> {
        if self.index.contains_key(&id) {
            return Err(TreeError::DuplicateNode(id));
        }

        let segment = unify(segment);
        if segment.is_empty() || segment.contains('/') {
            return Err(TreeError::EmptySegment(id));
        }

        let parent_idx = match parent {
            Some(parent) => Some(*self.index.get(&parent).ok_or(TreeError::UnknownParent(parent))?),
            None => None,
        };

        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            id,
            parent: parent_idx,
            segment,
            published: true,
            fallback: None,
            children: Vec::new(),
        });
        self.index.insert(id, idx);

        match parent_idx {
            Some(p) => self.nodes[p].children.push(idx),
            None => self.roots.push(idx),
        }

        Ok(())
    }

    pub fn set_fallback(&mut self, id: NodeId, fallback: Option<FallbackRule>) -> Result<(), TreeError> {
        let idx = self.idx(id)?;
        self.nodes[idx].fallback = fallback;
        Ok(())
    }

    pub fn set_root_fallback(&mut self, fallback: Option<FallbackRule>) {
        self.root_fallback = fallback;
    }

    pub fn set_published(&mut self, id: NodeId, published: bool) -> Result<(), TreeError> {
        let idx = self.idx(id)?;
        self.nodes[idx].published = published;
        Ok(())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Every node below `id`, parents before children, siblings in insertion
    /// order.
    pub fn descendants(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        let start = self.idx(id)?;
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[start].children.iter().rev().copied().collect();

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            out.push(node.id);
            stack.extend(node.children.iter().rev().copied());
        }

        Ok(out)
    }

    /// Top-level nodes, in insertion order.
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots.iter().map(move |&idx| self.nodes[idx].id)
    }

    /// URL of a node: the base URL joined with every segment from the top
    /// level down, with a trailing `/`. The top-level `home` page is the base
    /// URL itself.
    pub fn url_of(&self, id: NodeId) -> Option<String> {
        let mut idx = *self.index.get(&id)?;

        if self.nodes[idx].parent.is_none() && self.nodes[idx].segment == HOME_SEGMENT {
            return Some(self.base_url.clone());
        }

        let mut segments: Vec<&str> = Vec::new();
        loop {
            let node = &self.nodes[idx];
            segments.push(&node.segment);
            match node.parent {
                Some(parent) => idx = parent,
                None => break,
            }
        }
        segments.reverse();

        let mut url = join_links(&self.base_url, &segments.join("/"));
        url.push('/');
        Some(url)
    }

    /// Whether the node and every ancestor is published.
    pub fn is_live(&self, id: NodeId) -> bool {
        let mut cursor = self.index.get(&id).copied();
        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            if !node.published {
                return false;
            }
            cursor = node.parent;
        }
        self.index.contains_key(&id)
    }

    fn idx(&self, id: NodeId) -> Result<usize, TreeError> {
        self.index.get(&id).copied().ok_or(TreeError::UnknownNode(id))
    }

    /// Build a tree from its serialized description. Parents must precede
    /// their children.
    pub fn from_spec(spec: &TreeSpec) -> Result<Self, TreeError> {
        let mut tree = Self::new(&spec.base_url);
        tree.root_fallback = spec.root_fallback.clone();

        for node in &spec.nodes {
            tree.add_node(node.id, node.parent, &node.segment)?;
            if !node.published {
                tree.set_published(node.id, false)?;
            }
            if node.fallback.is_some() {
                tree.set_fallback(node.id, node.fallback.clone())?;
            }
        }

        Ok(tree)
    }
}

impl NodeTreeStore for SiteTree {
    fn find_child(&self, parent: Option<NodeId>, segment: &str) -> Option<NodeId> {
        let children = match parent {
            Some(parent) => &self.nodes[*self.index.get(&parent)?].children,
            None => &self.roots,
        };
        children
            .iter()
            .map(|&idx| &self.nodes[idx])
            .find(|node| node.published && node.segment == segment)
            .map(|node| node.id)
    }

    fn node_url(&self, node: NodeId) -> String {
        self.url_of(node).unwrap_or_else(|| self.base_url.clone())
    }

    fn node_fallback(&self, node: NodeId) -> Option<FallbackRule> {
        self.nodes[*self.index.get(&node)?].fallback.clone()
    }

    fn root_fallback(&self) -> Option<FallbackRule> {
        self.root_fallback.clone()
    }
}

impl NodeDirectory for SiteTree {
    fn live_url(&self, node: NodeId) -> Option<String> {
        if !self.is_live(node) {
            return None;
        }
        self.url_of(node)
    }
}

// =============================================================================
// Serialized Form
// =============================================================================

/// JSON/YAML description of a page tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeSpec {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_fallback: Option<FallbackRule>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

fn default_base_url() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    pub segment: String,
    #[serde(default = "default_published")]
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackRule>,
}

fn default_published() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SiteTree {
        let mut tree = SiteTree::new("/");
        tree.add_node(NodeId(1), None, "home").unwrap();
        tree.add_node(NodeId(2), None, "a").unwrap();
        tree.add_node(NodeId(3), Some(NodeId(2)), "b").unwrap();
        tree.add_node(NodeId(4), Some(NodeId(3)), "c").unwrap();
        tree.add_node(NodeId(5), Some(NodeId(2)), "d").unwrap();
        tree
    }

    #[test]
    fn test_node_urls() {
        let tree = sample();
        assert_eq!(tree.url_of(NodeId(1)).as_deref(), Some("/"));
        assert_eq!(tree.url_of(NodeId(2)).as_deref(), Some("/a/"));
        assert_eq!(tree.url_of(NodeId(4)).as_deref(), Some("/a/b/c/"));
        assert_eq!(tree.url_of(NodeId(99)), None);
    }

    #[test]
    fn test_base_url_prefix() {
        let mut tree = SiteTree::new("/sub/");
        tree.add_node(NodeId(1), None, "Page").unwrap();
        assert_eq!(tree.url_of(NodeId(1)).as_deref(), Some("/sub/page/"));
    }

    #[test]
    fn test_find_child() {
        let tree = sample();
        assert_eq!(tree.find_child(None, "a"), Some(NodeId(2)));
        assert_eq!(tree.find_child(Some(NodeId(2)), "b"), Some(NodeId(3)));
        assert_eq!(tree.find_child(Some(NodeId(2)), "c"), None);
        assert_eq!(tree.find_child(Some(NodeId(99)), "b"), None);
    }

    #[test]
    fn test_descendants_order() {
        let tree = sample();
        assert_eq!(
            tree.descendants(NodeId(2)).unwrap(),
            vec![NodeId(3), NodeId(4), NodeId(5)]
        );
        assert!(tree.descendants(NodeId(4)).unwrap().is_empty());
        assert!(matches!(tree.descendants(NodeId(99)), Err(TreeError::UnknownNode(_))));
    }

    #[test]
    fn test_deep_tree_walks_without_recursion() {
        let mut tree = SiteTree::new("/");
        tree.add_node(NodeId(0), None, "n0").unwrap();
        for i in 1..20_000u32 {
            tree.add_node(NodeId(i), Some(NodeId(i - 1)), &format!("n{}", i)).unwrap();
        }
        assert_eq!(tree.descendants(NodeId(0)).unwrap().len(), 19_999);
        assert!(tree.url_of(NodeId(19_999)).is_some());
    }

    #[test]
    fn test_unpublished_ancestor_hides_node() {
        let mut tree = sample();
        tree.set_published(NodeId(2), false).unwrap();
        assert_eq!(tree.live_url(NodeId(4)), None);
        assert_eq!(tree.find_child(None, "a"), None);
        assert_eq!(tree.live_url(NodeId(1)).as_deref(), Some("/"));
    }

    #[test]
    fn test_add_node_errors() {
        let mut tree = sample();
        assert!(matches!(tree.add_node(NodeId(1), None, "x"), Err(TreeError::DuplicateNode(_))));
        assert!(matches!(
            tree.add_node(NodeId(50), Some(NodeId(99)), "x"),
            Err(TreeError::UnknownParent(_))
        ));
        assert!(matches!(tree.add_node(NodeId(51), None, " / "), Err(TreeError::EmptySegment(_))));
    }

    #[test]
    fn test_from_spec() {
        let spec: TreeSpec = serde_json::from_str(
            r#"{
                "root_fallback": {"policy": "explicit_url", "explicit_url": "/search"},
                "nodes": [
                    {"id": 1, "segment": "a"},
                    {"id": 2, "parent": 1, "segment": "b", "fallback": {"policy": "nearest_ancestor"}},
                    {"id": 3, "parent": 1, "segment": "draft", "published": false}
                ]
            }"#,
        )
        .unwrap();
        let tree = SiteTree::from_spec(&spec).unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.node_fallback(NodeId(2)), Some(FallbackRule::nearest_ancestor()));
        assert_eq!(tree.root_fallback(), Some(FallbackRule::explicit("/search")));
        assert_eq!(tree.live_url(NodeId(3)), None);
    }
}
