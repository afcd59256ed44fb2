//! Fallback Resolver
//!
//! Answers "where should a request for a missing page go" by walking the page
//! tree along the request path and inheriting the deepest fallback rule.

use std::sync::Arc;

use log::debug;

use crate::chain::node_link;
use crate::config::EngineConfig;
use crate::store::NodeTreeStore;
use crate::types::{FallbackPolicy, FallbackRule, NodeId, Redirect};
use crate::url::{is_external, join_links, make_relative, normalize, split_query, strip_origin};

/// State accumulated while descending the tree.
struct FallbackWalk {
    rule: Option<FallbackRule>,
    nearest_ancestor: String,
    this_node: String,
}

pub struct FallbackResolver {
    tree: Arc<dyn NodeTreeStore>,
    config: Arc<EngineConfig>,
}

impl FallbackResolver {
    pub fn new(tree: Arc<dyn NodeTreeStore>, config: Arc<EngineConfig>) -> Self {
        Self { tree, config }
    }

    /// Fallback redirect for a request whose page does not exist.
    ///
    /// Returns `None` when the path is the site root, when the requested
    /// page does exist, when no fallback rule applies, or when the rule
    /// renders an empty target.
    pub fn resolve(&self, url: &str) -> Option<Redirect> {
        let base = self.config.base_url.as_str();
        let normalized = normalize(make_relative(strip_origin(url.trim()), strip_origin(base)));
        let (path, _) = split_query(&normalized);
        if path.is_empty() {
            return None;
        }

        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let leaf = segments.pop()?;

        let mut walk = FallbackWalk {
            rule: self.tree.root_fallback(),
            nearest_ancestor: base.to_string(),
            this_node: base.to_string(),
        };

        let mut parent: Option<NodeId> = None;
        let mut truncated = false;
        for segment in &segments {
            let node = match self.tree.find_child(parent, segment) {
                Some(node) => node,
                None => {
                    truncated = true;
                    break;
                }
            };

            let node_url = node_link(self.tree.node_url(node), base);
            if let Some(rule) = self.tree.node_fallback(node) {
                walk.rule = Some(rule);
                walk.this_node = node_url.clone();
            }
            walk.nearest_ancestor = node_url;
            parent = Some(node);
        }

        if !truncated && self.tree.find_child(parent, leaf).is_some() {
            return None;
        }

        let rule = walk.rule?;
        let target = match rule.policy {
            FallbackPolicy::NearestAncestor => walk.nearest_ancestor,
            FallbackPolicy::ThisNode => walk.this_node,
            FallbackPolicy::ExplicitUrl => {
                let explicit = rule.explicit_url.as_deref().map(str::trim).unwrap_or("");
                if explicit.is_empty() {
                    return None;
                }
                if is_external(explicit) {
                    explicit.to_string()
                } else {
                    join_links(base, explicit)
                }
            }
        };

        if target.is_empty() {
            return None;
        }

        let status_code = if rule.status_code == 0 {
            self.config.fallback_status
        } else {
            rule.status_code
        };

        debug!("Fallback for '{}' -> '{}' ({:?})", url, target, rule.policy);
        Some(Redirect { target, status_code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tree::SiteTree;

    fn resolver(tree: SiteTree) -> FallbackResolver {
        FallbackResolver::new(Arc::new(tree), Arc::new(EngineConfig::default()))
    }

    fn ab_tree() -> SiteTree {
        let mut tree = SiteTree::new("/");
        tree.add_node(NodeId(1), None, "a").unwrap();
        tree.add_node(NodeId(2), Some(NodeId(1)), "b").unwrap();
        tree.set_fallback(NodeId(2), Some(FallbackRule::nearest_ancestor())).unwrap();
        tree
    }

    #[test]
    fn test_nearest_ancestor_with_rule() {
        let redirect = resolver(ab_tree()).resolve("/a/b/c").unwrap();
        assert_eq!(redirect.target, "/a/b/");
        assert_eq!(redirect.status_code, 303);
    }

    #[test]
    fn test_nearest_ancestor_below_rule_node() {
        let mut tree = SiteTree::new("/");
        tree.add_node(NodeId(1), None, "a").unwrap();
        tree.add_node(NodeId(2), Some(NodeId(1)), "b").unwrap();
        tree.set_fallback(NodeId(1), Some(FallbackRule::nearest_ancestor())).unwrap();

        let redirect = resolver(tree.clone()).resolve("/a/b/c/d").unwrap();
        assert_eq!(redirect.target, "/a/b/");

        tree.set_fallback(NodeId(1), Some(FallbackRule::this_node().with_status(302))).unwrap();
        let redirect = resolver(tree).resolve("/a/b/c/d").unwrap();
        assert_eq!(redirect.target, "/a/");
        assert_eq!(redirect.status_code, 302);
    }

    #[test]
    fn test_home_page_links_as_home() {
        let mut tree = SiteTree::new("/");
        tree.add_node(NodeId(1), None, "home").unwrap();
        tree.set_fallback(NodeId(1), Some(FallbackRule::this_node())).unwrap();
        assert_eq!(resolver(tree.clone()).resolve("/home/missing").map(|r| r.target), Some("/home/".to_string()));

        tree.set_fallback(NodeId(1), Some(FallbackRule::nearest_ancestor())).unwrap();
        assert_eq!(resolver(tree).resolve("/home/missing").map(|r| r.target), Some("/home/".to_string()));
    }

    #[test]
    fn test_root_explicit_url() {
        let mut tree = SiteTree::new("/");
        tree.set_root_fallback(Some(FallbackRule::explicit("search")));
        let redirect = resolver(tree).resolve("/anything/here").unwrap();
        assert_eq!(redirect.target, "/search");

        let mut tree = SiteTree::new("/");
        tree.set_root_fallback(Some(FallbackRule::explicit("https://www.other.com/404")));
        let redirect = resolver(tree).resolve("/missing").unwrap();
        assert_eq!(redirect.target, "https://www.other.com/404");
    }

    #[test]
    fn test_deeper_rule_overrides_root() {
        let mut tree = ab_tree();
        tree.set_root_fallback(Some(FallbackRule::explicit("/search")));
        assert_eq!(resolver(tree.clone()).resolve("/a/b/c").map(|r| r.target), Some("/a/b/".to_string()));
        assert_eq!(resolver(tree).resolve("/z/y").map(|r| r.target), Some("/search".to_string()));
    }

    #[test]
    fn test_no_rule_no_fallback() {
        let mut tree = SiteTree::new("/");
        tree.add_node(NodeId(1), None, "a").unwrap();
        assert_eq!(resolver(tree).resolve("/a/missing"), None);
    }

    #[test]
    fn test_existing_page_has_no_fallback() {
        assert_eq!(resolver(ab_tree()).resolve("/a/b"), None);
        assert_eq!(resolver(ab_tree()).resolve("/"), None);
    }

    #[test]
    fn test_query_is_ignored() {
        let redirect = resolver(ab_tree()).resolve("/a/b/c?x=1").unwrap();
        assert_eq!(redirect.target, "/a/b/");
    }

    #[test]
    fn test_empty_explicit_url() {
        let mut tree = SiteTree::new("/");
        tree.set_root_fallback(Some(FallbackRule::explicit(" ")));
        assert_eq!(resolver(tree).resolve("/missing"), None);
    }
}
