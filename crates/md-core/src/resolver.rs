//! Request Entry Point
//!
//! `Misdirector` is what the host pipeline talks to. It owns one chain
//! resolver and, when a page tree is available, one fallback resolver, and
//! decides per request which of them gets a say.

use std::sync::Arc;

use log::debug;

use crate::chain::{leaves_site, ChainResolver, Resolved};
use crate::config::EngineConfig;
use crate::fallback::FallbackResolver;
use crate::store::{NodeTreeStore, RuleStore};
use crate::types::{Decision, Redirect, RequestContext, Resolution, Trace};
use crate::url::{
    extract_host, has_truthy_param, is_external, join_links, make_relative, merge_query, normalize_host,
    set_query_param, strip_origin,
};

pub struct Misdirector {
    chain: ChainResolver,
    fallback: Option<FallbackResolver>,
    config: Arc<EngineConfig>,
}

impl Misdirector {
    pub fn new(store: Arc<dyn RuleStore>, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        Self {
            chain: ChainResolver::new(store, config.clone()),
            fallback: None,
            config,
        }
    }

    /// Enable fallback resolution over this page tree.
    pub fn with_tree(mut self, tree: Arc<dyn NodeTreeStore>) -> Self {
        self.fallback = Some(FallbackResolver::new(tree, self.config.clone()));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Final redirect for a request, or `None` when no mapping applies or the
    /// chain hit the hop cap.
    pub fn resolve(&self, url: &str, host: Option<&str>) -> Option<Redirect> {
        self.resolve_mapping(url, host).map(|resolved| Redirect {
            target: resolved.target,
            status_code: resolved.status_code,
        })
    }

    /// Every rule visited while resolving a request.
    pub fn resolve_trace(&self, url: &str, host: Option<&str>) -> Trace {
        self.chain.trace(url, host)
    }

    /// Fallback redirect for a missing page. Always `None` without a tree.
    pub fn resolve_fallback(&self, url: &str) -> Option<Redirect> {
        self.fallback.as_ref()?.resolve(url)
    }

    fn resolve_mapping(&self, url: &str, host: Option<&str>) -> Option<Resolved> {
        let mut resolved = self.chain.resolve(url, host)?;
        resolved.target = self.apply_domain_parameters(resolved.target);
        Some(resolved)
    }

    fn apply_domain_parameters(&self, target: String) -> String {
        if self.config.domain_parameters.is_empty() || !is_external(&target) {
            return target;
        }

        let host = match extract_host(&target).and_then(normalize_host) {
            Some(host) => host,
            None => return target,
        };

        self.config
            .domain_parameters
            .iter()
            .filter(|entry| normalize_host(&entry.domain).as_deref() == Some(host.as_str()))
            .fold(target, |target, entry| merge_query(&target, &entry.parameters))
    }

    /// Decide what to do with a request after the pipeline produced
    /// `request.status` for it.
    pub fn handle(&self, request: &RequestContext<'_>) -> Resolution {
        if self.is_bypassed(request) {
            debug!("Bypassing '{}'", request.path);
            return Resolution::default();
        }

        let config = self.config.as_ref();
        let url = request.url();
        let not_found = request.status == 404;

        if not_found || config.enforce_misdirection || config.replace_default {
            if let Some(resolved) = self.resolve_mapping(&url, request.host) {
                let mut location = resolved.target;
                if config.replace_default && location == join_links(&config.base_url, "home/") {
                    location = config.base_url.clone();
                }
                return Resolution {
                    decision: Decision::Redirect,
                    rule_id: Some(resolved.rule.id),
                    from_fallback: false,
                    location: Some(location),
                    status_code: resolved.status_code,
                };
            }
        }

        if not_found {
            if let Some(redirect) = self.resolve_fallback(&url) {
                // Mark internal fallbacks so the next request is not resolved again
                let location = if leaves_site(&redirect.target, config) {
                    redirect.target
                } else {
                    set_query_param(&redirect.target, &config.bypass_parameter, "1")
                };
                return Resolution {
                    decision: Decision::Redirect,
                    rule_id: None,
                    from_fallback: true,
                    location: Some(location),
                    status_code: redirect.status_code,
                };
            }
        }

        if config.replace_default && !(200..300).contains(&request.status) {
            return Resolution {
                decision: Decision::NotFound,
                status_code: 404,
                ..Resolution::default()
            };
        }

        Resolution::default()
    }

    fn is_bypassed(&self, request: &RequestContext<'_>) -> bool {
        if let Some(query) = request.query {
            if self
                .config
                .bypass_parameters
                .iter()
                .any(|param| has_truthy_param(query, param))
            {
                return true;
            }
        }

        let path = make_relative(request.path, strip_origin(&self.config.base_url))
            .trim_start_matches('/')
            .to_ascii_lowercase();
        self.config.bypass_prefixes.iter().any(|prefix| {
            let prefix = prefix.trim_matches('/').to_ascii_lowercase();
            !prefix.is_empty()
                && path.starts_with(&prefix)
                && matches!(path.as_bytes().get(prefix.len()), None | Some(b'/') | Some(b'?'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::DomainParameter;
    use crate::store::MemoryRuleStore;
    use crate::tree::SiteTree;
    use crate::types::{FallbackRule, MappingRule, NodeId};

    fn misdirector(rules: Vec<MappingRule>, config: EngineConfig) -> Misdirector {
        let store = MemoryRuleStore::with_rules(rules).unwrap();
        Misdirector::new(Arc::new(store), config)
    }

    fn fallback_tree() -> Arc<SiteTree> {
        let mut tree = SiteTree::new("/");
        tree.add_node(NodeId(1), None, "wrong").unwrap();
        tree.set_fallback(NodeId(1), Some(FallbackRule::this_node())).unwrap();
        Arc::new(tree)
    }

    #[test]
    fn test_resolve() {
        let engine = misdirector(
            vec![MappingRule::link("wrong/page", "correct/page")],
            EngineConfig::default(),
        );
        assert_eq!(
            engine.resolve("/wrong/page", None),
            Some(Redirect {
                target: "/correct/page".to_string(),
                status_code: 301,
            })
        );
        assert_eq!(engine.resolve("/correct/page", None), None);
    }

    #[test]
    fn test_resolve_fallback_without_tree() {
        let engine = misdirector(Vec::new(), EngineConfig::default());
        assert_eq!(engine.resolve_fallback("/a/b/c"), None);
    }

    #[test]
    fn test_handle_mapping_first() {
        let engine = misdirector(
            vec![MappingRule::link("wrong/page", "correct/page").with_status(302)],
            EngineConfig::default(),
        )
        .with_tree(fallback_tree());

        let resolution = engine.handle(&RequestContext::new("/wrong/page"));
        assert_eq!(resolution.decision, Decision::Redirect);
        assert_eq!(resolution.rule_id, Some(1));
        assert!(!resolution.from_fallback);
        assert_eq!(resolution.location.as_deref(), Some("/correct/page"));
        assert_eq!(resolution.status_code, 302);
    }

    #[test]
    fn test_handle_fallback_carries_bypass_marker() {
        let engine = misdirector(Vec::new(), EngineConfig::default()).with_tree(fallback_tree());

        let resolution = engine.handle(&RequestContext::new("/wrong/missing"));
        assert_eq!(resolution.decision, Decision::Redirect);
        assert!(resolution.from_fallback);
        assert_eq!(resolution.location.as_deref(), Some("/wrong/?misdirected=1"));
        assert_eq!(resolution.status_code, 303);

        let again = engine.handle(&RequestContext::new("/wrong/").with_query("misdirected=1"));
        assert_eq!(again.decision, Decision::Continue);
    }

    #[test]
    fn test_fallback_marker_with_absolute_base() {
        let config = EngineConfig {
            base_url: "https://www.site.com/".to_string(),
            ..EngineConfig::default()
        };
        let mut tree = SiteTree::new("https://www.site.com/");
        tree.add_node(NodeId(1), None, "wrong").unwrap();
        tree.set_fallback(NodeId(1), Some(FallbackRule::this_node())).unwrap();
        let engine = misdirector(Vec::new(), config).with_tree(Arc::new(tree));

        let resolution = engine.handle(&RequestContext::new("/wrong/missing"));
        assert_eq!(
            resolution.location.as_deref(),
            Some("https://www.site.com/wrong/?misdirected=1")
        );
    }

    #[test]
    fn test_fallback_only_on_not_found() {
        let engine = misdirector(Vec::new(), EngineConfig::default()).with_tree(fallback_tree());
        let resolution = engine.handle(&RequestContext::new("/wrong/missing").with_status(200));
        assert_eq!(resolution.decision, Decision::Continue);
    }

    #[test]
    fn test_enforce_misdirection() {
        let rules = vec![MappingRule::link("page", "elsewhere")];
        let engine = misdirector(rules.clone(), EngineConfig::default());
        let request = RequestContext::new("/page").with_status(200);
        assert_eq!(engine.handle(&request).decision, Decision::Redirect);

        let config = EngineConfig {
            enforce_misdirection: false,
            ..EngineConfig::default()
        };
        let engine = misdirector(rules, config);
        assert_eq!(engine.handle(&request).decision, Decision::Continue);
        assert_eq!(engine.handle(&RequestContext::new("/page")).decision, Decision::Redirect);
    }

    #[test]
    fn test_bypass_prefixes() {
        let engine = misdirector(
            vec![MappingRule::link("admin/pages", "x"), MappingRule::link("developers", "y")],
            EngineConfig::default(),
        );
        assert_eq!(engine.handle(&RequestContext::new("/admin/pages")).decision, Decision::Continue);
        assert_eq!(engine.handle(&RequestContext::new("/Admin/pages")).decision, Decision::Continue);
        assert_eq!(engine.handle(&RequestContext::new("/developers")).decision, Decision::Redirect);
    }

    #[test]
    fn test_bypass_parameters() {
        let engine = misdirector(vec![MappingRule::link("page", "x")], EngineConfig::default());
        let direct = RequestContext::new("/page").with_query("direct=1");
        assert_eq!(engine.handle(&direct).decision, Decision::Continue);
        let falsy = RequestContext::new("/page").with_query("direct=0");
        assert_eq!(engine.handle(&falsy).decision, Decision::Redirect);
    }

    #[test]
    fn test_replace_default() {
        let mut tree = SiteTree::new("/");
        tree.add_node(NodeId(1), None, "home").unwrap();
        let store = MemoryRuleStore::with_rules(vec![MappingRule::node("old/home", NodeId(1))])
            .unwrap()
            .with_nodes(Arc::new(tree));

        let config = EngineConfig {
            replace_default: true,
            ..EngineConfig::default()
        };
        let engine = Misdirector::new(Arc::new(store), config);

        let resolution = engine.handle(&RequestContext::new("/old/home"));
        assert_eq!(resolution.location.as_deref(), Some("/"));

        let failed = engine.handle(&RequestContext::new("/broken").with_status(500));
        assert_eq!(failed.decision, Decision::NotFound);
        assert_eq!(failed.status_code, 404);

        let moved = engine.handle(&RequestContext::new("/moved").with_status(302));
        assert_eq!(moved.decision, Decision::NotFound);
        assert_eq!(moved.status_code, 404);

        let ok = engine.handle(&RequestContext::new("/fine").with_status(200));
        assert_eq!(ok.decision, Decision::Continue);
    }

    #[test]
    fn test_domain_parameters() {
        let config = EngineConfig {
            domain_parameters: vec![DomainParameter {
                domain: "www.partner.com".to_string(),
                parameters: "rf=1&x=y".to_string(),
            }],
            ..EngineConfig::default()
        };
        let engine = misdirector(
            vec![
                MappingRule::link("partner", "https://www.partner.com/landing"),
                MappingRule::link("other", "https://www.other.com/landing"),
            ],
            config,
        );
        assert_eq!(
            engine.resolve("partner", None).map(|r| r.target),
            Some("https://www.partner.com/landing?rf=1&x=y".to_string())
        );
        assert_eq!(
            engine.resolve("other", None).map(|r| r.target),
            Some("https://www.other.com/landing".to_string())
        );
    }

    #[test]
    fn test_trace_through_entry_point() {
        let engine = misdirector(
            vec![
                MappingRule::link("wrong/page", "pending"),
                MappingRule::link("pending", "correct/page"),
            ],
            EngineConfig::default(),
        );
        let trace = engine.resolve_trace("wrong/page", None);
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.last_hop().map(|hop| hop.target.as_str()), Some("/correct/page"));
    }
}
