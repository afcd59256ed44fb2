//! Chain Resolver
//!
//! Follows a matched rule's target through the rule set until it stops
//! matching, leaves the site, or the hop cap is hit. The cap is the only cycle
//! guard: `a -> b -> a` is a legal rule set and must terminate.

use std::sync::Arc;

use log::{debug, warn};

use crate::config::EngineConfig;
use crate::matcher::{MatchedRule, Matcher};
use crate::store::RuleStore;
use crate::types::{MappingRule, RuleTarget, TargetKind, Trace, TraceEntry, TraceHop};
use crate::url::{extract_host, is_external, join_links, normalize_host, set_query_param};

/// Final step of a resolved chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub rule: MappingRule,
    pub target: String,
    pub status_code: u16,
}

/// Literal redirect target of a matched rule, or `None` when it renders to
/// nothing (stale node, empty substitution).
pub fn render_target(matched: &MatchedRule<'_>, store: &dyn RuleStore, config: &EngineConfig) -> Option<String> {
    match &matched.rule.rule.target {
        RuleTarget::Node(node) => {
            let url = store.find_live_node(*node)?;
            Some(node_link(url, &config.base_url))
        }
        RuleTarget::Link(_) => {
            let link = matched.rule.substitute(&matched.subject)?;
            let link = link.trim();
            if link.is_empty() {
                return None;
            }

            if is_external(link) {
                if config.mark_external_targets && leaves_site(link, config) {
                    Some(set_query_param(link, &config.bypass_parameter, "1"))
                } else {
                    Some(link.to_string())
                }
            } else {
                Some(join_links(&config.base_url, link))
            }
        }
    }
}

/// Redirect form of a node URL. The home page lives at the base URL, which a
/// redirect would not leave, so it is linked as `{base}home/`.
pub(crate) fn node_link(url: String, base_url: &str) -> String {
    if url == base_url {
        join_links(base_url, "home/")
    } else {
        url
    }
}

/// Whether `target` points off the site. Absolute URLs on the host of an
/// absolute `base_url` are still internal.
pub fn leaves_site(target: &str, config: &EngineConfig) -> bool {
    if !is_external(target) {
        return false;
    }
    match extract_host(&config.base_url).and_then(normalize_host) {
        Some(site) => extract_host(target).and_then(normalize_host).as_deref() != Some(site.as_str()),
        None => true,
    }
}

/// Resolves requests by following rule chains.
pub struct ChainResolver {
    store: Arc<dyn RuleStore>,
    config: Arc<EngineConfig>,
}

impl ChainResolver {
    pub fn new(store: Arc<dyn RuleStore>, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    /// Final target and status, or `None` when nothing matched or the chain
    /// hit the hop cap.
    pub fn resolve(&self, url: &str, host: Option<&str>) -> Option<Resolved> {
        let trace = self.walk(url, host);
        if trace.limit_exceeded() {
            return None;
        }

        let hop = trace.entries.into_iter().rev().find_map(|entry| match entry {
            TraceEntry::Hop(hop) => Some(hop),
            TraceEntry::LimitExceeded { .. } => None,
        })?;

        Some(Resolved {
            status_code: hop.rule.effective_status(self.config.default_status),
            rule: hop.rule,
            target: hop.target,
        })
    }

    /// Every rule visited, ending in a limit marker when the cap was hit.
    pub fn trace(&self, url: &str, host: Option<&str>) -> Trace {
        self.walk(url, host)
    }

    fn walk(&self, url: &str, host: Option<&str>) -> Trace {
        let config = self.config.as_ref();
        let store = self.store.as_ref();
        // One snapshot for the whole chain
        let rules = store.rules();
        let matcher = Matcher::new(&rules, store, config);

        let mut trace = Trace::default();

        let mut current = match matcher.find(url, host) {
            Some(matched) => matched,
            None => return trace,
        };
        let mut target = match render_target(&current, store, config) {
            Some(target) => target,
            None => return trace,
        };

        let mut counter = 1;
        trace.entries.push(hop(counter, &current, &target));

        loop {
            let follow_node = current.rule.rule.target.kind() == TargetKind::Node && config.reresolve_node_targets;
            if leaves_site(&target, config) && !follow_node {
                break;
            }

            let next = match matcher.find(&target, host) {
                Some(next) => next,
                None => break,
            };

            counter += 1;
            if counter >= config.maximum_hops {
                warn!(
                    "Redirect chain for '{}' reached the limit of {} hops at rule {}",
                    url,
                    config.maximum_hops,
                    next.rule.id()
                );
                trace.entries.push(TraceEntry::LimitExceeded {
                    maximum_hops: config.maximum_hops,
                });
                break;
            }

            let rendered = match render_target(&next, store, config) {
                Some(rendered) => rendered,
                None => break,
            };

            debug!("Hop {}: rule {} -> '{}'", counter, next.rule.id(), rendered);
            current = next;
            target = rendered;
            trace.entries.push(hop(counter, &current, &target));
        }

        trace
    }
}

fn hop(counter: usize, matched: &MatchedRule<'_>, target: &str) -> TraceEntry {
    TraceEntry::Hop(TraceHop {
        counter,
        rule: matched.rule.rule.clone(),
        target: target.to_string(),
    })
}
