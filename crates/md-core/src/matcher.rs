//! Rule Matcher
//!
//! Selects the single best mapping rule for a request. Candidates are
//! collected in one pass over the rule snapshot, ordered by precedence, and
//! the first one whose target is still live wins.

use std::cmp::Ordering;

use log::debug;

use crate::config::{EngineConfig, IdOrder, TypeOrder};
use crate::store::{CompiledRule, RuleSet, RuleStore};
use crate::types::{PatternType, RuleTarget};
use crate::url::{extract_host, make_relative, normalize, normalize_host, parse_query, split_query, strip_origin};

// =============================================================================
// Matcher
// =============================================================================

/// A rule bound to the text it matched.
#[derive(Debug, Clone)]
pub struct MatchedRule<'r> {
    pub rule: &'r CompiledRule,
    /// Normalized path (or `host/path`) the rule was matched against. Pattern
    /// rule backreferences are substituted from this.
    pub subject: String,
}

struct MatchCandidate<'r> {
    rule: &'r CompiledRule,
    host_scoped: bool,
}

/// Matches requests against one rule snapshot.
pub struct Matcher<'a> {
    rules: &'a RuleSet,
    store: &'a dyn RuleStore,
    config: &'a EngineConfig,
}

impl<'a> Matcher<'a> {
    pub fn new(rules: &'a RuleSet, store: &'a dyn RuleStore, config: &'a EngineConfig) -> Self {
        Self { rules, store, config }
    }

    /// Best rule for `url`. An absolute `url` supplies its own host;
    /// otherwise `host` is used.
    pub fn find(&self, url: &str, host: Option<&str>) -> Option<MatchedRule<'a>> {
        if self.rules.is_empty() {
            return None;
        }

        let host = extract_host(url).or(host).and_then(normalize_host);
        let site_base = strip_origin(&self.config.base_url);
        let normalized = normalize(make_relative(strip_origin(url.trim()), site_base));
        let (path, query) = split_query(&normalized);
        let params = parse_query(query.unwrap_or(""));
        let host_subject = host.as_ref().map(|host| format!("{}/{}", host, path));

        // Step 1: Collect candidates
        let mut candidates: Vec<MatchCandidate<'a>> = Vec::new();
        for compiled in self.rules.iter() {
            if let Some(restriction) = compiled.restriction() {
                if host.as_deref() != Some(restriction) {
                    continue;
                }
            }

            let host_scoped = compiled.rule.includes_hostname;
            let subject = if host_scoped {
                match &host_subject {
                    Some(subject) => subject.as_str(),
                    None => continue,
                }
            } else {
                path
            };

            let matched = match compiled.rule.pattern_type {
                PatternType::Exact => {
                    // Stored exact patterns carry no trailing `/`, so a host's root is the bare host
                    compiled.base() == subject.strip_suffix('/').unwrap_or(subject)
                        && compiled.query().map_or(true, |required| *required == params)
                }
                PatternType::Pattern => compiled.regex().map_or(false, |re| re.is_match(subject)),
            };

            if matched {
                candidates.push(MatchCandidate {
                    rule: compiled,
                    host_scoped,
                });
            }
        }

        if candidates.is_empty() {
            return None;
        }

        // Step 2: Apply precedence
        candidates.sort_by(|a, b| self.precedence(a.rule, b.rule));

        // Step 3: First candidate with a live target
        for candidate in candidates {
            if let RuleTarget::Node(node) = candidate.rule.rule.target {
                if self.store.find_live_node(node).is_none() {
                    debug!("Skipping rule {}: node {} is not live", candidate.rule.id(), node);
                    continue;
                }
            }

            let subject = if candidate.host_scoped {
                host_subject.clone().unwrap_or_default()
            } else {
                path.to_string()
            };
            debug!("Rule {} matched '{}'", candidate.rule.id(), subject);

            return Some(MatchedRule {
                rule: candidate.rule,
                subject,
            });
        }

        None
    }

    /// Priority DESC, pattern type per `type_order`, pattern DESC, then id
    /// per `id_order`.
    fn precedence(&self, a: &CompiledRule, b: &CompiledRule) -> Ordering {
        b.rule
            .priority
            .cmp(&a.rule.priority)
            .then_with(|| self.type_rank(a).cmp(&self.type_rank(b)))
            .then_with(|| b.rule.pattern.cmp(&a.rule.pattern))
            .then_with(|| match self.config.id_order {
                IdOrder::Ascending => a.id().cmp(&b.id()),
                IdOrder::Descending => b.id().cmp(&a.id()),
            })
    }

    #[inline]
    fn type_rank(&self, rule: &CompiledRule) -> u8 {
        match (self.config.type_order, rule.rule.pattern_type) {
            (TypeOrder::ExactFirst, PatternType::Exact) | (TypeOrder::PatternFirst, PatternType::Pattern) => 0,
            _ => 1,
        }
    }
}
