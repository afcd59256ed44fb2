//! Rule and node collaborators
//!
//! The resolvers only ever see the traits in this module. `MemoryRuleStore`
//! is the in-process implementation: it keeps the compiled rule set behind an
//! `Arc` and publishes a fresh copy on every write, so a resolution that has
//! taken a snapshot never observes a half-applied change.

use std::sync::{Arc, PoisonError, RwLock};

use log::{info, warn};
use regex::{Regex, RegexBuilder};

use crate::types::{
    FallbackRule, MappingRule, NodeId, PatternType, RuleId, RuleTarget, MAX_PRIORITY, MIN_PRIORITY,
};
use crate::url::{normalize, normalize_host, split_query, parse_query, QueryParams};

/// Error type for rule writes.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Empty pattern")]
    EmptyPattern,
    #[error("Invalid regular expression '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Priority {0} outside 1-10")]
    InvalidPriority(u8),
    #[error("Status code {0} is not a redirect (300-399)")]
    InvalidStatus(u16),
    #[error("Link target is empty")]
    EmptyTarget,
    #[error("Unknown rule id: {0}")]
    UnknownRule(RuleId),
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// Source of mapping rules.
pub trait RuleStore: Send + Sync {
    /// Current rule set. The returned snapshot never changes underneath the
    /// caller.
    fn rules(&self) -> Arc<RuleSet>;

    /// Current URL of a node, or `None` when it is not live.
    fn find_live_node(&self, node: NodeId) -> Option<String>;
}

/// Live URL lookup for node targets.
pub trait NodeDirectory: Send + Sync {
    fn live_url(&self, node: NodeId) -> Option<String>;
}

/// Hierarchical page tree consulted by the fallback resolver.
pub trait NodeTreeStore: Send + Sync {
    /// Child of `parent` (or of the site root when `None`) with this
    /// normalized URL segment.
    fn find_child(&self, parent: Option<NodeId>, segment: &str) -> Option<NodeId>;

    fn node_url(&self, node: NodeId) -> String;

    fn node_fallback(&self, node: NodeId) -> Option<FallbackRule>;

    fn root_fallback(&self) -> Option<FallbackRule>;
}

// =============================================================================
// Write-time Validation
// =============================================================================

/// Canonicalize a rule the way it is persisted: exact patterns unified,
/// pattern rules trimmed, link targets stripped of surrounding `/` and `?`.
pub fn prepare_rule(mut rule: MappingRule) -> MappingRule {
    rule.pattern = match rule.pattern_type {
        PatternType::Exact => normalize(&rule.pattern),
        PatternType::Pattern => rule.pattern.trim().to_string(),
    };
    if let RuleTarget::Link(link) = &rule.target {
        rule.target = RuleTarget::Link(link.trim_matches(&[' ', '?', '/'][..]).to_string());
    }
    rule.hostname_restriction = rule.hostname_restriction.as_deref().and_then(normalize_host);
    rule
}

/// Reject rules that could never be evaluated correctly.
pub fn validate_rule(rule: &MappingRule) -> Result<(), RuleError> {
    if rule.pattern.is_empty() {
        return Err(RuleError::EmptyPattern);
    }

    if rule.pattern_type == PatternType::Pattern {
        compile_pattern(&rule.pattern).map_err(|source| RuleError::InvalidPattern {
            pattern: rule.pattern.clone(),
            source,
        })?;
    }

    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&rule.priority) {
        return Err(RuleError::InvalidPriority(rule.priority));
    }

    if rule.status_code != 0 && !(300..400).contains(&rule.status_code) {
        return Err(RuleError::InvalidStatus(rule.status_code));
    }

    if let RuleTarget::Link(link) = &rule.target {
        if link.trim().is_empty() {
            return Err(RuleError::EmptyTarget);
        }
    }

    Ok(())
}

fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Rewrite `\1`, `$1` and `${1}` backreferences into the `regex` crate's
/// `${1}` form and escape every other `$`.
fn translate_replacement(target: &str) -> String {
    let chars: Vec<char> = target.chars().collect();
    let mut out = String::with_capacity(target.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' || c == '$' {
            let braced = c == '$' && chars.get(i + 1) == Some(&'{');
            let start = if braced { i + 2 } else { i + 1 };
            let mut end = start;
            while end < chars.len() && end - start < 2 && chars[end].is_ascii_digit() {
                end += 1;
            }
            let closed = !braced || chars.get(end) == Some(&'}');
            if end > start && closed {
                let group: String = chars[start..end].iter().collect();
                out.push_str("${");
                out.push_str(&group);
                out.push('}');
                i = if braced { end + 1 } else { end };
                continue;
            }
            if c == '$' {
                out.push_str("$$");
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }

    out
}

// =============================================================================
// Compiled Rules
// =============================================================================

/// A mapping rule with everything matching needs precomputed.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: MappingRule,
    base: String,
    query: Option<QueryParams>,
    regex: Option<Regex>,
    replacement: Option<String>,
    restriction: Option<String>,
}

impl CompiledRule {
    pub fn compile(rule: MappingRule) -> Self {
        let (base, query, regex, replacement) = match rule.pattern_type {
            PatternType::Exact => {
                let unified = normalize(&rule.pattern);
                let (base, query) = split_query(&unified);
                let query = query.filter(|q| !q.is_empty()).map(parse_query);
                (base.to_string(), query, None, None)
            }
            PatternType::Pattern => {
                let regex = match compile_pattern(&rule.pattern) {
                    Ok(regex) => Some(regex),
                    Err(err) => {
                        warn!("Rule {} has an invalid pattern and will never match: {}", rule.id, err);
                        None
                    }
                };
                let replacement = match &rule.target {
                    RuleTarget::Link(link) => Some(translate_replacement(link)),
                    RuleTarget::Node(_) => None,
                };
                (String::new(), None, regex, replacement)
            }
        };
        let restriction = rule.hostname_restriction.as_deref().and_then(normalize_host);

        Self {
            rule,
            base,
            query,
            regex,
            replacement,
            restriction,
        }
    }

    pub fn id(&self) -> RuleId {
        self.rule.id
    }

    /// Normalized base path of an exact rule.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Query parameters an exact rule requires, if its pattern has any.
    pub fn query(&self) -> Option<&QueryParams> {
        self.query.as_ref()
    }

    /// Compiled regex of a pattern rule; `None` when it failed to compile.
    pub fn regex(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }

    pub fn restriction(&self) -> Option<&str> {
        self.restriction.as_deref()
    }

    /// Link target with backreferences substituted from the matched text.
    pub fn substitute(&self, subject: &str) -> Option<String> {
        let link = match &self.rule.target {
            RuleTarget::Link(link) => link,
            RuleTarget::Node(_) => return None,
        };
        match (&self.regex, &self.replacement) {
            (Some(regex), Some(replacement)) if !subject.is_empty() => {
                Some(regex.replace_all(subject, replacement.as_str()).into_owned())
            }
            _ => Some(link.clone()),
        }
    }
}

/// Immutable snapshot of every mapping rule.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<MappingRule>) -> Self {
        Self {
            rules: rules.into_iter().map(CompiledRule::compile).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: RuleId) -> Option<&MappingRule> {
        self.rules.iter().find(|c| c.rule.id == id).map(|c| &c.rule)
    }

    /// Plain rules, in storage order.
    pub fn to_rules(&self) -> Vec<MappingRule> {
        self.rules.iter().map(|c| c.rule.clone()).collect()
    }
}

// =============================================================================
// In-memory Store
// =============================================================================

struct StoreState {
    rules: Arc<RuleSet>,
    next_id: RuleId,
}

/// Copy-on-write rule store.
pub struct MemoryRuleStore {
    state: RwLock<StoreState>,
    nodes: Option<Arc<dyn NodeDirectory>>,
}

impl Default for MemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState {
                rules: Arc::new(RuleSet::default()),
                next_id: 1,
            }),
            nodes: None,
        }
    }

    /// Build a store from existing rules. Rules with id 0 get fresh ids;
    /// every rule is validated.
    pub fn with_rules(rules: Vec<MappingRule>) -> Result<Self, RuleError> {
        let store = Self::new();
        for rule in rules {
            if rule.id == 0 {
                store.insert(rule)?;
            } else {
                store.restore(rule)?;
            }
        }
        Ok(store)
    }

    /// Resolve node targets through this directory.
    pub fn with_nodes(mut self, nodes: Arc<dyn NodeDirectory>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    pub fn len(&self) -> usize {
        self.rules().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules().is_empty()
    }

    /// Validate and add a rule, returning its new id.
    pub fn insert(&self, rule: MappingRule) -> Result<RuleId, RuleError> {
        let rule = prepare_rule(rule);
        validate_rule(&rule)?;

        let id = self.modify(|rules, next_id| {
            let id = *next_id;
            *next_id += 1;
            rules.push(CompiledRule::compile(MappingRule { id, ..rule }));
            Ok(id)
        })?;

        info!("Created mapping rule {}", id);
        Ok(id)
    }

    /// Add a rule keeping its id.
    fn restore(&self, rule: MappingRule) -> Result<RuleId, RuleError> {
        let rule = prepare_rule(rule);
        validate_rule(&rule)?;

        self.modify(|rules, next_id| {
            let id = rule.id;
            *next_id = (*next_id).max(id + 1);
            rules.retain(|c| c.rule.id != id);
            rules.push(CompiledRule::compile(rule));
            Ok(id)
        })
    }

    /// Rewrite every field of an existing rule. The id is kept.
    pub fn update(&self, id: RuleId, rule: MappingRule) -> Result<(), RuleError> {
        let rule = prepare_rule(MappingRule { id, ..rule });
        validate_rule(&rule)?;

        self.modify(|rules, _| {
            let slot = rules
                .iter_mut()
                .find(|c| c.rule.id == id)
                .ok_or(RuleError::UnknownRule(id))?;
            *slot = CompiledRule::compile(rule);
            Ok(())
        })?;

        info!("Updated mapping rule {}", id);
        Ok(())
    }

    pub fn remove(&self, id: RuleId) -> Result<MappingRule, RuleError> {
        let removed = self.modify(|rules, _| {
            let pos = rules
                .iter()
                .position(|c| c.rule.id == id)
                .ok_or(RuleError::UnknownRule(id))?;
            Ok(rules.remove(pos).rule)
        })?;

        info!("Removed mapping rule {}", id);
        Ok(removed)
    }

    /// Map a URL onto a node, reusing an existing mapping for the same
    /// pattern and node.
    pub fn create_node_mapping(&self, url: &str, node: NodeId, priority: u8) -> Result<RuleId, RuleError> {
        let pattern = normalize(url);
        let rules = self.rules();
        let existing = rules
            .iter()
            .find(|c| {
                c.rule.pattern_type == PatternType::Exact
                    && c.rule.pattern == pattern
                    && c.rule.target == RuleTarget::Node(node)
            })
            .map(CompiledRule::id);

        match existing {
            Some(id) => Ok(id),
            None => self.insert(MappingRule::node(&pattern, node).with_priority(priority)),
        }
    }

    /// Turn every rule targeting a permanently removed node into a link rule
    /// pointing at the node's last known URL. Returns how many were changed.
    pub fn retarget_removed_node(&self, node: NodeId, last_url: &str) -> Result<usize, RuleError> {
        let link = last_url.trim_matches(&[' ', '?', '/'][..]).to_string();
        if link.is_empty() {
            return Err(RuleError::EmptyTarget);
        }

        let changed = self.modify(|rules, _| {
            let mut changed = 0usize;
            for slot in rules.iter_mut() {
                if slot.rule.target == RuleTarget::Node(node) {
                    let mut rule = slot.rule.clone();
                    rule.target = RuleTarget::Link(link.clone());
                    *slot = CompiledRule::compile(rule);
                    changed += 1;
                }
            }
            Ok(changed)
        })?;

        if changed > 0 {
            info!("Retargeted {} mapping rules from removed node {} to '{}'", changed, node, link);
        }
        Ok(changed)
    }

    fn modify<T>(
        &self,
        apply: impl FnOnce(&mut Vec<CompiledRule>, &mut RuleId) -> Result<T, RuleError>,
    ) -> Result<T, RuleError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut rules = state.rules.rules.clone();
        let mut next_id = state.next_id;

        let out = apply(&mut rules, &mut next_id)?;

        state.rules = Arc::new(RuleSet { rules });
        state.next_id = next_id;
        Ok(out)
    }
}

impl RuleStore for MemoryRuleStore {
    fn rules(&self) -> Arc<RuleSet> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rules
            .clone()
    }

    fn find_live_node(&self, node: NodeId) -> Option<String> {
        self.nodes.as_ref()?.live_url(node)
    }
}
