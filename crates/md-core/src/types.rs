//! Core type definitions for misdirect
//!
//! These types describe the persisted mapping rules and fallback policies,
//! and the values the resolvers hand back to the request pipeline.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable identifier of a mapping rule. Ids increase monotonically with
/// creation order, which is what the id tie-break relies on.
pub type RuleId = u64;

/// Lowest rule priority accepted at write time.
pub const MIN_PRIORITY: u8 = 1;
/// Highest rule priority accepted at write time.
pub const MAX_PRIORITY: u8 = 10;

// =============================================================================
// Pattern Types
// =============================================================================

/// How a rule's `pattern` is compared against a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Literal normalized path, optionally followed by `?query`
    #[default]
    Exact,
    /// Case-insensitive regular expression
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown pattern type '{0}'")]
pub struct UnknownPatternType(pub String);

/// Accepts the names used by rule lists and exports.
impl FromStr for PatternType {
    type Err = UnknownPatternType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" | "simple" => Ok(Self::Exact),
            "pattern" | "regex" | "regular expression" => Ok(Self::Pattern),
            _ => Err(UnknownPatternType(s.to_string())),
        }
    }
}

// =============================================================================
// Targets
// =============================================================================

/// Reference to a node (page) owned by the node tree collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Discriminant of [`RuleTarget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Link,
    Node,
}

/// Where a mapping rule sends the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RuleTarget {
    /// Literal destination, absolute or relative. May hold backreferences
    /// (`\1`, `$1`, `${1}`) when the rule is a pattern rule.
    Link(String),
    /// A node whose current URL is looked up live at evaluation time.
    Node(NodeId),
}

impl RuleTarget {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Link(_) => TargetKind::Link,
            Self::Node(_) => TargetKind::Node,
        }
    }
}

// =============================================================================
// Mapping Rule
// =============================================================================

/// A stored redirect definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub id: RuleId,
    pub pattern_type: PatternType,
    pub pattern: String,
    /// Match `pattern` against `{host}/{path}` instead of `{path}`
    #[serde(default)]
    pub includes_hostname: bool,
    pub priority: u8,
    pub target: RuleTarget,
    /// 0 means "use the configured default"
    #[serde(default)]
    pub status_code: u16,
    /// Promote 301/303 to 308/307 so the method and body survive the redirect
    #[serde(default)]
    pub forward_body: bool,
    /// Legacy: only match requests for this exact host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname_restriction: Option<String>,
}

impl MappingRule {
    fn new(pattern_type: PatternType, pattern: &str, target: RuleTarget) -> Self {
        Self {
            id: 0,
            pattern_type,
            pattern: pattern.to_string(),
            includes_hostname: false,
            priority: MIN_PRIORITY,
            target,
            status_code: 0,
            forward_body: false,
            hostname_restriction: None,
        }
    }

    /// Exact rule redirecting to a literal URL.
    pub fn link(pattern: &str, target: &str) -> Self {
        Self::new(PatternType::Exact, pattern, RuleTarget::Link(target.to_string()))
    }

    /// Exact rule redirecting to a node.
    pub fn node(pattern: &str, node: NodeId) -> Self {
        Self::new(PatternType::Exact, pattern, RuleTarget::Node(node))
    }

    /// Pattern rule redirecting to a (possibly backreferencing) URL.
    pub fn regex(pattern: &str, target: &str) -> Self {
        Self::new(PatternType::Pattern, pattern, RuleTarget::Link(target.to_string()))
    }

    pub fn with_id(mut self, id: RuleId) -> Self {
        self.id = id;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn including_hostname(mut self) -> Self {
        self.includes_hostname = true;
        self
    }

    pub fn forwarding_body(mut self) -> Self {
        self.forward_body = true;
        self
    }

    pub fn restricted_to(mut self, host: &str) -> Self {
        self.hostname_restriction = Some(host.to_string());
        self
    }

    /// Status code to emit when this rule is the last hop of a chain.
    ///
    /// A zero status takes `default_status`; a 301 or 303 is then promoted
    /// to 308 or 307 when the rule forwards the request body.
    pub fn effective_status(&self, default_status: u16) -> u16 {
        let status = if self.status_code == 0 {
            default_status
        } else {
            self.status_code
        };

        match (status, self.forward_body) {
            (301, true) => 308,
            (303, true) => 307,
            (status, _) => status,
        }
    }
}

// =============================================================================
// Fallback
// =============================================================================

/// Which URL a fallback sends a missing child to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// The deepest existing ancestor on the request path
    NearestAncestor,
    /// The node that defined the policy
    ThisNode,
    /// A configured URL
    ExplicitUrl,
}

/// Fallback behaviour attached to a node or to the site root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRule {
    pub policy: FallbackPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_url: Option<String>,
    /// 0 means "use the configured fallback default"
    #[serde(default)]
    pub status_code: u16,
}

impl FallbackRule {
    pub fn nearest_ancestor() -> Self {
        Self {
            policy: FallbackPolicy::NearestAncestor,
            explicit_url: None,
            status_code: 0,
        }
    }

    pub fn this_node() -> Self {
        Self {
            policy: FallbackPolicy::ThisNode,
            explicit_url: None,
            status_code: 0,
        }
    }

    pub fn explicit(url: &str) -> Self {
        Self {
            policy: FallbackPolicy::ExplicitUrl,
            explicit_url: Some(url.to_string()),
            status_code: 0,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }
}

// =============================================================================
// Results
// =============================================================================

/// A computed redirect: where to send the client and with which status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub target: String,
    pub status_code: u16,
}

/// One step of a resolved chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceHop {
    /// 1-based position in the chain
    pub counter: usize,
    pub rule: MappingRule,
    /// Literal redirect target rendered at this step
    pub target: String,
}

/// Entry of a diagnostic trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    Hop(TraceHop),
    /// The chain hit the hop cap; the request is treated as unresolved
    LimitExceeded { maximum_hops: usize },
}

/// Ordered list of rules visited while resolving one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    pub entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Hops only, without the terminal limit marker.
    pub fn hops(&self) -> impl Iterator<Item = &TraceHop> {
        self.entries.iter().filter_map(|entry| match entry {
            TraceEntry::Hop(hop) => Some(hop),
            TraceEntry::LimitExceeded { .. } => None,
        })
    }

    pub fn last_hop(&self) -> Option<&TraceHop> {
        self.hops().last()
    }

    pub fn limit_exceeded(&self) -> bool {
        matches!(self.entries.last(), Some(TraceEntry::LimitExceeded { .. }))
    }
}

// =============================================================================
// Request Context
// =============================================================================

/// An inbound request as seen by the host pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Request path, without scheme or host
    pub path: &'a str,
    /// Raw query string, without the leading `?`
    pub query: Option<&'a str>,
    /// Request hostname (from the Host header)
    pub host: Option<&'a str>,
    /// Status the pipeline produced before consulting the engine
    pub status: u16,
}

impl<'a> RequestContext<'a> {
    pub fn new(path: &'a str) -> Self {
        Self {
            path,
            query: None,
            host: None,
            status: 404,
        }
    }

    pub fn with_query(mut self, query: &'a str) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_host(mut self, host: &'a str) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Path and query joined back into a single relative URL.
    pub fn url(&self) -> String {
        match self.query {
            Some(query) if !query.is_empty() => format!("{}?{}", self.path, query),
            _ => self.path.to_string(),
        }
    }
}

/// Final decision for a handled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Leave the pipeline's response untouched
    Continue,
    /// Replace the response with a redirect
    Redirect,
    /// Replace the response with a page not found
    NotFound,
}

/// Result of handling a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub decision: Decision,
    /// Rule that produced the redirect, if it came from a mapping
    pub rule_id: Option<RuleId>,
    /// The redirect came from the fallback resolver
    pub from_fallback: bool,
    /// Redirect location if decision is Redirect
    pub location: Option<String>,
    pub status_code: u16,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            decision: Decision::Continue,
            rule_id: None,
            from_fallback: false,
            location: None,
            status_code: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_status() {
        let rule = MappingRule::link("a", "b");
        assert_eq!(rule.effective_status(301), 301);
        assert_eq!(rule.clone().forwarding_body().effective_status(301), 308);
        assert_eq!(rule.clone().forwarding_body().effective_status(303), 307);
        assert_eq!(rule.clone().with_status(302).forwarding_body().effective_status(301), 302);
        assert_eq!(rule.clone().with_status(303).forwarding_body().effective_status(301), 307);
        assert_eq!(rule.with_status(307).effective_status(301), 307);
    }

    #[test]
    fn test_pattern_type_from_str() {
        assert_eq!("Simple".parse(), Ok(PatternType::Exact));
        assert_eq!("Regular Expression".parse(), Ok(PatternType::Pattern));
        assert_eq!("regex".parse(), Ok(PatternType::Pattern));
        assert_eq!(
            "glob".parse::<PatternType>(),
            Err(UnknownPatternType("glob".to_string()))
        );
    }

    #[test]
    fn test_trace_limit_marker() {
        let hop = TraceHop {
            counter: 1,
            rule: MappingRule::link("a", "b"),
            target: "/b".to_string(),
        };
        let mut trace = Trace {
            entries: vec![TraceEntry::Hop(hop)],
        };
        assert!(!trace.limit_exceeded());
        trace.entries.push(TraceEntry::LimitExceeded { maximum_hops: 9 });
        assert!(trace.limit_exceeded());
        assert_eq!(trace.hops().count(), 1);
        assert_eq!(trace.last_hop().map(|hop| hop.target.as_str()), Some("/b"));
    }

    #[test]
    fn test_request_url() {
        let ctx = RequestContext::new("page").with_query("a=1");
        assert_eq!(ctx.url(), "page?a=1");
        assert_eq!(RequestContext::new("page").with_query("").url(), "page");
    }
}
