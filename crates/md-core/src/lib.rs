//! Misdirect Core Library
//!
//! This crate resolves inbound request paths to redirect targets. A request is
//! matched against a prioritized set of mapping rules, the matched target is
//! followed through further rules until it stops matching, and, when nothing
//! maps and the page is missing, a page tree is walked for an inherited
//! fallback.
//!
//! # Architecture
//!
//! Rules are read from a [`RuleStore`] snapshot that never changes during a
//! resolution; writes publish a new snapshot. Page lookups go through
//! [`NodeTreeStore`]. Neither trait is global state: both are handed to the
//! [`Misdirector`] at construction.
//!
//! # Modules
//!
//! - `url`: URL normalization, query handling and the external URL check
//! - `types`: Rules, fallbacks, traces and request/response values
//! - `config`: Engine settings, loadable from YAML
//! - `store`: Rule store traits, compiled rules and the in-memory store
//! - `tree`: Arena-backed page tree
//! - `matcher`: Best-rule selection
//! - `chain`: Chain resolution with the hop cap
//! - `fallback`: Hierarchical fallback resolution
//! - `resolver`: Request entry point

pub mod chain;
pub mod config;
pub mod fallback;
pub mod matcher;
pub mod resolver;
pub mod store;
pub mod tree;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use chain::{ChainResolver, Resolved};
pub use config::{ConfigError, DomainParameter, EngineConfig, IdOrder, TypeOrder};
pub use fallback::FallbackResolver;
pub use matcher::{MatchedRule, Matcher};
pub use resolver::Misdirector;
pub use store::{MemoryRuleStore, NodeDirectory, NodeTreeStore, RuleError, RuleSet, RuleStore};
pub use tree::{SiteTree, TreeError, TreeSpec};
pub use types::{
    Decision, FallbackPolicy, FallbackRule, MappingRule, NodeId, PatternType, Redirect, RequestContext,
    Resolution, RuleId, RuleTarget, Trace, TraceEntry, TraceHop, UnknownPatternType,
};
