//! Misdirect Rule Compiler
//!
//! This crate turns authored rule lists (line-oriented text or JSON documents)
//! into validated, deduplicated and numbered mapping rules.

pub mod parser;
pub mod optimizer;
pub mod builder;
pub mod document;

pub use builder::{build_rules, build_store, BuildError, BuildOutput};
pub use document::{export_rules, import_rules, DocumentError, RuleDocument};
pub use optimizer::{optimize_rules, OptimizeStats};
pub use parser::{parse_rule_line, parse_rule_list, ParseError, ParsedList, RejectedLine};
