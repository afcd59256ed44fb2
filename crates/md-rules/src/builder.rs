use std::collections::HashSet;

use log::info;

use md_core::store::{prepare_rule, validate_rule, MemoryRuleStore, RuleError};
use md_core::types::{MappingRule, RuleId};

use crate::optimizer::{optimize_rules, OptimizeStats};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Rule {index} ('{pattern}'): {source}")]
    InvalidRule {
        index: usize,
        pattern: String,
        #[source]
        source: RuleError,
    },
    #[error("Duplicate rule id {0}")]
    DuplicateId(RuleId),
    #[error(transparent)]
    Store(#[from] RuleError),
}

pub struct BuildOutput {
    pub rules: Vec<MappingRule>,
    pub stats: OptimizeStats,
}

/// Canonicalize, validate, dedupe and number a list of rules.
///
/// Rules that already carry an id keep it; the rest are numbered after the
/// highest existing id, in list order.
pub fn build_rules(rules: Vec<MappingRule>) -> Result<BuildOutput, BuildError> {
    let mut prepared = Vec::with_capacity(rules.len());
    for (index, rule) in rules.into_iter().enumerate() {
        let rule = prepare_rule(rule);
        validate_rule(&rule).map_err(|source| BuildError::InvalidRule {
            index,
            pattern: rule.pattern.clone(),
            source,
        })?;
        prepared.push(rule);
    }

    let stats = optimize_rules(&mut prepared);

    let mut ids: HashSet<RuleId> = HashSet::new();
    for rule in prepared.iter().filter(|rule| rule.id != 0) {
        if !ids.insert(rule.id) {
            return Err(BuildError::DuplicateId(rule.id));
        }
    }

    let mut next_id = ids.iter().max().map_or(1, |max| max + 1);
    for rule in prepared.iter_mut().filter(|rule| rule.id == 0) {
        rule.id = next_id;
        next_id += 1;
    }

    info!("Built {} rules ({} duplicates removed)", stats.after, stats.deduped);

    Ok(BuildOutput {
        rules: prepared,
        stats,
    })
}

/// Build a ready-to-query store from a rule list.
pub fn build_store(rules: Vec<MappingRule>) -> Result<MemoryRuleStore, BuildError> {
    let output = build_rules(rules)?;
    Ok(MemoryRuleStore::with_rules(output.rules)?)
}
