use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{debug, info};

use md_core::{EngineConfig, MappingRule, MemoryRuleStore, Misdirector, SiteTree, TreeSpec};
use md_rules::{build_rules, build_store, import_rules, parse_rule_list, OptimizeStats, RejectedLine};

/// Rules read from every input, with the lines that failed to parse.
pub struct LoadedRules {
    pub rules: Vec<MappingRule>,
    pub rejected: Vec<(PathBuf, RejectedLine)>,
}

/// Read rule files. `.json` files are rule documents; anything else is a
/// line-oriented rule list.
pub fn read_rules(inputs: &[PathBuf], verbose: bool) -> Result<LoadedRules> {
    if inputs.is_empty() {
        bail!("No rule files specified");
    }

    let mut loaded = LoadedRules {
        rules: Vec::new(),
        rejected: Vec::new(),
    };

    for path in inputs {
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path.display()))?;

        let rules = if is_json(path) {
            import_rules(&content).with_context(|| format!("Failed to import '{}'", path.display()))?
        } else {
            let list = parse_rule_list(&content);
            loaded
                .rejected
                .extend(list.rejected.into_iter().map(|line| (path.clone(), line)));
            list.rules
        };

        debug!("Read {} rules from '{}'", rules.len(), path.display());
        if verbose {
            println!(
                "  {} - {} rules",
                path.file_name().unwrap_or_default().to_string_lossy(),
                rules.len()
            );
        }

        loaded.rules.extend(rules);
    }

    Ok(loaded)
}

/// Read, validate and number rules, failing on any rejected line.
pub fn compile_rules(inputs: &[PathBuf]) -> Result<(Vec<MappingRule>, OptimizeStats)> {
    let loaded = read_rules(inputs, false)?;
    if let Some((path, line)) = loaded.rejected.first() {
        bail!(
            "{}:{}: {} ({} rejected lines in total)",
            path.display(),
            line.line,
            line.error,
            loaded.rejected.len()
        );
    }
    let output = build_rules(loaded.rules)?;
    Ok((output.rules, output.stats))
}

pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path).with_context(|| format!("Failed to load config '{}'", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

pub fn load_tree(path: &Path) -> Result<SiteTree> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path.display()))?;
    let spec: TreeSpec =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse tree '{}'", path.display()))?;
    Ok(SiteTree::from_spec(&spec)?)
}

/// Assemble an engine from rule files, an optional config and an optional
/// page tree. The tree, when present, also answers node target lookups.
pub fn build_engine(rules: &[PathBuf], config: Option<&Path>, tree: Option<&Path>) -> Result<Misdirector> {
    let (rules, _) = compile_rules(rules)?;
    let config = load_config(config)?;
    let store = build_store(rules)?;
    info!("Loaded {} mapping rules", store.len());

    match tree {
        Some(path) => {
            let tree = Arc::new(load_tree(path)?);
            let store = store.with_nodes(tree.clone());
            Ok(Misdirector::new(Arc::new(store), config).with_tree(tree))
        }
        None => Ok(Misdirector::new(Arc::new(store), config)),
    }
}

/// Engine with no mapping rules, for fallback lookups only.
pub fn build_fallback_engine(tree: &Path, config: Option<&Path>) -> Result<Misdirector> {
    let config = load_config(config)?;
    let tree = Arc::new(load_tree(tree)?);
    let store = MemoryRuleStore::new().with_nodes(tree.clone());
    Ok(Misdirector::new(Arc::new(store), config).with_tree(tree))
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"))
}
