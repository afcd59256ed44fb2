//! JSON import/export of rule sets.

use serde::{Deserialize, Serialize};

use md_core::types::MappingRule;

pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Failed to parse rule document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported rule document version {0}")]
    UnsupportedVersion(u32),
}

/// Every persisted field of every rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDocument {
    pub version: u32,
    pub rules: Vec<MappingRule>,
}

impl RuleDocument {
    pub fn new(rules: Vec<MappingRule>) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            rules,
        }
    }
}

pub fn export_rules(rules: &[MappingRule]) -> Result<String, DocumentError> {
    let document = RuleDocument::new(rules.to_vec());
    Ok(serde_json::to_string_pretty(&document)?)
}

pub fn import_rules(json: &str) -> Result<Vec<MappingRule>, DocumentError> {
    let document: RuleDocument = serde_json::from_str(json)?;
    if document.version != DOCUMENT_VERSION {
        return Err(DocumentError::UnsupportedVersion(document.version));
    }
    Ok(document.rules)
}
