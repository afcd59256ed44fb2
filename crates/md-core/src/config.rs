//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Direction of the final id tie-break between otherwise equal rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdOrder {
    /// First rule created wins
    #[default]
    Ascending,
    /// Most recently created rule wins
    Descending,
}

/// Which pattern type wins between rules of equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeOrder {
    #[default]
    ExactFirst,
    PatternFirst,
}

/// Query parameters appended to redirects that leave for a given domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainParameter {
    /// Target host, without scheme
    pub domain: String,
    /// Parameters to add, e.g. `rf=1&x=y`
    pub parameters: String,
}

/// Resolution engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Chain length at which resolution gives up
    pub maximum_hops: usize,
    /// Status for mapping rules that leave it at 0
    pub default_status: u16,
    /// Status for fallback rules that leave it at 0
    pub fallback_status: u16,
    pub id_order: IdOrder,
    pub type_order: TypeOrder,
    /// Keep re-matching node targets even when they render as absolute URLs
    pub reresolve_node_targets: bool,
    /// Append the bypass marker to external link targets
    pub mark_external_targets: bool,
    /// Site base URL
    pub base_url: String,
    /// Query parameter written onto redirects that must not be resolved again
    pub bypass_parameter: String,
    /// Query parameters that make a request skip resolution
    pub bypass_parameters: Vec<String>,
    /// Path prefixes that are never resolved
    pub bypass_prefixes: Vec<String>,
    /// Consult mappings even when the requested page exists
    pub enforce_misdirection: bool,
    /// Replace the pipeline's default URL handling
    pub replace_default: bool,
    pub domain_parameters: Vec<DomainParameter>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            maximum_hops: 9,
            default_status: 301,
            fallback_status: 303,
            id_order: IdOrder::Ascending,
            type_order: TypeOrder::ExactFirst,
            reresolve_node_targets: true,
            mark_external_targets: false,
            base_url: "/".to_string(),
            bypass_parameter: "misdirected".to_string(),
            bypass_parameters: vec!["misdirected".to_string(), "direct".to_string()],
            bypass_prefixes: vec![
                "admin".to_string(),
                "Security".to_string(),
                "CMSSecurity".to_string(),
                "dev".to_string(),
            ],
            enforce_misdirection: true,
            replace_default: false,
            domain_parameters: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maximum_hops == 0 {
            return Err(ConfigError::Invalid("maximum_hops must be at least 1".to_string()));
        }
        for (name, status) in [
            ("default_status", self.default_status),
            ("fallback_status", self.fallback_status),
        ] {
            if !(300..400).contains(&status) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a redirect status (300-399), got {}",
                    name, status
                )));
            }
        }
        if !self.base_url.starts_with('/') && !crate::url::is_external(&self.base_url) {
            return Err(ConfigError::Invalid(format!(
                "base_url must be absolute or start with '/', got '{}'",
                self.base_url
            )));
        }
        if self.bypass_parameter.is_empty() {
            return Err(ConfigError::Invalid("bypass_parameter must not be empty".to_string()));
        }
        Ok(())
    }
}
