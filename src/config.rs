//! Configuration for the definition engine

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// What [`crate::Engine::check`] does with violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationPolicy {
    /// Log and return the violations
    #[default]
    Report,
    /// Fail the check with an error
    Abort,
}

/// Configuration options for resolution, specialization and validation
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct EngineConfig {
    /// Cache resolved templates per definition
    pub cache_resolutions: bool,

    /// Reject bindings that name undeclared parameters
    pub strict_bindings: bool,

    /// Policy applied by `Engine::check`
    pub violation_policy: ViolationPolicy,

    /// Separator used when a list parameter is substituted
    pub list_separator: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_resolutions: true,
            strict_bindings: false,
            violation_policy: ViolationPolicy::Report,
            list_separator: ", ".to_string(),
        }
    }
}

/// TOML structure of a standalone config file
#[derive(Deserialize)]
struct TomlConfig {
    #[serde(default)]
    engine: EngineConfig,
}

impl EngineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file with an `[engine]` table
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string with an `[engine]` table
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let parsed: TomlConfig = toml::from_str(content)?;
        Ok(parsed.engine)
    }

    /// Enable or disable the resolution cache
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_resolutions = enabled;
        self
    }

    /// Enable or disable strict parameter bindings
    pub fn with_strict_bindings(mut self, strict: bool) -> Self {
        self.strict_bindings = strict;
        self
    }

    /// Set the violation policy
    pub fn with_violation_policy(mut self, policy: ViolationPolicy) -> Self {
        self.violation_policy = policy;
        self
    }

    /// Set the separator for list parameters
    pub fn with_list_separator(mut self, separator: impl Into<String>) -> Self {
        self.list_separator = separator.into();
        self
    }
}
