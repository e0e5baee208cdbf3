#![warn(missing_docs)]

//! # jsrun-config
//!
//! Configuration loading for the jsrun sandbox.
//!
//! Supports TOML configuration files with environment variable expansion.
//!
//! ## Example
//!
//! ```toml
//! [sandbox]
//! timeout_ms = 5000
//! memory_limit_mib = 128
//! max_code_size_kb = 1024
//! max_concurrent = 8
//!
//! [audit]
//! enabled = true
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Smallest heap ceiling V8 can boot a context in.
pub const MIN_MEMORY_LIMIT_MIB: usize = 8;

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level jsrun configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsrunConfig {
    /// Sandbox limits.
    #[serde(default)]
    pub sandbox: SandboxOverrides,

    /// Audit log settings.
    #[serde(default)]
    pub audit: AuditSettings,
}

/// Sandbox limit overrides. Absent fields keep the executor's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxOverrides {
    /// Wall-clock deadline per execution, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// V8 heap ceiling in MiB.
    #[serde(default)]
    pub memory_limit_mib: Option<usize>,

    /// Maximum accepted source size in KiB.
    #[serde(default)]
    pub max_code_size_kb: Option<usize>,

    /// Maximum concurrent isolates.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

/// Audit log settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditSettings {
    /// Emit one audit event per execution.
    #[serde(default)]
    pub enabled: bool,
}

impl JsrunConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: JsrunConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let sandbox = &self.sandbox;
        if sandbox.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "sandbox.timeout_ms must be greater than 0".into(),
            ));
        }
        if let Some(mib) = sandbox.memory_limit_mib {
            if mib < MIN_MEMORY_LIMIT_MIB {
                return Err(ConfigError::Invalid(format!(
                    "sandbox.memory_limit_mib must be at least {MIN_MEMORY_LIMIT_MIB} (got {mib})"
                )));
            }
        }
        if sandbox.max_code_size_kb == Some(0) {
            return Err(ConfigError::Invalid(
                "sandbox.max_code_size_kb must be greater than 0".into(),
            ));
        }
        if sandbox.max_concurrent == Some(0) {
            return Err(ConfigError::Invalid(
                "sandbox.max_concurrent must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) if closed => result.push_str(&value),
                _ => {
                    // Leave the placeholder if env var not found
                    result.push_str("${");
                    result.push_str(&var_name);
                    if closed {
                        result.push('}');
                    }
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}
