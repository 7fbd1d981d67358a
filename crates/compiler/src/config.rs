//! Compiler configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```toml
//! cache_capacity = 128
//! parse_strategy = "backtracking"
//! warnings_as_errors = false
//!
//! [codegen]
//! runtime_module = "acme.agent_runtime"
//! class_suffix = "Workflow"
//! ```

use agentflow_codegen::CodegenOptions;
use agentflow_core::ParseStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CACHE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Maximum number of successful compilations kept in the cache.
    /// Zero disables caching.
    pub cache_capacity: usize,
    pub parse_strategy: ParseStrategy,
    /// Treat warnings as blocking.
    pub warnings_as_errors: bool,
    pub codegen: CodegenOptions,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            parse_strategy: ParseStrategy::default(),
            warnings_as_errors: false,
            codegen: CodegenOptions::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl CompilerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CompilerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), ?config, "loaded compiler configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let module = &self.codegen.runtime_module;
        if module.is_empty() || !module.split('.').all(is_python_identifier) {
            return Err(ConfigError::Invalid(format!(
                "runtime_module `{}` is not a dotted Python module name",
                module
            )));
        }
        if !self.codegen.class_suffix.is_empty() && !is_python_identifier(&self.codegen.class_suffix)
        {
            return Err(ConfigError::Invalid(format!(
                "class_suffix `{}` is not a Python identifier",
                self.codegen.class_suffix
            )));
        }
        Ok(())
    }

    /// The settings that change what a compilation produces. Part of the
    /// cache key.
    pub fn fingerprint(&self) -> String {
        format!(
            "strategy={:?};warnings_as_errors={};runtime={};suffix={}",
            self.parse_strategy,
            self.warnings_as_errors,
            self.codegen.runtime_module,
            self.codegen.class_suffix
        )
    }
}

fn is_python_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = CompilerConfig::from_toml_str("").unwrap();
        assert_eq!(config, CompilerConfig::default());
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.codegen.runtime_module, "agentflow_runtime");
    }

    #[test]
    fn full_config_parses() {
        let config = CompilerConfig::from_toml_str(
            "cache_capacity = 2\nparse_strategy = \"backtracking\"\nwarnings_as_errors = true\n\n[codegen]\nruntime_module = \"acme.agent_runtime\"\n",
        )
        .unwrap();
        assert_eq!(config.cache_capacity, 2);
        assert_eq!(config.parse_strategy, ParseStrategy::Backtracking);
        assert!(config.warnings_as_errors);
        assert_eq!(config.codegen.runtime_module, "acme.agent_runtime");
        assert_eq!(config.codegen.class_suffix, "Workflow");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = CompilerConfig::from_toml_str("cache_size = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn bad_module_name_is_rejected() {
        let err = CompilerConfig::from_toml_str("[codegen]\nruntime_module = \"acme..rt\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("acme..rt"), "{}", err);
    }

    #[test]
    fn fingerprint_tracks_output_settings() {
        let a = CompilerConfig::default();
        let mut b = a.clone();
        b.cache_capacity = 1;
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.codegen.class_suffix = "Flows".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CompilerConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
