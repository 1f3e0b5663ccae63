//! Engine configuration
//!
//! Loaded from TOML or built in code. Every field has a default, so an
//! empty document is a valid config.
//!
//! ```toml
//! root_segment = "state"
//! internal_key = "$internal"
//! report_capacity = 64
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of recent diagnostic reports kept for inspection
pub const DEFAULT_REPORT_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Leading segment of every wrap-time path (`state.user.name`)
    #[serde(default = "default_root_segment")]
    pub root_segment: String,
    /// Root field holding engine/host bookkeeping; never instrumented
    #[serde(default = "default_internal_key")]
    pub internal_key: String,
    /// Recent diagnostic reports kept in memory
    #[serde(default = "default_report_capacity")]
    pub report_capacity: usize,
}

fn default_root_segment() -> String {
    "state".to_string()
}

fn default_internal_key() -> String {
    "$internal".to_string()
}

fn default_report_capacity() -> usize {
    DEFAULT_REPORT_CAPACITY
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_segment: default_root_segment(),
            internal_key: default_internal_key(),
            report_capacity: default_report_capacity(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_segment.is_empty() || self.root_segment.contains(crate::path::SEPARATOR) {
            return Err(ConfigError::Invalid {
                field: "root_segment",
                reason: format!("`{}` must be a single non-empty segment", self.root_segment),
            });
        }
        if self.internal_key.is_empty() {
            return Err(ConfigError::Invalid {
                field: "internal_key",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = EngineConfig::from_toml_str("internal_key = \"_meta\"").unwrap();
        assert_eq!(config.internal_key, "_meta");
        assert_eq!(config.root_segment, "state");
    }

    #[test]
    fn test_rejects_dotted_root() {
        let err = EngineConfig::from_toml_str("root_segment = \"a.b\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "root_segment", .. }));
    }
}
