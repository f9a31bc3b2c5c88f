use serde::Deserialize;
use thiserror::Error as ThisError;

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config key '{key}': {message}")]
    Invalid { key: &'static str, message: String },
}

///
/// EnforcerConfig
///
/// Runtime knobs for the enforcement proxy. Every section and key is
/// optional; missing keys take their defaults.
///
/// ```toml
/// [validation]
/// input_only_for_update = true
///
/// [policy]
/// max_relation_depth = 8
/// redaction = "null"
///
/// [checker]
/// max_search_steps = 100000
/// ```
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EnforcerConfig {
    pub validation: ValidationConfig,
    pub policy: PolicyConfig,
    pub checker: CheckerConfig,
}

impl EnforcerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.check()?;

        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.policy.max_relation_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "policy.max_relation_depth",
                message: "must be at least 1".to_string(),
            });
        }
        if self.checker.max_search_steps == 0 {
            return Err(ConfigError::Invalid {
                key: "checker.max_search_steps",
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub const fn input_only_validation(mut self) -> Self {
        self.validation.input_only_for_update = true;
        self
    }

    #[must_use]
    pub const fn redaction(mut self, redaction: Redaction) -> Self {
        self.policy.redaction = redaction;
        self
    }

    #[must_use]
    pub const fn max_relation_depth(mut self, depth: usize) -> Self {
        self.policy.max_relation_depth = depth;
        self
    }
}

///
/// ValidationConfig
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    /// Update validation only runs rules whose fields were supplied.
    pub input_only_for_update: bool,
}

///
/// PolicyConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub max_relation_depth: usize,
    pub redaction: Redaction,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_relation_depth: 8,
            redaction: Redaction::Remove,
        }
    }
}

///
/// Redaction
/// How an unreadable field is hidden from a returned row.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Redaction {
    #[default]
    Remove,
    Null,
}

///
/// CheckerConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CheckerConfig {
    pub max_search_steps: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            max_search_steps: 100_000,
        }
    }
}

///
/// TESTS
///
