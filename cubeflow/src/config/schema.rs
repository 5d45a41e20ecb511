//! Declared parameter sets.

use super::StageConfig;
use crate::errors::ConfigurationError;

/// The closed set of parameters a stage recognizes.
///
/// Required parameters are checked only for enabled stages; unrecognized
/// keys are reported as warnings, never as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSchema {
    required: Vec<String>,
    optional: Vec<String>,
}

impl ParamSchema {
    /// Creates an empty schema that accepts no parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a required parameter.
    #[must_use]
    pub fn required(mut self, key: impl Into<String>) -> Self {
        self.required.push(key.into());
        self
    }

    /// Declares an optional parameter.
    #[must_use]
    pub fn optional(mut self, key: impl Into<String>) -> Self {
        self.optional.push(key.into());
        self
    }

    /// Returns true if the key is declared.
    #[must_use]
    pub fn recognizes(&self, key: &str) -> bool {
        self.required.iter().chain(&self.optional).any(|k| k == key)
    }

    /// Checks a stage section against the schema.
    ///
    /// Returns one warning per unrecognized key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::MissingParameter` for the first absent
    /// required parameter.
    pub fn validate(&self, stage: &str, config: &StageConfig) -> Result<Vec<String>, ConfigurationError> {
        if let Some(missing) = self.required.iter().find(|k| !config.params.contains_key(*k)) {
            return Err(ConfigurationError::MissingParameter {
                stage: stage.to_string(),
                parameter: missing.clone(),
            });
        }

        Ok(config
            .params
            .keys()
            .filter(|key| !self.recognizes(key))
            .map(|key| format!("Stage '{stage}' ignores unknown parameter '{key}'"))
            .collect())
    }
}
