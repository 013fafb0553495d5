//! Failures while loading relay settings.

use std::io;

use thiserror::Error;

/// Why a settings load was refused.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file: {0}")]
    Read(#[from] io::Error),
    /// The settings file is not valid JSON, or does not match the schema.
    #[error("malformed settings: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value parsed but the relay cannot run with it.
    #[error("setting {field} {reason}")]
    Invalid {
        /// Dotted camelCase path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
