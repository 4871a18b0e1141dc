//! Verification settings.
//!
//! ```toml
//! # in-toto verify configuration
//! command_alignment = "strict"
//! run_inspections = true
//! require_all_layout_keys = false
//! link_dir = "./links"
//! ```

use super::Enforcement;
use crate::error::InTotoError;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_true() -> bool {
    true
}

fn default_command_alignment() -> Enforcement {
    Enforcement::Report
}

/// Settings for one verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyConfig {
    /// How a link whose command differs from the step's expected command is
    /// treated
    #[serde(default = "default_command_alignment")]
    pub command_alignment: Enforcement,

    /// Run the layout's inspections
    #[serde(default = "default_true")]
    pub run_inspections: bool,

    /// Require every supplied layout key to have signed the layout, instead
    /// of at least one
    #[serde(default)]
    pub require_all_layout_keys: bool,

    /// Directory link files are read from (defaults to the current directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_dir: Option<PathBuf>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command_alignment: default_command_alignment(),
            run_inspections: true,
            require_all_layout_keys: false,
            link_dir: None,
        }
    }
}

impl VerifyConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, InTotoError> {
        toml::from_str(toml_str).map_err(|e| InTotoError::ParseError(format!("config: {}", e)))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, InTotoError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, InTotoError> {
        toml::to_string_pretty(self).map_err(|e| InTotoError::EncodingError(format!("config: {}", e)))
    }

    /// Directory link files are read from.
    pub fn link_dir(&self) -> &Path {
        self.link_dir.as_deref().unwrap_or_else(|| Path::new("."))
    }
}
