//! Provisioner configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Tunables for a provisioning run.
///
/// Parsed from TOML; unknown keys are rejected to catch typos.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ProvisionConfig {
    /// Storage pool receiving config-drive volumes.
    #[serde(default = "default_pool")]
    pub pool: String,
    /// Namespace the user data secret lives in.
    #[serde(default)]
    pub secret_namespace: Option<String>,
    /// Name of the user data secret.
    #[serde(default)]
    pub user_data_secret: Option<String>,
    /// Seconds before an unresponsive external tool is killed.
    #[serde(default = "default_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_pool() -> String {
    "default".into()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            pool: default_pool(),
            secret_namespace: None,
            user_data_secret: None,
            command_timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProvisionConfig {
    /// Parse from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Parsing provisioning configuration")
    }

    /// The timeout to apply to every external command.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
