//! Configuration loading: flags and environment over `config.yaml`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// On-disk configuration (`config.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// API token; flags and the environment take precedence.
    pub api_token: Option<String>,
    /// Policy applied when onboarding names none.
    pub default_policy_id: Option<String>,
    /// Email domains allowed to onboard. Empty means any.
    #[serde(default)]
    pub allowed_email_domains: Vec<String>,
    /// API base URL override.
    pub base_url: Option<String>,
}

impl FileConfig {
    /// Load the file if it exists; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))
    }
}

/// Fully resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_token: String,
    pub default_policy_id: Option<String>,
    pub allowed_email_domains: Vec<String>,
    pub base_url: Option<String>,
}

/// Merge the token/base-url flags (clap already folded the environment in)
/// with the config file. The token is required from one of the sources.
pub fn resolve(
    token_flag: Option<String>,
    base_url_flag: Option<String>,
    file: FileConfig,
) -> Result<AppConfig> {
    let api_token = token_flag
        .or(file.api_token)
        .context("API token missing (use --api-token, PAGERDUTY_API_TOKEN, or config.yaml)")?;

    Ok(AppConfig {
        api_token,
        default_policy_id: file.default_policy_id,
        allowed_email_domains: file.allowed_email_domains,
        base_url: base_url_flag.or(file.base_url),
    })
}
