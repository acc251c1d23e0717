//! CLI subcommands and the helpers they share

pub mod auth;
pub mod backup;
pub mod config;
pub mod status;

use std::path::Path;

use anyhow::{bail, Context, Result};
use gpbackup_core::config::Config;
use gpbackup_photos::auth::GooglePhotosAuth;

/// Load the configuration file, or the defaults when it does not exist
///
/// Unlike [`Config::load_or_default`] a file that exists but cannot be parsed
/// is an error, so a typo never silently turns into a default setting.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Refuse to run with a configuration that fails validation
pub fn ensure_valid(config: &Config) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    bail!("Invalid configuration: {}", messages.join("; "))
}

/// Build the OAuth adapter from `auth.client_secret` and `auth.scopes`
pub fn photos_auth(config: &Config) -> Result<GooglePhotosAuth> {
    GooglePhotosAuth::from_client_secret_file(&config.auth.client_secret, config.auth.scopes.clone())
        .with_context(|| {
            format!(
                "Failed to read OAuth client secret {}. Download it from the Google API console and set auth.client_secret",
                config.auth.client_secret.display()
            )
        })
}
