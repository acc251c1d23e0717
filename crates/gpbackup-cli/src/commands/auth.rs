//! Auth commands - Login, Logout, and Status for Google Photos
//!
//! Provides the `gpbackup auth` CLI subcommands which:
//! 1. `login`  - Runs the installed-app OAuth2 flow and stores the tokens
//!    in the system keyring.
//! 2. `logout` - Clears the tokens from the keyring.
//! 3. `status` - Shows whether usable tokens are stored.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use super::{load_config, photos_auth};
use crate::output::{get_formatter, OutputFormat, OutputFormatter};

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Authorize gpbackup to read your Google Photos library
    Login {
        /// OAuth client secret file (overrides auth.client_secret)
        #[arg(long)]
        client_secret: Option<PathBuf>,
    },
    /// Remove stored credentials
    Logout,
    /// Check authentication status
    Status,
}

impl AuthCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let fmt = get_formatter(format);
        let mut config = load_config(config_path)?;

        match self {
            AuthCommand::Login { client_secret } => {
                if let Some(path) = client_secret {
                    config.auth.client_secret = path.clone();
                }
                execute_login(&config, &*fmt).await
            }
            AuthCommand::Logout => execute_logout(&config, &*fmt),
            AuthCommand::Status => execute_status(&config, &*fmt, format),
        }
    }
}

async fn execute_login(
    config: &gpbackup_core::config::Config,
    fmt: &dyn OutputFormatter,
) -> Result<()> {
    let auth = photos_auth(config)?;
    info!(client_id = %auth.account(), "Starting OAuth2 login");

    fmt.info("Opening browser for Google login...");
    let tokens = auth.login().await.context("OAuth2 login failed")?;

    fmt.success("Authenticated with Google Photos");
    fmt.info("Credentials stored in the system keyring");
    if tokens.refresh_token.is_none() {
        fmt.warn("No refresh token was issued; you will need to log in again when the access token expires");
    }
    Ok(())
}

fn execute_logout(config: &gpbackup_core::config::Config, fmt: &dyn OutputFormatter) -> Result<()> {
    let auth = photos_auth(config)?;
    info!(client_id = %auth.account(), "Logging out");

    auth.logout()
        .context("Failed to clear tokens from keyring")?;

    fmt.success("Logged out successfully");
    fmt.info("Credentials removed from keyring");
    Ok(())
}

fn execute_status(
    config: &gpbackup_core::config::Config,
    fmt: &dyn OutputFormatter,
    format: OutputFormat,
) -> Result<()> {
    let auth = photos_auth(config)?;

    let (token_status, tokens) = match auth.stored_tokens() {
        Ok(Some(tokens)) if tokens.is_expired() && tokens.refresh_token.is_some() => {
            ("Expired (will refresh)", Some(tokens))
        }
        Ok(Some(tokens)) if tokens.is_expired() => ("Expired", Some(tokens)),
        Ok(Some(tokens)) => ("Valid", Some(tokens)),
        Ok(None) => ("Not found", None),
        Err(_) => ("Error reading keyring", None),
    };

    if matches!(format, OutputFormat::Json) {
        let json = serde_json::json!({
            "authenticated": tokens.is_some(),
            "client_id": auth.account(),
            "token_status": token_status,
            "expires_at": tokens.as_ref().map(|t| t.expires_at.to_rfc3339()),
            "has_refresh_token": tokens.as_ref().map_or(false, |t| t.refresh_token.is_some()),
            "scopes": config.auth.scopes,
        });
        fmt.print_json(&json);
        return Ok(());
    }

    match &tokens {
        Some(tokens) => {
            fmt.success("Authenticated with Google Photos");
            fmt.info(&format!("Token status:  {}", token_status));
            fmt.info(&format!(
                "Expires at:    {}",
                tokens.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        None => {
            fmt.info(&format!("Authentication status: {}", token_status));
            fmt.info("Run 'gpbackup auth login' to authenticate");
        }
    }
    fmt.info(&format!("Client ID:     {}", auth.account()));
    Ok(())
}
