//! Config command - View and manage gpbackup configuration
//!
//! Provides the `gpbackup config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Sets individual configuration values via dot-notation keys
//! 3. Validates the configuration file and reports errors

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use gpbackup_core::config::{Config, MediaSelection, OrphanPolicy};
use tracing::info;

use super::load_config;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "transfer.max_concurrent_downloads")
        key: String,
        /// New value
        value: String,
    },
    /// Validate configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(config_path, format),
            ConfigCommand::Set { key, value } => execute_set(config_path, key, value, format),
            ConfigCommand::Validate => execute_validate(config_path, format),
        }
    }
}

fn execute_show(config_path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let config = load_config(config_path)?;

    info!(config_path = %config_path.display(), "Showing configuration");

    if matches!(format, OutputFormat::Json) {
        let json =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
        return Ok(());
    }

    if config_path.exists() {
        formatter.success(&format!("Configuration ({})", config_path.display()));
    } else {
        formatter.success("Configuration (defaults, no file yet)");
    }
    formatter.info("");
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
    for line in yaml.lines() {
        formatter.info(line);
    }
    Ok(())
}

fn execute_set(config_path: &Path, key: &str, value: &str, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let mut config = load_config(config_path)?;

    info!(key = %key, value = %value, "Setting configuration value");

    if let Err(e) = apply_config_value(&mut config, key, value) {
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "success": false,
                "key": key,
                "value": value,
                "error": e.to_string(),
            }));
        } else {
            formatter.error(&format!("Failed to set '{}': {}", key, e));
            formatter.info("");
            formatter.info("Supported keys:");
            for (key, help) in SUPPORTED_KEYS {
                formatter.info(&format!("  {:<36} - {}", key, help));
            }
        }
        return Ok(());
    }

    let errors = config.validate();
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "success": false,
                "key": key,
                "value": value,
                "errors": messages,
            }));
        } else {
            formatter.error(&format!("Invalid value for '{}': {}", key, messages.join("; ")));
        }
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
    }
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
    std::fs::write(config_path, &yaml).context("Failed to write configuration file")?;

    if matches!(format, OutputFormat::Json) {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "key": key,
            "value": value,
            "config_path": config_path.display().to_string(),
        }));
    } else {
        formatter.success(&format!("Set {} = {}", key, value));
        formatter.info(&format!("Saved to {}", config_path.display()));
    }
    Ok(())
}

fn execute_validate(config_path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);

    if !config_path.exists() {
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "errors": [],
                "defaults": true,
            }));
        } else {
            formatter.info(&format!(
                "Configuration file not found at {}",
                config_path.display()
            ));
            formatter.info(
                "Using default configuration. Run 'gpbackup config set <key> <value>' to create one.",
            );
        }
        return Ok(());
    }

    let config = match Config::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            if matches!(format, OutputFormat::Json) {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": config_path.display().to_string(),
                    "errors": [format!("Failed to parse configuration: {}", e)],
                }));
            } else {
                formatter.error(&format!("Failed to parse configuration: {}", e));
                formatter.info(&format!("File: {}", config_path.display()));
            }
            return Ok(());
        }
    };

    info!(config_path = %config_path.display(), "Validating configuration");
    let errors = config.validate();

    if matches!(format, OutputFormat::Json) {
        let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": config_path.display().to_string(),
            "errors": error_strings,
        }));
    } else if errors.is_empty() {
        formatter.success("Configuration is valid");
        formatter.info(&format!("File: {}", config_path.display()));
    } else {
        formatter.error(&format!(
            "Configuration has {} error{}:",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" }
        ));
        formatter.info(&format!("File: {}", config_path.display()));
        formatter.info("");
        for error in &errors {
            formatter.info(&format!("  {} - {}", error.field, error.message));
        }
    }
    Ok(())
}

const SUPPORTED_KEYS: &[(&str, &str)] = &[
    ("backup.dir", "Backup directory"),
    ("backup.media_type", "photo|video|all"),
    ("transfer.max_concurrent_downloads", "Downloads at once (1-32)"),
    ("transfer.download_timeout_secs", "Seconds per download attempt"),
    ("transfer.max_attempts", "Attempts per download"),
    ("transfer.list_page_size", "Items per search page (1-100)"),
    ("auth.client_secret", "Path to client_secret.json"),
    ("auth.scopes", "Comma-separated OAuth scopes"),
    ("logging.level", "trace|debug|info|warn|error"),
    ("logging.format", "text|json"),
    ("sweep.orphans", "ignore|report|delete"),
];

/// Apply a dot-notation key/value pair to a Config struct
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        // --- backup ---
        "backup.dir" => {
            config.backup.dir = PathBuf::from(value);
        }
        "backup.media_type" => {
            config.backup.media_type = match value {
                "photo" => MediaSelection::Photo,
                "video" => MediaSelection::Video,
                "all" => MediaSelection::All,
                _ => anyhow::bail!("Expected one of photo, video, all"),
            };
        }

        // --- transfer ---
        "transfer.max_concurrent_downloads" => {
            config.transfer.max_concurrent_downloads = value
                .parse::<u32>()
                .context("Expected a positive integer")?;
        }
        "transfer.download_timeout_secs" => {
            config.transfer.download_timeout_secs = value
                .parse::<u64>()
                .context("Expected a positive integer")?;
        }
        "transfer.max_attempts" => {
            config.transfer.max_attempts = value
                .parse::<u32>()
                .context("Expected a positive integer")?;
        }
        "transfer.list_page_size" => {
            config.transfer.list_page_size = value
                .parse::<u32>()
                .context("Expected a positive integer")?;
        }

        // --- auth ---
        "auth.client_secret" => {
            config.auth.client_secret = PathBuf::from(value);
        }
        "auth.scopes" => {
            config.auth.scopes = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        // --- logging ---
        "logging.level" => {
            config.logging.level = value.to_string();
        }
        "logging.format" => {
            config.logging.format = value.to_string();
        }

        // --- sweep ---
        "sweep.orphans" => {
            config.sweep.orphans = match value {
                "ignore" => OrphanPolicy::Ignore,
                "report" => OrphanPolicy::Report,
                "delete" => OrphanPolicy::Delete,
                _ => anyhow::bail!("Expected one of ignore, report, delete"),
            };
        }

        _ => {
            anyhow::bail!("Unknown configuration key: '{}'", key);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_backup_dir() {
        let mut config = Config::default();
        apply_config_value(&mut config, "backup.dir", "/srv/photos").unwrap();
        assert_eq!(config.backup.dir, PathBuf::from("/srv/photos"));
    }

    #[test]
    fn test_apply_media_type() {
        let mut config = Config::default();
        apply_config_value(&mut config, "backup.media_type", "video").unwrap();
        assert_eq!(config.backup.media_type, MediaSelection::Video);
        assert!(apply_config_value(&mut config, "backup.media_type", "PHOTOS").is_err());
    }

    #[test]
    fn test_apply_transfer_values() {
        let mut config = Config::default();
        apply_config_value(&mut config, "transfer.max_concurrent_downloads", "8").unwrap();
        apply_config_value(&mut config, "transfer.download_timeout_secs", "60").unwrap();
        apply_config_value(&mut config, "transfer.max_attempts", "5").unwrap();
        apply_config_value(&mut config, "transfer.list_page_size", "50").unwrap();
        assert_eq!(config.transfer.max_concurrent_downloads, 8);
        assert_eq!(config.transfer.download_timeout_secs, 60);
        assert_eq!(config.transfer.max_attempts, 5);
        assert_eq!(config.transfer.list_page_size, 50);
    }

    #[test]
    fn test_apply_scopes_splits_on_commas() {
        let mut config = Config::default();
        apply_config_value(&mut config, "auth.scopes", "a, b,,c").unwrap();
        assert_eq!(config.auth.scopes, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_apply_sweep_policy() {
        let mut config = Config::default();
        apply_config_value(&mut config, "sweep.orphans", "delete").unwrap();
        assert_eq!(config.sweep.orphans, OrphanPolicy::Delete);
    }

    #[test]
    fn test_apply_unknown_key_fails() {
        let mut config = Config::default();
        assert!(apply_config_value(&mut config, "sync.poll_interval", "5").is_err());
    }

    #[test]
    fn test_apply_negative_number_fails() {
        let mut config = Config::default();
        assert!(apply_config_value(&mut config, "transfer.max_attempts", "-1").is_err());
    }

    #[test]
    fn test_set_writes_file_that_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        execute_set(&path, "transfer.list_page_size", "25", OutputFormat::Json).unwrap();
        execute_set(&path, "sweep.orphans", "ignore", OutputFormat::Json).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.transfer.list_page_size, 25);
        assert_eq!(config.sweep.orphans, OrphanPolicy::Ignore);
    }

    #[test]
    fn test_set_rejects_invalid_value_without_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        execute_set(&path, "transfer.list_page_size", "500", OutputFormat::Json).unwrap();
        assert!(!path.exists());
    }
}
