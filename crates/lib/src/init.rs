//! Initialize the configuration directory: create ~/.switchboard, a default config and the data directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Ensure the configuration directory has been initialized (config file exists, and the data
/// directory exists when the ledger journal is enabled).
pub fn require_initialized(config_path: &Path, config: &config::Config) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `switchboard init` first (config file not found: {})",
            config_path.display()
        );
    }
    if config.ledger.journal {
        let data_dir = config::resolve_data_dir(config, config_path);
        if !data_dir.exists() {
            anyhow::bail!(
                "configuration not initialized; run `switchboard init` first (data directory not found: {})",
                data_dir.display()
            );
        }
    }
    Ok(())
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the data directory used by the ledger journal and the orphan store.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = b"{}";
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let data_dir = config::resolve_data_dir(&config, config_path);
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        log::info!("created data directory at {}", data_dir.display());
    } else {
        log::debug!("data directory already exists at {}, skipping", data_dir.display());
    }

    Ok(config_dir.to_path_buf())
}
