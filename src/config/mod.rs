mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./control-escolar.toml",
        "~/.config/control-escolar/config.toml",
        "/etc/control-escolar/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.app.utc_offset().is_none() {
        anyhow::bail!(
            "app.timezone must be UTC or an offset like -06:00, got '{}'",
            config.app.timezone
        );
    }

    if !(4..=31).contains(&config.security.bcrypt_cost) {
        anyhow::bail!(
            "security.bcrypt_cost must be between 4 and 31, got {}",
            config.security.bcrypt_cost
        );
    }

    if !config.mail.from.contains('@') {
        anyhow::bail!("mail.from is not an email address: '{}'", config.mail.from);
    }

    config.database.validate()?;

    if let Some(dir) = &config.app.migrations_dir {
        if !dir.is_dir() {
            tracing::warn!("Migrations directory does not exist: {:?}", dir);
        }
    }

    Ok(())
}
