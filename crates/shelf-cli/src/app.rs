//! Settings resolution: CLI flags and env vars over config file over defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::config::{
    default_config_path, default_staging_dir, default_store_path, expand_path, load_config,
    ShelfConfig,
};

/// Everything a command needs after config resolution.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub store_path: PathBuf,
    pub staging_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub idle_timeout: Duration,
}

impl Settings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolve the config file path from `--config`/`SHELF_CONFIG` or the XDG default.
pub fn resolve_config_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    match cli.config.as_deref() {
        Some(value) if !value.trim().is_empty() => expand_path(value),
        _ => default_config_path(),
    }
}

pub fn resolve_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let config_path = resolve_config_path(cli)?;
    let config = load_config(&config_path)?;
    settings_from(cli, config_path, config)
}

fn settings_from(cli: &Cli, config_path: PathBuf, config: ShelfConfig) -> anyhow::Result<Settings> {
    let store_path = match cli.store.as_deref().or(config.store.path.as_deref()) {
        Some(value) => expand_path(value)?,
        None => default_store_path()?,
    };
    let staging_dir = match cli
        .staging_dir
        .as_deref()
        .or(config.store.upload_staging_dir.as_deref())
    {
        Some(value) => expand_path(value)?,
        None => match cli.store.as_deref().or(config.store.path.as_deref()) {
            Some(_) => sibling_uploads_dir(&store_path),
            None => default_staging_dir()?,
        },
    };

    if config.session.idle_timeout_seconds == 0 {
        return Err(anyhow::anyhow!(
            "session.idle_timeout_seconds must be greater than zero"
        ));
    }

    Ok(Settings {
        config_path,
        store_path,
        staging_dir,
        host: config.server.host,
        port: config.server.port,
        idle_timeout: Duration::from_secs(config.session.idle_timeout_seconds),
    })
}

/// `uploads/` next to the store file.
fn sibling_uploads_dir(store_path: &Path) -> PathBuf {
    match store_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("uploads"),
        _ => PathBuf::from("uploads"),
    }
}

pub fn missing_store_message(path: &Path) -> String {
    format!(
        "No store found at {}\n\nRun:\n  shelf init\n\nOr specify a store path:\n  SHELF_STORE=/path/to/shelf.db shelf serve",
        path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from(["shelf", "--store", "/data/a.db", "check"]);
        let mut config = ShelfConfig::default();
        config.store.path = Some("/elsewhere/b.db".to_string());
        config.server.port = 9000;
        let settings = settings_from(&cli, PathBuf::from("/c.toml"), config).unwrap();
        assert_eq!(settings.store_path, PathBuf::from("/data/a.db"));
        assert_eq!(settings.staging_dir, PathBuf::from("/data/uploads"));
        assert_eq!(settings.bind_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_zero_idle_timeout_rejected() {
        let cli = Cli::parse_from(["shelf", "--store", "/data/a.db", "check"]);
        let mut config = ShelfConfig::default();
        config.session.idle_timeout_seconds = 0;
        assert!(settings_from(&cli, PathBuf::from("/c.toml"), config).is_err());
    }
}
