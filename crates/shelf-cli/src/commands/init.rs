use shelf_core::{SqliteStorage, StorageEngine};

use crate::app::resolve_settings;
use crate::cli::{Cli, InitArgs};
use crate::config::{write_config, ShelfConfig};

pub fn handle_init(cli: &Cli, args: &InitArgs) -> anyhow::Result<()> {
    let mut settings = resolve_settings(cli)?;
    if let Some(host) = args.host.clone() {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }

    if settings.config_path.exists() && !args.force {
        return Err(anyhow::anyhow!(
            "Config already exists at {}\n\nUse --force to overwrite it.",
            settings.config_path.display()
        ));
    }

    if let Some(parent) = settings.store_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }
    let existed = settings.store_path.exists();
    let storage = SqliteStorage::open_or_create(&settings.store_path)?;
    let metadata = storage.metadata()?;
    storage.close()?;

    std::fs::create_dir_all(&settings.staging_dir).map_err(|e| {
        anyhow::anyhow!(
            "Failed to create staging directory {}: {}",
            settings.staging_dir.display(),
            e
        )
    })?;

    let config = ShelfConfig::new(
        &settings.store_path,
        &settings.staging_dir,
        settings.host.clone(),
        settings.port,
    );
    write_config(&settings.config_path, &config)?;
    tracing::info!(store = %settings.store_path.display(), store_id = %metadata.store_id, "initialized");

    if !cli.quiet {
        if existed {
            println!("Using existing store at {}", settings.store_path.display());
        } else {
            println!("Initialized new store at {}", settings.store_path.display());
        }
        println!("Wrote config to {}", settings.config_path.display());
    }
    Ok(())
}
