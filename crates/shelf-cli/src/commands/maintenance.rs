use shelf_core::{SqliteStorage, StorageEngine};

use crate::app::{missing_store_message, resolve_settings};
use crate::cli::Cli;

pub fn handle_check(cli: &Cli) -> anyhow::Result<()> {
    let settings = resolve_settings(cli)?;
    if !settings.store_path.exists() {
        return Err(anyhow::anyhow!(missing_store_message(&settings.store_path)));
    }

    let storage = match SqliteStorage::open(&settings.store_path) {
        Ok(storage) => storage,
        Err(err) => {
            eprintln!("Integrity check: FAILED");
            eprintln!("- error: {}", err);
            return Err(anyhow::anyhow!("Integrity check failed"));
        }
    };

    match storage.check_integrity().and_then(|()| storage.counts()) {
        Ok(counts) => {
            if !cli.quiet {
                println!("Integrity check: OK");
                println!("- foreign keys: OK");
                println!("- metadata keys: OK");
                println!("- users: {}", counts.users);
                println!("- items: {}", counts.items);
            }
        }
        Err(err) => {
            eprintln!("Integrity check: FAILED");
            eprintln!("- error: {}", err);
            eprintln!("Hint: Import a known-good export before serving again.");
            return Err(anyhow::anyhow!("Integrity check failed"));
        }
    }
    Ok(())
}
