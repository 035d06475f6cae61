use std::io::Write;
use std::sync::Arc;

use shelf_core::{Database, MemorySessionStore, Shelf};

use crate::app::resolve_settings;
use crate::cli::{Cli, ServeArgs};
use crate::server;

pub fn handle_serve(cli: &Cli, args: &ServeArgs) -> anyhow::Result<()> {
    let mut settings = resolve_settings(cli)?;
    if let Some(host) = args.host.clone() {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }

    if let Some(parent) = settings.store_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::open(&settings.store_path, &settings.staging_dir)?;
    tracing::info!(
        store = %settings.store_path.display(),
        staging = %settings.staging_dir.display(),
        "store ready"
    );

    let shelf = Arc::new(Shelf::new(
        db,
        MemorySessionStore::new(settings.idle_timeout),
    ));
    let listener = server::bind(&settings.bind_address())?;
    let address = listener.local_addr()?;

    let mut stdout = std::io::stdout();
    writeln!(stdout, "Listening on {}", address)?;
    stdout.flush()?;
    tracing::info!(%address, "listening");

    server::run(listener, shelf)
}
