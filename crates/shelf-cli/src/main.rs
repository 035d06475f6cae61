//! Shelf CLI - serve and administer a Shelf media collection store
//!
//! `shelf serve` exposes the core library over a line-delimited JSON
//! protocol; the other commands prepare and inspect the store file.

mod app;
mod cli;
mod commands;
mod config;
mod protocol;
mod server;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shelf_core::VERSION;

use crate::cli::{Cli, Commands};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shelf=info"));
    // A second init (tests, embedding) is harmless.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match &cli.command {
        Some(Commands::Init(args)) => commands::handle_init(&cli, args),
        Some(Commands::Serve(args)) => commands::handle_serve(&cli, args),
        Some(Commands::Check) => commands::handle_check(&cli),
        Some(Commands::Completions(args)) => commands::handle_completions(args.shell),
        None => {
            println!("Shelf v{}", VERSION);
            println!("\nRun `shelf --help` for usage information.");
            Ok(())
        }
    }
}
