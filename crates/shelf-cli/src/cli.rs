use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use shelf_core::VERSION;

/// Shelf - a multi-user physical media collection tracker
#[derive(Parser)]
#[command(name = "shelf")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, env = "SHELF_CONFIG")]
    pub config: Option<String>,

    /// Path to the store file (overrides config)
    #[arg(short, long, global = true, env = "SHELF_STORE")]
    pub store: Option<String>,

    /// Directory for staging uploaded store files (overrides config)
    #[arg(long, global = true, env = "SHELF_STAGING_DIR")]
    pub staging_dir: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Arguments for the `init` command
#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,

    /// Address to write into the config
    #[arg(long)]
    pub host: Option<String>,

    /// Port to write into the config
    #[arg(long)]
    pub port: Option<u16>,
}

/// Arguments for the `serve` command
#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind (overrides config)
    #[arg(long, env = "SHELF_HOST")]
    pub host: Option<String>,

    /// Port to bind, 0 picks a free port (overrides config)
    #[arg(long, env = "SHELF_PORT")]
    pub port: Option<u16>,
}

/// Arguments for the `completions` command
#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_name = "SHELL")]
    pub shell: Shell,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a config file and create an empty store
    Init(InitArgs),

    /// Serve the request protocol over TCP
    Serve(ServeArgs),

    /// Check store integrity
    Check,

    /// Generate shell completions
    Completions(CompletionsArgs),
}
