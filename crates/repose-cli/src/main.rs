//! Repose CLI
//!
//! Imports YAML graph seeds into a SQLite database and reads rows back

use clap::{Parser, Subcommand};
use repose_core::config::Settings;
use repose_core::logging_facility;
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "repose")]
#[command(about = "Repose - persist object graphs into SQLite", long_about = None)]
struct Cli {
    /// Settings file (TOML); `REPOSE__*` environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides `database.path`
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import a seed file into the database
    Import(commands::import::ImportArgs),
    /// Print the stored state of one entity as JSON
    Snapshot(commands::snapshot::SnapshotArgs),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.database.path = db;
    }
    logging_facility::init_with_filter(settings.logging.profile, settings.logging.filter.as_deref());
    tracing::debug!(db = %settings.database.path.display(), "settings loaded");

    // Sessions are single-threaded; the store hands SQLite work to the
    // blocking pool
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Import(args) => commands::import::execute(args, &settings).await,
            Commands::Snapshot(args) => commands::snapshot::execute(args, &settings).await,
        }
    })
}
