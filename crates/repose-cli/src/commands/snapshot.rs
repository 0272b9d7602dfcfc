//! Snapshot command

use super::open_database;
use clap::Args;
use repose_core::config::Settings;
use repose_store::seed::parse_seed_file;
use repose_store::snapshot::read_snapshot;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Seed file declaring the mapping
    pub seed: PathBuf,

    #[arg(long)]
    pub entity: String,

    #[arg(long)]
    pub id: String,
}

pub async fn execute(
    args: SnapshotArgs,
    settings: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    let document = parse_seed_file(&args.seed)?;
    let connection = open_database(&settings.database)?;

    match read_snapshot(&document, &connection, &args.entity, &args.id).await? {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        None => Err(format!("no row for {}#{}", args.entity, args.id).into()),
    }
}
