//! Seed import command
//!
//! Usage: repose import <PATH> [--db <FILE>]

use super::open_database;
use clap::Args;
use repose_core::config::Settings;
use repose_store::seed::import_seed;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Path to seed YAML file or a directory of them
    pub path: PathBuf,
}

pub async fn execute(args: ImportArgs, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let connection = open_database(&settings.database)?;

    let seed_files = if args.path.is_dir() {
        // Sorted for a deterministic import order
        let mut files: Vec<PathBuf> = std::fs::read_dir(&args.path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    } else {
        vec![args.path]
    };

    for seed_file in seed_files {
        println!("Importing {}...", seed_file.display());
        let report = import_seed(&seed_file, &connection, &settings.session).await?;
        if report.already_imported {
            println!("= Already imported (digest: {})", report.digest);
            continue;
        }
        for object in &report.objects {
            match &object.label {
                Some(label) => println!("  {}#{} ({})", object.entity, object.id, label),
                None => println!("  {}#{}", object.entity, object.id),
            }
        }
        println!("✓ Imported (digest: {})", report.digest);
    }

    Ok(())
}
