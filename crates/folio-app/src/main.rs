// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Folio — Historical document restoration
//
// Entry point. Initialises logging, loads configuration, and dispatches the
// requested command.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use folio_core::PipelineConfig;

#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Restore and analyse scanned historical documents")]
struct Cli {
    /// JSON pipeline configuration; missing keys take their defaults.
    #[arg(long, global = true, env = "FOLIO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Detect page defects, repair them, and report the page layout.
    Restore {
        image: PathBuf,
        /// Write the restored page here as PNG.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the full analysis pipeline over one or more pages.
    Analyze {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Directory holding the recognition models.
        #[arg(long, env = "FOLIO_MODELS")]
        models: Option<PathBuf>,
        /// Archive records as JSON files in this directory.
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Scanner stage only.
        #[arg(long)]
        lite: bool,
        /// Print stage messages to stderr as they are produced.
        #[arg(long)]
        progress: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::info!("Folio starting");
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Restore { image, output } => commands::restore(&image, output.as_deref()),
        Command::Analyze {
            images,
            models,
            archive,
            lite,
            progress,
        } => {
            let options = commands::AnalyzeOptions {
                models,
                archive,
                lite,
                progress,
            };
            commands::analyze(config, &images, options).await
        }
    }
}
