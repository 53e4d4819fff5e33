use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use injurylens_common::config::load_config;
use injurylens_common::{AppConfig, FileConfig};
use injurylens_scout::pipeline::{build_labeler, build_source, classify_stage, search_stage};
use injurylens_scout::sink::{labels_output_path, newest_raw_file, raw_output_path, read_items};
use injurylens_scout::RunStats;

#[derive(Parser)]
#[command(name = "injurylens", about = "Child injury posts: Reddit search and LLM labeling")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = "./config/injurylens.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search the configured channels and write matched posts
    Search {
        /// Output file (.jsonl or .jsonl.gz). Defaults to a dated file in --raw-dir.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value = "data/raw")]
        raw_dir: PathBuf,
    },
    /// Label previously matched posts
    Classify {
        /// Search output to label. Defaults to the newest file in --raw-dir.
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value = "data/raw")]
        raw_dir: PathBuf,
        #[arg(long, default_value = "data/interim")]
        interim_dir: PathBuf,
    },
    /// Search, then label what was found
    Run {
        #[arg(long, default_value = "data/raw")]
        raw_dir: PathBuf,
        #[arg(long, default_value = "data/interim")]
        interim_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("injurylens=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(config = %cli.config.display(), "InjuryLens starting...");

    let config = load_config(&cli.config)?;
    config.validate().context("Invalid configuration")?;
    let app = AppConfig::from_env();

    let mut stats = RunStats::default();
    match cli.command {
        Command::Search { out, raw_dir } => {
            let out = out.unwrap_or_else(|| raw_output_path(&raw_dir, chrono::Utc::now().date_naive()));
            stats.matching = Some(search(&config, &app, &out).await?);
        }
        Command::Classify {
            input,
            out,
            raw_dir,
            interim_dir,
        } => {
            let input = match input {
                Some(path) => path,
                None => match newest_raw_file(&raw_dir)? {
                    Some(path) => path,
                    None => bail!("No search output found in {}", raw_dir.display()),
                },
            };
            let out = out.unwrap_or_else(|| labels_output_path(&interim_dir, &input));
            stats.classification = Some(classify(&config, &app, &input, &out).await?);
        }
        Command::Run { raw_dir, interim_dir } => {
            let raw = raw_output_path(&raw_dir, chrono::Utc::now().date_naive());
            let labels = labels_output_path(&interim_dir, &raw);
            stats.matching = Some(search(&config, &app, &raw).await?);
            stats.classification = Some(classify(&config, &app, &raw, &labels).await?);
        }
    }

    println!("{stats}");
    Ok(())
}

async fn search(config: &FileConfig, app: &AppConfig, out: &std::path::Path) -> Result<injurylens_scout::MatchStats> {
    let source = build_source(config, app)?;
    info!(out = %out.display(), "Search stage");
    search_stage(config, &source, out).await
}

async fn classify(
    config: &FileConfig,
    app: &AppConfig,
    input: &std::path::Path,
    out: &std::path::Path,
) -> Result<injurylens_scout::ClassifyStats> {
    let labeler = build_labeler(config, app)?;
    let items = read_items(input)?;
    info!(input = %input.display(), out = %out.display(), items = items.len(), "Classify stage");
    classify_stage(config, items, &labeler, out).await
}
