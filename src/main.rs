//! TFT Harvester CLI
//!
//! Extracts TFT match data from the Riot API with adaptive rate limiting
//! and restart-safe progress tracking.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tft_harvester::{Config, Database, Harvester, JsonlSink};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "tft-harvester")]
#[command(about = "Resumable TFT match data extractor for the Riot API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured feed to completion, resuming prior progress
    Sync,

    /// Show persisted extraction progress
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; keep stdout clean for emitted records
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        Commands::Sync => sync(config).await?,
        Commands::Stats => show_stats(&config).await?,
    }

    Ok(())
}

async fn sync(config: Config) -> Result<()> {
    info!(
        "Starting sync: {} players, {} leagues, window start {}",
        config.followed_players.len(),
        config.followed_leagues.len(),
        config.initial_timestamp
    );

    let db = Database::new(&config.database_path).await?;
    let mut harvester = Harvester::new(config, db, JsonlSink).await?;
    harvester.run().await
}

async fn show_stats(config: &Config) -> Result<()> {
    let db = Database::new(&config.database_path).await?;
    let stats = db.stats().await?;

    println!("\n{}", "TFT HARVESTER STATE".bold());
    println!("{}", "=".repeat(40));
    println!("Tracked partitions:   {}", stats.partitions);
    println!("Processed matches:    {}", stats.processed_matches);
    println!(
        "Open cursors:         {} {}",
        stats.open_cursors,
        if stats.open_cursors > 0 {
            "(resume pending)".yellow().to_string()
        } else {
            String::new()
        }
    );
    println!("Known quota buckets:  {}", stats.quota_buckets);
    Ok(())
}
