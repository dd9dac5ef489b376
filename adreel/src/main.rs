use std::path::PathBuf;
use std::sync::Arc;

use adreel::logging::{DEFAULT_LOG_FILTER, init_logging};
use adreel::{AdContext, Campaign, SdkOptions, SessionController, TracingSink};
use anyhow::Context;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Options file (JSON, camelCase keys)
    #[arg(short, long, global = true, env = "ADREEL_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download and cache the assets of every campaign in a file
    Precache {
        /// JSON array of campaigns
        #[arg(long)]
        campaigns: PathBuf,
    },
    /// Print the effective options
    Options,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(DEFAULT_LOG_FILTER, args.json_logs);

    let options = SdkOptions::load(args.config.as_deref()).context("Failed to load options")?;

    match args.command {
        Command::Options => {
            println!("{}", serde_json::to_string_pretty(&options)?);
            Ok(())
        }
        Command::Precache { campaigns } => precache(options, campaigns).await,
    }
}

async fn precache(options: SdkOptions, campaigns_file: PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&campaigns_file)
        .with_context(|| format!("Failed to read {}", campaigns_file.display()))?;
    let campaigns: Vec<Campaign> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid campaign list in {}", campaigns_file.display()))?;

    // Nothing renders in the CLI; the queue is dropped and intents are discarded.
    let (context, _queue) = AdContext::with_http(options, Arc::new(TracingSink))
        .context("Failed to initialise the ad context")?;
    let sessions = SessionController::new(context.clone());

    let ids: Vec<String> = campaigns.iter().map(|c| c.id.clone()).collect();
    let results = sessions.prepare_all(campaigns).await;

    let mut failed = 0;
    for (id, result) in ids.iter().zip(&results) {
        match result {
            Ok(_) => println!("{id}: ready"),
            Err(e) => {
                failed += 1;
                println!("{id}: {e}");
            }
        }
    }

    let removed = sessions.sweep();
    println!(
        "{} ready, {failed} failed, {removed} stale files removed",
        results.len() - failed
    );

    context.shutdown().context("Failed to persist the cache manifest")?;
    Ok(())
}
