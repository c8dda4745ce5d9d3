use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use wdsync_adapters::RecordKind;
use wdsync_core::ReconcileMode;

mod logging;

#[derive(Debug, Parser)]
#[command(name = "wdsync")]
#[command(about = "Sync Workday users and cost centers into the config store")]
struct Cli {
    /// Turn on verbose output
    #[arg(long, global = true)]
    verbose: bool,
    /// Turn on debug output
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Update the Workday user configuration
    Users(ModeArgs),
    /// Update the cost center configuration
    CostCenters(ModeArgs),
}

#[derive(Debug, Args)]
struct ModeArgs {
    /// Only process new entries
    #[arg(long)]
    quick: bool,
    /// Deactivate entries that are no longer in the source
    #[arg(long)]
    backcheck: bool,
    /// Rebuild config from scratch
    #[arg(long, conflicts_with_all = ["quick", "backcheck"])]
    rebuild: bool,
}

impl Commands {
    fn resolve(&self) -> Result<(RecordKind, ReconcileMode)> {
        let (kind, args) = match self {
            Commands::Users(args) => (RecordKind::Workers, args),
            Commands::CostCenters(args) => (RecordKind::CostCenters, args),
        };
        let mode = ReconcileMode::from_flags(args.quick, args.rebuild, args.backcheck)?;
        Ok((kind, mode))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::level_for(cli.verbose, cli.debug));

    let (kind, mode) = cli.command.resolve()?;
    let summary = wdsync_sync::run_sync_once_from_env(kind, mode).await?;
    let result = summary.result;

    println!("Documents inserted in config database: {}", result.inserted_count);
    println!("Documents updated in config database: {}", result.updated_count);
    println!(
        "sync complete: run_id={} mode={} new={} skipped={} deactivated={} rejected={}",
        summary.run_id,
        summary.mode,
        result.new_identifier_count,
        result.skipped_count(),
        result.deactivated_count,
        result.rejected_count
    );

    Ok(())
}
