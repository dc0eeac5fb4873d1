#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line orchestrator for the National Assembly data toolkit.
//!
//! ```text
//! assembly collect [--dataset ID] [--force]
//! assembly filter-bills [--min-age 17]
//! assembly fetch-votes
//! assembly fetch-conferences
//! assembly track-pdfs
//! assembly download-pdfs
//! assembly load-votes
//! assembly load-dataset --dataset ID
//! assembly summary --ledger FILE
//! ```
//!
//! Running `assembly` with no subcommand enters interactive mode. The API
//! key is read from `ASSEMBLY_API_KEY`.
//!
//! Uses `indicatif-log-bridge` (via [`assembly_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod interactive;
mod steps;
mod store;

use std::path::PathBuf;
use std::time::Duration;

use assembly_database::paths;
use assembly_fetcher::BatchConfig;
use clap::{Parser, Subcommand};

use crate::steps::Context;
use crate::store::StoreKind;

#[derive(Parser)]
#[command(
    name = "assembly",
    about = "Fetch, checkpoint and load Korean National Assembly Open API data"
)]
struct Cli {
    /// Directory all inputs and outputs live in
    #[arg(long, global = true, env = paths::DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Items fetched concurrently per batch
    #[arg(long, global = true, default_value_t = assembly_fetcher::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Pause between batches, in milliseconds
    #[arg(long, global = true, default_value = "2000")]
    delay_ms: u64,

    /// Fetch keys whose stored outcome is an error again
    #[arg(long, global = true)]
    retry_errors: bool,

    /// Where fetch ledgers are kept
    #[arg(long, global = true, value_enum, default_value_t = StoreKind::Json)]
    store: StoreKind,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download datasets into JSON files
    Collect {
        /// Dataset id (all datasets when omitted)
        #[arg(long)]
        dataset: Option<String>,
        /// Re-download files that already exist
        #[arg(long)]
        force: bool,
    },
    /// Keep passed bills from the collected bill files
    FilterBills {
        /// Minimum assembly age (AGE)
        #[arg(long, default_value_t = assembly_bills::DEFAULT_MIN_AGE)]
        min_age: u32,
    },
    /// Fetch plenary votes for every filtered bill
    FetchVotes,
    /// Fetch conference records for every filtered bill
    FetchConferences,
    /// Write the conference PDF tracking report
    TrackPdfs,
    /// Download conference PDFs that are not on disk yet
    DownloadPdfs,
    /// Load the vote ledger into DuckDB
    LoadVotes,
    /// Load a collected dataset into DuckDB
    LoadDataset {
        /// Dataset id
        #[arg(long)]
        dataset: String,
    },
    /// Print the summary of a JSON ledger file
    Summary {
        /// Ledger file, relative to the data directory
        #[arg(long)]
        ledger: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = assembly_cli_utils::init_logger();
    let cli = Cli::parse();

    let data_dir = cli.data_dir.unwrap_or_else(paths::data_dir);
    paths::ensure_dir(&data_dir)?;

    let ctx = Context {
        data_dir,
        batch: BatchConfig::default()
            .with_batch_size(cli.batch_size)
            .with_inter_batch_delay(Duration::from_millis(cli.delay_ms))
            .with_retry_errors(cli.retry_errors),
        store: cli.store,
        multi,
    };

    let Some(command) = cli.command else {
        return interactive::run(&ctx).await;
    };

    match command {
        Commands::Collect { dataset, force } => {
            steps::collect(&ctx, dataset.as_deref(), force).await?;
        }
        Commands::FilterBills { min_age } => steps::filter_bills(&ctx, min_age)?,
        Commands::FetchVotes => {
            steps::fetch_votes(&ctx).await?;
        }
        Commands::FetchConferences => {
            steps::fetch_conferences(&ctx).await?;
        }
        Commands::TrackPdfs => {
            steps::track_pdfs(&ctx).await?;
        }
        Commands::DownloadPdfs => {
            steps::download_pdfs(&ctx).await?;
        }
        Commands::LoadVotes => steps::load_votes(&ctx).await?,
        Commands::LoadDataset { dataset } => steps::load_dataset(&ctx, &dataset)?,
        Commands::Summary { ledger } => steps::summary(&ctx.data_dir.join(ledger)).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_options_follow_subcommand() {
        let cli = Cli::parse_from([
            "assembly",
            "fetch-votes",
            "--batch-size",
            "5",
            "--store",
            "duckdb",
            "--retry-errors",
        ]);
        assert_eq!(cli.batch_size, 5);
        assert_eq!(cli.store, StoreKind::Duckdb);
        assert!(cli.retry_errors);
        assert!(matches!(cli.command, Some(Commands::FetchVotes)));
    }

    #[test]
    fn no_subcommand_means_interactive() {
        let cli = Cli::parse_from(["assembly"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.delay_ms, 2000);
    }
}
