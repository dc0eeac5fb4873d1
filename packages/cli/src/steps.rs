//! Pipeline steps shared by the subcommands and the interactive menu.
//!
//! Each step reads what the previous one wrote into the data directory:
//! collect -> filter-bills -> fetch-votes / fetch-conferences ->
//! track-pdfs -> download-pdfs, with the load steps copying results into
//! `DuckDB`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use assembly_api::client::OpenApiClient;
use assembly_api::datasets::{self, CollectStatus, DatasetDefinition, DatasetDocument};
use assembly_api::service_fetcher::ServiceFetcher;
use assembly_api::ApiConfig;
use assembly_bills::{BillRef, CONFERENCES_SERVICE, VOTES_SERVICE};
use assembly_cli_utils::{IndicatifProgress, MultiProgress};
use assembly_fetcher::{BatchConfig, BatchFetcher, FetchOne, RunError, RunReport};
use assembly_ledger::LedgerStore;
use assembly_ledger_models::ResultLedger;
use assembly_pdf::download::PdfDownloader;
use assembly_pdf::tracking::{PdfTarget, TrackingReport, plan_downloads, save_tracking_report};

use crate::store::{CONFERENCES_LEDGER, LedgerSpec, PDF_DOWNLOADS_LEDGER, StoreKind, VOTES_LEDGER, open_store};

type StepResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Settings every step runs with.
pub struct Context {
    pub data_dir: PathBuf,
    pub batch: BatchConfig,
    pub store: StoreKind,
    pub multi: MultiProgress,
}

impl Context {
    fn store(&self, spec: LedgerSpec) -> StepResult<Box<dyn LedgerStore>> {
        open_store(self.store, &self.data_dir, spec)
    }

    async fn load_ledger(&self, spec: LedgerSpec) -> StepResult<ResultLedger> {
        let store = self.store(spec)?;
        store.load().await?.ok_or_else(|| {
            format!(
                "No {} ledger found at {}; run the fetch step first",
                spec.name,
                store.describe()
            )
            .into()
        })
    }
}

fn api_client() -> StepResult<OpenApiClient> {
    Ok(OpenApiClient::new(ApiConfig::from_env()?)?)
}

fn log_report(label: &str, report: &RunReport, elapsed: std::time::Duration) {
    let s = &report.summary;
    log::info!(
        "{label}: {} pending, {} skipped, {} batches in {:.1}s",
        report.pending,
        report.skipped,
        report.batches,
        elapsed.as_secs_f64()
    );
    log::info!(
        "{label} ledger: {} total, {} successful, {} no data, {} failed, {} duplicates removed",
        s.total,
        s.successful,
        s.no_data,
        s.failed,
        s.duplicates_removed
    );
    if report.checkpoint_failures > 0 {
        log::warn!(
            "{label}: {} checkpoint save(s) failed",
            report.checkpoint_failures
        );
    }
}

async fn run_batch<T, K, F>(
    ctx: &Context,
    label: &str,
    config: BatchConfig,
    spec: LedgerSpec,
    items: &[T],
    key_of: K,
    fetcher: &F,
) -> StepResult<RunReport>
where
    T: serde::Serialize + Sync,
    K: Fn(&T) -> String,
    F: FetchOne<T>,
{
    let store = ctx.store(spec)?;
    log::info!("{label}: {} items, ledger {}", items.len(), store.describe());

    let progress = IndicatifProgress::batch_bar(&ctx.multi, label);
    let batcher = BatchFetcher::new(config, store).with_progress(progress);

    let start = Instant::now();
    match batcher.run(items, key_of, fetcher).await {
        Ok(report) => {
            log_report(label, &report, start.elapsed());
            Ok(report)
        }
        Err(e @ RunError::FinalPersist { .. }) => {
            let message = e.to_string();
            if let Some(report) = e.into_report() {
                log_report(label, &report, start.elapsed());
            }
            Err(message.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Collects one dataset, or all of them.
///
/// # Errors
///
/// Returns an error if the API key is missing, the dataset id is unknown,
/// or an output file cannot be written.
pub async fn collect(ctx: &Context, dataset: Option<&str>, force: bool) -> StepResult {
    let defs: Vec<DatasetDefinition> = match dataset {
        Some(id) => vec![datasets::find_dataset(id).ok_or_else(|| format!("Unknown dataset: {id}"))?],
        None => datasets::all_datasets(),
    };
    let client = api_client()?;

    let total_runs: usize = defs.iter().map(|d| d.runs().len()).sum();
    let progress = IndicatifProgress::steps_bar(
        &ctx.multi,
        "Collecting",
        u64::try_from(total_runs).unwrap_or_default(),
    );

    let mut written = 0;
    let mut skipped = 0;
    let mut incomplete = 0;
    let mut rows = 0;
    for def in &defs {
        progress.set_message(def.name.clone());
        for file in datasets::collect_dataset(&client, def, &ctx.data_dir, force).await? {
            match file.status {
                CollectStatus::Written { total_items } => {
                    written += 1;
                    rows += total_items;
                }
                CollectStatus::Skipped => skipped += 1,
                CollectStatus::Incomplete { .. } => incomplete += 1,
            }
            progress.inc(1);
        }
    }
    progress.finish(format!("{written} files written"));

    log::info!("Collect: {written} files written ({rows} rows), {skipped} already present");
    if incomplete > 0 {
        log::warn!("Collect: {incomplete} runs did not finish; run collect again to retry them");
    }
    Ok(())
}

/// Filters the collected bill files down to passed bills.
///
/// # Errors
///
/// Returns an error if the data directory cannot be read or the output
/// cannot be written.
pub fn filter_bills(ctx: &Context, min_age: u32) -> StepResult {
    let filtered = assembly_bills::filter_bill_files(&ctx.data_dir, min_age)?;
    let path = assembly_bills::save_filtered_bills(&ctx.data_dir, &filtered)?;
    log::info!(
        "Filter: {} passed bills (AGE >= {min_age}) saved to {}",
        filtered.total_count,
        path.display()
    );
    Ok(())
}

/// Fetches plenary votes for every filtered bill.
///
/// # Errors
///
/// Returns an error if the bill list is missing or the final ledger save
/// fails.
pub async fn fetch_votes(ctx: &Context) -> StepResult<RunReport> {
    let bills = assembly_bills::load_filtered_bills(&ctx.data_dir)?;
    let fetcher = ServiceFetcher::new(api_client()?, VOTES_SERVICE, assembly_bills::vote_params);
    run_batch(
        ctx,
        "Votes",
        ctx.batch.clone(),
        VOTES_LEDGER,
        &bills.data,
        BillRef::key,
        &fetcher,
    )
    .await
}

/// Fetches conference records for every filtered bill.
///
/// # Errors
///
/// Returns an error if the bill list is missing or the final ledger save
/// fails.
pub async fn fetch_conferences(ctx: &Context) -> StepResult<RunReport> {
    let bills = assembly_bills::load_filtered_bills(&ctx.data_dir)?;
    let fetcher = ServiceFetcher::new(
        api_client()?,
        CONFERENCES_SERVICE,
        assembly_bills::conference_params,
    );
    run_batch(
        ctx,
        "Conferences",
        ctx.batch.clone(),
        CONFERENCES_LEDGER,
        &bills.data,
        |b: &BillRef| b.bill_id.clone(),
        &fetcher,
    )
    .await
}

/// Writes the PDF tracking report from the conference ledger.
///
/// # Errors
///
/// Returns an error if the conference ledger is missing or the report
/// cannot be written.
pub async fn track_pdfs(ctx: &Context) -> StepResult<TrackingReport> {
    let ledger = ctx.load_ledger(CONFERENCES_LEDGER).await?;
    let report = plan_downloads(&ledger, &ctx.data_dir);

    let path = ctx.data_dir.join(assembly_pdf::TRACKING_FILE);
    save_tracking_report(&path, &report)?;

    let s = &report.summary;
    log::info!(
        "PDF tracking: {} tracked, {} already on disk, {} to download, {} skipped; saved to {}",
        s.total_pdfs_tracked,
        s.total_existing_files,
        s.total_to_download,
        s.total_skipped,
        path.display()
    );
    Ok(report)
}

/// Downloads every tracked conference PDF that is not yet on disk.
/// Failed downloads are retried on the next run.
///
/// # Errors
///
/// Returns an error if the conference ledger is missing or the final
/// download ledger save fails.
pub async fn download_pdfs(ctx: &Context) -> StepResult<RunReport> {
    let report = track_pdfs(ctx).await?;
    let downloader = PdfDownloader::new(ctx.data_dir.clone())?;

    run_batch(
        ctx,
        "PDFs",
        ctx.batch.clone().with_retry_errors(true),
        PDF_DOWNLOADS_LEDGER,
        &report.pdfs,
        PdfTarget::key,
        &downloader,
    )
    .await
}

/// Loads the vote ledger into `plenary_votes`.
///
/// # Errors
///
/// Returns an error if the vote ledger is missing or the database load
/// fails.
pub async fn load_votes(ctx: &Context) -> StepResult {
    let ledger = ctx.load_ledger(VOTES_LEDGER).await?;
    let mut conn = assembly_database::open(&assembly_database::paths::database_path(&ctx.data_dir))?;
    let stats = assembly_database::votes::load_votes(&mut conn, &ledger)?;
    log::info!(
        "Load votes: {} outcomes processed, {} vote rows found, {} inserted",
        stats.processed,
        stats.found,
        stats.inserted
    );
    Ok(())
}

/// Reads every collected file of `def` and returns the concatenated rows.
///
/// # Errors
///
/// Returns an error if a present file cannot be parsed.
pub fn read_collected(data_dir: &Path, def: &DatasetDefinition) -> StepResult<Vec<serde_json::Value>> {
    let mut records = Vec::new();
    for run in def.runs() {
        let path = data_dir.join(&run.filename);
        if !path.is_file() {
            log::warn!("{} not found, skipping", path.display());
            continue;
        }
        let document: DatasetDocument = serde_json::from_slice(&std::fs::read(&path)?)?;
        records.extend(document.data);
    }
    Ok(records)
}

/// Loads a collected dataset into `dataset_records`.
///
/// # Errors
///
/// Returns an error if the dataset id is unknown, a file cannot be parsed,
/// or the database load fails.
pub fn load_dataset(ctx: &Context, dataset: &str) -> StepResult {
    let def = datasets::find_dataset(dataset).ok_or_else(|| format!("Unknown dataset: {dataset}"))?;
    let records = read_collected(&ctx.data_dir, &def)?;

    let mut conn = assembly_database::open(&assembly_database::paths::database_path(&ctx.data_dir))?;
    let loaded = assembly_database::datasets::load_dataset(&mut conn, &def.id, &records)?;
    log::info!("Load dataset {}: {loaded} records", def.id);
    Ok(())
}

/// Prints the summary of a JSON ledger file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub async fn summary(ledger_path: &Path) -> StepResult {
    let document = assembly_ledger::json_file::read_document(ledger_path).await?;
    let ledger = ResultLedger::from(document.results);
    let recomputed = ledger.summary();

    println!("Ledger:             {}", ledger_path.display());
    println!("Total outcomes:     {}", recomputed.total);
    println!("  successful:       {}", recomputed.successful);
    println!("  no data:          {}", recomputed.no_data);
    println!("  failed:           {}", recomputed.failed);
    println!("Duplicates removed: {}", document.summary.duplicates_removed);
    println!("Processed:          {}", document.summary.processed_date.to_rfc3339());
    if let Some(batch) = document.summary.batch_completed {
        println!("Last checkpoint:    batch {batch}");
    }
    Ok(())
}
