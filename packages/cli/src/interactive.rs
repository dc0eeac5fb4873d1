//! Interactive mode: pick a step from a menu and answer its prompts.

use assembly_api::datasets;
use dialoguer::{Confirm, Input, Select};

use crate::steps::{self, Context};

/// A pipeline step offered in the menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    RunPipeline,
    Collect,
    FilterBills,
    FetchVotes,
    FetchConferences,
    TrackPdfs,
    DownloadPdfs,
    LoadVotes,
    LoadDataset,
    Summary,
}

impl Step {
    const ALL: &[Self] = &[
        Self::RunPipeline,
        Self::Collect,
        Self::FilterBills,
        Self::FetchVotes,
        Self::FetchConferences,
        Self::TrackPdfs,
        Self::DownloadPdfs,
        Self::LoadVotes,
        Self::LoadDataset,
        Self::Summary,
    ];

    #[must_use]
    const fn label(self) -> &'static str {
        match self {
            Self::RunPipeline => "Run full pipeline",
            Self::Collect => "Collect datasets",
            Self::FilterBills => "Filter passed bills",
            Self::FetchVotes => "Fetch plenary votes",
            Self::FetchConferences => "Fetch bill conferences",
            Self::TrackPdfs => "Track conference PDFs",
            Self::DownloadPdfs => "Download conference PDFs",
            Self::LoadVotes => "Load votes into DuckDB",
            Self::LoadDataset => "Load a dataset into DuckDB",
            Self::Summary => "Show ledger summary",
        }
    }
}

/// Asks for one dataset id. With `allow_all`, an extra "All datasets"
/// entry returns `None`.
fn pick_dataset(allow_all: bool) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let defs = datasets::all_datasets();
    let mut labels: Vec<String> = defs
        .iter()
        .map(|d| format!("{} ({})", d.name, d.id))
        .collect();
    if allow_all {
        labels.insert(0, "All datasets".to_string());
    }

    let idx = Select::new()
        .with_prompt("Dataset")
        .items(&labels)
        .default(0)
        .interact()?;

    if allow_all {
        Ok(idx.checked_sub(1).map(|i| defs[i].id.clone()))
    } else {
        Ok(Some(defs[idx].id.clone()))
    }
}

/// Asks for the minimum assembly age. Unparsable answers fall back to the
/// default.
fn prompt_min_age() -> Result<u32, Box<dyn std::error::Error>> {
    let value: String = Input::new()
        .with_prompt("Minimum assembly age (AGE)")
        .default(assembly_bills::DEFAULT_MIN_AGE.to_string())
        .interact_text()?;
    Ok(parse_min_age(&value))
}

fn parse_min_age(value: &str) -> u32 {
    value.trim().parse().unwrap_or_else(|_| {
        log::warn!(
            "Invalid minimum age {value:?}, using {}",
            assembly_bills::DEFAULT_MIN_AGE
        );
        assembly_bills::DEFAULT_MIN_AGE
    })
}

/// Runs the menu once.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected step fails.
pub async fn run(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    println!("National Assembly Data Toolkit");
    println!("Data directory: {}", ctx.data_dir.display());
    println!();

    let labels: Vec<&str> = Step::ALL.iter().map(|s| s.label()).collect();
    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match Step::ALL[idx] {
        Step::RunPipeline => {
            let min_age = prompt_min_age()?;
            if !Confirm::new()
                .with_prompt("Collect, filter, fetch votes and conferences, then download PDFs?")
                .default(true)
                .interact()?
            {
                println!("Cancelled.");
                return Ok(());
            }
            steps::collect(ctx, Some("bills"), false).await?;
            steps::filter_bills(ctx, min_age)?;
            steps::fetch_votes(ctx).await?;
            steps::fetch_conferences(ctx).await?;
            steps::download_pdfs(ctx).await?;
        }
        Step::Collect => {
            let dataset = pick_dataset(true)?;
            let force = Confirm::new()
                .with_prompt("Re-download files that already exist?")
                .default(false)
                .interact()?;
            steps::collect(ctx, dataset.as_deref(), force).await?;
        }
        Step::FilterBills => steps::filter_bills(ctx, prompt_min_age()?)?,
        Step::FetchVotes => {
            steps::fetch_votes(ctx).await?;
        }
        Step::FetchConferences => {
            steps::fetch_conferences(ctx).await?;
        }
        Step::TrackPdfs => {
            steps::track_pdfs(ctx).await?;
        }
        Step::DownloadPdfs => {
            steps::download_pdfs(ctx).await?;
        }
        Step::LoadVotes => steps::load_votes(ctx).await?,
        Step::LoadDataset => {
            if let Some(dataset) = pick_dataset(false)? {
                steps::load_dataset(ctx, &dataset)?;
            }
        }
        Step::Summary => {
            let file: String = Input::new()
                .with_prompt("Ledger file")
                .default(crate::store::VOTES_LEDGER.json_file.to_string())
                .interact_text()?;
            steps::summary(&ctx.data_dir.join(file)).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_step_has_a_distinct_label() {
        let mut labels: Vec<&str> = Step::ALL.iter().map(|s| s.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), Step::ALL.len());
    }

    #[test]
    fn min_age_answer_is_parsed_or_defaulted() {
        assert_eq!(parse_min_age(" 20 "), 20);
        assert_eq!(parse_min_age("twenty"), assembly_bills::DEFAULT_MIN_AGE);
        assert_eq!(parse_min_age(""), assembly_bills::DEFAULT_MIN_AGE);
    }
}
