//! Bulk dataset definitions, loaded from embedded TOML configs.
//!
//! Each `.toml` file in `packages/api/datasets/` is baked into the binary at
//! compile time via [`include_str!`]. A dataset either maps to one output
//! file or iterates an integer parameter (`DAESU`, `AGE`) and writes one
//! file per value.

use std::path::{Path, PathBuf};

use assembly_ledger::json_file::write_atomic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ApiError, client::OpenApiClient};

/// TOML configs embedded at compile time.
const DATASET_TOMLS: &[(&str, &str)] = &[
    (
        "members_integrated",
        include_str!("../datasets/members_integrated.toml"),
    ),
    (
        "members_history",
        include_str!("../datasets/members_history.toml"),
    ),
    (
        "members_profile",
        include_str!("../datasets/members_profile.toml"),
    ),
    ("bills", include_str!("../datasets/bills.toml")),
];

/// An inclusive integer range passed as a query parameter, one request
/// series per value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Iteration {
    /// Query parameter name, e.g. `AGE`.
    pub param: String,
    /// First value.
    pub start: u32,
    /// Last value (inclusive).
    pub end: u32,
}

/// One bulk-collectable dataset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasetDefinition {
    /// Stable identifier used on the command line.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Open API service code.
    pub service: String,
    /// Output filename; `{PARAM}` is replaced with the iteration value.
    pub filename: String,
    /// Optional parameter iteration.
    #[serde(default)]
    pub iterate: Option<Iteration>,
}

/// A single request series of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRun {
    /// Output filename with the parameter substituted.
    pub filename: String,
    /// `(param, value)` for iterated datasets.
    pub param: Option<(String, u32)>,
}

impl DatasetDefinition {
    /// Expands the definition into its request series.
    #[must_use]
    pub fn runs(&self) -> Vec<DatasetRun> {
        match &self.iterate {
            None => vec![DatasetRun {
                filename: self.filename.clone(),
                param: None,
            }],
            Some(it) => (it.start..=it.end)
                .map(|value| DatasetRun {
                    filename: self
                        .filename
                        .replace(&format!("{{{}}}", it.param), &value.to_string()),
                    param: Some((it.param.clone(), value)),
                })
                .collect(),
        }
    }
}

/// On-disk document written for each dataset run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDocument {
    /// Service code.
    pub api: String,
    /// The iteration parameter, e.g. `"AGE": 21`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// Number of rows in `data`.
    #[serde(rename = "totalItems")]
    pub total_items: usize,
    /// The collected rows.
    pub data: Vec<Value>,
}

/// How one dataset run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectStatus {
    /// Every page was fetched and the document was written.
    Written {
        /// Rows in the document.
        total_items: usize,
    },
    /// The output file already existed.
    Skipped,
    /// A page failed. The rows gathered so far went to a `.partial` file
    /// and the run stays pending.
    Incomplete {
        /// Rows in the partial document.
        total_items: usize,
    },
}

/// Outcome of one dataset run.
#[derive(Debug, Clone)]
pub struct CollectedFile {
    /// The run's output file.
    pub path: PathBuf,
    /// What happened to it.
    pub status: CollectStatus,
}

/// Where an incomplete run's rows are kept. Never read back as finished.
#[must_use]
pub fn partial_path(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}

/// Parses a dataset definition from TOML.
///
/// # Errors
///
/// Returns [`ApiError::Definition`] if the TOML is malformed.
pub fn parse_dataset_toml(toml_str: &str) -> Result<DatasetDefinition, ApiError> {
    Ok(toml::de::from_str(toml_str)?)
}

/// Returns all configured dataset definitions.
///
/// # Panics
///
/// Panics if any embedded TOML config is malformed.
#[must_use]
pub fn all_datasets() -> Vec<DatasetDefinition> {
    DATASET_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_dataset_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Looks up a dataset by id.
#[must_use]
pub fn find_dataset(id: &str) -> Option<DatasetDefinition> {
    all_datasets().into_iter().find(|d| d.id == id)
}

/// Fetches every run of `def` and writes one document per run into
/// `out_dir`. Runs whose output file exists are skipped unless `force`.
///
/// The output file only appears once every page of the run was fetched, so
/// an existing file always holds a complete collection. A run that fails
/// part way leaves its rows in [`partial_path`] and is fetched again next
/// time.
///
/// # Errors
///
/// Returns [`ApiError`] if an output file cannot be written.
pub async fn collect_dataset(
    client: &OpenApiClient,
    def: &DatasetDefinition,
    out_dir: &Path,
    force: bool,
) -> Result<Vec<CollectedFile>, ApiError> {
    tokio::fs::create_dir_all(out_dir).await?;

    let mut collected = Vec::new();

    for run in def.runs() {
        let path = out_dir.join(&run.filename);

        if !force && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            log::info!("{} already exists, skipping", path.display());
            collected.push(CollectedFile {
                path,
                status: CollectStatus::Skipped,
            });
            continue;
        }

        let mut params = Vec::new();
        let mut extra = Map::new();
        if let Some((param, value)) = &run.param {
            params.push((param.clone(), value.to_string()));
            extra.insert(param.clone(), Value::from(*value));
        }

        log::info!("Starting data collection for {} {params:?}", def.service);
        let walk = client.fetch_all_pages(&def.service, &params).await;
        let complete = walk.is_complete();

        let document = DatasetDocument {
            api: def.service.clone(),
            extra,
            total_items: walk.rows.len(),
            data: walk.rows,
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        let total_items = document.total_items;

        let status = if complete {
            write_atomic(&path, &bytes).await?;
            // a finished run supersedes any earlier partial one
            tokio::fs::remove_file(partial_path(&path)).await.ok();
            log::info!("Saved {total_items} items to {}", path.display());
            CollectStatus::Written { total_items }
        } else {
            let partial = partial_path(&path);
            write_atomic(&partial, &bytes).await?;
            log::warn!(
                "Collection of {} {params:?} did not finish; {total_items} items kept in {}, will retry next run",
                def.service,
                partial.display()
            );
            CollectStatus::Incomplete { total_items }
        };

        collected.push(CollectedFile { path, status });
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::{ApiConfig, retry::RetryPolicy};

    #[test]
    fn loads_all_datasets() {
        let datasets = all_datasets();
        assert_eq!(datasets.len(), DATASET_TOMLS.len());

        let mut ids: Vec<&str> = datasets.iter().map(|d| d.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), DATASET_TOMLS.len());
    }

    #[test]
    fn bills_iterate_assembly_terms() {
        let bills = find_dataset("bills").unwrap();
        let runs = bills.runs();

        assert_eq!(runs.len(), 13);
        assert_eq!(runs[0].filename, "assembly_bills_age_10.json");
        assert_eq!(runs[12].param, Some(("AGE".to_string(), 22)));
    }

    #[test]
    fn single_file_dataset_has_one_run() {
        let def = find_dataset("members_integrated").unwrap();
        let runs = def.runs();

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].filename, "assembly_members_integrated.json");
        assert!(runs[0].param.is_none());
    }

    #[test]
    fn document_places_param_inline() {
        let mut extra = Map::new();
        extra.insert("AGE".to_string(), json!(21));
        let doc = DatasetDocument {
            api: "nzmimeepazxkubdpn".to_string(),
            extra,
            total_items: 0,
            data: vec![],
        };

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["AGE"], 21);
        assert_eq!(value["totalItems"], 0);
    }

    fn test_client(server: &MockServer) -> OpenApiClient {
        let config = ApiConfig::new("k")
            .with_base_url(&server.uri())
            .with_page_delay(Duration::ZERO)
            .with_retry(RetryPolicy::none());
        OpenApiClient::new(config).unwrap()
    }

    fn test_dataset() -> DatasetDefinition {
        parse_dataset_toml(
            r#"
            id = "svc"
            name = "Test"
            service = "SVC"
            filename = "svc_{AGE}.json"

            [iterate]
            param = "AGE"
            start = 1
            end = 1
            "#,
        )
        .unwrap()
    }

    fn one_row_page() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "SVC": [
                {"head": [{"list_total_count": 1}]},
                {"row": [{"BILL_ID": "PRC_1"}]}
            ]
        }))
    }

    #[tokio::test]
    async fn collect_writes_documents_and_skips_existing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/SVC"))
            .and(query_param("pIndex", "1"))
            .and(query_param("AGE", "1"))
            .respond_with(one_row_page())
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let def = test_dataset();

        let dir = tempfile::tempdir().unwrap();
        let first = collect_dataset(&client, &def, dir.path(), false)
            .await
            .unwrap();
        assert_eq!(first[0].status, CollectStatus::Written { total_items: 1 });

        let written: DatasetDocument =
            serde_json::from_slice(&std::fs::read(dir.path().join("svc_1.json")).unwrap()).unwrap();
        assert_eq!(written.api, "SVC");
        assert_eq!(written.extra["AGE"], 1);
        assert_eq!(written.data.len(), 1);

        let second = collect_dataset(&client, &def, dir.path(), false)
            .await
            .unwrap();
        assert_eq!(second[0].status, CollectStatus::Skipped);
    }

    #[tokio::test]
    async fn failed_collection_is_retried_on_next_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/SVC"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/SVC"))
            .respond_with(one_row_page())
            .mount(&server)
            .await;

        let client = test_client(&server);
        let def = test_dataset();
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("svc_1.json");

        let first = collect_dataset(&client, &def, dir.path(), false)
            .await
            .unwrap();
        assert_eq!(first[0].status, CollectStatus::Incomplete { total_items: 0 });
        assert!(!output.exists());
        assert!(partial_path(&output).exists());

        let second = collect_dataset(&client, &def, dir.path(), false)
            .await
            .unwrap();
        assert_eq!(second[0].status, CollectStatus::Written { total_items: 1 });

        let written: DatasetDocument =
            serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(written.data.len(), 1);
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn failed_forced_run_keeps_previous_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/SVC"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("svc_1.json");
        std::fs::write(&output, br#"{"api":"SVC","AGE":1,"totalItems":1,"data":[{}]}"#).unwrap();

        let result = collect_dataset(&test_client(&server), &test_dataset(), dir.path(), true)
            .await
            .unwrap();

        assert_eq!(result[0].status, CollectStatus::Incomplete { total_items: 0 });
        let kept: DatasetDocument =
            serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(kept.total_items, 1);
    }
}
