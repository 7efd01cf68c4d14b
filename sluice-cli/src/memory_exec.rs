use std::{path::Path, path::PathBuf, sync::Arc};

use anyhow::Context;
use miette::{miette, IntoDiagnostic, Result};
use sluice::prelude::*;
use sluice::schemas::{DatasetKind, IngestConfig};
use tracing::{debug, info, warn};

fn ingestor(config: &IngestConfig) -> Ingestor {
    Ingestor::builder()
        .mode(config.ingest_mode.clone())
        .options(config.options.clone())
        .progress_tracker(Arc::new(LoggingProgressTracker))
        .build()
}

/// Staging rows from a JSON array of objects
fn read_rows(path: &Path) -> anyhow::Result<Vec<Vec<(String, ScalarValue)>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read batch file {}", path.display()))?;
    let objects: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(&content)
        .with_context(|| format!("batch file {} is not a JSON array of objects", path.display()))?;

    Ok(objects
        .into_iter()
        .map(|object| {
            object
                .into_iter()
                .map(|(name, value)| (name, ScalarValue::from(value)))
                .collect()
        })
        .collect())
}

/// Applies every batch file in order to one in-memory executor.
///
/// Staging backed by staged files is loaded once without batch files.
pub async fn apply(config: IngestConfig, batches: &[PathBuf]) -> Result<()> {
    let staging = &config.datasets.staging;
    let staged_files = matches!(staging.kind, DatasetKind::StagedFiles(_));
    if staged_files && !batches.is_empty() {
        warn!("Staging reads staged files, ignoring {} batch files", batches.len());
    }

    let ingestor = ingestor(&config);
    let mut executor = MemoryExecutor::new();
    let mut results = vec![];

    if staged_files || batches.is_empty() {
        info!("Applying {} in a single batch", staging.name());
        results.extend(ingestor.ingest(&mut executor, &config.datasets).await?);
    } else {
        for path in batches {
            let rows = read_rows(path).map_err(|error| miette!("{error:#}"))?;
            debug!("Staging {} rows from {}", rows.len(), path.display());

            executor.create_table(staging);
            executor
                .insert_rows(&staging.reference.qualified_name(), rows)
                .into_diagnostic()?;
            results.extend(ingestor.ingest(&mut executor, &config.datasets).await?);
        }
    }

    let main = config.datasets.main.reference.qualified_name();
    info!("{main} holds {} rows", executor.rows(&main).len());
    println!("{}", serde_json::to_string_pretty(&results).into_diagnostic()?);
    Ok(())
}

/// Checks the staged files of a bulk load against the constraints of main
pub async fn dry_run(config: IngestConfig) -> Result<()> {
    let mut executor = MemoryExecutor::new();
    let errors = ingestor(&config)
        .perform_dry_run(&mut executor, &config.datasets)
        .await?;

    if errors.is_empty() {
        info!("Dry run found no invalid rows");
    } else {
        warn!("Dry run found {} invalid rows", errors.len());
    }
    println!("{}", serde_json::to_string_pretty(&errors).into_diagnostic()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rows_of_a_batch_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, r#"[{"id": 1, "name": "ada"}, {"id": 2, "name": null}]"#).unwrap();

        let rows = read_rows(&path).unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows[0].contains(&("id".to_string(), ScalarValue::Int(1))));
        assert!(rows[1].contains(&("name".to_string(), ScalarValue::Null)));
    }

    #[test]
    fn reports_the_file_of_invalid_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, r#"{"id": 1}"#).unwrap();

        let error = read_rows(&path).unwrap_err();

        assert!(format!("{error:#}").contains("is not a JSON array of objects"));
    }
}
