mod common;

use common::int;
use sluice_core::ingestor::ErrorCategory;
use sluice_core::statistics::StatisticName;
use sluice_core::Error;
use sluice_memory::MemoryExecutor;
use sluice_schemas::{
    BulkLoad, DataType, Dataset, DatasetKind, Datasets, Field, FileFormat, IngestMode,
    ScalarValue, SchemaDefinition, StagedFiles,
};
use std::path::Path;

fn bulk_load() -> IngestMode {
    IngestMode::BulkLoad(BulkLoad::builder().batch_id_field("batch_id".to_string()).build())
}

fn staged_csv(dir: &Path, name: &str, content: &str) -> Datasets {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();

    let staging = Dataset::new(
        "orders_files",
        SchemaDefinition::new(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("amount", DataType::BigInt),
        ]),
    )
    .with_kind(DatasetKind::StagedFiles(StagedFiles {
        format: FileFormat::Csv,
        paths: vec![path.to_string_lossy().to_string()],
    }));
    Datasets::new(
        Dataset::new(common::MAIN, SchemaDefinition::default()),
        staging,
    )
}

#[tokio::test]
async fn stamps_loaded_rows_with_the_batch_id() {
    let dir = tempfile::tempdir().unwrap();
    let mut executor = MemoryExecutor::new();
    let ingestor = common::ingestor(bulk_load());

    let first = staged_csv(dir.path(), "orders_1.csv", "id,amount\n1,10\n2,20\n");
    let results = ingestor.ingest(&mut executor, &first).await.unwrap();
    assert_eq!(results[0].batch_id, Some(1));
    assert_eq!(
        results[0].statistics[&StatisticName::IncomingRecordCount],
        ScalarValue::Int(2)
    );
    assert_eq!(
        results[0].statistics[&StatisticName::RowsInserted],
        ScalarValue::Int(2)
    );

    let second = staged_csv(dir.path(), "orders_2.csv", "id,amount\n3,30\n");
    let results = ingestor.ingest(&mut executor, &second).await.unwrap();
    assert_eq!(results[0].batch_id, Some(2));
    assert_eq!(
        results[0].statistics[&StatisticName::RowsInserted],
        ScalarValue::Int(1)
    );

    let mut loaded: Vec<_> = executor
        .rows(common::MAIN)
        .iter()
        .map(|row| (int(row, "id"), int(row, "amount"), int(row, "batch_id")))
        .collect();
    loaded.sort();
    assert_eq!(loaded, vec![(1, 10, 1), (2, 20, 1), (3, 30, 2)]);
}

#[tokio::test]
async fn failed_loads_leave_main_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let mut executor = MemoryExecutor::new();
    let ingestor = common::ingestor(bulk_load());

    let datasets = staged_csv(dir.path(), "orders.csv", "id,amount\n1,10\n,20\n");
    let error = ingestor.ingest(&mut executor, &datasets).await.unwrap_err();

    assert!(matches!(error, Error::Execution(_)));
    assert!(executor.rows(common::MAIN).is_empty());
    assert!(executor.rows("batch_metadata").is_empty());
}

#[tokio::test]
async fn dry_run_reports_nulls_in_non_nullable_columns() {
    let dir = tempfile::tempdir().unwrap();
    let mut executor = MemoryExecutor::new();
    let ingestor = common::ingestor(bulk_load());

    let datasets = staged_csv(dir.path(), "orders.csv", "id,amount\n1,10\n,20\n");
    let errors = ingestor
        .perform_dry_run(&mut executor, &datasets)
        .await
        .unwrap();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_category, ErrorCategory::CheckNullConstraint);
    assert_eq!(
        errors[0].error_details["error_column_name"],
        serde_json::json!("id")
    );
    assert_eq!(errors[0].error_record["amount"], serde_json::json!(20));
    assert!(executor.table("orders_validation").is_none());
    assert!(executor.rows(common::MAIN).is_empty());
}
