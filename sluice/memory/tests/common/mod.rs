#![allow(dead_code)]

use chrono::NaiveDate;
use sluice_core::clock::{Clock, FixedClock};
use sluice_core::ingestor::Ingestor;
use sluice_core::planner::INFINITE_BATCH_ID;
use sluice_memory::{MemoryExecutor, StoredRow};
use sluice_schemas::{
    DataType, Dataset, Datasets, Field, IngestMode, IngestOptions, ScalarValue,
    SchemaDefinition, TransactionMilestoning,
};
use std::sync::Arc;

pub const MAIN: &str = "orders";
pub const STAGING: &str = "orders_staging";

pub fn clock() -> Arc<dyn Clock> {
    let time = NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|date| date.and_hms_opt(8, 30, 0))
        .unwrap();
    Arc::new(FixedClock::new(time))
}

pub fn batch_id_milestoning() -> TransactionMilestoning {
    TransactionMilestoning::BatchId {
        batch_id_in: "batch_id_in".to_string(),
        batch_id_out: "batch_id_out".to_string(),
    }
}

/// `id` keyed staging with an amount and its digest
pub fn staging_schema() -> SchemaDefinition {
    SchemaDefinition::new(vec![
        Field::new("id", DataType::Int).with_primary_key(),
        Field::new("amount", DataType::BigInt),
        Field::new("digest", DataType::Varchar),
    ])
}

/// Staging keyed on `id` and `version`
pub fn versioned_schema() -> SchemaDefinition {
    SchemaDefinition::new(vec![
        Field::new("id", DataType::Int).with_primary_key(),
        Field::new("version", DataType::Int).with_primary_key(),
        Field::new("amount", DataType::BigInt),
        Field::new("digest", DataType::Varchar),
    ])
}

/// Main without fields, derived from staging by the generator
pub fn datasets(staging: SchemaDefinition) -> Datasets {
    Datasets::new(
        Dataset::new(MAIN, SchemaDefinition::default()),
        Dataset::new(STAGING, staging),
    )
}

pub fn executor(datasets: &Datasets) -> MemoryExecutor {
    let mut executor = MemoryExecutor::new();
    executor.create_table(&datasets.staging);
    executor
}

pub fn ingestor(mode: IngestMode) -> Ingestor {
    ingestor_with_options(mode, IngestOptions::default())
}

pub fn ingestor_with_options(mode: IngestMode, options: IngestOptions) -> Ingestor {
    Ingestor::builder()
        .mode(mode)
        .options(options)
        .clock(clock())
        .build()
}

pub fn row(id: i64, amount: i64, digest: &str) -> Vec<(String, ScalarValue)> {
    vec![
        ("id".to_string(), ScalarValue::Int(id)),
        ("amount".to_string(), ScalarValue::Int(amount)),
        ("digest".to_string(), ScalarValue::from(digest)),
    ]
}

pub fn versioned(id: i64, version: i64, amount: i64, digest: &str) -> Vec<(String, ScalarValue)> {
    let mut values = row(id, amount, digest);
    values.push(("version".to_string(), ScalarValue::Int(version)));
    values
}

/// Staging row with extra text columns appended
pub fn row_with(
    id: i64,
    amount: i64,
    digest: &str,
    extra: &[(&str, &str)],
) -> Vec<(String, ScalarValue)> {
    let mut values = row(id, amount, digest);
    for (column, value) in extra {
        values.push((column.to_string(), ScalarValue::from(*value)));
    }
    values
}

/// `staging_schema` plus a text column
pub fn staging_schema_with(column: &str) -> SchemaDefinition {
    let mut schema = staging_schema();
    schema.fields.push(Field::new(column, DataType::Varchar));
    schema
}

/// Replaces the staging rows
pub fn stage(executor: &mut MemoryExecutor, rows: Vec<Vec<(String, ScalarValue)>>) {
    executor.truncate(STAGING).unwrap();
    executor.insert_rows(STAGING, rows).unwrap();
}

/// Main rows not closed by any batch
pub fn open_rows(executor: &MemoryExecutor) -> Vec<StoredRow> {
    executor
        .rows(MAIN)
        .iter()
        .filter(|row| row.get("batch_id_out") == Some(&ScalarValue::Int(INFINITE_BATCH_ID)))
        .cloned()
        .collect()
}

pub fn int(row: &StoredRow, column: &str) -> i64 {
    row.get(column).and_then(ScalarValue::as_i64).unwrap()
}
