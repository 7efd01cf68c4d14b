//! Batch execution protocol: drives an [`Executor`] through the plans of a [`Generator`].
//!
//! One call to [`Ingestor::ingest`] applies one batch:
//!
//! 1. setup: main, metadata, lock and auxiliary datasets are created, schema evolution runs
//! 2. a batch already applied for the ingest request id returns its stored results
//! 3. inside a transaction: empty staging detection, deduplication and versioning checks,
//!    then per data split a batch id, statistics, the ingest plan and the metadata row
//! 4. post actions and commit, or revert and cleanup on failure

mod error;
mod registry;

pub use error::{DataError, DataQualityError, ErrorCategory, IngestError};
pub use registry::{ExecutionRegistry, Registration};

use bon::Builder;
use serde::{Deserialize, Serialize};
use sluice_schemas::{
    DataSplitRange, DatasetFilter, Datasets, IngestMode, IngestOptions, ProgressEvent,
    ScalarValue,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::clock::{format_timestamp, Clock, SystemClock};
use crate::error::Result;
use crate::executor::{AnsiSink, Executor, RelationalSink, TabularData};
use crate::extraction::{
    data_split_ranges, first_integer, optimization_bounds, partition_specs, staging_filters,
};
use crate::generator::{Generator, GeneratorResult};
use crate::logical_plan::{LogicalPlan, Placeholder, PlaceholderValues};
use crate::planner::{DedupAndVersionErrorCheck, BATCH_STATUS_SUCCEEDED};
use crate::progress_tracker::ProgressTracker;
use crate::statistics::StatisticName;

/// Status of an applied batch, as recorded in the batch metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestStatus {
    Succeeded,
    Failed,
}

impl IngestStatus {
    fn from_recorded(value: &ScalarValue) -> Self {
        match value {
            ScalarValue::String(status) if status != BATCH_STATUS_SUCCEEDED => IngestStatus::Failed,
            _ => IngestStatus::Succeeded,
        }
    }
}

/// Outcome of one applied data split, or of a batch applied by an earlier request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestorResult {
    pub batch_id: Option<i64>,
    pub data_split_range: Option<DataSplitRange>,
    pub statistics: BTreeMap<StatisticName, ScalarValue>,
    pub status: IngestStatus,
    /// Datasets as planned, with main after schema evolution
    pub updated_datasets: Datasets,
    pub schema_evolution_sql: Vec<String>,
    pub ingestion_timestamp_utc: String,
    pub ingestion_end_timestamp_utc: String,
    /// The batch was applied by an earlier call with the same ingest request id
    pub previously_processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Applies batches of one ingest mode through an executor.
///
/// # Examples
///
/// ```no_run
/// use sluice_core::prelude::*;
/// use sluice_schemas::{Dataset, Datasets, IngestMode, NontemporalDelta, SchemaDefinition};
/// use std::sync::Arc;
///
/// async fn apply<E: Executor>(executor: &mut E, datasets: &Datasets) -> sluice_core::Result<()> {
///     let registry = Arc::new(ExecutionRegistry::new());
///     let ingestor = Ingestor::builder()
///         .mode(IngestMode::NontemporalDelta(NontemporalDelta::default()))
///         .registry(registry)
///         .ingest_request_id("request-42".to_string())
///         .build();
///
///     for result in ingestor.ingest(executor, datasets).await? {
///         println!("batch {:?}: {:?}", result.batch_id, result.statistics);
///     }
///     Ok(())
/// }
/// ```
#[derive(Builder)]
pub struct Ingestor {
    mode: IngestMode,

    #[builder(default = Arc::new(AnsiSink::default()))]
    sink: Arc<dyn RelationalSink>,

    #[builder(default)]
    options: IngestOptions,

    #[builder(default = Arc::new(SystemClock))]
    clock: Arc<dyn Clock>,

    registry: Option<Arc<ExecutionRegistry>>,

    progress_tracker: Option<Arc<dyn ProgressTracker>>,

    /// Makes the batch idempotent: a request id already recorded is not applied again
    ingest_request_id: Option<String>,

    /// Stored as JSON with every batch
    additional_metadata: Option<serde_json::Value>,
}

impl Ingestor {
    pub fn generator(&self) -> Generator {
        Generator::builder()
            .mode(self.mode.clone())
            .sink(Arc::clone(&self.sink))
            .options(self.options.clone())
            .build()
    }

    /// Applies staging to main as one batch, one batch id per data split
    pub async fn ingest<E: Executor>(
        &self,
        executor: &mut E,
        datasets: &Datasets,
    ) -> Result<Vec<IngestorResult>> {
        self.ingest_with_data_splits(executor, datasets, &[]).await
    }

    /// Applies staging to main in the given data split ranges, in order.
    ///
    /// Without ranges the data splits present in staging are applied one by one.
    #[instrument(skip_all, err)]
    pub async fn ingest_with_data_splits<E: Executor>(
        &self,
        executor: &mut E,
        datasets: &Datasets,
        ranges: &[DataSplitRange],
    ) -> Result<Vec<IngestorResult>> {
        let started = Instant::now();
        let generator = self.generator();
        let setup = generator.generate_operations(datasets)?;
        let main = setup.datasets.main.name().to_string();

        let _registration = match &self.registry {
            Some(registry) => Some(registry.register(&main)?),
            None => None,
        };
        self.track(ProgressEvent::Started { main: main.clone() });
        info!("Ingesting into {main} with {} ingest mode", setup.ingest_mode.name());

        let values = self.batch_values();
        // Replays return before main or its auxiliary datasets are created or altered
        if let Some(request_id) = &self.ingest_request_id {
            execute(executor, &setup.metadata_create_plan, &values).await?;
            let previous = self.previously_processed(executor, &setup, &values).await?;
            if !previous.is_empty() {
                warn!("Request {request_id} was already applied to {main}, returning stored results");
                self.track(ProgressEvent::PreviouslyProcessed {
                    ingest_request_id: request_id.clone(),
                });
                return Ok(previous);
            }
        }

        execute(executor, &setup.pre_actions_plan, &values).await?;
        if let Some(plan) = &setup.init_lock_plan {
            execute(executor, plan, &values).await?;
        }
        if let Some(plan) = &setup.schema_evolution_plan {
            info!("Evolving schema of {main} ... {} alterations", plan.len());
            execute(executor, plan, &values).await?;
        }

        executor.begin().await?;
        match self
            .apply(executor, &generator, datasets, setup.clone(), ranges, &values)
            .await
        {
            Ok(results) => {
                executor.commit().await?;

                let elapsed = started.elapsed();
                info!("Ingestion into {main} completed in {elapsed:.2?}");
                self.track(ProgressEvent::Completed {
                    duration_ms: elapsed.as_millis() as u64,
                });
                Ok(results)
            }
            Err(error) => {
                warn!("Ingestion into {main} failed, reverting: {error}");
                if let Err(revert) = executor.revert().await {
                    warn!("Revert of {main} failed: {revert}");
                }
                if let Err(cleanup) = execute(executor, &setup.post_cleanup_plan, &values).await {
                    warn!("Cleanup of auxiliary datasets of {main} failed: {cleanup}");
                }
                Err(error)
            }
        }
    }

    /// Loads staged files into a validation dataset and reports the rows violating a
    /// constraint of main, without touching main
    #[instrument(skip_all, err)]
    pub async fn perform_dry_run<E: Executor>(
        &self,
        executor: &mut E,
        datasets: &Datasets,
    ) -> Result<Vec<DataError>> {
        let result = self.generator().generate_operations(datasets)?;
        let (Some(pre_actions), Some(load), Some(validation), Some(cleanup)) = (
            &result.dry_run_pre_actions_plan,
            &result.dry_run_plan,
            &result.dry_run_validation_plan,
            &result.dry_run_post_cleanup_plan,
        ) else {
            return Err(IngestError::DryRunUnsupported(result.ingest_mode.name().to_string()).into());
        };

        let values = self.batch_values();
        execute(executor, pre_actions, &values).await?;
        let outcome = dry_run(executor, load, validation, &values).await;
        execute(executor, cleanup, &values).await?;

        let mut errors = outcome?;
        debug!("Dry run found {} rows violating constraints", errors.len());
        errors.truncate(self.options.sample_row_count);
        Ok(errors)
    }

    /// Staging filters recorded by the latest batch into main, none before the first batch
    pub async fn latest_staging_filters<E: Executor>(
        &self,
        executor: &mut E,
        datasets: &Datasets,
    ) -> Result<Vec<DatasetFilter>> {
        let result = self.generator().generate_operations(datasets)?;
        let values = self.batch_values();
        execute(executor, &result.pre_actions_plan, &values).await?;

        let rows = query(executor, &result.latest_source_info_plan, &values).await?;
        let column = result
            .datasets
            .metadata
            .as_ref()
            .map(|metadata| metadata.batch_source_info_field.as_str())
            .unwrap_or_default();
        Ok(staging_filters(rows.first(), column).map_err(IngestError::from)?)
    }

    /// Body of the batch transaction
    async fn apply<E: Executor>(
        &self,
        executor: &mut E,
        generator: &Generator,
        datasets: &Datasets,
        mut result: GeneratorResult,
        ranges: &[DataSplitRange],
        values: &PlaceholderValues,
    ) -> Result<Vec<IngestorResult>> {
        let mut generator = generator.clone();

        if let Some(plan) = &result.partition_specs_plan {
            let rows = query(executor, plan, values).await?;
            let fields = result
                .ingest_mode
                .partitioning()
                .map(|partitioning| partitioning.partition_fields.clone())
                .unwrap_or_default();
            let specs = partition_specs(&rows, &fields);
            debug!("Derived {} partition specs from staging", specs.len());

            generator = generator.with_mode(result.ingest_mode.with_partition_specs(specs));
            result = generator.generate_operations(datasets)?;
        }

        if let Some(plan) = &result.staging_row_count_plan {
            let rows = query(executor, plan, values).await?;
            if first_integer(&rows).unwrap_or(0) == 0 {
                info!("Staging dataset {} is empty", result.datasets.staging.name());
                let empty = generator.generate_operations_for_empty_batch(datasets)?;
                let results = self.apply_splits(executor, &[empty], values).await?;
                execute(executor, &result.post_actions_plan, values).await?;
                return Ok(results);
            }
        }

        if let Some(plan) = &result.dedup_and_versioning_plan {
            execute(executor, plan, values).await?;
        }
        for (check, plan) in &result.dedup_and_versioning_error_checks {
            let maximum = first_integer(&query(executor, plan, values).await?).unwrap_or(0);
            debug!("{check}: {maximum}");
            if maximum > 1 {
                let rows = match result.dedup_and_versioning_error_rows.get(check) {
                    Some(plan) => query(executor, plan, values).await?,
                    None => vec![],
                };
                return Err(data_quality_error(*check, &rows).into());
            }
        }
        self.track(ProgressEvent::StagingValidated);

        let splits = if !ranges.is_empty() {
            generator.generate_operations_with_data_splits(datasets, ranges)?
        } else if let (Some(plan), Some(field)) = (
            &result.data_split_ranges_plan,
            result.ingest_mode.versioning().data_split_field(),
        ) {
            let rows = query(executor, plan, values).await?;
            let extracted = data_split_ranges(rows.first(), field);
            debug!("Extracted {} data splits from staging", extracted.len());
            if extracted.is_empty() {
                vec![result.clone()]
            } else {
                generator.generate_operations_with_data_splits(datasets, &extracted)?
            }
        } else {
            vec![result.clone()]
        };

        let results = self.apply_splits(executor, &splits, values).await?;
        execute(executor, &result.post_actions_plan, values).await?;
        Ok(results)
    }

    async fn apply_splits<E: Executor>(
        &self,
        executor: &mut E,
        splits: &[GeneratorResult],
        values: &PlaceholderValues,
    ) -> Result<Vec<IngestorResult>> {
        let mut batch_id = None;
        let mut results = Vec::with_capacity(splits.len());

        for (position, split) in splits.iter().enumerate() {
            let started = Instant::now();
            let main = split.datasets.main.name();
            let start_ts = format_timestamp(&self.clock.now());

            let mut values = values.clone();
            values.insert(&Placeholder::BatchStartTimestamp, start_ts.clone());
            if let Some(range) = split.data_split_range {
                values.insert(&Placeholder::DataSplitLowerBound, range.lower_bound);
                values.insert(&Placeholder::DataSplitUpperBound, range.upper_bound);
            }

            let id = match batch_id {
                Some(id) if !self.options.batch_id_per_data_split => id,
                _ => {
                    if let Some(plan) = &split.acquire_lock_plan {
                        execute(executor, plan, &values).await?;
                    }
                    let rows = query(executor, &split.next_batch_id_plan, &values).await?;
                    first_integer(&rows).ok_or_else(|| IngestError::MissingBatchId(main.to_string()))?
                }
            };
            batch_id = Some(id);
            values.insert(&Placeholder::NextBatchId, id);
            self.track(ProgressEvent::BatchStarted {
                batch_id: id,
                position,
            });

            if let Some(plan) = &split.optimization_bounds_plan {
                let rows = query(executor, plan, &values).await?;
                values.extend(optimization_bounds(
                    rows.first(),
                    split.ingest_mode.optimization_filters(),
                ));
            }

            let mut statistics = BTreeMap::new();
            for (name, plan) in &split.pre_ingest_statistics {
                statistics.insert(*name, statistic(executor, plan, &values).await?);
            }
            execute(executor, &split.ingest_plan, &values).await?;
            for (name, plan) in &split.post_ingest_statistics {
                statistics.insert(*name, statistic(executor, plan, &values).await?);
            }

            let statistics_json = serde_json::to_string(&statistics).map_err(IngestError::from)?;
            let end_ts = format_timestamp(&self.clock.now());
            values.insert(&Placeholder::BatchEndTimestamp, end_ts.clone());
            values.insert(&Placeholder::BatchStatistics, statistics_json);
            execute(executor, &split.metadata_ingest_plan, &values).await?;

            let elapsed = started.elapsed();
            debug!("Applied batch {id} to {main} in {elapsed:.2?}: {statistics:?}");
            self.track(ProgressEvent::BatchCompleted {
                batch_id: id,
                position,
                duration_ms: elapsed.as_millis() as u64,
            });

            results.push(IngestorResult {
                batch_id: Some(id),
                data_split_range: split.data_split_range,
                statistics,
                status: IngestStatus::Succeeded,
                updated_datasets: split.datasets.clone(),
                schema_evolution_sql: split.schema_evolution_sql(),
                ingestion_timestamp_utc: start_ts,
                ingestion_end_timestamp_utc: end_ts,
                previously_processed: false,
                message: None,
            });
        }

        Ok(results)
    }

    /// Stored results of the batches recorded for the ingest request id
    async fn previously_processed<E: Executor>(
        &self,
        executor: &mut E,
        setup: &GeneratorResult,
        values: &PlaceholderValues,
    ) -> Result<Vec<IngestorResult>> {
        let Some(metadata) = &setup.datasets.metadata else {
            return Ok(vec![]);
        };
        let rows = query(executor, &setup.previously_processed_plan, values).await?;

        let mut results = rows
            .iter()
            .flat_map(|result| result.rows.iter())
            .map(|row| {
                let field = |name: &str| row.get(name).cloned().unwrap_or_default();
                Ok(IngestorResult {
                    batch_id: field(&metadata.batch_id_field).as_i64(),
                    data_split_range: None,
                    statistics: parse_statistics(&field(&metadata.batch_statistics_field))?,
                    status: IngestStatus::from_recorded(&field(&metadata.batch_status_field)),
                    updated_datasets: setup.datasets.clone(),
                    schema_evolution_sql: vec![],
                    ingestion_timestamp_utc: field(&metadata.batch_start_ts_field).to_string(),
                    ingestion_end_timestamp_utc: field(&metadata.batch_end_ts_field).to_string(),
                    previously_processed: true,
                    message: Some(format!(
                        "Batch was already applied for ingest request id {}",
                        self.ingest_request_id.as_deref().unwrap_or_default()
                    )),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        results.sort_by_key(|result| result.batch_id);
        Ok(results)
    }

    /// Start time, request id and additional metadata of the batch
    fn batch_values(&self) -> PlaceholderValues {
        let additional_metadata = self
            .additional_metadata
            .as_ref()
            .map(|metadata| ScalarValue::String(metadata.to_string()))
            .unwrap_or_default();
        let request_id = self
            .ingest_request_id
            .clone()
            .map(ScalarValue::from)
            .unwrap_or_default();

        PlaceholderValues::new()
            .with(
                &Placeholder::BatchStartTimestamp,
                format_timestamp(&self.clock.now()),
            )
            .with(&Placeholder::IngestRequestId, request_id)
            .with(&Placeholder::AdditionalMetadata, additional_metadata)
    }

    fn track(&self, event: ProgressEvent) {
        if let Some(tracker) = &self.progress_tracker {
            tracker.on_progress(event);
        }
    }
}

async fn execute<E: Executor>(
    executor: &mut E,
    plan: &LogicalPlan,
    values: &PlaceholderValues,
) -> Result<()> {
    if plan.is_empty() {
        return Ok(());
    }
    let bound = plan.bind(values)?;
    executor.execute_physical_plan(&bound).await?;
    Ok(())
}

async fn query<E: Executor>(
    executor: &mut E,
    plan: &LogicalPlan,
    values: &PlaceholderValues,
) -> Result<Vec<TabularData>> {
    let bound = plan.bind(values)?;
    Ok(executor.execute_physical_plan_and_get_results(&bound).await?)
}

async fn statistic<E: Executor>(
    executor: &mut E,
    plan: &LogicalPlan,
    values: &PlaceholderValues,
) -> Result<ScalarValue> {
    let rows = query(executor, plan, values).await?;
    Ok(first_integer(&rows).map(ScalarValue::Int).unwrap_or_default())
}

async fn dry_run<E: Executor>(
    executor: &mut E,
    load: &LogicalPlan,
    validation: &BTreeMap<String, LogicalPlan>,
    values: &PlaceholderValues,
) -> Result<Vec<DataError>> {
    execute(executor, load, values).await?;

    let mut errors = vec![];
    for (column, plan) in validation {
        for row in query(executor, plan, values)
            .await?
            .iter()
            .flat_map(|result| result.rows.iter())
        {
            errors.push(DataError {
                error_category: ErrorCategory::CheckNullConstraint,
                error_message: "Null values found in non-nullable column".to_string(),
                error_record: to_json(row),
                error_details: BTreeMap::from([(
                    "error_column_name".to_string(),
                    serde_json::Value::String(column.clone()),
                )]),
            });
        }
    }
    Ok(errors)
}

fn data_quality_error(check: DedupAndVersionErrorCheck, rows: &[TabularData]) -> DataQualityError {
    let (category, message, detail) = match check {
        DedupAndVersionErrorCheck::MaxDuplicates => (
            ErrorCategory::Duplicates,
            "Encountered Duplicates, Failing the batch as Fail on Duplicates is set as Deduplication strategy",
            "num_duplicates",
        ),
        DedupAndVersionErrorCheck::MaxPkDuplicates => (
            ErrorCategory::DuplicatePrimaryKeys,
            "Encountered multiple rows with duplicate primary keys, Failing the batch as Fail on Duplicate Primary Keys is selected",
            "num_pk_duplicates",
        ),
        DedupAndVersionErrorCheck::MaxDataErrors => (
            ErrorCategory::DataVersionError,
            "Encountered Data errors (same PK, same version but different data), hence failing the batch",
            "num_data_version_errors",
        ),
    };

    let errors = rows
        .iter()
        .flat_map(|result| result.rows.iter())
        .map(|row| {
            let mut record = row.clone();
            let count = record.remove(check.count_field()).unwrap_or_default();
            DataError {
                error_category: category,
                error_message: message.to_string(),
                error_record: to_json(&record),
                error_details: BTreeMap::from([(detail.to_string(), count.into())]),
            }
        })
        .collect();

    DataQualityError {
        category,
        message: message.to_string(),
        errors,
    }
}

fn to_json(row: &BTreeMap<String, ScalarValue>) -> serde_json::Value {
    serde_json::Value::Object(
        row.iter()
            .map(|(name, value)| (name.clone(), value.clone().into()))
            .collect(),
    )
}

fn parse_statistics(value: &ScalarValue) -> Result<BTreeMap<StatisticName, ScalarValue>> {
    let statistics = match value {
        ScalarValue::Null => BTreeMap::new(),
        ScalarValue::String(json) => serde_json::from_str(json).map_err(IngestError::from)?,
        other => serde_json::from_value(other.clone().into()).map_err(IngestError::from)?,
    };
    Ok(statistics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::Error;
    use crate::executor::ExecutorError;
    use crate::logical_plan::BoundPlan;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use sluice_schemas::{
        DataType, Dataset, DeduplicationStrategy, Field, NontemporalDelta, SchemaDefinition,
    };
    use std::sync::Mutex;
    use tracing_test::traced_test;

    /// Records every executed operation and answers selections by their rendering
    #[derive(Default)]
    struct ScriptedExecutor {
        executed: Vec<String>,
        answers: Vec<(&'static str, Vec<BTreeMap<String, ScalarValue>>)>,
        reverted: bool,
        committed: bool,
    }

    impl ScriptedExecutor {
        fn answer(mut self, fragment: &'static str, column: &str, value: ScalarValue) -> Self {
            self.answers
                .push((fragment, vec![BTreeMap::from([(column.to_string(), value)])]));
            self
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute_physical_plan(&mut self, plan: &BoundPlan) -> Result<(), ExecutorError> {
            self.executed
                .extend(plan.operations().iter().map(ToString::to_string));
            Ok(())
        }

        async fn execute_physical_plan_and_get_results(
            &mut self,
            plan: &BoundPlan,
        ) -> Result<Vec<TabularData>, ExecutorError> {
            let mut results = vec![];
            for operation in plan.operations() {
                let sql = operation.to_string();
                let rows = self
                    .answers
                    .iter()
                    .find(|(fragment, _)| sql.contains(fragment))
                    .map(|(_, rows)| rows.clone())
                    .unwrap_or_default();
                self.executed.push(sql);
                results.push(TabularData::new(rows));
            }
            Ok(results)
        }

        async fn commit(&mut self) -> Result<(), ExecutorError> {
            self.committed = true;
            Ok(())
        }

        async fn revert(&mut self) -> Result<(), ExecutorError> {
            self.reverted = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingTracker {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressTracker for RecordingTracker {
        fn on_progress(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn datasets() -> Datasets {
        let schema = SchemaDefinition::new(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("name", DataType::Varchar),
        ]);
        Datasets::new(
            Dataset::new("orders", schema.clone()),
            Dataset::new("orders_staging", schema),
        )
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        ))
    }

    #[tokio::test]
    #[traced_test]
    async fn applies_a_batch_and_records_its_metadata() {
        let tracker = Arc::new(RecordingTracker::default());
        let ingestor = Ingestor::builder()
            .mode(IngestMode::NontemporalDelta(NontemporalDelta::default()))
            .clock(clock())
            .progress_tracker(tracker.clone())
            .build();
        let mut executor = ScriptedExecutor::default()
            .answer("next_batch_id", "next_batch_id", ScalarValue::Int(3))
            .answer("INCOMING_RECORD_COUNT", "INCOMING_RECORD_COUNT", ScalarValue::Int(2));

        let results = ingestor.ingest(&mut executor, &datasets()).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].batch_id, Some(3));
        assert_eq!(
            results[0].statistics[&StatisticName::IncomingRecordCount],
            ScalarValue::Int(2)
        );
        assert_eq!(results[0].ingestion_timestamp_utc, "2024-01-01 00:00:00.000000");
        assert!(executor.committed);
        assert!(executor
            .executed
            .last()
            .unwrap()
            .starts_with("INSERT INTO batch_metadata"));
        assert!(executor
            .executed
            .last()
            .unwrap()
            .contains("\"INCOMING_RECORD_COUNT\":2"));

        let events = tracker.events.lock().unwrap();
        assert!(matches!(events[0], ProgressEvent::Started { .. }));
        assert!(matches!(events[2], ProgressEvent::BatchStarted { batch_id: 3, position: 0 }));
        assert!(matches!(events.last(), Some(ProgressEvent::Completed { .. })));
        assert!(logs_contain("Ingestion into orders completed"));
    }

    #[tokio::test]
    async fn returns_stored_results_of_a_processed_request() {
        let ingestor = Ingestor::builder()
            .mode(IngestMode::NontemporalDelta(NontemporalDelta::default()))
            .ingest_request_id("request-1".to_string())
            .build();
        let mut executor = ScriptedExecutor::default();
        executor.answers.push((
            "ingest_request_id",
            vec![BTreeMap::from([
                ("batch_id".to_string(), ScalarValue::Int(7)),
                (
                    "batch_start_ts".to_string(),
                    ScalarValue::from("2024-01-01 00:00:00.000000"),
                ),
                (
                    "batch_statistics".to_string(),
                    ScalarValue::from("{\"ROWS_INSERTED\":4}"),
                ),
            ])],
        ));

        let results = ingestor.ingest(&mut executor, &datasets()).await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].previously_processed);
        assert_eq!(results[0].batch_id, Some(7));
        assert_eq!(
            results[0].statistics[&StatisticName::RowsInserted],
            ScalarValue::Int(4)
        );
        assert!(!executor.committed);
        assert!(!executor.executed.iter().any(|sql| sql.starts_with("MERGE")));
    }

    #[tokio::test]
    async fn fails_on_duplicates_before_touching_main() {
        let ingestor = Ingestor::builder()
            .mode(IngestMode::NontemporalDelta(
                NontemporalDelta::builder()
                    .deduplication(DeduplicationStrategy::FailOnDuplicates)
                    .build(),
            ))
            .build();
        let mut executor = ScriptedExecutor::default()
            .answer("MAX_DUPLICATES", "MAX_DUPLICATES", ScalarValue::Int(2))
            .answer(
                "ingest_duplicate_count > 1",
                "ingest_duplicate_count",
                ScalarValue::Int(2),
            );

        let error = ingestor.ingest(&mut executor, &datasets()).await.unwrap_err();

        let Error::DataQuality(error) = error else {
            panic!("expected a data quality error");
        };
        assert_eq!(error.category, ErrorCategory::Duplicates);
        assert_eq!(error.errors.len(), 1);
        assert_eq!(
            error.errors[0].error_details["num_duplicates"],
            serde_json::json!(2)
        );
        assert!(executor.reverted);
        assert!(!executor
            .executed
            .iter()
            .any(|sql| sql.starts_with("MERGE INTO orders")));
    }

    #[tokio::test]
    async fn rejects_concurrent_batches_into_the_same_main() {
        let registry = Arc::new(ExecutionRegistry::new());
        let _running = registry.register("orders").unwrap();
        let ingestor = Ingestor::builder()
            .mode(IngestMode::NontemporalDelta(NontemporalDelta::default()))
            .registry(registry.clone())
            .build();

        let error = ingestor
            .ingest(&mut ScriptedExecutor::default(), &datasets())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Ingest(e) if matches!(*e, IngestError::AlreadyRunning(_))));
    }

    #[tokio::test]
    async fn dry_run_needs_a_bulk_load() {
        let ingestor = Ingestor::builder()
            .mode(IngestMode::NontemporalDelta(NontemporalDelta::default()))
            .build();

        let error = ingestor
            .perform_dry_run(&mut ScriptedExecutor::default(), &datasets())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Ingest(e) if matches!(*e, IngestError::DryRunUnsupported(_))));
    }
}
