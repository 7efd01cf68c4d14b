//! Compiles an ingest mode and its datasets into the plans of one batch.
//!
//! The generator is pure: it resolves the datasets (case conversion, external references,
//! main schema derivation and evolution), validates them against the mode and asks the
//! mode's planner for every plan the batch execution protocol needs.

use bon::Builder;
use serde::Serialize;
use sluice_schemas::{
    DataSplitRange, Dataset, DatasetKind, Datasets, EmptyDatasetHandling, IngestMode,
    IngestOptions,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::case::{convert_datasets, convert_mode, effective_conversion};
use crate::error::{Result, ValidationError};
use crate::executor::{AnsiSink, RelationalSink};
use crate::extraction::partition_specs_plan;
use crate::ingestor::IngestError;
use crate::logical_plan::{LogicalPlan, Operation, Selection, Value};
use crate::planner::{
    planner_for, validate, BulkLoadPlanner, DedupAndVersionErrorCheck, DedupAndVersioningPlans,
    MetadataPlanner, PlanningContext, STAGING_ALIAS,
};
use crate::schema::{
    derive_main_schema, evolve_schema, resolve_external_references, SchemaEvolutionResult,
};
use crate::statistics::StatisticName;

/// Column of the staging row count query
pub const STAGING_ROW_COUNT_COLUMN: &str = "staging_row_count";

/// Every plan of one batch, or of one data split of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratorResult {
    /// Creates main, the batch metadata dataset and the auxiliary datasets
    pub pre_actions_plan: LogicalPlan,
    /// Creates the batch metadata dataset only
    pub metadata_create_plan: LogicalPlan,
    pub schema_evolution_plan: Option<LogicalPlan>,
    /// Main as it looks after schema evolution
    pub schema_evolution_dataset: Option<Dataset>,
    pub init_lock_plan: Option<LogicalPlan>,
    pub acquire_lock_plan: Option<LogicalPlan>,
    pub next_batch_id_plan: LogicalPlan,
    /// Batches already applied for the ingest request id
    pub previously_processed_plan: LogicalPlan,
    /// Source info of the latest batch
    pub latest_source_info_plan: LogicalPlan,
    /// Counts staging rows for modes that treat an empty batch differently
    pub staging_row_count_plan: Option<LogicalPlan>,
    pub partition_specs_plan: Option<LogicalPlan>,
    pub dedup_and_versioning_plan: Option<LogicalPlan>,
    pub dedup_and_versioning_error_checks: BTreeMap<DedupAndVersionErrorCheck, LogicalPlan>,
    pub dedup_and_versioning_error_rows: BTreeMap<DedupAndVersionErrorCheck, LogicalPlan>,
    pub ingest_plan: LogicalPlan,
    pub pre_ingest_statistics: BTreeMap<StatisticName, LogicalPlan>,
    pub post_ingest_statistics: BTreeMap<StatisticName, LogicalPlan>,
    pub metadata_ingest_plan: LogicalPlan,
    /// Clears the auxiliary datasets and, when asked to, staging
    pub post_actions_plan: LogicalPlan,
    /// Clears the auxiliary datasets only, run when a batch fails
    pub post_cleanup_plan: LogicalPlan,
    pub optimization_bounds_plan: Option<LogicalPlan>,
    pub data_split_ranges_plan: Option<LogicalPlan>,
    pub dry_run_pre_actions_plan: Option<LogicalPlan>,
    pub dry_run_plan: Option<LogicalPlan>,
    pub dry_run_validation_plan: Option<BTreeMap<String, LogicalPlan>>,
    pub dry_run_post_cleanup_plan: Option<LogicalPlan>,
    pub data_split_range: Option<DataSplitRange>,
    /// Mode after case conversion
    pub ingest_mode: IngestMode,
    /// Datasets after resolution, with main as planned
    pub datasets: Datasets,
}

impl GeneratorResult {
    /// Renderings of the schema evolution operations
    pub fn schema_evolution_sql(&self) -> Vec<String> {
        self.schema_evolution_plan
            .iter()
            .flat_map(|plan| plan.operations.iter().map(ToString::to_string))
            .collect()
    }
}

/// Plans batches of one ingest mode against one sink.
///
/// # Examples
///
/// ```
/// use sluice_core::generator::Generator;
/// use sluice_schemas::{
///     DataType, Dataset, Datasets, Field, IngestMode, IngestOptions, SchemaDefinition,
///     TransactionMilestoning, UnitemporalDelta,
/// };
///
/// let schema = SchemaDefinition::new(vec![
///     Field::new("id", DataType::Int).with_primary_key(),
///     Field::new("digest", DataType::Varchar),
/// ]);
/// let mode = IngestMode::UnitemporalDelta(
///     UnitemporalDelta::builder()
///         .digest_field("digest".to_string())
///         .transaction_milestoning(TransactionMilestoning::BatchId {
///             batch_id_in: "batch_id_in".to_string(),
///             batch_id_out: "batch_id_out".to_string(),
///         })
///         .build(),
/// );
///
/// let result = Generator::builder()
///     .mode(mode)
///     .options(IngestOptions::builder().enable_concurrent_safety(true).build())
///     .build()
///     .generate_operations(&Datasets::new(
///         Dataset::new("orders", SchemaDefinition::default()),
///         Dataset::new("orders_staging", schema),
///     ))
///     .unwrap();
///
/// assert!(result.acquire_lock_plan.is_some());
/// assert!(result.datasets.main.schema.contains("batch_id_out"));
/// ```
#[derive(Debug, Clone, Builder)]
pub struct Generator {
    mode: IngestMode,

    #[builder(default = Arc::new(AnsiSink::default()))]
    sink: Arc<dyn RelationalSink>,

    #[builder(default)]
    options: IngestOptions,
}

/// Mode and datasets ready to be planned
struct Resolved {
    mode: IngestMode,
    datasets: Datasets,
    evolution: Option<SchemaEvolutionResult>,
}

impl Generator {
    pub fn mode(&self) -> &IngestMode {
        &self.mode
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    pub fn sink(&self) -> &Arc<dyn RelationalSink> {
        &self.sink
    }

    /// Copy of the generator planning `mode` instead
    pub fn with_mode(&self, mode: IngestMode) -> Generator {
        Generator {
            mode,
            ..self.clone()
        }
    }

    /// Plans of one batch applying staging to main
    #[instrument(skip_all, err)]
    pub fn generate_operations(&self, datasets: &Datasets) -> Result<GeneratorResult> {
        let resolved = self.resolve(datasets)?;
        self.build(&resolved, None, false)
    }

    /// Plans of one batch per data split range, to be applied in the given order.
    ///
    /// Ranges must be ascending and must not overlap. Modes without data splits get a
    /// single result planning the whole of staging.
    #[instrument(skip_all, err)]
    pub fn generate_operations_with_data_splits(
        &self,
        datasets: &Datasets,
        ranges: &[DataSplitRange],
    ) -> Result<Vec<GeneratorResult>> {
        check_data_split_order(ranges)?;
        let resolved = self.resolve(datasets)?;

        if ranges.is_empty() || resolved.mode.versioning().data_split_field().is_none() {
            if !ranges.is_empty() {
                warn!(
                    "Data splits are not supported by {} ingest mode ... planning staging as one batch",
                    resolved.mode.name()
                );
            }
            return Ok(vec![self.build(&resolved, None, false)?]);
        }

        ranges
            .iter()
            .map(|range| self.build(&resolved, Some(*range), false))
            .collect()
    }

    /// Plans of a batch whose staging dataset holds no rows.
    ///
    /// Snapshot modes apply the empty batch according to their `EmptyDatasetHandling`;
    /// other modes only record the batch.
    #[instrument(skip_all, err)]
    pub fn generate_operations_for_empty_batch(&self, datasets: &Datasets) -> Result<GeneratorResult> {
        let resolved = self.resolve(datasets)?;
        if resolved.mode.empty_dataset_handling() == Some(EmptyDatasetHandling::Fail) {
            return Err(IngestError::EmptyStaging(resolved.datasets.staging.name().to_string()).into());
        }
        self.build(&resolved, None, true)
    }

    fn resolve(&self, datasets: &Datasets) -> Result<Resolved> {
        let case = effective_conversion(self.options.case_conversion, self.sink.case_folding());
        let mode = convert_mode(&self.mode, case);
        let datasets = convert_datasets(&resolve_external_references(datasets)?, case);

        let schema = derive_main_schema(&datasets.main, &datasets.staging, &mode)?;
        let mut main = datasets.main.clone().with_schema(schema);

        let evolution = if self.options.enable_schema_evolution {
            let result = evolve_schema(
                &main,
                &datasets.staging,
                &mode,
                &self.options.schema_evolution_capabilities,
                self.sink.as_ref(),
            )?;
            debug!(
                "Schema evolution of {} ... {} alterations",
                main.name(),
                result.operations.len()
            );
            main = result.evolved.clone();
            Some(result)
        } else {
            None
        };

        let resolved = Resolved {
            mode,
            datasets: datasets.with_main(main),
            evolution,
        };
        validate(&self.context(&resolved))?;
        Ok(resolved)
    }

    fn context(&self, resolved: &Resolved) -> PlanningContext {
        PlanningContext::new(
            resolved.mode.clone(),
            &resolved.datasets,
            self.options.clone(),
            self.sink.capabilities().clone(),
        )
    }

    fn build(
        &self,
        resolved: &Resolved,
        range: Option<DataSplitRange>,
        empty_batch: bool,
    ) -> Result<GeneratorResult> {
        let context = self.context(resolved).with_data_split_range(range);
        let planner = planner_for(context.clone())?;
        let metadata = MetadataPlanner::new(&context);
        let auxiliary = planner.auxiliary_datasets();
        let concurrent = self.options.enable_concurrent_safety;

        let ingest_plan = match (empty_batch, context.mode().empty_dataset_handling()) {
            (true, Some(EmptyDatasetHandling::NoOp)) => LogicalPlan::default(),
            (true, _) => planner.empty_batch_plan(),
            (false, _) => planner.ingest_plan(),
        };
        let dedup = if empty_batch {
            DedupAndVersioningPlans::default()
        } else {
            DedupAndVersioningPlans::new(&context)
        };

        let (pre_ingest_statistics, post_ingest_statistics) = if self.options.collect_statistics {
            (planner.pre_ingest_statistics(), planner.post_ingest_statistics())
        } else {
            (BTreeMap::new(), BTreeMap::new())
        };

        let mut pre_actions_plan = LogicalPlan::of(Operation::create_if_not_exists(
            context.main_dataset().clone(),
        ));
        pre_actions_plan.extend(metadata.create_plan());
        for dataset in &auxiliary {
            pre_actions_plan.push(Operation::create_if_not_exists(dataset.clone()));
        }

        let post_cleanup_plan = PlanningContext::clear(&auxiliary);
        let mut post_actions_plan = post_cleanup_plan.clone();
        if self.options.cleanup_staging_data
            && !matches!(context.raw_staging_dataset().kind, DatasetKind::StagedFiles(_))
        {
            post_actions_plan.push(Operation::delete_all(
                context.raw_staging_dataset().reference.clone(),
            ));
        }

        let dry_run = match context.mode() {
            IngestMode::BulkLoad(_) => BulkLoadPlanner::new(context.clone()).dry_run_plans(),
            _ => None,
        };

        let mut datasets = resolved.datasets.clone();
        datasets.metadata = Some(context.metadata().clone());
        datasets.lock_info = Some(context.lock_info().clone());

        let result = GeneratorResult {
            pre_actions_plan,
            metadata_create_plan: metadata.create_plan(),
            schema_evolution_plan: resolved
                .evolution
                .as_ref()
                .filter(|evolution| !evolution.operations.is_empty())
                .map(|evolution| LogicalPlan::new(evolution.operations.clone())),
            schema_evolution_dataset: resolved
                .evolution
                .as_ref()
                .map(|evolution| evolution.evolved.clone()),
            init_lock_plan: concurrent.then(|| metadata.init_lock_plan()),
            acquire_lock_plan: concurrent.then(|| metadata.acquire_lock_plan()),
            next_batch_id_plan: if concurrent {
                metadata.next_batch_id_from_lock_plan()
            } else {
                metadata.next_batch_id_plan()
            },
            previously_processed_plan: metadata.previously_processed_plan(),
            latest_source_info_plan: metadata.latest_source_info_plan(),
            staging_row_count_plan: context
                .mode()
                .is_snapshot()
                .then(|| staging_row_count_plan(&context)),
            partition_specs_plan: partition_specs_plan(&context),
            dedup_and_versioning_plan: dedup.plan,
            dedup_and_versioning_error_checks: dedup.error_checks,
            dedup_and_versioning_error_rows: dedup.error_rows,
            ingest_plan,
            pre_ingest_statistics,
            post_ingest_statistics,
            metadata_ingest_plan: metadata.metadata_ingest_plan(),
            post_actions_plan,
            post_cleanup_plan,
            optimization_bounds_plan: context.optimization_bounds_plan(),
            data_split_ranges_plan: dedup.data_split_ranges_plan,
            dry_run_pre_actions_plan: dry_run.as_ref().map(|plans| plans.pre_actions.clone()),
            dry_run_plan: dry_run.as_ref().map(|plans| plans.load.clone()),
            dry_run_validation_plan: dry_run.as_ref().map(|plans| plans.validation.clone()),
            dry_run_post_cleanup_plan: dry_run.map(|plans| plans.post_cleanup),
            data_split_range: range,
            ingest_mode: context.mode().clone(),
            datasets,
        };

        debug!(
            "Planned {} ... ingest operations: {}, statistics: {}",
            context.main_dataset().name(),
            result.ingest_plan.len(),
            result.pre_ingest_statistics.len() + result.post_ingest_statistics.len()
        );
        Ok(result)
    }
}

/// `SELECT COUNT(*)` over staging as defined, before deduplication
fn staging_row_count_plan(context: &PlanningContext) -> LogicalPlan {
    LogicalPlan::of(Operation::select(
        Selection::from_dataset(context.raw_staging_as(STAGING_ALIAS))
            .filter_opt(context.raw_staging_filter(STAGING_ALIAS))
            .project(vec![Value::count_all().alias(STAGING_ROW_COUNT_COLUMN)]),
    ))
}

fn check_data_split_order(ranges: &[DataSplitRange]) -> Result<(), ValidationError> {
    let invalid = ranges.iter().any(|range| range.lower_bound > range.upper_bound)
        || ranges
            .windows(2)
            .any(|pair| pair[0].upper_bound >= pair[1].lower_bound);
    if invalid {
        let ranges = ranges
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ValidationError::DataSplitOrder(ranges));
    }
    Ok(())
}
