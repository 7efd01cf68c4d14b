//! Planners turning an ingest mode and its datasets into logical plans.
//!
//! Every mode has its own [`Planner`]. They share a [`PlanningContext`] holding the
//! resolved datasets together with the conditions and milestoning values derived from
//! the mode.

use sluice_schemas::{Dataset, Datasets, IngestMode, IngestOptions, ValidityDerivation};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::ValidationError;
use crate::executor::Capability;
use crate::logical_plan::LogicalPlan;
use crate::schema::{derive_main_schema, resolve_external_references};
use crate::statistics::StatisticName;

mod bitemporal;
mod bulk_load;
mod context;
mod dedup;
mod metadata;
mod nontemporal;
mod unitemporal;
mod validation;

pub use bitemporal::{BitemporalDeltaPlanner, BitemporalSnapshotPlanner};
pub use bulk_load::{BulkLoadPlanner, DryRunPlans};
pub use context::{lower_bound_column, upper_bound_column, PlanningContext};
pub use dedup::{DedupAndVersionErrorCheck, DedupAndVersioningPlans};
pub use metadata::{
    BatchSourceInfo, MetadataPlanner, BATCH_STATUS_SUCCEEDED, NEXT_BATCH_ID_COLUMN,
};
pub use nontemporal::{AppendOnlyPlanner, NontemporalDeltaPlanner, NontemporalSnapshotPlanner};
pub use unitemporal::{UnitemporalDeltaPlanner, UnitemporalSnapshotPlanner};
pub use validation::validate;

/// `batch_id_out` of open rows
pub const INFINITE_BATCH_ID: i64 = 999_999_999;

/// `date_time_out` and `date_time_thru` of open rows
pub const INFINITE_BATCH_TIME: &str = "9999-12-31 23:59:59";

/// Alias of main in every plan
pub const MAIN_ALIAS: &str = "sink";

/// Alias of staging in every plan
pub const STAGING_ALIAS: &str = "stage";

/// Plans of one ingest mode.
pub trait Planner: fmt::Debug + Send + Sync {
    fn context(&self) -> &PlanningContext;

    /// Operations applying staging to main
    fn ingest_plan(&self) -> LogicalPlan;

    /// Operations applied instead of the ingest plan when staging holds no rows
    fn empty_batch_plan(&self) -> LogicalPlan {
        LogicalPlan::default()
    }

    /// Statistics queried before the ingest plan runs
    fn pre_ingest_statistics(&self) -> BTreeMap<StatisticName, LogicalPlan> {
        BTreeMap::from([(
            StatisticName::IncomingRecordCount,
            self.context().incoming_record_count(),
        )])
    }

    /// Statistics queried after the ingest plan ran
    fn post_ingest_statistics(&self) -> BTreeMap<StatisticName, LogicalPlan> {
        BTreeMap::new()
    }

    /// Datasets written besides main, created before and cleared after the batch
    fn auxiliary_datasets(&self) -> Vec<Dataset> {
        self.context().temp_staging_datasets()
    }
}

/// Planner of the context's ingest mode.
pub fn planner_for(context: PlanningContext) -> Result<Box<dyn Planner>, ValidationError> {
    let planner: Box<dyn Planner> = match context.mode().clone() {
        IngestMode::AppendOnly(_) => Box::new(AppendOnlyPlanner::new(context)),
        IngestMode::NontemporalSnapshot(_) => Box::new(NontemporalSnapshotPlanner::new(context)),
        IngestMode::NontemporalDelta(_) => Box::new(NontemporalDeltaPlanner::new(context)),
        IngestMode::UnitemporalSnapshot(_) => Box::new(UnitemporalSnapshotPlanner::new(context)),
        IngestMode::UnitemporalDelta(_) => Box::new(UnitemporalDeltaPlanner::new(context)),
        IngestMode::BitemporalSnapshot(mode) => match mode.validity_milestoning.derivation {
            ValidityDerivation::SourceSpecifiesFromAndThruDateTime { .. } => Box::new(
                BitemporalSnapshotPlanner::new(context, mode.validity_milestoning),
            ),
            ValidityDerivation::SourceSpecifiesFromDateTime { .. } => {
                return Err(ValidationError::Unsupported {
                    feature: "Validity derived from the source from date time only".to_string(),
                    mode: "bitemporal_snapshot".to_string(),
                })
            }
        },
        IngestMode::BitemporalDelta(mode) => {
            Box::new(BitemporalDeltaPlanner::new(context, mode.validity_milestoning))
        }
        IngestMode::BulkLoad(_) => Box::new(BulkLoadPlanner::new(context)),
    };
    Ok(planner)
}

/// Ingest plan of `mode`, using default options and a sink supporting every capability.
///
/// A main dataset without fields gets its schema derived from staging.
///
/// # Examples
///
/// ```
/// use sluice_core::planner::plan;
/// use sluice_schemas::{
///     DataType, Dataset, Datasets, Field, IngestMode, NontemporalSnapshot, SchemaDefinition,
/// };
///
/// let schema = SchemaDefinition::new(vec![
///     Field::new("id", DataType::Int).with_primary_key(),
///     Field::new("name", DataType::Varchar),
/// ]);
/// let datasets = Datasets::new(
///     Dataset::new("main", schema.clone()),
///     Dataset::new("staging", schema),
/// );
///
/// let plan = plan(
///     &IngestMode::NontemporalSnapshot(NontemporalSnapshot::default()),
///     &datasets,
/// )
/// .unwrap();
///
/// assert_eq!(plan.operations[0].to_string(), "DELETE FROM main as sink");
/// ```
pub fn plan(mode: &IngestMode, datasets: &Datasets) -> Result<LogicalPlan, ValidationError> {
    let capabilities: BTreeSet<Capability> = BTreeSet::from([
        Capability::Merge,
        Capability::AddColumn,
        Capability::ImplicitDataTypeConversion,
        Capability::ExplicitDataTypeConversion,
        Capability::DataSizingChanges,
        Capability::ColumnNullabilityChange,
        Capability::BulkLoad,
        Capability::DryRun,
    ]);
    let datasets = resolve_external_references(datasets)?;
    let main_schema = derive_main_schema(&datasets.main, &datasets.staging, mode)?;
    let main = datasets.main.clone().with_schema(main_schema);
    let context = PlanningContext::new(
        mode.clone(),
        &datasets.with_main(main),
        IngestOptions::default(),
        capabilities,
    );
    validate(&context)?;
    Ok(planner_for(context)?.ingest_plan())
}
