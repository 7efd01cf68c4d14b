use std::collections::BTreeMap;

use super::context::PlanningContext;
use super::{Planner, MAIN_ALIAS, STAGING_ALIAS};
use crate::logical_plan::{Condition, LogicalPlan, Operation, Selection, Value};
use crate::statistics::StatisticName;

/// `UPDATE main` closing the open rows selected by `condition`
pub(super) fn close_open_rows(context: &PlanningContext, condition: Option<Condition>) -> Operation {
    Operation::UpdateWhere {
        target: context.main(),
        assignments: context.close_assignments(),
        condition: Condition::all([context.open_row(MAIN_ALIAS), condition]),
    }
}

/// Staging rows of this batch with no identical open main row
pub(super) fn without_open_match(context: &PlanningContext) -> Condition {
    Condition::not_exists(
        Selection::from_dataset(context.main())
            .project(vec![Value::All])
            .filter_opt(context.open_row(MAIN_ALIAS))
            .filter(context.keys_match(MAIN_ALIAS, STAGING_ALIAS))
            .filter(context.unchanged(MAIN_ALIAS, STAGING_ALIAS))
            .filter_opt(context.optimization_bounds(MAIN_ALIAS)),
    )
}

/// `INSERT INTO main` of new open rows for the staging rows selected by `condition`
pub(super) fn open_rows(context: &PlanningContext, condition: Option<Condition>) -> Operation {
    let (fields, values) = context.insert_columns(STAGING_ALIAS);
    Operation::InsertSelect {
        target: context.main_dataset().reference.clone(),
        fields,
        source: context
            .staging_selection(STAGING_ALIAS)
            .filter_opt(condition)
            .project(values),
    }
}

/// Applies staging as changes: changed and deleted keys close their open row, changed and
/// new keys get a new open row.
#[derive(Debug, Clone)]
pub struct UnitemporalDeltaPlanner {
    context: PlanningContext,
}

impl UnitemporalDeltaPlanner {
    pub fn new(context: PlanningContext) -> Self {
        Self { context }
    }

    /// Open main rows with a staging row of the same key carrying new data or a deletion
    fn superseded(&self) -> Condition {
        let context = &self.context;
        let change = match context.is_deleted(STAGING_ALIAS) {
            Some(deleted) => Condition::or(vec![context.changed(MAIN_ALIAS, STAGING_ALIAS), deleted]),
            None => context.changed(MAIN_ALIAS, STAGING_ALIAS),
        };

        Condition::exists(
            context
                .staging_selection(STAGING_ALIAS)
                .project(vec![Value::All])
                .filter(context.keys_match(MAIN_ALIAS, STAGING_ALIAS))
                .filter(change),
        )
    }
}

impl Planner for UnitemporalDeltaPlanner {
    fn context(&self) -> &PlanningContext {
        &self.context
    }

    fn ingest_plan(&self) -> LogicalPlan {
        let context = &self.context;
        LogicalPlan::new(vec![
            close_open_rows(
                context,
                Condition::all([
                    context.optimization_bounds(MAIN_ALIAS),
                    Some(self.superseded()),
                ]),
            ),
            open_rows(
                context,
                Condition::all([
                    context.not_deleted(STAGING_ALIAS),
                    Some(without_open_match(context)),
                ]),
            ),
        ])
    }

    fn post_ingest_statistics(&self) -> BTreeMap<StatisticName, LogicalPlan> {
        self.context.milestoned_statistics().into_iter().collect()
    }
}

/// Applies staging as the complete state: open rows missing from staging are closed.
#[derive(Debug, Clone)]
pub struct UnitemporalSnapshotPlanner {
    context: PlanningContext,
}

impl UnitemporalSnapshotPlanner {
    pub fn new(context: PlanningContext) -> Self {
        Self { context }
    }

    /// Open main rows without an identical staging row
    fn missing_from_staging(&self) -> Condition {
        Condition::not_exists(
            self.context
                .staging_selection(STAGING_ALIAS)
                .project(vec![Value::All])
                .filter(self.context.keys_match(MAIN_ALIAS, STAGING_ALIAS))
                .filter(self.context.unchanged(MAIN_ALIAS, STAGING_ALIAS)),
        )
    }
}

impl Planner for UnitemporalSnapshotPlanner {
    fn context(&self) -> &PlanningContext {
        &self.context
    }

    fn ingest_plan(&self) -> LogicalPlan {
        let context = &self.context;
        LogicalPlan::new(vec![
            close_open_rows(
                context,
                Condition::all([
                    context.partition_scope(MAIN_ALIAS),
                    Some(self.missing_from_staging()),
                ]),
            ),
            open_rows(context, Some(without_open_match(context))),
        ])
    }

    fn empty_batch_plan(&self) -> LogicalPlan {
        LogicalPlan::of(close_open_rows(
            &self.context,
            self.context.partition_scope(MAIN_ALIAS),
        ))
    }

    fn post_ingest_statistics(&self) -> BTreeMap<StatisticName, LogicalPlan> {
        self.context.milestoned_statistics().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_schemas::{
        DataType, Dataset, Datasets, Field, IngestMode, IngestOptions, MergeStrategy,
        OptimizationFilter, ScalarValue, SchemaDefinition, TransactionMilestoning,
        UnitemporalDelta, UnitemporalSnapshot,
    };
    use std::collections::BTreeSet;

    fn batch_id() -> TransactionMilestoning {
        TransactionMilestoning::BatchId {
            batch_id_in: "batch_id_in".to_string(),
            batch_id_out: "batch_id_out".to_string(),
        }
    }

    fn context(mode: IngestMode) -> PlanningContext {
        let staging = SchemaDefinition::new(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("amount", DataType::Int),
            Field::new("digest", DataType::Varchar),
            Field::new("op", DataType::Varchar),
        ]);
        let main = SchemaDefinition::new(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("amount", DataType::Int),
            Field::new("digest", DataType::Varchar),
            Field::new("batch_id_in", DataType::Int).with_primary_key(),
            Field::new("batch_id_out", DataType::Int),
        ]);
        PlanningContext::new(
            mode,
            &Datasets::new(Dataset::new("main", main), Dataset::new("staging", staging)),
            IngestOptions::default(),
            BTreeSet::new(),
        )
    }

    #[test]
    fn delta_closes_changed_and_deleted_rows() {
        let mode = IngestMode::UnitemporalDelta(
            UnitemporalDelta::builder()
                .digest_field("digest".to_string())
                .transaction_milestoning(batch_id())
                .merge_strategy(MergeStrategy::DeleteIndicator {
                    delete_field: "op".to_string(),
                    delete_values: vec![ScalarValue::from("D")],
                })
                .build(),
        );
        let plan = UnitemporalDeltaPlanner::new(context(mode)).ingest_plan();
        let statements: Vec<String> = plan.operations.iter().map(ToString::to_string).collect();

        assert_eq!(
            statements[0],
            "UPDATE main as sink SET batch_id_out = ('{NEXT_BATCH_ID_PATTERN}' - 1) \
             WHERE (sink.batch_id_out = 999999999 AND EXISTS (SELECT * FROM staging as stage \
             WHERE (sink.id = stage.id AND (sink.digest <> stage.digest OR stage.op IN ('D')))))"
        );
        assert_eq!(
            statements[1],
            "INSERT INTO main (id, amount, digest, batch_id_in, batch_id_out) \
             (SELECT stage.id, stage.amount, stage.digest, '{NEXT_BATCH_ID_PATTERN}', 999999999 \
             FROM staging as stage WHERE ((NOT stage.op IN ('D') OR stage.op IS NULL) \
             AND NOT EXISTS (SELECT * FROM main as sink WHERE (sink.batch_id_out = 999999999 \
             AND sink.id = stage.id AND sink.digest = stage.digest))))"
        );
    }

    #[test]
    fn delta_bounds_main_by_optimization_filters() {
        let mode = IngestMode::UnitemporalDelta(
            UnitemporalDelta::builder()
                .digest_field("digest".to_string())
                .transaction_milestoning(batch_id())
                .optimization_filters(vec![OptimizationFilter::new("amount")])
                .build(),
        );
        let context = context(mode);
        let plan = UnitemporalDeltaPlanner::new(context.clone()).ingest_plan();

        assert!(plan.operations[0].to_string().contains(
            "sink.amount >= '{AMOUNT_LOWER_BOUND}' AND sink.amount <= '{AMOUNT_UPPER_BOUND}'"
        ));
        assert_eq!(
            context.optimization_bounds_plan().unwrap().operations[0].to_string(),
            "SELECT MIN(stage.amount) as amount_lower_bound, MAX(stage.amount) as amount_upper_bound \
             FROM staging as stage"
        );
    }

    #[test]
    fn snapshot_empty_batch_closes_every_open_row() {
        let mode = IngestMode::UnitemporalSnapshot(
            UnitemporalSnapshot::builder()
                .digest_field("digest".to_string())
                .transaction_milestoning(batch_id())
                .build(),
        );
        let planner = UnitemporalSnapshotPlanner::new(context(mode));

        assert_eq!(
            planner.empty_batch_plan().operations[0].to_string(),
            "UPDATE main as sink SET batch_id_out = ('{NEXT_BATCH_ID_PATTERN}' - 1) \
             WHERE sink.batch_id_out = 999999999"
        );
        let statistics = planner.post_ingest_statistics();
        assert_eq!(
            statistics.keys().copied().collect::<Vec<_>>(),
            vec![
                StatisticName::RowsUpdated,
                StatisticName::RowsDeleted,
                StatisticName::RowsInserted,
                StatisticName::RowsTerminated,
            ]
        );
    }
}
