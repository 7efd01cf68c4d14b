use std::collections::BTreeMap;

use super::context::{count_statistic, fields_null_safe_equal, PlanningContext};
use super::{Planner, MAIN_ALIAS, STAGING_ALIAS};
use crate::executor::Capability;
use crate::logical_plan::{
    Assignment, Condition, LogicalPlan, MatchedAction, MergeMatched, MergeNotMatched, Operation,
    Selection, Source, Value,
};
use crate::statistics::StatisticName;

/// `INSERT INTO main` of the staging rows selected by `condition`
fn insert_staging(context: &PlanningContext, condition: Option<Condition>) -> Operation {
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

/// Assignments copying every value field of `alias`, plus the audit column
fn update_assignments(context: &PlanningContext, value: impl Fn(&str) -> Value) -> Vec<Assignment> {
    let mut assignments: Vec<Assignment> = context
        .value_fields()
        .iter()
        .map(|field| Assignment::new(field, value(field.as_str())))
        .collect();
    if let Some((field, value)) = context.audit_column() {
        assignments.push(Assignment::new(field, value));
    }
    assignments
}

/// Appends every staging row to main, optionally skipping rows main already holds.
#[derive(Debug, Clone)]
pub struct AppendOnlyPlanner {
    context: PlanningContext,
}

impl AppendOnlyPlanner {
    pub fn new(context: PlanningContext) -> Self {
        Self { context }
    }

    /// Staging rows that already exist in main
    fn existing(&self) -> Option<Condition> {
        let sluice_schemas::IngestMode::AppendOnly(mode) = self.context.mode() else {
            return None;
        };
        if !mode.filter_existing_records {
            return None;
        }

        let keys = self.context.primary_keys();
        let matches = if keys.is_empty() {
            fields_null_safe_equal(&self.context.data_fields(), MAIN_ALIAS, STAGING_ALIAS)
        } else {
            let mut conditions = vec![self.context.keys_match(MAIN_ALIAS, STAGING_ALIAS)];
            if self.context.digest().is_some() {
                conditions.push(self.context.unchanged(MAIN_ALIAS, STAGING_ALIAS));
            }
            Condition::and(conditions)
        };

        Some(Condition::exists(
            Selection::from_dataset(self.context.main())
                .project(vec![Value::All])
                .filter(matches),
        ))
    }

    fn new_rows(&self) -> Option<Condition> {
        self.existing().map(Condition::not)
    }
}

impl Planner for AppendOnlyPlanner {
    fn context(&self) -> &PlanningContext {
        &self.context
    }

    fn ingest_plan(&self) -> LogicalPlan {
        LogicalPlan::of(insert_staging(&self.context, self.new_rows()))
    }

    fn pre_ingest_statistics(&self) -> BTreeMap<StatisticName, LogicalPlan> {
        BTreeMap::from([
            (
                StatisticName::IncomingRecordCount,
                self.context.incoming_record_count(),
            ),
            (
                StatisticName::RowsInserted,
                count_statistic(
                    StatisticName::RowsInserted,
                    self.context
                        .staging_selection(STAGING_ALIAS)
                        .filter_opt(self.new_rows()),
                ),
            ),
        ])
    }
}

/// Replaces main, or the partitions of this batch, by staging.
#[derive(Debug, Clone)]
pub struct NontemporalSnapshotPlanner {
    context: PlanningContext,
}

impl NontemporalSnapshotPlanner {
    pub fn new(context: PlanningContext) -> Self {
        Self { context }
    }

    fn is_partitioned(&self) -> bool {
        self.context
            .mode()
            .partitioning()
            .is_some_and(|partitioning| partitioning.is_partitioned())
    }

    /// Main rows without an identical staging row
    fn main_only(&self) -> Condition {
        Condition::not_exists(
            self.context
                .staging_selection(STAGING_ALIAS)
                .project(vec![Value::All])
                .filter(fields_null_safe_equal(
                    &self.context.data_fields(),
                    MAIN_ALIAS,
                    STAGING_ALIAS,
                )),
        )
    }

    /// Staging rows without an identical main row
    fn staging_only(&self) -> Condition {
        Condition::not_exists(
            Selection::from_dataset(self.context.main())
                .project(vec![Value::All])
                .filter(fields_null_safe_equal(
                    &self.context.data_fields(),
                    MAIN_ALIAS,
                    STAGING_ALIAS,
                )),
        )
    }

    fn stale_rows(&self) -> Condition {
        Condition::and(
            self.context
                .partition_scope(MAIN_ALIAS)
                .into_iter()
                .chain([self.main_only()])
                .collect(),
        )
    }
}

impl Planner for NontemporalSnapshotPlanner {
    fn context(&self) -> &PlanningContext {
        &self.context
    }

    fn ingest_plan(&self) -> LogicalPlan {
        if !self.is_partitioned() {
            return LogicalPlan::new(vec![
                Operation::delete_all(self.context.main()),
                insert_staging(&self.context, None),
            ]);
        }

        LogicalPlan::new(vec![
            Operation::DeleteWhere {
                target: self.context.main(),
                condition: Some(self.stale_rows()),
            },
            insert_staging(&self.context, Some(self.staging_only())),
        ])
    }

    fn empty_batch_plan(&self) -> LogicalPlan {
        LogicalPlan::of(Operation::DeleteWhere {
            target: self.context.main(),
            condition: self.context.partition_scope(MAIN_ALIAS),
        })
    }

    fn pre_ingest_statistics(&self) -> BTreeMap<StatisticName, LogicalPlan> {
        let main = Selection::from_dataset(self.context.main());
        let mut statistics = BTreeMap::from([(
            StatisticName::IncomingRecordCount,
            self.context.incoming_record_count(),
        )]);

        if self.is_partitioned() {
            statistics.insert(
                StatisticName::RowsDeleted,
                count_statistic(StatisticName::RowsDeleted, main.filter(self.stale_rows())),
            );
            statistics.insert(
                StatisticName::RowsInserted,
                count_statistic(
                    StatisticName::RowsInserted,
                    self.context
                        .staging_selection(STAGING_ALIAS)
                        .filter(self.staging_only()),
                ),
            );
        } else {
            statistics.insert(
                StatisticName::RowsDeleted,
                count_statistic(StatisticName::RowsDeleted, main),
            );
        }
        statistics
    }

    fn post_ingest_statistics(&self) -> BTreeMap<StatisticName, LogicalPlan> {
        if self.is_partitioned() {
            return BTreeMap::new();
        }
        BTreeMap::from([(
            StatisticName::RowsInserted,
            count_statistic(
                StatisticName::RowsInserted,
                Selection::from_dataset(self.context.main()),
            ),
        )])
    }
}

/// Upserts staging into main by primary key, deleting keys flagged by the delete indicator.
#[derive(Debug, Clone)]
pub struct NontemporalDeltaPlanner {
    context: PlanningContext,
}

impl NontemporalDeltaPlanner {
    pub fn new(context: PlanningContext) -> Self {
        Self { context }
    }

    /// Matched rows needing an update; every matched row without a digest or version guard
    fn digest_differs(&self) -> Option<Condition> {
        (self.context.digest().is_some() || self.context.version_guard().is_some())
            .then(|| self.context.changed(MAIN_ALIAS, STAGING_ALIAS))
    }

    /// Staging rows of this batch matching the main row by key
    fn matching_staging(&self, condition: Option<Condition>) -> Selection {
        self.context
            .staging_selection(STAGING_ALIAS)
            .project(vec![Value::All])
            .filter(self.context.keys_match(MAIN_ALIAS, STAGING_ALIAS))
            .filter_opt(condition)
    }

    fn merge(&self) -> Operation {
        let context = &self.context;
        let source = match context.staging_condition(STAGING_ALIAS) {
            None => Source::Dataset {
                reference: context.staging(),
            },
            Some(_) => Source::Selection {
                selection: Box::new(
                    context
                        .staging_selection(STAGING_ALIAS)
                        .project(vec![Value::All]),
                ),
                alias: STAGING_ALIAS.to_string(),
            },
        };

        let mut when_matched = vec![];
        if let Some(deleted) = context.is_deleted(STAGING_ALIAS) {
            when_matched.push(MergeMatched {
                condition: Some(deleted),
                action: MatchedAction::Delete,
            });
        }
        when_matched.push(MergeMatched {
            condition: self.digest_differs(),
            action: MatchedAction::Update {
                assignments: update_assignments(context, |field| {
                    Value::field(STAGING_ALIAS, field)
                }),
            },
        });

        let (fields, values) = context.insert_columns(STAGING_ALIAS);
        Operation::Merge {
            target: context.main(),
            source,
            on: context.keys_match(MAIN_ALIAS, STAGING_ALIAS),
            when_matched,
            when_not_matched: Some(MergeNotMatched {
                condition: context.not_deleted(STAGING_ALIAS),
                fields,
                values,
            }),
        }
    }

    /// Rows to update: a matching live staging row with different data
    fn update_condition(&self) -> Option<Condition> {
        Condition::all([self.context.not_deleted(STAGING_ALIAS), self.digest_differs()])
    }

    fn update(&self) -> Operation {
        let condition = self.update_condition();
        let assignments = update_assignments(&self.context, |field| {
            Value::subquery(
                self.matching_staging(condition.clone())
                    .project(vec![Value::field(STAGING_ALIAS, field)]),
            )
        });

        Operation::UpdateWhere {
            target: self.context.main(),
            assignments,
            condition: Some(Condition::exists(self.matching_staging(condition))),
        }
    }

    fn delete(&self) -> Option<Operation> {
        let deleted = self.context.is_deleted(STAGING_ALIAS)?;
        Some(Operation::DeleteWhere {
            target: self.context.main(),
            condition: Some(Condition::exists(self.matching_staging(Some(deleted)))),
        })
    }

    /// Staging rows without a main row of the same key
    fn new_rows(&self) -> Condition {
        Condition::not_exists(
            Selection::from_dataset(self.context.main())
                .project(vec![Value::All])
                .filter(self.context.keys_match(MAIN_ALIAS, STAGING_ALIAS)),
        )
    }
}

impl Planner for NontemporalDeltaPlanner {
    fn context(&self) -> &PlanningContext {
        &self.context
    }

    fn ingest_plan(&self) -> LogicalPlan {
        if self.context.supports(Capability::Merge) {
            return LogicalPlan::of(self.merge());
        }

        let mut plan = LogicalPlan::default();
        if let Some(delete) = self.delete() {
            plan.push(delete);
        }
        plan.push(self.update());
        plan.push(insert_staging(
            &self.context,
            Condition::all([
                self.context.not_deleted(STAGING_ALIAS),
                Some(self.new_rows()),
            ]),
        ));
        plan
    }

    fn pre_ingest_statistics(&self) -> BTreeMap<StatisticName, LogicalPlan> {
        let main = || Selection::from_dataset(self.context.main());
        let mut statistics = BTreeMap::from([
            (
                StatisticName::IncomingRecordCount,
                self.context.incoming_record_count(),
            ),
            (
                StatisticName::RowsInserted,
                count_statistic(
                    StatisticName::RowsInserted,
                    self.context
                        .staging_selection(STAGING_ALIAS)
                        .filter_opt(self.context.not_deleted(STAGING_ALIAS))
                        .filter(self.new_rows()),
                ),
            ),
            (
                StatisticName::RowsUpdated,
                count_statistic(
                    StatisticName::RowsUpdated,
                    main().filter(Condition::exists(
                        self.matching_staging(self.update_condition()),
                    )),
                ),
            ),
        ]);

        let deleted = match self.context.is_deleted(STAGING_ALIAS) {
            Some(deleted) => count_statistic(
                StatisticName::RowsDeleted,
                main().filter(Condition::exists(self.matching_staging(Some(deleted)))),
            ),
            None => LogicalPlan::of(Operation::select(Selection::values(vec![
                Value::literal(0).alias(StatisticName::RowsDeleted.as_str()),
            ]))),
        };
        statistics.insert(StatisticName::RowsDeleted, deleted);
        statistics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_schemas::{
        AppendOnly, Auditing, DataType, Dataset, Datasets, Field, IngestMode, IngestOptions,
        MergeStrategy, NontemporalDelta, NontemporalSnapshot, Partitioning, ScalarValue,
        SchemaDefinition,
    };
    use std::collections::BTreeSet;

    fn datasets() -> Datasets {
        let staging = SchemaDefinition::new(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("name", DataType::Varchar),
            Field::new("digest", DataType::Varchar),
            Field::new("op", DataType::Varchar),
        ]);
        let main = SchemaDefinition::new(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("name", DataType::Varchar),
            Field::new("digest", DataType::Varchar),
            Field::new("audit_ts", DataType::Timestamp),
        ]);
        Datasets::new(Dataset::new("main", main), Dataset::new("staging", staging))
    }

    fn context(mode: IngestMode, capabilities: BTreeSet<Capability>) -> PlanningContext {
        PlanningContext::new(mode, &datasets(), IngestOptions::default(), capabilities)
    }

    fn auditing() -> Auditing {
        Auditing::DateTimeAuditing {
            date_time_field: "audit_ts".to_string(),
        }
    }

    #[test]
    fn snapshot_replaces_main() {
        let mode = IngestMode::NontemporalSnapshot(
            NontemporalSnapshot::builder().auditing(auditing()).build(),
        );
        let plan = NontemporalSnapshotPlanner::new(context(mode, BTreeSet::new())).ingest_plan();

        let statements: Vec<String> = plan.operations.iter().map(ToString::to_string).collect();
        assert_eq!(
            statements,
            vec![
                "DELETE FROM main as sink".to_string(),
                "INSERT INTO main (id, name, digest, audit_ts) \
                 (SELECT stage.id, stage.name, stage.digest, '{BATCH_START_TIMESTAMP_PLACEHOLDER}' \
                 FROM staging as stage)"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn partitioned_snapshot_scopes_deletes() {
        let mode = IngestMode::NontemporalSnapshot(
            NontemporalSnapshot::builder()
                .partitioning(
                    Partitioning::builder()
                        .partition_fields(vec!["name".to_string()])
                        .partition_specs(vec![BTreeMap::from([(
                            "name".to_string(),
                            ScalarValue::from("a"),
                        )])])
                        .build(),
                )
                .build(),
        );
        let planner = NontemporalSnapshotPlanner::new(context(mode, BTreeSet::new()));

        let delete = planner.ingest_plan().operations[0].to_string();
        assert!(delete.starts_with("DELETE FROM main as sink WHERE (sink.name = 'a' AND NOT EXISTS"));
        assert_eq!(
            planner.empty_batch_plan().operations[0].to_string(),
            "DELETE FROM main as sink WHERE sink.name = 'a'"
        );
    }

    #[test]
    fn delta_merges_when_supported() {
        let mode = IngestMode::NontemporalDelta(
            NontemporalDelta::builder()
                .digest_field("digest".to_string())
                .merge_strategy(MergeStrategy::DeleteIndicator {
                    delete_field: "op".to_string(),
                    delete_values: vec![ScalarValue::from("D")],
                })
                .build(),
        );
        let planner =
            NontemporalDeltaPlanner::new(context(mode.clone(), BTreeSet::from([Capability::Merge])));

        let plan = planner.ingest_plan();
        assert_eq!(plan.len(), 1);
        let Operation::Merge { when_matched, .. } = &plan.operations[0] else {
            panic!("expected merge");
        };
        assert_eq!(when_matched[0].action, MatchedAction::Delete);
        assert_eq!(
            plan.operations[0].to_string(),
            "MERGE INTO main as sink USING staging as stage ON sink.id = stage.id"
        );

        let planner = NontemporalDeltaPlanner::new(context(mode, BTreeSet::new()));
        let statements: Vec<String> = planner
            .ingest_plan()
            .operations
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("DELETE FROM main as sink WHERE EXISTS"));
        assert!(statements[1].starts_with("UPDATE main as sink SET name = (SELECT stage.name"));
        assert!(statements[2].contains("NOT EXISTS (SELECT * FROM main as sink WHERE sink.id = stage.id)"));
    }

    #[test]
    fn append_only_filters_existing_records() {
        let mode = IngestMode::AppendOnly(
            AppendOnly::builder()
                .digest_field("digest".to_string())
                .filter_existing_records(true)
                .build(),
        );
        let plan = AppendOnlyPlanner::new(context(mode, BTreeSet::new())).ingest_plan();

        assert_eq!(
            plan.operations[0].to_string(),
            "INSERT INTO main (id, name, digest) (SELECT stage.id, stage.name, stage.digest \
             FROM staging as stage WHERE NOT EXISTS (SELECT * FROM main as sink \
             WHERE (sink.id = stage.id AND sink.digest = stage.digest)))"
        );
    }
}
