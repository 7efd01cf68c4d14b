use sluice_schemas::{Dataset, DatasetReference, ValidDateTime};
use std::collections::BTreeMap;

use super::context::{project, PlanningContext};
use super::unitemporal::close_open_rows;
use super::{Planner, INFINITE_BATCH_TIME, MAIN_ALIAS, STAGING_ALIAS};
use crate::logical_plan::{Condition, FunctionName, LogicalPlan, Operation, Selection, Value};
use crate::statistics::StatisticName;

const TEMP_ALIAS: &str = "temp";
const OPEN_ALIAS: &str = "sink_open";
const NEXT_MAIN_ALIAS: &str = "sink_next";
const NEXT_STAGING_ALIAS: &str = "stage_next";

/// Main columns of a new segment: data fields read from `alias`, the validity interval and
/// the open milestoning values
fn segment_columns(
    context: &PlanningContext,
    validity: &ValidDateTime,
    alias: &str,
    from: Value,
    thru: Value,
) -> (Vec<String>, Vec<Value>) {
    let mut fields = context.data_fields();
    let mut values = project(&fields, alias);
    fields.push(validity.date_time_from.clone());
    values.push(from);
    fields.push(validity.date_time_thru.clone());
    values.push(thru);
    for (field, value) in context.open_columns() {
        fields.push(field);
        values.push(value);
    }
    (fields, values)
}

/// End of the validity read from staging; sources without thru are open ended
fn source_thru(validity: &ValidDateTime, alias: &str) -> Value {
    match validity.derivation.source_thru() {
        Some(thru) => Value::field(alias, thru),
        None => Value::literal(INFINITE_BATCH_TIME),
    }
}

/// Same business key and same validity start in main and staging
fn same_segment(
    context: &PlanningContext,
    validity: &ValidDateTime,
    main: &str,
    staging: &str,
) -> Condition {
    context.keys_match(main, staging).and_also(Condition::eq(
        Value::field(main, &validity.date_time_from),
        Value::field(staging, validity.derivation.source_from()),
    ))
}

/// Same key, same validity interval and same data
fn identical_segment(
    context: &PlanningContext,
    validity: &ValidDateTime,
    main: &str,
    staging: &str,
) -> Condition {
    same_segment(context, validity, main, staging)
        .and_also(Condition::eq(
            Value::field(main, &validity.date_time_thru),
            source_thru(validity, staging),
        ))
        .and_also(context.unchanged(main, staging))
}

/// Staging rows for which no identical open segment exists, inserted as new open segments
fn insert_new_segments(
    context: &PlanningContext,
    validity: &ValidDateTime,
    condition: Option<Condition>,
) -> Operation {
    let (fields, values) = segment_columns(
        context,
        validity,
        STAGING_ALIAS,
        Value::field(STAGING_ALIAS, validity.derivation.source_from()),
        source_thru(validity, STAGING_ALIAS),
    );
    let unknown = Condition::not_exists(
        Selection::from_dataset(context.main())
            .project(vec![Value::All])
            .filter_opt(context.open_row(MAIN_ALIAS))
            .filter(identical_segment(context, validity, MAIN_ALIAS, STAGING_ALIAS)),
    );

    Operation::InsertSelect {
        target: context.main_dataset().reference.clone(),
        fields,
        source: context
            .staging_selection(STAGING_ALIAS)
            .filter_opt(condition)
            .filter(unknown)
            .project(values),
    }
}

/// Applies staging as the complete state of every validity segment, with the source
/// providing both ends of the validity interval.
#[derive(Debug, Clone)]
pub struct BitemporalSnapshotPlanner {
    context: PlanningContext,
    validity: ValidDateTime,
}

impl BitemporalSnapshotPlanner {
    pub fn new(context: PlanningContext, validity: ValidDateTime) -> Self {
        Self { context, validity }
    }
}

impl Planner for BitemporalSnapshotPlanner {
    fn context(&self) -> &PlanningContext {
        &self.context
    }

    fn ingest_plan(&self) -> LogicalPlan {
        let context = &self.context;
        let missing_from_staging = Condition::not_exists(
            context
                .staging_selection(STAGING_ALIAS)
                .project(vec![Value::All])
                .filter(identical_segment(
                    context,
                    &self.validity,
                    MAIN_ALIAS,
                    STAGING_ALIAS,
                )),
        );

        LogicalPlan::new(vec![
            close_open_rows(
                context,
                Condition::all([context.partition_scope(MAIN_ALIAS), Some(missing_from_staging)]),
            ),
            insert_new_segments(context, &self.validity, None),
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

/// Applies staging as changes to validity segments.
///
/// With a source thru, every staging row replaces the segment starting at the same
/// instant. With a source from only, segment ends are derived: a new segment lasts until
/// the next known start of its key, and open segments containing a new start are cut at
/// that start.
#[derive(Debug, Clone)]
pub struct BitemporalDeltaPlanner {
    context: PlanningContext,
    validity: ValidDateTime,
}

impl BitemporalDeltaPlanner {
    pub fn new(context: PlanningContext, validity: ValidDateTime) -> Self {
        Self { context, validity }
    }

    fn source_from(&self, alias: &str) -> Value {
        Value::field(alias, self.validity.derivation.source_from())
    }

    fn valid_from(&self, alias: &str) -> Value {
        Value::field(alias, &self.validity.date_time_from)
    }

    fn valid_thru(&self, alias: &str) -> Value {
        Value::field(alias, &self.validity.date_time_thru)
    }

    fn temp(&self) -> DatasetReference {
        self.context
            .temp_dataset()
            .reference
            .clone()
            .with_alias(TEMP_ALIAS)
    }

    fn temp_with_delete_indicator(&self) -> DatasetReference {
        self.context
            .temp_with_delete_indicator_dataset()
            .reference
            .clone()
            .with_alias(TEMP_ALIAS)
    }

    fn from_and_thru_plan(&self) -> LogicalPlan {
        let context = &self.context;
        let mut change = vec![
            context.changed(MAIN_ALIAS, STAGING_ALIAS),
            Condition::not_eq(
                self.valid_thru(MAIN_ALIAS),
                source_thru(&self.validity, STAGING_ALIAS),
            ),
        ];
        change.extend(context.is_deleted(STAGING_ALIAS));

        let superseded = Condition::exists(
            context
                .staging_selection(STAGING_ALIAS)
                .project(vec![Value::All])
                .filter(same_segment(context, &self.validity, MAIN_ALIAS, STAGING_ALIAS))
                .filter(Condition::or(change)),
        );

        LogicalPlan::new(vec![
            close_open_rows(context, Some(superseded)),
            insert_new_segments(context, &self.validity, context.not_deleted(STAGING_ALIAS)),
        ])
    }

    /// Staging rows of this batch adding or replacing a segment under `alias`
    fn upserts(&self, alias: &str) -> Selection {
        let context = &self.context;
        let known = Condition::not_exists(
            Selection::from_dataset(context.main_as(OPEN_ALIAS))
                .project(vec![Value::All])
                .filter_opt(context.open_row(OPEN_ALIAS))
                .filter(same_segment(context, &self.validity, OPEN_ALIAS, alias))
                .filter(context.unchanged(OPEN_ALIAS, alias)),
        );

        context
            .staging_selection(alias)
            .filter_opt(context.not_deleted(alias))
            .filter(known)
    }

    /// `INSERT INTO temp` of the new segments, each lasting until the next open main start
    /// or the next staging start of its key
    fn staging_to_temp(&self) -> Operation {
        let context = &self.context;
        let infinity = || Value::literal(INFINITE_BATCH_TIME);

        let next_main_start = Selection::from_dataset(context.main_as(NEXT_MAIN_ALIAS))
            .project(vec![Value::min(self.valid_from(NEXT_MAIN_ALIAS))])
            .filter_opt(context.open_row(NEXT_MAIN_ALIAS))
            .filter(context.keys_match(NEXT_MAIN_ALIAS, STAGING_ALIAS))
            .filter(Condition::gt(
                self.valid_from(NEXT_MAIN_ALIAS),
                self.source_from(STAGING_ALIAS),
            ));
        let next_staging_start = self
            .upserts(NEXT_STAGING_ALIAS)
            .project(vec![Value::min(self.source_from(NEXT_STAGING_ALIAS))])
            .filter(context.keys_match(NEXT_STAGING_ALIAS, STAGING_ALIAS))
            .filter(Condition::gt(
                self.source_from(NEXT_STAGING_ALIAS),
                self.source_from(STAGING_ALIAS),
            ));
        let thru = Value::function(
            FunctionName::Least,
            vec![
                Value::coalesce(Value::subquery(next_main_start), infinity()),
                Value::coalesce(Value::subquery(next_staging_start), infinity()),
            ],
        );

        let (fields, values) = segment_columns(
            context,
            &self.validity,
            STAGING_ALIAS,
            self.source_from(STAGING_ALIAS),
            thru,
        );
        Operation::InsertSelect {
            target: context.temp_dataset().reference.clone(),
            fields,
            source: self.upserts(STAGING_ALIAS).project(values),
        }
    }

    /// `INSERT INTO temp` of the open main segments containing a new start, cut at the
    /// first one. Segments starting at a new start are replaced instead.
    fn main_to_temp(&self) -> Operation {
        let context = &self.context;
        let starts_inside = self
            .upserts(STAGING_ALIAS)
            .filter(context.keys_match(MAIN_ALIAS, STAGING_ALIAS))
            .filter(Condition::gt(
                self.source_from(STAGING_ALIAS),
                self.valid_from(MAIN_ALIAS),
            ))
            .filter(Condition::lt(
                self.source_from(STAGING_ALIAS),
                self.valid_thru(MAIN_ALIAS),
            ));
        let replaced = self
            .upserts(STAGING_ALIAS)
            .project(vec![Value::All])
            .filter(context.keys_match(MAIN_ALIAS, STAGING_ALIAS))
            .filter(Condition::eq(
                self.source_from(STAGING_ALIAS),
                self.valid_from(MAIN_ALIAS),
            ));

        let (fields, values) = segment_columns(
            context,
            &self.validity,
            MAIN_ALIAS,
            self.valid_from(MAIN_ALIAS),
            Value::subquery(
                starts_inside
                    .clone()
                    .project(vec![Value::min(self.source_from(STAGING_ALIAS))]),
            ),
        );
        Operation::InsertSelect {
            target: context.temp_dataset().reference.clone(),
            fields,
            source: Selection::from_dataset(context.main())
                .filter_opt(context.open_row(MAIN_ALIAS))
                .filter(Condition::exists(starts_inside.project(vec![Value::All])))
                .filter(Condition::not_exists(replaced))
                .project(values),
        }
    }

    /// Open main segments with a row of the same key and start in `temp`
    fn in_temp(&self, temp: DatasetReference) -> Condition {
        Condition::exists(
            Selection::from_dataset(temp)
                .project(vec![Value::All])
                .filter(self.context.keys_match(MAIN_ALIAS, TEMP_ALIAS))
                .filter(Condition::eq(
                    self.valid_from(MAIN_ALIAS),
                    self.valid_from(TEMP_ALIAS),
                )),
        )
    }

    /// `INSERT INTO main` of every segment of `temp` selected by `condition`, as open rows
    fn temp_to_main(&self, temp: DatasetReference, condition: Option<Condition>) -> Operation {
        let (fields, values) = segment_columns(
            &self.context,
            &self.validity,
            TEMP_ALIAS,
            self.valid_from(TEMP_ALIAS),
            self.valid_thru(TEMP_ALIAS),
        );
        Operation::InsertSelect {
            target: self.context.main_dataset().reference.clone(),
            fields,
            source: Selection::from_dataset(temp)
                .filter_opt(condition)
                .project(values),
        }
    }

    /// Staging rows flagged as deleted, of the key of `main` and starting at `start`
    fn deletion_at(&self, main: &str, start: Value) -> Option<Selection> {
        let deleted = self.context.is_deleted(STAGING_ALIAS)?;
        Some(
            self.context
                .staging_selection(STAGING_ALIAS)
                .project(vec![Value::All])
                .filter(deleted)
                .filter(self.context.keys_match(main, STAGING_ALIAS))
                .filter(Condition::eq(self.source_from(STAGING_ALIAS), start)),
        )
    }

    /// Removes deleted segments and extends their predecessor over the removed run.
    ///
    /// Removed segments and extended predecessors are collected in the temp with delete
    /// indicator dataset; segments opened by this batch are deleted physically, the others
    /// are closed.
    fn deletions(&self) -> Option<Vec<Operation>> {
        let context = &self.context;
        let removed = self.deletion_at(MAIN_ALIAS, self.valid_from(MAIN_ALIAS))?;
        let follows_removed = self.deletion_at(MAIN_ALIAS, self.valid_thru(MAIN_ALIAS))?;
        let next_removed = self.deletion_at(NEXT_MAIN_ALIAS, self.valid_from(NEXT_MAIN_ALIAS))?;
        let temp_removed = self.deletion_at(TEMP_ALIAS, self.valid_from(TEMP_ALIAS))?;

        let mut fields = context.data_fields();
        fields.push(self.validity.date_time_from.clone());
        fields.push(self.validity.date_time_thru.clone());
        let removed_values = project(&fields, MAIN_ALIAS);

        let next_surviving_start = Selection::from_dataset(context.main_as(NEXT_MAIN_ALIAS))
            .project(vec![Value::min(self.valid_from(NEXT_MAIN_ALIAS))])
            .filter_opt(context.open_row(NEXT_MAIN_ALIAS))
            .filter(context.keys_match(NEXT_MAIN_ALIAS, MAIN_ALIAS))
            .filter(Condition::gt(
                self.valid_from(NEXT_MAIN_ALIAS),
                self.valid_from(MAIN_ALIAS),
            ))
            .filter(Condition::not_exists(next_removed));
        let mut extended_values = removed_values.clone();
        extended_values.pop();
        extended_values.push(Value::coalesce(
            Value::subquery(next_surviving_start),
            Value::literal(INFINITE_BATCH_TIME),
        ));

        let target = context.temp_with_delete_indicator_dataset().reference.clone();
        Some(vec![
            Operation::delete_all(target.clone()),
            Operation::InsertSelect {
                target: target.clone(),
                fields: fields.clone(),
                source: Selection::from_dataset(context.main())
                    .filter_opt(context.open_row(MAIN_ALIAS))
                    .filter(Condition::exists(removed.clone()))
                    .project(removed_values),
            },
            Operation::InsertSelect {
                target,
                fields,
                source: Selection::from_dataset(context.main())
                    .filter_opt(context.open_row(MAIN_ALIAS))
                    .filter(Condition::not_exists(removed))
                    .filter(Condition::exists(follows_removed))
                    .project(extended_values),
            },
            Operation::DeleteWhere {
                target: context.main(),
                condition: Condition::all([
                    context.added_in_batch(MAIN_ALIAS),
                    Some(self.in_temp(self.temp_with_delete_indicator())),
                ]),
            },
            close_open_rows(context, Some(self.in_temp(self.temp_with_delete_indicator()))),
            self.temp_to_main(
                self.temp_with_delete_indicator(),
                Some(Condition::not_exists(temp_removed)),
            ),
        ])
    }

    fn from_only_plan(&self) -> LogicalPlan {
        let mut plan = LogicalPlan::new(vec![
            Operation::delete_all(self.context.temp_dataset().reference.clone()),
            self.staging_to_temp(),
            self.main_to_temp(),
            close_open_rows(&self.context, Some(self.in_temp(self.temp()))),
            self.temp_to_main(self.temp(), None),
        ]);
        if let Some(deletions) = self.deletions() {
            plan.extend(LogicalPlan::new(deletions));
        }
        plan
    }
}

impl Planner for BitemporalDeltaPlanner {
    fn context(&self) -> &PlanningContext {
        &self.context
    }

    fn ingest_plan(&self) -> LogicalPlan {
        match self.validity.derivation.source_thru() {
            Some(_) => self.from_and_thru_plan(),
            None => self.from_only_plan(),
        }
    }

    fn post_ingest_statistics(&self) -> BTreeMap<StatisticName, LogicalPlan> {
        self.context.milestoned_statistics().into_iter().collect()
    }

    fn auxiliary_datasets(&self) -> Vec<Dataset> {
        let mut datasets = self.context.temp_staging_datasets();
        if self.validity.derivation.source_thru().is_none() {
            datasets.push(self.context.temp_dataset().clone());
            if self.context.is_deleted(STAGING_ALIAS).is_some() {
                datasets.push(self.context.temp_with_delete_indicator_dataset().clone());
            }
        }
        datasets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_schemas::{
        BitemporalDelta, BitemporalSnapshot, DataType, Dataset, Datasets, Field, IngestMode,
        IngestOptions, MergeStrategy, ScalarValue, SchemaDefinition, TransactionMilestoning,
        ValidityDerivation,
    };
    use std::collections::BTreeSet;

    fn batch_id() -> TransactionMilestoning {
        TransactionMilestoning::BatchId {
            batch_id_in: "batch_id_in".to_string(),
            batch_id_out: "batch_id_out".to_string(),
        }
    }

    fn from_and_thru() -> ValidDateTime {
        ValidDateTime {
            date_time_from: "valid_from".to_string(),
            date_time_thru: "valid_thru".to_string(),
            derivation: ValidityDerivation::SourceSpecifiesFromAndThruDateTime {
                source_date_time_from: "start_at".to_string(),
                source_date_time_thru: "end_at".to_string(),
            },
        }
    }

    fn from_only() -> ValidDateTime {
        ValidDateTime {
            date_time_from: "valid_from".to_string(),
            date_time_thru: "valid_thru".to_string(),
            derivation: ValidityDerivation::SourceSpecifiesFromDateTime {
                source_date_time_from: "start_at".to_string(),
            },
        }
    }

    fn context(mode: IngestMode) -> PlanningContext {
        let staging = SchemaDefinition::new(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("price", DataType::Int),
            Field::new("digest", DataType::Varchar),
            Field::new("start_at", DataType::Timestamp).with_primary_key(),
            Field::new("end_at", DataType::Timestamp),
            Field::new("op", DataType::Varchar),
        ]);
        let main = SchemaDefinition::new(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("price", DataType::Int),
            Field::new("digest", DataType::Varchar),
            Field::new("valid_from", DataType::Timestamp).with_primary_key(),
            Field::new("valid_thru", DataType::Timestamp),
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

    fn delta(validity: ValidDateTime, merge_strategy: MergeStrategy) -> BitemporalDeltaPlanner {
        let mode = IngestMode::BitemporalDelta(
            BitemporalDelta::builder()
                .digest_field("digest".to_string())
                .transaction_milestoning(batch_id())
                .validity_milestoning(validity.clone())
                .merge_strategy(merge_strategy)
                .build(),
        );
        BitemporalDeltaPlanner::new(context(mode), validity)
    }

    #[test]
    fn from_and_thru_replaces_segments_by_start() {
        let plan = delta(from_and_thru(), MergeStrategy::NoDeletes).ingest_plan();

        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.operations[0].to_string(),
            "UPDATE main as sink SET batch_id_out = ('{NEXT_BATCH_ID_PATTERN}' - 1) \
             WHERE (sink.batch_id_out = 999999999 AND EXISTS (SELECT * FROM staging as stage \
             WHERE (sink.id = stage.id AND sink.valid_from = stage.start_at \
             AND (sink.digest <> stage.digest OR sink.valid_thru <> stage.end_at))))"
        );
        assert_eq!(
            plan.operations[1].to_string(),
            "INSERT INTO main (id, price, digest, valid_from, valid_thru, batch_id_in, batch_id_out) \
             (SELECT stage.id, stage.price, stage.digest, stage.start_at, stage.end_at, \
             '{NEXT_BATCH_ID_PATTERN}', 999999999 FROM staging as stage \
             WHERE NOT EXISTS (SELECT * FROM main as sink WHERE (sink.batch_id_out = 999999999 \
             AND sink.id = stage.id AND sink.valid_from = stage.start_at \
             AND sink.valid_thru = stage.end_at AND sink.digest = stage.digest)))"
        );
    }

    #[test]
    fn from_only_derives_segment_ends_through_temp() {
        let planner = delta(from_only(), MergeStrategy::NoDeletes);
        let plan = planner.ingest_plan();
        let statements: Vec<String> = plan.operations.iter().map(ToString::to_string).collect();

        assert_eq!(statements.len(), 5);
        assert_eq!(statements[0], "DELETE FROM main_temp");
        assert!(statements[1].starts_with("INSERT INTO main_temp ("));
        assert!(statements[1].contains(
            "LEAST(COALESCE((SELECT MIN(sink_next.valid_from) FROM main as sink_next"
        ));
        assert!(statements[2].contains("(SELECT MIN(stage.start_at) FROM staging as stage"));
        assert_eq!(
            statements[3],
            "UPDATE main as sink SET batch_id_out = ('{NEXT_BATCH_ID_PATTERN}' - 1) \
             WHERE (sink.batch_id_out = 999999999 AND EXISTS (SELECT * FROM main_temp as temp \
             WHERE (sink.id = temp.id AND sink.valid_from = temp.valid_from)))"
        );
        assert!(statements[4].starts_with("INSERT INTO main (id, price, digest, valid_from"));
        assert_eq!(
            planner
                .auxiliary_datasets()
                .iter()
                .map(|dataset| dataset.name().to_string())
                .collect::<Vec<_>>(),
            vec!["main_temp"]
        );
    }

    #[test]
    fn from_only_deletes_extend_predecessors() {
        let planner = delta(
            from_only(),
            MergeStrategy::DeleteIndicator {
                delete_field: "op".to_string(),
                delete_values: vec![ScalarValue::from("D")],
            },
        );
        let plan = planner.ingest_plan();

        assert_eq!(plan.len(), 11);
        assert_eq!(
            plan.operations[5].to_string(),
            "DELETE FROM main_temp_with_delete_indicator"
        );
        assert!(plan.operations[8]
            .to_string()
            .starts_with("DELETE FROM main as sink WHERE (sink.batch_id_in = '{NEXT_BATCH_ID_PATTERN}'"));
        assert_eq!(planner.auxiliary_datasets().len(), 2);
    }

    #[test]
    fn snapshot_closes_segments_missing_from_staging() {
        let mode = IngestMode::BitemporalSnapshot(
            BitemporalSnapshot::builder()
                .digest_field("digest".to_string())
                .transaction_milestoning(batch_id())
                .validity_milestoning(from_and_thru())
                .build(),
        );
        let planner = BitemporalSnapshotPlanner::new(context(mode), from_and_thru());

        assert!(planner.ingest_plan().operations[0].to_string().contains(
            "NOT EXISTS (SELECT * FROM staging as stage WHERE (sink.id = stage.id \
             AND sink.valid_from = stage.start_at AND sink.valid_thru = stage.end_at \
             AND sink.digest = stage.digest))"
        ));
        assert_eq!(
            planner.empty_batch_plan().operations[0].to_string(),
            "UPDATE main as sink SET batch_id_out = ('{NEXT_BATCH_ID_PATTERN}' - 1) \
             WHERE sink.batch_id_out = 999999999"
        );
    }
}
