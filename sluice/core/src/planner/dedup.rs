use serde::{Deserialize, Serialize};
use sluice_schemas::{DeduplicationStrategy, VersioningStrategy};
use std::collections::BTreeMap;
use std::fmt;

use super::context::{fields_equal, project, PlanningContext};
use super::STAGING_ALIAS;
use crate::logical_plan::{Condition, LogicalPlan, Operation, Selection, Value};
use crate::schema::DUPLICATE_COUNT_FIELD;

const INNER_ALIAS: &str = "stage_inner";
const PK_COUNT_FIELD: &str = "pk_count";
const DATA_VERSION_COUNT_FIELD: &str = "data_version_count";

/// Checks run on temp staging before main is touched, each yielding one maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DedupAndVersionErrorCheck {
    /// Highest number of identical staging rows
    MaxDuplicates,
    /// Highest number of staging rows sharing a primary key
    MaxPkDuplicates,
    /// Highest number of distinct rows sharing a primary key and version
    MaxDataErrors,
}

impl DedupAndVersionErrorCheck {
    /// Column name of the check's result
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupAndVersionErrorCheck::MaxDuplicates => "MAX_DUPLICATES",
            DedupAndVersionErrorCheck::MaxPkDuplicates => "MAX_PK_DUPLICATES",
            DedupAndVersionErrorCheck::MaxDataErrors => "MAX_DATA_ERRORS",
        }
    }

    /// Count column of the offending rows sampled for the check
    pub fn count_field(&self) -> &'static str {
        match self {
            DedupAndVersionErrorCheck::MaxDuplicates => DUPLICATE_COUNT_FIELD,
            DedupAndVersionErrorCheck::MaxPkDuplicates => PK_COUNT_FIELD,
            DedupAndVersionErrorCheck::MaxDataErrors => DATA_VERSION_COUNT_FIELD,
        }
    }
}

impl fmt::Display for DedupAndVersionErrorCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Plans deduplicating and versioning staging into temp staging, and the checks run on it.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DedupAndVersioningPlans {
    /// Clears temp staging and fills it from staging; `None` when staging is read as is
    pub plan: Option<LogicalPlan>,
    pub error_checks: BTreeMap<DedupAndVersionErrorCheck, LogicalPlan>,
    /// Sample of the offending rows, per check
    pub error_rows: BTreeMap<DedupAndVersionErrorCheck, LogicalPlan>,
    /// Distinct data splits of temp staging
    pub data_split_ranges_plan: Option<LogicalPlan>,
}

impl DedupAndVersioningPlans {
    pub fn new(context: &PlanningContext) -> Self {
        let mode = context.mode();
        let versioning = mode.versioning();
        let mut plans = DedupAndVersioningPlans::default();

        if context.uses_temp_staging() {
            plans.plan = Some(temp_staging_plan(context));
        }

        if mode.deduplication() == DeduplicationStrategy::FailOnDuplicates {
            let (check, rows) = max_duplicates(context);
            plans
                .error_checks
                .insert(DedupAndVersionErrorCheck::MaxDuplicates, check);
            plans
                .error_rows
                .insert(DedupAndVersionErrorCheck::MaxDuplicates, rows);
        }

        if versioning.fails_on_duplicate_primary_keys() {
            let (check, rows) = max_pk_duplicates(context);
            plans
                .error_checks
                .insert(DedupAndVersionErrorCheck::MaxPkDuplicates, check);
            plans
                .error_rows
                .insert(DedupAndVersionErrorCheck::MaxPkDuplicates, rows);
        }

        if let Some(version_field) = versioning
            .version_field()
            .filter(|_| versioning.rewrites_staging())
        {
            let (check, rows) = max_data_errors(context, version_field);
            plans
                .error_checks
                .insert(DedupAndVersionErrorCheck::MaxDataErrors, check);
            plans
                .error_rows
                .insert(DedupAndVersionErrorCheck::MaxDataErrors, rows);
        }

        if let Some(data_split_field) = versioning.data_split_field() {
            plans.data_split_ranges_plan = Some(LogicalPlan::of(Operation::select(
                Selection::from_dataset(context.staging())
                    .project(vec![Value::field(STAGING_ALIAS, data_split_field)])
                    .distinct(),
            )));
        }

        plans
    }
}

/// `DELETE` temp staging, then insert the filtered, versioned and grouped staging rows
fn temp_staging_plan(context: &PlanningContext) -> LogicalPlan {
    let mode = context.mode();
    let staging_fields = context.raw_staging_dataset().schema.field_names();
    let keys = context.primary_keys();

    let mut selection = Selection::from_dataset(context.raw_staging_as(STAGING_ALIAS))
        .filter_opt(context.raw_staging_filter(STAGING_ALIAS));
    let mut projection = project(&staging_fields, STAGING_ALIAS);
    let mut fields = staging_fields.clone();

    let inner_rows = |condition: Option<Condition>| {
        Selection::from_dataset(context.raw_staging_as(INNER_ALIAS))
            .filter_opt(context.raw_staging_filter(INNER_ALIAS))
            .filter(fields_equal(&keys, INNER_ALIAS, STAGING_ALIAS))
            .filter_opt(condition)
    };

    match mode.versioning() {
        VersioningStrategy::NoVersioning { .. } => {}
        VersioningStrategy::MaxVersion {
            perform_deduplication: false,
            ..
        } => {}
        VersioningStrategy::MaxVersion { version_field, .. } => {
            let max_version = inner_rows(None)
                .project(vec![Value::max(Value::field(INNER_ALIAS, &version_field))]);
            selection = selection.filter(Condition::eq(
                Value::field(STAGING_ALIAS, &version_field),
                Value::subquery(max_version),
            ));
        }
        VersioningStrategy::AllVersions {
            version_field,
            data_split_field,
        } => {
            let rank = inner_rows(Some(Condition::le(
                Value::field(INNER_ALIAS, &version_field),
                Value::field(STAGING_ALIAS, &version_field),
            )))
            .project(vec![Value::count_distinct(Value::field(
                INNER_ALIAS,
                &version_field,
            ))]);
            if mode.deduplication() != DeduplicationStrategy::AllowDuplicates {
                projection.push(Value::count_all().alias(DUPLICATE_COUNT_FIELD));
                fields.push(DUPLICATE_COUNT_FIELD.to_string());
            }
            projection.push(Value::subquery(rank).alias(&data_split_field));
            fields.push(data_split_field);
        }
    }

    if mode.deduplication() != DeduplicationStrategy::AllowDuplicates {
        if !fields.iter().any(|field| field == DUPLICATE_COUNT_FIELD) {
            projection.push(Value::count_all().alias(DUPLICATE_COUNT_FIELD));
            fields.push(DUPLICATE_COUNT_FIELD.to_string());
        }
        selection = selection.group_by(project(&staging_fields, STAGING_ALIAS));
    }

    let target = context.temp_staging_dataset().reference.clone();
    LogicalPlan::new(vec![
        Operation::delete_all(target.clone()),
        Operation::InsertSelect {
            target,
            fields,
            source: selection.project(projection),
        },
    ])
}

fn max_duplicates(context: &PlanningContext) -> (LogicalPlan, LogicalPlan) {
    let count = Value::field(STAGING_ALIAS, DUPLICATE_COUNT_FIELD);
    let temp_staging = || Selection::from_dataset(context.staging());

    let check = temp_staging().project(vec![
        Value::max(count.clone()).alias(DedupAndVersionErrorCheck::MaxDuplicates.as_str())
    ]);
    let rows = temp_staging()
        .project(vec![Value::All])
        .filter(Condition::gt(count, Value::literal(1)))
        .limit(context.options().sample_row_count);

    (
        LogicalPlan::of(Operation::select(check)),
        LogicalPlan::of(Operation::select(rows)),
    )
}

fn max_pk_duplicates(context: &PlanningContext) -> (LogicalPlan, LogicalPlan) {
    let keys = context.primary_keys();
    let groups_alias = "pk_groups";

    let mut projection = project(&keys, STAGING_ALIAS);
    projection.push(Value::count_all().alias(PK_COUNT_FIELD));
    let groups = context
        .staging_selection(STAGING_ALIAS)
        .project(projection)
        .group_by(project(&keys, STAGING_ALIAS));

    grouped_check(
        groups,
        groups_alias,
        PK_COUNT_FIELD,
        DedupAndVersionErrorCheck::MaxPkDuplicates,
        context.options().sample_row_count,
    )
}

fn max_data_errors(context: &PlanningContext, version_field: &str) -> (LogicalPlan, LogicalPlan) {
    let mut keys = context.primary_keys();
    keys.push(version_field.to_string());
    let groups_alias = "data_errors";

    let mut projection = project(&keys, STAGING_ALIAS);
    let groups = match context.digest() {
        Some(digest) => {
            projection.push(
                Value::count_distinct(Value::field(STAGING_ALIAS, digest))
                    .alias(DATA_VERSION_COUNT_FIELD),
            );
            Selection::from_dataset(context.staging())
        }
        None => {
            let distinct_rows = Selection::from_dataset(context.staging())
                .project(project(
                    &context.raw_staging_dataset().schema.field_names(),
                    STAGING_ALIAS,
                ))
                .distinct();
            projection.push(Value::count_all().alias(DATA_VERSION_COUNT_FIELD));
            Selection::from_selection(distinct_rows, STAGING_ALIAS)
        }
    };

    grouped_check(
        groups
            .project(projection)
            .group_by(project(&keys, STAGING_ALIAS)),
        groups_alias,
        DATA_VERSION_COUNT_FIELD,
        DedupAndVersionErrorCheck::MaxDataErrors,
        context.options().sample_row_count,
    )
}

/// Maximum of `count_field` over `groups`, and the groups where it exceeds one
fn grouped_check(
    groups: Selection,
    alias: &str,
    count_field: &str,
    check: DedupAndVersionErrorCheck,
    sample_row_count: usize,
) -> (LogicalPlan, LogicalPlan) {
    let count = Value::field(alias, count_field);
    let maximum = Selection::from_selection(groups.clone(), alias)
        .project(vec![Value::max(count.clone()).alias(check.as_str())]);
    let rows = Selection::from_selection(groups, alias)
        .project(vec![Value::All])
        .filter(Condition::gt(count, Value::literal(1)))
        .limit(sample_row_count);

    (
        LogicalPlan::of(Operation::select(maximum)),
        LogicalPlan::of(Operation::select(rows)),
    )
}
