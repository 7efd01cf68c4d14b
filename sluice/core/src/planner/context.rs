use sluice_schemas::{
    DataSplitRange, Dataset, DatasetFilter, DatasetKind, DatasetReference, Datasets,
    DeduplicationStrategy, FilterExpression, FilterType, IngestMode, IngestOptions,
    LockInfoDataset, MetadataDataset, SchemaDefinition, VersioningComparator,
};
use std::collections::BTreeSet;

use super::{INFINITE_BATCH_ID, INFINITE_BATCH_TIME, MAIN_ALIAS, STAGING_ALIAS};
use crate::executor::Capability;
use crate::logical_plan::{Assignment, Condition, LogicalPlan, Operation, Placeholder, Selection, Value};
use crate::schema::{
    complete_auxiliary_schemas, control_fields, managed_fields, with_default_references,
    DUPLICATE_COUNT_FIELD,
};
use crate::statistics::StatisticName;

/// Resolved datasets and mode of one planning run.
///
/// Staging is read from the temp staging dataset whenever deduplication or versioning
/// rewrote it; [`PlanningContext::staging`] always refers to the dataset to read.
#[derive(Debug, Clone)]
pub struct PlanningContext {
    mode: IngestMode,
    main: Dataset,
    staging: Dataset,
    temp: Dataset,
    temp_with_delete_indicator: Dataset,
    temp_staging: Dataset,
    staging_without_duplicates: Dataset,
    metadata: MetadataDataset,
    lock_info: LockInfoDataset,
    options: IngestOptions,
    capabilities: BTreeSet<Capability>,
    data_split_range: Option<DataSplitRange>,
}

impl PlanningContext {
    pub fn new(
        mode: IngestMode,
        datasets: &Datasets,
        options: IngestOptions,
        capabilities: BTreeSet<Capability>,
    ) -> Self {
        let datasets =
            complete_auxiliary_schemas(with_default_references(datasets), &mode, DUPLICATE_COUNT_FIELD);
        let or_empty = |dataset: Option<Dataset>, name: String| {
            dataset.unwrap_or_else(|| Dataset::new(name, SchemaDefinition::default()))
        };
        let main_name = datasets.main.name().to_string();
        let staging_name = datasets.staging.name().to_string();

        Self {
            temp: or_empty(datasets.temp, format!("{main_name}_temp")),
            temp_with_delete_indicator: or_empty(
                datasets.temp_with_delete_indicator,
                format!("{main_name}_temp_with_delete_indicator"),
            ),
            temp_staging: or_empty(datasets.temp_staging, format!("{staging_name}_temp_staging")),
            staging_without_duplicates: or_empty(
                datasets.staging_without_duplicates,
                format!("{staging_name}_without_duplicates"),
            ),
            metadata: datasets.metadata.unwrap_or_default(),
            lock_info: datasets
                .lock_info
                .unwrap_or_else(|| LockInfoDataset::for_main(&datasets.main.reference)),
            main: datasets.main,
            staging: datasets.staging,
            mode,
            options,
            capabilities,
            data_split_range: None,
        }
    }

    /// Copy of the context planning the data splits in `range`
    pub fn with_data_split_range(mut self, range: Option<DataSplitRange>) -> Self {
        self.data_split_range = range;
        self
    }

    pub fn mode(&self) -> &IngestMode {
        &self.mode
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn data_split_range(&self) -> Option<DataSplitRange> {
        self.data_split_range
    }

    pub fn main_dataset(&self) -> &Dataset {
        &self.main
    }

    /// Staging as configured, before deduplication and versioning
    pub fn raw_staging_dataset(&self) -> &Dataset {
        &self.staging
    }

    pub fn temp_staging_dataset(&self) -> &Dataset {
        &self.temp_staging
    }

    pub fn temp_dataset(&self) -> &Dataset {
        &self.temp
    }

    pub fn temp_with_delete_indicator_dataset(&self) -> &Dataset {
        &self.temp_with_delete_indicator
    }

    pub fn staging_without_duplicates_dataset(&self) -> &Dataset {
        &self.staging_without_duplicates
    }

    pub fn metadata(&self) -> &MetadataDataset {
        &self.metadata
    }

    pub fn lock_info(&self) -> &LockInfoDataset {
        &self.lock_info
    }

    /// Whether staging is deduplicated or versioned into the temp staging dataset
    pub fn uses_temp_staging(&self) -> bool {
        self.mode.deduplication() != DeduplicationStrategy::AllowDuplicates
            || self.mode.versioning().rewrites_staging()
    }

    /// Version field and comparator deciding whether a staging row replaces a main row.
    ///
    /// Only delta modes updating main in place by key compare versions against main.
    pub fn version_guard(&self) -> Option<(String, VersioningComparator)> {
        if !matches!(
            self.mode,
            IngestMode::NontemporalDelta(_) | IngestMode::UnitemporalDelta(_)
        ) {
            return None;
        }
        self.mode
            .versioning()
            .version_guard()
            .map(|(field, comparator)| (field.to_string(), comparator))
    }

    /// The staging dataset the ingest plan reads
    pub fn effective_staging(&self) -> &Dataset {
        if self.uses_temp_staging() {
            &self.temp_staging
        } else {
            &self.staging
        }
    }

    /// The temp staging dataset when it is used
    pub fn temp_staging_datasets(&self) -> Vec<Dataset> {
        if self.uses_temp_staging() {
            vec![self.temp_staging.clone()]
        } else {
            vec![]
        }
    }

    pub fn main(&self) -> DatasetReference {
        self.main_as(MAIN_ALIAS)
    }

    pub fn main_as(&self, alias: &str) -> DatasetReference {
        self.main.reference.clone().with_alias(alias)
    }

    pub fn staging(&self) -> DatasetReference {
        self.staging_as(STAGING_ALIAS)
    }

    pub fn staging_as(&self, alias: &str) -> DatasetReference {
        self.effective_staging().reference.clone().with_alias(alias)
    }

    pub fn raw_staging_as(&self, alias: &str) -> DatasetReference {
        self.staging.reference.clone().with_alias(alias)
    }

    pub fn digest(&self) -> Option<&str> {
        self.mode.digest_field()
    }

    /// Business key: the staging primary keys without source validity, version and data
    /// split fields. Falls back to the main primary keys without milestoning fields.
    pub fn primary_keys(&self) -> Vec<String> {
        let mut excluded = control_fields(&self.mode);
        excluded.extend(managed_fields(&self.mode));
        let versioning = self.mode.versioning();
        excluded.extend(versioning.version_field().map(str::to_string));
        excluded.extend(versioning.data_split_field().map(str::to_string));

        let keys: Vec<String> = self
            .staging
            .schema
            .primary_keys()
            .into_iter()
            .filter(|key| !excluded.contains(key))
            .collect();
        if !keys.is_empty() {
            return keys;
        }
        self.main
            .schema
            .primary_keys()
            .into_iter()
            .filter(|key| !excluded.contains(key))
            .collect()
    }

    /// Staging fields copied into main as they are
    pub fn data_fields(&self) -> Vec<String> {
        let mut excluded = control_fields(&self.mode);
        excluded.extend(managed_fields(&self.mode));
        excluded.push(DUPLICATE_COUNT_FIELD.to_string());
        excluded.extend(self.mode.versioning().data_split_field().map(str::to_string));

        self.staging
            .schema
            .fields
            .iter()
            .map(|field| field.name.clone())
            .filter(|name| !excluded.contains(name) && self.main.schema.contains(name))
            .collect()
    }

    /// Data fields that are not part of the business key
    pub fn value_fields(&self) -> Vec<String> {
        let keys = self.primary_keys();
        self.data_fields()
            .into_iter()
            .filter(|field| !keys.contains(field))
            .collect()
    }

    /// Filters of the staging dataset definition
    pub fn raw_staging_filter(&self, alias: &str) -> Option<Condition> {
        match &self.staging.kind {
            DatasetKind::Derived { filters } if !filters.is_empty() => Some(Condition::and(
                filters.iter().map(|filter| filter_condition(filter, alias)).collect(),
            )),
            DatasetKind::Filtered { filter } => Some(expression_condition(filter, alias)),
            _ => None,
        }
    }

    /// Data split bounds on temp staging, when planning a range of data splits
    pub fn split_filter(&self, alias: &str) -> Option<Condition> {
        let field = self.mode.versioning().data_split_field()?.to_string();
        self.data_split_range?;

        Some(Condition::and(vec![
            Condition::ge(
                Value::field(alias, &field),
                Value::placeholder(Placeholder::DataSplitLowerBound),
            ),
            Condition::le(
                Value::field(alias, &field),
                Value::placeholder(Placeholder::DataSplitUpperBound),
            ),
        ]))
    }

    /// Condition selecting the staging rows of this batch from [`Self::staging`]
    pub fn staging_condition(&self, alias: &str) -> Option<Condition> {
        let filter = if self.uses_temp_staging() {
            None
        } else {
            self.raw_staging_filter(alias)
        };
        Condition::all([filter, self.split_filter(alias)])
    }

    /// Staging rows of this batch, under `alias`
    pub fn staging_selection(&self, alias: &str) -> Selection {
        Selection::from_dataset(self.staging_as(alias)).filter_opt(self.staging_condition(alias))
    }

    pub fn is_deleted(&self, alias: &str) -> Option<Condition> {
        let sluice_schemas::MergeStrategy::DeleteIndicator {
            delete_field,
            delete_values,
        } = self.mode.merge_strategy()?
        else {
            return None;
        };

        Some(Condition::in_list(
            Value::field(alias, delete_field),
            delete_values.iter().cloned().map(Value::literal).collect(),
        ))
    }

    /// Rows without delete indicator, a null indicator counts as not deleted
    pub fn not_deleted(&self, alias: &str) -> Option<Condition> {
        let deleted = self.is_deleted(alias)?;
        let field = self.mode.merge_strategy()?.delete_field()?;

        Some(Condition::or(vec![
            Condition::not(deleted),
            Condition::is_null(Value::field(alias, field)),
        ]))
    }

    /// Row `right` of staging replaces row `left` of main: its version passes the version
    /// guard, else digests differ, or without digest any value field differs
    pub fn changed(&self, left: &str, right: &str) -> Condition {
        if let Some((field, comparator)) = self.version_guard() {
            let (main, staging) = (Value::field(left, &field), Value::field(right, &field));
            return match comparator {
                VersioningComparator::GreaterThan => Condition::gt(staging, main),
                VersioningComparator::GreaterThanEqualTo => Condition::ge(staging, main),
            };
        }
        match self.digest() {
            Some(digest) => Condition::not_eq(Value::field(left, digest), Value::field(right, digest)),
            None => Condition::not(fields_null_safe_equal(&self.value_fields(), left, right)),
        }
    }

    /// Negation of [`Self::changed`]
    pub fn unchanged(&self, left: &str, right: &str) -> Condition {
        if let Some((field, comparator)) = self.version_guard() {
            let (main, staging) = (Value::field(left, &field), Value::field(right, &field));
            return match comparator {
                VersioningComparator::GreaterThan => Condition::le(staging, main),
                VersioningComparator::GreaterThanEqualTo => Condition::lt(staging, main),
            };
        }
        match self.digest() {
            Some(digest) => Condition::eq(Value::field(left, digest), Value::field(right, digest)),
            None => fields_null_safe_equal(&self.value_fields(), left, right),
        }
    }

    pub fn keys_match(&self, left: &str, right: &str) -> Condition {
        fields_equal(&self.primary_keys(), left, right)
    }

    /// Current rows of a transaction milestoned main dataset
    pub fn open_row(&self, alias: &str) -> Option<Condition> {
        let milestoning = self.mode.transaction_milestoning()?;
        if let Some((_, batch_id_out)) = milestoning.batch_id_fields() {
            return Some(Condition::eq(
                Value::field(alias, batch_id_out),
                Value::literal(INFINITE_BATCH_ID),
            ));
        }
        let (_, date_time_out) = milestoning.date_time_fields()?;
        Some(Condition::eq(
            Value::field(alias, date_time_out),
            Value::literal(INFINITE_BATCH_TIME),
        ))
    }

    /// Rows opened by this batch
    pub fn added_in_batch(&self, alias: &str) -> Option<Condition> {
        let milestoning = self.mode.transaction_milestoning()?;
        if let Some((batch_id_in, _)) = milestoning.batch_id_fields() {
            return Some(Condition::eq(
                Value::field(alias, batch_id_in),
                Value::placeholder(Placeholder::NextBatchId),
            ));
        }
        let (date_time_in, _) = milestoning.date_time_fields()?;
        Some(Condition::eq(
            Value::field(alias, date_time_in),
            Value::placeholder(Placeholder::BatchStartTimestamp),
        ))
    }

    /// Rows closed by this batch
    pub fn closed_in_batch(&self, alias: &str) -> Option<Condition> {
        let milestoning = self.mode.transaction_milestoning()?;
        if let Some((_, batch_id_out)) = milestoning.batch_id_fields() {
            return Some(Condition::eq(
                Value::field(alias, batch_id_out),
                previous_batch_id(),
            ));
        }
        let (_, date_time_out) = milestoning.date_time_fields()?;
        Some(Condition::eq(
            Value::field(alias, date_time_out),
            Value::placeholder(Placeholder::BatchStartTimestamp),
        ))
    }

    /// Assignments closing open rows
    pub fn close_assignments(&self) -> Vec<Assignment> {
        let Some(milestoning) = self.mode.transaction_milestoning() else {
            return vec![];
        };
        let mut assignments = vec![];
        if let Some((_, batch_id_out)) = milestoning.batch_id_fields() {
            assignments.push(Assignment::new(batch_id_out, previous_batch_id()));
        }
        if let Some((_, date_time_out)) = milestoning.date_time_fields() {
            assignments.push(Assignment::new(
                date_time_out,
                Value::placeholder(Placeholder::BatchStartTimestamp),
            ));
        }
        assignments
    }

    /// Milestoning columns and values of rows opened by this batch
    pub fn open_columns(&self) -> Vec<(String, Value)> {
        let Some(milestoning) = self.mode.transaction_milestoning() else {
            return vec![];
        };
        let mut columns = vec![];
        if let Some((batch_id_in, batch_id_out)) = milestoning.batch_id_fields() {
            columns.push((
                batch_id_in.to_string(),
                Value::placeholder(Placeholder::NextBatchId),
            ));
            columns.push((batch_id_out.to_string(), Value::literal(INFINITE_BATCH_ID)));
        }
        if let Some((date_time_in, date_time_out)) = milestoning.date_time_fields() {
            columns.push((
                date_time_in.to_string(),
                Value::placeholder(Placeholder::BatchStartTimestamp),
            ));
            columns.push((date_time_out.to_string(), Value::literal(INFINITE_BATCH_TIME)));
        }
        columns
    }

    /// Audit column and its value, when the mode audits
    pub fn audit_column(&self) -> Option<(String, Value)> {
        let field = self.mode.auditing()?.date_time_field()?;
        Some((
            field.to_string(),
            Value::placeholder(Placeholder::BatchStartTimestamp),
        ))
    }

    /// Main rows within the optimization bounds of this batch
    pub fn optimization_bounds(&self, alias: &str) -> Option<Condition> {
        Condition::all(self.mode.optimization_filters().iter().map(|filter| {
            let field = Value::field(alias, &filter.field_name);
            let within = Condition::and(vec![
                Condition::ge(
                    field.clone(),
                    Value::placeholder(Placeholder::OptimizationLowerBound {
                        field: filter.field_name.clone(),
                    }),
                ),
                Condition::le(
                    field.clone(),
                    Value::placeholder(Placeholder::OptimizationUpperBound {
                        field: filter.field_name.clone(),
                    }),
                ),
            ]);
            Some(if filter.includes_null_values {
                Condition::or(vec![within, Condition::is_null(field)])
            } else {
                within
            })
        }))
    }

    /// `MIN` and `MAX` of every optimization filter field over the staging rows of this batch
    pub fn optimization_bounds_plan(&self) -> Option<LogicalPlan> {
        let filters = self.mode.optimization_filters();
        if filters.is_empty() {
            return None;
        }
        let projection = filters
            .iter()
            .flat_map(|filter| {
                let field = Value::field(STAGING_ALIAS, &filter.field_name);
                [
                    Value::min(field.clone()).alias(lower_bound_column(&filter.field_name)),
                    Value::max(field).alias(upper_bound_column(&filter.field_name)),
                ]
            })
            .collect();
        Some(LogicalPlan::of(Operation::select(
            self.staging_selection(STAGING_ALIAS).project(projection),
        )))
    }

    /// Main columns written for a new row, with their values read from `alias`
    pub fn insert_columns(&self, alias: &str) -> (Vec<String>, Vec<Value>) {
        let mut fields = self.data_fields();
        let mut values = project(&fields, alias);
        for (field, value) in self.audit_column().into_iter().chain(self.open_columns()) {
            fields.push(field);
            values.push(value);
        }
        (fields, values)
    }

    /// Main rows within the partitions of this batch; `None` when not partitioned
    pub fn partition_scope(&self, alias: &str) -> Option<Condition> {
        let partitioning = self.mode.partitioning()?;
        if !partitioning.is_partitioned() {
            return None;
        }

        if !partitioning.partition_specs.is_empty() {
            return Some(Condition::or(
                partitioning
                    .partition_specs
                    .iter()
                    .map(|spec| {
                        Condition::and(
                            spec.iter()
                                .map(|(field, value)| {
                                    Condition::eq(
                                        Value::field(alias, field),
                                        Value::literal(value.clone()),
                                    )
                                })
                                .collect(),
                        )
                    })
                    .collect(),
            ));
        }

        let partition_alias = "stage_partition";
        Some(Condition::exists(
            self.staging_selection(partition_alias)
                .project(vec![Value::All])
                .filter(fields_equal(
                    &partitioning.partition_fields,
                    alias,
                    partition_alias,
                )),
        ))
    }

    /// `SELECT COUNT(*) AS INCOMING_RECORD_COUNT` over the staging rows of this batch
    pub fn incoming_record_count(&self) -> LogicalPlan {
        count_statistic(
            StatisticName::IncomingRecordCount,
            self.staging_selection(STAGING_ALIAS),
        )
    }

    /// Statistics of transaction milestoned modes, derived from the rows this batch
    /// opened and closed
    pub fn milestoned_statistics(&self) -> Vec<(StatisticName, LogicalPlan)> {
        let (Some(added), Some(closed)) = (
            self.added_in_batch(MAIN_ALIAS),
            self.closed_in_batch(MAIN_ALIAS),
        ) else {
            return vec![];
        };

        let inner = "sink_inner";
        let updated = Selection::from_dataset(self.main())
            .project(vec![Value::count_all()])
            .filter(closed.clone())
            .filter(Condition::exists(
                Selection::from_dataset(self.main_as(inner))
                    .project(vec![Value::All])
                    .filter_opt(self.added_in_batch(inner))
                    .filter(self.keys_match(inner, MAIN_ALIAS)),
            ));
        let added_count = Selection::from_dataset(self.main())
            .project(vec![Value::count_all()])
            .filter(added);
        let closed_count = Selection::from_dataset(self.main())
            .project(vec![Value::count_all()])
            .filter(closed);

        let difference = |total: Selection, name: StatisticName| {
            LogicalPlan::of(Operation::select(Selection::values(vec![Value::subtract(
                Value::subquery(total),
                Value::subquery(updated.clone()),
            )
            .alias(name.as_str())])))
        };

        vec![
            (
                StatisticName::RowsUpdated,
                count_statistic(StatisticName::RowsUpdated, updated.clone()),
            ),
            (
                StatisticName::RowsInserted,
                difference(added_count, StatisticName::RowsInserted),
            ),
            (
                StatisticName::RowsTerminated,
                difference(closed_count, StatisticName::RowsTerminated),
            ),
            (
                StatisticName::RowsDeleted,
                LogicalPlan::of(Operation::select(Selection::values(vec![
                    Value::literal(0).alias(StatisticName::RowsDeleted.as_str()),
                ]))),
            ),
        ]
    }

    /// `DELETE` of every auxiliary dataset in `datasets`
    pub fn clear(datasets: &[Dataset]) -> LogicalPlan {
        LogicalPlan::new(
            datasets
                .iter()
                .map(|dataset| Operation::delete_all(dataset.reference.clone()))
                .collect(),
        )
    }
}

/// `{NEXT_BATCH_ID} - 1`
fn previous_batch_id() -> Value {
    Value::subtract(
        Value::placeholder(Placeholder::NextBatchId),
        Value::literal(1),
    )
}

/// Column holding the minimum of an optimization filter field in the bounds query
pub fn lower_bound_column(field: &str) -> String {
    format!("{field}_lower_bound")
}

/// Column holding the maximum of an optimization filter field in the bounds query
pub fn upper_bound_column(field: &str) -> String {
    format!("{field}_upper_bound")
}

/// `SELECT COUNT(*) AS <name>` over `selection`
pub(crate) fn count_statistic(name: StatisticName, selection: Selection) -> LogicalPlan {
    LogicalPlan::of(Operation::select(
        selection.project(vec![Value::count_all().alias(name.as_str())]),
    ))
}

pub(crate) fn project(fields: &[String], alias: &str) -> Vec<Value> {
    fields
        .iter()
        .map(|field| Value::field(alias, field))
        .collect()
}

/// `left.f = right.f` for every field
pub(crate) fn fields_equal(fields: &[String], left: &str, right: &str) -> Condition {
    Condition::and(
        fields
            .iter()
            .map(|field| Condition::eq(Value::field(left, field), Value::field(right, field)))
            .collect(),
    )
}

/// Equality of every field where two nulls are equal
pub(crate) fn fields_null_safe_equal(fields: &[String], left: &str, right: &str) -> Condition {
    Condition::and(
        fields
            .iter()
            .map(|field| null_safe_eq(Value::field(left, field), Value::field(right, field)))
            .collect(),
    )
}

pub(crate) fn null_safe_eq(left: Value, right: Value) -> Condition {
    Condition::or(vec![
        Condition::eq(left.clone(), right.clone()),
        Condition::and(vec![Condition::is_null(left), Condition::is_null(right)]),
    ])
}

pub(crate) fn filter_condition(filter: &DatasetFilter, alias: &str) -> Condition {
    let left = Value::field(alias, &filter.field_name);
    let right = Value::literal(filter.value.clone());
    match filter.filter_type {
        FilterType::Eq => Condition::eq(left, right),
        FilterType::Gt => Condition::gt(left, right),
        FilterType::Ge => Condition::ge(left, right),
        FilterType::Lt => Condition::lt(left, right),
        FilterType::Le => Condition::le(left, right),
    }
}

fn expression_condition(expression: &FilterExpression, alias: &str) -> Condition {
    match expression {
        FilterExpression::And { filters } => Condition::and(
            filters
                .iter()
                .map(|filter| expression_condition(filter, alias))
                .collect(),
        ),
        FilterExpression::Or { filters } => Condition::or(
            filters
                .iter()
                .map(|filter| expression_condition(filter, alias))
                .collect(),
        ),
        FilterExpression::Not { filter } => Condition::not(expression_condition(filter, alias)),
        FilterExpression::Filter(filter) => filter_condition(filter, alias),
    }
}
