use serde::{Deserialize, Serialize};
use sluice_schemas::{DatasetFilter, DatasetKind, LockInfoDataset, MetadataDataset};

use super::context::PlanningContext;
use crate::logical_plan::{
    Assignment, Condition, LogicalPlan, Operation, Placeholder, Selection, Value,
};

/// Status recorded for every applied batch
pub const BATCH_STATUS_SUCCEEDED: &str = "SUCCEEDED";

/// Column of the next batch id query
pub const NEXT_BATCH_ID_COLUMN: &str = "next_batch_id";

const METADATA_ALIAS: &str = "batch_metadata";
const LOCK_ALIAS: &str = "lock_info";

/// Description of the staging rows a batch read, stored as JSON with the batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchSourceInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub staging_filters: Vec<DatasetFilter>,
}

impl BatchSourceInfo {
    pub fn from_staging_kind(kind: &DatasetKind) -> Self {
        match kind {
            DatasetKind::Derived { filters } => Self {
                staging_filters: filters.clone(),
            },
            _ => Self::default(),
        }
    }
}

/// Plans reading and writing the batch metadata and lock datasets of one main dataset.
///
/// Rows are matched on the upper-cased table name, so case conversion of identifiers
/// never splits the history of a table.
#[derive(Debug, Clone)]
pub struct MetadataPlanner {
    metadata: MetadataDataset,
    lock_info: LockInfoDataset,
    table_name: String,
    source_info: BatchSourceInfo,
}

impl MetadataPlanner {
    pub fn new(context: &PlanningContext) -> Self {
        Self {
            metadata: context.metadata().clone(),
            lock_info: context.lock_info().clone(),
            table_name: context.main_dataset().name().to_string(),
            source_info: BatchSourceInfo::from_staging_kind(&context.raw_staging_dataset().kind),
        }
    }

    fn field(&self, name: &str) -> Value {
        Value::field(METADATA_ALIAS, name)
    }

    fn lock_field(&self, name: &str) -> Value {
        Value::field(LOCK_ALIAS, name)
    }

    /// Metadata rows of this table
    fn of_table(&self) -> Condition {
        Condition::eq(
            Value::upper(self.field(&self.metadata.table_name_field)),
            Value::literal(self.table_name.to_uppercase()),
        )
    }

    fn lock_of_table(&self) -> Condition {
        Condition::eq(
            self.lock_field(&self.lock_info.table_name_field),
            Value::literal(self.table_name.clone()),
        )
    }

    fn metadata_rows(&self) -> Selection {
        Selection::from_dataset(self.metadata.reference()).filter(self.of_table())
    }

    /// `CREATE` of the metadata dataset
    pub fn create_plan(&self) -> LogicalPlan {
        LogicalPlan::of(Operation::create_if_not_exists(self.metadata.to_dataset()))
    }

    /// Highest batch id recorded for this table, or 0
    fn last_batch_id(&self) -> Value {
        Value::coalesce(
            Value::subquery(
                self.metadata_rows()
                    .project(vec![Value::max(self.field(&self.metadata.batch_id_field))]),
            ),
            Value::literal(0),
        )
    }

    /// `SELECT COALESCE(MAX(batch_id), 0) + 1 as next_batch_id` over the batches of this table
    pub fn next_batch_id_plan(&self) -> LogicalPlan {
        LogicalPlan::of(Operation::select(
            self.metadata_rows().project(vec![Value::add(
                Value::coalesce(
                    Value::max(self.field(&self.metadata.batch_id_field)),
                    Value::literal(0),
                ),
                Value::literal(1),
            )
            .alias(NEXT_BATCH_ID_COLUMN)]),
        ))
    }

    /// Next batch id read from the lock row, after [`Self::acquire_lock_plan`] advanced it
    pub fn next_batch_id_from_lock_plan(&self) -> LogicalPlan {
        LogicalPlan::of(Operation::select(
            Selection::from_dataset(self.lock_info.reference())
                .project(vec![self
                    .lock_field(&self.lock_info.last_batch_id_field)
                    .alias(NEXT_BATCH_ID_COLUMN)])
                .filter(self.lock_of_table()),
        ))
    }

    /// Creates the lock dataset and its row for this table when missing
    pub fn init_lock_plan(&self) -> LogicalPlan {
        let lock = &self.lock_info;
        let missing = Condition::not_exists(
            Selection::from_dataset(lock.reference())
                .project(vec![Value::All])
                .filter(self.lock_of_table()),
        );
        LogicalPlan::new(vec![
            Operation::create_if_not_exists(lock.to_dataset()),
            Operation::InsertSelect {
                target: lock.reference(),
                fields: vec![
                    lock.table_name_field.clone(),
                    lock.insert_ts_field.clone(),
                    lock.last_used_ts_field.clone(),
                ],
                source: Selection::values(vec![
                    Value::literal(self.table_name.clone()),
                    Value::placeholder(Placeholder::BatchStartTimestamp),
                    Value::placeholder(Placeholder::BatchStartTimestamp),
                ])
                .filter(missing),
            },
        ])
    }

    /// Advances the batch id of the lock row; runs inside the batch transaction so the row
    /// stays locked until commit
    pub fn acquire_lock_plan(&self) -> LogicalPlan {
        let lock = &self.lock_info;
        LogicalPlan::of(Operation::UpdateWhere {
            target: lock.reference(),
            assignments: vec![
                Assignment::new(
                    &lock.last_batch_id_field,
                    Value::add(
                        Value::coalesce(
                            self.lock_field(&lock.last_batch_id_field),
                            self.last_batch_id(),
                        ),
                        Value::literal(1),
                    ),
                ),
                Assignment::new(
                    &lock.last_used_ts_field,
                    Value::placeholder(Placeholder::BatchStartTimestamp),
                ),
            ],
            condition: Some(self.lock_of_table()),
        })
    }

    /// `INSERT` of the metadata row of the current batch
    pub fn metadata_ingest_plan(&self) -> LogicalPlan {
        let metadata = &self.metadata;
        let source_info = serde_json::to_string(&self.source_info).unwrap_or_default();

        let columns = vec![
            (&metadata.table_name_field, Value::literal(self.table_name.clone())),
            (
                &metadata.batch_id_field,
                Value::placeholder(Placeholder::NextBatchId),
            ),
            (
                &metadata.batch_start_ts_field,
                Value::placeholder(Placeholder::BatchStartTimestamp),
            ),
            (
                &metadata.batch_end_ts_field,
                Value::placeholder(Placeholder::BatchEndTimestamp),
            ),
            (
                &metadata.batch_status_field,
                Value::literal(BATCH_STATUS_SUCCEEDED),
            ),
            (
                &metadata.batch_statistics_field,
                Value::placeholder(Placeholder::BatchStatistics),
            ),
            (
                &metadata.ingest_request_id_field,
                Value::placeholder(Placeholder::IngestRequestId),
            ),
            (&metadata.batch_source_info_field, Value::literal(source_info)),
            (
                &metadata.additional_metadata_field,
                Value::placeholder(Placeholder::AdditionalMetadata),
            ),
        ];

        let (fields, values): (Vec<String>, Vec<Value>) = columns
            .into_iter()
            .map(|(field, value)| (field.clone(), value))
            .unzip();
        LogicalPlan::of(Operation::InsertSelect {
            target: metadata.reference(),
            fields,
            source: Selection::values(values),
        })
    }

    /// Batches of this table already applied for the current ingest request id
    pub fn previously_processed_plan(&self) -> LogicalPlan {
        let metadata = &self.metadata;
        LogicalPlan::of(Operation::select(
            self.metadata_rows()
                .project(vec![
                    self.field(&metadata.batch_id_field),
                    self.field(&metadata.batch_start_ts_field),
                    self.field(&metadata.batch_end_ts_field),
                    self.field(&metadata.batch_status_field),
                    self.field(&metadata.batch_statistics_field),
                ])
                .filter(Condition::eq(
                    self.field(&metadata.ingest_request_id_field),
                    Value::placeholder(Placeholder::IngestRequestId),
                )),
        ))
    }

    /// Source info of the latest batch of this table
    pub fn latest_source_info_plan(&self) -> LogicalPlan {
        let metadata = &self.metadata;
        let latest = Condition::eq(
            self.field(&metadata.batch_id_field),
            Value::subquery(
                self.metadata_rows()
                    .project(vec![Value::max(self.field(&metadata.batch_id_field))]),
            ),
        );
        LogicalPlan::of(Operation::select(
            self.metadata_rows()
                .project(vec![self.field(&metadata.batch_source_info_field)])
                .filter(latest),
        ))
    }

    pub fn metadata(&self) -> &MetadataDataset {
        &self.metadata
    }

    pub fn lock_info(&self) -> &LockInfoDataset {
        &self.lock_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_schemas::{
        DataType, Dataset, Datasets, Field, FilterType, IngestMode, IngestOptions,
        NontemporalSnapshot, SchemaDefinition,
    };
    use std::collections::BTreeSet;

    fn planner(staging_kind: DatasetKind) -> MetadataPlanner {
        let schema = SchemaDefinition::new(vec![Field::new("id", DataType::Int).with_primary_key()]);
        let context = PlanningContext::new(
            IngestMode::NontemporalSnapshot(NontemporalSnapshot::default()),
            &Datasets::new(
                Dataset::new("orders", schema.clone()),
                Dataset::new("orders_staging", schema).with_kind(staging_kind),
            ),
            IngestOptions::default(),
            BTreeSet::new(),
        );
        MetadataPlanner::new(&context)
    }

    #[test]
    fn next_batch_id_counts_batches_of_the_table() {
        assert_eq!(
            planner(DatasetKind::Definition).next_batch_id_plan().operations[0].to_string(),
            "SELECT (COALESCE(MAX(batch_metadata.batch_id), 0) + 1) as next_batch_id \
             FROM batch_metadata as batch_metadata \
             WHERE UPPER(batch_metadata.table_name) = 'ORDERS'"
        );
    }

    #[test]
    fn metadata_row_records_staging_filters() {
        let kind = DatasetKind::Derived {
            filters: vec![DatasetFilter::new("batch", FilterType::Gt, 5)],
        };
        let plan = planner(kind).metadata_ingest_plan();

        let Operation::InsertSelect { fields, source, .. } = &plan.operations[0] else {
            panic!("expected insert");
        };
        assert_eq!(fields[0], "table_name");
        assert_eq!(source.projection[4], Value::literal("SUCCEEDED"));
        let Value::Literal { value } = &source.projection[7] else {
            panic!("expected literal source info");
        };
        let info: BatchSourceInfo = serde_json::from_str(value.as_str().unwrap()).unwrap();
        assert_eq!(info.staging_filters[0].field_name, "batch");
    }

    #[test]
    fn lock_row_is_created_once_and_advanced() {
        let planner = planner(DatasetKind::Definition);
        let init = planner.init_lock_plan();

        assert_eq!(
            init.operations[1].to_string(),
            "INSERT INTO orders_lock (table_name, insert_ts, last_used_ts) \
             (SELECT 'orders', '{BATCH_START_TIMESTAMP_PLACEHOLDER}', \
             '{BATCH_START_TIMESTAMP_PLACEHOLDER}' WHERE NOT EXISTS \
             (SELECT * FROM orders_lock as lock_info WHERE lock_info.table_name = 'orders'))"
        );
        assert!(planner.acquire_lock_plan().operations[0]
            .to_string()
            .starts_with(
                "UPDATE orders_lock as lock_info SET last_batch_id = \
                 (COALESCE(lock_info.last_batch_id, COALESCE((SELECT MAX(batch_metadata.batch_id)"
            ));
    }
}
