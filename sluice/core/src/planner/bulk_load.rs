use serde::Serialize;
use sluice_schemas::{
    BulkLoad, Dataset, DatasetKind, DatasetReference, Field, SchemaDefinition, StagedFiles,
};
use std::collections::BTreeMap;

use super::context::{count_statistic, PlanningContext};
use super::{Planner, MAIN_ALIAS};
use crate::executor::Capability;
use crate::logical_plan::{
    Assignment, Condition, LogicalPlan, Operation, Placeholder, Selection, Value,
};
use crate::statistics::StatisticName;

const VALIDATION_ALIAS: &str = "validation";

/// Plans checking staged files against the constraints of main without loading them.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DryRunPlans {
    /// Creates the validation dataset
    pub pre_actions: LogicalPlan,
    /// Loads the files into the validation dataset
    pub load: LogicalPlan,
    /// Sample of rows violating a constraint, per main field
    pub validation: BTreeMap<String, LogicalPlan>,
    /// Drops the validation dataset
    pub post_cleanup: LogicalPlan,
}

/// Copies staged files into main, stamping rows with the batch id and audit time.
#[derive(Debug, Clone)]
pub struct BulkLoadPlanner {
    context: PlanningContext,
}

impl BulkLoadPlanner {
    pub fn new(context: PlanningContext) -> Self {
        Self { context }
    }

    fn staged_files(&self) -> Option<&StagedFiles> {
        match &self.context.raw_staging_dataset().kind {
            DatasetKind::StagedFiles(files) => Some(files),
            _ => None,
        }
    }

    fn batch_id_field(&self) -> Option<&str> {
        match self.context.mode() {
            sluice_schemas::IngestMode::BulkLoad(BulkLoad { batch_id_field, .. }) => {
                Some(batch_id_field)
            }
            _ => None,
        }
    }

    /// Staging columns copied from the files
    fn file_fields(&self) -> Vec<String> {
        self.context.raw_staging_dataset().schema.field_names()
    }

    /// Dataset the files are loaded into by a dry run: the file columns, all nullable
    fn validation_dataset(&self) -> Dataset {
        let main = &self.context.main_dataset().reference;
        let fields = self
            .context
            .raw_staging_dataset()
            .schema
            .fields
            .iter()
            .map(|field| Field {
                nullable: true,
                primary_key: false,
                ..field.clone()
            })
            .collect();

        let mut dataset = Dataset::new(
            format!("{}_validation", main.name),
            SchemaDefinition::new(fields),
        );
        dataset.reference.database = main.database.clone();
        dataset.reference.group = main.group.clone();
        dataset
    }

    /// Dry run plans, `None` when the sink cannot dry run or staging holds no files
    pub fn dry_run_plans(&self) -> Option<DryRunPlans> {
        if !self.context.supports(Capability::DryRun) {
            return None;
        }
        let files = self.staged_files()?;
        let dataset = self.validation_dataset();
        let reference: DatasetReference = dataset.reference.clone();
        let sample_row_count = self.context.options().sample_row_count;

        let validation = self
            .context
            .main_dataset()
            .schema
            .fields
            .iter()
            .filter(|field| !field.nullable && dataset.schema.contains(&field.name))
            .map(|field| {
                let selection =
                    Selection::from_dataset(reference.clone().with_alias(VALIDATION_ALIAS))
                        .project(vec![Value::All])
                        .filter(Condition::is_null(Value::field(
                            VALIDATION_ALIAS,
                            &field.name,
                        )))
                        .limit(sample_row_count);
                (field.name.clone(), LogicalPlan::of(Operation::select(selection)))
            })
            .collect();

        Some(DryRunPlans {
            pre_actions: LogicalPlan::of(Operation::create_if_not_exists(dataset.clone())),
            load: LogicalPlan::new(vec![
                Operation::delete_all(reference.clone()),
                Operation::Copy {
                    target: reference.clone(),
                    fields: self.file_fields(),
                    files: files.clone(),
                    derived: vec![],
                },
            ]),
            validation,
            post_cleanup: LogicalPlan::of(Operation::Drop {
                reference,
                if_exists: true,
            }),
        })
    }

    /// Rows of main loaded by this batch
    fn loaded_rows(&self) -> Option<Selection> {
        let batch_id_field = self.batch_id_field()?;
        Some(
            Selection::from_dataset(self.context.main()).filter(Condition::eq(
                Value::field(MAIN_ALIAS, batch_id_field),
                Value::placeholder(Placeholder::NextBatchId),
            )),
        )
    }
}

impl Planner for BulkLoadPlanner {
    fn context(&self) -> &PlanningContext {
        &self.context
    }

    fn ingest_plan(&self) -> LogicalPlan {
        let (Some(files), Some(batch_id_field)) = (self.staged_files(), self.batch_id_field())
        else {
            return LogicalPlan::default();
        };

        let mut derived = vec![Assignment::new(
            batch_id_field,
            Value::placeholder(Placeholder::NextBatchId),
        )];
        if let Some((field, value)) = self.context.audit_column() {
            derived.push(Assignment::new(field, value));
        }

        LogicalPlan::of(Operation::Copy {
            target: self.context.main_dataset().reference.clone(),
            fields: self.file_fields(),
            files: files.clone(),
            derived,
        })
    }

    /// Files are only read by the copy itself, so every statistic is taken from main
    fn pre_ingest_statistics(&self) -> BTreeMap<StatisticName, LogicalPlan> {
        BTreeMap::new()
    }

    fn post_ingest_statistics(&self) -> BTreeMap<StatisticName, LogicalPlan> {
        let Some(loaded) = self.loaded_rows() else {
            return BTreeMap::new();
        };
        [StatisticName::IncomingRecordCount, StatisticName::RowsInserted]
            .into_iter()
            .map(|name| (name, count_statistic(name, loaded.clone())))
            .collect()
    }

    fn auxiliary_datasets(&self) -> Vec<Dataset> {
        vec![]
    }
}
