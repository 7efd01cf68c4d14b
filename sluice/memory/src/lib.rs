//! # Sluice Memory
//!
//! An [`Executor`] keeping every dataset in memory. It runs the same bound plans a database
//! executor would, which makes it the reference for what a plan means and the backend of
//! local runs and tests.
//!
//! ```
//! use sluice_core::executor::Executor;
//! use sluice_core::logical_plan::{LogicalPlan, Operation, PlaceholderValues, Selection, Value};
//! use sluice_memory::MemoryExecutor;
//! use sluice_schemas::{DataType, Dataset, Field, ScalarValue, SchemaDefinition};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let orders = Dataset::new(
//!     "orders",
//!     SchemaDefinition::new(vec![Field::new("id", DataType::Int).with_primary_key()]),
//! );
//! let mut executor = MemoryExecutor::new();
//! executor.create_table(&orders);
//! executor
//!     .insert_rows("orders", vec![[("id", ScalarValue::Int(1))]])
//!     .unwrap();
//!
//! let plan = LogicalPlan::of(Operation::select(
//!     Selection::from_dataset(orders.reference.clone()).project(vec![Value::count_all()]),
//! ))
//! .bind(&PlaceholderValues::new())
//! .unwrap();
//! let results = executor.execute_physical_plan_and_get_results(&plan).await.unwrap();
//! assert_eq!(results[0].first_value("COUNT(*)"), Some(&ScalarValue::Int(1)));
//! # }
//! ```

use async_trait::async_trait;
use sluice_core::executor::{Executor, ExecutorError, TabularData};
use sluice_core::logical_plan::{
    AlterOperation, Assignment, BoundPlan, Condition, MatchedAction, MergeMatched,
    MergeNotMatched, Operation, Selection, Source, Value,
};
use sluice_schemas::{Dataset, DatasetReference, ScalarValue};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument, trace};

mod error;
mod eval;
mod files;
mod table;

pub use error::MemoryError;
pub use table::{StoredRow, Table};

use eval::{Evaluator, Scope};

/// Executor over in-memory tables keyed by qualified name.
///
/// [`Executor::begin`] snapshots every table, [`Executor::revert`] restores the snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryExecutor {
    tables: BTreeMap<String, Table>,
    snapshot: Option<BTreeMap<String, Table>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces the table of `dataset`
    pub fn create_table(&mut self, dataset: &Dataset) {
        let name = dataset.reference.qualified_name();
        self.tables
            .insert(name.clone(), Table::new(name, dataset.schema.fields.clone()));
    }

    /// Appends rows to an existing table, coercing values to the column types
    pub fn insert_rows<R, K>(&mut self, name: &str, rows: Vec<R>) -> Result<(), MemoryError>
    where
        R: IntoIterator<Item = (K, ScalarValue)>,
        K: Into<String>,
    {
        let table = self.table_mut(name)?;
        for row in rows {
            table.insert(row.into_iter().map(|(k, v)| (k.into(), v)).collect())?;
        }
        Ok(())
    }

    /// Removes every row of a table, keeping its columns
    pub fn truncate(&mut self, name: &str) -> Result<(), MemoryError> {
        self.table_mut(name)?.rows.clear();
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn rows(&self, name: &str) -> &[StoredRow] {
        self.tables
            .get(name)
            .map(|table| table.rows.as_slice())
            .unwrap_or_default()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, MemoryError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| MemoryError::TableNotFound(name.to_string()))
    }

    fn table_of(&self, reference: &DatasetReference) -> Result<&Table, MemoryError> {
        let name = reference.qualified_name();
        self.tables.get(&name).ok_or(MemoryError::TableNotFound(name))
    }

    /// Runs every operation of `plan`, collecting the rows of its selections
    fn run_plan(&mut self, plan: &BoundPlan) -> Result<Vec<TabularData>, MemoryError> {
        let mut results = Vec::new();
        for operation in plan.operations() {
            trace!("Executing {operation}");
            if let Some(result) = self.run(operation)? {
                results.push(result);
            }
        }
        Ok(results)
    }

    fn run(&mut self, operation: &Operation) -> Result<Option<TabularData>, MemoryError> {
        match operation {
            Operation::Create {
                dataset,
                if_not_exists,
            } => {
                let name = dataset.reference.qualified_name();
                if self.tables.contains_key(&name) {
                    if *if_not_exists {
                        return Ok(None);
                    }
                    return Err(MemoryError::TableExists(name));
                }
                self.create_table(dataset);
            }
            Operation::Drop {
                reference,
                if_exists,
            } => {
                let name = reference.qualified_name();
                if self.tables.remove(&name).is_none() && !if_exists {
                    return Err(MemoryError::TableNotFound(name));
                }
            }
            Operation::Alter {
                reference,
                operation,
                field,
            } => {
                let table = self.table_mut(&reference.qualified_name())?;
                match operation {
                    AlterOperation::Add => {
                        if table.field(&field.name).is_none() {
                            table.fields.push(field.clone());
                        }
                    }
                    AlterOperation::ChangeDatatype => table.change_type(field),
                    AlterOperation::NullableColumn => {
                        if let Some(existing) =
                            table.fields.iter_mut().find(|f| f.name == field.name)
                        {
                            existing.nullable = true;
                        }
                    }
                }
            }
            Operation::InsertSelect {
                target,
                fields,
                source,
            } => {
                let rows = self.insert_rows_of(target, fields, source)?;
                let table = self.table_mut(&target.qualified_name())?;
                debug!("Inserting {} rows into {}", rows.len(), table.name);
                for row in rows {
                    table.insert(row)?;
                }
            }
            Operation::UpdateWhere {
                target,
                assignments,
                condition,
            } => {
                let updates = self.updates_of(target, assignments, condition.as_ref())?;
                let table = self.table_mut(&target.qualified_name())?;
                debug!("Updating {} rows of {}", updates.len(), table.name);
                for (index, values) in updates {
                    let mut row = table.rows[index].clone();
                    row.extend(values);
                    table.rows[index] = table.conform(row)?;
                }
            }
            Operation::DeleteWhere { target, condition } => {
                let deleted = self.matching_rows(target, condition.as_ref())?;
                let table = self.table_mut(&target.qualified_name())?;
                debug!("Deleting {} rows of {}", deleted.len(), table.name);
                let mut index = 0;
                table.rows.retain(|_| {
                    let keep = !deleted.contains(&index);
                    index += 1;
                    keep
                });
            }
            Operation::Merge {
                target,
                source,
                on,
                when_matched,
                when_not_matched,
            } => {
                let changes = self.merge_changes(
                    target,
                    source,
                    on,
                    when_matched,
                    when_not_matched.as_ref(),
                )?;
                let table = self.table_mut(&target.qualified_name())?;
                debug!(
                    "Merging into {}: {} updated, {} deleted, {} inserted",
                    table.name,
                    changes.updates.len(),
                    changes.deletes.len(),
                    changes.inserts.len()
                );
                for (index, values) in changes.updates {
                    let mut row = table.rows[index].clone();
                    row.extend(values);
                    table.rows[index] = table.conform(row)?;
                }
                let mut index = 0;
                table.rows.retain(|_| {
                    let keep = !changes.deletes.contains(&index);
                    index += 1;
                    keep
                });
                for row in changes.inserts {
                    table.insert(row)?;
                }
            }
            Operation::Select { selection } => {
                let rows = Evaluator::new(&self.tables).select(selection, None)?;
                return Ok(Some(TabularData::new(
                    rows.into_iter().map(|row| row.into_iter().collect()).collect(),
                )));
            }
            Operation::Copy {
                target,
                fields,
                files,
                derived,
            } => {
                let evaluator = Evaluator::new(&self.tables);
                let derived = derived
                    .iter()
                    .map(|assignment| {
                        Ok((
                            assignment.field.clone(),
                            evaluator.value(&assignment.value, None, None)?,
                        ))
                    })
                    .collect::<Result<Vec<_>, MemoryError>>()?;

                let rows = files::read_staged_files(files, fields)?;
                let table = self.table_mut(&target.qualified_name())?;
                debug!("Copying {} rows into {}", rows.len(), table.name);
                for mut row in rows {
                    row.extend(derived.iter().cloned());
                    table.insert(row)?;
                }
            }
        }
        Ok(None)
    }

    /// Rows selected by `source`, keyed by the target columns
    fn insert_rows_of(
        &self,
        target: &DatasetReference,
        fields: &[String],
        source: &Selection,
    ) -> Result<Vec<StoredRow>, MemoryError> {
        let rows = Evaluator::new(&self.tables).select(source, None)?;
        let by_name = matches!(source.projection.as_slice(), [Value::All]);

        rows.into_iter()
            .map(|row| {
                if by_name {
                    let mut row: StoredRow = row.into_iter().collect();
                    return Ok(fields
                        .iter()
                        .map(|field| (field.clone(), row.remove(field).unwrap_or_default()))
                        .collect());
                }
                if row.len() != fields.len() {
                    return Err(MemoryError::ArityMismatch {
                        table: target.qualified_name(),
                        fields: fields.len(),
                        values: row.len(),
                    });
                }
                Ok(fields
                    .iter()
                    .cloned()
                    .zip(row.into_iter().map(|(_, value)| value))
                    .collect())
            })
            .collect()
    }

    /// Indexes of the target rows satisfying `condition`
    fn matching_rows(
        &self,
        target: &DatasetReference,
        condition: Option<&Condition>,
    ) -> Result<BTreeSet<usize>, MemoryError> {
        let table = self.table_of(target)?;
        let evaluator = Evaluator::new(&self.tables);
        let alias = target.alias_or_name();

        let mut matching = BTreeSet::new();
        for (index, row) in table.scan().iter().enumerate() {
            let matches = match condition {
                Some(condition) => {
                    evaluator.condition(condition, Some(&Scope::new(alias, row, None)))?
                        == Some(true)
                }
                None => true,
            };
            if matches {
                matching.insert(index);
            }
        }
        Ok(matching)
    }

    /// New values of the target rows satisfying `condition`, computed before any is written
    fn updates_of(
        &self,
        target: &DatasetReference,
        assignments: &[Assignment],
        condition: Option<&Condition>,
    ) -> Result<Vec<(usize, Vec<(String, ScalarValue)>)>, MemoryError> {
        let table = self.table_of(target)?;
        let evaluator = Evaluator::new(&self.tables);
        let alias = target.alias_or_name();
        let rows = table.scan();

        self.matching_rows(target, condition)?
            .into_iter()
            .map(|index| {
                let scope = Scope::new(alias, &rows[index], None);
                Ok((index, assign(&evaluator, assignments, &scope)?))
            })
            .collect()
    }

    fn merge_changes(
        &self,
        target: &DatasetReference,
        source: &Source,
        on: &Condition,
        when_matched: &[MergeMatched],
        when_not_matched: Option<&MergeNotMatched>,
    ) -> Result<MergeChanges, MemoryError> {
        let evaluator = Evaluator::new(&self.tables);
        let target_rows = self.table_of(target)?.scan();
        let target_alias = target.alias_or_name();
        let (source_alias, source_rows) = evaluator.source_rows(Some(source), None)?;

        let mut changes = MergeChanges::default();
        for source_row in &source_rows {
            let source_scope = Scope::new(&source_alias, source_row, None);

            let mut matched = false;
            for (index, target_row) in target_rows.iter().enumerate() {
                let scope = Scope::new(target_alias, target_row, Some(&source_scope));
                if evaluator.condition(on, Some(&scope))? != Some(true) {
                    continue;
                }
                matched = true;

                for clause in when_matched {
                    let applies = match &clause.condition {
                        Some(condition) => evaluator.condition(condition, Some(&scope))? == Some(true),
                        None => true,
                    };
                    if !applies {
                        continue;
                    }
                    match &clause.action {
                        MatchedAction::Update { assignments } => {
                            changes
                                .updates
                                .push((index, assign(&evaluator, assignments, &scope)?));
                        }
                        MatchedAction::Delete => {
                            changes.deletes.insert(index);
                        }
                    }
                    break;
                }
            }

            let Some(not_matched) = when_not_matched.filter(|_| !matched) else {
                continue;
            };
            let applies = match &not_matched.condition {
                Some(condition) => {
                    evaluator.condition(condition, Some(&source_scope))? == Some(true)
                }
                None => true,
            };
            if applies {
                let values = not_matched
                    .values
                    .iter()
                    .map(|value| evaluator.value(value, Some(&source_scope), None))
                    .collect::<Result<Vec<_>, _>>()?;
                changes
                    .inserts
                    .push(not_matched.fields.iter().cloned().zip(values).collect());
            }
        }
        Ok(changes)
    }
}

#[derive(Default)]
struct MergeChanges {
    updates: Vec<(usize, Vec<(String, ScalarValue)>)>,
    deletes: BTreeSet<usize>,
    inserts: Vec<StoredRow>,
}

fn assign(
    evaluator: &Evaluator,
    assignments: &[Assignment],
    scope: &Scope,
) -> Result<Vec<(String, ScalarValue)>, MemoryError> {
    assignments
        .iter()
        .map(|assignment| {
            Ok((
                assignment.field.clone(),
                evaluator.value(&assignment.value, Some(scope), None)?,
            ))
        })
        .collect()
}

#[async_trait]
impl Executor for MemoryExecutor {
    #[instrument(skip_all, fields(operations = plan.operations().len()), err)]
    async fn execute_physical_plan(&mut self, plan: &BoundPlan) -> Result<(), ExecutorError> {
        self.run_plan(plan)?;
        Ok(())
    }

    #[instrument(skip_all, fields(operations = plan.operations().len()), err)]
    async fn execute_physical_plan_and_get_results(
        &mut self,
        plan: &BoundPlan,
    ) -> Result<Vec<TabularData>, ExecutorError> {
        Ok(self.run_plan(plan)?)
    }

    async fn begin(&mut self) -> Result<(), ExecutorError> {
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ExecutorError> {
        self.snapshot = None;
        Ok(())
    }

    async fn revert(&mut self) -> Result<(), ExecutorError> {
        if let Some(snapshot) = self.snapshot.take() {
            debug!("Restoring {} tables", snapshot.len());
            self.tables = snapshot;
        }
        Ok(())
    }
}

/// Helper for inspecting a table by the values of one column
pub fn column<'a>(rows: &'a [StoredRow], name: &'a str) -> impl Iterator<Item = &'a ScalarValue> {
    rows.iter().filter_map(move |row| row.get(name))
}
