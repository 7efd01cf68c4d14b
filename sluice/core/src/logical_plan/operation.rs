use serde::{Deserialize, Serialize};
use sluice_schemas::{Dataset, DatasetReference, Field, StagedFiles};
use std::fmt;

use super::condition::Condition;
use super::selection::{Selection, Source};
use super::value::Value;

/// Abstract relational operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Create {
        dataset: Dataset,
        if_not_exists: bool,
    },
    Drop {
        reference: DatasetReference,
        if_exists: bool,
    },
    Alter {
        reference: DatasetReference,
        operation: AlterOperation,
        field: Field,
    },
    InsertSelect {
        target: DatasetReference,
        /// Target columns, positionally matched with the projection of `source`
        fields: Vec<String>,
        source: Selection,
    },
    UpdateWhere {
        target: DatasetReference,
        assignments: Vec<Assignment>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<Condition>,
    },
    DeleteWhere {
        target: DatasetReference,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<Condition>,
    },
    Merge {
        target: DatasetReference,
        source: Source,
        on: Condition,
        when_matched: Vec<MergeMatched>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when_not_matched: Option<MergeNotMatched>,
    },
    Select {
        selection: Selection,
    },
    /// Loads staged files, adding the derived columns to every row
    Copy {
        target: DatasetReference,
        fields: Vec<String>,
        files: StagedFiles,
        derived: Vec<Assignment>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlterOperation {
    Add,
    ChangeDatatype,
    NullableColumn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub field: String,
    pub value: Value,
}

impl Assignment {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

/// First matching clause wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeMatched {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    pub action: MatchedAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchedAction {
    Update { assignments: Vec<Assignment> },
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeNotMatched {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    pub fields: Vec<String>,
    pub values: Vec<Value>,
}

impl Operation {
    pub fn select(selection: Selection) -> Operation {
        Operation::Select { selection }
    }

    pub fn create_if_not_exists(dataset: Dataset) -> Operation {
        Operation::Create {
            dataset,
            if_not_exists: true,
        }
    }

    pub fn delete_all(target: DatasetReference) -> Operation {
        Operation::DeleteWhere {
            target,
            condition: None,
        }
    }

    /// Whether the operation changes rows or structure
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Operation::Select { .. })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create {
                dataset,
                if_not_exists,
            } => {
                let guard = if *if_not_exists { "IF NOT EXISTS " } else { "" };
                let columns = dataset
                    .schema
                    .fields
                    .iter()
                    .map(|field| {
                        let not_null = if field.nullable { "" } else { " NOT NULL" };
                        format!("{} {}{not_null}", field.name, field.field_type)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "CREATE TABLE {guard}{}({columns})",
                    dataset.reference.qualified_name()
                )
            }
            Operation::Drop {
                reference,
                if_exists,
            } => {
                let guard = if *if_exists { "IF EXISTS " } else { "" };
                write!(f, "DROP TABLE {guard}{}", reference.qualified_name())
            }
            Operation::Alter {
                reference,
                operation,
                field,
            } => {
                let table = reference.qualified_name();
                match operation {
                    AlterOperation::Add => write!(
                        f,
                        "ALTER TABLE {table} ADD COLUMN {} {}",
                        field.name, field.field_type
                    ),
                    AlterOperation::ChangeDatatype => write!(
                        f,
                        "ALTER TABLE {table} ALTER COLUMN {} SET DATA TYPE {}",
                        field.name, field.field_type
                    ),
                    AlterOperation::NullableColumn => write!(
                        f,
                        "ALTER TABLE {table} ALTER COLUMN {} DROP NOT NULL",
                        field.name
                    ),
                }
            }
            Operation::InsertSelect {
                target,
                fields,
                source,
            } => write!(
                f,
                "INSERT INTO {} ({}) ({source})",
                target.qualified_name(),
                fields.join(", ")
            ),
            Operation::UpdateWhere {
                target,
                assignments,
                condition,
            } => {
                let assignments = assignments
                    .iter()
                    .map(|assignment| format!("{} = {}", assignment.field, assignment.value))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "UPDATE {} SET {assignments}", qualified_with_alias(target))?;
                if let Some(condition) = condition {
                    write!(f, " WHERE {condition}")?;
                }
                Ok(())
            }
            Operation::DeleteWhere { target, condition } => {
                write!(f, "DELETE FROM {}", qualified_with_alias(target))?;
                if let Some(condition) = condition {
                    write!(f, " WHERE {condition}")?;
                }
                Ok(())
            }
            Operation::Merge {
                target, source, on, ..
            } => {
                let source = match source {
                    Source::Dataset { reference } => qualified_with_alias(reference),
                    Source::Selection { selection, alias } => format!("({selection}) as {alias}"),
                };
                write!(
                    f,
                    "MERGE INTO {} USING {source} ON {on}",
                    qualified_with_alias(target)
                )
            }
            Operation::Select { selection } => write!(f, "{selection}"),
            Operation::Copy {
                target, files, ..
            } => write!(
                f,
                "COPY INTO {} FROM [{}]",
                target.qualified_name(),
                files.paths.join(", ")
            ),
        }
    }
}

fn qualified_with_alias(reference: &DatasetReference) -> String {
    match &reference.alias {
        Some(alias) => format!("{} as {alias}", reference.qualified_name()),
        None => reference.qualified_name(),
    }
}
