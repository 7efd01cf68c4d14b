use serde::{Deserialize, Serialize};
use sluice_schemas::ScalarValue;
use std::fmt;

use super::placeholder::Placeholder;
use super::selection::Selection;

/// Scalar expression of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    /// Column, optionally qualified by the alias of its dataset
    Field {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dataset: Option<String>,
        name: String,
    },
    Literal {
        value: ScalarValue,
    },
    Placeholder {
        placeholder: Placeholder,
    },
    Function {
        name: FunctionName,
        args: Vec<Value>,
    },
    /// Every column of the source, `*`
    All,
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Value>,
        right: Box<Value>,
    },
    /// Scalar subquery yielding at most one row with one column
    Subquery {
        selection: Box<Selection>,
    },
    Aliased {
        value: Box<Value>,
        alias: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionName {
    /// `COUNT(*)` without arguments, `COUNT(x)` otherwise
    Count,
    CountDistinct,
    Max,
    Min,
    Sum,
    Coalesce,
    Least,
    Greatest,
    Upper,
    Lower,
}

impl FunctionName {
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            FunctionName::Count
                | FunctionName::CountDistinct
                | FunctionName::Max
                | FunctionName::Min
                | FunctionName::Sum
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Subtract,
}

impl Value {
    pub fn field(dataset: &str, name: impl Into<String>) -> Value {
        Value::Field {
            dataset: Some(dataset.to_string()),
            name: name.into(),
        }
    }

    /// Unqualified column
    pub fn column(name: impl Into<String>) -> Value {
        Value::Field {
            dataset: None,
            name: name.into(),
        }
    }

    pub fn literal(value: impl Into<ScalarValue>) -> Value {
        Value::Literal {
            value: value.into(),
        }
    }

    pub fn null() -> Value {
        Value::Literal {
            value: ScalarValue::Null,
        }
    }

    pub fn placeholder(placeholder: Placeholder) -> Value {
        Value::Placeholder { placeholder }
    }

    pub fn function(name: FunctionName, args: Vec<Value>) -> Value {
        Value::Function { name, args }
    }

    pub fn count_all() -> Value {
        Value::function(FunctionName::Count, vec![])
    }

    pub fn count_distinct(value: Value) -> Value {
        Value::function(FunctionName::CountDistinct, vec![value])
    }

    pub fn max(value: Value) -> Value {
        Value::function(FunctionName::Max, vec![value])
    }

    pub fn min(value: Value) -> Value {
        Value::function(FunctionName::Min, vec![value])
    }

    pub fn coalesce(value: Value, fallback: Value) -> Value {
        Value::function(FunctionName::Coalesce, vec![value, fallback])
    }

    pub fn upper(value: Value) -> Value {
        Value::function(FunctionName::Upper, vec![value])
    }

    pub fn add(left: Value, right: Value) -> Value {
        Value::Arithmetic {
            op: ArithmeticOp::Add,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn subtract(left: Value, right: Value) -> Value {
        Value::Arithmetic {
            op: ArithmeticOp::Subtract,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn subquery(selection: Selection) -> Value {
        Value::Subquery {
            selection: Box::new(selection),
        }
    }

    pub fn alias(self, alias: impl Into<String>) -> Value {
        Value::Aliased {
            value: Box::new(self),
            alias: alias.into(),
        }
    }

    /// Column name of the value when projected
    pub fn output_name(&self) -> String {
        match self {
            Value::Aliased { alias, .. } => alias.clone(),
            Value::Field { name, .. } => name.clone(),
            other => other.to_string(),
        }
    }

    /// Whether an aggregate function appears outside of nested subqueries
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Value::Function { name, args } => {
                name.is_aggregate() || args.iter().any(Value::contains_aggregate)
            }
            Value::Arithmetic { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Value::Aliased { value, .. } => value.contains_aggregate(),
            Value::Field { .. }
            | Value::Literal { .. }
            | Value::Placeholder { .. }
            | Value::All
            | Value::Subquery { .. } => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Field {
                dataset: Some(dataset),
                name,
            } => write!(f, "{dataset}.{name}"),
            Value::Field { dataset: None, name } => write!(f, "{name}"),
            Value::Literal {
                value: ScalarValue::String(value),
            } => write!(f, "'{}'", value.replace('\'', "''")),
            Value::Literal { value } => write!(f, "{value}"),
            Value::Placeholder { placeholder } => write!(f, "'{placeholder}'"),
            Value::Function {
                name: FunctionName::Count,
                args,
            } if args.is_empty() => write!(f, "COUNT(*)"),
            Value::Function {
                name: FunctionName::CountDistinct,
                args,
            } => write!(f, "COUNT(DISTINCT {})", join(args)),
            Value::Function { name, args } => {
                let name = match name {
                    FunctionName::Count => "COUNT",
                    FunctionName::CountDistinct => "COUNT",
                    FunctionName::Max => "MAX",
                    FunctionName::Min => "MIN",
                    FunctionName::Sum => "SUM",
                    FunctionName::Coalesce => "COALESCE",
                    FunctionName::Least => "LEAST",
                    FunctionName::Greatest => "GREATEST",
                    FunctionName::Upper => "UPPER",
                    FunctionName::Lower => "LOWER",
                };
                write!(f, "{name}({})", join(args))
            }
            Value::All => write!(f, "*"),
            Value::Arithmetic { op, left, right } => {
                let op = match op {
                    ArithmeticOp::Add => "+",
                    ArithmeticOp::Subtract => "-",
                };
                write!(f, "({left} {op} {right})")
            }
            Value::Subquery { selection } => write!(f, "({selection})"),
            Value::Aliased { value, alias } => write!(f, "{value} as {alias}"),
        }
    }
}

pub(crate) fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
