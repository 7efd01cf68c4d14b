use serde::{Deserialize, Serialize};
use std::fmt;

use super::selection::Selection;
use super::value::{join, Value};

/// Boolean expression with SQL three-valued semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    And {
        conditions: Vec<Condition>,
    },
    Or {
        conditions: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
    Comparison {
        op: ComparisonOp,
        left: Value,
        right: Value,
    },
    In {
        value: Value,
        list: Vec<Value>,
    },
    IsNull {
        value: Value,
    },
    /// Correlated when the selection references aliases of enclosing scopes
    Exists {
        selection: Box<Selection>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOp {
    fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "<>",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
        }
    }
}

impl Condition {
    fn comparison(op: ComparisonOp, left: Value, right: Value) -> Condition {
        Condition::Comparison { op, left, right }
    }

    pub fn eq(left: Value, right: Value) -> Condition {
        Self::comparison(ComparisonOp::Eq, left, right)
    }

    pub fn not_eq(left: Value, right: Value) -> Condition {
        Self::comparison(ComparisonOp::NotEq, left, right)
    }

    pub fn gt(left: Value, right: Value) -> Condition {
        Self::comparison(ComparisonOp::Gt, left, right)
    }

    pub fn ge(left: Value, right: Value) -> Condition {
        Self::comparison(ComparisonOp::Ge, left, right)
    }

    pub fn lt(left: Value, right: Value) -> Condition {
        Self::comparison(ComparisonOp::Lt, left, right)
    }

    pub fn le(left: Value, right: Value) -> Condition {
        Self::comparison(ComparisonOp::Le, left, right)
    }

    pub fn in_list(value: Value, list: Vec<Value>) -> Condition {
        Condition::In { value, list }
    }

    pub fn is_null(value: Value) -> Condition {
        Condition::IsNull { value }
    }

    pub fn is_not_null(value: Value) -> Condition {
        Condition::not(Condition::is_null(value))
    }

    pub fn exists(selection: Selection) -> Condition {
        Condition::Exists {
            selection: Box::new(selection),
        }
    }

    pub fn not_exists(selection: Selection) -> Condition {
        Condition::not(Condition::exists(selection))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(condition: Condition) -> Condition {
        Condition::Not {
            condition: Box::new(condition),
        }
    }

    /// Conjunction, collapsing a single operand
    pub fn and(conditions: Vec<Condition>) -> Condition {
        let mut conditions = conditions;
        if conditions.len() == 1 {
            if let Some(condition) = conditions.pop() {
                return condition;
            }
        }
        Condition::And { conditions }
    }

    /// Disjunction, collapsing a single operand
    pub fn or(conditions: Vec<Condition>) -> Condition {
        let mut conditions = conditions;
        if conditions.len() == 1 {
            if let Some(condition) = conditions.pop() {
                return condition;
            }
        }
        Condition::Or { conditions }
    }

    /// Conjunction of the present conditions, `None` when there are none
    pub fn all(conditions: impl IntoIterator<Item = Option<Condition>>) -> Option<Condition> {
        let conditions: Vec<Condition> = conditions.into_iter().flatten().collect();
        if conditions.is_empty() {
            None
        } else {
            Some(Condition::and(conditions))
        }
    }

    /// Conjunction with `other`, flattening nested conjunctions
    pub fn and_also(self, other: Condition) -> Condition {
        let mut conditions = match self {
            Condition::And { conditions } => conditions,
            condition => vec![condition],
        };
        match other {
            Condition::And {
                conditions: others,
            } => conditions.extend(others),
            other => conditions.push(other),
        }
        Condition::and(conditions)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::And { conditions } if conditions.is_empty() => write!(f, "TRUE"),
            Condition::Or { conditions } if conditions.is_empty() => write!(f, "FALSE"),
            Condition::And { conditions } => write!(f, "({})", join_with(conditions, " AND ")),
            Condition::Or { conditions } => write!(f, "({})", join_with(conditions, " OR ")),
            Condition::Not { condition } => write!(f, "NOT {condition}"),
            Condition::Comparison { op, left, right } => {
                write!(f, "{left} {} {right}", op.symbol())
            }
            Condition::In { value, list } => write!(f, "{value} IN ({})", join(list)),
            Condition::IsNull { value } => write!(f, "{value} IS NULL"),
            Condition::Exists { selection } => write!(f, "EXISTS ({selection})"),
        }
    }
}

fn join_with(conditions: &[Condition], separator: &str) -> String {
    conditions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}
