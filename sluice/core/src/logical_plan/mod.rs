//! Logical plans: ordered sequences of abstract relational operations.
//!
//! Plans are pure data. Values that are only known at execution time appear as
//! [`Placeholder`]s, and a plan has to be bound with [`LogicalPlan::bind`] before an
//! executor accepts it.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use sluice_schemas::ScalarValue;
use std::collections::BTreeSet;

mod condition;
mod operation;
mod placeholder;
mod selection;
mod value;

pub use condition::{ComparisonOp, Condition};
pub use operation::{
    AlterOperation, Assignment, MatchedAction, MergeMatched, MergeNotMatched, Operation,
};
pub use placeholder::{Placeholder, PlaceholderValues};
pub use selection::{Selection, Source};
pub use value::{ArithmeticOp, FunctionName, Value};

#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum PlanError {
    #[error("Unresolved placeholders: {0:?}")]
    #[diagnostic(
        code(sluice::plan::unresolved_placeholders),
        help("Every placeholder of a plan needs a value before it is executed")
    )]
    UnresolvedPlaceholders(BTreeSet<String>),
}

/// Ordered sequence of operations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogicalPlan {
    pub operations: Vec<Operation>,
}

impl LogicalPlan {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    pub fn of(operation: Operation) -> Self {
        Self {
            operations: vec![operation],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn extend(&mut self, plan: LogicalPlan) {
        self.operations.extend(plan.operations);
    }

    /// Tokens of every placeholder used by the plan
    pub fn placeholders(&self) -> BTreeSet<String> {
        let mut tokens = BTreeSet::new();
        let mut operations = self.operations.clone();
        for operation in operations.iter_mut() {
            operation.substitute(&mut |placeholder| {
                tokens.insert(placeholder.token());
                Some(ScalarValue::Null)
            });
        }
        tokens
    }

    /// Replaces every placeholder with its value.
    ///
    /// Fails listing the placeholders without value; nothing is bound in that case.
    pub fn bind(&self, values: &PlaceholderValues) -> Result<BoundPlan, PlanError> {
        let mut missing = BTreeSet::new();
        let mut operations = self.operations.clone();

        for operation in operations.iter_mut() {
            operation.substitute(&mut |placeholder| match values.get(placeholder) {
                Some(value) => Some(value.clone()),
                None => {
                    missing.insert(placeholder.token());
                    None
                }
            });
        }

        if !missing.is_empty() {
            return Err(PlanError::UnresolvedPlaceholders(missing));
        }

        Ok(BoundPlan {
            plan: LogicalPlan::new(operations),
            values: values.clone(),
        })
    }
}

/// A plan whose placeholders were all replaced by literals; the only plan executors run.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundPlan {
    plan: LogicalPlan,
    values: PlaceholderValues,
}

impl BoundPlan {
    pub fn operations(&self) -> &[Operation] {
        &self.plan.operations
    }

    /// Values the plan was bound with
    pub fn values(&self) -> &PlaceholderValues {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }
}

// Placeholder substitution. The resolver returns `None` for placeholders it cannot
// resolve, which are left in place.
type Resolver<'a> = dyn FnMut(&Placeholder) -> Option<ScalarValue> + 'a;

impl Operation {
    fn substitute(&mut self, resolve: &mut Resolver<'_>) {
        match self {
            Operation::Create { .. } | Operation::Drop { .. } | Operation::Alter { .. } => {}
            Operation::InsertSelect { source, .. } => source.substitute(resolve),
            Operation::UpdateWhere {
                assignments,
                condition,
                ..
            } => {
                assignments
                    .iter_mut()
                    .for_each(|assignment| assignment.value.substitute(resolve));
                if let Some(condition) = condition {
                    condition.substitute(resolve);
                }
            }
            Operation::DeleteWhere { condition, .. } => {
                if let Some(condition) = condition {
                    condition.substitute(resolve);
                }
            }
            Operation::Merge {
                source,
                on,
                when_matched,
                when_not_matched,
                ..
            } => {
                source.substitute(resolve);
                on.substitute(resolve);
                for clause in when_matched.iter_mut() {
                    if let Some(condition) = &mut clause.condition {
                        condition.substitute(resolve);
                    }
                    if let MatchedAction::Update { assignments } = &mut clause.action {
                        assignments
                            .iter_mut()
                            .for_each(|assignment| assignment.value.substitute(resolve));
                    }
                }
                if let Some(clause) = when_not_matched {
                    if let Some(condition) = &mut clause.condition {
                        condition.substitute(resolve);
                    }
                    clause
                        .values
                        .iter_mut()
                        .for_each(|value| value.substitute(resolve));
                }
            }
            Operation::Select { selection } => selection.substitute(resolve),
            Operation::Copy { derived, .. } => derived
                .iter_mut()
                .for_each(|assignment| assignment.value.substitute(resolve)),
        }
    }
}

impl Source {
    fn substitute(&mut self, resolve: &mut Resolver<'_>) {
        if let Source::Selection { selection, .. } = self {
            selection.substitute(resolve);
        }
    }
}

impl Selection {
    fn substitute(&mut self, resolve: &mut Resolver<'_>) {
        if let Some(source) = &mut self.source {
            source.substitute(resolve);
        }
        self.projection
            .iter_mut()
            .for_each(|value| value.substitute(resolve));
        if let Some(condition) = &mut self.condition {
            condition.substitute(resolve);
        }
        self.group_by
            .iter_mut()
            .for_each(|value| value.substitute(resolve));
    }
}

impl Condition {
    fn substitute(&mut self, resolve: &mut Resolver<'_>) {
        match self {
            Condition::And { conditions } | Condition::Or { conditions } => conditions
                .iter_mut()
                .for_each(|condition| condition.substitute(resolve)),
            Condition::Not { condition } => condition.substitute(resolve),
            Condition::Comparison { left, right, .. } => {
                left.substitute(resolve);
                right.substitute(resolve);
            }
            Condition::In { value, list } => {
                value.substitute(resolve);
                list.iter_mut().for_each(|value| value.substitute(resolve));
            }
            Condition::IsNull { value } => value.substitute(resolve),
            Condition::Exists { selection } => selection.substitute(resolve),
        }
    }
}

impl Value {
    fn substitute(&mut self, resolve: &mut Resolver<'_>) {
        match self {
            Value::Placeholder { placeholder } => {
                if let Some(value) = resolve(placeholder) {
                    *self = Value::Literal { value };
                }
            }
            Value::Function { args, .. } => {
                args.iter_mut().for_each(|value| value.substitute(resolve))
            }
            Value::Arithmetic { left, right, .. } => {
                left.substitute(resolve);
                right.substitute(resolve);
            }
            Value::Subquery { selection } => selection.substitute(resolve),
            Value::Aliased { value, .. } => value.substitute(resolve),
            Value::Field { .. } | Value::Literal { .. } | Value::All => {}
        }
    }
}
