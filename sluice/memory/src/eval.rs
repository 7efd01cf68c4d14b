//! Evaluation of selections, conditions and values over in-memory tables.
//!
//! Conditions follow SQL three-valued logic: comparisons with `NULL` are unknown and
//! unknown rows are filtered out. Subqueries see every alias of their enclosing scopes.

use sluice_core::logical_plan::{
    ArithmeticOp, ComparisonOp, Condition, FunctionName, Selection, Source, Value,
};
use sluice_schemas::ScalarValue;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::MemoryError;
use crate::table::Table;

/// Columns of one row, in projection order
pub(crate) type Row = Vec<(String, ScalarValue)>;

type Result<T> = core::result::Result<T, MemoryError>;

/// Rows of the enclosing selections visible to an expression, innermost first
#[derive(Clone, Copy)]
pub(crate) struct Scope<'a> {
    alias: &'a str,
    row: &'a Row,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(alias: &'a str, row: &'a Row, parent: Option<&'a Scope<'a>>) -> Self {
        Self { alias, row, parent }
    }

    fn lookup(&self, dataset: Option<&str>, name: &str) -> Result<ScalarValue> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if dataset.map_or(true, |dataset| dataset == current.alias) {
                if let Some((_, value)) = current.row.iter().find(|(column, _)| column == name) {
                    return Ok(value.clone());
                }
                if dataset.is_some() {
                    return Ok(ScalarValue::Null);
                }
            }
            scope = current.parent;
        }
        match dataset {
            Some(dataset) => Err(MemoryError::UnknownAlias(dataset.to_string())),
            None => Ok(ScalarValue::Null),
        }
    }
}

/// Rows an aggregate function folds over
pub(crate) struct Group<'a> {
    alias: &'a str,
    rows: &'a [Row],
    outer: Option<&'a Scope<'a>>,
}

pub(crate) struct Evaluator<'t> {
    tables: &'t BTreeMap<String, Table>,
}

impl<'t> Evaluator<'t> {
    pub(crate) fn new(tables: &'t BTreeMap<String, Table>) -> Self {
        Self { tables }
    }

    /// Alias and rows of a selection source; no source yields a single empty row
    pub(crate) fn source_rows(
        &self,
        source: Option<&Source>,
        outer: Option<&Scope>,
    ) -> Result<(String, Vec<Row>)> {
        match source {
            None => Ok((String::new(), vec![Row::new()])),
            Some(Source::Dataset { reference }) => {
                let name = reference.qualified_name();
                let table = self
                    .tables
                    .get(&name)
                    .ok_or(MemoryError::TableNotFound(name))?;
                Ok((reference.alias_or_name().to_string(), table.scan()))
            }
            Some(Source::Selection { selection, alias }) => {
                Ok((alias.clone(), self.select(selection, outer)?))
            }
        }
    }

    pub(crate) fn select(&self, selection: &Selection, outer: Option<&Scope>) -> Result<Vec<Row>> {
        let (alias, rows) = self.source_rows(selection.source.as_ref(), outer)?;

        let mut filtered = Vec::with_capacity(rows.len());
        for row in rows {
            let keep = match &selection.condition {
                Some(condition) => {
                    self.condition(condition, Some(&Scope::new(&alias, &row, outer)))? == Some(true)
                }
                None => true,
            };
            if keep {
                filtered.push(row);
            }
        }

        let mut output = if selection.is_aggregate() {
            let empty = Row::new();
            self.groups(selection, &alias, filtered, outer)?
                .iter()
                .map(|rows| {
                    let first = rows.first().unwrap_or(&empty);
                    let group = Group {
                        alias: &alias,
                        rows,
                        outer,
                    };
                    self.project(
                        &selection.projection,
                        &Scope::new(&alias, first, outer),
                        Some(&group),
                    )
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            filtered
                .iter()
                .map(|row| self.project(&selection.projection, &Scope::new(&alias, row, outer), None))
                .collect::<Result<Vec<_>>>()?
        };

        if selection.distinct {
            let mut seen = BTreeSet::new();
            output.retain(|row| seen.insert(row.clone()));
        }
        if let Some(limit) = selection.limit {
            output.truncate(limit);
        }
        Ok(output)
    }

    /// Rows grouped by the `GROUP BY` values; without grouping all rows form one group,
    /// even when there are none
    fn groups(
        &self,
        selection: &Selection,
        alias: &str,
        rows: Vec<Row>,
        outer: Option<&Scope>,
    ) -> Result<Vec<Vec<Row>>> {
        if selection.group_by.is_empty() {
            return Ok(vec![rows]);
        }

        let mut groups: BTreeMap<Vec<ScalarValue>, Vec<Row>> = BTreeMap::new();
        for row in rows {
            let scope = Scope::new(alias, &row, outer);
            let key = selection
                .group_by
                .iter()
                .map(|value| self.value(value, Some(&scope), None))
                .collect::<Result<Vec<_>>>()?;
            groups.entry(key).or_default().push(row);
        }
        Ok(groups.into_values().collect())
    }

    fn project(&self, projection: &[Value], scope: &Scope, group: Option<&Group>) -> Result<Row> {
        let mut row = Row::with_capacity(projection.len());
        for value in projection {
            match value {
                Value::All => row.extend(scope.row.iter().cloned()),
                value => row.push((value.output_name(), self.value(value, Some(scope), group)?)),
            }
        }
        Ok(row)
    }

    pub(crate) fn value(
        &self,
        value: &Value,
        scope: Option<&Scope>,
        group: Option<&Group>,
    ) -> Result<ScalarValue> {
        match value {
            Value::Field { dataset, name } => match scope {
                Some(scope) => scope.lookup(dataset.as_deref(), name),
                None => Err(MemoryError::UnknownAlias(
                    dataset.clone().unwrap_or_else(|| name.clone()),
                )),
            },
            Value::Literal { value } => Ok(value.clone()),
            Value::Placeholder { placeholder } => {
                Err(MemoryError::UnboundPlaceholder(placeholder.token()))
            }
            Value::Function { name, args } if name.is_aggregate() => {
                self.aggregate(*name, args, group)
            }
            Value::Function { name, args } => {
                let values = args
                    .iter()
                    .map(|arg| self.value(arg, scope, group))
                    .collect::<Result<Vec<_>>>()?;
                Ok(scalar_function(*name, values))
            }
            Value::All => Err(MemoryError::Unsupported("* as a scalar value".to_string())),
            Value::Arithmetic { op, left, right } => arithmetic(
                *op,
                self.value(left, scope, group)?,
                self.value(right, scope, group)?,
            ),
            Value::Subquery { selection } => Ok(self
                .select(selection, scope)?
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .map(|(_, value)| value)
                .unwrap_or_default()),
            Value::Aliased { value, .. } => self.value(value, scope, group),
        }
    }

    fn aggregate(
        &self,
        name: FunctionName,
        args: &[Value],
        group: Option<&Group>,
    ) -> Result<ScalarValue> {
        let group = group.ok_or_else(|| {
            MemoryError::Unsupported(format!("{name:?} outside of an aggregate selection"))
        })?;
        let Some(arg) = args.first() else {
            return Ok(ScalarValue::Int(group.rows.len() as i64));
        };

        let values = group
            .rows
            .iter()
            .map(|row| self.value(arg, Some(&Scope::new(group.alias, row, group.outer)), None))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|value| !value.is_null());

        Ok(match name {
            FunctionName::Count => ScalarValue::Int(values.count() as i64),
            FunctionName::CountDistinct => {
                ScalarValue::Int(values.collect::<BTreeSet<_>>().len() as i64)
            }
            FunctionName::Max => values.max().unwrap_or_default(),
            FunctionName::Min => values.min().unwrap_or_default(),
            FunctionName::Sum => values.fold(ScalarValue::Null, |sum, value| match sum {
                ScalarValue::Null => value,
                sum => arithmetic(ArithmeticOp::Add, sum, value).unwrap_or_default(),
            }),
            other => {
                return Err(MemoryError::Unsupported(format!("{other:?} as an aggregate")))
            }
        })
    }

    pub(crate) fn condition(&self, condition: &Condition, scope: Option<&Scope>) -> Result<Option<bool>> {
        match condition {
            Condition::And { conditions } => {
                let mut result = Some(true);
                for condition in conditions {
                    match self.condition(condition, scope)? {
                        Some(false) => return Ok(Some(false)),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                Ok(result)
            }
            Condition::Or { conditions } => {
                let mut result = Some(false);
                for condition in conditions {
                    match self.condition(condition, scope)? {
                        Some(true) => return Ok(Some(true)),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                Ok(result)
            }
            Condition::Not { condition } => Ok(self.condition(condition, scope)?.map(|value| !value)),
            Condition::Comparison { op, left, right } => {
                let left = self.value(left, scope, None)?;
                let right = self.value(right, scope, None)?;
                if left.is_null() || right.is_null() {
                    return Ok(None);
                }
                Ok(Some(match op {
                    ComparisonOp::Eq => left == right,
                    ComparisonOp::NotEq => left != right,
                    ComparisonOp::Gt => left > right,
                    ComparisonOp::Ge => left >= right,
                    ComparisonOp::Lt => left < right,
                    ComparisonOp::Le => left <= right,
                }))
            }
            Condition::In { value, list } => {
                let value = self.value(value, scope, None)?;
                if value.is_null() {
                    return Ok(None);
                }
                let mut result = Some(false);
                for candidate in list {
                    let candidate = self.value(candidate, scope, None)?;
                    if candidate.is_null() {
                        result = None;
                    } else if candidate == value {
                        return Ok(Some(true));
                    }
                }
                Ok(result)
            }
            Condition::IsNull { value } => Ok(Some(self.value(value, scope, None)?.is_null())),
            Condition::Exists { selection } => Ok(Some(!self.select(selection, scope)?.is_empty())),
        }
    }
}

fn scalar_function(name: FunctionName, values: Vec<ScalarValue>) -> ScalarValue {
    let mut present = values.into_iter().filter(|value| !value.is_null());
    match name {
        FunctionName::Coalesce => present.next().unwrap_or_default(),
        FunctionName::Least => present.min().unwrap_or_default(),
        FunctionName::Greatest => present.max().unwrap_or_default(),
        FunctionName::Upper => match present.next() {
            Some(ScalarValue::String(value)) => ScalarValue::String(value.to_uppercase()),
            other => other.unwrap_or_default(),
        },
        FunctionName::Lower => match present.next() {
            Some(ScalarValue::String(value)) => ScalarValue::String(value.to_lowercase()),
            other => other.unwrap_or_default(),
        },
        FunctionName::Count
        | FunctionName::CountDistinct
        | FunctionName::Max
        | FunctionName::Min
        | FunctionName::Sum => ScalarValue::Null,
    }
}

fn arithmetic(op: ArithmeticOp, left: ScalarValue, right: ScalarValue) -> Result<ScalarValue> {
    let symbol = match op {
        ArithmeticOp::Add => "add",
        ArithmeticOp::Subtract => "subtract",
    };
    match (&left, &right) {
        (ScalarValue::Null, _) | (_, ScalarValue::Null) => Ok(ScalarValue::Null),
        (ScalarValue::Int(l), ScalarValue::Int(r)) => Ok(ScalarValue::Int(match op {
            ArithmeticOp::Add => l + r,
            ArithmeticOp::Subtract => l - r,
        })),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(l), Some(r)) => Ok(ScalarValue::Float(match op {
                ArithmeticOp::Add => l + r,
                ArithmeticOp::Subtract => l - r,
            })),
            _ => Err(MemoryError::InvalidArithmetic {
                op: symbol,
                left: left.to_string(),
                right: right.to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn row(values: &[(&str, ScalarValue)]) -> Row {
        values
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[rstest]
    #[case(ScalarValue::Int(1), ScalarValue::Int(2), ScalarValue::Int(3))]
    #[case(ScalarValue::Int(1), ScalarValue::Float(0.5), ScalarValue::Float(1.5))]
    #[case(ScalarValue::Null, ScalarValue::Int(2), ScalarValue::Null)]
    fn adds_numbers(#[case] left: ScalarValue, #[case] right: ScalarValue, #[case] sum: ScalarValue) {
        assert_eq!(arithmetic(ArithmeticOp::Add, left, right).unwrap(), sum);
    }

    #[test]
    fn comparisons_with_null_are_unknown() {
        let tables = BTreeMap::new();
        let evaluator = Evaluator::new(&tables);
        let current = row(&[("id", ScalarValue::Null)]);
        let scope = Scope::new("stage", &current, None);

        let condition = Condition::eq(Value::field("stage", "id"), Value::literal(1));
        assert_eq!(evaluator.condition(&condition, Some(&scope)).unwrap(), None);

        let negated = Condition::not(condition);
        assert_eq!(evaluator.condition(&negated, Some(&scope)).unwrap(), None);

        let is_null = Condition::is_null(Value::field("stage", "id"));
        assert_eq!(evaluator.condition(&is_null, Some(&scope)).unwrap(), Some(true));
    }

    #[test]
    fn resolves_fields_of_enclosing_scopes() {
        let tables = BTreeMap::new();
        let evaluator = Evaluator::new(&tables);
        let outer_row = row(&[("id", ScalarValue::Int(1))]);
        let inner_row = row(&[("id", ScalarValue::Int(2))]);
        let outer = Scope::new("sink", &outer_row, None);
        let inner = Scope::new("stage", &inner_row, Some(&outer));

        assert_eq!(
            evaluator
                .value(&Value::field("sink", "id"), Some(&inner), None)
                .unwrap(),
            ScalarValue::Int(1)
        );
        assert!(matches!(
            evaluator.value(&Value::field("other", "id"), Some(&inner), None),
            Err(MemoryError::UnknownAlias(_))
        ));
    }

    #[test]
    fn aggregates_over_no_rows_yield_one_row() {
        let tables = BTreeMap::new();
        let evaluator = Evaluator::new(&tables);
        let selection = Selection::from_selection(
            Selection::values(vec![Value::literal(1).alias("id")])
                .filter(Condition::eq(Value::literal(1), Value::literal(2))),
            "stage",
        )
        .project(vec![
            Value::count_all().alias("rows"),
            Value::max(Value::field("stage", "id")).alias("max_id"),
        ]);

        let rows = evaluator.select(&selection, None).unwrap();
        assert_eq!(
            rows,
            vec![row(&[
                ("rows", ScalarValue::Int(0)),
                ("max_id", ScalarValue::Null)
            ])]
        );
    }
}
