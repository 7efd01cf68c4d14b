//! Values read back from staging and metadata before a batch is planned or bound:
//! partition specs, optimization bounds, data split ranges and recorded staging filters.

use sluice_schemas::{DataSplitRange, DatasetFilter, OptimizationFilter, ScalarValue};
use std::collections::{BTreeMap, BTreeSet};

use crate::executor::TabularData;
use crate::logical_plan::{LogicalPlan, Operation, Placeholder, PlaceholderValues, Value};
use crate::planner::{
    lower_bound_column, upper_bound_column, BatchSourceInfo, PlanningContext, STAGING_ALIAS,
};

/// `SELECT DISTINCT` of the partition fields over the staging rows of this batch, when the
/// mode derives its partition specs from staging
pub fn partition_specs_plan(context: &PlanningContext) -> Option<LogicalPlan> {
    let partitioning = context.mode().partitioning()?;
    if !partitioning.is_partitioned()
        || !partitioning.derive_partition_specs
        || !partitioning.partition_specs.is_empty()
    {
        return None;
    }

    let projection = partitioning
        .partition_fields
        .iter()
        .map(|field| Value::field(STAGING_ALIAS, field))
        .collect();
    Some(LogicalPlan::of(Operation::select(
        context
            .staging_selection(STAGING_ALIAS)
            .project(projection)
            .distinct(),
    )))
}

/// One spec per distinct row, keeping only the partition fields
pub fn partition_specs(
    results: &[TabularData],
    fields: &[String],
) -> Vec<BTreeMap<String, ScalarValue>> {
    let specs: BTreeSet<BTreeMap<String, ScalarValue>> = results
        .iter()
        .flat_map(|result| result.rows.iter())
        .map(|row| {
            fields
                .iter()
                .map(|field| {
                    let value = row.get(field).cloned().unwrap_or_default();
                    (field.clone(), value)
                })
                .collect()
        })
        .collect();
    specs.into_iter().collect()
}

/// Placeholder values of the optimization bounds query.
///
/// Bounds of an empty staging dataset are bound as `NULL`, which no main row satisfies.
pub fn optimization_bounds(
    result: Option<&TabularData>,
    filters: &[OptimizationFilter],
) -> PlaceholderValues {
    let mut values = PlaceholderValues::new();
    for filter in filters {
        let field = filter.field_name.clone();
        let bound = |column: String| {
            result
                .and_then(|result| result.first_value(&column))
                .cloned()
                .unwrap_or_default()
        };

        values.insert(
            &Placeholder::OptimizationLowerBound {
                field: field.clone(),
            },
            bound(lower_bound_column(&field)),
        );
        values.insert(
            &Placeholder::OptimizationUpperBound {
                field: field.clone(),
            },
            bound(upper_bound_column(&field)),
        );
    }
    values
}

/// One single-split range per distinct data split of staging, ascending
pub fn data_split_ranges(result: Option<&TabularData>, field: &str) -> Vec<DataSplitRange> {
    let splits: BTreeSet<i64> = result
        .into_iter()
        .flat_map(|result| result.rows.iter())
        .filter_map(|row| row.get(field).and_then(ScalarValue::as_i64))
        .collect();
    splits
        .into_iter()
        .map(|split| DataSplitRange::new(split, split))
        .collect()
}

/// Integer in the first column of the first row
pub fn first_integer(results: &[TabularData]) -> Option<i64> {
    results
        .first()
        .and_then(|result| result.rows.first())
        .and_then(|row| row.values().next())
        .and_then(ScalarValue::as_i64)
}

/// Staging filters recorded in the `batch_source_info` column of the latest batch.
///
/// A batch without recorded filters, or no batch at all, yields no filters.
pub fn staging_filters(
    result: Option<&TabularData>,
    column: &str,
) -> Result<Vec<DatasetFilter>, serde_json::Error> {
    let Some(value) = result.and_then(|result| result.first_value(column)) else {
        return Ok(vec![]);
    };
    let info = match value {
        ScalarValue::String(json) => serde_json::from_str::<BatchSourceInfo>(json)?,
        ScalarValue::Null => BatchSourceInfo::default(),
        other => serde_json::from_value::<BatchSourceInfo>(serde_json::Value::from(other.clone()))?,
    };
    Ok(info.staging_filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_schemas::{
        DataType, Dataset, Datasets, Field, FilterType, IngestMode, IngestOptions,
        NontemporalSnapshot, Partitioning, SchemaDefinition,
    };

    fn row(values: &[(&str, ScalarValue)]) -> BTreeMap<String, ScalarValue> {
        values
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn derives_partition_specs_from_distinct_staging_rows() {
        let schema = SchemaDefinition::new(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("region", DataType::Varchar),
        ]);
        let mode = IngestMode::NontemporalSnapshot(
            NontemporalSnapshot::builder()
                .partitioning(
                    Partitioning::builder()
                        .partition_fields(vec!["region".to_string()])
                        .derive_partition_specs(true)
                        .build(),
                )
                .build(),
        );
        let context = PlanningContext::new(
            mode,
            &Datasets::new(
                Dataset::new("main", schema.clone()),
                Dataset::new("staging", schema),
            ),
            IngestOptions::default(),
            BTreeSet::new(),
        );

        assert_eq!(
            partition_specs_plan(&context).unwrap().operations[0].to_string(),
            "SELECT DISTINCT stage.region FROM staging as stage"
        );

        let result = TabularData::new(vec![
            row(&[("region", ScalarValue::from("EU"))]),
            row(&[("region", ScalarValue::from("US"))]),
            row(&[("region", ScalarValue::from("EU"))]),
        ]);
        let specs = partition_specs(&[result], &["region".to_string()]);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0]["region"], ScalarValue::from("EU"));
    }

    #[test]
    fn binds_missing_bounds_as_null() {
        let filters = vec![OptimizationFilter::new("load_date")];
        let result = TabularData::new(vec![row(&[
            ("load_date_lower_bound", ScalarValue::from("2024-01-01")),
            ("load_date_upper_bound", ScalarValue::from("2024-01-31")),
        ])]);

        let values = optimization_bounds(Some(&result), &filters);
        assert_eq!(
            values.get(&Placeholder::OptimizationUpperBound {
                field: "load_date".to_string()
            }),
            Some(&ScalarValue::from("2024-01-31"))
        );

        let values = optimization_bounds(None, &filters);
        assert!(values
            .get(&Placeholder::OptimizationLowerBound {
                field: "load_date".to_string()
            })
            .is_some_and(ScalarValue::is_null));
    }

    #[test]
    fn data_splits_are_sorted_single_split_ranges() {
        let result = TabularData::new(vec![
            row(&[("data_split", ScalarValue::Int(2))]),
            row(&[("data_split", ScalarValue::Int(1))]),
        ]);

        assert_eq!(
            data_split_ranges(Some(&result), "data_split"),
            vec![DataSplitRange::new(1, 1), DataSplitRange::new(2, 2)]
        );
    }

    #[test]
    fn reads_recorded_staging_filters() {
        let info = BatchSourceInfo {
            staging_filters: vec![DatasetFilter::new("batch", FilterType::Gt, 5)],
        };
        let result = TabularData::new(vec![row(&[(
            "batch_source_info",
            ScalarValue::from(serde_json::to_string(&info).unwrap()),
        )])]);

        let filters = staging_filters(Some(&result), "batch_source_info").unwrap();
        assert_eq!(filters, info.staging_filters);
        assert!(staging_filters(None, "batch_source_info").unwrap().is_empty());
    }
}
