use sluice_schemas::{Dataset, Field, FieldType, IngestMode, SchemaEvolutionCapability};
use std::collections::BTreeSet;
use tracing::debug;

use super::derivation::{control_fields, managed_fields};
use crate::error::ValidationError;
use crate::executor::{Capability, RelationalSink};
use crate::logical_plan::{AlterOperation, Operation};

/// Alterations bringing main in line with staging, and main as it looks afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaEvolutionResult {
    pub operations: Vec<Operation>,
    pub evolved: Dataset,
}

/// Evolves the main schema to accept every staging field.
///
/// Allowed changes are the capabilities both requested and supported by the sink.
/// Fields managed by the mode and staging control fields are left alone.
pub fn evolve_schema(
    main: &Dataset,
    staging: &Dataset,
    mode: &IngestMode,
    requested: &BTreeSet<SchemaEvolutionCapability>,
    sink: &dyn RelationalSink,
) -> Result<SchemaEvolutionResult, ValidationError> {
    let allowed: BTreeSet<SchemaEvolutionCapability> = requested
        .iter()
        .copied()
        .filter(|capability| sink.supports(sink_capability(*capability)))
        .collect();
    let ignored: Vec<String> = managed_fields(mode)
        .into_iter()
        .chain(control_fields(mode))
        .collect();

    let require = |capability: SchemaEvolutionCapability, field: &str, from: &str, to: &str| {
        if allowed.contains(&capability) {
            Ok(())
        } else {
            Err(ValidationError::SchemaChangeNotAllowed {
                field: field.to_string(),
                from: from.to_string(),
                to: to.to_string(),
                capability: capability_name(capability).to_string(),
            })
        }
    };

    let mut operations = vec![];
    let mut evolved = main.clone();
    let reference = main.reference.clone();
    let mut alter = |operation: AlterOperation, field: Field| {
        operations.push(Operation::Alter {
            reference: reference.clone(),
            operation,
            field,
        })
    };

    for staging_field in staging
        .schema
        .fields
        .iter()
        .filter(|field| !ignored.contains(&field.name))
    {
        let Some(position) = evolved
            .schema
            .fields
            .iter()
            .position(|field| field.name == staging_field.name)
        else {
            if !allowed.contains(&SchemaEvolutionCapability::AddColumn) {
                return Err(ValidationError::FieldNotInMain(staging_field.name.clone()));
            }
            let added = Field {
                primary_key: false,
                nullable: true,
                ..staging_field.clone()
            };
            alter(AlterOperation::Add, added.clone());
            evolved.schema.fields.push(added);
            continue;
        };

        let main_field = evolved.schema.fields[position].clone();
        let from = main_field.field_type;
        let to = staging_field.field_type;

        if from.data_type != to.data_type {
            let target = if sink.implicit_conversions(to.data_type).contains(&from.data_type) {
                None
            } else if sink.implicit_conversions(from.data_type).contains(&to.data_type) {
                require(
                    SchemaEvolutionCapability::ImplicitDataTypeConversion,
                    &main_field.name,
                    &from.to_string(),
                    &to.to_string(),
                )?;
                Some(sized(to, from))
            } else if sink.explicit_conversions(from.data_type).contains(&to.data_type) {
                require(
                    SchemaEvolutionCapability::ExplicitDataTypeConversion,
                    &main_field.name,
                    &from.to_string(),
                    &to.to_string(),
                )?;
                Some(sized(to, from))
            } else {
                return Err(ValidationError::BreakingSchemaChange {
                    from: from.data_type.to_string(),
                    to: to.data_type.to_string(),
                });
            };

            if let Some(target) = target {
                let changed = main_field.clone().with_field_type(target);
                alter(AlterOperation::ChangeDatatype, changed.clone());
                evolved.schema.fields[position] = changed;
            }
        } else if grows(from, to) {
            require(
                SchemaEvolutionCapability::DataSizingChanges,
                &main_field.name,
                &from.to_string(),
                &to.to_string(),
            )?;
            let changed = main_field.clone().with_field_type(sized(from, to));
            alter(AlterOperation::ChangeDatatype, changed.clone());
            evolved.schema.fields[position] = changed;
        }

        let current = &evolved.schema.fields[position];
        if !current.nullable && staging_field.nullable && !current.primary_key {
            require(
                SchemaEvolutionCapability::ColumnNullabilityChange,
                &current.name,
                "not null",
                "nullable",
            )?;
            let relaxed = current.clone().with_nullable(true);
            alter(AlterOperation::NullableColumn, relaxed.clone());
            evolved.schema.fields[position] = relaxed;
        }
    }

    for position in 0..evolved.schema.fields.len() {
        let field = &evolved.schema.fields[position];
        if ignored.contains(&field.name)
            || field.nullable
            || field.primary_key
            || staging.schema.contains(&field.name)
        {
            continue;
        }
        if !allowed.contains(&SchemaEvolutionCapability::ColumnNullabilityChange) {
            return Err(ValidationError::NonNullableFieldMissing(field.name.clone()));
        }
        let relaxed = field.clone().with_nullable(true);
        alter(AlterOperation::NullableColumn, relaxed.clone());
        evolved.schema.fields[position] = relaxed;
    }

    debug!(
        "Schema evolution of {} produced {} alterations",
        main.reference.qualified_name(),
        operations.len()
    );

    Ok(SchemaEvolutionResult {
        operations,
        evolved,
    })
}

/// `target` type with the larger length and scale of both
fn sized(target: FieldType, other: FieldType) -> FieldType {
    FieldType {
        data_type: target.data_type,
        length: target.length.max(other.length),
        scale: target.scale.max(other.scale),
    }
}

fn grows(from: FieldType, to: FieldType) -> bool {
    to.length > from.length || to.scale > from.scale
}

fn sink_capability(capability: SchemaEvolutionCapability) -> Capability {
    match capability {
        SchemaEvolutionCapability::AddColumn => Capability::AddColumn,
        SchemaEvolutionCapability::ImplicitDataTypeConversion => {
            Capability::ImplicitDataTypeConversion
        }
        SchemaEvolutionCapability::ExplicitDataTypeConversion => {
            Capability::ExplicitDataTypeConversion
        }
        SchemaEvolutionCapability::DataSizingChanges => Capability::DataSizingChanges,
        SchemaEvolutionCapability::ColumnNullabilityChange => Capability::ColumnNullabilityChange,
    }
}

fn capability_name(capability: SchemaEvolutionCapability) -> &'static str {
    match capability {
        SchemaEvolutionCapability::AddColumn => "add_column",
        SchemaEvolutionCapability::ImplicitDataTypeConversion => "implicit_data_type_conversion",
        SchemaEvolutionCapability::ExplicitDataTypeConversion => "explicit_data_type_conversion",
        SchemaEvolutionCapability::DataSizingChanges => "data_sizing_changes",
        SchemaEvolutionCapability::ColumnNullabilityChange => "column_nullability_change",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::AnsiSink;
    use rstest::rstest;
    use sluice_schemas::{AppendOnly, DataType, SchemaDefinition};

    fn mode() -> IngestMode {
        IngestMode::AppendOnly(AppendOnly::default())
    }

    fn dataset(name: &str, fields: Vec<Field>) -> Dataset {
        Dataset::new(name, SchemaDefinition::new(fields))
    }

    #[test]
    fn adds_missing_columns() {
        let main = dataset("main", vec![Field::new("id", DataType::Int).with_primary_key()]);
        let staging = dataset(
            "staging",
            vec![
                Field::new("id", DataType::Int).with_primary_key(),
                Field::new("amount", FieldType::new(DataType::Decimal).with_length(10).with_scale(2)),
            ],
        );

        let result = evolve_schema(
            &main,
            &staging,
            &mode(),
            &SchemaEvolutionCapability::all(),
            &AnsiSink::default(),
        )
        .unwrap();

        assert_eq!(result.operations.len(), 1);
        assert_eq!(
            result.operations[0].to_string(),
            "ALTER TABLE main ADD COLUMN amount decimal(10,2)"
        );
        assert_eq!(result.evolved.schema.field_names(), vec!["id", "amount"]);
    }

    #[test]
    fn rejects_new_column_without_add_column() {
        let main = dataset("main", vec![Field::new("id", DataType::Int)]);
        let staging = dataset(
            "staging",
            vec![Field::new("id", DataType::Int), Field::new("name", DataType::Varchar)],
        );

        let error = evolve_schema(
            &main,
            &staging,
            &mode(),
            &BTreeSet::new(),
            &AnsiSink::default(),
        )
        .unwrap_err();

        assert_eq!(
            error.to_string(),
            "Field \"name\" in staging dataset does not exist in main dataset. Couldn't evolve main dataset's schema"
        );
    }

    #[rstest]
    #[case(DataType::Int, DataType::BigInt, Some("ALTER TABLE main ALTER COLUMN amount SET DATA TYPE bigint"))]
    #[case(DataType::BigInt, DataType::Int, None)]
    fn widens_types_implicitly(
        #[case] main_type: DataType,
        #[case] staging_type: DataType,
        #[case] expected: Option<&str>,
    ) {
        let main = dataset("main", vec![Field::new("amount", main_type)]);
        let staging = dataset("staging", vec![Field::new("amount", staging_type)]);

        let result = evolve_schema(
            &main,
            &staging,
            &mode(),
            &SchemaEvolutionCapability::all(),
            &AnsiSink::default(),
        )
        .unwrap();

        assert_eq!(
            result.operations.first().map(ToString::to_string).as_deref(),
            expected
        );
    }

    #[test]
    fn reports_breaking_change() {
        let main = dataset("main", vec![Field::new("flag", DataType::Boolean)]);
        let staging = dataset("staging", vec![Field::new("flag", DataType::Date)]);

        let error = evolve_schema(
            &main,
            &staging,
            &mode(),
            &SchemaEvolutionCapability::all(),
            &AnsiSink::default(),
        )
        .unwrap_err();

        assert_eq!(
            error.to_string(),
            "Breaking schema change from datatype \"boolean\" to \"date\""
        );
    }

    #[test]
    fn explicit_conversion_requires_sink_support() {
        let main = dataset("main", vec![Field::new("amount", DataType::Double)]);
        let staging = dataset("staging", vec![Field::new("amount", DataType::Varchar)]);

        let error = evolve_schema(
            &main,
            &staging,
            &mode(),
            &SchemaEvolutionCapability::all(),
            &AnsiSink::default(),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            ValidationError::SchemaChangeNotAllowed { ref capability, .. }
                if capability == "explicit_data_type_conversion"
        ));

        let sink = AnsiSink::default().with(Capability::ExplicitDataTypeConversion);
        let result =
            evolve_schema(&main, &staging, &mode(), &SchemaEvolutionCapability::all(), &sink)
                .unwrap();
        assert_eq!(
            result.evolved.schema.field("amount").unwrap().field_type.data_type,
            DataType::Varchar
        );
    }

    #[test]
    fn relaxes_missing_non_nullable_fields() {
        let main = dataset(
            "main",
            vec![
                Field::new("id", DataType::Int).with_primary_key(),
                Field::new("name", DataType::Varchar).with_nullable(false),
            ],
        );
        let staging = dataset("staging", vec![Field::new("id", DataType::Int).with_primary_key()]);

        let error = evolve_schema(&main, &staging, &mode(), &BTreeSet::new(), &AnsiSink::default())
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Non-nullable field \"name\" does not exist in staging dataset"
        );

        let result = evolve_schema(
            &main,
            &staging,
            &mode(),
            &SchemaEvolutionCapability::all(),
            &AnsiSink::default(),
        )
        .unwrap();
        assert_eq!(
            result.operations[0].to_string(),
            "ALTER TABLE main ALTER COLUMN name DROP NOT NULL"
        );
    }
}
