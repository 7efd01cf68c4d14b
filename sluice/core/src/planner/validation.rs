use sluice_schemas::{DatasetKind, IngestMode, MergeStrategy, VersioningStrategy};
use std::collections::BTreeSet;

use super::context::PlanningContext;
use crate::error::ValidationError;
use crate::executor::Capability;
use crate::schema::{control_fields, managed_fields, DUPLICATE_COUNT_FIELD};

/// Checks the mode and resolved datasets of `context` before anything is planned.
pub fn validate(context: &PlanningContext) -> Result<(), ValidationError> {
    let mode = context.mode();
    let main = context.main_dataset();
    let staging = context.raw_staging_dataset();

    check_required_attributes(mode)?;

    for dataset in [main, staging] {
        if let Some(field) = dataset.schema.duplicate_field() {
            return Err(ValidationError::DuplicateField {
                dataset: dataset.name().to_string(),
                field: field.to_string(),
            });
        }
    }

    if let Some(MergeStrategy::DeleteIndicator {
        delete_field,
        delete_values,
    }) = mode.merge_strategy()
    {
        if delete_values.is_empty() {
            return Err(ValidationError::EmptyDeleteValues(delete_field.clone()));
        }
    }

    check_reserved_fields(context)?;
    check_orderable_fields(context)?;
    check_partitioning(context)?;

    let versioning = mode.versioning();
    if mode.is_snapshot() && matches!(versioning, VersioningStrategy::AllVersions { .. }) {
        return Err(ValidationError::Unsupported {
            feature: "All versions".to_string(),
            mode: mode.name().to_string(),
        });
    }

    let needs_keys = !matches!(
        mode,
        IngestMode::AppendOnly(_) | IngestMode::NontemporalSnapshot(_) | IngestMode::BulkLoad(_)
    ) || versioning.version_field().is_some()
        || versioning.fails_on_duplicate_primary_keys();
    if needs_keys && context.primary_keys().is_empty() {
        return Err(ValidationError::NoPrimaryKeys(mode.name().to_string()));
    }

    if !context.options().batch_id_per_data_split && mode.transaction_milestoning().is_some() {
        return Err(ValidationError::InvalidOption(format!(
            "batch_id_per_data_split must be enabled for {} ingest mode",
            mode.name()
        )));
    }

    if let IngestMode::BulkLoad(_) = mode {
        if !matches!(staging.kind, DatasetKind::StagedFiles(_)) {
            return Err(ValidationError::Unsupported {
                feature: "Staging datasets other than staged files".to_string(),
                mode: mode.name().to_string(),
            });
        }
        if !context.supports(Capability::BulkLoad) {
            return Err(ValidationError::UnsupportedCapability(
                Capability::BulkLoad.to_string(),
            ));
        }
    }

    Ok(())
}

fn check_required_attributes(mode: &IngestMode) -> Result<(), ValidationError> {
    let mut attributes: Vec<(&str, &str)> = vec![];
    if let Some(digest) = mode.digest_field() {
        attributes.push(("digest_field", digest));
    }
    if let Some(milestoning) = mode.transaction_milestoning() {
        attributes.extend(milestoning.attributes());
    }
    if let Some(validity) = mode.validity_milestoning() {
        attributes.push(("date_time_from", &validity.date_time_from));
        attributes.push(("date_time_thru", &validity.date_time_thru));
        attributes.push(("source_date_time_from", validity.derivation.source_from()));
        if let Some(thru) = validity.derivation.source_thru() {
            attributes.push(("source_date_time_thru", thru));
        }
    }
    if let Some(field) = mode.merge_strategy().and_then(MergeStrategy::delete_field) {
        attributes.push(("delete_field", field));
    }
    if let IngestMode::BulkLoad(bulk_load) = mode {
        attributes.push(("batch_id_field", &bulk_load.batch_id_field));
    }

    let missing: Vec<String> = attributes
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingAttributes(missing))
    }
}

/// Fields the engine writes into temp staging or main must not come from staging
fn check_reserved_fields(context: &PlanningContext) -> Result<(), ValidationError> {
    let mode = context.mode();
    let staging = context.raw_staging_dataset();
    let control = control_fields(mode);

    let mut reserved: Vec<(String, &str)> = vec![];
    if context.uses_temp_staging() {
        reserved.push((DUPLICATE_COUNT_FIELD.to_string(), "deduplication"));
    }
    if let Some(field) = mode.versioning().data_split_field() {
        reserved.push((field.to_string(), "data splits"));
    }
    reserved.extend(
        managed_fields(mode)
            .into_iter()
            .filter(|field| !control.contains(field))
            .map(|field| (field, "milestoning")),
    );

    match reserved
        .into_iter()
        .find(|(field, _)| staging.schema.contains(field))
    {
        Some((field, purpose)) => Err(ValidationError::ReservedField {
            field,
            purpose: purpose.to_string(),
        }),
        None => Ok(()),
    }
}

fn check_orderable_fields(context: &PlanningContext) -> Result<(), ValidationError> {
    let mode = context.mode();
    let staging = context.raw_staging_dataset();
    let main = context.main_dataset();

    let versioning = mode.versioning();
    let mut ordered: Vec<(&str, &str, &sluice_schemas::Dataset)> = vec![];
    if let Some(field) = versioning.version_field() {
        ordered.push((field, "version field", staging));
    }
    for filter in mode.optimization_filters() {
        ordered.push((&filter.field_name, "optimization filter", main));
    }
    let guard = context.version_guard();
    if let Some((field, _)) = &guard {
        ordered.push((field.as_str(), "version guard", main));
    }

    for (name, usage, dataset) in ordered {
        let field = dataset
            .schema
            .field(name)
            .ok_or_else(|| ValidationError::FieldNotFound(name.to_string()))?;
        if !field.field_type.data_type.is_orderable() {
            return Err(ValidationError::NotOrderable {
                field: name.to_string(),
                data_type: field.field_type.to_string(),
                usage: usage.to_string(),
            });
        }
    }
    Ok(())
}

fn check_partitioning(context: &PlanningContext) -> Result<(), ValidationError> {
    let Some(partitioning) = context.mode().partitioning() else {
        return Ok(());
    };

    for field in &partitioning.partition_fields {
        for dataset in [context.main_dataset(), context.raw_staging_dataset()] {
            if !dataset.schema.contains(field) {
                return Err(ValidationError::FieldNotFound(field.clone()));
            }
        }
    }

    let fields: BTreeSet<&String> = partitioning.partition_fields.iter().collect();
    for spec in &partitioning.partition_specs {
        let keys: BTreeSet<&String> = spec.keys().collect();
        if keys != fields {
            return Err(ValidationError::PartitionSpecMismatch {
                spec: spec.keys().cloned().collect(),
                fields: partitioning.partition_fields.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sluice_schemas::{
        AppendOnly, DataType, Dataset, Datasets, Field, IngestOptions, NontemporalSnapshot,
        Partitioning, ScalarValue, SchemaDefinition, TransactionMilestoning, UnitemporalDelta,
    };
    use std::collections::BTreeMap;

    fn schema(fields: Vec<Field>) -> SchemaDefinition {
        SchemaDefinition::new(fields)
    }

    fn context(mode: IngestMode, staging: SchemaDefinition) -> PlanningContext {
        let main = schema(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("name", DataType::Varchar),
            Field::new("digest", DataType::Varchar),
            Field::new("batch_id_in", DataType::Int).with_primary_key(),
            Field::new("batch_id_out", DataType::Int),
        ]);
        PlanningContext::new(
            mode,
            &Datasets::new(Dataset::new("main", main), Dataset::new("staging", staging)),
            IngestOptions::default(),
            BTreeSet::new(),
        )
    }

    fn unitemporal(batch_id_out: &str) -> IngestMode {
        IngestMode::UnitemporalDelta(
            UnitemporalDelta::builder()
                .digest_field("digest".to_string())
                .transaction_milestoning(TransactionMilestoning::BatchId {
                    batch_id_in: "batch_id_in".to_string(),
                    batch_id_out: batch_id_out.to_string(),
                })
                .build(),
        )
    }

    fn staging() -> SchemaDefinition {
        schema(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("name", DataType::Varchar),
            Field::new("digest", DataType::Varchar),
        ])
    }

    #[test]
    fn reports_missing_attributes() {
        let error = validate(&context(unitemporal(""), staging())).unwrap_err();
        assert_eq!(
            error.to_string(),
            "some of required attributes are not set [batch_id_out]"
        );
    }

    #[test]
    fn rejects_milestoning_fields_in_staging() {
        let mut staging = staging();
        staging
            .fields
            .push(Field::new("batch_id_out", DataType::Int));

        let error = validate(&context(unitemporal("batch_id_out"), staging)).unwrap_err();
        assert_eq!(
            error,
            ValidationError::ReservedField {
                field: "batch_id_out".to_string(),
                purpose: "milestoning".to_string()
            }
        );
    }

    #[test]
    fn requires_primary_keys_for_delta_modes() {
        let keyless = schema(vec![
            Field::new("id", DataType::Int),
            Field::new("digest", DataType::Varchar),
        ]);
        let mut main = keyless.clone();
        main.fields.push(Field::new("batch_id_in", DataType::Int).with_primary_key());
        main.fields.push(Field::new("batch_id_out", DataType::Int));
        let datasets = Datasets::new(
            Dataset::new("main", main),
            Dataset::new("staging", keyless.clone()),
        );

        let unitemporal = PlanningContext::new(
            unitemporal("batch_id_out"),
            &datasets,
            IngestOptions::default(),
            BTreeSet::new(),
        );
        assert_eq!(
            validate(&unitemporal).unwrap_err().to_string(),
            "Primary keys are required for unitemporal_delta ingest mode"
        );

        let append_only = PlanningContext::new(
            IngestMode::AppendOnly(AppendOnly::default()),
            &Datasets::new(
                Dataset::new("main", keyless.clone()),
                Dataset::new("staging", keyless),
            ),
            IngestOptions::default(),
            BTreeSet::new(),
        );
        assert!(validate(&append_only).is_ok());
    }

    #[rstest]
    #[case(vec![("region", "EU")], true)]
    #[case(vec![("country", "FR")], false)]
    fn checks_partition_specs(#[case] spec: Vec<(&str, &str)>, #[case] valid: bool) {
        let mut schema = staging();
        schema.fields.push(Field::new("region", DataType::Varchar));
        let spec: BTreeMap<String, ScalarValue> = spec
            .into_iter()
            .map(|(field, value)| (field.to_string(), ScalarValue::from(value)))
            .collect();
        let mode = IngestMode::NontemporalSnapshot(
            NontemporalSnapshot::builder()
                .partitioning(
                    Partitioning::builder()
                        .partition_fields(vec!["region".to_string()])
                        .partition_specs(vec![spec])
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

        assert_eq!(validate(&context).is_ok(), valid);
    }

    #[test]
    fn rejects_shared_batch_id_for_milestoned_modes() {
        let context = PlanningContext::new(
            unitemporal("batch_id_out"),
            &Datasets::new(
                Dataset::new(
                    "main",
                    schema(vec![
                        Field::new("id", DataType::Int).with_primary_key(),
                        Field::new("digest", DataType::Varchar),
                        Field::new("batch_id_in", DataType::Int).with_primary_key(),
                        Field::new("batch_id_out", DataType::Int),
                    ]),
                ),
                Dataset::new("staging", staging()),
            ),
            IngestOptions {
                batch_id_per_data_split: false,
                ..Default::default()
            },
            BTreeSet::new(),
        );

        assert!(matches!(
            validate(&context),
            Err(ValidationError::InvalidOption(_))
        ));
    }
}
