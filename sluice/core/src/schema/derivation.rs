use sluice_schemas::{DataType, Dataset, Field, FieldType, IngestMode, SchemaDefinition};

use crate::error::ValidationError;

/// Main fields the engine writes itself: audit, transaction and validity milestoning,
/// and the bulk load batch id
pub fn managed_fields(mode: &IngestMode) -> Vec<String> {
    let mut fields = vec![];
    if let Some(field) = mode.auditing().and_then(|auditing| auditing.date_time_field()) {
        fields.push(field.to_string());
    }
    if let Some(milestoning) = mode.transaction_milestoning() {
        fields.extend(milestoning.attributes().into_iter().map(|(_, f)| f.to_string()));
    }
    if let Some(validity) = mode.validity_milestoning() {
        fields.push(validity.date_time_from.clone());
        fields.push(validity.date_time_thru.clone());
    }
    if let IngestMode::BulkLoad(bulk_load) = mode {
        fields.push(bulk_load.batch_id_field.clone());
    }
    fields
}

/// Staging fields steering the ingestion that are never copied to main
pub(crate) fn control_fields(mode: &IngestMode) -> Vec<String> {
    let mut fields = vec![];
    if let Some(field) = mode.merge_strategy().and_then(|strategy| strategy.delete_field()) {
        fields.push(field.to_string());
    }
    if let Some(validity) = mode.validity_milestoning() {
        fields.push(validity.derivation.source_from().to_string());
        if let Some(thru) = validity.derivation.source_thru() {
            fields.push(thru.to_string());
        }
    }
    fields
}

/// Schema of main for the given mode.
///
/// A main dataset without fields gets the staging fields, minus control fields, plus the
/// milestoning fields of the mode. A defined main schema is checked for the milestoning
/// fields and their primary key-ness.
pub fn derive_main_schema(
    main: &Dataset,
    staging: &Dataset,
    mode: &IngestMode,
) -> Result<SchemaDefinition, ValidationError> {
    check_staging_fields(staging, mode)?;

    if main.schema.is_empty() {
        return Ok(synthesize(staging, mode));
    }

    for field in managed_fields(mode) {
        if !main.schema.contains(&field) {
            return Err(ValidationError::FieldNotFound(field));
        }
    }

    let mut keys = vec![];
    if let Some(milestoning) = mode.transaction_milestoning() {
        keys.push(milestoning.key_field());
    }
    if let Some(validity) = mode.validity_milestoning() {
        keys.push(validity.date_time_from.as_str());
    }
    for key in keys {
        if main.schema.field(key).is_some_and(|field| !field.primary_key) {
            return Err(ValidationError::NotPrimaryKey(key.to_string()));
        }
    }

    Ok(main.schema.clone())
}

fn check_staging_fields(staging: &Dataset, mode: &IngestMode) -> Result<(), ValidationError> {
    let schema = &staging.schema;

    if let Some(digest) = mode.digest_field() {
        if !schema.contains(digest) {
            return Err(ValidationError::FieldNotFound(digest.to_string()));
        }
    }
    if let Some(delete_field) = mode.merge_strategy().and_then(|s| s.delete_field()) {
        if !schema.contains(delete_field) {
            return Err(ValidationError::DeleteIndicatorNotFound(delete_field.to_string()));
        }
    }
    if let Some(version_field) = mode.versioning().version_field() {
        if !schema.contains(version_field) {
            return Err(ValidationError::FieldNotFound(version_field.to_string()));
        }
    }
    if let Some(validity) = mode.validity_milestoning() {
        let source_fields = [
            Some(validity.derivation.source_from()),
            validity.derivation.source_thru(),
        ];
        for field in source_fields.into_iter().flatten() {
            if !schema.contains(field) {
                return Err(ValidationError::FieldNotFound(field.to_string()));
            }
        }
    }
    Ok(())
}

fn synthesize(staging: &Dataset, mode: &IngestMode) -> SchemaDefinition {
    let control = control_fields(mode);
    let managed = managed_fields(mode);

    let mut fields: Vec<Field> = staging
        .schema
        .fields
        .iter()
        .filter(|field| !control.contains(&field.name) && !managed.contains(&field.name))
        .cloned()
        .collect();

    let timestamp = |name: &str| Field::new(name, DataType::Timestamp);

    match mode {
        IngestMode::BulkLoad(bulk_load) => {
            fields.push(Field::new(&bulk_load.batch_id_field, DataType::Int));
        }
        _ => {
            if let Some(validity) = mode.validity_milestoning() {
                let source_type = |name: Option<&str>| {
                    name.and_then(|name| staging.schema.field(name))
                        .map(|field| field.field_type)
                        .unwrap_or_else(|| FieldType::new(DataType::Timestamp))
                };
                fields.push(
                    Field::new(
                        &validity.date_time_from,
                        source_type(Some(validity.derivation.source_from())),
                    )
                    .with_primary_key(),
                );
                fields.push(Field::new(
                    &validity.date_time_thru,
                    source_type(validity.derivation.source_thru()),
                ));
            }
            if let Some(milestoning) = mode.transaction_milestoning() {
                if let Some((batch_id_in, batch_id_out)) = milestoning.batch_id_fields() {
                    fields.push(Field::new(batch_id_in, DataType::Int).with_primary_key());
                    fields.push(Field::new(batch_id_out, DataType::Int));
                }
                if let Some((date_time_in, date_time_out)) = milestoning.date_time_fields() {
                    let date_time_in = timestamp(date_time_in);
                    if milestoning.key_field() == date_time_in.name {
                        fields.push(date_time_in.with_primary_key());
                    } else {
                        fields.push(date_time_in);
                    }
                    fields.push(timestamp(date_time_out));
                }
            }
        }
    }

    if let Some(field) = mode.auditing().and_then(|auditing| auditing.date_time_field()) {
        fields.push(timestamp(field));
    }

    SchemaDefinition {
        fields,
        ..staging.schema.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sluice_schemas::{
        BitemporalDelta, MergeStrategy, ScalarValue, TransactionMilestoning, UnitemporalDelta,
        ValidDateTime, ValidityDerivation,
    };

    fn staging() -> Dataset {
        Dataset::new(
            "staging",
            SchemaDefinition::new(vec![
                Field::new("id", DataType::Int).with_primary_key(),
                Field::new("name", DataType::Varchar),
                Field::new("digest", DataType::Varchar),
                Field::new("op", DataType::Varchar),
                Field::new("start_at", DataType::Timestamp).with_primary_key(),
            ]),
        )
    }

    fn unitemporal(milestoning: TransactionMilestoning) -> IngestMode {
        IngestMode::UnitemporalDelta(
            UnitemporalDelta::builder()
                .digest_field("digest".to_string())
                .transaction_milestoning(milestoning)
                .merge_strategy(MergeStrategy::DeleteIndicator {
                    delete_field: "op".to_string(),
                    delete_values: vec![ScalarValue::from("D")],
                })
                .build(),
        )
    }

    fn batch_id() -> TransactionMilestoning {
        TransactionMilestoning::BatchId {
            batch_id_in: "batch_id_in".to_string(),
            batch_id_out: "batch_id_out".to_string(),
        }
    }

    #[test]
    fn synthesizes_unitemporal_main() {
        let main = Dataset::new("main", SchemaDefinition::default());
        let schema = derive_main_schema(&main, &staging(), &unitemporal(batch_id())).unwrap();

        assert_eq!(
            schema.field_names(),
            vec!["id", "name", "digest", "start_at", "batch_id_in", "batch_id_out"]
        );
        assert_eq!(schema.primary_keys(), vec!["id", "start_at", "batch_id_in"]);
    }

    #[test]
    fn synthesizes_bitemporal_main() {
        let mode = IngestMode::BitemporalDelta(
            BitemporalDelta::builder()
                .digest_field("digest".to_string())
                .transaction_milestoning(batch_id())
                .validity_milestoning(ValidDateTime {
                    date_time_from: "valid_from".to_string(),
                    date_time_thru: "valid_thru".to_string(),
                    derivation: ValidityDerivation::SourceSpecifiesFromDateTime {
                        source_date_time_from: "start_at".to_string(),
                    },
                })
                .build(),
        );
        let main = Dataset::new("main", SchemaDefinition::default());
        let schema = derive_main_schema(&main, &staging(), &mode).unwrap();

        assert_eq!(
            schema.field_names(),
            vec!["id", "name", "digest", "op", "valid_from", "valid_thru", "batch_id_in", "batch_id_out"]
        );
        assert_eq!(schema.primary_keys(), vec!["id", "valid_from", "batch_id_in"]);
    }

    #[rstest]
    #[case("batch_id_in", false, ValidationError::NotPrimaryKey("batch_id_in".to_string()))]
    #[case("other", true, ValidationError::FieldNotFound("batch_id_in".to_string()))]
    fn checks_defined_main(
        #[case] name: &str,
        #[case] primary_key: bool,
        #[case] expected: ValidationError,
    ) {
        let mut batch_in = Field::new(name, DataType::Int);
        batch_in.primary_key = primary_key;
        let main = Dataset::new(
            "main",
            SchemaDefinition::new(vec![
                Field::new("id", DataType::Int).with_primary_key(),
                batch_in,
                Field::new("batch_id_out", DataType::Int),
            ]),
        );

        let error = derive_main_schema(&main, &staging(), &unitemporal(batch_id())).unwrap_err();
        assert_eq!(error, expected);
        assert_eq!(
            ValidationError::NotPrimaryKey("batch_id_in".to_string()).to_string(),
            "Field \"batch_id_in\" must be a primary key"
        );
    }

    #[test]
    fn requires_delete_indicator_in_staging() {
        let staging = Dataset::new(
            "staging",
            SchemaDefinition::new(vec![
                Field::new("id", DataType::Int).with_primary_key(),
                Field::new("digest", DataType::Varchar),
            ]),
        );
        let main = Dataset::new("main", SchemaDefinition::default());

        let error = derive_main_schema(&main, &staging, &unitemporal(batch_id())).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Delete indicator [op] not found in staging dataset"
        );
    }
}
