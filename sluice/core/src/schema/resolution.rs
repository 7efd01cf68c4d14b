use serde::Deserialize;
use sluice_schemas::{
    DataType, Dataset, DatasetKind, DatasetReference, Datasets, DeduplicationStrategy, Field,
    IngestMode, LockInfoDataset, MetadataDataset, SchemaDefinition,
};

use crate::error::ValidationError;

/// Dataset described by a JSON external reference
#[derive(Debug, Deserialize)]
struct ExternalDataset {
    #[serde(flatten)]
    reference: DatasetReference,
    #[serde(default)]
    schema: SchemaDefinition,
}

/// Replaces every JSON external reference by the plain dataset it describes.
pub fn resolve_external_references(datasets: &Datasets) -> Result<Datasets, ValidationError> {
    let resolve_optional = |dataset: &Option<Dataset>| dataset.as_ref().map(resolve).transpose();

    Ok(Datasets {
        main: resolve(&datasets.main)?,
        staging: resolve(&datasets.staging)?,
        temp: resolve_optional(&datasets.temp)?,
        temp_with_delete_indicator: resolve_optional(&datasets.temp_with_delete_indicator)?,
        temp_staging: resolve_optional(&datasets.temp_staging)?,
        staging_without_duplicates: resolve_optional(&datasets.staging_without_duplicates)?,
        metadata: datasets.metadata.clone(),
        lock_info: datasets.lock_info.clone(),
    })
}

fn resolve(dataset: &Dataset) -> Result<Dataset, ValidationError> {
    let DatasetKind::JsonExternalReference { json } = &dataset.kind else {
        return Ok(dataset.clone());
    };

    let external: ExternalDataset =
        serde_json::from_str(json).map_err(|e| ValidationError::InvalidExternalReference {
            name: dataset.name().to_string(),
            reason: e.to_string(),
        })?;

    let mut reference = external.reference;
    if reference.alias.is_none() {
        reference.alias = dataset.reference.alias.clone();
    }

    Ok(Dataset {
        reference,
        schema: external.schema,
        kind: DatasetKind::Definition,
    })
}

/// Fills unset auxiliary datasets with their derived names; schemas are completed later
/// by [`complete_auxiliary_schemas`].
pub fn with_default_references(datasets: &Datasets) -> Datasets {
    let main = &datasets.main.reference;
    let staging = &datasets.staging.reference;
    let sibling = |of: &DatasetReference, suffix: &str| {
        let mut dataset = Dataset::new(format!("{}{suffix}", of.name), SchemaDefinition::default());
        dataset.reference.database = of.database.clone();
        dataset.reference.group = of.group.clone();
        dataset
    };

    Datasets {
        main: datasets.main.clone(),
        staging: datasets.staging.clone(),
        temp: Some(datasets.temp.clone().unwrap_or_else(|| sibling(main, "_temp"))),
        temp_with_delete_indicator: Some(
            datasets
                .temp_with_delete_indicator
                .clone()
                .unwrap_or_else(|| sibling(main, "_temp_with_delete_indicator")),
        ),
        temp_staging: Some(
            datasets
                .temp_staging
                .clone()
                .unwrap_or_else(|| sibling(staging, "_temp_staging")),
        ),
        staging_without_duplicates: Some(
            datasets
                .staging_without_duplicates
                .clone()
                .unwrap_or_else(|| sibling(staging, "_without_duplicates")),
        ),
        metadata: Some(datasets.metadata.clone().unwrap_or_else(|| {
            MetadataDataset::builder()
                .maybe_database(main.database.clone())
                .maybe_group(main.group.clone())
                .build()
        })),
        lock_info: Some(
            datasets
                .lock_info
                .clone()
                .unwrap_or_else(|| LockInfoDataset::for_main(main)),
        ),
    }
}

/// Gives the auxiliary datasets without fields the schema they are written with.
///
/// Temp datasets mirror main; temp staging mirrors staging plus the duplicate count and
/// data split columns the mode needs.
pub fn complete_auxiliary_schemas(
    datasets: Datasets,
    mode: &IngestMode,
    duplicate_count_field: &str,
) -> Datasets {
    let relaxed = |schema: &SchemaDefinition| {
        SchemaDefinition::new(
            schema
                .fields
                .iter()
                .map(|field| Field {
                    primary_key: false,
                    nullable: true,
                    ..field.clone()
                })
                .collect(),
        )
    };
    let complete = |dataset: Option<Dataset>, schema: &SchemaDefinition| {
        dataset.map(|dataset| {
            if dataset.schema.is_empty() {
                dataset.with_schema(schema.clone())
            } else {
                dataset
            }
        })
    };

    let main_schema = relaxed(&datasets.main.schema);
    let staging_schema = relaxed(&datasets.staging.schema);

    let mut temp_staging_schema = staging_schema.clone();
    if mode.deduplication() != DeduplicationStrategy::AllowDuplicates {
        temp_staging_schema
            .fields
            .push(Field::new(duplicate_count_field, DataType::Int));
    }
    if let Some(data_split_field) = mode.versioning().data_split_field() {
        temp_staging_schema
            .fields
            .push(Field::new(data_split_field, DataType::Int));
    }

    Datasets {
        temp: complete(datasets.temp, &main_schema),
        temp_with_delete_indicator: complete(datasets.temp_with_delete_indicator, &main_schema),
        temp_staging: complete(datasets.temp_staging, &temp_staging_schema),
        staging_without_duplicates: complete(datasets.staging_without_duplicates, &staging_schema),
        ..datasets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_schemas::{NontemporalSnapshot, VersioningStrategy};

    fn datasets() -> Datasets {
        let schema = SchemaDefinition::new(vec![
            Field::new("id", DataType::Int).with_primary_key(),
            Field::new("name", DataType::Varchar),
        ]);
        Datasets::new(
            Dataset::new("main", schema.clone()),
            Dataset::new("staging", schema),
        )
    }

    #[test]
    fn resolves_json_external_reference() {
        let staging = Dataset::new("placeholder", SchemaDefinition::default())
            .with_alias("stage")
            .with_kind(DatasetKind::JsonExternalReference {
                json: r#"{"database": "db", "name": "orders", "schema": {"fields": [{"name": "id", "type": "int", "primary_key": true}]}}"#
                    .to_string(),
            });
        let resolved = resolve_external_references(&datasets().with_staging(staging)).unwrap();

        assert_eq!(resolved.staging.reference.qualified_name(), "db.orders");
        assert_eq!(resolved.staging.reference.alias.as_deref(), Some("stage"));
        assert_eq!(resolved.staging.schema.primary_keys(), vec!["id"]);
        assert_eq!(resolved.staging.kind, DatasetKind::Definition);
    }

    #[test]
    fn rejects_malformed_external_reference() {
        let staging = Dataset::new("orders", SchemaDefinition::default())
            .with_kind(DatasetKind::JsonExternalReference {
                json: "{not json".to_string(),
            });
        let error = resolve_external_references(&datasets().with_staging(staging)).unwrap_err();

        assert!(matches!(error, ValidationError::InvalidExternalReference { name, .. } if name == "orders"));
    }

    #[test]
    fn derives_auxiliary_names_and_schemas() {
        let mode = IngestMode::NontemporalSnapshot(
            NontemporalSnapshot::builder()
                .deduplication(DeduplicationStrategy::FilterDuplicates)
                .versioning(VersioningStrategy::AllVersions {
                    version_field: "version".to_string(),
                    data_split_field: "data_split".to_string(),
                })
                .build(),
        );
        let datasets = complete_auxiliary_schemas(
            with_default_references(&datasets()),
            &mode,
            "ingest_duplicate_count",
        );

        let temp_staging = datasets.temp_staging.unwrap();
        assert_eq!(temp_staging.name(), "staging_temp_staging");
        assert_eq!(
            temp_staging.schema.field_names(),
            vec!["id", "name", "ingest_duplicate_count", "data_split"]
        );
        assert_eq!(datasets.temp.unwrap().name(), "main_temp");
        assert_eq!(datasets.lock_info.unwrap().name, "main_lock");
        assert_eq!(datasets.metadata.unwrap().name, "batch_metadata");
    }
}
