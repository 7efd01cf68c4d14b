//! Identifier case conversion of datasets and ingest modes.
//!
//! Dataset, field and milestoning names are converted; aliases, literal values and
//! delete indicator values are left untouched.

use sluice_schemas::{
    AppendOnly, Auditing, BitemporalDelta, BitemporalSnapshot, BulkLoad, CaseConversion,
    Dataset, DatasetFilter, DatasetKind, DatasetReference, Datasets, FilterExpression,
    IngestMode, LockInfoDataset, MergeStrategy, MetadataDataset, NontemporalDelta,
    NontemporalSnapshot, OptimizationFilter, Partitioning, SchemaDefinition,
    TransactionMilestoning, UnitemporalDelta, UnitemporalSnapshot, ValidDateTime,
    ValidityDerivation, VersioningStrategy,
};

use crate::executor::CaseFolding;

/// Conversion applied when the options ask for none: the case the sink folds to
pub fn effective_conversion(requested: CaseConversion, folding: CaseFolding) -> CaseConversion {
    match (requested, folding) {
        (CaseConversion::None, CaseFolding::Upper) => CaseConversion::ToUpper,
        (CaseConversion::None, CaseFolding::Lower) => CaseConversion::ToLower,
        (requested, _) => requested,
    }
}

pub fn convert_datasets(datasets: &Datasets, case: CaseConversion) -> Datasets {
    if case == CaseConversion::None {
        return datasets.clone();
    }

    Datasets {
        main: convert_dataset(&datasets.main, case),
        staging: convert_dataset(&datasets.staging, case),
        temp: datasets.temp.as_ref().map(|d| convert_dataset(d, case)),
        temp_with_delete_indicator: datasets
            .temp_with_delete_indicator
            .as_ref()
            .map(|d| convert_dataset(d, case)),
        temp_staging: datasets
            .temp_staging
            .as_ref()
            .map(|d| convert_dataset(d, case)),
        staging_without_duplicates: datasets
            .staging_without_duplicates
            .as_ref()
            .map(|d| convert_dataset(d, case)),
        metadata: datasets.metadata.as_ref().map(|m| convert_metadata(m, case)),
        lock_info: datasets.lock_info.as_ref().map(|l| convert_lock_info(l, case)),
    }
}

pub fn convert_dataset(dataset: &Dataset, case: CaseConversion) -> Dataset {
    let kind = match &dataset.kind {
        DatasetKind::Derived { filters } => DatasetKind::Derived {
            filters: filters.iter().map(|f| convert_filter(f, case)).collect(),
        },
        DatasetKind::Filtered { filter } => DatasetKind::Filtered {
            filter: convert_filter_expression(filter, case),
        },
        other => other.clone(),
    };

    Dataset {
        reference: convert_reference(&dataset.reference, case),
        schema: convert_schema(&dataset.schema, case),
        kind,
    }
}

fn convert_reference(reference: &DatasetReference, case: CaseConversion) -> DatasetReference {
    DatasetReference {
        database: reference.database.as_deref().map(|d| case.apply(d)),
        group: reference.group.as_deref().map(|g| case.apply(g)),
        name: case.apply(&reference.name),
        alias: reference.alias.clone(),
    }
}

fn convert_schema(schema: &SchemaDefinition, case: CaseConversion) -> SchemaDefinition {
    let names = |fields: &[String]| fields.iter().map(|f| case.apply(f)).collect::<Vec<_>>();

    let mut converted = schema.clone();
    for field in converted.fields.iter_mut() {
        field.name = case.apply(&field.name);
    }
    for index in converted.indexes.iter_mut() {
        index.index_name = case.apply(&index.index_name);
        index.fields = names(&index.fields);
    }
    if let Some(shard) = converted.shard_specification.as_mut() {
        shard.fields = names(&shard.fields);
    }
    if let Some(column_store) = converted.column_store_specification.as_mut() {
        column_store.fields = names(&column_store.fields);
    }
    converted
}

fn convert_filter(filter: &DatasetFilter, case: CaseConversion) -> DatasetFilter {
    DatasetFilter {
        field_name: case.apply(&filter.field_name),
        ..filter.clone()
    }
}

fn convert_filter_expression(filter: &FilterExpression, case: CaseConversion) -> FilterExpression {
    match filter {
        FilterExpression::And { filters } => FilterExpression::And {
            filters: filters
                .iter()
                .map(|f| convert_filter_expression(f, case))
                .collect(),
        },
        FilterExpression::Or { filters } => FilterExpression::Or {
            filters: filters
                .iter()
                .map(|f| convert_filter_expression(f, case))
                .collect(),
        },
        FilterExpression::Not { filter } => FilterExpression::Not {
            filter: Box::new(convert_filter_expression(filter, case)),
        },
        FilterExpression::Filter(filter) => FilterExpression::Filter(convert_filter(filter, case)),
    }
}

fn convert_metadata(metadata: &MetadataDataset, case: CaseConversion) -> MetadataDataset {
    MetadataDataset {
        database: metadata.database.as_deref().map(|d| case.apply(d)),
        group: metadata.group.as_deref().map(|g| case.apply(g)),
        name: case.apply(&metadata.name),
        table_name_field: case.apply(&metadata.table_name_field),
        batch_id_field: case.apply(&metadata.batch_id_field),
        batch_start_ts_field: case.apply(&metadata.batch_start_ts_field),
        batch_end_ts_field: case.apply(&metadata.batch_end_ts_field),
        batch_status_field: case.apply(&metadata.batch_status_field),
        batch_statistics_field: case.apply(&metadata.batch_statistics_field),
        ingest_request_id_field: case.apply(&metadata.ingest_request_id_field),
        batch_source_info_field: case.apply(&metadata.batch_source_info_field),
        additional_metadata_field: case.apply(&metadata.additional_metadata_field),
    }
}

fn convert_lock_info(lock_info: &LockInfoDataset, case: CaseConversion) -> LockInfoDataset {
    LockInfoDataset {
        database: lock_info.database.as_deref().map(|d| case.apply(d)),
        group: lock_info.group.as_deref().map(|g| case.apply(g)),
        name: case.apply(&lock_info.name),
        table_name_field: case.apply(&lock_info.table_name_field),
        last_batch_id_field: case.apply(&lock_info.last_batch_id_field),
        insert_ts_field: case.apply(&lock_info.insert_ts_field),
        last_used_ts_field: case.apply(&lock_info.last_used_ts_field),
    }
}

pub fn convert_mode(mode: &IngestMode, case: CaseConversion) -> IngestMode {
    if case == CaseConversion::None {
        return mode.clone();
    }
    let c = |name: &str| case.apply(name);

    match mode {
        IngestMode::AppendOnly(m) => IngestMode::AppendOnly(AppendOnly {
            digest_field: m.digest_field.as_deref().map(c),
            auditing: convert_auditing(&m.auditing, case),
            deduplication: m.deduplication,
            versioning: convert_versioning(&m.versioning, case),
            filter_existing_records: m.filter_existing_records,
        }),
        IngestMode::NontemporalSnapshot(m) => IngestMode::NontemporalSnapshot(NontemporalSnapshot {
            auditing: convert_auditing(&m.auditing, case),
            partitioning: convert_partitioning(&m.partitioning, case),
            empty_dataset_handling: m.empty_dataset_handling,
            deduplication: m.deduplication,
            versioning: convert_versioning(&m.versioning, case),
        }),
        IngestMode::NontemporalDelta(m) => IngestMode::NontemporalDelta(NontemporalDelta {
            digest_field: m.digest_field.as_deref().map(c),
            auditing: convert_auditing(&m.auditing, case),
            merge_strategy: convert_merge_strategy(&m.merge_strategy, case),
            deduplication: m.deduplication,
            versioning: convert_versioning(&m.versioning, case),
        }),
        IngestMode::UnitemporalSnapshot(m) => IngestMode::UnitemporalSnapshot(UnitemporalSnapshot {
            digest_field: c(&m.digest_field),
            transaction_milestoning: convert_transaction(&m.transaction_milestoning, case),
            partitioning: convert_partitioning(&m.partitioning, case),
            empty_dataset_handling: m.empty_dataset_handling,
            deduplication: m.deduplication,
            versioning: convert_versioning(&m.versioning, case),
        }),
        IngestMode::UnitemporalDelta(m) => IngestMode::UnitemporalDelta(UnitemporalDelta {
            digest_field: c(&m.digest_field),
            transaction_milestoning: convert_transaction(&m.transaction_milestoning, case),
            merge_strategy: convert_merge_strategy(&m.merge_strategy, case),
            deduplication: m.deduplication,
            versioning: convert_versioning(&m.versioning, case),
            optimization_filters: m
                .optimization_filters
                .iter()
                .map(|f| OptimizationFilter {
                    field_name: c(&f.field_name),
                    includes_null_values: f.includes_null_values,
                })
                .collect(),
        }),
        IngestMode::BitemporalSnapshot(m) => IngestMode::BitemporalSnapshot(BitemporalSnapshot {
            digest_field: c(&m.digest_field),
            transaction_milestoning: convert_transaction(&m.transaction_milestoning, case),
            validity_milestoning: convert_validity(&m.validity_milestoning, case),
            partitioning: convert_partitioning(&m.partitioning, case),
            empty_dataset_handling: m.empty_dataset_handling,
            deduplication: m.deduplication,
            versioning: convert_versioning(&m.versioning, case),
        }),
        IngestMode::BitemporalDelta(m) => IngestMode::BitemporalDelta(BitemporalDelta {
            digest_field: c(&m.digest_field),
            transaction_milestoning: convert_transaction(&m.transaction_milestoning, case),
            validity_milestoning: convert_validity(&m.validity_milestoning, case),
            merge_strategy: convert_merge_strategy(&m.merge_strategy, case),
            deduplication: m.deduplication,
            versioning: convert_versioning(&m.versioning, case),
        }),
        IngestMode::BulkLoad(m) => IngestMode::BulkLoad(BulkLoad {
            batch_id_field: c(&m.batch_id_field),
            auditing: convert_auditing(&m.auditing, case),
        }),
    }
}

fn convert_auditing(auditing: &Auditing, case: CaseConversion) -> Auditing {
    match auditing {
        Auditing::NoAuditing => Auditing::NoAuditing,
        Auditing::DateTimeAuditing { date_time_field } => Auditing::DateTimeAuditing {
            date_time_field: case.apply(date_time_field),
        },
    }
}

fn convert_transaction(
    milestoning: &TransactionMilestoning,
    case: CaseConversion,
) -> TransactionMilestoning {
    match milestoning {
        TransactionMilestoning::BatchId {
            batch_id_in,
            batch_id_out,
        } => TransactionMilestoning::BatchId {
            batch_id_in: case.apply(batch_id_in),
            batch_id_out: case.apply(batch_id_out),
        },
        TransactionMilestoning::TransactionDateTime {
            date_time_in,
            date_time_out,
        } => TransactionMilestoning::TransactionDateTime {
            date_time_in: case.apply(date_time_in),
            date_time_out: case.apply(date_time_out),
        },
        TransactionMilestoning::BatchIdAndDateTime {
            batch_id_in,
            batch_id_out,
            date_time_in,
            date_time_out,
        } => TransactionMilestoning::BatchIdAndDateTime {
            batch_id_in: case.apply(batch_id_in),
            batch_id_out: case.apply(batch_id_out),
            date_time_in: case.apply(date_time_in),
            date_time_out: case.apply(date_time_out),
        },
    }
}

fn convert_validity(validity: &ValidDateTime, case: CaseConversion) -> ValidDateTime {
    let derivation = match &validity.derivation {
        ValidityDerivation::SourceSpecifiesFromDateTime {
            source_date_time_from,
        } => ValidityDerivation::SourceSpecifiesFromDateTime {
            source_date_time_from: case.apply(source_date_time_from),
        },
        ValidityDerivation::SourceSpecifiesFromAndThruDateTime {
            source_date_time_from,
            source_date_time_thru,
        } => ValidityDerivation::SourceSpecifiesFromAndThruDateTime {
            source_date_time_from: case.apply(source_date_time_from),
            source_date_time_thru: case.apply(source_date_time_thru),
        },
    };

    ValidDateTime {
        date_time_from: case.apply(&validity.date_time_from),
        date_time_thru: case.apply(&validity.date_time_thru),
        derivation,
    }
}

fn convert_merge_strategy(strategy: &MergeStrategy, case: CaseConversion) -> MergeStrategy {
    match strategy {
        MergeStrategy::NoDeletes => MergeStrategy::NoDeletes,
        MergeStrategy::DeleteIndicator {
            delete_field,
            delete_values,
        } => MergeStrategy::DeleteIndicator {
            delete_field: case.apply(delete_field),
            delete_values: delete_values.clone(),
        },
    }
}

fn convert_versioning(versioning: &VersioningStrategy, case: CaseConversion) -> VersioningStrategy {
    match versioning {
        VersioningStrategy::NoVersioning { .. } => versioning.clone(),
        VersioningStrategy::MaxVersion {
            version_field,
            versioning_comparator,
            perform_deduplication,
        } => VersioningStrategy::MaxVersion {
            version_field: case.apply(version_field),
            versioning_comparator: *versioning_comparator,
            perform_deduplication: *perform_deduplication,
        },
        VersioningStrategy::AllVersions {
            version_field,
            data_split_field,
        } => VersioningStrategy::AllVersions {
            version_field: case.apply(version_field),
            data_split_field: case.apply(data_split_field),
        },
    }
}

fn convert_partitioning(partitioning: &Partitioning, case: CaseConversion) -> Partitioning {
    Partitioning {
        partition_fields: partitioning
            .partition_fields
            .iter()
            .map(|f| case.apply(f))
            .collect(),
        partition_specs: partitioning
            .partition_specs
            .iter()
            .map(|spec| {
                spec.iter()
                    .map(|(field, value)| (case.apply(field), value.clone()))
                    .collect()
            })
            .collect(),
        derive_partition_specs: partitioning.derive_partition_specs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_schemas::{DataType, Field, FilterType, ScalarValue};

    #[test]
    fn converts_datasets_but_keeps_aliases() {
        let staging = Dataset::new(
            "staging",
            SchemaDefinition::new(vec![Field::new("id", DataType::Int).with_primary_key()]),
        )
        .with_alias("stage")
        .with_kind(DatasetKind::Derived {
            filters: vec![DatasetFilter::new("batch", FilterType::Eq, "b1")],
        });
        let datasets = Datasets::new(Dataset::new("main", SchemaDefinition::default()), staging)
            .with_metadata(MetadataDataset::default());

        let converted = convert_datasets(&datasets, CaseConversion::ToUpper);

        assert_eq!(converted.staging.reference.name, "STAGING");
        assert_eq!(converted.staging.reference.alias.as_deref(), Some("stage"));
        assert_eq!(converted.staging.schema.field_names(), vec!["ID"]);
        assert_eq!(
            converted.staging.kind,
            DatasetKind::Derived {
                filters: vec![DatasetFilter::new("BATCH", FilterType::Eq, "b1")],
            }
        );
        let metadata = converted.metadata.unwrap();
        assert_eq!(metadata.name, "BATCH_METADATA");
        assert_eq!(metadata.batch_id_field, "BATCH_ID");
    }

    #[test]
    fn converts_mode_fields_but_not_delete_values() {
        let mode = IngestMode::UnitemporalDelta(
            UnitemporalDelta::builder()
                .digest_field("digest".to_string())
                .transaction_milestoning(TransactionMilestoning::BatchId {
                    batch_id_in: "batch_id_in".to_string(),
                    batch_id_out: "batch_id_out".to_string(),
                })
                .merge_strategy(MergeStrategy::DeleteIndicator {
                    delete_field: "op".to_string(),
                    delete_values: vec![ScalarValue::from("d")],
                })
                .build(),
        );

        let converted = convert_mode(&mode, CaseConversion::ToUpper);

        assert_eq!(converted.digest_field(), Some("DIGEST"));
        assert_eq!(
            converted.transaction_milestoning().unwrap().key_field(),
            "BATCH_ID_IN"
        );
        assert_eq!(
            converted.merge_strategy(),
            Some(&MergeStrategy::DeleteIndicator {
                delete_field: "OP".to_string(),
                delete_values: vec![ScalarValue::from("d")],
            })
        );
    }

    #[test]
    fn sink_folding_applies_without_explicit_conversion() {
        assert_eq!(
            effective_conversion(CaseConversion::None, CaseFolding::Upper),
            CaseConversion::ToUpper
        );
        assert_eq!(
            effective_conversion(CaseConversion::ToLower, CaseFolding::Upper),
            CaseConversion::ToLower
        );
    }
}
