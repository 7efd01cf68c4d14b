//! Integration tests for sluice schemas
//!
//! Tests configuration parsing, defaults and aliases.

use sluice_schemas::{
    DataType, DatasetKind, DeduplicationStrategy, FilterType, IngestConfig, IngestMode,
    MergeStrategy, ScalarValue, TransactionMilestoning, ValidityDerivation, VersioningStrategy,
};
use std::fs;
use std::path::Path;

const UNITEMPORAL_DELTA_YAML: &str = r#"
ingest_mode:
  type: unitemporal_delta
  digest_field: digest
  transaction_milestoning:
    type: batch_id
    batch_id_in: batch_id_in
    batch_id_out: batch_id_out
  merge_strategy:
    type: delete_indicator
    delete_field: op
    delete_values: ["D", "X"]
  deduplication: filter_duplicates
  versioning:
    type: max_version
    version_field: version
datasets:
  main:
    database: sales
    name: orders
    schema:
      fields:
        - { name: id, type: int, primary_key: true }
        - { name: amount, type: "decimal(10,2)" }
  staging:
    name: orders_staging
    schema:
      fields:
        - { name: id, type: int, primary_key: true }
        - { name: amount, type: "decimal(10,2)" }
        - { name: digest, type: varchar }
        - { name: op, type: varchar }
        - { name: version, type: int }
    kind:
      type: derived
      filters:
        - { field_name: load_date, filter_type: ">=", value: "2024-01-01" }
options:
  case_conversion: to_upper
"#;

#[test]
fn test_unitemporal_delta_yaml() {
    let config: IngestConfig = serde_yml::from_str(UNITEMPORAL_DELTA_YAML).unwrap();

    assert_eq!(config.version, "v1");
    let IngestMode::UnitemporalDelta(mode) = &config.ingest_mode else {
        panic!("expected unitemporal delta, got {:?}", config.ingest_mode);
    };

    assert_eq!(mode.digest_field, "digest");
    assert_eq!(
        mode.transaction_milestoning.batch_id_fields(),
        Some(("batch_id_in", "batch_id_out"))
    );
    assert_eq!(
        mode.merge_strategy,
        MergeStrategy::DeleteIndicator {
            delete_field: "op".to_string(),
            delete_values: vec![ScalarValue::from("D"), ScalarValue::from("X")],
        }
    );
    assert_eq!(mode.deduplication, DeduplicationStrategy::FilterDuplicates);
    assert_eq!(mode.versioning.version_field(), Some("version"));

    let main = &config.datasets.main;
    assert_eq!(main.reference.qualified_name(), "sales.orders");
    assert_eq!(main.schema.primary_keys(), vec!["id"]);
    assert_eq!(
        main.schema.field("amount").unwrap().field_type.data_type,
        DataType::Decimal
    );

    let DatasetKind::Derived { filters } = &config.datasets.staging.kind else {
        panic!("expected derived staging dataset");
    };
    assert_eq!(filters[0].filter_type, FilterType::Ge);
    assert!(config.options.collect_statistics);
}

#[test]
fn test_camel_case_aliases() {
    let json = r#"{
        "ingest_mode": {
            "type": "BitemporalDelta",
            "digest_field": "digest",
            "transaction_milestoning": {
                "type": "BatchIdAndDateTime",
                "batch_id_in": "batch_id_in",
                "batch_id_out": "batch_id_out",
                "date_time_in": "in_z",
                "date_time_out": "out_z"
            },
            "validity_milestoning": {
                "date_time_from": "start",
                "date_time_thru": "end",
                "derivation": {
                    "type": "SourceSpecifiesFromDateTime",
                    "source_date_time_from": "date"
                }
            },
            "versioning": { "type": "AllVersions", "version_field": "version" }
        },
        "datasets": {
            "main": { "name": "main" },
            "staging": { "name": "staging" }
        }
    }"#;

    let config: IngestConfig = serde_json::from_str(json).unwrap();
    let validity = config.ingest_mode.validity_milestoning().unwrap();

    assert!(matches!(
        config.ingest_mode.transaction_milestoning(),
        Some(TransactionMilestoning::BatchIdAndDateTime { .. })
    ));
    assert_eq!(validity.derivation.source_from(), "date");
    assert!(matches!(
        validity.derivation,
        ValidityDerivation::SourceSpecifiesFromDateTime { .. }
    ));
    assert_eq!(
        config.ingest_mode.versioning(),
        VersioningStrategy::AllVersions {
            version_field: "version".to_string(),
            data_split_field: "data_split".to_string(),
        }
    );
}

#[test]
fn test_missing_required_attribute_fails() {
    // batch_id_out is required by the batch id milestoning
    let json = r#"{
        "type": "unitemporal_snapshot",
        "digest_field": "digest",
        "transaction_milestoning": { "type": "batch_id", "batch_id_in": "batch_id_in" }
    }"#;

    assert!(serde_json::from_str::<IngestMode>(json).is_err());
}

#[test]
fn test_config_serialization_roundtrip() {
    let config: IngestConfig = serde_yml::from_str(UNITEMPORAL_DELTA_YAML).unwrap();

    let json = serde_json::to_string(&config).unwrap();
    let parsed: IngestConfig = serde_json::from_str(&json).unwrap();

    assert_eq!(config, parsed);
}

#[test]
fn test_demo_configs() {
    let demos_dir = Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .unwrap()
        .join("demos");

    if !demos_dir.exists() {
        return;
    }

    for entry in fs::read_dir(demos_dir).unwrap() {
        let path = entry.unwrap().path();
        let extension = path.extension().and_then(|e| e.to_str());
        if !matches!(extension, Some("yml") | Some("yaml")) {
            continue;
        }

        let content =
            fs::read_to_string(&path).unwrap_or_else(|_| panic!("Failed to read file: {:?}", path));
        let parsed: Result<IngestConfig, String> =
            serde_yml::from_str(&content).map_err(|e| e.to_string());

        parsed.unwrap_or_else(|e| panic!("Failed to parse {:?}: {e}", path));
    }
}
