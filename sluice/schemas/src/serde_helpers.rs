//! Shared serde helper functions for deserialization and default values.
//!
//! This module consolidates common serde helpers used across the schema types

use serde::Deserialize;

// =============================================================================
// Default value functions
// =============================================================================

/// Default value for boolean fields that should be true
pub fn default_true() -> bool {
    true
}

/// Current configuration version
pub fn current_version() -> String {
    "v1".to_string()
}

/// Number of offending rows fetched when a data quality check fails
pub fn default_sample_row_count() -> usize {
    20
}

/// Column holding the data split number in the temp staging dataset
pub fn default_data_split_field() -> String {
    "data_split".to_string()
}

pub fn default_metadata_table_name() -> String {
    "batch_metadata".to_string()
}

pub fn default_table_name_field() -> String {
    "table_name".to_string()
}

pub fn default_batch_id_field() -> String {
    "batch_id".to_string()
}

pub fn default_batch_start_ts_field() -> String {
    "batch_start_ts".to_string()
}

pub fn default_batch_end_ts_field() -> String {
    "batch_end_ts".to_string()
}

pub fn default_batch_status_field() -> String {
    "batch_status".to_string()
}

pub fn default_batch_statistics_field() -> String {
    "batch_statistics".to_string()
}

pub fn default_ingest_request_id_field() -> String {
    "ingest_request_id".to_string()
}

pub fn default_batch_source_info_field() -> String {
    "batch_source_info".to_string()
}

pub fn default_additional_metadata_field() -> String {
    "additional_metadata".to_string()
}

pub fn default_last_batch_id_field() -> String {
    "last_batch_id".to_string()
}

pub fn default_insert_ts_field() -> String {
    "insert_ts".to_string()
}

pub fn default_last_used_ts_field() -> String {
    "last_used_ts".to_string()
}

// =============================================================================
// Custom deserializers
// =============================================================================

/// Field types are accepted either as a type string or as an object
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum RawFieldType {
    Text(String), // "varchar(64)"
    Object {
        #[serde(alias = "kind")]
        data_type: String,
        #[serde(default)]
        length: Option<u32>,
        #[serde(default)]
        scale: Option<u32>,
    }, // {data_type: "decimal", length: 10, scale: 2}
}
