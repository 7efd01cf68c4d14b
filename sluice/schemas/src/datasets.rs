//! Dataset descriptors: references, schemas and the bundle of datasets an ingestion touches.

use bon::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::data_types::{DataType, Field};
use crate::serde_helpers::*;
use crate::values::ScalarValue;

/// Location of a dataset, optionally aliased for use in conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct DatasetReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl DatasetReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            database: None,
            group: None,
            name: name.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Name qualified by database and group, e.g. `db.group.name`
    pub fn qualified_name(&self) -> String {
        [self.database.as_deref(), self.group.as_deref(), Some(self.name.as_str())]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(".")
    }

    /// The alias used to qualify fields of this dataset, falling back to its name
    pub fn alias_or_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(self.name.as_str())
    }
}

/// Ordered set of uniquely named fields plus optional physical layout hints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct SchemaDefinition {
    #[serde(default)]
    #[builder(default)]
    pub fields: Vec<Field>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    pub indexes: Vec<Index>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_specification: Option<ShardSpecification>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_store_specification: Option<ColumnStoreSpecification>,
}

impl SchemaDefinition {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|field| field.name.clone()).collect()
    }

    pub fn primary_keys(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|field| field.primary_key)
            .map(|field| field.name.clone())
            .collect()
    }

    /// First field name that appears more than once, if any
    pub fn duplicate_field(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.fields
            .iter()
            .map(|field| field.name.as_str())
            .find(|name| !seen.insert(*name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct Index {
    pub index_name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct ShardSpecification {
    pub fields: Vec<String>,
    #[serde(default = "default_true")]
    pub is_hash: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct ColumnStoreSpecification {
    pub fields: Vec<String>,
}

/// A dataset taking part in an ingestion.
///
/// # Examples
///
/// ```
/// use sluice_schemas::{Dataset, DatasetKind, DataType, Field, SchemaDefinition};
///
/// let staging = Dataset::builder()
///     .reference(sluice_schemas::DatasetReference::new("staging").with_alias("stage"))
///     .schema(SchemaDefinition::new(vec![
///         Field::new("id", DataType::Int).with_primary_key(),
///         Field::new("name", DataType::Varchar),
///     ]))
///     .build();
///
/// assert_eq!(staging.kind, DatasetKind::Definition);
/// assert_eq!(staging.reference.alias_or_name(), "stage");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct Dataset {
    #[serde(flatten)]
    pub reference: DatasetReference,

    #[serde(default)]
    #[builder(default)]
    pub schema: SchemaDefinition,

    #[serde(default)]
    #[builder(default)]
    pub kind: DatasetKind,
}

impl Dataset {
    pub fn new(name: impl Into<String>, schema: SchemaDefinition) -> Self {
        Self {
            reference: DatasetReference::new(name),
            schema,
            kind: DatasetKind::Definition,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.reference.alias = Some(alias.into());
        self
    }

    pub fn with_kind(mut self, kind: DatasetKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_schema(mut self, schema: SchemaDefinition) -> Self {
        self.schema = schema;
        self
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }
}

/// How a dataset is defined.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetKind {
    /// Plain table
    #[default]
    #[serde(alias = "Definition")]
    Definition,

    /// Table scoped by a conjunction of filters, recorded with every batch
    #[serde(alias = "Derived")]
    Derived { filters: Vec<DatasetFilter> },

    /// Table scoped by an arbitrary filter expression
    #[serde(alias = "Filtered")]
    Filtered { filter: FilterExpression },

    /// Dataset described by a JSON document holding its reference and schema
    #[serde(alias = "JsonExternalReference")]
    JsonExternalReference { json: String },

    /// Files to bulk load
    #[serde(alias = "StagedFiles")]
    StagedFiles(StagedFiles),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    #[serde(alias = "equal_to", alias = "=")]
    Eq,
    #[serde(alias = "greater_than", alias = ">")]
    Gt,
    #[serde(alias = "greater_than_equal_to", alias = ">=")]
    Ge,
    #[serde(alias = "less_than", alias = "<")]
    Lt,
    #[serde(alias = "less_than_equal_to", alias = "<=")]
    Le,
}

/// A row-level predicate `field <op> value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct DatasetFilter {
    pub field_name: String,
    pub filter_type: FilterType,
    pub value: ScalarValue,
}

impl DatasetFilter {
    pub fn new(field_name: impl Into<String>, filter_type: FilterType, value: impl Into<ScalarValue>) -> Self {
        Self {
            field_name: field_name.into(),
            filter_type,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterExpression {
    And { filters: Vec<FilterExpression> },
    Or { filters: Vec<FilterExpression> },
    Not { filter: Box<FilterExpression> },
    Filter(DatasetFilter),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct StagedFiles {
    pub format: FileFormat,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Json,
    Csv,
}

/// Audit table receiving one row per applied batch.
///
/// Column names default to `table_name`, `batch_id`, `batch_start_ts`, `batch_end_ts`,
/// `batch_status`, `batch_statistics`, `ingest_request_id`, `batch_source_info`
/// and `additional_metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct MetadataDataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default = "default_metadata_table_name")]
    #[builder(default = default_metadata_table_name())]
    pub name: String,

    #[serde(default = "default_table_name_field")]
    #[builder(default = default_table_name_field())]
    pub table_name_field: String,

    #[serde(default = "default_batch_id_field")]
    #[builder(default = default_batch_id_field())]
    pub batch_id_field: String,

    #[serde(default = "default_batch_start_ts_field")]
    #[builder(default = default_batch_start_ts_field())]
    pub batch_start_ts_field: String,

    #[serde(default = "default_batch_end_ts_field")]
    #[builder(default = default_batch_end_ts_field())]
    pub batch_end_ts_field: String,

    #[serde(default = "default_batch_status_field")]
    #[builder(default = default_batch_status_field())]
    pub batch_status_field: String,

    #[serde(default = "default_batch_statistics_field")]
    #[builder(default = default_batch_statistics_field())]
    pub batch_statistics_field: String,

    #[serde(default = "default_ingest_request_id_field")]
    #[builder(default = default_ingest_request_id_field())]
    pub ingest_request_id_field: String,

    #[serde(default = "default_batch_source_info_field")]
    #[builder(default = default_batch_source_info_field())]
    pub batch_source_info_field: String,

    #[serde(default = "default_additional_metadata_field")]
    #[builder(default = default_additional_metadata_field())]
    pub additional_metadata_field: String,
}

impl Default for MetadataDataset {
    fn default() -> Self {
        MetadataDataset::builder().build()
    }
}

impl MetadataDataset {
    pub fn reference(&self) -> DatasetReference {
        DatasetReference {
            database: self.database.clone(),
            group: self.group.clone(),
            name: self.name.clone(),
            alias: Some("batch_metadata".to_string()),
        }
    }

    pub fn to_dataset(&self) -> Dataset {
        let fields = vec![
            Field::new(&self.table_name_field, DataType::Varchar).with_nullable(false),
            Field::new(&self.batch_id_field, DataType::Int).with_nullable(false),
            Field::new(&self.batch_start_ts_field, DataType::Timestamp),
            Field::new(&self.batch_end_ts_field, DataType::Timestamp),
            Field::new(&self.batch_status_field, DataType::Varchar),
            Field::new(&self.batch_statistics_field, DataType::Json),
            Field::new(&self.ingest_request_id_field, DataType::Varchar),
            Field::new(&self.batch_source_info_field, DataType::Json),
            Field::new(&self.additional_metadata_field, DataType::Json),
        ];

        Dataset {
            reference: self.reference(),
            schema: SchemaDefinition::new(fields),
            kind: DatasetKind::Definition,
        }
    }
}

/// Single-row-per-table lock used to serialize batch id allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct LockInfoDataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    pub name: String,

    #[serde(default = "default_table_name_field")]
    #[builder(default = default_table_name_field())]
    pub table_name_field: String,

    #[serde(default = "default_last_batch_id_field")]
    #[builder(default = default_last_batch_id_field())]
    pub last_batch_id_field: String,

    #[serde(default = "default_insert_ts_field")]
    #[builder(default = default_insert_ts_field())]
    pub insert_ts_field: String,

    #[serde(default = "default_last_used_ts_field")]
    #[builder(default = default_last_used_ts_field())]
    pub last_used_ts_field: String,
}

impl LockInfoDataset {
    /// Lock dataset named after the main dataset, next to it
    pub fn for_main(main: &DatasetReference) -> Self {
        LockInfoDataset::builder()
            .maybe_database(main.database.clone())
            .maybe_group(main.group.clone())
            .name(format!("{}_lock", main.name))
            .build()
    }

    pub fn reference(&self) -> DatasetReference {
        DatasetReference {
            database: self.database.clone(),
            group: self.group.clone(),
            name: self.name.clone(),
            alias: Some("lock_info".to_string()),
        }
    }

    pub fn to_dataset(&self) -> Dataset {
        let fields = vec![
            Field::new(&self.table_name_field, DataType::Varchar).with_primary_key(),
            Field::new(&self.last_batch_id_field, DataType::Int),
            Field::new(&self.insert_ts_field, DataType::Timestamp),
            Field::new(&self.last_used_ts_field, DataType::Timestamp),
        ];

        Dataset {
            reference: self.reference(),
            schema: SchemaDefinition::new(fields),
            kind: DatasetKind::Definition,
        }
    }
}

/// Bundle of every dataset an ingestion reads or writes.
///
/// Only `main` and `staging` are required, the other datasets get derived names
/// when they are needed by the ingest mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct Datasets {
    /// The target of the ingestion
    pub main: Dataset,

    /// The batch being applied
    pub staging: Dataset,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<Dataset>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_with_delete_indicator: Option<Dataset>,

    /// Deduplicated and versioned copy of staging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_staging: Option<Dataset>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_without_duplicates: Option<Dataset>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataDataset>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_info: Option<LockInfoDataset>,
}

impl Datasets {
    pub fn new(main: Dataset, staging: Dataset) -> Self {
        Datasets::builder().main(main).staging(staging).build()
    }

    pub fn with_main(mut self, main: Dataset) -> Self {
        self.main = main;
        self
    }

    pub fn with_staging(mut self, staging: Dataset) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataDataset) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_lock_info(mut self, lock_info: LockInfoDataset) -> Self {
        self.lock_info = Some(lock_info);
        self
    }
}
