//! Options controlling how a batch is planned and executed.

use bon::Builder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::serde_helpers::{default_sample_row_count, default_true};

/// Identifier case conversion applied to every dataset and field name before planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum CaseConversion {
    #[default]
    None,
    ToUpper,
    ToLower,
}

impl CaseConversion {
    pub fn apply(&self, identifier: &str) -> String {
        match self {
            CaseConversion::None => identifier.to_string(),
            CaseConversion::ToUpper => identifier.to_uppercase(),
            CaseConversion::ToLower => identifier.to_lowercase(),
        }
    }
}

/// Kinds of change schema evolution is allowed to apply to the main dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum SchemaEvolutionCapability {
    AddColumn,
    ImplicitDataTypeConversion,
    ExplicitDataTypeConversion,
    DataSizingChanges,
    ColumnNullabilityChange,
}

impl SchemaEvolutionCapability {
    pub fn all() -> BTreeSet<SchemaEvolutionCapability> {
        BTreeSet::from([
            SchemaEvolutionCapability::AddColumn,
            SchemaEvolutionCapability::ImplicitDataTypeConversion,
            SchemaEvolutionCapability::ExplicitDataTypeConversion,
            SchemaEvolutionCapability::DataSizingChanges,
            SchemaEvolutionCapability::ColumnNullabilityChange,
        ])
    }
}

/// Options of an ingestion.
///
/// # Examples
///
/// ```
/// use sluice_schemas::{CaseConversion, IngestOptions};
///
/// let options = IngestOptions::builder()
///     .case_conversion(CaseConversion::ToUpper)
///     .enable_concurrent_safety(true)
///     .build();
///
/// assert!(options.collect_statistics);
/// assert!(options.batch_id_per_data_split);
/// assert_eq!(options.sample_row_count, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct IngestOptions {
    /// Delete the staging rows once the batch is applied
    #[serde(default)]
    #[builder(default)]
    pub cleanup_staging_data: bool,

    /// Compute row statistics before and after the ingest plan
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub collect_statistics: bool,

    #[serde(default)]
    #[builder(default)]
    pub enable_schema_evolution: bool,

    /// Changes schema evolution may apply, further limited by the sink capabilities
    #[serde(default = "SchemaEvolutionCapability::all")]
    #[builder(default = SchemaEvolutionCapability::all())]
    pub schema_evolution_capabilities: BTreeSet<SchemaEvolutionCapability>,

    #[serde(default)]
    #[builder(default)]
    pub case_conversion: CaseConversion,

    /// Allocate batch ids through the lock dataset instead of the metadata dataset
    #[serde(default)]
    #[builder(default)]
    pub enable_concurrent_safety: bool,

    /// Allocate a new batch id for every data split
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub batch_id_per_data_split: bool,

    /// Number of offending rows reported with a data quality error
    #[serde(default = "default_sample_row_count")]
    #[builder(default = default_sample_row_count())]
    pub sample_row_count: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions::builder().build()
    }
}
