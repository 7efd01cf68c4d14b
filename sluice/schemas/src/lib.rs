//! # Sluice Schemas
//!
//! This crate contains the configuration types of the sluice ingestion engine:
//! datasets, ingest modes and their strategies, options and progress events.
//! Keeping them here lets the core, the executors and the CLI share one model.

use bon::Builder;
use serde::{Deserialize, Serialize};

pub mod data_types;
pub mod datasets;
pub mod ingest_mode;
pub mod options;
pub mod progress;
pub mod values;

mod serde_helpers;

pub use data_types::{DataType, Field, FieldType};
pub use datasets::{
    ColumnStoreSpecification, Dataset, DatasetFilter, DatasetKind, DatasetReference, Datasets,
    FileFormat, FilterExpression, FilterType, Index, LockInfoDataset, MetadataDataset,
    SchemaDefinition, ShardSpecification, StagedFiles,
};
pub use ingest_mode::{
    AppendOnly, Auditing, BitemporalDelta, BitemporalSnapshot, BulkLoad, DataSplitRange,
    DeduplicationStrategy, EmptyDatasetHandling, IngestMode, MergeStrategy, NontemporalDelta,
    NontemporalSnapshot, OptimizationFilter, Partitioning, TransactionMilestoning,
    UnitemporalDelta, UnitemporalSnapshot, ValidDateTime, ValidityDerivation,
    VersioningComparator, VersioningStrategy,
};
pub use options::{CaseConversion, IngestOptions, SchemaEvolutionCapability};
pub use progress::ProgressEvent;
pub use values::ScalarValue;

use serde_helpers::current_version;

/// Definition of an ingestion: which mode applies staging to main, and how.
///
/// # Examples
///
/// ```
/// use sluice_schemas::{
///     DataType, Dataset, Datasets, Field, IngestConfig, IngestMode, NontemporalSnapshot,
///     SchemaDefinition,
/// };
///
/// let schema = SchemaDefinition::new(vec![
///     Field::new("id", DataType::Int).with_primary_key(),
///     Field::new("name", DataType::Varchar),
/// ]);
///
/// // version defaults to "v1" and options to their defaults
/// let config = IngestConfig::builder()
///     .ingest_mode(IngestMode::NontemporalSnapshot(NontemporalSnapshot::default()))
///     .datasets(Datasets::new(
///         Dataset::new("main", schema.clone()),
///         Dataset::new("staging", schema),
///     ))
///     .build();
///
/// assert_eq!(config.version, "v1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct IngestConfig {
    /// Schema version for migration compatibility
    #[serde(default = "current_version")]
    #[builder(default = current_version())]
    pub version: String,

    /// History-keeping discipline applied to main
    pub ingest_mode: IngestMode,

    /// Main, staging and the auxiliary datasets
    pub datasets: Datasets,

    #[serde(default)]
    #[builder(default)]
    pub options: IngestOptions,
}
