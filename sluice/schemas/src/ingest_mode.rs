//! Ingest modes: the closed set of history-keeping disciplines and their sub-strategies.
//!
//! Every mode is a plain struct with its required attributes as non-optional fields, so a
//! mode missing e.g. a `batch_id_out` can neither be built nor deserialized.

use bon::Builder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::serde_helpers::{default_data_split_field, default_true};
use crate::values::ScalarValue;

/// Ingest mode applied to a batch.
///
/// # Examples
///
/// ```
/// use sluice_schemas::{IngestMode, TransactionMilestoning, UnitemporalDelta};
///
/// let mode = IngestMode::UnitemporalDelta(
///     UnitemporalDelta::builder()
///         .digest_field("digest".to_string())
///         .transaction_milestoning(TransactionMilestoning::BatchId {
///             batch_id_in: "batch_id_in".to_string(),
///             batch_id_out: "batch_id_out".to_string(),
///         })
///         .build(),
/// );
///
/// assert_eq!(mode.digest_field(), Some("digest"));
/// assert!(mode.transaction_milestoning().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestMode {
    #[serde(alias = "AppendOnly")]
    AppendOnly(AppendOnly),
    #[serde(alias = "NontemporalSnapshot")]
    NontemporalSnapshot(NontemporalSnapshot),
    #[serde(alias = "NontemporalDelta")]
    NontemporalDelta(NontemporalDelta),
    #[serde(alias = "UnitemporalSnapshot")]
    UnitemporalSnapshot(UnitemporalSnapshot),
    #[serde(alias = "UnitemporalDelta")]
    UnitemporalDelta(UnitemporalDelta),
    #[serde(alias = "BitemporalSnapshot")]
    BitemporalSnapshot(BitemporalSnapshot),
    #[serde(alias = "BitemporalDelta")]
    BitemporalDelta(BitemporalDelta),
    #[serde(alias = "BulkLoad")]
    BulkLoad(BulkLoad),
}

/// Appends staging rows to main without touching existing rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct AppendOnly {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_field: Option<String>,

    #[serde(default)]
    #[builder(default)]
    pub auditing: Auditing,

    #[serde(default)]
    #[builder(default)]
    pub deduplication: DeduplicationStrategy,

    #[serde(default)]
    #[builder(default)]
    pub versioning: VersioningStrategy,

    /// Skip staging rows whose primary key and digest already exist in main
    #[serde(default)]
    #[builder(default)]
    pub filter_existing_records: bool,
}

/// Replaces main content with staging content, without history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct NontemporalSnapshot {
    #[serde(default)]
    #[builder(default)]
    pub auditing: Auditing,

    #[serde(default)]
    #[builder(default)]
    pub partitioning: Partitioning,

    #[serde(default)]
    #[builder(default)]
    pub empty_dataset_handling: EmptyDatasetHandling,

    #[serde(default)]
    #[builder(default)]
    pub deduplication: DeduplicationStrategy,

    #[serde(default)]
    #[builder(default)]
    pub versioning: VersioningStrategy,
}

/// Merges staging into main by primary key, without history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct NontemporalDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_field: Option<String>,

    #[serde(default)]
    #[builder(default)]
    pub auditing: Auditing,

    #[serde(default)]
    #[builder(default)]
    pub merge_strategy: MergeStrategy,

    #[serde(default)]
    #[builder(default)]
    pub deduplication: DeduplicationStrategy,

    #[serde(default)]
    #[builder(default)]
    pub versioning: VersioningStrategy,
}

/// Each batch is the complete state; history kept in transaction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct UnitemporalSnapshot {
    pub digest_field: String,

    pub transaction_milestoning: TransactionMilestoning,

    #[serde(default)]
    #[builder(default)]
    pub partitioning: Partitioning,

    #[serde(default)]
    #[builder(default)]
    pub empty_dataset_handling: EmptyDatasetHandling,

    #[serde(default)]
    #[builder(default)]
    pub deduplication: DeduplicationStrategy,

    #[serde(default)]
    #[builder(default)]
    pub versioning: VersioningStrategy,
}

/// Each batch holds changed rows only; history kept in transaction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct UnitemporalDelta {
    pub digest_field: String,

    pub transaction_milestoning: TransactionMilestoning,

    #[serde(default)]
    #[builder(default)]
    pub merge_strategy: MergeStrategy,

    #[serde(default)]
    #[builder(default)]
    pub deduplication: DeduplicationStrategy,

    #[serde(default)]
    #[builder(default)]
    pub versioning: VersioningStrategy,

    /// Main-side range predicates derived from the staging content
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    pub optimization_filters: Vec<OptimizationFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct BitemporalSnapshot {
    pub digest_field: String,

    pub transaction_milestoning: TransactionMilestoning,

    pub validity_milestoning: ValidDateTime,

    #[serde(default)]
    #[builder(default)]
    pub partitioning: Partitioning,

    #[serde(default)]
    #[builder(default)]
    pub empty_dataset_handling: EmptyDatasetHandling,

    #[serde(default)]
    #[builder(default)]
    pub deduplication: DeduplicationStrategy,

    #[serde(default)]
    #[builder(default)]
    pub versioning: VersioningStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct BitemporalDelta {
    pub digest_field: String,

    pub transaction_milestoning: TransactionMilestoning,

    pub validity_milestoning: ValidDateTime,

    #[serde(default)]
    #[builder(default)]
    pub merge_strategy: MergeStrategy,

    #[serde(default)]
    #[builder(default)]
    pub deduplication: DeduplicationStrategy,

    #[serde(default)]
    #[builder(default)]
    pub versioning: VersioningStrategy,
}

/// Copies staged files into main, stamping every row with the batch id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct BulkLoad {
    pub batch_id_field: String,

    #[serde(default)]
    #[builder(default)]
    pub auditing: Auditing,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Auditing {
    #[default]
    #[serde(alias = "NoAuditing")]
    NoAuditing,
    #[serde(alias = "DateTimeAuditing")]
    DateTimeAuditing { date_time_field: String },
}

impl Auditing {
    pub fn date_time_field(&self) -> Option<&str> {
        match self {
            Auditing::NoAuditing => None,
            Auditing::DateTimeAuditing { date_time_field } => Some(date_time_field),
        }
    }
}

/// Transaction-time milestoning columns of main.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionMilestoning {
    #[serde(alias = "BatchId")]
    BatchId {
        batch_id_in: String,
        batch_id_out: String,
    },
    #[serde(alias = "TransactionDateTime")]
    TransactionDateTime {
        date_time_in: String,
        date_time_out: String,
    },
    #[serde(alias = "BatchIdAndDateTime")]
    BatchIdAndDateTime {
        batch_id_in: String,
        batch_id_out: String,
        date_time_in: String,
        date_time_out: String,
    },
}

impl TransactionMilestoning {
    /// `(batch_id_in, batch_id_out)` when milestoned by batch id
    pub fn batch_id_fields(&self) -> Option<(&str, &str)> {
        match self {
            TransactionMilestoning::BatchId {
                batch_id_in,
                batch_id_out,
            }
            | TransactionMilestoning::BatchIdAndDateTime {
                batch_id_in,
                batch_id_out,
                ..
            } => Some((batch_id_in, batch_id_out)),
            TransactionMilestoning::TransactionDateTime { .. } => None,
        }
    }

    /// `(date_time_in, date_time_out)` when milestoned by transaction time
    pub fn date_time_fields(&self) -> Option<(&str, &str)> {
        match self {
            TransactionMilestoning::TransactionDateTime {
                date_time_in,
                date_time_out,
            }
            | TransactionMilestoning::BatchIdAndDateTime {
                date_time_in,
                date_time_out,
                ..
            } => Some((date_time_in, date_time_out)),
            TransactionMilestoning::BatchId { .. } => None,
        }
    }

    /// The field that must be part of the main primary key
    pub fn key_field(&self) -> &str {
        match self {
            TransactionMilestoning::BatchId { batch_id_in, .. }
            | TransactionMilestoning::BatchIdAndDateTime { batch_id_in, .. } => batch_id_in,
            TransactionMilestoning::TransactionDateTime { date_time_in, .. } => date_time_in,
        }
    }

    /// All milestoning field names with their attribute names
    pub fn attributes(&self) -> Vec<(&'static str, &str)> {
        let mut attributes = vec![];
        if let Some((batch_id_in, batch_id_out)) = self.batch_id_fields() {
            attributes.push(("batch_id_in", batch_id_in));
            attributes.push(("batch_id_out", batch_id_out));
        }
        if let Some((date_time_in, date_time_out)) = self.date_time_fields() {
            attributes.push(("date_time_in", date_time_in));
            attributes.push(("date_time_out", date_time_out));
        }
        attributes
    }
}

/// Validity-time milestoning columns of main and how staging specifies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct ValidDateTime {
    pub date_time_from: String,
    pub date_time_thru: String,
    pub derivation: ValidityDerivation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidityDerivation {
    #[serde(alias = "SourceSpecifiesFromDateTime")]
    SourceSpecifiesFromDateTime { source_date_time_from: String },
    #[serde(alias = "SourceSpecifiesFromAndThruDateTime")]
    SourceSpecifiesFromAndThruDateTime {
        source_date_time_from: String,
        source_date_time_thru: String,
    },
}

impl ValidityDerivation {
    pub fn source_from(&self) -> &str {
        match self {
            ValidityDerivation::SourceSpecifiesFromDateTime {
                source_date_time_from,
            }
            | ValidityDerivation::SourceSpecifiesFromAndThruDateTime {
                source_date_time_from,
                ..
            } => source_date_time_from,
        }
    }

    pub fn source_thru(&self) -> Option<&str> {
        match self {
            ValidityDerivation::SourceSpecifiesFromDateTime { .. } => None,
            ValidityDerivation::SourceSpecifiesFromAndThruDateTime {
                source_date_time_thru,
                ..
            } => Some(source_date_time_thru),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    #[serde(alias = "NoDeletes")]
    NoDeletes,
    /// Staging rows whose `delete_field` holds one of `delete_values` delete the key
    #[serde(alias = "DeleteIndicator")]
    DeleteIndicator {
        delete_field: String,
        delete_values: Vec<ScalarValue>,
    },
}

impl MergeStrategy {
    pub fn delete_field(&self) -> Option<&str> {
        match self {
            MergeStrategy::NoDeletes => None,
            MergeStrategy::DeleteIndicator { delete_field, .. } => Some(delete_field),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum DeduplicationStrategy {
    #[default]
    #[serde(alias = "AllowDuplicates")]
    AllowDuplicates,
    #[serde(alias = "FilterDuplicates")]
    FilterDuplicates,
    #[serde(alias = "FailOnDuplicates")]
    FailOnDuplicates,
}

impl fmt::Display for DeduplicationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeduplicationStrategy::AllowDuplicates => write!(f, "Allow Duplicates"),
            DeduplicationStrategy::FilterDuplicates => write!(f, "Filter Duplicates"),
            DeduplicationStrategy::FailOnDuplicates => write!(f, "Fail on Duplicates"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VersioningStrategy {
    #[serde(alias = "NoVersioning")]
    NoVersioning {
        #[serde(default)]
        fail_on_duplicate_primary_keys: bool,
    },
    /// Keep only the highest version per primary key.
    ///
    /// Delta modes only replace a main row when the staging version passes the comparator
    /// against the version of that row.
    #[serde(alias = "MaxVersion")]
    MaxVersion {
        version_field: String,
        #[serde(default)]
        versioning_comparator: VersioningComparator,
        /// Reduce staging to its highest version per key; off when staging already holds one
        #[serde(default = "default_true")]
        perform_deduplication: bool,
    },
    /// Apply every version per primary key, one data split per version rank
    #[serde(alias = "AllVersions")]
    AllVersions {
        version_field: String,
        #[serde(default = "default_data_split_field")]
        data_split_field: String,
    },
}

/// Comparison a staging version must pass against the main version to replace the main row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum VersioningComparator {
    #[default]
    #[serde(alias = "GREATER_THAN")]
    GreaterThan,
    #[serde(alias = "GREATER_THAN_EQUAL_TO")]
    GreaterThanEqualTo,
}

impl Default for VersioningStrategy {
    fn default() -> Self {
        VersioningStrategy::NoVersioning {
            fail_on_duplicate_primary_keys: false,
        }
    }
}

impl VersioningStrategy {
    /// Keep only the highest version per key, replacing main rows with older versions
    pub fn max_version(version_field: impl Into<String>) -> Self {
        VersioningStrategy::MaxVersion {
            version_field: version_field.into(),
            versioning_comparator: VersioningComparator::default(),
            perform_deduplication: true,
        }
    }

    pub fn version_field(&self) -> Option<&str> {
        match self {
            VersioningStrategy::NoVersioning { .. } => None,
            VersioningStrategy::MaxVersion { version_field, .. }
            | VersioningStrategy::AllVersions { version_field, .. } => Some(version_field),
        }
    }

    /// Whether staging is rewritten into temp staging by version
    pub fn rewrites_staging(&self) -> bool {
        match self {
            VersioningStrategy::NoVersioning { .. } => false,
            VersioningStrategy::MaxVersion {
                perform_deduplication,
                ..
            } => *perform_deduplication,
            VersioningStrategy::AllVersions { .. } => true,
        }
    }

    /// Version field and comparator guarding main rows against older staging versions
    pub fn version_guard(&self) -> Option<(&str, VersioningComparator)> {
        match self {
            VersioningStrategy::MaxVersion {
                version_field,
                versioning_comparator,
                ..
            } => Some((version_field, *versioning_comparator)),
            _ => None,
        }
    }

    pub fn data_split_field(&self) -> Option<&str> {
        match self {
            VersioningStrategy::AllVersions {
                data_split_field, ..
            } => Some(data_split_field),
            _ => None,
        }
    }

    pub fn fails_on_duplicate_primary_keys(&self) -> bool {
        matches!(
            self,
            VersioningStrategy::NoVersioning {
                fail_on_duplicate_primary_keys: true
            }
        )
    }
}

/// Scope of a snapshot: only partitions present in the batch are replaced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct Partitioning {
    #[serde(default)]
    #[builder(default)]
    pub partition_fields: Vec<String>,

    /// Explicit partitions, each mapping every partition field to a value
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    pub partition_specs: Vec<BTreeMap<String, ScalarValue>>,

    /// Query the distinct partitions of staging before planning
    #[serde(default)]
    #[builder(default)]
    pub derive_partition_specs: bool,
}

impl Partitioning {
    pub fn is_partitioned(&self) -> bool {
        !self.partition_fields.is_empty()
    }
}

/// What a snapshot mode does when staging holds no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum EmptyDatasetHandling {
    #[default]
    DeleteTargetData,
    NoOp,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct OptimizationFilter {
    pub field_name: String,
    #[serde(default)]
    pub includes_null_values: bool,
}

impl OptimizationFilter {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            includes_null_values: false,
        }
    }
}

/// Inclusive range of data splits applied as one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct DataSplitRange {
    pub lower_bound: i64,
    pub upper_bound: i64,
}

impl DataSplitRange {
    pub fn new(lower_bound: i64, upper_bound: i64) -> Self {
        Self {
            lower_bound,
            upper_bound,
        }
    }
}

impl fmt::Display for DataSplitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower_bound, self.upper_bound)
    }
}

impl IngestMode {
    /// Name of the mode, as used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            IngestMode::AppendOnly(_) => "append_only",
            IngestMode::NontemporalSnapshot(_) => "nontemporal_snapshot",
            IngestMode::NontemporalDelta(_) => "nontemporal_delta",
            IngestMode::UnitemporalSnapshot(_) => "unitemporal_snapshot",
            IngestMode::UnitemporalDelta(_) => "unitemporal_delta",
            IngestMode::BitemporalSnapshot(_) => "bitemporal_snapshot",
            IngestMode::BitemporalDelta(_) => "bitemporal_delta",
            IngestMode::BulkLoad(_) => "bulk_load",
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(
            self,
            IngestMode::NontemporalSnapshot(_)
                | IngestMode::UnitemporalSnapshot(_)
                | IngestMode::BitemporalSnapshot(_)
        )
    }

    pub fn digest_field(&self) -> Option<&str> {
        match self {
            IngestMode::AppendOnly(mode) => mode.digest_field.as_deref(),
            IngestMode::NontemporalDelta(mode) => mode.digest_field.as_deref(),
            IngestMode::UnitemporalSnapshot(mode) => Some(&mode.digest_field),
            IngestMode::UnitemporalDelta(mode) => Some(&mode.digest_field),
            IngestMode::BitemporalSnapshot(mode) => Some(&mode.digest_field),
            IngestMode::BitemporalDelta(mode) => Some(&mode.digest_field),
            IngestMode::NontemporalSnapshot(_) | IngestMode::BulkLoad(_) => None,
        }
    }

    pub fn auditing(&self) -> Option<&Auditing> {
        match self {
            IngestMode::AppendOnly(mode) => Some(&mode.auditing),
            IngestMode::NontemporalSnapshot(mode) => Some(&mode.auditing),
            IngestMode::NontemporalDelta(mode) => Some(&mode.auditing),
            IngestMode::BulkLoad(mode) => Some(&mode.auditing),
            _ => None,
        }
    }

    pub fn transaction_milestoning(&self) -> Option<&TransactionMilestoning> {
        match self {
            IngestMode::UnitemporalSnapshot(mode) => Some(&mode.transaction_milestoning),
            IngestMode::UnitemporalDelta(mode) => Some(&mode.transaction_milestoning),
            IngestMode::BitemporalSnapshot(mode) => Some(&mode.transaction_milestoning),
            IngestMode::BitemporalDelta(mode) => Some(&mode.transaction_milestoning),
            _ => None,
        }
    }

    pub fn validity_milestoning(&self) -> Option<&ValidDateTime> {
        match self {
            IngestMode::BitemporalSnapshot(mode) => Some(&mode.validity_milestoning),
            IngestMode::BitemporalDelta(mode) => Some(&mode.validity_milestoning),
            _ => None,
        }
    }

    pub fn merge_strategy(&self) -> Option<&MergeStrategy> {
        match self {
            IngestMode::NontemporalDelta(mode) => Some(&mode.merge_strategy),
            IngestMode::UnitemporalDelta(mode) => Some(&mode.merge_strategy),
            IngestMode::BitemporalDelta(mode) => Some(&mode.merge_strategy),
            _ => None,
        }
    }

    pub fn deduplication(&self) -> DeduplicationStrategy {
        match self {
            IngestMode::AppendOnly(mode) => mode.deduplication,
            IngestMode::NontemporalSnapshot(mode) => mode.deduplication,
            IngestMode::NontemporalDelta(mode) => mode.deduplication,
            IngestMode::UnitemporalSnapshot(mode) => mode.deduplication,
            IngestMode::UnitemporalDelta(mode) => mode.deduplication,
            IngestMode::BitemporalSnapshot(mode) => mode.deduplication,
            IngestMode::BitemporalDelta(mode) => mode.deduplication,
            IngestMode::BulkLoad(_) => DeduplicationStrategy::AllowDuplicates,
        }
    }

    pub fn versioning(&self) -> VersioningStrategy {
        match self {
            IngestMode::AppendOnly(mode) => mode.versioning.clone(),
            IngestMode::NontemporalSnapshot(mode) => mode.versioning.clone(),
            IngestMode::NontemporalDelta(mode) => mode.versioning.clone(),
            IngestMode::UnitemporalSnapshot(mode) => mode.versioning.clone(),
            IngestMode::UnitemporalDelta(mode) => mode.versioning.clone(),
            IngestMode::BitemporalSnapshot(mode) => mode.versioning.clone(),
            IngestMode::BitemporalDelta(mode) => mode.versioning.clone(),
            IngestMode::BulkLoad(_) => VersioningStrategy::default(),
        }
    }

    pub fn partitioning(&self) -> Option<&Partitioning> {
        match self {
            IngestMode::NontemporalSnapshot(mode) => Some(&mode.partitioning),
            IngestMode::UnitemporalSnapshot(mode) => Some(&mode.partitioning),
            IngestMode::BitemporalSnapshot(mode) => Some(&mode.partitioning),
            _ => None,
        }
    }

    pub fn empty_dataset_handling(&self) -> Option<EmptyDatasetHandling> {
        match self {
            IngestMode::NontemporalSnapshot(mode) => Some(mode.empty_dataset_handling),
            IngestMode::UnitemporalSnapshot(mode) => Some(mode.empty_dataset_handling),
            IngestMode::BitemporalSnapshot(mode) => Some(mode.empty_dataset_handling),
            _ => None,
        }
    }

    pub fn optimization_filters(&self) -> &[OptimizationFilter] {
        match self {
            IngestMode::UnitemporalDelta(mode) => &mode.optimization_filters,
            _ => &[],
        }
    }

    /// Copy of the mode with explicit partition specs, for modes that partition
    pub fn with_partition_specs(&self, specs: Vec<BTreeMap<String, ScalarValue>>) -> IngestMode {
        let mut mode = self.clone();
        let partitioning = match &mut mode {
            IngestMode::NontemporalSnapshot(mode) => Some(&mut mode.partitioning),
            IngestMode::UnitemporalSnapshot(mode) => Some(&mut mode.partitioning),
            IngestMode::BitemporalSnapshot(mode) => Some(&mut mode.partitioning),
            _ => None,
        };
        if let Some(partitioning) = partitioning {
            partitioning.partition_specs = specs;
            partitioning.derive_partition_specs = false;
        }
        mode
    }
}
