use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Failures of the batch execution protocol itself.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum IngestError {
    #[error("A batch into \"{0}\" is already running in this session")]
    #[diagnostic(
        code(sluice::ingest::already_running),
        help("Batches into the same main dataset must run one after another")
    )]
    AlreadyRunning(String),

    #[error("Staging dataset \"{0}\" is empty")]
    #[diagnostic(
        code(sluice::ingest::empty_staging),
        help("The ingest mode is configured to fail on empty batches")
    )]
    EmptyStaging(String),

    #[error("No batch id could be allocated for \"{0}\"")]
    #[diagnostic(code(sluice::ingest::missing_batch_id))]
    MissingBatchId(String),

    #[error("Dry run is not supported by {0} ingest mode")]
    #[diagnostic(
        code(sluice::ingest::dry_run_unsupported),
        help("Dry runs need a bulk load of staged files into a sink supporting dry runs")
    )]
    DryRunUnsupported(String),

    #[error("Batch metadata could not be read: {0}")]
    #[diagnostic(code(sluice::ingest::invalid_metadata))]
    InvalidMetadata(#[from] serde_json::Error),
}

/// Kind of a staging row that cannot be ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Duplicates,
    DuplicatePrimaryKeys,
    DataVersionError,
    CheckNullConstraint,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Duplicates => "DUPLICATES",
            ErrorCategory::DuplicatePrimaryKeys => "DUPLICATE_PRIMARY_KEYS",
            ErrorCategory::DataVersionError => "DATA_VERSION_ERROR",
            ErrorCategory::CheckNullConstraint => "CHECK_NULL_CONSTRAINT",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One offending staging row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataError {
    pub error_category: ErrorCategory,
    pub error_message: String,
    /// The row as read back from the executor
    pub error_record: serde_json::Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub error_details: BTreeMap<String, serde_json::Value>,
}

/// Staging rows violating the deduplication or versioning strategy of the mode.
///
/// Raised before main is modified.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(sluice::data_quality))]
pub struct DataQualityError {
    pub category: ErrorCategory,
    pub message: String,
    /// Sample of the offending rows
    pub errors: Vec<DataError>,
}
