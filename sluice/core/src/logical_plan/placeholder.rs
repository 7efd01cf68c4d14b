use serde::{Deserialize, Serialize};
use sluice_schemas::ScalarValue;
use std::collections::BTreeMap;
use std::fmt;

/// Named value that is only known when a batch is executed.
///
/// Plans are built once and carry placeholders; binding them to concrete values yields a
/// [`BoundPlan`](super::BoundPlan).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Placeholder {
    NextBatchId,
    BatchStartTimestamp,
    BatchEndTimestamp,
    DataSplitLowerBound,
    DataSplitUpperBound,
    /// Lower bound of an optimization filter, per field
    OptimizationLowerBound { field: String },
    /// Upper bound of an optimization filter, per field
    OptimizationUpperBound { field: String },
    IngestRequestId,
    AdditionalMetadata,
    BatchStatistics,
}

impl Placeholder {
    /// Literal braced token substituted by renderers, e.g. `{NEXT_BATCH_ID_PATTERN}`
    pub fn token(&self) -> String {
        match self {
            Placeholder::NextBatchId => "{NEXT_BATCH_ID_PATTERN}".to_string(),
            Placeholder::BatchStartTimestamp => "{BATCH_START_TIMESTAMP_PLACEHOLDER}".to_string(),
            Placeholder::BatchEndTimestamp => "{BATCH_END_TIMESTAMP_PLACEHOLDER}".to_string(),
            Placeholder::DataSplitLowerBound => "{DATA_SPLIT_LOWER_BOUND_PLACEHOLDER}".to_string(),
            Placeholder::DataSplitUpperBound => "{DATA_SPLIT_UPPER_BOUND_PLACEHOLDER}".to_string(),
            Placeholder::OptimizationLowerBound { field } => {
                format!("{{{}_LOWER_BOUND}}", field.to_uppercase())
            }
            Placeholder::OptimizationUpperBound { field } => {
                format!("{{{}_UPPER_BOUND}}", field.to_uppercase())
            }
            Placeholder::IngestRequestId => "{INGEST_REQUEST_ID_PLACEHOLDER}".to_string(),
            Placeholder::AdditionalMetadata => "{ADDITIONAL_METADATA_PLACEHOLDER}".to_string(),
            Placeholder::BatchStatistics => "{BATCH_STATISTICS_PLACEHOLDER}".to_string(),
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Values of the placeholders of one batch, keyed by token.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaceholderValues(BTreeMap<String, ScalarValue>);

impl PlaceholderValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, placeholder: &Placeholder, value: impl Into<ScalarValue>) {
        self.0.insert(placeholder.token(), value.into());
    }

    pub fn with(mut self, placeholder: &Placeholder, value: impl Into<ScalarValue>) -> Self {
        self.insert(placeholder, value);
        self
    }

    /// Adds every value of `other`, replacing values of the same placeholder
    pub fn extend(&mut self, other: PlaceholderValues) {
        self.0.extend(other.0);
    }

    pub fn get(&self, placeholder: &Placeholder) -> Option<&ScalarValue> {
        self.0.get(&placeholder.token())
    }

    pub fn tokens(&self) -> impl Iterator<Item = (&String, &ScalarValue)> {
        self.0.iter()
    }
}
