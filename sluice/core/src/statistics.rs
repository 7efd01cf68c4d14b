//! Names of the row statistics recorded with every batch.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatisticName {
    IncomingRecordCount,
    RowsUpdated,
    RowsDeleted,
    RowsInserted,
    RowsTerminated,
}

impl StatisticName {
    /// Key in the batch statistics JSON and column name of the statistic query
    pub fn as_str(&self) -> &'static str {
        match self {
            StatisticName::IncomingRecordCount => "INCOMING_RECORD_COUNT",
            StatisticName::RowsUpdated => "ROWS_UPDATED",
            StatisticName::RowsDeleted => "ROWS_DELETED",
            StatisticName::RowsInserted => "ROWS_INSERTED",
            StatisticName::RowsTerminated => "ROWS_TERMINATED",
        }
    }
}

impl fmt::Display for StatisticName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
