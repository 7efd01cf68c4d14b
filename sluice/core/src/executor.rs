//! Interfaces to the database: the executor running bound plans and the sink describing
//! what the target dialect supports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sluice_schemas::{DataType, ScalarValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::logical_plan::BoundPlan;

/// Error raised by an executor, propagated to the caller unmodified
pub type ExecutorError = Box<dyn std::error::Error + Send + Sync>;

/// Row-oriented result of a selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TabularData {
    pub rows: Vec<BTreeMap<String, ScalarValue>>,
}

impl TabularData {
    pub fn new(rows: Vec<BTreeMap<String, ScalarValue>>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in the first row
    pub fn first_value(&self, column: &str) -> Option<&ScalarValue> {
        self.rows.first().and_then(|row| row.get(column))
    }
}

/// Runs bound plans against a database.
///
/// Every operation of a plan is executed in order. Executors are driven one call at a time.
#[async_trait]
pub trait Executor: Send {
    async fn execute_physical_plan(&mut self, plan: &BoundPlan) -> Result<(), ExecutorError>;

    /// Executes the plan and returns one result per selection, in order
    async fn execute_physical_plan_and_get_results(
        &mut self,
        plan: &BoundPlan,
    ) -> Result<Vec<TabularData>, ExecutorError>;

    async fn begin(&mut self) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn revert(&mut self) -> Result<(), ExecutorError> {
        Ok(())
    }
}

/// Features a target dialect may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Merge,
    AddColumn,
    ImplicitDataTypeConversion,
    ExplicitDataTypeConversion,
    DataSizingChanges,
    ColumnNullabilityChange,
    BulkLoad,
    DryRun,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Merge => "merge",
            Capability::AddColumn => "add_column",
            Capability::ImplicitDataTypeConversion => "implicit_data_type_conversion",
            Capability::ExplicitDataTypeConversion => "explicit_data_type_conversion",
            Capability::DataSizingChanges => "data_sizing_changes",
            Capability::ColumnNullabilityChange => "column_nullability_change",
            Capability::BulkLoad => "bulk_load",
            Capability::DryRun => "dry_run",
        };
        write!(f, "{name}")
    }
}

/// Identifier case the dialect folds unquoted names to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseFolding {
    #[default]
    Preserve,
    Upper,
    Lower,
}

/// Description of a target dialect consulted by the generator.
pub trait RelationalSink: Send + Sync + fmt::Debug {
    fn capabilities(&self) -> &BTreeSet<Capability>;

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Types a column of type `from` may be widened to without data loss
    fn implicit_conversions(&self, from: DataType) -> BTreeSet<DataType>;

    /// Types a column of type `from` may be converted to by an explicit cast
    fn explicit_conversions(&self, from: DataType) -> BTreeSet<DataType>;

    fn case_folding(&self) -> CaseFolding {
        CaseFolding::Preserve
    }
}

/// Configurable sink with ANSI SQL conversions.
///
/// # Examples
///
/// ```
/// use sluice_core::executor::{AnsiSink, Capability, RelationalSink};
///
/// let sink = AnsiSink::default();
/// assert!(sink.supports(Capability::Merge));
///
/// let sink = AnsiSink::default().without(Capability::Merge);
/// assert!(!sink.supports(Capability::Merge));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AnsiSink {
    capabilities: BTreeSet<Capability>,
    case_folding: CaseFolding,
}

impl Default for AnsiSink {
    fn default() -> Self {
        Self {
            capabilities: BTreeSet::from([
                Capability::Merge,
                Capability::AddColumn,
                Capability::ImplicitDataTypeConversion,
                Capability::DataSizingChanges,
                Capability::ColumnNullabilityChange,
                Capability::BulkLoad,
                Capability::DryRun,
            ]),
            case_folding: CaseFolding::Preserve,
        }
    }
}

impl AnsiSink {
    pub fn new(capabilities: BTreeSet<Capability>) -> Self {
        Self {
            capabilities,
            case_folding: CaseFolding::Preserve,
        }
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.capabilities.remove(&capability);
        self
    }

    pub fn with_case_folding(mut self, case_folding: CaseFolding) -> Self {
        self.case_folding = case_folding;
        self
    }
}

impl RelationalSink for AnsiSink {
    fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    fn implicit_conversions(&self, from: DataType) -> BTreeSet<DataType> {
        use DataType::*;

        let targets: &[DataType] = match from {
            TinyInt => &[SmallInt, Int, BigInt, Decimal, Float, Double],
            SmallInt => &[Int, BigInt, Decimal, Float, Double],
            Int => &[BigInt, Decimal, Double],
            BigInt => &[Decimal, Double],
            Float => &[Double],
            Decimal => &[Double],
            Char => &[Varchar, String],
            Varchar => &[String],
            Date => &[Timestamp, DateTime],
            Timestamp => &[DateTime, TimestampTz],
            DateTime => &[Timestamp],
            _ => &[],
        };
        targets.iter().copied().collect()
    }

    fn explicit_conversions(&self, from: DataType) -> BTreeSet<DataType> {
        use DataType::*;

        let targets: &[DataType] = match from {
            Double => &[Float, Decimal, BigInt],
            BigInt => &[Int],
            Int => &[SmallInt],
            String | Varchar => &[Char, Varchar],
            Timestamp | DateTime => &[Date],
            _ => &[],
        };
        let mut conversions: BTreeSet<DataType> = targets.iter().copied().collect();
        if from.is_numeric() || from.is_temporal() {
            conversions.insert(Varchar);
            conversions.insert(String);
        }
        conversions
    }

    fn case_folding(&self) -> CaseFolding {
        self.case_folding
    }
}
