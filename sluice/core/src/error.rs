use crate::executor::ExecutorError;
use crate::ingestor::{DataQualityError, IngestError};
use crate::logical_plan::PlanError;
use crate::templating::TemplateError;

use miette::Diagnostic;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(Box<ValidationError>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Plan(Box<PlanError>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    DataQuality(Box<DataQualityError>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ingest(Box<IngestError>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(Box<TemplateError>),

    /// Executor failures are passed through unmodified
    #[error("Execution failed: {0}")]
    #[diagnostic(code(sluice::execution))]
    Execution(#[source] ExecutorError),
}

/// Invalid ingest mode or datasets, detected before anything is planned or executed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Diagnostic)]
pub enum ValidationError {
    #[error("some of required attributes are not set [{}]", .0.join(", "))]
    #[diagnostic(code(sluice::validation::missing_attributes))]
    MissingAttributes(Vec<String>),

    #[error("Field \"{0}\" does not exist")]
    #[diagnostic(code(sluice::validation::field_not_found))]
    FieldNotFound(String),

    #[error("Field \"{0}\" must be a primary key")]
    #[diagnostic(
        code(sluice::validation::not_primary_key),
        help("Milestoning fields are part of the primary key of the main dataset")
    )]
    NotPrimaryKey(String),

    #[error("Delete indicator [{0}] not found in staging dataset")]
    #[diagnostic(code(sluice::validation::delete_indicator_not_found))]
    DeleteIndicatorNotFound(String),

    #[error("Delete values of delete indicator [{0}] must not be empty")]
    #[diagnostic(code(sluice::validation::empty_delete_values))]
    EmptyDeleteValues(String),

    #[error("Field \"{field}\" is reserved for {purpose} and must not exist in staging dataset")]
    #[diagnostic(
        code(sluice::validation::reserved_field),
        help("Rename the staging field or configure a different field name")
    )]
    ReservedField { field: String, purpose: String },

    #[error("Field \"{field}\" of type \"{data_type}\" cannot be used as {usage}")]
    #[diagnostic(code(sluice::validation::not_orderable))]
    NotOrderable {
        field: String,
        data_type: String,
        usage: String,
    },

    #[error("Field \"{field}\" is defined more than once in {dataset} dataset")]
    #[diagnostic(code(sluice::validation::duplicate_field))]
    DuplicateField { dataset: String, field: String },

    #[error("Primary keys are required for {0} ingest mode")]
    #[diagnostic(code(sluice::validation::no_primary_keys))]
    NoPrimaryKeys(String),

    #[error("Partition spec {spec:?} does not match partition fields {fields:?}")]
    #[diagnostic(code(sluice::validation::partition_spec))]
    PartitionSpecMismatch {
        spec: Vec<String>,
        fields: Vec<String>,
    },

    #[error("{feature} is not supported for {mode} ingest mode")]
    #[diagnostic(code(sluice::validation::unsupported))]
    Unsupported { feature: String, mode: String },

    #[error("{0} is not supported by the sink")]
    #[diagnostic(code(sluice::validation::unsupported_capability))]
    UnsupportedCapability(String),

    #[error("Data split ranges must be ascending and non-overlapping, got {0}")]
    #[diagnostic(
        code(sluice::validation::data_split_order),
        help("Later data splits depend on the effects of earlier ones, apply them in ascending order")
    )]
    DataSplitOrder(String),

    #[error("Invalid external reference for dataset \"{name}\": {reason}")]
    #[diagnostic(code(sluice::validation::external_reference))]
    InvalidExternalReference { name: String, reason: String },

    #[error("Invalid option: {0}")]
    #[diagnostic(code(sluice::validation::option))]
    InvalidOption(String),

    #[error(
        "Field \"{0}\" in staging dataset does not exist in main dataset. Couldn't evolve main dataset's schema"
    )]
    #[diagnostic(
        code(sluice::validation::schema_evolution),
        help("Enable the add_column schema evolution capability")
    )]
    FieldNotInMain(String),

    #[error("Breaking schema change from datatype \"{from}\" to \"{to}\"")]
    #[diagnostic(code(sluice::validation::schema_evolution))]
    BreakingSchemaChange { from: String, to: String },

    #[error("Non-nullable field \"{0}\" does not exist in staging dataset")]
    #[diagnostic(code(sluice::validation::schema_evolution))]
    NonNullableFieldMissing(String),

    #[error("Field \"{field}\" changed from \"{from}\" to \"{to}\" but {capability} is not enabled")]
    #[diagnostic(code(sluice::validation::schema_evolution))]
    SchemaChangeNotAllowed {
        field: String,
        from: String,
        to: String,
        capability: String,
    },
}

impl From<ValidationError> for Error {
    fn from(error: ValidationError) -> Self {
        Error::Validation(Box::new(error))
    }
}

impl From<PlanError> for Error {
    fn from(error: PlanError) -> Self {
        Error::Plan(Box::new(error))
    }
}

impl From<DataQualityError> for Error {
    fn from(error: DataQualityError) -> Self {
        Error::DataQuality(Box::new(error))
    }
}

impl From<IngestError> for Error {
    fn from(error: IngestError) -> Self {
        Error::Ingest(Box::new(error))
    }
}

impl From<TemplateError> for Error {
    fn from(error: TemplateError) -> Self {
        Error::Template(Box::new(error))
    }
}

impl From<ExecutorError> for Error {
    fn from(error: ExecutorError) -> Self {
        Error::Execution(error)
    }
}
