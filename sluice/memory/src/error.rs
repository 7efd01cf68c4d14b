use thiserror::Error;

/// Failures of the in-memory executor.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Table {0} does not exist")]
    TableNotFound(String),

    #[error("Table {0} already exists")]
    TableExists(String),

    #[error("Alias {0} is not in scope")]
    UnknownAlias(String),

    #[error("Column {column} is not nullable in table {table}")]
    NotNullable { table: String, column: String },

    #[error("Unbound placeholder {0}")]
    UnboundPlaceholder(String),

    #[error("{0} is not supported here")]
    Unsupported(String),

    #[error("Insert into {table} lists {fields} fields but selects {values} values")]
    ArityMismatch {
        table: String,
        fields: usize,
        values: usize,
    },

    #[error("Cannot {op} {left} and {right}")]
    InvalidArithmetic {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("Failed to read staged file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
