//! Error types for pgdict

use thiserror::Error;

/// Result type alias for pgdict operations
pub type DictResult<T> = Result<T, DictError>;

/// Error types for type resolution, batching and execution
#[derive(Debug, Error)]
pub enum DictError {
    /// No direct, prefix, suffix or typed rule matched the column
    #[error("Unresolved type for column '{column}'")]
    UnresolvedType { column: String },

    /// A record's column set differs from the one the batch was started with
    #[error("Batch schema mismatch: expected columns {expected:?}, found {found:?}")]
    BatchSchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// A single-record insert failed
    #[error("Insert into '{table}' failed (columns {columns:?}): {source}")]
    Insert {
        table: String,
        columns: Vec<String>,
        #[source]
        source: Box<DictError>,
    },

    /// A batch flush failed; the batch is left untouched
    #[error("Batch execution on '{table}' failed ({rows} rows, columns {columns:?}): {source}")]
    Execution {
        table: String,
        columns: Vec<String>,
        rows: usize,
        #[source]
        source: Box<DictError>,
    },

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// Invalid identifier, record or option
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// The executor does not provide the requested capability
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl DictError {
    /// Create an unresolved type error for a column
    pub fn unresolved(column: impl Into<String>) -> Self {
        Self::UnresolvedType {
            column: column.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if this is an unresolved type error
    pub fn is_unresolved_type(&self) -> bool {
        matches!(self, Self::UnresolvedType { .. })
    }

    /// Check if this is a batch schema mismatch
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::BatchSchemaMismatch { .. })
    }

    /// Check if this is a unique violation, looking through insert/execution wrappers
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::UniqueViolation(_) => true,
            Self::Insert { source, .. } | Self::Execution { source, .. } => {
                source.is_unique_violation()
            }
            _ => false,
        }
    }

    /// Parse a tokio_postgres error into a more specific DictError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{}: {}", constraint, message)),
                "23503" => {
                    return Self::ForeignKeyViolation(format!("{}: {}", constraint, message));
                }
                "23514" => return Self::CheckViolation(format!("{}: {}", constraint, message)),
                _ => {}
            }
        }
        if err.is_closed() {
            return Self::Connection(err.to_string());
        }
        Self::Query(err)
    }
}

impl From<toml::de::Error> for DictError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
