use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Dataset not found: {dataset_id}")]
    DatasetNotFound { dataset_id: String },

    #[error("Unsupported or unreadable file: {message}")]
    Format { message: String },

    #[error("No usable columns: {message}")]
    Schema { message: String },

    #[error("Dataset has no rows: {message}")]
    EmptyDataset { message: String },

    #[error("Query rejected: {message}")]
    UnsafeQuery { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by callers to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Rejected,
    Fatal,
}

impl AnalysisError {
    pub fn format(message: impl Into<String>) -> Self {
        AnalysisError::Format {
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        AnalysisError::Schema {
            message: message.into(),
        }
    }

    pub fn unsafe_query(message: impl Into<String>) -> Self {
        AnalysisError::UnsafeQuery {
            message: message.into(),
        }
    }

    pub fn not_found(dataset_id: &str) -> Self {
        AnalysisError::DatasetNotFound {
            dataset_id: dataset_id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::DatasetNotFound { .. } => ErrorKind::NotFound,
            AnalysisError::Format { .. }
            | AnalysisError::Schema { .. }
            | AnalysisError::EmptyDataset { .. }
            | AnalysisError::Query { .. }
            | AnalysisError::Json(_) => ErrorKind::InvalidInput,
            AnalysisError::UnsafeQuery { .. } => ErrorKind::Rejected,
            AnalysisError::Storage { .. }
            | AnalysisError::Config { .. }
            | AnalysisError::Internal { .. }
            | AnalysisError::Io(_) => ErrorKind::Fatal,
        }
    }

    /// True for faults outside the caller's control (storage down, bad deployment config).
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

impl From<datafusion::error::DataFusionError> for AnalysisError {
    fn from(err: datafusion::error::DataFusionError) -> Self {
        AnalysisError::Query {
            message: err.to_string(),
        }
    }
}

impl From<datafusion::arrow::error::ArrowError> for AnalysisError {
    fn from(err: datafusion::arrow::error::ArrowError) -> Self {
        AnalysisError::Internal {
            message: format!("Arrow error: {}", err),
        }
    }
}

impl From<object_store::Error> for AnalysisError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => AnalysisError::Storage {
                message: format!("Stored file not found: {}", path),
            },
            other => AnalysisError::Storage {
                message: other.to_string(),
            },
        }
    }
}

impl From<diesel::result::Error> for AnalysisError {
    fn from(err: diesel::result::Error) -> Self {
        AnalysisError::Storage {
            message: format!("Database error: {}", err),
        }
    }
}

impl From<tokio::task::JoinError> for AnalysisError {
    fn from(err: tokio::task::JoinError) -> Self {
        AnalysisError::Internal {
            message: format!("Background task failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_domain_errors_as_recoverable() {
        assert_eq!(
            AnalysisError::unsafe_query("DROP").kind(),
            ErrorKind::Rejected
        );
        assert_eq!(AnalysisError::not_found("ds_1").kind(), ErrorKind::NotFound);
        assert!(!AnalysisError::format("bad csv").is_fatal());
        assert!(AnalysisError::Storage {
            message: "down".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn datafusion_errors_surface_verbatim_as_query_errors() {
        let err: AnalysisError =
            datafusion::error::DataFusionError::Plan("No field named nope".to_string()).into();
        match err {
            AnalysisError::Query { message } => assert!(message.contains("No field named nope")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
