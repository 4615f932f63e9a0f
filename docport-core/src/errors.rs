//! Export and import error types
//!
//! A single error enum covers the failure taxonomy of the export/import
//! pipeline. Content-level partial failures (one attachment, one document)
//! never surface here: they are recorded as data on the operation result.
//!
//! # Examples
//!
//! ```rust
//! use docport::errors::PortError;
//!
//! let err = PortError::UnsupportedFormat("rar".to_string());
//! assert!(err.is_client_error());
//! assert_eq!(err.error_code(), "UNSUPPORTED_FORMAT");
//! ```

use thiserror::Error;

/// Export and import operation errors
#[derive(Error, Debug)]
pub enum PortError {
    /// Request is not authenticated
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Document type may not be exported or imported
    #[error("Type '{doc_type}' is not eligible for export or import")]
    Forbidden { doc_type: String },

    /// Bad or missing request input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown archive format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Referenced document, staged import or artifact does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Archive could not be encoded or decoded
    #[error("Archive error: {0}")]
    Archive(String),

    /// Document store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Attachment or artifact storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV parsing/writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Zip container error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PortError {
    /// Check if this is a client error (400-series)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PortError::Unauthorized(_)
                | PortError::Forbidden { .. }
                | PortError::Validation(_)
                | PortError::UnsupportedFormat(_)
                | PortError::NotFound(_)
        )
    }

    /// Check if this is a server error (500-series)
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            PortError::Archive(_)
                | PortError::Store(_)
                | PortError::Storage(_)
                | PortError::Zip(_)
                | PortError::Io(_)
        )
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            PortError::Unauthorized(_) => "UNAUTHORIZED",
            PortError::Forbidden { .. } => "FORBIDDEN",
            PortError::Validation(_) => "VALIDATION_FAILED",
            PortError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            PortError::NotFound(_) => "NOT_FOUND",
            PortError::Archive(_) => "ARCHIVE_ERROR",
            PortError::Store(_) => "STORE_ERROR",
            PortError::Storage(_) => "STORAGE_ERROR",
            PortError::Serialization(_) => "SERIALIZATION_ERROR",
            PortError::Csv(_) => "CSV_ERROR",
            PortError::Zip(_) => "ZIP_ERROR",
            PortError::Io(_) => "IO_ERROR",
        }
    }

    pub(crate) fn archive(err: impl std::fmt::Display) -> Self {
        PortError::Archive(err.to_string())
    }
}

/// Result type alias for export/import operations
pub type PortResult<T> = Result<T, PortError>;
