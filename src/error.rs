//! Error types for gsync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=store, 3=not_found, 4=validation, etc.)
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

use crate::sync::graph::DependencyError;

/// Result type alias for gsync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Store (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,
    ReadOnlyStore,

    // Not Found (exit 3)
    RecordNotFound,

    // Validation (exit 4)
    InvalidArgument,
    InvalidId,
    UnknownProperty,
    PropertyTypeMismatch,
    RecordTypeMismatch,
    DuplicateRecord,

    // Dependency (exit 5)
    OwnershipCycle,
    DepthLimitExceeded,

    // Sync (exit 6)
    Cancelled,

    // Config (exit 7)
    ConfigError,
    UnknownMatchStrategy,
    UnknownResolver,
    UnknownRecordType,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ReadOnlyStore => "READ_ONLY_STORE",
            Self::RecordNotFound => "RECORD_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidId => "INVALID_ID",
            Self::UnknownProperty => "UNKNOWN_PROPERTY",
            Self::PropertyTypeMismatch => "PROPERTY_TYPE_MISMATCH",
            Self::RecordTypeMismatch => "RECORD_TYPE_MISMATCH",
            Self::DuplicateRecord => "DUPLICATE_RECORD",
            Self::OwnershipCycle => "OWNERSHIP_CYCLE",
            Self::DepthLimitExceeded => "DEPTH_LIMIT_EXCEEDED",
            Self::Cancelled => "CANCELLED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::UnknownMatchStrategy => "UNKNOWN_MATCH_STRATEGY",
            Self::UnknownResolver => "UNKNOWN_RESOLVER",
            Self::UnknownRecordType => "UNKNOWN_RECORD_TYPE",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::DatabaseError
            | Self::ReadOnlyStore => 2,
            Self::RecordNotFound => 3,
            Self::InvalidArgument
            | Self::InvalidId
            | Self::UnknownProperty
            | Self::PropertyTypeMismatch
            | Self::RecordTypeMismatch
            | Self::DuplicateRecord => 4,
            Self::OwnershipCycle | Self::DepthLimitExceeded => 5,
            Self::Cancelled => 6,
            Self::ConfigError
            | Self::UnknownMatchStrategy
            | Self::UnknownResolver
            | Self::UnknownRecordType => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether retrying with corrected input can succeed.
    ///
    /// True for argument and configuration mistakes. False for store,
    /// dependency, I/O or internal errors.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument
                | Self::InvalidId
                | Self::UnknownMatchStrategy
                | Self::UnknownResolver
                | Self::UnknownRecordType
                | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in gsync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Store not found at {path}")]
    NotInitialized { path: PathBuf },

    #[error("Store already exists at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("Store is opened read-only")]
    ReadOnlyStore,

    #[error("Record not found: {id}")]
    RecordNotFound { id: String },

    #[error("Record already exists: {id}")]
    DuplicateRecord { id: String },

    #[error("Unknown property '{property}' for record type {record_type}")]
    UnknownProperty {
        record_type: String,
        property: String,
    },

    #[error("Property '{property}' of {record_type} expects {expected}")]
    PropertyType {
        record_type: String,
        property: String,
        expected: &'static str,
    },

    #[error("Cannot compare a {source_type} with a {target_type}")]
    TypeMismatch {
        source_type: String,
        target_type: String,
    },

    #[error("Unknown match strategy: {0}")]
    UnknownMatchStrategy(String),

    #[error("Unknown conflict resolver: {0}")]
    UnknownResolver(String),

    #[error("Unknown record type: {0}")]
    UnknownRecordType(String),

    #[error("Invalid record id: {0}")]
    InvalidId(#[from] uuid::Error),

    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid line {line} in {path}: {message}")]
    InvalidLine {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized { .. } => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::ReadOnlyStore => ErrorCode::ReadOnlyStore,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            Self::DuplicateRecord { .. } => ErrorCode::DuplicateRecord,
            Self::UnknownProperty { .. } => ErrorCode::UnknownProperty,
            Self::PropertyType { .. } => ErrorCode::PropertyTypeMismatch,
            Self::TypeMismatch { .. } => ErrorCode::RecordTypeMismatch,
            Self::UnknownMatchStrategy(_) => ErrorCode::UnknownMatchStrategy,
            Self::UnknownResolver(_) => ErrorCode::UnknownResolver,
            Self::UnknownRecordType(_) => ErrorCode::UnknownRecordType,
            Self::InvalidId(_) => ErrorCode::InvalidId,
            Self::Dependency(DependencyError::OwnershipCycle { .. }) => ErrorCode::OwnershipCycle,
            Self::Dependency(DependencyError::DepthLimit { .. }) => ErrorCode::DepthLimitExceeded,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) | Self::InvalidLine { .. } => ErrorCode::JsonError,
            Self::FileNotFound(_) => ErrorCode::IoError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether this error is a configuration error (fatal, never retried mid-run).
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        self.error_code().exit_code() == 7
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized { path } => Some(format!(
                "No store at {}. Run `gsync init {}` to create an empty one.",
                path.display(),
                path.display()
            )),

            Self::AlreadyInitialized { path } => Some(format!(
                "{} already exists. Use `--force` to recreate it.",
                path.display()
            )),

            Self::ReadOnlyStore => Some(
                "The source store is never written. Check that --source and --target are not swapped."
                    .to_string(),
            ),

            Self::UnknownMatchStrategy(_) => Some(
                "Valid strategies: identity, field:<f1,f2>, field-ci:<f1,f2>, hybrid:<f1,f2>"
                    .to_string(),
            ),

            Self::UnknownResolver(_) => Some(
                "Valid resolvers: source-wins, target-wins, newest-wins, field-merge, manual"
                    .to_string(),
            ),

            Self::UnknownRecordType(_) => {
                Some("Valid record types: entry, sense, example, tag".to_string())
            }

            Self::InvalidId(_) => {
                Some("Record ids are UUIDs, e.g. 1b4e28ba-2fa1-11d2-883f-0016d3cca427".to_string())
            }

            Self::Dependency(DependencyError::OwnershipCycle { .. }) => Some(
                "Ownership must form a tree. Inspect the owner links of the listed records."
                    .to_string(),
            ),

            Self::Dependency(DependencyError::DepthLimit { .. }) => {
                Some("Raise --max-depth or drop --strict-depth to import a partial subtree.".to_string())
            }

            Self::InvalidArgument(msg) => {
                if msg.contains("policy") {
                    Some("Field policies look like `gloss=source`, `note=newest` or `name=target`".to_string())
                } else if msg.contains("timestamp") {
                    Some("Timestamps accept RFC 3339 (2025-01-20T10:00:00Z) or a date (2025-01-20)".to_string())
                } else {
                    None
                }
            }

            Self::RecordNotFound { .. }
            | Self::DuplicateRecord { .. }
            | Self::UnknownProperty { .. }
            | Self::PropertyType { .. }
            | Self::TypeMismatch { .. }
            | Self::Cancelled
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::FileNotFound(_)
            | Self::InvalidLine { .. }
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_exit_seven() {
        let err = Error::UnknownMatchStrategy("fuzzy".to_string());
        assert_eq!(err.exit_code(), 7);
        assert!(err.is_configuration());
        assert!(err.hint().unwrap().contains("hybrid"));
    }

    #[test]
    fn test_structured_json() {
        let err = Error::RecordNotFound {
            id: "abc".to_string(),
        };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "RECORD_NOT_FOUND");
        assert_eq!(json["error"]["exit_code"], 3);
        assert!(json["error"].get("hint").is_none());
    }

    #[test]
    fn test_dependency_error_codes() {
        let err = Error::Dependency(DependencyError::OwnershipCycle {
            chain: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        });
        assert_eq!(err.error_code(), ErrorCode::OwnershipCycle);
        assert_eq!(err.exit_code(), 5);
        assert!(!err.is_configuration());
    }
}
