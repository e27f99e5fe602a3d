//! Storage error handling
//!
//! Typed errors for the local store with descriptive messages, a transient vs
//! fatal classification used by the open-retry loop, and recovery suggestions.

use std::io;
use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during local storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create data directory
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to remove a store file
    #[error("Failed to remove '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Database is locked or busy in another connection
    #[error("Database '{path}' is locked: {source}")]
    Locked {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Database could not be opened at all
    #[error("Cannot open database '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A row with the same id already exists
    #[error("Duplicate id '{id}' in collection '{collection}'")]
    DuplicateId { collection: &'static str, id: String },

    /// A stored value could not be decoded
    #[error("Invalid value in '{collection}.{column}': {details}")]
    InvalidValue {
        collection: &'static str,
        column: &'static str,
        details: String,
    },

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                path,
                source: error,
            },
            _ if is_disk_full_error(&error) => StorageError::DiskFull {
                path,
                source: error,
            },
            _ => StorageError::RemoveFile {
                path,
                source: error,
            },
        }
    }

    /// Classify an error raised while opening the database
    pub fn from_open(error: rusqlite::Error, path: PathBuf) -> Self {
        match error.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StorageError::Locked {
                    path,
                    source: error,
                }
            }
            Some(ErrorCode::CannotOpen) | Some(ErrorCode::SystemIoFailure) => StorageError::Open {
                path,
                source: error,
            },
            _ => StorageError::Database(error),
        }
    }

    /// Whether retrying the operation may succeed
    ///
    /// Lock contention and I/O hiccups are transient; anything else (corrupt
    /// file, schema errors, permission problems) is fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Locked { .. } | StorageError::Open { .. } => true,
            StorageError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            StorageError::Database(e) => matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::DiskFull { .. } => Some("Free up disk space and try again."),
            StorageError::PermissionDenied { .. } => {
                Some("Check file and directory permissions for the data directory.")
            }
            StorageError::Locked { .. } => {
                Some("Another process is using the database. Close it and try again.")
            }
            StorageError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_error(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_permission_denied_classification() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StorageError::from_io(io_err, PathBuf::from("/test/path"));

        assert!(matches!(err, StorageError::PermissionDenied { .. }));
        assert!(!err.is_transient());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_disk_full_detection() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = StorageError::from_io(io_err, PathBuf::from("/full/disk"));

        assert!(matches!(err, StorageError::DiskFull { .. }));
    }

    #[test]
    fn test_busy_is_transient() {
        let err = StorageError::from_open(
            sqlite_error(rusqlite::ffi::SQLITE_BUSY),
            PathBuf::from("/data/taskly.db"),
        );
        assert!(matches!(err, StorageError::Locked { .. }));
        assert!(err.is_transient());
        assert!(err.to_string().contains("locked"));
    }

    #[test]
    fn test_not_a_database_is_fatal() {
        let err = StorageError::from_open(
            sqlite_error(rusqlite::ffi::SQLITE_NOTADB),
            PathBuf::from("/data/taskly.db"),
        );
        assert!(matches!(err, StorageError::Database(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_duplicate_id_display() {
        let err = StorageError::DuplicateId {
            collection: "tasks",
            id: "abc".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tasks"));
        assert!(msg.contains("abc"));
    }
}
