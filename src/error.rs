//! LeaseKeeper Error Types

use thiserror::Error;

/// Result type alias for LeaseKeeper operations
pub type Result<T> = std::result::Result<T, Error>;

/// LeaseKeeper error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Lock store errors
    #[error("Lock record was modified concurrently (version conflict)")]
    Conflict,

    #[error("Lock record not found")]
    NotFound,

    #[error("Lock store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Lock store rejected credentials: {0}")]
    StoreAuthFailure(String),

    #[error("Malformed lock record: {0}")]
    StoreMalformedRecord(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is retryable at the next election tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Conflict | Error::NotFound | Error::StoreUnavailable(_)
        )
    }

    /// Check if this error means the election loop can never make progress.
    ///
    /// Wrong credentials or an unreadable record will not fix themselves, so
    /// the loop surfaces these instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::StoreAuthFailure(_) | Error::StoreMalformedRecord(_) | Error::Config(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Error::StoreUnavailable(format!("SQLite busy: {}", e))
            }
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::PermissionDenied
                    || err.code == rusqlite::ErrorCode::ReadOnly =>
            {
                Error::StoreAuthFailure(format!("SQLite access denied: {}", e))
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => {
                Error::StoreMalformedRecord(format!("SQLite row: {}", e))
            }
            other => Error::StoreUnavailable(format!("SQLite error: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(Error::Conflict.is_retryable());
        assert!(!Error::Conflict.is_fatal());
        assert!(Error::StoreUnavailable("down".into()).is_retryable());
        assert!(!Error::StoreUnavailable("down".into()).is_fatal());
        assert!(Error::StoreAuthFailure("401".into()).is_fatal());
        assert!(Error::StoreMalformedRecord("bad".into()).is_fatal());
        assert!(!Error::StoreAuthFailure("401".into()).is_retryable());
    }
}
