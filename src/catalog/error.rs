//! Error types for catalog access.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Structured classification of catalog database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogDbErrorKind {
    /// The media server holds a lock on the database (`SQLITE_BUSY`/`SQLITE_LOCKED`).
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Expected row was not found.
    RowNotFound,
    /// Column missing or of an unexpected type; the schema is not what we expect.
    Schema,
    /// Filesystem or transport IO failure.
    Io,
    /// Unclassified database failure.
    Other,
}

impl CatalogDbErrorKind {
    /// Classifies an sqlx error.
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::TypeNotFound { .. } => Self::Schema,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for CatalogDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::RowNotFound => "row_not_found",
            Self::Schema => "schema",
            Self::Io => "io",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> CatalogDbErrorKind {
    let code = database_error.code();
    // Extended result codes keep the primary code in the low byte
    // (SQLITE_BUSY_SNAPSHOT = 517, SQLITE_LOCKED_SHAREDCACHE = 262, ...).
    let primary = code
        .as_deref()
        .and_then(|c| c.parse::<i32>().ok())
        .map(|c| c & 0xff);
    if matches!(primary, Some(5 | 6))
        || matches!(code.as_deref(), Some("SQLITE_BUSY" | "SQLITE_LOCKED"))
    {
        return CatalogDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || matches!(primary, Some(19))
    {
        return CatalogDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
    {
        return CatalogDbErrorKind::BusyOrLocked;
    }

    CatalogDbErrorKind::Other
}

/// Errors raised by catalog operations.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// The catalog database file does not exist.
    #[error("catalog database not found at {0}")]
    Missing(PathBuf),

    /// A database operation failed.
    #[error("catalog database error ({kind}): {message}")]
    Database {
        /// Classification used by the lock retry loop.
        kind: CatalogDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },
}

impl CatalogError {
    /// Builds a database error of the given kind.
    #[must_use]
    pub fn database(kind: CatalogDbErrorKind, message: impl Into<String>) -> Self {
        Self::Database {
            kind,
            message: message.into(),
        }
    }

    /// True for the transient "another process holds the write lock" condition.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Database {
                kind: CatalogDbErrorKind::BusyOrLocked,
                ..
            }
        )
    }
}

impl From<sqlx::Error> for CatalogError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database {
            kind: CatalogDbErrorKind::from_sqlx(&error),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_classification() {
        let err = CatalogError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(
            err,
            CatalogError::Database {
                kind: CatalogDbErrorKind::PoolTimeout,
                ..
            }
        ));
        assert!(!err.is_busy());
    }

    #[test]
    fn test_busy_constructor_is_busy() {
        let err = CatalogError::database(CatalogDbErrorKind::BusyOrLocked, "database is locked");
        assert!(err.is_busy());
        assert!(err.to_string().contains("busy_or_locked"));
    }

    #[test]
    fn test_missing_is_not_busy() {
        let err = CatalogError::Missing(PathBuf::from("/x/library.db"));
        assert!(!err.is_busy());
        assert!(err.to_string().contains("/x/library.db"));
    }

    #[test]
    fn test_column_not_found_is_schema() {
        let kind = CatalogDbErrorKind::from_sqlx(&sqlx::Error::ColumnNotFound("hash".into()));
        assert_eq!(kind, CatalogDbErrorKind::Schema);
    }
}
