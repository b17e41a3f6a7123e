//! Error types for metadata cache operations.

use std::fmt;

use thiserror::Error;

/// Structured classification for metadata database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Filesystem or transport IO failure.
    Io,
    /// Unclassified database failure.
    Other,
}

impl CacheDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for CacheDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::Io => "io",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(error: &dyn sqlx::error::DatabaseError) -> CacheDbErrorKind {
    if matches!(
        error.kind(),
        sqlx::error::ErrorKind::UniqueViolation
            | sqlx::error::ErrorKind::ForeignKeyViolation
            | sqlx::error::ErrorKind::NotNullViolation
            | sqlx::error::ErrorKind::CheckViolation
    ) {
        return CacheDbErrorKind::ConstraintViolation;
    }

    // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
    let busy_or_locked = error
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6));
    if busy_or_locked {
        CacheDbErrorKind::BusyOrLocked
    } else {
        CacheDbErrorKind::Other
    }
}

/// Errors that can occur while reading or writing cache metadata.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing database rejected or failed the operation.
    #[error("metadata cache database error ({kind}): {source}")]
    Database {
        /// Structured failure classification.
        kind: CacheDbErrorKind,
        /// The underlying driver error.
        #[source]
        source: sqlx::Error,
    },
}

impl CacheError {
    /// Returns the database failure classification.
    #[must_use]
    pub fn kind(&self) -> CacheDbErrorKind {
        match self {
            Self::Database { kind, .. } => *kind,
        }
    }
}

impl From<sqlx::Error> for CacheError {
    fn from(source: sqlx::Error) -> Self {
        Self::Database {
            kind: CacheDbErrorKind::from_sqlx(&source),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_from_pool_closed() {
        let error = CacheError::from(sqlx::Error::PoolClosed);
        assert_eq!(error.kind(), CacheDbErrorKind::PoolClosed);
        assert!(error.to_string().contains("pool_closed"));
    }

    #[test]
    fn test_cache_error_from_pool_timeout() {
        let error = CacheError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(error.kind(), CacheDbErrorKind::PoolTimeout);
    }

    #[test]
    fn test_cache_error_other_for_row_not_found() {
        let error = CacheError::from(sqlx::Error::RowNotFound);
        assert_eq!(error.kind(), CacheDbErrorKind::Other);
    }
}
