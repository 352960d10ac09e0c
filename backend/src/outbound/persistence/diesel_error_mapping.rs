//! Shared Diesel error classification for the repositories.
//!
//! Each repository maps a [`DieselFailure`] onto its own port error so the
//! domain never sees Diesel types.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::debug;

use super::pool::PoolError;

/// Broad class of a failed Diesel operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DieselFailure {
    /// The connection dropped mid-operation.
    Connection(String),
    /// A unique constraint rejected the write.
    Conflict(String),
    /// A single-row lookup matched nothing.
    NotFound,
    /// Any other query failure.
    Query(String),
}

/// Readable message from a pool error.
pub(crate) fn map_pool_error_message(error: PoolError) -> String {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => message,
    }
}

/// Classify `error`, logging the driver detail at debug level.
pub(crate) fn classify_diesel_error(error: DieselError, operation: &str) -> DieselFailure {
    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), %operation, "diesel operation failed");
        }
        _ => debug!(error = %error, %operation, "diesel operation failed"),
    }

    match error {
        DieselError::NotFound => DieselFailure::NotFound,
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            DieselFailure::Connection("database connection error".to_owned())
        }
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            let constraint = info.constraint_name().unwrap_or("unique constraint");
            DieselFailure::Conflict(format!("{operation} violates {constraint}"))
        }
        DieselError::DatabaseError(_, info) => {
            DieselFailure::Query(format!("{operation}: {}", info.message()))
        }
        DieselError::QueryBuilderError(_) => {
            DieselFailure::Query(format!("{operation}: database query error"))
        }
        other => DieselFailure::Query(format!("{operation}: {other}")),
    }
}

/// Split `rows` into batches that stay under PostgreSQL's bind limit.
pub(crate) fn batches<T>(rows: &[T], columns_per_row: usize) -> std::slice::Chunks<'_, T> {
    const MAX_BIND_PARAMETERS: usize = 65_535;
    rows.chunks((MAX_BIND_PARAMETERS / columns_per_row.max(1)).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn not_found_is_kept_distinct() {
        assert_eq!(
            classify_diesel_error(DieselError::NotFound, "load task"),
            DieselFailure::NotFound
        );
    }

    #[rstest]
    fn rollback_is_a_query_failure() {
        let failure = classify_diesel_error(DieselError::RollbackTransaction, "replace atlas");
        assert!(matches!(failure, DieselFailure::Query(message) if message.starts_with("replace atlas")));
    }

    #[rstest]
    fn pool_messages_are_unwrapped() {
        assert_eq!(
            map_pool_error_message(PoolError::checkout("timed out")),
            "timed out"
        );
    }

    #[rstest]
    #[case(10, 5, 1)]
    #[case(20_000, 5, 2)]
    #[case(3, 0, 1)]
    fn batches_respect_the_bind_limit(
        #[case] rows: usize,
        #[case] columns: usize,
        #[case] expected: usize,
    ) {
        let data = vec![0_u8; rows];
        assert_eq!(batches(&data, columns).count(), expected);
    }
}
