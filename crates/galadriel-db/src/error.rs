//! database error types.

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// errors that can occur in datastore operations.
#[derive(Debug, Error)]
pub enum Error {
    /// entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// unique constraint violation.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// foreign key violation, e.g. deleting a referenced row.
    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    /// invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// connection error. may succeed on retry.
    #[error("connection error: {0}")]
    Connection(String),

    /// migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// generic database error.
    #[error("database error: {0}")]
    Database(String),
}

impl Error {
    /// true for errors that may go away on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

impl From<DbErr> for Error {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(msg)) => return Error::AlreadyExists(msg),
            Some(SqlErr::ForeignKeyConstraintViolation(msg)) => return Error::ForeignKey(msg),
            _ => {}
        }

        match &err {
            DbErr::RecordNotFound(msg) => Error::NotFound(msg.clone()),
            DbErr::Conn(e) => Error::Connection(e.to_string()),
            DbErr::ConnectionAcquire(e) => Error::Connection(e.to_string()),
            _ => Error::Database(err.to_string()),
        }
    }
}
