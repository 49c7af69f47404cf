//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DbError::Duplicate(_))
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for hookci_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => hookci_core::Error::NotFound(msg),
            DbError::Duplicate(msg) => hookci_core::Error::Duplicate(msg),
            DbError::InvalidRecord(msg) => hookci_core::Error::InvalidInput(msg),
            other => hookci_core::Error::Internal(other.to_string()),
        }
    }
}
