pub mod utilities;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Incident error: {0}")]
    Incident(#[from] IncidentError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Record not found")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("User not found: {0}")]
    UserNotFound(String),
}

#[derive(Debug, Error)]
pub enum IncidentError {
    #[error("Security incident not found: {0}")]
    NotFound(String),

    #[error("Invalid incident metadata: {0}")]
    Metadata(String),
}

impl Error {
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// True for any lookup that failed because the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Storage(StorageError::NotFound)
                | Error::Account(AccountError::UserNotFound(_))
                | Error::Incident(IncidentError::NotFound(_))
        )
    }
}
