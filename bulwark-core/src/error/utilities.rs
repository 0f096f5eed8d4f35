use crate::{
    Error,
    error::{StorageError, ValidationError},
};

/// Extension trait for mapping backend errors into [`StorageError::Database`].
///
/// ```rust,ignore
/// use bulwark_core::error::utilities::DatabaseResultExt;
///
/// query.execute(&pool).await.map_db_err_with_context("Failed to lock account")?;
/// ```
pub trait DatabaseResultExt<T> {
    fn map_db_err(self) -> Result<T, Error>;

    fn map_db_err_with_context(self, context: &str) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> DatabaseResultExt<T> for Result<T, E> {
    fn map_db_err(self) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(e.to_string())))
    }

    fn map_db_err_with_context(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(format!("{context}: {e}"))))
    }
}

/// Extension trait turning a missing builder field into [`ValidationError::MissingField`].
pub trait RequiredFieldExt<T> {
    fn require_field(self, field_name: &str) -> Result<T, ValidationError>;
}

impl<T> RequiredFieldExt<T> for Option<T> {
    fn require_field(self, field_name: &str) -> Result<T, ValidationError> {
        self.ok_or_else(|| ValidationError::MissingField(format!("{field_name} is required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_result_ext_with_context() {
        let error_result: Result<i32, &str> = Err("disk I/O error");
        match error_result.map_db_err_with_context("Failed to lock account") {
            Err(Error::Storage(StorageError::Database(msg))) => {
                assert_eq!(msg, "Failed to lock account: disk I/O error");
            }
            other => panic!("Expected storage database error, got {other:?}"),
        }
    }

    #[test]
    fn test_required_field_ext() {
        assert_eq!(Some("alice").require_field("Username").unwrap(), "alice");

        let none_value: Option<String> = None;
        match none_value.require_field("Username") {
            Err(ValidationError::MissingField(msg)) => assert_eq!(msg, "Username is required"),
            other => panic!("Expected missing field error, got {other:?}"),
        }
    }
}
