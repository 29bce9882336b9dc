//! Error types shared by configuration and persistence.

/// Configuration resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration '{key}': {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence failures surfaced to store callers.
///
/// Zero-rows-affected writes are not errors; the store reports them through
/// its `bool` return values instead.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Pool construction, connection establishment, or checkout failed.
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(String),

    /// Foreign-key, unique, not-null, or check constraint violation.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Caller-supplied value rejected before reaching the database.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("migration failed: {0}")]
    Migration(String),
}

/// Render a server-reported error as `SQLSTATE: message (constraint)`.
#[cfg(any(feature = "postgres", test))]
fn format_db_error(code: &str, message: &str, constraint: Option<&str>) -> String {
    match constraint {
        Some(name) => format!("{code}: {message} ({name})"),
        None => format!("{code}: {message}"),
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DatabaseError {
    fn from(err: tokio_postgres::Error) -> Self {
        // tokio-postgres displays server errors as a bare "db error"; keep the
        // SQLSTATE and the server's message instead.
        if let Some(db) = err.as_db_error() {
            let code = db.code().code();
            let detail = format_db_error(code, db.message(), db.constraint());
            // SQLSTATE class 23 is "integrity constraint violation".
            if code.starts_with("23") {
                return Self::Constraint(detail);
            }
            return Self::Query(detail);
        }
        if err.is_closed() {
            return Self::Pool(err.to_string());
        }
        Self::Query(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<refinery::Error> for DatabaseError {
    fn from(err: refinery::Error) -> Self {
        Self::Migration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, DatabaseError, format_db_error};

    #[test]
    fn config_error_messages_name_the_key() {
        let err = ConfigError::InvalidValue {
            key: "DATABASE_POOL_SIZE".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for 'DATABASE_POOL_SIZE': must be at least 1"
        );

        let err = ConfigError::MissingRequired {
            key: "DATABASE_URL".to_string(),
            hint: "set it in the environment or .env".to_string(),
        };
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn server_errors_keep_sqlstate_and_message() {
        let detail = format_db_error(
            "22021",
            "invalid byte sequence for encoding \"UTF8\": 0x00",
            None,
        );
        assert_eq!(
            detail,
            "22021: invalid byte sequence for encoding \"UTF8\": 0x00"
        );

        let detail = format_db_error(
            "23503",
            "insert or update on table \"tasks\" violates foreign key constraint",
            Some("tasks_author_id_fkey"),
        );
        assert!(detail.starts_with("23503: "), "unexpected detail: {detail}");
        assert!(
            detail.ends_with("(tasks_author_id_fkey)"),
            "unexpected detail: {detail}"
        );
    }

    #[test]
    fn invalid_input_names_the_rejected_value() {
        let err = DatabaseError::InvalidInput("tag name cannot be empty".to_string());
        assert_eq!(err.to_string(), "invalid input: tag name cannot be empty");
    }

    #[test]
    fn database_error_messages_keep_detail() {
        let err = DatabaseError::Constraint("tasks_author_id_fkey".to_string());
        assert_eq!(
            err.to_string(),
            "constraint violation: tasks_author_id_fkey"
        );
    }
}
