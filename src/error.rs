use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid SQL identifier: {name:?}")]
    InvalidIdentifier { name: String },

    #[error("no schema mapping for source_id={source_id}")]
    SchemaNotMapped { source_id: String },

    #[error(
        "schema index guard blocked request: schema {schema:?} is profile #{found}, \
         but expected profile #{expected} for source_id={source_id:?}"
    )]
    SchemaIndexMismatch {
        source_id: String,
        schema: String,
        expected: u32,
        found: u32,
    },

    #[error("mapped schema {schema:?} for source_id={source_id} does not match the expected layout")]
    LegacySchemaLayout { source_id: String, schema: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("connection failed to {backend}: {cause}")]
    ConnectionFailed { backend: String, cause: String },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("sqlite pool error: {0}")]
    SqlitePool(#[from] r2d2::Error),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error("postgres pool error: {0}")]
    PostgresPool(#[from] deadpool_postgres::PoolError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Tenant-identity and request errors are the caller's fault and map to a
    /// 4xx-equivalent response; everything else is a server fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidIdentifier { .. }
                | StoreError::SchemaNotMapped { .. }
                | StoreError::SchemaIndexMismatch { .. }
                | StoreError::LegacySchemaLayout { .. }
                | StoreError::InvalidRequest { .. }
        )
    }
}

impl From<deadpool_postgres::CreatePoolError> for StoreError {
    fn from(err: deadpool_postgres::CreatePoolError) -> Self {
        StoreError::ConnectionFailed {
            backend: "postgres".to_string(),
            cause: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(StoreError::SchemaNotMapped {
            source_id: "never-seen".to_string()
        }
        .is_client_error());
        assert!(StoreError::InvalidIdentifier {
            name: "sx;DROP SCHEMA public".to_string()
        }
        .is_client_error());
        assert!(!StoreError::Internal("boom".to_string()).is_client_error());
        assert!(!StoreError::ConnectionFailed {
            backend: "postgres".to_string(),
            cause: "refused".to_string()
        }
        .is_client_error());
    }
}
