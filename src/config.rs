use std::env;
use std::path::PathBuf;

/// Storage backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    /// Embedded single-file store; all tenants share tables keyed by source id.
    Sqlite,
    /// Relational server as primary store; one schema per tenant.
    PostgresPrimary,
}

impl BackendMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "POSTGRES_PRIMARY" | "POSTGRES-PRIMARY" | "RELATIONAL_PRIMARY" => {
                BackendMode::PostgresPrimary
            }
            _ => BackendMode::Sqlite,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_mode: BackendMode,

    // Relational backend
    pub database_url: String,
    pub schema_prefix: String,
    pub registry_table: String,
    pub pool_max_size: u32,

    // Embedded backend
    pub sqlite_path: PathBuf,
    pub enable_search_index: bool,

    // Tenant identity
    pub default_source_id: String,
    pub profile_index: Option<String>,
    pub schema_index_guard: bool,
    pub legacy_remap: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env if present; a missing file is not an error.
        let _ = dotenvy::dotenv();

        let backend_mode = BackendMode::parse(
            &env::var("BACKEND_MODE").unwrap_or_else(|_| "sqlite".to_string()),
        );

        // Build database_url from individual fields or use DATABASE_URL if provided
        let database_url = if let Ok(url) = env::var("DATABASE_URL") {
            url
        } else {
            let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
            let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
            let db_name = env::var("DB_NAME").unwrap_or_else(|_| "postgres".to_string());
            let db_user = env::var("DB_USER").unwrap_or_else(|_| "medialib".to_string());
            let db_password = env::var("DB_PASSWORD").unwrap_or_else(|_| "password".to_string());

            // URL-encode password to handle special characters
            let encoded_password = urlencoding::encode(&db_password);

            format!(
                "postgres://{}:{}@{}:{}/{}",
                db_user, encoded_password, db_host, db_port, db_name
            )
        };

        let schema_prefix = env::var("SCHEMA_PREFIX").unwrap_or_else(|_| "media".to_string());

        let registry_table =
            env::var("REGISTRY_TABLE").unwrap_or_else(|_| "source_registry".to_string());

        let pool_max_size = env::var("POOL_MAX_SIZE")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let sqlite_path = env::var("SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/media_store.db"));

        let enable_search_index = parse_bool(env::var("ENABLE_SEARCH_INDEX").ok(), true);

        let default_source_id =
            env::var("DEFAULT_SOURCE_ID").unwrap_or_else(|_| "default".to_string());

        let profile_index = env::var("PROFILE_INDEX")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let schema_index_guard = parse_bool(env::var("SCHEMA_INDEX_GUARD").ok(), true);
        let legacy_remap = parse_bool(env::var("LEGACY_REMAP").ok(), true);

        Ok(Config {
            backend_mode,
            database_url,
            schema_prefix,
            registry_table,
            pool_max_size,
            sqlite_path,
            enable_search_index,
            default_source_id,
            profile_index,
            schema_index_guard,
            legacy_remap,
        })
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_mode_parse() {
        assert_eq!(BackendMode::parse("sqlite"), BackendMode::Sqlite);
        assert_eq!(
            BackendMode::parse("postgres_primary"),
            BackendMode::PostgresPrimary
        );
        assert_eq!(
            BackendMode::parse("  Postgres-Primary "),
            BackendMode::PostgresPrimary
        );
        assert_eq!(BackendMode::parse("anything else"), BackendMode::Sqlite);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool(None, true));
        assert!(!parse_bool(None, false));
        assert!(parse_bool(Some("1".to_string()), false));
        assert!(parse_bool(Some("TRUE".to_string()), false));
        assert!(!parse_bool(Some("0".to_string()), true));
        assert!(!parse_bool(Some("off".to_string()), true));
    }
}
