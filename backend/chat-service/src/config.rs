use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    pub property_service_url: String,
    pub profile_service_url: String,
    pub blob_service_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub database_max_connections: usize,
    pub redis_url: Option<String>,
    pub port: u16,
    pub jwt_public_key_pem: String,
    pub channel_private_key_pem: String,
    pub channel_public_key_pem: String,
    pub channel_token_ttl_secs: i64,
    pub collaborators: CollaboratorConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = match non_empty("CHAT_STORE").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "CHAT_STORE must be postgres or memory, got {other}"
                )))
            }
        };

        let database_url = non_empty("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config("DATABASE_URL missing".into()));
        }

        let database_max_connections = parse_or(&non_empty, "DATABASE_MAX_CONNECTIONS", 16)?;
        let port = parse_or(&non_empty, "PORT", 8080)?;
        let channel_token_ttl_secs: i64 = parse_or(&non_empty, "CHANNEL_TOKEN_TTL_SECS", 3600)?;
        if channel_token_ttl_secs <= 0 {
            return Err(AppError::Config(
                "CHANNEL_TOKEN_TTL_SECS must be positive".into(),
            ));
        }
        let timeout_ms: u64 = parse_or(&non_empty, "COLLABORATOR_TIMEOUT_MS", 5000)?;

        let jwt_public_key_pem = load_pem(&non_empty, "JWT_PUBLIC_KEY")?;
        let channel_private_key_pem = load_pem(&non_empty, "CHANNEL_TOKEN_PRIVATE_KEY")?;
        let channel_public_key_pem = load_pem(&non_empty, "CHANNEL_TOKEN_PUBLIC_KEY")?;

        let required = |key: &str| {
            non_empty(key)
                .map(|v| v.trim_end_matches('/').to_string())
                .ok_or_else(|| AppError::Config(format!("{key} missing")))
        };

        let collaborators = CollaboratorConfig {
            property_service_url: required("PROPERTY_SERVICE_URL")?,
            profile_service_url: required("PROFILE_SERVICE_URL")?,
            blob_service_url: required("BLOB_SERVICE_URL")?,
            timeout: Duration::from_millis(timeout_ms),
        };

        Ok(Self {
            store,
            database_url,
            database_max_connections,
            redis_url: non_empty("REDIS_URL"),
            port,
            jwt_public_key_pem,
            channel_private_key_pem,
            channel_public_key_pem,
            channel_token_ttl_secs,
            collaborators,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} is not a valid value: {raw}"))),
    }
}

/// Reads `<PREFIX>_PEM`, falling back to the file named by `<PREFIX>_FILE`.
fn load_pem<F>(lookup: &F, prefix: &str) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let pem_key = format!("{prefix}_PEM");
    let file_key = format!("{prefix}_FILE");

    if let Some(pem) = lookup(&pem_key) {
        return Ok(pem.replace("\\n", "\n"));
    }
    match lookup(&file_key) {
        Some(path) => fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("{file_key} ({path}): {e}"))),
        None => Err(AppError::Config(format!("{pem_key} or {file_key} required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://chat@localhost/chat"),
            ("JWT_PUBLIC_KEY_PEM", "identity-pub"),
            ("CHANNEL_TOKEN_PRIVATE_KEY_PEM", "channel-priv"),
            ("CHANNEL_TOKEN_PUBLIC_KEY_PEM", "channel-pub"),
            ("PROPERTY_SERVICE_URL", "http://property:8080/"),
            ("PROFILE_SERVICE_URL", "http://identity:8080"),
            ("BLOB_SERVICE_URL", "http://blobs:8080"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, AppError> {
        Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&base()).unwrap();
        assert_eq!(cfg.store, StoreBackend::Postgres);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.database_max_connections, 16);
        assert_eq!(cfg.channel_token_ttl_secs, 3600);
        assert_eq!(cfg.collaborators.timeout, Duration::from_millis(5000));
        assert!(cfg.redis_url.is_none());
        assert_eq!(cfg.collaborators.property_service_url, "http://property:8080");
    }

    #[test]
    fn postgres_requires_database_url() {
        let mut vars = base();
        vars.remove("DATABASE_URL");
        assert!(matches!(load(&vars), Err(AppError::Config(_))));

        vars.insert("CHAT_STORE", "memory");
        let cfg = load(&vars).unwrap();
        assert_eq!(cfg.store, StoreBackend::Memory);
    }

    #[test]
    fn malformed_values_fail() {
        let mut vars = base();
        vars.insert("PORT", "eighty");
        assert!(matches!(load(&vars), Err(AppError::Config(_))));

        let mut vars = base();
        vars.insert("CHAT_STORE", "mongo");
        assert!(load(&vars).is_err());

        let mut vars = base();
        vars.insert("CHANNEL_TOKEN_TTL_SECS", "0");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn key_material_is_required() {
        let mut vars = base();
        vars.remove("CHANNEL_TOKEN_PRIVATE_KEY_PEM");
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("CHANNEL_TOKEN_PRIVATE_KEY_PEM"));
    }

    #[test]
    fn escaped_newlines_in_pem_are_expanded() {
        let mut vars = base();
        vars.insert("JWT_PUBLIC_KEY_PEM", "line1\\nline2");
        let cfg = load(&vars).unwrap();
        assert_eq!(cfg.jwt_public_key_pem, "line1\nline2");
    }
}
