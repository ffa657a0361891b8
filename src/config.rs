//! Runtime configuration.
//!
//! Values come from an optional JSON file (`config.json`, or the path in
//! `CONFIG_FILE`) and are then overridden by environment variables, so a
//! deployment can ship a file with defaults and inject secrets through the
//! environment.

use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_JWT_SECRET: &str = "default-jwt-secret-change-in-production";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("JWT_SECRET must be set to a unique value in production")]
    InsecureSecret,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Full connection URL; takes precedence over the discrete fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "consultancy_cms".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 3,
            idle_timeout_secs: 300,
        }
    }
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.url.as_ref().map(|_| "[REDACTED]"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl DbConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        if let Some(url) = &self.url {
            return url.parse();
        }
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        Ok(options)
    }
}

/// Credentials accepted by `/api/auth/login` when no database is available.
#[derive(Clone, Deserialize)]
pub struct FallbackAdmin {
    pub username: String,
    pub password_hash: String,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expires_hours: i64,
    pub refresh_token_days: i64,
    pub allow_db_fail: bool,
    pub upload_dir: PathBuf,
    pub allowed_origins: Vec<String>,
    pub site_url: String,
    pub site_title: String,
    pub site_description: String,
    pub login_max_attempts: u32,
    pub login_window_secs: i64,
    pub database: DbConfig,
    pub fallback_admin: Option<FallbackAdmin>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            host: "0.0.0.0".to_string(),
            port: 5000,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            jwt_expires_hours: 24,
            refresh_token_days: 7,
            allow_db_fail: false,
            upload_dir: PathBuf::from("uploads"),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            site_url: "http://localhost:3000".to_string(),
            site_title: "Consultancy Blog".to_string(),
            site_description: "Study abroad news and guides".to_string(),
            login_max_attempts: 10,
            login_window_secs: 15 * 60,
            database: DbConfig::default(),
            fallback_admin: None,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("environment", &self.environment)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("jwt_secret", &"[REDACTED]")
            .field("allow_db_fail", &self.allow_db_fail)
            .field("upload_dir", &self.upload_dir)
            .field("allowed_origins", &self.allowed_origins)
            .field("database", &self.database)
            .field(
                "fallback_admin",
                &self.fallback_admin.as_ref().map(|a| a.username.as_str()),
            )
            .finish()
    }
}

impl AppConfig {
    /// Load the config file (if present) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.json".to_string());
        let mut config = Self::from_file(Path::new(&path))?.unwrap_or_default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file. A missing file is not an error.
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("NODE_ENV") {
            self.environment = v;
        }
        if let Some(v) = lookup("HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = parse_value("PORT", v)?;
        }
        if let Some(v) = lookup("JWT_SECRET") {
            self.jwt_secret = v;
        }
        if let Some(v) = lookup("JWT_EXPIRES_HOURS") {
            self.jwt_expires_hours = parse_value("JWT_EXPIRES_HOURS", v)?;
        }
        if let Some(v) = lookup("ALLOW_DB_FAIL") {
            self.allow_db_fail = parse_flag(&v);
        }
        if let Some(v) = lookup("UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ALLOWED_ORIGINS") {
            self.allowed_origins = v
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }
        if let Some(v) = lookup("SITE_URL") {
            self.site_url = v;
        }

        if let Some(v) = lookup("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Some(v) = lookup("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = lookup("DB_PORT") {
            self.database.port = parse_value("DB_PORT", v)?;
        }
        if let Some(v) = lookup("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = lookup("DB_DATABASE") {
            self.database.database = v;
        }
        if let Some(v) = lookup("DB_POOL_MAX") {
            self.database.max_connections = parse_value("DB_POOL_MAX", v)?;
        }

        if let Some(username) = lookup("ADMIN_USERNAME") {
            let password_hash = match (lookup("ADMIN_PASSWORD_HASH"), lookup("ADMIN_PASSWORD")) {
                (Some(hash), _) => Some(hash),
                (None, Some(plain)) => bcrypt::hash(plain, bcrypt::DEFAULT_COST).ok(),
                (None, None) => None,
            };
            if let Some(password_hash) = password_hash {
                self.fallback_admin = Some(FallbackAdmin {
                    username,
                    password_hash,
                });
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_production() && (self.jwt_secret.is_empty() || self.jwt_secret == DEFAULT_JWT_SECRET)
        {
            return Err(ConfigError::InsecureSecret);
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "port": 4000, "database": { "host": "db.internal", "database": "cms" } }"#,
        )
        .unwrap();

        let mut config = AppConfig::from_file(&path).unwrap().unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.database.host, "db.internal");

        config
            .apply_env(env(&[("PORT", "8080"), ("DB_HOST", "127.0.0.1")]))
            .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.database.host, "127.0.0.1");
        assert_eq!(config.database.database, "cms");
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let result = AppConfig::from_file(Path::new("/definitely/not/here.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let mut config = AppConfig::default();
        let err = config.apply_env(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "PORT", .. }));
    }

    #[test]
    fn test_allow_db_fail_flag() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("ALLOW_DB_FAIL", "true")])).unwrap();
        assert!(config.allow_db_fail);
    }

    #[test]
    fn test_production_rejects_default_secret() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("NODE_ENV", "production")])).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InsecureSecret)));

        config.apply_env(env(&[("JWT_SECRET", "s3cret-value")])).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.jwt_secret = "top-secret".to_string();
        config.database.url = Some("postgres://u:pw@host/db".to_string());
        let printed = format!("{:?}", config);
        assert!(!printed.contains("top-secret"));
        assert!(!printed.contains("pw@host"));
    }
}
