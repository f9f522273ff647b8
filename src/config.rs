use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub schema: SchemaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix for the entity routes, e.g. `/rest`.
    pub base_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `file` or `postgres`.
    pub backend: String,
    /// Data directory for the file backend.
    pub data_dir: String,
    pub connection_string: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret. No fallback: refusing to start beats
    /// running with a guessable default.
    pub jwt_secret: Option<String>,
    /// Static API keys mapped to user names, for non-interactive
    /// clients that cannot run the login flow.
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Path to the entity schema document.
    pub document: String,
    /// Optional JSON file with bootstrap rows, applied to empty tables.
    pub seed_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_path: "/rest".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            data_dir: "data".to_string(),
            connection_string: None,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            document: "openapi.json".to_string(),
            seed_file: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `config` file and
    /// `CRUDCAST_*` environment variables, in increasing precedence.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);
        config = config.add_source(config::File::with_name("config").required(false));
        config = config.add_source(
            config::Environment::with_prefix("CRUDCAST")
                .separator("__")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// The JWT signing secret. Mandatory: startup fails without it.
    pub fn jwt_secret(&self) -> anyhow::Result<String> {
        if let Some(secret) = &self.auth.jwt_secret {
            if !secret.is_empty() {
                return Ok(secret.clone());
            }
        }

        if let Ok(secret) = std::env::var("JWT_SECRET") {
            if !secret.is_empty() {
                return Ok(secret);
            }
        }

        anyhow::bail!("no JWT secret configured; set CRUDCAST_AUTH__JWT_SECRET or JWT_SECRET")
    }

    pub fn database_url(&self) -> anyhow::Result<String> {
        if let Some(connection_string) = &self.storage.connection_string {
            return Ok(connection_string.clone());
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            return Ok(url);
        }

        anyhow::bail!("postgres backend selected but no connection string configured")
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_the_file_backend() {
        let config = AppConfig::default();
        assert_eq!(config.storage.backend, "file");
        assert_eq!(config.server.base_path, "/rest");
    }

    #[test]
    fn explicit_jwt_secret_wins_over_nothing() {
        let with_secret = AppConfig {
            auth: AuthConfig {
                jwt_secret: Some("s3cret".to_string()),
                ..AuthConfig::default()
            },
            ..AppConfig::default()
        };
        assert_eq!(with_secret.jwt_secret().unwrap(), "s3cret");

        let empty = AppConfig {
            auth: AuthConfig {
                jwt_secret: Some(String::new()),
                ..AuthConfig::default()
            },
            ..AppConfig::default()
        };
        if std::env::var("JWT_SECRET").is_err() {
            assert!(empty.jwt_secret().is_err());
        }
    }
}
