//! Configuration loader with layered sources.

use crate::AppConfig;
use config::{Config, ConfigError, Environment, File};
use depot_core::{DepotError, DepotResult};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

/// Environment variable selecting the environment-specific file.
pub const ENVIRONMENT_VAR: &str = "DEPOT_ENVIRONMENT";

/// Configuration loader with layered sources.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    app: AppConfig,
    raw: Config,
    config_dir: String,
    environment: String,
    files: Vec<String>,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Untracked local overrides
    /// 4. Environment variables with `DEPOT__` prefix (`DEPOT__DATABASE__URL`)
    pub fn new(config_dir: impl Into<String>) -> DepotResult<Self> {
        let config_dir = config_dir.into();
        let environment =
            std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string());
        let (raw, files) = Self::build(&config_dir, &environment)?;

        let app: AppConfig = raw.clone().try_deserialize().map_err(config_error)?;
        Self::validate(&app)?;

        Ok(Self {
            app,
            raw,
            config_dir,
            environment,
            files,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> DepotResult<Self> {
        Self::new("./config")
    }

    /// Returns the application configuration.
    #[must_use]
    pub fn get(&self) -> &AppConfig {
        &self.app
    }

    /// Returns the directory the configuration was loaded from.
    #[must_use]
    pub fn config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Returns the environment whose overrides were applied.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Returns the TOML files that were found, in load order.
    #[must_use]
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Deserializes a top-level section owned by another crate.
    ///
    /// A missing section yields `T::default()`.
    pub fn section<T: DeserializeOwned + Default>(&self, key: &str) -> DepotResult<T> {
        match self.raw.get::<T>(key) {
            Ok(value) => Ok(value),
            Err(ConfigError::NotFound(_)) => {
                debug!(section = key, "Section not configured, using defaults");
                Ok(T::default())
            }
            Err(e) => Err(config_error(e)),
        }
    }

    // Runs before tracing is installed; callers log `environment()` and `files()` afterwards.
    fn build(config_dir: &str, environment: &str) -> DepotResult<(Config, Vec<String>)> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let mut builder = Config::builder();
        let mut files = Vec::new();

        for name in ["default", environment, "local"] {
            let path = format!("{}/{}.toml", config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
                files.push(path);
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("DEPOT")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("jobs.worker.allowed_types"),
        );

        let raw = builder.build().map_err(config_error)?;
        Ok((raw, files))
    }

    fn validate(config: &AppConfig) -> DepotResult<()> {
        if config.database.url.is_empty() {
            return Err(DepotError::configuration("Database URL is required"));
        }

        let url = url::Url::parse(&config.database.url)
            .map_err(|e| DepotError::configuration(format!("Invalid database URL: {}", e)))?;
        if url.scheme() != "mysql" {
            return Err(DepotError::configuration(format!(
                "Unsupported database scheme '{}', expected mysql",
                url.scheme()
            )));
        }

        if config.database.max_connections == 0 {
            return Err(DepotError::configuration(
                "database.max_connections must be at least 1",
            ));
        }
        if config.database.min_connections > config.database.max_connections {
            return Err(DepotError::configuration(
                "database.min_connections cannot exceed database.max_connections",
            ));
        }

        config
            .observability
            .log_format
            .parse::<depot_core::LogFormat>()?;

        Ok(())
    }
}

fn config_error(err: ConfigError) -> DepotError {
    DepotError::Configuration(err.to_string())
}
