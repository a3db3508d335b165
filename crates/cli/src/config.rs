//! # CLI Configuration
//!
//! Loads the `carerag` binary's configuration from a `config.yml` file and
//! environment variables. The file may reference environment variables with
//! `${VAR}` placeholders, and every key can be overridden from the
//! environment, so secrets never need to live in the file itself.

use carerag::{EmbeddingConfig, ProviderConfig};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use tracing::info;

/// A custom error type for configuration issues.
#[derive(Debug)]
pub enum ConfigError {
    /// Indicates an error from the underlying `config` crate.
    General(String),
    /// Indicates a required configuration file was not found.
    NotFound(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::General(msg) => write!(f, "Configuration error: {msg}"),
            ConfigError::NotFound(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::General(err.to_string())
    }
}

/// The root configuration structure, mapping directly to `config.yml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// The path to the SQLite database file. Loaded from `DB_URL` env var.
    #[serde(default = "default_db_url")]
    pub db_url: String,
    /// The model the generator and classifier call; when unset, the pipeline
    /// runs on the rule-based builder alone.
    #[serde(default)]
    pub model: Option<String>,
    /// An optional schema definition file. When set, the catalog is grounded
    /// on this DDL instead of live database introspection.
    #[serde(default)]
    pub schema_ddl: Option<String>,
    /// Configuration for the text embedding model. Optional: without it the
    /// schema index serves keyword retrieval only.
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
    /// A map of named, reusable AI provider configurations.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// Provides a default value for the `db_url` field if not set in the environment.
fn default_db_url() -> String {
    "db/carerag.db".to_string()
}

// Helper to read a file, substitute env vars, and return its content.
// Returns Ok(None) if the file does not exist, or an error if it fails to read.
fn read_and_substitute(path: &str) -> Result<Option<String>, ConfigError> {
    if !std::path::Path::new(path).exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| ConfigError::General(format!("Failed to read config file '{path}': {e}")))?;

    let re = Regex::new(r"\$\{(?P<var>[A-Z0-9_]+)\}")
        .map_err(|e| ConfigError::General(e.to_string()))?;
    let expanded_content = re.replace_all(&content, |caps: &regex::Captures| {
        let var_name = &caps["var"];
        env::var(var_name).unwrap_or_else(|_| "".to_string())
    });

    Ok(Some(expanded_content.to_string()))
}

/// Loads the application configuration from a file and environment variables.
///
/// Layers, later ones winning:
/// 1. `config.yml` in the working directory (or the `--config` override),
///    with `${VAR}` substitution applied.
/// 2. Plain environment variables for top-level keys like `DB_URL`.
/// 3. `CARERAG_`-prefixed variables for nested keys
///    (e.g. `CARERAG_EMBEDDING__API_URL`).
///
/// A missing default file is fine — the defaults and the environment carry a
/// minimal setup — but an explicitly requested file must exist.
pub fn get_config(config_path_override: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut builder = ConfigBuilder::builder();

    let config_path = config_path_override.unwrap_or("config.yml");
    match read_and_substitute(config_path)? {
        Some(content) => {
            info!("Loading configuration from '{config_path}'.");
            builder = builder.add_source(File::from_str(&content, FileFormat::Yaml));
        }
        None if config_path_override.is_some() => {
            return Err(ConfigError::NotFound(format!(
                "Config file not found at '{config_path}'."
            )));
        }
        None => {
            info!("No '{config_path}' found; using defaults and the environment.");
        }
    }

    let settings = builder
        // Environment variables for top-level keys like DB_URL.
        .add_source(Environment::default())
        // Prefixed environment variables for deeper overrides.
        .add_source(
            Environment::with_prefix("CARERAG")
                .prefix_separator("_")
                .try_parsing(true)
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
