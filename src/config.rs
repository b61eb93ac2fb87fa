//! Configuration for schema import
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (schema-import.toml)
//! - Environment variables (SCHEMA_IMPORT__*)
//!
//! ## Example config file (schema-import.toml):
//! ```toml
//! [import]
//! topic_id = "0.0.4481265"
//! category = "POLICY"
//! skip_generate_id = false
//! rollback_on_failure = false
//!
//! [cache]
//! max_entries = 5000
//! ttl_secs = 86400
//!
//! [external_schemas]
//! GeoJSON = "#GeoJSON"
//! SentinelHUB = "#SentinelHUB"
//!
//! [export]
//! output_format = "pretty"
//!
//! [logging]
//! filter = "ledger_schemas=debug"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schema::{ImportMode, ImportOptions, SchemaCategory};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImportConfig {
    /// Defaults for import options
    #[serde(default)]
    pub import: ImportDefaults,

    /// Message cache limits
    #[serde(default)]
    pub cache: CacheConfig,

    /// Title → IRI of schemas that live outside import batches
    #[serde(default)]
    pub external_schemas: BTreeMap<String, String>,

    /// Bundle writing
    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default import options
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImportDefaults {
    /// Target topic (unset = draft)
    #[serde(default)]
    pub topic_id: Option<String>,

    #[serde(default)]
    pub category: SchemaCategory,

    #[serde(default)]
    pub skip_generate_id: bool,

    #[serde(default)]
    pub rollback_on_failure: bool,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Upper bound on cached messages (unset = unbounded)
    #[serde(default)]
    pub max_entries: Option<usize>,

    /// Entry lifetime in seconds (unset = forever)
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExportConfig {
    #[serde(default)]
    pub output_format: OutputFormat,
}

/// Output format for JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl ImportConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, adding a specific file on top of the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "schema-import.toml",
            ".schema-import.toml",
            "config/schema-import.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "ledger", "schema-import") {
            let xdg_config = config_dir.config_dir().join("schema-import.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEMA_IMPORT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Import options seeded from the `[import]` section
    pub fn import_options(&self, mode: ImportMode) -> ImportOptions {
        ImportOptions {
            topic_id: self.import.topic_id.clone(),
            category: self.import.category,
            skip_generate_id: self.import.skip_generate_id,
            mode,
            rollback_on_failure: self.import.rollback_on_failure,
        }
    }
}
