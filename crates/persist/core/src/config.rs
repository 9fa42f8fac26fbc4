//! Configuration for persistence calls.

use persist_storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level persistence configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Formatter options keyed by persistable name.
    #[serde(default)]
    pub formatter: HashMap<String, FormatterConfig>,

    /// Storage options keyed by backend name.
    #[serde(default)]
    pub storage: HashMap<String, StorageConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Options for one persistable type's formatter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatterConfig {
    /// Per-item table mappings, keyed by the `itemName` additional-data value.
    #[serde(default)]
    pub items: HashMap<String, ItemConfig>,
}

/// Table mapping for one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemConfig {
    /// Defaults to the item name.
    #[serde(default)]
    pub table_name: Option<String>,

    /// `column=key` or `key` entries; all keys when absent.
    #[serde(default)]
    pub key_list: Option<Vec<String>>,

    /// Entries matched against additional data when retrieving.
    #[serde(default)]
    pub query_keys: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Map lookup tolerant of the key case folding done by configuration sources.
fn lookup<'a, V>(map: &'a HashMap<String, V>, key: &str) -> Option<&'a V> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

impl PersistenceConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `PERSIST__`-prefixed environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&PersistenceConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // e.g. PERSIST__LOGGING__LEVEL=debug
        builder = builder.add_source(
            config::Environment::with_prefix("PERSIST")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn formatter_config(&self, persistable: &str) -> Option<&FormatterConfig> {
        lookup(&self.formatter, persistable)
    }

    pub fn storage_config(&self, backend: &str) -> Option<&StorageConfig> {
        lookup(&self.storage, backend)
    }
}

impl FormatterConfig {
    pub fn item(&self, name: &str) -> Option<&ItemConfig> {
        lookup(&self.items, name)
    }
}

impl ItemConfig {
    pub fn table_name<'a>(&'a self, item_name: &'a str) -> &'a str {
        self.table_name.as_deref().unwrap_or(item_name)
    }
}
