use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-backend storage options.
///
/// Only the bulk-load backend interprets these; every other backend accepts
/// and ignores them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for bulk-load staging files. Defaults to the system temp dir.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Keep staging files after a successful load.
    #[serde(default)]
    pub keep_staging_file: bool,
}

impl StorageConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
