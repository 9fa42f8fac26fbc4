//! Location descriptors.

use persist_types::{PersistError, PersistResult};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static NETWORK_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+)://([^\s:/]+):(\d+)/(\S+)$").expect("network location regex")
});

static INDEXED_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\[(\d+)\]$").expect("indexed path regex"));

/// Backend-specific address string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalLocation(String);

impl LogicalLocation {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalLocation {
    fn from(location: &str) -> Self {
        Self::new(location)
    }
}

impl From<String> for LogicalLocation {
    fn from(location: String) -> Self {
        Self(location)
    }
}

impl From<&Path> for LogicalLocation {
    fn from(path: &Path) -> Self {
        Self(path.display().to_string())
    }
}

/// Parsed database location. Credentials never appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// `sqlite://<path>` or `sqlite://:memory:`.
    Sqlite { path: PathBuf },
    /// `<dbtype>://<host>:<port>/<dbname>`.
    Network {
        db_type: String,
        host: String,
        port: u16,
        db_name: String,
    },
}

impl DbLocation {
    pub fn parse(location: &LogicalLocation) -> PersistResult<Self> {
        let text = location.as_str();
        if let Some(path) = text.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(PersistError::invalid(format!(
                    "missing database path in location {text}"
                )));
            }
            return Ok(DbLocation::Sqlite {
                path: PathBuf::from(path),
            });
        }

        let caps = NETWORK_LOCATION.captures(text).ok_or_else(|| {
            PersistError::invalid(format!("unparseable database location: {text}"))
        })?;
        let port = caps[3]
            .parse::<u16>()
            .map_err(|e| PersistError::invalid(format!("bad port in location {text}: {e}")))?;
        Ok(DbLocation::Network {
            db_type: caps[1].to_string(),
            host: caps[2].to_string(),
            port,
            db_name: caps[4].to_string(),
        })
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, DbLocation::Sqlite { path } if path.as_os_str() == ":memory:")
    }

    /// Connection string for logs; never carries credentials.
    pub fn conn_string(&self) -> String {
        match self {
            DbLocation::Sqlite { path } => format!("sqlite://{}", path.display()),
            DbLocation::Network {
                db_type,
                host,
                port,
                db_name,
            } => format!("{db_type}://{host}:{port}/{db_name}"),
        }
    }
}

/// Flat-image location: a path with an optional `[index]` suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLocation {
    pub path: PathBuf,
    pub index: Option<u32>,
}

impl ImageLocation {
    pub fn parse(location: &LogicalLocation) -> PersistResult<Self> {
        let text = location.as_str();
        if text.is_empty() {
            return Err(PersistError::invalid("empty image location"));
        }
        match INDEXED_PATH.captures(text) {
            Some(caps) => {
                let index = caps[2].parse::<u32>().map_err(|e| {
                    PersistError::invalid(format!("bad image index in {text}: {e}"))
                })?;
                Ok(Self {
                    path: PathBuf::from(&caps[1]),
                    index: Some(index),
                })
            }
            None => Ok(Self {
                path: PathBuf::from(text),
                index: None,
            }),
        }
    }
}

/// Create the parent directories of `path` if they are missing.
pub(crate) fn ensure_parent_dir(path: &Path) -> PersistResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            PersistError::backend(format!("cannot create directory {}: {e}", parent.display()))
        })?;
    }
    Ok(())
}
