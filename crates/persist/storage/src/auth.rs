//! Database credentials lookup.
//!
//! Credentials are keyed on `(host, port)` and never travel inside a location
//! string. [`DbAuth::new`] searches, first match wins:
//!
//! 1. `PERSIST_DB_AUTH`, as `user:password@host:port` entries separated by `;`
//! 2. a TOML file (`PERSIST_DB_AUTH_FILE`, else `~/.persist/db-auth.toml`)
//!    holding `[[database.auth_info]]` tables with `host`, `port`, `user`
//!    and `password`; the file and its directory must not be accessible to
//!    group or other
//!
//! The file is only read when the variable has no matching entry.
//! [`DbAuth::from_entries`] and [`DbAuth::from_file`] replace the search
//! with a single source.

use persist_types::{PersistError, PersistResult};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

pub const AUTH_ENV_VAR: &str = "PERSIST_DB_AUTH";
pub const AUTH_FILE_ENV_VAR: &str = "PERSIST_DB_AUTH_FILE";

/// One credentials entry.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AuthEntry {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl AuthEntry {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for AuthEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthEntry")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolved username and password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// `user:password`.
    pub fn auth_string(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct AuthFile {
    #[serde(default)]
    database: AuthSection,
}

#[derive(Debug, Default, Deserialize)]
struct AuthSection {
    #[serde(default)]
    auth_info: Vec<AuthEntry>,
}

#[derive(Debug, Clone, Default)]
enum AuthSource {
    #[default]
    Standard,
    Entries(Vec<AuthEntry>),
    Spec(String),
    File(PathBuf),
}

/// Credentials lookup handle shared by the database backends.
#[derive(Debug, Clone, Default)]
pub struct DbAuth {
    source: AuthSource,
}

impl DbAuth {
    /// Lookup through the environment variable, then the credentials file.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<AuthEntry>) -> Self {
        Self {
            source: AuthSource::Entries(entries),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: AuthSource::File(path.into()),
        }
    }

    pub fn credentials(&self, host: &str, port: u16) -> PersistResult<Credentials> {
        let entry = match &self.source {
            AuthSource::Standard => {
                let mut sources = Vec::with_capacity(2);
                if let Ok(spec) = std::env::var(AUTH_ENV_VAR) {
                    sources.push(AuthSource::Spec(spec));
                }
                if let Some(path) = default_auth_file() {
                    sources.push(AuthSource::File(path));
                }
                find_entry(&sources, host, port)?
            }
            single => find_entry(std::slice::from_ref(single), host, port)?,
        };
        if entry.user.is_empty() {
            return Err(PersistError::invalid(format!(
                "empty username for {host}:{port}"
            )));
        }
        Ok(Credentials {
            username: entry.user,
            password: entry.password,
        })
    }

    /// Whether usable credentials exist for `(host, port)`.
    pub fn available(&self, host: &str, port: u16) -> bool {
        self.credentials(host, port).is_ok()
    }

    pub fn auth_string(&self, host: &str, port: u16) -> PersistResult<String> {
        self.credentials(host, port).map(|c| c.auth_string())
    }

    pub fn username(&self, host: &str, port: u16) -> PersistResult<String> {
        self.credentials(host, port).map(|c| c.username)
    }

    pub fn password(&self, host: &str, port: u16) -> PersistResult<String> {
        self.credentials(host, port).map(|c| c.password)
    }
}

fn default_auth_file() -> Option<PathBuf> {
    match std::env::var_os(AUTH_FILE_ENV_VAR) {
        Some(path) => Some(PathBuf::from(path)),
        None => dirs::home_dir().map(|home| home.join(".persist").join("db-auth.toml")),
    }
}

/// Later sources are only loaded when the earlier ones have no match.
fn find_entry(sources: &[AuthSource], host: &str, port: u16) -> PersistResult<AuthEntry> {
    for source in sources {
        let entries = match source {
            AuthSource::Entries(entries) => entries.clone(),
            AuthSource::Spec(spec) => parse_auth_env(spec)?,
            AuthSource::File(path) => load_auth_file(path)?,
            AuthSource::Standard => continue,
        };
        if let Some(entry) = entries.into_iter().find(|e| e.host == host && e.port == port) {
            return Ok(entry);
        }
    }
    Err(PersistError::not_found(format!(
        "no credentials found for {host}:{port}"
    )))
}

fn parse_auth_env(spec: &str) -> PersistResult<Vec<AuthEntry>> {
    spec.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(i, entry)| {
            // Messages name the entry position only, never its contents.
            let malformed = || {
                PersistError::invalid(format!(
                    "{AUTH_ENV_VAR} entry {i} is not user:password@host:port"
                ))
            };
            let (user_pass, host_port) = entry.rsplit_once('@').ok_or_else(malformed)?;
            let (user, password) = user_pass.split_once(':').ok_or_else(malformed)?;
            let (host, port) = host_port.rsplit_once(':').ok_or_else(malformed)?;
            let port = port.parse::<u16>().map_err(|_| malformed())?;
            Ok(AuthEntry::new(host, port, user, password))
        })
        .collect()
}

fn load_auth_file(path: &Path) -> PersistResult<Vec<AuthEntry>> {
    check_permissions(path)?;
    let settings = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Toml))
        .build()
        .map_err(|e| {
            PersistError::backend(format!("cannot read credentials file {}: {e}", path.display()))
        })?;
    let file: AuthFile = settings.try_deserialize().map_err(|e| {
        PersistError::invalid(format!("malformed credentials file {}: {e}", path.display()))
    })?;
    tracing::debug!(
        path = %path.display(),
        entries = file.database.auth_info.len(),
        "loaded database credentials"
    );
    Ok(file.database.auth_info)
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> PersistResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(PersistError::PermissionDenied(format!(
            "credentials file {} is accessible by group or other (mode {:o})",
            path.display(),
            mode & 0o777
        )));
    }
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let mode = std::fs::metadata(dir)?.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(PersistError::PermissionDenied(format!(
                "credentials directory {} is accessible by group or other (mode {:o})",
                dir.display(),
                mode & 0o777
            )));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(path: &Path) -> PersistResult<()> {
    std::fs::metadata(path)?;
    Ok(())
}
