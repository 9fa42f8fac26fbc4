//! Storage backends for the persist framework.
//!
//! Every backend implements [`Storage`]: it is pointed at a persist or a
//! retrieve location, then driven through per-storage transactions.
//! - `archive-file` / `xml-file`: structured archive streams ([`archive`])
//! - `relational-database`: SQL built from typed column bindings ([`db`])
//! - `bulk-load-database`: rows staged locally, loaded in one statement
//! - `flat-image`: path and header-unit passthrough for an image library
//!
//! Database credentials come from [`DbAuth`], never from location strings.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod archive;
mod auth;
mod bulk;
mod config;
pub mod db;
mod file;
mod flat_image;
mod location;
mod registry;
mod traits;

pub use auth::{AuthEntry, Credentials, DbAuth, AUTH_ENV_VAR, AUTH_FILE_ENV_VAR};
pub use bulk::BulkLoadStorage;
pub use self::config::StorageConfig;
pub use db::{DbStorage, TableStorage, TableStorageExt};
pub use file::{ArchiveFileStorage, ArchiveFormat, FileStorage, TextFormat, XmlFileStorage, XmlFormat};
pub use flat_image::FlatImageStorage;
pub use location::{DbLocation, ImageLocation, LogicalLocation};
pub use registry::StorageRegistry;
pub use traits::{Storage, StorageKind, StorageList};
