//! Persist and retrieve application objects across storages.
//!
//! A [`Persistence`] looks up the [`Formatter`] registered for an object's
//! type and drives it over an ordered list of storages, one transaction per
//! storage:
//!
//! ```text
//! persist:  start all -> write each -> end all
//! retrieve: start all -> read first -> update from the rest -> end all
//! ```
//!
//! [`PropertySet`](persist_types::PropertySet) ships with a built-in
//! formatter; applications register their own types on a
//! [`FormatterRegistry`] before wrapping it in an `Arc`.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod config;
mod formatter;
mod persistable;
mod persistence;
mod property_set_formatter;
mod registry;
pub mod telemetry;

pub use self::config::{FormatterConfig, ItemConfig, LoggingConfig, PersistenceConfig};
pub use formatter::{Formatter, FormatterFactory};
pub use persistable::Persistable;
pub use persistence::Persistence;
pub use property_set_formatter::{PropertySetFormatter, ITEM_NAME_KEY};
pub use registry::{FormatterRegistry, PROPERTY_SET_NAME};
pub use telemetry::init_tracing;
