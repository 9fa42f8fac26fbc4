//! Relational database backend.
//!
//! SQL is assembled from typed column bindings ([`binding`]), rendered per
//! dialect ([`sql`]) and executed through a blocking sqlx connection
//! ([`connection`]). SQLite and PostgreSQL are supported.

pub mod binding;
pub mod connection;
pub mod sql;
mod storage;
mod table;
pub mod tsv;

pub use binding::{BoundVar, DbType, FieldType, OutParam, OutSpec, CIVIL_RECORD_LEN, TEXT_CAPACITY};
pub use connection::{SqlxConnection, StatementInfo};
pub use sql::Dialect;
pub use storage::DbStorage;
pub use table::{TableStorage, TableStorageExt};
