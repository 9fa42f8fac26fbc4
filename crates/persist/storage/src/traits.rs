use crate::archive::ArchiveStorage;
use crate::db::TableStorage;
use crate::{LogicalLocation, StorageConfig};
use persist_types::{PersistError, PersistResult};
use std::any::Any;
use std::fmt;
use std::str::FromStr;

/// The closed set of storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    ArchiveFile,
    XmlFile,
    RelationalDatabase,
    BulkLoadDatabase,
    FlatImage,
}

impl StorageKind {
    pub const ALL: [StorageKind; 5] = [
        StorageKind::ArchiveFile,
        StorageKind::XmlFile,
        StorageKind::RelationalDatabase,
        StorageKind::BulkLoadDatabase,
        StorageKind::FlatImage,
    ];

    /// Backend name used in configuration and factory lookups.
    pub const fn name(self) -> &'static str {
        match self {
            StorageKind::ArchiveFile => "archive-file",
            StorageKind::XmlFile => "xml-file",
            StorageKind::RelationalDatabase => "relational-database",
            StorageKind::BulkLoadDatabase => "bulk-load-database",
            StorageKind::FlatImage => "flat-image",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StorageKind {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| PersistError::invalid(format!("unknown storage type: {s}")))
    }
}

/// A configured handle to one persistence medium.
///
/// An instance is either persisting or retrieving, whichever location was set
/// last; setting a location tears down anything left open in the other mode.
/// Instances are for sequential use only.
pub trait Storage: Any + Send {
    fn kind(&self) -> StorageKind;

    fn set_configuration(&mut self, config: &StorageConfig) -> PersistResult<()> {
        let _ = config;
        Ok(())
    }

    fn set_persist_location(&mut self, location: &LogicalLocation) -> PersistResult<()>;

    fn set_retrieve_location(&mut self, location: &LogicalLocation) -> PersistResult<()>;

    fn start_transaction(&mut self) -> PersistResult<()>;

    fn end_transaction(&mut self) -> PersistResult<()>;

    /// Archive stream view, for the file-archive backends.
    fn as_archive_mut(&mut self) -> Option<&mut dyn ArchiveStorage> {
        None
    }

    /// Table view, for the database backends.
    fn as_table_mut(&mut self) -> Option<&mut dyn TableStorage> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Storage {
    pub fn downcast_ref<T: Storage>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Storage>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Ordered storages for one logical persist or retrieve call.
pub type StorageList = Vec<Box<dyn Storage>>;
