use crate::{
    ArchiveFileStorage, BulkLoadStorage, DbAuth, DbStorage, FlatImageStorage, Storage,
    StorageConfig, StorageKind, XmlFileStorage,
};
use persist_types::PersistResult;
use std::sync::Arc;

/// Factory for the fixed set of storage backends.
///
/// Holds the credentials handle shared by every database storage it creates.
#[derive(Debug, Clone, Default)]
pub struct StorageRegistry {
    auth: Arc<DbAuth>,
}

impl StorageRegistry {
    pub fn new(auth: Arc<DbAuth>) -> Self {
        Self { auth }
    }

    pub fn auth(&self) -> &Arc<DbAuth> {
        &self.auth
    }

    /// New unconfigured storage for a backend name such as `xml-file`.
    pub fn create_instance(&self, name: &str) -> PersistResult<Box<dyn Storage>> {
        Ok(self.create(name.parse()?))
    }

    pub fn create(&self, kind: StorageKind) -> Box<dyn Storage> {
        match kind {
            StorageKind::ArchiveFile => Box::new(ArchiveFileStorage::new()),
            StorageKind::XmlFile => Box::new(XmlFileStorage::new()),
            StorageKind::RelationalDatabase => Box::new(DbStorage::new(Arc::clone(&self.auth))),
            StorageKind::BulkLoadDatabase => {
                Box::new(BulkLoadStorage::new(Arc::clone(&self.auth)))
            }
            StorageKind::FlatImage => Box::new(FlatImageStorage::new()),
        }
    }

    /// Create a storage and apply its configuration.
    pub fn create_configured(
        &self,
        name: &str,
        config: Option<&StorageConfig>,
    ) -> PersistResult<Box<dyn Storage>> {
        let mut storage = self.create_instance(name)?;
        if let Some(config) = config {
            storage.set_configuration(config)?;
        }
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persist_types::PersistError;

    #[test]
    fn every_backend_name_creates_its_kind() {
        let registry = StorageRegistry::default();
        for kind in StorageKind::ALL {
            let storage = registry.create_instance(kind.name()).unwrap();
            assert_eq!(storage.kind(), kind);
        }
    }

    #[test]
    fn database_backends_expose_tables() {
        let registry = StorageRegistry::default();
        let mut db = registry.create_instance("relational-database").unwrap();
        assert!(db.as_table_mut().is_some());
        assert!(db.as_archive_mut().is_none());
        assert!(db.downcast_ref::<DbStorage>().is_some());

        let mut xml = registry.create_instance("xml-file").unwrap();
        assert!(xml.as_archive_mut().is_some());
        assert!(xml.as_table_mut().is_none());
    }

    #[test]
    fn unknown_backend_is_invalid() {
        let err = StorageRegistry::default()
            .create_instance("BoostStorage")
            .err()
            .unwrap();
        assert!(matches!(err, PersistError::InvalidArgument(_)));
    }
}
