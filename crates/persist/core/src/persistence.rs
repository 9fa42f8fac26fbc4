use crate::{FormatterRegistry, Persistable, PersistenceConfig};
use persist_storage::{LogicalLocation, Storage, StorageList, StorageRegistry};
use persist_types::{AdditionalData, PersistError, PersistResult};
use std::any::TypeId;
use std::sync::Arc;
use tracing::{debug, trace};

/// Fans one persist or retrieve across an ordered list of storages.
///
/// Every storage gets its own transaction. There is no cross-storage
/// rollback: if the Nth storage fails, the earlier ones keep whatever they
/// already wrote.
pub struct Persistence {
    config: Arc<PersistenceConfig>,
    formatters: Arc<FormatterRegistry>,
    storages: Arc<StorageRegistry>,
}

impl Persistence {
    pub fn new(
        config: Arc<PersistenceConfig>,
        formatters: Arc<FormatterRegistry>,
        storages: Arc<StorageRegistry>,
    ) -> Self {
        Self {
            config,
            formatters,
            storages,
        }
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Storage of backend `name`, configured and pointed at `location`
    /// for persisting.
    pub fn get_persist_storage(
        &self,
        name: &str,
        location: &LogicalLocation,
    ) -> PersistResult<Box<dyn Storage>> {
        let mut storage = self
            .storages
            .create_configured(name, self.config.storage_config(name))?;
        storage.set_persist_location(location)?;
        debug!(backend = name, %location, "persist storage ready");
        Ok(storage)
    }

    pub fn get_retrieve_storage(
        &self,
        name: &str,
        location: &LogicalLocation,
    ) -> PersistResult<Box<dyn Storage>> {
        let mut storage = self
            .storages
            .create_configured(name, self.config.storage_config(name))?;
        storage.set_retrieve_location(location)?;
        debug!(backend = name, %location, "retrieve storage ready");
        Ok(storage)
    }

    pub fn persist(
        &self,
        object: &dyn Persistable,
        storages: &mut StorageList,
        additional: &AdditionalData,
    ) -> PersistResult<()> {
        let name = self.formatters.name_for_type(object.concrete_type_id())?;
        let mut formatter = self
            .formatters
            .lookup_by_name(name, self.config.formatter_config(name))?;

        for storage in storages.iter_mut() {
            storage.start_transaction()?;
        }
        for storage in storages.iter_mut() {
            trace!(persistable = name, backend = %storage.kind(), "write");
            formatter.write(object, storage.as_mut(), additional)?;
        }
        for storage in storages.iter_mut() {
            storage.end_transaction()?;
        }
        debug!(persistable = name, storages = storages.len(), "persisted");
        Ok(())
    }

    /// Read a `type_name` object from the first storage, then let each
    /// later storage overwrite the fields it supplies.
    pub fn retrieve(
        &self,
        type_name: &str,
        storages: &mut StorageList,
        additional: &AdditionalData,
    ) -> PersistResult<Box<dyn Persistable>> {
        if storages.is_empty() {
            return Err(PersistError::invalid(format!(
                "no storages to retrieve {type_name} from"
            )));
        }
        let mut formatter = self
            .formatters
            .lookup_by_name(type_name, self.config.formatter_config(type_name))?;

        for storage in storages.iter_mut() {
            storage.start_transaction()?;
        }
        let (first, rest) = storages.split_at_mut(1);
        trace!(persistable = type_name, backend = %first[0].kind(), "read");
        let mut object = formatter.read(first[0].as_mut(), additional)?;
        for storage in rest.iter_mut() {
            trace!(persistable = type_name, backend = %storage.kind(), "update");
            formatter.update(object.as_mut(), storage.as_mut(), additional)?;
        }
        for storage in storages.iter_mut() {
            storage.end_transaction()?;
        }
        debug!(persistable = type_name, storages = storages.len(), "retrieved");
        Ok(object)
    }

    /// Retrieve and downcast to the registered type `T`.
    pub fn retrieve_as<T: Persistable>(
        &self,
        storages: &mut StorageList,
        additional: &AdditionalData,
    ) -> PersistResult<Box<T>> {
        let name = self.formatters.name_for_type(TypeId::of::<T>())?;
        let object = self.retrieve(name, storages, additional)?;
        object.into_any().downcast::<T>().map_err(|_| {
            PersistError::invalid(format!("formatter for {name} produced a different type"))
        })
    }
}
