use persist_core::{Formatter, FormatterConfig, Persistable};
use persist_storage::archive::{read_property_set, write_property_set};
use persist_storage::Storage;
use persist_types::{AdditionalData, PersistError, PersistResult, PropertySet};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};

pub static FACTORY_CALLS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, PartialEq)]
pub struct Exposure {
    pub id: i64,
    pub filter: String,
}

impl Persistable for Exposure {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

fn archive(storage: &mut dyn Storage) -> PersistResult<&mut dyn persist_storage::archive::ArchiveStorage> {
    let kind = storage.kind();
    storage
        .as_archive_mut()
        .ok_or_else(|| PersistError::invalid(format!("Exposure cannot use {kind} storage")))
}

/// Stores an exposure as a two-entry property set.
pub struct ExposureFormatter;

impl ExposureFormatter {
    pub fn factory(_: Option<&FormatterConfig>) -> Box<dyn Formatter> {
        FACTORY_CALLS.fetch_add(1, Ordering::SeqCst);
        Box::new(ExposureFormatter)
    }
}

impl Formatter for ExposureFormatter {
    fn write(
        &mut self,
        object: &dyn Persistable,
        storage: &mut dyn Storage,
        _: &AdditionalData,
    ) -> PersistResult<()> {
        let exposure = object
            .downcast_ref::<Exposure>()
            .ok_or_else(|| PersistError::invalid("not an Exposure"))?;
        let set = PropertySet::new()
            .with("id", exposure.id)
            .with("filter", exposure.filter.as_str());
        write_property_set(archive(storage)?.writer()?, &set)
    }

    fn read(
        &mut self,
        storage: &mut dyn Storage,
        _: &AdditionalData,
    ) -> PersistResult<Box<dyn Persistable>> {
        let set = read_property_set(archive(storage)?.reader()?)?;
        Ok(Box::new(Exposure {
            id: set.get_as_i64("id")?,
            filter: set.get_as_string("filter")?,
        }))
    }

    fn update(
        &mut self,
        object: &mut dyn Persistable,
        storage: &mut dyn Storage,
        additional: &AdditionalData,
    ) -> PersistResult<()> {
        let fresh = self.read(storage, additional)?;
        if let (Some(target), Some(fresh)) = (
            object.downcast_mut::<Exposure>(),
            fresh.downcast_ref::<Exposure>(),
        ) {
            *target = fresh.clone();
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registered for [`Exposure`] but reads back a bare property set.
pub struct MisreadingFormatter;

impl MisreadingFormatter {
    pub fn factory(_: Option<&FormatterConfig>) -> Box<dyn Formatter> {
        Box::new(MisreadingFormatter)
    }
}

impl Formatter for MisreadingFormatter {
    fn write(&mut self, _: &dyn Persistable, _: &mut dyn Storage, _: &AdditionalData) -> PersistResult<()> {
        Ok(())
    }

    fn read(
        &mut self,
        storage: &mut dyn Storage,
        _: &AdditionalData,
    ) -> PersistResult<Box<dyn Persistable>> {
        Ok(Box::new(read_property_set(archive(storage)?.reader()?)?))
    }

    fn update(&mut self, _: &mut dyn Persistable, _: &mut dyn Storage, _: &AdditionalData) -> PersistResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
