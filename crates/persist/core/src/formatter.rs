use crate::{FormatterConfig, Persistable};
use persist_storage::Storage;
use persist_types::{AdditionalData, PersistResult};
use std::any::Any;

/// Serialization strategy for one persistable type.
///
/// A formatter decides per storage how the object is represented; storages
/// it cannot handle are rejected with `InvalidArgument`.
pub trait Formatter: Send {
    fn write(
        &mut self,
        object: &dyn Persistable,
        storage: &mut dyn Storage,
        additional: &AdditionalData,
    ) -> PersistResult<()>;

    /// Construct a new object from the first storage of a retrieve.
    fn read(
        &mut self,
        storage: &mut dyn Storage,
        additional: &AdditionalData,
    ) -> PersistResult<Box<dyn Persistable>>;

    /// Overlay fields from a later storage onto an object already read.
    fn update(
        &mut self,
        object: &mut dyn Persistable,
        storage: &mut dyn Storage,
        additional: &AdditionalData,
    ) -> PersistResult<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Builds a fresh formatter for every lookup.
pub type FormatterFactory = fn(Option<&FormatterConfig>) -> Box<dyn Formatter>;
