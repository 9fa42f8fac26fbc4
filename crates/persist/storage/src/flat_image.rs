//! Flat-image container locations.
//!
//! Pixel I/O belongs to an external image library; this backend only
//! resolves the file path and optional header-unit index for it.

use crate::location::{ensure_parent_dir, ImageLocation};
use crate::{LogicalLocation, Storage, StorageKind};
use persist_types::PersistResult;
use std::any::Any;
use std::path::Path;

#[derive(Debug, Default)]
pub struct FlatImageStorage {
    location: Option<ImageLocation>,
    persisting: bool,
}

impl FlatImageStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.location.as_ref().map(|loc| loc.path.as_path())
    }

    /// Header-unit index; always `None` when persisting.
    pub fn hdu(&self) -> Option<u32> {
        self.location.as_ref().and_then(|loc| loc.index)
    }

    pub fn is_persisting(&self) -> bool {
        self.persisting
    }
}

impl Storage for FlatImageStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::FlatImage
    }

    fn set_persist_location(&mut self, location: &LogicalLocation) -> PersistResult<()> {
        let mut parsed = ImageLocation::parse(location)?;
        parsed.index = None;
        ensure_parent_dir(&parsed.path)?;
        self.location = Some(parsed);
        self.persisting = true;
        Ok(())
    }

    fn set_retrieve_location(&mut self, location: &LogicalLocation) -> PersistResult<()> {
        self.location = Some(ImageLocation::parse(location)?);
        self.persisting = false;
        Ok(())
    }

    fn start_transaction(&mut self) -> PersistResult<()> {
        Ok(())
    }

    fn end_transaction(&mut self) -> PersistResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
