//! File-backed archive storages.

use crate::archive::{
    ArchiveReader, ArchiveStorage, ArchiveWriter, TextArchiveReader, TextArchiveWriter,
    XmlArchiveReader, XmlArchiveWriter,
};
use crate::location::ensure_parent_dir;
use crate::{LogicalLocation, Storage, StorageKind};
use persist_types::{PersistError, PersistResult};
use std::any::Any;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Encoding used by a [`FileStorage`].
pub trait ArchiveFormat: Send + 'static {
    const KIND: StorageKind;
    type Writer: ArchiveWriter + Send + 'static;
    type Reader: ArchiveReader + Send + 'static;

    fn writer(file: BufWriter<File>) -> PersistResult<Self::Writer>;
    fn reader(file: BufReader<File>) -> PersistResult<Self::Reader>;
}

/// Length-prefixed text archives.
pub struct TextFormat;

impl ArchiveFormat for TextFormat {
    const KIND: StorageKind = StorageKind::ArchiveFile;
    type Writer = TextArchiveWriter<BufWriter<File>>;
    type Reader = TextArchiveReader;

    fn writer(file: BufWriter<File>) -> PersistResult<Self::Writer> {
        TextArchiveWriter::new(file)
    }

    fn reader(file: BufReader<File>) -> PersistResult<Self::Reader> {
        TextArchiveReader::new(file)
    }
}

/// XML archives.
pub struct XmlFormat;

impl ArchiveFormat for XmlFormat {
    const KIND: StorageKind = StorageKind::XmlFile;
    type Writer = XmlArchiveWriter<BufWriter<File>>;
    type Reader = XmlArchiveReader<BufReader<File>>;

    fn writer(file: BufWriter<File>) -> PersistResult<Self::Writer> {
        XmlArchiveWriter::new(file)
    }

    fn reader(file: BufReader<File>) -> PersistResult<Self::Reader> {
        XmlArchiveReader::new(file)
    }
}

enum Stream<W, R> {
    Closed,
    Writing(W),
    Reading(R),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Persist,
    Retrieve,
}

/// Archive file storage; the stream opens with the location and closes at
/// the end of each transaction.
pub struct FileStorage<F: ArchiveFormat> {
    target: Option<(PathBuf, Mode)>,
    stream: Stream<F::Writer, F::Reader>,
    _format: PhantomData<fn() -> F>,
}

pub type ArchiveFileStorage = FileStorage<TextFormat>;
pub type XmlFileStorage = FileStorage<XmlFormat>;

impl<F: ArchiveFormat> Default for FileStorage<F> {
    fn default() -> Self {
        Self {
            target: None,
            stream: Stream::Closed,
            _format: PhantomData,
        }
    }
}

impl<F: ArchiveFormat> FileStorage<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.target.as_ref().map(|(path, _)| path.as_path())
    }

    fn open(&mut self) -> PersistResult<()> {
        let Some((path, mode)) = &self.target else {
            return Err(PersistError::invalid(format!(
                "{} storage has no location",
                F::KIND
            )));
        };
        self.stream = match mode {
            Mode::Persist => {
                ensure_parent_dir(path)?;
                let file = File::create(path).map_err(|e| {
                    PersistError::backend(format!("cannot create {}: {e}", path.display()))
                })?;
                Stream::Writing(F::writer(BufWriter::new(file))?)
            }
            Mode::Retrieve => {
                let file = File::open(path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        PersistError::not_found(format!("archive file {}", path.display()))
                    }
                    _ => PersistError::backend(format!("cannot open {}: {e}", path.display())),
                })?;
                Stream::Reading(F::reader(BufReader::new(file))?)
            }
        };
        debug!(kind = %F::KIND, path = %path.display(), mode = ?mode, "opened archive");
        Ok(())
    }

    fn set_location(&mut self, location: &LogicalLocation, mode: Mode) -> PersistResult<()> {
        if location.as_str().is_empty() {
            return Err(PersistError::invalid("empty archive location"));
        }
        self.stream = Stream::Closed;
        self.target = Some((PathBuf::from(location.as_str()), mode));
        self.open()
    }
}

impl<F: ArchiveFormat> Storage for FileStorage<F> {
    fn kind(&self) -> StorageKind {
        F::KIND
    }

    fn set_persist_location(&mut self, location: &LogicalLocation) -> PersistResult<()> {
        self.set_location(location, Mode::Persist)
    }

    fn set_retrieve_location(&mut self, location: &LogicalLocation) -> PersistResult<()> {
        self.set_location(location, Mode::Retrieve)
    }

    fn start_transaction(&mut self) -> PersistResult<()> {
        if matches!(self.stream, Stream::Closed) {
            self.open()?;
        }
        Ok(())
    }

    fn end_transaction(&mut self) -> PersistResult<()> {
        if let Stream::Writing(writer) = &mut self.stream {
            writer.finish()?;
        }
        self.stream = Stream::Closed;
        Ok(())
    }

    fn as_archive_mut(&mut self) -> Option<&mut dyn ArchiveStorage> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<F: ArchiveFormat> ArchiveStorage for FileStorage<F> {
    fn writer(&mut self) -> PersistResult<&mut dyn ArchiveWriter> {
        match &mut self.stream {
            Stream::Writing(writer) => Ok(writer),
            _ => Err(PersistError::invalid(format!(
                "{} storage is not open for persisting",
                F::KIND
            ))),
        }
    }

    fn reader(&mut self) -> PersistResult<&mut dyn ArchiveReader> {
        match &mut self.stream {
            Stream::Reading(reader) => Ok(reader),
            _ => Err(PersistError::invalid(format!(
                "{} storage is not open for retrieving",
                F::KIND
            ))),
        }
    }
}
