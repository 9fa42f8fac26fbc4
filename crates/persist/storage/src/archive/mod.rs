//! Structured archive streams.
//!
//! An archive is a header followed by property sets. A set is `(id, count)`
//! and then `count` records; a record is `(name, tag, count)` and then its
//! values. A value is a scalar in text form, an inline nested set, or a
//! reference to a set already written in the same object graph.

mod codec;
mod text;
mod xml;

pub use codec::{read_property_set, write_property_set};
pub use text::{TextArchiveReader, TextArchiveWriter};
pub use xml::{XmlArchiveReader, XmlArchiveWriter};

use persist_types::PersistResult;

/// Header of one record inside a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub name: String,
    pub tag: char,
    pub count: usize,
}

/// One value inside a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveItem {
    Scalar(String),
    /// Reference to a set with this id written earlier in the stream.
    Reference(u32),
    /// Start of an inline set; its records follow.
    Set { id: u32, count: usize },
}

pub trait ArchiveWriter {
    fn begin_set(&mut self, id: u32, count: usize) -> PersistResult<()>;
    fn end_set(&mut self) -> PersistResult<()>;
    fn begin_record(&mut self, name: &str, tag: char, count: usize) -> PersistResult<()>;
    fn end_record(&mut self) -> PersistResult<()>;
    fn write_scalar(&mut self, text: &str) -> PersistResult<()>;
    fn write_reference(&mut self, id: u32) -> PersistResult<()>;
    /// Close any open framing and flush.
    fn finish(&mut self) -> PersistResult<()>;
}

pub trait ArchiveReader {
    /// Consume the start of a set, returning its id and record count.
    fn begin_set(&mut self) -> PersistResult<(u32, usize)>;
    fn end_set(&mut self) -> PersistResult<()>;
    fn begin_record(&mut self) -> PersistResult<RecordHeader>;
    fn end_record(&mut self) -> PersistResult<()>;
    fn next_item(&mut self) -> PersistResult<ArchiveItem>;
}

/// Storage that exposes an archive stream.
pub trait ArchiveStorage {
    fn writer(&mut self) -> PersistResult<&mut dyn ArchiveWriter>;
    fn reader(&mut self) -> PersistResult<&mut dyn ArchiveReader>;
}
