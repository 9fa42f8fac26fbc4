//! Plain-text archive encoding.
//!
//! ```text
//! persist-archive 1
//! { 0 2
//! 2:id l 1
//! 5:12345
//! 3:sub p 1
//! { 1 0
//! }
//! }
//! ```
//!
//! Names and scalars are byte-length prefixed so they may hold any text.

use super::{ArchiveItem, ArchiveReader, ArchiveWriter, RecordHeader};
use persist_types::{PersistError, PersistResult};
use std::io::{Read, Write};

const HEADER: &str = "persist-archive 1";

pub struct TextArchiveWriter<W: Write> {
    inner: W,
}

impl<W: Write> TextArchiveWriter<W> {
    pub fn new(mut inner: W) -> PersistResult<Self> {
        writeln!(inner, "{HEADER}")?;
        Ok(Self { inner })
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ArchiveWriter for TextArchiveWriter<W> {
    fn begin_set(&mut self, id: u32, count: usize) -> PersistResult<()> {
        writeln!(self.inner, "{{ {id} {count}")?;
        Ok(())
    }

    fn end_set(&mut self) -> PersistResult<()> {
        writeln!(self.inner, "}}")?;
        Ok(())
    }

    fn begin_record(&mut self, name: &str, tag: char, count: usize) -> PersistResult<()> {
        writeln!(self.inner, "{}:{name} {tag} {count}", name.len())?;
        Ok(())
    }

    fn end_record(&mut self) -> PersistResult<()> {
        Ok(())
    }

    fn write_scalar(&mut self, text: &str) -> PersistResult<()> {
        writeln!(self.inner, "{}:{text}", text.len())?;
        Ok(())
    }

    fn write_reference(&mut self, id: u32) -> PersistResult<()> {
        writeln!(self.inner, "@{id}")?;
        Ok(())
    }

    fn finish(&mut self) -> PersistResult<()> {
        self.inner.flush()?;
        Ok(())
    }
}

pub struct TextArchiveReader {
    input: String,
    pos: usize,
}

impl TextArchiveReader {
    pub fn new(mut source: impl Read) -> PersistResult<Self> {
        let mut input = String::new();
        source.read_to_string(&mut input)?;
        let mut reader = Self { input, pos: 0 };
        reader.skip_whitespace();
        if !reader.rest().starts_with(HEADER) {
            return Err(PersistError::invalid("not a persist text archive"));
        }
        reader.pos += HEADER.len();
        Ok(reader)
    }

    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    fn malformed(&self, expected: &str) -> PersistError {
        PersistError::invalid(format!(
            "malformed text archive at byte {}: expected {expected}",
            self.pos
        ))
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn expect(&mut self, c: char) -> PersistResult<()> {
        self.skip_whitespace();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.malformed(&format!("'{c}'")))
        }
    }

    fn read_number(&mut self) -> PersistResult<u64> {
        self.skip_whitespace();
        let digits = self
            .rest()
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest().len());
        let value = self.rest()[..digits]
            .parse::<u64>()
            .map_err(|_| self.malformed("a number"))?;
        self.pos += digits;
        Ok(value)
    }

    fn read_count(&mut self) -> PersistResult<usize> {
        let value = self.read_number()?;
        usize::try_from(value).map_err(|_| self.malformed("a count"))
    }

    fn read_id(&mut self) -> PersistResult<u32> {
        let value = self.read_number()?;
        u32::try_from(value).map_err(|_| self.malformed("a set id"))
    }

    fn read_counted(&mut self) -> PersistResult<String> {
        let len = self.read_count()?;
        if self.peek() != Some(':') {
            return Err(self.malformed("':' after length"));
        }
        self.pos += 1;
        let end = self.pos.saturating_add(len);
        if end > self.input.len() || !self.input.is_char_boundary(end) {
            return Err(self.malformed(&format!("{len} bytes of text")));
        }
        let text = self.input[self.pos..end].to_string();
        self.pos = end;
        Ok(text)
    }
}

impl ArchiveReader for TextArchiveReader {
    fn begin_set(&mut self) -> PersistResult<(u32, usize)> {
        self.expect('{')?;
        let id = self.read_id()?;
        let count = self.read_count()?;
        Ok((id, count))
    }

    fn end_set(&mut self) -> PersistResult<()> {
        self.expect('}')
    }

    fn begin_record(&mut self) -> PersistResult<RecordHeader> {
        self.skip_whitespace();
        let name = self.read_counted()?;
        self.skip_whitespace();
        let tag = self.peek().ok_or_else(|| self.malformed("a type tag"))?;
        self.pos += tag.len_utf8();
        let count = self.read_count()?;
        Ok(RecordHeader { name, tag, count })
    }

    fn end_record(&mut self) -> PersistResult<()> {
        Ok(())
    }

    fn next_item(&mut self) -> PersistResult<ArchiveItem> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => {
                let (id, count) = self.begin_set()?;
                Ok(ArchiveItem::Set { id, count })
            }
            Some('@') => {
                self.pos += 1;
                Ok(ArchiveItem::Reference(self.read_id()?))
            }
            Some(c) if c.is_ascii_digit() => Ok(ArchiveItem::Scalar(self.read_counted()?)),
            _ => Err(self.malformed("a value")),
        }
    }
}
