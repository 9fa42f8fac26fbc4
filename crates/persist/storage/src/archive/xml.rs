//! XML archive encoding.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <archive version="1">
//!   <set id="0" count="1">
//!     <record name="id" type="l" count="1"><value>12345</value></record>
//!   </set>
//! </archive>
//! ```
//!
//! Nested sets appear inline inside a record; repeats are `<ref id="n"/>`.

use super::{ArchiveItem, ArchiveReader, ArchiveWriter, RecordHeader};
use persist_types::{PersistError, PersistResult};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fmt::Display;
use std::io::{BufRead, Write};

const VERSION: &str = "1";

fn xml_error(err: impl Display) -> PersistError {
    PersistError::backend(format!("xml archive: {err}"))
}

pub struct XmlArchiveWriter<W: Write> {
    writer: Writer<W>,
    open: bool,
}

impl<W: Write> XmlArchiveWriter<W> {
    pub fn new(inner: W) -> PersistResult<Self> {
        let mut writer = Writer::new(inner);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_error)?;
        let mut root = BytesStart::new("archive");
        root.push_attribute(("version", VERSION));
        writer.write_event(Event::Start(root)).map_err(xml_error)?;
        Ok(Self { writer, open: true })
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn start(&mut self, element: BytesStart<'_>) -> PersistResult<()> {
        self.writer
            .write_event(Event::Start(element))
            .map_err(xml_error)
    }

    fn end(&mut self, name: &str) -> PersistResult<()> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_error)
    }
}

impl<W: Write> ArchiveWriter for XmlArchiveWriter<W> {
    fn begin_set(&mut self, id: u32, count: usize) -> PersistResult<()> {
        let mut set = BytesStart::new("set");
        set.push_attribute(("id", id.to_string().as_str()));
        set.push_attribute(("count", count.to_string().as_str()));
        self.start(set)
    }

    fn end_set(&mut self) -> PersistResult<()> {
        self.end("set")
    }

    fn begin_record(&mut self, name: &str, tag: char, count: usize) -> PersistResult<()> {
        let mut record = BytesStart::new("record");
        record.push_attribute(("name", name));
        record.push_attribute(("type", tag.to_string().as_str()));
        record.push_attribute(("count", count.to_string().as_str()));
        self.start(record)
    }

    fn end_record(&mut self) -> PersistResult<()> {
        self.end("record")
    }

    fn write_scalar(&mut self, text: &str) -> PersistResult<()> {
        self.start(BytesStart::new("value"))?;
        if !text.is_empty() {
            self.writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(xml_error)?;
        }
        self.end("value")
    }

    fn write_reference(&mut self, id: u32) -> PersistResult<()> {
        let mut reference = BytesStart::new("ref");
        reference.push_attribute(("id", id.to_string().as_str()));
        self.writer
            .write_event(Event::Empty(reference))
            .map_err(xml_error)
    }

    fn finish(&mut self) -> PersistResult<()> {
        if self.open {
            self.end("archive")?;
            self.open = false;
        }
        self.writer.get_mut().flush()?;
        Ok(())
    }
}

#[derive(Debug)]
enum Token {
    Start { name: String, attrs: Vec<(String, String)> },
    Empty { name: String, attrs: Vec<(String, String)> },
    End { name: String },
    Text(String),
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Start { name, .. } => format!("<{name}>"),
            Token::Empty { name, .. } => format!("<{name}/>"),
            Token::End { name } => format!("</{name}>"),
            Token::Text(_) => "text".to_string(),
            Token::Eof => "end of input".to_string(),
        }
    }
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> PersistResult<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| PersistError::invalid(format!("xml archive: missing attribute {key}")))
}

fn numeric_attr<T: std::str::FromStr>(attrs: &[(String, String)], key: &str) -> PersistResult<T> {
    let raw = attr(attrs, key)?;
    raw.parse::<T>()
        .map_err(|_| PersistError::invalid(format!("xml archive: bad {key} attribute {raw:?}")))
}

fn element_parts(element: &BytesStart<'_>) -> PersistResult<(String, Vec<(String, String)>)> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let attrs = element
        .attributes()
        .map(|attribute| {
            let attribute = attribute.map_err(xml_error)?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(xml_error)?.into_owned();
            Ok((key, value))
        })
        .collect::<PersistResult<Vec<_>>>()?;
    Ok((name, attrs))
}

pub struct XmlArchiveReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

impl<R: BufRead> XmlArchiveReader<R> {
    pub fn new(inner: R) -> PersistResult<Self> {
        let mut reader = Self {
            reader: Reader::from_reader(inner),
            buf: Vec::new(),
        };
        match reader.structural()? {
            Token::Start { name, attrs } if name == "archive" => {
                let version = attr(&attrs, "version")?;
                if version != VERSION {
                    return Err(PersistError::invalid(format!(
                        "xml archive: unsupported version {version}"
                    )));
                }
                Ok(reader)
            }
            other => Err(PersistError::invalid(format!(
                "not a persist xml archive: found {}",
                other.describe()
            ))),
        }
    }

    fn token(&mut self) -> PersistResult<Token> {
        loop {
            self.buf.clear();
            let token = match self.reader.read_event_into(&mut self.buf).map_err(xml_error)? {
                Event::Start(element) => {
                    let (name, attrs) = element_parts(&element)?;
                    Token::Start { name, attrs }
                }
                Event::Empty(element) => {
                    let (name, attrs) = element_parts(&element)?;
                    Token::Empty { name, attrs }
                }
                Event::End(element) => Token::End {
                    name: String::from_utf8_lossy(element.name().as_ref()).into_owned(),
                },
                Event::Text(text) => Token::Text(text.unescape().map_err(xml_error)?.into_owned()),
                Event::CData(data) => {
                    Token::Text(String::from_utf8_lossy(&data.into_inner()).into_owned())
                }
                Event::Eof => Token::Eof,
                _ => continue,
            };
            return Ok(token);
        }
    }

    /// Next token that is not inter-element whitespace.
    fn structural(&mut self) -> PersistResult<Token> {
        loop {
            match self.token()? {
                Token::Text(text) if text.trim().is_empty() => continue,
                token => return Ok(token),
            }
        }
    }

    fn expect_end(&mut self, expected: &str) -> PersistResult<()> {
        match self.structural()? {
            Token::End { name } if name == expected => Ok(()),
            other => Err(PersistError::invalid(format!(
                "xml archive: expected </{expected}>, found {}",
                other.describe()
            ))),
        }
    }

    fn read_value_text(&mut self) -> PersistResult<String> {
        match self.token()? {
            Token::End { name } if name == "value" => Ok(String::new()),
            Token::Text(text) => {
                self.expect_end("value")?;
                Ok(text)
            }
            other => Err(PersistError::invalid(format!(
                "xml archive: expected value text, found {}",
                other.describe()
            ))),
        }
    }
}

impl<R: BufRead> ArchiveReader for XmlArchiveReader<R> {
    fn begin_set(&mut self) -> PersistResult<(u32, usize)> {
        match self.structural()? {
            Token::Start { name, attrs } if name == "set" => {
                Ok((numeric_attr(&attrs, "id")?, numeric_attr(&attrs, "count")?))
            }
            other => Err(PersistError::invalid(format!(
                "xml archive: expected <set>, found {}",
                other.describe()
            ))),
        }
    }

    fn end_set(&mut self) -> PersistResult<()> {
        self.expect_end("set")
    }

    fn begin_record(&mut self) -> PersistResult<RecordHeader> {
        match self.structural()? {
            Token::Start { name, attrs } if name == "record" => {
                let mut tag = attr(&attrs, "type")?.chars();
                let (Some(first), None) = (tag.next(), tag.next()) else {
                    return Err(PersistError::invalid("xml archive: type must be one letter"));
                };
                Ok(RecordHeader {
                    name: attr(&attrs, "name")?.to_string(),
                    tag: first,
                    count: numeric_attr(&attrs, "count")?,
                })
            }
            other => Err(PersistError::invalid(format!(
                "xml archive: expected <record>, found {}",
                other.describe()
            ))),
        }
    }

    fn end_record(&mut self) -> PersistResult<()> {
        self.expect_end("record")
    }

    fn next_item(&mut self) -> PersistResult<ArchiveItem> {
        match self.structural()? {
            Token::Start { name, .. } if name == "value" => {
                Ok(ArchiveItem::Scalar(self.read_value_text()?))
            }
            Token::Empty { name, .. } if name == "value" => Ok(ArchiveItem::Scalar(String::new())),
            Token::Empty { name, attrs } if name == "ref" => {
                Ok(ArchiveItem::Reference(numeric_attr(&attrs, "id")?))
            }
            Token::Start { name, attrs } if name == "set" => Ok(ArchiveItem::Set {
                id: numeric_attr(&attrs, "id")?,
                count: numeric_attr(&attrs, "count")?,
            }),
            other => Err(PersistError::invalid(format!(
                "xml archive: expected a value, found {}",
                other.describe()
            ))),
        }
    }
}
