//! Property sets to and from archive streams.

use super::{ArchiveItem, ArchiveReader, ArchiveWriter};
use persist_types::{
    PersistError, PersistResult, PropertyKind, PropertySet, PropertyValue, TemporalValue,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

const ROOT_ID: u32 = 0;

#[derive(Default)]
struct WrittenSets {
    ids: HashMap<*const PropertySet, u32>,
    next: u32,
}

/// Write `set` as one top-level archive set.
///
/// A nested set reachable through the same `Arc` more than once is written
/// once and referenced by id afterwards.
pub fn write_property_set(writer: &mut dyn ArchiveWriter, set: &PropertySet) -> PersistResult<()> {
    let mut written = WrittenSets {
        ids: HashMap::new(),
        next: ROOT_ID + 1,
    };
    write_set(writer, set, ROOT_ID, &mut written)
}

fn write_set(
    writer: &mut dyn ArchiveWriter,
    set: &PropertySet,
    id: u32,
    written: &mut WrittenSets,
) -> PersistResult<()> {
    writer.begin_set(id, set.len())?;
    for (name, values) in set.iter() {
        let kind = values.first().map_or(PropertyKind::Text, PropertyValue::kind);
        writer.begin_record(name, kind.tag(), values.len())?;
        for value in values {
            write_value(writer, value, written)?;
        }
        writer.end_record()?;
    }
    writer.end_set()
}

fn write_value(
    writer: &mut dyn ArchiveWriter,
    value: &PropertyValue,
    written: &mut WrittenSets,
) -> PersistResult<()> {
    match value {
        PropertyValue::Set(nested) => {
            let key = Arc::as_ptr(nested);
            if let Some(&id) = written.ids.get(&key) {
                return writer.write_reference(id);
            }
            let id = written.next;
            written.next += 1;
            written.ids.insert(key, id);
            write_set(writer, nested, id, written)
        }
        PropertyValue::Bool(v) => writer.write_scalar(if *v { "1" } else { "0" }),
        PropertyValue::Temporal(v) => writer.write_scalar(&v.nsecs().to_string()),
        PropertyValue::Text(v) => writer.write_scalar(v),
        scalar => writer.write_scalar(&scalar.to_string()),
    }
}

/// Read one top-level set written by [`write_property_set`].
pub fn read_property_set(reader: &mut dyn ArchiveReader) -> PersistResult<PropertySet> {
    let mut seen = HashMap::new();
    let (_, count) = reader.begin_set()?;
    read_set_body(reader, count, &mut seen)
}

fn read_set_body(
    reader: &mut dyn ArchiveReader,
    count: usize,
    seen: &mut HashMap<u32, Arc<PropertySet>>,
) -> PersistResult<PropertySet> {
    let mut set = PropertySet::new();
    for _ in 0..count {
        let header = reader.begin_record()?;
        let kind = PropertyKind::from_tag(header.tag).ok_or_else(|| {
            PersistError::invalid(format!(
                "unknown type tag '{}' for {}",
                header.tag, header.name
            ))
        })?;
        // The count is untrusted input; values are only kept once read.
        let mut values = Vec::new();
        for read in 0..header.count {
            let item = reader.next_item().map_err(|e| {
                PersistError::invalid(format!(
                    "record {} declares {} values but value {read} is unreadable: {e}",
                    header.name, header.count
                ))
            })?;
            values.push(read_value(reader, kind, item, seen)?);
        }
        reader.end_record()?;
        if !values.is_empty() {
            set.set_array(header.name, values)?;
        }
    }
    reader.end_set()?;
    Ok(set)
}

fn read_value(
    reader: &mut dyn ArchiveReader,
    kind: PropertyKind,
    item: ArchiveItem,
    seen: &mut HashMap<u32, Arc<PropertySet>>,
) -> PersistResult<PropertyValue> {
    match (kind, item) {
        (PropertyKind::Set, ArchiveItem::Set { id, count }) => {
            let nested = Arc::new(read_set_body(reader, count, seen)?);
            seen.insert(id, Arc::clone(&nested));
            Ok(PropertyValue::Set(nested))
        }
        (PropertyKind::Set, ArchiveItem::Reference(id)) => seen
            .get(&id)
            .cloned()
            .map(PropertyValue::Set)
            .ok_or_else(|| PersistError::invalid(format!("reference to unknown set {id}"))),
        (kind, ArchiveItem::Scalar(text)) if kind != PropertyKind::Set => parse_scalar(kind, &text),
        (kind, item) => Err(PersistError::invalid(format!(
            "archive item {item:?} does not match type {kind:?}"
        ))),
    }
}

fn parse<T: FromStr>(kind: PropertyKind, text: &str) -> PersistResult<T> {
    text.parse::<T>()
        .map_err(|_| PersistError::invalid(format!("cannot parse {text:?} as {kind:?}")))
}

fn parse_scalar(kind: PropertyKind, text: &str) -> PersistResult<PropertyValue> {
    Ok(match kind {
        PropertyKind::Bool => match text {
            "1" | "true" => PropertyValue::Bool(true),
            "0" | "false" => PropertyValue::Bool(false),
            _ => return Err(PersistError::invalid(format!("cannot parse {text:?} as Bool"))),
        },
        PropertyKind::Int8 => PropertyValue::Int8(parse(kind, text)?),
        PropertyKind::UInt8 => PropertyValue::UInt8(parse(kind, text)?),
        PropertyKind::Int16 => PropertyValue::Int16(parse(kind, text)?),
        PropertyKind::UInt16 => PropertyValue::UInt16(parse(kind, text)?),
        PropertyKind::Int32 => PropertyValue::Int32(parse(kind, text)?),
        PropertyKind::UInt32 => PropertyValue::UInt32(parse(kind, text)?),
        PropertyKind::Int64 => PropertyValue::Int64(parse(kind, text)?),
        PropertyKind::UInt64 => PropertyValue::UInt64(parse(kind, text)?),
        PropertyKind::Float32 => PropertyValue::Float32(parse(kind, text)?),
        PropertyKind::Float64 => PropertyValue::Float64(parse(kind, text)?),
        PropertyKind::Text => PropertyValue::Text(text.to_string()),
        PropertyKind::Temporal => PropertyValue::Temporal(TemporalValue::from_nsecs(parse(kind, text)?)),
        PropertyKind::Set => {
            return Err(PersistError::invalid("nested set written as a scalar"));
        }
    })
}
