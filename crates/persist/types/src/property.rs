//! Ordered property bags.

use crate::{PersistError, PersistResult, TemporalValue};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Kind of value stored under a property name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Text,
    Temporal,
    Set,
}

impl PropertyKind {
    pub const ALL: [PropertyKind; 14] = [
        PropertyKind::Bool,
        PropertyKind::Int8,
        PropertyKind::UInt8,
        PropertyKind::Int16,
        PropertyKind::UInt16,
        PropertyKind::Int32,
        PropertyKind::UInt32,
        PropertyKind::Int64,
        PropertyKind::UInt64,
        PropertyKind::Float32,
        PropertyKind::Float64,
        PropertyKind::Text,
        PropertyKind::Temporal,
        PropertyKind::Set,
    ];

    /// One-letter tag used by the archive formats.
    pub const fn tag(self) -> char {
        match self {
            PropertyKind::Bool => 'b',
            PropertyKind::Int8 => 'c',
            PropertyKind::UInt8 => 'C',
            PropertyKind::Int16 => 's',
            PropertyKind::UInt16 => 'S',
            PropertyKind::Int32 => 'i',
            PropertyKind::UInt32 => 'I',
            PropertyKind::Int64 => 'l',
            PropertyKind::UInt64 => 'L',
            PropertyKind::Float32 => 'f',
            PropertyKind::Float64 => 'd',
            PropertyKind::Text => 't',
            PropertyKind::Temporal => 'T',
            PropertyKind::Set => 'p',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

/// One property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Temporal(TemporalValue),
    Set(Arc<PropertySet>),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::Int8(_) => PropertyKind::Int8,
            PropertyValue::UInt8(_) => PropertyKind::UInt8,
            PropertyValue::Int16(_) => PropertyKind::Int16,
            PropertyValue::UInt16(_) => PropertyKind::UInt16,
            PropertyValue::Int32(_) => PropertyKind::Int32,
            PropertyValue::UInt32(_) => PropertyKind::UInt32,
            PropertyValue::Int64(_) => PropertyKind::Int64,
            PropertyValue::UInt64(_) => PropertyKind::UInt64,
            PropertyValue::Float32(_) => PropertyKind::Float32,
            PropertyValue::Float64(_) => PropertyKind::Float64,
            PropertyValue::Text(_) => PropertyKind::Text,
            PropertyValue::Temporal(_) => PropertyKind::Temporal,
            PropertyValue::Set(_) => PropertyKind::Set,
        }
    }

    /// Integer view of boolean and integer values.
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            PropertyValue::Bool(v) => Some(i128::from(v)),
            PropertyValue::Int8(v) => Some(i128::from(v)),
            PropertyValue::UInt8(v) => Some(i128::from(v)),
            PropertyValue::Int16(v) => Some(i128::from(v)),
            PropertyValue::UInt16(v) => Some(i128::from(v)),
            PropertyValue::Int32(v) => Some(i128::from(v)),
            PropertyValue::UInt32(v) => Some(i128::from(v)),
            PropertyValue::Int64(v) => Some(i128::from(v)),
            PropertyValue::UInt64(v) => Some(i128::from(v)),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int8(v) => write!(f, "{v}"),
            PropertyValue::UInt8(v) => write!(f, "{v}"),
            PropertyValue::Int16(v) => write!(f, "{v}"),
            PropertyValue::UInt16(v) => write!(f, "{v}"),
            PropertyValue::Int32(v) => write!(f, "{v}"),
            PropertyValue::UInt32(v) => write!(f, "{v}"),
            PropertyValue::Int64(v) => write!(f, "{v}"),
            PropertyValue::UInt64(v) => write!(f, "{v}"),
            PropertyValue::Float32(v) => write!(f, "{v}"),
            PropertyValue::Float64(v) => write!(f, "{v}"),
            PropertyValue::Text(v) => f.write_str(v),
            PropertyValue::Temporal(v) => write!(f, "{v}"),
            PropertyValue::Set(set) => write!(f, "{{{} properties}}", set.len()),
        }
    }
}

/// Types that can be read back out of a [`PropertyValue`].
pub trait PropertyType: Sized {
    const KIND: PropertyKind;

    fn from_value(value: &PropertyValue) -> Option<Self>;
}

macro_rules! property_type {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl PropertyType for $ty {
                const KIND: PropertyKind = PropertyKind::$variant;

                fn from_value(value: &PropertyValue) -> Option<Self> {
                    match value {
                        PropertyValue::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for PropertyValue {
                fn from(value: $ty) -> Self {
                    PropertyValue::$variant(value)
                }
            }
        )*
    };
}

property_type! {
    bool => Bool,
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => Text,
    TemporalValue => Temporal,
    Arc<PropertySet> => Set,
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<PropertySet> for PropertyValue {
    fn from(value: PropertySet) -> Self {
        PropertyValue::Set(Arc::new(value))
    }
}

/// Ordered bag of named, homogeneous value arrays.
///
/// Names keep insertion order. Every stored array is non-empty and all of
/// its elements share one [`PropertyKind`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySet {
    entries: IndexMap<String, Vec<PropertyValue>>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is stored under `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.entries.insert(name.into(), vec![value.into()]);
    }

    /// Builder form of [`PropertySet::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Append a value; it must match the kind already stored under `name`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> PersistResult<()> {
        let name = name.into();
        let value = value.into();
        match self.entries.get_mut(&name) {
            Some(values) => {
                let existing = values[0].kind();
                if existing != value.kind() {
                    return Err(PersistError::invalid(format!(
                        "property {name} holds {existing:?}, cannot add {:?}",
                        value.kind()
                    )));
                }
                values.push(value);
            }
            None => {
                self.entries.insert(name, vec![value]);
            }
        }
        Ok(())
    }

    /// Replace `name` with a whole array.
    pub fn set_array(&mut self, name: impl Into<String>, values: Vec<PropertyValue>) -> PersistResult<()> {
        let name = name.into();
        let Some(first) = values.first() else {
            return Err(PersistError::invalid(format!("empty array for property {name}")));
        };
        let kind = first.kind();
        if values.iter().any(|v| v.kind() != kind) {
            return Err(PersistError::invalid(format!(
                "mixed value kinds for property {name}"
            )));
        }
        self.entries.insert(name, values);
        Ok(())
    }

    /// Last value stored under `name`.
    pub fn get<T: PropertyType>(&self, name: &str) -> PersistResult<T> {
        let value = self
            .last(name)
            .ok_or_else(|| PersistError::not_found(format!("property {name}")))?;
        T::from_value(value).ok_or_else(|| kind_mismatch::<T>(name, value.kind()))
    }

    pub fn get_array<T: PropertyType>(&self, name: &str) -> PersistResult<Vec<T>> {
        let values = self
            .values(name)
            .ok_or_else(|| PersistError::not_found(format!("property {name}")))?;
        values
            .iter()
            .map(|v| T::from_value(v).ok_or_else(|| kind_mismatch::<T>(name, v.kind())))
            .collect()
    }

    pub fn get_as_string(&self, name: &str) -> PersistResult<String> {
        self.get::<String>(name)
    }

    /// Last value under `name` widened to `i64`; accepts any integer kind.
    pub fn get_as_i64(&self, name: &str) -> PersistResult<i64> {
        let value = self
            .last(name)
            .ok_or_else(|| PersistError::not_found(format!("property {name}")))?;
        let wide = value.as_i128().ok_or_else(|| kind_mismatch::<i64>(name, value.kind()))?;
        i64::try_from(wide)
            .map_err(|_| PersistError::invalid(format!("property {name} value {wide} exceeds i64")))
    }

    pub fn values(&self, name: &str) -> Option<&[PropertyValue]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn last(&self, name: &str) -> Option<&PropertyValue> {
        self.entries.get(name).and_then(|values| values.last())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<PropertyKind> {
        self.last(name).map(PropertyValue::kind)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PropertyValue])> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<PropertyValue>> {
        self.entries.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every entry of `other` into `self`, replacing same-named entries.
    pub fn merge_from(&mut self, other: &PropertySet) {
        for (name, values) in &other.entries {
            self.entries.insert(name.clone(), values.clone());
        }
    }
}

fn kind_mismatch<T: PropertyType>(name: &str, found: PropertyKind) -> PersistError {
    PersistError::invalid(format!(
        "property {name} holds {found:?}, requested {:?}",
        T::KIND
    ))
}
