//! Typed column bindings.
//!
//! A [`BoundVar`] carries a wire type tag, signedness, a null flag and a
//! little-endian byte buffer. [`DbType`] maps Rust values onto that form and
//! back, converting between numeric, text and temporal wire types the way a
//! client library's column fetch does.

use persist_types::{CivilTime, PersistError, PersistResult, TemporalValue};
use std::fmt;
use std::marker::PhantomData;

/// Output buffer ceiling for text columns.
pub const TEXT_CAPACITY: usize = 4096;

/// Size of the civil-time record: year as i32, then month, day, hour,
/// minute, second and nanosecond as u32.
pub const CIVIL_RECORD_LEN: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Null,
    Bool,
    Tiny,
    Short,
    Long,
    LongLong,
    Float,
    Double,
    DateTime,
    VarString,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundVar {
    field_type: FieldType,
    is_unsigned: bool,
    is_null: bool,
    data: Vec<u8>,
}

impl Default for BoundVar {
    fn default() -> Self {
        Self::null()
    }
}

impl BoundVar {
    pub fn null() -> Self {
        Self {
            field_type: FieldType::Null,
            is_unsigned: false,
            is_null: true,
            data: Vec::new(),
        }
    }

    pub fn from_value<T: DbType>(value: &T) -> Self {
        let mut var = Self::null();
        var.assign(value);
        var
    }

    pub(crate) fn from_text_bytes(bytes: Vec<u8>) -> Self {
        Self {
            field_type: FieldType::VarString,
            is_unsigned: false,
            is_null: false,
            data: bytes,
        }
    }

    /// Overwrite in place, reusing the buffer.
    pub fn assign<T: DbType>(&mut self, value: &T) {
        self.field_type = T::FIELD_TYPE;
        self.is_unsigned = T::UNSIGNED;
        self.is_null = false;
        self.data.clear();
        value.encode(&mut self.data);
    }

    /// Mark as NULL; keeps the type tag of the previous value.
    pub fn set_null(&mut self) {
        self.is_null = true;
        self.data.clear();
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn is_unsigned(&self) -> bool {
        self.is_unsigned
    }

    pub fn is_null(&self) -> bool {
        self.is_null
    }

    pub fn length(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn decode<T: DbType>(&self) -> PersistResult<T> {
        if self.is_null {
            return Err(PersistError::invalid("cannot decode a NULL value"));
        }
        T::decode(self)
    }

    /// Integer view of bool and integer wire types.
    pub fn integer(&self) -> Option<i128> {
        let d = self.data.as_slice();
        let u = self.is_unsigned;
        match self.field_type {
            FieldType::Bool => d.first().map(|b| i128::from(*b != 0)),
            FieldType::Tiny if u => le::<1>(d).map(|b| i128::from(u8::from_le_bytes(b))),
            FieldType::Tiny => le::<1>(d).map(|b| i128::from(i8::from_le_bytes(b))),
            FieldType::Short if u => le::<2>(d).map(|b| i128::from(u16::from_le_bytes(b))),
            FieldType::Short => le::<2>(d).map(|b| i128::from(i16::from_le_bytes(b))),
            FieldType::Long if u => le::<4>(d).map(|b| i128::from(u32::from_le_bytes(b))),
            FieldType::Long => le::<4>(d).map(|b| i128::from(i32::from_le_bytes(b))),
            FieldType::LongLong if u => le::<8>(d).map(|b| i128::from(u64::from_le_bytes(b))),
            FieldType::LongLong => le::<8>(d).map(|b| i128::from(i64::from_le_bytes(b))),
            _ => None,
        }
    }

    pub fn float(&self) -> Option<f64> {
        match self.field_type {
            FieldType::Float => le::<4>(&self.data).map(|b| f64::from(f32::from_le_bytes(b))),
            FieldType::Double => le::<8>(&self.data).map(f64::from_le_bytes),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self.field_type {
            FieldType::VarString => std::str::from_utf8(&self.data).ok(),
            _ => None,
        }
    }

    pub fn civil(&self) -> Option<CivilTime> {
        if self.field_type != FieldType::DateTime {
            return None;
        }
        let d = self.data.as_slice();
        if d.len() != CIVIL_RECORD_LEN {
            return None;
        }
        let field = |i: usize| le::<4>(&d[4 + 4 * i..8 + 4 * i]).map(u32::from_le_bytes);
        Some(CivilTime {
            year: le::<4>(&d[..4]).map(i32::from_le_bytes)?,
            month: field(0)?,
            day: field(1)?,
            hour: field(2)?,
            minute: field(3)?,
            second: field(4)?,
            nanosecond: field(5)?,
        })
    }

    /// Text form used by delimited staging files.
    pub fn render(&self) -> PersistResult<String> {
        if self.is_null {
            return Err(PersistError::invalid("NULL has no text form"));
        }
        if let Some(v) = self.integer() {
            return Ok(v.to_string());
        }
        match self.field_type {
            FieldType::Float => le::<4>(&self.data).map(|b| f32::from_le_bytes(b).to_string()),
            FieldType::Double => self.float().map(|v| v.to_string()),
            FieldType::VarString => self.text().map(str::to_string),
            FieldType::DateTime => self.civil().map(|c| c.to_string()),
            _ => None,
        }
        .ok_or_else(|| self.malformed())
    }

    /// Cut text down to `capacity` bytes on a character boundary.
    pub(crate) fn truncate_text(&mut self, capacity: usize) -> bool {
        if self.field_type != FieldType::VarString || self.data.len() <= capacity {
            return false;
        }
        let mut end = capacity;
        while end > 0 && (self.data[end] & 0xC0) == 0x80 {
            end -= 1;
        }
        self.data.truncate(end);
        true
    }

    fn malformed(&self) -> PersistError {
        PersistError::invalid(format!(
            "malformed {:?} value of {} bytes",
            self.field_type,
            self.data.len()
        ))
    }

    fn integral(&self, target: &str) -> PersistResult<i128> {
        if let Some(v) = self.integer() {
            return Ok(v);
        }
        if let Some(v) = self.float() {
            if v.is_finite() && v.fract() == 0.0 && v.abs() < 1.7e38 {
                return Ok(v as i128);
            }
        }
        if let Some(text) = self.text() {
            if let Ok(v) = text.trim().parse::<i128>() {
                return Ok(v);
            }
        }
        Err(self.conversion(target))
    }

    fn real(&self, target: &str) -> PersistResult<f64> {
        if let Some(v) = self.float() {
            return Ok(v);
        }
        if let Some(v) = self.integer() {
            return Ok(v as f64);
        }
        self.text()
            .and_then(|t| t.trim().parse::<f64>().ok())
            .ok_or_else(|| self.conversion(target))
    }

    fn conversion(&self, target: &str) -> PersistError {
        PersistError::invalid(format!(
            "cannot convert {:?} column to {target}",
            self.field_type
        ))
    }
}

fn le<const N: usize>(data: &[u8]) -> Option<[u8; N]> {
    data.try_into().ok()
}

/// Rust types that cross the database boundary.
pub trait DbType: Sized {
    const FIELD_TYPE: FieldType;
    const UNSIGNED: bool = false;
    /// Output buffer size reserved for this type.
    const WIDTH: usize;

    fn encode(&self, buf: &mut Vec<u8>);
    fn decode(var: &BoundVar) -> PersistResult<Self>;
}

macro_rules! integer_db_type {
    ($($ty:ty => $field:ident, $unsigned:expr;)*) => {
        $(
            impl DbType for $ty {
                const FIELD_TYPE: FieldType = FieldType::$field;
                const UNSIGNED: bool = $unsigned;
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn encode(&self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(&self.to_le_bytes());
                }

                fn decode(var: &BoundVar) -> PersistResult<Self> {
                    let wide = var.integral(stringify!($ty))?;
                    <$ty>::try_from(wide).map_err(|_| {
                        PersistError::invalid(format!(
                            "value {wide} out of range for {}",
                            stringify!($ty)
                        ))
                    })
                }
            }
        )*
    };
}

integer_db_type! {
    i8 => Tiny, false;
    u8 => Tiny, true;
    i16 => Short, false;
    u16 => Short, true;
    i32 => Long, false;
    u32 => Long, true;
    i64 => LongLong, false;
    u64 => LongLong, true;
}

impl DbType for bool {
    const FIELD_TYPE: FieldType = FieldType::Bool;
    const UNSIGNED: bool = true;
    const WIDTH: usize = 1;

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(u8::from(*self));
    }

    fn decode(var: &BoundVar) -> PersistResult<Self> {
        if let Some(text) = var.text() {
            return match text.trim().to_ascii_lowercase().as_str() {
                "1" | "t" | "true" => Ok(true),
                "0" | "f" | "false" => Ok(false),
                _ => Err(var.conversion("bool")),
            };
        }
        var.integral("bool").map(|v| v != 0)
    }
}

impl DbType for f32 {
    const FIELD_TYPE: FieldType = FieldType::Float;
    const WIDTH: usize = 4;

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }

    fn decode(var: &BoundVar) -> PersistResult<Self> {
        var.real("f32").map(|v| v as f32)
    }
}

impl DbType for f64 {
    const FIELD_TYPE: FieldType = FieldType::Double;
    const WIDTH: usize = 8;

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }

    fn decode(var: &BoundVar) -> PersistResult<Self> {
        var.real("f64")
    }
}

impl DbType for String {
    const FIELD_TYPE: FieldType = FieldType::VarString;
    const WIDTH: usize = TEXT_CAPACITY;

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }

    fn decode(var: &BoundVar) -> PersistResult<Self> {
        var.render()
    }
}

impl DbType for TemporalValue {
    const FIELD_TYPE: FieldType = FieldType::DateTime;
    const WIDTH: usize = CIVIL_RECORD_LEN;

    fn encode(&self, buf: &mut Vec<u8>) {
        let civil = self.to_civil();
        buf.extend_from_slice(&civil.year.to_le_bytes());
        for field in [
            civil.month,
            civil.day,
            civil.hour,
            civil.minute,
            civil.second,
            civil.nanosecond,
        ] {
            buf.extend_from_slice(&field.to_le_bytes());
        }
    }

    fn decode(var: &BoundVar) -> PersistResult<Self> {
        if let Some(civil) = var.civil() {
            return TemporalValue::from_civil(civil);
        }
        match var.text() {
            Some(text) => TemporalValue::from_civil(text.parse()?),
            None => Err(var.conversion("TemporalValue")),
        }
    }
}

/// Shape of an output binding, fixed when the binding is requested.
#[derive(Clone, Copy)]
pub struct OutSpec {
    pub field_type: FieldType,
    pub unsigned: bool,
    pub capacity: usize,
    convert: fn(&BoundVar) -> PersistResult<BoundVar>,
}

impl OutSpec {
    pub fn of<T: DbType>() -> Self {
        Self {
            field_type: T::FIELD_TYPE,
            unsigned: T::UNSIGNED,
            capacity: T::WIDTH,
            convert: reencode::<T>,
        }
    }

    /// Convert a fetched column into this binding's type.
    pub(crate) fn fill(&self, wire: &BoundVar, target: &mut BoundVar) -> PersistResult<bool> {
        if wire.is_null() {
            target.set_null();
            return Ok(false);
        }
        *target = (self.convert)(wire)?;
        Ok(target.truncate_text(self.capacity))
    }
}

impl fmt::Debug for OutSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutSpec")
            .field("field_type", &self.field_type)
            .field("unsigned", &self.unsigned)
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn reencode<T: DbType>(wire: &BoundVar) -> PersistResult<BoundVar> {
    Ok(BoundVar::from_value(&T::decode(wire)?))
}

/// Typed handle to an output binding requested with `out_param`.
pub struct OutParam<T> {
    index: usize,
    _type: PhantomData<fn() -> T>,
}

impl<T> OutParam<T> {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            _type: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for OutParam<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for OutParam<T> {}

impl<T> fmt::Debug for OutParam<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutParam({})", self.index)
    }
}
