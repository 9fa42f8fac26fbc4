//! Value types shared by every persist crate.
//!
//! - [`PersistError`]: the four failure kinds surfaced by persistence calls
//! - [`TemporalValue`]: nanosecond instants with UTC/TAI and MJD conversions
//! - [`PropertySet`]: ordered name/value bag used for additional data and as
//!   the built-in persistable type

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
mod property;
mod temporal;

pub use error::{PersistError, PersistResult};
pub use property::{PropertyKind, PropertySet, PropertyType, PropertyValue};
pub use temporal::{CivilTime, TemporalValue, Timescale, LEAP_SECONDS, NSECS_PER_DAY};

/// Additional data travelling with every persist/retrieve call.
pub type AdditionalData = PropertySet;
