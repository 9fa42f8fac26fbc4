//! Nanosecond instants and timescale arithmetic.
//!
//! A [`TemporalValue`] is a signed count of nanoseconds since
//! 1970-01-01T00:00:00 in whichever timescale the caller is tracking. The
//! UTC/TAI conversions consult [`LEAP_SECONDS`]; instants before its first
//! row use the pre-1972 drift formula instead.

use crate::{PersistError, PersistResult};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// Nanoseconds per civil day.
pub const NSECS_PER_DAY: i64 = 86_400_000_000_000;

const NSECS_PER_SEC: i64 = 1_000_000_000;

/// Modified Julian Date of the epoch.
const EPOCH_MJD: f64 = 40_587.0;

/// `(days since epoch, TAI - UTC in seconds)` in effect from that day on.
///
/// Rows are strictly increasing in both columns.
pub const LEAP_SECONDS: [(i64, i64); 24] = [
    (730, 10),   // 1972-01-01
    (912, 11),   // 1972-07-01
    (1096, 12),  // 1973-01-01
    (1461, 13),  // 1974-01-01
    (1826, 14),  // 1975-01-01
    (2191, 15),  // 1976-01-01
    (2557, 16),  // 1977-01-01
    (2922, 17),  // 1978-01-01
    (3287, 18),  // 1979-01-01
    (3652, 19),  // 1980-01-01
    (4199, 20),  // 1981-07-01
    (4564, 21),  // 1982-07-01
    (4929, 22),  // 1983-07-01
    (5660, 23),  // 1985-07-01
    (6574, 24),  // 1988-01-01
    (7305, 25),  // 1990-01-01
    (7670, 26),  // 1991-01-01
    (8217, 27),  // 1992-07-01
    (8582, 28),  // 1993-07-01
    (8947, 29),  // 1994-07-01
    (9496, 30),  // 1996-01-01
    (10043, 31), // 1997-07-01
    (10592, 32), // 1999-01-01
    (13149, 33), // 2006-01-01
];

// Before 1972, TAI - UTC = 4.21317 s + (MJD - 39126) * 0.002592 s.
// In nanoseconds of UTC since the epoch that is 8_000_082_000 + 3 * U / 10^8,
// kept in integer form so the inverse is exact.
const DRIFT_BASE_NSECS: i128 = 8_000_082_000;
const DRIFT_NUM: i128 = 3;
const DRIFT_DEN: i128 = 100_000_000;

/// Timescale an instant is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timescale {
    Utc,
    Tai,
}

/// Broken-down civil time in the proleptic Gregorian calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CivilTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub nanosecond: u32,
}

impl CivilTime {
    pub fn new(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            nanosecond: 0,
        }
    }

    pub fn with_nanosecond(mut self, nanosecond: u32) -> Self {
        self.nanosecond = nanosecond;
        self
    }

    pub fn to_naive(self) -> PersistResult<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .and_then(|date| {
                date.and_hms_nano_opt(self.hour, self.minute, self.second, self.nanosecond)
            })
            .ok_or_else(|| PersistError::invalid(format!("invalid civil time: {self}")))
    }

    pub fn from_naive(naive: &NaiveDateTime) -> Self {
        Self {
            year: naive.year(),
            month: naive.month(),
            day: naive.day(),
            hour: naive.hour(),
            minute: naive.minute(),
            second: naive.second(),
            nanosecond: naive.nanosecond(),
        }
    }
}

impl fmt::Display for CivilTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        if self.nanosecond != 0 {
            write!(f, ".{:09}", self.nanosecond)?;
        }
        Ok(())
    }
}

impl FromStr for CivilTime {
    type Err = PersistError;

    /// Accepts `YYYY-MM-DD HH:MM:SS[.fraction]`, with `T` allowed as the
    /// separator and an optional trailing `Z`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_end_matches('Z').replacen('T', " ", 1);
        NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f")
            .map(|naive| Self::from_naive(&naive))
            .map_err(|e| PersistError::invalid(format!("unparseable civil time {s:?}: {e}")))
    }
}

/// Immutable nanosecond-resolution instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TemporalValue {
    nsecs: i64,
}

impl TemporalValue {
    pub const fn from_nsecs(nsecs: i64) -> Self {
        Self { nsecs }
    }

    pub const fn nsecs(self) -> i64 {
        self.nsecs
    }

    /// Instant from a Modified Julian Date, scaled linearly around the epoch.
    pub fn from_mjd(mjd: f64) -> Self {
        Self::from_nsecs(((mjd - EPOCH_MJD) * NSECS_PER_DAY as f64) as i64)
    }

    /// Modified Julian Date of this instant in its own timescale.
    pub fn to_mjd(self) -> f64 {
        self.nsecs as f64 / NSECS_PER_DAY as f64 + EPOCH_MJD
    }

    /// Modified Julian Date in UTC of an instant held in TAI.
    pub fn tai_to_mjd(self) -> f64 {
        self.tai_to_utc().to_mjd()
    }

    pub fn utc_to_tai(self) -> Self {
        let utc = self.nsecs;
        let row = LEAP_SECONDS
            .iter()
            .rposition(|&(day, _)| utc >= day * NSECS_PER_DAY);
        match row {
            Some(row) => Self::from_nsecs(utc.saturating_add(LEAP_SECONDS[row].1 * NSECS_PER_SEC)),
            None => Self::from_nsecs(clamp_i64(drift_forward(i128::from(utc)))),
        }
    }

    pub fn tai_to_utc(self) -> Self {
        let tai = self.nsecs;
        let row = LEAP_SECONDS
            .iter()
            .rposition(|&(day, secs)| tai >= day * NSECS_PER_DAY + secs * NSECS_PER_SEC);
        match row {
            Some(row) => Self::from_nsecs(tai.saturating_sub(LEAP_SECONDS[row].1 * NSECS_PER_SEC)),
            None => Self::from_nsecs(drift_inverse(tai)),
        }
    }

    pub fn convert(self, from: Timescale, to: Timescale) -> Self {
        match (from, to) {
            (Timescale::Utc, Timescale::Tai) => self.utc_to_tai(),
            (Timescale::Tai, Timescale::Utc) => self.tai_to_utc(),
            _ => self,
        }
    }

    pub fn from_civil(civil: CivilTime) -> PersistResult<Self> {
        civil
            .to_naive()?
            .and_utc()
            .timestamp_nanos_opt()
            .map(Self::from_nsecs)
            .ok_or_else(|| PersistError::invalid(format!("civil time out of range: {civil}")))
    }

    pub fn to_civil(self) -> CivilTime {
        let (secs, nanos) = self.to_timespec();
        let instant = DateTime::<Utc>::from_timestamp(secs, nanos).unwrap_or_default();
        CivilTime::from_naive(&instant.naive_utc())
    }

    /// Whole seconds since the epoch and the non-negative nanosecond remainder.
    pub fn to_timespec(self) -> (i64, u32) {
        let secs = self.nsecs.div_euclid(NSECS_PER_SEC);
        let nanos = self.nsecs.rem_euclid(NSECS_PER_SEC) as u32;
        (secs, nanos)
    }
}

impl fmt::Display for TemporalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_civil(), f)
    }
}

fn drift_forward(utc: i128) -> i128 {
    utc + DRIFT_BASE_NSECS + (DRIFT_NUM * utc).div_euclid(DRIFT_DEN)
}

fn drift_inverse(tai: i64) -> i64 {
    let tai = i128::from(tai);
    // Within one nanosecond of the answer; walk to the exact preimage.
    let mut utc = ((tai - DRIFT_BASE_NSECS) * DRIFT_DEN).div_euclid(DRIFT_DEN + DRIFT_NUM);
    while drift_forward(utc) > tai {
        utc -= 1;
    }
    while drift_forward(utc + 1) <= tai {
        utc += 1;
    }
    clamp_i64(utc)
}

fn clamp_i64(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}
