use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error as ThisError;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

///
/// Scalar newtypes
///
/// Compact integer-backed temporal and identity scalars. The wire carries
/// the raw representation; `time` handles the human-readable forms.
///

///
/// ScalarError
///

#[derive(Debug, ThisError)]
pub enum ScalarError {
    #[error("invalid calendar date {year:04}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u8, day: u8 },

    #[error("invalid date literal: {input}")]
    DateParse { input: String },

    #[error("invalid timestamp literal: {input}")]
    TimestampParse { input: String },

    #[error("invalid ulid literal: {input}")]
    UlidParse { input: String },
}

///
/// Date
///
/// Stored as a julian day number, so ordering and equality are integer
/// operations.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Date(i32);

impl Date {
    pub fn from_calendar(year: i32, month: u8, day: u8) -> Result<Self, ScalarError> {
        let month = time::Month::try_from(month)
            .map_err(|_| ScalarError::InvalidDate { year, month, day })?;
        let date = time::Date::from_calendar_date(year, month, day)
            .map_err(|_| ScalarError::InvalidDate { year, month: month as u8, day })?;

        Ok(Self(date.to_julian_day()))
    }

    #[must_use]
    pub const fn from_julian_day(day: i32) -> Self {
        Self(day)
    }

    #[must_use]
    pub const fn julian_day(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date = time::Date::from_julian_day(self.0).map_err(|_| fmt::Error)?;
        write!(
            f,
            "{:04}-{:02}-{:02}",
            date.year(),
            date.month() as u8,
            date.day()
        )
    }
}

impl FromStr for Date {
    type Err = ScalarError;

    // yyyy-mm-dd
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ScalarError::DateParse {
            input: s.to_string(),
        };
        let mut parts = s.splitn(3, '-');
        let year: i32 = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let month: u8 = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let day: u8 = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;

        Self::from_calendar(year, month, day).map_err(|_| err())
    }
}

///
/// Timestamp
///
/// Unix nanoseconds, signed. Covers 1677..2262 which is ample for query
/// payloads; wire peers exchange the raw integer.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    #[must_use]
    pub const fn from_unix_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[must_use]
    pub const fn from_unix_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    #[must_use]
    pub const fn unix_nanos(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let odt = OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0))
            .map_err(|_| fmt::Error)?;
        let text = odt.format(&Rfc3339).map_err(|_| fmt::Error)?;
        write!(f, "{text}")
    }
}

impl FromStr for Timestamp {
    type Err = ScalarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let odt = OffsetDateTime::parse(s, &Rfc3339).map_err(|_| ScalarError::TimestampParse {
            input: s.to_string(),
        })?;
        let nanos = i64::try_from(odt.unix_timestamp_nanos()).map_err(|_| {
            ScalarError::TimestampParse {
                input: s.to_string(),
            }
        })?;

        Ok(Self(nanos))
    }
}

///
/// Ulid
///
/// Serialized in canonical base32 text form; 128-bit integers do not fit
/// the common wire number types.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Ulid(ulid::Ulid);

impl Ulid {
    #[must_use]
    pub const fn from_u128(raw: u128) -> Self {
        Self(ulid::Ulid(raw))
    }

    #[must_use]
    pub const fn to_u128(self) -> u128 {
        self.0.0
    }
}

impl fmt::Display for Ulid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Ulid {
    type Err = ScalarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s)
            .map(Self)
            .map_err(|_| ScalarError::UlidParse {
                input: s.to_string(),
            })
    }
}

impl Serialize for Ulid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Ulid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
