use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Canonical textual form used by every tier: `2004-10-19 10:23:54.000000` (UTC).
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

// i64 microseconds overflow past roughly 292k years
const MAX_EPOCH_SECS: f64 = 9.0e12;

/// Point in time with microsecond resolution.
///
/// Serialized as the canonical string; deserialized from either an epoch
/// number or any accepted string form (see [`TimestampInput`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Truncates to microseconds so that a value survives a round trip
    /// through its canonical text unchanged.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let micros = (dt.nanosecond() / 1_000) * 1_000;
        Self(dt.with_nanosecond(micros).unwrap_or(dt))
    }

    pub fn from_epoch_secs(secs: f64) -> Result<Self, ValidationError> {
        if !secs.is_finite() || secs.abs() > MAX_EPOCH_SECS {
            return Err(ValidationError::InvalidTimestamp(secs.to_string()));
        }
        let micros = (secs * 1_000_000.0).round() as i64;
        DateTime::from_timestamp_micros(micros)
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidTimestamp(secs.to_string()))
    }

    /// Parse an epoch string (`"1700000000.25"`), RFC 3339, or one of the
    /// naive `YYYY-MM-DD[ T]HH:MM[:SS[.ffffff]]` / `YYYY-MM-DD` forms.
    /// Naive values are taken as UTC.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        let invalid = || ValidationError::InvalidTimestamp(input.to_string());

        if s.is_empty() {
            return Err(invalid());
        }

        if is_epoch_literal(s) {
            let secs: f64 = s.parse().map_err(|_| invalid())?;
            return Self::from_epoch_secs(secs);
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::from_datetime(dt.with_timezone(&Utc)));
        }

        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(Self::from_datetime(naive.and_utc()));
            }
        }

        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Self::from_datetime(naive.and_utc()))
            .ok_or_else(invalid)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn to_canonical(&self) -> String {
        self.0.format(CANONICAL_FORMAT).to_string()
    }
}

fn is_epoch_literal(s: &str) -> bool {
    let mut dots = 0;
    let mut digits = 0;
    for c in s.chars() {
        match c {
            '.' => dots += 1,
            c if c.is_ascii_digit() => digits += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical())
    }
}

impl FromStr for Timestamp {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Loosely-typed timestamp as it arrives from callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampInput {
    Epoch(f64),
    Text(String),
}

impl TryFrom<TimestampInput> for Timestamp {
    type Error = ValidationError;

    fn try_from(input: TimestampInput) -> Result<Self, Self::Error> {
        match input {
            TimestampInput::Epoch(secs) => Timestamp::from_epoch_secs(secs),
            TimestampInput::Text(text) => Timestamp::parse(&text),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let input = TimestampInput::deserialize(deserializer)?;
        Timestamp::try_from(input).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_and_string_normalize_to_same_value() {
        let from_epoch = Timestamp::from_epoch_secs(1_098_181_434.5).unwrap();
        let from_text = Timestamp::parse("2004-10-19 10:23:54.500000").unwrap();
        let from_epoch_text = Timestamp::parse("1098181434.5").unwrap();

        assert_eq!(from_epoch, from_text);
        assert_eq!(from_epoch, from_epoch_text);
        assert_eq!(from_epoch.to_canonical(), "2004-10-19 10:23:54.500000");
    }

    #[test]
    fn test_accepts_iso_variants() {
        let expected = Timestamp::parse("2024-03-01 12:00:00").unwrap();

        assert_eq!(Timestamp::parse("2024-03-01T12:00:00").unwrap(), expected);
        assert_eq!(Timestamp::parse("2024-03-01T12:00:00Z").unwrap(), expected);
        assert_eq!(Timestamp::parse("2024-03-01T14:00:00+02:00").unwrap(), expected);
        assert_eq!(Timestamp::parse("2024-03-01 12:00").unwrap(), expected);
        assert_eq!(
            Timestamp::parse("2024-03-01").unwrap().to_canonical(),
            "2024-03-01 00:00:00.000000"
        );
    }

    #[test]
    fn test_rejects_garbage() {
        for bad in ["", "   ", "string", "yesterday", "2024-13-40", "1.2.3", "12:00"] {
            assert!(
                matches!(Timestamp::parse(bad), Err(ValidationError::InvalidTimestamp(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(Timestamp::from_epoch_secs(f64::NAN).is_err());
        assert!(Timestamp::from_epoch_secs(f64::INFINITY).is_err());
    }

    #[test]
    fn test_canonical_round_trip_is_stable() {
        let now = Timestamp::now();
        let reparsed = Timestamp::parse(&now.to_canonical()).unwrap();
        assert_eq!(now, reparsed);
    }

    #[test]
    fn test_serde_accepts_number_or_string() {
        let a: Timestamp = serde_json::from_str("1700000000").unwrap();
        let b: Timestamp = serde_json::from_str("\"2023-11-14 22:13:20\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            "\"2023-11-14 22:13:20.000000\""
        );
        assert!(serde_json::from_str::<Timestamp>("\"not a time\"").is_err());
    }
}
