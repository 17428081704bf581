//! Utilities. OBVIOUSLY.

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use serde_derive::{Deserialize, Serialize};
use std::ops::Deref;
use std::str::FromStr;

pub(crate) mod ser;

/// A library-local representation of a time, held at millisecond precision.
///
/// Everything we sign (signature timestamps, envelope creation times, ledger
/// rows) is encoded as milliseconds since the Unix epoch, so we truncate on
/// the way in. That way a timestamp survives a serialization round trip
/// without drifting, and a signature made over it still verifies afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(#[serde(with = "chrono::serde::ts_milliseconds")] DateTime<Utc>);

impl Timestamp {
    /// Create a new Timestamp from the current date/time.
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Build a timestamp from milliseconds since the epoch.
    pub fn from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    /// Milliseconds since the epoch.
    pub fn millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Big-endian milliseconds, the form we feed into signatures and hashes.
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.millis().to_be_bytes()
    }

    /// Shift this timestamp by a duration. Saturates rather than overflowing.
    pub fn add(&self, duration: Duration) -> Self {
        match self.0.checked_add_signed(duration) {
            Some(dt) => Self::from(dt),
            None => *self,
        }
    }

    /// Shift this timestamp by a duration, or `None` if that leaves the range
    /// we can represent.
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        self.0.checked_add_signed(duration).map(Self::from)
    }

    pub fn local(&self) -> DateTime<Local> {
        DateTime::from(self.0)
    }
}

impl Deref for Timestamp {
    type Target = DateTime<Utc>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(date: DateTime<Utc>) -> Self {
        let millis = date.timestamp_millis();
        Self(Utc.timestamp_millis_opt(millis).single().unwrap_or(date))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::format::ParseError;
    fn from_str(s: &str) -> std::result::Result<Timestamp, Self::Err> {
        let datetime: DateTime<Utc> = s.parse()?;
        Ok(Timestamp::from(datetime))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }
}
