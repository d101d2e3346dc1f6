use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::values::{IntervalUnit, Mixed};

/// Point in time as exchanged with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn from_datetime(value: &DateTime<Utc>) -> Self {
        Self {
            seconds: value.timestamp(),
            nanos: value.timestamp_subsec_nanos(),
        }
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.seconds, self.nanos)
            .single()
            .unwrap_or_default()
    }

    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }
}

/// Compares two instants at the granularity the server preserves.
pub fn same_second(a: &DateTime<Utc>, b: &DateTime<Utc>) -> bool {
    a.timestamp() == b.timestamp()
}

/// Tagged value stored under one property path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Int(i64),
    Bool(bool),
    Float(f64),
    Time(Timestamp),
    Amount { currency: String, units: i64 },
    Interval { unit: IntervalUnit, count: i64 },
    Raw(Vec<u8>),
    StringArray(Vec<String>),
    IntArray(Vec<i64>),
    KeyValue(BTreeMap<String, String>),
    Mixed(Mixed),
    KeyMixed(BTreeMap<String, Mixed>),
    /// Secure text: the plaintext only travels on writes and decrypted reads.
    Secure { plain: Option<String>, masked: String },
    /// Write-only secret; never returned by the server.
    Verify(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "TEXT",
            Self::Int(_) => "INT",
            Self::Bool(_) => "BOOL",
            Self::Float(_) => "FLOAT",
            Self::Time(_) => "TIME",
            Self::Amount { .. } => "AMOUNT",
            Self::Interval { .. } => "INTERVAL",
            Self::Raw(_) => "RAW",
            Self::StringArray(_) => "STRING_ARRAY",
            Self::IntArray(_) => "INT_ARRAY",
            Self::KeyValue(_) => "KEY_VALUE",
            Self::Mixed(_) => "MIXED",
            Self::KeyMixed(_) => "KEY_MIXED",
            Self::Secure { .. } => "SECURE",
            Self::Verify(_) => "VERIFY",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Secure { plain: Some(s), .. } => Some(s),
            Self::Mixed(Mixed::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Mixed(Mixed::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Mixed(Mixed::Float(f)) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Mixed(Mixed::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(ts) => Some(ts.to_datetime()),
            Self::Mixed(Mixed::Time(ts)) => Some(ts.to_datetime()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Int(i) => write!(f, "{}", i),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Time(ts) => write!(f, "{}", ts.to_datetime().to_rfc3339()),
            Self::Amount { currency, units } => write!(f, "{} {}", currency, units),
            Self::Interval { unit, count } => write!(f, "{}{}", count, unit.code()),
            Self::Raw(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Self::StringArray(items) => write!(f, "[{}]", items.join(", ")),
            Self::IntArray(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::KeyValue(map) => write!(f, "{:?}", map),
            Self::Mixed(m) => write!(f, "{}", m),
            Self::KeyMixed(map) => write!(f, "{} keys", map.len()),
            Self::Secure { masked, .. } => write!(f, "{}", masked),
            Self::Verify(_) => write!(f, "***"),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Time(Timestamp::from_datetime(&t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_roundtrip_second_granularity() {
        let dob = Utc.with_ymd_and_hms(1985, 6, 24, 0, 0, 0).unwrap();
        let ts = Timestamp::from_datetime(&dob);
        assert!(same_second(&ts.to_datetime(), &dob));
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::from(42i64).as_i64(), Some(42));
        assert_eq!(Value::from("a").as_str(), Some("a"));
        assert_eq!(Value::Mixed(Mixed::Bool(true)).as_bool(), Some(true));
        assert_eq!(
            Value::Secure {
                plain: None,
                masked: "Pe***".into()
            }
            .as_str(),
            None
        );
    }
}
