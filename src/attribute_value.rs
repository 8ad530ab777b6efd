use std::collections::{HashMap, HashSet};

use chrono::{DateTime, LocalResult, TimeZone, Utc};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

// 2^53 - 1, past which an f64 no longer holds every integer.
const MAX_EXACT_FLOAT_SECONDS: f64 = 9_007_199_254_740_991_f64;

lazy_static! {
    static ref VERSION_NUMERIC_COMPONENTS_REGEX: Regex =
        Regex::new(r"^\d+(\.\d+)?(\.\d+)?").unwrap();
}

/// The attributes supplied alongside a key for a single evaluation.
pub type Attributes = HashMap<String, AttributeValue>;

/// An attribute value represents possible values that can be supplied in [Attributes].
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(from = "Value")]
pub enum AttributeValue {
    /// Stores a string value.
    String(String),
    /// Stores an integer. This is the only shape accepted by numeric matchers.
    Int(i64),
    /// Stores a floating point number. Only datetime matchers will accept it.
    Float(f64),
    /// Stores a boolean.
    Bool(bool),
    /// Stores an array of attribute values. Set matchers accept it when every element is a string.
    Array(Vec<AttributeValue>),
    /// Stores an instant; datetime matchers compare it at day granularity.
    Timestamp(DateTime<Utc>),
    /// Stores a null value.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> AttributeValue {
        AttributeValue::String(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> AttributeValue {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> AttributeValue {
        AttributeValue::Bool(b)
    }
}

impl From<i32> for AttributeValue {
    fn from(i: i32) -> Self {
        AttributeValue::Int(i64::from(i))
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Int(i)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Float(f)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(t: DateTime<Utc>) -> Self {
        AttributeValue::Timestamp(t)
    }
}

impl<T> From<Vec<T>> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from(v: Vec<T>) -> AttributeValue {
        v.into_iter().collect()
    }
}

impl<T> FromIterator<T> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        AttributeValue::Array(iter.into_iter().map(AttributeValue::from).collect())
    }
}

impl From<Value> for AttributeValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AttributeValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    AttributeValue::Float(f)
                } else {
                    warn!("could not interpret '{:?}' as a number", n);
                    AttributeValue::String(n.to_string())
                }
            }
            Value::String(s) => AttributeValue::String(s),
            Value::Array(arr) => arr.into_iter().collect(),
            Value::Object(_) => {
                warn!("object attribute values are not supported by any matcher");
                AttributeValue::Null
            }
        }
    }
}

impl AttributeValue {
    /// Returns None unless self is a String. It will not convert.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an integer for numeric comparisons. Floats are rejected.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            AttributeValue::Timestamp(t) => Some(t.timestamp()),
            _ => None,
        }
    }

    /// Returns the value as epoch seconds for datetime comparisons.
    ///
    /// Unlike [AttributeValue::to_i64] this accepts floats, truncating any fractional second.
    pub fn to_epoch_seconds(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            AttributeValue::Float(f) => float_seconds(*f),
            AttributeValue::Timestamp(t) => Some(t.timestamp()),
            _ => None,
        }
    }

    /// Returns the boolean value. Strings spelling "true" or "false" in any case are accepted.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            AttributeValue::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            AttributeValue::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// Returns the elements as a set when self is an array made only of strings.
    pub fn as_set(&self) -> Option<HashSet<&str>> {
        match self {
            AttributeValue::Array(values) => values.iter().map(AttributeValue::as_str).collect(),
            _ => None,
        }
    }

    /// Attempt to parse a string attribute into a semver version.
    ///
    /// Missing minor or patch components are filled with zeroes and build metadata is dropped.
    /// It will return None if it cannot parse it, or for non-string attributes.
    pub fn as_semver(&self) -> Option<semver::Version> {
        parse_semver(self.as_str()?)
    }
}

pub(crate) fn parse_semver(version_str: &str) -> Option<semver::Version> {
    semver::Version::parse(version_str)
        .ok()
        .or_else(|| parse_semver_loose(version_str))
        .map(|mut version| {
            version.build = semver::BuildMetadata::EMPTY;
            version
        })
}

fn parse_semver_loose(version_str: &str) -> Option<semver::Version> {
    let parts = VERSION_NUMERIC_COMPONENTS_REGEX.captures(version_str)?;

    let numeric_parts = parts.get(0)?;
    let mut transformed_version_str = numeric_parts.as_str().to_string();

    for i in 1..parts.len() {
        if parts.get(i).is_none() {
            transformed_version_str.push_str(".0");
        }
    }

    let rest = &version_str[numeric_parts.end()..];
    transformed_version_str.push_str(rest);

    semver::Version::parse(&transformed_version_str).ok()
}

fn float_seconds(f: f64) -> Option<i64> {
    if f.is_finite() && f.abs() <= MAX_EXACT_FLOAT_SECONDS {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

/// Truncates epoch seconds to midnight UTC of the same day.
pub(crate) fn start_of_day(epoch_seconds: i64) -> Option<i64> {
    match Utc.timestamp_opt(epoch_seconds, 0) {
        LocalResult::Single(time) => {
            let midnight = time.date_naive().and_hms_opt(0, 0, 0)?;
            Some(Utc.from_utc_datetime(&midnight).timestamp())
        }
        LocalResult::None | LocalResult::Ambiguous(_, _) => None,
    }
}
