//! Dynamically typed setting values
//!
//! Settings exported into a snapshot are an open string-keyed map whose
//! values can be any JSON-like scalar or container. [`SettingValue`] is the
//! tagged union used to carry them.
//!
//! ## Encoding
//!
//! The value serializes differently depending on the target format:
//!
//! - **Text formats** (JSON): untagged, exactly like a JSON value, so legacy
//!   backups written by other tools decode without a schema.
//! - **Binary formats** (bincode): externally tagged, because binary formats
//!   cannot infer a type from the input.
//!
//! The switch is driven by `Serializer::is_human_readable`.

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A single setting value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SettingValue {
    /// Absent value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Double(f64),
    /// String value
    String(String),
    /// Ordered list of values
    Array(Vec<SettingValue>),
    /// Nested string-keyed map, ordered for deterministic encoding
    Object(BTreeMap<String, SettingValue>),
}

impl SettingValue {
    /// Get the value as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the value as an integer, truncating doubles
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            SettingValue::Double(d) => Some(*d as i64),
            _ => None,
        }
    }

    /// Get the value as a double
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Int(i) => Some(*i as f64),
            SettingValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Check whether the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, SettingValue::Null)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Int(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Double(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::String(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::String(value)
    }
}

impl From<Vec<String>> for SettingValue {
    fn from(values: Vec<String>) -> Self {
        SettingValue::Array(values.into_iter().map(SettingValue::String).collect())
    }
}

/// Borrowed tagged form written by binary serializers
#[derive(Serialize)]
enum TaggedRef<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(&'a str),
    Array(&'a [SettingValue]),
    Object(&'a BTreeMap<String, SettingValue>),
}

/// Owned tagged form read by binary deserializers
#[derive(Deserialize)]
enum Tagged {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<SettingValue>),
    Object(BTreeMap<String, SettingValue>),
}

impl Serialize for SettingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            return match self {
                SettingValue::Null => serializer.serialize_unit(),
                SettingValue::Bool(b) => serializer.serialize_bool(*b),
                SettingValue::Int(i) => serializer.serialize_i64(*i),
                SettingValue::Double(d) => serializer.serialize_f64(*d),
                SettingValue::String(s) => serializer.serialize_str(s),
                SettingValue::Array(values) => values.serialize(serializer),
                SettingValue::Object(map) => map.serialize(serializer),
            };
        }
        let tagged = match self {
            SettingValue::Null => TaggedRef::Null,
            SettingValue::Bool(b) => TaggedRef::Bool(*b),
            SettingValue::Int(i) => TaggedRef::Int(*i),
            SettingValue::Double(d) => TaggedRef::Double(*d),
            SettingValue::String(s) => TaggedRef::String(s),
            SettingValue::Array(values) => TaggedRef::Array(values),
            SettingValue::Object(map) => TaggedRef::Object(map),
        };
        tagged.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettingValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            return deserializer.deserialize_any(UntaggedVisitor);
        }
        Ok(match Tagged::deserialize(deserializer)? {
            Tagged::Null => SettingValue::Null,
            Tagged::Bool(b) => SettingValue::Bool(b),
            Tagged::Int(i) => SettingValue::Int(i),
            Tagged::Double(d) => SettingValue::Double(d),
            Tagged::String(s) => SettingValue::String(s),
            Tagged::Array(values) => SettingValue::Array(values),
            Tagged::Object(map) => SettingValue::Object(map),
        })
    }
}

struct UntaggedVisitor;

impl<'de> Visitor<'de> for UntaggedVisitor {
    type Value = SettingValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(SettingValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(SettingValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(match i64::try_from(v) {
            Ok(i) => SettingValue::Int(i),
            Err(_) => SettingValue::Double(v as f64),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(SettingValue::Double(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(SettingValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(SettingValue::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(SettingValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(SettingValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        SettingValue::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(value) = seq.next_element()? {
            values.push(value);
        }
        Ok(SettingValue::Array(values))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut values = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, SettingValue>()? {
            values.insert(key, value);
        }
        Ok(SettingValue::Object(values))
    }
}
