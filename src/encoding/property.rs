//! Encoder property values and a simple property store.

use crate::sync::{read, write};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

/// A property value as set on an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// A string value.
    String(String),
    /// An integer value.
    Integer(i64),
    /// A boolean value.
    Bool(bool),
}

impl PropertyValue {
    /// Try to get as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            PropertyValue::String(s) => s.parse().ok(),
            PropertyValue::Bool(_) => None,
        }
    }

    /// Try to get as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::Integer(i) => Some(*i != 0),
            PropertyValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Integer(i) => write!(f, "{i}"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Integer(value.into())
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Integer(value.into())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

/// Thread-safe key/value store for encoder implementations.
///
/// Keeps every write, so callers can inspect what was configured.
#[derive(Debug, Default)]
pub struct PropertyStore {
    values: RwLock<BTreeMap<String, PropertyValue>>,
}

impl PropertyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing any previous value.
    pub fn set(&self, key: &str, value: PropertyValue) {
        write(&self.values).insert(key.to_string(), value);
    }

    /// Get a property.
    pub fn get(&self, key: &str) -> Option<PropertyValue> {
        read(&self.values).get(key).cloned()
    }

    /// Get an integer property.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    /// All properties, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, PropertyValue)> {
        read(&self.values)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(PropertyValue::from(16u32).as_i64(), Some(16));
        assert_eq!(PropertyValue::from("200000").as_i64(), Some(200_000));
        assert_eq!(PropertyValue::from(true).as_bool(), Some(true));
        assert_eq!(PropertyValue::from("no").as_bool(), Some(false));
        assert_eq!(PropertyValue::from(true).as_i64(), None);
    }

    #[test]
    fn test_store_overwrites() {
        let store = PropertyStore::new();
        store.set("bitrate", 300i64.into());
        store.set("bitrate", 500i64.into());
        store.set("threads", 1i64.into());

        assert_eq!(store.get_i64("bitrate"), Some(500));
        assert_eq!(store.snapshot().len(), 2);
        assert!(store.get("tune").is_none());
    }
}
