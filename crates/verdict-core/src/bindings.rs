use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VerdictError};

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Read-only scenario configuration: account names, region/zone, naming
/// conventions. Keys are case-insensitive and stored upper-case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bindings {
    values: BTreeMap<String, String>,
}

fn normalize(key: &str) -> String {
    key.trim().to_ascii_uppercase()
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a flat YAML mapping. Scalar values are stringified; nested
    /// values are rejected.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let raw: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(yaml)?;
        let mut bindings = Self::new();
        for (key, value) in raw {
            let text = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                _ => {
                    return Err(VerdictError::InvalidBinding {
                        key,
                        reason: "value must be a scalar".to_string(),
                    })
                }
            };
            bindings.values.insert(normalize(&key), text);
        }
        Ok(bindings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Set `key`, replacing any existing value.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(normalize(key), value.into());
        self
    }

    /// Set `key` only if it is not already bound.
    pub fn with_default(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.entry(normalize(key)).or_insert_with(|| value.into());
        self
    }

    /// Overlay `other` on top of `self`; `other` wins on conflicts.
    pub fn merge(mut self, other: Bindings) -> Self {
        self.values.extend(other.values);
        self
    }

    pub fn get(&self, key: &str) -> Result<&str> {
        self.values
            .get(&normalize(key))
            .map(String::as_str)
            .ok_or_else(|| VerdictError::MissingBinding(normalize(key)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&normalize(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ---------------------------------------------------------------------------
// RunStamp
// ---------------------------------------------------------------------------

/// Time-of-day decoration (`HHMMSS`) that keeps resource names from different
/// runs apart. Created once per run and passed to scenario construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStamp(String);

impl RunStamp {
    pub fn now() -> Self {
        Self::at(&Local::now())
    }

    pub fn at<Tz: TimeZone>(time: &DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self(time.format("%H%M%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
