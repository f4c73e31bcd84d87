// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scoped configuration with used-key tracking.
//!
//! The core consumes a key→value mapping (file parsing belongs to the
//! front-ends); values share the wire value model so a configuration
//! round-trips the `initialize` payload unchanged. Every lookup records its
//! key, and the difference between provided and accessed keys at the end of
//! `initializing` is surfaced as unused configuration.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::protocol::pack::{MetaMap, Value};

#[derive(Debug, Clone, Default)]
pub struct Configuration {
    values: BTreeMap<String, Value>,
    requested: BTreeSet<String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, Value>) -> Self {
        Configuration {
            values,
            requested: BTreeSet::new(),
        }
    }

    /// Build from an `initialize`/`reconfigure` payload. Absent and `nil`
    /// payloads yield the empty configuration; anything but a string-keyed
    /// map is rejected.
    pub fn from_payload(payload: Option<&Value>) -> Result<Self> {
        match payload {
            None | Some(Value::Nil) => Ok(Self::new()),
            Some(Value::Map(entries)) => {
                let mut values = BTreeMap::new();
                for (k, v) in entries {
                    let key = k.as_str().ok_or_else(|| Error::Config {
                        key: k.to_string(),
                        reason: "configuration keys must be strings".into(),
                    })?;
                    values.insert(key.to_lowercase(), v.clone());
                }
                Ok(Self::from_map(values))
            }
            Some(other) => Err(Error::Config {
                key: String::new(),
                reason: format!("configuration payload must be a map, got {}", other),
            }),
        }
    }

    /// Look a key up, marking it as used.
    pub fn get(&mut self, key: &str) -> Option<&Value> {
        self.requested.insert(key.to_string());
        self.values.get(key)
    }

    /// Look a key up, failing with `ConfigError` when absent.
    pub fn require(&mut self, key: &str) -> Result<&Value> {
        self.requested.insert(key.to_string());
        self.values.get(key).ok_or_else(|| Error::Config {
            key: key.to_string(),
            reason: "required key missing".into(),
        })
    }

    /// Look a key up with a default, inserting the default when absent
    /// (so `applied()` reflects the effective value).
    pub fn get_or(&mut self, key: &str, default: Value) -> Value {
        self.requested.insert(key.to_string());
        self.values.entry(key.to_string()).or_insert(default).clone()
    }

    pub fn get_str_or(&mut self, key: &str, default: &str) -> Result<String> {
        match self.get_or(key, Value::from(default)) {
            Value::String(s) => s.into_str().ok_or_else(|| Error::Config {
                key: key.to_string(),
                reason: "value is not valid utf-8".into(),
            }),
            other => Err(Error::Config {
                key: key.to_string(),
                reason: format!("expected string, got {}", other),
            }),
        }
    }

    pub fn get_u64_or(&mut self, key: &str, default: u64) -> Result<u64> {
        match self.get_or(key, Value::from(default)) {
            Value::Integer(i) => i.as_u64().ok_or_else(|| Error::Config {
                key: key.to_string(),
                reason: "expected unsigned integer".into(),
            }),
            other => Err(Error::Config {
                key: key.to_string(),
                reason: format!("expected integer, got {}", other),
            }),
        }
    }

    pub fn get_f64_or(&mut self, key: &str, default: f64) -> Result<f64> {
        match self.get_or(key, Value::F64(default)) {
            Value::F64(v) => Ok(v),
            Value::F32(v) => Ok(f64::from(v)),
            Value::Integer(i) => i.as_f64().ok_or_else(|| Error::Config {
                key: key.to_string(),
                reason: "integer does not fit a float".into(),
            }),
            other => Err(Error::Config {
                key: key.to_string(),
                reason: format!("expected number, got {}", other),
            }),
        }
    }

    pub fn get_bool_or(&mut self, key: &str, default: bool) -> Result<bool> {
        match self.get_or(key, Value::Boolean(default)) {
            Value::Boolean(v) => Ok(v),
            other => Err(Error::Config {
                key: key.to_string(),
                reason: format!("expected boolean, got {}", other),
            }),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keys provided but never looked up.
    pub fn unused_keys(&self) -> Vec<String> {
        self.values
            .keys()
            .filter(|k| !self.requested.contains(*k))
            .cloned()
            .collect()
    }

    /// Every used key with its effective value.
    pub fn applied(&self) -> MetaMap {
        self.requested
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Merge a partial update (reconfigure); updated keys count as unused
    /// again until the handler looks them up.
    pub fn update(&mut self, partial: &Configuration) {
        for (k, v) in &partial.values {
            self.values.insert(k.clone(), v.clone());
            self.requested.remove(k);
        }
    }

    /// Fold a handled partial back in after `reconfiguring`: values
    /// overwrite, used marks carry over.
    pub fn absorb(&mut self, other: Configuration) {
        for (k, v) in other.values {
            self.values.insert(k, v);
        }
        for k in other.requested {
            self.requested.insert(k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(entries: &[(&str, Value)]) -> Value {
        Value::Map(
            entries
                .iter()
                .map(|(k, v)| (Value::from(*k), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_unused_keys_is_provided_minus_accessed() {
        let p = payload(&[
            ("used", Value::from(1u64)),
            ("also_used", Value::from("x")),
            ("ignored", Value::from(2u64)),
        ]);
        let mut config = Configuration::from_payload(Some(&p)).unwrap();
        let _ = config.get("used");
        let _ = config.get_str_or("also_used", "");
        assert_eq!(config.unused_keys(), vec!["ignored".to_string()]);
    }

    #[test]
    fn test_require_missing_is_config_error() {
        let mut config = Configuration::new();
        assert!(matches!(
            config.require("gain"),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_defaults_are_recorded_as_applied() {
        let mut config = Configuration::new();
        assert_eq!(config.get_f64_or("flush_interval", 10.0).unwrap(), 10.0);
        assert!(config.applied().contains_key("flush_interval"));
        assert!(config.unused_keys().is_empty());
    }

    #[test]
    fn test_type_mismatch_is_config_error() {
        let p = payload(&[("port", Value::from("not a number"))]);
        let mut config = Configuration::from_payload(Some(&p)).unwrap();
        assert!(config.get_u64_or("port", 0).is_err());
    }

    #[test]
    fn test_keys_lowercased_from_payload() {
        let p = payload(&[("Output_Path", Value::from("/data"))]);
        let mut config = Configuration::from_payload(Some(&p)).unwrap();
        assert!(config.get("output_path").is_some());
    }

    #[test]
    fn test_update_resets_used_marks() {
        let p = payload(&[("gain", Value::from(2u64))]);
        let mut config = Configuration::from_payload(Some(&p)).unwrap();
        let _ = config.get("gain");
        assert!(config.unused_keys().is_empty());

        let partial =
            Configuration::from_payload(Some(&payload(&[("gain", Value::from(5u64))]))).unwrap();
        config.update(&partial);
        assert_eq!(config.unused_keys(), vec!["gain".to_string()]);
    }

    #[test]
    fn test_non_map_payload_rejected() {
        assert!(Configuration::from_payload(Some(&Value::from(3u64))).is_err());
        assert!(Configuration::from_payload(Some(&Value::Nil)).is_ok());
        assert!(Configuration::from_payload(None).is_ok());
    }
}
