// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Argument / result maps for card commands
//!
//! The card speaks CBOR maps with text keys. [Dict] wraps the decoded form
//! so the engine reads typed fields while transports move opaque bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
pub use serde_cbor::Value;

use crate::ProtoError;

/// One command argument map or result map
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dict(BTreeMap<String, Value>);

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a CBOR map
    pub fn from_cbor(data: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_cbor::from_slice(data)?)
    }

    /// Encode to a CBOR map
    pub fn to_cbor(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_cbor::to_vec(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_owned(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn insert_bytes(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.insert(key, Value::Bytes(value.into()));
    }

    pub fn insert_uint(&mut self, key: &str, value: u64) {
        self.insert(key, Value::Integer(value as i128));
    }

    pub fn insert_bool(&mut self, key: &str, value: bool) {
        self.insert(key, Value::Bool(value));
    }

    pub fn insert_text(&mut self, key: &str, value: impl Into<String>) {
        self.insert(key, Value::Text(value.into()));
    }

    // chainable forms, for building argument maps

    pub fn with_bytes(mut self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        self.insert_bytes(key, value);
        self
    }

    pub fn with_uint(mut self, key: &str, value: u64) -> Self {
        self.insert_uint(key, value);
        self
    }

    pub fn with_bool(mut self, key: &str, value: bool) -> Self {
        self.insert_bool(key, value);
        self
    }

    pub fn with_text(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert_text(key, value);
        self
    }

    pub fn with_path(mut self, key: &str, path: &[u32]) -> Self {
        let parts = path.iter().map(|c| Value::Integer(*c as i128)).collect();
        self.insert(key, Value::Array(parts));
        self
    }

    // typed getters: `None` when absent or of another type

    pub fn bytes(&self, key: &str) -> Option<&[u8]> {
        match self.0.get(key) {
            Some(Value::Bytes(b)) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn uint(&self, key: &str) -> Option<u64> {
        match self.0.get(key) {
            Some(Value::Integer(v)) if (0..=u64::MAX as i128).contains(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Value::Text(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    /// Remove a text field, returning its value
    pub fn take_text(&mut self, key: &str) -> Option<String> {
        match self.0.remove(key) {
            Some(Value::Text(t)) => Some(t),
            Some(other) => {
                // keep non-text values in place
                self.0.insert(key.to_owned(), other);
                None
            }
            None => None,
        }
    }

    /// Array of unsigned ints, e.g. a derivation path
    pub fn path(&self, key: &str) -> Option<Vec<u32>> {
        let parts = match self.0.get(key) {
            Some(Value::Array(parts)) => parts,
            _ => return None,
        };
        parts
            .iter()
            .map(|v| match v {
                Value::Integer(c) if (0..=u32::MAX as i128).contains(c) => Some(*c as u32),
                _ => None,
            })
            .collect()
    }

    /// Two-int array, e.g. the `slots` field of `status`
    pub fn pair(&self, key: &str) -> Option<(u64, u64)> {
        match self.0.get(key) {
            Some(Value::Array(parts)) if parts.len() == 2 => match (&parts[0], &parts[1]) {
                (Value::Integer(a), Value::Integer(b)) if *a >= 0 && *b >= 0 => {
                    Some((*a as u64, *b as u64))
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Array of byte strings, e.g. the `cert_chain` field of `certs`
    pub fn bytes_list(&self, key: &str) -> Option<Vec<&[u8]>> {
        let parts = match self.0.get(key) {
            Some(Value::Array(parts)) => parts,
            _ => return None,
        };
        parts
            .iter()
            .map(|v| match v {
                Value::Bytes(b) => Some(b.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn require_bytes(&self, key: &'static str) -> Result<&[u8], ProtoError> {
        self.bytes(key).ok_or(ProtoError::MissingField(key))
    }

    pub fn require_text(&self, key: &'static str) -> Result<&str, ProtoError> {
        self.text(key).ok_or(ProtoError::MissingField(key))
    }
}
