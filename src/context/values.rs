// src/context/values.rs
//! Consumer key/value bag carried by every context
//!
//! Control state (canceled/finished/deadline/timer) lives elsewhere, so the
//! bag only ever holds user data. `snapshot` still hides keys reserved for
//! host interop: anything starting with `_` (which covers `__`) and `domain`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::Context;
use crate::error::ContextError;

/// Prefix marking private keys
pub const RESERVED_PREFIX: char = '_';

/// Interop key never exposed in snapshots
pub const DOMAIN_KEY: &str = "domain";

/// True for keys that are stored but never appear in `values()`
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX) || key == DOMAIN_KEY
}

#[derive(Debug, Default, Clone)]
pub(crate) struct ValueBag {
    entries: Map<String, Value>,
}

impl ValueBag {
    pub(crate) fn from_snapshot(entries: Map<String, Value>) -> Self {
        Self { entries }
    }

    pub(crate) fn insert(&mut self, key: String, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Write every visible entry into `target`, overwriting same-named keys
    pub(crate) fn merge_into(&self, target: &mut Map<String, Value>) {
        for (key, value) in self.visible() {
            target.insert(key.clone(), value.clone());
        }
    }

    pub(crate) fn snapshot(&self) -> Map<String, Value> {
        let mut out = Map::new();
        self.merge_into(&mut out);
        out
    }

    fn visible(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().filter(|(key, _)| !is_reserved_key(key))
    }
}

impl Context {
    /// Attach a value; returns the previous value under `key`
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.values.lock().insert(key.into(), value.into())
    }

    /// Attach any serializable value
    pub fn set_serialized<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Option<Value>, ContextError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|source| ContextError::Serialize {
            key: key.clone(),
            source,
        })?;
        Ok(self.set(key, value))
    }

    /// Read a value, reserved keys included
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.values.lock().get(key).cloned()
    }

    /// Read and decode a value; `Ok(None)` when the key is absent
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ContextError> {
        self.get(key)
            .map(|value| {
                serde_json::from_value(value).map_err(|source| ContextError::Deserialize {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.values.lock().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.values.lock().contains_key(key)
    }

    /// Snapshot of the visible user values
    pub fn values(&self) -> Map<String, Value> {
        self.inner.values.lock().snapshot()
    }

    /// Merge the visible user values into `target` and hand it back
    pub fn values_into<'a>(&self, target: &'a mut Map<String, Value>) -> &'a mut Map<String, Value> {
        self.inner.values.lock().merge_into(target);
        target
    }

    /// Decode the visible user values as one typed record
    pub fn values_as<T: DeserializeOwned>(&self) -> Result<T, ContextError> {
        serde_json::from_value(Value::Object(self.values())).map_err(ContextError::Values)
    }
}
