//! Persisted per-variable view preferences.
//!
//! Format, cast-type and cast-to-array choices survive stepping: they are
//! keyed by the structural path of a variable node (frame function name plus
//! the chain of enclosing variable names), not by any backend handle, so they
//! can be re-applied to a freshly reconciled, same-named variable in a later
//! frame instance. The external settings store consumes them as an opaque
//! string map, one toml-serialized entry per path.

use crate::error::Error;
use crate::variable::format::ValueFormat;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePrefs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ValueFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cast_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_range: Option<(u32, u32)>,
}

impl NodePrefs {
    fn is_empty(&self) -> bool {
        self.format.is_none() && self.cast_type.is_none() && self.array_range.is_none()
    }
}

#[derive(Default)]
pub struct PrefsStore {
    entries: Mutex<HashMap<String, NodePrefs>>,
}

impl PrefsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> NodePrefs {
        self.entries.lock().get(path).cloned().unwrap_or_default()
    }

    pub fn set_format(&self, path: &str, format: Option<ValueFormat>) {
        self.update(path, |p| p.format = format);
    }

    pub fn set_cast_type(&self, path: &str, cast_type: Option<&str>) {
        self.update(path, |p| p.cast_type = cast_type.map(String::from));
    }

    pub fn set_array_range(&self, path: &str, range: Option<(u32, u32)>) {
        self.update(path, |p| p.array_range = range);
    }

    fn update(&self, path: &str, f: impl FnOnce(&mut NodePrefs)) {
        let mut entries = self.entries.lock();
        let prefs = entries.entry(path.to_string()).or_default();
        f(prefs);
        if prefs.is_empty() {
            entries.remove(path);
        }
    }

    /// Serialize every entry for an external settings store.
    pub fn export(&self) -> Result<HashMap<String, String>, Error> {
        let entries = self.entries.lock();
        let mut out = HashMap::with_capacity(entries.len());
        for (path, prefs) in entries.iter() {
            out.insert(path.clone(), toml::to_string(prefs)?);
        }
        Ok(out)
    }

    /// Load entries previously produced by [`PrefsStore::export`].
    /// Existing entries with the same path are replaced.
    pub fn import<'a>(
        &self,
        map: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<(), Error> {
        let mut entries = self.entries.lock();
        for (path, raw) in map {
            let prefs: NodePrefs = toml::from_str(raw)?;
            if !prefs.is_empty() {
                entries.insert(path.to_string(), prefs);
            }
        }
        Ok(())
    }
}
