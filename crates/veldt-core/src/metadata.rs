//! The keyed, type-erased metadata side-table carried by layers.
//!
//! Each key holds exactly one value of one caller-declared type. The type
//! erasure lives here and nowhere else: readers go through accessors that
//! check the stored `TypeId` and fail with a type mismatch rather than
//! panicking on a bad downcast.

use std::any::{type_name, Any, TypeId};

use indexmap::IndexMap;

use crate::error::EnvError;

struct MetadataValue {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any>,
}

/// Keyed metadata attached to a layer on demand.
#[derive(Default)]
pub struct MetadataTable {
    entries: IndexMap<String, MetadataValue>,
}

impl MetadataTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value for a key.
    pub fn insert<T: 'static>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(
            key.into(),
            MetadataValue {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                value: Box::new(value),
            },
        );
    }

    /// Read the value for a key with the type it was written as.
    pub fn get<T: 'static>(&self, key: &str) -> Result<&T, EnvError> {
        let entry = self.entries.get(key).ok_or_else(|| EnvError::NotFound {
            what: format!("metadata key '{key}'"),
        })?;
        if entry.type_id != TypeId::of::<T>() {
            return Err(EnvError::MetadataTypeMismatch {
                key: key.to_owned(),
                expected: type_name::<T>(),
                found: entry.type_name,
            });
        }
        // The TypeId was just checked, so the downcast cannot fail.
        Ok(entry
            .value
            .downcast_ref::<T>()
            .unwrap_or_else(|| unreachable!("TypeId checked above")))
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut<T: 'static>(&mut self, key: &str) -> Result<&mut T, EnvError> {
        let entry = self.entries.get_mut(key).ok_or_else(|| EnvError::NotFound {
            what: format!("metadata key '{key}'"),
        })?;
        if entry.type_id != TypeId::of::<T>() {
            return Err(EnvError::MetadataTypeMismatch {
                key: key.to_owned(),
                expected: type_name::<T>(),
                found: entry.type_name,
            });
        }
        Ok(entry
            .value
            .downcast_mut::<T>()
            .unwrap_or_else(|| unreachable!("TypeId checked above")))
    }

    /// Whether any value exists for the key.
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether a value of the given type exists for the key.
    pub fn has_typed<T: 'static>(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.type_id == TypeId::of::<T>())
    }

    /// Remove a single key. Returns whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The keys, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for MetadataTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v.type_name)))
            .finish()
    }
}
