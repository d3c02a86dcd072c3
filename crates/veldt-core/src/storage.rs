//! The serialization seam between items and the storage backend.
//!
//! Items never see the on-disk layout. They write keyed attributes (which
//! land in their manifest record) and open named binary blobs (which land
//! in deterministically named side-files) through [`ItemSink`], and read
//! them back through the symmetric [`ItemSource`]. Backends decide where
//! attributes and blobs actually live — a manifest directory, or an
//! in-memory event payload.

use std::io::{Read, Write};

use crate::error::StorageError;

/// Write half of the serialization seam.
///
/// Object-safe so items can take `&mut dyn ItemSink`; typed helpers live
/// on [`ItemSinkExt`].
pub trait ItemSink {
    /// Record a keyed attribute in the item's manifest record.
    fn write_attr(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Open a binary blob named by `suffix` and fill it through `write`.
    ///
    /// The blob's storage name is derived deterministically from the
    /// item's id and the suffix; the item only picks the suffix.
    fn write_blob(
        &mut self,
        suffix: &str,
        write: &mut dyn FnMut(&mut dyn Write) -> Result<(), StorageError>,
    ) -> Result<(), StorageError>;
}

/// Read half of the serialization seam.
pub trait ItemSource {
    /// Look up an attribute, failing with `MissingAttribute` when absent.
    fn attr(&self, key: &str) -> Result<&str, StorageError>;

    /// Whether an attribute with this key exists.
    fn has_attr(&self, key: &str) -> bool;

    /// Open the blob named by `suffix` and drain it through `read`.
    fn read_blob(
        &mut self,
        suffix: &str,
        read: &mut dyn FnMut(&mut dyn Read) -> Result<(), StorageError>,
    ) -> Result<(), StorageError>;
}

/// Typed attribute writers, available on every sink.
///
/// Floating-point values go through Rust's shortest-roundtrip formatting,
/// so reading them back yields the identical bits.
pub trait ItemSinkExt: ItemSink {
    /// Write an `f64` attribute.
    fn write_f64(&mut self, key: &str, value: f64) -> Result<(), StorageError> {
        self.write_attr(key, &format!("{value}"))
    }

    /// Write a `u64` attribute.
    fn write_u64(&mut self, key: &str, value: u64) -> Result<(), StorageError> {
        self.write_attr(key, &format!("{value}"))
    }

    /// Write a `bool` attribute as `true`/`false`.
    fn write_bool(&mut self, key: &str, value: bool) -> Result<(), StorageError> {
        self.write_attr(key, if value { "true" } else { "false" })
    }
}

impl<S: ItemSink + ?Sized> ItemSinkExt for S {}

/// Typed attribute readers, available on every source.
pub trait ItemSourceExt: ItemSource {
    /// Read an `f64` attribute.
    fn attr_f64(&self, key: &str) -> Result<f64, StorageError> {
        let raw = self.attr(key)?;
        raw.parse().map_err(|e| StorageError::MalformedAttribute {
            key: key.to_owned(),
            detail: format!("expected f64, got '{raw}': {e}"),
        })
    }

    /// Read a `u64` attribute.
    fn attr_u64(&self, key: &str) -> Result<u64, StorageError> {
        let raw = self.attr(key)?;
        raw.parse().map_err(|e| StorageError::MalformedAttribute {
            key: key.to_owned(),
            detail: format!("expected u64, got '{raw}': {e}"),
        })
    }

    /// Read a `bool` attribute.
    fn attr_bool(&self, key: &str) -> Result<bool, StorageError> {
        match self.attr(key)? {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(StorageError::MalformedAttribute {
                key: key.to_owned(),
                detail: format!("expected bool, got '{other}'"),
            }),
        }
    }

    /// Read an `f64` attribute, or a default when the key is absent.
    fn attr_f64_or(&self, key: &str, default: f64) -> Result<f64, StorageError> {
        if self.has_attr(key) {
            self.attr_f64(key)
        } else {
            Ok(default)
        }
    }
}

impl<S: ItemSource + ?Sized> ItemSourceExt for S {}

/// Memory-backed sink: attributes and blobs land in owned buffers.
///
/// Backs the event-stream codec (attach events embed the item's serialized
/// form) and unit tests; the directory-backed sink lives in the storage
/// crate.
#[derive(Debug, Default)]
pub struct MemSink {
    attrs: Vec<(String, String)>,
    blobs: Vec<(String, Vec<u8>)>,
}

impl MemSink {
    /// The recorded attributes, in write order.
    pub fn attrs(&self) -> &[(String, String)] {
        &self.attrs
    }

    /// The recorded blobs, in write order.
    pub fn blobs(&self) -> &[(String, Vec<u8>)] {
        &self.blobs
    }

    /// Take the buffers apart.
    pub fn into_parts(self) -> (Vec<(String, String)>, Vec<(String, Vec<u8>)>) {
        (self.attrs, self.blobs)
    }

    /// Convert into a source over the same buffers.
    pub fn into_source(self) -> MemSource {
        MemSource {
            attrs: self.attrs,
            blobs: self.blobs,
        }
    }
}

impl ItemSink for MemSink {
    fn write_attr(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.attrs.push((key.to_owned(), value.to_owned()));
        Ok(())
    }

    fn write_blob(
        &mut self,
        suffix: &str,
        write: &mut dyn FnMut(&mut dyn Write) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();
        write(&mut buf)?;
        self.blobs.push((suffix.to_owned(), buf));
        Ok(())
    }
}

/// Memory-backed source, symmetric to [`MemSink`].
#[derive(Debug, Default)]
pub struct MemSource {
    attrs: Vec<(String, String)>,
    blobs: Vec<(String, Vec<u8>)>,
}

impl MemSource {
    /// Build a source from already-collected attributes and blobs.
    pub fn new(attrs: Vec<(String, String)>, blobs: Vec<(String, Vec<u8>)>) -> Self {
        Self { attrs, blobs }
    }
}

impl ItemSource for MemSource {
    fn attr(&self, key: &str) -> Result<&str, StorageError> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| StorageError::MissingAttribute { key: key.to_owned() })
    }

    fn has_attr(&self, key: &str) -> bool {
        self.attrs.iter().any(|(k, _)| k == key)
    }

    fn read_blob(
        &mut self,
        suffix: &str,
        read: &mut dyn FnMut(&mut dyn Read) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let blob = self
            .blobs
            .iter()
            .find(|(k, _)| k == suffix)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| StorageError::MissingAttribute {
                key: suffix.to_owned(),
            })?;
        let mut cursor = blob.as_slice();
        read(&mut cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_attr_roundtrip() {
        let mut sink = MemSink::default();
        sink.write_f64("x", 0.1).unwrap();
        sink.write_u64("n", 42).unwrap();
        sink.write_bool("flag", true).unwrap();
        let src = sink.into_source();
        assert_eq!(src.attr_f64("x").unwrap(), 0.1);
        assert_eq!(src.attr_u64("n").unwrap(), 42);
        assert!(src.attr_bool("flag").unwrap());
    }

    #[test]
    fn missing_attr_is_reported() {
        let src = MemSource::default();
        assert!(matches!(
            src.attr("absent"),
            Err(StorageError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn blob_roundtrip() {
        let mut sink = MemSink::default();
        sink.write_blob("bin", &mut |w| {
            w.write_all(&[1, 2, 3])?;
            Ok(())
        })
        .unwrap();
        let mut src = sink.into_source();
        let mut out = Vec::new();
        src.read_blob("bin", &mut |r| {
            r.read_to_end(&mut out)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }
}
