//! Directory-backed item sink and source.
//!
//! Attributes are collected for the manifest record; blobs become
//! side-files next to the manifest, named `<mangled-id>.<suffix>` where
//! the mangled id drops the leading `/` and replaces the remaining `/`
//! separators with `_`. The mapping is deterministic, so a rewritten
//! environment reproduces the same file set.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use veldt_core::{ItemId, ItemSink, ItemSource, StorageError};

/// Deterministic file stem for an item's side-files.
pub fn side_file_stem(id: &ItemId) -> String {
    id.as_str().trim_start_matches('/').replace('/', "_")
}

/// Sink writing into a serialized environment directory.
pub struct DirItemSink {
    dir: PathBuf,
    stem: String,
    attrs: Vec<(String, String)>,
}

impl DirItemSink {
    /// A sink for one item inside `dir`.
    pub fn new(dir: &Path, id: &ItemId) -> Self {
        Self {
            dir: dir.to_path_buf(),
            stem: side_file_stem(id),
            attrs: Vec::new(),
        }
    }

    /// The collected attributes, for the item's manifest record.
    pub fn into_attrs(self) -> Vec<(String, String)> {
        self.attrs
    }
}

impl ItemSink for DirItemSink {
    fn write_attr(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.attrs.push((key.to_owned(), value.to_owned()));
        Ok(())
    }

    fn write_blob(
        &mut self,
        suffix: &str,
        write: &mut dyn FnMut(&mut dyn Write) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let path = self.dir.join(format!("{}.{suffix}", self.stem));
        let mut writer = BufWriter::new(File::create(path)?);
        write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// Source reading from a serialized environment directory.
pub struct DirItemSource {
    dir: PathBuf,
    stem: String,
    attrs: Vec<(String, String)>,
}

impl DirItemSource {
    /// A source for one item record inside `dir`.
    pub fn new(dir: &Path, id: &ItemId, attrs: Vec<(String, String)>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            stem: side_file_stem(id),
            attrs,
        }
    }
}

impl ItemSource for DirItemSource {
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
        let path = self.dir.join(format!("{}.{suffix}", self.stem));
        let mut reader = BufReader::new(File::open(path)?);
        read(&mut reader)
    }
}
