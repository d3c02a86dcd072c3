//! The class-tag factory registry.
//!
//! Each concrete item kind registers a `(tag, factory)` pair; the reader
//! looks factories up by the class tag in the manifest and fails with an
//! unknown-class error for tags nobody registered. Registries are plain
//! values handed to the reader, so different callers can deserialize
//! different item vocabularies.

use indexmap::IndexMap;

use veldt_core::{Frame, Item, ItemSource, StorageError};

/// Reconstructs one item from its serialized record.
pub type ItemFactory = fn(&mut dyn ItemSource) -> Result<Box<dyn Item>, StorageError>;

/// Class tag to factory mapping.
pub struct Registry {
    factories: IndexMap<String, ItemFactory>,
}

impl Registry {
    /// A registry with the core classes (the frame) pre-registered.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Frame::CLASS_TAG, |src| {
            Ok(Box::new(Frame::from_source(src)?))
        });
        registry
    }

    /// A registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Register a factory for a class tag, replacing any existing one.
    pub fn register(&mut self, tag: &str, factory: ItemFactory) {
        self.factories.insert(tag.to_owned(), factory);
    }

    /// Whether a factory is registered for the tag.
    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Build an item of the given class from a source.
    pub fn create(
        &self,
        tag: &str,
        src: &mut dyn ItemSource,
    ) -> Result<Box<dyn Item>, StorageError> {
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| StorageError::UnknownClass {
                tag: tag.to_owned(),
            })?;
        factory(src)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veldt_core::MemSource;

    #[test]
    fn unknown_class_is_rejected() {
        let registry = Registry::new();
        let mut src = MemSource::default();
        let result = registry.create("nobody::Registered", &mut src);
        assert!(matches!(result, Err(StorageError::UnknownClass { .. })));
    }

    #[test]
    fn frame_class_is_builtin() {
        assert!(Registry::new().contains(Frame::CLASS_TAG));
    }
}
