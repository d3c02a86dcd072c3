//! Concrete map items and operators for Veldt environments.
//!
//! The kernel treats items as opaque; this crate supplies the stock
//! vocabulary: [`Pointcloud`] (3-D points with a PLY side-file),
//! [`ScalarGrid`] (row-major height data with a binary side-file), and
//! [`SlopeOperator`] (central-difference slope extraction). Call
//! [`register_builtin_maps`] to make them deserializable.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

mod grid;
mod pointcloud;
mod slope;

pub use grid::ScalarGrid;
pub use pointcloud::Pointcloud;
pub use slope::SlopeOperator;

use veldt_serialize::Registry;

/// Register this crate's classes with a factory registry.
pub fn register_builtin_maps(registry: &mut Registry) {
    registry.register(Pointcloud::CLASS_TAG, |src| {
        Ok(Box::new(Pointcloud::from_source(src)?))
    });
    registry.register(ScalarGrid::CLASS_TAG, |src| {
        Ok(Box::new(ScalarGrid::from_source(src)?))
    });
    registry.register(SlopeOperator::CLASS_TAG, |src| {
        Ok(Box::new(SlopeOperator::from_source(src)?))
    });
}

/// A registry covering the core classes and everything in this crate.
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    register_builtin_maps(&mut registry);
    registry
}
