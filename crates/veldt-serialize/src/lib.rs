//! Serialization for Veldt environments.
//!
//! Two symmetric halves: the directory format (a line-oriented manifest
//! plus deterministically named side-files, via
//! [`serialize_environment`] / [`unserialize_environment`]) and the
//! binary event stream ([`EventStreamWriter`] / [`EventStreamReader`]
//! with [`record_environment`] and [`apply_events`]). Both rebuild
//! items through the class-tag [`Registry`] and replay relations through
//! the normal kernel entry points, so invariants are re-checked on the
//! way in.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod event_stream;
pub mod manifest;
pub mod reader;
pub mod registry;
pub mod store;
pub mod writer;

pub use event_stream::{
    apply_events, record_environment, wire_event, EventStreamReader, EventStreamWriter, WireEvent,
};
pub use manifest::{Manifest, ManifestItem, MANIFEST_NAME};
pub use reader::unserialize_environment;
pub use registry::{ItemFactory, Registry};
pub use store::{side_file_stem, DirItemSink, DirItemSource};
pub use writer::serialize_environment;
