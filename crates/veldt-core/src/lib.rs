//! Core types and traits for the Veldt environment representation.
//!
//! This crate defines the item model shared by the whole workspace: ids,
//! the [`Item`] trait family and its role traits, the frame item, layer
//! state and metadata, operator hooks, change events, the serialization
//! seam, and the error taxonomy. The kernel that owns items lives in
//! `veldt-env`; the on-disk format lives in `veldt-serialize`.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod event;
pub mod frame;
pub mod id;
pub mod item;
pub mod layer;
pub mod metadata;
pub mod operator;
pub mod storage;

// Re-export core types at crate root for convenience.
pub use error::{EnvError, HandlerError, OperatorError, StorageError};
pub use event::{Event, EventHandler, LinkChange};
pub use frame::Frame;
pub use id::{EnvId, HandlerId, ItemId};
pub use item::{item_as, item_as_mut, Item, ItemCore};
pub use layer::{CartesianMap, Layer, LayerState};
pub use metadata::MetadataTable;
pub use operator::{
    output_as_mut, unique_input, unique_output_id, Operator, OperatorContext,
};
pub use storage::{ItemSink, ItemSinkExt, ItemSource, ItemSourceExt, MemSink, MemSource};
