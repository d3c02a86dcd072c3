//! The [`Layer`] and [`CartesianMap`] roles and their shared state.

use crate::id::ItemId;
use crate::item::Item;
use crate::metadata::MetadataTable;

/// State shared by every layer: the two flags and the metadata table.
///
/// `immutable` latches: once set it can never be cleared. `dirty` means
/// the layer no longer reflects its current inputs; it is cleared by the
/// generating operator after a successful update, or by an explicit caller
/// that takes responsibility.
#[derive(Debug, Default)]
pub struct LayerState {
    immutable: bool,
    dirty: bool,
    metadata: MetadataTable,
}

impl LayerState {
    /// Fresh state: mutable, clean, no metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the layer is latched immutable.
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// Latch the layer immutable. There is no way back.
    pub fn set_immutable(&mut self) {
        self.immutable = true;
    }

    /// Whether the layer is out of date with respect to its inputs.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the layer dirty. Idempotent, and allowed even on immutable
    /// layers: dirtiness still flows downstream from upstream changes.
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the dirty flag.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// The metadata side-table.
    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    /// The metadata side-table, mutably.
    pub fn metadata_mut(&mut self) -> &mut MetadataTable {
        &mut self.metadata
    }
}

/// Role trait for items that hold map-like data.
pub trait Layer: Item {
    /// The layer's flags and metadata.
    fn layer_state(&self) -> &LayerState;

    /// The layer's flags and metadata, mutably.
    fn layer_state_mut(&mut self) -> &mut LayerState;

    /// The layer's cartesian role, if it is bound into the frame tree.
    fn as_cartesian(&self) -> Option<&dyn CartesianMap> {
        None
    }

    /// Mutable cartesian role.
    fn as_cartesian_mut(&mut self) -> Option<&mut dyn CartesianMap> {
        None
    }
}

/// Role trait for layers that live in a cartesian space.
///
/// While attached, every cartesian map is bound to exactly one frame; the
/// binding itself lives in the environment's relation table.
pub trait CartesianMap: Layer {
    /// Dimension of the map's cartesian space (2 or 3).
    fn dimension(&self) -> u32;

    /// The frame the creator asked for, installed as the binding on
    /// attach. `None` means bind to the root frame.
    fn requested_frame(&self) -> Option<&ItemId> {
        None
    }
}
