//! Change events and the handler trait.
//!
//! The environment emits one event per structural or state change, after
//! the change has been installed, synchronously in the mutating call.
//! The set of kinds is closed: mirrors of the environment can be driven
//! entirely from this enum.

use veldt_transform::TransformWithUncertainty;

use crate::error::HandlerError;
use crate::id::ItemId;

/// Whether a relation edge was added or removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkChange {
    /// The edge now exists.
    Added,
    /// The edge no longer exists.
    Removed,
}

/// A single change to the environment.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// An item entered the environment.
    ItemAttached {
        /// The newly assigned id.
        id: ItemId,
    },
    /// An item left the environment.
    ItemDetached {
        /// The id it had while attached.
        id: ItemId,
    },
    /// An attached item's state changed in place.
    ItemModified {
        /// The modified item.
        id: ItemId,
    },
    /// A frame parent link was added or removed.
    FrameTreeChanged {
        /// The parent frame.
        parent: ItemId,
        /// The child frame.
        child: ItemId,
        /// Added or removed.
        link: LinkChange,
    },
    /// A frame's transform to its parent was updated.
    FrameChanged {
        /// The frame whose transform changed.
        frame: ItemId,
        /// The new child-to-parent transform.
        transform: TransformWithUncertainty,
    },
    /// A layer parent link was added or removed.
    LayerTreeChanged {
        /// The parent layer.
        parent: ItemId,
        /// The child layer.
        child: ItemId,
        /// Added or removed.
        link: LinkChange,
    },
    /// An operator input edge was added or removed.
    OperatorInputChanged {
        /// The operator.
        operator: ItemId,
        /// The input layer.
        layer: ItemId,
        /// Added or removed.
        link: LinkChange,
    },
    /// An operator output edge was added or removed.
    OperatorOutputChanged {
        /// The operator.
        operator: ItemId,
        /// The output layer.
        layer: ItemId,
        /// Added or removed.
        link: LinkChange,
    },
    /// A cartesian map's frame binding changed.
    MapFrameChanged {
        /// The map.
        map: ItemId,
        /// The newly bound frame, or `None` when the binding was removed.
        frame: Option<ItemId>,
    },
}

/// Observer of environment changes.
///
/// Handlers receive events in emission order, with no reordering and no
/// coalescing. A returned error is logged and swallowed; delivery to the
/// remaining handlers continues and the mutation commits regardless.
pub trait EventHandler {
    /// Process one event.
    fn handle(&mut self, event: &Event) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: FnMut(&Event) -> Result<(), HandlerError>,
{
    fn handle(&mut self, event: &Event) -> Result<(), HandlerError> {
        self(event)
    }
}
