//! The [`Item`] trait and the shared per-item state, [`ItemCore`].
//!
//! Every object an environment can own implements `Item`. The trait is
//! object-safe: the kernel stores items as `Box<dyn Item>` and reaches
//! concrete types through the `as_any` downcast seam, role accessors
//! (`as_frame`, `as_layer`, `as_operator`) cover the kernel's structural
//! dispatch without run-time type lookups.

use std::any::Any;

use crate::error::StorageError;
use crate::frame::Frame;
use crate::id::{EnvId, ItemId};
use crate::layer::Layer;
use crate::operator::Operator;
use crate::storage::ItemSink;

/// State shared by every item: requested and assigned ids, label, owner.
///
/// A freshly constructed item is detached: it has a requested id (which
/// may end in `/` to ask for numeric-suffix generation) but no assigned
/// id and no owner. On attach the environment composes and assigns the
/// full id and records itself as owner; on detach the owner is cleared
/// but the assigned id is kept, so re-attaching reuses it.
#[derive(Clone, Debug)]
pub struct ItemCore {
    requested_id: String,
    assigned: Option<ItemId>,
    label: String,
    owner: Option<EnvId>,
}

impl ItemCore {
    /// Create the core for a detached item with the given requested id.
    pub fn new(requested_id: impl Into<String>) -> Self {
        Self {
            requested_id: requested_id.into(),
            assigned: None,
            label: String::new(),
            owner: None,
        }
    }

    /// The id the creator asked for, before prefix composition.
    pub fn requested_id(&self) -> &str {
        &self.requested_id
    }

    /// The full id assigned on attach, if any.
    pub fn id(&self) -> Option<&ItemId> {
        self.assigned.as_ref()
    }

    /// The free-form, non-unique label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Replace the label.
    ///
    /// While attached, route label changes through the environment so an
    /// item-modified event is emitted.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    /// Whether the item is currently owned by an environment.
    pub fn is_attached(&self) -> bool {
        self.owner.is_some()
    }

    /// The owning environment's instance id, if attached.
    pub fn owner(&self) -> Option<EnvId> {
        self.owner
    }

    /// Record the assigned id and owner. Called by the environment on attach.
    pub fn assign(&mut self, id: ItemId, owner: EnvId) {
        self.assigned = Some(id);
        self.owner = Some(owner);
    }

    /// Clear the owner, keeping the assigned id. Called by the environment
    /// on detach.
    pub fn release(&mut self) {
        self.owner = None;
    }

    /// The assigned id, or the requested id while detached. For error text.
    pub fn display_id(&self) -> String {
        match &self.assigned {
            Some(id) => id.to_string(),
            None => self.requested_id.clone(),
        }
    }
}

/// Root trait of every object an environment can own.
pub trait Item: 'static {
    /// Shared per-item state.
    fn core(&self) -> &ItemCore;

    /// Shared per-item state, mutably.
    fn core_mut(&mut self) -> &mut ItemCore;

    /// The stable string naming this item's concrete kind.
    ///
    /// Class tags key the deserialization factory registry; two item types
    /// must never share one.
    fn class_tag(&self) -> &'static str;

    /// The item as `Any`, for the checked-downcast helper.
    fn as_any(&self) -> &dyn Any;

    /// The item as mutable `Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// The item's frame role, if it is a coordinate frame.
    fn as_frame(&self) -> Option<&Frame> {
        None
    }

    /// Mutable frame role.
    fn as_frame_mut(&mut self) -> Option<&mut Frame> {
        None
    }

    /// The item's layer role, if it holds map-like data.
    fn as_layer(&self) -> Option<&dyn Layer> {
        None
    }

    /// Mutable layer role.
    fn as_layer_mut(&mut self) -> Option<&mut dyn Layer> {
        None
    }

    /// The item's operator role, if it reads and writes layers.
    fn as_operator(&self) -> Option<&dyn Operator> {
        None
    }

    /// Mutable operator role.
    fn as_operator_mut(&mut self) -> Option<&mut dyn Operator> {
        None
    }

    /// Write the item's state through the serialization seam.
    ///
    /// Id, label, and class tag are recorded by the manifest writer; the
    /// hook only handles type-specific state.
    fn serialize(&self, sink: &mut dyn ItemSink) -> Result<(), StorageError>;
}

/// The single checked-downcast helper: a shared item as a concrete type.
pub fn item_as<T: Item>(item: &dyn Item) -> Option<&T> {
    item.as_any().downcast_ref::<T>()
}

/// Mutable variant of [`item_as`].
pub fn item_as_mut<T: Item>(item: &mut dyn Item) -> Option<&mut T> {
    item.as_any_mut().downcast_mut::<T>()
}
