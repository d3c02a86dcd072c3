//! The [`Operator`] role and the context its update hook runs against.
//!
//! Operators declare their input and output arity at the type level and
//! receive an [`OperatorContext`] when the environment runs them. The
//! context enforces the edge discipline: hooks read layers that are wired
//! as inputs and write layers that are wired as outputs, nothing else.

use crate::error::OperatorError;
use crate::id::ItemId;
use crate::item::Item;
use crate::layer::Layer;

/// Role trait for items that read input layers and write output layers.
pub trait Operator: Item {
    /// Declared input bound. `0` means unbounded.
    fn input_arity(&self) -> usize {
        0
    }

    /// Declared output bound. `0` means unbounded.
    fn output_arity(&self) -> usize {
        0
    }

    /// Regenerate the outputs from the inputs.
    ///
    /// Called by `update_all` (and `update_from_operator`) once per pass,
    /// in dependency order, only when at least one output is dirty. On
    /// success the environment clears the outputs' dirty flags; on failure
    /// they stay dirty and the pass aborts.
    fn update(&mut self, ctx: &mut dyn OperatorContext) -> Result<(), OperatorError>;
}

/// What an update hook may see and touch while it runs.
pub trait OperatorContext {
    /// Ids of the wired input layers, in wiring order.
    fn input_ids(&self) -> &[ItemId];

    /// Ids of the wired output layers, in wiring order.
    fn output_ids(&self) -> &[ItemId];

    /// A wired input layer.
    fn input(&self, id: &ItemId) -> Result<&dyn Layer, OperatorError>;

    /// A wired output layer, read-only.
    fn output(&self, id: &ItemId) -> Result<&dyn Layer, OperatorError>;

    /// A wired output layer, writable.
    fn output_mut(&mut self, id: &ItemId) -> Result<&mut dyn Layer, OperatorError>;
}

/// The unique input of concrete type `T`.
///
/// Fails with `MissingInput` when there is no input of that type, or more
/// than one.
pub fn unique_input<'a, T: Layer>(ctx: &'a dyn OperatorContext) -> Result<&'a T, OperatorError> {
    let mut found: Option<&'a T> = None;
    for id in ctx.input_ids() {
        let layer = ctx.input(id)?;
        if let Some(typed) = layer.as_any().downcast_ref::<T>() {
            if found.is_some() {
                return Err(OperatorError::MissingInput {
                    detail: format!("more than one input of type {}", std::any::type_name::<T>()),
                });
            }
            found = Some(typed);
        }
    }
    found.ok_or_else(|| OperatorError::MissingInput {
        detail: format!("no input of type {}", std::any::type_name::<T>()),
    })
}

/// The id of the unique output of concrete type `T`.
///
/// Split from [`output_as_mut`] so hooks can look up the id before taking
/// the mutable borrow.
pub fn unique_output_id<T: Layer>(ctx: &dyn OperatorContext) -> Result<ItemId, OperatorError> {
    let mut found: Option<ItemId> = None;
    for id in ctx.output_ids() {
        let layer = ctx.output(id)?;
        if layer.as_any().is::<T>() {
            if found.is_some() {
                return Err(OperatorError::MissingOutput {
                    detail: format!(
                        "more than one output of type {}",
                        std::any::type_name::<T>()
                    ),
                });
            }
            found = Some(id.clone());
        }
    }
    found.ok_or_else(|| OperatorError::MissingOutput {
        detail: format!("no output of type {}", std::any::type_name::<T>()),
    })
}

/// A wired output as a concrete, writable type.
pub fn output_as_mut<'a, T: Layer>(
    ctx: &'a mut dyn OperatorContext,
    id: &ItemId,
) -> Result<&'a mut T, OperatorError> {
    let layer = ctx.output_mut(id)?;
    layer
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or_else(|| OperatorError::MissingOutput {
            detail: format!("output '{id}' is not a {}", std::any::type_name::<T>()),
        })
}
