//! Layer hierarchy operations: parent links, the dirty and immutable
//! flags, and routed metadata access.

use std::collections::BTreeSet;

use veldt_core::{EnvError, Event, ItemId, LinkChange};

use crate::environment::Environment;

impl Environment {
    /// Link `child` under `parent` in the layer hierarchy.
    ///
    /// Layers form an arbitrary DAG: a child may have several parents.
    /// Linking is idempotent per edge and refused when it would create a
    /// cycle.
    pub fn add_layer_child(&mut self, parent: &ItemId, child: &ItemId) -> Result<(), EnvError> {
        self.expect_layer(parent)?;
        self.expect_layer(child)?;
        if child == parent || self.layer_ancestors(parent).contains(child) {
            return Err(EnvError::WouldCycle {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        let parents = self.layer_parents.entry(child.clone()).or_default();
        if parents.iter().any(|p| p == parent) {
            return Ok(());
        }
        parents.push(parent.clone());
        self.dispatch(Event::LayerTreeChanged {
            parent: parent.clone(),
            child: child.clone(),
            link: LinkChange::Added,
        });
        Ok(())
    }

    /// Remove the parent link between `parent` and `child`.
    pub fn remove_layer_child(&mut self, parent: &ItemId, child: &ItemId) -> Result<(), EnvError> {
        let mut removed = false;
        let mut now_empty = false;
        if let Some(parents) = self.layer_parents.get_mut(child) {
            let before = parents.len();
            parents.retain(|p| p != parent);
            removed = parents.len() != before;
            now_empty = parents.is_empty();
        }
        if now_empty {
            self.layer_parents.shift_remove(child);
        }
        if !removed {
            return Err(EnvError::NotFound {
                what: format!("layer link '{child}' under '{parent}'"),
            });
        }
        self.dispatch(Event::LayerTreeChanged {
            parent: parent.clone(),
            child: child.clone(),
            link: LinkChange::Removed,
        });
        Ok(())
    }

    /// The parents of a layer, in link order.
    pub fn layer_parents(&self, child: &ItemId) -> Vec<ItemId> {
        self.layer_parents.get(child).cloned().unwrap_or_default()
    }

    /// The children of a layer, in id order.
    pub fn layer_children(&self, parent: &ItemId) -> Vec<ItemId> {
        let mut children: Vec<ItemId> = self
            .layer_parents
            .iter()
            .filter(|(_, parents)| parents.iter().any(|p| p == parent))
            .map(|(child, _)| child.clone())
            .collect();
        children.sort();
        children
    }

    /// All transitive ancestors of a layer.
    fn layer_ancestors(&self, layer: &ItemId) -> BTreeSet<ItemId> {
        let mut ancestors = BTreeSet::new();
        let mut stack: Vec<ItemId> = self.layer_parents(layer);
        while let Some(current) = stack.pop() {
            if ancestors.insert(current.clone()) {
                stack.extend(self.layer_parents(&current));
            }
        }
        ancestors
    }

    // ── Flags ───────────────────────────────────────────────────

    /// Whether a layer is out of date with respect to its inputs.
    pub fn is_dirty(&self, layer: &ItemId) -> Result<bool, EnvError> {
        self.items
            .get(layer)
            .and_then(|item| item.as_layer())
            .map(|l| l.layer_state().is_dirty())
            .ok_or_else(|| EnvError::NotFound {
                what: format!("layer '{layer}'"),
            })
    }

    /// Mark a layer dirty. Idempotent; allowed on immutable layers, since
    /// dirtiness still flows downstream from upstream changes.
    pub fn set_dirty(&mut self, layer: &ItemId) -> Result<(), EnvError> {
        self.expect_layer(layer)?;
        self.mark_layer_dirty(layer);
        Ok(())
    }

    /// Clear a layer's dirty flag on behalf of the caller.
    ///
    /// The generating operator clears the flag itself after a successful
    /// update; this entry point is for callers that take responsibility
    /// explicitly. Refused on immutable layers.
    pub fn reset_dirty(&mut self, layer: &ItemId) -> Result<(), EnvError> {
        if self.is_immutable(layer)? {
            return Err(EnvError::ImmutableLayer {
                layer: layer.clone(),
            });
        }
        self.clear_layer_dirty(layer);
        Ok(())
    }

    /// Whether a layer is latched immutable.
    pub fn is_immutable(&self, layer: &ItemId) -> Result<bool, EnvError> {
        self.items
            .get(layer)
            .and_then(|item| item.as_layer())
            .map(|l| l.layer_state().is_immutable())
            .ok_or_else(|| EnvError::NotFound {
                what: format!("layer '{layer}'"),
            })
    }

    /// Latch a layer immutable. There is no way back.
    pub fn set_immutable(&mut self, layer: &ItemId) -> Result<(), EnvError> {
        let item = self.items.get_mut(layer).ok_or_else(|| EnvError::NotFound {
            what: format!("layer '{layer}'"),
        })?;
        let state = item
            .as_layer_mut()
            .ok_or_else(|| EnvError::NotFound {
                what: format!("layer '{layer}'"),
            })?
            .layer_state_mut();
        if state.is_immutable() {
            return Ok(());
        }
        state.set_immutable();
        self.dispatch(Event::ItemModified { id: layer.clone() });
        Ok(())
    }

    /// Set the dirty flag, emitting an item-modified event on the
    /// clean-to-dirty transition only.
    pub(crate) fn mark_layer_dirty(&mut self, layer: &ItemId) {
        let Some(state) = self
            .items
            .get_mut(layer)
            .and_then(|item| item.as_layer_mut())
            .map(|l| l.layer_state_mut())
        else {
            return;
        };
        if state.is_dirty() {
            return;
        }
        state.set_dirty();
        self.dispatch(Event::ItemModified { id: layer.clone() });
    }

    /// Clear the dirty flag, emitting an item-modified event on the
    /// dirty-to-clean transition only.
    pub(crate) fn clear_layer_dirty(&mut self, layer: &ItemId) {
        let Some(state) = self
            .items
            .get_mut(layer)
            .and_then(|item| item.as_layer_mut())
            .map(|l| l.layer_state_mut())
        else {
            return;
        };
        if !state.is_dirty() {
            return;
        }
        state.clear_dirty();
        self.dispatch(Event::ItemModified { id: layer.clone() });
    }

    /// Whether a layer is dirty, without the existence check.
    pub(crate) fn layer_is_dirty(&self, layer: &ItemId) -> bool {
        self.items
            .get(layer)
            .and_then(|item| item.as_layer())
            .is_some_and(|l| l.layer_state().is_dirty())
    }

    // ── Metadata ────────────────────────────────────────────────

    /// Insert or replace a metadata value on a layer.
    ///
    /// Refused on immutable layers.
    pub fn set_metadata<T: 'static>(
        &mut self,
        layer: &ItemId,
        key: &str,
        value: T,
    ) -> Result<(), EnvError> {
        if self.is_immutable(layer)? {
            return Err(EnvError::ImmutableLayer {
                layer: layer.clone(),
            });
        }
        if let Some(state) = self
            .items
            .get_mut(layer)
            .and_then(|item| item.as_layer_mut())
            .map(|l| l.layer_state_mut())
        {
            state.metadata_mut().insert(key, value);
        }
        self.dispatch(Event::ItemModified { id: layer.clone() });
        Ok(())
    }

    /// Read a metadata value with the type it was written as.
    pub fn metadata<T: 'static>(&self, layer: &ItemId, key: &str) -> Result<&T, EnvError> {
        let state = self
            .items
            .get(layer)
            .and_then(|item| item.as_layer())
            .map(|l| l.layer_state())
            .ok_or_else(|| EnvError::NotFound {
                what: format!("layer '{layer}'"),
            })?;
        state.metadata().get::<T>(key)
    }

    /// Whether a metadata key exists on a layer.
    pub fn has_metadata(&self, layer: &ItemId, key: &str) -> Result<bool, EnvError> {
        self.items
            .get(layer)
            .and_then(|item| item.as_layer())
            .map(|l| l.layer_state().metadata().has(key))
            .ok_or_else(|| EnvError::NotFound {
                what: format!("layer '{layer}'"),
            })
    }

    /// Remove one metadata key. Refused on immutable layers.
    pub fn remove_metadata(&mut self, layer: &ItemId, key: &str) -> Result<bool, EnvError> {
        if self.is_immutable(layer)? {
            return Err(EnvError::ImmutableLayer {
                layer: layer.clone(),
            });
        }
        let removed = self
            .items
            .get_mut(layer)
            .and_then(|item| item.as_layer_mut())
            .map(|l| l.layer_state_mut().metadata_mut().remove(key))
            .unwrap_or(false);
        if removed {
            self.dispatch(Event::ItemModified { id: layer.clone() });
        }
        Ok(removed)
    }

    /// Remove all metadata from a layer. Refused on immutable layers.
    pub fn clear_metadata(&mut self, layer: &ItemId) -> Result<(), EnvError> {
        if self.is_immutable(layer)? {
            return Err(EnvError::ImmutableLayer {
                layer: layer.clone(),
            });
        }
        if let Some(state) = self
            .items
            .get_mut(layer)
            .and_then(|item| item.as_layer_mut())
            .map(|l| l.layer_state_mut())
        {
            state.metadata_mut().clear();
        }
        self.dispatch(Event::ItemModified { id: layer.clone() });
        Ok(())
    }
}
