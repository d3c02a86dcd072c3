//! The [`Environment`] struct: item ownership, id generation, attach and
//! detach, and typed lookup.

use std::any::type_name;
use std::collections::BTreeSet;

use indexmap::IndexMap;

use veldt_core::{
    item_as, item_as_mut, EnvError, EnvId, Event, EventHandler, Frame, HandlerId, Item, ItemId,
};

/// The environment kernel.
///
/// Owns a mapping `id -> item` plus four relation tables, a prefix and
/// running counter for id generation, and the subscribed event handlers.
/// A designated root frame is created together with the environment and
/// anchors the frame tree.
pub struct Environment {
    pub(crate) env_id: EnvId,
    pub(crate) items: IndexMap<ItemId, Box<dyn Item>>,
    /// Frame tree: child -> parent.
    pub(crate) frame_parents: IndexMap<ItemId, ItemId>,
    /// Layer hierarchy: child -> parents (acyclic, multi-parent).
    pub(crate) layer_parents: IndexMap<ItemId, Vec<ItemId>>,
    /// Operator graph: operator -> input layers (multiset).
    pub(crate) op_inputs: IndexMap<ItemId, Vec<ItemId>>,
    /// Operator graph: operator -> output layers (multiset).
    pub(crate) op_outputs: IndexMap<ItemId, Vec<ItemId>>,
    /// Cartesian bindings: map -> frame.
    pub(crate) map_frames: IndexMap<ItemId, ItemId>,
    pub(crate) root: ItemId,
    pub(crate) prefix: String,
    pub(crate) next_suffix: u64,
    pub(crate) handlers: IndexMap<HandlerId, Box<dyn EventHandler>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("env_id", &self.env_id)
            .field("item_count", &self.items.len())
            .field("root", &self.root)
            .field("prefix", &self.prefix)
            .field("next_suffix", &self.next_suffix)
            .finish()
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        format!("/{trimmed}/")
    }
}

impl Environment {
    /// A fresh environment with the default `/` prefix.
    pub fn new() -> Self {
        Self::with_prefix("/")
    }

    /// A fresh environment with the given id prefix.
    ///
    /// The prefix is normalized to start and end with `/`. The root frame
    /// is created and attached as `<prefix>root`.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = normalize_prefix(prefix);
        let env_id = EnvId::next();
        let root_id = ItemId::new(format!("{prefix}root"));
        let mut root = Frame::new("root");
        root.core_mut().assign(root_id.clone(), env_id);

        let mut items: IndexMap<ItemId, Box<dyn Item>> = IndexMap::new();
        items.insert(root_id.clone(), Box::new(root));

        Self {
            env_id,
            items,
            frame_parents: IndexMap::new(),
            layer_parents: IndexMap::new(),
            op_inputs: IndexMap::new(),
            op_outputs: IndexMap::new(),
            map_frames: IndexMap::new(),
            root: root_id,
            prefix,
            next_suffix: 0,
            handlers: IndexMap::new(),
        }
    }

    /// An empty environment being rebuilt by a deserializer.
    ///
    /// No root frame is created: the deserializer attaches every item,
    /// including the frame designated as root, with
    /// [`attach_with_id`](Self::attach_with_id) and replays the relation
    /// tables through the normal entry points.
    pub fn restore(prefix: &str, next_suffix: u64, root: ItemId) -> Self {
        Self {
            env_id: EnvId::next(),
            items: IndexMap::new(),
            frame_parents: IndexMap::new(),
            layer_parents: IndexMap::new(),
            op_inputs: IndexMap::new(),
            op_outputs: IndexMap::new(),
            map_frames: IndexMap::new(),
            root,
            prefix: normalize_prefix(prefix),
            next_suffix,
            handlers: IndexMap::new(),
        }
    }

    /// This environment's unique instance id.
    pub fn env_id(&self) -> EnvId {
        self.env_id
    }

    /// The id prefix, always starting and ending with `/`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Replace the id prefix. Only affects ids generated afterwards.
    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = normalize_prefix(prefix);
    }

    /// Current value of the running suffix counter.
    pub fn next_suffix(&self) -> u64 {
        self.next_suffix
    }

    // ── Attach / detach ─────────────────────────────────────────

    /// Attach an item, passing ownership to the environment.
    ///
    /// Composes the full id from the prefix and the item's requested id:
    /// a requested id ending in `/` receives a numeric suffix from the
    /// running counter, otherwise the composed id is used verbatim and a
    /// collision fails with a duplicate-id error. Cartesian maps are
    /// implicitly bound to their requested frame, or to the root frame.
    pub fn attach(&mut self, item: Box<dyn Item>) -> Result<ItemId, EnvError> {
        self.attach_inner(item, None)
    }

    /// Attach a cartesian map, binding it to `frame` instead of the map's
    /// requested frame (or the root frame when `frame` is `None`).
    pub fn attach_map(
        &mut self,
        item: Box<dyn Item>,
        frame: Option<&ItemId>,
    ) -> Result<ItemId, EnvError> {
        self.attach_inner(item, frame)
    }

    fn attach_inner(
        &mut self,
        mut item: Box<dyn Item>,
        frame: Option<&ItemId>,
    ) -> Result<ItemId, EnvError> {
        if item.core().owner().is_some() {
            return Err(EnvError::CrossEnvironment {
                id: item.core().display_id(),
            });
        }

        // Resolve the implicit binding before any state changes so a
        // failed attach leaves the environment untouched.
        let is_cartesian = item
            .as_layer()
            .and_then(|layer| layer.as_cartesian())
            .is_some();
        let binding = if is_cartesian {
            let requested = frame.cloned().or_else(|| {
                item.as_layer()
                    .and_then(|layer| layer.as_cartesian())
                    .and_then(|map| map.requested_frame().cloned())
            });
            let target = requested.unwrap_or_else(|| self.root.clone());
            if !self.is_frame(&target) {
                return Err(EnvError::NotFound {
                    what: format!("frame '{target}'"),
                });
            }
            Some(target)
        } else {
            if frame.is_some() {
                return Err(EnvError::NotFound {
                    what: format!(
                        "cartesian role on '{}' (class {})",
                        item.core().display_id(),
                        item.class_tag()
                    ),
                });
            }
            None
        };

        let id = match item.core().id() {
            // Re-attach after a detach: the assigned id is kept.
            Some(existing) => {
                if self.items.contains_key(existing) {
                    return Err(EnvError::DuplicateId {
                        id: existing.clone(),
                    });
                }
                existing.clone()
            }
            None => self.compose_id(item.core().requested_id().to_owned())?,
        };

        item.core_mut().assign(id.clone(), self.env_id);
        self.items.insert(id.clone(), item);
        self.dispatch(Event::ItemAttached { id: id.clone() });

        if let Some(frame) = binding {
            self.map_frames.insert(id.clone(), frame.clone());
            self.dispatch(Event::MapFrameChanged {
                map: id.clone(),
                frame: Some(frame),
            });
        }
        Ok(id)
    }

    /// Attach an item under a verbatim id, bypassing id composition.
    ///
    /// Used by deserializers, which replay relation tables (including
    /// cartesian bindings) separately; no implicit relations are
    /// installed.
    pub fn attach_with_id(&mut self, mut item: Box<dyn Item>, id: ItemId) -> Result<(), EnvError> {
        if item.core().owner().is_some() {
            return Err(EnvError::CrossEnvironment {
                id: item.core().display_id(),
            });
        }
        if self.items.contains_key(&id) {
            return Err(EnvError::DuplicateId { id });
        }
        item.core_mut().assign(id.clone(), self.env_id);
        self.items.insert(id.clone(), item);
        self.dispatch(Event::ItemAttached { id });
        Ok(())
    }

    fn compose_id(&mut self, requested: String) -> Result<ItemId, EnvError> {
        if let Some(base) = requested.strip_suffix('/') {
            loop {
                let candidate = ItemId::new(format!("{}{}{}", self.prefix, base, self.next_suffix));
                self.next_suffix += 1;
                if !self.items.contains_key(&candidate) {
                    return Ok(candidate);
                }
            }
        } else {
            let id = ItemId::new(format!("{}{}", self.prefix, requested));
            if self.items.contains_key(&id) {
                return Err(EnvError::DuplicateId { id });
            }
            Ok(id)
        }
    }

    /// Detach an item, returning ownership to the caller.
    ///
    /// Every relation involving the item is removed first, with one
    /// removal event per edge, followed by the item-detached event.
    /// Children whose only parent was the detached item become orphans;
    /// they remain attached and are the caller's responsibility.
    pub fn detach(&mut self, id: &ItemId) -> Result<Box<dyn Item>, EnvError> {
        let Some(mut item) = self.items.shift_remove(id) else {
            return Err(EnvError::NotFound {
                what: format!("item '{id}'"),
            });
        };
        self.remove_relations_of(id);
        item.core_mut().release();
        self.dispatch(Event::ItemDetached { id: id.clone() });
        Ok(item)
    }

    /// Detach an item together with its structural descendants.
    ///
    /// For a frame: all descendant frames and the maps bound to any of
    /// them. For a layer: all child layers, transitively. Items are
    /// detached in post-order (deepest first, the requested item last),
    /// which is also the order of the returned boxes and of the emitted
    /// events.
    pub fn detach_deep(&mut self, id: &ItemId) -> Result<Vec<Box<dyn Item>>, EnvError> {
        if !self.items.contains_key(id) {
            return Err(EnvError::NotFound {
                what: format!("item '{id}'"),
            });
        }
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        self.collect_deep(id, &mut order, &mut visited);
        let mut detached = Vec::with_capacity(order.len());
        for each in &order {
            detached.push(self.detach(each)?);
        }
        Ok(detached)
    }

    fn collect_deep(&self, id: &ItemId, out: &mut Vec<ItemId>, visited: &mut BTreeSet<ItemId>) {
        if !visited.insert(id.clone()) {
            return;
        }
        if self.is_frame(id) {
            for child in self.frame_children(id) {
                self.collect_deep(&child, out, visited);
            }
            for map in self.maps_of_frame(id) {
                self.collect_deep(&map, out, visited);
            }
        }
        if self.is_layer(id) {
            for child in self.layer_children(id) {
                self.collect_deep(&child, out, visited);
            }
        }
        out.push(id.clone());
    }

    fn remove_relations_of(&mut self, id: &ItemId) {
        // Frame tree: the item's own parent link, then links to it as parent.
        if let Some(parent) = self.frame_parents.shift_remove(id) {
            self.dispatch(Event::FrameTreeChanged {
                parent,
                child: id.clone(),
                link: veldt_core::LinkChange::Removed,
            });
        }
        let orphaned: Vec<ItemId> = self
            .frame_parents
            .iter()
            .filter(|(_, parent)| *parent == id)
            .map(|(child, _)| child.clone())
            .collect();
        for child in orphaned {
            self.frame_parents.shift_remove(&child);
            self.dispatch(Event::FrameTreeChanged {
                parent: id.clone(),
                child,
                link: veldt_core::LinkChange::Removed,
            });
        }

        // Layer hierarchy, both directions.
        if let Some(parents) = self.layer_parents.shift_remove(id) {
            for parent in parents {
                self.dispatch(Event::LayerTreeChanged {
                    parent,
                    child: id.clone(),
                    link: veldt_core::LinkChange::Removed,
                });
            }
        }
        let mut severed: Vec<ItemId> = Vec::new();
        for (child, parents) in self.layer_parents.iter_mut() {
            if parents.iter().any(|p| p == id) {
                parents.retain(|p| p != id);
                severed.push(child.clone());
            }
        }
        self.layer_parents.retain(|_, parents| !parents.is_empty());
        for child in severed {
            self.dispatch(Event::LayerTreeChanged {
                parent: id.clone(),
                child,
                link: veldt_core::LinkChange::Removed,
            });
        }

        // Operator graph: the item as operator, then as layer.
        if let Some(inputs) = self.op_inputs.shift_remove(id) {
            for layer in dedup_in_order(inputs) {
                self.dispatch(Event::OperatorInputChanged {
                    operator: id.clone(),
                    layer,
                    link: veldt_core::LinkChange::Removed,
                });
            }
        }
        if let Some(outputs) = self.op_outputs.shift_remove(id) {
            for layer in dedup_in_order(outputs) {
                self.dispatch(Event::OperatorOutputChanged {
                    operator: id.clone(),
                    layer,
                    link: veldt_core::LinkChange::Removed,
                });
            }
        }
        let mut input_cuts: Vec<ItemId> = Vec::new();
        for (op, inputs) in self.op_inputs.iter_mut() {
            if inputs.iter().any(|l| l == id) {
                inputs.retain(|l| l != id);
                input_cuts.push(op.clone());
            }
        }
        for op in input_cuts {
            self.dispatch(Event::OperatorInputChanged {
                operator: op,
                layer: id.clone(),
                link: veldt_core::LinkChange::Removed,
            });
        }
        let mut output_cuts: Vec<ItemId> = Vec::new();
        for (op, outputs) in self.op_outputs.iter_mut() {
            if outputs.iter().any(|l| l == id) {
                outputs.retain(|l| l != id);
                output_cuts.push(op.clone());
            }
        }
        for op in output_cuts {
            self.dispatch(Event::OperatorOutputChanged {
                operator: op,
                layer: id.clone(),
                link: veldt_core::LinkChange::Removed,
            });
        }

        // Cartesian bindings: the item as map, then as frame.
        if self.map_frames.shift_remove(id).is_some() {
            self.dispatch(Event::MapFrameChanged {
                map: id.clone(),
                frame: None,
            });
        }
        let unbound: Vec<ItemId> = self
            .map_frames
            .iter()
            .filter(|(_, frame)| *frame == id)
            .map(|(map, _)| map.clone())
            .collect();
        for map in unbound {
            self.map_frames.shift_remove(&map);
            self.dispatch(Event::MapFrameChanged { map, frame: None });
        }
    }

    // ── Lookup ──────────────────────────────────────────────────

    /// The item at `id`, if attached.
    pub fn get_item(&self, id: &ItemId) -> Option<&dyn Item> {
        self.items.get(id).map(|boxed| boxed.as_ref())
    }

    /// The unique item of concrete type `T`.
    ///
    /// Fails with an ambiguous-lookup error when more than one item
    /// matches, and not-found when none does.
    pub fn get<T: Item>(&self) -> Result<&T, EnvError> {
        let mut found: Option<&T> = None;
        for item in self.items.values() {
            if let Some(typed) = item_as::<T>(item.as_ref()) {
                if found.is_some() {
                    return Err(EnvError::AmbiguousLookup {
                        type_name: type_name::<T>(),
                    });
                }
                found = Some(typed);
            }
        }
        found.ok_or_else(|| EnvError::NotFound {
            what: format!("item of type {}", type_name::<T>()),
        })
    }

    /// The item at `id` as concrete type `T`, or `None` when the id is
    /// unknown or the class differs.
    pub fn get_with_id<T: Item>(&self, id: &ItemId) -> Option<&T> {
        self.items
            .get(id)
            .and_then(|item| item_as::<T>(item.as_ref()))
    }

    /// Every item of concrete type `T`, in attach order.
    pub fn items_of<T: Item>(&self) -> Vec<&T> {
        self.items
            .values()
            .filter_map(|item| item_as::<T>(item.as_ref()))
            .collect()
    }

    /// Ids of all attached items, in attach order.
    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.items.keys()
    }

    /// Number of attached items (the root frame included).
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Mutate the item at `id` as concrete type `T`, then emit an
    /// item-modified event.
    ///
    /// This is the routed path for item mutations that have no dedicated
    /// kernel method; the caller takes responsibility for keeping the
    /// item's invariants.
    pub fn with_item_mut<T: Item, R>(
        &mut self,
        id: &ItemId,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, EnvError> {
        let item = self.items.get_mut(id).ok_or_else(|| EnvError::NotFound {
            what: format!("item '{id}'"),
        })?;
        let typed = item_as_mut::<T>(item.as_mut()).ok_or_else(|| EnvError::NotFound {
            what: format!("item '{id}' as {}", type_name::<T>()),
        })?;
        let result = f(typed);
        self.dispatch(Event::ItemModified { id: id.clone() });
        Ok(result)
    }

    /// Emit an item-modified event for an attached item.
    pub fn mark_modified(&mut self, id: &ItemId) -> Result<(), EnvError> {
        if !self.items.contains_key(id) {
            return Err(EnvError::NotFound {
                what: format!("item '{id}'"),
            });
        }
        self.dispatch(Event::ItemModified { id: id.clone() });
        Ok(())
    }

    /// Replace an item's label, emitting an item-modified event.
    pub fn set_label(&mut self, id: &ItemId, label: &str) -> Result<(), EnvError> {
        let item = self.items.get_mut(id).ok_or_else(|| EnvError::NotFound {
            what: format!("item '{id}'"),
        })?;
        item.core_mut().set_label(label);
        self.dispatch(Event::ItemModified { id: id.clone() });
        Ok(())
    }

    // ── Relation edge lists (serializers and mirrors) ───────────

    /// Frame tree edges as `(child, parent)`, in child-id order.
    pub fn frame_edges(&self) -> Vec<(ItemId, ItemId)> {
        let mut edges: Vec<(ItemId, ItemId)> = self
            .frame_parents
            .iter()
            .map(|(child, parent)| (child.clone(), parent.clone()))
            .collect();
        edges.sort();
        edges
    }

    /// Layer hierarchy edges as `(child, parent)`, in child-id order.
    pub fn layer_edges(&self) -> Vec<(ItemId, ItemId)> {
        let mut edges = Vec::new();
        for (child, parents) in &self.layer_parents {
            for parent in parents {
                edges.push((child.clone(), parent.clone()));
            }
        }
        edges.sort();
        edges
    }

    /// Operator input edges as `(operator, layer)`, in operator-id order,
    /// preserving wiring order per operator.
    pub fn operator_input_edges(&self) -> Vec<(ItemId, ItemId)> {
        let mut ops: Vec<&ItemId> = self.op_inputs.keys().collect();
        ops.sort();
        let mut edges = Vec::new();
        for op in ops {
            for layer in &self.op_inputs[op] {
                edges.push((op.clone(), layer.clone()));
            }
        }
        edges
    }

    /// Operator output edges as `(operator, layer)`, in operator-id
    /// order, preserving wiring order per operator.
    pub fn operator_output_edges(&self) -> Vec<(ItemId, ItemId)> {
        let mut ops: Vec<&ItemId> = self.op_outputs.keys().collect();
        ops.sort();
        let mut edges = Vec::new();
        for op in ops {
            for layer in &self.op_outputs[op] {
                edges.push((op.clone(), layer.clone()));
            }
        }
        edges
    }

    /// Cartesian bindings as `(map, frame)`, in map-id order.
    pub fn cartesian_binding_edges(&self) -> Vec<(ItemId, ItemId)> {
        let mut edges: Vec<(ItemId, ItemId)> = self
            .map_frames
            .iter()
            .map(|(map, frame)| (map.clone(), frame.clone()))
            .collect();
        edges.sort();
        edges
    }

    // ── Role checks shared by the relation modules ──────────────

    pub(crate) fn is_frame(&self, id: &ItemId) -> bool {
        self.items
            .get(id)
            .is_some_and(|item| item.as_frame().is_some())
    }

    pub(crate) fn is_layer(&self, id: &ItemId) -> bool {
        self.items
            .get(id)
            .is_some_and(|item| item.as_layer().is_some())
    }

    pub(crate) fn expect_frame(&self, id: &ItemId) -> Result<(), EnvError> {
        if self.is_frame(id) {
            Ok(())
        } else {
            Err(EnvError::NotFound {
                what: format!("frame '{id}'"),
            })
        }
    }

    pub(crate) fn expect_layer(&self, id: &ItemId) -> Result<(), EnvError> {
        if self.is_layer(id) {
            Ok(())
        } else {
            Err(EnvError::NotFound {
                what: format!("layer '{id}'"),
            })
        }
    }

    pub(crate) fn expect_operator(&self, id: &ItemId) -> Result<(), EnvError> {
        let is_op = self
            .items
            .get(id)
            .is_some_and(|item| item.as_operator().is_some());
        if is_op {
            Ok(())
        } else {
            Err(EnvError::NotFound {
                what: format!("operator '{id}'"),
            })
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// First occurrence of each id, preserving order.
fn dedup_in_order(ids: Vec<ItemId>) -> Vec<ItemId> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
