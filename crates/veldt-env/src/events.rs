//! Event fan-out: ordered delivery, subscribe replay, and unsubscribe
//! inverse replay.

use veldt_core::{Event, EventHandler, HandlerId, ItemId, LinkChange};

use crate::environment::Environment;

impl Environment {
    /// Deliver an event to every subscribed handler, in subscription
    /// order.
    ///
    /// Handler failures are logged and swallowed: delivery continues and
    /// the mutation that emitted the event commits regardless.
    pub(crate) fn dispatch(&mut self, event: Event) {
        for (id, handler) in self.handlers.iter_mut() {
            if let Err(error) = handler.handle(&event) {
                tracing::warn!(handler = %id, %error, "event handler failed; continuing");
            }
        }
    }

    /// Subscribe a handler, first replaying the current state into it.
    ///
    /// The replay is a minimal event sequence that reconstructs the
    /// environment in the handler: frames in pre-order from the root
    /// (attach, parent link, transform), then layers by id, layer links,
    /// operators by id, operator edges, and finally cartesian bindings by
    /// map id.
    pub fn add_event_handler(&mut self, mut handler: Box<dyn EventHandler>) -> HandlerId {
        for event in self.attach_replay() {
            if let Err(error) = handler.handle(&event) {
                tracing::warn!(%error, "event handler failed during subscribe replay");
            }
        }
        let id = HandlerId::next();
        self.handlers.insert(id, handler);
        id
    }

    /// Unsubscribe a handler, delivering the inverse replay into it
    /// first, as if the environment were being torn down.
    ///
    /// Returns the handler, or `None` for an unknown id.
    pub fn remove_event_handler(&mut self, id: HandlerId) -> Option<Box<dyn EventHandler>> {
        let mut handler = self.handlers.shift_remove(&id)?;
        for event in self.detach_replay() {
            if let Err(error) = handler.handle(&event) {
                tracing::warn!(%error, "event handler failed during unsubscribe replay");
            }
        }
        Some(handler)
    }

    /// Number of subscribed handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// The deterministic event sequence that rebuilds the current state
    /// in a fresh mirror.
    pub fn attach_replay(&self) -> Vec<Event> {
        let mut events = Vec::new();

        // Frames: pre-order from the root, then any unlinked frames (and
        // their subtrees) by id.
        let mut visited: Vec<ItemId> = Vec::new();
        self.replay_frame(&self.root, &mut events, &mut visited);
        let mut frames: Vec<ItemId> = self
            .items
            .iter()
            .filter(|(_, item)| item.as_frame().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        frames.sort();
        for frame in &frames {
            if !visited.contains(frame) && self.frame_parent(frame).is_none() {
                self.replay_frame(frame, &mut events, &mut visited);
            }
        }

        // Layers by id, then the layer links by child id.
        let mut layers: Vec<ItemId> = self
            .items
            .iter()
            .filter(|(_, item)| item.as_frame().is_none() && item.as_layer().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        layers.sort();
        for layer in &layers {
            events.push(Event::ItemAttached { id: layer.clone() });
        }
        for child in &layers {
            for parent in self.layer_parents(child) {
                events.push(Event::LayerTreeChanged {
                    parent,
                    child: child.clone(),
                    link: LinkChange::Added,
                });
            }
        }

        // Operators by id, then input edges, then output edges.
        let mut operators: Vec<ItemId> = self
            .items
            .iter()
            .filter(|(_, item)| item.as_operator().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        operators.sort();
        for op in &operators {
            events.push(Event::ItemAttached { id: op.clone() });
        }
        for op in &operators {
            for layer in self.op_inputs.get(op).cloned().unwrap_or_default() {
                events.push(Event::OperatorInputChanged {
                    operator: op.clone(),
                    layer,
                    link: LinkChange::Added,
                });
            }
        }
        for op in &operators {
            for layer in self.op_outputs.get(op).cloned().unwrap_or_default() {
                events.push(Event::OperatorOutputChanged {
                    operator: op.clone(),
                    layer,
                    link: LinkChange::Added,
                });
            }
        }

        // Cartesian bindings by map id.
        let mut bindings: Vec<(ItemId, ItemId)> = self
            .map_frames
            .iter()
            .map(|(map, frame)| (map.clone(), frame.clone()))
            .collect();
        bindings.sort();
        for (map, frame) in bindings {
            events.push(Event::MapFrameChanged {
                map,
                frame: Some(frame),
            });
        }

        events
    }

    fn replay_frame(&self, frame: &ItemId, events: &mut Vec<Event>, visited: &mut Vec<ItemId>) {
        if !self.items.contains_key(frame) {
            return;
        }
        visited.push(frame.clone());
        events.push(Event::ItemAttached { id: frame.clone() });
        if let Some(parent) = self.frame_parent(frame) {
            events.push(Event::FrameTreeChanged {
                parent: parent.clone(),
                child: frame.clone(),
                link: LinkChange::Added,
            });
            if let Ok(transform) = self.get_transform(frame) {
                events.push(Event::FrameChanged {
                    frame: frame.clone(),
                    transform: transform.clone(),
                });
            }
        }
        for child in self.frame_children(frame) {
            self.replay_frame(&child, events, visited);
        }
    }

    /// The inverse of [`attach_replay`](Self::attach_replay): the same
    /// sequence reversed, with each event replaced by its undoing, so a
    /// mirror drains to empty in a consistent order.
    pub fn detach_replay(&self) -> Vec<Event> {
        self.attach_replay()
            .into_iter()
            .rev()
            .filter_map(invert_event)
            .collect()
    }
}

fn invert_event(event: Event) -> Option<Event> {
    match event {
        Event::ItemAttached { id } => Some(Event::ItemDetached { id }),
        Event::FrameTreeChanged { parent, child, .. } => Some(Event::FrameTreeChanged {
            parent,
            child,
            link: LinkChange::Removed,
        }),
        Event::LayerTreeChanged { parent, child, .. } => Some(Event::LayerTreeChanged {
            parent,
            child,
            link: LinkChange::Removed,
        }),
        Event::OperatorInputChanged {
            operator, layer, ..
        } => Some(Event::OperatorInputChanged {
            operator,
            layer,
            link: LinkChange::Removed,
        }),
        Event::OperatorOutputChanged {
            operator, layer, ..
        } => Some(Event::OperatorOutputChanged {
            operator,
            layer,
            link: LinkChange::Removed,
        }),
        Event::MapFrameChanged { map, .. } => Some(Event::MapFrameChanged { map, frame: None }),
        // Transform updates have no structural inverse; the frame's
        // detach event already retires its state.
        Event::FrameChanged { .. } => None,
        Event::ItemDetached { .. } | Event::ItemModified { .. } => None,
    }
}
