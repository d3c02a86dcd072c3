//! Frame tree operations: parent links, transform updates, and
//! relative-transform resolution across the tree.

use smallvec::SmallVec;

use veldt_core::{EnvError, Event, ItemId, LinkChange};
use veldt_transform::{Transform, TransformWithUncertainty};

use crate::environment::Environment;

/// Ancestor chains rarely exceed a handful of frames; keep them off the
/// heap for the common case.
type Chain = SmallVec<[ItemId; 8]>;

impl Environment {
    /// The designated root frame's id.
    pub fn root_frame(&self) -> &ItemId {
        &self.root
    }

    /// Link `child` under `parent` in the frame tree.
    ///
    /// Replaces an existing parent link of `child`, emitting a removal
    /// event for the old link first. Linking is refused when it would
    /// create a cycle or displace the designated root.
    pub fn add_frame_child(&mut self, parent: &ItemId, child: &ItemId) -> Result<(), EnvError> {
        self.expect_frame(parent)?;
        self.expect_frame(child)?;
        if child == parent || child == &self.root || self.frame_ancestors(parent).contains(child) {
            return Err(EnvError::WouldCycle {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        if let Some(old) = self.frame_parents.get(child).cloned() {
            if old == *parent {
                return Ok(());
            }
            self.frame_parents.shift_remove(child);
            self.dispatch(Event::FrameTreeChanged {
                parent: old,
                child: child.clone(),
                link: LinkChange::Removed,
            });
        }
        self.frame_parents.insert(child.clone(), parent.clone());
        self.dispatch(Event::FrameTreeChanged {
            parent: parent.clone(),
            child: child.clone(),
            link: LinkChange::Added,
        });
        Ok(())
    }

    /// Remove the parent link between `parent` and `child`.
    pub fn remove_frame_child(&mut self, parent: &ItemId, child: &ItemId) -> Result<(), EnvError> {
        match self.frame_parents.get(child) {
            Some(actual) if actual == parent => {
                self.frame_parents.shift_remove(child);
                self.dispatch(Event::FrameTreeChanged {
                    parent: parent.clone(),
                    child: child.clone(),
                    link: LinkChange::Removed,
                });
                Ok(())
            }
            _ => Err(EnvError::NotFound {
                what: format!("frame link '{child}' under '{parent}'"),
            }),
        }
    }

    /// The parent of a frame, or `None` for the root and unlinked frames.
    pub fn frame_parent(&self, frame: &ItemId) -> Option<&ItemId> {
        self.frame_parents.get(frame)
    }

    /// The children of a frame, in id order.
    pub fn frame_children(&self, frame: &ItemId) -> Vec<ItemId> {
        let mut children: Vec<ItemId> = self
            .frame_parents
            .iter()
            .filter(|(_, parent)| *parent == frame)
            .map(|(child, _)| child.clone())
            .collect();
        children.sort();
        children
    }

    /// The cartesian maps bound to a frame, in id order.
    pub fn maps_of_frame(&self, frame: &ItemId) -> Vec<ItemId> {
        let mut maps: Vec<ItemId> = self
            .map_frames
            .iter()
            .filter(|(_, bound)| *bound == frame)
            .map(|(map, _)| map.clone())
            .collect();
        maps.sort();
        maps
    }

    /// The frame a cartesian map is bound to.
    pub fn frame_of_map(&self, map: &ItemId) -> Option<&ItemId> {
        self.map_frames.get(map)
    }

    /// Bind a cartesian map to a frame, replacing any existing binding.
    ///
    /// Both items must already be attached.
    pub fn bind_frame(&mut self, map: &ItemId, frame: &ItemId) -> Result<(), EnvError> {
        self.expect_frame(frame)?;
        let is_map = self
            .get_item(map)
            .and_then(|item| item.as_layer())
            .and_then(|layer| layer.as_cartesian())
            .is_some();
        if !is_map {
            return Err(EnvError::NotFound {
                what: format!("cartesian map '{map}'"),
            });
        }
        self.map_frames.insert(map.clone(), frame.clone());
        self.dispatch(Event::MapFrameChanged {
            map: map.clone(),
            frame: Some(frame.clone()),
        });
        Ok(())
    }

    /// A frame's transform to its parent, with attached uncertainty.
    pub fn get_transform(&self, frame: &ItemId) -> Result<&TransformWithUncertainty, EnvError> {
        self.items
            .get(frame)
            .and_then(|item| item.as_frame())
            .map(|f| f.transform())
            .ok_or_else(|| EnvError::NotFound {
                what: format!("frame '{frame}'"),
            })
    }

    /// Update a frame's transform to its parent.
    ///
    /// Every cartesian map bound under the changed frame (transitively)
    /// is marked dirty, and a frame-changed event is emitted.
    pub fn set_transform(&mut self, frame: &ItemId, transform: Transform) -> Result<(), EnvError> {
        self.set_transform_with_uncertainty(frame, TransformWithUncertainty::certain(transform))
    }

    /// Like [`set_transform`](Self::set_transform), with uncertainty.
    pub fn set_transform_with_uncertainty(
        &mut self,
        frame: &ItemId,
        transform: TransformWithUncertainty,
    ) -> Result<(), EnvError> {
        {
            let item = self.items.get_mut(frame).ok_or_else(|| EnvError::NotFound {
                what: format!("frame '{frame}'"),
            })?;
            let node = item.as_frame_mut().ok_or_else(|| EnvError::NotFound {
                what: format!("frame '{frame}'"),
            })?;
            node.set_transform(transform.clone());
        }
        for map in self.maps_under(frame) {
            self.mark_layer_dirty(&map);
        }
        self.dispatch(Event::FrameChanged {
            frame: frame.clone(),
            transform,
        });
        Ok(())
    }

    /// All maps bound to `frame` or any frame below it, in visit order.
    fn maps_under(&self, frame: &ItemId) -> Vec<ItemId> {
        let mut maps = Vec::new();
        let mut stack = vec![frame.clone()];
        while let Some(current) = stack.pop() {
            maps.extend(self.maps_of_frame(&current));
            stack.extend(self.frame_children(&current));
        }
        maps
    }

    /// The chain `[frame, parent, ..., top]`, ending at the root or at
    /// the highest unlinked ancestor.
    fn chain_to_top(&self, frame: &ItemId) -> Chain {
        let mut chain = Chain::new();
        let mut current = frame.clone();
        loop {
            chain.push(current.clone());
            match self.frame_parents.get(&current) {
                Some(parent) => current = parent.clone(),
                None => break,
            }
        }
        chain
    }

    /// Ancestors of a frame, nearest first, excluding the frame itself.
    pub(crate) fn frame_ancestors(&self, frame: &ItemId) -> Chain {
        let mut chain = self.chain_to_top(frame);
        chain.remove(0);
        chain
    }

    /// The rigid motion mapping `from`-frame coordinates into `to`-frame
    /// coordinates.
    ///
    /// `relative_transform(child, parent)` equals the child's stored
    /// transform.
    pub fn relative_transform(&self, from: &ItemId, to: &ItemId) -> Result<Transform, EnvError> {
        Ok(*self
            .relative_transform_with_uncertainty(from, to)?
            .transform())
    }

    /// Like [`relative_transform`](Self::relative_transform), composing
    /// covariances along the chain.
    ///
    /// The chains of both frames are intersected at their lowest common
    /// ancestor; `from`'s side composes forward and `to`'s side is
    /// inverted. When no link on either side carries a covariance the
    /// whole resolution stays on the uncertainty-free fast path.
    pub fn relative_transform_with_uncertainty(
        &self,
        from: &ItemId,
        to: &ItemId,
    ) -> Result<TransformWithUncertainty, EnvError> {
        self.expect_frame(from)?;
        self.expect_frame(to)?;

        let from_chain = self.chain_to_top(from);
        let to_chain = self.chain_to_top(to);
        let lca = from_chain
            .iter()
            .find(|frame| to_chain.contains(*frame))
            .ok_or_else(|| EnvError::NotFound {
                what: format!("common ancestor of '{from}' and '{to}'"),
            })?
            .clone();

        let up = self.compose_to(&from_chain, &lca)?;
        let down = self.compose_to(&to_chain, &lca)?;
        Ok(down.inverse().compose(&up))
    }

    /// Compose child-to-parent transforms along `chain` until `stop`
    /// (exclusive), yielding the motion from the chain's first frame into
    /// `stop`'s frame.
    fn compose_to(
        &self,
        chain: &Chain,
        stop: &ItemId,
    ) -> Result<TransformWithUncertainty, EnvError> {
        let mut acc = TransformWithUncertainty::identity();
        for frame in chain {
            if frame == stop {
                break;
            }
            acc = self.get_transform(frame)?.compose(&acc);
        }
        Ok(acc)
    }
}
