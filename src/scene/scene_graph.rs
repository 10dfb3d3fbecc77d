//! Flat transform hierarchy.
//!
//! [`SceneGraph`] stores one transform per node in parallel arrays: world
//! matrix, local pose, owning node id, and intrusive parent / child / sibling
//! links. Slots are recycled through a free list with generation counters,
//! so indices stay stable while other transforms are created or destroyed
//! and stale [`TransformInstance`] handles fail validation.
//!
//! A child's world matrix is its parent's world matrix composed with the
//! child's local pose. Every mutation that changes a local pose re-establishes
//! this relation for the affected subtree before returning. `link` is the one
//! exception: the freshly linked child is placed against the parent's
//! unscaled frame so its world pose survives reparenting, and only its
//! descendants see full parent matrices until the next local update.

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};

use super::transform::{rigid, LocalPose};
use crate::error::{GraphError, Result};
use crate::id::NodeId;

const INVALID: u32 = u32::MAX;

/// Handle to a transform slot in a [`SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformInstance {
    idx: u32,
    generation: u32,
}

impl TransformInstance {
    /// A handle that is never live.
    pub const INVALID: Self = Self {
        idx: INVALID,
        generation: 0,
    };
}

/// Struct-of-arrays transform hierarchy keyed by [`NodeId`].
#[derive(Debug, Default)]
pub struct SceneGraph {
    // -- Poses --
    world: Vec<Mat4>,
    local: Vec<LocalPose>,

    // -- Topology --
    parent: Vec<u32>,
    first_child: Vec<u32>,
    next_sibling: Vec<u32>,
    prev_sibling: Vec<u32>,

    // -- Ownership --
    owner: Vec<NodeId>,
    lookup: HashMap<NodeId, u32>,

    // -- Allocation --
    generation: Vec<u32>,
    alive: Vec<bool>,
    free_list: Vec<u32>,

    // -- Dirty tracking --
    changed: Vec<bool>,
}

impl SceneGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- Allocation API --

    /// Creates a root transform for `id` from a world matrix.
    ///
    /// If `id` already owns a transform, that transform is returned unchanged.
    pub fn create(&mut self, id: NodeId, world: Mat4) -> TransformInstance {
        if let Some(existing) = self.get(id) {
            log::warn!("{id} already owns {existing:?}");
            return existing;
        }

        let local = LocalPose::from_matrix(&world);
        let idx = if let Some(idx) = self.free_list.pop() {
            let i = idx as usize;
            self.world[i] = world;
            self.local[i] = local;
            self.parent[i] = INVALID;
            self.first_child[i] = INVALID;
            self.next_sibling[i] = INVALID;
            self.prev_sibling[i] = INVALID;
            self.owner[i] = id;
            self.alive[i] = true;
            self.changed[i] = true;
            idx
        } else {
            let idx = self.world.len() as u32;
            self.world.push(world);
            self.local.push(local);
            self.parent.push(INVALID);
            self.first_child.push(INVALID);
            self.next_sibling.push(INVALID);
            self.prev_sibling.push(INVALID);
            self.owner.push(id);
            self.generation.push(1);
            self.alive.push(true);
            self.changed.push(true);
            idx
        };

        self.lookup.insert(id, idx);
        self.handle(idx)
    }

    /// Creates a root transform for `id` from components.
    pub fn create_from_pose(&mut self, id: NodeId, pose: LocalPose) -> TransformInstance {
        self.create(id, pose.matrix())
    }

    /// Destroys a transform. It is detached from its parent, and its children
    /// become roots that keep their world pose.
    ///
    /// Returns false for a stale handle.
    pub fn destroy(&mut self, instance: TransformInstance) -> bool {
        if !self.is_valid(instance) {
            return false;
        }
        let i = instance.idx;

        self.unlink_slot(i);
        let mut child = self.first_child[i as usize];
        while child != INVALID {
            let next = self.next_sibling[child as usize];
            self.unlink_slot(child);
            child = next;
        }

        let s = i as usize;
        self.lookup.remove(&self.owner[s]);
        self.owner[s] = NodeId::INVALID;
        self.alive[s] = false;
        self.changed[s] = false;
        self.generation[s] = self.generation[s].wrapping_add(1).max(1);
        self.free_list.push(i);
        true
    }

    /// Destroys the transform owned by `id`, if any.
    pub fn remove(&mut self, id: NodeId) -> bool {
        match self.get(id) {
            Some(instance) => self.destroy(instance),
            None => false,
        }
    }

    pub fn get(&self, id: NodeId) -> Option<TransformInstance> {
        self.lookup.get(&id).map(|&idx| self.handle(idx))
    }

    #[inline]
    pub fn is_valid(&self, instance: TransformInstance) -> bool {
        let i = instance.idx as usize;
        i < self.alive.len() && self.alive[i] && self.generation[i] == instance.generation
    }

    /// Number of live transforms.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    // -- Topology API --

    /// Makes `child` the last child of `parent`, keeping its world pose.
    ///
    /// The child's local pose is recomputed against the parent's unscaled
    /// world frame; the child keeps its own world scale.
    pub fn link(&mut self, child: TransformInstance, parent: TransformInstance) -> Result<()> {
        self.validate(child)?;
        self.validate(parent)?;
        if child == parent || self.is_ancestor(child.idx, parent.idx) {
            return Err(GraphError::TransformCycle);
        }

        let c = child.idx;
        let p = parent.idx;
        self.unlink_slot(c);

        let parent_frame = rigid(&self.world[p as usize]);
        let child_world = LocalPose::from_matrix(&self.world[c as usize]);
        let relative = LocalPose::from_matrix(&(parent_frame.inverse() * child_world.rigid_matrix()));
        self.local[c as usize] = LocalPose {
            position: relative.position,
            rotation: relative.rotation,
            scale: child_world.scale,
        };

        self.parent[c as usize] = p;
        if self.first_child[p as usize] == INVALID {
            self.first_child[p as usize] = c;
        } else {
            let mut last = self.first_child[p as usize];
            while self.next_sibling[last as usize] != INVALID {
                last = self.next_sibling[last as usize];
            }
            self.next_sibling[last as usize] = c;
            self.prev_sibling[c as usize] = last;
        }

        self.propagate(c, parent_frame, false);
        Ok(())
    }

    /// Detaches `child` from its parent. The world pose is unchanged and the
    /// local pose becomes the world pose.
    pub fn unlink(&mut self, child: TransformInstance) -> Result<()> {
        self.validate(child)?;
        self.unlink_slot(child.idx);
        Ok(())
    }

    pub fn parent(&self, instance: TransformInstance) -> Option<TransformInstance> {
        if !self.is_valid(instance) {
            return None;
        }
        match self.parent[instance.idx as usize] {
            INVALID => None,
            p => Some(self.handle(p)),
        }
    }

    /// Children of `instance` in link order.
    pub fn children(&self, instance: TransformInstance) -> Vec<TransformInstance> {
        let mut out = Vec::new();
        if !self.is_valid(instance) {
            return out;
        }
        let mut child = self.first_child[instance.idx as usize];
        while child != INVALID {
            out.push(self.handle(child));
            child = self.next_sibling[child as usize];
        }
        out
    }

    pub fn owning_id(&self, instance: TransformInstance) -> Option<NodeId> {
        self.is_valid(instance)
            .then(|| self.owner[instance.idx as usize])
    }

    // -- Pose API --

    pub fn set_local_position(&mut self, instance: TransformInstance, position: Vec3) -> Result<()> {
        self.validate(instance)?;
        self.local[instance.idx as usize].position = position;
        self.propagate_local(instance.idx);
        Ok(())
    }

    pub fn set_local_rotation(&mut self, instance: TransformInstance, rotation: Quat) -> Result<()> {
        self.validate(instance)?;
        self.local[instance.idx as usize].rotation = rotation;
        self.propagate_local(instance.idx);
        Ok(())
    }

    pub fn set_local_scale(&mut self, instance: TransformInstance, scale: Vec3) -> Result<()> {
        self.validate(instance)?;
        self.local[instance.idx as usize].scale = scale;
        self.propagate_local(instance.idx);
        Ok(())
    }

    pub fn set_local_pose(&mut self, instance: TransformInstance, pose: LocalPose) -> Result<()> {
        self.validate(instance)?;
        self.local[instance.idx as usize] = pose;
        self.propagate_local(instance.idx);
        Ok(())
    }

    /// Overwrites the world matrix of one transform. Neither the local pose
    /// nor any descendant is touched.
    pub fn set_world_pose(&mut self, instance: TransformInstance, world: Mat4) -> Result<()> {
        self.validate(instance)?;
        self.world[instance.idx as usize] = world;
        self.changed[instance.idx as usize] = true;
        Ok(())
    }

    pub fn local_pose(&self, instance: TransformInstance) -> Option<LocalPose> {
        self.is_valid(instance)
            .then(|| self.local[instance.idx as usize])
    }

    pub fn local_position(&self, instance: TransformInstance) -> Option<Vec3> {
        self.local_pose(instance).map(|p| p.position)
    }

    pub fn local_rotation(&self, instance: TransformInstance) -> Option<Quat> {
        self.local_pose(instance).map(|p| p.rotation)
    }

    pub fn local_scale(&self, instance: TransformInstance) -> Option<Vec3> {
        self.local_pose(instance).map(|p| p.scale)
    }

    pub fn world_pose(&self, instance: TransformInstance) -> Option<Mat4> {
        self.is_valid(instance)
            .then(|| self.world[instance.idx as usize])
    }

    pub fn world_position(&self, instance: TransformInstance) -> Option<Vec3> {
        self.world_pose(instance).map(|m| m.w_axis.truncate())
    }

    pub fn world_rotation(&self, instance: TransformInstance) -> Option<Quat> {
        self.world_pose(instance)
            .map(|m| LocalPose::from_matrix(&m).rotation)
    }

    // -- Dirty tracking --

    /// Appends every transform changed since the last [`clear_changed`]
    /// to the output vectors and returns how many were appended.
    ///
    /// [`clear_changed`]: Self::clear_changed
    pub fn collect_changed(&self, ids: &mut Vec<NodeId>, world_poses: &mut Vec<Mat4>) -> usize {
        let before = ids.len();
        for (i, changed) in self.changed.iter().enumerate() {
            if *changed && self.alive[i] {
                ids.push(self.owner[i]);
                world_poses.push(self.world[i]);
            }
        }
        ids.len() - before
    }

    pub fn clear_changed(&mut self) {
        self.changed.fill(false);
    }

    // -- Internals --

    fn handle(&self, idx: u32) -> TransformInstance {
        TransformInstance {
            idx,
            generation: self.generation[idx as usize],
        }
    }

    fn validate(&self, instance: TransformInstance) -> Result<()> {
        if self.is_valid(instance) {
            Ok(())
        } else {
            Err(GraphError::InvalidTransform(instance))
        }
    }

    /// Whether `ancestor` lies on the parent chain of `node`.
    fn is_ancestor(&self, ancestor: u32, node: u32) -> bool {
        let mut current = self.parent[node as usize];
        while current != INVALID {
            if current == ancestor {
                return true;
            }
            current = self.parent[current as usize];
        }
        false
    }

    /// Removes a slot from its parent's child list and rebases its local pose
    /// on its world pose.
    fn unlink_slot(&mut self, c: u32) {
        let ci = c as usize;
        let p = self.parent[ci];
        if p == INVALID {
            return;
        }

        let prev = self.prev_sibling[ci];
        let next = self.next_sibling[ci];
        if prev != INVALID {
            self.next_sibling[prev as usize] = next;
        } else {
            self.first_child[p as usize] = next;
        }
        if next != INVALID {
            self.prev_sibling[next as usize] = prev;
        }

        self.parent[ci] = INVALID;
        self.prev_sibling[ci] = INVALID;
        self.next_sibling[ci] = INVALID;
        self.local[ci] = LocalPose::from_matrix(&self.world[ci]);
    }

    /// Recomputes `root` against its parent's full world matrix.
    fn propagate_local(&mut self, root: u32) {
        let frame = match self.parent[root as usize] {
            INVALID => Mat4::IDENTITY,
            p => self.world[p as usize],
        };
        self.propagate(root, frame, true);
    }

    /// Places `root` in `frame`, then recomputes its descendants from their
    /// parents' world matrices, depth first.
    fn propagate(&mut self, root: u32, frame: Mat4, mark_changed: bool) {
        let mut stack = vec![root];
        while let Some(i) = stack.pop() {
            let s = i as usize;
            let frame = if i == root {
                frame
            } else {
                self.world[self.parent[s] as usize]
            };
            self.world[s] = frame * self.local[s].matrix();
            if mark_changed {
                self.changed[s] = true;
            }

            let mut child = self.first_child[s];
            while child != INVALID {
                stack.push(child);
                child = self.next_sibling[child as usize];
            }
        }
    }
}
