//! A graph: the set of nodes belonging to one scene, their per-phase tick
//! order and the queues of nodes waiting to be loaded or unloaded.
//!
//! Producers only ever touch the two pending queues. Membership changes
//! and compilation happen on the driver thread during
//! [`GraphContext::tick`](crate::GraphContext::tick).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::context::GraphContext;
use crate::id::{GraphId, NodeId};
use crate::node::{ExecMask, NodeContext, NodeType, TickPhase};
use crate::scene::Scene;
use crate::table::{NodeTable, NodeToDestroy};

/// Depth component of every sort key. No dependency depth is computed, so
/// ordering falls through to type, slot and member position.
const SORT_DEPTH: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeToUnload {
    pub id: NodeId,
    pub destroy: bool,
}

#[derive(Debug, Default)]
struct Members {
    ids: Vec<NodeId>,
    tick_order: [Vec<NodeId>; 2],
    /// Set on every membership change, cleared by `compile`.
    dirty: bool,
}

pub(crate) struct Graph {
    id: GraphId,
    members: Mutex<Members>,
    pending_load: Mutex<VecDeque<NodeId>>,
    pending_unload: Mutex<VecDeque<NodeToUnload>>,
    /// Members destroyed while attached. Their ids are already dead; the
    /// payload still gets its unload callbacks before destruction.
    detached: Mutex<Vec<NodeToDestroy>>,
    closing: AtomicBool,
}

/// Packs the tick ordering fields into one ascending key.
fn sort_key(type_index: usize, slot: usize, position: usize) -> u64 {
    (SORT_DEPTH << 48)
        | ((type_index as u64 & 0xFFFF) << 32)
        | ((slot as u64 & 0xFFFF) << 16)
        | (position as u64 & 0xFFFF)
}

impl Graph {
    pub fn new(id: GraphId) -> Self {
        Self {
            id,
            members: Mutex::new(Members::default()),
            pending_load: Mutex::new(VecDeque::new()),
            pending_unload: Mutex::new(VecDeque::new()),
            detached: Mutex::new(Vec::new()),
            closing: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    // ---- Producer side ----

    pub fn enqueue_load(&self, id: NodeId) {
        self.pending_load.lock().push_back(id);
    }

    pub fn enqueue_unload(&self, id: NodeId, destroy: bool) {
        self.pending_unload
            .lock()
            .push_back(NodeToUnload { id, destroy });
    }

    pub fn enqueue_detached(&self, entry: NodeToDestroy) {
        self.detached.lock().push(entry);
    }

    pub fn take_detached(&self) -> Vec<NodeToDestroy> {
        std::mem::take(&mut *self.detached.lock())
    }

    /// Marks the graph as being destroyed. Returns false if it already was.
    pub fn close(&self) -> bool {
        !self.closing.swap(true, Ordering::AcqRel)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn members(&self) -> Vec<NodeId> {
        self.members.lock().ids.clone()
    }

    pub fn tick_order(&self, phase: TickPhase) -> Vec<NodeId> {
        self.members.lock().tick_order[phase as usize].clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.members.lock().dirty
    }

    #[cfg(test)]
    pub fn pending_load_count(&self) -> usize {
        self.pending_load.lock().len()
    }

    fn pop_load(&self) -> Option<NodeId> {
        self.pending_load.lock().pop_front()
    }

    fn pop_unload(&self) -> Option<NodeToUnload> {
        self.pending_unload.lock().pop_front()
    }

    fn is_member(&self, id: NodeId) -> bool {
        self.members.lock().ids.contains(&id)
    }

    // ---- Driver side ----

    /// Queues every member and every node still waiting to load for unload.
    pub fn shutdown(&self, destroy_nodes: bool) {
        let pending: Vec<NodeId> = self.pending_load.lock().drain(..).collect();
        let members = self.members();
        let mut unload = self.pending_unload.lock();
        for id in members.into_iter().chain(pending) {
            unload.push_back(NodeToUnload {
                id,
                destroy: destroy_nodes,
            });
        }
    }

    /// Loads every pending node, then initializes the loaded batch.
    pub fn nodes_load(&self, ctx: &GraphContext, scene: &mut Scene) {
        let mut loaded = Vec::new();
        while let Some(id) = self.pop_load() {
            if ctx.node_owner(id) != Some(Some(self.id)) {
                log::trace!("{id} left {} before loading", self.id);
                continue;
            }
            if ctx.type_runs(id, ExecMask::LOAD_UNLOAD) {
                ctx.with_checked_out(id, |node, iface| iface.load(node, scene));
            }
            self.members.lock().ids.push(id);
            loaded.push(id);
        }

        if loaded.is_empty() {
            return;
        }
        for &id in &loaded {
            if ctx.type_runs(id, ExecMask::LOAD_UNLOAD) {
                ctx.with_checked_out(id, |node, iface| iface.initialize(node, scene));
            }
        }
        log::trace!("{} loaded {} nodes", self.id, loaded.len());
        self.members.lock().dirty = true;
    }

    /// Deinitializes and unloads every pending node, releasing ownership and
    /// forwarding destroy requests.
    pub fn nodes_unload(&self, ctx: &GraphContext, scene: &mut Scene) {
        let mut batch = Vec::new();
        while let Some(entry) = self.pop_unload() {
            if ctx.node_owner(entry.id) != Some(Some(self.id)) {
                log::trace!("{} is not owned by {}, skipping unload", entry.id, self.id);
                continue;
            }
            match batch.iter_mut().find(|e: &&mut NodeToUnload| e.id == entry.id) {
                Some(existing) => existing.destroy |= entry.destroy,
                None => batch.push(entry),
            }
        }
        let mut detached = self.take_detached();
        if batch.is_empty() && detached.is_empty() {
            return;
        }

        for entry in &batch {
            if self.is_member(entry.id) && ctx.type_runs(entry.id, ExecMask::LOAD_UNLOAD) {
                ctx.with_checked_out(entry.id, |node, iface| iface.deinitialize(node, scene));
            }
        }
        for entry in &mut detached {
            if self.is_member(entry.id) {
                ctx.with_detached(entry, |node, iface| iface.deinitialize(node, scene));
            }
        }

        for entry in &batch {
            if self.is_member(entry.id) {
                if ctx.type_runs(entry.id, ExecMask::LOAD_UNLOAD) {
                    ctx.with_checked_out(entry.id, |node, iface| iface.unload(node, scene));
                }
                self.remove_member(entry.id);
            } else {
                // Removed before it was ever loaded.
                self.pending_load.lock().retain(|pending| *pending != entry.id);
            }

            ctx.clear_owner(entry.id);
            if entry.destroy {
                ctx.node_destroy(entry.id);
            }
        }
        for mut entry in detached {
            if self.is_member(entry.id) {
                ctx.with_detached(&mut entry, |node, iface| iface.unload(node, scene));
                self.remove_member(entry.id);
            } else {
                self.pending_load.lock().retain(|pending| *pending != entry.id);
            }
            ctx.queue_destroy(entry);
        }

        log::trace!("{} processed unload batch", self.id);
        self.members.lock().dirty = true;
    }

    fn remove_member(&self, id: NodeId) {
        let mut members = self.members.lock();
        if let Some(pos) = members.ids.iter().position(|m| *m == id) {
            members.ids.swap_remove(pos);
        }
    }

    /// Rebuilds both tick orders from the current members.
    pub fn compile(&self, table: &NodeTable, types: &[NodeType]) {
        let mut members = self.members.lock();
        Self::compile_members(&mut members, table, types);
    }

    fn compile_members(members: &mut Members, table: &NodeTable, types: &[NodeType]) {
        for phase in TickPhase::ALL {
            let mut keyed: Vec<(u64, NodeId)> = members
                .ids
                .iter()
                .enumerate()
                .filter_map(|(position, &id)| {
                    let info = table.info(id)?;
                    let ty = types.get(info.type_index)?;
                    ty.runs(phase.mask())
                        .then(|| (sort_key(info.type_index, id.index(), position), id))
                })
                .collect();
            keyed.sort_by_key(|(key, _)| *key);
            members.tick_order[phase as usize] = keyed.into_iter().map(|(_, id)| id).collect();
        }
        members.dirty = false;
    }

    /// Runs one tick phase over the compiled order, compiling first if the
    /// membership changed. The caller holds the node table lock.
    pub fn tick(&self, phase: TickPhase, table: &mut NodeTable, types: &[NodeType], scene: &mut Scene) {
        let mut members = self.members.lock();
        if members.dirty {
            Self::compile_members(&mut members, table, types);
        }

        for &id in &members.tick_order[phase as usize] {
            let Some((info, node, attributes)) = table.slot_mut(id) else {
                continue;
            };
            let Some(ty) = types.get(info.type_index) else {
                continue;
            };
            ty.tick(phase, NodeContext::new(info, node, attributes), scene);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_orders_by_type_then_slot_then_position() {
        assert!(sort_key(0, 9, 9) < sort_key(1, 0, 0));
        assert!(sort_key(1, 2, 9) < sort_key(1, 3, 0));
        assert!(sort_key(1, 3, 0) < sort_key(1, 3, 1));
        assert_eq!(sort_key(0, 0, 0) >> 48, SORT_DEPTH);
    }

    #[test]
    fn close_is_one_shot() {
        let graph = Graph::new(GraphId::INVALID);
        assert!(!graph.is_closing());
        assert!(graph.close());
        assert!(!graph.close());
        assert!(graph.is_closing());
    }

    #[test]
    fn shutdown_queues_pending_loads() {
        let graph = Graph::new(GraphId::INVALID);
        graph.enqueue_load(NodeId::INVALID);
        graph.shutdown(true);
        assert_eq!(graph.pending_load_count(), 0);
        assert_eq!(
            graph.pop_unload(),
            Some(NodeToUnload {
                id: NodeId::INVALID,
                destroy: true
            })
        );
    }
}
