//! Id-indexed slot tables holding node payloads, instance info and
//! attribute instances, plus the recycling pool for instance info.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::attributes::AttributeInstance;
use crate::id::{IdAllocator, NodeId};
use crate::node::{Node, NodeInstanceInfo};

/// Everything a destroyed slot held, waiting for the destroy pass.
pub(crate) struct NodeToDestroy {
    pub type_index: usize,
    pub id: NodeId,
    /// `None` when the instance info went with an earlier entry.
    pub info: Option<Box<NodeInstanceInfo>>,
    /// `None` when the payload was checked out at destroy time; it is queued
    /// separately on check-in.
    pub node: Option<Node>,
    pub attributes: Option<AttributeInstance>,
}

/// A payload lent out for a load or unload callback.
pub(crate) struct CheckedOut {
    pub info: NodeInstanceInfo,
    pub node: Node,
    pub attributes: AttributeInstance,
}

pub(crate) struct NodeTable {
    pub ids: IdAllocator,
    nodes: Vec<Option<Node>>,
    infos: Vec<Option<Box<NodeInstanceInfo>>>,
    attributes: Vec<Option<AttributeInstance>>,
    /// Thread running a callback on a checked-out slot.
    lent_to: Vec<Option<ThreadId>>,
}

impl NodeTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: IdAllocator::new(capacity),
            nodes: std::iter::repeat_with(|| None).take(capacity).collect(),
            infos: std::iter::repeat_with(|| None).take(capacity).collect(),
            attributes: std::iter::repeat_with(|| None).take(capacity).collect(),
            lent_to: vec![None; capacity],
        }
    }

    pub fn is_valid(&self, id: NodeId) -> bool {
        self.ids.is_alive(id.raw())
    }

    /// Number of ids with an instance.
    pub fn instance_count(&self) -> usize {
        self.infos.iter().filter(|i| i.is_some()).count()
    }

    pub fn info(&self, id: NodeId) -> Option<&NodeInstanceInfo> {
        if !self.is_valid(id) {
            return None;
        }
        self.infos[id.index()].as_deref()
    }

    pub fn info_mut(&mut self, id: NodeId) -> Option<&mut NodeInstanceInfo> {
        if !self.is_valid(id) {
            return None;
        }
        self.infos[id.index()].as_deref_mut()
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if !self.is_valid(id) {
            return None;
        }
        self.nodes[id.index()].as_mut()
    }

    pub fn attributes_mut(&mut self, id: NodeId) -> Option<&mut AttributeInstance> {
        if !self.is_valid(id) {
            return None;
        }
        self.attributes[id.index()].as_mut()
    }

    /// Whether `id` is live but checked out by a thread other than the
    /// caller. Such a slot comes back with the next check-in.
    pub fn is_lent_elsewhere(&self, id: NodeId) -> bool {
        self.is_valid(id)
            && self.lent_to[id.index()].is_some_and(|owner| owner != thread::current().id())
    }

    /// Info, payload and attributes of a live, not checked-out node.
    pub fn slot_mut(
        &mut self,
        id: NodeId,
    ) -> Option<(&NodeInstanceInfo, &mut Node, &mut AttributeInstance)> {
        if !self.is_valid(id) {
            return None;
        }
        let i = id.index();
        let info = self.infos[i].as_deref()?;
        let node = self.nodes[i].as_mut()?;
        let attributes = self.attributes[i].as_mut()?;
        Some((info, node, attributes))
    }

    /// Stores a freshly created instance. Hands everything back if the id is
    /// stale or its slot is already occupied.
    #[allow(clippy::type_complexity)]
    pub fn insert(
        &mut self,
        id: NodeId,
        node: Node,
        info: Box<NodeInstanceInfo>,
        attributes: AttributeInstance,
    ) -> Result<(), (Node, Box<NodeInstanceInfo>)> {
        if !self.is_valid(id) || self.infos[id.index()].is_some() {
            return Err((node, info));
        }
        let i = id.index();
        self.nodes[i] = Some(node);
        self.infos[i] = Some(info);
        self.attributes[i] = Some(attributes);
        self.lent_to[i] = None;
        Ok(())
    }

    /// Releases the id and empties its slot.
    pub fn take(&mut self, id: NodeId) -> Option<NodeToDestroy> {
        if !self.ids.release(id.raw()) {
            return None;
        }
        let i = id.index();
        self.lent_to[i] = None;
        let info = self.infos[i].take();
        Some(NodeToDestroy {
            type_index: info.as_ref().map_or(0, |info| info.type_index),
            id,
            info,
            node: self.nodes[i].take(),
            attributes: self.attributes[i].take(),
        })
    }

    pub fn checkout(&mut self, id: NodeId) -> Option<CheckedOut> {
        let info = self.info(id)?.clone();
        let i = id.index();
        let node = self.nodes[i].take()?;
        match self.attributes[i].take() {
            Some(attributes) => {
                self.lent_to[i] = Some(thread::current().id());
                Some(CheckedOut {
                    info,
                    node,
                    attributes,
                })
            }
            None => {
                self.nodes[i] = Some(node);
                None
            }
        }
    }

    /// Returns a checked-out payload. If the id died meanwhile the payload is
    /// handed back for destruction.
    pub fn checkin(
        &mut self,
        id: NodeId,
        node: Node,
        attributes: AttributeInstance,
    ) -> Option<(Node, AttributeInstance)> {
        if !self.is_valid(id) || self.nodes[id.index()].is_some() {
            return Some((node, attributes));
        }
        let i = id.index();
        self.nodes[i] = Some(node);
        self.attributes[i] = Some(attributes);
        self.lent_to[i] = None;
        None
    }

    /// Ids of every slot that currently holds an instance.
    pub fn live_ids(&self) -> Vec<NodeId> {
        self.ids
            .live()
            .map(NodeId::from_raw)
            .filter(|id| self.infos[id.index()].is_some())
            .collect()
    }
}

/// Recycles boxed instance info so node churn does not hit the allocator.
pub(crate) struct InfoPool {
    free: Vec<Box<NodeInstanceInfo>>,
    capacity: usize,
}

impl InfoPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Vec::new(),
            capacity,
        }
    }

    pub fn acquire(
        &mut self,
        type_index: usize,
        id: NodeId,
        type_name: Arc<str>,
        name: &str,
    ) -> Box<NodeInstanceInfo> {
        let mut info = self
            .free
            .pop()
            .unwrap_or_else(|| Box::new(NodeInstanceInfo::empty()));
        info.type_index = type_index;
        info.id = id;
        info.type_name = type_name;
        info.name.clear();
        info.name.push_str(name);
        info.graph = None;
        info
    }

    pub fn release(&mut self, mut info: Box<NodeInstanceInfo>) {
        if self.free.len() >= self.capacity {
            return;
        }
        info.id = NodeId::INVALID;
        info.graph = None;
        info.name.clear();
        self.free.push(info);
    }

    #[cfg(test)]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeSchema;

    fn new_instance(table: &mut NodeTable, pool: &mut InfoPool, name: &str) -> NodeId {
        let id = NodeId::from_raw(table.ids.allocate().unwrap());
        let info = pool.acquire(0, id, Arc::from("leaf"), name);
        let attributes = AttributeInstance::create(&AttributeSchema::new());
        assert!(table.insert(id, Box::new(name.to_string()), info, attributes).is_ok());
        id
    }

    #[test]
    fn insert_and_lookup() {
        let mut table = NodeTable::new(4);
        let mut pool = InfoPool::new(4);
        let id = new_instance(&mut table, &mut pool, "a");

        assert_eq!(table.info(id).unwrap().name, "a");
        assert_eq!(table.info(id).unwrap().id, id);
        assert!(table.slot_mut(id).is_some());
        assert_eq!(table.instance_count(), 1);
        assert_eq!(table.live_ids(), vec![id]);
    }

    #[test]
    fn take_invalidates_id() {
        let mut table = NodeTable::new(4);
        let mut pool = InfoPool::new(4);
        let id = new_instance(&mut table, &mut pool, "a");

        let taken = table.take(id).unwrap();
        assert!(taken.node.is_some());
        assert!(taken.info.is_some());
        assert!(!table.is_valid(id));
        assert!(table.info(id).is_none());
        assert!(table.take(id).is_none());
    }

    #[test]
    fn checkout_round_trip() {
        let mut table = NodeTable::new(4);
        let mut pool = InfoPool::new(4);
        let id = new_instance(&mut table, &mut pool, "a");

        let out = table.checkout(id).unwrap();
        assert!(table.slot_mut(id).is_none());
        assert!(table.checkout(id).is_none());
        assert!(!table.is_lent_elsewhere(id));
        assert!(table.checkin(id, out.node, out.attributes).is_none());
        assert!(table.slot_mut(id).is_some());
    }

    #[test]
    fn checked_out_slot_is_lent_to_the_borrowing_thread() {
        let mut table = NodeTable::new(4);
        let mut pool = InfoPool::new(4);
        let id = new_instance(&mut table, &mut pool, "a");

        let out = table.checkout(id).unwrap();
        let mut table = std::thread::spawn(move || {
            assert!(table.is_lent_elsewhere(id));
            table
        })
        .join()
        .unwrap();
        table.checkin(id, out.node, out.attributes);
        assert!(!table.is_lent_elsewhere(id));
    }

    #[test]
    fn checkin_after_take_hands_payload_back() {
        let mut table = NodeTable::new(4);
        let mut pool = InfoPool::new(4);
        let id = new_instance(&mut table, &mut pool, "a");

        let out = table.checkout(id).unwrap();
        let taken = table.take(id).unwrap();
        assert!(taken.node.is_none());

        let (node, _) = table.checkin(id, out.node, out.attributes).unwrap();
        assert_eq!(node.downcast_ref::<String>().map(String::as_str), Some("a"));
    }

    #[test]
    fn insert_rejects_stale_id() {
        let mut table = NodeTable::new(4);
        let mut pool = InfoPool::new(4);
        let id = new_instance(&mut table, &mut pool, "a");
        table.take(id);

        let info = pool.acquire(0, id, Arc::from("leaf"), "b");
        let attributes = AttributeInstance::create(&AttributeSchema::new());
        assert!(table.insert(id, Box::new(()), info, attributes).is_err());
    }

    #[test]
    fn pool_recycles_info() {
        let mut pool = InfoPool::new(1);
        let info = pool.acquire(2, NodeId::INVALID, Arc::from("t"), "first");
        pool.release(info);
        assert_eq!(pool.free_count(), 1);

        let info = pool.acquire(5, NodeId::INVALID, Arc::from("u"), "second");
        assert_eq!(pool.free_count(), 0);
        assert_eq!(info.type_index, 5);
        assert_eq!(info.name, "second");
        assert_eq!(&*info.type_name, "u");

        pool.release(info);
        pool.release(Box::new(NodeInstanceInfo::empty()));
        assert_eq!(pool.free_count(), 1);
    }
}
