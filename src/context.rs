//! The graph context: node type registry, node slot tables, graph pool and
//! the deferred work queues, plus the per-frame driver.
//!
//! # Threading
//!
//! Every entry point takes `&self`. Producers on any thread may create and
//! destroy nodes, add them to or remove them from graphs, and request graph
//! loads and destruction; those calls only touch short critical sections
//! and queue work. A single driver thread calls [`GraphContext::tick`] once
//! per frame to apply the queued work and run the tick phases.
//!
//! Locks are always taken in this order, never in reverse: type registry,
//! node table, a graph's member state, any work queue. Load and unload
//! callbacks run with no lock held while the node is checked out of the
//! table; other threads reading or writing that node block until it is
//! checked back in. Tick callbacks run with the registry and the node table
//! locked and must not call back into the context.

use std::collections::VecDeque;
use std::sync::Arc;

use glam::Vec3;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use crate::attributes::{
    AttributeIndex, AttributeInstance, AttributeSchema, AttributeType, AttributeValue,
};
use crate::config::GraphContextConfig;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::id::{GraphId, IdAllocator, NodeId};
use crate::node::{
    ExecMask, NodeBehavior, NodeContext, NodeInstanceInfo, NodeType, NodeTypeBuilder,
    NodeTypeInfo, TickPhase, TypeBehavior,
};
use crate::scene::Scene;
use crate::script::{GraphSceneScript, SceneLoader};
use crate::table::{InfoPool, NodeTable, NodeToDestroy};

struct GraphToLoad {
    graph: GraphId,
    path: String,
}

struct GraphToUnload {
    graph: GraphId,
    destroy_nodes: bool,
}

struct GraphPool {
    ids: IdAllocator,
    slots: Vec<Option<Arc<Graph>>>,
}

impl GraphPool {
    fn new(capacity: usize) -> Self {
        Self {
            ids: IdAllocator::new(capacity),
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
        }
    }

    fn get(&self, id: GraphId) -> Option<Arc<Graph>> {
        if !self.ids.is_alive(id.raw()) {
            return None;
        }
        self.slots[id.index()].clone()
    }

    fn live(&self) -> Vec<Arc<Graph>> {
        self.slots.iter().flatten().cloned().collect()
    }
}

/// Process-wide store of node types, nodes and graphs.
///
/// Construct one with [`GraphContext::new`] at startup, share it by
/// reference (or `Arc`) with producer threads, and end it with
/// [`GraphContext::shutdown`].
pub struct GraphContext {
    config: GraphContextConfig,
    types: RwLock<Vec<NodeType>>,
    nodes: Mutex<NodeTable>,
    /// Signalled whenever a checked-out node returns to `nodes`.
    checked_in: Condvar,
    info_pool: Mutex<InfoPool>,
    graphs: Mutex<GraphPool>,

    graphs_to_load: Mutex<VecDeque<GraphToLoad>>,
    graphs_to_unload: Mutex<VecDeque<GraphToUnload>>,
    graphs_to_destroy: Mutex<VecDeque<GraphId>>,
    nodes_to_destroy: Mutex<Vec<NodeToDestroy>>,
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new(GraphContextConfig::default())
    }
}

impl GraphContext {
    pub fn new(config: GraphContextConfig) -> Self {
        let config = config.validated();
        log::debug!(
            "Graph context started: {} node slots, {} graphs",
            config.max_nodes,
            config.max_graphs
        );
        Self {
            types: RwLock::new(Vec::new()),
            nodes: Mutex::new(NodeTable::new(config.max_nodes)),
            checked_in: Condvar::new(),
            info_pool: Mutex::new(InfoPool::new(config.max_nodes)),
            graphs: Mutex::new(GraphPool::new(config.max_graphs)),
            graphs_to_load: Mutex::new(VecDeque::new()),
            graphs_to_unload: Mutex::new(VecDeque::new()),
            graphs_to_destroy: Mutex::new(VecDeque::new()),
            nodes_to_destroy: Mutex::new(Vec::new()),
            config,
        }
    }

    pub fn config(&self) -> &GraphContextConfig {
        &self.config
    }

    /// Destroys every graph with its nodes and runs one tick to apply it.
    pub fn cleanup(&self, loader: &dyn SceneLoader, scene: &mut Scene) {
        let graphs = self.graphs.lock().live();
        for graph in graphs {
            self.graph_destroy(graph.id(), true);
        }
        self.tick(loader, scene);
    }

    /// Ends the context. Nodes that are still alive are destroyed through
    /// their type (with a warning), then every type's `type_deinit` runs.
    pub fn shutdown(self) {
        for graph in self.live_graphs() {
            for entry in graph.take_detached() {
                self.queue_destroy(entry);
            }
        }
        self.nodes_destroy();

        let leaked = {
            let mut table = self.nodes.lock();
            table
                .live_ids()
                .into_iter()
                .filter_map(|id| table.take(id))
                .collect::<Vec<_>>()
        };
        if !leaked.is_empty() {
            log::warn!("{} nodes still alive at shutdown", leaked.len());
        }
        for entry in leaked {
            self.destroy_entry(entry);
        }

        for ty in self.types.read().iter() {
            ty.interface.type_deinit();
        }
        log::debug!("Graph context shut down");
    }

    // ---- Node types ----

    /// Registers a node type and runs its `type_init` hook.
    ///
    /// Returns the type index, or an error if the name is taken or the hook
    /// failed.
    pub fn node_register(&self, info: NodeTypeInfo) -> Result<usize> {
        let NodeTypeInfo { name, mut behavior } = info;
        let mut types = self.types.write();
        if types.iter().any(|t| &*t.name == name.as_str()) {
            log::error!("Node type `{name}` is already registered");
            return Err(GraphError::DuplicateType(name));
        }

        let index = types.len();
        let mut flags = TypeBehavior::default();
        let mut attributes = AttributeSchema::new();
        behavior.type_init(&mut NodeTypeBuilder::new(
            index,
            &name,
            &mut flags,
            &mut attributes,
        ))?;

        log::debug!(
            "Registered node type `{name}` as #{index} ({:?}, {} attributes)",
            flags.exec_mask,
            attributes.len()
        );
        types.push(NodeType {
            name: Arc::from(name.as_str()),
            behavior: flags,
            interface: Arc::from(behavior),
            attributes,
        });
        Ok(index)
    }

    pub fn type_find(&self, name: &str) -> Option<usize> {
        self.types.read().iter().position(|t| &*t.name == name)
    }

    pub fn type_count(&self) -> usize {
        self.types.read().len()
    }

    pub fn type_behavior(&self, type_index: usize) -> Option<TypeBehavior> {
        self.types.read().get(type_index).map(|t| t.behavior)
    }

    /// Adds an attribute to a registered type. Nodes created earlier keep
    /// their existing layout.
    pub fn node_attribute_add(
        &self,
        type_index: usize,
        name: &str,
        default: impl Into<AttributeValue>,
    ) -> Result<AttributeIndex> {
        let mut types = self.types.write();
        let ty = types
            .get_mut(type_index)
            .ok_or_else(|| GraphError::UnknownType(format!("#{type_index}")))?;
        ty.attributes.add_with_default(name, default)
    }

    pub fn attribute_find(&self, type_index: usize, name: &str) -> Option<AttributeIndex> {
        self.types.read().get(type_index)?.attributes.find(name)
    }

    pub fn attribute_type(&self, type_index: usize, index: AttributeIndex) -> Option<AttributeType> {
        self.types.read().get(type_index)?.attributes.attribute_type(index)
    }

    fn type_interface(&self, type_index: usize) -> Option<(Arc<dyn NodeBehavior>, TypeBehavior)> {
        self.types
            .read()
            .get(type_index)
            .map(|t| (Arc::clone(&t.interface), t.behavior))
    }

    // ---- Ids ----

    /// Allocates a fresh node id with no instance yet.
    pub fn id_acquire(&self) -> Result<NodeId> {
        let mut table = self.nodes.lock();
        match table.ids.allocate() {
            Some(raw) => Ok(NodeId::from_raw(raw)),
            None => {
                let capacity = table.ids.capacity();
                log::error!("Node capacity exhausted ({capacity})");
                Err(GraphError::NodeCapacityExhausted { capacity })
            }
        }
    }

    /// Releases an id that has no instance. Ids with an instance must go
    /// through [`node_destroy`](Self::node_destroy).
    pub fn id_release(&self, id: NodeId) -> bool {
        let mut table = self.nodes.lock();
        if table.info(id).is_some() {
            log::error!("{id} still has an instance, use node_destroy");
            return false;
        }
        table.ids.release(id.raw())
    }

    // ---- Nodes ----

    /// Creates a free node of the named type.
    pub fn node_create(&self, type_name: &str, name: &str) -> Result<NodeId> {
        let Some(type_index) = self.type_find(type_name) else {
            log::warn!("Cannot create `{name}`: unknown node type `{type_name}`");
            return Err(GraphError::UnknownType(type_name.to_owned()));
        };
        let id = self.id_acquire()?;
        if let Err(err) = self.node_create_in(id, type_index, name) {
            self.id_release(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Creates an instance of `type_index` in the slot of an acquired id.
    pub fn node_create_in(&self, id: NodeId, type_index: usize, name: &str) -> Result<()> {
        let (interface, type_name, attributes) = {
            let types = self.types.read();
            let ty = types
                .get(type_index)
                .ok_or_else(|| GraphError::UnknownType(format!("#{type_index}")))?;
            (
                Arc::clone(&ty.interface),
                Arc::clone(&ty.name),
                AttributeInstance::create(&ty.attributes),
            )
        };

        let node = interface.create();
        let info = self
            .info_pool
            .lock()
            .acquire(type_index, id, type_name, name);
        let rejected = self.nodes.lock().insert(id, node, info, attributes);
        if let Err((node, info)) = rejected {
            interface.destroy(node);
            self.info_pool.lock().release(info);
            log::error!("Cannot create `{name}` in {id}: slot is stale or occupied");
            return Err(GraphError::InvalidNode(id));
        }

        log::trace!("Created {id} `{name}`");
        Ok(())
    }

    /// Invalidates `id` and queues its payload for destruction on the next
    /// tick. A node attached to a graph is unloaded by that graph first.
    pub fn node_destroy(&self, id: NodeId) {
        let Some(entry) = self.nodes.lock().take(id) else {
            log::trace!("node_destroy on dead {id}");
            return;
        };
        let owner = entry.info.as_ref().and_then(|info| info.graph);
        // Handed over under the pool lock, which `graphs_destroy` also holds
        // while draining detached entries.
        let pool = self.graphs.lock();
        match owner.and_then(|graph| pool.get(graph)) {
            Some(graph) => graph.enqueue_detached(entry),
            None => {
                drop(pool);
                self.queue_destroy(entry);
            }
        }
    }

    pub fn node_is_valid(&self, id: NodeId) -> bool {
        self.nodes.lock().info(id).is_some()
    }

    pub fn node_instance_info(&self, id: NodeId) -> Option<NodeInstanceInfo> {
        self.nodes.lock().info(id).cloned()
    }

    /// Runs `f` on the payload of `id` if it is a `T`. The node table stays
    /// locked while `f` runs.
    pub fn with_node<T: 'static, R>(&self, id: NodeId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut table = self.settled_nodes(id);
        let node = table.node_mut(id)?.downcast_mut::<T>()?;
        Some(f(node))
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.lock().instance_count()
    }

    /// Graph ownership of `id`: `None` if dead, `Some(None)` if free.
    pub(crate) fn node_owner(&self, id: NodeId) -> Option<Option<GraphId>> {
        self.nodes.lock().info(id).map(|info| info.graph)
    }

    pub(crate) fn clear_owner(&self, id: NodeId) {
        if let Some(info) = self.nodes.lock().info_mut(id) {
            info.graph = None;
        }
    }

    pub(crate) fn type_runs(&self, id: NodeId, mask: ExecMask) -> bool {
        let Some(type_index) = self.nodes.lock().info(id).map(|i| i.type_index) else {
            return false;
        };
        self.types
            .read()
            .get(type_index)
            .is_some_and(|t| t.runs(mask))
    }

    /// Locks the node table once `id` is not checked out by another thread.
    fn settled_nodes(&self, id: NodeId) -> MutexGuard<'_, NodeTable> {
        let mut table = self.nodes.lock();
        while table.is_lent_elsewhere(id) {
            self.checked_in.wait(&mut table);
        }
        table
    }

    /// Lends the payload of `id` to `f` with no lock held.
    pub(crate) fn with_checked_out(
        &self,
        id: NodeId,
        f: impl FnOnce(NodeContext<'_>, &dyn NodeBehavior),
    ) {
        let Some(type_index) = self.nodes.lock().info(id).map(|i| i.type_index) else {
            return;
        };
        let Some((interface, _)) = self.type_interface(type_index) else {
            return;
        };
        let Some(mut out) = self.nodes.lock().checkout(id) else {
            return;
        };

        f(
            NodeContext::new(&out.info, &mut out.node, &mut out.attributes),
            interface.as_ref(),
        );

        let leftover = self.nodes.lock().checkin(id, out.node, out.attributes);
        self.checked_in.notify_all();
        if let Some((node, attributes)) = leftover {
            log::warn!("{id} was destroyed during a callback");
            self.queue_destroy(NodeToDestroy {
                type_index,
                id,
                info: None,
                node: Some(node),
                attributes: Some(attributes),
            });
        }
    }

    /// Runs `f` on a payload whose id is already dead, if its type takes
    /// load and unload callbacks.
    pub(crate) fn with_detached(
        &self,
        entry: &mut NodeToDestroy,
        f: impl FnOnce(NodeContext<'_>, &dyn NodeBehavior),
    ) {
        let Some((interface, behavior)) = self.type_interface(entry.type_index) else {
            return;
        };
        if !behavior.exec_mask.contains(ExecMask::LOAD_UNLOAD) {
            return;
        }
        if let (Some(info), Some(node), Some(attributes)) = (
            entry.info.as_deref(),
            entry.node.as_mut(),
            entry.attributes.as_mut(),
        ) {
            f(NodeContext::new(info, node, attributes), interface.as_ref());
        }
    }

    pub(crate) fn queue_destroy(&self, entry: NodeToDestroy) {
        self.nodes_to_destroy.lock().push(entry);
    }

    fn destroy_entry(&self, entry: NodeToDestroy) {
        if let Some(node) = entry.node {
            match self.type_interface(entry.type_index) {
                Some((interface, _)) => interface.destroy(node),
                None => log::error!("{} has no registered type #{}", entry.id, entry.type_index),
            }
        }
        drop(entry.attributes);
        if let Some(info) = entry.info {
            self.info_pool.lock().release(info);
        }
    }

    // ---- Graphs ----

    pub fn graph_create(&self) -> Result<GraphId> {
        let mut pool = self.graphs.lock();
        let Some(raw) = pool.ids.allocate() else {
            let capacity = pool.ids.capacity();
            log::error!("Graph pool exhausted ({capacity})");
            return Err(GraphError::GraphPoolExhausted { capacity });
        };
        let id = GraphId::from_raw(raw);
        pool.slots[id.index()] = Some(Arc::new(Graph::new(id)));
        log::debug!("Created {id}");
        Ok(id)
    }

    /// Queues a graph for destruction. Its nodes are unloaded on the next
    /// tick and destroyed too when `destroy_nodes` is set; otherwise they
    /// become free.
    pub fn graph_destroy(&self, graph: GraphId, destroy_nodes: bool) {
        let Some(g) = self.graph_get(graph) else {
            log::warn!("graph_destroy on dead {graph}");
            return;
        };
        let first = {
            let _table = self.nodes.lock();
            g.close()
        };
        if !first {
            log::warn!("{graph} is already being destroyed");
            return;
        }
        self.graphs_to_unload.lock().push_back(GraphToUnload {
            graph,
            destroy_nodes,
        });
    }

    /// Queues a scene description to be read and instantiated into `graph`
    /// on the next tick.
    pub fn graph_load(&self, graph: GraphId, path: impl Into<String>) {
        let path = path.into();
        if self.graph_get(graph).is_none() {
            log::warn!("graph_load of `{path}` into dead {graph}");
            return;
        }
        self.graphs_to_load
            .lock()
            .push_back(GraphToLoad { graph, path });
    }

    /// Attaches a free node to a graph. It is loaded on the next tick.
    pub fn graph_node_add(&self, graph: GraphId, id: NodeId) -> Result<()> {
        let Some(g) = self.graph_get(graph) else {
            log::warn!("graph_node_add of {id} to dead {graph}");
            return Err(GraphError::InvalidGraph(graph));
        };

        let mut table = self.nodes.lock();
        let Some(info) = table.info_mut(id) else {
            log::warn!("graph_node_add of dead {id}");
            return Err(GraphError::InvalidNode(id));
        };
        if let Some(owner) = info.graph {
            log::error!("{id} `{}` is already owned by {owner}", info.name);
            return Err(GraphError::NodeAlreadyOwned { node: id, graph: owner });
        }
        if g.is_closing() {
            log::warn!("{graph} is closing, {id} not added");
            return Err(GraphError::GraphClosing(graph));
        }

        info.graph = Some(graph);
        g.enqueue_load(id);
        Ok(())
    }

    /// Detaches a node from its graph on the next tick, destroying it
    /// afterwards when `destroy_node` is set. Free nodes are left alone.
    pub fn graph_node_remove(&self, id: NodeId, destroy_node: bool) {
        let Some(Some(graph)) = self.node_owner(id) else {
            log::trace!("graph_node_remove of {id}: not attached");
            return;
        };
        match self.graph_get(graph) {
            Some(g) => g.enqueue_unload(id, destroy_node),
            None => {
                log::error!("{id} is owned by dead {graph}");
                self.clear_owner(id);
            }
        }
    }

    /// Links `child` under `parent`. Both must belong to the same graph.
    /// Calls `on_child_link` on the parent's type, then `on_parent_link` on
    /// the child's type.
    pub fn graph_node_link(&self, parent: NodeId, child: NodeId, scene: &mut Scene) -> Result<()> {
        let (parent_info, child_info) = {
            let table = self.nodes.lock();
            let p = table.info(parent).cloned();
            let c = table.info(child).cloned();
            match (p, c) {
                (Some(p), Some(c)) => (p, c),
                (None, _) => return Err(GraphError::InvalidNode(parent)),
                (_, None) => return Err(GraphError::InvalidNode(child)),
            }
        };

        match (parent_info.graph, child_info.graph) {
            (Some(a), Some(b)) if a == b => {}
            (None, _) => {
                log::error!("Cannot link: {parent} is not in a graph");
                return Err(GraphError::NodeNotAttached(parent));
            }
            (_, None) => {
                log::error!("Cannot link: {child} is not in a graph");
                return Err(GraphError::NodeNotAttached(child));
            }
            _ => {
                log::error!("Cannot link {child} under {parent}: different graphs");
                return Err(GraphError::NodesInDifferentGraphs { parent, child });
            }
        }

        if let Some((interface, _)) = self.type_interface(parent_info.type_index) {
            interface.on_child_link(&parent_info, &child_info, scene);
        }
        if let Some((interface, _)) = self.type_interface(child_info.type_index) {
            interface.on_parent_link(&parent_info, &child_info, scene);
        }
        Ok(())
    }

    /// Calls `on_unlink` on the child's type.
    pub fn graph_node_unlink(&self, child: NodeId, scene: &mut Scene) -> Result<()> {
        let info = self
            .node_instance_info(child)
            .ok_or(GraphError::InvalidNode(child))?;
        if info.graph.is_none() {
            log::error!("Cannot unlink: {child} is not in a graph");
            return Err(GraphError::NodeNotAttached(child));
        }
        if let Some((interface, _)) = self.type_interface(info.type_index) {
            interface.on_unlink(&info, scene);
        }
        Ok(())
    }

    pub fn graph_is_valid(&self, graph: GraphId) -> bool {
        self.graph_get(graph).is_some()
    }

    /// Number of live graphs, including those queued for destruction.
    pub fn graph_count(&self) -> usize {
        self.graphs.lock().ids.count()
    }

    /// Loaded members of a graph, in membership order.
    pub fn graph_members(&self, graph: GraphId) -> Vec<NodeId> {
        self.graph_get(graph)
            .map(|g| g.members())
            .unwrap_or_default()
    }

    /// The tick order computed by the last compile.
    pub fn graph_tick_order(&self, graph: GraphId, phase: TickPhase) -> Vec<NodeId> {
        self.graph_get(graph)
            .map(|g| g.tick_order(phase))
            .unwrap_or_default()
    }

    /// Whether the membership changed since the last compile.
    pub fn graph_is_dirty(&self, graph: GraphId) -> bool {
        self.graph_get(graph).is_some_and(|g| g.is_dirty())
    }

    /// Recomputes both tick orders of a graph.
    pub fn graph_compile(&self, graph: GraphId) -> Result<()> {
        let g = self.graph_get(graph).ok_or(GraphError::InvalidGraph(graph))?;
        let types = self.types.read();
        let table = self.nodes.lock();
        g.compile(&table, &types);
        Ok(())
    }

    /// Runs a single graph's pending unloads and loads now, outside of
    /// [`tick`](Self::tick).
    pub fn graph_sync(&self, graph: GraphId, scene: &mut Scene) -> Result<()> {
        let g = self.graph_get(graph).ok_or(GraphError::InvalidGraph(graph))?;
        g.nodes_unload(self, scene);
        g.nodes_load(self, scene);
        Ok(())
    }

    /// Runs one tick phase of a single graph.
    pub fn graph_tick(&self, graph: GraphId, phase: TickPhase, scene: &mut Scene) -> Result<()> {
        let g = self.graph_get(graph).ok_or(GraphError::InvalidGraph(graph))?;
        let types = self.types.read();
        let mut table = self.nodes.lock();
        g.tick(phase, &mut table, &types, scene);
        Ok(())
    }

    fn graph_get(&self, graph: GraphId) -> Option<Arc<Graph>> {
        self.graphs.lock().get(graph)
    }

    fn live_graphs(&self) -> Vec<Arc<Graph>> {
        self.graphs.lock().live()
    }

    // ---- Frame driver ----

    /// Applies queued work and runs both tick phases. Call once per frame
    /// from a single thread.
    ///
    /// Order: unload (graphs being destroyed, then pending removals of every
    /// graph), load (scripted graphs, then pending additions of every
    /// graph), free destroyed graphs, destroy queued nodes, `tick0` over all
    /// graphs, `tick1` over all graphs.
    pub fn tick(&self, loader: &dyn SceneLoader, scene: &mut Scene) {
        self.graphs_unload(scene);
        self.graphs_load(loader, scene);
        self.graphs_destroy();
        self.nodes_destroy();

        let graphs = self.live_graphs();
        let types = self.types.read();
        let mut table = self.nodes.lock();
        for phase in TickPhase::ALL {
            for graph in &graphs {
                graph.tick(phase, &mut table, &types, scene);
            }
        }
    }

    fn graphs_unload(&self, scene: &mut Scene) {
        while let Some(request) = self.pop_graph_unload() {
            let Some(graph) = self.graph_get(request.graph) else {
                continue;
            };
            graph.shutdown(request.destroy_nodes);
            graph.nodes_unload(self, scene);
            self.graphs_to_destroy.lock().push_back(request.graph);
        }

        for graph in self.live_graphs() {
            if !graph.is_closing() {
                graph.nodes_unload(self, scene);
            }
        }
    }

    fn graphs_load(&self, loader: &dyn SceneLoader, scene: &mut Scene) {
        while let Some(request) = self.pop_graph_load() {
            let Some(graph) = self.graph_get(request.graph) else {
                log::warn!("Dropping load of `{}`: {} is gone", request.path, request.graph);
                continue;
            };
            if graph.is_closing() {
                log::warn!("Dropping load of `{}`: {} is closing", request.path, request.graph);
                continue;
            }

            let text = match loader.read_text(&request.path) {
                Ok(text) => text,
                Err(err) => {
                    log::error!("{err}");
                    continue;
                }
            };

            let mut script = GraphSceneScript::new(self, request.graph);
            if let Err(err) = loader.run_script(&text, &mut script) {
                log::error!("`{}`: {err}", request.path);
            }
            let links = script.into_links();

            graph.nodes_load(self, scene);
            for (parent, child) in links {
                if let Err(err) = self.graph_node_link(parent, child, scene) {
                    log::warn!("`{}`: {err}", request.path);
                }
            }
            log::debug!("Loaded `{}` into {}", request.path, request.graph);
        }

        for graph in self.live_graphs() {
            if !graph.is_closing() {
                graph.nodes_load(self, scene);
            }
        }
    }

    fn graphs_destroy(&self) {
        while let Some(id) = self.pop_graph_destroy() {
            let mut pool = self.graphs.lock();
            if let Some(graph) = pool.get(id) {
                let leftover = graph.members().len();
                if leftover > 0 {
                    log::error!("{id} destroyed with {leftover} members still attached");
                }
                pool.slots[id.index()] = None;
                pool.ids.release(id.raw());
                let detached = graph.take_detached();
                drop(pool);
                for entry in detached {
                    self.queue_destroy(entry);
                }
                log::debug!("Destroyed {id}");
            }
        }
    }

    fn nodes_destroy(&self) {
        let entries = std::mem::take(&mut *self.nodes_to_destroy.lock());
        for entry in entries {
            log::trace!("Destroying {}", entry.id);
            self.destroy_entry(entry);
        }
    }

    fn pop_graph_load(&self) -> Option<GraphToLoad> {
        self.graphs_to_load.lock().pop_front()
    }

    fn pop_graph_unload(&self) -> Option<GraphToUnload> {
        self.graphs_to_unload.lock().pop_front()
    }

    fn pop_graph_destroy(&self) -> Option<GraphId> {
        self.graphs_to_destroy.lock().pop_front()
    }

    // ---- Attributes by name ----

    fn with_attributes<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&AttributeSchema, &mut AttributeInstance) -> R,
    ) -> Option<R> {
        // Waits with the registry released.
        let (types, mut table) = loop {
            let types = self.types.read();
            let mut table = self.nodes.lock();
            if !table.is_lent_elsewhere(id) {
                break (types, table);
            }
            drop(types);
            self.checked_in.wait(&mut table);
        };
        let type_index = table.info(id)?.type_index;
        let schema = &types.get(type_index)?.attributes;
        let attributes = table.attributes_mut(id)?;
        Some(f(schema, attributes))
    }

    /// Reads an attribute by name. `None` if the node is dead or has no such
    /// attribute.
    pub fn node_attribute(&self, id: NodeId, name: &str) -> Option<AttributeValue> {
        let value = self
            .with_attributes(id, |schema, attributes| {
                attributes.value(schema.find(name)?)
            })
            .flatten();
        if value.is_none() {
            log::warn!("Attribute `{name}` not found on {id}");
        }
        value
    }

    /// Writes an attribute by name after checking its type.
    pub fn node_attribute_set(
        &self,
        id: NodeId,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<()> {
        let value = value.into();
        let result = self
            .with_attributes(id, |schema, attributes| {
                let index = schema
                    .find(name)
                    .filter(|index| attributes.attribute_type(*index).is_some())
                    .ok_or_else(|| GraphError::AttributeNotFound(name.to_owned()))?;
                match attributes.attribute_type(index) {
                    Some(found) if found != value.attribute_type() => {
                        Err(GraphError::AttributeTypeMismatch {
                            name: name.to_owned(),
                            expected: value.attribute_type(),
                            found,
                        })
                    }
                    _ => attributes.set_value(index, &value),
                }
            })
            .unwrap_or(Err(GraphError::InvalidNode(id)));
        if let Err(err) = &result {
            log::warn!("Setting `{name}` on {id}: {err}");
        }
        result
    }

    pub fn node_attribute_int(&self, id: NodeId, name: &str) -> Option<i32> {
        match self.node_attribute(id, name)? {
            AttributeValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn node_attribute_float(&self, id: NodeId, name: &str) -> Option<f32> {
        match self.node_attribute(id, name)? {
            AttributeValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn node_attribute_vector3(&self, id: NodeId, name: &str) -> Option<Vec3> {
        match self.node_attribute(id, name)? {
            AttributeValue::Float3(v) => Some(v),
            _ => None,
        }
    }

    pub fn node_attribute_string(&self, id: NodeId, name: &str) -> Option<String> {
        match self.node_attribute(id, name)? {
            AttributeValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn node_attribute_int_set(&self, id: NodeId, name: &str, value: i32) -> Result<()> {
        self.node_attribute_set(id, name, value)
    }

    pub fn node_attribute_float_set(&self, id: NodeId, name: &str, value: f32) -> Result<()> {
        self.node_attribute_set(id, name, value)
    }

    pub fn node_attribute_vector3_set(&self, id: NodeId, name: &str, value: Vec3) -> Result<()> {
        self.node_attribute_set(id, name, value)
    }

    pub fn node_attribute_string_set(&self, id: NodeId, name: &str, value: &str) -> Result<()> {
        self.node_attribute_set(id, name, value)
    }

    // ---- Attributes by cached index ----
    //
    // The index must come from the node's type schema and name an attribute
    // of the accessed type. `None`/`false` only report a dead node.

    pub fn node_attribute_int_at(&self, id: NodeId, index: AttributeIndex) -> Option<i32> {
        self.with_attributes(id, |_, a| a.int(index))
    }

    pub fn node_attribute_float_at(&self, id: NodeId, index: AttributeIndex) -> Option<f32> {
        self.with_attributes(id, |_, a| a.float(index))
    }

    pub fn node_attribute_vector3_at(&self, id: NodeId, index: AttributeIndex) -> Option<Vec3> {
        self.with_attributes(id, |_, a| a.float3(index))
    }

    pub fn node_attribute_string_at(&self, id: NodeId, index: AttributeIndex) -> Option<String> {
        self.with_attributes(id, |_, a| a.string(index).to_owned())
    }

    pub fn node_attribute_int_set_at(&self, id: NodeId, index: AttributeIndex, value: i32) -> bool {
        self.with_attributes(id, |_, a| a.set_int(index, value))
            .is_some()
    }

    pub fn node_attribute_float_set_at(&self, id: NodeId, index: AttributeIndex, value: f32) -> bool {
        self.with_attributes(id, |_, a| a.set_float(index, value))
            .is_some()
    }

    pub fn node_attribute_vector3_set_at(
        &self,
        id: NodeId,
        index: AttributeIndex,
        value: Vec3,
    ) -> bool {
        self.with_attributes(id, |_, a| a.set_float3(index, value))
            .is_some()
    }

    pub fn node_attribute_string_set_at(
        &self,
        id: NodeId,
        index: AttributeIndex,
        value: &str,
    ) -> bool {
        self.with_attributes(id, |_, a| a.set_string(index, value))
            .is_some()
    }
}
