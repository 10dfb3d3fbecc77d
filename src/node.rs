//! Node types: behavior callbacks, scheduling flags and per-instance data.
//!
//! A node type is registered once with [`GraphContext::node_register`] as a
//! [`NodeTypeInfo`]: a unique name plus a [`NodeBehavior`] implementation.
//! The context calls [`NodeBehavior::type_init`] during registration so the
//! type can pick its [`ExecMask`] and declare its attributes.
//!
//! Node payloads are opaque to the scheduler. They are produced by
//! [`NodeBehavior::create`], handed back to callbacks through
//! [`NodeContext`], and returned to [`NodeBehavior::destroy`] exactly once.
//!
//! [`GraphContext::node_register`]: crate::GraphContext::node_register

use std::any::Any;
use std::sync::Arc;

use bitflags::bitflags;

use crate::attributes::{AttributeIndex, AttributeInstance, AttributeSchema, AttributeValue};
use crate::error::Result;
use crate::id::{GraphId, NodeId};
use crate::scene::Scene;

/// Opaque node payload owned by the context between `create` and `destroy`.
pub type Node = Box<dyn Any + Send>;

bitflags! {
    /// Scheduler phases a node type participates in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExecMask: u32 {
        /// `load`/`unload` (and `initialize`/`deinitialize`) are invoked.
        const LOAD_UNLOAD = 1 << 0;
        /// `tick0` runs in the first tick phase.
        const TICK0 = 1 << 1;
        /// `tick1` runs in the second tick phase.
        const TICK1 = 1 << 2;
    }
}

/// One of the two per-frame tick passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickPhase {
    Tick0,
    Tick1,
}

impl TickPhase {
    pub const ALL: [TickPhase; 2] = [TickPhase::Tick0, TickPhase::Tick1];

    pub fn mask(self) -> ExecMask {
        match self {
            Self::Tick0 => ExecMask::TICK0,
            Self::Tick1 => ExecMask::TICK1,
        }
    }
}

/// Scheduling flags chosen by a type in [`NodeBehavior::type_init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeBehavior {
    pub exec_mask: ExecMask,
    /// Reserved for a dependency-ordered scheduler. Stored but not used for
    /// ordering.
    pub is_dag: bool,
}

impl Default for ExecMask {
    fn default() -> Self {
        Self::empty()
    }
}

/// Metadata of one node instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInstanceInfo {
    pub type_index: usize,
    pub id: NodeId,
    pub type_name: Arc<str>,
    pub name: String,
    /// Graph that owns the node, `None` while the node is free.
    pub graph: Option<GraphId>,
}

impl NodeInstanceInfo {
    pub(crate) fn empty() -> Self {
        Self {
            type_index: 0,
            id: NodeId::INVALID,
            type_name: Arc::from(""),
            name: String::new(),
            graph: None,
        }
    }
}

/// Mutable view of one node handed to instance callbacks.
pub struct NodeContext<'a> {
    pub info: &'a NodeInstanceInfo,
    pub attributes: &'a mut AttributeInstance,
    node: &'a mut Node,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(
        info: &'a NodeInstanceInfo,
        node: &'a mut Node,
        attributes: &'a mut AttributeInstance,
    ) -> Self {
        Self {
            info,
            attributes,
            node,
        }
    }

    pub fn id(&self) -> NodeId {
        self.info.id
    }

    /// Payload downcast to the type's concrete node struct.
    pub fn node<T: 'static>(&self) -> Option<&T> {
        self.node.downcast_ref::<T>()
    }

    pub fn node_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.node.downcast_mut::<T>()
    }
}

/// Registration-time access to a type's flags and attribute schema.
pub struct NodeTypeBuilder<'a> {
    index: usize,
    name: &'a str,
    behavior: &'a mut TypeBehavior,
    attributes: &'a mut AttributeSchema,
}

impl<'a> NodeTypeBuilder<'a> {
    pub(crate) fn new(
        index: usize,
        name: &'a str,
        behavior: &'a mut TypeBehavior,
        attributes: &'a mut AttributeSchema,
    ) -> Self {
        Self {
            index,
            name,
            behavior,
            attributes,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn set_exec_mask(&mut self, mask: ExecMask) -> &mut Self {
        self.behavior.exec_mask = mask;
        self
    }

    pub fn set_dag(&mut self, is_dag: bool) -> &mut Self {
        self.behavior.is_dag = is_dag;
        self
    }

    /// Declares an attribute with its default value.
    pub fn add_attribute(
        &mut self,
        name: &str,
        default: impl Into<AttributeValue>,
    ) -> Result<AttributeIndex> {
        self.attributes.add_with_default(name, default)
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeSchema {
        self.attributes
    }
}

/// Callbacks implemented by every node type.
///
/// Only [`create`](Self::create) and [`destroy`](Self::destroy) are
/// required. Instance callbacks receive the node through a [`NodeContext`]
/// and must not call back into the [`GraphContext`](crate::GraphContext):
/// tick callbacks run with the node table locked.
pub trait NodeBehavior: Send + Sync + 'static {
    /// Called once during registration, before the type is visible.
    fn type_init(&mut self, _ty: &mut NodeTypeBuilder<'_>) -> Result<()> {
        Ok(())
    }

    /// Called once when the context shuts down.
    fn type_deinit(&self) {}

    fn create(&self) -> Node;

    fn destroy(&self, node: Node);

    /// Runs after every node of the same load batch has been loaded.
    fn initialize(&self, _node: NodeContext<'_>, _scene: &mut Scene) {}

    /// Runs before any node of the same unload batch is unloaded.
    fn deinitialize(&self, _node: NodeContext<'_>, _scene: &mut Scene) {}

    /// Called on the child's type when it is linked under `parent`.
    fn on_parent_link(
        &self,
        _parent: &NodeInstanceInfo,
        _child: &NodeInstanceInfo,
        _scene: &mut Scene,
    ) {
    }

    /// Called on the parent's type when `child` is linked under it.
    fn on_child_link(
        &self,
        _parent: &NodeInstanceInfo,
        _child: &NodeInstanceInfo,
        _scene: &mut Scene,
    ) {
    }

    fn on_unlink(&self, _child: &NodeInstanceInfo, _scene: &mut Scene) {}

    fn load(&self, _node: NodeContext<'_>, _scene: &mut Scene) {}

    fn unload(&self, _node: NodeContext<'_>, _scene: &mut Scene) {}

    fn tick0(&self, _node: NodeContext<'_>, _scene: &mut Scene) {}

    fn tick1(&self, _node: NodeContext<'_>, _scene: &mut Scene) {}
}

/// A node type ready for registration.
pub struct NodeTypeInfo {
    pub name: String,
    pub behavior: Box<dyn NodeBehavior>,
}

impl NodeTypeInfo {
    pub fn new(name: impl Into<String>, behavior: impl NodeBehavior) -> Self {
        Self {
            name: name.into(),
            behavior: Box::new(behavior),
        }
    }
}

impl std::fmt::Debug for NodeTypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTypeInfo")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A registered type as stored by the context.
pub(crate) struct NodeType {
    pub name: Arc<str>,
    pub behavior: TypeBehavior,
    pub interface: Arc<dyn NodeBehavior>,
    pub attributes: AttributeSchema,
}

impl NodeType {
    pub fn runs(&self, mask: ExecMask) -> bool {
        self.behavior.exec_mask.contains(mask)
    }

    pub fn tick(&self, phase: TickPhase, node: NodeContext<'_>, scene: &mut Scene) {
        match phase {
            TickPhase::Tick0 => self.interface.tick0(node, scene),
            TickPhase::Tick1 => self.interface.tick1(node, scene),
        }
    }
}
