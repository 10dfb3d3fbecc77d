//! Node Graph - a frame-driven node scheduler with a flat transform hierarchy
//!
//! Node types are registered once on a [`GraphContext`] with a
//! [`NodeBehavior`] implementation and a schema of typed attributes. Nodes
//! are created from any thread, gathered into graphs, and driven once per
//! frame by [`GraphContext::tick`]:
//! - queued unloads and loads are applied, in that order
//! - destroyed graphs and nodes are released
//! - every graph runs its `tick0` pass, then every graph runs `tick1`
//!
//! Ids are generational: a destroyed node's id never matches the node that
//! later reuses its slot.
//!
//! The [`Scene`] handed to callbacks owns the [`SceneGraph`] transform
//! hierarchy and type-keyed resources for external collaborators.

pub mod attributes;
pub mod config;
pub mod context;
pub mod error;
mod graph;
pub mod id;
pub mod node;
pub mod nodes;
pub mod scene;
pub mod script;
mod table;

pub use attributes::{
    AttributeIndex, AttributeInstance, AttributeName, AttributeSchema, AttributeType,
    AttributeValue,
};
pub use config::GraphContextConfig;
pub use context::GraphContext;
pub use error::{GraphError, Result};
pub use id::{GraphId, NodeId};
pub use node::{
    ExecMask, Node, NodeBehavior, NodeContext, NodeInstanceInfo, NodeTypeBuilder, NodeTypeInfo,
    TickPhase, TypeBehavior,
};
pub use nodes::{register_builtin_nodes, Locator, LocatorNode};
pub use scene::{LocalPose, Scene, SceneGraph, TransformInstance};
pub use script::{
    FileSceneLoader, GraphSceneScript, NullSceneLoader, SceneLoader, ScriptCallback,
    ScriptInterpreter, ScriptValue,
};

// Re-export glam so callers use the same math types
pub use glam;
