//! Error types for the node-graph runtime.

use thiserror::Error;

use crate::attributes::AttributeType;
use crate::id::{GraphId, NodeId};
use crate::scene::TransformInstance;

/// Errors reported by the graph context, attribute storage and scene loading.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Node type `{0}` is already registered")]
    DuplicateType(String),
    #[error("Unknown node type `{0}`")]
    UnknownType(String),
    #[error("Node capacity exhausted ({capacity} live nodes)")]
    NodeCapacityExhausted { capacity: usize },
    #[error("Graph pool exhausted ({capacity} live graphs)")]
    GraphPoolExhausted { capacity: usize },
    #[error("{0} is not a live node")]
    InvalidNode(NodeId),
    #[error("{0} is not a live graph")]
    InvalidGraph(GraphId),
    #[error("{node} is already owned by {graph}")]
    NodeAlreadyOwned { node: NodeId, graph: GraphId },
    #[error("{0} is being destroyed and accepts no new nodes")]
    GraphClosing(GraphId),
    #[error("{parent} and {child} do not belong to the same graph")]
    NodesInDifferentGraphs { parent: NodeId, child: NodeId },
    #[error("{0} is not attached to any graph")]
    NodeNotAttached(NodeId),
    #[error("Attribute name `{0}` is longer than 8 bytes")]
    AttributeNameTooLong(String),
    #[error("Attribute `{0}` is already declared")]
    DuplicateAttribute(String),
    #[error("Attribute `{0}` not found")]
    AttributeNotFound(String),
    #[error("Attribute `{name}` holds {found}, not {expected}")]
    AttributeTypeMismatch {
        name: String,
        expected: AttributeType,
        found: AttributeType,
    },
    #[error("{0:?} is not a live transform")]
    InvalidTransform(TransformInstance),
    #[error("Linking would make a transform its own ancestor")]
    TransformCycle,
    #[error("Failed to read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Script error: {0}")]
    Script(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::DuplicateType("locator".to_string());
        assert_eq!(err.to_string(), "Node type `locator` is already registered");

        let err = GraphError::AttributeTypeMismatch {
            name: "pos".to_string(),
            expected: AttributeType::Float,
            found: AttributeType::Float3,
        };
        assert_eq!(err.to_string(), "Attribute `pos` holds Float3, not Float");
    }

    #[test]
    fn io_error_keeps_source() {
        use std::error::Error as _;

        let err = GraphError::Io {
            path: "scene.txt".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("Failed to read `scene.txt`"));
    }
}
