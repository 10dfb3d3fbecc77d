//! Scene description loading.
//!
//! A scene description is text read through a [`SceneLoader`] and fed to an
//! external interpreter, which reports what it parses through the
//! [`ScriptCallback`] methods. [`GraphSceneScript`] is the callback used by
//! [`GraphContext::graph_load`]: it creates nodes in the target graph, sets
//! their attributes and records `link` commands.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use glam::Vec3;

use crate::attributes::{AttributeType, AttributeValue};
use crate::context::GraphContext;
use crate::error::{GraphError, Result};
use crate::id::{GraphId, NodeId};

/// A typed value parsed from a scene description.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Int(Vec<i32>),
    Float(Vec<f32>),
    String(String),
}

impl ScriptValue {
    fn floats(&self) -> Option<Vec<f32>> {
        match self {
            Self::Float(v) => Some(v.clone()),
            Self::Int(v) => Some(v.iter().map(|&i| i as f32).collect()),
            Self::String(_) => None,
        }
    }

    /// Converts to an attribute value of type `ty`. Ints widen to floats,
    /// never the reverse. Extra components are ignored.
    pub fn to_attribute(&self, ty: AttributeType) -> Option<AttributeValue> {
        match ty {
            AttributeType::Int => match self {
                Self::Int(v) => v.first().copied().map(AttributeValue::Int),
                _ => None,
            },
            AttributeType::Float => self
                .floats()
                .and_then(|v| v.first().copied())
                .map(AttributeValue::Float),
            AttributeType::Float3 => {
                let v = self.floats()?;
                (v.len() >= ty.components())
                    .then(|| AttributeValue::Float3(Vec3::new(v[0], v[1], v[2])))
            }
            AttributeType::String => match self {
                Self::String(s) => Some(AttributeValue::String(s.clone())),
                _ => None,
            },
        }
    }
}

/// Receives what an interpreter parses, in document order.
pub trait ScriptCallback {
    /// A new object of `type_name` called `object_name`. Following
    /// attributes apply to it.
    fn on_create(&mut self, type_name: &str, object_name: &str);

    fn on_attribute(&mut self, name: &str, value: &ScriptValue);

    fn on_command(&mut self, name: &str, args: &[&str]);
}

/// Parses scene description text and drives a callback.
pub trait ScriptInterpreter: Send + Sync {
    fn run(&self, text: &str, callback: &mut dyn ScriptCallback) -> Result<()>;
}

/// Source of scene descriptions used by [`GraphContext::tick`].
pub trait SceneLoader {
    fn read_text(&self, path: &str) -> Result<String>;

    fn run_script(&self, text: &str, callback: &mut dyn ScriptCallback) -> Result<()>;
}

/// Reads scene files relative to a root directory.
pub struct FileSceneLoader<I> {
    root: PathBuf,
    interpreter: I,
}

impl<I: ScriptInterpreter> FileSceneLoader<I> {
    pub fn new(root: impl Into<PathBuf>, interpreter: I) -> Self {
        Self {
            root: root.into(),
            interpreter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl<I: ScriptInterpreter> SceneLoader for FileSceneLoader<I> {
    fn read_text(&self, path: &str) -> Result<String> {
        let full = self.root.join(path);
        std::fs::read_to_string(&full).map_err(|source| GraphError::Io {
            path: full.display().to_string(),
            source,
        })
    }

    fn run_script(&self, text: &str, callback: &mut dyn ScriptCallback) -> Result<()> {
        self.interpreter.run(text, callback)
    }
}

/// Loader for contexts that never load scene files.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSceneLoader;

impl SceneLoader for NullSceneLoader {
    fn read_text(&self, path: &str) -> Result<String> {
        Err(GraphError::Io {
            path: path.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no scene loader"),
        })
    }

    fn run_script(&self, _text: &str, _callback: &mut dyn ScriptCallback) -> Result<()> {
        Err(GraphError::Script("no interpreter".into()))
    }
}

/// Builds the nodes of one graph from a scene description.
pub struct GraphSceneScript<'a> {
    ctx: &'a GraphContext,
    graph: GraphId,
    current: Option<NodeId>,
    by_name: HashMap<String, NodeId>,
    links: Vec<(NodeId, NodeId)>,
}

impl<'a> GraphSceneScript<'a> {
    pub fn new(ctx: &'a GraphContext, graph: GraphId) -> Self {
        Self {
            ctx,
            graph,
            current: None,
            by_name: HashMap::new(),
            links: Vec::new(),
        }
    }

    /// Node created under `object_name`, if creation succeeded.
    pub fn node(&self, object_name: &str) -> Option<NodeId> {
        self.by_name.get(object_name).copied()
    }

    /// `(parent, child)` pairs requested by `link` commands.
    pub fn links(&self) -> &[(NodeId, NodeId)] {
        &self.links
    }

    pub fn into_links(self) -> Vec<(NodeId, NodeId)> {
        self.links
    }

    fn create(&self, type_name: &str, object_name: &str) -> Result<NodeId> {
        let id = self.ctx.node_create(type_name, object_name)?;
        if let Err(err) = self.ctx.graph_node_add(self.graph, id) {
            self.ctx.node_destroy(id);
            return Err(err);
        }
        Ok(id)
    }
}

impl ScriptCallback for GraphSceneScript<'_> {
    fn on_create(&mut self, type_name: &str, object_name: &str) {
        match self.create(type_name, object_name) {
            Ok(id) => {
                self.current = Some(id);
                if self.by_name.insert(object_name.to_owned(), id).is_some() {
                    log::warn!("Object name `{object_name}` used twice, links use the last one");
                }
            }
            Err(err) => {
                log::warn!("Skipping `{object_name}`: {err}");
                self.current = None;
            }
        }
    }

    fn on_attribute(&mut self, name: &str, value: &ScriptValue) {
        let Some(id) = self.current else {
            return;
        };
        let Some(type_index) = self.ctx.node_instance_info(id).map(|i| i.type_index) else {
            return;
        };
        let Some(ty) = self
            .ctx
            .attribute_find(type_index, name)
            .and_then(|index| self.ctx.attribute_type(type_index, index))
        else {
            log::warn!("{id} has no attribute `{name}`");
            return;
        };
        let Some(converted) = value.to_attribute(ty) else {
            log::warn!("Attribute `{name}` of {id} expects {ty}, got {value:?}");
            return;
        };
        // Errors are already logged by the setter.
        let _ = self.ctx.node_attribute_set(id, name, converted);
    }

    fn on_command(&mut self, name: &str, args: &[&str]) {
        match (name, args) {
            ("link", [parent, child]) => {
                match (self.by_name.get(*parent), self.by_name.get(*child)) {
                    (Some(&p), Some(&c)) => self.links.push((p, c)),
                    _ => log::warn!("link {parent} {child}: unknown object"),
                }
            }
            ("link", _) => log::warn!("link expects two object names, got {args:?}"),
            _ => log::warn!("Unknown scene command `{name}`"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::register_builtin_nodes;

    #[test]
    fn int_widens_to_float_but_not_back() {
        assert_eq!(
            ScriptValue::Int(vec![2]).to_attribute(AttributeType::Float),
            Some(AttributeValue::Float(2.0))
        );
        assert_eq!(
            ScriptValue::Float(vec![2.5]).to_attribute(AttributeType::Int),
            None
        );
        assert_eq!(
            ScriptValue::Int(vec![1, 2, 3]).to_attribute(AttributeType::Float3),
            Some(AttributeValue::Float3(Vec3::new(1.0, 2.0, 3.0)))
        );
        assert_eq!(
            ScriptValue::Float(vec![1.0, 2.0]).to_attribute(AttributeType::Float3),
            None
        );
        assert_eq!(
            ScriptValue::String("a".into()).to_attribute(AttributeType::Float),
            None
        );
    }

    #[test]
    fn creates_nodes_and_sets_attributes() {
        let ctx = GraphContext::default();
        register_builtin_nodes(&ctx).unwrap();
        let graph = ctx.graph_create().unwrap();

        let mut script = GraphSceneScript::new(&ctx, graph);
        script.on_create("locator", "root");
        script.on_attribute("pos", &ScriptValue::Int(vec![1, 2, 3]));
        script.on_create("locator", "arm");
        script.on_attribute("scale", &ScriptValue::Float(vec![2.0, 2.0, 2.0]));
        script.on_command("link", &["root", "arm"]);

        let root = script.node("root").unwrap();
        let arm = script.node("arm").unwrap();
        assert_eq!(script.links(), &[(root, arm)]);
        assert_eq!(
            ctx.node_attribute_vector3(root, "pos"),
            Some(Vec3::new(1.0, 2.0, 3.0))
        );
        assert_eq!(ctx.node_attribute_vector3(arm, "scale"), Some(Vec3::splat(2.0)));
        assert_eq!(ctx.node_instance_info(arm).unwrap().graph, Some(graph));
    }

    #[test]
    fn unknown_type_skips_following_attributes() {
        let ctx = GraphContext::default();
        register_builtin_nodes(&ctx).unwrap();
        let graph = ctx.graph_create().unwrap();

        let mut script = GraphSceneScript::new(&ctx, graph);
        script.on_create("locator", "a");
        script.on_create("camera", "b");
        script.on_attribute("pos", &ScriptValue::Float(vec![9.0, 9.0, 9.0]));
        script.on_command("link", &["a", "b"]);
        script.on_command("spawn", &[]);

        let a = script.node("a").unwrap();
        assert!(script.node("b").is_none());
        assert!(script.links().is_empty());
        assert_eq!(ctx.node_attribute_vector3(a, "pos"), Some(Vec3::ZERO));
        assert_eq!(ctx.node_count(), 1);
    }

    #[test]
    fn null_loader_refuses_reads() {
        assert!(matches!(
            NullSceneLoader.read_text("level.scene"),
            Err(GraphError::Io { .. })
        ));
    }

    #[test]
    fn file_loader_reports_missing_files() {
        struct Never;
        impl ScriptInterpreter for Never {
            fn run(&self, _text: &str, _callback: &mut dyn ScriptCallback) -> Result<()> {
                Ok(())
            }
        }

        let loader = FileSceneLoader::new(std::env::temp_dir(), Never);
        let err = loader.read_text("node-graph-missing.scene").unwrap_err();
        assert!(err.to_string().contains("node-graph-missing.scene"));
    }
}
