//! Built-in node types.

use glam::Vec3;

use crate::attributes::AttributeIndex;
use crate::context::GraphContext;
use crate::error::Result;
use crate::node::{
    ExecMask, Node, NodeBehavior, NodeContext, NodeInstanceInfo, NodeTypeBuilder, NodeTypeInfo,
};
use crate::scene::{LocalPose, Scene, TransformInstance};

/// Registers every built-in node type.
pub fn register_builtin_nodes(ctx: &GraphContext) -> Result<()> {
    ctx.node_register(NodeTypeInfo::new(LocatorNode::TYPE_NAME, LocatorNode::default()))?;
    Ok(())
}

/// A node that owns one transform in the scene graph.
///
/// Attributes: `pos`, `rot` (Euler angles in radians, applied X then Y then
/// Z) and `scale`. The transform is created on load from those values and
/// removed on unload. Linking two locators links their transforms.
#[derive(Debug, Default)]
pub struct LocatorNode {
    pos: Option<AttributeIndex>,
    rot: Option<AttributeIndex>,
    scale: Option<AttributeIndex>,
}

/// Payload of one locator instance.
#[derive(Debug, Default)]
pub struct Locator {
    pub transform: Option<TransformInstance>,
}

impl LocatorNode {
    pub const TYPE_NAME: &'static str = "locator";

    fn pose(&self, node: &NodeContext<'_>) -> LocalPose {
        let read = |index: Option<AttributeIndex>, default: Vec3| {
            index.map_or(default, |i| node.attributes.float3(i))
        };
        LocalPose::from_components(
            read(self.pos, Vec3::ZERO),
            read(self.rot, Vec3::ZERO),
            read(self.scale, Vec3::ONE),
        )
    }
}

impl NodeBehavior for LocatorNode {
    fn type_init(&mut self, ty: &mut NodeTypeBuilder<'_>) -> Result<()> {
        ty.set_exec_mask(ExecMask::LOAD_UNLOAD);
        self.pos = Some(ty.add_attribute("pos", Vec3::ZERO)?);
        self.rot = Some(ty.add_attribute("rot", Vec3::ZERO)?);
        self.scale = Some(ty.add_attribute("scale", Vec3::ONE)?);
        Ok(())
    }

    fn create(&self) -> Node {
        Box::new(Locator::default())
    }

    fn destroy(&self, node: Node) {
        if let Ok(locator) = node.downcast::<Locator>() {
            if locator.transform.is_some() {
                log::warn!("Locator destroyed while its transform is still in the scene");
            }
        }
    }

    fn load(&self, mut node: NodeContext<'_>, scene: &mut Scene) {
        let pose = self.pose(&node);
        let id = node.id();
        let transform = scene.transforms.create_from_pose(id, pose);
        if let Some(locator) = node.node_mut::<Locator>() {
            locator.transform = Some(transform);
        }
    }

    fn unload(&self, mut node: NodeContext<'_>, scene: &mut Scene) {
        if let Some(transform) = node.node_mut::<Locator>().and_then(|l| l.transform.take()) {
            scene.transforms.destroy(transform);
        }
    }

    fn on_parent_link(
        &self,
        parent: &NodeInstanceInfo,
        child: &NodeInstanceInfo,
        scene: &mut Scene,
    ) {
        let transforms = &mut scene.transforms;
        let (Some(p), Some(c)) = (transforms.get(parent.id), transforms.get(child.id)) else {
            log::warn!(
                "Cannot link `{}` under `{}`: missing transform",
                child.name,
                parent.name
            );
            return;
        };
        if let Err(err) = transforms.link(c, p) {
            log::warn!("Cannot link `{}` under `{}`: {err}", child.name, parent.name);
        }
    }

    fn on_unlink(&self, child: &NodeInstanceInfo, scene: &mut Scene) {
        if let Some(c) = scene.transforms.get(child.id) {
            if let Err(err) = scene.transforms.unlink(c) {
                log::warn!("Cannot unlink `{}`: {err}", child.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::NullSceneLoader;
    use glam::Mat4;

    #[test]
    fn load_creates_transform_from_attributes() {
        let ctx = GraphContext::default();
        register_builtin_nodes(&ctx).unwrap();
        let mut scene = Scene::new();
        let graph = ctx.graph_create().unwrap();

        let id = ctx.node_create(LocatorNode::TYPE_NAME, "spot").unwrap();
        ctx.node_attribute_vector3_set(id, "pos", Vec3::new(1.0, 2.0, 3.0))
            .unwrap();
        ctx.graph_node_add(graph, id).unwrap();
        ctx.tick(&NullSceneLoader, &mut scene);

        let t = scene.transforms.get(id).unwrap();
        assert_eq!(scene.transforms.world_position(t), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(
            ctx.with_node::<Locator, _>(id, |l| l.transform),
            Some(Some(t))
        );

        ctx.graph_node_remove(id, true);
        ctx.tick(&NullSceneLoader, &mut scene);
        assert!(scene.transforms.get(id).is_none());
        assert!(scene.transforms.is_empty());
        assert!(!ctx.node_is_valid(id));
    }

    #[test]
    fn linking_locators_links_transforms() {
        let ctx = GraphContext::default();
        register_builtin_nodes(&ctx).unwrap();
        let mut scene = Scene::new();
        let graph = ctx.graph_create().unwrap();

        let parent = ctx.node_create(LocatorNode::TYPE_NAME, "parent").unwrap();
        let child = ctx.node_create(LocatorNode::TYPE_NAME, "child").unwrap();
        ctx.node_attribute_vector3_set(parent, "pos", Vec3::X).unwrap();
        ctx.graph_node_add(graph, parent).unwrap();
        ctx.graph_node_add(graph, child).unwrap();
        ctx.tick(&NullSceneLoader, &mut scene);

        ctx.graph_node_link(parent, child, &mut scene).unwrap();
        let p = scene.transforms.get(parent).unwrap();
        let c = scene.transforms.get(child).unwrap();
        assert_eq!(scene.transforms.parent(c), Some(p));
        assert!(scene
            .transforms
            .world_pose(c)
            .unwrap()
            .abs_diff_eq(Mat4::IDENTITY, 1e-5));

        ctx.graph_node_unlink(child, &mut scene).unwrap();
        assert_eq!(scene.transforms.parent(c), None);
    }
}
