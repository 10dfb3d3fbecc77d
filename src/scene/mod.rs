//! Scene state handed to node callbacks

mod scene_graph;
mod transform;

pub use scene_graph::*;
pub use transform::LocalPose;

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

/// Everything node callbacks can reach: the transform hierarchy plus any
/// collaborator (renderer, physics, asset cache) stored as a typed resource.
#[derive(Default)]
pub struct Scene {
    pub transforms: SceneGraph,
    resources: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a resource of type T, returning the previous one.
    pub fn insert_resource<T: Send + 'static>(&mut self, value: T) -> Option<T> {
        self.resources
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn resource<T: 'static>(&self) -> Option<&T> {
        self.resources
            .get(&TypeId::of::<T>())
            .and_then(|r| r.downcast_ref::<T>())
    }

    pub fn resource_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.resources
            .get_mut(&TypeId::of::<T>())
            .and_then(|r| r.downcast_mut::<T>())
    }

    pub fn remove_resource<T: 'static>(&mut self) -> Option<T> {
        let removed = self.resources.remove(&TypeId::of::<T>())?;
        match removed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(_) => {
                log::error!("Resource slot for `{}` held another type", type_name::<T>());
                None
            }
        }
    }

    pub fn contains_resource<T: 'static>(&self) -> bool {
        self.resources.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("transforms", &self.transforms.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct FrameCounter(u32);

    #[test]
    fn resources_are_keyed_by_type() {
        let mut scene = Scene::new();
        assert!(scene.insert_resource(FrameCounter(1)).is_none());
        assert!(scene.contains_resource::<FrameCounter>());
        assert_eq!(scene.resource::<FrameCounter>(), Some(&FrameCounter(1)));

        scene.resource_mut::<FrameCounter>().unwrap().0 += 1;
        assert_eq!(scene.insert_resource(FrameCounter(7)), Some(FrameCounter(2)));
        assert_eq!(scene.remove_resource::<FrameCounter>(), Some(FrameCounter(7)));
        assert!(scene.resource::<FrameCounter>().is_none());
    }
}
