//! In-memory scene host.

use std::collections::HashMap;
use std::sync::Arc;

use bevy::prelude::*;

use super::{EntityId, ObjectKind, SceneHost};
use crate::config::SimulationType;
use crate::geometry::FragmentMesh;

#[derive(Debug, Clone)]
struct SceneNode {
    name: String,
    kind: ObjectKind,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    active: bool,
    transform: Transform,
    mesh: Option<Arc<FragmentMesh>>,
    physics: Option<SimulationType>,
    velocity: Vec3,
}

/// Headless scene: a flat entity table with parent/child links.
#[derive(Debug, Default)]
pub struct MemoryScene {
    nodes: HashMap<EntityId, SceneNode>,
    next_id: u64,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Spawns a mesh entity in one call.
    pub fn spawn_mesh(&mut self, name: &str, mesh: FragmentMesh, transform: Transform) -> EntityId {
        let id = self.spawn(name, ObjectKind::Mesh);
        self.set_mesh(id, Some(Arc::new(mesh)));
        self.set_transform(id, transform);
        id
    }

    /// Every entity with the given name.
    pub fn find_by_name(&self, name: &str) -> Vec<EntityId> {
        let mut found: Vec<EntityId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.name == name)
            .map(|(id, _)| *id)
            .collect();
        found.sort();
        found
    }

    fn detach(&mut self, id: EntityId) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent);
        if let Some(parent) = parent {
            if let Some(node) = self.nodes.get_mut(&parent) {
                node.children.retain(|c| *c != id);
            }
        }
    }

    fn is_ancestor(&self, ancestor: EntityId, id: EntityId) -> bool {
        let mut current = Some(id);
        while let Some(entity) = current {
            if entity == ancestor {
                return true;
            }
            current = self.nodes.get(&entity).and_then(|n| n.parent);
        }
        false
    }
}

impl SceneHost for MemoryScene {
    fn spawn(&mut self, name: &str, kind: ObjectKind) -> EntityId {
        self.next_id += 1;
        let id = EntityId(self.next_id);
        self.nodes.insert(
            id,
            SceneNode {
                name: name.to_string(),
                kind,
                parent: None,
                children: Vec::new(),
                active: true,
                transform: Transform::IDENTITY,
                mesh: None,
                physics: None,
                velocity: Vec3::ZERO,
            },
        );
        id
    }

    fn despawn(&mut self, id: EntityId) {
        self.detach(id);
        let mut stack = vec![id];
        while let Some(entity) = stack.pop() {
            if let Some(node) = self.nodes.remove(&entity) {
                stack.extend(node.children);
            }
        }
    }

    fn contains(&self, id: EntityId) -> bool {
        self.nodes.contains_key(&id)
    }

    fn name(&self, id: EntityId) -> Option<String> {
        self.nodes.get(&id).map(|n| n.name.clone())
    }

    fn kind(&self, id: EntityId) -> Option<ObjectKind> {
        self.nodes.get(&id).map(|n| n.kind)
    }

    fn set_kind(&mut self, id: EntityId, kind: ObjectKind) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.kind = kind;
        }
    }

    fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    fn set_parent(&mut self, id: EntityId, parent: Option<EntityId>) {
        if !self.nodes.contains_key(&id) {
            return;
        }
        if let Some(parent) = parent {
            if !self.nodes.contains_key(&parent) || self.is_ancestor(id, parent) {
                return;
            }
        }
        self.detach(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = parent;
        }
        if let Some(parent) = parent {
            if let Some(node) = self.nodes.get_mut(&parent) {
                node.children.push(id);
            }
        }
    }

    fn children(&self, id: EntityId) -> Vec<EntityId> {
        self.nodes
            .get(&id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn is_active(&self, id: EntityId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.active)
    }

    fn set_active(&mut self, id: EntityId, active: bool) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.active = active;
        }
    }

    fn transform(&self, id: EntityId) -> Transform {
        self.nodes
            .get(&id)
            .map(|n| n.transform)
            .unwrap_or(Transform::IDENTITY)
    }

    fn set_transform(&mut self, id: EntityId, transform: Transform) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.transform = transform;
        }
    }

    fn mesh(&self, id: EntityId) -> Option<Arc<FragmentMesh>> {
        self.nodes.get(&id).and_then(|n| n.mesh.clone())
    }

    fn set_mesh(&mut self, id: EntityId, mesh: Option<Arc<FragmentMesh>>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.mesh = mesh;
        }
    }

    fn add_physics(&mut self, id: EntityId, simulation: SimulationType) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.physics = Some(simulation);
        }
    }

    fn remove_physics(&mut self, id: EntityId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.physics = None;
        }
    }

    fn physics(&self, id: EntityId) -> Option<SimulationType> {
        self.nodes.get(&id).and_then(|n| n.physics)
    }

    fn velocity(&self, id: EntityId) -> Vec3 {
        self.nodes.get(&id).map(|n| n.velocity).unwrap_or(Vec3::ZERO)
    }

    fn set_velocity(&mut self, id: EntityId, velocity: Vec3) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.velocity = velocity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_hierarchy() {
        let mut scene = MemoryScene::new();
        let root = scene.spawn("root", ObjectKind::Node);
        let child = scene.spawn("child", ObjectKind::Mesh);
        scene.set_parent(child, Some(root));
        assert_eq!(scene.parent(child), Some(root));
        assert_eq!(scene.children(root), vec![child]);

        let other = scene.spawn("other", ObjectKind::Node);
        scene.set_parent(child, Some(other));
        assert!(scene.children(root).is_empty());
        assert_eq!(scene.children(other), vec![child]);
    }

    #[test]
    fn test_set_parent_rejects_cycles() {
        let mut scene = MemoryScene::new();
        let a = scene.spawn("a", ObjectKind::Node);
        let b = scene.spawn("b", ObjectKind::Node);
        scene.set_parent(b, Some(a));
        scene.set_parent(a, Some(b));
        assert_eq!(scene.parent(a), None);
    }

    #[test]
    fn test_despawn_is_recursive() {
        let mut scene = MemoryScene::new();
        let root = scene.spawn("root", ObjectKind::Node);
        let child = scene.spawn("child", ObjectKind::Node);
        let grandchild = scene.spawn("grandchild", ObjectKind::Node);
        scene.set_parent(child, Some(root));
        scene.set_parent(grandchild, Some(child));
        scene.despawn(child);
        assert!(scene.contains(root));
        assert!(!scene.contains(child));
        assert!(!scene.contains(grandchild));
        assert!(scene.children(root).is_empty());
    }

    #[test]
    fn test_global_transform_and_activity() {
        let mut scene = MemoryScene::new();
        let root = scene.spawn("root", ObjectKind::Node);
        let child = scene.spawn("child", ObjectKind::Node);
        scene.set_parent(child, Some(root));
        scene.set_transform(root, Transform::from_xyz(1.0, 2.0, 3.0));
        scene.set_transform(child, Transform::from_xyz(1.0, 0.0, 0.0));
        assert_eq!(scene.global_transform(child).translation, Vec3::new(2.0, 2.0, 3.0));

        scene.set_active(root, false);
        assert!(scene.is_active(child));
        assert!(!scene.is_active_in_hierarchy(child));
    }

    #[test]
    fn test_physics_toggle() {
        let mut scene = MemoryScene::new();
        let id = scene.spawn_mesh("box", FragmentMesh::cuboid(Vec3::ZERO, Vec3::ONE), Transform::IDENTITY);
        assert!(!scene.has_physics(id));
        scene.add_physics(id, SimulationType::Dynamic);
        assert_eq!(scene.physics(id), Some(SimulationType::Dynamic));
        scene.remove_physics(id);
        assert!(!scene.has_physics(id));
        assert_eq!(scene.find_by_name("box"), vec![id]);
    }
}
