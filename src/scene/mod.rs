//! Scene host seam
//!
//! The orchestrator never touches an engine directly: entity creation,
//! hierarchy, activation, transforms and physics bodies all go through
//! `SceneHost`. `MemoryScene` is the headless host used by the Bevy plugin
//! and the tests.

mod memory;

use std::sync::Arc;

use bevy::prelude::*;

use crate::config::SimulationType;
use crate::geometry::FragmentMesh;

pub use memory::MemoryScene;

/// Stable handle to a scene entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

/// Decoration objects hanging off demolishable entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Particles,
    Debris,
    Dust,
}

/// What an entity is, resolved once when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Plain transform node without geometry of its own.
    Node,
    Mesh,
    SkinnedMesh,
    ConnectedCluster,
    /// Lightweight parent for connectivity-driven fragment sets.
    MeshRoot,
    Effect(EffectKind),
}

impl ObjectKind {
    /// Kinds whose geometry can be fragmented.
    pub fn is_mesh_demolition(&self) -> bool {
        matches!(self, ObjectKind::Mesh | ObjectKind::SkinnedMesh)
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, ObjectKind::ConnectedCluster)
    }

    /// Decorations regenerated at cluster level instead of per fragment.
    pub fn is_fragment_decoration(&self) -> bool {
        matches!(
            self,
            ObjectKind::Effect(EffectKind::Debris) | ObjectKind::Effect(EffectKind::Dust)
        )
    }
}

/// Operations the orchestrator needs from the host engine. All calls are
/// synchronous; unknown ids are ignored by mutators and yield defaults from
/// queries.
pub trait SceneHost {
    fn spawn(&mut self, name: &str, kind: ObjectKind) -> EntityId;
    /// Removes the entity and its whole subtree.
    fn despawn(&mut self, id: EntityId);
    fn contains(&self, id: EntityId) -> bool;

    fn name(&self, id: EntityId) -> Option<String>;
    fn kind(&self, id: EntityId) -> Option<ObjectKind>;
    fn set_kind(&mut self, id: EntityId, kind: ObjectKind);

    fn parent(&self, id: EntityId) -> Option<EntityId>;
    fn set_parent(&mut self, id: EntityId, parent: Option<EntityId>);
    fn children(&self, id: EntityId) -> Vec<EntityId>;

    fn is_active(&self, id: EntityId) -> bool;
    fn set_active(&mut self, id: EntityId, active: bool);

    /// Local transform relative to the parent.
    fn transform(&self, id: EntityId) -> Transform;
    fn set_transform(&mut self, id: EntityId, transform: Transform);

    fn mesh(&self, id: EntityId) -> Option<Arc<FragmentMesh>>;
    fn set_mesh(&mut self, id: EntityId, mesh: Option<Arc<FragmentMesh>>);

    fn add_physics(&mut self, id: EntityId, simulation: SimulationType);
    fn remove_physics(&mut self, id: EntityId);
    fn physics(&self, id: EntityId) -> Option<SimulationType>;

    fn velocity(&self, id: EntityId) -> Vec3;
    fn set_velocity(&mut self, id: EntityId, velocity: Vec3);

    fn has_physics(&self, id: EntityId) -> bool {
        self.physics(id).is_some()
    }

    /// Transform composed through every ancestor.
    fn global_transform(&self, id: EntityId) -> Transform {
        let mut transform = self.transform(id);
        let mut current = self.parent(id);
        while let Some(parent) = current {
            transform = self.transform(parent).mul_transform(transform);
            current = self.parent(parent);
        }
        transform
    }

    /// Active only when the entity and every ancestor are active.
    fn is_active_in_hierarchy(&self, id: EntityId) -> bool {
        let mut current = Some(id);
        while let Some(entity) = current {
            if !self.is_active(entity) {
                return false;
            }
            current = self.parent(entity);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_capabilities() {
        assert!(ObjectKind::Mesh.is_mesh_demolition());
        assert!(ObjectKind::SkinnedMesh.is_mesh_demolition());
        assert!(!ObjectKind::ConnectedCluster.is_mesh_demolition());
        assert!(ObjectKind::ConnectedCluster.is_cluster());
        assert!(ObjectKind::Effect(EffectKind::Dust).is_fragment_decoration());
        assert!(!ObjectKind::Effect(EffectKind::Particles).is_fragment_decoration());
    }
}
