//! Physics integration: bevy_rapier3d bodies for spawned fragments
//!
//! Provides:
//! - Collision group constants for fragments, clusters and the world
//! - `fragment_physics_bundle`: convex hull collider (cuboid fallback) and a
//!   rigid body matching the fragment's simulation type
//! - `cluster_physics_bundle`: one compound body over a connected cluster

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::cluster::ClusterData;
use crate::config::SimulationType;
use crate::geometry::FragmentMesh;

// ============================================================================
// Collision Layers
// ============================================================================

pub struct DemolitionLayers;

impl DemolitionLayers {
    /// Static level geometry
    pub const WORLD: Group = Group::GROUP_1;
    /// Not yet demolished objects
    pub const DESTRUCTIBLE: Group = Group::GROUP_2;
    /// Independent fragments and detached shards
    pub const FRAGMENT: Group = Group::GROUP_3;
    /// Connected clusters
    pub const CLUSTER: Group = Group::GROUP_4;
}

// ============================================================================
// Bundles
// ============================================================================

/// Rigid body type for a simulation setting.
pub fn rigid_body_for(simulation: SimulationType) -> RigidBody {
    match simulation {
        SimulationType::Inherit | SimulationType::Dynamic | SimulationType::Sleeping => RigidBody::Dynamic,
        SimulationType::Kinematic => RigidBody::KinematicPositionBased,
        SimulationType::Inactive | SimulationType::Static => RigidBody::Fixed,
    }
}

/// Convex hull around the fragment's vertices, or its bounding box when no
/// hull can be built (flat or degenerate input).
pub fn fragment_collider(mesh: &FragmentMesh) -> Collider {
    if let Some(hull) = Collider::convex_hull(&mesh.positions) {
        return hull;
    }
    let half = mesh.local_bounds().half_extents().max(Vec3::splat(0.001));
    Collider::cuboid(half.x, half.y, half.z)
}

/// Physics components for one fragment.
pub fn fragment_physics_bundle(
    mesh: &FragmentMesh,
    simulation: SimulationType,
    velocity: Vec3,
) -> (RigidBody, Collider, CollisionGroups, Velocity, Sleeping) {
    let sleeping = Sleeping {
        sleeping: simulation == SimulationType::Sleeping,
        ..default()
    };
    (
        rigid_body_for(simulation),
        fragment_collider(mesh),
        CollisionGroups::new(
            DemolitionLayers::FRAGMENT,
            DemolitionLayers::WORLD | DemolitionLayers::FRAGMENT | DemolitionLayers::CLUSTER,
        ),
        Velocity::linear(velocity),
        sleeping,
    )
}

/// Compound of one box per cluster piece, in cluster space. None for an
/// empty cluster.
pub fn cluster_collider(data: &ClusterData) -> Option<Collider> {
    if data.is_empty() {
        return None;
    }
    let shapes = data
        .pieces
        .iter()
        .map(|piece| {
            let half = piece.bounds.half_extents().max(Vec3::splat(0.001));
            (
                piece.bounds.center(),
                Quat::IDENTITY,
                Collider::cuboid(half.x, half.y, half.z),
            )
        })
        .collect();
    Some(Collider::compound(shapes))
}

/// Physics components for a connected cluster.
pub fn cluster_physics_bundle(
    data: &ClusterData,
    simulation: SimulationType,
    velocity: Vec3,
) -> Option<(RigidBody, Collider, CollisionGroups, Velocity, Sleeping)> {
    let collider = cluster_collider(data)?;
    let sleeping = Sleeping {
        sleeping: simulation == SimulationType::Sleeping,
        ..default()
    };
    Some((
        rigid_body_for(simulation),
        collider,
        CollisionGroups::new(
            DemolitionLayers::CLUSTER,
            DemolitionLayers::WORLD | DemolitionLayers::FRAGMENT | DemolitionLayers::CLUSTER,
        ),
        Velocity::linear(velocity),
        sleeping,
    ))
}

// ============================================================================
// Tests
// ============================================================================
