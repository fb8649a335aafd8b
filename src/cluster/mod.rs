//! Connected clusters
//!
//! A cluster is one physical entity standing in for a set of still-connected
//! fragments. This module holds the cluster data, the two collaborator seams
//! (cluster demolition and anchor overlap) with reference implementations,
//! and the conversion transaction in `transaction`.

pub mod transaction;

use std::collections::HashSet;

use bevy::prelude::*;

use crate::config::AnchorMarker;
use crate::connectivity::ConnectivityGraph;
use crate::error::ClusterError;
use crate::geometry::Bounds;
use crate::scene::{EntityId, SceneHost};

pub use transaction::{convert_to_cluster, convert_to_connectivity, ClusterOp, ClusterOutcome, ClusterTransaction};

/// One fragment taking part in a cluster, with bounds in fragments-root space.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPiece {
    pub entity: EntityId,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterData {
    pub pieces: Vec<ClusterPiece>,
    pub graph: ConnectivityGraph,
    /// Pieces held in place by anchor markers.
    pub pinned: HashSet<EntityId>,
    pub initialized: bool,
}

impl ClusterData {
    /// Collects every fragment that carries a mesh.
    pub fn from_fragments(host: &dyn SceneHost, fragments: &[EntityId]) -> Self {
        let pieces = fragments
            .iter()
            .filter_map(|id| {
                let mesh = host.mesh(*id)?;
                let offset = host.transform(*id).translation;
                Some(ClusterPiece {
                    entity: *id,
                    bounds: mesh.local_bounds().translated(offset),
                })
            })
            .collect();
        Self {
            pieces,
            ..Default::default()
        }
    }

    /// Builds the connectivity graph between pieces.
    pub fn initialize(&mut self, tolerance: f32) -> Result<(), ClusterError> {
        let nodes: Vec<(EntityId, Bounds)> = self.pieces.iter().map(|p| (p.entity, p.bounds)).collect();
        self.graph = ConnectivityGraph::build(&nodes, tolerance);
        self.initialized = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn piece(&self, entity: EntityId) -> Option<&ClusterPiece> {
        self.pieces.iter().find(|p| p.entity == entity)
    }
}

/// What the cluster demolition collaborator sees.
#[derive(Debug, Clone, Copy)]
pub struct ClusterView<'a> {
    pub cluster: EntityId,
    pub data: &'a ClusterData,
    /// Contact point in fragments-root space, if the demolition had one.
    pub contact_point: Option<Vec3>,
    pub impact_radius: f32,
}

/// Result of demolishing a freshly created cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardReport {
    /// Fragments that separated from the cluster.
    pub detached: Vec<EntityId>,
    /// No connected remainder is left.
    pub fully_demolished: bool,
}

pub trait ClusterDemolisher: Send + Sync {
    fn demolish_connected_cluster(&self, view: &ClusterView<'_>) -> Result<ShardReport, ClusterError>;
}

pub trait AnchorOverlap: Send + Sync {
    /// Pieces pinned by `marker`.
    fn cluster_overlap(&self, marker: &AnchorMarker, cluster: &ClusterData) -> Vec<EntityId>;
}

/// Detaches pieces near the contact point, then every piece cut off from
/// the largest remaining connected group.
#[derive(Debug, Clone, Default)]
pub struct ImpactClusterDemolisher;

impl ClusterDemolisher for ImpactClusterDemolisher {
    fn demolish_connected_cluster(&self, view: &ClusterView<'_>) -> Result<ShardReport, ClusterError> {
        let data = view.data;
        if !data.initialized {
            return Err(ClusterError::NotInitialized(view.cluster));
        }
        if data.is_empty() {
            return Err(ClusterError::Empty(view.cluster));
        }

        let mut detached: HashSet<EntityId> = HashSet::new();
        if let Some(point) = view.contact_point {
            for piece in &data.pieces {
                if data.pinned.contains(&piece.entity) {
                    continue;
                }
                if piece.bounds.center().distance(point) <= view.impact_radius {
                    detached.insert(piece.entity);
                }
            }
        }

        let components = data.graph.components_without(&detached);
        // keep the largest group, or any group holding a pinned piece
        for (i, component) in components.iter().enumerate() {
            let anchored = component.iter().any(|id| data.pinned.contains(id));
            if i > 0 && !anchored {
                detached.extend(component.iter().copied());
            }
        }

        let remaining = data.len() - detached.len();
        let fully_demolished = remaining <= 1;
        if fully_demolished {
            for piece in &data.pieces {
                detached.insert(piece.entity);
            }
        }

        let mut detached: Vec<EntityId> = detached.into_iter().collect();
        detached.sort();
        Ok(ShardReport {
            detached,
            fully_demolished,
        })
    }
}

/// Pins pieces whose bounds intersect the anchor box.
#[derive(Debug, Clone, Default)]
pub struct BoundsAnchorOverlap;

impl AnchorOverlap for BoundsAnchorOverlap {
    fn cluster_overlap(&self, marker: &AnchorMarker, cluster: &ClusterData) -> Vec<EntityId> {
        if !marker.enabled {
            return Vec::new();
        }
        let anchor = Bounds::from_center_half_extents(marker.center(), marker.half_extents());
        cluster
            .pieces
            .iter()
            .filter(|p| p.bounds.intersects(&anchor, 0.0))
            .map(|p| p.entity)
            .collect()
    }
}
