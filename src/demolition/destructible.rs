//! Per-entity demolition record.
//!
//! A `Destructible` is the identity component of a demolishable entity: its
//! configuration, caching job, cached meshes and spawned fragments. Removing
//! the record from the controller strips the entity's demolition identity.

use std::sync::Arc;

use bevy::prelude::*;

use crate::cluster::{ClusterData, ClusterOutcome};
use crate::config::{DemolitionConfig, Limitations, SimulationType};
use crate::connectivity::ConnectivityGraph;
use crate::constants::MIN_FRAGMENT_AMOUNT;
use crate::geometry::FragmentMesh;
use crate::scene::{EntityId, ObjectKind};
use crate::scheduler::FragmentationJob;

/// Outcome of one demolition poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemolitionPoll {
    /// Caching still in progress (or already polled this tick); poll again.
    Busy,
    /// Demolition happened, or there was nothing to do.
    Complete,
    /// The caching job was cancelled and its fragments discarded.
    Cancelled,
    /// This entity can never be demolished. Logged once.
    Failed,
}

impl DemolitionPoll {
    pub fn is_done(&self) -> bool {
        !matches!(self, DemolitionPoll::Busy)
    }
}

/// Fragment meshes kept between caching and instantiation.
#[derive(Debug, Clone)]
pub struct FragmentCache {
    /// Digest of the source mesh and parameters the meshes were built from.
    pub key: u64,
    pub meshes: Vec<Arc<FragmentMesh>>,
}

/// Impact state copied from a demolished entity onto its cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactInfo {
    pub point: Vec3,
    pub normal: Vec3,
    pub impulse: f32,
}

#[derive(Debug, Clone)]
pub struct Destructible {
    pub config: DemolitionConfig,
    pub kind: ObjectKind,
    pub demolished: bool,
    /// Permanent failure was reported; later polls are silent no-ops.
    pub given_up: bool,
    pub job: Option<FragmentationJob>,
    pub cache: Option<FragmentCache>,
    pub fragments: Vec<EntityId>,
    pub fragments_root: Option<EntityId>,
    pub cluster: Option<ClusterData>,
    /// Cluster entity created for this entity's fragments.
    pub cluster_entity: Option<EntityId>,
    pub mesh_root: Option<EntityId>,
    pub connectivity_member: bool,
    pub connectivity_graph: Option<ConnectivityGraph>,
    /// Result of the last cluster or connectivity conversion.
    pub conversion: Option<ClusterOutcome>,
    pub contact: Option<ContactInfo>,
    /// Physics startup deferred until the fragments are activated.
    pub pending_startup: bool,
    pub last_poll_tick: Option<u64>,
}

impl Destructible {
    pub fn new(config: DemolitionConfig, kind: ObjectKind) -> Self {
        Self {
            config,
            kind,
            demolished: false,
            given_up: false,
            job: None,
            cache: None,
            fragments: Vec::new(),
            fragments_root: None,
            cluster: None,
            cluster_entity: None,
            mesh_root: None,
            connectivity_member: false,
            connectivity_graph: None,
            conversion: None,
            contact: None,
            pending_startup: false,
            last_poll_tick: None,
        }
    }

    /// Simulation type with `Inherit` resolved against `parent`.
    pub fn simulation(&self, parent: SimulationType) -> SimulationType {
        self.config.simulation.resolve(parent)
    }

    pub fn has_fragments(&self) -> bool {
        !self.fragments.is_empty()
    }
}

/// Fragment amount for the next demolition level.
pub fn next_level_amount(amount: u32, decay: f32) -> u32 {
    let scaled = (amount as f32 * decay).floor();
    if scaled.is_finite() && scaled > 0.0 {
        (scaled as u32).max(MIN_FRAGMENT_AMOUNT)
    } else {
        MIN_FRAGMENT_AMOUNT
    }
}

/// Limitations a fragment inherits from the entity it was cut from.
pub fn child_limitations(parent: &Limitations) -> Limitations {
    Limitations {
        current_depth: parent.current_depth + 1,
        ..parent.clone()
    }
}
