//! Cluster conversion transaction.
//!
//! Converting fragments into a connected cluster touches many entities. The
//! cluster entity is created eagerly (the collaborator needs it), every other
//! destructive mutation is planned as a `ClusterOp` and only applied by
//! `commit` once the chosen branch is settled. `rollback` undoes the eager
//! part: the cluster is despawned and transferred effects go back to their
//! previous parent.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use super::{AnchorOverlap, ClusterData, ClusterDemolisher, ClusterView, ShardReport};
use crate::config::{ConversionMode, SimulationType};
use crate::connectivity::ConnectivityGraph;
use crate::constants::CONTACT_TOLERANCE;
use crate::demolition::Destructible;
use crate::error::ClusterError;
use crate::geometry::Bounds;
use crate::logging::TimingSpan;
use crate::scene::{EffectKind, EntityId, ObjectKind, SceneHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterOp {
    /// Remove the fragment's physics body and demolition record.
    StripFragment(EntityId),
    /// Drop the fragment from the source's fragment list.
    ForgetFragment(EntityId),
    Despawn(EntityId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterOutcome {
    /// Nothing to convert.
    Skipped,
    /// Awake conversion: the cluster owns simulation, fragments are stripped.
    Prefragmented { cluster: EntityId },
    /// No shard detached; every fragment was absorbed.
    Absorbed { cluster: Option<EntityId> },
    /// Only `shards` remain as independent fragments.
    Detached {
        cluster: Option<EntityId>,
        shards: Vec<EntityId>,
    },
    /// Connectivity mode: fragments grouped under a mesh root.
    Connectivity { mesh_root: EntityId },
    RolledBack(ClusterError),
}

impl ClusterOutcome {
    /// Surviving cluster entity, if any.
    pub fn cluster(&self) -> Option<EntityId> {
        match self {
            ClusterOutcome::Prefragmented { cluster } => Some(*cluster),
            ClusterOutcome::Absorbed { cluster } | ClusterOutcome::Detached { cluster, .. } => *cluster,
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ClusterTransaction {
    cluster: EntityId,
    /// Effects moved onto the cluster, with their previous parent.
    moved_effects: Vec<(EntityId, Option<EntityId>)>,
    ops: Vec<ClusterOp>,
}

impl ClusterTransaction {
    pub fn new(cluster: EntityId) -> Self {
        Self {
            cluster,
            moved_effects: Vec::new(),
            ops: Vec::new(),
        }
    }

    pub fn cluster(&self) -> EntityId {
        self.cluster
    }

    pub fn ops(&self) -> &[ClusterOp] {
        &self.ops
    }

    pub fn plan(&mut self, op: ClusterOp) {
        self.ops.push(op);
    }

    /// Reparents `effect` under the cluster, remembering where it was.
    pub fn move_effect(&mut self, host: &mut dyn SceneHost, effect: EntityId) {
        self.moved_effects.push((effect, host.parent(effect)));
        host.set_parent(effect, Some(self.cluster));
    }

    /// True when the cluster itself is planned for despawn.
    pub fn despawns_cluster(&self) -> bool {
        self.ops.contains(&ClusterOp::Despawn(self.cluster))
    }

    /// Applies every planned op in order.
    pub fn commit(
        self,
        host: &mut dyn SceneHost,
        records: &mut HashMap<EntityId, Destructible>,
        fragments: &mut Vec<EntityId>,
    ) {
        debug!(cluster = ?self.cluster, ops = self.ops.len(), "committing cluster transaction");
        for op in self.ops {
            match op {
                ClusterOp::StripFragment(id) => {
                    host.remove_physics(id);
                    records.remove(&id);
                }
                ClusterOp::ForgetFragment(id) => fragments.retain(|f| *f != id),
                ClusterOp::Despawn(id) => {
                    host.despawn(id);
                    records.remove(&id);
                }
            }
        }
    }

    /// Discards the plan and undoes the eager mutations.
    pub fn rollback(self, host: &mut dyn SceneHost, records: &mut HashMap<EntityId, Destructible>) {
        for (effect, parent) in self.moved_effects.into_iter().rev() {
            host.set_parent(effect, parent);
        }
        host.despawn(self.cluster);
        records.remove(&self.cluster);
    }
}

/// Converts `source`'s freshly spawned fragments into one connected cluster.
///
/// `awake` selects the pre-fragmentation short-circuit: fragments are
/// stripped and the collaborator is never called.
pub fn convert_to_cluster(
    host: &mut dyn SceneHost,
    records: &mut HashMap<EntityId, Destructible>,
    source_id: EntityId,
    source: &mut Destructible,
    demolisher: &dyn ClusterDemolisher,
    anchors: &dyn AnchorOverlap,
    awake: bool,
) -> ClusterOutcome {
    let _span = TimingSpan::new("cluster_conversion");
    let Some(root) = source.fragments_root else {
        return ClusterOutcome::Skipped;
    };
    if source.fragments.is_empty() {
        return ClusterOutcome::Skipped;
    }

    let name = host.name(source_id).unwrap_or_default();
    let cluster = host.spawn(&format!("{name}_cluster"), ObjectKind::Node);
    host.set_parent(cluster, Some(root));
    let mut config = source.config.clone();
    config.conversion = ConversionMode::Disabled;
    records.insert(cluster, Destructible::new(config, ObjectKind::ConnectedCluster));

    let mut txn = ClusterTransaction::new(cluster);

    for child in host.children(source_id) {
        if host.kind(child) == Some(ObjectKind::Effect(EffectKind::Particles)) {
            txn.move_effect(host, child);
        }
    }
    for fragment in &source.fragments {
        for child in host.children(*fragment) {
            if host.kind(child).is_some_and(|k| k.is_fragment_decoration()) {
                txn.plan(ClusterOp::Despawn(child));
            }
        }
    }

    host.set_kind(cluster, ObjectKind::ConnectedCluster);
    let mut data = ClusterData::from_fragments(host, &source.fragments);
    if data.is_empty() {
        warn!(entity = ?source_id, "no fragment carries a mesh, rolling back cluster");
        txn.rollback(host, records);
        return ClusterOutcome::RolledBack(ClusterError::Empty(cluster));
    }
    let tolerance = source
        .config
        .connectivity
        .as_ref()
        .map_or(CONTACT_TOLERANCE, |c| c.tolerance);
    if let Err(e) = data.initialize(tolerance) {
        txn.rollback(host, records);
        return ClusterOutcome::RolledBack(e);
    }

    for marker in source.config.anchors.iter().filter(|m| m.enabled) {
        let pinned = anchors.cluster_overlap(marker, &data);
        data.pinned.extend(pinned);
    }

    host.add_physics(cluster, source.simulation(SimulationType::Dynamic));

    if awake {
        for fragment in &source.fragments {
            txn.plan(ClusterOp::StripFragment(*fragment));
        }
        finish(host, records, source, txn, data);
        debug!(entity = ?source_id, ?cluster, "prefragmented into cluster");
        return ClusterOutcome::Prefragmented { cluster };
    }

    let contact = source.contact;
    if let Some(record) = records.get_mut(&cluster) {
        record.contact = contact;
    }
    let velocity = host.velocity(source_id);
    host.set_velocity(cluster, velocity);

    let root_inverse = host.global_transform(root).compute_affine().inverse();
    let view = ClusterView {
        cluster,
        data: &data,
        contact_point: contact.map(|c| root_inverse.transform_point3(c.point)),
        impact_radius: source.config.impact_radius,
    };
    let report = match demolisher.demolish_connected_cluster(&view) {
        Ok(report) => report,
        Err(e) => {
            warn!(entity = ?source_id, error = %e, "cluster demolition failed, rolling back");
            txn.rollback(host, records);
            return ClusterOutcome::RolledBack(e);
        }
    };

    let ShardReport {
        detached,
        fully_demolished,
    } = report;

    if detached.is_empty() {
        for fragment in &source.fragments {
            txn.plan(ClusterOp::StripFragment(*fragment));
        }
    } else {
        let shards: HashSet<EntityId> = detached.iter().copied().collect();
        for fragment in &source.fragments {
            if !shards.contains(fragment) {
                txn.plan(ClusterOp::StripFragment(*fragment));
                txn.plan(ClusterOp::ForgetFragment(*fragment));
            }
        }
        data.pieces.retain(|p| !shards.contains(&p.entity));
        data.pinned.retain(|id| !shards.contains(id));
        if let Err(e) = data.initialize(tolerance) {
            txn.rollback(host, records);
            return ClusterOutcome::RolledBack(e);
        }
    }

    if fully_demolished {
        txn.plan(ClusterOp::Despawn(cluster));
    }
    let survivor = (!txn.despawns_cluster()).then_some(cluster);
    finish(host, records, source, txn, data);

    info!(
        entity = ?source_id,
        shards = detached.len(),
        fully_demolished,
        "cluster conversion committed"
    );
    if detached.is_empty() {
        ClusterOutcome::Absorbed { cluster: survivor }
    } else {
        let mut shards: Vec<EntityId> = source
            .fragments
            .iter()
            .copied()
            .filter(|f| detached.contains(f))
            .collect();
        shards.sort();
        ClusterOutcome::Detached {
            cluster: survivor,
            shards,
        }
    }
}

fn finish(
    host: &mut dyn SceneHost,
    records: &mut HashMap<EntityId, Destructible>,
    source: &mut Destructible,
    txn: ClusterTransaction,
    data: ClusterData,
) {
    let cluster = txn.cluster();
    txn.commit(host, records, &mut source.fragments);
    if let Some(record) = records.get_mut(&cluster) {
        record.cluster = Some(data);
        source.cluster_entity = Some(cluster);
    } else {
        source.cluster_entity = None;
    }
}

/// Groups `source`'s fragments under a mesh root carrying their
/// connectivity graph. The root stays inactive when `awake`.
pub fn convert_to_connectivity(
    host: &mut dyn SceneHost,
    records: &mut HashMap<EntityId, Destructible>,
    source_id: EntityId,
    source: &mut Destructible,
    awake: bool,
) -> ClusterOutcome {
    let Some(root) = source.fragments_root else {
        return ClusterOutcome::Skipped;
    };
    if source.fragments.is_empty() {
        return ClusterOutcome::Skipped;
    }

    let name = host.name(source_id).unwrap_or_default();
    let mesh_root = host.spawn(&format!("{name}_mesh_root"), ObjectKind::MeshRoot);
    host.set_parent(mesh_root, Some(root));

    let mut pieces: Vec<(EntityId, Bounds)> = Vec::with_capacity(source.fragments.len());
    for fragment in &source.fragments {
        let offset = host.transform(*fragment).translation;
        if let Some(mesh) = host.mesh(*fragment) {
            pieces.push((*fragment, mesh.local_bounds().translated(offset)));
        }
        host.set_parent(*fragment, Some(mesh_root));
        if let Some(record) = records.get_mut(fragment) {
            record.connectivity_member = true;
        }
    }

    let tolerance = source
        .config
        .connectivity
        .as_ref()
        .map_or(CONTACT_TOLERANCE, |c| c.tolerance);
    let graph = ConnectivityGraph::build(&pieces, tolerance);
    debug!(
        entity = ?source_id,
        pieces = graph.len(),
        links = graph.edge_count(),
        "built connectivity graph"
    );

    let mut config = source.config.clone();
    config.conversion = ConversionMode::Disabled;
    let mut record = Destructible::new(config, ObjectKind::MeshRoot);
    record.connectivity_graph = Some(graph.clone());
    records.insert(mesh_root, record);
    source.connectivity_graph = Some(graph);
    source.mesh_root = Some(mesh_root);

    host.set_active(mesh_root, !awake);
    ClusterOutcome::Connectivity { mesh_root }
}
