//! Demolition orchestrator
//!
//! `DemolitionController` owns one `Destructible` record per registered
//! entity and drives it through caching, fragment instantiation and
//! conversion. Callers poll `demolish` once per tick until it reports done;
//! nothing here returns an error, failures end up as poll results and logs.

mod destructible;

use std::collections::HashMap;
use std::sync::Arc;

use bevy::prelude::*;
use tracing::{debug, info, warn};

pub use destructible::{
    child_limitations, next_level_amount, ContactInfo, DemolitionPoll, Destructible, FragmentCache,
};

use crate::cluster::{
    convert_to_cluster, convert_to_connectivity, AnchorOverlap, BoundsAnchorOverlap, ClusterDemolisher,
    ImpactClusterDemolisher,
};
use crate::config::{ConversionMode, DemolitionConfig, DemolitionType, SimulationType};
use crate::constants::{FRAGMENTS_CONTAINER_NAME, FRAGMENTS_ROOT_SUFFIX, FRAGMENT_NAME_INFIX};
use crate::error::{EngineError, RegisterError};
use crate::filters;
use crate::fragmenter::{cache_key, FragmentationEngine};
use crate::geometry::{FragmentMesh, SlicePlane};
use crate::logging::TimingSpan;
use crate::scene::{EntityId, ObjectKind, SceneHost};
use crate::scheduler::{FragmentationJob, JobPoll};

pub struct DemolitionController {
    engine: Box<dyn FragmentationEngine>,
    cluster_demolisher: Box<dyn ClusterDemolisher>,
    anchors: Box<dyn AnchorOverlap>,
    records: HashMap<EntityId, Destructible>,
    /// Shared parent of every fragments root.
    container: Option<EntityId>,
    tick: u64,
}

impl DemolitionController {
    pub fn new(engine: Box<dyn FragmentationEngine>) -> Self {
        Self {
            engine,
            cluster_demolisher: Box::new(ImpactClusterDemolisher),
            anchors: Box::new(BoundsAnchorOverlap),
            records: HashMap::new(),
            container: None,
            tick: 0,
        }
    }

    pub fn with_cluster_demolisher(mut self, demolisher: Box<dyn ClusterDemolisher>) -> Self {
        self.cluster_demolisher = demolisher;
        self
    }

    pub fn with_anchor_overlap(mut self, anchors: Box<dyn AnchorOverlap>) -> Self {
        self.anchors = anchors;
        self
    }

    // ------------------------------------------------------------------------
    // Registration and bookkeeping
    // ------------------------------------------------------------------------

    /// Attaches a demolition record to an existing scene entity. The
    /// entity's kind is resolved here, once.
    pub fn register(
        &mut self,
        host: &dyn SceneHost,
        entity: EntityId,
        mut config: DemolitionConfig,
    ) -> Result<(), RegisterError> {
        let Some(kind) = host.kind(entity) else {
            return Err(RegisterError::MissingEntity(entity));
        };
        if self.records.contains_key(&entity) {
            return Err(RegisterError::AlreadyRegistered(entity));
        }
        let fixed = config.validate();
        if !fixed.is_empty() {
            debug!(entity = ?entity, ?fixed, "config repaired at registration");
        }
        self.records.insert(entity, Destructible::new(config, kind));
        Ok(())
    }

    /// Drops the record, stripping the entity's demolition identity.
    pub fn unregister(&mut self, entity: EntityId) -> Option<Destructible> {
        self.records.remove(&entity)
    }

    pub fn record(&self, entity: EntityId) -> Option<&Destructible> {
        self.records.get(&entity)
    }

    pub fn is_registered(&self, entity: EntityId) -> bool {
        self.records.contains_key(&entity)
    }

    /// Spawned fragments of `entity`, empty when there are none.
    pub fn fragments(&self, entity: EntityId) -> &[EntityId] {
        self.records
            .get(&entity)
            .map(|r| r.fragments.as_slice())
            .unwrap_or(&[])
    }

    pub fn container(&self) -> Option<EntityId> {
        self.container
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Marks a frame boundary. Jobs advance at most once per tick.
    pub fn advance_tick(&mut self) {
        self.tick += 1;
    }

    /// Impact data handed to the cluster collaborator on live conversion.
    pub fn set_contact(&mut self, entity: EntityId, contact: ContactInfo) {
        if let Some(record) = self.records.get_mut(&entity) {
            record.contact = Some(contact);
        }
    }

    /// Requests cooperative cancellation of the entity's caching job.
    /// Returns false when there is no job in progress.
    pub fn cancel(&mut self, entity: EntityId) -> bool {
        let Some(job) = self.records.get_mut(&entity).and_then(|r| r.job.as_mut()) else {
            return false;
        };
        job.request_cancellation();
        job.is_cancel_requested()
    }

    // ------------------------------------------------------------------------
    // Demolition
    // ------------------------------------------------------------------------

    /// True once demolition finished or there is nothing to do; false while
    /// caching is still in progress.
    pub fn demolish(&mut self, host: &mut dyn SceneHost, entity: EntityId) -> bool {
        self.poll(host, entity).is_done()
    }

    pub fn poll(&mut self, host: &mut dyn SceneHost, entity: EntityId) -> DemolitionPoll {
        let _span = TimingSpan::new("demolition_poll");
        let Some(mut record) = self.records.remove(&entity) else {
            return DemolitionPoll::Complete;
        };
        let result = self.poll_record(host, entity, &mut record);
        self.records.insert(entity, record);
        result
    }

    fn poll_record(
        &mut self,
        host: &mut dyn SceneHost,
        entity: EntityId,
        record: &mut Destructible,
    ) -> DemolitionPoll {
        if record.given_up {
            return DemolitionPoll::Failed;
        }
        if !Self::is_demolishable(record) || record.demolished {
            return DemolitionPoll::Complete;
        }

        if record.has_fragments() {
            self.reactivate(host, entity, record);
            return DemolitionPoll::Complete;
        }

        let Some(source) = host.mesh(entity) else {
            return Self::give_up(entity, record, &EngineError::InvalidSource("entity has no mesh".into()));
        };
        let key = cache_key(&source, &record.config.fragmentation);

        if let Some(cache) = record.cache.take() {
            if cache.key == key {
                self.spawn_fragments(host, entity, record, &cache.meshes, false);
                record.cache = Some(cache);
                return DemolitionPoll::Complete;
            }
            debug!(entity = ?entity, "fragment cache out of date, rebuilding");
        }

        if record.job.is_some() && record.last_poll_tick == Some(self.tick) {
            return DemolitionPoll::Busy;
        }
        record.last_poll_tick = Some(self.tick);

        let params = record.config.fragmentation.clone();
        let schedule = record.config.schedule;
        let job = record
            .job
            .get_or_insert_with(|| FragmentationJob::new(source, params, schedule));

        match job.poll(self.engine.as_ref(), &record.config.filters) {
            JobPoll::Busy => DemolitionPoll::Busy,
            JobPoll::Complete => {
                // keyed by the source the job started from, not the current mesh
                let key = job.cache_key();
                let meshes: Vec<Arc<FragmentMesh>> = job.take_fragments().into_iter().map(Arc::new).collect();
                record.job = None;
                self.spawn_fragments(host, entity, record, &meshes, false);
                record.cache = Some(FragmentCache { key, meshes });
                DemolitionPoll::Complete
            }
            JobPoll::Cancelled => {
                record.job = None;
                DemolitionPoll::Cancelled
            }
            JobPoll::Failed(err) => {
                record.job = None;
                Self::give_up(entity, record, &err)
            }
        }
    }

    /// Cuts the entity along `plane` and spawns the pieces immediately.
    /// Returns false when nothing could be cut.
    pub fn slice(&mut self, host: &mut dyn SceneHost, entity: EntityId, plane: SlicePlane) -> bool {
        let Some(mut record) = self.records.remove(&entity) else {
            return true;
        };
        let sliced = self.slice_record(host, entity, &mut record, &plane);
        self.records.insert(entity, record);
        sliced
    }

    fn slice_record(
        &mut self,
        host: &mut dyn SceneHost,
        entity: EntityId,
        record: &mut Destructible,
        plane: &SlicePlane,
    ) -> bool {
        if record.given_up || !Self::is_demolishable(record) || record.demolished {
            return true;
        }
        if !plane.is_valid() {
            warn!(entity = ?entity, "slice plane has no normal");
            return false;
        }
        let Some(source) = host.mesh(entity) else {
            Self::give_up(entity, record, &EngineError::InvalidSource("entity has no mesh".into()));
            return true;
        };

        let mut pieces = match self.engine.slice(&source, plane) {
            Ok(pieces) => pieces,
            Err(EngineError::Unsupported) => {
                Self::give_up(entity, record, &EngineError::Unsupported);
                return true;
            }
            Err(err) => {
                warn!(entity = ?entity, %err, "slice failed");
                return false;
            }
        };
        let report = filters::apply(
            &record.config.filters,
            &mut pieces,
            0,
            source.local_bounds().diagonal(),
        );
        if pieces.is_empty() {
            return false;
        }
        debug!(entity = ?entity, pieces = pieces.len(), removed = report.total(), "sliced");

        let meshes: Vec<Arc<FragmentMesh>> = pieces.into_iter().map(Arc::new).collect();
        self.spawn_fragments(host, entity, record, &meshes, false);
        true
    }

    /// Runs the awake-time work for precache and prefragment entities.
    /// Returns true when fragments were cached or spawned.
    pub fn initialize(&mut self, host: &mut dyn SceneHost, entity: EntityId) -> bool {
        let Some(mut record) = self.records.remove(&entity) else {
            return false;
        };
        let done = self.initialize_record(host, entity, &mut record);
        self.records.insert(entity, record);
        done
    }

    fn initialize_record(&mut self, host: &mut dyn SceneHost, entity: EntityId, record: &mut Destructible) -> bool {
        let prefragment = match record.config.demolition_type {
            DemolitionType::AwakePrecache => false,
            DemolitionType::AwakePrefragment => true,
            _ => return false,
        };
        if record.given_up || !Self::is_demolishable(record) || record.has_fragments() {
            return false;
        }

        let Some(cache) = self.build_cache(host, entity, record) else {
            return false;
        };
        if prefragment {
            self.spawn_fragments(host, entity, record, &cache.meshes, true);
        }
        info!(
            entity = ?entity,
            fragments = cache.meshes.len(),
            prefragment,
            "initialized"
        );
        record.cache = Some(cache);
        true
    }

    /// Runs a whole caching job in one go.
    fn build_cache(&self, host: &dyn SceneHost, entity: EntityId, record: &mut Destructible) -> Option<FragmentCache> {
        let Some(source) = host.mesh(entity) else {
            Self::give_up(entity, record, &EngineError::InvalidSource("entity has no mesh".into()));
            return None;
        };
        let mut job = FragmentationJob::new(
            source,
            record.config.fragmentation.clone(),
            record.config.schedule,
        );
        loop {
            match job.poll(self.engine.as_ref(), &record.config.filters) {
                JobPoll::Busy => continue,
                JobPoll::Complete => break,
                JobPoll::Cancelled => return None,
                JobPoll::Failed(err) => {
                    Self::give_up(entity, record, &err);
                    return None;
                }
            }
        }
        let key = job.cache_key();
        let meshes = job.take_fragments().into_iter().map(Arc::new).collect();
        Some(FragmentCache { key, meshes })
    }

    fn is_demolishable(record: &Destructible) -> bool {
        record.kind.is_mesh_demolition()
            && !matches!(
                record.config.demolition_type,
                DemolitionType::None | DemolitionType::Reference
            )
            && record.config.limitations.can_demolish()
    }

    fn give_up(entity: EntityId, record: &mut Destructible, err: &EngineError) -> DemolitionPoll {
        if !record.given_up {
            warn!(entity = ?entity, %err, "entity can not be demolished, giving up");
        }
        record.given_up = true;
        record.demolished = false;
        DemolitionPoll::Failed
    }

    // ------------------------------------------------------------------------
    // Scene work
    // ------------------------------------------------------------------------

    fn ensure_container(&mut self, host: &mut dyn SceneHost) -> EntityId {
        if let Some(container) = self.container.filter(|c| host.contains(*c)) {
            return container;
        }
        let container = host.spawn(FRAGMENTS_CONTAINER_NAME, ObjectKind::Node);
        self.container = Some(container);
        container
    }

    /// Simulation the entity's own `Inherit` resolves against.
    fn parent_simulation(&self, host: &dyn SceneHost, entity: EntityId) -> SimulationType {
        host.parent(entity)
            .and_then(|p| self.records.get(&p))
            .map_or(SimulationType::Dynamic, |r| r.simulation(SimulationType::Dynamic))
    }

    /// Brings previously spawned (prefragmented) fragments into play.
    fn reactivate(&mut self, host: &mut dyn SceneHost, entity: EntityId, record: &mut Destructible) {
        let container = self.ensure_container(host);
        if let Some(root) = record.fragments_root {
            host.set_parent(root, Some(container));
            let transform = host.global_transform(entity);
            host.set_transform(root, transform);
            host.set_active(root, true);
        }

        let converting = record.config.demolition_type == DemolitionType::AwakePrefragment
            && record.config.conversion == ConversionMode::ConnectedCluster;
        if record.pending_startup && !converting {
            let parent = self.parent_simulation(host, entity);
            let simulation = record.simulation(parent);
            for fragment in &record.fragments {
                if let Some(child) = self.records.get(fragment) {
                    host.add_physics(*fragment, child.simulation(simulation));
                }
            }
        }
        record.pending_startup = false;

        if let Some(mesh_root) = record.mesh_root {
            host.set_active(mesh_root, true);
        }
        host.set_active(entity, false);
        record.demolished = true;
        info!(entity = ?entity, fragments = record.fragments.len(), "fragments reactivated");
    }

    /// Instantiates one fragment entity per mesh under a fresh fragments
    /// root, then propagates depth, absorbs mesh children and converts.
    fn spawn_fragments(
        &mut self,
        host: &mut dyn SceneHost,
        entity: EntityId,
        record: &mut Destructible,
        meshes: &[Arc<FragmentMesh>],
        awake: bool,
    ) {
        let container = self.ensure_container(host);
        let name = host.name(entity).unwrap_or_default();
        let root = host.spawn(&format!("{name}{FRAGMENTS_ROOT_SUFFIX}"), ObjectKind::Node);
        host.set_parent(root, Some(container));
        let transform = host.global_transform(entity);
        host.set_transform(root, transform);
        record.fragments_root = Some(root);
        // fragment pivots live in the source mesh's space; the root sits at the entity origin
        let origin = host.mesh(entity).map_or(Vec3::ZERO, |m| m.pivot);

        let parent = self.parent_simulation(host, entity);
        let simulation = record.simulation(parent);
        let velocity = host.velocity(entity);
        let child_config = Self::fragment_config(&record.config, simulation);

        for (i, mesh) in meshes.iter().enumerate() {
            let id = host.spawn(&format!("{name}{FRAGMENT_NAME_INFIX}{}", i + 1), ObjectKind::Mesh);
            host.set_parent(id, Some(root));
            host.set_mesh(id, Some(Arc::clone(mesh)));
            host.set_transform(id, Transform::from_translation(mesh.pivot - origin));
            host.set_velocity(id, velocity);
            if !awake {
                host.add_physics(id, simulation);
            }
            self.records
                .insert(id, Destructible::new(child_config.clone(), ObjectKind::Mesh));
            record.fragments.push(id);
        }

        self.set_limitation_props(&record.config, &record.fragments);
        self.children_to_fragments(host, entity, record, root, simulation, awake);

        if awake {
            record.pending_startup = true;
            host.set_active(root, false);
        } else {
            host.set_active(entity, false);
            record.demolished = true;
        }
        info!(
            entity = ?entity,
            fragments = record.fragments.len(),
            awake,
            "fragments spawned"
        );

        self.convert(host, entity, record, awake);
    }

    /// Configuration handed to spawned fragments.
    fn fragment_config(parent: &DemolitionConfig, simulation: SimulationType) -> DemolitionConfig {
        let mut config = parent.clone();
        if matches!(
            config.demolition_type,
            DemolitionType::AwakePrecache | DemolitionType::AwakePrefragment
        ) {
            config.demolition_type = DemolitionType::Runtime;
        }
        config.conversion = ConversionMode::Disabled;
        config.simulation = simulation;
        config.anchors.clear();
        config
    }

    /// Pushes depth, decayed amount and material stripping from `parent`
    /// onto each fragment.
    fn set_limitation_props(&mut self, parent: &DemolitionConfig, fragments: &[EntityId]) {
        let limitations = child_limitations(&parent.limitations);
        let amount = next_level_amount(parent.fragmentation.amount, parent.limitations.depth_decay);
        for fragment in fragments {
            if let Some(child) = self.records.get_mut(fragment) {
                child.config.limitations = limitations.clone();
                child.config.fragmentation.amount = amount;
                child.config.fragmentation.depth = limitations.current_depth;
                child.config.materials.outer = None;
            }
        }
    }

    /// Moves every direct mesh child of `entity` under the fragments root
    /// and treats it as one more fragment.
    fn children_to_fragments(
        &mut self,
        host: &mut dyn SceneHost,
        entity: EntityId,
        record: &mut Destructible,
        root: EntityId,
        simulation: SimulationType,
        awake: bool,
    ) {
        if record.kind.is_cluster() {
            return;
        }
        let velocity = host.velocity(entity);
        for child in host.children(entity) {
            let is_mesh = host.kind(child).is_some_and(|k| k.is_mesh_demolition());
            if !is_mesh || host.mesh(child).is_none() {
                continue;
            }
            // root carries the entity's global transform, so the local one stays valid
            host.set_parent(child, Some(root));

            let resolved = match self.records.get_mut(&child) {
                Some(existing) => {
                    existing.config.simulation = existing.config.simulation.resolve(simulation);
                    existing.config.simulation
                }
                None => {
                    let mut config = Self::fragment_config(&record.config, simulation);
                    config.simulation = SimulationType::Inherit.resolve(simulation);
                    let resolved = config.simulation;
                    self.records.insert(child, Destructible::new(config, ObjectKind::Mesh));
                    resolved
                }
            };
            self.set_limitation_props(&record.config, &[child]);
            host.set_velocity(child, velocity);
            if !awake {
                host.add_physics(child, resolved);
            }
            self.initialize(host, child);
            record.fragments.push(child);
            debug!(entity = ?entity, ?child, "absorbed mesh child");
        }
    }

    fn convert(&mut self, host: &mut dyn SceneHost, entity: EntityId, record: &mut Destructible, awake: bool) {
        if record.fragments.is_empty() {
            return;
        }
        let outcome = match record.config.conversion {
            ConversionMode::Disabled => return,
            ConversionMode::ConnectedCluster => convert_to_cluster(
                host,
                &mut self.records,
                entity,
                record,
                self.cluster_demolisher.as_ref(),
                self.anchors.as_ref(),
                awake,
            ),
            ConversionMode::Connectivity => {
                convert_to_connectivity(host, &mut self.records, entity, record, awake)
            }
        };
        debug!(entity = ?entity, ?outcome, "conversion finished");
        record.conversion = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragmenter::BoundsFragmenter;
    use crate::scene::MemoryScene;

    fn setup(config: DemolitionConfig) -> (MemoryScene, DemolitionController, EntityId) {
        let mut scene = MemoryScene::new();
        let wall = scene.spawn_mesh(
            "wall",
            FragmentMesh::cuboid(Vec3::ZERO, Vec3::new(2.0, 1.0, 0.5)),
            Transform::from_xyz(0.0, 1.0, 0.0),
        );
        let mut controller = DemolitionController::new(Box::new(BoundsFragmenter));
        controller.register(&scene, wall, config).unwrap();
        (scene, controller, wall)
    }

    fn config(amount: u32, ticks: u32) -> DemolitionConfig {
        let mut config = DemolitionConfig::default();
        config.fragmentation.amount = amount;
        config.schedule = crate::config::PlanStrategy::ByTickCount(ticks);
        config
    }

    #[test]
    fn test_register_twice_rejected() {
        let (scene, mut controller, wall) = setup(DemolitionConfig::default());
        let err = controller.register(&scene, wall, DemolitionConfig::default()).unwrap_err();
        assert_eq!(err, RegisterError::AlreadyRegistered(wall));
        let err = controller
            .register(&scene, EntityId(999), DemolitionConfig::default())
            .unwrap_err();
        assert_eq!(err, RegisterError::MissingEntity(EntityId(999)));
    }

    #[test]
    fn test_single_tick_demolition() {
        let (mut scene, mut controller, wall) = setup(config(4, 1));
        assert!(controller.demolish(&mut scene, wall));
        assert_eq!(controller.fragments(wall).len(), 4);
        assert!(!scene.is_active(wall));
        let root = scene.find_by_name("wall_root")[0];
        assert_eq!(scene.transform(root).translation, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(scene.parent(root), controller.container());
        assert_eq!(scene.find_by_name("wall_sh_1").len(), 1);
    }

    #[test]
    fn test_second_call_is_noop() {
        let (mut scene, mut controller, wall) = setup(config(4, 1));
        assert!(controller.demolish(&mut scene, wall));
        let count = scene.len();
        assert!(controller.demolish(&mut scene, wall));
        assert_eq!(scene.len(), count);
    }

    #[test]
    fn test_fragment_depth_and_materials() {
        let mut cfg = config(10, 1);
        cfg.materials.outer = Some("brick".into());
        let (mut scene, mut controller, wall) = setup(cfg);
        controller.demolish(&mut scene, wall);
        let shard = controller.fragments(wall)[0];
        let child = controller.record(shard).unwrap();
        assert_eq!(child.config.limitations.current_depth, 1);
        assert_eq!(child.config.fragmentation.amount, 5);
        assert_eq!(child.config.materials.outer, None);
    }

    #[test]
    fn test_depth_limit_blocks_demolition() {
        let mut cfg = config(4, 1);
        cfg.limitations.max_depth = 1;
        cfg.limitations.current_depth = 1;
        let (mut scene, mut controller, wall) = setup(cfg);
        assert!(controller.demolish(&mut scene, wall));
        assert!(controller.fragments(wall).is_empty());
        assert!(scene.is_active(wall));
    }

    #[test]
    fn test_slice_spawns_two_halves() {
        let (mut scene, mut controller, wall) = setup(config(4, 1));
        assert!(controller.slice(&mut scene, wall, SlicePlane::new(Vec3::ZERO, Vec3::X)));
        assert_eq!(controller.fragments(wall).len(), 2);
        assert!(controller.record(wall).unwrap().demolished);
    }

    #[test]
    fn test_slice_with_degenerate_plane_fails() {
        let (mut scene, mut controller, wall) = setup(config(4, 1));
        assert!(!controller.slice(&mut scene, wall, SlicePlane::new(Vec3::ZERO, Vec3::ZERO)));
        assert!(controller.fragments(wall).is_empty());
    }
}
