//! Scenario tests driving `DemolitionController` over `MemoryScene`.
//!
//! Covers:
//! - Multi-tick caching, same-tick rejection, cancellation
//! - Terminal failures (unsupported engine) and no-op kinds
//! - Awake precache / prefragment paths and reactivation
//! - Cluster conversion outcomes (absorbed, detached shards, rollback)
//! - Child absorption with simulation inheritance
//! - Connectivity conversion and configuration loading

use std::ops::Range;
use std::sync::Arc;

use bevy::prelude::*;

use mesh_demolition::cluster::{ClusterDemolisher, ClusterOutcome, ClusterView, ShardReport};
use mesh_demolition::config::{
    ConnectivityConfig, ConversionMode, DemolitionConfig, DemolitionType, FragmentationParams, PlanStrategy,
    SimulationType,
};
use mesh_demolition::demolition::{DemolitionController, DemolitionPoll};
use mesh_demolition::error::{ClusterError, EngineError};
use mesh_demolition::fragmenter::{cache_key, BoundsFragmenter, FragmentationEngine};
use mesh_demolition::geometry::{Bounds, FragmentMesh};
use mesh_demolition::scene::{EntityId, MemoryScene, ObjectKind, SceneHost};

// ============================================================
// Fixtures
// ============================================================

fn config(amount: u32, ticks: u32) -> DemolitionConfig {
    let mut config = DemolitionConfig::default();
    config.fragmentation.amount = amount;
    config.schedule = PlanStrategy::ByTickCount(ticks);
    config
}

fn wall_mesh() -> FragmentMesh {
    FragmentMesh::cuboid(Vec3::ZERO, Vec3::new(3.0, 1.0, 0.5))
}

fn setup_with(controller: DemolitionController, config: DemolitionConfig) -> (MemoryScene, DemolitionController, EntityId) {
    let mut controller = controller;
    let mut scene = MemoryScene::new();
    let wall = scene.spawn_mesh("wall", wall_mesh(), Transform::from_xyz(0.0, 1.0, 0.0));
    controller.register(&scene, wall, config).unwrap();
    (scene, controller, wall)
}

fn setup(config: DemolitionConfig) -> (MemoryScene, DemolitionController, EntityId) {
    setup_with(DemolitionController::new(Box::new(BoundsFragmenter)), config)
}

/// Polls once per tick until done, returning the number of ticks used.
fn demolish_to_completion(scene: &mut MemoryScene, controller: &mut DemolitionController, entity: EntityId) -> usize {
    for tick in 1..=32 {
        if controller.demolish(scene, entity) {
            return tick;
        }
        controller.advance_tick();
    }
    panic!("demolition did not finish");
}

/// Mesh bounds placed by the entity's global translation.
fn world_bounds(scene: &MemoryScene, id: EntityId) -> Bounds {
    let mesh = scene.mesh(id).unwrap();
    mesh.local_bounds().translated(scene.global_transform(id).translation)
}

fn assert_inside(inner: Bounds, outer: Bounds) {
    let eps = Vec3::splat(1e-3);
    assert!(
        inner.min.cmpge(outer.min - eps).all() && inner.max.cmple(outer.max + eps).all(),
        "{inner:?} is not inside {outer:?}"
    );
}

struct NoPlatform;

impl FragmentationEngine for NoPlatform {
    fn is_supported(&self) -> bool {
        false
    }

    fn produce(
        &self,
        _source: &FragmentMesh,
        _params: &FragmentationParams,
        _indices: Range<usize>,
    ) -> Result<Vec<FragmentMesh>, EngineError> {
        Err(EngineError::Unsupported)
    }
}

/// Detaches the first `n` pieces of every cluster.
struct DetachFirst(usize);

impl ClusterDemolisher for DetachFirst {
    fn demolish_connected_cluster(&self, view: &ClusterView<'_>) -> Result<ShardReport, ClusterError> {
        Ok(ShardReport {
            detached: view.data.pieces.iter().take(self.0).map(|p| p.entity).collect(),
            fully_demolished: false,
        })
    }
}

struct FullyDemolished;

impl ClusterDemolisher for FullyDemolished {
    fn demolish_connected_cluster(&self, _view: &ClusterView<'_>) -> Result<ShardReport, ClusterError> {
        Ok(ShardReport {
            detached: Vec::new(),
            fully_demolished: true,
        })
    }
}

struct Broken;

impl ClusterDemolisher for Broken {
    fn demolish_connected_cluster(&self, view: &ClusterView<'_>) -> Result<ShardReport, ClusterError> {
        Err(ClusterError::NotInitialized(view.cluster))
    }
}

fn cluster_controller(demolisher: Box<dyn ClusterDemolisher>) -> DemolitionController {
    DemolitionController::new(Box::new(BoundsFragmenter)).with_cluster_demolisher(demolisher)
}

fn cluster_config() -> DemolitionConfig {
    let mut config = config(5, 1);
    config.conversion = ConversionMode::ConnectedCluster;
    config
}

// ============================================================
// Scheduling
// ============================================================

#[test]
fn test_caching_spreads_over_ticks() {
    let (mut scene, mut controller, wall) = setup(config(9, 3));

    assert!(!controller.demolish(&mut scene, wall));
    controller.advance_tick();
    assert!(!controller.demolish(&mut scene, wall));
    controller.advance_tick();
    assert!(controller.demolish(&mut scene, wall));

    assert_eq!(controller.fragments(wall).len(), 9);
    let record = controller.record(wall).unwrap();
    assert!(record.demolished);
    assert!(record.job.is_none());
    assert_eq!(record.cache.as_ref().unwrap().meshes.len(), 9);
    assert!(!scene.is_active(wall));
}

#[test]
fn test_bucket_schedule_tick_count() {
    let mut cfg = config(10, 1);
    cfg.schedule = PlanStrategy::ByBucketSize(4);
    let (mut scene, mut controller, wall) = setup(cfg);
    assert_eq!(demolish_to_completion(&mut scene, &mut controller, wall), 3);
    assert_eq!(controller.fragments(wall).len(), 10);
}

#[test]
fn test_second_request_in_same_tick_is_rejected() {
    let (mut scene, mut controller, wall) = setup(config(9, 3));

    assert_eq!(controller.poll(&mut scene, wall), DemolitionPoll::Busy);
    assert_eq!(controller.poll(&mut scene, wall), DemolitionPoll::Busy);
    let job = controller.record(wall).unwrap().job.as_ref().unwrap();
    assert_eq!(job.batches_done(), 1);

    controller.advance_tick();
    assert_eq!(controller.poll(&mut scene, wall), DemolitionPoll::Busy);
    let job = controller.record(wall).unwrap().job.as_ref().unwrap();
    assert_eq!(job.batches_done(), 2);
}

#[test]
fn test_cancellation_discards_job() {
    let (mut scene, mut controller, wall) = setup(config(9, 3));
    assert!(!controller.cancel(wall));

    assert_eq!(controller.poll(&mut scene, wall), DemolitionPoll::Busy);
    assert!(controller.cancel(wall));
    controller.advance_tick();
    assert_eq!(controller.poll(&mut scene, wall), DemolitionPoll::Cancelled);

    let record = controller.record(wall).unwrap();
    assert!(record.job.is_none());
    assert!(record.fragments.is_empty());
    assert!(!record.demolished);
    assert!(scene.is_active(wall));

    // a fresh request starts over
    controller.advance_tick();
    assert_eq!(controller.poll(&mut scene, wall), DemolitionPoll::Busy);
    let job = controller.record(wall).unwrap().job.as_ref().unwrap();
    assert_eq!(job.batches_done(), 1);
}

// ============================================================
// Terminal and no-op cases
// ============================================================

#[test]
fn test_unsupported_engine_gives_up() {
    let (mut scene, mut controller, wall) =
        setup_with(DemolitionController::new(Box::new(NoPlatform)), config(6, 2));

    assert!(controller.demolish(&mut scene, wall));
    let record = controller.record(wall).unwrap();
    assert!(record.given_up);
    assert!(!record.demolished);
    assert!(scene.is_active(wall));

    controller.advance_tick();
    assert_eq!(controller.poll(&mut scene, wall), DemolitionPoll::Failed);
    assert_eq!(scene.len(), 1);
}

#[test]
fn test_reference_and_none_types_are_noops() {
    for demolition_type in [DemolitionType::Reference, DemolitionType::None] {
        let mut cfg = config(6, 1);
        cfg.demolition_type = demolition_type;
        let (mut scene, mut controller, wall) = setup(cfg);
        assert!(controller.demolish(&mut scene, wall));
        assert!(controller.fragments(wall).is_empty());
        assert_eq!(scene.len(), 1);
    }
}

#[test]
fn test_non_mesh_kind_is_noop() {
    let mut scene = MemoryScene::new();
    let node = scene.spawn("empty", ObjectKind::Node);
    let mut controller = DemolitionController::new(Box::new(BoundsFragmenter));
    controller.register(&scene, node, config(6, 1)).unwrap();
    assert!(controller.demolish(&mut scene, node));
    assert!(controller.fragments(node).is_empty());
}

#[test]
fn test_unregistered_entity_is_noop() {
    let mut scene = MemoryScene::new();
    let mut controller = DemolitionController::new(Box::new(BoundsFragmenter));
    assert_eq!(controller.poll(&mut scene, EntityId(7)), DemolitionPoll::Complete);
}

// ============================================================
// Depth propagation
// ============================================================

#[test]
fn test_fragments_demolish_one_level_deeper() {
    let (mut scene, mut controller, wall) = setup(config(8, 1));
    assert!(controller.demolish(&mut scene, wall));

    let shard = controller.fragments(wall)[0];
    let record = controller.record(shard).unwrap();
    assert_eq!(record.config.limitations.current_depth, 1);
    assert_eq!(record.config.fragmentation.amount, 4);

    controller.advance_tick();
    assert!(controller.demolish(&mut scene, shard));
    let pieces = controller.fragments(shard);
    assert_eq!(pieces.len(), 4);
    let piece = controller.record(pieces[0]).unwrap();
    assert_eq!(piece.config.limitations.current_depth, 2);
    assert_eq!(piece.config.fragmentation.amount, 3);
}

#[test]
fn test_deeper_fragments_stay_inside_their_shard() {
    let (mut scene, mut controller, wall) = setup(config(4, 1));
    assert!(controller.demolish(&mut scene, wall));

    let wall_bounds = wall_mesh().local_bounds().translated(Vec3::new(0.0, 1.0, 0.0));
    for shard in controller.fragments(wall).to_vec() {
        let shard_bounds = world_bounds(&scene, shard);
        assert_inside(shard_bounds, wall_bounds);

        controller.advance_tick();
        assert!(controller.demolish(&mut scene, shard));
        let pieces = controller.fragments(shard).to_vec();
        assert_eq!(pieces.len(), 3);
        for piece in pieces {
            assert_inside(world_bounds(&scene, piece), shard_bounds);
        }
    }
}

#[test]
fn test_completed_job_is_cached_under_its_starting_mesh() {
    let cfg = config(6, 3);
    let params = cfg.fragmentation.clone();
    let (mut scene, mut controller, wall) = setup(cfg);

    assert!(!controller.demolish(&mut scene, wall));
    let replacement = FragmentMesh::cuboid(Vec3::ZERO, Vec3::splat(2.0));
    scene.set_mesh(wall, Some(Arc::new(replacement.clone())));
    demolish_to_completion(&mut scene, &mut controller, wall);

    let cache = controller.record(wall).unwrap().cache.as_ref().unwrap();
    assert_eq!(cache.key, cache_key(&wall_mesh(), &params));
    assert_ne!(cache.key, cache_key(&replacement, &params));
}

#[test]
fn test_depth_limit_stops_recursion() {
    let mut cfg = config(6, 1);
    cfg.limitations.max_depth = 1;
    let (mut scene, mut controller, wall) = setup(cfg);
    assert!(controller.demolish(&mut scene, wall));

    let shard = controller.fragments(wall)[0];
    assert!(controller.demolish(&mut scene, shard));
    assert!(controller.fragments(shard).is_empty());
    assert!(scene.is_active(shard));
}

// ============================================================
// Awake paths
// ============================================================

#[test]
fn test_precache_spawns_on_first_request() {
    let mut cfg = config(6, 3);
    cfg.demolition_type = DemolitionType::AwakePrecache;
    let (mut scene, mut controller, wall) = setup(cfg);

    assert!(controller.initialize(&mut scene, wall));
    assert!(controller.fragments(wall).is_empty());
    assert_eq!(controller.record(wall).unwrap().cache.as_ref().unwrap().meshes.len(), 6);

    assert!(controller.demolish(&mut scene, wall));
    assert_eq!(controller.fragments(wall).len(), 6);
}

#[test]
fn test_stale_cache_is_rebuilt() {
    let mut cfg = config(6, 3);
    cfg.demolition_type = DemolitionType::AwakePrecache;
    let (mut scene, mut controller, wall) = setup(cfg);
    assert!(controller.initialize(&mut scene, wall));

    scene.set_mesh(wall, Some(Arc::new(FragmentMesh::cuboid(Vec3::ZERO, Vec3::splat(2.0)))));
    assert!(!controller.demolish(&mut scene, wall));
    assert!(controller.record(wall).unwrap().cache.is_none());
    assert_eq!(demolish_to_completion(&mut scene, &mut controller, wall), 3);
    assert_eq!(controller.fragments(wall).len(), 6);
}

#[test]
fn test_prefragment_reactivation() {
    let mut cfg = config(4, 2);
    cfg.demolition_type = DemolitionType::AwakePrefragment;
    let (mut scene, mut controller, wall) = setup(cfg);

    assert!(controller.initialize(&mut scene, wall));
    let fragments = controller.fragments(wall).to_vec();
    assert_eq!(fragments.len(), 4);
    let root = controller.record(wall).unwrap().fragments_root.unwrap();
    assert!(!scene.is_active(root));
    assert!(scene.is_active(wall));
    assert!(fragments.iter().all(|f| !scene.has_physics(*f)));
    assert!(controller.record(wall).unwrap().pending_startup);

    scene.set_transform(wall, Transform::from_xyz(5.0, 0.0, -2.0));
    assert!(controller.demolish(&mut scene, wall));

    assert!(scene.is_active(root));
    assert!(!scene.is_active(wall));
    assert_eq!(scene.parent(root), controller.container());
    assert_eq!(scene.transform(root).translation, Vec3::new(5.0, 0.0, -2.0));
    assert!(fragments
        .iter()
        .all(|f| scene.physics(*f) == Some(SimulationType::Dynamic)));
    let record = controller.record(wall).unwrap();
    assert!(record.demolished);
    assert!(!record.pending_startup);
    // fragment configs never keep the awake type
    assert_eq!(
        controller.record(fragments[0]).unwrap().config.demolition_type,
        DemolitionType::Runtime
    );
}

#[test]
fn test_prefragment_cluster_keeps_fragments_stripped() {
    let mut cfg = cluster_config();
    cfg.demolition_type = DemolitionType::AwakePrefragment;
    let (mut scene, mut controller, wall) = setup_with(cluster_controller(Box::new(Broken)), cfg);

    assert!(controller.initialize(&mut scene, wall));
    let record = controller.record(wall).unwrap();
    let Some(ClusterOutcome::Prefragmented { cluster }) = record.conversion.clone() else {
        panic!("expected an awake cluster conversion");
    };
    let fragments = record.fragments.clone();

    assert!(controller.demolish(&mut scene, wall));
    assert!(fragments.iter().all(|f| !scene.has_physics(*f)));
    assert!(fragments.iter().all(|f| !controller.is_registered(*f)));
    assert!(scene.has_physics(cluster));
    assert!(scene.is_active_in_hierarchy(cluster));
}

// ============================================================
// Cluster conversion
// ============================================================

#[test]
fn test_cluster_absorbs_all_without_shards() {
    let (mut scene, mut controller, wall) = setup_with(cluster_controller(Box::new(DetachFirst(0))), cluster_config());
    assert!(controller.demolish(&mut scene, wall));

    let record = controller.record(wall).unwrap();
    let Some(ClusterOutcome::Absorbed { cluster: Some(cluster) }) = record.conversion.clone() else {
        panic!("expected absorption");
    };
    assert_eq!(record.fragments.len(), 5);
    for fragment in &record.fragments {
        assert!(!scene.has_physics(*fragment));
        assert!(!controller.is_registered(*fragment));
    }
    assert_eq!(scene.kind(cluster), Some(ObjectKind::ConnectedCluster));
    assert_eq!(record.cluster_entity, Some(cluster));
    let data = controller.record(cluster).unwrap().cluster.as_ref().unwrap();
    assert_eq!(data.len(), 5);
}

#[test]
fn test_fully_demolished_cluster_is_destroyed() {
    let (mut scene, mut controller, wall) = setup_with(cluster_controller(Box::new(FullyDemolished)), cluster_config());
    assert!(controller.demolish(&mut scene, wall));

    let record = controller.record(wall).unwrap();
    assert_eq!(record.conversion, Some(ClusterOutcome::Absorbed { cluster: None }));
    assert!(scene.find_by_name("wall_cluster").is_empty());
    assert!(record.fragments.iter().all(|f| !scene.has_physics(*f)));
}

#[test]
fn test_detached_shards_stay_independent() {
    let (mut scene, mut controller, wall) = setup_with(cluster_controller(Box::new(DetachFirst(2))), cluster_config());
    let all_before = scene.len();
    assert!(controller.demolish(&mut scene, wall));
    assert!(scene.len() > all_before);

    let record = controller.record(wall).unwrap();
    let Some(ClusterOutcome::Detached { cluster, shards }) = record.conversion.clone() else {
        panic!("expected detached shards");
    };
    assert!(cluster.is_some());
    assert_eq!(shards.len(), 2);
    assert_eq!(record.fragments, shards);

    let spawned: Vec<EntityId> = (1..=5)
        .map(|i| scene.find_by_name(&format!("wall_sh_{i}"))[0])
        .collect();
    let with_physics: Vec<EntityId> = spawned.iter().copied().filter(|f| scene.has_physics(*f)).collect();
    assert_eq!(with_physics, shards);
    for id in &spawned[2..] {
        assert!(!controller.is_registered(*id));
    }
}

#[test]
fn test_failed_cluster_demolition_rolls_back() {
    let (mut scene, mut controller, wall) = setup_with(cluster_controller(Box::new(Broken)), cluster_config());
    assert!(controller.demolish(&mut scene, wall));

    let record = controller.record(wall).unwrap();
    assert!(matches!(
        record.conversion,
        Some(ClusterOutcome::RolledBack(ClusterError::NotInitialized(_)))
    ));
    assert!(scene.find_by_name("wall_cluster").is_empty());
    assert_eq!(record.fragments.len(), 5);
    assert!(record.fragments.iter().all(|f| scene.has_physics(*f)));
    assert!(record.fragments.iter().all(|f| controller.is_registered(*f)));
    assert_eq!(record.cluster_entity, None);
}

// ============================================================
// Child absorption
// ============================================================

#[test]
fn test_mesh_children_become_fragments() {
    let mut cfg = config(4, 1);
    cfg.simulation = SimulationType::Kinematic;
    cfg.materials.outer = Some("plaster".into());
    let mut scene = MemoryScene::new();
    let wall = scene.spawn_mesh("wall", wall_mesh(), Transform::IDENTITY);
    let plaque = scene.spawn_mesh(
        "plaque",
        FragmentMesh::cuboid(Vec3::ZERO, Vec3::splat(0.2)),
        Transform::from_xyz(0.0, 0.0, 0.6),
    );
    let statue = scene.spawn_mesh(
        "statue",
        FragmentMesh::cuboid(Vec3::ZERO, Vec3::splat(0.3)),
        Transform::from_xyz(1.0, 0.0, 0.6),
    );
    let marker = scene.spawn("marker", ObjectKind::Node);
    for child in [plaque, statue, marker] {
        scene.set_parent(child, Some(wall));
    }

    let mut controller = DemolitionController::new(Box::new(BoundsFragmenter));
    controller.register(&scene, wall, cfg).unwrap();
    let mut statue_cfg = config(4, 1);
    statue_cfg.simulation = SimulationType::Static;
    controller.register(&scene, statue, statue_cfg).unwrap();

    assert!(controller.demolish(&mut scene, wall));
    let fragments = controller.fragments(wall);
    assert_eq!(fragments.len(), 6);
    assert!(fragments.contains(&plaque) && fragments.contains(&statue));
    assert!(!fragments.contains(&marker));

    let root = controller.record(wall).unwrap().fragments_root.unwrap();
    assert_eq!(scene.parent(plaque), Some(root));
    assert_eq!(scene.parent(marker), Some(wall));
    assert_eq!(scene.transform(plaque).translation, Vec3::new(0.0, 0.0, 0.6));

    assert_eq!(
        controller.record(plaque).unwrap().config.simulation,
        SimulationType::Kinematic
    );
    assert_eq!(scene.physics(plaque), Some(SimulationType::Kinematic));
    assert_eq!(scene.physics(statue), Some(SimulationType::Static));
    assert_eq!(scene.physics(fragments[0]), Some(SimulationType::Kinematic));

    // absorbed children get the same depth propagation as spawned fragments
    for absorbed in [plaque, statue] {
        let child = &controller.record(absorbed).unwrap().config;
        assert_eq!(child.limitations.current_depth, 1);
        assert_eq!(child.fragmentation.amount, 3);
        assert_eq!(child.materials.outer, None);
    }
}

// ============================================================
// Connectivity
// ============================================================

#[test]
fn test_connectivity_mode_builds_mesh_root() {
    let mut cfg = config(4, 1);
    cfg.conversion = ConversionMode::Connectivity;
    cfg.connectivity = Some(ConnectivityConfig::default());
    let (mut scene, mut controller, wall) = setup(cfg);
    assert!(controller.demolish(&mut scene, wall));

    let record = controller.record(wall).unwrap();
    let mesh_root = record.mesh_root.unwrap();
    assert_eq!(record.conversion, Some(ClusterOutcome::Connectivity { mesh_root }));
    assert!(scene.is_active(mesh_root));
    assert_eq!(scene.children(mesh_root).len(), 4);
    let graph = record.connectivity_graph.as_ref().unwrap();
    assert_eq!(graph.len(), 4);
    assert_eq!(graph.edge_count(), 3);
    assert_eq!(graph.component_count(), 1);
    for fragment in &record.fragments {
        assert!(controller.record(*fragment).unwrap().connectivity_member);
    }
}

#[test]
fn test_connectivity_without_component_is_disabled() {
    let mut cfg = config(4, 1);
    cfg.conversion = ConversionMode::Connectivity;
    let (mut scene, mut controller, wall) = setup(cfg);
    assert_eq!(
        controller.record(wall).unwrap().config.conversion,
        ConversionMode::Disabled
    );
    assert!(controller.demolish(&mut scene, wall));
    let record = controller.record(wall).unwrap();
    assert!(record.mesh_root.is_none());
    assert!(record.conversion.is_none());
    assert_eq!(record.fragments.len(), 4);
}

// ============================================================
// Configuration files
// ============================================================

#[test]
fn test_config_loads_from_json_and_ron_files() {
    let dir = tempfile::tempdir().unwrap();

    let mut expected = config(12, 4);
    expected.conversion = ConversionMode::ConnectedCluster;
    expected.simulation = SimulationType::Sleeping;

    let json_path = dir.path().join("wall.json");
    std::fs::write(&json_path, expected.to_json()).unwrap();
    assert_eq!(DemolitionConfig::load(&json_path).unwrap(), expected);

    let ron_path = dir.path().join("wall.ron");
    std::fs::write(
        &ron_path,
        "(fragmentation: (amount: 12, variation_percent: 0, seed: 1, bias: 0.0, depth: 0), \
         schedule: ByTickCount(4), conversion: ConnectedCluster, simulation: Sleeping)",
    )
    .unwrap();
    assert_eq!(DemolitionConfig::load(&ron_path).unwrap(), expected);

    let other = dir.path().join("wall.toml");
    std::fs::write(&other, "").unwrap();
    assert!(DemolitionConfig::load(&other).is_err());
    assert!(DemolitionConfig::load(&dir.path().join("missing.json")).is_err());
}
