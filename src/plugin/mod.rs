use bevy::prelude::*;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::demolition::{DemolitionController, DemolitionPoll};
use crate::fragmenter::BoundsFragmenter;
use crate::physics::{cluster_physics_bundle, fragment_physics_bundle};
use crate::scene::{EntityId, MemoryScene, SceneHost};

pub struct DemolitionPlugin;

impl Plugin for DemolitionPlugin {
    fn build(&self, app: &mut App) {
        let world = DemolitionWorld::new(DemolitionController::new(Box::new(BoundsFragmenter)));

        app.insert_resource(DemolitionResource(Arc::new(RwLock::new(world))))
            .add_event::<DemolishRequest>()
            .add_event::<DemolitionFinished>()
            .add_systems(
                Update,
                (queue_requests, demolition_tick_system, spawn_fragment_bodies).chain(),
            );
    }
}

/// Scene, controller and the entities waiting on a caching job.
pub struct DemolitionWorld {
    pub scene: MemoryScene,
    pub controller: DemolitionController,
    pending: Vec<EntityId>,
}

impl DemolitionWorld {
    pub fn new(controller: DemolitionController) -> Self {
        Self {
            scene: MemoryScene::new(),
            controller,
            pending: Vec::new(),
        }
    }

    pub fn pending(&self) -> &[EntityId] {
        &self.pending
    }

    /// Queues a demolition. A request for an entity that is already
    /// pending is rejected.
    pub fn request(&mut self, entity: EntityId) -> bool {
        if self.pending.contains(&entity) {
            debug!(entity = ?entity, "demolition already pending, request rejected");
            return false;
        }
        self.pending.push(entity);
        true
    }

    /// One frame: polls every pending entity once and returns the finished ones.
    pub fn tick(&mut self) -> Vec<(EntityId, DemolitionPoll)> {
        self.controller.advance_tick();
        let mut finished = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        for entity in pending {
            let poll = self.controller.poll(&mut self.scene, entity);
            if poll.is_done() {
                finished.push((entity, poll));
            } else {
                self.pending.push(entity);
            }
        }
        finished
    }
}

#[derive(Resource)]
pub struct DemolitionResource(pub Arc<RwLock<DemolitionWorld>>);

#[derive(Event, Debug, Clone, Copy)]
pub struct DemolishRequest {
    pub entity: EntityId,
}

#[derive(Event, Debug, Clone)]
pub struct DemolitionFinished {
    pub entity: EntityId,
    pub outcome: DemolitionPoll,
    /// Fragments that still own a physics body.
    pub fragments: Vec<EntityId>,
    /// Connected cluster standing in for the absorbed fragments.
    pub cluster: Option<EntityId>,
}

/// Links a Bevy entity to the scene fragment it simulates.
#[derive(Component, Debug, Clone, Copy)]
pub struct FragmentBody {
    pub id: EntityId,
}

/// Links a Bevy entity to the connected cluster it simulates.
#[derive(Component, Debug, Clone, Copy)]
pub struct ClusterBody {
    pub id: EntityId,
}

fn queue_requests(mut requests: EventReader<DemolishRequest>, demolition: Res<DemolitionResource>) {
    if let Ok(mut world) = demolition.0.write() {
        for request in requests.read() {
            world.request(request.entity);
        }
    }
}

fn demolition_tick_system(demolition: Res<DemolitionResource>, mut finished: EventWriter<DemolitionFinished>) {
    if let Ok(mut world) = demolition.0.write() {
        for (entity, outcome) in world.tick() {
            let fragments = world
                .controller
                .fragments(entity)
                .iter()
                .copied()
                .filter(|f| world.scene.has_physics(*f))
                .collect();
            let cluster = world
                .controller
                .record(entity)
                .and_then(|r| r.conversion.as_ref())
                .and_then(|c| c.cluster())
                .filter(|c| world.scene.has_physics(*c) && world.scene.is_active_in_hierarchy(*c));
            finished.send(DemolitionFinished {
                entity,
                outcome,
                fragments,
                cluster,
            });
        }
    }
}

fn spawn_fragment_bodies(
    mut commands: Commands,
    mut finished: EventReader<DemolitionFinished>,
    demolition: Res<DemolitionResource>,
) {
    let Ok(world) = demolition.0.read() else {
        return;
    };
    for event in finished.read() {
        for id in &event.fragments {
            let (Some(mesh), Some(simulation)) = (world.scene.mesh(*id), world.scene.physics(*id)) else {
                continue;
            };
            commands.spawn((
                Name::new(world.scene.name(*id).unwrap_or_default()),
                world.scene.global_transform(*id),
                fragment_physics_bundle(&mesh, simulation, world.scene.velocity(*id)),
                FragmentBody { id: *id },
            ));
        }

        let Some(id) = event.cluster else {
            continue;
        };
        let bundle = world
            .controller
            .record(id)
            .and_then(|r| r.cluster.as_ref())
            .zip(world.scene.physics(id))
            .and_then(|(data, simulation)| cluster_physics_bundle(data, simulation, world.scene.velocity(id)));
        let Some(bundle) = bundle else {
            continue;
        };
        debug!(cluster = ?id, "spawning cluster body");
        commands.spawn((
            Name::new(world.scene.name(id).unwrap_or_default()),
            world.scene.global_transform(id),
            bundle,
            ClusterBody { id },
        ));
    }
}
