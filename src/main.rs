use std::path::PathBuf;

use anyhow::Context;
use bevy::prelude::*;

use mesh_demolition::config::{ConversionMode, RunConfig};
use mesh_demolition::demolition::ContactInfo;
use mesh_demolition::logging::{init_tracing, LoggingPlugin};
use mesh_demolition::plugin::{DemolishRequest, DemolitionFinished, DemolitionResource, DemolitionWorld};
use mesh_demolition::{DemolitionPlugin, FragmentMesh};

/// Frames to run before giving up on the demo wall.
const MAX_FRAMES: usize = 64;

fn main() -> anyhow::Result<()> {
    let run = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => RunConfig::load(&path)
            .with_context(|| format!("loading run config from {}", path.display()))?,
        None => {
            let mut run = RunConfig::default();
            run.demolition.conversion = ConversionMode::ConnectedCluster;
            run.demolition.fragmentation.amount = 12;
            run
        }
    };
    // installed before LoggingPlugin so these levels win
    init_tracing(&run.logging);
    let config = run.demolition;

    let mut app = App::new();
    app.add_plugins((LoggingPlugin, DemolitionPlugin))
        .add_systems(Update, report_finished);
    app.finish();
    app.cleanup();

    let wall = {
        let res = app.world().resource::<DemolitionResource>().0.clone();
        let mut world = res
            .write()
            .map_err(|_| anyhow::anyhow!("demolition world lock poisoned"))?;
        let DemolitionWorld { scene, controller, .. } = &mut *world;
        let wall = scene.spawn_mesh(
            "wall",
            FragmentMesh::cuboid(Vec3::ZERO, Vec3::new(3.0, 2.0, 0.25)),
            Transform::from_xyz(0.0, 2.0, 0.0),
        );
        controller
            .register(&*scene, wall, config)
            .context("registering demo wall")?;
        controller.set_contact(
            wall,
            ContactInfo {
                point: Vec3::new(-2.5, 2.0, 0.0),
                normal: Vec3::Z,
                impulse: 50.0,
            },
        );
        wall
    };

    app.world_mut().send_event(DemolishRequest { entity: wall });
    for frame in 0..MAX_FRAMES {
        app.update();
        let res = app.world().resource::<DemolitionResource>().0.clone();
        let done = res.read().map(|w| w.pending().is_empty()).unwrap_or(true);
        if done {
            info!(frames = frame + 1, "demo finished");
            return Ok(());
        }
    }
    anyhow::bail!("wall was not demolished within {MAX_FRAMES} frames")
}

fn report_finished(mut finished: EventReader<DemolitionFinished>) {
    for event in finished.read() {
        info!(
            entity = ?event.entity,
            outcome = ?event.outcome,
            bodies = event.fragments.len(),
            cluster = ?event.cluster,
            "demolition finished"
        );
    }
}
