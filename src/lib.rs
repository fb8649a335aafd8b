//! Mesh Demolition - Runtime Fragmentation Core
//!
//! This crate provides the deterministic demolition pipeline:
//! - Batch scheduling (fragment caching spread over ticks)
//! - Geometry filters (coplanar, size and budget removal)
//! - Demolition orchestration (caching, instantiation, depth propagation)
//! - Cluster conversion transaction (with rollback)
//! - Connectivity graph over fragment bounds
//! - Bevy plugin and bevy_rapier3d bodies for spawned fragments

pub mod cluster;
pub mod config;
pub mod connectivity;
pub mod constants;
pub mod demolition;
pub mod error;
pub mod filters;
pub mod fragmenter;
pub mod geometry;
pub mod logging;
pub mod physics;
pub mod plugin;
pub mod scene;
pub mod scheduler;

pub use cluster::{ClusterOutcome, ShardReport};
pub use config::DemolitionConfig;
pub use demolition::{DemolitionController, DemolitionPoll};
pub use fragmenter::{BoundsFragmenter, FragmentationEngine};
pub use geometry::{FragmentMesh, SlicePlane};
pub use plugin::DemolitionPlugin;
pub use scene::{EntityId, MemoryScene, ObjectKind, SceneHost};
