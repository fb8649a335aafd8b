//! Demolition configuration
//!
//! Serializable per-entity settings. Loaded from JSON or RON, validated once
//! when an entity is registered with the controller.

use std::path::Path;

use bevy::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{
    CONTACT_TOLERANCE, DEFAULT_CACHE_TICKS, DEFAULT_DEPTH_DECAY, DEFAULT_FILTER_ITERATIONS,
    DEFAULT_FRAGMENT_AMOUNT, MIN_FRAGMENT_AMOUNT,
};
use crate::error::ConfigError;
use crate::logging::TracingConfig;

/// When and how an entity gets demolished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemolitionType {
    /// Never demolished.
    None,
    /// Fragments are cached across ticks on first demolition request.
    Runtime,
    /// Fragment meshes are cached at initialization, spawned on demolition.
    AwakePrecache,
    /// Fragments are spawned (inactive) at initialization.
    AwakePrefragment,
    /// Fragments belong to a shared template, not to this instance.
    Reference,
}

/// What fragments turn into after they are spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionMode {
    Disabled,
    ConnectedCluster,
    Connectivity,
}

/// Physics behavior of a spawned body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationType {
    /// Use the parent's simulation type.
    Inherit,
    Dynamic,
    Sleeping,
    Inactive,
    Kinematic,
    Static,
}

impl SimulationType {
    /// `Inherit` defers to the parent; any other value wins outright.
    pub fn resolve(self, parent: SimulationType) -> SimulationType {
        match self {
            SimulationType::Inherit => parent,
            own => own,
        }
    }
}

/// How a job's total fragment amount is split into per-tick batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStrategy {
    ByTickCount(u32),
    ByBucketSize(u32),
}

impl Default for PlanStrategy {
    fn default() -> Self {
        PlanStrategy::ByTickCount(DEFAULT_CACHE_TICKS)
    }
}

/// Parameters handed to the fragmentation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentationParams {
    pub amount: u32,
    pub variation_percent: u32,
    pub seed: u64,
    pub bias: f32,
    pub depth: u32,
}

impl Default for FragmentationParams {
    fn default() -> Self {
        Self {
            amount: DEFAULT_FRAGMENT_AMOUNT,
            variation_percent: 0,
            seed: 1,
            bias: 0.0,
            depth: 0,
        }
    }
}

/// Geometry filter switches and budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub remove_coplanar: bool,
    /// Drop fragments whose bounds diagonal is below this absolute size.
    pub absolute_size: Option<f32>,
    /// Drop fragments smaller than this percentage of the source diagonal.
    pub relative_size_percent: Option<f32>,
    pub max_size: Option<f32>,
    pub max_vertices: Option<usize>,
    pub max_triangles: Option<usize>,
    /// Cap on repeated passes of each budget check.
    pub iteration_cap: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            remove_coplanar: true,
            absolute_size: None,
            relative_size_percent: None,
            max_size: None,
            max_vertices: None,
            max_triangles: None,
            iteration_cap: DEFAULT_FILTER_ITERATIONS,
        }
    }
}

/// Depth bookkeeping across demolition levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limitations {
    /// Deepest level that may still be demolished; 0 means unlimited.
    pub max_depth: u32,
    pub current_depth: u32,
    /// Amount multiplier applied to each deeper level.
    pub depth_decay: f32,
}

impl Default for Limitations {
    fn default() -> Self {
        Self {
            max_depth: 0,
            current_depth: 0,
            depth_decay: DEFAULT_DEPTH_DECAY,
        }
    }
}

impl Limitations {
    pub fn can_demolish(&self) -> bool {
        self.max_depth == 0 || self.current_depth < self.max_depth
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialSlots {
    pub inner: Option<String>,
    pub outer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// Gap under which two fragments count as attached.
    pub tolerance: f32,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            tolerance: CONTACT_TOLERANCE,
        }
    }
}

/// Unyielding marker pinning the cluster pieces it overlaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorMarker {
    pub enabled: bool,
    pub center: [f32; 3],
    pub half_extents: [f32; 3],
}

impl AnchorMarker {
    pub fn center(&self) -> Vec3 {
        Vec3::from_array(self.center)
    }

    pub fn half_extents(&self) -> Vec3 {
        Vec3::from_array(self.half_extents)
    }
}

/// Complete per-entity demolition configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemolitionConfig {
    pub demolition_type: DemolitionType,
    pub conversion: ConversionMode,
    pub simulation: SimulationType,
    pub fragmentation: FragmentationParams,
    pub schedule: PlanStrategy,
    pub filters: FilterConfig,
    pub limitations: Limitations,
    pub materials: MaterialSlots,
    pub connectivity: Option<ConnectivityConfig>,
    pub anchors: Vec<AnchorMarker>,
    /// Radius around the contact point inside which cluster pieces detach.
    pub impact_radius: f32,
}

impl Default for DemolitionConfig {
    fn default() -> Self {
        Self {
            demolition_type: DemolitionType::Runtime,
            conversion: ConversionMode::Disabled,
            simulation: SimulationType::Dynamic,
            fragmentation: FragmentationParams::default(),
            schedule: PlanStrategy::default(),
            filters: FilterConfig::default(),
            limitations: Limitations::default(),
            materials: MaterialSlots::default(),
            connectivity: None,
            anchors: Vec::new(),
            impact_radius: 1.0,
        }
    }
}

impl DemolitionConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Load from a `.json` or `.ron` file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_config(path)
    }

    /// Repairs settings that cannot work as given. Returns the names of
    /// every setting that was changed.
    pub fn validate(&mut self) -> Vec<&'static str> {
        let mut fixed = Vec::new();

        if self.conversion == ConversionMode::Connectivity && self.connectivity.is_none() {
            warn!("connectivity conversion requested without a connectivity component, conversion disabled");
            self.conversion = ConversionMode::Disabled;
            fixed.push("conversion");
        }

        if self.fragmentation.amount < MIN_FRAGMENT_AMOUNT {
            self.fragmentation.amount = MIN_FRAGMENT_AMOUNT;
            fixed.push("fragmentation.amount");
        }

        match &mut self.schedule {
            PlanStrategy::ByTickCount(n) | PlanStrategy::ByBucketSize(n) if *n == 0 => {
                *n = 1;
                fixed.push("schedule");
            }
            _ => {}
        }

        if self.filters.iteration_cap == 0 {
            self.filters.iteration_cap = 1;
            fixed.push("filters.iteration_cap");
        }

        if !(self.limitations.depth_decay > 0.0) {
            self.limitations.depth_decay = DEFAULT_DEPTH_DECAY;
            fixed.push("limitations.depth_decay");
        }

        fixed
    }
}

/// Settings for a standalone run: how to log and how to demolish.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub logging: TracingConfig,
    pub demolition: DemolitionConfig,
}

impl RunConfig {
    /// Load from a `.json` or `.ron` file. Missing sections keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_config(path)
    }
}

fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(serde_json::from_str(&text)?),
        Some("ron") => Ok(ron::from_str(&text)?),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or_default().to_string(),
        )),
    }
}
