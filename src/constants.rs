//! Centralized demolition constants.
//!
//! Thresholds shared by the filter pipeline, the scheduler and the
//! orchestrator. Per-module tuning defaults live next to their config types.

// =====================================================
// Geometry
// =====================================================

/// Distance under which two vertices count as the same point, and the
/// maximum plane distance for a vertex to count as lying on a plane.
pub const COPLANAR_THRESHOLD: f32 = 0.01;

/// Tolerance used when testing fragment bounds for contact.
pub const CONTACT_TOLERANCE: f32 = 0.01;

// =====================================================
// Fragmentation
// =====================================================

/// Smallest fragment amount any demolition level may request.
pub const MIN_FRAGMENT_AMOUNT: u32 = 3;

/// Default amount multiplier applied per depth level.
pub const DEFAULT_DEPTH_DECAY: f32 = 0.5;

/// Default fragment amount for a fresh configuration.
pub const DEFAULT_FRAGMENT_AMOUNT: u32 = 15;

/// Default number of ticks a caching job is spread over.
pub const DEFAULT_CACHE_TICKS: u32 = 3;

// =====================================================
// Filtering
// =====================================================

/// Default cap on budget limitation passes. Each budget check repeats until
/// nothing more is removed or this many passes ran.
pub const DEFAULT_FILTER_ITERATIONS: usize = 3;

// =====================================================
// Naming
// =====================================================

/// Name of the canonical container every fragments root is parented under.
pub const FRAGMENTS_CONTAINER_NAME: &str = "Fragments";

/// Suffix appended to a source name for its fragments root node.
pub const FRAGMENTS_ROOT_SUFFIX: &str = "_root";

/// Infix used when naming individual fragments (`{source}_sh_{index}`).
pub const FRAGMENT_NAME_INFIX: &str = "_sh_";
