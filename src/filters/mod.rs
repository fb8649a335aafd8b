//! Geometry filter pipeline
//!
//! Runs once per freshly produced batch, in fixed order:
//! 1. coplanar removal (optional)
//! 2. size-threshold removal (optional)
//! 3. size / vertex / triangle budget limitation of the latest batch
//!
//! Steps 1 and 2 never empty a batch: when a filter would drop every
//! fragment its result is discarded and the batch is kept as produced.

pub mod budget;
pub mod coplanar;

use tracing::debug;

use crate::config::FilterConfig;
use crate::constants::COPLANAR_THRESHOLD;
use crate::geometry::FragmentMesh;

pub use budget::{limit_batch, Budget};
pub use coplanar::is_coplanar;

/// How many fragments each stage removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub coplanar: usize,
    pub undersized: usize,
    pub over_budget: usize,
}

impl FilterReport {
    pub fn total(&self) -> usize {
        self.coplanar + self.undersized + self.over_budget
    }
}

/// Keeps the fragments matching `keep`, unless none would remain.
/// Returns the number removed.
fn retain_or_keep_all<F>(fragments: &mut Vec<FragmentMesh>, keep: F) -> usize
where
    F: Fn(&FragmentMesh) -> bool,
{
    let kept = fragments.iter().filter(|f| keep(f)).count();
    if kept == 0 || kept == fragments.len() {
        return 0;
    }
    let before = fragments.len();
    fragments.retain(|f| keep(f));
    before - fragments.len()
}

/// Drops coplanar (flat or degenerate) fragments.
pub fn remove_coplanar(fragments: &mut Vec<FragmentMesh>) -> usize {
    retain_or_keep_all(fragments, |f| !is_coplanar(&f.positions, COPLANAR_THRESHOLD))
}

/// Drops fragments below the absolute size, or below `relative_percent`
/// of the source bounds diagonal.
pub fn remove_undersized(
    fragments: &mut Vec<FragmentMesh>,
    source_diagonal: f32,
    absolute: Option<f32>,
    relative_percent: Option<f32>,
) -> usize {
    if absolute.is_none() && relative_percent.is_none() {
        return 0;
    }
    let reference = relative_percent.map(|percent| percent / 100.0 * source_diagonal);
    retain_or_keep_all(fragments, |f| {
        let size = f.local_bounds().diagonal();
        absolute.map_or(true, |min| size >= min) && reference.map_or(true, |min| size >= min)
    })
}

/// Runs the full pipeline over `fragments[batch_start..]`.
pub fn apply(
    config: &FilterConfig,
    fragments: &mut Vec<FragmentMesh>,
    batch_start: usize,
    source_diagonal: f32,
) -> FilterReport {
    let batch_start = batch_start.min(fragments.len());
    let mut batch = fragments.split_off(batch_start);
    let mut report = FilterReport::default();

    if config.remove_coplanar {
        report.coplanar = remove_coplanar(&mut batch);
    }
    report.undersized = remove_undersized(
        &mut batch,
        source_diagonal,
        config.absolute_size,
        config.relative_size_percent,
    );

    fragments.append(&mut batch);
    report.over_budget = limit_batch(fragments, batch_start, config);

    if report.total() > 0 {
        debug!(
            coplanar = report.coplanar,
            undersized = report.undersized,
            over_budget = report.over_budget,
            "filtered batch"
        );
    }
    report
}
