//! Size / vertex / triangle budget limitation for the latest batch.

use tracing::debug;

use crate::config::FilterConfig;
use crate::geometry::FragmentMesh;

/// One budget check applied to a fragment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Budget {
    MaxSize(f32),
    MaxVertices(usize),
    MaxTriangles(usize),
}

impl Budget {
    pub fn exceeded_by(&self, mesh: &FragmentMesh) -> bool {
        match *self {
            Budget::MaxSize(limit) => mesh.local_bounds().diagonal() > limit,
            Budget::MaxVertices(limit) => mesh.vertex_count() > limit,
            Budget::MaxTriangles(limit) => mesh.triangle_count() > limit,
        }
    }

    /// Enabled budgets in application order: size, vertices, triangles.
    pub fn from_config(config: &FilterConfig) -> Vec<Budget> {
        let mut budgets = Vec::with_capacity(3);
        if let Some(limit) = config.max_size {
            budgets.push(Budget::MaxSize(limit));
        }
        if let Some(limit) = config.max_vertices {
            budgets.push(Budget::MaxVertices(limit));
        }
        if let Some(limit) = config.max_triangles {
            budgets.push(Budget::MaxTriangles(limit));
        }
        budgets
    }
}

/// Single reverse scan over `fragments[batch_start..]`, removing every
/// fragment that exceeds `budget`.
fn limitation_pass(fragments: &mut Vec<FragmentMesh>, batch_start: usize, budget: Budget) -> usize {
    let mut removed = 0;
    for index in (batch_start..fragments.len()).rev() {
        if budget.exceeded_by(&fragments[index]) {
            fragments.remove(index);
            removed += 1;
        }
    }
    removed
}

/// Applies every enabled budget to the batch starting at `batch_start`.
///
/// Each budget is repeated until a pass removes nothing, at most
/// `config.iteration_cap` passes. Returns the number of removed fragments.
pub fn limit_batch(fragments: &mut Vec<FragmentMesh>, batch_start: usize, config: &FilterConfig) -> usize {
    let batch_start = batch_start.min(fragments.len());
    let mut total = 0;

    for budget in Budget::from_config(config) {
        for pass in 0..config.iteration_cap.max(1) {
            let removed = limitation_pass(fragments, batch_start, budget);
            total += removed;
            if removed == 0 {
                break;
            }
            debug!(?budget, pass, removed, "budget limitation pass");
        }
    }

    total
}
