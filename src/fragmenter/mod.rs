//! Fragmentation engine seam
//!
//! The orchestrator only talks to `FragmentationEngine`; real slicing and
//! boolean backends plug in here. `BoundsFragmenter` is a deterministic
//! reference engine that splits the source bounds into seeded slabs, which
//! is enough to drive the scheduler, filters and cluster logic end to end.

use std::collections::HashMap;
use std::ops::Range;

use bevy::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use sha3::{Digest, Sha3_256};

use crate::config::FragmentationParams;
use crate::error::EngineError;
use crate::geometry::{FragmentMesh, SlicePlane};

/// Produces fragment meshes from a source mesh.
///
/// `produce` must be idempotent: the same source, parameters and indices
/// always yield the same meshes, whichever batch asks for them.
pub trait FragmentationEngine: Send + Sync {
    /// False when this platform cannot produce meshes at all.
    fn is_supported(&self) -> bool {
        true
    }

    fn produce(
        &self,
        source: &FragmentMesh,
        params: &FragmentationParams,
        indices: Range<usize>,
    ) -> Result<Vec<FragmentMesh>, EngineError>;

    /// Cuts the source along a plane.
    fn slice(&self, _source: &FragmentMesh, _plane: &SlicePlane) -> Result<Vec<FragmentMesh>, EngineError> {
        Err(EngineError::Unsupported)
    }
}

/// Deterministic key for a (source mesh, parameters) pair.
pub fn cache_key(source: &FragmentMesh, params: &FragmentationParams) -> u64 {
    let mut hasher = Sha3_256::new();
    hasher.update(params.amount.to_le_bytes());
    hasher.update(params.variation_percent.to_le_bytes());
    hasher.update(params.seed.to_le_bytes());
    hasher.update(params.bias.to_le_bytes());
    hasher.update(params.depth.to_le_bytes());
    for p in &source.positions {
        for c in p.to_array() {
            hasher.update(c.to_le_bytes());
        }
    }
    for tri in &source.triangles {
        for i in tri {
            hasher.update(i.to_le_bytes());
        }
    }
    for c in source.pivot.to_array() {
        hasher.update(c.to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    u64::from_le_bytes(bytes)
}

/// Reference engine: seeded slabs along the longest axis of the source bounds.
#[derive(Debug, Clone, Default)]
pub struct BoundsFragmenter;

impl BoundsFragmenter {
    /// Slab boundaries as fractions of the axis length, `amount + 1` values
    /// from 0.0 to 1.0. Derived from the seed only, never from the indices.
    fn cut_fractions(params: &FragmentationParams) -> Vec<f32> {
        let amount = params.amount.max(1) as usize;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);
        let variation = (params.variation_percent.min(90) as f32) / 100.0;
        let bias = params.bias.clamp(-1.0, 1.0);

        let weights: Vec<f32> = (0..amount)
            .map(|i| {
                let jitter = if variation > 0.0 {
                    rng.gen_range(-variation..=variation)
                } else {
                    0.0
                };
                let t = if amount > 1 {
                    i as f32 / (amount - 1) as f32 - 0.5
                } else {
                    0.0
                };
                ((1.0 + jitter) * (1.0 + bias * t)).max(0.05)
            })
            .collect();

        let total: f32 = weights.iter().sum();
        let mut fractions = Vec::with_capacity(amount + 1);
        let mut acc = 0.0;
        fractions.push(0.0);
        for w in &weights {
            acc += w / total;
            fractions.push(acc.min(1.0));
        }
        if let Some(last) = fractions.last_mut() {
            *last = 1.0;
        }
        fractions
    }
}

impl FragmentationEngine for BoundsFragmenter {
    fn produce(
        &self,
        source: &FragmentMesh,
        params: &FragmentationParams,
        indices: Range<usize>,
    ) -> Result<Vec<FragmentMesh>, EngineError> {
        if source.is_empty() {
            return Err(EngineError::InvalidSource("source mesh has no geometry".into()));
        }
        let amount = params.amount as usize;
        if indices.end > amount {
            return Err(EngineError::IndexOutOfRange {
                index: indices.end - 1,
                amount,
            });
        }

        let bounds = source.bounds();
        let axis = bounds.longest_axis();
        let fractions = Self::cut_fractions(params);
        let size = bounds.size();

        Ok(indices
            .map(|index| {
                let mut min = bounds.min;
                let mut max = bounds.max;
                min[axis] = bounds.min[axis] + size[axis] * fractions[index];
                max[axis] = bounds.min[axis] + size[axis] * fractions[index + 1];
                let center = (min + max) * 0.5;
                FragmentMesh::cuboid(center, (max - min) * 0.5)
            })
            .collect())
    }

    fn slice(&self, source: &FragmentMesh, plane: &SlicePlane) -> Result<Vec<FragmentMesh>, EngineError> {
        if source.is_empty() {
            return Err(EngineError::InvalidSource("source mesh has no geometry".into()));
        }
        if !plane.is_valid() {
            return Err(EngineError::InvalidSource("slice plane has no normal".into()));
        }

        let positions: Vec<Vec3> = source.source_positions().collect();
        let mut sides: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
        for (t, tri) in source.triangles.iter().enumerate() {
            let mut centroid = Vec3::ZERO;
            for i in tri {
                let p = positions.get(*i as usize).ok_or_else(|| {
                    EngineError::InvalidSource(format!(
                        "triangle {t} references vertex {i} of {}",
                        positions.len()
                    ))
                })?;
                centroid += *p;
            }
            centroid /= 3.0;
            let side = usize::from(plane.signed_distance(centroid) < 0.0);
            sides[side].push(t);
        }

        Ok(sides
            .iter()
            .filter(|tris| !tris.is_empty())
            .map(|tris| extract_triangles(source, &positions, tris))
            .collect())
    }
}

/// Builds a standalone mesh from a subset of the source triangles. Every
/// index in `tris` has already been checked against `positions`.
fn extract_triangles(source: &FragmentMesh, positions: &[Vec3], tris: &[usize]) -> FragmentMesh {
    let mut remap: HashMap<u32, u32> = HashMap::new();
    let mut out_positions = Vec::new();
    let mut out_triangles = Vec::with_capacity(tris.len());
    let mut submesh_map = Vec::with_capacity(tris.len());

    for &t in tris {
        let tri = source.triangles[t];
        let mapped = tri.map(|i| {
            *remap.entry(i).or_insert_with(|| {
                out_positions.push(positions.get(i as usize).copied().unwrap_or_default());
                (out_positions.len() - 1) as u32
            })
        });
        out_triangles.push(mapped);
        submesh_map.push(source.submesh_map.get(t).copied().unwrap_or(0));
    }

    FragmentMesh::new(out_positions, out_triangles)
        .with_submesh_map(submesh_map)
        .recentered()
}
