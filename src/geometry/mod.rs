//! Fragment geometry
//!
//! `FragmentMesh` is the unit of work flowing from the fragmentation engine
//! through the filter pipeline into spawned fragment entities. Positions are
//! stored relative to the fragment pivot; the pivot itself is expressed in
//! the space of the source entity (and therefore of its fragments root).

use bevy::prelude::*;

/// Axis-aligned bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub const ZERO: Self = Self {
        min: Vec3::ZERO,
        max: Vec3::ZERO,
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
        }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        let half = half_extents.abs();
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Tight bounds around a point set, `None` when the set is empty.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;
        let (min, max) = points
            .iter()
            .fold((first, first), |(min, max), p| (min.min(*p), max.max(*p)));
        Some(Self { min, max })
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn half_extents(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Length of the bounding box diagonal, the size measure used by filters.
    pub fn diagonal(&self) -> f32 {
        self.size().length()
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn translated(&self, offset: Vec3) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Overlap test, grown by `tolerance` on every side so touching boxes count.
    pub fn intersects(&self, other: &Bounds, tolerance: f32) -> bool {
        self.min.x - tolerance <= other.max.x
            && self.max.x + tolerance >= other.min.x
            && self.min.y - tolerance <= other.max.y
            && self.max.y + tolerance >= other.min.y
            && self.min.z - tolerance <= other.max.z
            && self.max.z + tolerance >= other.min.z
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Index of the longest axis (0 = x, 1 = y, 2 = z).
    pub fn longest_axis(&self) -> usize {
        let size = self.size();
        if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        }
    }
}

/// One piece of geometry produced by fragmentation.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentMesh {
    /// Vertex positions relative to `pivot`.
    pub positions: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
    /// Fragment origin in source space.
    pub pivot: Vec3,
    /// Source submesh index for every triangle.
    pub submesh_map: Vec<u32>,
}

impl FragmentMesh {
    pub fn new(positions: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        let submesh_map = vec![0; triangles.len()];
        Self {
            positions,
            triangles,
            pivot: Vec3::ZERO,
            submesh_map,
        }
    }

    pub fn with_pivot(mut self, pivot: Vec3) -> Self {
        self.pivot = pivot;
        self
    }

    pub fn with_submesh_map(mut self, submesh_map: Vec<u32>) -> Self {
        self.submesh_map = submesh_map;
        self
    }

    /// Closed box mesh: 8 vertices, 12 triangles, pivot at `center`.
    pub fn cuboid(center: Vec3, half_extents: Vec3) -> Self {
        let h = half_extents.abs();
        let positions = vec![
            Vec3::new(-h.x, -h.y, -h.z),
            Vec3::new(h.x, -h.y, -h.z),
            Vec3::new(h.x, h.y, -h.z),
            Vec3::new(-h.x, h.y, -h.z),
            Vec3::new(-h.x, -h.y, h.z),
            Vec3::new(h.x, -h.y, h.z),
            Vec3::new(h.x, h.y, h.z),
            Vec3::new(-h.x, h.y, h.z),
        ];
        let triangles = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [3, 7, 6],
            [3, 6, 2],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        Self::new(positions, triangles).with_pivot(center)
    }

    /// Regular tetrahedron with the given edge length, centered on the pivot.
    pub fn tetrahedron(center: Vec3, edge: f32) -> Self {
        let s = edge / (2.0 * std::f32::consts::SQRT_2);
        let positions = vec![
            Vec3::new(s, s, s),
            Vec3::new(s, -s, -s),
            Vec3::new(-s, s, -s),
            Vec3::new(-s, -s, s),
        ];
        let triangles = vec![[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]];
        Self::new(positions, triangles).with_pivot(center)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.triangles.is_empty()
    }

    /// Bounds in pivot-local space.
    pub fn local_bounds(&self) -> Bounds {
        Bounds::from_points(&self.positions).unwrap_or(Bounds::ZERO)
    }

    /// Bounds in source space.
    pub fn bounds(&self) -> Bounds {
        self.local_bounds().translated(self.pivot)
    }

    /// Positions in source space.
    pub fn source_positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.positions.iter().map(move |p| *p + self.pivot)
    }

    /// Moves the pivot to the bounds center, keeping source-space geometry.
    pub fn recentered(mut self) -> Self {
        let center = self.local_bounds().center();
        for p in &mut self.positions {
            *p -= center;
        }
        self.pivot += center;
        self
    }
}

/// Cutting plane for the slice variant of demolition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlicePlane {
    pub point: Vec3,
    pub normal: Vec3,
}

impl SlicePlane {
    pub fn new(point: Vec3, normal: Vec3) -> Self {
        Self {
            point,
            normal: normal.normalize_or_zero(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.normal.length_squared() > 0.5
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        (point - self.point).dot(self.normal)
    }
}
