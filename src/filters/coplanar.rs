//! Coplanarity test for fragment vertex sets.

use bevy::prelude::*;

/// Returns true when every vertex lies within `threshold` of one plane.
///
/// The plane is fitted through the first vertex, the next vertex farther than
/// `threshold` from it, and the next vertex after that which is not collinear
/// with the first two. Point sets without three such vertices are degenerate
/// and count as coplanar.
pub fn is_coplanar(positions: &[Vec3], threshold: f32) -> bool {
    let Some(&first) = positions.first() else {
        return true;
    };

    let Some(second_index) = positions
        .iter()
        .skip(1)
        .position(|p| p.distance(first) > threshold)
        .map(|i| i + 1)
    else {
        return true;
    };
    let edge_a = (positions[second_index] - first).normalize();

    let third = positions[second_index + 1..].iter().copied().find(|p| {
        let edge_b = (*p - first).normalize_or_zero();
        edge_a.cross(edge_b).length() > threshold
    });
    let Some(third) = third else {
        return true;
    };

    let normal = edge_a.cross(third - first).normalize();
    positions
        .iter()
        .all(|p| (*p - first).dot(normal).abs() <= threshold)
}
