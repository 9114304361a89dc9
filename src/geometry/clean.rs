use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::triangle::{Triangle, canonical_corners};
use super::weld::{PointWelder, WeldedMesh};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanOptions {
    /// Triangles with area at or below this are dropped.
    pub area_tolerance: f32,
    /// Treat a triangle and its mirror image (reversed winding) as duplicates.
    pub reflected_duplicates: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            area_tolerance: 1e-10,
            reflected_duplicates: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanStats {
    pub degenerate: usize,
    pub duplicate: usize,
}

/// Drop degenerate triangles and triangles repeating an already kept one.
/// Triangles compare by their corner positions, merged within `tolerance`,
/// so corners that differ only in other channels still count as the same.
/// Kept triangles stay in input order.
pub fn clean_triangles(
    mesh: &mut WeldedMesh,
    options: &CleanOptions,
    tolerance: f32,
) -> CleanStats {
    let positions = mesh.positions().unwrap_or_default();
    let mut welder = PointWelder::new(tolerance);
    let points: Vec<u32> = positions.iter().map(|point| welder.insert(point)).collect();

    let mut stats = CleanStats::default();
    let mut seen = BTreeSet::new();
    let mut kept = Vec::with_capacity(mesh.indices.len());
    for corners in mesh.indices.chunks_exact(3) {
        let [a, b, c] = [corners[0], corners[1], corners[2]];
        let [pa, pb, pc] = [a, b, c].map(|index| {
            points.get(index as usize).copied().unwrap_or(u32::from(index))
        });
        let collapsed = pa == pb || pb == pc || pa == pc;
        let flat = !positions.is_empty()
            && Triangle::new(
                positions[a as usize],
                positions[b as usize],
                positions[c as usize],
            )
            .is_degenerate(options.area_tolerance);
        if collapsed || flat {
            stats.degenerate += 1;
            continue;
        }
        if !seen.insert(canonical_corners([pa, pb, pc], options.reflected_duplicates)) {
            stats.duplicate += 1;
            continue;
        }
        kept.extend_from_slice(&[a, b, c]);
    }

    mesh.indices = kept;
    stats
}

/// Remove vertices no index references, keeping the survivors' relative
/// order. Returns how many were removed.
pub fn compact_vertices(mesh: &mut WeldedMesh) -> usize {
    let count = mesh.vertex_count();
    let stride = mesh.layout.stride_floats();
    let mut used = vec![false; count];
    for &index in &mesh.indices {
        used[index as usize] = true;
    }

    let mut remap = vec![0u16; count];
    let mut vertices = Vec::with_capacity(mesh.vertices.len());
    let mut next = 0u16;
    for (vertex, record) in mesh.vertices.chunks_exact(stride.max(1)).enumerate() {
        if used[vertex] {
            remap[vertex] = next;
            vertices.extend_from_slice(record);
            next = next.wrapping_add(1);
        }
    }
    for index in &mut mesh.indices {
        *index = remap[*index as usize];
    }

    let removed = count - used.iter().filter(|used| **used).count();
    mesh.vertices = vertices;
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Usage, VertexLayout};

    fn mesh(points: &[[f32; 3]], indices: &[u16]) -> WeldedMesh {
        let mut layout = VertexLayout::default();
        layout.push(Usage::Position, 0, 3, false);
        WeldedMesh {
            name: "test".to_string(),
            layout,
            vertices: points.iter().flatten().copied().collect(),
            indices: indices.to_vec(),
            ..WeldedMesh::default()
        }
    }

    const SQUARE: [[f32; 3]; 5] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 1.0, 0.0],
        [2.0, 0.0, 0.0],
    ];

    #[test]
    fn given_collinear_triangle_when_cleaning_then_it_is_removed() {
        // 0, 1, 4 lie on the x axis
        let mut mesh = mesh(&SQUARE, &[0, 1, 2, 0, 1, 4, 0, 2, 3]);
        let stats = clean_triangles(&mut mesh, &CleanOptions::default(), 0.0);

        assert_eq!(stats.degenerate, 1);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(compact_vertices(&mut mesh), 1);
        assert_eq!(mesh.vertex_count(), 4);
    }

    #[test]
    fn given_repeated_index_when_cleaning_then_triangle_is_degenerate() {
        let mut mesh = mesh(&SQUARE, &[0, 0, 2, 0, 1, 2]);
        let stats = clean_triangles(&mut mesh, &CleanOptions::default(), 0.0);
        assert_eq!(stats.degenerate, 1);
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn given_rotated_duplicate_when_cleaning_then_only_first_is_kept() {
        let mut mesh = mesh(&SQUARE, &[0, 1, 2, 1, 2, 0, 0, 2, 1]);
        let stats = clean_triangles(&mut mesh, &CleanOptions::default(), 0.0);
        assert_eq!(stats.duplicate, 1);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 1]);

        let mut mesh = self::mesh(&SQUARE, &[0, 1, 2, 1, 2, 0, 0, 2, 1]);
        let options = CleanOptions {
            reflected_duplicates: true,
            ..CleanOptions::default()
        };
        let stats = clean_triangles(&mut mesh, &options, 0.0);
        assert_eq!(stats.duplicate, 2);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
    }

    #[test]
    fn given_same_positions_on_distinct_vertices_when_cleaning_then_repeat_is_a_duplicate() {
        // 3..6 repeat the corners of 0..3, as vertices split by another channel would
        let points: Vec<[f32; 3]> = SQUARE[..3].iter().chain(&SQUARE).copied().collect();
        let mut mesh = mesh(&points, &[0, 1, 2, 4, 5, 3]);
        let stats = clean_triangles(&mut mesh, &CleanOptions::default(), 0.0);
        assert_eq!(stats.duplicate, 1);
        assert_eq!(mesh.indices, vec![0, 1, 2]);

        // within tolerance a corner pair on one position collapses the triangle
        let mut mesh = self::mesh(&[[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1e-4, 0.0]], &[0, 1, 2]);
        let stats = clean_triangles(&mut mesh, &CleanOptions::default(), 1e-3);
        assert_eq!(stats.degenerate, 1);
        assert_eq!(mesh.triangle_count(), 0);
    }

    #[test]
    fn given_unreferenced_vertices_when_compacting_then_indices_are_renumbered() {
        let mut mesh = mesh(&SQUARE, &[4, 2, 3]);
        assert_eq!(compact_vertices(&mut mesh), 2);
        assert_eq!(mesh.indices, vec![2, 0, 1]);
        assert_eq!(mesh.vertex(2), &[2.0, 0.0, 0.0]);
    }
}
