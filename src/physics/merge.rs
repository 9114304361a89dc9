use std::collections::BTreeSet;

use nalgebra::{Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::{Aabb, CleanOptions, PointWelder, Triangle, canonical_corners};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsOptions {
    pub enabled: bool,
    /// World-space distance under which positions are merged.
    pub tolerance: f32,
    pub clean: CleanOptions,
}

impl Default for PhysicsOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            tolerance: 1e-4,
            // collision ignores winding
            clean: CleanOptions {
                reflected_duplicates: true,
                ..CleanOptions::default()
            },
        }
    }
}

/// The scene's triangles in world space over one shared position list.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsMesh {
    pub positions: Vec<Vector3<f32>>,
    pub triangles: Vec<[u32; 3]>,
    pub bounds: Aabb,
    pub degenerate_triangles: usize,
    pub duplicate_triangles: usize,
}

impl PhysicsMesh {
    pub fn triangle(&self, index: usize) -> Triangle {
        let [a, b, c] = self.triangles[index];
        Triangle::new(
            self.positions[a as usize],
            self.positions[b as usize],
            self.positions[c as usize],
        )
    }

    pub fn triangle_values(&self) -> Vec<Triangle> {
        (0..self.triangles.len()).map(|index| self.triangle(index)).collect()
    }
}

/// Accumulates world-space triangles from every drawable of a scene.
pub struct TriangleMerger {
    welder: PointWelder,
    clean: CleanOptions,
    seen: BTreeSet<[u32; 3]>,
    triangles: Vec<[u32; 3]>,
    degenerate: usize,
    duplicate: usize,
}

impl TriangleMerger {
    pub fn new(options: &PhysicsOptions) -> Self {
        Self {
            welder: PointWelder::new(options.tolerance),
            clean: options.clean,
            seen: BTreeSet::new(),
            triangles: Vec::new(),
            degenerate: 0,
            duplicate: 0,
        }
    }

    /// Add one mesh's triangles, transformed by `world`.
    pub fn add_mesh(&mut self, positions: &[Vector3<f32>], indices: &[u16], world: &Matrix4<f32>) {
        let mut numbers: Vec<Option<u32>> = vec![None; positions.len()];
        for corners in indices.chunks_exact(3) {
            let mut merged = [0u32; 3];
            let mut points = [Vector3::zeros(); 3];
            for (slot, &corner) in corners.iter().enumerate() {
                let local = positions[corner as usize];
                let world_point = world.transform_point(&Point3::from(local)).coords;
                let number = *numbers[corner as usize]
                    .get_or_insert_with(|| self.welder.insert(&world_point));
                merged[slot] = number;
                points[slot] = world_point;
            }

            let [a, b, c] = merged;
            let collapsed = a == b || b == c || a == c;
            if collapsed
                || Triangle::new(points[0], points[1], points[2])
                    .is_degenerate(self.clean.area_tolerance)
            {
                self.degenerate += 1;
                continue;
            }
            if !self
                .seen
                .insert(canonical_corners(merged, self.clean.reflected_duplicates))
            {
                self.duplicate += 1;
                continue;
            }
            self.triangles.push(merged);
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn finish(self) -> PhysicsMesh {
        let positions = self.welder.into_points();
        let mut bounds = Aabb::empty();
        for corner in self.triangles.iter().flatten() {
            bounds.grow(&positions[*corner as usize]);
        }
        PhysicsMesh {
            positions,
            triangles: self.triangles,
            bounds,
            degenerate_triangles: self.degenerate,
            duplicate_triangles: self.duplicate,
        }
    }
}
