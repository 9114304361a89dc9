use nalgebra::Vector3;
use serde::Serialize;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb {
    /// An inverted box that any `grow` call replaces.
    pub fn empty() -> Self {
        Self {
            min: Vector3::repeat(f32::INFINITY),
            max: Vector3::repeat(f32::NEG_INFINITY),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vector3<f32>>) -> Self {
        let mut aabb = Self::empty();
        for point in points {
            aabb.grow(point);
        }
        aabb
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| self.min[axis] > self.max[axis])
    }

    pub fn grow(&mut self, point: &Vector3<f32>) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    pub fn merge(&mut self, other: &Aabb) {
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        (0..3).all(|axis| self.min[axis] <= other.min[axis] && other.max[axis] <= self.max[axis])
    }
}

/// A triangle value with its derived bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub points: [Vector3<f32>; 3],
    pub aabb: Aabb,
}

impl Triangle {
    pub fn new(p0: Vector3<f32>, p1: Vector3<f32>, p2: Vector3<f32>) -> Self {
        Self {
            points: [p0, p1, p2],
            aabb: Aabb::from_points([&p0, &p1, &p2]),
        }
    }

    /// Unnormalized face normal; its length is twice the area.
    pub fn scaled_normal(&self) -> Vector3<f32> {
        (self.points[1] - self.points[0]).cross(&(self.points[2] - self.points[0]))
    }

    pub fn area(&self) -> f32 {
        self.scaled_normal().norm() * 0.5
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.points[0] + self.points[1] + self.points[2]) / 3.0
    }

    pub fn is_degenerate(&self, area_tolerance: f32) -> bool {
        self.area() <= area_tolerance
    }
}

/// Canonical key of an index triple: rotated so the smallest index comes
/// first, and when `ignore_winding` is set the smaller of both windings.
pub fn canonical_corners<T: Ord + Copy>(corners: [T; 3], ignore_winding: bool) -> [T; 3] {
    let rotate = |c: [T; 3]| {
        let start = (0..3).min_by_key(|index| c[*index]).unwrap_or(0);
        [c[start], c[(start + 1) % 3], c[(start + 2) % 3]]
    };
    let forward = rotate(corners);
    if !ignore_winding {
        return forward;
    }
    let reversed = rotate([corners[0], corners[2], corners[1]]);
    forward.min(reversed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f32, y: f32, z: f32) -> Vector3<f32> {
        Vector3::new(x, y, z)
    }

    #[test]
    fn given_right_triangle_when_deriving_then_area_and_bounds_match() {
        let triangle = Triangle::new(v(0.0, 0.0, 0.0), v(2.0, 0.0, 0.0), v(0.0, 2.0, 0.0));
        assert!((triangle.area() - 2.0).abs() < 1e-6);
        assert_eq!(triangle.scaled_normal(), v(0.0, 0.0, 4.0));
        assert_eq!(triangle.aabb.max, v(2.0, 2.0, 0.0));
        assert!(!triangle.is_degenerate(1e-6));
    }

    #[test]
    fn given_collapsed_triangle_when_checking_then_it_is_degenerate() {
        let p = v(1.0, 1.0, 1.0);
        let triangle = Triangle::new(p, p, p);
        assert!(triangle.is_degenerate(0.0));
        assert_eq!(triangle.scaled_normal(), Vector3::zeros());
    }

    #[test]
    fn given_index_triples_when_canonicalizing_then_rotations_collapse() {
        assert_eq!(canonical_corners([5u16, 2, 9], false), [2, 9, 5]);
        assert_eq!(canonical_corners([9u16, 5, 2], false), [2, 9, 5]);
        assert_ne!(canonical_corners([2u16, 5, 9], false), [2, 9, 5]);
        assert_eq!(canonical_corners([2u16, 5, 9], true), canonical_corners([2u16, 9, 5], true));
    }

    #[test]
    fn given_boxes_when_testing_containment_then_bounds_are_inclusive() {
        let outer = Aabb::from_points([&v(0.0, 0.0, 0.0), &v(4.0, 4.0, 4.0)]);
        let inner = Aabb::from_points([&v(0.0, 1.0, 1.0), &v(4.0, 2.0, 2.0)]);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(Aabb::empty().is_empty());
    }
}
