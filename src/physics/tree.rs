use log::debug;
use nalgebra::Vector3;
use serde::Serialize;

use crate::geometry::{Aabb, Triangle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }

    fn from_index(index: usize) -> Self {
        match index {
            0 => Self::X,
            1 => Self::Y,
            _ => Self::Z,
        }
    }
}

/// Which half of its parent a split node's subtree holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    /// Triangles centered at or above the split; `position` is their lowest
    /// extent along the axis.
    Front,
    /// Triangles centered below the split; `position` is their highest
    /// extent along the axis.
    Back,
}

/// Entry of the pre-order node array.
///
/// A `Split` opens one half of a partition. Its subtree occupies the entries
/// after it up to (excluding) `sibling`. The front half of a partition is
/// immediately followed by the back half.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SpatialNode {
    Split {
        axis: Axis,
        position: f32,
        side: Side,
        sibling: u32,
    },
    Leaf {
        triangle: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpatialTree {
    pub nodes: Vec<SpatialNode>,
}

enum Task {
    Build {
        triangles: Vec<u32>,
        /// Box of the node being built: its parent's box tightened on the
        /// parent's split axis.
        bounds: Aabb,
        header: Option<(Axis, f32, Side)>,
    },
    Close {
        node: usize,
    },
}

/// Build the partition tree over `triangles`, one leaf per triangle.
pub fn build_tree(triangles: &[Triangle]) -> SpatialTree {
    let mut nodes = Vec::with_capacity(triangles.len() * 2);
    if triangles.is_empty() {
        return SpatialTree { nodes };
    }

    let mut root = Aabb::empty();
    for triangle in triangles {
        root.merge(&triangle.aabb);
    }
    let mut tasks = vec![Task::Build {
        triangles: (0..triangles.len() as u32).collect(),
        bounds: root,
        header: None,
    }];
    while let Some(task) = tasks.pop() {
        match task {
            Task::Close { node } => {
                let end = nodes.len() as u32;
                if let Some(SpatialNode::Split { sibling, .. }) = nodes.get_mut(node) {
                    *sibling = end;
                }
            }
            Task::Build {
                triangles: set,
                bounds,
                header,
            } => {
                if let Some((axis, position, side)) = header {
                    tasks.push(Task::Close { node: nodes.len() });
                    nodes.push(SpatialNode::Split {
                        axis,
                        position,
                        side,
                        sibling: 0,
                    });
                }
                if let [only] = set[..] {
                    nodes.push(SpatialNode::Leaf { triangle: only });
                    continue;
                }
                let partition = partition(triangles, &set, &bounds);
                let axis = partition.axis.index();
                let mut back_bounds = bounds;
                back_bounds.max[axis] = partition.back_max;
                let mut front_bounds = bounds;
                front_bounds.min[axis] = partition.front_min;
                // front is popped first
                tasks.push(Task::Build {
                    triangles: partition.back,
                    bounds: back_bounds,
                    header: Some((partition.axis, partition.back_max, Side::Back)),
                });
                tasks.push(Task::Build {
                    triangles: partition.front,
                    bounds: front_bounds,
                    header: Some((partition.axis, partition.front_min, Side::Front)),
                });
            }
        }
    }

    debug!("spatial tree: {} triangles, {} nodes", triangles.len(), nodes.len());
    SpatialTree { nodes }
}

struct Partition {
    axis: Axis,
    front: Vec<u32>,
    back: Vec<u32>,
    front_min: f32,
    back_max: f32,
}

fn partition(triangles: &[Triangle], set: &[u32], bounds: &Aabb) -> Partition {
    let centers: Vec<Vector3<f32>> = set
        .iter()
        .map(|&index| triangles[index as usize].center())
        .collect();
    let count = centers.len() as f32;
    let mean = centers.iter().sum::<Vector3<f32>>() / count;
    let variance = centers
        .iter()
        .map(|center| (center - mean).component_mul(&(center - mean)))
        .sum::<Vector3<f32>>()
        / count;
    let axis_index = (0..3)
        .reduce(|best, axis| if variance[axis] > variance[best] { axis } else { best })
        .unwrap_or(0);
    let axis = Axis::from_index(axis_index);

    let split_at = |position: f32| -> (Vec<u32>, Vec<u32>) {
        set.iter()
            .zip(&centers)
            .map(|(&index, center)| (index, center[axis_index] >= position))
            .fold((Vec::new(), Vec::new()), |(mut front, mut back), (index, is_front)| {
                if is_front {
                    front.push(index);
                } else {
                    back.push(index);
                }
                (front, back)
            })
    };

    let (mut front, mut back) = split_at(bounds.center()[axis_index]);
    if front.is_empty() || back.is_empty() {
        (front, back) = split_at(mean[axis_index]);
    }
    if front.is_empty() || back.is_empty() {
        // every center coincides along the axis
        let half = set.len() / 2;
        front = set[..half].to_vec();
        back = set[half..].to_vec();
    }
    debug_assert!(!front.is_empty() && !back.is_empty());

    Partition {
        axis,
        front_min: front
            .iter()
            .map(|&index| triangles[index as usize].aabb.min[axis_index])
            .fold(f32::INFINITY, f32::min),
        back_max: back
            .iter()
            .map(|&index| triangles[index as usize].aabb.max[axis_index])
            .fold(f32::NEG_INFINITY, f32::max),
        front,
        back,
    }
}

impl SpatialTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Triangles whose half-space bounds may overlap `query`, found by a
    /// linear walk that jumps over rejected subtrees.
    pub fn query(&self, query: &Aabb) -> Vec<u32> {
        let mut hits = Vec::new();
        let mut cursor = 0;
        while let Some(node) = self.nodes.get(cursor) {
            cursor = match *node {
                SpatialNode::Leaf { triangle } => {
                    hits.push(triangle);
                    cursor + 1
                }
                SpatialNode::Split {
                    axis,
                    position,
                    side,
                    sibling,
                } => {
                    let overlaps = match side {
                        Side::Front => query.max[axis.index()] >= position,
                        Side::Back => query.min[axis.index()] <= position,
                    };
                    if overlaps { cursor + 1 } else { sibling as usize }
                }
            };
        }
        hits
    }
}
