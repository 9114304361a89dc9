//! Fixed-width skin weights with a joint matrix budget.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Slots per vertex in the output.
pub const MAX_INFLUENCES: usize = 4;
pub const DEFAULT_JOINT_BUDGET: usize = 72;

#[derive(Debug, Error)]
pub enum SkinError {
    #[error("skin \"{skin}\": vertex {vertex} references joint {joint}, but only {joint_count} joints exist")]
    JointOutOfRange {
        skin: String,
        vertex: usize,
        joint: u32,
        joint_count: usize,
    },

    #[error("skin \"{skin}\": {joint_count} joints cannot fit a budget of {budget} without dropping a vertex's only influence")]
    BudgetUnsatisfiable {
        skin: String,
        joint_count: usize,
        budget: usize,
    },

    #[error("max influences must be between 1 and {MAX_INFLUENCES}, got {0}")]
    InvalidInfluenceCount(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Influence {
    pub joint: u32,
    pub weight: f32,
}

impl Influence {
    pub fn new(joint: u32, weight: f32) -> Self {
        Self { joint, weight }
    }
}

/// Variable-length influences for every vertex of one skin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkinInput {
    pub name: String,
    pub joint_count: usize,
    pub vertices: Vec<Vec<Influence>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinOptions {
    pub max_influences: usize,
    /// Most joint matrices one draw can bind.
    pub joint_budget: usize,
}

impl Default for SkinOptions {
    fn default() -> Self {
        Self {
            max_influences: MAX_INFLUENCES,
            joint_budget: DEFAULT_JOINT_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkinWeights {
    /// Per vertex joint slots, in the renumbered joint space.
    pub joints: Vec<[u16; MAX_INFLUENCES]>,
    /// Per vertex weights, descending, summing to one when any influence exists.
    pub weights: Vec<[f32; MAX_INFLUENCES]>,
    /// Original joint index of every surviving joint, in new index order.
    pub active_joints: Vec<u32>,
    pub removed_joints: Vec<u32>,
    /// Old joint index to new, `None` for removed joints.
    pub remap: Vec<Option<u16>>,
    /// Vertices that had more influences than slots.
    pub truncated_vertices: usize,
}

/// Sort, truncate and renormalize each vertex's influences, then bring the
/// joint count within budget.
pub fn extract_skin_weights(
    skin: &SkinInput,
    options: &SkinOptions,
) -> Result<SkinWeights, SkinError> {
    if !(1..=MAX_INFLUENCES).contains(&options.max_influences) {
        return Err(SkinError::InvalidInfluenceCount(options.max_influences));
    }

    let mut truncated_vertices = 0;
    let mut vertices = Vec::with_capacity(skin.vertices.len());
    for (vertex, influences) in skin.vertices.iter().enumerate() {
        let mut kept: Vec<Influence> = Vec::with_capacity(influences.len());
        for influence in influences {
            if influence.joint as usize >= skin.joint_count {
                return Err(SkinError::JointOutOfRange {
                    skin: skin.name.clone(),
                    vertex,
                    joint: influence.joint,
                    joint_count: skin.joint_count,
                });
            }
            if influence.weight > 0.0 && influence.weight.is_finite() {
                kept.push(*influence);
            }
        }
        kept.sort_by(by_weight_descending);
        if kept.len() > options.max_influences {
            truncated_vertices += 1;
            kept.truncate(options.max_influences);
        }
        vertices.push(kept);
    }
    if truncated_vertices > 0 {
        warn!(
            "skin \"{}\": {truncated_vertices} vertices had more than {} influences, extra ones dropped",
            skin.name, options.max_influences
        );
    }

    let removed_joints = fit_joint_budget(skin, &mut vertices, options.joint_budget)?;

    let mut remap = vec![None; skin.joint_count];
    let mut active_joints = Vec::with_capacity(skin.joint_count - removed_joints.len());
    for joint in 0..skin.joint_count as u32 {
        if !removed_joints.contains(&joint) {
            remap[joint as usize] = Some(active_joints.len() as u16);
            active_joints.push(joint);
        }
    }

    let mut joints = Vec::with_capacity(vertices.len());
    let mut weights = Vec::with_capacity(vertices.len());
    for kept in &mut vertices {
        renormalize(kept);
        let mut slot_joints = [0u16; MAX_INFLUENCES];
        let mut slot_weights = [0.0f32; MAX_INFLUENCES];
        for (slot, influence) in kept.iter().enumerate() {
            slot_joints[slot] = remap[influence.joint as usize].unwrap_or(0);
            slot_weights[slot] = influence.weight;
        }
        joints.push(slot_joints);
        weights.push(slot_weights);
    }

    Ok(SkinWeights {
        joints,
        weights,
        active_joints,
        removed_joints: removed_joints.into_iter().collect(),
        remap,
        truncated_vertices,
    })
}

fn by_weight_descending(a: &Influence, b: &Influence) -> Ordering {
    b.weight
        .total_cmp(&a.weight)
        .then_with(|| a.joint.cmp(&b.joint))
}

/// Make `kept` sum to one. The last slot absorbs the remainder; when that
/// would break the descending order or leave it non-positive, every weight is
/// scaled instead.
fn renormalize(kept: &mut [Influence]) {
    let Some((last, head)) = kept.split_last_mut() else {
        return;
    };
    let Some(previous) = head.last().map(|influence| f64::from(influence.weight)) else {
        last.weight = 1.0;
        return;
    };
    let leading: f64 = head.iter().map(|influence| f64::from(influence.weight)).sum();
    let rest = 1.0 - leading;
    if rest > 0.0 && rest <= previous {
        last.weight = rest as f32;
        return;
    }
    let total = leading + f64::from(last.weight);
    for influence in head.iter_mut().chain(std::iter::once(last)) {
        influence.weight = (f64::from(influence.weight) / total) as f32;
    }
}

/// Remove joints until `budget` remain, lowest ranked first: never used
/// before used, then by the largest weight they carry. A joint that is the
/// only influence of some vertex stays. Returns the removed joints.
fn fit_joint_budget(
    skin: &SkinInput,
    vertices: &mut [Vec<Influence>],
    budget: usize,
) -> Result<BTreeSet<u32>, SkinError> {
    let mut removed = BTreeSet::new();
    if skin.joint_count <= budget {
        return Ok(removed);
    }

    let mut max_weight = vec![None::<f32>; skin.joint_count];
    for influence in vertices.iter().flatten() {
        let slot = &mut max_weight[influence.joint as usize];
        *slot = Some(slot.map_or(influence.weight, |current: f32| current.max(influence.weight)));
    }

    let mut ranking: Vec<u32> = (0..skin.joint_count as u32).collect();
    ranking.sort_by(|&a, &b| {
        let key = |joint: u32| max_weight[joint as usize];
        match (key(a), key(b)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(wa), Some(wb)) => wa.total_cmp(&wb),
        }
        .then_with(|| a.cmp(&b))
    });

    let mut remaining = skin.joint_count;
    for joint in ranking {
        if remaining <= budget {
            break;
        }
        let exclusive = vertices
            .iter()
            .any(|kept| kept.len() == 1 && kept[0].joint == joint);
        if exclusive {
            debug!("skin \"{}\": joint {joint} is some vertex's only influence, kept", skin.name);
            continue;
        }
        for kept in vertices.iter_mut() {
            kept.retain(|influence| influence.joint != joint);
        }
        removed.insert(joint);
        remaining -= 1;
    }

    if remaining > budget {
        return Err(SkinError::BudgetUnsatisfiable {
            skin: skin.name.clone(),
            joint_count: skin.joint_count,
            budget,
        });
    }
    debug!(
        "skin \"{}\": removed {} joints to fit budget {budget}",
        skin.name,
        removed.len()
    );
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skin(joint_count: usize, vertices: Vec<Vec<(u32, f32)>>) -> SkinInput {
        SkinInput {
            name: "body".to_string(),
            joint_count,
            vertices: vertices
                .into_iter()
                .map(|pairs| pairs.into_iter().map(|(j, w)| Influence::new(j, w)).collect())
                .collect(),
        }
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn given_six_influences_when_extracting_then_top_four_keep_and_last_absorbs_remainder() {
        let input = skin(
            6,
            vec![vec![(0, 0.4), (1, 0.3), (2, 0.15), (3, 0.1), (4, 0.03), (5, 0.02)]],
        );
        let result = extract_skin_weights(&input, &SkinOptions::default()).unwrap();

        assert_eq!(result.joints[0], [0, 1, 2, 3]);
        assert_close(&result.weights[0], &[0.4, 0.3, 0.15, 0.15]);
        assert_eq!(result.truncated_vertices, 1);
        assert!(result.removed_joints.is_empty());
    }

    #[test]
    fn given_unsorted_influences_with_zeros_when_extracting_then_slots_are_sorted_and_padded() {
        let input = skin(4, vec![vec![(3, 0.0), (1, 0.25), (2, -0.5), (0, 0.75)]]);
        let result = extract_skin_weights(&input, &SkinOptions::default()).unwrap();

        assert_eq!(result.joints[0], [0, 1, 0, 0]);
        assert_close(&result.weights[0], &[0.75, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn given_equal_weights_when_sorting_then_lower_joint_comes_first() {
        let input = skin(3, vec![vec![(2, 0.5), (1, 0.5)]]);
        let result = extract_skin_weights(&input, &SkinOptions::default()).unwrap();
        assert_eq!(result.joints[0][..2], [1, 2]);
    }

    #[test]
    fn given_overweight_influences_when_renormalizing_then_all_weights_scale() {
        let input = skin(3, vec![vec![(0, 0.7), (1, 0.6), (2, 0.5)], vec![(0, 0.3), (1, 0.1)]]);
        let result = extract_skin_weights(&input, &SkinOptions::default()).unwrap();

        assert_close(&result.weights[0][..3], &[0.7 / 1.8, 0.6 / 1.8, 0.5 / 1.8]);
        assert_close(&result.weights[1][..2], &[0.75, 0.25]);
        for weights in &result.weights {
            assert!((weights.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            assert!(weights.windows(2).all(|pair| pair[0] >= pair[1]));
        }
    }

    #[test]
    fn given_vertex_without_weights_when_extracting_then_slots_stay_zero() {
        let input = skin(1, vec![vec![], vec![(0, 0.2)]]);
        let result = extract_skin_weights(&input, &SkinOptions::default()).unwrap();
        assert_eq!(result.weights[0], [0.0; 4]);
        assert_eq!(result.weights[1], [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn given_joints_over_budget_when_extracting_then_unused_and_light_joints_are_removed() {
        // joint 0 unused, joint 1 light, joint 2 exclusive, joint 3 heavy
        let input = skin(4, vec![vec![(3, 0.8), (1, 0.2)], vec![(2, 1.0)]]);
        let options = SkinOptions {
            joint_budget: 2,
            ..SkinOptions::default()
        };
        let result = extract_skin_weights(&input, &options).unwrap();

        assert_eq!(result.removed_joints, vec![0, 1]);
        assert_eq!(result.active_joints, vec![2, 3]);
        assert_eq!(result.remap, vec![None, None, Some(0), Some(1)]);
        assert_eq!(result.joints[0][0], 1);
        assert_close(&result.weights[0], &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(result.joints[1][0], 0);
    }

    #[test]
    fn given_only_exclusive_joints_when_over_budget_then_extraction_fails() {
        let input = skin(3, vec![vec![(0, 1.0)], vec![(1, 1.0)], vec![(2, 1.0)]]);
        let options = SkinOptions {
            joint_budget: 2,
            ..SkinOptions::default()
        };
        let err = extract_skin_weights(&input, &options).unwrap_err();
        assert!(matches!(err, SkinError::BudgetUnsatisfiable { joint_count: 3, budget: 2, .. }));
    }

    #[test]
    fn given_bad_joint_or_influence_count_when_extracting_then_error_is_returned() {
        let input = skin(2, vec![vec![(5, 1.0)]]);
        assert!(matches!(
            extract_skin_weights(&input, &SkinOptions::default()),
            Err(SkinError::JointOutOfRange { joint: 5, .. })
        ));

        let options = SkinOptions {
            max_influences: 6,
            ..SkinOptions::default()
        };
        assert!(matches!(
            extract_skin_weights(&skin(1, vec![]), &options),
            Err(SkinError::InvalidInfluenceCount(6))
        ));
    }
}
