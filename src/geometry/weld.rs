use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::attributes::{GenerationMode, GenerationOptions};
use super::channel::{ChannelFilter, Primitive, Usage, VertexChannel, VertexLayout};
use super::clean::{CleanOptions, clean_triangles, compact_vertices};
use super::GeometryError;

/// 16-bit indices address at most this many vertices.
pub const MAX_VERTICES: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeldOptions {
    /// Position lanes closer than this (euclidean) are merged.
    pub tolerance: f32,
    pub filter: ChannelFilter,
    pub generation: GenerationOptions,
    pub clean: CleanOptions,
}

impl Default for WeldOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            filter: ChannelFilter::default(),
            generation: GenerationOptions::default(),
            clean: CleanOptions::default(),
        }
    }
}

/// Per-mesh counters surfaced in the conversion report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeshStats {
    pub input_corners: usize,
    pub welded_vertices: usize,
    pub degenerate_triangles: usize,
    pub duplicate_triangles: usize,
    pub unreferenced_vertices: usize,
    pub dropped_channels: Vec<VertexChannel>,
    pub fallback: Vec<Usage>,
}

/// Welded mesh: interleaved f32 vertex records plus a shared index array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeldedMesh {
    pub name: String,
    pub layout: VertexLayout,
    pub vertices: Vec<f32>,
    pub indices: Vec<u16>,
    pub stats: MeshStats,
}

impl WeldedMesh {
    pub fn vertex_count(&self) -> usize {
        match self.layout.stride_floats() {
            0 => 0,
            stride => self.vertices.len() / stride,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex(&self, index: usize) -> &[f32] {
        let stride = self.layout.stride_floats();
        &self.vertices[index * stride..(index + 1) * stride]
    }

    /// The vertex buffer as little-endian bytes.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn channel_values<'a>(
        &'a self,
        channel: &VertexChannel,
    ) -> impl Iterator<Item = &'a [f32]> + 'a {
        let range = channel.float_range();
        let stride = self.layout.stride_floats().max(1);
        self.vertices
            .chunks_exact(stride)
            .map(move |vertex| &vertex[range.clone()])
    }

    pub fn positions(&self) -> Option<Vec<Vector3<f32>>> {
        let channel = self.layout.first(Usage::Position)?;
        Some(self.channel_values(channel).map(lanes_to_vector).collect())
    }

    pub(super) fn write_channel(&mut self, channel: &VertexChannel, values: &[Vector3<f32>]) {
        let range = channel.float_range();
        let stride = self.layout.stride_floats();
        for (vertex, value) in self.vertices.chunks_exact_mut(stride).zip(values) {
            for (lane, slot) in vertex[range.clone()].iter_mut().enumerate() {
                *slot = value.get(lane).copied().unwrap_or(0.0);
            }
        }
    }
}

pub(super) fn lanes_to_vector(lanes: &[f32]) -> Vector3<f32> {
    Vector3::new(
        lanes.first().copied().unwrap_or(0.0),
        lanes.get(1).copied().unwrap_or(0.0),
        lanes.get(2).copied().unwrap_or(0.0),
    )
}

// ─── Layout planning ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelSource {
    Raw { stream: usize, channel: usize },
    Generated,
}

/// Output layout of a primitive and where each of its channels comes from.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutPlan {
    pub layout: VertexLayout,
    sources: Vec<ChannelSource>,
    /// Raw channels rejected by the filter, the per-usage limit or generation.
    pub dropped: Vec<VertexChannel>,
}

/// Decide which raw channels survive and which attributes are generated.
/// Duplicate usage+index pairs keep the first occurrence.
pub fn plan_layout(
    primitive: &Primitive,
    filter: &ChannelFilter,
    generation: &GenerationOptions,
    bump_texcoord: Option<u32>,
) -> Result<LayoutPlan, GeometryError> {
    primitive.validate()?;

    let mut layout = VertexLayout::default();
    let mut sources = Vec::new();
    let mut dropped = Vec::new();
    let mut taken = BTreeSet::new();
    let mut per_usage: BTreeMap<Usage, u32> = BTreeMap::new();

    for (stream_index, stream) in primitive.streams.iter().enumerate() {
        for (channel_index, channel) in stream.channels.iter().enumerate() {
            let used = per_usage.get(&channel.usage).copied().unwrap_or(0);
            let replaced = generation.mode(channel.usage) == GenerationMode::Always;
            if !filter.accepts(channel.usage)
                || replaced
                || used >= channel.usage.max_channels()
                || !taken.insert((channel.usage, channel.usage_index))
            {
                dropped.push(VertexChannel {
                    usage: channel.usage,
                    usage_index: channel.usage_index,
                    components: channel.components,
                    offset: 0,
                    stride: channel.components * 4,
                    kept: false,
                    generated: false,
                });
                continue;
            }
            per_usage.insert(channel.usage, used + 1);
            layout.push(channel.usage, channel.usage_index, channel.components, false);
            sources.push(ChannelSource::Raw {
                stream: stream_index,
                channel: channel_index,
            });
        }
    }

    if layout.first(Usage::Position).is_none() {
        return Err(GeometryError::MissingPosition {
            primitive: primitive.name.clone(),
        });
    }

    let has_bump_texcoord =
        bump_texcoord.is_some_and(|set| layout.find(Usage::TexCoord, set).is_some());
    for usage in [Usage::Normal, Usage::Tangent, Usage::Binormal] {
        if !filter.accepts(usage) {
            continue;
        }
        let wanted = match generation.mode(usage) {
            GenerationMode::Never => false,
            GenerationMode::IfMissing => layout.first(usage).is_none(),
            GenerationMode::Always => true,
        };
        if !wanted {
            continue;
        }
        if usage != Usage::Normal && !has_bump_texcoord {
            debug!(
                "{}: no bump texcoord set, {usage:?} is not generated",
                primitive.name
            );
            continue;
        }
        layout.push(usage, 0, 3, true);
        sources.push(ChannelSource::Generated);
    }

    Ok(LayoutPlan {
        layout,
        sources,
        dropped,
    })
}

// ─── Welding ──────────────────────────────────────────────────────────────────

/// Bucketed lookup of already emitted vertices. Buckets are keyed by the
/// quantized position cell, so a tolerance match can only live in the 27
/// cells around the candidate. Bucket contents keep insertion order.
struct WeldCache {
    cell: f32,
    tolerance_sq: f32,
    position: Range<usize>,
    buckets: BTreeMap<[i64; 3], Vec<u32>>,
}

impl WeldCache {
    fn new(layout: &VertexLayout, tolerance: f32) -> Self {
        let position = layout
            .first(Usage::Position)
            .map(|channel| channel.float_range())
            .unwrap_or(0..0);
        let tolerance = tolerance.max(0.0);
        Self {
            cell: tolerance,
            tolerance_sq: tolerance * tolerance,
            position,
            buckets: BTreeMap::new(),
        }
    }

    fn key(&self, vertex: &[f32]) -> [i64; 3] {
        let mut key = [0i64; 3];
        for (slot, value) in key.iter_mut().zip(&vertex[self.position.clone()]) {
            *slot = if self.cell > 0.0 {
                (value / self.cell).floor() as i64
            } else {
                // +0.0 folds negative zero into the same bucket
                i64::from((value + 0.0).to_bits())
            };
        }
        key
    }

    fn find(&self, layout: &VertexLayout, vertices: &[f32], candidate: &[f32]) -> Option<u32> {
        let stride = candidate.len();
        let base = self.key(candidate);
        let reach: i64 = if self.cell > 0.0 { 1 } else { 0 };
        let mut best: Option<u32> = None;
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                for dz in -reach..=reach {
                    let key = [
                        base[0].saturating_add(dx),
                        base[1].saturating_add(dy),
                        base[2].saturating_add(dz),
                    ];
                    let Some(bucket) = self.buckets.get(&key) else {
                        continue;
                    };
                    let hit = bucket.iter().copied().find(|&vertex| {
                        let start = vertex as usize * stride;
                        self.equal(layout, &vertices[start..start + stride], candidate)
                    });
                    if let Some(hit) = hit {
                        best = Some(best.map_or(hit, |current| current.min(hit)));
                    }
                }
            }
        }
        best
    }

    fn insert(&mut self, vertex: &[f32], number: u32) {
        self.buckets.entry(self.key(vertex)).or_default().push(number);
    }

    fn equal(&self, layout: &VertexLayout, a: &[f32], b: &[f32]) -> bool {
        layout.channels.iter().all(|channel| {
            let range = channel.float_range();
            let (a, b) = (&a[range.clone()], &b[range]);
            if channel.usage == Usage::Position {
                let distance_sq: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                distance_sq <= self.tolerance_sq
            } else {
                a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
        })
    }
}

/// Position-only welding for triangle soups that are not bound by the 16-bit
/// vertex limit.
pub struct PointWelder {
    layout: VertexLayout,
    cache: WeldCache,
    points: Vec<f32>,
}

impl PointWelder {
    pub fn new(tolerance: f32) -> Self {
        let mut layout = VertexLayout::default();
        layout.push(Usage::Position, 0, 3, false);
        let cache = WeldCache::new(&layout, tolerance);
        Self {
            layout,
            cache,
            points: Vec::new(),
        }
    }

    /// Number of the point equal to `point`, appending it when new.
    pub fn insert(&mut self, point: &Vector3<f32>) -> u32 {
        let candidate = [point.x, point.y, point.z];
        if let Some(existing) = self.cache.find(&self.layout, &self.points, &candidate) {
            return existing;
        }
        let number = self.len() as u32;
        self.points.extend_from_slice(&candidate);
        self.cache.insert(&candidate, number);
        number
    }

    pub fn len(&self) -> usize {
        self.points.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_points(self) -> Vec<Vector3<f32>> {
        self.points.chunks_exact(3).map(lanes_to_vector).collect()
    }
}

/// Assemble one candidate vertex per index corner and merge equal ones.
/// Generated channels are left zeroed.
pub fn weld_vertices(
    primitive: &Primitive,
    plan: &LayoutPlan,
    tolerance: f32,
) -> Result<WeldedMesh, GeometryError> {
    let layout = &plan.layout;
    let stride = layout.stride_floats();
    let corners = primitive.corner_count();

    let mut cache = WeldCache::new(layout, tolerance);
    let mut vertices: Vec<f32> = Vec::new();
    let mut indices: Vec<u16> = Vec::with_capacity(corners);
    let mut candidate = vec![0.0f32; stride];

    for corner in 0..corners {
        candidate.fill(0.0);
        for (channel, source) in layout.channels.iter().zip(&plan.sources) {
            let ChannelSource::Raw { stream, channel: raw } = *source else {
                continue;
            };
            let stream = &primitive.streams[stream];
            let raw = &stream.channels[raw];
            let index = stream.indices[corner];
            let element = raw.element(index as usize).ok_or_else(|| {
                GeometryError::IndexOutOfRange {
                    primitive: primitive.name.clone(),
                    usage: raw.usage,
                    index,
                    len: raw.len(),
                }
            })?;
            candidate[channel.float_range()].copy_from_slice(element);
        }

        let number = match cache.find(layout, &vertices, &candidate) {
            Some(existing) => existing,
            None => {
                let next = vertices.len() / stride.max(1);
                if next >= MAX_VERTICES {
                    return Err(GeometryError::VertexBudgetExceeded {
                        primitive: primitive.name.clone(),
                        limit: MAX_VERTICES,
                    });
                }
                vertices.extend_from_slice(&candidate);
                cache.insert(&candidate, next as u32);
                next as u32
            }
        };
        indices.push(number as u16);
    }

    let welded_vertices = vertices.len() / stride.max(1);
    debug!(
        "{}: {corners} corners welded to {welded_vertices} vertices",
        primitive.name
    );
    Ok(WeldedMesh {
        name: primitive.name.clone(),
        layout: layout.clone(),
        vertices,
        indices,
        stats: MeshStats {
            input_corners: corners,
            welded_vertices,
            dropped_channels: plan.dropped.clone(),
            ..MeshStats::default()
        },
    })
}

/// Weld, drop degenerate and duplicate triangles, then drop vertices no
/// surviving triangle references.
pub fn weld(
    primitive: &Primitive,
    options: &WeldOptions,
    bump_texcoord: Option<u32>,
) -> Result<WeldedMesh, GeometryError> {
    let plan = plan_layout(primitive, &options.filter, &options.generation, bump_texcoord)?;
    let mut mesh = weld_vertices(primitive, &plan, options.tolerance)?;
    let cleaned = clean_triangles(&mut mesh, &options.clean, options.tolerance);
    mesh.stats.degenerate_triangles = cleaned.degenerate;
    mesh.stats.duplicate_triangles = cleaned.duplicate;
    mesh.stats.unreferenced_vertices = compact_vertices(&mut mesh);
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::channel::{IndexStream, RawChannel};
    use crate::geometry::{FilterMode, weld_and_generate};

    /// Two triangles sharing the 1-2 edge, every corner spelled out.
    fn quad() -> Primitive {
        let positions = vec![
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            1.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, //
            1.0, 1.0, 0.0, //
            0.0, 1.0, 0.0,
        ];
        let normals = [0.0, 0.0, 1.0].repeat(6);
        let uvs = vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        Primitive {
            name: "quad".to_string(),
            streams: vec![
                IndexStream {
                    indices: (0..6).collect(),
                    channels: vec![
                        RawChannel::new(Usage::Position, 0, 3, positions),
                        RawChannel::new(Usage::Normal, 0, 3, normals),
                    ],
                },
                IndexStream {
                    indices: (0..6).collect(),
                    channels: vec![RawChannel::new(Usage::TexCoord, 0, 2, uvs)],
                },
            ],
        }
    }

    #[test]
    fn given_shared_edge_quad_when_welding_then_four_vertices_remain() {
        let mesh = weld(&quad(), &WeldOptions::default(), None).unwrap();

        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.layout.stride, 32);
        assert_eq!(mesh.vertex_bytes().len(), 4 * 32);
    }

    #[test]
    fn given_welded_mesh_when_reading_corners_then_source_data_is_preserved() {
        let primitive = quad();
        let plan = plan_layout(&primitive, &ChannelFilter::default(), &GenerationOptions::default(), None)
            .unwrap();
        let mesh = weld_vertices(&primitive, &plan, 0.0).unwrap();

        assert!(mesh.vertex_count() <= primitive.corner_count());
        let positions = &primitive.streams[0].channels[0];
        let uvs = &primitive.streams[1].channels[0];
        for (corner, &vertex) in mesh.indices.iter().enumerate() {
            let record = mesh.vertex(vertex as usize);
            assert_eq!(&record[0..3], positions.element(corner).unwrap());
            assert_eq!(&record[6..8], uvs.element(corner).unwrap());
        }
    }

    #[test]
    fn given_near_positions_when_welding_with_tolerance_then_they_merge_across_cells() {
        let mut primitive = quad();
        // corners 0 and 3 now sit in neighbouring cells of the 1e-3 grid
        primitive.streams[0].channels[0].data[0] = -0.000_1;
        primitive.streams[0].channels[0].data[9] = 0.000_5;
        let options = WeldOptions {
            tolerance: 1e-3,
            ..WeldOptions::default()
        };
        let mesh = weld(&primitive, &options, None).unwrap();
        assert_eq!(mesh.vertex_count(), 4);

        let exact = weld(&primitive, &WeldOptions { tolerance: 0.0, ..options }, None).unwrap();
        assert_eq!(exact.vertex_count(), 5);
    }

    #[test]
    fn given_welded_mesh_when_comparing_vertices_then_no_two_are_equal() {
        let primitive = quad();
        let mesh = weld(&primitive, &WeldOptions::default(), None).unwrap();
        let cache = WeldCache::new(&mesh.layout, 1e-5);
        for a in 0..mesh.vertex_count() {
            for b in a + 1..mesh.vertex_count() {
                assert!(!cache.equal(&mesh.layout, mesh.vertex(a), mesh.vertex(b)));
            }
        }
    }

    #[test]
    fn given_differing_texcoords_when_welding_then_vertices_stay_split() {
        let mut primitive = quad();
        // corner 3 repeats corner 0's position with another uv
        primitive.streams[1].channels[0].data[6] = 0.5;
        let mesh = weld(&primitive, &WeldOptions::default(), None).unwrap();
        assert_eq!(mesh.vertex_count(), 5);
    }

    #[test]
    fn given_repeated_triangle_with_other_uvs_when_welding_then_only_first_survives() {
        let mut primitive = quad();
        // the second triangle repeats the first one's positions and normals
        primitive.streams[0].indices = vec![0, 1, 2, 0, 1, 2];
        let mesh = weld(&primitive, &WeldOptions::default(), None).unwrap();

        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.stats.duplicate_triangles, 1);
        assert_eq!(mesh.vertex_count(), 3);
    }

    #[test]
    fn given_single_collapsed_triangle_when_welding_then_nothing_remains() {
        let primitive = Primitive {
            name: "point".to_string(),
            streams: vec![IndexStream {
                indices: vec![0, 1, 2],
                channels: vec![RawChannel::new(Usage::Position, 0, 3, [2.0, 3.0, 4.0].repeat(3))],
            }],
        };
        let mesh = weld(&primitive, &WeldOptions::default(), None).unwrap();
        assert_eq!(mesh.triangle_count(), 0);
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.stats.degenerate_triangles, 1);

        let generated = weld_and_generate(&primitive, &WeldOptions::default(), None).unwrap();
        assert_eq!(generated.triangle_count(), 0);
        assert_eq!(generated.vertex_count(), 0);
    }

    #[test]
    fn given_filter_and_duplicates_when_planning_then_first_occurrence_wins() {
        let mut primitive = quad();
        primitive.streams[1].channels.push(RawChannel::new(
            Usage::TexCoord,
            0,
            2,
            vec![9.0; 12],
        ));
        primitive.streams[1]
            .channels
            .push(RawChannel::new(Usage::Color, 0, 4, vec![1.0; 24]));
        let filter = ChannelFilter {
            mode: FilterMode::Exclude,
            usages: vec![Usage::Color],
        };
        let plan = plan_layout(&primitive, &filter, &GenerationOptions::default(), None).unwrap();

        let kept: Vec<_> = plan.layout.channels.iter().map(|c| c.usage).collect();
        assert_eq!(kept, vec![Usage::Position, Usage::Normal, Usage::TexCoord]);
        assert_eq!(plan.dropped.len(), 2);
        assert!(plan.dropped.iter().all(|channel| !channel.kept));
    }

    #[test]
    fn given_out_of_range_index_when_welding_then_error_names_the_channel() {
        let mut primitive = quad();
        primitive.streams[1].indices[5] = 40;
        let err = weld(&primitive, &WeldOptions::default(), None).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::IndexOutOfRange { usage: Usage::TexCoord, index: 40, .. }
        ));
    }

    #[test]
    fn given_no_position_channel_when_planning_then_error_is_returned() {
        let mut primitive = quad();
        primitive.streams.remove(0);
        let err = plan_layout(&primitive, &ChannelFilter::default(), &GenerationOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, GeometryError::MissingPosition { .. }));
    }

    #[test]
    fn given_points_within_tolerance_when_welding_points_then_first_number_is_reused() {
        let mut welder = PointWelder::new(0.01);
        assert_eq!(welder.insert(&Vector3::new(0.0, 0.0, 0.0)), 0);
        assert_eq!(welder.insert(&Vector3::new(1.0, 0.0, 0.0)), 1);
        assert_eq!(welder.insert(&Vector3::new(0.005, -0.005, 0.0)), 0);
        assert_eq!(welder.len(), 2);
        assert_eq!(welder.into_points()[1], Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn given_too_many_distinct_vertices_when_welding_then_budget_error_is_returned() {
        let corners = MAX_VERTICES + 2;
        let corners = corners - corners % 3 + 3;
        let positions: Vec<f32> = (0..corners).flat_map(|i| [i as f32, 0.0, 0.0]).collect();
        let primitive = Primitive {
            name: "huge".to_string(),
            streams: vec![IndexStream {
                indices: (0..corners as u32).collect(),
                channels: vec![RawChannel::new(Usage::Position, 0, 3, positions)],
            }],
        };
        let options = WeldOptions {
            generation: GenerationOptions::disabled(),
            ..WeldOptions::default()
        };
        let err = weld(&primitive, &options, None).unwrap_err();
        assert!(matches!(err, GeometryError::VertexBudgetExceeded { limit: MAX_VERTICES, .. }));
    }
}
