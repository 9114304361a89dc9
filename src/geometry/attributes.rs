use log::warn;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::channel::{Primitive, Usage, VertexChannel};
use super::weld::{WeldOptions, WeldedMesh, weld};
use super::GeometryError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationMode {
    /// Never synthesize; keep the input channel if there is one.
    Never,
    /// Synthesize only when the input has no channel of this usage.
    #[default]
    IfMissing,
    /// Discard the input channel and synthesize.
    Always,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub normals: GenerationMode,
    pub tangents: GenerationMode,
    pub binormals: GenerationMode,
    /// On numeric failure, re-weld without the failing attributes.
    pub fallback: bool,
    /// Accumulated vectors shorter than this count as degenerate.
    pub min_length: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            normals: GenerationMode::IfMissing,
            tangents: GenerationMode::IfMissing,
            binormals: GenerationMode::IfMissing,
            fallback: true,
            min_length: 1e-12,
        }
    }
}

impl GenerationOptions {
    pub fn disabled() -> Self {
        Self {
            normals: GenerationMode::Never,
            tangents: GenerationMode::Never,
            binormals: GenerationMode::Never,
            ..Self::default()
        }
    }

    pub fn mode(&self, usage: Usage) -> GenerationMode {
        match usage {
            Usage::Normal => self.normals,
            Usage::Tangent => self.tangents,
            Usage::Binormal => self.binormals,
            _ => GenerationMode::Never,
        }
    }

    pub fn disable(&mut self, usage: Usage) {
        match usage {
            Usage::Normal => self.normals = GenerationMode::Never,
            Usage::Tangent => self.tangents = GenerationMode::Never,
            Usage::Binormal => self.binormals = GenerationMode::Never,
            _ => {}
        }
    }
}

/// Some generated attribute accumulated to a near-zero vector on at least
/// one vertex.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("mesh \"{mesh}\": could not generate {attributes:?}, accumulated vector is near zero")]
pub struct GenerationFailure {
    pub mesh: String,
    pub attributes: Vec<Usage>,
}

// ─── Generation ───────────────────────────────────────────────────────────────

/// Fill every generated channel of `mesh` from its triangles.
///
/// Each triangle contributes an area-weighted vector to its three corners.
/// A contribution pointing away from what a vertex has accumulated so far is
/// subtracted instead of added, so mirrored faces reinforce one direction.
/// Tangent and binormal need the texcoord set `bump_texcoord`.
pub fn generate_attributes(
    mesh: &mut WeldedMesh,
    bump_texcoord: Option<u32>,
    options: &GenerationOptions,
) -> Result<(), GenerationFailure> {
    let generated: Vec<VertexChannel> = mesh
        .layout
        .channels
        .iter()
        .filter(|channel| channel.generated)
        .copied()
        .collect();
    if generated.is_empty() {
        return Ok(());
    }

    let positions = mesh.positions().unwrap_or_default();
    let texcoords: Option<Vec<[f32; 2]>> = bump_texcoord
        .and_then(|set| mesh.layout.find(Usage::TexCoord, set).copied())
        .map(|channel| {
            mesh.channel_values(&channel)
                .map(|uv| [uv[0], uv.get(1).copied().unwrap_or(0.0)])
                .collect()
        });

    let mut failed = Vec::new();
    for channel in generated {
        let accumulated = match (channel.usage, &texcoords) {
            (Usage::Normal, _) => accumulate_normals(&positions, &mesh.indices),
            (Usage::Tangent | Usage::Binormal, Some(uvs)) => {
                accumulate_uv_frame(&positions, uvs, &mesh.indices, channel.usage)
            }
            (Usage::Tangent | Usage::Binormal, None) => {
                failed.push(channel.usage);
                continue;
            }
            _ => continue,
        };
        match normalize_all(accumulated, options.min_length) {
            Some(vectors) => mesh.write_channel(&channel, &vectors),
            None => failed.push(channel.usage),
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(GenerationFailure {
            mesh: mesh.name.clone(),
            attributes: failed,
        })
    }
}

fn accumulate(target: &mut Vector3<f32>, contribution: Vector3<f32>) {
    if target.dot(&contribution) < 0.0 {
        *target -= contribution;
    } else {
        *target += contribution;
    }
}

fn accumulate_normals(positions: &[Vector3<f32>], indices: &[u16]) -> Vec<Vector3<f32>> {
    let mut sums = vec![Vector3::zeros(); positions.len()];
    for corners in indices.chunks_exact(3) {
        let [a, b, c] = [corners[0] as usize, corners[1] as usize, corners[2] as usize];
        // cross length is twice the area
        let normal = (positions[b] - positions[a]).cross(&(positions[c] - positions[a]));
        for vertex in [a, b, c] {
            accumulate(&mut sums[vertex], normal);
        }
    }
    sums
}

fn accumulate_uv_frame(
    positions: &[Vector3<f32>],
    uvs: &[[f32; 2]],
    indices: &[u16],
    usage: Usage,
) -> Vec<Vector3<f32>> {
    let mut sums = vec![Vector3::zeros(); positions.len()];
    for corners in indices.chunks_exact(3) {
        let [a, b, c] = [corners[0] as usize, corners[1] as usize, corners[2] as usize];
        let e1 = positions[b] - positions[a];
        let e2 = positions[c] - positions[a];
        let (du1, dv1) = (uvs[b][0] - uvs[a][0], uvs[b][1] - uvs[a][1]);
        let (du2, dv2) = (uvs[c][0] - uvs[a][0], uvs[c][1] - uvs[a][1]);
        let uv_cross = du1 * dv2 - du2 * dv1;
        if uv_cross == 0.0 {
            continue;
        }
        let direction = match usage {
            Usage::Tangent => e1 * dv2 - e2 * dv1,
            _ => e2 * du1 - e1 * du2,
        } * uv_cross.signum();
        let area = e1.cross(&e2).norm() * 0.5;
        let Some(direction) = direction.try_normalize(f32::MIN_POSITIVE) else {
            continue;
        };
        for vertex in [a, b, c] {
            accumulate(&mut sums[vertex], direction * area);
        }
    }
    sums
}

fn normalize_all(vectors: Vec<Vector3<f32>>, min_length: f32) -> Option<Vec<Vector3<f32>>> {
    vectors
        .into_iter()
        .map(|vector| vector.try_normalize(min_length))
        .collect()
}

// ─── Fallback driver ──────────────────────────────────────────────────────────

/// Weld `primitive` and generate its missing attributes. When generation
/// fails and fallback is enabled, the failing attributes are switched off
/// (their input channels are kept when present) and the primitive is welded
/// again; the switched-off usages are listed in `stats.fallback`.
pub fn weld_and_generate(
    primitive: &Primitive,
    options: &WeldOptions,
    bump_texcoord: Option<u32>,
) -> Result<WeldedMesh, GeometryError> {
    let mut options = options.clone();
    let mut fallback = Vec::new();
    loop {
        let mut mesh = weld(primitive, &options, bump_texcoord)?;
        match generate_attributes(&mut mesh, bump_texcoord, &options.generation) {
            Ok(()) => {
                mesh.stats.fallback = fallback;
                return Ok(mesh);
            }
            Err(failure) if options.generation.fallback => {
                warn!(
                    "{}: generating {:?} failed, re-welding without them",
                    primitive.name, failure.attributes
                );
                for usage in failure.attributes {
                    options.generation.disable(usage);
                    fallback.push(usage);
                }
            }
            Err(failure) => return Err(failure.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::channel::{IndexStream, RawChannel};
    use crate::geometry::weld::lanes_to_vector;

    fn single_stream(name: &str, channels: Vec<RawChannel>, indices: Vec<u32>) -> Primitive {
        Primitive {
            name: name.to_string(),
            streams: vec![IndexStream { indices, channels }],
        }
    }

    fn square_with_uvs() -> Primitive {
        let positions = vec![
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            1.0, 1.0, 0.0, //
            0.0, 1.0, 0.0,
        ];
        let uvs = vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        single_stream(
            "square",
            vec![
                RawChannel::new(Usage::Position, 0, 3, positions),
                RawChannel::new(Usage::TexCoord, 0, 2, uvs),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    fn value(mesh: &WeldedMesh, usage: Usage, vertex: usize) -> Vector3<f32> {
        let channel = *mesh.layout.first(usage).unwrap();
        lanes_to_vector(mesh.channel_values(&channel).nth(vertex).unwrap())
    }

    #[test]
    fn given_flat_square_when_generating_then_normals_face_up() {
        let mesh = weld_and_generate(&square_with_uvs(), &WeldOptions::default(), None).unwrap();

        let normal = mesh.layout.first(Usage::Normal).unwrap();
        assert!(normal.generated);
        for vertex in 0..mesh.vertex_count() {
            assert!((value(&mesh, Usage::Normal, vertex) - Vector3::z()).norm() < 1e-6);
        }
        assert!(mesh.layout.first(Usage::Tangent).is_none());
    }

    #[test]
    fn given_bump_texcoord_when_generating_then_tangent_frame_follows_uvs() {
        let mesh =
            weld_and_generate(&square_with_uvs(), &WeldOptions::default(), Some(0)).unwrap();

        for vertex in 0..mesh.vertex_count() {
            assert!((value(&mesh, Usage::Tangent, vertex) - Vector3::x()).norm() < 1e-6);
            assert!((value(&mesh, Usage::Binormal, vertex) - Vector3::y()).norm() < 1e-6);
        }
    }

    #[test]
    fn given_mirrored_uvs_when_generating_then_tangent_sign_follows_uv_winding() {
        let mut primitive = square_with_uvs();
        // u runs right to left
        primitive.streams[0].channels[1].data = vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mesh = weld_and_generate(&primitive, &WeldOptions::default(), Some(0)).unwrap();
        assert!((value(&mesh, Usage::Tangent, 0) + Vector3::x()).norm() < 1e-6);
    }

    #[test]
    fn given_opposite_faces_on_shared_vertices_when_generating_then_flip_rule_keeps_a_direction() {
        // the same triangle twice with opposite winding
        let positions = vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let primitive = single_stream(
            "sheet",
            vec![RawChannel::new(Usage::Position, 0, 3, positions)],
            vec![0, 1, 2, 0, 2, 1],
        );
        let mesh = weld_and_generate(&primitive, &WeldOptions::default(), None).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        assert!((value(&mesh, Usage::Normal, 0).z.abs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn given_uv_degenerate_tangents_when_fallback_enabled_then_raw_tangent_is_kept() {
        let mut primitive = square_with_uvs();
        // all texcoords equal: no tangent direction anywhere
        primitive.streams[0].channels[1].data = vec![0.5; 8];
        primitive.streams[0]
            .channels
            .push(RawChannel::new(Usage::Tangent, 0, 3, [1.0, 0.0, 0.0].repeat(4)));
        let options = WeldOptions {
            generation: GenerationOptions {
                tangents: GenerationMode::Always,
                binormals: GenerationMode::Never,
                ..GenerationOptions::default()
            },
            ..WeldOptions::default()
        };

        let mesh = weld_and_generate(&primitive, &options, Some(0)).unwrap();
        assert_eq!(mesh.stats.fallback, vec![Usage::Tangent]);
        let tangent = mesh.layout.first(Usage::Tangent).unwrap();
        assert!(!tangent.generated);
        assert_eq!(value(&mesh, Usage::Tangent, 0), Vector3::x());
    }

    #[test]
    fn given_uv_degenerate_tangents_when_fallback_disabled_then_generation_fails() {
        let mut primitive = square_with_uvs();
        primitive.streams[0].channels[1].data = vec![0.5; 8];
        let options = WeldOptions {
            generation: GenerationOptions {
                fallback: false,
                ..GenerationOptions::default()
            },
            ..WeldOptions::default()
        };

        let err = weld_and_generate(&primitive, &options, Some(0)).unwrap_err();
        match err {
            GeometryError::Generation(failure) => {
                assert_eq!(failure.attributes, vec![Usage::Tangent, Usage::Binormal]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
