use std::{fs, path::Path};

use anyhow::{Context, Result};
use nalgebra::Matrix4;

use super::types::{BakedMesh, BakedScene};
use crate::physics::{Side, SpatialNode};

pub const MAGIC: [u8; 4] = *b"SBK1";

/// Bytes per serialized tree node.
pub const NODE_SIZE: usize = 12;

const LEAF_TAG: u8 = 0xFF;
const BACK_FLAG: u8 = 4;

/// Little-endian fixed-width field writer.
#[derive(Default)]
struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    fn u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn f32(&mut self, value: f32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn count(&mut self, value: usize) {
        self.u32(value as u32);
    }

    /// u32 byte length followed by UTF-8.
    fn str(&mut self, value: &str) {
        self.count(value.len());
        self.bytes.extend_from_slice(value.as_bytes());
    }

    /// Column-major, like every matrix in the file.
    fn matrix(&mut self, matrix: &Matrix4<f32>) {
        for value in matrix.as_slice() {
            self.f32(*value);
        }
    }

    fn floats(&mut self, values: &[f32]) {
        if cfg!(target_endian = "little") {
            self.bytes.extend_from_slice(bytemuck::cast_slice(values));
        } else {
            for value in values {
                self.f32(*value);
            }
        }
    }
}

/// Serialize the scene into the `SBK1` layout.
pub fn encode_scene(scene: &BakedScene) -> Vec<u8> {
    let mut out = Writer::default();
    out.bytes.extend_from_slice(&MAGIC);
    out.str(&scene.up_axis);

    out.count(scene.meshes.len());
    for mesh in &scene.meshes {
        encode_mesh(&mut out, mesh);
    }

    let physics = &scene.physics;
    out.count(physics.triangles.len());
    out.count(physics.positions.len());
    let (min, max): ([f32; 3], [f32; 3]) = if physics.bounds.is_empty() {
        ([0.0; 3], [0.0; 3])
    } else {
        (physics.bounds.min.into(), physics.bounds.max.into())
    };
    out.floats(&min);
    out.floats(&max);
    for position in &physics.positions {
        out.floats(position.as_slice());
    }
    for triangle in &physics.triangles {
        for corner in triangle {
            out.u32(*corner);
        }
    }

    out.count(scene.tree.len());
    for node in &scene.tree.nodes {
        out.bytes.extend_from_slice(&encode_node(node));
    }
    out.bytes
}

fn encode_mesh(out: &mut Writer, baked: &BakedMesh) {
    let mesh = &baked.mesh;
    out.str(&baked.name);
    out.matrix(&baked.world);

    out.count(mesh.layout.channels.len());
    for channel in &mesh.layout.channels {
        out.u8(channel.usage.code());
        out.u8(channel.usage_index as u8);
        out.u8(channel.components as u8);
        out.u8(u8::from(channel.generated));
        out.count(channel.offset);
    }
    out.count(mesh.layout.stride);

    out.count(mesh.vertex_count());
    out.floats(&mesh.vertices);
    out.count(mesh.indices.len());
    for index in &mesh.indices {
        out.u16(*index);
    }

    match &baked.skin {
        Some(skin) => {
            out.u8(1);
            out.count(skin.joint_names.len());
            for (name, inverse_bind) in skin.joint_names.iter().zip(&skin.inverse_binds) {
                out.str(name);
                out.matrix(inverse_bind);
            }
            out.count(skin.removed_joints.len());
            for name in &skin.removed_joints {
                out.str(name);
            }
        }
        None => out.u8(0),
    }
}

/// `Split`: axis tag (| 4 for back halves), 3 pad bytes, f32 position, u32
/// sibling. `Leaf`: 0xFF, 3 pad bytes, u32 triangle, u32 zero.
pub fn encode_node(node: &SpatialNode) -> [u8; NODE_SIZE] {
    let mut bytes = [0u8; NODE_SIZE];
    match *node {
        SpatialNode::Split {
            axis,
            position,
            side,
            sibling,
        } => {
            let back = if side == Side::Back { BACK_FLAG } else { 0 };
            bytes[0] = axis.index() as u8 | back;
            bytes[4..8].copy_from_slice(&position.to_le_bytes());
            bytes[8..12].copy_from_slice(&sibling.to_le_bytes());
        }
        SpatialNode::Leaf { triangle } => {
            bytes[0] = LEAF_TAG;
            bytes[4..8].copy_from_slice(&triangle.to_le_bytes());
        }
    }
    bytes
}

pub fn write_scene(path: &Path, scene: &BakedScene) -> Result<()> {
    fs::write(path, encode_scene(scene))
        .with_context(|| format!("failed to write output: {}", path.display()))
}
