use std::{fs, path::Path};

use anyhow::{Context, Result};
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::diagnostics::ValidationIssue;
use crate::geometry::{MeshStats, VertexLayout, WeldOptions, WeldedMesh};
use crate::physics::{PhysicsMesh, PhysicsOptions, SpatialTree};
use crate::skin::SkinOptions;

// ─── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    pub weld: WeldOptions,
    pub skin: SkinOptions,
    pub physics: PhysicsOptions,
    /// Rotate Z_UP and X_UP documents into Y_UP.
    pub convert_up_axis: bool,
    /// Scale by `<unit meter>` so output is in meters.
    pub apply_unit_scale: bool,
    pub write_report: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            weld: WeldOptions::default(),
            skin: SkinOptions::default(),
            physics: PhysicsOptions::default(),
            convert_up_axis: true,
            apply_unit_scale: true,
            write_report: true,
        }
    }
}

impl ConvertOptions {
    /// Options from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read options file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse options file: {}", path.display()))
    }
}

// ─── Baked scene ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BakedSkin {
    /// Surviving joints in output index order.
    pub joint_names: Vec<String>,
    pub inverse_binds: Vec<Matrix4<f32>>,
    pub removed_joints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BakedMesh {
    pub name: String,
    pub node: String,
    pub material: Option<String>,
    pub world: Matrix4<f32>,
    pub mesh: WeldedMesh,
    pub skin: Option<BakedSkin>,
}

/// Everything written to the output file.
#[derive(Debug, Clone, PartialEq)]
pub struct BakedScene {
    pub up_axis: String,
    pub meshes: Vec<BakedMesh>,
    pub physics: PhysicsMesh,
    pub tree: SpatialTree,
}

// ─── Report ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MeshReport {
    pub name: String,
    pub node: String,
    pub material: Option<String>,
    pub vertices: usize,
    pub triangles: usize,
    pub layout: VertexLayout,
    pub stats: MeshStats,
    pub joints: usize,
    pub removed_joints: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhysicsReport {
    pub triangles: usize,
    pub vertices: usize,
    pub tree_nodes: usize,
    pub degenerate_triangles: usize,
    pub duplicate_triangles: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub input: String,
    pub output: String,
    pub up_axis: String,
    pub documents_loaded: usize,
    pub mesh_count: usize,
    pub total_vertices: usize,
    pub total_triangles: usize,
    pub meshes: Vec<MeshReport>,
    pub physics: PhysicsReport,
    pub issues: Vec<ValidationIssue>,
}
