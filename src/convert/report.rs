use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use super::types::{BakedScene, ConversionReport, MeshReport, PhysicsReport};
use crate::diagnostics::ValidationIssue;

pub fn build_report(
    input: &Path,
    output: &Path,
    scene: &BakedScene,
    documents_loaded: usize,
    issues: Vec<ValidationIssue>,
) -> ConversionReport {
    let meshes: Vec<MeshReport> = scene
        .meshes
        .iter()
        .map(|baked| MeshReport {
            name: baked.name.clone(),
            node: baked.node.clone(),
            material: baked.material.clone(),
            vertices: baked.mesh.vertex_count(),
            triangles: baked.mesh.triangle_count(),
            layout: baked.mesh.layout.clone(),
            stats: baked.mesh.stats.clone(),
            joints: baked.skin.as_ref().map_or(0, |skin| skin.joint_names.len()),
            removed_joints: baked
                .skin
                .as_ref()
                .map(|skin| skin.removed_joints.clone())
                .unwrap_or_default(),
        })
        .collect();

    ConversionReport {
        input: input.display().to_string(),
        output: output.display().to_string(),
        up_axis: scene.up_axis.clone(),
        documents_loaded,
        mesh_count: meshes.len(),
        total_vertices: meshes.iter().map(|mesh| mesh.vertices).sum(),
        total_triangles: meshes.iter().map(|mesh| mesh.triangles).sum(),
        meshes,
        physics: PhysicsReport {
            triangles: scene.physics.triangles.len(),
            vertices: scene.physics.positions.len(),
            tree_nodes: scene.tree.len(),
            degenerate_triangles: scene.physics.degenerate_triangles,
            duplicate_triangles: scene.physics.duplicate_triangles,
        },
        issues,
    }
}

/// `<output>.report.json` next to the output file.
pub fn report_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".report.json");
    PathBuf::from(name)
}

pub fn write_report(path: &Path, report: &ConversionReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("failed to serialize conversion report")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write report: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_output_path_when_naming_report_then_suffix_is_appended() {
        assert_eq!(
            report_path(Path::new("out/level.sbk")),
            PathBuf::from("out/level.sbk.report.json")
        );
    }
}
