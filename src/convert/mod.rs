//! COLLADA scene to `SBK1` conversion: load and resolve the document graph,
//! weld every drawable, merge the world triangles and build the partition
//! tree over them.

mod binary;
mod controller;
mod material;
mod mesh;
mod report;
mod scene;
mod types;

use std::{path::Path, str::FromStr};

use anyhow::{Context, Result};
use log::{debug, info};
use nalgebra::{Matrix4, Point3, Vector3};

pub use binary::{MAGIC, NODE_SIZE, encode_node, encode_scene, write_scene};
pub use report::{build_report, report_path, write_report};
pub use types::{
    BakedMesh, BakedScene, BakedSkin, ConversionReport, ConvertOptions, MeshReport, PhysicsReport,
};

use self::controller::{SkinController, read_skin, resolve_joints};
use self::scene::{DrawTarget, Drawable};
use crate::diagnostics::ValidationIssue;
use crate::document::{
    DocumentError, DocumentSource, ElementGraph, ElementId, FileSource, Session,
};
use crate::geometry::{Primitive, RawChannel, Usage, weld_and_generate};
use crate::physics::{TriangleMerger, build_tree};
use crate::skin::{SkinWeights, extract_skin_weights};

/// Convert `input` into `output`, writing `<output>.report.json` too unless
/// disabled.
pub fn convert_document(
    input: &Path,
    output: &Path,
    options: &ConvertOptions,
) -> Result<ConversionReport> {
    let mut session = Session::new(FileSource);
    let scene = bake_scene(&mut session, &input.to_string_lossy(), options)?;
    write_scene(output, &scene)?;

    let documents_loaded = session.graph().documents().count();
    let issues = session.take_diagnostics().into_issues();
    let report = build_report(input, output, &scene, documents_loaded, issues);
    if options.write_report {
        write_report(&report_path(output), &report)?;
    }
    Ok(report)
}

/// Build the in-memory scene for the document at `input`. Warnings stay in
/// the session's diagnostics.
pub fn bake_scene<S: DocumentSource>(
    session: &mut Session<S>,
    input: &str,
    options: &ConvertOptions,
) -> Result<BakedScene> {
    let root = session
        .load(input)
        .with_context(|| format!("failed to load COLLADA document: {input}"))?;
    let frame = scene::scene_frame(
        session,
        root,
        options.convert_up_axis,
        options.apply_unit_scale,
    )?;
    let visual_scene = scene::visual_scene(session, root)?;
    let drawables = scene::collect_drawables(session, visual_scene, &frame.root)?;
    scene::resolve_animation_targets(session)?;

    let mut merger = TriangleMerger::new(&options.physics);
    let mut meshes = Vec::new();
    for drawable in &drawables {
        bake_drawable(session, drawable, options, &mut merger, &mut meshes)
            .with_context(|| format!("failed to convert node \"{}\"", drawable.node_name))?;
    }

    let physics = merger.finish();
    let tree = build_tree(&physics.triangle_values());
    info!(
        "{input}: {} mesh(es), {} collision triangle(s), {} tree node(s)",
        meshes.len(),
        physics.triangles.len(),
        tree.len()
    );
    session.diagnostics().log_all(input);

    Ok(BakedScene {
        up_axis: frame.up_axis,
        meshes,
        physics,
        tree,
    })
}

/// Skin data shared by every primitive of one controller instance.
struct BoundSkin {
    controller: SkinController,
    weights: SkinWeights,
    skin: BakedSkin,
}

fn bake_drawable<S: DocumentSource>(
    session: &mut Session<S>,
    drawable: &Drawable,
    options: &ConvertOptions,
    merger: &mut TriangleMerger,
    meshes: &mut Vec<BakedMesh>,
) -> Result<()> {
    let (geometry, bound) = match &drawable.target {
        DrawTarget::Geometry(geometry) => (*geometry, None),
        DrawTarget::Controller {
            controller,
            skeletons,
        } => {
            let Some(bound) = bind_skin(session, drawable, *controller, skeletons, options)? else {
                return Ok(());
            };
            (bound.controller.geometry, Some(bound))
        }
    };

    for extracted in mesh::extract_primitives(session, geometry)? {
        let mut primitive = extracted.primitive;
        let bump = match &extracted.material {
            Some(symbol) => material::bump_texcoord_set(session, drawable.instance, symbol)?,
            None => None,
        };
        if let Some(bound) = &bound {
            attach_skin(&mut primitive, extracted.position_stream, &bound.weights)?;
            apply_bind_shape(&mut primitive, &bound.controller.bind_shape);
        }

        let mesh = weld_and_generate(&primitive, &options.weld, bump)
            .with_context(|| format!("failed to weld mesh \"{}\"", primitive.name))?;
        if !mesh.stats.fallback.is_empty() {
            session.diagnostics_mut().warn(
                "GENERATION_FALLBACK",
                format!(
                    "{}: could not generate {:?}, kept the source channels instead",
                    mesh.name, mesh.stats.fallback
                ),
            );
        }
        debug!(
            "{}: {} corners welded to {} vertices, {} triangles",
            mesh.name,
            mesh.stats.input_corners,
            mesh.vertex_count(),
            mesh.triangle_count()
        );

        if options.physics.enabled {
            if let Some(positions) = mesh.positions() {
                merger.add_mesh(&positions, &mesh.indices, &drawable.world);
            }
        }
        meshes.push(BakedMesh {
            name: mesh.name.clone(),
            node: drawable.node_name.clone(),
            material: extracted.material,
            world: drawable.world,
            mesh,
            skin: bound.as_ref().map(|bound| bound.skin.clone()),
        });
    }
    Ok(())
}

fn bind_skin<S: DocumentSource>(
    session: &mut Session<S>,
    drawable: &Drawable,
    controller: ElementId,
    skeletons: &[ElementId],
    options: &ConvertOptions,
) -> Result<Option<BoundSkin>> {
    let Some(controller) = read_skin(session, controller)? else {
        return Ok(None);
    };
    let joints = resolve_joints(session, &controller, drawable.instance, skeletons)?;
    let weights = extract_skin_weights(&controller.input, &options.skin)?;

    let name = &controller.input.name;
    if weights.truncated_vertices > 0 {
        session.diagnostics_mut().warn(
            "INFLUENCES_TRUNCATED",
            format!(
                "{name}: {} vertices had more than {} influences",
                weights.truncated_vertices, options.skin.max_influences
            ),
        );
    }
    if !weights.removed_joints.is_empty() {
        session.diagnostics_mut().push(ValidationIssue::info(
            "JOINTS_REMOVED",
            format!(
                "{name}: {} joint(s) removed to fit the budget of {}",
                weights.removed_joints.len(),
                options.skin.joint_budget
            ),
        ));
    }

    // node name when the joint resolved and has one, else the joint reference
    let joint_name = |joint: u32| -> String {
        let index = joint as usize;
        joints
            .get(index)
            .copied()
            .flatten()
            .and_then(|node| session.graph().get(node).name.clone())
            .unwrap_or_else(|| controller.joint_refs[index].clone())
    };
    let skin = BakedSkin {
        joint_names: weights.active_joints.iter().map(|&joint| joint_name(joint)).collect(),
        inverse_binds: weights
            .active_joints
            .iter()
            .map(|&joint| controller.inverse_binds[joint as usize])
            .collect(),
        removed_joints: weights.removed_joints.iter().map(|&joint| joint_name(joint)).collect(),
    };
    Ok(Some(BoundSkin {
        controller,
        weights,
        skin,
    }))
}

/// Add joint and weight channels to the stream indexed by position.
fn attach_skin(
    primitive: &mut Primitive,
    position_stream: usize,
    weights: &SkinWeights,
) -> Result<()> {
    let stream = primitive
        .streams
        .get_mut(position_stream)
        .with_context(|| format!("{} has no position stream", primitive.name))?;
    let positions = stream
        .channels
        .iter()
        .find(|channel| channel.usage == Usage::Position)
        .map_or(0, RawChannel::len);
    if positions != weights.joints.len() {
        anyhow::bail!(
            "{} has {positions} positions but its skin covers {} vertices",
            primitive.name,
            weights.joints.len()
        );
    }

    let joints = weights
        .joints
        .iter()
        .flatten()
        .map(|&joint| f32::from(joint))
        .collect();
    let values = weights.weights.iter().flatten().copied().collect();
    stream
        .channels
        .push(RawChannel::new(Usage::BlendIndices, 0, 4, joints));
    stream
        .channels
        .push(RawChannel::new(Usage::BlendWeight, 0, 4, values));
    Ok(())
}

/// Move the bind-pose mesh into skin space. Direction channels are
/// renormalized afterwards.
fn apply_bind_shape(primitive: &mut Primitive, bind_shape: &Matrix4<f32>) {
    if *bind_shape == Matrix4::identity() {
        return;
    }
    let linear = bind_shape.fixed_view::<3, 3>(0, 0).into_owned();
    // normals stay perpendicular to the surface only under the inverse transpose
    let normal_matrix = linear.try_inverse().map_or(linear, |inverse| inverse.transpose());
    for channel in primitive
        .streams
        .iter_mut()
        .flat_map(|stream| stream.channels.iter_mut())
    {
        let direction = match channel.usage {
            Usage::Position => None,
            Usage::Normal => Some(normal_matrix),
            Usage::Tangent | Usage::Binormal => Some(linear),
            _ => continue,
        };
        if channel.components < 3 {
            continue;
        }
        let components = channel.components;
        for element in channel.data.chunks_exact_mut(components) {
            let value = Vector3::new(element[0], element[1], element[2]);
            let moved = match direction {
                None => bind_shape.transform_point(&Point3::from(value)).coords,
                Some(matrix) => (matrix * value).try_normalize(1e-12).unwrap_or(value),
            };
            element[..3].copy_from_slice(moved.as_slice());
        }
    }
}

// ─── Element helpers ──────────────────────────────────────────────────────────

/// Resolve `reference` from `origin`, failing when it has no target.
fn require_target<S: DocumentSource>(
    session: &mut Session<S>,
    origin: ElementId,
    reference: &str,
) -> Result<ElementId> {
    session.resolve(origin, reference)?.with_context(|| {
        format!(
            "{} references \"{reference}\" which does not exist",
            session.graph().describe(origin)
        )
    })
}

/// Optional numeric attribute; present but malformed is an error.
fn attribute_number<T: FromStr>(
    graph: &ElementGraph,
    element: ElementId,
    name: &str,
) -> Result<Option<T>, DocumentError> {
    let Some(value) = graph.get(element).attribute(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| DocumentError::InvalidNumber {
            value: value.to_string(),
            element: graph.describe(element),
        })
}

/// Name, id or sid of an element, whichever comes first.
fn element_label(graph: &ElementGraph, element: ElementId) -> String {
    let element_ref = graph.get(element);
    element_ref
        .name
        .as_ref()
        .or(element_ref.id.as_ref())
        .or(element_ref.sid.as_ref())
        .cloned()
        .unwrap_or_else(|| element_ref.kind.tag().to_string())
}
