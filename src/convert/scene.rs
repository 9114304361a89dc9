use anyhow::{Context, Result, bail};
use log::{debug, info};
use nalgebra::{Matrix4, Rotation3, Unit, Vector3};

use super::controller::matrix_from_row_major;
use super::{attribute_number, element_label};
use crate::document::{DocumentSource, ElementId, ElementKind, Session};

// ─── Scene frame ──────────────────────────────────────────────────────────────

/// Axis convention and unit of the main document, folded into the root
/// transform of the scene walk.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct SceneFrame {
    /// Up axis declared by the document.
    pub up_axis: String,
    pub meter: f32,
    pub root: Matrix4<f32>,
}

pub(super) fn scene_frame<S: DocumentSource>(
    session: &Session<S>,
    document_root: ElementId,
    convert_up_axis: bool,
    apply_unit_scale: bool,
) -> Result<SceneFrame> {
    let graph = session.graph();
    let asset = graph.first_child_of_kind(document_root, &ElementKind::Asset);
    let up_axis = asset
        .and_then(|asset| graph.first_child_of_kind(asset, &ElementKind::UpAxis))
        .map(|element| graph.get(element).text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| "Y_UP".to_string());
    let unit = asset.and_then(|asset| graph.first_child_of_kind(asset, &ElementKind::Unit));
    let meter: f32 = match unit {
        Some(unit) => attribute_number(graph, unit, "meter")?.unwrap_or(1.0),
        None => 1.0,
    };

    let rotation = match (convert_up_axis, up_axis.as_str()) {
        // (x, y, z) -> (x, z, -y)
        (true, "Z_UP") => Matrix4::new(
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, -1.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ),
        // (x, y, z) -> (-y, x, z)
        (true, "X_UP") => Matrix4::new(
            0.0, -1.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ),
        _ => Matrix4::identity(),
    };
    let scale = if apply_unit_scale && meter > 0.0 { meter } else { 1.0 };
    Ok(SceneFrame {
        up_axis,
        meter,
        root: rotation * Matrix4::new_scaling(scale),
    })
}

// ─── Drawables ────────────────────────────────────────────────────────────────

/// One geometry or controller instance reached from the visual scene.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Drawable {
    pub node: ElementId,
    pub node_name: String,
    pub world: Matrix4<f32>,
    /// The `<instance_geometry>` or `<instance_controller>`.
    pub instance: ElementId,
    pub target: DrawTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum DrawTarget {
    Geometry(ElementId),
    Controller {
        controller: ElementId,
        skeletons: Vec<ElementId>,
    },
}

/// The visual scene named by `<scene>`, or the first one in the document.
pub(super) fn visual_scene<S: DocumentSource>(
    session: &mut Session<S>,
    document_root: ElementId,
) -> Result<ElementId> {
    let instance = session
        .graph()
        .first_child_of_kind(document_root, &ElementKind::Scene)
        .and_then(|scene| {
            session
                .graph()
                .first_child_of_kind(scene, &ElementKind::InstanceVisualScene)
        });
    if let Some(instance) = instance {
        let url = session.graph().require_attribute(instance, "url")?.to_string();
        if let Some(scene) = session.resolve(instance, &url)? {
            return Ok(scene);
        }
    }

    let graph = session.graph();
    match graph
        .descendants(document_root)
        .into_iter()
        .find(|&element| *graph.kind(element) == ElementKind::VisualScene)
    {
        Some(scene) => Ok(scene),
        None => bail!("{} has no visual scene", graph.document_of(document_root).path),
    }
}

/// Walk every node of `scene` and collect its drawables in document order.
pub(super) fn collect_drawables<S: DocumentSource>(
    session: &mut Session<S>,
    scene: ElementId,
    root: &Matrix4<f32>,
) -> Result<Vec<Drawable>> {
    let mut walk = SceneWalk {
        active: Vec::new(),
        drawables: Vec::new(),
    };
    let nodes: Vec<ElementId> = session
        .graph()
        .children_of_kind(scene, &ElementKind::Node)
        .collect();
    for node in nodes {
        walk.node(session, node, root)?;
    }
    debug!(
        "visual scene {} has {} drawable(s)",
        session.graph().describe(scene),
        walk.drawables.len()
    );
    Ok(walk.drawables)
}

struct SceneWalk {
    /// Nodes on the current path, for `instance_node` cycle detection.
    active: Vec<ElementId>,
    drawables: Vec<Drawable>,
}

impl SceneWalk {
    fn node<S: DocumentSource>(
        &mut self,
        session: &mut Session<S>,
        node: ElementId,
        parent: &Matrix4<f32>,
    ) -> Result<()> {
        self.active.push(node);
        let world = parent * local_transform(session, node)?;
        let children: Vec<ElementId> = session.graph().children(node).collect();
        for child in children {
            let kind = session.graph().kind(child).clone();
            match kind {
                ElementKind::Node => self.node(session, child, &world)?,
                ElementKind::InstanceNode => self.instance_node(session, node, child, &world)?,
                ElementKind::InstanceGeometry | ElementKind::InstanceController => {
                    self.instance(session, node, child, &world)?
                }
                _ => {}
            }
        }
        self.active.pop();
        Ok(())
    }

    fn instance_node<S: DocumentSource>(
        &mut self,
        session: &mut Session<S>,
        node: ElementId,
        instance: ElementId,
        world: &Matrix4<f32>,
    ) -> Result<()> {
        let url = session.graph().require_attribute(instance, "url")?.to_string();
        let Some(target) = session.resolve(instance, &url)? else {
            return Ok(());
        };
        if self.active.contains(&target) {
            let message = format!(
                "instance_node \"{url}\" under \"{}\" instantiates one of its own ancestors",
                element_label(session.graph(), node)
            );
            session.diagnostics_mut().warn("INSTANCE_CYCLE", message);
            return Ok(());
        }
        self.node(session, target, world)
    }

    fn instance<S: DocumentSource>(
        &mut self,
        session: &mut Session<S>,
        node: ElementId,
        instance: ElementId,
        world: &Matrix4<f32>,
    ) -> Result<()> {
        let url = session.graph().require_attribute(instance, "url")?.to_string();
        let Some(target) = session.resolve(instance, &url)? else {
            debug!("skipping unresolved instance {url}");
            return Ok(());
        };

        let kind = session.graph().kind(target).clone();
        let target = match kind {
            ElementKind::Geometry => DrawTarget::Geometry(target),
            ElementKind::Controller => {
                let references: Vec<String> = session
                    .graph()
                    .children_of_kind(instance, &ElementKind::Skeleton)
                    .map(|skeleton| session.graph().get(skeleton).text.trim().to_string())
                    .collect();
                let mut skeletons = Vec::with_capacity(references.len());
                for reference in references {
                    if let Some(root) = session.resolve(instance, &reference)? {
                        skeletons.push(root);
                    }
                }
                if skeletons.is_empty() {
                    let document = session.graph().document_of(instance).root;
                    skeletons.extend(document);
                }
                DrawTarget::Controller {
                    controller: target,
                    skeletons,
                }
            }
            other => {
                let message = format!("\"{url}\" names a <{}>, not a drawable", other.tag());
                session.diagnostics_mut().warn("UNSUPPORTED_INSTANCE", message);
                return Ok(());
            }
        };

        self.drawables.push(Drawable {
            node,
            node_name: element_label(session.graph(), node),
            world: *world,
            instance,
            target,
        });
        Ok(())
    }
}

/// Product of the node's transform children in document order.
fn local_transform<S: DocumentSource>(
    session: &mut Session<S>,
    node: ElementId,
) -> Result<Matrix4<f32>> {
    let mut local = Matrix4::identity();
    let transforms: Vec<ElementId> = session
        .graph()
        .children(node)
        .filter(|&child| session.graph().kind(child).is_transform())
        .collect();

    for element in transforms {
        let graph = session.graph();
        let values = graph.floats(element)?;
        let wrong_count = || format!("{} has {} values", graph.describe(element), values.len());
        let kind = graph.kind(element).clone();
        let step = match kind {
            ElementKind::Matrix => matrix_from_row_major(&values).with_context(wrong_count)?,
            ElementKind::Translate => match values[..] {
                [x, y, z] => Matrix4::new_translation(&Vector3::new(x, y, z)),
                _ => bail!(wrong_count()),
            },
            ElementKind::Scale => match values[..] {
                [x, y, z] => Matrix4::new_nonuniform_scaling(&Vector3::new(x, y, z)),
                _ => bail!(wrong_count()),
            },
            ElementKind::Rotate => match values[..] {
                [x, y, z, degrees] => match Unit::try_new(Vector3::new(x, y, z), 1e-12) {
                    Some(axis) => {
                        Rotation3::from_axis_angle(&axis, degrees.to_radians()).to_homogeneous()
                    }
                    None => Matrix4::identity(),
                },
                _ => bail!(wrong_count()),
            },
            other => {
                let message = format!(
                    "<{}> on \"{}\" is ignored",
                    other.tag(),
                    element_label(graph, node)
                );
                session.diagnostics_mut().warn("UNSUPPORTED_TRANSFORM", message);
                continue;
            }
        };
        local *= step;
    }
    Ok(local)
}

// ─── Animation targets ────────────────────────────────────────────────────────

/// Queue every `<channel target>` of the loaded documents as a scoped path
/// and resolve them in one pass. Returns how many resolved; the rest are
/// reported by the session.
pub(super) fn resolve_animation_targets<S: DocumentSource>(
    session: &mut Session<S>,
) -> Result<usize> {
    let graph = session.graph();
    let channels: Vec<(ElementId, String)> = graph
        .documents()
        .filter_map(|document| document.root)
        .flat_map(|root| graph.descendants(root))
        .filter(|&element| *graph.kind(element) == ElementKind::Channel)
        .filter_map(|channel| {
            graph
                .get(channel)
                .attribute("target")
                .map(|target| (channel, target.to_string()))
        })
        .collect();

    let mut slots = Vec::with_capacity(channels.len());
    for (channel, target) in channels {
        slots.push(session.request_sid(channel, &target)?);
    }
    session.resolve_pending()?;

    let resolved = slots
        .into_iter()
        .filter(|slot| session.target(*slot).is_some())
        .count();
    if resolved > 0 {
        info!("resolved {resolved} animation target(s)");
    }
    Ok(resolved)
}
