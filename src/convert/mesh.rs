use anyhow::{Context, Result, bail};
use log::debug;

use super::{attribute_number, element_label, require_target};
use crate::document::{DocumentSource, ElementGraph, ElementId, ElementKind, Session};
use crate::geometry::{IndexStream, Primitive, RawChannel, Usage};

// ─── Sources ──────────────────────────────────────────────────────────────────

/// Float data of one `<source>`, `components` lanes per element.
pub(super) struct SourceData {
    pub components: usize,
    pub data: Vec<f32>,
}

/// Read a `<source>` through its accessor. Unnamed params are skipped.
pub(super) fn read_source<S: DocumentSource>(
    session: &mut Session<S>,
    source: ElementId,
) -> Result<SourceData> {
    let accessor = accessor_of(session.graph(), source)?;
    let array = match session.graph().get(accessor).attribute("source").map(str::to_string) {
        Some(reference) => require_target(session, accessor, &reference)?,
        None => session.graph().require_child(source, ElementKind::FloatArray)?,
    };

    let graph = session.graph();
    let count: usize = attribute_number(graph, accessor, "count")?.unwrap_or(0);
    let params: Vec<ElementId> = graph
        .children_of_kind(accessor, &ElementKind::Param)
        .collect();
    let stride: usize = attribute_number(graph, accessor, "stride")?.unwrap_or(params.len().max(1));
    let offset: usize = attribute_number(graph, accessor, "offset")?.unwrap_or(0);
    let named: Vec<usize> = params
        .iter()
        .enumerate()
        .filter(|(_, param)| graph.get(**param).name.is_some())
        .map(|(lane, _)| lane)
        .collect();
    let lanes: Vec<usize> = if named.is_empty() {
        (0..stride).collect()
    } else {
        named
    };

    let values = graph.floats(array)?;
    let mut data = Vec::with_capacity(count * lanes.len());
    for element in 0..count {
        for lane in &lanes {
            let at = offset + element * stride + lane;
            let value = values.get(at).with_context(|| {
                format!(
                    "{} reads value {at} but its array holds {}",
                    graph.describe(accessor),
                    values.len()
                )
            })?;
            data.push(*value);
        }
    }
    Ok(SourceData {
        components: lanes.len(),
        data,
    })
}

/// Tokens of a `<Name_array>` or `<IDREF_array>` source.
pub(super) fn read_names<S: DocumentSource>(
    session: &mut Session<S>,
    source: ElementId,
) -> Result<Vec<String>> {
    let graph = session.graph();
    let array = [ElementKind::NameArray, ElementKind::IdrefArray]
        .iter()
        .find_map(|kind| graph.first_child_of_kind(source, kind))
        .with_context(|| format!("{} has no name array", graph.describe(source)))?;
    Ok(graph.get(array).tokens().map(str::to_string).collect())
}

fn accessor_of(graph: &ElementGraph, source: ElementId) -> Result<ElementId> {
    let technique = graph.require_child(source, ElementKind::TechniqueCommon)?;
    Ok(graph.require_child(technique, ElementKind::Accessor)?)
}

// ─── Primitives ───────────────────────────────────────────────────────────────

/// A primitive ready for welding plus what the scene needs to bind it.
#[derive(Debug)]
pub(super) struct ExtractedPrimitive {
    pub primitive: Primitive,
    pub material: Option<String>,
    /// Stream holding POSITION. Per-position data such as skin weights joins it.
    pub position_stream: usize,
}

#[derive(Debug, Clone)]
pub(super) struct Input {
    pub semantic: String,
    pub offset: usize,
    pub set: u32,
    pub source: ElementId,
}

/// `<input>` children of `element`, with their sources resolved.
pub(super) fn read_inputs<S: DocumentSource>(
    session: &mut Session<S>,
    element: ElementId,
) -> Result<Vec<Input>> {
    let children: Vec<ElementId> = session
        .graph()
        .children_of_kind(element, &ElementKind::Input)
        .collect();
    let mut inputs = Vec::with_capacity(children.len());
    for input in children {
        let graph = session.graph();
        let semantic = graph.require_attribute(input, "semantic")?.to_string();
        let reference = graph.require_attribute(input, "source")?.to_string();
        let offset = attribute_number(graph, input, "offset")?.unwrap_or(0);
        let set = attribute_number(graph, input, "set")?.unwrap_or(0);
        let source = require_target(session, input, &reference)?;
        inputs.push(Input {
            semantic,
            offset,
            set,
            source,
        });
    }
    Ok(inputs)
}

/// Every triangle-producing primitive of `geometry`. Line and strip
/// primitives are reported and skipped.
pub(super) fn extract_primitives<S: DocumentSource>(
    session: &mut Session<S>,
    geometry: ElementId,
) -> Result<Vec<ExtractedPrimitive>> {
    let label = element_label(session.graph(), geometry);
    let Some(mesh) = session
        .graph()
        .first_child_of_kind(geometry, &ElementKind::Mesh)
    else {
        session.diagnostics_mut().warn(
            "UNSUPPORTED_GEOMETRY",
            format!("geometry \"{label}\" is not a <mesh> and was skipped"),
        );
        return Ok(Vec::new());
    };

    let children: Vec<ElementId> = session.graph().children(mesh).collect();
    let mut primitives = Vec::new();
    for child in children {
        let kind = session.graph().kind(child).clone();
        match kind {
            ElementKind::Triangles | ElementKind::Polylist | ElementKind::Polygons => {
                let name = format!("{label}_{}", primitives.len());
                let primitive = read_primitive(session, child, name)
                    .with_context(|| format!("failed to read a primitive of geometry \"{label}\""))?;
                primitives.push(primitive);
            }
            ElementKind::Lines
            | ElementKind::Linestrips
            | ElementKind::Tristrips
            | ElementKind::Trifans => {
                session.diagnostics_mut().warn(
                    "UNSUPPORTED_PRIMITIVE",
                    format!("<{}> in geometry \"{label}\" is not converted", kind.tag()),
                );
            }
            _ => {}
        }
    }
    Ok(primitives)
}

fn read_primitive<S: DocumentSource>(
    session: &mut Session<S>,
    element: ElementId,
    name: String,
) -> Result<ExtractedPrimitive> {
    let inputs = read_inputs(session, element)?;
    let Some(stride) = inputs.iter().map(|input| input.offset + 1).max() else {
        bail!("{} has no <input>", session.graph().describe(element));
    };

    let (p, polygons) = read_polygons(session, element, stride)?;
    let corners = fan_triangulate(&polygons);

    let mut streams = Vec::new();
    let mut position_stream = None;
    for offset in 0..stride {
        let members: Vec<&Input> = inputs.iter().filter(|input| input.offset == offset).collect();
        if members.is_empty() {
            continue;
        }
        let indices = corners.iter().map(|corner| p[corner * stride + offset]).collect();
        let mut channels = Vec::new();
        for input in members {
            if input.semantic == "VERTEX" {
                for vertex_input in read_inputs(session, input.source)? {
                    if vertex_input.semantic == "POSITION" {
                        position_stream = Some(streams.len());
                    }
                    push_channel(session, &mut channels, &vertex_input)?;
                }
            } else {
                push_channel(session, &mut channels, input)?;
            }
        }
        streams.push(IndexStream { indices, channels });
    }

    let position_stream = position_stream.with_context(|| {
        format!("{} has no POSITION input", session.graph().describe(element))
    })?;
    let material = session
        .graph()
        .get(element)
        .attribute("material")
        .map(str::to_string);
    Ok(ExtractedPrimitive {
        primitive: Primitive { name, streams },
        material,
        position_stream,
    })
}

fn push_channel<S: DocumentSource>(
    session: &mut Session<S>,
    channels: &mut Vec<RawChannel>,
    input: &Input,
) -> Result<()> {
    let Some(usage) = Usage::from_semantic(&input.semantic) else {
        debug!("input semantic {} is not converted", input.semantic);
        return Ok(());
    };
    let source = read_source(session, input.source)?;
    channels.push(RawChannel::new(usage, input.set, source.components, source.data));
    Ok(())
}

/// Index list `<p>` and the vertex count of every polygon in it.
fn read_polygons<S: DocumentSource>(
    session: &mut Session<S>,
    element: ElementId,
    stride: usize,
) -> Result<(Vec<u32>, Vec<usize>)> {
    let graph = session.graph();
    let describe = || graph.describe(element);
    let mut p = Vec::new();
    let mut polygons = Vec::new();

    let kind = graph.kind(element).clone();
    match kind {
        ElementKind::Triangles => {
            if let Some(list) = graph.first_child_of_kind(element, &ElementKind::P) {
                p = graph.unsigned(list)?;
            }
            if p.len() % (3 * stride) != 0 {
                bail!("{} has {} indices, not whole triangles of {stride}", describe(), p.len());
            }
            polygons = vec![3; p.len() / (3 * stride)];
        }
        ElementKind::Polylist => {
            if let Some(list) = graph.first_child_of_kind(element, &ElementKind::P) {
                p = graph.unsigned(list)?;
            }
            if let Some(vcount) = graph.first_child_of_kind(element, &ElementKind::VCount) {
                polygons = graph
                    .unsigned(vcount)?
                    .into_iter()
                    .map(|count| count as usize)
                    .collect();
            }
            let expected: usize = polygons.iter().sum::<usize>() * stride;
            if expected != p.len() {
                bail!("{} expects {expected} indices but <p> holds {}", describe(), p.len());
            }
        }
        ElementKind::Polygons => {
            for list in graph.children_of_kind(element, &ElementKind::P) {
                let indices = graph.unsigned(list)?;
                if indices.len() % stride != 0 {
                    bail!("a <p> of {} is not a whole number of vertices", describe());
                }
                polygons.push(indices.len() / stride);
                p.extend(indices);
            }
            if graph.first_child_of_kind(element, &ElementKind::Ph).is_some() {
                let message = format!("polygons with holes in {} are skipped", describe());
                session.diagnostics_mut().warn("POLYGON_HOLES_SKIPPED", message);
            }
        }
        other => bail!("<{}> is not a polygon primitive", other.tag()),
    }
    Ok((p, polygons))
}

/// Corner numbers of a fan triangulation of consecutive polygons.
fn fan_triangulate(polygons: &[usize]) -> Vec<usize> {
    let mut corners = Vec::new();
    let mut base = 0;
    for &count in polygons {
        for k in 1..count.saturating_sub(1) {
            corners.extend_from_slice(&[base, base + k, base + k + 1]);
        }
        base += count;
    }
    corners
}
