use anyhow::{Context, Result, bail};
use nalgebra::Matrix4;

use super::mesh::{read_inputs, read_names, read_source};
use super::{attribute_number, element_label, require_target};
use crate::document::{DocumentSource, ElementId, ElementKind, Session};
use crate::skin::{Influence, SkinInput};

/// A `<skin>` controller read into plain data.
pub(super) struct SkinController {
    pub geometry: ElementId,
    /// Applied to the bind-pose mesh before welding, row-major source.
    pub bind_shape: Matrix4<f32>,
    /// Joint sids, or ids when the joints come from an `IDREF_array`.
    pub joint_refs: Vec<String>,
    pub joints_are_ids: bool,
    pub inverse_binds: Vec<Matrix4<f32>>,
    pub input: SkinInput,
}

/// Read the skin of `controller`. Morph controllers and skins of anything
/// but a geometry are reported and give `None`.
pub(super) fn read_skin<S: DocumentSource>(
    session: &mut Session<S>,
    controller: ElementId,
) -> Result<Option<SkinController>> {
    let name = element_label(session.graph(), controller);
    let Some(skin) = session
        .graph()
        .first_child_of_kind(controller, &ElementKind::Skin)
    else {
        session.diagnostics_mut().warn(
            "UNSUPPORTED_CONTROLLER",
            format!("controller \"{name}\" is not a skin and was skipped"),
        );
        return Ok(None);
    };

    let reference = session.graph().require_attribute(skin, "source")?.to_string();
    let geometry = require_target(session, skin, &reference)?;
    if *session.graph().kind(geometry) != ElementKind::Geometry {
        let message = format!(
            "controller \"{name}\" skins a <{}>, not a geometry",
            session.graph().kind(geometry).tag()
        );
        session.diagnostics_mut().warn("UNSUPPORTED_CONTROLLER", message);
        return Ok(None);
    }

    let bind_shape = match session
        .graph()
        .first_child_of_kind(skin, &ElementKind::BindShapeMatrix)
    {
        Some(element) => matrix_from_row_major(&session.graph().floats(element)?)
            .with_context(|| format!("{} is not 16 numbers", session.graph().describe(element)))?,
        None => Matrix4::identity(),
    };

    let joints = session.graph().require_child(skin, ElementKind::Joints)?;
    let mut joint_refs = None;
    let mut inverse_binds = Vec::new();
    for input in read_inputs(session, joints)? {
        match input.semantic.as_str() {
            "JOINT" => {
                let ids = session
                    .graph()
                    .first_child_of_kind(input.source, &ElementKind::IdrefArray)
                    .is_some();
                joint_refs = Some((read_names(session, input.source)?, ids));
            }
            "INV_BIND_MATRIX" => {
                let source = read_source(session, input.source)?;
                if source.components != 16 {
                    bail!("inverse bind matrices of \"{name}\" have {} components", source.components);
                }
                inverse_binds = source
                    .data
                    .chunks_exact(16)
                    .filter_map(matrix_from_row_major)
                    .collect();
            }
            _ => {}
        }
    }
    let (joint_refs, joints_are_ids) =
        joint_refs.with_context(|| format!("skin of controller \"{name}\" has no JOINT input"))?;
    if !inverse_binds.is_empty() && inverse_binds.len() != joint_refs.len() {
        bail!(
            "controller \"{name}\" has {} joints but {} inverse bind matrices",
            joint_refs.len(),
            inverse_binds.len()
        );
    }
    if inverse_binds.is_empty() {
        inverse_binds = vec![Matrix4::identity(); joint_refs.len()];
    }

    let vertices = read_vertex_weights(session, skin, &name)?;
    Ok(Some(SkinController {
        geometry,
        bind_shape,
        input: SkinInput {
            name,
            joint_count: joint_refs.len(),
            vertices,
        },
        joint_refs,
        joints_are_ids,
        inverse_binds,
    }))
}

fn read_vertex_weights<S: DocumentSource>(
    session: &mut Session<S>,
    skin: ElementId,
    name: &str,
) -> Result<Vec<Vec<Influence>>> {
    let element = session.graph().require_child(skin, ElementKind::VertexWeights)?;
    let count: usize = attribute_number(session.graph(), element, "count")?.unwrap_or(0);

    let inputs = read_inputs(session, element)?;
    let stride = inputs.iter().map(|input| input.offset + 1).max().unwrap_or(0);
    let joint_offset = inputs
        .iter()
        .find(|input| input.semantic == "JOINT")
        .map(|input| input.offset)
        .with_context(|| format!("vertex weights of \"{name}\" have no JOINT input"))?;
    let weight_input = inputs
        .iter()
        .find(|input| input.semantic == "WEIGHT")
        .with_context(|| format!("vertex weights of \"{name}\" have no WEIGHT input"))?;
    let weight_offset = weight_input.offset;
    let weights = read_source(session, weight_input.source)?.data;

    let graph = session.graph();
    let vcount = match graph.first_child_of_kind(element, &ElementKind::VCount) {
        Some(vcount) => graph.unsigned(vcount)?,
        None => Vec::new(),
    };
    let v = match graph.first_child_of_kind(element, &ElementKind::V) {
        Some(v) => graph.integers(v)?,
        None => Vec::new(),
    };
    if vcount.len() != count {
        bail!("\"{name}\" declares {count} weighted vertices but <vcount> has {}", vcount.len());
    }
    let expected = vcount.iter().map(|&n| n as usize).sum::<usize>() * stride;
    if v.len() != expected {
        bail!("\"{name}\" expects {expected} weight indices but <v> has {}", v.len());
    }

    let mut vertices = Vec::with_capacity(count);
    let mut cursor = 0;
    for &influences in &vcount {
        let mut vertex = Vec::with_capacity(influences as usize);
        for _ in 0..influences {
            let pair = &v[cursor..cursor + stride];
            cursor += stride;
            // -1 binds to the bind shape itself
            let Ok(joint) = u32::try_from(pair[joint_offset]) else {
                continue;
            };
            let weight = usize::try_from(pair[weight_offset])
                .ok()
                .and_then(|index| weights.get(index))
                .with_context(|| {
                    format!("\"{name}\" references weight {} out of range", pair[weight_offset])
                })?;
            vertex.push(Influence::new(joint, *weight));
        }
        vertices.push(vertex);
    }
    Ok(vertices)
}

/// Resolve joint references to nodes. Sids are searched below each skeleton
/// root in order; unresolved joints are reported and left `None`.
pub(super) fn resolve_joints<S: DocumentSource>(
    session: &mut Session<S>,
    controller: &SkinController,
    origin: ElementId,
    skeletons: &[ElementId],
) -> Result<Vec<Option<ElementId>>> {
    let mut joints = Vec::with_capacity(controller.joint_refs.len());
    for reference in &controller.joint_refs {
        let joint = if controller.joints_are_ids {
            session.resolve(origin, &format!("#{reference}"))?
        } else {
            skeletons
                .iter()
                .find_map(|&root| session.find_sid(root, reference))
        };
        if joint.is_none() {
            session.diagnostics_mut().warn(
                "UNRESOLVED_JOINT",
                format!("joint \"{reference}\" of skin \"{}\" was not found", controller.input.name),
            );
        }
        joints.push(joint);
    }
    Ok(joints)
}

pub(super) fn matrix_from_row_major(values: &[f32]) -> Option<Matrix4<f32>> {
    (values.len() == 16).then(|| Matrix4::from_row_slice(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{AbsoluteId, MemorySource};

    const SKINNED: &str = r##"<COLLADA>
  <library_geometries>
    <geometry id="body">
      <mesh>
        <source id="body-pos">
          <float_array id="body-pos-array" count="9">0 0 0 1 0 0 0 1 0</float_array>
          <technique_common>
            <accessor source="#body-pos-array" count="3" stride="3">
              <param name="X" type="float"/><param name="Y" type="float"/><param name="Z" type="float"/>
            </accessor>
          </technique_common>
        </source>
        <vertices id="body-vtx"><input semantic="POSITION" source="#body-pos"/></vertices>
        <triangles count="1">
          <input semantic="VERTEX" source="#body-vtx" offset="0"/>
          <p>0 1 2</p>
        </triangles>
      </mesh>
    </geometry>
  </library_geometries>
  <library_controllers>
    <controller id="body-skin" name="BodySkin">
      <skin source="#body">
        <bind_shape_matrix>1 0 0 5 0 1 0 0 0 0 1 0 0 0 0 1</bind_shape_matrix>
        <source id="body-joints">
          <Name_array id="body-joints-array" count="2">hip knee</Name_array>
          <technique_common>
            <accessor source="#body-joints-array" count="2"><param name="JOINT" type="name"/></accessor>
          </technique_common>
        </source>
        <source id="body-weights">
          <float_array id="body-weights-array" count="3">1 0.75 0.25</float_array>
          <technique_common>
            <accessor source="#body-weights-array" count="3"><param name="WEIGHT" type="float"/></accessor>
          </technique_common>
        </source>
        <joints><input semantic="JOINT" source="#body-joints"/></joints>
        <vertex_weights count="3">
          <input semantic="JOINT" source="#body-joints" offset="0"/>
          <input semantic="WEIGHT" source="#body-weights" offset="1"/>
          <vcount>1 2 1</vcount>
          <v>0 0 0 1 1 2 -1 0</v>
        </vertex_weights>
      </skin>
    </controller>
    <controller id="face-morph"><morph source="#body"/></controller>
  </library_controllers>
  <library_visual_scenes>
    <visual_scene id="scene">
      <node id="root" sid="root">
        <node id="hip-node" sid="hip"><node id="knee-node" sid="knee"/></node>
      </node>
    </visual_scene>
  </library_visual_scenes>
</COLLADA>"##;

    fn load() -> Session<MemorySource> {
        let mut session = Session::new(MemorySource::new().with("body.dae", SKINNED));
        session.load("body.dae").unwrap();
        session
    }

    fn element(session: &Session<MemorySource>, id: &str) -> ElementId {
        session
            .graph()
            .lookup(&AbsoluteId {
                document: "body.dae".to_string(),
                fragment: id.to_string(),
            })
            .unwrap()
    }

    #[test]
    fn given_skin_when_reading_then_influences_follow_vcount() {
        let mut session = load();
        let controller = element(&session, "body-skin");
        let skin = read_skin(&mut session, controller).unwrap().unwrap();

        assert_eq!(skin.geometry, element(&session, "body"));
        assert_eq!(skin.joint_refs, vec!["hip", "knee"]);
        assert!(!skin.joints_are_ids);
        assert_eq!(skin.bind_shape[(0, 3)], 5.0);
        assert_eq!(skin.inverse_binds, vec![Matrix4::identity(); 2]);
        assert_eq!(skin.input.joint_count, 2);
        assert_eq!(
            skin.input.vertices,
            vec![
                vec![Influence::new(0, 1.0)],
                vec![Influence::new(0, 0.75), Influence::new(1, 0.25)],
                vec![],
            ]
        );
    }

    #[test]
    fn given_morph_controller_when_reading_then_it_is_skipped_with_warning() {
        let mut session = load();
        let controller = element(&session, "face-morph");
        assert!(read_skin(&mut session, controller).unwrap().is_none());
        assert!(session.diagnostics().has_code("UNSUPPORTED_CONTROLLER"));
    }

    #[test]
    fn given_skeleton_root_when_resolving_joints_then_sids_are_found_below_it() {
        let mut session = load();
        let controller = element(&session, "body-skin");
        let skin = read_skin(&mut session, controller).unwrap().unwrap();
        let root = element(&session, "root");

        let joints = resolve_joints(&mut session, &skin, controller, &[root]).unwrap();
        assert_eq!(
            joints,
            vec![Some(element(&session, "hip-node")), Some(element(&session, "knee-node"))]
        );

        let knee = element(&session, "knee-node");
        let joints = resolve_joints(&mut session, &skin, controller, &[knee]).unwrap();
        assert_eq!(joints[0], None);
        assert!(session.diagnostics().has_code("UNRESOLVED_JOINT"));
    }
}
