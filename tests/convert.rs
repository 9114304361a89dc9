use std::{fs, process};

use nalgebra::Vector3;
use scenebake::convert::{ConvertOptions, MAGIC, bake_scene, convert_document, encode_scene};
use scenebake::document::{MemorySource, Session};
use scenebake::geometry::{Aabb, Usage};

const SCENE: &str = r##"<?xml version="1.0" encoding="utf-8"?>
<COLLADA xmlns="http://www.collada.org/2005/11/COLLADASchema" version="1.4.1">
  <asset><up_axis>Y_UP</up_axis></asset>
  <library_geometries>
    <geometry id="arm" name="Arm">
      <mesh>
        <source id="arm-pos">
          <float_array id="arm-pos-array" count="9">0 0 0 1 0 0 0 2 0</float_array>
          <technique_common>
            <accessor source="#arm-pos-array" count="3" stride="3">
              <param name="X" type="float"/><param name="Y" type="float"/><param name="Z" type="float"/>
            </accessor>
          </technique_common>
        </source>
        <vertices id="arm-vtx"><input semantic="POSITION" source="#arm-pos"/></vertices>
        <triangles count="1">
          <input semantic="VERTEX" source="#arm-vtx" offset="0"/>
          <p>0 1 2</p>
        </triangles>
      </mesh>
    </geometry>
  </library_geometries>
  <library_controllers>
    <controller id="arm-skin">
      <skin source="#arm">
        <source id="arm-joints">
          <Name_array id="arm-joints-array" count="2">shoulder elbow</Name_array>
          <technique_common>
            <accessor source="#arm-joints-array" count="2"><param name="JOINT" type="name"/></accessor>
          </technique_common>
        </source>
        <source id="arm-weights">
          <float_array id="arm-weights-array" count="2">1 0.5</float_array>
          <technique_common>
            <accessor source="#arm-weights-array" count="2"><param name="WEIGHT" type="float"/></accessor>
          </technique_common>
        </source>
        <joints><input semantic="JOINT" source="#arm-joints"/></joints>
        <vertex_weights count="3">
          <input semantic="JOINT" source="#arm-joints" offset="0"/>
          <input semantic="WEIGHT" source="#arm-weights" offset="1"/>
          <vcount>1 2 1</vcount>
          <v>0 0 0 1 1 1 1 1</v>
        </vertex_weights>
      </skin>
    </controller>
  </library_controllers>
  <library_visual_scenes>
    <visual_scene id="main">
      <node id="floor-a"><instance_geometry url="shared.dae#floor"/></node>
      <node id="floor-b">
        <translate>1 0 0</translate>
        <instance_geometry url="shared.dae#floor"/>
      </node>
      <node id="rig">
        <node id="shoulder-node" sid="shoulder"><node id="elbow-node" sid="elbow"/></node>
      </node>
      <node id="arm-node">
        <instance_controller url="#arm-skin"><skeleton>#rig</skeleton></instance_controller>
      </node>
    </visual_scene>
  </library_visual_scenes>
  <scene><instance_visual_scene url="#main"/></scene>
</COLLADA>"##;

/// A unit floor tile split into two triangles with unshared corners.
const SHARED: &str = r##"<COLLADA>
  <library_geometries>
    <geometry id="floor" name="Floor">
      <mesh>
        <source id="floor-pos">
          <float_array id="floor-pos-array" count="18">0 0 0 1 0 1 1 0 0 0 0 0 0 0 1 1 0 1</float_array>
          <technique_common>
            <accessor source="#floor-pos-array" count="6" stride="3">
              <param name="X" type="float"/><param name="Y" type="float"/><param name="Z" type="float"/>
            </accessor>
          </technique_common>
        </source>
        <vertices id="floor-vtx"><input semantic="POSITION" source="#floor-pos"/></vertices>
        <triangles count="2">
          <input semantic="VERTEX" source="#floor-vtx" offset="0"/>
          <p>0 1 2 3 4 5</p>
        </triangles>
      </mesh>
    </geometry>
  </library_geometries>
</COLLADA>"##;

fn everything() -> Aabb {
    Aabb {
        min: Vector3::repeat(f32::MIN),
        max: Vector3::repeat(f32::MAX),
    }
}

#[test]
fn given_multi_file_scene_when_baking_then_meshes_skin_and_physics_are_built() {
    let source = MemorySource::new()
        .with("levels/main.dae", SCENE)
        .with("levels/shared.dae", SHARED);
    let mut session = Session::new(source);
    let scene = bake_scene(&mut session, "levels/main.dae", &ConvertOptions::default()).unwrap();

    assert_eq!(session.diagnostics().warning_count(), 0);
    assert_eq!(session.graph().documents().count(), 2);
    assert_eq!(scene.up_axis, "Y_UP");

    let names: Vec<&str> = scene.meshes.iter().map(|mesh| mesh.node.as_str()).collect();
    assert_eq!(names, vec!["floor-a", "floor-b", "arm-node"]);

    let floor = &scene.meshes[0].mesh;
    assert_eq!(floor.vertex_count(), 4);
    assert_eq!(floor.triangle_count(), 2);
    let normal = floor.layout.first(Usage::Normal).unwrap();
    assert!(normal.generated);
    for value in floor.channel_values(normal) {
        assert!((Vector3::new(value[0], value[1], value[2]) - Vector3::y()).norm() < 1e-6);
    }

    let arm = &scene.meshes[2];
    let skin = arm.skin.as_ref().unwrap();
    assert_eq!(skin.joint_names, vec!["shoulder", "elbow"]);
    assert!(skin.removed_joints.is_empty());
    let weights = arm.mesh.layout.first(Usage::BlendWeight).unwrap();
    let per_vertex: Vec<&[f32]> = arm.mesh.channel_values(weights).collect();
    assert_eq!(per_vertex[0], &[1.0, 0.0, 0.0, 0.0]);
    assert_eq!(per_vertex[1], &[0.5, 0.5, 0.0, 0.0]);
    assert_eq!(per_vertex[2], &[1.0, 0.0, 0.0, 0.0]);
    let joints = arm.mesh.layout.first(Usage::BlendIndices).unwrap();
    assert_eq!(arm.mesh.channel_values(joints).nth(2).unwrap(), &[1.0, 0.0, 0.0, 0.0]);

    // the tiles share an edge and the arm shares two floor corners
    assert_eq!(scene.physics.triangles.len(), 5);
    assert_eq!(scene.physics.positions.len(), 7);
    let mut leaves = scene.tree.query(&everything());
    leaves.sort_unstable();
    assert_eq!(leaves, vec![0, 1, 2, 3, 4]);

    let bytes = encode_scene(&scene);
    assert_eq!(&bytes[..4], &MAGIC);
}

#[test]
fn given_missing_geometry_file_when_baking_then_warning_is_kept_and_scene_survives() {
    let source = MemorySource::new().with("main.dae", SCENE);
    let mut session = Session::new(source);
    let scene = bake_scene(&mut session, "main.dae", &ConvertOptions::default()).unwrap();

    assert_eq!(scene.meshes.len(), 1);
    assert!(session.diagnostics().warning_count() > 0);
}

#[test]
fn given_files_on_disk_when_converting_then_binary_and_report_are_written() {
    let dir = std::env::temp_dir().join(format!("scenebake-convert-{}", process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("main.dae"), SCENE).unwrap();
    fs::write(dir.join("shared.dae"), SHARED).unwrap();
    let output = dir.join("main.sbk");

    let report = convert_document(&dir.join("main.dae"), &output, &ConvertOptions::default())
        .unwrap();
    assert_eq!(report.mesh_count, 3);
    assert_eq!(report.documents_loaded, 2);
    assert_eq!(report.physics.triangles, 5);

    let bytes = fs::read(&output).unwrap();
    assert_eq!(&bytes[..4], &MAGIC);
    let json: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.join("main.sbk.report.json")).unwrap()).unwrap();
    assert_eq!(json["mesh_count"], 3);
    assert_eq!(json["meshes"][0]["vertices"], 4);

    fs::remove_dir_all(&dir).unwrap();
}
