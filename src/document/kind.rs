/// Element kinds the pipeline distinguishes.
///
/// Tags the pipeline never dispatches on are kept as [`ElementKind::Unrecognized`]
/// so that their ids and sids still take part in reference resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Collada,
    Asset,
    UpAxis,
    Unit,
    LibraryAnimations,
    LibraryCameras,
    LibraryControllers,
    LibraryEffects,
    LibraryGeometries,
    LibraryImages,
    LibraryLights,
    LibraryMaterials,
    LibraryNodes,
    LibraryVisualScenes,
    Geometry,
    Mesh,
    ConvexMesh,
    Spline,
    Source,
    FloatArray,
    IntArray,
    BoolArray,
    NameArray,
    IdrefArray,
    TechniqueCommon,
    Technique,
    Accessor,
    Param,
    Vertices,
    Input,
    Triangles,
    Polylist,
    Polygons,
    Lines,
    Linestrips,
    Tristrips,
    Trifans,
    P,
    VCount,
    V,
    Ph,
    H,
    Controller,
    Skin,
    BindShapeMatrix,
    Joints,
    VertexWeights,
    Morph,
    VisualScene,
    Node,
    Matrix,
    Translate,
    Rotate,
    Scale,
    Lookat,
    Skew,
    InstanceGeometry,
    InstanceController,
    InstanceNode,
    InstanceCamera,
    InstanceLight,
    InstanceVisualScene,
    InstanceMaterial,
    InstanceEffect,
    Skeleton,
    BindMaterial,
    BindVertexInput,
    Bind,
    Material,
    Effect,
    ProfileCommon,
    NewParam,
    Surface,
    Sampler2D,
    Texture,
    Bump,
    Image,
    InitFrom,
    Animation,
    Channel,
    Sampler,
    Camera,
    Light,
    Scene,
    Extra,
    Unrecognized(String),
}

impl ElementKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "COLLADA" => Self::Collada,
            "asset" => Self::Asset,
            "up_axis" => Self::UpAxis,
            "unit" => Self::Unit,
            "library_animations" => Self::LibraryAnimations,
            "library_cameras" => Self::LibraryCameras,
            "library_controllers" => Self::LibraryControllers,
            "library_effects" => Self::LibraryEffects,
            "library_geometries" => Self::LibraryGeometries,
            "library_images" => Self::LibraryImages,
            "library_lights" => Self::LibraryLights,
            "library_materials" => Self::LibraryMaterials,
            "library_nodes" => Self::LibraryNodes,
            "library_visual_scenes" => Self::LibraryVisualScenes,
            "geometry" => Self::Geometry,
            "mesh" => Self::Mesh,
            "convex_mesh" => Self::ConvexMesh,
            "spline" => Self::Spline,
            "source" => Self::Source,
            "float_array" => Self::FloatArray,
            "int_array" => Self::IntArray,
            "bool_array" => Self::BoolArray,
            "Name_array" => Self::NameArray,
            "IDREF_array" => Self::IdrefArray,
            "technique_common" => Self::TechniqueCommon,
            "technique" => Self::Technique,
            "accessor" => Self::Accessor,
            "param" => Self::Param,
            "vertices" => Self::Vertices,
            "input" => Self::Input,
            "triangles" => Self::Triangles,
            "polylist" => Self::Polylist,
            "polygons" => Self::Polygons,
            "lines" => Self::Lines,
            "linestrips" => Self::Linestrips,
            "tristrips" => Self::Tristrips,
            "trifans" => Self::Trifans,
            "p" => Self::P,
            "vcount" => Self::VCount,
            "v" => Self::V,
            "ph" => Self::Ph,
            "h" => Self::H,
            "controller" => Self::Controller,
            "skin" => Self::Skin,
            "bind_shape_matrix" => Self::BindShapeMatrix,
            "joints" => Self::Joints,
            "vertex_weights" => Self::VertexWeights,
            "morph" => Self::Morph,
            "visual_scene" => Self::VisualScene,
            "node" => Self::Node,
            "matrix" => Self::Matrix,
            "translate" => Self::Translate,
            "rotate" => Self::Rotate,
            "scale" => Self::Scale,
            "lookat" => Self::Lookat,
            "skew" => Self::Skew,
            "instance_geometry" => Self::InstanceGeometry,
            "instance_controller" => Self::InstanceController,
            "instance_node" => Self::InstanceNode,
            "instance_camera" => Self::InstanceCamera,
            "instance_light" => Self::InstanceLight,
            "instance_visual_scene" => Self::InstanceVisualScene,
            "instance_material" => Self::InstanceMaterial,
            "instance_effect" => Self::InstanceEffect,
            "skeleton" => Self::Skeleton,
            "bind_material" => Self::BindMaterial,
            "bind_vertex_input" => Self::BindVertexInput,
            "bind" => Self::Bind,
            "material" => Self::Material,
            "effect" => Self::Effect,
            "profile_COMMON" => Self::ProfileCommon,
            "newparam" => Self::NewParam,
            "surface" => Self::Surface,
            "sampler2D" => Self::Sampler2D,
            "texture" => Self::Texture,
            "bump" => Self::Bump,
            "image" => Self::Image,
            "init_from" => Self::InitFrom,
            "animation" => Self::Animation,
            "channel" => Self::Channel,
            "sampler" => Self::Sampler,
            "camera" => Self::Camera,
            "light" => Self::Light,
            "scene" => Self::Scene,
            "extra" => Self::Extra,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Collada => "COLLADA",
            Self::Asset => "asset",
            Self::UpAxis => "up_axis",
            Self::Unit => "unit",
            Self::LibraryAnimations => "library_animations",
            Self::LibraryCameras => "library_cameras",
            Self::LibraryControllers => "library_controllers",
            Self::LibraryEffects => "library_effects",
            Self::LibraryGeometries => "library_geometries",
            Self::LibraryImages => "library_images",
            Self::LibraryLights => "library_lights",
            Self::LibraryMaterials => "library_materials",
            Self::LibraryNodes => "library_nodes",
            Self::LibraryVisualScenes => "library_visual_scenes",
            Self::Geometry => "geometry",
            Self::Mesh => "mesh",
            Self::ConvexMesh => "convex_mesh",
            Self::Spline => "spline",
            Self::Source => "source",
            Self::FloatArray => "float_array",
            Self::IntArray => "int_array",
            Self::BoolArray => "bool_array",
            Self::NameArray => "Name_array",
            Self::IdrefArray => "IDREF_array",
            Self::TechniqueCommon => "technique_common",
            Self::Technique => "technique",
            Self::Accessor => "accessor",
            Self::Param => "param",
            Self::Vertices => "vertices",
            Self::Input => "input",
            Self::Triangles => "triangles",
            Self::Polylist => "polylist",
            Self::Polygons => "polygons",
            Self::Lines => "lines",
            Self::Linestrips => "linestrips",
            Self::Tristrips => "tristrips",
            Self::Trifans => "trifans",
            Self::P => "p",
            Self::VCount => "vcount",
            Self::V => "v",
            Self::Ph => "ph",
            Self::H => "h",
            Self::Controller => "controller",
            Self::Skin => "skin",
            Self::BindShapeMatrix => "bind_shape_matrix",
            Self::Joints => "joints",
            Self::VertexWeights => "vertex_weights",
            Self::Morph => "morph",
            Self::VisualScene => "visual_scene",
            Self::Node => "node",
            Self::Matrix => "matrix",
            Self::Translate => "translate",
            Self::Rotate => "rotate",
            Self::Scale => "scale",
            Self::Lookat => "lookat",
            Self::Skew => "skew",
            Self::InstanceGeometry => "instance_geometry",
            Self::InstanceController => "instance_controller",
            Self::InstanceNode => "instance_node",
            Self::InstanceCamera => "instance_camera",
            Self::InstanceLight => "instance_light",
            Self::InstanceVisualScene => "instance_visual_scene",
            Self::InstanceMaterial => "instance_material",
            Self::InstanceEffect => "instance_effect",
            Self::Skeleton => "skeleton",
            Self::BindMaterial => "bind_material",
            Self::BindVertexInput => "bind_vertex_input",
            Self::Bind => "bind",
            Self::Material => "material",
            Self::Effect => "effect",
            Self::ProfileCommon => "profile_COMMON",
            Self::NewParam => "newparam",
            Self::Surface => "surface",
            Self::Sampler2D => "sampler2D",
            Self::Texture => "texture",
            Self::Bump => "bump",
            Self::Image => "image",
            Self::InitFrom => "init_from",
            Self::Animation => "animation",
            Self::Channel => "channel",
            Self::Sampler => "sampler",
            Self::Camera => "camera",
            Self::Light => "light",
            Self::Scene => "scene",
            Self::Extra => "extra",
            Self::Unrecognized(tag) => tag,
        }
    }

    /// Polygon-carrying children of `<mesh>`.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Triangles
                | Self::Polylist
                | Self::Polygons
                | Self::Lines
                | Self::Linestrips
                | Self::Tristrips
                | Self::Trifans
        )
    }

    /// Node children that contribute to the local transform.
    pub fn is_transform(&self) -> bool {
        matches!(
            self,
            Self::Matrix | Self::Translate | Self::Rotate | Self::Scale | Self::Lookat | Self::Skew
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_known_tag_when_round_tripping_then_tag_is_preserved() {
        for tag in ["COLLADA", "Name_array", "profile_COMMON", "sampler2D", "vcount"] {
            assert_eq!(ElementKind::from_tag(tag).tag(), tag);
        }
    }

    #[test]
    fn given_vendor_tag_when_classifying_then_it_is_unrecognized() {
        let kind = ElementKind::from_tag("max_bump");
        assert_eq!(kind, ElementKind::Unrecognized("max_bump".to_string()));
        assert!(!kind.is_primitive());
        assert!(!kind.is_transform());
    }
}
