use serde::{Deserialize, Serialize};

use super::GeometryError;

/// Semantic of a vertex attribute stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Usage {
    Position,
    Normal,
    TexCoord,
    Tangent,
    Binormal,
    Color,
    BlendWeight,
    BlendIndices,
}

impl Usage {
    pub const ALL: [Usage; 8] = [
        Usage::Position,
        Usage::Normal,
        Usage::TexCoord,
        Usage::Tangent,
        Usage::Binormal,
        Usage::Color,
        Usage::BlendWeight,
        Usage::BlendIndices,
    ];

    /// COLLADA input semantic to usage.
    pub fn from_semantic(semantic: &str) -> Option<Self> {
        match semantic {
            "POSITION" => Some(Self::Position),
            "NORMAL" => Some(Self::Normal),
            "TEXCOORD" | "UV" => Some(Self::TexCoord),
            "TEXTANGENT" | "TANGENT" => Some(Self::Tangent),
            "TEXBINORMAL" | "BINORMAL" => Some(Self::Binormal),
            "COLOR" => Some(Self::Color),
            _ => None,
        }
    }

    /// How many channels of this usage survive filtering.
    pub fn max_channels(self) -> u32 {
        match self {
            Self::TexCoord => 8,
            Self::Color => 2,
            _ => 1,
        }
    }

    /// Stable code written to the binary layout table.
    pub fn code(self) -> u8 {
        match self {
            Self::Position => 0,
            Self::Normal => 1,
            Self::TexCoord => 2,
            Self::Tangent => 3,
            Self::Binormal => 4,
            Self::Color => 5,
            Self::BlendWeight => 6,
            Self::BlendIndices => 7,
        }
    }
}

/// One raw attribute stream as read from the document: `components` f32
/// lanes per element.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChannel {
    pub usage: Usage,
    pub usage_index: u32,
    pub components: usize,
    pub data: Vec<f32>,
}

impl RawChannel {
    pub fn new(usage: Usage, usage_index: u32, components: usize, data: Vec<f32>) -> Self {
        Self {
            usage,
            usage_index,
            components,
            data,
        }
    }

    pub fn len(&self) -> usize {
        if self.components == 0 {
            0
        } else {
            self.data.len() / self.components
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.components)?;
        self.data.get(start..start + self.components)
    }
}

/// Channels sharing one index array (one input offset of a primitive).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStream {
    pub indices: Vec<u32>,
    pub channels: Vec<RawChannel>,
}

/// One drawable primitive before welding. Every stream's index array has the
/// same length, three corners per triangle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Primitive {
    pub name: String,
    pub streams: Vec<IndexStream>,
}

impl Primitive {
    pub fn corner_count(&self) -> usize {
        self.streams.first().map(|stream| stream.indices.len()).unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        let expected = self.corner_count();
        for stream in &self.streams {
            if stream.indices.len() != expected {
                return Err(GeometryError::IndexCountMismatch {
                    primitive: self.name.clone(),
                    expected,
                    found: stream.indices.len(),
                });
            }
            for channel in &stream.channels {
                if !(1..=4).contains(&channel.components) {
                    return Err(GeometryError::InvalidComponents {
                        primitive: self.name.clone(),
                        usage: channel.usage,
                        components: channel.components,
                    });
                }
            }
        }
        if expected % 3 != 0 {
            return Err(GeometryError::NotTriangles {
                primitive: self.name.clone(),
                count: expected,
            });
        }
        Ok(())
    }
}

// ─── Channel filtering ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    /// Keep only the listed usages.
    Include,
    /// Keep everything except the listed usages.
    Exclude,
}

/// Usage mask deciding which semantic channels reach the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFilter {
    pub mode: FilterMode,
    pub usages: Vec<Usage>,
}

impl Default for ChannelFilter {
    fn default() -> Self {
        Self {
            mode: FilterMode::Exclude,
            usages: Vec::new(),
        }
    }
}

impl ChannelFilter {
    pub fn accepts(&self, usage: Usage) -> bool {
        let listed = self.usages.contains(&usage);
        match self.mode {
            FilterMode::Include => listed,
            FilterMode::Exclude => !listed,
        }
    }
}

// ─── Output layout ────────────────────────────────────────────────────────────

/// One attribute of the output vertex record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VertexChannel {
    pub usage: Usage,
    pub usage_index: u32,
    pub components: usize,
    /// Byte offset inside the vertex record.
    pub offset: usize,
    /// Bytes occupied by this channel.
    pub stride: usize,
    pub kept: bool,
    pub generated: bool,
}

impl VertexChannel {
    pub(super) fn float_range(&self) -> std::ops::Range<usize> {
        let start = self.offset / 4;
        start..start + self.components
    }
}

/// Interleaved vertex format actually written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VertexLayout {
    pub channels: Vec<VertexChannel>,
    /// Bytes per vertex.
    pub stride: usize,
}

impl VertexLayout {
    pub fn find(&self, usage: Usage, usage_index: u32) -> Option<&VertexChannel> {
        self.channels
            .iter()
            .find(|channel| channel.usage == usage && channel.usage_index == usage_index)
    }

    pub fn first(&self, usage: Usage) -> Option<&VertexChannel> {
        self.channels.iter().find(|channel| channel.usage == usage)
    }

    pub fn stride_floats(&self) -> usize {
        self.stride / 4
    }

    pub(super) fn push(&mut self, usage: Usage, usage_index: u32, components: usize, generated: bool) {
        let stride = components * 4;
        self.channels.push(VertexChannel {
            usage,
            usage_index,
            components,
            offset: self.stride,
            stride,
            kept: true,
            generated,
        });
        self.stride += stride;
    }
}
