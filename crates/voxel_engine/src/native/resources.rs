//! Plain data handed across the native boundary
//!
//! Shader bytecode, packed material data, camera constants and traversal
//! parameters. Anything the renderer reads as raw memory is `#[repr(C)]` and
//! `bytemuck::Pod`.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::foundation::math::{Mat4, Vec3};
use crate::native::handle::{FormPipeline, NativeRef};

/// SPIR-V bytecode for every stage the renderer needs at configure time
#[derive(Debug, Clone, Default)]
pub struct ShaderBundle {
    /// Surface vertex stage
    pub surface_vertex: Vec<u8>,
    /// Surface fragment stage
    pub surface_fragment: Vec<u8>,
    /// Compute stage classifying surface cells
    pub surface_analysis: Vec<u8>,
    /// Compute stage assembling vertices and triangles
    pub surface_assembly: Vec<u8>,
}

impl ShaderBundle {
    /// Name of the first empty stage, if any
    pub fn missing_stage(&self) -> Option<&'static str> {
        [
            ("surface vertex", &self.surface_vertex),
            ("surface fragment", &self.surface_fragment),
            ("surface analysis", &self.surface_analysis),
            ("surface assembly", &self.surface_assembly),
        ]
        .into_iter()
        .find(|(_, bytes)| bytes.is_empty())
        .map(|(name, _)| name)
    }
}

/// Per-material shading attributes, 32 bytes each
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialAttributes {
    /// RGBA tint
    pub tint: [f32; 4],
    /// World-space texture tiling size
    pub size: [f32; 2],
    /// Tessellation displacement height
    pub tess_height: f32,
    /// Tessellation displacement midpoint
    pub tess_center: f32,
}

impl Default for MaterialAttributes {
    fn default() -> Self {
        Self {
            tint: [1.0; 4],
            size: [1.0; 2],
            tess_height: 0.0,
            tess_center: 0.5,
        }
    }
}

/// A stack of equally sized RGBA8 layers, one per material
#[derive(Debug, Clone, Default)]
pub struct TextureLayers {
    /// Layer width in texels
    pub width: u32,
    /// Layer height in texels
    pub height: u32,
    /// Tightly packed layer data
    pub data: Vec<u8>,
}

impl TextureLayers {
    /// Byte size of one layer
    pub const fn layer_stride(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Material resources packed by the host application
#[derive(Debug, Clone, Default)]
pub struct MaterialResources {
    /// One entry per material
    pub attributes: Vec<MaterialAttributes>,
    /// Colour and specular layers
    pub color_spec: TextureLayers,
    /// Normal and height layers
    pub normal_height: TextureLayers,
}

/// Inconsistent material packing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterialLayoutError {
    /// Layer data does not hold one layer per material
    #[error("{layers} layer data holds {actual} bytes, expected {expected} for {materials} materials")]
    Size {
        /// Which layer stack is wrong
        layers: &'static str,
        /// Number of materials
        materials: usize,
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        actual: usize,
    },

    /// Materials exist but a layer stack has no texels
    #[error("{layers} layers are empty but {materials} materials are defined")]
    EmptyLayers {
        /// Which layer stack is empty
        layers: &'static str,
        /// Number of materials
        materials: usize,
    },

    /// The two layer stacks disagree on resolution
    #[error("color/spec layers are {color:?} but normal/height layers are {normal:?}")]
    Resolution {
        /// Colour/specular width and height
        color: (u32, u32),
        /// Normal/height width and height
        normal: (u32, u32),
    },
}

impl MaterialResources {
    /// Number of materials
    pub fn material_count(&self) -> usize {
        self.attributes.len()
    }

    /// Attribute block as raw bytes
    pub fn attribute_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.attributes)
    }

    /// Check both layer stacks share one resolution and hold exactly one
    /// non-empty layer per material
    pub fn validate(&self) -> Result<(), MaterialLayoutError> {
        let materials = self.material_count();
        for (name, layers) in [("color/spec", &self.color_spec), ("normal/height", &self.normal_height)] {
            if materials > 0 && layers.layer_stride() == 0 {
                return Err(MaterialLayoutError::EmptyLayers { layers: name, materials });
            }
            let expected = layers.layer_stride() * materials;
            if layers.data.len() != expected {
                return Err(MaterialLayoutError::Size {
                    layers: name,
                    materials,
                    expected,
                    actual: layers.data.len(),
                });
            }
        }

        let color = (self.color_spec.width, self.color_spec.height);
        let normal = (self.normal_height.width, self.normal_height.height);
        if materials > 0 && color != normal {
            return Err(MaterialLayoutError::Resolution { color, normal });
        }
        Ok(())
    }
}

/// Camera state written by the host once per frame
#[derive(Debug, Clone, PartialEq)]
pub struct CameraView {
    /// World to view matrix
    pub view: Mat4,
    /// View to clip matrix
    pub projection: Mat4,
    /// Camera position in world space
    pub position: Vec3,
}

impl Default for CameraView {
    fn default() -> Self {
        Self {
            view: Mat4::identity(),
            projection: Mat4::identity(),
            position: Vec3::zeros(),
        }
    }
}

/// GPU layout of [`CameraView`]; matrices are column-major
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraConstants {
    /// projection * view
    pub view_projection: [[f32; 4]; 4],
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip
    pub projection: [[f32; 4]; 4],
    /// xyz position, w = 1
    pub position: [f32; 4],
}

impl From<&CameraView> for CameraConstants {
    fn from(view: &CameraView) -> Self {
        let view_projection = view.projection * view.view;
        Self {
            view_projection: view_projection.into(),
            view: view.view.into(),
            projection: view.projection.into(),
            position: [view.position.x, view.position.y, view.position.z, 1.0],
        }
    }
}

/// A form applied to a region of a volume during traversal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormBinding {
    /// Region minimum in volume space
    pub min: Vec3,
    /// Region maximum in volume space
    pub max: Vec3,
    /// Generator pipeline
    pub pipeline: NativeRef<FormPipeline>,
}

/// Per-call traversal parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraversalParams {
    /// Observer position in world space
    pub observer: Vec3,
    /// Screen-space error above which a chunk is subdivided
    pub error_threshold: f32,
    /// Edge length of a leaf chunk
    pub voxel_size: f32,
    /// Index of the pool worker issuing the call
    pub worker: usize,
}
