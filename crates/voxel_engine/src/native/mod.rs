//! # Native boundary
//!
//! Everything that touches the opaque renderer: the [`NativeRenderer`] trait,
//! typed handle ownership, the handle registry, the plain-data blocks passed
//! across, and a headless recording backend.

pub mod backend;
pub mod handle;
pub mod recording;
pub mod registry;
pub mod resources;

pub use backend::NativeRenderer;
pub use handle::{Camera, FormPipeline, HandleKind, Instance, NativeRef, Owned, RawHandle, Volume};
pub use recording::{CallKind, NativeCall, RecordedCall, RecordingRenderer};
pub use registry::{HandleRegistry, HandleStats, KindStats, RegistryError, Releasable};
pub use resources::{
    CameraConstants, CameraView, FormBinding, MaterialAttributes, MaterialLayoutError,
    MaterialResources, ShaderBundle, TextureLayers, TraversalParams,
};
