//! Native renderer abstraction
//!
//! This trait is the whole surface the orchestrator uses to drive the
//! renderer. Implementations wrap an FFI plugin, a GPU backend, or the
//! headless [`crate::native::recording::RecordingRenderer`].
//!
//! Every method takes `&self` and may be called from pool worker threads.
//! Calls into different subsystems (traversal, occlusion, submission) may run
//! concurrently. Instance lifecycle calls are never issued while frame work
//! is in flight; the orchestrator serializes them behind the frame handle.
//!
//! Creation calls return `None` for the native null handle.

use crate::foundation::math::{Mat4, Vec3};
use crate::native::handle::RawHandle;
use crate::native::resources::{
    CameraConstants, FormBinding, MaterialResources, ShaderBundle, TraversalParams,
};

/// Opaque native renderer
pub trait NativeRenderer: Send + Sync {
    /// Create the renderer instance
    fn create_instance(&self) -> Option<RawHandle>;

    /// Destroy the renderer instance; all dependents are gone by now
    fn destroy_instance(&self, instance: RawHandle);

    /// Renderer-side setup after configuration. Returns `false` on failure.
    fn initialize_instance(&self, instance: RawHandle) -> bool;

    /// Provide the surface vertex and fragment stages
    fn configure_surface_shaders(&self, instance: RawHandle, vertex: &[u8], fragment: &[u8]);

    /// Provide the surface analysis and assembly compute stages
    fn configure_compute_shaders(&self, instance: RawHandle, analysis: &[u8], assembly: &[u8]);

    /// Provide packed material data
    fn configure_material_resources(&self, instance: RawHandle, materials: &MaterialResources);

    /// Number of parallel submission queues; valid after initialization
    fn queue_count(&self, instance: RawHandle) -> u32;

    /// Create a native volume covering `min..max`
    fn create_volume(&self, min: Vec3, max: Vec3) -> Option<RawHandle>;

    /// Destroy a native volume
    fn destroy_volume(&self, instance: RawHandle, volume: RawHandle);

    /// Place a volume in the world
    fn set_volume_transform(&self, volume: RawHandle, transform: &Mat4);

    /// Walk a volume against an observer and emit renderable work
    fn traverse_volume(
        &self,
        instance: RawHandle,
        volume: RawHandle,
        params: &TraversalParams,
        forms: &[FormBinding],
    );

    /// Compile a form generator from SPIR-V bytecode
    fn create_form_pipeline(&self, instance: RawHandle, shader: &[u8]) -> Option<RawHandle>;

    /// Release a pipeline handle
    fn release_handle(&self, instance: RawHandle, handle: RawHandle);

    /// Create a camera bound to the instance
    fn create_camera(&self, instance: RawHandle) -> Option<RawHandle>;

    /// Destroy a camera
    fn destroy_camera(&self, camera: RawHandle);

    /// Write the camera constants used by the next occlusion query
    fn set_camera_view(&self, camera: RawHandle, constants: &CameraConstants);

    /// Run the occlusion query for one camera
    fn query_occlusion(&self, instance: RawHandle, camera: RawHandle);

    /// Reset per-frame render state
    fn clear_render(&self, instance: RawHandle);

    /// Submit the work recorded for one queue
    fn submit_queue(&self, instance: RawHandle, queue: u32);

    /// Reclaim renderer-internal memory
    fn run_garbage_collection(&self, instance: RawHandle);
}

/// Forward a whole bundle through the two configure calls.
pub(crate) fn configure_shaders(
    renderer: &dyn NativeRenderer,
    instance: RawHandle,
    shaders: &ShaderBundle,
) {
    renderer.configure_surface_shaders(instance, &shaders.surface_vertex, &shaders.surface_fragment);
    renderer.configure_compute_shaders(instance, &shaders.surface_analysis, &shaders.surface_assembly);
}
