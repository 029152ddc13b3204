//! Headless recording renderer
//!
//! A [`NativeRenderer`] that performs no rendering. It hands out fresh handle
//! values, records every call in order, and checks the handle discipline the
//! orchestrator promises:
//!
//! - no call uses a handle that was never created or was already destroyed
//! - no handle is destroyed twice
//! - the instance is destroyed only after every dependent handle
//! - garbage collection never overlaps a destructive handle call
//!
//! Breaches are collected as [`RecordingRenderer::violations`] instead of
//! panicking, so tests can assert on them after worker threads finish.
//! Used by the tests and by the demo binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::foundation::math::{Mat4, Vec3};
use crate::native::backend::NativeRenderer;
use crate::native::handle::RawHandle;
use crate::native::resources::{CameraConstants, FormBinding, MaterialResources, TraversalParams};

/// Kind of a recorded call, used for filtering and latency injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `create_instance`
    CreateInstance,
    /// `destroy_instance`
    DestroyInstance,
    /// `initialize_instance`
    InitializeInstance,
    /// `configure_surface_shaders`
    ConfigureSurfaceShaders,
    /// `configure_compute_shaders`
    ConfigureComputeShaders,
    /// `configure_material_resources`
    ConfigureMaterialResources,
    /// `queue_count`
    QueueCount,
    /// `create_volume`
    CreateVolume,
    /// `destroy_volume`
    DestroyVolume,
    /// `set_volume_transform`
    SetVolumeTransform,
    /// `traverse_volume`
    TraverseVolume,
    /// `create_form_pipeline`
    CreateFormPipeline,
    /// `release_handle`
    ReleaseHandle,
    /// `create_camera`
    CreateCamera,
    /// `destroy_camera`
    DestroyCamera,
    /// `set_camera_view`
    SetCameraView,
    /// `query_occlusion`
    QueryOcclusion,
    /// `clear_render`
    ClearRender,
    /// `submit_queue`
    SubmitQueue,
    /// `run_garbage_collection`
    RunGarbageCollection,
}

/// One native call with its arguments
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCall {
    CreateInstance { instance: Option<RawHandle> },
    DestroyInstance { instance: RawHandle },
    InitializeInstance { instance: RawHandle },
    ConfigureSurfaceShaders { instance: RawHandle, vertex_len: usize, fragment_len: usize },
    ConfigureComputeShaders { instance: RawHandle, analysis_len: usize, assembly_len: usize },
    ConfigureMaterialResources { instance: RawHandle, materials: usize },
    QueueCount { instance: RawHandle },
    CreateVolume { volume: Option<RawHandle>, min: Vec3, max: Vec3 },
    DestroyVolume { instance: RawHandle, volume: RawHandle },
    SetVolumeTransform { volume: RawHandle, transform: Mat4 },
    TraverseVolume { instance: RawHandle, volume: RawHandle, params: TraversalParams, forms: Vec<FormBinding> },
    CreateFormPipeline { instance: RawHandle, pipeline: Option<RawHandle> },
    ReleaseHandle { instance: RawHandle, handle: RawHandle },
    CreateCamera { instance: RawHandle, camera: Option<RawHandle> },
    DestroyCamera { camera: RawHandle },
    SetCameraView { camera: RawHandle, constants: CameraConstants },
    QueryOcclusion { instance: RawHandle, camera: RawHandle },
    ClearRender { instance: RawHandle },
    SubmitQueue { instance: RawHandle, queue: u32 },
    RunGarbageCollection { instance: RawHandle },
}

impl NativeCall {
    /// The call's kind
    pub const fn kind(&self) -> CallKind {
        match self {
            Self::CreateInstance { .. } => CallKind::CreateInstance,
            Self::DestroyInstance { .. } => CallKind::DestroyInstance,
            Self::InitializeInstance { .. } => CallKind::InitializeInstance,
            Self::ConfigureSurfaceShaders { .. } => CallKind::ConfigureSurfaceShaders,
            Self::ConfigureComputeShaders { .. } => CallKind::ConfigureComputeShaders,
            Self::ConfigureMaterialResources { .. } => CallKind::ConfigureMaterialResources,
            Self::QueueCount { .. } => CallKind::QueueCount,
            Self::CreateVolume { .. } => CallKind::CreateVolume,
            Self::DestroyVolume { .. } => CallKind::DestroyVolume,
            Self::SetVolumeTransform { .. } => CallKind::SetVolumeTransform,
            Self::TraverseVolume { .. } => CallKind::TraverseVolume,
            Self::CreateFormPipeline { .. } => CallKind::CreateFormPipeline,
            Self::ReleaseHandle { .. } => CallKind::ReleaseHandle,
            Self::CreateCamera { .. } => CallKind::CreateCamera,
            Self::DestroyCamera { .. } => CallKind::DestroyCamera,
            Self::SetCameraView { .. } => CallKind::SetCameraView,
            Self::QueryOcclusion { .. } => CallKind::QueryOcclusion,
            Self::ClearRender { .. } => CallKind::ClearRender,
            Self::SubmitQueue { .. } => CallKind::SubmitQueue,
            Self::RunGarbageCollection { .. } => CallKind::RunGarbageCollection,
        }
    }
}

/// A call with its position in the global call order
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Position in the global call order, starting at zero
    pub sequence: usize,
    /// Rayon worker index of the calling thread, if any
    pub worker: Option<usize>,
    /// The call
    pub call: NativeCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleClass {
    Instance,
    Volume,
    Camera,
    Pipeline,
}

/// Headless renderer that records calls and validates handle usage
pub struct RecordingRenderer {
    queue_count: u32,
    fail_instance: bool,
    fail_volume: bool,
    fail_initialize: bool,
    latency: HashMap<CallKind, Duration>,
    next_handle: AtomicU64,
    log: Mutex<Vec<RecordedCall>>,
    live: Mutex<HashMap<RawHandle, HandleClass>>,
    violations: Mutex<Vec<String>>,
    destructive: AtomicUsize,
    maintenance: AtomicUsize,
}

impl Default for RecordingRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRenderer {
    /// Renderer exposing four submission queues
    pub fn new() -> Self {
        Self {
            queue_count: 4,
            fail_instance: false,
            fail_volume: false,
            fail_initialize: false,
            latency: HashMap::new(),
            next_handle: AtomicU64::new(0x100),
            log: Mutex::new(Vec::new()),
            live: Mutex::new(HashMap::new()),
            violations: Mutex::new(Vec::new()),
            destructive: AtomicUsize::new(0),
            maintenance: AtomicUsize::new(0),
        }
    }

    /// Set the queue count reported after initialization
    #[must_use]
    pub const fn with_queue_count(mut self, queue_count: u32) -> Self {
        self.queue_count = queue_count;
        self
    }

    /// Make every call of `kind` sleep before returning
    #[must_use]
    pub fn with_latency(mut self, kind: CallKind, delay: Duration) -> Self {
        self.latency.insert(kind, delay);
        self
    }

    /// Return the null handle from `create_instance`
    #[must_use]
    pub const fn fail_instance_creation(mut self) -> Self {
        self.fail_instance = true;
        self
    }

    /// Return the null handle from `create_volume`
    #[must_use]
    pub const fn fail_volume_creation(mut self) -> Self {
        self.fail_volume = true;
        self
    }

    /// Report failure from `initialize_instance`
    #[must_use]
    pub const fn fail_initialization(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// All recorded calls in call order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.log.lock().clone()
    }

    /// Number of recorded calls matching `predicate`
    pub fn count(&self, predicate: impl Fn(&NativeCall) -> bool) -> usize {
        self.log.lock().iter().filter(|r| predicate(&r.call)).count()
    }

    /// Number of recorded calls of `kind`
    pub fn count_kind(&self, kind: CallKind) -> usize {
        self.count(|c| c.kind() == kind)
    }

    /// Sequence numbers of every call of `kind`
    pub fn sequences(&self, kind: CallKind) -> Vec<usize> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.call.kind() == kind)
            .map(|r| r.sequence)
            .collect()
    }

    /// Handle discipline breaches observed so far
    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    /// Handles created and not yet destroyed
    pub fn live_handles(&self) -> usize {
        self.live.lock().len()
    }

    /// Forget recorded calls; handle tracking is kept
    pub fn clear_calls(&self) {
        self.log.lock().clear();
    }

    fn record(&self, call: NativeCall) {
        if let Some(delay) = self.latency.get(&call.kind()) {
            std::thread::sleep(*delay);
        }
        let mut log = self.log.lock();
        let sequence = log.len();
        log.push(RecordedCall {
            sequence,
            worker: rayon::current_thread_index(),
            call,
        });
    }

    fn violation(&self, message: String) {
        log::error!("recording renderer: {message}");
        self.violations.lock().push(message);
    }

    fn allocate(&self, class: HandleClass) -> Option<RawHandle> {
        let handle = RawHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed))?;
        self.live.lock().insert(handle, class);
        Some(handle)
    }

    fn expect_live(&self, handle: RawHandle, class: HandleClass, call: &str) {
        let found = self.live.lock().get(&handle).copied();
        if found != Some(class) {
            self.violation(format!("{call}: {class:?} handle {handle} is not alive"));
        }
    }

    fn retire(&self, handle: RawHandle, class: HandleClass, call: &str) {
        match self.live.lock().remove(&handle) {
            Some(found) if found == class => {}
            Some(found) => self.violation(format!("{call}: handle {handle} is a {found:?}, not a {class:?}")),
            None => self.violation(format!("{call}: {class:?} handle {handle} destroyed twice or never created")),
        }
    }

    fn destructive_call(&self, call: NativeCall) {
        self.destructive.fetch_add(1, Ordering::SeqCst);
        if self.maintenance.load(Ordering::SeqCst) > 0 {
            self.violation(format!("{:?} overlapped garbage collection", call.kind()));
        }
        self.record(call);
        self.destructive.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NativeRenderer for RecordingRenderer {
    fn create_instance(&self) -> Option<RawHandle> {
        let instance = if self.fail_instance {
            None
        } else {
            self.allocate(HandleClass::Instance)
        };
        self.record(NativeCall::CreateInstance { instance });
        instance
    }

    fn destroy_instance(&self, instance: RawHandle) {
        let dependents = self
            .live
            .lock()
            .values()
            .filter(|class| **class != HandleClass::Instance)
            .count();
        if dependents > 0 {
            self.violation(format!("instance {instance} destroyed with {dependents} live dependents"));
        }
        self.retire(instance, HandleClass::Instance, "destroy_instance");
        self.destructive_call(NativeCall::DestroyInstance { instance });
    }

    fn initialize_instance(&self, instance: RawHandle) -> bool {
        self.expect_live(instance, HandleClass::Instance, "initialize_instance");
        self.record(NativeCall::InitializeInstance { instance });
        !self.fail_initialize
    }

    fn configure_surface_shaders(&self, instance: RawHandle, vertex: &[u8], fragment: &[u8]) {
        self.expect_live(instance, HandleClass::Instance, "configure_surface_shaders");
        self.record(NativeCall::ConfigureSurfaceShaders {
            instance,
            vertex_len: vertex.len(),
            fragment_len: fragment.len(),
        });
    }

    fn configure_compute_shaders(&self, instance: RawHandle, analysis: &[u8], assembly: &[u8]) {
        self.expect_live(instance, HandleClass::Instance, "configure_compute_shaders");
        self.record(NativeCall::ConfigureComputeShaders {
            instance,
            analysis_len: analysis.len(),
            assembly_len: assembly.len(),
        });
    }

    fn configure_material_resources(&self, instance: RawHandle, materials: &MaterialResources) {
        self.expect_live(instance, HandleClass::Instance, "configure_material_resources");
        self.record(NativeCall::ConfigureMaterialResources {
            instance,
            materials: materials.material_count(),
        });
    }

    fn queue_count(&self, instance: RawHandle) -> u32 {
        self.expect_live(instance, HandleClass::Instance, "queue_count");
        self.record(NativeCall::QueueCount { instance });
        self.queue_count
    }

    fn create_volume(&self, min: Vec3, max: Vec3) -> Option<RawHandle> {
        let volume = if self.fail_volume {
            None
        } else {
            self.allocate(HandleClass::Volume)
        };
        self.record(NativeCall::CreateVolume { volume, min, max });
        volume
    }

    fn destroy_volume(&self, instance: RawHandle, volume: RawHandle) {
        self.expect_live(instance, HandleClass::Instance, "destroy_volume");
        self.retire(volume, HandleClass::Volume, "destroy_volume");
        self.destructive_call(NativeCall::DestroyVolume { instance, volume });
    }

    fn set_volume_transform(&self, volume: RawHandle, transform: &Mat4) {
        self.expect_live(volume, HandleClass::Volume, "set_volume_transform");
        self.record(NativeCall::SetVolumeTransform {
            volume,
            transform: *transform,
        });
    }

    fn traverse_volume(
        &self,
        instance: RawHandle,
        volume: RawHandle,
        params: &TraversalParams,
        forms: &[FormBinding],
    ) {
        self.expect_live(instance, HandleClass::Instance, "traverse_volume");
        self.expect_live(volume, HandleClass::Volume, "traverse_volume");
        for form in forms {
            self.expect_live(form.pipeline.raw(), HandleClass::Pipeline, "traverse_volume");
        }
        self.record(NativeCall::TraverseVolume {
            instance,
            volume,
            params: *params,
            forms: forms.to_vec(),
        });
    }

    fn create_form_pipeline(&self, instance: RawHandle, _shader: &[u8]) -> Option<RawHandle> {
        self.expect_live(instance, HandleClass::Instance, "create_form_pipeline");
        let pipeline = self.allocate(HandleClass::Pipeline);
        self.record(NativeCall::CreateFormPipeline { instance, pipeline });
        pipeline
    }

    fn release_handle(&self, instance: RawHandle, handle: RawHandle) {
        self.expect_live(instance, HandleClass::Instance, "release_handle");
        self.retire(handle, HandleClass::Pipeline, "release_handle");
        self.destructive_call(NativeCall::ReleaseHandle { instance, handle });
    }

    fn create_camera(&self, instance: RawHandle) -> Option<RawHandle> {
        self.expect_live(instance, HandleClass::Instance, "create_camera");
        let camera = self.allocate(HandleClass::Camera);
        self.record(NativeCall::CreateCamera { instance, camera });
        camera
    }

    fn destroy_camera(&self, camera: RawHandle) {
        self.retire(camera, HandleClass::Camera, "destroy_camera");
        self.destructive_call(NativeCall::DestroyCamera { camera });
    }

    fn set_camera_view(&self, camera: RawHandle, constants: &CameraConstants) {
        self.expect_live(camera, HandleClass::Camera, "set_camera_view");
        self.record(NativeCall::SetCameraView {
            camera,
            constants: *constants,
        });
    }

    fn query_occlusion(&self, instance: RawHandle, camera: RawHandle) {
        self.expect_live(instance, HandleClass::Instance, "query_occlusion");
        self.expect_live(camera, HandleClass::Camera, "query_occlusion");
        self.record(NativeCall::QueryOcclusion { instance, camera });
    }

    fn clear_render(&self, instance: RawHandle) {
        self.expect_live(instance, HandleClass::Instance, "clear_render");
        self.record(NativeCall::ClearRender { instance });
    }

    fn submit_queue(&self, instance: RawHandle, queue: u32) {
        self.expect_live(instance, HandleClass::Instance, "submit_queue");
        if queue >= self.queue_count {
            self.violation(format!("submit_queue: queue {queue} out of range (count {})", self.queue_count));
        }
        self.record(NativeCall::SubmitQueue { instance, queue });
    }

    fn run_garbage_collection(&self, instance: RawHandle) {
        self.expect_live(instance, HandleClass::Instance, "run_garbage_collection");
        self.maintenance.fetch_add(1, Ordering::SeqCst);
        if self.destructive.load(Ordering::SeqCst) > 0 {
            self.violation("garbage collection overlapped a destructive call".to_string());
        }
        self.record(NativeCall::RunGarbageCollection { instance });
        self.maintenance.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_destroy_is_flagged() {
        let renderer = RecordingRenderer::new();
        let instance = renderer.create_instance().unwrap();
        let volume = renderer.create_volume(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0)).unwrap();

        renderer.destroy_volume(instance, volume);
        assert!(renderer.violations().is_empty());
        renderer.destroy_volume(instance, volume);
        assert_eq!(renderer.violations().len(), 1);
    }

    #[test]
    fn test_use_after_destroy_is_flagged() {
        let renderer = RecordingRenderer::new();
        let instance = renderer.create_instance().unwrap();
        let camera = renderer.create_camera(instance).unwrap();
        renderer.destroy_camera(camera);
        renderer.query_occlusion(instance, camera);
        assert!(renderer.violations()[0].contains("query_occlusion"));
    }

    #[test]
    fn test_instance_outliving_dependents() {
        let renderer = RecordingRenderer::new();
        let instance = renderer.create_instance().unwrap();
        let _volume = renderer.create_volume(Vec3::zeros(), Vec3::zeros()).unwrap();
        renderer.destroy_instance(instance);
        assert!(renderer.violations()[0].contains("live dependents"));
    }

    #[test]
    fn test_calls_are_sequenced() {
        let renderer = RecordingRenderer::new().with_queue_count(2);
        let instance = renderer.create_instance().unwrap();
        assert_eq!(renderer.queue_count(instance), 2);
        renderer.submit_queue(instance, 1);
        renderer.clear_render(instance);

        let calls = renderer.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert_eq!(renderer.sequences(CallKind::ClearRender), vec![3]);
        assert_eq!(calls[2].call, NativeCall::SubmitQueue { instance, queue: 1 });
    }
}
