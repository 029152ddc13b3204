//! Handle registry
//!
//! The only place that turns raw native handles into [`Owned`] values and
//! back. Factories return owners; destroy and release calls consume them.
//! The registry keeps create/destroy counters per kind for diagnostics but
//! does not track which handles are alive: callers own their handles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::foundation::math::{Bounds, Transform};
use crate::native::backend::NativeRenderer;
use crate::native::handle::{
    Camera, FormPipeline, HandleKind, Instance, NativeRef, Owned, RawHandle, Volume,
};
use crate::native::resources::{CameraConstants, CameraView};

/// Handle creation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The renderer returned its null handle
    #[error("renderer returned a null {0} handle")]
    NullHandle(&'static str),

    /// Form pipeline requested with no bytecode
    #[error("form shader bytecode is empty")]
    EmptyShader,
}

/// Counters for one handle kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    /// Handles created
    pub created: u64,
    /// Handles destroyed or released
    pub destroyed: u64,
}

impl KindStats {
    /// Handles created and not yet destroyed
    pub const fn live(&self) -> u64 {
        self.created.saturating_sub(self.destroyed)
    }
}

/// Snapshot of the registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleStats {
    /// Renderer instances
    pub instances: KindStats,
    /// Native volumes
    pub volumes: KindStats,
    /// Cameras
    pub cameras: KindStats,
    /// Form pipelines
    pub form_pipelines: KindStats,
}

#[derive(Default)]
struct Counter {
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl Counter {
    fn snapshot(&self) -> KindStats {
        KindStats {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct Counters {
    instances: Counter,
    volumes: Counter,
    cameras: Counter,
    form_pipelines: Counter,
}

/// Handle kinds that can be given back through [`HandleRegistry::release`]
pub trait Releasable: HandleKind {
    #[doc(hidden)]
    fn release_native(renderer: &dyn NativeRenderer, instance: RawHandle, handle: RawHandle);

    #[doc(hidden)]
    fn counter(registry: &HandleRegistry) -> &AtomicU64;
}

impl Releasable for Volume {
    fn release_native(renderer: &dyn NativeRenderer, instance: RawHandle, handle: RawHandle) {
        renderer.destroy_volume(instance, handle);
    }

    fn counter(registry: &HandleRegistry) -> &AtomicU64 {
        &registry.counters.volumes.destroyed
    }
}

impl Releasable for Camera {
    fn release_native(renderer: &dyn NativeRenderer, _instance: RawHandle, handle: RawHandle) {
        renderer.destroy_camera(handle);
    }

    fn counter(registry: &HandleRegistry) -> &AtomicU64 {
        &registry.counters.cameras.destroyed
    }
}

impl Releasable for FormPipeline {
    fn release_native(renderer: &dyn NativeRenderer, instance: RawHandle, handle: RawHandle) {
        renderer.release_handle(instance, handle);
    }

    fn counter(registry: &HandleRegistry) -> &AtomicU64 {
        &registry.counters.form_pipelines.destroyed
    }
}

/// Factory and destroyer for every native handle kind
pub struct HandleRegistry {
    renderer: Arc<dyn NativeRenderer>,
    counters: Counters,
}

impl HandleRegistry {
    /// Create a registry over a renderer
    pub fn new(renderer: Arc<dyn NativeRenderer>) -> Self {
        Self {
            renderer,
            counters: Counters::default(),
        }
    }

    /// The underlying renderer
    pub fn renderer(&self) -> &dyn NativeRenderer {
        self.renderer.as_ref()
    }

    /// Counter snapshot
    pub fn stats(&self) -> HandleStats {
        HandleStats {
            instances: self.counters.instances.snapshot(),
            volumes: self.counters.volumes.snapshot(),
            cameras: self.counters.cameras.snapshot(),
            form_pipelines: self.counters.form_pipelines.snapshot(),
        }
    }

    fn adopt<K: HandleKind>(raw: Option<RawHandle>, counter: &Counter) -> Result<Owned<K>, RegistryError> {
        let raw = raw.ok_or(RegistryError::NullHandle(K::NAME))?;
        counter.created.fetch_add(1, Ordering::Relaxed);
        log::trace!("created {} handle {}", K::NAME, raw);
        Ok(Owned::from_raw(raw))
    }

    /// Create the renderer instance
    pub fn create_instance(&self) -> Result<Owned<Instance>, RegistryError> {
        Self::adopt(self.renderer.create_instance(), &self.counters.instances)
    }

    /// Destroy the renderer instance
    pub fn destroy_instance(&self, instance: Owned<Instance>) {
        let raw = instance.into_raw();
        self.renderer.destroy_instance(raw);
        self.counters.instances.destroyed.fetch_add(1, Ordering::Relaxed);
        log::trace!("destroyed instance handle {}", raw);
    }

    /// Compile a form generator pipeline
    pub fn create_form_pipeline(
        &self,
        instance: NativeRef<Instance>,
        shader: &[u8],
    ) -> Result<Owned<FormPipeline>, RegistryError> {
        if shader.is_empty() {
            return Err(RegistryError::EmptyShader);
        }
        Self::adopt(
            self.renderer.create_form_pipeline(instance.raw(), shader),
            &self.counters.form_pipelines,
        )
    }

    /// Create a native volume. Not tied to any entity.
    pub fn create_volume(&self, bounds: &Bounds) -> Result<Owned<Volume>, RegistryError> {
        Self::adopt(
            self.renderer.create_volume(bounds.min, bounds.max),
            &self.counters.volumes,
        )
    }

    /// Place a volume in the world
    pub fn set_volume_transform(&self, volume: NativeRef<Volume>, transform: &Transform) {
        self.renderer.set_volume_transform(volume.raw(), &transform.to_matrix());
    }

    /// Destroy a native volume
    pub fn destroy_volume(&self, instance: NativeRef<Instance>, volume: Owned<Volume>) {
        self.release(instance, &mut Some(volume));
    }

    /// Create a camera bound to the instance
    pub fn create_camera(&self, instance: NativeRef<Instance>) -> Result<Owned<Camera>, RegistryError> {
        Self::adopt(self.renderer.create_camera(instance.raw()), &self.counters.cameras)
    }

    /// Write camera constants
    pub fn set_camera_view(&self, camera: NativeRef<Camera>, view: &CameraView) {
        self.renderer.set_camera_view(camera.raw(), &CameraConstants::from(view));
    }

    /// Release whatever `slot` holds and leave it null.
    ///
    /// Releasing an empty slot is a no-op, so calling this twice on the same
    /// slot never reaches the renderer twice.
    pub fn release<K: Releasable>(&self, instance: NativeRef<Instance>, slot: &mut Option<Owned<K>>) {
        let Some(handle) = slot.take() else {
            log::trace!("release of null {} handle ignored", K::NAME);
            return;
        };
        let raw = handle.into_raw();
        K::release_native(self.renderer.as_ref(), instance.raw(), raw);
        K::counter(self).fetch_add(1, Ordering::Relaxed);
        log::trace!("released {} handle {}", K::NAME, raw);
    }
}
