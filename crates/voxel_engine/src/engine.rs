//! Core engine implementation
//!
//! [`VolumeEngine`] owns the renderer session, the entity store, cameras,
//! form pipelines and the worker pool. The host drives it once per frame
//! with [`VolumeEngine::advance`].

use std::sync::Arc;

use parking_lot::RwLock;
use slotmap::SlotMap;
use thiserror::Error;

use crate::core::config::{ConfigError, EngineConfig, FramePacing};
use crate::foundation::math::{Transform, Vec3};
use crate::frame::builder::{build_frame, FramePlan, FrameResources};
use crate::frame::graph::GraphError;
use crate::frame::handle::{FrameReport, FrameTaskHandle};
use crate::native::backend::NativeRenderer;
use crate::native::handle::{Camera, FormPipeline, Instance, NativeRef, Owned};
use crate::native::registry::{HandleRegistry, HandleStats, RegistryError};
use crate::native::resources::{CameraView, FormBinding, MaterialResources, ShaderBundle};
use crate::scene::entity::{ComponentMask, EntityId, FormRef};
use crate::scene::store::{EntityQuery, SceneStore, StoreError};
use crate::session::{RendererSession, SessionError};

slotmap::new_key_type! {
    /// Id of an active camera
    pub struct CameraId;
    /// Id of a form generator pipeline
    pub struct FormId;
}

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Renderer session failure
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Native handle creation failure
    #[error("Handle error: {0}")]
    Registry(#[from] RegistryError),

    /// Entity creation failure
    #[error("Scene error: {0}")]
    Store(#[from] StoreError),

    /// Frame graph construction failure
    #[error("Frame graph error: {0}")]
    Graph(#[from] GraphError),

    /// The worker pool could not be started
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// No active camera with this id
    #[error("Unknown camera {0:?}")]
    UnknownCamera(CameraId),

    /// No form pipeline with this id
    #[error("Unknown form {0:?}")]
    UnknownForm(FormId),

    /// The form is still referenced by live entities
    #[error("Form {form:?} is still used by {entities} entities")]
    FormInUse {
        /// Form id
        form: FormId,
        /// Live entities referencing it
        entities: usize,
    },

    /// The renderer instance has been destroyed
    #[error("Engine has been shut down")]
    ShutDown,
}

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Voxel volume orchestrator
pub struct VolumeEngine {
    config: EngineConfig,
    registry: Arc<HandleRegistry>,
    session: RendererSession,
    store: Arc<RwLock<SceneStore>>,
    cameras: SlotMap<CameraId, Owned<Camera>>,
    forms: SlotMap<FormId, Owned<FormPipeline>>,
    pool: Arc<rayon::ThreadPool>,
    in_flight: Option<FrameTaskHandle>,
    frame_index: u64,
}

impl VolumeEngine {
    /// Create, configure and initialize the renderer and start the pool.
    ///
    /// Any failure aborts startup; an instance created before the failure is
    /// destroyed again.
    pub fn startup(
        renderer: Arc<dyn NativeRenderer>,
        config: EngineConfig,
        shaders: &ShaderBundle,
        materials: &MaterialResources,
    ) -> EngineResult<Self> {
        log::info!("Starting volume engine...");
        config.validate()?;

        let workers = config.scheduler.resolved_workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("volume-worker-{index}"))
            .build()
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;

        let registry = Arc::new(HandleRegistry::new(renderer));
        let mut session = RendererSession::create(registry.clone())?;
        let queue_count = match session
            .configure(shaders, materials)
            .and_then(|()| session.initialize())
        {
            Ok(count) => count,
            Err(e) => {
                log::error!("Startup aborted: {e}");
                session.destroy();
                return Err(e.into());
            }
        };

        if queue_count as usize > workers {
            log::warn!(
                "Renderer exposes {queue_count} submission queues but the pool has {workers} workers"
            );
        }
        log::info!("Volume engine ready ({workers} workers, {queue_count} queues)");

        Ok(Self {
            config,
            registry,
            session,
            store: Arc::new(RwLock::new(SceneStore::new())),
            cameras: SlotMap::with_key(),
            forms: SlotMap::with_key(),
            pool: Arc::new(pool),
            in_flight: None,
            frame_index: 0,
        })
    }

    fn instance(&self) -> EngineResult<NativeRef<Instance>> {
        self.session.instance().ok_or(EngineError::ShutDown)
    }

    /// Engine configuration
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submission queues, read once at startup
    pub const fn queue_count(&self) -> u32 {
        self.session.queue_count()
    }

    /// Index the next dispatched frame will get
    pub const fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Whether [`Self::shutdown`] has run
    pub const fn is_shut_down(&self) -> bool {
        self.session.is_null()
    }

    /// Native handle counters
    pub fn stats(&self) -> HandleStats {
        self.registry.stats()
    }

    /// Number of live entities
    pub fn entity_count(&self) -> usize {
        self.store.read().len()
    }

    /// Create a volume entity with a new native volume.
    ///
    /// Waits for the in-flight frame so no traversal runs while the volume is
    /// created and inserted.
    pub fn create_volume_entity(
        &mut self,
        min: Vec3,
        max: Vec3,
        transform: Transform,
        forms: Vec<FormRef>,
    ) -> EngineResult<EntityId> {
        self.instance()?;
        self.wait_idle();
        Ok(self.store.write().create(&self.registry, min, max, transform, forms)?)
    }

    /// Flag an entity for destruction; it is removed by a later frame's flush
    pub fn mark_for_destroy(&mut self, id: EntityId) -> bool {
        self.store.write().mark_for_destroy(id)
    }

    /// Snapshot entities carrying every component in `mask`
    pub fn query(&self, mask: ComponentMask) -> EntityQuery {
        self.store.read().query(mask)
    }

    /// Build and dispatch the next frame.
    ///
    /// Returns `Ok(None)` without touching the renderer when the instance is
    /// null, or when the previous frame is still running under
    /// [`FramePacing::SkipWhileBusy`]. Otherwise waits for the previous frame
    /// first, so frame N+1 never overlaps frame N.
    pub fn advance(&mut self, observer: Vec3, error_threshold: f32) -> EngineResult<Option<FrameTaskHandle>> {
        let Some(instance) = self.session.instance() else {
            log::trace!("Frame skipped: renderer instance is null");
            return Ok(None);
        };

        if let Some(previous) = &self.in_flight {
            match self.config.scheduler.pacing {
                FramePacing::Wait => {
                    previous.wait();
                }
                FramePacing::SkipWhileBusy if !previous.is_complete() => {
                    log::debug!("Frame {} still running; skipping", previous.frame());
                    return Ok(None);
                }
                FramePacing::SkipWhileBusy => {}
            }
        }

        let frame = self.frame_index;
        let traversal = &self.config.traversal;
        let plan = FramePlan {
            frame,
            observer,
            error_threshold,
            voxel_size: traversal.voxel_size,
            chunk_size: traversal.chunk_size,
            destroy_policy: self.config.scheduler.destroy_policy,
            run_gc: self.config.scheduler.gc_due(frame),
        };
        let resources = FrameResources {
            registry: self.registry.clone(),
            instance,
            store: self.store.clone(),
            cameras: self.cameras.values().map(Owned::native_ref).collect(),
            queue_count: self.session.queue_count(),
        };
        let build = build_frame(&plan, &resources)?;

        let handle = FrameTaskHandle::pending(frame);
        let completion = handle.clone();
        let pool = self.pool.clone();
        self.pool.spawn(move || completion.complete(build.run(&pool)));

        log::trace!("Frame {frame} dispatched");
        self.frame_index += 1;
        self.in_flight = Some(handle.clone());
        Ok(Some(handle))
    }

    /// Block until the in-flight frame, if any, has finished
    pub fn wait_idle(&self) -> Option<FrameReport> {
        self.in_flight.as_ref().map(FrameTaskHandle::wait)
    }

    /// Create a camera
    pub fn activate_camera(&mut self) -> EngineResult<CameraId> {
        let camera = self.registry.create_camera(self.instance()?)?;
        let id = self.cameras.insert(camera);
        log::debug!("Camera {id:?} activated");
        Ok(id)
    }

    /// Write a camera's view for the next occlusion query
    pub fn set_camera_view(&self, id: CameraId, view: &CameraView) -> EngineResult<()> {
        let camera = self.cameras.get(id).ok_or(EngineError::UnknownCamera(id))?;
        self.registry.set_camera_view(camera.native_ref(), view);
        Ok(())
    }

    /// Release a camera once no frame can still query it
    pub fn deactivate_camera(&mut self, id: CameraId) -> EngineResult<()> {
        if !self.cameras.contains_key(id) {
            return Err(EngineError::UnknownCamera(id));
        }
        let instance = self.instance()?;
        self.wait_idle();

        let mut slot = self.cameras.remove(id);
        self.registry.release(instance, &mut slot);
        log::debug!("Camera {id:?} deactivated");
        Ok(())
    }

    /// Compile a form generator
    pub fn create_form(&mut self, shader: &[u8]) -> EngineResult<FormId> {
        let pipeline = self.registry.create_form_pipeline(self.instance()?, shader)?;
        Ok(self.forms.insert(pipeline))
    }

    /// Reference a form over `min..max` for use in an entity
    pub fn form_ref(&self, id: FormId, min: Vec3, max: Vec3) -> EngineResult<FormRef> {
        let pipeline = self.forms.get(id).ok_or(EngineError::UnknownForm(id))?;
        Ok(FormBinding {
            min,
            max,
            pipeline: pipeline.native_ref(),
        })
    }

    /// Release a form pipeline no live entity references
    pub fn release_form(&mut self, id: FormId) -> EngineResult<()> {
        let pipeline = self.forms.get(id).ok_or(EngineError::UnknownForm(id))?.native_ref();
        let instance = self.instance()?;
        self.wait_idle();

        let entities = self
            .store
            .read()
            .query(ComponentMask::FORMS)
            .iter()
            .filter(|item| item.forms.iter().any(|form| form.pipeline == pipeline))
            .count();
        if entities > 0 {
            return Err(EngineError::FormInUse { form: id, entities });
        }

        let mut slot = self.forms.remove(id);
        self.registry.release(instance, &mut slot);
        Ok(())
    }

    /// Tear everything down in dependency order; safe to call twice.
    ///
    /// Waits for the in-flight frame, destroys entities, cameras and form
    /// pipelines, then the instance.
    pub fn shutdown(&mut self) {
        let Some(instance) = self.session.instance() else {
            return;
        };
        log::info!("Shutting down volume engine...");
        if let Some(report) = self.wait_idle() {
            log::debug!("Last frame: {report:?}");
        }

        let entities = self.store.write().drain_all(&self.registry, instance);
        for (_, camera) in self.cameras.drain() {
            self.registry.release(instance, &mut Some(camera));
        }
        for (_, pipeline) in self.forms.drain() {
            self.registry.release(instance, &mut Some(pipeline));
        }
        self.session.destroy();
        self.in_flight = None;

        log::info!("Volume engine shut down ({entities} entities destroyed)");
    }
}

impl Drop for VolumeEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
