//! Renderer session
//!
//! Owns the single renderer instance and walks it through
//! `Created -> Configured -> Initialized -> Destroyed`. Once destroyed the
//! session holds the null sentinel and every frame entry point becomes a
//! no-op.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::native::backend::configure_shaders;
use crate::native::handle::{Instance, NativeRef, Owned};
use crate::native::registry::{HandleRegistry, RegistryError};
use crate::native::resources::{MaterialLayoutError, MaterialResources, ShaderBundle};

/// Lifecycle state of a [`RendererSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Instance exists, nothing configured
    Created,
    /// Shaders and materials provided
    Configured,
    /// Renderer initialized and queue count known
    Initialized,
    /// Instance destroyed; handle is null
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Initialized => "initialized",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Session lifecycle failures
#[derive(Error, Debug)]
pub enum SessionError {
    /// The renderer could not create an instance
    #[error("renderer instance creation failed")]
    InstanceCreation,

    /// Operation not allowed in the current state
    #[error("cannot {operation} a session that is {state}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// State the session was in
        state: SessionState,
    },

    /// A shader stage has no bytecode
    #[error("{0} shader is empty")]
    MissingShader(&'static str),

    /// Material layers do not match the material count
    #[error(transparent)]
    Materials(#[from] MaterialLayoutError),

    /// `initialize_instance` reported failure
    #[error("renderer initialization failed")]
    InitializationFailed,
}

/// The renderer instance and its lifecycle
pub struct RendererSession {
    registry: Arc<HandleRegistry>,
    instance: Option<Owned<Instance>>,
    state: SessionState,
    queue_count: u32,
}

impl RendererSession {
    /// Create the renderer instance
    pub fn create(registry: Arc<HandleRegistry>) -> Result<Self, SessionError> {
        let instance = registry.create_instance().map_err(|e| {
            log::error!("{e}");
            match e {
                RegistryError::NullHandle(_) | RegistryError::EmptyShader => SessionError::InstanceCreation,
            }
        })?;
        log::info!("Renderer instance {} created", instance.raw());

        Ok(Self {
            registry,
            instance: Some(instance),
            state: SessionState::Created,
            queue_count: 0,
        })
    }

    /// Current lifecycle state
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The handle registry this session creates through
    pub const fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    /// Reference to the live instance, `None` once destroyed
    pub fn instance(&self) -> Option<NativeRef<Instance>> {
        self.instance.as_ref().map(Owned::native_ref)
    }

    /// Whether the instance has been destroyed
    pub const fn is_null(&self) -> bool {
        self.instance.is_none()
    }

    /// Queue count cached by [`Self::initialize`]; zero before that
    pub const fn queue_count(&self) -> u32 {
        self.queue_count
    }

    fn require(&self, operation: &'static str, expected: SessionState) -> Result<NativeRef<Instance>, SessionError> {
        match self.instance() {
            Some(instance) if self.state == expected => Ok(instance),
            _ => Err(SessionError::InvalidState {
                operation,
                state: self.state,
            }),
        }
    }

    /// Hand shader bytecode and material data to the renderer
    pub fn configure(
        &mut self,
        shaders: &ShaderBundle,
        materials: &MaterialResources,
    ) -> Result<(), SessionError> {
        let instance = self.require("configure", SessionState::Created)?;
        if let Some(stage) = shaders.missing_stage() {
            return Err(SessionError::MissingShader(stage));
        }
        materials.validate()?;

        let renderer = self.registry.renderer();
        configure_shaders(renderer, instance.raw(), shaders);
        renderer.configure_material_resources(instance.raw(), materials);

        log::debug!("Session configured with {} materials", materials.material_count());
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Initialize the renderer and read its queue count.
    ///
    /// The count is read exactly once and cached for the session lifetime.
    pub fn initialize(&mut self) -> Result<u32, SessionError> {
        let instance = self.require("initialize", SessionState::Configured)?;
        let renderer = self.registry.renderer();
        if !renderer.initialize_instance(instance.raw()) {
            log::error!("Renderer instance {} failed to initialize", instance.raw());
            return Err(SessionError::InitializationFailed);
        }

        self.queue_count = renderer.queue_count(instance.raw());
        self.state = SessionState::Initialized;
        log::info!("Renderer initialized with {} submission queues", self.queue_count);
        Ok(self.queue_count)
    }

    /// Reclaim renderer-internal memory; no-op on a null instance
    pub fn run_garbage_collection(&self) {
        if let Some(instance) = self.instance() {
            self.registry.renderer().run_garbage_collection(instance.raw());
        }
    }

    /// Destroy the instance and leave the null sentinel behind.
    ///
    /// Every volume, camera and form pipeline must already be gone. Calling
    /// this again does nothing.
    pub fn destroy(&mut self) {
        if let Some(instance) = self.instance.take() {
            log::info!("Destroying renderer instance {}", instance.raw());
            self.registry.destroy_instance(instance);
        }
        self.state = SessionState::Destroyed;
    }
}

impl fmt::Debug for RendererSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererSession")
            .field("instance", &self.instance)
            .field("state", &self.state)
            .field("queue_count", &self.queue_count)
            .finish_non_exhaustive()
    }
}
