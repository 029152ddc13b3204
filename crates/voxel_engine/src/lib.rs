//! # Voxel Engine
//!
//! Per-frame orchestration between a scene of voxel volumes and a renderer
//! that is only reachable through opaque handles.
//!
//! ## Features
//!
//! - **Typed handles**: move-only owners for every native resource
//! - **Scene store**: volume entities with deferred, flush-time destruction
//! - **Frame graph**: traversal, occlusion, submission, clear and flush
//!   phases scheduled as a task DAG on a rayon pool
//! - **Headless backend**: a recording renderer for tests and tooling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voxel_engine::prelude::*;
//!
//! fn main() -> Result<(), EngineError> {
//!     let renderer = Arc::new(RecordingRenderer::new());
//!     let shaders = EngineConfig::default().shaders.load()?;
//!     let mut engine = VolumeEngine::startup(
//!         renderer,
//!         EngineConfig::default(),
//!         &shaders,
//!         &MaterialResources::default(),
//!     )?;
//!
//!     engine.create_volume_entity(
//!         Vec3::zeros(),
//!         Vec3::new(64.0, 64.0, 64.0),
//!         Transform::identity(),
//!         Vec::new(),
//!     )?;
//!     if let Some(frame) = engine.advance(Vec3::new(0.0, 10.0, 0.0), 10.0)? {
//!         frame.wait();
//!     }
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod frame;
pub mod native;
pub mod scene;
pub mod session;

mod engine;

#[cfg(test)]
mod tests;

pub use engine::{CameraId, EngineError, EngineResult, FormId, VolumeEngine};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        core::config::{Config, DestroyPolicy, EngineConfig, FramePacing},
        foundation::math::{Bounds, Mat4, Point3, Transform, Vec3},
        frame::{FrameReport, FrameTaskHandle},
        native::{
            CameraView, MaterialAttributes, MaterialResources, NativeRenderer, RecordingRenderer,
            ShaderBundle, TextureLayers,
        },
        scene::{ComponentMask, EntityId, FormRef},
        CameraId, EngineError, EngineResult, FormId, VolumeEngine,
    };
}
