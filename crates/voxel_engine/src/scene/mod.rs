//! # Scene
//!
//! Volume entities, the store that owns them, and the deferred command
//! buffer through which parallel readers request structural changes.

pub mod commands;
pub mod entity;
pub mod store;

pub use commands::{CommandRecorder, DeferredCommand, DeferredCommandBuffer};
pub use entity::{ComponentMask, EntityId, FormRef, VolumeEntity};
pub use store::{EntityQuery, QueryItem, SceneStore, StoreError};
