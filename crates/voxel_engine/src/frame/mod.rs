//! # Frame scheduling
//!
//! Builds and runs the per-frame task graph and hands back a
//! [`FrameTaskHandle`] that the next frame waits behind.

pub mod builder;
pub mod graph;
pub mod handle;

pub use builder::{build_frame, FrameBuild, FramePlan, FrameResources};
pub use graph::{GraphError, TaskGraph, TaskId, TaskPhase};
pub use handle::{FrameReport, FrameTaskHandle};
