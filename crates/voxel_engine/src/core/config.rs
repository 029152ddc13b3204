//! # Engine Configuration
//!
//! Typed configuration for every subsystem of the orchestrator. All structs
//! deserialize with `#[serde(default)]`, so a config file only needs the keys
//! it changes.
//!
//! ## Configuration Categories
//!
//! - **Traversal**: error threshold, voxel size and P0 chunking
//! - **Scheduler**: worker count, frame pacing, GC cadence, destroy policy
//! - **Shaders**: SPIR-V file locations for the configure step

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::config::{Config, ConfigError};
use crate::native::resources::ShaderBundle;

const SHADER_DIRS: [&str; 5] = [
    "target/shaders/",
    "shaders/",
    "resources/shaders/",
    "../shaders/",
    "./",
];

fn resolve_shader(file: &str) -> String {
    SHADER_DIRS
        .iter()
        .map(|dir| format!("{dir}{file}"))
        .find(|candidate| Path::new(candidate).exists())
        .unwrap_or_else(|| format!("shaders/{file}"))
}

fn read_stage(stage: &'static str, path: &str) -> Result<Vec<u8>, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Shader {
        stage,
        path: path.to_string(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(ConfigError::EmptyShader {
            stage,
            path: path.to_string(),
        });
    }
    Ok(bytes)
}

/// # Shader Configuration
///
/// SPIR-V locations for the four surface stages plus the directory form
/// generator shaders are loaded from by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Surface vertex stage
    pub vertex_shader_path: String,
    /// Surface fragment stage
    pub fragment_shader_path: String,
    /// Surface analysis compute stage
    pub surface_analysis_path: String,
    /// Surface assembly compute stage
    pub surface_assembly_path: String,
    /// Directory holding `<name>.spv` form generators
    pub forms_dir: String,
}

impl ShaderConfig {
    /// Create shader config with automatic path resolution
    ///
    /// Each file is looked up in a few common shader directories so the
    /// binary can be run from the workspace root or from its own crate.
    pub fn with_path_resolution(vertex: &str, fragment: &str, analysis: &str, assembly: &str) -> Self {
        Self {
            vertex_shader_path: resolve_shader(vertex),
            fragment_shader_path: resolve_shader(fragment),
            surface_analysis_path: resolve_shader(analysis),
            surface_assembly_path: resolve_shader(assembly),
            forms_dir: "shaders/forms".to_string(),
        }
    }

    /// Read all four stages
    pub fn load(&self) -> Result<ShaderBundle, ConfigError> {
        Ok(ShaderBundle {
            surface_vertex: read_stage("surface vertex", &self.vertex_shader_path)?,
            surface_fragment: read_stage("surface fragment", &self.fragment_shader_path)?,
            surface_analysis: read_stage("surface analysis", &self.surface_analysis_path)?,
            surface_assembly: read_stage("surface assembly", &self.surface_assembly_path)?,
        })
    }

    /// Read the form generator called `name`
    pub fn load_form(&self, name: &str) -> Result<Vec<u8>, ConfigError> {
        let path = Path::new(&self.forms_dir).join(format!("{name}.spv"));
        read_stage("form", &path.to_string_lossy())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution(
            "surface.vert.spv",
            "surface.frag.spv",
            "surface_analysis.comp.spv",
            "surface_assembly.comp.spv",
        )
    }
}

/// Level-of-detail parameters handed to every traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    /// Screen-space error above which a chunk is subdivided
    pub error_threshold: f32,
    /// Edge length of a leaf chunk
    pub voxel_size: f32,
    /// Entities per P0 task
    pub chunk_size: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            error_threshold: 10.0,
            voxel_size: 32.0,
            chunk_size: 8,
        }
    }
}

/// How `advance` treats a frame that is still in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePacing {
    /// Block until the previous frame completes
    #[default]
    Wait,
    /// Skip the new frame and return immediately
    SkipWhileBusy,
}

/// What P0 does with an entity flagged for destruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyPolicy {
    /// Emit the destroy command and do not traverse
    #[default]
    SkipTraversal,
    /// Traverse once more, then emit the destroy command
    TraverseThenDestroy,
}

/// Thread pool and frame scheduling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pool size; `None` picks available parallelism minus one
    pub worker_threads: Option<usize>,
    /// Run garbage collection every N frames; 0 disables it
    pub gc_interval: u32,
    /// Behaviour when the previous frame is still running
    pub pacing: FramePacing,
    /// Handling of entities flagged for destruction
    pub destroy_policy: DestroyPolicy,
}

impl SchedulerConfig {
    /// Effective pool size, never below one
    pub fn resolved_workers(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism().map_or(1, |n| n.get().saturating_sub(1))
            })
            .max(1)
    }

    /// Whether frame `index` ends with a garbage collection
    pub const fn gc_due(&self, index: u64) -> bool {
        self.gc_interval != 0 && (index + 1) % self.gc_interval as u64 == 0
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            gc_interval: 1,
            pacing: FramePacing::default(),
            destroy_policy: DestroyPolicy::default(),
        }
    }
}

/// # Engine Configuration
///
/// Top-level configuration consumed by [`crate::VolumeEngine::startup`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default log filter used by the demo binary
    pub log_level: String,
    /// Traversal parameters
    pub traversal: TraversalConfig,
    /// Scheduling parameters
    pub scheduler: SchedulerConfig,
    /// Shader locations
    pub shaders: ShaderConfig,
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            traversal: TraversalConfig::default(),
            scheduler: SchedulerConfig::default(),
            shaders: ShaderConfig::default(),
        }
    }

    /// Set a fixed worker count
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.scheduler.worker_threads = Some(workers);
        self
    }

    /// Set the frame pacing mode
    #[must_use]
    pub const fn with_pacing(mut self, pacing: FramePacing) -> Self {
        self.scheduler.pacing = pacing;
        self
    }

    /// Set the destroy policy
    #[must_use]
    pub const fn with_destroy_policy(mut self, policy: DestroyPolicy) -> Self {
        self.scheduler.destroy_policy = policy;
        self
    }

    /// Set the garbage collection interval
    #[must_use]
    pub const fn with_gc_interval(mut self, interval: u32) -> Self {
        self.scheduler.gc_interval = interval;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let traversal = &self.traversal;
        if !(traversal.error_threshold.is_finite() && traversal.error_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "error threshold must be positive, got {}",
                traversal.error_threshold
            )));
        }
        if !(traversal.voxel_size.is_finite() && traversal.voxel_size > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "voxel size must be positive, got {}",
                traversal.voxel_size
            )));
        }
        if traversal.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk size must be at least 1".to_string()));
        }
        if self.scheduler.worker_threads == Some(0) {
            return Err(ConfigError::Invalid("worker threads must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Config for EngineConfig {}
