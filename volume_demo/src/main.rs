//! Headless volume demo
//!
//! Drives the engine over the recording renderer: a field of volumes with a
//! couple of forms, one camera orbiting the field, and a steady trickle of
//! entities being destroyed and replaced. Prints a per-frame summary and
//! checks the recorded call stream for handle misuse at the end.
//!
//! Usage: `volume_demo [config.toml|config.ron] [frames]`

use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use voxel_engine::config::ConfigError;
use voxel_engine::foundation::logging;
use voxel_engine::native::CallKind;
use voxel_engine::prelude::*;

const FIELD_HALF_EXTENT: f32 = 256.0;
const INITIAL_VOLUMES: usize = 32;
const DEFAULT_FRAMES: u64 = 120;
const FORM_SHADERS: [&str; 2] = ["sphere_form", "ridge_form"];

#[derive(Error, Debug)]
enum DemoError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid frame count '{0}'")]
    FrameCount(String),

    #[error("renderer reported {0} handle violations")]
    Violations(usize),
}

fn placeholder_shaders() -> ShaderBundle {
    // SPIR-V magic number; the recording renderer never parses the stages
    let stage = 0x0723_0203_u32.to_le_bytes().to_vec();
    ShaderBundle {
        surface_vertex: stage.clone(),
        surface_fragment: stage.clone(),
        surface_analysis: stage.clone(),
        surface_assembly: stage,
    }
}

fn demo_materials() -> MaterialResources {
    let tints = [
        [0.55, 0.45, 0.35, 1.0],
        [0.35, 0.6, 0.3, 1.0],
        [0.5, 0.5, 0.55, 1.0],
        [0.85, 0.8, 0.6, 1.0],
    ];
    let attributes: Vec<MaterialAttributes> = tints
        .iter()
        .map(|tint| MaterialAttributes {
            tint: *tint,
            size: [4.0, 4.0],
            tess_height: 0.25,
            tess_center: 0.5,
        })
        .collect();
    let layers = |count: usize| TextureLayers {
        width: 4,
        height: 4,
        data: vec![0x80; 4 * 4 * 4 * count],
    };

    MaterialResources {
        color_spec: layers(attributes.len()),
        normal_height: layers(attributes.len()),
        attributes,
    }
}

struct VolumeField {
    engine: VolumeEngine,
    forms: Vec<FormId>,
    rng: rand::rngs::ThreadRng,
}

impl VolumeField {
    fn spawn_volume(&mut self) -> Result<EntityId, EngineError> {
        let position = Vec3::new(
            self.rng.gen_range(-FIELD_HALF_EXTENT..FIELD_HALF_EXTENT),
            0.0,
            self.rng.gen_range(-FIELD_HALF_EXTENT..FIELD_HALF_EXTENT),
        );
        let half = self.rng.gen_range(8.0..32.0_f32);
        let transform = Transform::from_position(position).with_rotation_euler(0.0, self.rng.gen_range(0.0..std::f32::consts::TAU), 0.0);

        let mut forms = Vec::new();
        for form in &self.forms {
            if self.rng.gen_bool(0.5) {
                forms.push(self.engine.form_ref(*form, Vec3::new(-half, -half, -half), Vec3::new(half, 0.0, half))?);
            }
        }

        self.engine.create_volume_entity(
            Vec3::new(-half, -half, -half),
            Vec3::new(half, half, half),
            transform,
            forms,
        )
    }

    fn replace_one(&mut self) -> Result<(), EngineError> {
        let live = self.engine.query(ComponentMask::VOLUME);
        let candidates: Vec<EntityId> = live
            .iter()
            .filter(|item| !item.pending_destroy)
            .map(|item| item.id)
            .collect();
        if !candidates.is_empty() {
            let victim = candidates[self.rng.gen_range(0..candidates.len())];
            self.engine.mark_for_destroy(victim);
        }
        self.spawn_volume()?;
        Ok(())
    }
}

fn camera_view(angle: f32) -> CameraView {
    let eye = Point3::new(angle.cos() * 400.0, 120.0, angle.sin() * 400.0);
    let view = Mat4::look_at_rh(&eye, &Point3::origin(), &Vec3::y());
    CameraView {
        view,
        projection: Mat4::new_perspective(16.0 / 9.0, 1.0, 0.1, 2000.0),
        position: eye.coords,
    }
}

fn load_config(path: Option<&String>) -> Result<EngineConfig, DemoError> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    log::info!("Loading configuration from {path}");
    Ok(EngineConfig::load_from_file(path)?)
}

fn run() -> Result<(), DemoError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = load_config(args.first())?;
    let frames = match args.get(1) {
        Some(raw) => raw.parse::<u64>().map_err(|_| DemoError::FrameCount(raw.clone()))?,
        None => DEFAULT_FRAMES,
    };

    let level = config.log_level.parse().unwrap_or(log::LevelFilter::Info);
    logging::init_with_level(level);
    log::info!("Starting volume demo ({frames} frames)");

    let shaders = config.shaders.load().unwrap_or_else(|e| {
        log::warn!("{e}; using placeholder shaders");
        placeholder_shaders()
    });

    let form_shaders: Vec<Vec<u8>> = FORM_SHADERS
        .iter()
        .map(|name| {
            config.shaders.load_form(name).unwrap_or_else(|e| {
                log::warn!("{e}; using placeholder form shader");
                placeholder_shaders().surface_vertex
            })
        })
        .collect();

    let renderer = Arc::new(RecordingRenderer::new().with_queue_count(4));
    let error_threshold = config.traversal.error_threshold;
    let engine = VolumeEngine::startup(renderer.clone(), config, &shaders, &demo_materials())?;

    let mut field = VolumeField {
        engine,
        forms: Vec::new(),
        rng: rand::thread_rng(),
    };
    for shader in &form_shaders {
        let form = field.engine.create_form(shader)?;
        field.forms.push(form);
    }
    for _ in 0..INITIAL_VOLUMES {
        field.spawn_volume()?;
    }
    let camera = field.engine.activate_camera()?;

    for frame in 0..frames {
        let angle = frame as f32 * 0.05;
        let view = camera_view(angle);
        field.engine.set_camera_view(camera, &view)?;
        if frame % 10 == 9 {
            field.replace_one()?;
        }

        if let Some(handle) = field.engine.advance(view.position, error_threshold)? {
            let report = handle.wait();
            if report.frame % 30 == 0 || report.destroyed > 0 {
                log::info!(
                    "frame {:>4}: {} traversed, {} submitted, {} destroyed, gc {}",
                    report.frame,
                    report.traversed,
                    report.submissions,
                    report.destroyed,
                    report.gc_ran
                );
            }
        }
    }

    field.engine.deactivate_camera(camera)?;
    field.engine.shutdown();

    let stats = field.engine.stats();
    log::info!(
        "Volumes created {} destroyed {}; {} native calls recorded, {} traversals",
        stats.volumes.created,
        stats.volumes.destroyed,
        renderer.calls().len(),
        renderer.count_kind(CallKind::TraverseVolume)
    );

    let violations = renderer.violations();
    if violations.is_empty() {
        log::info!("No handle violations");
        Ok(())
    } else {
        for violation in &violations {
            log::error!("{violation}");
        }
        Err(DemoError::Violations(violations.len()))
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("volume_demo: {e}");
        std::process::exit(1);
    }
}
