//! Scenario tests driving [`VolumeEngine`] end to end over the recording
//! backend.

mod lifecycle;

use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::foundation::math::{Transform, Vec3};
use crate::native::recording::RecordingRenderer;
use crate::native::resources::{MaterialResources, ShaderBundle};
use crate::scene::entity::EntityId;
use crate::VolumeEngine;

fn shaders() -> ShaderBundle {
    let stage = vec![0x03, 0x02, 0x23, 0x07];
    ShaderBundle {
        surface_vertex: stage.clone(),
        surface_fragment: stage.clone(),
        surface_analysis: stage.clone(),
        surface_assembly: stage,
    }
}

fn start_with(renderer: RecordingRenderer, config: EngineConfig) -> (Arc<RecordingRenderer>, VolumeEngine) {
    crate::foundation::logging::init();
    let renderer = Arc::new(renderer);
    let engine = VolumeEngine::startup(renderer.clone(), config, &shaders(), &MaterialResources::default())
        .expect("engine startup");
    (renderer, engine)
}

fn start(queues: u32) -> (Arc<RecordingRenderer>, VolumeEngine) {
    start_with(
        RecordingRenderer::new().with_queue_count(queues),
        EngineConfig::default().with_workers(4),
    )
}

fn spawn(engine: &mut VolumeEngine, x: f32) -> EntityId {
    engine
        .create_volume_entity(
            Vec3::zeros(),
            Vec3::new(16.0, 16.0, 16.0),
            Transform::from_position(Vec3::new(x, 0.0, 0.0)),
            Vec::new(),
        )
        .expect("volume entity")
}

fn observer() -> Vec3 {
    Vec3::new(0.0, 32.0, 0.0)
}

fn assert_clean(renderer: &RecordingRenderer) {
    let violations = renderer.violations();
    assert!(violations.is_empty(), "handle violations: {violations:#?}");
}
