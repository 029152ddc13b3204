//! Entity, camera, form and session lifecycles

use std::sync::Arc;
use std::time::Duration;

use super::{assert_clean, observer, shaders, spawn, start, start_with};
use crate::core::config::EngineConfig;
use crate::foundation::math::{Mat4, Transform, Vec3};
use crate::native::recording::{CallKind, NativeCall, RecordingRenderer};
use crate::native::resources::{CameraView, MaterialResources};
use crate::scene::entity::ComponentMask;
use crate::session::SessionError;
use crate::{EngineError, VolumeEngine};

#[test]
fn test_marked_entity_skipped_and_removed() {
    let (renderer, mut engine) = start(2);
    let a = spawn(&mut engine, 0.0);
    let b = spawn(&mut engine, 16.0);

    engine.advance(observer(), 10.0).unwrap().unwrap().wait();
    let a_volume = engine.query(ComponentMask::VOLUME).iter().find(|i| i.id == a).unwrap().volume;

    assert!(engine.mark_for_destroy(a));
    let report = engine.advance(observer(), 10.0).unwrap().unwrap().wait();

    assert_eq!(report.traversed, 1);
    assert_eq!(report.destroyed, 1);
    let traversals_of_a = renderer.count(|c| {
        matches!(c, NativeCall::TraverseVolume { volume, .. } if *volume == a_volume.raw())
    });
    assert_eq!(traversals_of_a, 1, "only the frame before the mark traverses A");

    let remaining: Vec<_> = engine.query(ComponentMask::VOLUME).ids().collect();
    assert_eq!(remaining, vec![b]);
    assert!(!engine.mark_for_destroy(a));

    engine.shutdown();
    assert_clean(&renderer);
}

#[test]
fn test_mark_during_running_frame_applies_next_frame() {
    let renderer = RecordingRenderer::new()
        .with_queue_count(1)
        .with_latency(CallKind::TraverseVolume, Duration::from_millis(30));
    let (renderer, mut engine) = start_with(renderer, EngineConfig::default().with_workers(2));
    let a = spawn(&mut engine, 0.0);

    let running = engine.advance(observer(), 10.0).unwrap().unwrap();
    engine.mark_for_destroy(a);
    let first = running.wait();
    assert_eq!(first.traversed, 1);
    assert_eq!(first.destroyed, 0);
    assert_eq!(engine.entity_count(), 1);

    let second = engine.advance(observer(), 10.0).unwrap().unwrap().wait();
    assert_eq!(second.traversed, 0);
    assert_eq!(second.destroyed, 1);
    assert_eq!(engine.entity_count(), 0);

    engine.shutdown();
    assert_clean(&renderer);
}

#[test]
fn test_create_during_running_frame_waits_for_frame() {
    let renderer = RecordingRenderer::new()
        .with_queue_count(1)
        .with_latency(CallKind::TraverseVolume, Duration::from_millis(50));
    let (renderer, mut engine) = start_with(renderer, EngineConfig::default().with_workers(2));
    spawn(&mut engine, 0.0);

    let running = engine.advance(observer(), 10.0).unwrap().unwrap();
    spawn(&mut engine, 16.0);
    assert!(running.is_complete());

    let created = renderer.sequences(CallKind::CreateVolume)[1];
    let traverse = renderer.sequences(CallKind::TraverseVolume)[0];
    let clear = renderer.sequences(CallKind::ClearRender)[0];
    assert!(created > traverse);
    assert!(created > clear, "volume created at {created} before frame 0 cleared at {clear}");
    assert_eq!(running.wait().traversed, 1);

    let next = engine.advance(observer(), 10.0).unwrap().unwrap().wait();
    assert_eq!(next.traversed, 2);

    engine.shutdown();
    assert_clean(&renderer);
}

#[test]
fn test_null_instance_advance_makes_no_calls() {
    let (renderer, mut engine) = start(4);
    spawn(&mut engine, 0.0);
    engine.shutdown();
    assert!(engine.is_shut_down());

    renderer.clear_calls();
    assert!(engine.advance(observer(), 10.0).unwrap().is_none());
    assert!(engine.advance(observer(), 10.0).unwrap().is_none());
    assert!(renderer.calls().is_empty());
    assert!(matches!(engine.activate_camera(), Err(EngineError::ShutDown)));
    assert_clean(&renderer);
}

#[test]
fn test_camera_lifecycle_waits_for_frame() {
    let renderer = RecordingRenderer::new()
        .with_queue_count(1)
        .with_latency(CallKind::QueryOcclusion, Duration::from_millis(30));
    let (renderer, mut engine) = start_with(renderer, EngineConfig::default().with_workers(2));
    spawn(&mut engine, 0.0);

    let camera = engine.activate_camera().unwrap();
    let view = CameraView {
        view: Mat4::identity(),
        projection: Mat4::new_perspective(16.0 / 9.0, 1.0, 0.1, 1000.0),
        position: Vec3::new(0.0, 2.0, 10.0),
    };
    engine.set_camera_view(camera, &view).unwrap();

    engine.advance(observer(), 10.0).unwrap();
    engine.deactivate_camera(camera).unwrap();

    let query = renderer.sequences(CallKind::QueryOcclusion)[0];
    let destroy = renderer.sequences(CallKind::DestroyCamera)[0];
    assert!(query < destroy);
    assert!(matches!(engine.deactivate_camera(camera), Err(EngineError::UnknownCamera(_))));
    assert!(matches!(engine.set_camera_view(camera, &view), Err(EngineError::UnknownCamera(_))));

    let report = engine.advance(observer(), 10.0).unwrap().unwrap().wait();
    assert_eq!(report.occlusion_queries, 0);

    engine.shutdown();
    assert_clean(&renderer);
}

#[test]
fn test_form_release_blocked_while_referenced() {
    let (renderer, mut engine) = start(1);
    let form = engine.create_form(&[0x03, 0x02, 0x23, 0x07]).unwrap();
    let form_ref = engine
        .form_ref(form, Vec3::zeros(), Vec3::new(4.0, 4.0, 4.0))
        .unwrap();
    let id = engine
        .create_volume_entity(Vec3::zeros(), Vec3::new(8.0, 8.0, 8.0), Transform::identity(), vec![form_ref])
        .unwrap();
    assert_eq!(engine.query(ComponentMask::FORMS).len(), 1);

    engine.advance(observer(), 10.0).unwrap().unwrap().wait();
    let forms_seen = renderer.count(|c| matches!(c, NativeCall::TraverseVolume { forms, .. } if forms.len() == 1));
    assert_eq!(forms_seen, 1);

    assert!(matches!(
        engine.release_form(form),
        Err(EngineError::FormInUse { entities: 1, .. })
    ));

    engine.mark_for_destroy(id);
    engine.advance(observer(), 10.0).unwrap().unwrap().wait();
    engine.release_form(form).unwrap();
    assert_eq!(renderer.count_kind(CallKind::ReleaseHandle), 1);
    assert!(matches!(engine.release_form(form), Err(EngineError::UnknownForm(_))));

    engine.shutdown();
    assert_clean(&renderer);
}

#[test]
fn test_shutdown_order_and_idempotence() {
    let (renderer, mut engine) = start(2);
    spawn(&mut engine, 0.0);
    spawn(&mut engine, 16.0);
    engine.activate_camera().unwrap();
    engine.create_form(&[1, 2, 3, 4]).unwrap();
    engine.advance(observer(), 10.0).unwrap();

    engine.shutdown();
    engine.shutdown();

    let calls = renderer.calls();
    assert_eq!(calls.last().map(|r| r.call.kind()), Some(CallKind::DestroyInstance));
    assert_eq!(renderer.count_kind(CallKind::DestroyInstance), 1);
    assert_eq!(renderer.count_kind(CallKind::DestroyVolume), 2);
    assert_eq!(renderer.count_kind(CallKind::DestroyCamera), 1);
    assert_eq!(renderer.live_handles(), 0);

    let stats = engine.stats();
    assert_eq!(stats.volumes.live(), 0);
    assert_eq!(stats.cameras.live(), 0);
    assert_eq!(stats.form_pipelines.live(), 0);
    assert_eq!(stats.instances.live(), 0);
    assert_clean(&renderer);
}

#[test]
fn test_drop_shuts_down() {
    let (renderer, mut engine) = start(1);
    spawn(&mut engine, 0.0);
    engine.advance(observer(), 10.0).unwrap();
    drop(engine);

    assert_eq!(renderer.count_kind(CallKind::DestroyInstance), 1);
    assert_eq!(renderer.live_handles(), 0);
    assert_clean(&renderer);
}

#[test]
fn test_failed_initialization_releases_instance() {
    let renderer = Arc::new(RecordingRenderer::new().fail_initialization());
    let result = VolumeEngine::startup(
        renderer.clone(),
        EngineConfig::default().with_workers(1),
        &shaders(),
        &MaterialResources::default(),
    );

    assert!(matches!(
        result,
        Err(EngineError::Session(SessionError::InitializationFailed))
    ));
    assert_eq!(renderer.count_kind(CallKind::DestroyInstance), 1);
    assert_eq!(renderer.live_handles(), 0);
    assert_clean(&renderer);
}

#[test]
fn test_invalid_config_rejected_before_any_call() {
    let renderer = Arc::new(RecordingRenderer::new());
    let mut config = EngineConfig::default();
    config.traversal.error_threshold = 0.0;

    let result = VolumeEngine::startup(renderer.clone(), config, &shaders(), &MaterialResources::default());
    assert!(matches!(result, Err(EngineError::Config(_))));
    assert!(renderer.calls().is_empty());
}
