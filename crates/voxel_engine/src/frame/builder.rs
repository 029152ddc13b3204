//! Per-frame graph construction
//!
//! ```text
//! P0 traverse (per chunk) --> join --> P1a occlusion (per camera) --> P2 clear --> gc
//!                                 |--> P1b submit (per queue) ------> P2 clear
//!                                 '--> P3 flush ----------------------------------> gc
//! ```
//!
//! P0 reads a store snapshot taken here, on the calling thread, so no task
//! holds the store lock while traversing. P3 is the only task that takes the
//! write lock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::config::DestroyPolicy;
use crate::foundation::math::Vec3;
use crate::frame::graph::{GraphError, TaskGraph, TaskPhase};
use crate::frame::handle::FrameReport;
use crate::native::handle::{Camera, Instance, NativeRef};
use crate::native::registry::HandleRegistry;
use crate::native::resources::TraversalParams;
use crate::scene::commands::DeferredCommandBuffer;
use crate::scene::entity::ComponentMask;
use crate::scene::store::SceneStore;

/// Per-frame parameters
#[derive(Debug, Clone, PartialEq)]
pub struct FramePlan {
    /// Frame index
    pub frame: u64,
    /// Observer position for every traversal
    pub observer: Vec3,
    /// Level-of-detail error threshold
    pub error_threshold: f32,
    /// Leaf chunk edge length
    pub voxel_size: f32,
    /// Entities per P0 task
    pub chunk_size: usize,
    /// What to do with entities flagged for destruction
    pub destroy_policy: DestroyPolicy,
    /// Append a garbage collection task
    pub run_gc: bool,
}

/// Shared state the frame's tasks operate on
#[derive(Clone)]
pub struct FrameResources {
    /// Native handle factory and renderer
    pub registry: Arc<HandleRegistry>,
    /// Live renderer instance
    pub instance: NativeRef<Instance>,
    /// Entity store
    pub store: Arc<RwLock<SceneStore>>,
    /// Active cameras
    pub cameras: Vec<NativeRef<Camera>>,
    /// Submission queue count cached at initialization
    pub queue_count: u32,
}

#[derive(Default)]
struct FrameCounters {
    traversed: AtomicUsize,
    destroy_commands: AtomicUsize,
    destroyed: AtomicUsize,
    occlusion_queries: AtomicUsize,
    submissions: AtomicUsize,
    gc_ran: AtomicBool,
}

/// A built frame ready to run
pub struct FrameBuild {
    frame: u64,
    graph: TaskGraph,
    counters: Arc<FrameCounters>,
}

impl FrameBuild {
    /// Index of the frame
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// The task graph
    pub const fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Execute on `pool` and summarize
    pub fn run(self, pool: &rayon::ThreadPool) -> FrameReport {
        let Self { frame, graph, counters } = self;
        let outcome = catch_unwind(AssertUnwindSafe(|| graph.execute(pool)));
        Self::report(frame, &counters, outcome)
    }

    /// Execute on the calling thread and summarize
    pub fn run_serial(self) -> FrameReport {
        let Self { frame, graph, counters } = self;
        let outcome = catch_unwind(AssertUnwindSafe(|| graph.execute_serial()));
        Self::report(frame, &counters, outcome)
    }

    fn report(
        frame: u64,
        counters: &FrameCounters,
        outcome: std::thread::Result<Result<(), GraphError>>,
    ) -> FrameReport {
        let panicked = match outcome {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                log::error!("Frame {frame} not executed: {e}");
                true
            }
            Err(_) => {
                log::error!("Frame {frame}: a task panicked; dependent phases were skipped");
                true
            }
        };

        let report = FrameReport {
            frame,
            traversed: counters.traversed.load(Ordering::Acquire),
            destroy_commands: counters.destroy_commands.load(Ordering::Acquire),
            destroyed: counters.destroyed.load(Ordering::Acquire),
            occlusion_queries: counters.occlusion_queries.load(Ordering::Acquire),
            submissions: counters.submissions.load(Ordering::Acquire),
            gc_ran: counters.gc_ran.load(Ordering::Acquire),
            panicked,
        };
        log::debug!("{report:?}");
        report
    }
}

/// Build the task graph for one frame.
///
/// Snapshots the store immediately; entities created afterwards are picked
/// up by the next frame.
pub fn build_frame(plan: &FramePlan, resources: &FrameResources) -> Result<FrameBuild, GraphError> {
    let counters = Arc::new(FrameCounters::default());
    let snapshot = resources.store.read().query(ComponentMask::VOLUME);
    let buffer = DeferredCommandBuffer::new();
    let instance = resources.instance;
    let mut graph = TaskGraph::new();

    // P0
    let chunk_size = plan.chunk_size.max(1);
    let mut chunks = Vec::new();
    for start in (0..snapshot.len()).step_by(chunk_size) {
        let snapshot = snapshot.clone();
        let registry = resources.registry.clone();
        let recorder = buffer.recorder();
        let counters = counters.clone();
        let (observer, error_threshold, voxel_size) = (plan.observer, plan.error_threshold, plan.voxel_size);
        let traverse_pending = plan.destroy_policy == DestroyPolicy::TraverseThenDestroy;

        chunks.push(graph.add_task(TaskPhase::Traverse, move || {
            let params = TraversalParams {
                observer,
                error_threshold,
                voxel_size,
                worker: rayon::current_thread_index().unwrap_or(0),
            };
            let renderer = registry.renderer();
            for item in snapshot.slice(start, start + chunk_size) {
                if !item.pending_destroy || traverse_pending {
                    renderer.traverse_volume(instance.raw(), item.volume.raw(), &params, &item.forms);
                    counters.traversed.fetch_add(1, Ordering::Relaxed);
                }
                if item.pending_destroy {
                    recorder.destroy_entity(item.id);
                    counters.destroy_commands.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    let join = graph.add_task(TaskPhase::Join, || {});
    for chunk in chunks {
        graph.add_edge(chunk, join)?;
    }

    // P2
    let clear = {
        let registry = resources.registry.clone();
        graph.add_task(TaskPhase::Clear, move || registry.renderer().clear_render(instance.raw()))
    };
    graph.add_edge(join, clear)?;

    // P1a
    for &camera in &resources.cameras {
        let registry = resources.registry.clone();
        let counters = counters.clone();
        let task = graph.add_task(TaskPhase::Occlusion, move || {
            registry.renderer().query_occlusion(instance.raw(), camera.raw());
            counters.occlusion_queries.fetch_add(1, Ordering::Relaxed);
        });
        graph.add_edge(join, task)?;
        graph.add_edge(task, clear)?;
    }

    // P1b
    for queue in 0..resources.queue_count {
        let registry = resources.registry.clone();
        let counters = counters.clone();
        let task = graph.add_task(TaskPhase::Submit, move || {
            registry.renderer().submit_queue(instance.raw(), queue);
            counters.submissions.fetch_add(1, Ordering::Relaxed);
        });
        graph.add_edge(join, task)?;
        graph.add_edge(task, clear)?;
    }

    // P3
    let flush = {
        let registry = resources.registry.clone();
        let store = resources.store.clone();
        let counters = counters.clone();
        graph.add_task(TaskPhase::Flush, move || {
            let commands = buffer.drain();
            if commands.is_empty() {
                return;
            }
            let destroyed = store.write().apply_deferred(&registry, instance, commands);
            counters.destroyed.fetch_add(destroyed, Ordering::Relaxed);
            log::debug!("Flushed {destroyed} entity destructions");
        })
    };
    graph.add_edge(join, flush)?;

    if plan.run_gc {
        let registry = resources.registry.clone();
        let counters = counters.clone();
        let gc = graph.add_task(TaskPhase::Maintenance, move || {
            registry.renderer().run_garbage_collection(instance.raw());
            counters.gc_ran.store(true, Ordering::Relaxed);
        });
        graph.add_edge(clear, gc)?;
        graph.add_edge(flush, gc)?;
    }

    graph.validate()?;
    log::trace!("Frame {} graph: {graph:?}", plan.frame);

    Ok(FrameBuild {
        frame: plan.frame,
        graph,
        counters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Transform;
    use crate::native::backend::NativeRenderer;
    use crate::native::handle::Owned;
    use crate::native::recording::{CallKind, NativeCall, RecordingRenderer};
    use crate::scene::entity::EntityId;

    struct Rig {
        renderer: Arc<RecordingRenderer>,
        registry: Arc<HandleRegistry>,
        instance: Option<Owned<Instance>>,
        store: Arc<RwLock<SceneStore>>,
    }

    impl Rig {
        fn new(queues: u32) -> Self {
            let renderer = Arc::new(RecordingRenderer::new().with_queue_count(queues));
            let registry = Arc::new(HandleRegistry::new(renderer.clone()));
            let instance = Some(registry.create_instance().unwrap());
            Self {
                renderer,
                registry,
                instance,
                store: Arc::new(RwLock::new(SceneStore::new())),
            }
        }

        fn spawn(&self) -> EntityId {
            self.store
                .write()
                .create(&self.registry, Vec3::zeros(), Vec3::new(8.0, 8.0, 8.0), Transform::identity(), Vec::new())
                .unwrap()
        }

        fn resources(&self, cameras: Vec<NativeRef<Camera>>) -> FrameResources {
            FrameResources {
                registry: self.registry.clone(),
                instance: self.instance.as_ref().unwrap().native_ref(),
                store: self.store.clone(),
                cameras,
                queue_count: self.renderer.queue_count(self.instance.as_ref().unwrap().raw()),
            }
        }

        fn teardown(mut self) {
            let instance = self.instance.take().unwrap();
            self.store.write().drain_all(&self.registry, instance.native_ref());
            self.registry.destroy_instance(instance);
            assert!(self.renderer.violations().is_empty(), "{:?}", self.renderer.violations());
        }
    }

    fn plan(frame: u64) -> FramePlan {
        FramePlan {
            frame,
            observer: Vec3::new(1.0, 2.0, 3.0),
            error_threshold: 10.0,
            voxel_size: 32.0,
            chunk_size: 2,
            destroy_policy: DestroyPolicy::SkipTraversal,
            run_gc: true,
        }
    }

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap()
    }

    #[test]
    fn test_graph_shape() {
        let rig = Rig::new(4);
        for _ in 0..5 {
            rig.spawn();
        }
        let build = build_frame(&plan(0), &rig.resources(Vec::new())).unwrap();
        let graph = build.graph();

        assert_eq!(graph.tasks_in(TaskPhase::Traverse).len(), 3);
        assert_eq!(graph.tasks_in(TaskPhase::Submit).len(), 4);
        assert_eq!(graph.tasks_in(TaskPhase::Occlusion).len(), 0);

        let join = graph.tasks_in(TaskPhase::Join)[0];
        let clear = graph.tasks_in(TaskPhase::Clear)[0];
        let flush = graph.tasks_in(TaskPhase::Flush)[0];
        let gc = graph.tasks_in(TaskPhase::Maintenance)[0];
        assert!(graph.has_edge(join, flush));
        assert!(!graph.has_edge(clear, flush));
        assert!(graph.has_edge(clear, gc) && graph.has_edge(flush, gc));
        for submit in graph.tasks_in(TaskPhase::Submit) {
            assert!(graph.has_edge(join, submit) && graph.has_edge(submit, clear));
        }

        build.run(&pool());
        rig.teardown();
    }

    #[test]
    fn test_phases_run_in_order() {
        let rig = Rig::new(4);
        rig.spawn();
        rig.spawn();
        let report = build_frame(&plan(0), &rig.resources(Vec::new())).unwrap().run(&pool());

        assert_eq!(report.traversed, 2);
        assert_eq!(report.submissions, 4);
        assert!(report.gc_ran && !report.panicked);

        let last_traverse = *rig.renderer.sequences(CallKind::TraverseVolume).iter().max().unwrap();
        let submits = rig.renderer.sequences(CallKind::SubmitQueue);
        let clear = rig.renderer.sequences(CallKind::ClearRender)[0];
        let gc = rig.renderer.sequences(CallKind::RunGarbageCollection)[0];
        assert!(submits.iter().all(|s| *s > last_traverse && *s < clear));
        assert!(gc > clear);
        rig.teardown();
    }

    #[test]
    fn test_pending_entities_are_destroyed_not_traversed() {
        let rig = Rig::new(1);
        let doomed = rig.spawn();
        let kept = rig.spawn();
        rig.store.write().mark_for_destroy(doomed);

        let report = build_frame(&plan(0), &rig.resources(Vec::new())).unwrap().run(&pool());
        assert_eq!(report.traversed, 1);
        assert_eq!(report.destroy_commands, 1);
        assert_eq!(report.destroyed, 1);
        assert!(!rig.store.read().contains(doomed));
        assert!(rig.store.read().contains(kept));
        rig.teardown();
    }

    #[test]
    fn test_traverse_then_destroy_policy() {
        let rig = Rig::new(1);
        let doomed = rig.spawn();
        rig.store.write().mark_for_destroy(doomed);

        let mut plan = plan(0);
        plan.destroy_policy = DestroyPolicy::TraverseThenDestroy;
        let report = build_frame(&plan, &rig.resources(Vec::new())).unwrap().run_serial();

        assert_eq!(report.traversed, 1);
        assert_eq!(report.destroyed, 1);
        let traverse = rig.renderer.sequences(CallKind::TraverseVolume)[0];
        let destroy = rig.renderer.sequences(CallKind::DestroyVolume)[0];
        assert!(traverse < destroy);
        rig.teardown();
    }

    #[test]
    fn test_traversal_receives_parameters() {
        let rig = Rig::new(0);
        rig.spawn();
        build_frame(&plan(0), &rig.resources(Vec::new())).unwrap().run(&pool());

        let calls = rig.renderer.calls();
        let params = calls
            .iter()
            .find_map(|r| match &r.call {
                NativeCall::TraverseVolume { params, .. } => Some(*params),
                _ => None,
            })
            .unwrap();
        assert_eq!(params.observer, Vec3::new(1.0, 2.0, 3.0));
        assert!(params.worker < 3);
        rig.teardown();
    }

    #[test]
    fn test_no_gc_task_when_not_due() {
        let rig = Rig::new(2);
        let mut plan = plan(0);
        plan.run_gc = false;
        let build = build_frame(&plan, &rig.resources(Vec::new())).unwrap();
        assert!(build.graph().tasks_in(TaskPhase::Maintenance).is_empty());
        let report = build.run(&pool());
        assert!(!report.gc_ran);
        assert_eq!(rig.renderer.count_kind(CallKind::ClearRender), 1);
        rig.teardown();
    }
}
