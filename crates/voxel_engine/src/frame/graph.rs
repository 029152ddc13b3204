//! Task dependency graph
//!
//! A small DAG executor. Tasks are boxed closures tagged with the frame phase
//! they belong to; an edge `a -> b` means `b` starts only after `a` returned.
//! [`TaskGraph::execute`] runs the graph on a rayon pool: every task carries
//! a counter of unfinished dependencies and is spawned into a
//! [`rayon::Scope`] the moment that counter reaches zero.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Index of a task inside its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(usize);

impl TaskId {
    /// Position in insertion order
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Frame phase a task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskPhase {
    /// P0: per-chunk volume traversal
    Traverse,
    /// Barrier after P0
    Join,
    /// P1a: per-camera occlusion query
    Occlusion,
    /// P1b: per-queue submission
    Submit,
    /// P2: render state reset
    Clear,
    /// P3: deferred command flush
    Flush,
    /// Renderer garbage collection
    Maintenance,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Traverse => "P0 traverse",
            Self::Join => "join",
            Self::Occlusion => "P1a occlusion",
            Self::Submit => "P1b submit",
            Self::Clear => "P2 clear",
            Self::Flush => "P3 flush",
            Self::Maintenance => "gc",
        };
        f.write_str(name)
    }
}

/// Graph construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An edge names a task that is not in the graph
    #[error("task {0:?} is not part of this graph")]
    UnknownTask(TaskId),

    /// Edges form a cycle; the listed tasks never become ready
    #[error("dependency cycle through {0} tasks")]
    Cycle(usize),
}

struct TaskNode {
    phase: TaskPhase,
    job: Mutex<Option<Job>>,
    dependents: Vec<usize>,
    dependencies: usize,
    remaining: AtomicUsize,
}

/// Directed acyclic graph of one-shot tasks
#[derive(Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
}

impl TaskGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task and return its id
    pub fn add_task(&mut self, phase: TaskPhase, job: impl FnOnce() + Send + 'static) -> TaskId {
        let id = TaskId(self.nodes.len());
        self.nodes.push(TaskNode {
            phase,
            job: Mutex::new(Some(Box::new(job))),
            dependents: Vec::new(),
            dependencies: 0,
            remaining: AtomicUsize::new(0),
        });
        id
    }

    /// Require `before` to finish before `after` starts
    pub fn add_edge(&mut self, before: TaskId, after: TaskId) -> Result<(), GraphError> {
        for id in [before, after] {
            if id.0 >= self.nodes.len() {
                return Err(GraphError::UnknownTask(id));
            }
        }
        if self.has_edge(before, after) {
            return Ok(());
        }
        self.nodes[before.0].dependents.push(after.0);
        self.nodes[after.0].dependencies += 1;
        Ok(())
    }

    /// Whether `before -> after` was declared
    pub fn has_edge(&self, before: TaskId, after: TaskId) -> bool {
        self.nodes
            .get(before.0)
            .is_some_and(|node| node.dependents.contains(&after.0))
    }

    /// Phase of a task
    pub fn phase(&self, id: TaskId) -> Option<TaskPhase> {
        self.nodes.get(id.0).map(|node| node.phase)
    }

    /// Ids of every task in `phase`
    pub fn tasks_in(&self, phase: TaskPhase) -> Vec<TaskId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.phase == phase)
            .map(|(index, _)| TaskId(index))
            .collect()
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no tasks
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Topological order, or the cycle that prevents one
    pub fn validate(&self) -> Result<Vec<TaskId>, GraphError> {
        let mut pending: Vec<usize> = self.nodes.iter().map(|node| node.dependencies).collect();
        let mut ready: VecDeque<usize> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(index, _)| index)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(index) = ready.pop_front() {
            order.push(TaskId(index));
            for &dependent in &self.nodes[index].dependents {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(GraphError::Cycle(self.nodes.len() - order.len()))
        }
    }

    /// Run every task on `pool`, returning when all have finished.
    ///
    /// A panicking task stops its dependents from being scheduled; the panic
    /// resumes on the caller once the already running tasks are done.
    pub fn execute(self, pool: &rayon::ThreadPool) -> Result<(), GraphError> {
        let order = self.validate()?;
        for node in &self.nodes {
            node.remaining.store(node.dependencies, Ordering::Relaxed);
        }

        let nodes = &self.nodes;
        pool.scope(|scope| {
            for id in order.iter().take_while(|id| nodes[id.0].dependencies == 0) {
                let index = id.0;
                scope.spawn(move |scope| run_node(scope, nodes, index));
            }
        });
        Ok(())
    }

    /// Run every task on the calling thread in topological order
    pub fn execute_serial(self) -> Result<(), GraphError> {
        for id in self.validate()? {
            if let Some(job) = self.nodes[id.0].job.lock().take() {
                job();
            }
        }
        Ok(())
    }
}

fn run_node<'scope>(scope: &rayon::Scope<'scope>, nodes: &'scope [TaskNode], index: usize) {
    let node = &nodes[index];
    let job = node.job.lock().take();
    if let Some(job) = job {
        log::trace!("running {} task #{index}", node.phase);
        job();
    }

    for &dependent in &node.dependents {
        if nodes[dependent].remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            scope.spawn(move |scope| run_node(scope, nodes, dependent));
        }
    }
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for (index, node) in self.nodes.iter().enumerate() {
            list.entry(&format_args!("#{index} {} -> {:?}", node.phase, node.dependents));
        }
        list.finish()
    }
}
