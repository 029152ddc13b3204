//! Frame completion handle

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Summary of one executed frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Frame index, starting at zero
    pub frame: u64,
    /// Traversal calls issued in P0
    pub traversed: usize,
    /// Destroy commands recorded in P0
    pub destroy_commands: usize,
    /// Entities destroyed by P3
    pub destroyed: usize,
    /// Occlusion queries issued in P1a
    pub occlusion_queries: usize,
    /// Queues submitted in P1b
    pub submissions: usize,
    /// Whether the frame ended with garbage collection
    pub gc_ran: bool,
    /// Whether a task panicked; later phases may not have run
    pub panicked: bool,
}

struct Latch {
    report: Mutex<Option<FrameReport>>,
    done: Condvar,
}

/// Token for a dispatched frame.
///
/// Cloneable; every clone observes the same completion. The next frame, and
/// any call that destroys something a frame may touch, waits on it.
#[derive(Clone)]
pub struct FrameTaskHandle {
    frame: u64,
    latch: Arc<Latch>,
}

impl FrameTaskHandle {
    pub(crate) fn pending(frame: u64) -> Self {
        Self {
            frame,
            latch: Arc::new(Latch {
                report: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    pub(crate) fn complete(&self, report: FrameReport) {
        *self.latch.report.lock() = Some(report);
        self.latch.done.notify_all();
    }

    /// Index of the frame this handle tracks
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Whether every task of the frame has finished
    pub fn is_complete(&self) -> bool {
        self.latch.report.lock().is_some()
    }

    /// The report, if the frame has finished
    pub fn report(&self) -> Option<FrameReport> {
        *self.latch.report.lock()
    }

    /// Block until the frame finishes
    pub fn wait(&self) -> FrameReport {
        let mut report = self.latch.report.lock();
        loop {
            if let Some(done) = *report {
                return done;
            }
            self.latch.done.wait(&mut report);
        }
    }

    /// Block for at most `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<FrameReport> {
        let mut report = self.latch.report.lock();
        if report.is_none() {
            self.latch.done.wait_while_for(&mut report, |r| r.is_none(), timeout);
        }
        *report
    }
}

impl fmt::Debug for FrameTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameTaskHandle")
            .field("frame", &self.frame)
            .field("complete", &self.is_complete())
            .finish()
    }
}
