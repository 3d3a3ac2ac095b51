// THEORY:
// The `worker_pool` module owns the fixed set of frame workers and the
// mutex-guarded idle set they return themselves to. It is deliberately
// passive: the pool hands out idle workers and tears everything down, and
// nothing else.
//
// Key architectural principles:
// 1.  **Fixed Size**: The worker count is set at construction. Sizing trades
//     frame-processing latency against CPU/memory and bus contention with the
//     other peripherals sharing the device, so it is configuration, not
//     something the pool grows on demand.
// 2.  **Starvation Is Not an Error**: When every worker is active the
//     producer polls at a bounded interval until a worker frees up. Only
//     after a caller-chosen retry ceiling does acquisition give up, and the
//     caller abandons the pass rather than failing the pipeline.
// 3.  **Orderly Teardown**: `terminate_all` requests shutdown on every
//     worker, lets in-flight scans finish, joins every task, and drains the
//     idle set. It is idempotent.

use crate::core_modules::frame::Frame;
use crate::core_modules::frame_worker::{FrameWorker, IdleWorker, WorkerState};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default number of workers when the configuration leaves it unset: capped
/// at four, which saturates the target hardware, and never more than the
/// host's cores.
pub fn default_pool_size() -> usize {
    num_cpus::get().clamp(1, 4)
}

/// A fixed-size pool of frame workers with a shared idle set.
pub struct WorkerPool {
    idle: Arc<Mutex<Vec<IdleWorker>>>,
    // Drained by terminate_all; empty thereafter.
    workers: Mutex<Vec<FrameWorker>>,
    size: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    /// Spawns `size` workers, each seeded with its own reusable frame buffer
    /// of the configured dimensions.
    pub fn new(size: usize, frame_width: u32, frame_height: u32, poll_interval: Duration) -> Self {
        let idle = Arc::new(Mutex::new(Vec::with_capacity(size)));
        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let worker = FrameWorker::spawn(id, Arc::clone(&idle));
            idle.lock()
                .unwrap()
                .push(worker.idle_seat(Frame::new(frame_width, frame_height)));
            workers.push(worker);
        }
        tracing::debug!(size, "worker pool ready");
        Self {
            idle,
            workers: Mutex::new(workers),
            size,
            poll_interval,
        }
    }

    /// The fixed worker count set at construction.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }

    /// Pops an idle worker, polling at the bounded interval while the pool is
    /// momentarily exhausted. Returns `None` once `max_attempts` polls have
    /// all come up empty; the caller abandons the pass.
    pub async fn acquire_idle_worker(&self, max_attempts: usize) -> Option<IdleWorker> {
        for attempt in 0..max_attempts {
            if let Some(worker) = self.idle.lock().unwrap().pop() {
                return Some(worker);
            }
            tracing::debug!(attempt, "pool starved; waiting for an idle worker");
            tokio::time::sleep(self.poll_interval).await;
        }
        None
    }

    /// Returns an unused lease to the idle set (the acquire path that never
    /// activated, e.g. after a camera failure). Workers returning from a scan
    /// push themselves back instead.
    pub fn release(&self, worker: IdleWorker) {
        self.idle.lock().unwrap().push(worker);
    }

    /// Observable states of all workers, for diagnostics and tests.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.lock().unwrap().iter().map(FrameWorker::state).collect()
    }

    /// Marks every worker terminated, waits for in-flight scans to finish,
    /// and drains the idle set. Idempotent.
    pub async fn terminate_all(&self) {
        let drained: Vec<FrameWorker> = {
            let mut workers = self.workers.lock().unwrap();
            workers.drain(..).collect()
        };
        for worker in &drained {
            worker.request_shutdown().await;
        }
        futures::future::join_all(drained.into_iter().map(FrameWorker::join)).await;
        self.idle.lock().unwrap().clear();
        tracing::debug!("worker pool terminated");
    }
}
