// THEORY:
// The `frame_worker` module is the concurrent heart of the pipeline. Each
// worker is a spawned task that owns a reusable frame buffer and loops over a
// small state machine: Idle (sitting in the pool), Active (scanning its
// assigned row range into the shared accumulator), back to Idle, with
// Terminated reachable from either.
//
// Key architectural principles:
// 1.  **Actor-Style Activation**: A worker is driven purely by messages on
//     its channel: `Scan` carries a filled frame and a pass assignment,
//     `Shutdown` requests termination. Nothing else touches its state.
// 2.  **Self-Returning Workers**: After every scan the worker pushes itself
//     (with its reclaimed frame buffer) back into the pool's idle set. The
//     producer never tracks which workers are busy.
// 3.  **Failure Containment**: A scan error is logged inside the worker; the
//     frame buffer is still reclaimed, completion is still signalled, and the
//     worker still returns to idle. A single bad frame must not starve the
//     pool.
// 4.  **Cooperative Termination**: `Shutdown` is observed at the next safe
//     point. An in-flight scan always runs to completion; no worker is ever
//     killed mid-row.

use crate::core_modules::accumulator::ColumnAccumulator;
use crate::core_modules::color::Color;
use crate::core_modules::diagnostics;
use crate::core_modules::frame::Frame;
use crate::core_modules::row_scanner::{ScanError, scan_row};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Observable lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Sitting in the pool's idle set, owning no assignment.
    Idle = 0,
    /// Scanning its assigned row range of its own frame.
    Active = 1,
    /// Exited its loop; accepts no further frames.
    Terminated = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Active,
            _ => WorkerState::Terminated,
        }
    }
}

/// The per-pass work order for one worker: which rows of its frame to scan,
/// what to match, and where to accumulate.
pub struct ScanAssignment {
    /// Row sub-band assigned to this worker, within the configured scan band.
    pub rows: Range<u32>,
    /// The beacon color to match against.
    pub target: Color,
    /// Low-pass color filter threshold.
    pub threshold: f64,
    /// Reverse column traversal for a horizontally mirrored mounting.
    pub flip_horizontal: bool,
    /// Reverse row order for an upside-down mounting.
    pub flip_vertical: bool,
    /// Render every scanned row to the debug log, one glyph per pixel.
    pub print_image: bool,
    /// The pass-shared column accumulator.
    pub accumulator: Arc<ColumnAccumulator>,
    /// Signals the producer that this worker's sub-band is done.
    pub completion: mpsc::Sender<usize>,
}

/// A scan order: the worker's own frame, freshly filled by the camera, plus
/// the pass assignment.
pub struct ScanTask {
    pub frame: Frame,
    pub assignment: ScanAssignment,
}

/// Messages a worker accepts on its activation channel.
pub enum WorkerMessage {
    Scan(ScanTask),
    Shutdown,
}

/// A worker's seat in the pool's idle set: its identity, its activation
/// channel, and its reusable frame buffer.
pub struct IdleWorker {
    pub id: usize,
    pub frame: Frame,
    sender: mpsc::Sender<WorkerMessage>,
}

impl IdleWorker {
    /// Activates the worker with a pass assignment, handing over the frame.
    /// Fails (returning the frame for reuse) if the worker has terminated.
    pub fn activate(self, assignment: ScanAssignment) -> Result<(), Frame> {
        let task = ScanTask {
            frame: self.frame,
            assignment,
        };
        // Capacity 1 and the worker is idle, so the only send failure is a
        // closed channel.
        self.sender
            .try_send(WorkerMessage::Scan(task))
            .map_err(|rejected| match rejected.into_inner() {
                WorkerMessage::Scan(task) => task.frame,
                WorkerMessage::Shutdown => unreachable!("activation sends Scan only"),
            })
    }
}

/// Handle to a spawned frame worker, held by the pool.
pub struct FrameWorker {
    id: usize,
    sender: mpsc::Sender<WorkerMessage>,
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl FrameWorker {
    /// Spawns a worker task that serves scans until shutdown, returning its
    /// handle. The worker's initial `IdleWorker` seat (with its frame buffer)
    /// is pushed into `idle` by the pool.
    pub fn spawn(id: usize, idle: Arc<Mutex<Vec<IdleWorker>>>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<WorkerMessage>(1);
        let state = Arc::new(AtomicU8::new(WorkerState::Idle as u8));

        let task_state = Arc::clone(&state);
        let task_sender = sender.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    WorkerMessage::Scan(task) => {
                        task_state.store(WorkerState::Active as u8, Ordering::SeqCst);
                        let ScanTask { frame, assignment } = task;

                        if let Err(error) = run_scan(&frame, &assignment) {
                            tracing::warn!(worker = id, %error, "frame scan failed; dropping contribution");
                        }

                        // Release the frame buffer back into our idle seat so
                        // the camera can refill it, then signal completion.
                        idle.lock().unwrap().push(IdleWorker {
                            id,
                            frame,
                            sender: task_sender.clone(),
                        });
                        task_state.store(WorkerState::Idle as u8, Ordering::SeqCst);
                        let _ = assignment.completion.send(id).await;
                    }
                    WorkerMessage::Shutdown => break,
                }
            }
            task_state.store(WorkerState::Terminated as u8, Ordering::SeqCst);
            tracing::debug!(worker = id, "terminated");
        });

        Self {
            id,
            sender,
            state,
            handle,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Builds this worker's seat in the pool's idle set, seeding it with its
    /// reusable frame buffer.
    pub fn idle_seat(&self, frame: Frame) -> IdleWorker {
        IdleWorker {
            id: self.id,
            frame,
            sender: self.sender.clone(),
        }
    }

    /// Requests termination. The worker finishes any in-flight scan first.
    pub async fn request_shutdown(&self) {
        let _ = self.sender.send(WorkerMessage::Shutdown).await;
    }

    /// Waits for the worker task to exit.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Scans the assigned row sub-band into a local buffer, then merges it into
/// the pass accumulator in one synchronized step.
fn run_scan(frame: &Frame, assignment: &ScanAssignment) -> Result<(), ScanError> {
    let mut contributions = vec![0.0; frame.width() as usize];

    let rows = assignment.rows.clone();
    if assignment.flip_vertical {
        for row in rows.rev() {
            scan_one_row(frame, row, assignment, &mut contributions)?;
        }
    } else {
        for row in rows {
            scan_one_row(frame, row, assignment, &mut contributions)?;
        }
    }

    if !assignment.accumulator.merge(&contributions) {
        return Err(ScanError::WidthMismatch {
            expected: assignment.accumulator.width(),
            actual: contributions.len(),
        });
    }
    Ok(())
}

fn scan_one_row(
    frame: &Frame,
    row: u32,
    assignment: &ScanAssignment,
    contributions: &mut [f64],
) -> Result<(), ScanError> {
    scan_row(
        frame,
        row,
        &assignment.target,
        assignment.threshold,
        assignment.flip_horizontal,
        contributions,
    )?;
    if assignment.print_image {
        tracing::debug!(
            row,
            "{}",
            diagnostics::render_scan_row(frame, row, &assignment.target, assignment.flip_horizontal)
        );
    }
    Ok(())
}
