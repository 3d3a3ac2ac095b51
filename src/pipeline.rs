// THEORY:
// The `pipeline` module is the final, top-level API for the beacon locator.
// It encapsulates the full stack (worker pool, row scanning, column
// accumulation, peak resolution) behind a small lifecycle surface that a
// navigation controller drives: `enable`, `disable`, `close`, `capture`.
//
// Key architectural principles:
// 1.  **Opaque Collaborators**: The camera and the motor indicator are trait
//     objects supplied at construction. This core never owns a device driver;
//     it fills reusable buffers via `FrameSource` and brackets every pass
//     with `IndicatorControl` so the robot's own status LED cannot appear
//     in-frame.
// 2.  **Pass-Oriented Capture Loop**: Each loop iteration is one localization
//     pass. The configured row band is split into per-worker sub-bands; each
//     sub-band is scanned by one worker against its own freshly captured
//     frame, all merging into one pass-scoped accumulator. The resolver runs
//     only after every dispatched worker has signalled completion; resolving
//     a partially updated accumulator would be meaningless.
// 3.  **Fail Fast, Then Degrade**: Configuration errors are fatal at
//     construction, before any task starts. A camera open failure is reported
//     by `enable` and leaves everything disabled. Steady-state faults (bad
//     frame, starved pool, pass timeout) are contained: the pass is abandoned
//     and the previous result stays current. `capture` only ever fails on the
//     "not enabled" precondition.

use crate::core_modules::accumulator::ColumnAccumulator;
use crate::core_modules::color::Color;
use crate::core_modules::diagnostics;
use crate::core_modules::frame::Frame;
use crate::core_modules::frame_worker::ScanAssignment;
use crate::core_modules::peak_resolver::{PeakResolver, PeakResult, QuantizedProfile};
use crate::core_modules::worker_pool::{WorkerPool, default_pool_size};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Failures surfaced to the caller. Steady-state per-frame faults never
/// appear here; they degrade to "beacon not found" inside the loop.
#[derive(Debug)]
pub enum LocatorError {
    /// Invalid construction-time configuration; nothing was started.
    InvalidConfig(&'static str),
    /// `capture` was called before `enable`.
    NotEnabled,
    /// `enable` was called after `close`.
    Closed,
    /// The frame source could not be opened or read.
    Camera(String),
}

impl std::fmt::Display for LocatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocatorError::InvalidConfig(reason) => write!(f, "invalid configuration: {reason}"),
            LocatorError::NotEnabled => write!(f, "beacon locator is not enabled"),
            LocatorError::Closed => write!(f, "beacon locator has been closed"),
            LocatorError::Camera(reason) => write!(f, "camera failure: {reason}"),
        }
    }
}

impl std::error::Error for LocatorError {}

/// The camera collaborator: an opaque service that refills reusable frame
/// buffers in place.
pub trait FrameSource: Send {
    /// Claims the capture device. Called by `enable`.
    fn open(&mut self) -> Result<(), LocatorError>;
    /// Blocks until the next exposure and writes it into `frame`.
    fn next_frame(&mut self, frame: &mut Frame) -> Result<(), LocatorError>;
    /// Releases the capture device. Called by `close`.
    fn close(&mut self);
}

/// The optional motor/indicator collaborator. Its status LED is suppressed
/// for the duration of a capture pass so it cannot reflect into the frame,
/// and restored afterward regardless of the pass outcome.
pub trait IndicatorControl: Send {
    fn suppress_indicator(&mut self);
    fn restore_indicator(&mut self);
}

/// Construction-time configuration, supplied by the application's
/// configuration collaborator.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    pub image_width: u32,
    pub image_height: u32,
    /// The beacon color to match against.
    pub target_color: Color,
    /// Low-pass color filter threshold; pixels farther than this from the
    /// target contribute nothing.
    pub match_threshold: f64,
    /// Top row of the scan band.
    pub start_row: u32,
    /// Bottom row of the scan band, inclusive; `-1` means the last image row.
    pub end_row: i32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// Fixed worker count.
    pub pool_size: usize,
    /// Bounded wait between acquisition retries when the pool is starved.
    pub poll_interval: Duration,
    /// Acquisition retries before a pass is abandoned.
    pub acquire_retry_ceiling: usize,
    /// Ceiling on waiting for dispatched workers before a pass is abandoned.
    pub pass_timeout: Duration,
    /// Pacing between passes (the effective localization rate).
    pub pass_interval: Duration,
    /// Log the quantized column profile after every pass.
    pub print_summary: bool,
    /// Render every scanned row to the debug log, one glyph per pixel
    /// bucketed by raw match distance. Heavy; for tuning sessions only.
    pub print_image: bool,
    /// Write one PNG snapshot of the first captured frame after `enable`.
    pub take_snapshot: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            image_width: 320,
            image_height: 240,
            // A pink LED beacon (hue 286): a color that rarely shows up in
            // nature.
            target_color: Color::new(151, 55, 180),
            match_threshold: 0.1,
            start_row: 0,
            end_row: -1,
            flip_horizontal: false,
            flip_vertical: false,
            pool_size: default_pool_size(),
            poll_interval: Duration::from_millis(100),
            acquire_retry_ceiling: 50,
            pass_timeout: Duration::from_secs(5),
            pass_interval: Duration::from_millis(66),
            print_summary: false,
            print_image: false,
            take_snapshot: false,
        }
    }
}

impl LocatorConfig {
    /// Validates the configuration and resolves the inclusive scan row band.
    fn resolved_row_band(&self) -> Result<(u32, u32), LocatorError> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(LocatorError::InvalidConfig("image dimensions must be non-zero"));
        }
        if !(self.match_threshold > 0.0) {
            return Err(LocatorError::InvalidConfig("match threshold must be positive"));
        }
        if self.pool_size == 0 {
            return Err(LocatorError::InvalidConfig("pool size must be at least 1"));
        }
        if self.start_row >= self.image_height {
            return Err(LocatorError::InvalidConfig("start row must be less than image height"));
        }
        let end_row = if self.end_row == -1 {
            self.image_height - 1
        } else if self.end_row < -1 {
            return Err(LocatorError::InvalidConfig("end row must be -1 or a row index"));
        } else if self.end_row as u32 >= self.image_height {
            return Err(LocatorError::InvalidConfig("end row must be less than image height"));
        } else if (self.end_row as u32) < self.start_row {
            return Err(LocatorError::InvalidConfig("end row must not precede start row"));
        } else {
            self.end_row as u32
        };
        Ok((self.start_row, end_row))
    }
}

/// Splits the inclusive row band into at most `parts` contiguous sub-bands,
/// one per worker activation.
fn split_row_band(start_row: u32, end_row: u32, parts: usize) -> Vec<Range<u32>> {
    let total = end_row - start_row + 1;
    let parts = (parts as u32).clamp(1, total);
    let base = total / parts;
    let extra = total % parts;

    let mut bands = Vec::with_capacity(parts as usize);
    let mut next = start_row;
    for index in 0..parts {
        let len = base + u32::from(index < extra);
        bands.push(next..next + len);
        next += len;
    }
    bands
}

/// The state the capture loop task runs with.
struct CaptureContext {
    config: LocatorConfig,
    row_band: (u32, u32),
    pool: Arc<WorkerPool>,
    source: Arc<tokio::sync::Mutex<Box<dyn FrameSource>>>,
    indicator: Option<Arc<Mutex<Box<dyn IndicatorControl>>>>,
    last_result: Arc<Mutex<PeakResult>>,
    enabled: Arc<AtomicBool>,
}

impl CaptureContext {
    async fn run(self) {
        let resolver = PeakResolver::new(self.config.image_width as usize);
        let mut snapshot_pending = self.config.take_snapshot;

        while self.enabled.load(Ordering::SeqCst) {
            self.suppress_indicator();
            let outcome = self.run_pass(&resolver, &mut snapshot_pending).await;
            self.restore_indicator();

            if let Some(result) = outcome {
                *self.last_result.lock().unwrap() = result;
            }
            tokio::time::sleep(self.config.pass_interval).await;
        }
        tracing::debug!("capture loop exited");
    }

    /// Runs one localization pass. `None` means the pass was abandoned and
    /// the previous result stays current.
    async fn run_pass(
        &self,
        resolver: &PeakResolver,
        snapshot_pending: &mut bool,
    ) -> Option<PeakResult> {
        let started = Instant::now();
        let accumulator = Arc::new(ColumnAccumulator::new(self.config.image_width as usize));
        let bands = split_row_band(self.row_band.0, self.row_band.1, self.pool.size());
        let (completion, mut completions) = mpsc::channel::<usize>(bands.len());

        let mut dispatched = 0usize;
        for rows in bands {
            if !self.enabled.load(Ordering::SeqCst) {
                return None;
            }
            let Some(mut seat) = self
                .pool
                .acquire_idle_worker(self.config.acquire_retry_ceiling)
                .await
            else {
                tracing::warn!("pass abandoned: worker pool exhausted");
                return None;
            };

            {
                let mut source = self.source.lock().await;
                if let Err(error) = source.next_frame(&mut seat.frame) {
                    tracing::warn!(%error, "frame capture failed; abandoning pass");
                    self.pool.release(seat);
                    return None;
                }
            }

            if *snapshot_pending {
                *snapshot_pending = false;
                let path = diagnostics::snapshot_path();
                match diagnostics::save_snapshot(&seat.frame, &path) {
                    Ok(()) => tracing::info!(path = %path.display(), "wrote camera snapshot"),
                    Err(error) => tracing::warn!(%error, "snapshot write failed"),
                }
            }

            let activated = seat.activate(ScanAssignment {
                rows,
                target: self.config.target_color,
                threshold: self.config.match_threshold,
                flip_horizontal: self.config.flip_horizontal,
                flip_vertical: self.config.flip_vertical,
                print_image: self.config.print_image,
                accumulator: Arc::clone(&accumulator),
                completion: completion.clone(),
            });
            if activated.is_err() {
                tracing::warn!("worker refused activation; abandoning pass");
                return None;
            }
            dispatched += 1;
        }
        drop(completion);

        // Every dispatched worker must finish before resolving; a partially
        // updated accumulator has no defined meaning.
        let all_done = async {
            while completions.recv().await.is_some() {}
        };
        if tokio::time::timeout(self.config.pass_timeout, all_done)
            .await
            .is_err()
        {
            tracing::warn!(dispatched, "pass abandoned: workers timed out");
            return None;
        }

        let columns = accumulator.snapshot();
        let result = resolver.resolve_columns(&columns);

        if self.config.print_summary {
            let column_max = columns.iter().copied().fold(0.0_f64, f64::max);
            let profile = QuantizedProfile::from_columns(&columns, column_max);
            tracing::info!(
                "column profile:\n{}",
                diagnostics::render_profile(&profile, result.position)
            );
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if result.found {
            tracing::info!(
                elapsed_ms,
                position = result.position,
                peak_count = result.peak_count,
                "pass complete: beacon located"
            );
        } else {
            tracing::info!(elapsed_ms, peak_count = result.peak_count, "pass complete: no beacon");
        }
        Some(result)
    }

    fn suppress_indicator(&self) {
        if let Some(indicator) = &self.indicator {
            indicator.lock().unwrap().suppress_indicator();
        }
    }

    fn restore_indicator(&self) {
        if let Some(indicator) = &self.indicator {
            indicator.lock().unwrap().restore_indicator();
        }
    }
}

/// The top-level beacon locator: owns the worker pool and the peak resolver,
/// drives the capture loop, and exposes the enable/disable/capture lifecycle
/// to external callers.
pub struct BeaconLocator {
    config: LocatorConfig,
    row_band: (u32, u32),
    pool: Arc<WorkerPool>,
    source: Arc<tokio::sync::Mutex<Box<dyn FrameSource>>>,
    indicator: Option<Arc<Mutex<Box<dyn IndicatorControl>>>>,
    last_result: Arc<Mutex<PeakResult>>,
    enabled: Arc<AtomicBool>,
    closed: bool,
    loop_handle: Option<JoinHandle<()>>,
}

impl BeaconLocator {
    /// Validates the configuration and builds the locator. Fails fast before
    /// any worker starts scanning.
    pub fn new(
        config: LocatorConfig,
        source: Box<dyn FrameSource>,
        indicator: Option<Box<dyn IndicatorControl>>,
    ) -> Result<Self, LocatorError> {
        let row_band = config.resolved_row_band()?;
        let pool = Arc::new(WorkerPool::new(
            config.pool_size,
            config.image_width,
            config.image_height,
            config.poll_interval,
        ));
        tracing::info!(
            width = config.image_width,
            height = config.image_height,
            start_row = row_band.0,
            end_row = row_band.1,
            pool_size = config.pool_size,
            "beacon locator ready"
        );
        Ok(Self {
            config,
            row_band,
            pool,
            source: Arc::new(tokio::sync::Mutex::new(source)),
            indicator: indicator.map(|control| Arc::new(Mutex::new(control))),
            last_result: Arc::new(Mutex::new(PeakResult::not_found(0))),
            enabled: Arc::new(AtomicBool::new(false)),
            closed: false,
            loop_handle: None,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Opens the frame source and spins up the capture loop. Idempotent while
    /// enabled; fails once the locator has been closed. A camera failure
    /// leaves the locator disabled with no stray tasks running.
    pub async fn enable(&mut self) -> Result<(), LocatorError> {
        if self.closed {
            tracing::warn!("cannot enable: already closed");
            return Err(LocatorError::Closed);
        }
        if self.enabled.load(Ordering::SeqCst) {
            tracing::warn!("already enabled");
            return Ok(());
        }

        self.source.lock().await.open()?;
        self.enabled.store(true, Ordering::SeqCst);

        let context = CaptureContext {
            config: self.config.clone(),
            row_band: self.row_band,
            pool: Arc::clone(&self.pool),
            source: Arc::clone(&self.source),
            indicator: self.indicator.as_ref().map(Arc::clone),
            last_result: Arc::clone(&self.last_result),
            enabled: Arc::clone(&self.enabled),
        };
        self.loop_handle = Some(tokio::spawn(context.run()));
        tracing::info!("beacon locator enabled");
        Ok(())
    }

    /// Stops accepting new frames and waits for in-flight work to settle.
    /// The worker pool survives; `enable` may be called again. Idempotent.
    pub async fn disable(&mut self) {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return;
        }
        // A little more than one activation interval, so an in-flight
        // acquisition observes the flag.
        tokio::time::sleep(self.config.poll_interval).await;
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.await;
        }
        tracing::info!("beacon locator disabled");
    }

    /// Disables if enabled, terminates every worker, and releases the frame
    /// source. Idempotent; once closed the locator cannot be enabled again.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.disable().await;
        self.pool.terminate_all().await;
        self.source.lock().await.close();
        self.closed = true;
        tracing::info!("beacon locator closed");
    }

    /// The most recently resolved pass result. Precondition: the locator is
    /// enabled.
    pub fn capture(&self) -> Result<PeakResult, LocatorError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(LocatorError::NotEnabled);
        }
        let result = *self.last_result.lock().unwrap();
        tracing::debug!(
            found = result.found,
            position = result.position,
            "capture returning latest result"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const TARGET: Color = Color::new(255, 0, 255);
    const NEAR_TARGET: Color = Color::new(250, 10, 250);
    const GRAY: Color = Color::new(128, 128, 128);

    /// Uniform gray with a 3-pixel near-magenta stripe centered at column 50.
    fn fill_stripe(frame: &mut Frame) {
        frame.fill(GRAY);
        for y in 0..frame.height() {
            for x in 49..=51 {
                frame.set_pixel(x, y, NEAR_TARGET);
            }
        }
    }

    /// A synthetic camera that always serves the stripe scene.
    struct StripeSource;

    impl FrameSource for StripeSource {
        fn open(&mut self) -> Result<(), LocatorError> {
            Ok(())
        }

        fn next_frame(&mut self, frame: &mut Frame) -> Result<(), LocatorError> {
            fill_stripe(frame);
            Ok(())
        }

        fn close(&mut self) {}
    }

    /// A camera that serves the stripe scene until told to start failing
    /// mid-stream.
    struct FlakySource {
        failing: Arc<AtomicBool>,
    }

    impl FrameSource for FlakySource {
        fn open(&mut self) -> Result<(), LocatorError> {
            Ok(())
        }

        fn next_frame(&mut self, frame: &mut Frame) -> Result<(), LocatorError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LocatorError::Camera("sensor read failed".into()));
            }
            fill_stripe(frame);
            Ok(())
        }

        fn close(&mut self) {}
    }

    /// A camera that is busy at open time.
    struct BusySource;

    impl FrameSource for BusySource {
        fn open(&mut self) -> Result<(), LocatorError> {
            Err(LocatorError::Camera("device in use by another process".into()))
        }

        fn next_frame(&mut self, _frame: &mut Frame) -> Result<(), LocatorError> {
            Err(LocatorError::Camera("not open".into()))
        }

        fn close(&mut self) {}
    }

    #[derive(Default)]
    struct CountingIndicator {
        suppressed: Arc<AtomicUsize>,
        restored: Arc<AtomicUsize>,
    }

    impl IndicatorControl for CountingIndicator {
        fn suppress_indicator(&mut self) {
            self.suppressed.fetch_add(1, Ordering::SeqCst);
        }

        fn restore_indicator(&mut self) {
            self.restored.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_config() -> LocatorConfig {
        LocatorConfig {
            image_width: 100,
            image_height: 40,
            target_color: TARGET,
            match_threshold: 0.1,
            pool_size: 4,
            poll_interval: Duration::from_millis(10),
            pass_interval: Duration::from_millis(10),
            pass_timeout: Duration::from_secs(2),
            ..LocatorConfig::default()
        }
    }

    async fn wait_for_detection(locator: &BeaconLocator) -> PeakResult {
        for _ in 0..200 {
            if let Ok(result) = locator.capture()
                && result.found
            {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no detection within the deadline");
    }

    #[tokio::test]
    async fn capture_before_enable_is_a_precondition_error() {
        let locator = BeaconLocator::new(test_config(), Box::new(StripeSource), None).unwrap();
        assert!(matches!(locator.capture(), Err(LocatorError::NotEnabled)));
    }

    #[tokio::test]
    async fn enable_after_close_fails() {
        let mut locator = BeaconLocator::new(test_config(), Box::new(StripeSource), None).unwrap();
        locator.close().await;
        assert!(matches!(locator.enable().await, Err(LocatorError::Closed)));
        // close is idempotent.
        locator.close().await;
    }

    #[tokio::test]
    async fn busy_camera_leaves_locator_disabled() {
        let mut locator = BeaconLocator::new(test_config(), Box::new(BusySource), None).unwrap();
        assert!(matches!(locator.enable().await, Err(LocatorError::Camera(_))));
        assert!(!locator.enabled());
        assert!(matches!(locator.capture(), Err(LocatorError::NotEnabled)));
    }

    #[tokio::test]
    async fn locates_a_stripe_beacon_end_to_end() {
        let indicator = CountingIndicator::default();
        let suppressed = Arc::clone(&indicator.suppressed);
        let restored = Arc::clone(&indicator.restored);

        let mut locator = BeaconLocator::new(
            test_config(),
            Box::new(StripeSource),
            Some(Box::new(indicator)),
        )
        .unwrap();

        locator.enable().await.unwrap();
        // Idempotent while running.
        locator.enable().await.unwrap();

        let result = wait_for_detection(&locator).await;
        assert_eq!(result.position, 50);
        assert_eq!(result.peak_count, 3);

        locator.close().await;
        // The indicator is restored for every suppression, pass failures
        // included.
        assert!(suppressed.load(Ordering::SeqCst) > 0);
        assert_eq!(
            suppressed.load(Ordering::SeqCst),
            restored.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn camera_failure_mid_stream_keeps_the_previous_result() {
        let failing = Arc::new(AtomicBool::new(false));
        let source = FlakySource {
            failing: Arc::clone(&failing),
        };
        let mut locator = BeaconLocator::new(test_config(), Box::new(source), None).unwrap();
        locator.enable().await.unwrap();

        let before = wait_for_detection(&locator).await;
        assert_eq!(before.position, 50);

        // Every subsequent pass fails at frame capture and is abandoned.
        failing.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(locator.enabled());
        let after = locator.capture().unwrap();
        assert!(after.found);
        assert_eq!(after.position, before.position);
        assert_eq!(after.peak_count, before.peak_count);

        locator.close().await;
    }

    #[tokio::test]
    async fn disable_then_enable_resumes() {
        let mut locator = BeaconLocator::new(test_config(), Box::new(StripeSource), None).unwrap();
        locator.enable().await.unwrap();
        wait_for_detection(&locator).await;

        locator.disable().await;
        assert!(matches!(locator.capture(), Err(LocatorError::NotEnabled)));
        // disable is idempotent.
        locator.disable().await;

        locator.enable().await.unwrap();
        let result = wait_for_detection(&locator).await;
        assert_eq!(result.position, 50);
        locator.close().await;
    }

    #[test]
    fn config_validation_fails_fast() {
        let no_width = LocatorConfig {
            image_width: 0,
            ..test_config()
        };
        assert!(matches!(
            no_width.resolved_row_band(),
            Err(LocatorError::InvalidConfig(_))
        ));

        let end_past_height = LocatorConfig {
            end_row: 40,
            ..test_config()
        };
        assert!(matches!(
            end_past_height.resolved_row_band(),
            Err(LocatorError::InvalidConfig(_))
        ));

        let inverted_band = LocatorConfig {
            start_row: 20,
            end_row: 10,
            ..test_config()
        };
        assert!(matches!(
            inverted_band.resolved_row_band(),
            Err(LocatorError::InvalidConfig(_))
        ));

        let sentinel_end = LocatorConfig {
            end_row: -1,
            ..test_config()
        };
        assert_eq!(sentinel_end.resolved_row_band().unwrap(), (0, 39));

        // Only -1 is the last-row sentinel; other negatives are rejected.
        let negative_end = LocatorConfig {
            end_row: -5,
            ..test_config()
        };
        assert!(matches!(
            negative_end.resolved_row_band(),
            Err(LocatorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn row_band_splits_cover_every_row_once() {
        let bands = split_row_band(0, 239, 4);
        assert_eq!(bands.len(), 4);
        assert_eq!(bands[0], 0..60);
        assert_eq!(bands[3], 180..240);

        // Uneven split: every row covered exactly once, in order.
        let bands = split_row_band(10, 20, 4);
        let rows: Vec<u32> = bands.into_iter().flatten().collect();
        assert_eq!(rows, (10..=20).collect::<Vec<u32>>());

        // More workers than rows degrades to one row per band.
        let bands = split_row_band(5, 6, 8);
        assert_eq!(bands.len(), 2);
    }
}
