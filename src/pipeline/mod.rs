// SPDX-License-Identifier: GPL-3.0-only

//! Frame pump
//!
//! Drives the acquire, convert, rotate, publish loop:
//!
//! ```text
//! reader ──NV12──▶ [luma + chroma buffers] ──▶ conversion ──RGB──▶ rotation ──▶ targets
//! ```
//!
//! The loop runs on its own thread. Every GPU-touching step of a frame runs
//! as one job on the [`ProcessingQueue`], and the loop waits for that job
//! before pulling the next frame, so GPU work never overlaps across frames.
//! Pacing sleeps happen on the loop thread.

mod benchmark;
mod pacing;
mod read_loop;
mod targets;

pub use benchmark::BenchmarkStats;
pub use pacing::FramePacer;
pub use read_loop::{LoopAction, ReadLoopController};
pub use targets::{ImageConsumer, TargetContainer};

use crate::config::PumpConfig;
use crate::constants::threads;
use crate::errors::{PipelineError, PipelineResult};
use crate::gpu::{ProcessingQueue, RenderContext};
use crate::media::{Frame, Orientation};
use crate::readers::{MovieReader, ReaderStatus};
use crate::shaders::{ColorConversionStage, RotationStage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Called once when the stream has been fully played
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Frame pump lifecycle
///
/// `Idle → Reading → (Acquiring → Converting → Publishing → Reading)* →
/// Completed | Cancelled | Failed`. The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Idle,
    Reading,
    Acquiring,
    Converting,
    Publishing,
    Completed,
    Cancelled,
    Failed,
}

impl PumpState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PumpState::Completed | PumpState::Cancelled | PumpState::Failed
        )
    }
}

/// State shared between the pump handle, the read loop and GPU jobs
struct PumpShared {
    state: Mutex<PumpState>,
    reader: Mutex<Box<dyn MovieReader>>,
    cancel_requested: Arc<AtomicBool>,
    benchmark: Mutex<BenchmarkStats>,
}

impl PumpShared {
    fn state(&self) -> PumpState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next` unless a terminal state was already reached
    fn transition(&self, next: PumpState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }

    /// Never held across a GPU job
    fn reader(&self) -> MutexGuard<'_, Box<dyn MovieReader>> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn benchmark(&self) -> MutexGuard<'_, BenchmarkStats> {
        self.benchmark.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The two shader stages, compiled once per pump
#[derive(Debug, Clone)]
struct Stages {
    conversion: ColorConversionStage,
    rotation: RotationStage,
}

/// Cloneable handle that cancels a running pump from any thread, including
/// from inside an [`ImageConsumer`]
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<PumpShared>,
}

impl CancelHandle {
    /// Stop reading. A frame already pulled still completes and is
    /// published; nothing is pulled afterwards.
    ///
    /// Never blocks: while the read loop holds the reader (loading metadata
    /// or pulling a frame) the reader is cancelled by the loop at its next
    /// step instead.
    pub fn cancel(&self) {
        self.shared.cancel_requested.store(true, Ordering::SeqCst);
        if self.shared.transition(PumpState::Cancelled) {
            info!("Movie playback cancelled");
        }
        match self.shared.reader.try_lock() {
            Ok(mut reader) => reader.cancel_reading(),
            Err(TryLockError::Poisoned(e)) => e.into_inner().cancel_reading(),
            Err(TryLockError::WouldBlock) => {
                debug!("Reader busy, cancelling it from the read loop");
            }
        }
    }
}

/// Per-run state owned by the read loop thread
struct ReadLoopState {
    pacer: FramePacer,
    completion: Option<CompletionCallback>,
}

/// Pulls frames from a [`MovieReader`] and pushes oriented RGB framebuffers
/// to its targets
pub struct FramePump {
    shared: Arc<PumpShared>,
    queue: ProcessingQueue,
    stages: Stages,
    targets: TargetContainer,
    config: PumpConfig,
    pacer: Option<FramePacer>,
    controller: Option<ReadLoopController>,
}

impl FramePump {
    /// Build a pump around `reader`, compiling both shader programs on `queue`
    ///
    /// Fails if either program does not compile.
    pub fn new(
        reader: Box<dyn MovieReader>,
        queue: ProcessingQueue,
        config: PumpConfig,
    ) -> PipelineResult<Self> {
        let matrix = config.conversion_matrix;
        let stages = queue.run_sync(move |context| -> PipelineResult<Stages> {
            Ok(Stages {
                conversion: ColorConversionStage::new(context, matrix)?,
                rotation: RotationStage::new(context)?,
            })
        })??;

        info!(
            backend = %queue.backend_kind(),
            adapter = %queue.adapter_name(),
            orientation = %config.orientation.display_name(),
            matrix = %matrix.display_name(),
            actual_speed = config.play_at_actual_speed,
            "Frame pump ready"
        );

        Ok(Self {
            shared: Arc::new(PumpShared {
                state: Mutex::new(PumpState::Idle),
                reader: Mutex::new(reader),
                cancel_requested: Arc::new(AtomicBool::new(false)),
                benchmark: Mutex::new(BenchmarkStats::default()),
            }),
            queue,
            stages,
            targets: TargetContainer::new(),
            config,
            pacer: Some(FramePacer::new()),
            controller: None,
        })
    }

    /// Build a pump on a new processing queue using the configured backend
    pub fn with_reader(reader: Box<dyn MovieReader>, config: PumpConfig) -> PipelineResult<Self> {
        let queue = ProcessingQueue::with_preference(config.backend)?;
        Self::new(reader, queue, config)
    }

    pub fn config(&self) -> &PumpConfig {
        &self.config
    }

    /// The GPU processing queue frames are rendered on
    pub fn queue(&self) -> &ProcessingQueue {
        &self.queue
    }

    pub fn state(&self) -> PumpState {
        self.shared.state()
    }

    /// Frame timing figures, only updated when benchmarking is enabled
    pub fn benchmark(&self) -> BenchmarkStats {
        *self.shared.benchmark()
    }

    /// Register `consumer` on input `slot`. Returns `false` for a duplicate
    /// edge.
    pub fn add_target(&self, consumer: Arc<dyn ImageConsumer>, slot: usize) -> bool {
        self.targets.add(consumer, slot)
    }

    pub fn remove_all_targets(&self) {
        self.targets.remove_all();
    }

    pub fn targets(&self) -> &TargetContainer {
        &self.targets
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop reading and move to [`PumpState::Cancelled`]
    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    /// Whether the read loop thread is alive
    pub fn is_running(&self) -> bool {
        self.controller
            .as_ref()
            .map(|c| c.is_running())
            .unwrap_or(false)
    }

    /// Start the read loop
    ///
    /// Metadata is loaded and the reader started on the loop thread. If
    /// either fails the pump moves to [`PumpState::Failed`] and does nothing
    /// else. `completion` runs on the loop thread once the stream is
    /// exhausted; it does not run after cancellation or failure.
    pub fn start(&mut self, completion: Option<CompletionCallback>) {
        if self.controller.is_some() {
            warn!("Frame pump already started");
            return;
        }
        if self.state() != PumpState::Idle {
            debug!(state = ?self.state(), "Frame pump not idle, not starting");
            return;
        }
        let Some(pacer) = self.pacer.take() else {
            return;
        };

        let init_shared = Arc::clone(&self.shared);
        let init = move || -> Result<ReadLoopState, String> {
            let loaded = {
                let mut reader = init_shared.reader();
                pollster::block_on(reader.load_metadata())
            };
            if let Err(e) = loaded {
                init_shared.transition(PumpState::Failed);
                return Err(e.to_string());
            }
            if init_shared.cancel_requested.load(Ordering::SeqCst) {
                // Cancelled while loading; the first step cancels the reader
                return Ok(ReadLoopState { pacer, completion });
            }

            let started = init_shared.reader().start_reading();
            if let Err(e) = started {
                init_shared.transition(PumpState::Failed);
                return Err(e.to_string());
            }
            if init_shared.transition(PumpState::Reading) {
                info!("Reading started");
            }

            Ok(ReadLoopState { pacer, completion })
        };

        let step = FrameStep {
            shared: Arc::clone(&self.shared),
            queue: self.queue.clone(),
            stages: self.stages.clone(),
            targets: self.targets.clone(),
            config: self.config,
        };

        match ReadLoopController::spawn(
            threads::READ_LOOP,
            init,
            move |state: &mut ReadLoopState| step.run(state),
        ) {
            Ok(controller) => self.controller = Some(controller),
            Err(e) => {
                warn!(error = %e, "Couldn't spawn read loop thread");
                self.shared.transition(PumpState::Failed);
            }
        }
    }

    /// Block until the read loop has finished
    ///
    /// Must not be called from an [`ImageConsumer`].
    pub fn wait(&mut self) {
        if let Some(mut controller) = self.controller.take() {
            controller.join();
        }
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        if self.controller.is_some() {
            self.cancel();
            self.wait();
        }
    }
}

impl std::fmt::Debug for FramePump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePump")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("targets", &self.targets)
            .finish()
    }
}

/// One iteration of the read loop
struct FrameStep {
    shared: Arc<PumpShared>,
    queue: ProcessingQueue,
    stages: Stages,
    targets: TargetContainer,
    config: PumpConfig,
}

impl FrameStep {
    fn run(&self, state: &mut ReadLoopState) -> LoopAction {
        let next = {
            let mut reader = self.shared.reader();
            // Checked under the reader lock: a frame pulled below is always
            // processed, and cancel() can't slip in between check and pull
            if self.shared.cancel_requested.load(Ordering::SeqCst) {
                reader.cancel_reading();
                return LoopAction::Stop;
            }
            match reader.status() {
                ReaderStatus::Reading => reader.copy_next_frame(),
                _ => None,
            }
        };

        let Some(frame) = next else {
            let status = self.shared.reader().status();
            return self.finish(state, status);
        };

        if self.config.play_at_actual_speed {
            state.pacer.pace(frame.presentation_time);
        }

        let started = Instant::now();
        let pts = frame.presentation_time;
        self.shared.transition(PumpState::Acquiring);

        let shared = Arc::clone(&self.shared);
        let stages = self.stages.clone();
        let targets = self.targets.clone();
        let orientation = self.config.orientation;
        let result = self
            .queue
            .run_sync(move |context| {
                process_frame(context, &stages, &targets, &shared, frame, orientation)
            })
            .and_then(|processed| processed);

        match result {
            Ok(()) => {
                if self.config.run_benchmark {
                    self.shared.benchmark().record(started.elapsed());
                }
            }
            // A panicking job surfaces as JobPanicked and only drops its frame
            Err(PipelineError::ContextClosed) => {
                error!(pts = %pts, "GPU processing context closed, stopping playback");
                self.shared.transition(PumpState::Failed);
                return LoopAction::Stop;
            }
            Err(e) => {
                warn!(pts = %pts, error = %e, "Dropping frame");
            }
        }

        self.shared.transition(PumpState::Reading);
        LoopAction::Continue
    }

    /// The reader has no more frames
    fn finish(&self, state: &mut ReadLoopState, status: ReaderStatus) -> LoopAction {
        match status {
            ReaderStatus::Failed => {
                if self.shared.transition(PumpState::Failed) {
                    warn!("Movie reader failed");
                }
            }
            ReaderStatus::Cancelled => {
                self.shared.transition(PumpState::Cancelled);
            }
            _ => {
                if self.config.loop_playback {
                    debug!("Looping is not implemented, finishing playback");
                }
                if self.shared.transition(PumpState::Completed) {
                    info!("Movie playback completed");
                    if let Some(completion) = state.completion.take() {
                        completion();
                    }
                }
            }
        }
        LoopAction::Stop
    }
}

/// Convert, rotate and publish one frame. Runs on the GPU thread.
fn process_frame(
    context: &mut RenderContext,
    stages: &Stages,
    targets: &TargetContainer,
    shared: &PumpShared,
    mut frame: Frame,
    orientation: Orientation,
) -> PipelineResult<()> {
    let timestamp = frame.presentation_time;

    let output = {
        let locked = frame.lock()?;
        shared.transition(PumpState::Converting);
        let rgb = stages.conversion.convert(context, &locked)?;
        let rotated = stages.rotation.rotate(context, &rgb, orientation);
        rgb.unlock();
        rotated?
    };
    frame.invalidate();

    let output = output.with_timestamp(timestamp);
    // From here on the only locks are the ones taken for targets
    output.unlock();

    shared.transition(PumpState::Publishing);
    targets.publish(&output, context);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{BackendPreference, Framebuffer};
    use crate::media::{MediaTime, Nv12Buffer};
    use crate::readers::MemoryReader;

    struct Releasing;

    impl ImageConsumer for Releasing {
        fn new_framebuffer_available(
            &self,
            framebuffer: Framebuffer,
            _slot: usize,
            _context: &mut RenderContext,
        ) {
            framebuffer.unlock();
        }
    }

    fn software_queue() -> ProcessingQueue {
        ProcessingQueue::with_preference(BackendPreference::Software).unwrap()
    }

    fn grey_frames(count: u64) -> Vec<Frame> {
        (0..count)
            .map(|i| {
                Frame::new(
                    4,
                    2,
                    MediaTime::from_frame_index(i, 30),
                    Nv12Buffer::solid(4, 2, 128, 128, 128),
                )
            })
            .collect()
    }

    #[test]
    fn test_state_transitions_stop_at_terminal() {
        let pump = FramePump::new(
            Box::new(MemoryReader::new(Vec::new())),
            software_queue(),
            PumpConfig::default(),
        )
        .unwrap();
        assert_eq!(pump.state(), PumpState::Idle);
        assert!(pump.shared.transition(PumpState::Reading));
        assert!(pump.shared.transition(PumpState::Completed));
        assert!(!pump.shared.transition(PumpState::Reading));
        assert_eq!(pump.state(), PumpState::Completed);
    }

    #[test]
    fn test_process_frame_releases_intermediates() {
        let queue = software_queue();
        let pump = FramePump::new(
            Box::new(MemoryReader::new(Vec::new())),
            queue.clone(),
            PumpConfig::default(),
        )
        .unwrap();
        pump.add_target(Arc::new(Releasing), 0);

        let stages = pump.stages.clone();
        let targets = pump.targets.clone();
        let shared = Arc::clone(&pump.shared);
        let frame = grey_frames(1).remove(0);

        let stats = queue
            .run_sync(move |context| {
                process_frame(
                    context,
                    &stages,
                    &targets,
                    &shared,
                    frame,
                    Orientation::Upright,
                )
                .unwrap();
                context.pool_stats()
            })
            .unwrap();

        // luma, chroma, RGB intermediate and output
        assert_eq!(stats.allocated, 4);
        assert_eq!(stats.in_use, 0);
        assert_eq!(pump.state(), PumpState::Publishing);
    }

    #[test]
    fn test_missing_image_buffer_is_a_frame_error() {
        let queue = software_queue();
        let pump = FramePump::new(
            Box::new(MemoryReader::new(Vec::new())),
            queue.clone(),
            PumpConfig::default(),
        )
        .unwrap();
        let stages = pump.stages.clone();
        let targets = pump.targets.clone();
        let shared = Arc::clone(&pump.shared);
        let frame = Frame::without_image_buffer(4, 2, MediaTime::ZERO);

        let result = queue
            .run_sync(move |context| {
                process_frame(
                    context,
                    &stages,
                    &targets,
                    &shared,
                    frame,
                    Orientation::Upright,
                )
            })
            .unwrap();
        assert_eq!(
            result,
            Err(PipelineError::Frame(crate::errors::FrameError::MissingImageBuffer))
        );
    }
}
