// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the frame pump

use movie_input::gpu::{Framebuffer, RenderContext, TextureFormat};
use movie_input::pipeline::CancelHandle;
use futures::future::BoxFuture;
use movie_input::errors::{FrameError, ReaderResult};
use movie_input::media::{Nv12Buffer, PixelBuffer, Plane};
use movie_input::readers::{MemoryReader, MovieReader, ReaderStatus, test_pattern};
use movie_input::sinks::FrameCollector;
use movie_input::{
    BackendPreference, Frame, FramePump, ImageConsumer, MediaTime, Orientation, ProcessingQueue,
    PumpConfig, PumpState, ReaderError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn software_config() -> PumpConfig {
    PumpConfig::default().with_backend(BackendPreference::Software)
}

fn start_pump(
    reader: MemoryReader,
    config: PumpConfig,
) -> (FramePump, Arc<FrameCollector>, Arc<AtomicUsize>) {
    let mut pump = FramePump::with_reader(Box::new(reader), config).expect("pump should build");
    let collector = Arc::new(FrameCollector::new());
    pump.add_target(collector.clone(), 0);

    let completions = Arc::new(AtomicUsize::new(0));
    let completions_clone = Arc::clone(&completions);
    pump.start(Some(Box::new(move || {
        completions_clone.fetch_add(1, Ordering::SeqCst);
    })));
    (pump, collector, completions)
}

#[test]
fn test_rotated_right_keeps_dimensions() {
    let reader = MemoryReader::new(test_pattern(64, 48, 2, 30));
    let config = software_config().with_orientation(Orientation::RotatedRight);
    let (mut pump, collector, completions) = start_pump(reader, config);
    pump.wait();

    let frames = collector.frames();
    assert_eq!(frames.len(), 2);
    for frame in &frames {
        assert_eq!((frame.width, frame.height), (64, 48));
    }
    assert_eq!(frames[0].timestamp, Some(MediaTime::new(0, 30)));
    assert_eq!(frames[1].timestamp, Some(MediaTime::new(1, 30)));
    assert_eq!(pump.state(), PumpState::Completed);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_upright_swaps_dimensions() {
    let reader = MemoryReader::new(test_pattern(640, 480, 1, 30));
    let config = software_config().with_orientation(Orientation::Upright);
    let (mut pump, collector, _) = start_pump(reader, config);
    pump.wait();

    let frames = collector.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!((frames[0].width, frames[0].height), (480, 640));
}

#[test]
fn test_every_orientation_matches_table() {
    for orientation in Orientation::ALL {
        let reader = MemoryReader::new(test_pattern(32, 16, 1, 30));
        let config = software_config().with_orientation(orientation);
        let (mut pump, collector, _) = start_pump(reader, config);
        pump.wait();

        let expected = orientation.transform().output_size(32, 16);
        let frames = collector.frames();
        assert_eq!(frames.len(), 1, "{:?}", orientation);
        assert_eq!((frames[0].width, frames[0].height), expected, "{:?}", orientation);
    }
}

#[test]
fn test_odd_dimensions_are_converted() {
    let reader = MemoryReader::new(test_pattern(101, 101, 1, 30));
    let config = software_config().with_orientation(Orientation::RotatedRight);
    let (mut pump, collector, _) = start_pump(reader, config);
    pump.wait();

    let frames = collector.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!((frames[0].width, frames[0].height), (101, 101));
}

#[test]
fn test_without_targets_buffers_are_reused() {
    let queue = ProcessingQueue::with_preference(BackendPreference::Software).unwrap();
    let reader = MemoryReader::new(test_pattern(16, 8, 3, 30));
    let config = software_config().with_orientation(Orientation::RotatedRight);
    let mut pump = FramePump::new(Box::new(reader), queue.clone(), config).unwrap();
    pump.start(None);
    pump.wait();
    assert_eq!(pump.state(), PumpState::Completed);

    let (after_run, after_acquire, reused_locks) = queue
        .run_sync(|context: &mut RenderContext| {
            let after_run = context.pool_stats();
            let output = context
                .acquire_framebuffer(16, 8, Orientation::Upright, false, TextureFormat::Rgba)
                .unwrap();
            let stats = context.pool_stats();
            let locks = output.lock_count();
            output.unlock();
            (after_run, stats, locks)
        })
        .unwrap();

    // luma, chroma, RGB intermediate and rotated output, shared by all frames
    assert_eq!(after_run.allocated, 4);
    assert_eq!(after_run.in_use, 0);
    assert_eq!(after_acquire.allocated, 4);
    assert_eq!(reused_locks, 1);
}

#[test]
fn test_frame_without_image_buffer_is_dropped() {
    let mut frames = test_pattern(16, 8, 3, 30);
    frames[1] = Frame::without_image_buffer(16, 8, MediaTime::new(1, 30));
    let reader = MemoryReader::new(frames);
    let (mut pump, collector, completions) = start_pump(reader, software_config());
    pump.wait();

    let timestamps: Vec<_> = collector.frames().iter().map(|f| f.timestamp).collect();
    assert_eq!(
        timestamps,
        vec![Some(MediaTime::new(0, 30)), Some(MediaTime::new(2, 30))]
    );
    assert_eq!(pump.state(), PumpState::Completed);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_single_pixel_rows_and_columns_are_published() {
    for (width, height) in [(8, 1), (1, 8)] {
        let reader = MemoryReader::new(test_pattern(width, height, 3, 30));
        let config = software_config().with_orientation(Orientation::RotatedRight);
        let (mut pump, collector, _) = start_pump(reader, config);
        pump.wait();

        assert_eq!(pump.state(), PumpState::Completed);
        let frames = collector.frames();
        assert_eq!(frames.len(), 3, "{}x{}", width, height);
        assert!(frames.iter().all(|f| (f.width, f.height) == (width, height)));
    }
}

/// Pixel buffer that panics when the pump tries to lock it
struct CorruptBuffer;

impl PixelBuffer for CorruptBuffer {
    fn lock_base_address(&mut self) -> Result<(), FrameError> {
        panic!("corrupt sample");
    }

    fn plane(&self, _index: usize) -> Option<Plane<'_>> {
        None
    }
}

#[test]
fn test_panicking_frame_is_dropped() {
    let queue = ProcessingQueue::with_preference(BackendPreference::Software).unwrap();
    let mut frames = test_pattern(16, 8, 4, 30);
    frames[1] = Frame::new(16, 8, MediaTime::new(1, 30), CorruptBuffer);
    let reader = MemoryReader::new(frames);
    let mut pump = FramePump::new(Box::new(reader), queue.clone(), software_config()).unwrap();
    let collector = Arc::new(FrameCollector::new());
    pump.add_target(collector.clone(), 0);
    pump.start(None);
    pump.wait();

    assert_eq!(pump.state(), PumpState::Completed);
    let timestamps: Vec<_> = collector.frames().iter().map(|f| f.timestamp).collect();
    assert_eq!(
        timestamps,
        vec![
            Some(MediaTime::new(0, 30)),
            Some(MediaTime::new(2, 30)),
            Some(MediaTime::new(3, 30))
        ]
    );
    let stats = queue.run_sync(|context| context.pool_stats()).unwrap();
    assert_eq!(stats.in_use, 0);
}

/// Panics on the first frame it is given, without releasing it
struct PanicOnFirstFrame {
    panicked: AtomicBool,
}

impl ImageConsumer for PanicOnFirstFrame {
    fn new_framebuffer_available(
        &self,
        framebuffer: Framebuffer,
        _slot: usize,
        _context: &mut RenderContext,
    ) {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("consumer failed on first frame");
        }
        framebuffer.unlock();
    }
}

#[test]
fn test_panicking_consumer_does_not_end_stream() {
    let queue = ProcessingQueue::with_preference(BackendPreference::Software).unwrap();
    let reader = MemoryReader::new(test_pattern(16, 8, 5, 30));
    let mut pump = FramePump::new(Box::new(reader), queue.clone(), software_config()).unwrap();
    let collector = Arc::new(FrameCollector::new());
    pump.add_target(
        Arc::new(PanicOnFirstFrame {
            panicked: AtomicBool::new(false),
        }),
        0,
    );
    pump.add_target(collector.clone(), 1);

    let completions = Arc::new(AtomicUsize::new(0));
    let completions_clone = Arc::clone(&completions);
    pump.start(Some(Box::new(move || {
        completions_clone.fetch_add(1, Ordering::SeqCst);
    })));
    pump.wait();

    assert_eq!(pump.state(), PumpState::Completed);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    // The later edge still gets every frame, including the first
    assert_eq!(collector.len(), 5);
    let stats = queue.run_sync(|context| context.pool_stats()).unwrap();
    assert_eq!(stats.in_use, 0);
}

#[test]
fn test_metadata_failure_fails_pump() {
    let reader = MemoryReader::new(test_pattern(16, 8, 3, 30))
        .with_metadata_error(ReaderError::NoVideoTrack);
    let pulled = reader.pulled_counter();
    let (mut pump, collector, completions) = start_pump(reader, software_config());
    pump.wait();

    assert_eq!(pump.state(), PumpState::Failed);
    assert!(collector.is_empty());
    assert_eq!(pulled.load(Ordering::SeqCst), 0);
    assert_eq!(completions.load(Ordering::SeqCst), 0);
}

#[test]
fn test_start_failure_fails_pump() {
    let reader = MemoryReader::new(test_pattern(16, 8, 3, 30))
        .with_start_error(ReaderError::StartFailed("device busy".to_string()));
    let (mut pump, collector, completions) = start_pump(reader, software_config());
    pump.wait();

    assert_eq!(pump.state(), PumpState::Failed);
    assert!(collector.is_empty());
    assert_eq!(completions.load(Ordering::SeqCst), 0);
}

/// Memory reader whose metadata takes a while to arrive
struct SlowMetadataReader {
    inner: MemoryReader,
    delay: Duration,
}

impl MovieReader for SlowMetadataReader {
    fn load_metadata(&mut self) -> BoxFuture<'_, ReaderResult<()>> {
        let delay = self.delay;
        let loaded = self.inner.load_metadata();
        Box::pin(async move {
            std::thread::sleep(delay);
            loaded.await
        })
    }

    fn start_reading(&mut self) -> ReaderResult<()> {
        self.inner.start_reading()
    }

    fn status(&self) -> ReaderStatus {
        self.inner.status()
    }

    fn copy_next_frame(&mut self) -> Option<Frame> {
        self.inner.copy_next_frame()
    }

    fn cancel_reading(&mut self) {
        self.inner.cancel_reading();
    }
}

/// Cancels the pump the first time it receives a frame
struct CancelOnFirstFrame {
    handle: Mutex<Option<CancelHandle>>,
}

impl ImageConsumer for CancelOnFirstFrame {
    fn new_framebuffer_available(
        &self,
        framebuffer: Framebuffer,
        _slot: usize,
        _context: &mut RenderContext,
    ) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.cancel();
        }
        framebuffer.unlock();
    }
}

#[test]
fn test_cancel_from_consumer_stops_after_in_flight_frame() {
    let reader = MemoryReader::new(test_pattern(16, 8, 10, 30));
    let pulled = reader.pulled_counter();
    let mut pump = FramePump::with_reader(Box::new(reader), software_config()).unwrap();

    let collector = Arc::new(FrameCollector::new());
    let canceller = Arc::new(CancelOnFirstFrame {
        handle: Mutex::new(Some(pump.cancel_handle())),
    });
    pump.add_target(canceller, 0);
    // Registered after the canceller, still receives the in-flight frame
    pump.add_target(collector.clone(), 0);

    let completions = Arc::new(AtomicUsize::new(0));
    let completions_clone = Arc::clone(&completions);
    pump.start(Some(Box::new(move || {
        completions_clone.fetch_add(1, Ordering::SeqCst);
    })));
    pump.wait();

    assert_eq!(pump.state(), PumpState::Cancelled);
    assert_eq!(pulled.load(Ordering::SeqCst), 1);
    assert_eq!(collector.len(), 1);
    assert_eq!(completions.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancel_mid_stream_publishes_every_pulled_frame() {
    let reader = MemoryReader::new(test_pattern(16, 8, 30, 30));
    let pulled = reader.pulled_counter();
    let config = software_config().with_actual_speed(true);
    let (mut pump, collector, completions) = start_pump(reader, config);

    assert!(collector.wait_for(2, Duration::from_secs(5)));
    pump.cancel();
    pump.wait();

    assert_eq!(pump.state(), PumpState::Cancelled);
    let published = collector.len();
    assert!(published < 30, "published {} frames", published);
    // Whatever was pulled before the cancel took effect is still published
    assert_eq!(pulled.load(Ordering::SeqCst), published);
    assert_eq!(completions.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancel_during_metadata_load_returns_immediately() {
    let reader = SlowMetadataReader {
        inner: MemoryReader::new(test_pattern(16, 8, 3, 30)),
        delay: Duration::from_millis(400),
    };
    let pulled = reader.inner.pulled_counter();
    let mut pump = FramePump::with_reader(Box::new(reader), software_config()).unwrap();
    let collector = Arc::new(FrameCollector::new());
    pump.add_target(collector.clone(), 0);
    pump.start(None);

    // Let the read loop get into metadata loading
    std::thread::sleep(Duration::from_millis(50));
    let cancel_started = Instant::now();
    pump.cancel();
    assert!(cancel_started.elapsed() < Duration::from_millis(200));
    pump.wait();

    assert_eq!(pump.state(), PumpState::Cancelled);
    assert_eq!(pulled.load(Ordering::SeqCst), 0);
    assert!(collector.is_empty());
}

#[test]
fn test_cancel_before_start() {
    let reader = MemoryReader::new(test_pattern(16, 8, 3, 30));
    let pulled = reader.pulled_counter();
    let mut pump = FramePump::with_reader(Box::new(reader), software_config()).unwrap();
    pump.cancel();
    pump.start(None);
    pump.wait();

    assert_eq!(pump.state(), PumpState::Cancelled);
    assert_eq!(pulled.load(Ordering::SeqCst), 0);
}

#[test]
fn test_actual_speed_paces_publishes() {
    let reader = MemoryReader::new(test_pattern(16, 8, 6, 30));
    let config = software_config().with_actual_speed(true);
    let (mut pump, collector, _) = start_pump(reader, config);
    pump.wait();

    let frames = collector.frames();
    assert_eq!(frames.len(), 6);
    for pair in frames.windows(2) {
        let gap = pair[1].received_at.duration_since(pair[0].received_at);
        assert!(gap >= Duration::from_millis(25), "gap {:?}", gap);
        assert!(gap < Duration::from_millis(250), "gap {:?}", gap);
    }
}

#[test]
fn test_without_actual_speed_timestamps_are_ignored() {
    // One second between frames
    let reader = MemoryReader::new(test_pattern(16, 8, 5, 1));
    let started = Instant::now();
    let (mut pump, collector, _) = start_pump(reader, software_config());
    pump.wait();

    assert_eq!(collector.len(), 5);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_loop_flag_still_completes() {
    let reader = MemoryReader::new(test_pattern(16, 8, 2, 30));
    let config = software_config().with_loop(true);
    let (mut pump, collector, completions) = start_pump(reader, config);
    pump.wait();

    assert_eq!(collector.len(), 2);
    assert_eq!(pump.state(), PumpState::Completed);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_benchmark_counts_frames() {
    let reader = MemoryReader::new(test_pattern(16, 8, 4, 30));
    let config = software_config().with_benchmark(true);
    let (mut pump, _, _) = start_pump(reader, config);
    pump.wait();

    let stats = pump.benchmark();
    assert_eq!(stats.frames, 4);
    assert!(stats.average > Duration::ZERO);

    let reader = MemoryReader::new(test_pattern(16, 8, 4, 30));
    let (mut pump, _, _) = start_pump(reader, software_config());
    pump.wait();
    assert_eq!(pump.benchmark().frames, 0);
}

#[test]
fn test_converted_pixels_reach_consumers() {
    // Mid grey in, mid grey out, for every pixel of a rotated frame
    let frames = vec![Frame::new(
        8,
        4,
        MediaTime::ZERO,
        Nv12Buffer::solid(8, 4, 128, 128, 128),
    )];
    let mut pump = FramePump::with_reader(
        Box::new(MemoryReader::new(frames)),
        software_config().with_orientation(Orientation::Upright),
    )
    .unwrap();
    let collector = Arc::new(FrameCollector::new().with_pixels());
    pump.add_target(collector.clone(), 0);
    pump.start(None);
    pump.wait();

    let frames = collector.frames();
    let pixels = frames[0].pixels.as_ref().expect("pixels captured");
    assert_eq!(pixels.len(), 4 * 8 * 4);
    for texel in pixels.chunks_exact(4) {
        assert!((texel[0] as i32 - 128).abs() <= 1, "{:?}", texel);
        assert!((texel[1] as i32 - 128).abs() <= 1, "{:?}", texel);
        assert!((texel[2] as i32 - 128).abs() <= 1, "{:?}", texel);
        assert_eq!(texel[3], 255);
    }
}
