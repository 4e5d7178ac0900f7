// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer container reader
//!
//! Decodes the first video stream of a file to NV12 through
//! `filesrc ! decodebin ! videoconvert ! appsink`. The appsink does not
//! sync to the clock; pacing is the pump's job.

use super::{MovieReader, ReaderStatus};
use crate::errors::{FrameError, ReaderError, ReaderResult};
use crate::media::{Frame, MediaTime, PixelBuffer, Plane};
use futures::future::BoxFuture;
use gstreamer::prelude::*;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long metadata loading waits for the pipeline to preroll
const PREROLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for decoded samples
const PULL_TIMEOUT_MS: u64 = 100;

/// NV12 sample buffer, mapped on lock
struct GstPixelBuffer {
    buffer: Option<gstreamer::Buffer>,
    mapped: Option<gstreamer::buffer::MappedBuffer<gstreamer::buffer::Readable>>,
    strides: [u32; 2],
    offsets: [usize; 2],
}

impl PixelBuffer for GstPixelBuffer {
    fn lock_base_address(&mut self) -> Result<(), FrameError> {
        if self.mapped.is_some() {
            return Ok(());
        }
        let buffer = self
            .buffer
            .take()
            .ok_or(FrameError::MissingImageBuffer)?;
        match buffer.into_mapped_buffer_readable() {
            Ok(mapped) => {
                self.mapped = Some(mapped);
                Ok(())
            }
            Err(buffer) => {
                self.buffer = Some(buffer);
                Err(FrameError::LockFailed("buffer is not readable".to_string()))
            }
        }
    }

    fn unlock_base_address(&mut self) {
        if let Some(mapped) = self.mapped.take() {
            self.buffer = Some(mapped.into_buffer());
        }
    }

    fn plane(&self, index: usize) -> Option<Plane<'_>> {
        let data = self.mapped.as_ref()?.as_slice();
        let offset = *self.offsets.get(index)?;
        let end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(data.len())
            .min(data.len());
        Some(Plane {
            data: data.get(offset..end)?,
            stride: self.strides[index],
        })
    }

    fn invalidate(&mut self) {
        self.mapped = None;
        self.buffer = None;
    }
}

/// Reader decoding a media file with GStreamer
pub struct GstMovieReader {
    path: PathBuf,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    status: ReaderStatus,
    /// Negotiated frame size, known once metadata has loaded
    size: (u32, u32),
}

impl GstMovieReader {
    /// Build the decoding pipeline for `path`. Nothing is decoded until
    /// metadata is loaded.
    pub fn new(path: &Path) -> ReaderResult<Self> {
        gstreamer::init()
            .map_err(|e| ReaderError::Backend(format!("GStreamer init failed: {}", e)))?;

        let pipeline_str = format!(
            "filesrc location=\"{}\" ! decodebin ! queue ! videoconvert ! \
             video/x-raw,format=NV12 ! appsink name=sink sync=false max-buffers=4",
            path.to_string_lossy()
        );

        let pipeline = gstreamer::parse::launch(&pipeline_str)
            .map_err(|e| ReaderError::Backend(format!("Failed to create pipeline: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| ReaderError::Backend("Failed to downcast to Pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| ReaderError::Backend("Failed to find appsink".into()))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| ReaderError::Backend("Failed to downcast to AppSink".into()))?;

        Ok(Self {
            path: path.to_path_buf(),
            pipeline,
            appsink,
            status: ReaderStatus::Unknown,
            size: (0, 0),
        })
    }

    /// Pause the pipeline and wait for it to preroll
    fn preroll(&mut self) -> ReaderResult<()> {
        self.pipeline
            .set_state(gstreamer::State::Paused)
            .map_err(|e| ReaderError::MetadataUnavailable(format!("Failed to pause: {:?}", e)))?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| ReaderError::Backend("No bus on pipeline".into()))?;
        let deadline = Instant::now() + PREROLL_TIMEOUT;

        while Instant::now() < deadline {
            if let Some(msg) = bus.timed_pop(gstreamer::ClockTime::from_mseconds(PULL_TIMEOUT_MS)) {
                use gstreamer::MessageView;
                match msg.view() {
                    MessageView::Error(err) => {
                        return Err(ReaderError::MetadataUnavailable(format!(
                            "Pipeline error: {}",
                            err.error()
                        )));
                    }
                    MessageView::AsyncDone(_) => break,
                    _ => {}
                }
            }
        }

        let caps = self
            .appsink
            .static_pad("sink")
            .and_then(|pad| pad.current_caps())
            .ok_or(ReaderError::NoVideoTrack)?;
        let info = gstreamer_video::VideoInfo::from_caps(&caps)
            .map_err(|e| ReaderError::MetadataUnavailable(format!("Unusable caps: {}", e)))?;

        self.size = (info.width(), info.height());
        info!(
            path = %self.path.display(),
            width = info.width(),
            height = info.height(),
            fps = %info.fps(),
            "Movie metadata loaded"
        );
        Ok(())
    }

    /// Wrap a decoded sample. A sample that can't be interpreted still
    /// becomes a frame, without an image buffer, so only that frame is lost.
    fn frame_from_sample(sample: &gstreamer::Sample, stream_size: (u32, u32)) -> Frame {
        let presentation_time = sample
            .buffer()
            .and_then(|buffer| buffer.pts())
            .map(|pts| MediaTime::from_nanos(pts.nseconds()))
            .unwrap_or(MediaTime::ZERO);

        let info = sample
            .caps()
            .and_then(|caps| gstreamer_video::VideoInfo::from_caps(caps).ok());
        let Some(info) = info else {
            warn!(pts = %presentation_time, "Sample without usable caps");
            return Frame::without_image_buffer(stream_size.0, stream_size.1, presentation_time);
        };

        let Some(buffer) = sample.buffer_owned() else {
            return Frame::without_image_buffer(info.width(), info.height(), presentation_time);
        };

        let stride = info.stride();
        let offset = info.offset();
        let pixel_buffer = GstPixelBuffer {
            buffer: Some(buffer),
            mapped: None,
            strides: [
                stride.first().copied().unwrap_or(0).max(0) as u32,
                stride.get(1).copied().unwrap_or(0).max(0) as u32,
            ],
            offsets: [
                offset.first().copied().unwrap_or(0),
                offset.get(1).copied().unwrap_or(0),
            ],
        };

        Frame::new(info.width(), info.height(), presentation_time, pixel_buffer)
    }

    fn check_bus_error(&mut self) -> bool {
        let Some(bus) = self.pipeline.bus() else {
            return false;
        };
        while let Some(msg) = bus.pop_filtered(&[gstreamer::MessageType::Error]) {
            if let gstreamer::MessageView::Error(err) = msg.view() {
                warn!(error = %err.error(), debug = ?err.debug(), "Decoding pipeline error");
                self.status = ReaderStatus::Failed;
                return true;
            }
        }
        false
    }
}

impl MovieReader for GstMovieReader {
    fn load_metadata(&mut self) -> BoxFuture<'_, ReaderResult<()>> {
        Box::pin(async move { self.preroll() })
    }

    fn start_reading(&mut self) -> ReaderResult<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| {
                self.status = ReaderStatus::Failed;
                ReaderError::StartFailed(format!("Failed to start pipeline: {:?}", e))
            })?;
        debug!(path = %self.path.display(), "Reading started");
        self.status = ReaderStatus::Reading;
        Ok(())
    }

    fn status(&self) -> ReaderStatus {
        self.status
    }

    fn copy_next_frame(&mut self) -> Option<Frame> {
        while self.status == ReaderStatus::Reading {
            if let Some(sample) = self
                .appsink
                .try_pull_sample(gstreamer::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
            {
                return Some(Self::frame_from_sample(&sample, self.size));
            }
            if self.appsink.is_eos() {
                debug!(path = %self.path.display(), "End of stream");
                self.status = ReaderStatus::Completed;
                return None;
            }
            if self.check_bus_error() {
                return None;
            }
        }
        None
    }

    fn cancel_reading(&mut self) {
        if matches!(self.status, ReaderStatus::Unknown | ReaderStatus::Reading) {
            self.status = ReaderStatus::Cancelled;
        }
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

impl Drop for GstMovieReader {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_at(size: usize, millis: u64) -> gstreamer::Buffer {
        let mut buffer = gstreamer::Buffer::with_size(size).unwrap();
        buffer
            .get_mut()
            .unwrap()
            .set_pts(gstreamer::ClockTime::from_mseconds(millis));
        buffer
    }

    #[test]
    fn test_sample_without_caps_is_an_empty_frame() {
        gstreamer::init().unwrap();
        let sample = gstreamer::Sample::builder()
            .buffer(&buffer_at(12, 40))
            .build();

        let frame = GstMovieReader::frame_from_sample(&sample, (4, 2));
        assert!(!frame.has_image_buffer());
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.presentation_time, MediaTime::from_nanos(40_000_000));
    }

    #[test]
    fn test_nv12_sample_maps_planes() {
        gstreamer::init().unwrap();
        let caps = gstreamer_video::VideoInfo::builder(gstreamer_video::VideoFormat::Nv12, 4, 2)
            .build()
            .unwrap()
            .to_caps()
            .unwrap();
        let sample = gstreamer::Sample::builder()
            .buffer(&buffer_at(12, 0))
            .caps(&caps)
            .build();

        let mut frame = GstMovieReader::frame_from_sample(&sample, (0, 0));
        assert_eq!((frame.width, frame.height), (4, 2));
        let locked = frame.lock().unwrap();
        assert_eq!(locked.luma().unwrap().stride, 4);
        assert_eq!(locked.chroma().unwrap().data.len(), 4);
    }
}
