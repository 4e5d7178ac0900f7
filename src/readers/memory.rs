// SPDX-License-Identifier: GPL-3.0-only

//! In-memory reader over a queue of prepared frames

use super::{MovieReader, ReaderStatus};
use crate::errors::{ReaderError, ReaderResult};
use crate::media::Frame;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reader that hands out frames from memory
///
/// Metadata and start failures can be scripted, which makes it the reader of
/// choice for exercising the pump's error paths.
pub struct MemoryReader {
    frames: VecDeque<Frame>,
    status: ReaderStatus,
    metadata_error: Option<ReaderError>,
    start_error: Option<ReaderError>,
    pulled: Arc<AtomicUsize>,
}

impl MemoryReader {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            status: ReaderStatus::Unknown,
            metadata_error: None,
            start_error: None,
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make [`MovieReader::load_metadata`] fail with `error`
    pub fn with_metadata_error(mut self, error: ReaderError) -> Self {
        self.metadata_error = Some(error);
        self
    }

    /// Make [`MovieReader::start_reading`] fail with `error`
    pub fn with_start_error(mut self, error: ReaderError) -> Self {
        self.start_error = Some(error);
        self
    }

    /// Shared counter of frames handed out so far
    pub fn pulled_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pulled)
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl MovieReader for MemoryReader {
    fn load_metadata(&mut self) -> BoxFuture<'_, ReaderResult<()>> {
        let result = match self.metadata_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        };
        Box::pin(async move { result })
    }

    fn start_reading(&mut self) -> ReaderResult<()> {
        if let Some(error) = self.start_error.take() {
            self.status = ReaderStatus::Failed;
            return Err(error);
        }
        self.status = ReaderStatus::Reading;
        Ok(())
    }

    fn status(&self) -> ReaderStatus {
        self.status
    }

    fn copy_next_frame(&mut self) -> Option<Frame> {
        if self.status != ReaderStatus::Reading {
            return None;
        }
        match self.frames.pop_front() {
            Some(frame) => {
                self.pulled.fetch_add(1, Ordering::SeqCst);
                Some(frame)
            }
            None => {
                self.status = ReaderStatus::Completed;
                None
            }
        }
    }

    fn cancel_reading(&mut self) {
        if matches!(self.status, ReaderStatus::Unknown | ReaderStatus::Reading) {
            self.status = ReaderStatus::Cancelled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTime, Nv12Buffer};

    fn frames(count: u64) -> Vec<Frame> {
        (0..count)
            .map(|i| {
                Frame::new(
                    2,
                    2,
                    MediaTime::from_frame_index(i, 30),
                    Nv12Buffer::solid(2, 2, 16, 128, 128),
                )
            })
            .collect()
    }

    #[test]
    fn test_reads_until_exhausted() {
        let mut reader = MemoryReader::new(frames(2));
        assert!(pollster::block_on(reader.load_metadata()).is_ok());
        assert_eq!(reader.copy_next_frame().map(|_| ()), None);

        reader.start_reading().unwrap();
        assert_eq!(reader.status(), ReaderStatus::Reading);
        assert_eq!(
            reader.copy_next_frame().map(|f| f.presentation_time),
            Some(MediaTime::new(0, 30))
        );
        assert!(reader.copy_next_frame().is_some());
        assert!(reader.copy_next_frame().is_none());
        assert_eq!(reader.status(), ReaderStatus::Completed);
        assert_eq!(reader.pulled_counter().load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_scripted_failures() {
        let mut reader =
            MemoryReader::new(frames(1)).with_metadata_error(ReaderError::NoVideoTrack);
        assert_eq!(
            pollster::block_on(reader.load_metadata()),
            Err(ReaderError::NoVideoTrack)
        );

        let mut reader = MemoryReader::new(frames(1))
            .with_start_error(ReaderError::StartFailed("busy".to_string()));
        assert!(reader.start_reading().is_err());
        assert_eq!(reader.status(), ReaderStatus::Failed);
    }

    #[test]
    fn test_cancel_stops_frames() {
        let mut reader = MemoryReader::new(frames(3));
        reader.start_reading().unwrap();
        assert!(reader.copy_next_frame().is_some());
        reader.cancel_reading();
        assert_eq!(reader.status(), ReaderStatus::Cancelled);
        assert!(reader.copy_next_frame().is_none());
        assert_eq!(reader.remaining(), 2);
    }
}
