// SPDX-License-Identifier: GPL-3.0-only

//! Frame sources for the pump
//!
//! A reader demuxes and decodes a container and hands out NV12 [`Frame`]s
//! one at a time. Container handling stays behind the [`MovieReader`] trait;
//! the pump only relies on the contract below.

mod memory;
mod pattern;

#[cfg(feature = "gstreamer")]
mod gstreamer;

pub use memory::MemoryReader;
pub use pattern::test_pattern;

#[cfg(feature = "gstreamer")]
pub use self::gstreamer::GstMovieReader;

use crate::errors::ReaderResult;
use crate::media::Frame;
use futures::future::BoxFuture;

/// Reader lifecycle as observed by the pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStatus {
    /// Constructed, reading not started yet
    Unknown,
    Reading,
    Completed,
    Failed,
    Cancelled,
}

/// Source of decoded frames
pub trait MovieReader: Send {
    /// Load container metadata. Resolves once tracks are known; must succeed
    /// before [`MovieReader::start_reading`] is called.
    fn load_metadata(&mut self) -> BoxFuture<'_, ReaderResult<()>>;

    /// Enter the reading state
    fn start_reading(&mut self) -> ReaderResult<()>;

    fn status(&self) -> ReaderStatus;

    /// Next decoded frame, or `None` once the stream is exhausted
    fn copy_next_frame(&mut self) -> Option<Frame>;

    /// Stop reading. Later calls to [`MovieReader::copy_next_frame`] return
    /// `None`.
    fn cancel_reading(&mut self);
}
