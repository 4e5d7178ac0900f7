// SPDX-License-Identifier: GPL-3.0-only

use crate::gpu::{Framebuffer, RenderContext};
use crate::media::MediaTime;
use crate::pipeline::ImageConsumer;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One delivery seen by a [`FrameCollector`]
#[derive(Debug, Clone)]
pub struct CollectedFrame {
    pub framebuffer_id: u64,
    pub width: u32,
    pub height: u32,
    pub slot: usize,
    pub timestamp: Option<MediaTime>,
    /// Lock count at delivery, including this consumer's lock
    pub lock_count: u32,
    pub received_at: Instant,
    /// RGBA pixels, only when pixel capture is enabled
    pub pixels: Option<Vec<u8>>,
}

#[derive(Default)]
struct CollectorState {
    frames: Vec<CollectedFrame>,
    held: Vec<Framebuffer>,
}

/// Consumer recording every framebuffer it receives
///
/// By default each framebuffer is unlocked as soon as it has been recorded.
/// A holding collector keeps its locks until [`FrameCollector::release_held`]
/// runs on the GPU thread.
#[derive(Default)]
pub struct FrameCollector {
    state: Mutex<CollectorState>,
    arrived: Condvar,
    capture_pixels: bool,
    hold: bool,
}

impl FrameCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every frame back to CPU memory on arrival
    pub fn with_pixels(mut self) -> Self {
        self.capture_pixels = true;
        self
    }

    /// Keep received framebuffers locked
    pub fn holding(mut self) -> Self {
        self.hold = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn frames(&self) -> Vec<CollectedFrame> {
        self.state().frames.clone()
    }

    pub fn len(&self) -> usize {
        self.state().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().frames.is_empty()
    }

    /// Framebuffers still locked by a holding collector
    pub fn held(&self) -> Vec<Framebuffer> {
        self.state().held.clone()
    }

    /// Unlock every held framebuffer, returning how many were released
    pub fn release_held(&self) -> usize {
        let held = std::mem::take(&mut self.state().held);
        for framebuffer in &held {
            framebuffer.unlock();
        }
        held.len()
    }

    /// Block until at least `count` frames arrived or `timeout` passed
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let state = self.state();
        let (state, _) = self
            .arrived
            .wait_timeout_while(state, timeout, |state| state.frames.len() < count)
            .unwrap_or_else(|e| e.into_inner());
        state.frames.len() >= count
    }
}

impl ImageConsumer for FrameCollector {
    fn new_framebuffer_available(
        &self,
        framebuffer: Framebuffer,
        slot: usize,
        context: &mut RenderContext,
    ) {
        let received_at = Instant::now();
        let pixels = if self.capture_pixels {
            match context.read_pixels(&framebuffer) {
                Ok(pixels) => Some(pixels),
                Err(e) => {
                    warn!(framebuffer = framebuffer.id(), error = %e, "Readback failed");
                    None
                }
            }
        } else {
            None
        };

        let collected = CollectedFrame {
            framebuffer_id: framebuffer.id(),
            width: framebuffer.width(),
            height: framebuffer.height(),
            slot,
            timestamp: framebuffer.timestamp(),
            lock_count: framebuffer.lock_count(),
            received_at,
            pixels,
        };
        debug!(
            framebuffer = collected.framebuffer_id,
            width = collected.width,
            height = collected.height,
            slot,
            "Collected frame"
        );

        let mut state = self.state();
        state.frames.push(collected);
        if self.hold {
            state.held.push(framebuffer);
        } else {
            framebuffer.unlock();
        }
        drop(state);
        self.arrived.notify_all();
    }
}
