// SPDX-License-Identifier: GPL-3.0-only

//! Reference-counted framebuffers

use super::{BoundTexture, TextureFormat, TextureId};
use crate::media::{MediaTime, Orientation};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;

/// Pool lookup key: buffers are only reused for identical keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    /// Sampled from but never rendered into
    pub texture_only: bool,
    pub format: TextureFormat,
}

#[derive(Debug)]
pub(super) struct FramebufferSlot {
    pub(super) id: u64,
    pub(super) key: FramebufferKey,
    pub(super) texture: TextureId,
    pub(super) lock_count: AtomicU32,
}

impl FramebufferSlot {
    pub(super) fn new(id: u64, key: FramebufferKey, texture: TextureId) -> Self {
        Self {
            id,
            key,
            texture,
            lock_count: AtomicU32::new(0),
        }
    }

    /// Claim a free slot, moving its lock count from 0 to 1
    pub(super) fn try_claim(&self) -> bool {
        self.lock_count
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(super) fn is_free(&self) -> bool {
        self.lock_count.load(Ordering::Acquire) == 0
    }
}

/// Handle to a pooled GPU texture
///
/// Cloning the handle does not take a lock. Every holder that needs the
/// contents to stay intact calls [`Framebuffer::lock`] and later
/// [`Framebuffer::unlock`]; the pool only hands the buffer out again once
/// the count is back at zero.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    slot: Arc<FramebufferSlot>,
    timestamp: Option<MediaTime>,
}

impl Framebuffer {
    pub(super) fn from_slot(slot: Arc<FramebufferSlot>) -> Self {
        Self {
            slot,
            timestamp: None,
        }
    }

    /// Pool-unique identifier of the underlying buffer
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    pub fn key(&self) -> FramebufferKey {
        self.slot.key
    }

    pub fn width(&self) -> u32 {
        self.slot.key.width
    }

    pub fn height(&self) -> u32 {
        self.slot.key.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.slot.key.width, self.slot.key.height)
    }

    pub fn orientation(&self) -> Orientation {
        self.slot.key.orientation
    }

    pub fn is_texture_only(&self) -> bool {
        self.slot.key.texture_only
    }

    pub fn format(&self) -> TextureFormat {
        self.slot.key.format
    }

    pub(crate) fn texture(&self) -> TextureId {
        self.slot.texture
    }

    /// Presentation time of the frame this buffer holds, if any
    pub fn timestamp(&self) -> Option<MediaTime> {
        self.timestamp
    }

    pub fn with_timestamp(mut self, timestamp: MediaTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn lock(&self) {
        self.slot.lock_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one lock. Unlocking an already free buffer is ignored.
    pub fn unlock(&self) {
        let result = self
            .slot
            .lock_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
        if result.is_err() {
            warn!(
                framebuffer = self.slot.id,
                "Unlocked a framebuffer that holds no locks"
            );
        }
    }

    pub fn lock_count(&self) -> u32 {
        self.slot.lock_count.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same pooled buffer
    pub fn same_buffer(&self, other: &Framebuffer) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Bind this buffer as a shader input for a destination in `target`
    /// orientation
    pub fn bound_for(&self, target: Orientation) -> BoundTexture {
        BoundTexture {
            texture: self.slot.texture,
            coordinates: self
                .orientation()
                .rotation_needed_for(target)
                .texture_coordinates(),
        }
    }
}
