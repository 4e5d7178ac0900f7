// SPDX-License-Identifier: GPL-3.0-only

//! Framebuffer pool keyed by size, orientation, usage and format

use super::framebuffer::FramebufferSlot;
use super::{Framebuffer, FramebufferKey, RenderBackend, TextureDescriptor};
use crate::errors::{PipelineError, PipelineResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently owned by the pool
    pub allocated: usize,
    /// Buffers with a non-zero lock count
    pub in_use: usize,
}

/// Hands out framebuffers, reusing any whose lock count has dropped to zero
#[derive(Debug, Default)]
pub struct FramebufferPool {
    slots: HashMap<FramebufferKey, Vec<Arc<FramebufferSlot>>>,
    next_id: u64,
}

impl FramebufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a buffer matching `key`, allocating one if none is free
    ///
    /// The returned buffer already holds one lock on behalf of the caller.
    pub fn acquire(
        &mut self,
        backend: &mut dyn RenderBackend,
        key: FramebufferKey,
    ) -> PipelineResult<Framebuffer> {
        if key.width == 0 || key.height == 0 {
            return Err(PipelineError::Allocation(format!(
                "zero-sized framebuffer {}x{}",
                key.width, key.height
            )));
        }

        let slots = self.slots.entry(key).or_default();
        if let Some(slot) = slots.iter().find(|slot| slot.try_claim()) {
            return Ok(Framebuffer::from_slot(Arc::clone(slot)));
        }

        let texture = backend.create_texture(&TextureDescriptor {
            width: key.width,
            height: key.height,
            format: key.format,
            render_target: !key.texture_only,
        })?;
        self.next_id += 1;
        debug!(
            framebuffer = self.next_id,
            width = key.width,
            height = key.height,
            orientation = %key.orientation,
            texture_only = key.texture_only,
            format = ?key.format,
            "Allocated framebuffer"
        );

        let slot = Arc::new(FramebufferSlot::new(self.next_id, key, texture));
        let claimed = slot.try_claim();
        debug_assert!(claimed);
        slots.push(Arc::clone(&slot));
        Ok(Framebuffer::from_slot(slot))
    }

    /// Destroy every buffer that is not currently locked
    pub fn purge_unused(&mut self, backend: &mut dyn RenderBackend) -> usize {
        let mut purged = 0;
        for slots in self.slots.values_mut() {
            slots.retain(|slot| {
                if slot.is_free() {
                    backend.destroy_texture(slot.texture);
                    purged += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.slots.retain(|_, slots| !slots.is_empty());
        if purged > 0 {
            debug!(purged, "Purged unused framebuffers");
        }
        purged
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();
        for slot in self.slots.values().flatten() {
            stats.allocated += 1;
            if !slot.is_free() {
                stats.in_use += 1;
            }
        }
        stats
    }
}
