// SPDX-License-Identifier: GPL-3.0-only

//! Downstream target graph
//!
//! Finished framebuffers are pushed to every registered (consumer, slot)
//! edge in registration order. Each edge receives its own lock on the
//! framebuffer and owns the matching unlock.

use crate::gpu::{Framebuffer, RenderContext};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, trace};

/// A downstream stage receiving finished frames
///
/// Called on the GPU processing thread. The framebuffer arrives locked once
/// on behalf of this consumer, which must call [`Framebuffer::unlock`]
/// exactly once when it no longer needs the pixels. The context may be used
/// for GPU work such as readback, but must not be used to submit jobs to the
/// processing queue.
pub trait ImageConsumer: Send + Sync {
    fn new_framebuffer_available(
        &self,
        framebuffer: Framebuffer,
        slot: usize,
        context: &mut RenderContext,
    );
}

type Edge = (Arc<dyn ImageConsumer>, usize);

/// Ordered set of (consumer, slot) edges
#[derive(Clone, Default)]
pub struct TargetContainer {
    edges: Arc<Mutex<Vec<Edge>>>,
}

impl TargetContainer {
    pub fn new() -> Self {
        Self::default()
    }

    fn edges(&self) -> MutexGuard<'_, Vec<Edge>> {
        self.edges.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `consumer` on input `slot`
    ///
    /// Returns `false` if the same edge is already registered.
    pub fn add(&self, consumer: Arc<dyn ImageConsumer>, slot: usize) -> bool {
        let mut edges = self.edges();
        let exists = edges
            .iter()
            .any(|(existing, existing_slot)| {
                *existing_slot == slot && Arc::ptr_eq(existing, &consumer)
            });
        if exists {
            return false;
        }
        edges.push((consumer, slot));
        true
    }

    pub fn remove_all(&self) {
        self.edges().clear();
    }

    pub fn len(&self) -> usize {
        self.edges().len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges().is_empty()
    }

    /// Lock `framebuffer` once per edge and deliver it
    ///
    /// The caller's own lock is not touched. With no edges the buffer is
    /// left exactly as it was handed in. A consumer that panics has its lock
    /// released and the remaining edges are still served.
    pub fn publish(&self, framebuffer: &Framebuffer, context: &mut RenderContext) {
        // Consumers may register further targets while being called
        let edges: Vec<Edge> = self.edges().clone();
        for (consumer, slot) in edges {
            framebuffer.lock();
            trace!(framebuffer = framebuffer.id(), slot, "Publishing framebuffer");
            let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| {
                consumer.new_framebuffer_available(framebuffer.clone(), slot, context)
            }));
            if delivered.is_err() {
                error!(
                    framebuffer = framebuffer.id(),
                    slot, "Image consumer panicked, releasing its lock"
                );
                framebuffer.unlock();
            }
        }
    }
}

impl std::fmt::Debug for TargetContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetContainer")
            .field("edges", &self.len())
            .finish()
    }
}
