// SPDX-License-Identifier: GPL-3.0-only

//! Serial GPU processing context
//!
//! A dedicated thread owns the [`RenderContext`]. Other threads submit jobs
//! and block until the job has run, so all GPU work happens in submission
//! order on one thread.

use super::{BackendKind, BackendPreference, RenderBackend, RenderContext, create_backend};
use crate::constants::threads;
use crate::errors::{PipelineError, PipelineResult};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce(&mut RenderContext) + Send>;

struct QueueInner {
    sender: Option<mpsc::Sender<Job>>,
    thread_handle: Option<JoinHandle<()>>,
    backend_kind: BackendKind,
    adapter_name: String,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop
        self.sender.take();
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Last handle dropped from inside a job; the loop exits on its own
                return;
            }
            debug!("Waiting for GPU processing thread to finish");
            if let Err(e) = handle.join() {
                warn!("GPU processing thread panicked: {:?}", e);
            }
        }
    }
}

/// Handle to the GPU processing thread
///
/// Clones share the same thread. The thread exits once the last handle is
/// dropped.
#[derive(Clone)]
pub struct ProcessingQueue {
    inner: Arc<QueueInner>,
}

impl ProcessingQueue {
    /// Start the processing thread around an existing backend
    pub fn new(backend: Box<dyn RenderBackend>) -> PipelineResult<Self> {
        let backend_kind = backend.kind();
        let adapter_name = backend.adapter_name();
        let (sender, receiver) = mpsc::channel::<Job>();

        info!(backend = %backend_kind, adapter = %adapter_name, "Starting GPU processing thread");

        let thread_handle = thread::Builder::new()
            .name(threads::PROCESSING.to_string())
            .spawn(move || {
                let mut context = RenderContext::new(backend);
                while let Ok(job) = receiver.recv() {
                    job(&mut context);
                }
                debug!("GPU processing thread exiting");
            })
            .map_err(|e| {
                PipelineError::BackendUnavailable(format!("failed to spawn GPU thread: {}", e))
            })?;

        Ok(Self {
            inner: Arc::new(QueueInner {
                sender: Some(sender),
                thread_handle: Some(thread_handle),
                backend_kind,
                adapter_name,
            }),
        })
    }

    /// Create a backend according to `preference` and start the thread
    pub fn with_preference(preference: BackendPreference) -> PipelineResult<Self> {
        Self::new(create_backend(preference)?)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.backend_kind
    }

    pub fn adapter_name(&self) -> &str {
        &self.inner.adapter_name
    }

    /// Run `job` on the processing thread and wait for its result
    ///
    /// Must not be called from inside another job.
    pub fn run_sync<R, F>(&self, job: F) -> PipelineResult<R>
    where
        F: FnOnce(&mut RenderContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let sender = self
            .inner
            .sender
            .as_ref()
            .ok_or(PipelineError::ContextClosed)?;
        let (result_sender, result_receiver) = futures::channel::oneshot::channel();

        sender
            .send(Box::new(move |context: &mut RenderContext| {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| job(context)))
                    .map_err(|payload| {
                        let message = panic_message(payload.as_ref());
                        error!(message = %message, "GPU job panicked");
                        message
                    });
                let _ = result_sender.send(outcome);
            }))
            .map_err(|_| PipelineError::ContextClosed)?;

        pollster::block_on(result_receiver)
            .map_err(|_| PipelineError::ContextClosed)?
            .map_err(PipelineError::JobPanicked)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for ProcessingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingQueue")
            .field("backend", &self.inner.backend_kind)
            .field("adapter", &self.inner.adapter_name)
            .finish()
    }
}
