// SPDX-License-Identifier: GPL-3.0-only
//! Read loop thread
//!
//! Reading happens on its own named thread so that metadata loading and
//! pacing sleeps never occupy the GPU processing thread. The loop itself has
//! no stop flag: each step decides whether reading goes on.

use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// What the read loop does after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Pull the next frame
    Continue,
    /// Reading is over
    Stop,
}

/// Handle to a running read loop
pub struct ReadLoopController {
    thread_handle: Option<JoinHandle<()>>,
    name: String,
}

impl ReadLoopController {
    /// Spawn the read loop on a thread called `name`
    ///
    /// `setup` runs first on the new thread and produces the loop's state;
    /// if it fails nothing is read. `step` then runs until it returns
    /// [`LoopAction::Stop`].
    pub fn spawn<S, I, F>(name: &str, setup: I, mut step: F) -> std::io::Result<Self>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let thread_name = name.to_string();

        let thread_handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut state = match setup() {
                Ok(state) => state,
                Err(e) => {
                    warn!(name = %thread_name, error = %e, "Couldn't start reading");
                    return;
                }
            };

            let mut steps: u64 = 0;
            while step(&mut state) == LoopAction::Continue {
                steps += 1;
            }
            debug!(name = %thread_name, steps, "Read loop finished");
        })?;

        info!(name = %name, "Read loop spawned");
        Ok(Self {
            thread_handle: Some(thread_handle),
            name: name.to_string(),
        })
    }

    /// Whether the loop thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the loop to end
    ///
    /// Returns immediately when called from the loop thread itself.
    pub fn join(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if let Err(e) = handle.join() {
            warn!(name = %self.name, "Read loop thread panicked: {:?}", e);
        }
    }
}

impl Drop for ReadLoopController {
    fn drop(&mut self) {
        self.join();
    }
}
