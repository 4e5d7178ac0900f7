// SPDX-License-Identifier: MPL-2.0

//! Movie input - NV12 movie frames to oriented RGB framebuffers
//!
//! Decoded frames are uploaded as luma/chroma planes, converted to RGB and
//! rotated into their display orientation on a dedicated GPU thread, then
//! pushed to downstream consumers, optionally paced to the stream's
//! presentation timestamps.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`media`]: Frames, timestamps and orientations
//! - [`readers`]: Frame sources behind the [`readers::MovieReader`] trait
//! - [`gpu`]: Render backends, the framebuffer pool and the GPU thread
//! - [`shaders`]: Shader programs and the conversion/rotation stages
//! - [`pipeline`]: The frame pump and its target graph
//! - [`sinks`]: Ready-made consumers
//! - [`config`]: Pump configuration
//!
//! # Example
//!
//! ```no_run
//! use movie_input::readers::{MemoryReader, test_pattern};
//! use movie_input::sinks::FrameCollector;
//! use movie_input::{FramePump, PumpConfig};
//! use std::sync::Arc;
//!
//! let reader = MemoryReader::new(test_pattern(640, 480, 30, 30));
//! let mut pump = FramePump::with_reader(Box::new(reader), PumpConfig::default())?;
//! let collector = Arc::new(FrameCollector::new());
//! pump.add_target(collector.clone(), 0);
//! pump.start(None);
//! pump.wait();
//! assert_eq!(collector.len(), 30);
//! # Ok::<(), movie_input::PipelineError>(())
//! ```

pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod media;
pub mod pipeline;
pub mod readers;
pub mod shaders;
pub mod sinks;

// Re-export commonly used types
pub use config::PumpConfig;
pub use errors::{PipelineError, PipelineResult, ReaderError, ReaderResult};
pub use gpu::{BackendPreference, Framebuffer, ProcessingQueue, RenderContext};
pub use media::{Frame, MediaTime, Orientation};
pub use pipeline::{FramePump, ImageConsumer, PumpState};
pub use shaders::ConversionMatrix;
