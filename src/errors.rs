// SPDX-License-Identifier: MPL-2.0

//! Error types for the movie input pipeline
//!
//! Construction errors propagate to the caller. Everything raised while a
//! stream is running is logged by the frame pump and only drops the frame
//! that produced it.

use std::fmt;

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type alias using ReaderError
pub type ReaderResult<T> = Result<T, ReaderError>;

/// Result type alias using ConfigError
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised by the GPU side of the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// No render backend could be created
    BackendUnavailable(String),
    /// A shader program failed to compile or link
    ShaderCompilation { label: String, message: String },
    /// A texture or framebuffer could not be allocated
    Allocation(String),
    /// A texture-only framebuffer was used as a render destination
    TextureOnlyDestination,
    /// The number of bound inputs does not match the program
    InputCountMismatch { expected: usize, actual: usize },
    /// A uniform declared by the program was not supplied
    MissingUniform(String),
    /// A uniform was supplied with the wrong type
    UniformType { name: String, expected: &'static str },
    /// An unknown texture or program handle was used
    UnknownHandle(String),
    /// Plane data did not fit the destination texture
    Upload(String),
    /// Reading pixels back from the GPU failed
    Readback(String),
    /// Frame-level failure surfaced inside a GPU job
    Frame(FrameError),
    /// A job panicked on the GPU thread; the thread itself keeps running
    JobPanicked(String),
    /// The GPU-owning context has shut down
    ContextClosed,
}

/// Errors raised by the reader collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderError {
    /// Container metadata could not be loaded
    MetadataUnavailable(String),
    /// The reader refused to enter its reading state
    StartFailed(String),
    /// The container holds no video track
    NoVideoTrack,
    /// Backend error (e.g. GStreamer)
    Backend(String),
}

/// Errors raised while accessing a decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    /// The sample carried no image buffer
    MissingImageBuffer,
    /// A plane was absent or shorter than its declared size
    MissingPlane(usize),
    /// The pixel buffer could not be locked for CPU access
    LockFailed(String),
}

/// Errors raised while loading or saving a pump configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The file could not be read or written
    Io(String),
    /// The file is not a valid configuration
    Parse(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::BackendUnavailable(msg) => {
                write!(f, "No render backend available: {}", msg)
            }
            PipelineError::ShaderCompilation { label, message } => {
                write!(f, "Shader '{}' failed to compile: {}", label, message)
            }
            PipelineError::Allocation(msg) => write!(f, "Framebuffer allocation failed: {}", msg),
            PipelineError::TextureOnlyDestination => {
                write!(f, "Texture-only framebuffer cannot be a render destination")
            }
            PipelineError::InputCountMismatch { expected, actual } => write!(
                f,
                "Program expects {} input textures, got {}",
                expected, actual
            ),
            PipelineError::MissingUniform(name) => write!(f, "Uniform '{}' not set", name),
            PipelineError::UniformType { name, expected } => {
                write!(f, "Uniform '{}' must be a {}", name, expected)
            }
            PipelineError::UnknownHandle(msg) => write!(f, "Unknown GPU handle: {}", msg),
            PipelineError::Upload(msg) => write!(f, "Plane upload failed: {}", msg),
            PipelineError::Readback(msg) => write!(f, "Pixel readback failed: {}", msg),
            PipelineError::Frame(e) => write!(f, "Frame error: {}", e),
            PipelineError::JobPanicked(msg) => write!(f, "GPU job panicked: {}", msg),
            PipelineError::ContextClosed => write!(f, "GPU processing context is closed"),
        }
    }
}

impl fmt::Display for ReaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderError::MetadataUnavailable(msg) => {
                write!(f, "Movie metadata unavailable: {}", msg)
            }
            ReaderError::StartFailed(msg) => write!(f, "Couldn't start reading: {}", msg),
            ReaderError::NoVideoTrack => write!(f, "No video track found"),
            ReaderError::Backend(msg) => write!(f, "Reader backend error: {}", msg),
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::MissingImageBuffer => write!(f, "Sample has no image buffer"),
            FrameError::MissingPlane(index) => write!(f, "Plane {} is missing or short", index),
            FrameError::LockFailed(msg) => write!(f, "Failed to lock pixel buffer: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Configuration I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for ReaderError {}
impl std::error::Error for FrameError {}

impl From<FrameError> for PipelineError {
    fn from(err: FrameError) -> Self {
        PipelineError::Frame(err)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
