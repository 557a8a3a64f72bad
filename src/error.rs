//! Error taxonomy for the engine (spec ch. 7).

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening a container or constructing an `Engine`.
///
/// Fatal to `Engine::load` — no partial engine is ever returned.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("container {path:?} is malformed: {reason}")]
    ContainerMalformed { path: PathBuf, reason: String },

    #[error("architecture {0:?} is not registered")]
    UnsupportedArchitecture(String),

    #[error("missing required tensor {0:?}")]
    MissingRequiredTensor(String),

    #[error("element type tag {0} has no decoder")]
    UnsupportedElementType(u32),

    #[error("gpu device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by a single `generate` call. Never mutates shared engine state.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("context overflow: position {position} + generated {generated} >= max {max}")]
    ContextOverflow {
        position: usize,
        generated: usize,
        max: usize,
    },

    #[error("generation cancelled")]
    Cancelled,
}

/// GPU-path errors. Always recoverable: the caller downgrades to the CPU kernel
/// for that call and the engine keeps running.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("gpu device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("kernel build failed: {0}")]
    KernelBuildFailed(String),

    #[error("kernel enqueue failed: {0}")]
    KernelEnqueueFailed(String),
}

/// Raised internally by the sampler when every probability is filtered to
/// zero; callers never see this, it is a recovery signal (spec ch. 7): the
/// sampler falls back to the argmax of the un-filtered distribution.
#[derive(Debug, Error)]
#[error("sampler filtered every probability to zero")]
pub struct SamplerInvalidDistribution;
