//! Error types surfaced by the engine's own lifecycle operations.
//!
//! These errors only ever describe the tracing pipeline itself. Failures
//! inside traced business logic pass through [`Tracer::trace`] untouched, and
//! export failures are swallowed into the dropped-span counters rather than
//! raised to span producers.
//!
//! [`Tracer::trace`]: crate::tracer::Tracer::trace

use std::time::Duration;
use thiserror::Error;

/// Invalid configuration detected while building a [`TracerProvider`] or a
/// batch pipeline. Fatal to startup by design: a misconfigured engine fails
/// fast instead of silently mis-sampling or mis-buffering.
///
/// [`TracerProvider`]: crate::provider::TracerProvider
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The trace-id ratio sampler only accepts ratios within `[0.0, 1.0]`.
    #[error("sampler ratio {0} is outside the valid range [0.0, 1.0]")]
    InvalidSamplerRatio(f64),

    /// The span buffer must be able to hold at least one span.
    #[error("buffer capacity must be greater than zero")]
    InvalidBufferCapacity,

    /// Export batches must contain at least one span.
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,
}

/// Failure of a flush or shutdown operation.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SdkError {
    /// The operation was invoked after shutdown had already completed.
    #[error("already shut down")]
    AlreadyShutdown,

    /// The exporter rejected a batch, or retries were exhausted.
    #[error("export failed (retryable: {retryable})")]
    ExportFailed {
        /// Whether the exporter reported the failure as transient.
        retryable: bool,
    },

    /// The operation did not complete within its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Other failures not covered by the variants above.
    #[error("{0}")]
    InternalFailure(String),
}

/// Result of engine lifecycle operations.
pub type SdkResult<T = ()> = Result<T, SdkError>;
