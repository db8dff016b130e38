//! Sampling: deciding whether a trace is recorded at all.
//!
//! The decision is made exactly once, when the root span of a trace is
//! created. Child spans inherit the root's decision through their
//! [`SpanContext`] and are never re-sampled, so a trace is always recorded
//! in full or not at all.
//!
//! [`SpanContext`]: crate::span_context::SpanContext

use crate::error::ConfigError;
use crate::span_context::TraceId;

/// The decision returned by a [`Sampler`] for a new root span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingDecision {
    /// Record the span and export it on end.
    RecordAndSample,
    /// Create a non-recording span; mutations and end are no-ops.
    Drop,
}

/// Built-in sampling policies.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Sampler {
    /// Always sample the trace.
    AlwaysOn,
    /// Never sample the trace.
    AlwaysOff,
    /// Sample a given fraction of traces.
    ///
    /// The decision is derived deterministically from the trace id, so
    /// evaluating the sampler repeatedly for the same trace always yields the
    /// same answer. Ratios outside `[0.0, 1.0]` are rejected when the owning
    /// [`TracerProvider`] is built.
    ///
    /// [`TracerProvider`]: crate::provider::TracerProvider
    TraceIdRatioBased(f64),
}

impl Sampler {
    /// Returns the sampling decision for a new trace with the given id.
    pub fn should_sample(&self, trace_id: TraceId) -> SamplingDecision {
        match self {
            Sampler::AlwaysOn => SamplingDecision::RecordAndSample,
            Sampler::AlwaysOff => SamplingDecision::Drop,
            Sampler::TraceIdRatioBased(ratio) => sample_based_on_probability(ratio, trace_id),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Sampler::TraceIdRatioBased(ratio) if !(0.0..=1.0).contains(ratio) => {
                Err(ConfigError::InvalidSamplerRatio(*ratio))
            }
            _ => Ok(()),
        }
    }
}

impl Default for Sampler {
    /// Sample everything, matching the behavior of a ratio of 1.0.
    fn default() -> Self {
        Sampler::AlwaysOn
    }
}

fn sample_based_on_probability(prob: &f64, trace_id: TraceId) -> SamplingDecision {
    if *prob >= 1.0 {
        SamplingDecision::RecordAndSample
    } else {
        let prob_upper_bound = (prob.max(0.0) * (1u64 << 63) as f64) as u64;
        let bytes = trace_id.to_bytes();
        let (_, low) = bytes.split_at(8);
        let trace_id_low = u64::from_be_bytes(low.try_into().unwrap_or_default());
        let rnd_from_trace_id = trace_id_low >> 1;

        if rnd_from_trace_id < prob_upper_bound {
            SamplingDecision::RecordAndSample
        } else {
            SamplingDecision::Drop
        }
    }
}
