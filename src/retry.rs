//! Bounded exponential backoff for export retries.

use std::time::{Duration, SystemTime};

/// Configuration for retrying failed exports.
///
/// `max_attempts` bounds the *total* number of export attempts for one
/// batch, the first try included. Retries are bounded on purpose: under a
/// sustained backend outage, unbounded requeueing would turn the exporter
/// into a memory leak, so exhausted batches are dropped and counted instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum total number of attempts per batch.
    pub max_attempts: usize,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for the delay between retries, in milliseconds.
    pub max_delay_ms: u64,
    /// Maximum random jitter added to each delay, in milliseconds.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 3_000,
            jitter_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Returns the (unbounded) sequence of backoff delays for this policy;
    /// callers bound it with `max_attempts`.
    pub(crate) fn delays(&self) -> Backoff {
        Backoff {
            next_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_ms: self.jitter_ms,
        }
    }
}

/// An iterator over exponentially growing, jittered, capped delays.
#[derive(Debug)]
pub(crate) struct Backoff {
    next_delay_ms: u64,
    max_delay_ms: u64,
    jitter_ms: u64,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let jitter = generate_jitter(self.jitter_ms);
        let delay = self
            .next_delay_ms
            .saturating_add(jitter)
            .min(self.max_delay_ms.max(1));
        self.next_delay_ms = self.next_delay_ms.saturating_mul(2).min(self.max_delay_ms);
        Some(Duration::from_millis(delay))
    }
}

// Derives jitter from the clock's sub-second noise rather than pulling in a
// stateful RNG on the export path.
fn generate_jitter(max_jitter: u64) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    nanos as u64 % (max_jitter + 1)
}
