//! Engine configuration.
//!
//! Configuration is supplied programmatically by the embedding host via the
//! [`TracerProvider`] and batch-processor builders; the batch knobs can also
//! be overridden through `MICROTRACE_*` environment variables.
//!
//! [`TracerProvider`]: crate::provider::TracerProvider

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::id_generator::{IdGenerator, RandomIdGenerator};
use crate::resource::Resource;
use crate::retry::RetryPolicy;
use crate::sampler::Sampler;

/// Environment variable overriding the span buffer capacity.
pub(crate) const MICROTRACE_BUFFER_CAPACITY: &str = "MICROTRACE_BUFFER_CAPACITY";
/// Default span buffer capacity.
pub(crate) const MICROTRACE_BUFFER_CAPACITY_DEFAULT: usize = 2_048;
/// Environment variable overriding the maximum export batch size.
pub(crate) const MICROTRACE_BATCH_SIZE: &str = "MICROTRACE_BATCH_SIZE";
/// Default maximum export batch size.
pub(crate) const MICROTRACE_BATCH_SIZE_DEFAULT: usize = 512;
/// Environment variable overriding the maximum delay before an export, in
/// milliseconds.
pub(crate) const MICROTRACE_MAX_DELAY: &str = "MICROTRACE_MAX_DELAY";
/// Default maximum delay before an export.
pub(crate) const MICROTRACE_MAX_DELAY_DEFAULT: u64 = 5_000;
/// Environment variable overriding the export/flush timeout, in
/// milliseconds.
pub(crate) const MICROTRACE_EXPORT_TIMEOUT: &str = "MICROTRACE_EXPORT_TIMEOUT";
/// Default export/flush timeout.
pub(crate) const MICROTRACE_EXPORT_TIMEOUT_DEFAULT: u64 = 30_000;
/// Environment variable overriding the maximum export attempts per batch.
pub(crate) const MICROTRACE_MAX_RETRY_ATTEMPTS: &str = "MICROTRACE_MAX_RETRY_ATTEMPTS";

/// Provider-level configuration: sampling, id generation, identity, and the
/// master enable switch.
#[derive(Debug)]
pub struct Config {
    /// The sampler consulted for new root spans.
    pub sampler: Sampler,
    /// The id generator for new trace and span ids.
    pub id_generator: Box<dyn IdGenerator>,
    /// Attributes identifying the producing entity.
    pub resource: Resource,
    /// When `false`, tracers produce only non-recording spans.
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sampler: Sampler::default(),
            id_generator: Box::<RandomIdGenerator>::default(),
            resource: Resource::empty(),
            enabled: true,
        }
    }
}

/// What to evict when a span arrives at a full buffer.
///
/// Every eviction is counted against the dropped-span counter regardless of
/// policy; the policy only chooses the victim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DropPolicy {
    /// Evict the oldest buffered span to make room for the new one.
    #[default]
    DropOldest,
    /// Discard the newly arriving span and keep the buffer as is.
    DropNewest,
}

/// Batch span processor configuration.
///
/// Use [`BatchConfigBuilder`] to configure your own instance.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Maximum number of spans buffered between exports. Arrivals beyond
    /// this are shed according to the [`DropPolicy`].
    pub(crate) max_queue_size: usize,

    /// Number of buffered spans that triggers an export without waiting for
    /// the delay timer.
    pub(crate) max_export_batch_size: usize,

    /// Maximum time a buffered span waits before an export is triggered.
    pub(crate) scheduled_delay: Duration,

    /// How long flush callers wait for their acknowledgement.
    pub(crate) export_timeout: Duration,

    /// Retry behavior for retryable export failures.
    pub(crate) retry_policy: RetryPolicy,

    /// Eviction choice for arrivals at a full buffer.
    pub(crate) drop_policy: DropPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        // The builder's defaults are valid, so this cannot actually fail.
        BatchConfigBuilder::default()
            .build()
            .unwrap_or_else(|_| BatchConfig {
                max_queue_size: MICROTRACE_BUFFER_CAPACITY_DEFAULT,
                max_export_batch_size: MICROTRACE_BATCH_SIZE_DEFAULT,
                scheduled_delay: Duration::from_millis(MICROTRACE_MAX_DELAY_DEFAULT),
                export_timeout: Duration::from_millis(MICROTRACE_EXPORT_TIMEOUT_DEFAULT),
                retry_policy: RetryPolicy::default(),
                drop_policy: DropPolicy::default(),
            })
    }
}

/// A builder for [`BatchConfig`], initialized from defaults and `MICROTRACE_*`
/// environment variables.
#[derive(Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    max_export_batch_size: usize,
    scheduled_delay: Duration,
    export_timeout: Duration,
    retry_policy: RetryPolicy,
    drop_policy: DropPolicy,
}

impl Default for BatchConfigBuilder {
    fn default() -> Self {
        BatchConfigBuilder {
            max_queue_size: MICROTRACE_BUFFER_CAPACITY_DEFAULT,
            max_export_batch_size: MICROTRACE_BATCH_SIZE_DEFAULT,
            scheduled_delay: Duration::from_millis(MICROTRACE_MAX_DELAY_DEFAULT),
            export_timeout: Duration::from_millis(MICROTRACE_EXPORT_TIMEOUT_DEFAULT),
            retry_policy: RetryPolicy::default(),
            drop_policy: DropPolicy::default(),
        }
        .init_from_env_vars()
    }
}

impl BatchConfigBuilder {
    /// Sets the buffer capacity. Must be greater than zero.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Sets the batch-size export trigger. Values larger than the buffer
    /// capacity are clamped down to it at build time.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Sets the maximum delay a buffered span waits before export.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Sets how long flush callers wait for acknowledgement.
    pub fn with_export_timeout(mut self, export_timeout: Duration) -> Self {
        self.export_timeout = export_timeout;
        self
    }

    /// Sets the maximum total export attempts per batch.
    pub fn with_max_retry_attempts(mut self, max_attempts: usize) -> Self {
        self.retry_policy.max_attempts = max_attempts;
        self
    }

    /// Sets the full retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Sets the buffer-full eviction policy.
    pub fn with_drop_policy(mut self, drop_policy: DropPolicy) -> Self {
        self.drop_policy = drop_policy;
        self
    }

    /// Builds the configuration, validating the buffer bounds.
    pub fn build(self) -> Result<BatchConfig, ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::InvalidBufferCapacity);
        }
        if self.max_export_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }

        // A batch can never exceed the buffer it is drained from.
        let max_export_batch_size = self.max_export_batch_size.min(self.max_queue_size);

        Ok(BatchConfig {
            max_queue_size: self.max_queue_size,
            max_export_batch_size,
            scheduled_delay: self.scheduled_delay,
            export_timeout: self.export_timeout,
            retry_policy: self.retry_policy,
            drop_policy: self.drop_policy,
        })
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(max_queue_size) = parse_env::<usize>(MICROTRACE_BUFFER_CAPACITY) {
            self.max_queue_size = max_queue_size;
        }

        if let Some(max_export_batch_size) = parse_env::<usize>(MICROTRACE_BATCH_SIZE) {
            self.max_export_batch_size = max_export_batch_size;
        }

        if let Some(scheduled_delay) = parse_env::<u64>(MICROTRACE_MAX_DELAY) {
            self.scheduled_delay = Duration::from_millis(scheduled_delay);
        }

        if let Some(export_timeout) = parse_env::<u64>(MICROTRACE_EXPORT_TIMEOUT) {
            self.export_timeout = Duration::from_millis(export_timeout);
        }

        if let Some(max_attempts) = parse_env::<usize>(MICROTRACE_MAX_RETRY_ATTEMPTS) {
            self.retry_policy.max_attempts = max_attempts;
        }

        self
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| T::from_str(&value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_batch_config() {
        let env_vars = vec![
            MICROTRACE_BUFFER_CAPACITY,
            MICROTRACE_BATCH_SIZE,
            MICROTRACE_MAX_DELAY,
            MICROTRACE_EXPORT_TIMEOUT,
            MICROTRACE_MAX_RETRY_ATTEMPTS,
        ];

        let config = temp_env::with_vars_unset(env_vars, BatchConfig::default);

        assert_eq!(config.max_queue_size, MICROTRACE_BUFFER_CAPACITY_DEFAULT);
        assert_eq!(config.max_export_batch_size, MICROTRACE_BATCH_SIZE_DEFAULT);
        assert_eq!(
            config.scheduled_delay,
            Duration::from_millis(MICROTRACE_MAX_DELAY_DEFAULT)
        );
        assert_eq!(
            config.export_timeout,
            Duration::from_millis(MICROTRACE_EXPORT_TIMEOUT_DEFAULT)
        );
        assert_eq!(config.drop_policy, DropPolicy::DropOldest);
    }

    #[test]
    fn batch_config_configurable_by_env_vars() {
        let env_vars = vec![
            (MICROTRACE_BUFFER_CAPACITY, Some("4096")),
            (MICROTRACE_BATCH_SIZE, Some("1024")),
            (MICROTRACE_MAX_DELAY, Some("2000")),
            (MICROTRACE_EXPORT_TIMEOUT, Some("60000")),
            (MICROTRACE_MAX_RETRY_ATTEMPTS, Some("7")),
        ];

        let config = temp_env::with_vars(env_vars, BatchConfig::default);

        assert_eq!(config.max_queue_size, 4096);
        assert_eq!(config.max_export_batch_size, 1024);
        assert_eq!(config.scheduled_delay, Duration::from_millis(2000));
        assert_eq!(config.export_timeout, Duration::from_millis(60000));
        assert_eq!(config.retry_policy.max_attempts, 7);
    }

    #[test]
    fn batch_size_clamped_to_queue_size() {
        let config = BatchConfigBuilder::default()
            .with_max_queue_size(256)
            .with_max_export_batch_size(1024)
            .build()
            .unwrap();

        assert_eq!(config.max_queue_size, 256);
        assert_eq!(config.max_export_batch_size, 256);
    }

    #[test]
    fn zero_bounds_are_rejected() {
        assert_eq!(
            BatchConfigBuilder::default()
                .with_max_queue_size(0)
                .build()
                .unwrap_err(),
            ConfigError::InvalidBufferCapacity
        );
        assert_eq!(
            BatchConfigBuilder::default()
                .with_max_export_batch_size(0)
                .build()
                .unwrap_err(),
            ConfigError::InvalidBatchSize
        );
    }
}
