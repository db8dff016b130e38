//! # Tracer provider
//!
//! The `TracerProvider` is the process-wide entry point of the engine: it
//! owns the sampling and id-generation configuration, the [`Resource`]
//! identity, and the span processor pipeline, and it creates and memoizes
//! [`Tracer`]s. Construct exactly one per process, hand out tracers from it,
//! and call [`TracerProvider::shutdown`] at process exit so buffered spans
//! drain before the process disappears.
//!
//! Cloning a provider clones a handle, not the pipeline. When the last
//! handle drops without an explicit shutdown, shutdown runs then.
//!
//! # Examples
//!
//! ```
//! use microtrace::{InMemorySpanExporter, TracerProvider};
//!
//! let exporter = InMemorySpanExporter::default();
//! let provider = TracerProvider::builder()
//!     .with_service_name("checkout")
//!     .with_simple_exporter(exporter.clone())
//!     .build()
//!     .unwrap();
//!
//! let tracer = provider.tracer("demo");
//! tracer.add_span("request-received", vec![]);
//!
//! provider.shutdown().unwrap();
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::common::{InstrumentationScope, KeyValue};
use crate::config::{BatchConfig, Config};
use crate::error::{ConfigError, SdkError, SdkResult};
use crate::export::SpanExporter;
use crate::id_generator::IdGenerator;
use crate::resource::{Resource, SERVICE_NAME};
use crate::sampler::Sampler;
use crate::span_processor::{
    BatchSpanProcessor, SimpleSpanProcessor, SpanProcessor, DEFAULT_SHUTDOWN_TIMEOUT,
};
use crate::tracer::Tracer;

#[derive(Debug)]
pub(crate) struct TracerProviderInner {
    config: Config,
    processors: Vec<Box<dyn SpanProcessor>>,
    tracers: Mutex<HashMap<InstrumentationScope, Tracer>>,
    is_shutdown: AtomicBool,
}

impl TracerProviderInner {
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn span_processors(&self) -> &[Box<dyn SpanProcessor>] {
        &self.processors
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Relaxed)
    }

    /// Shuts down every processor, collecting the individual results.
    fn shutdown_processors(&self, timeout: Duration) -> Vec<SdkResult> {
        self.processors
            .iter()
            .map(|processor| processor.shutdown_with_timeout(timeout))
            .collect()
    }
}

impl Drop for TracerProviderInner {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            for result in self.shutdown_processors(DEFAULT_SHUTDOWN_TIMEOUT) {
                if let Err(err) = result {
                    tracing::debug!(
                        name: "TracerProvider.Drop.ShutdownError",
                        error = %err,
                        "processor shutdown failed during provider drop"
                    );
                }
            }
        }
    }
}

/// Creator and registry of [`Tracer`] instances, owner of the span pipeline.
#[derive(Clone, Debug)]
pub struct TracerProvider {
    inner: Arc<TracerProviderInner>,
}

impl TracerProvider {
    /// Create a new [`TracerProvider`] builder.
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// Returns the tracer for the given instrumentation name.
    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> Tracer {
        self.tracer_with_scope(InstrumentationScope::new(name))
    }

    /// Returns the tracer for the given scope, creating it on first request
    /// and returning the memoized instance afterwards.
    pub fn tracer_with_scope(&self, scope: InstrumentationScope) -> Tracer {
        if self.inner.is_shutdown() {
            // Tracers handed out after shutdown only make non-recording
            // spans; an unset weak reference gets exactly that.
            return Tracer::new(scope, Weak::new());
        }

        match self.inner.tracers.lock() {
            Ok(mut tracers) => tracers
                .entry(scope.clone())
                .or_insert_with(|| Tracer::new(scope, Arc::downgrade(&self.inner)))
                .clone(),
            Err(_) => Tracer::new(scope, Arc::downgrade(&self.inner)),
        }
    }

    /// The resource describing this provider's producing entity.
    pub fn resource(&self) -> &Resource {
        &self.inner.config.resource
    }

    /// Pushes all buffered spans through the exporters and blocks until they
    /// settled.
    pub fn force_flush(&self) -> SdkResult {
        let results: Vec<_> = self
            .inner
            .span_processors()
            .iter()
            .map(|processor| processor.force_flush())
            .collect();
        merge_results(results)
    }

    /// Shuts the pipeline down with the default drain timeout.
    pub fn shutdown(&self) -> SdkResult {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Stops span processing and drains buffered spans, waiting at most
    /// `timeout`.
    ///
    /// Spans ended after shutdown are silently counted as dropped; tracers
    /// stay safe to use. A second shutdown returns
    /// [`SdkError::AlreadyShutdown`].
    pub fn shutdown_with_timeout(&self, timeout: Duration) -> SdkResult {
        if self
            .inner
            .is_shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            merge_results(self.inner.shutdown_processors(timeout))
        } else {
            Err(SdkError::AlreadyShutdown)
        }
    }
}

fn merge_results(results: Vec<SdkResult>) -> SdkResult {
    let failures: Vec<SdkError> = results.into_iter().filter_map(Result::err).collect();
    if failures.is_empty() {
        Ok(())
    } else if failures.len() == 1 {
        Err(failures.into_iter().next().unwrap_or(SdkError::AlreadyShutdown))
    } else {
        Err(SdkError::InternalFailure(format!("{failures:?}")))
    }
}

/// Builder for [`TracerProvider`].
#[derive(Debug, Default)]
pub struct TracerProviderBuilder {
    processors: Vec<Box<dyn SpanProcessor>>,
    sampler: Option<Sampler>,
    id_generator: Option<Box<dyn IdGenerator>>,
    resource: Option<Resource>,
    service_name: Option<String>,
    enabled: Option<bool>,
}

impl TracerProviderBuilder {
    /// Adds a [`SimpleSpanProcessor`] around the given exporter.
    ///
    /// Processors are invoked in the order they are added.
    pub fn with_simple_exporter<T: SpanExporter + 'static>(self, exporter: T) -> Self {
        self.with_span_processor(SimpleSpanProcessor::new(exporter))
    }

    /// Adds a [`BatchSpanProcessor`] with default batch configuration around
    /// the given exporter.
    pub fn with_batch_exporter<T: SpanExporter + 'static>(self, exporter: T) -> Self {
        self.with_span_processor(BatchSpanProcessor::new(exporter, BatchConfig::default()))
    }

    /// Adds a custom [`SpanProcessor`] to the pipeline.
    pub fn with_span_processor<T: SpanProcessor + 'static>(mut self, processor: T) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Specify the sampler to be used.
    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Specify the id generator to be used.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.id_generator = Some(Box::new(id_generator));
        self
    }

    /// Associates a [`Resource`] with the provider.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Records the service name into the provider's [`Resource`].
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Enables or disables the engine as a whole. A disabled provider hands
    /// out tracers whose spans are all non-recording.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Builds the provider, validating the configuration.
    ///
    /// Fails fast on invalid settings such as a sampler ratio outside
    /// `[0.0, 1.0]`; a misconfigured pipeline at startup is a deployment
    /// error, not something to paper over at runtime.
    pub fn build(self) -> Result<TracerProvider, ConfigError> {
        let defaults = Config::default();
        let sampler = self.sampler.unwrap_or(defaults.sampler);
        sampler.validate()?;

        let mut resource = self.resource.unwrap_or(defaults.resource);
        if let Some(service_name) = self.service_name {
            resource.insert(KeyValue::new(SERVICE_NAME, service_name));
        }

        let mut processors = self.processors;
        for processor in &mut processors {
            processor.set_resource(&resource);
        }

        let config = Config {
            sampler,
            id_generator: self.id_generator.unwrap_or(defaults.id_generator),
            resource,
            enabled: self.enabled.unwrap_or(defaults.enabled),
        };

        Ok(TracerProvider {
            inner: Arc::new(TracerProviderInner {
                config,
                processors,
                tracers: Mutex::new(HashMap::new()),
                is_shutdown: AtomicBool::new(false),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::InMemorySpanExporter;
    use crate::id_generator::IncrementIdGenerator;

    #[test]
    fn build_rejects_invalid_sampler_ratio() {
        let err = TracerProvider::builder()
            .with_sampler(Sampler::TraceIdRatioBased(1.5))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidSamplerRatio(1.5));
    }

    #[test]
    fn tracers_are_memoized_per_scope() {
        let provider = TracerProvider::builder().build().unwrap();

        let first = provider.tracer("auth");
        let second = provider.tracer("auth");
        let other = provider.tracer_with_scope(
            InstrumentationScope::new("auth").with_version("1.2.0"),
        );

        assert_eq!(format!("{first:?}"), format!("{second:?}"));
        let tracers = provider.inner.tracers.lock().unwrap();
        assert_eq!(tracers.len(), 2);
        drop(tracers);
        drop(other);
    }

    #[test]
    fn resource_reaches_exporter() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_service_name("checkout")
            .with_simple_exporter(exporter.clone())
            .build()
            .unwrap();

        assert_eq!(
            exporter.resource().get(SERVICE_NAME).map(|v| v.to_string()),
            Some("checkout".to_string())
        );
        assert_eq!(exporter.resource(), provider.resource().clone());
        provider.shutdown().unwrap();
    }

    #[test]
    fn disabled_provider_records_nothing() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_enabled(false)
            .with_simple_exporter(exporter.clone())
            .build()
            .unwrap();

        let tracer = provider.tracer("disabled");
        let span = tracer.start_span("ignored", vec![]);
        assert!(!span.is_recording());
        drop(span);
        tracer.add_span("also-ignored", vec![]);

        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn batch_pipeline_delivers_a_consistent_trace_tree() {
        use crate::config::BatchConfigBuilder;
        use crate::context::Context;
        use std::time::Duration;

        let exporter = InMemorySpanExporter::default();
        let config = BatchConfigBuilder::default()
            .with_max_queue_size(64)
            .with_max_export_batch_size(64)
            .with_scheduled_delay(Duration::from_secs(3600))
            .build()
            .unwrap();
        let provider = TracerProvider::builder()
            .with_span_processor(BatchSpanProcessor::new(exporter.clone(), config))
            .build()
            .unwrap();
        let tracer = provider.tracer("pipeline");

        let a = tracer.start_span("A", vec![]);
        let cx = Context::current().with_span(a);
        {
            let _guard = cx.clone().attach();
            let mut b = tracer.start_span("B", vec![]);
            b.end();
        }
        cx.span().end();

        assert!(exporter.get_finished_spans().unwrap().is_empty());
        provider.force_flush().unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        // end-order within the swapped buffer is preserved: B before A
        assert_eq!(spans[0].name, "B");
        assert_eq!(spans[1].name, "A");
        assert_eq!(spans[0].span_context.trace_id(), spans[1].span_context.trace_id());
        assert_eq!(
            spans[0].span_context.parent_span_id(),
            Some(spans[1].span_context.span_id())
        );
        assert!(spans[0].end_time <= spans[1].end_time);

        provider.shutdown().unwrap();
    }

    #[test]
    fn shutdown_is_idempotent_in_effect_but_reports_second_call() {
        let provider = TracerProvider::builder().build().unwrap();
        assert_eq!(provider.shutdown(), Ok(()));
        assert_eq!(provider.shutdown(), Err(SdkError::AlreadyShutdown));
    }

    #[test]
    fn spans_after_shutdown_are_not_recorded() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .with_id_generator(IncrementIdGenerator::new())
            .build()
            .unwrap();

        let tracer = provider.tracer("late");
        tracer.add_span("before", vec![]);
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
        exporter.reset();

        provider.shutdown().unwrap();
        tracer.add_span("after", vec![]);
        let from_new_tracer = provider.tracer("after-shutdown");
        from_new_tracer.add_span("after-too", vec![]);

        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }
}
