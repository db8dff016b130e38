//! Span exporters.
//!
//! An exporter is the boundary between this engine and the outside world: it
//! receives batches of ended spans and is responsible for encoding and
//! transmitting them. Protocol exporters are expected to be simple encoders
//! and transmitters; batching, retry scheduling and backpressure live in the
//! [`BatchSpanProcessor`].
//!
//! [`BatchSpanProcessor`]: crate::span_processor::BatchSpanProcessor

use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::error::{SdkError, SdkResult};
use crate::resource::Resource;
use crate::span::SpanData;

/// The result of one export call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The whole batch was accepted.
    Success,
    /// Only part of the batch was accepted; the rest will never be.
    PartialSuccess {
        /// How many spans of the batch the backend accepted.
        accepted: usize,
    },
    /// The batch was not accepted.
    Failure {
        /// Whether retrying the same batch may succeed.
        retryable: bool,
    },
}

/// `SpanExporter` defines the interface that protocol-specific exporters
/// must implement so they can be plugged into the span pipeline.
///
/// `export` is never called concurrently for the same exporter instance: the
/// next call only happens after the previous one resolved. Implementations
/// must not block indefinitely; there has to be a reasonable upper bound
/// after which the call resolves to a [`ExportOutcome::Failure`].
pub trait SpanExporter: Send + Sync + Debug {
    /// Exports a batch of ended spans.
    ///
    /// Failures are reported through the returned [`ExportOutcome`], never
    /// panicked or raised; the processor decides between retrying and
    /// dropping based on it.
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportOutcome>;

    /// Shuts down the exporter. Called once when the pipeline shuts down,
    /// after the final batch was exported.
    fn shutdown(&mut self) {}

    /// Installs the resource describing the producing entity.
    ///
    /// Called once, before the first `export`.
    fn set_resource(&mut self, _resource: &Resource) {}
}

/// An in-memory span exporter for testing and debugging.
///
/// Stores exported spans in a shared `Vec`, retrievable via
/// [`InMemorySpanExporter::get_finished_spans`]. Clones share the same
/// storage, so a clone kept by the test observes spans exported through the
/// pipeline's instance.
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
    resource: Arc<Mutex<Resource>>,
}

impl InMemorySpanExporter {
    /// Creates a builder for an in-memory exporter.
    pub fn builder() -> InMemorySpanExporterBuilder {
        InMemorySpanExporterBuilder::default()
    }

    /// Returns the spans exported so far.
    pub fn get_finished_spans(&self) -> SdkResult<Vec<SpanData>> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .map_err(|err| SdkError::InternalFailure(err.to_string()))
    }

    /// Clears the stored spans.
    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear()
        }
    }

    /// The resource installed by the pipeline, if any.
    pub fn resource(&self) -> Resource {
        self.resource
            .lock()
            .map(|resource| resource.clone())
            .unwrap_or_default()
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportOutcome> {
        let outcome = match self.spans.lock() {
            Ok(mut spans) => {
                spans.extend(batch);
                ExportOutcome::Success
            }
            Err(_) => ExportOutcome::Failure { retryable: false },
        };
        Box::pin(std::future::ready(outcome))
    }

    fn shutdown(&mut self) {
        self.reset()
    }

    fn set_resource(&mut self, resource: &Resource) {
        if let Ok(mut stored) = self.resource.lock() {
            *stored = resource.clone();
        }
    }
}

/// Builder for [`InMemorySpanExporter`].
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporterBuilder {}

impl InMemorySpanExporterBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the exporter.
    pub fn build(&self) -> InMemorySpanExporter {
        InMemorySpanExporter::default()
    }
}
