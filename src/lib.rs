//! # microtrace
//!
//! A minimal, embeddable tracing span engine: the part of an observability
//! SDK that has to exist in-process. It manages span lifecycles, propagates
//! the current span through synchronous call chains and concurrent tasks,
//! records attributes and events, and ships ended spans to an exporter in
//! batches with backpressure — while guaranteeing that tracing failures
//! never become application failures.
//!
//! What it deliberately does not do: encode any wire format (that is the
//! embedder-supplied [`SpanExporter`]'s job), speak to any particular
//! backend, or handle metrics and logs.
//!
//! ## Getting started
//!
//! Construct one [`TracerProvider`] per process, take [`Tracer`]s from it,
//! and wrap units of work in [`Tracer::trace`]:
//!
//! ```
//! use microtrace::{InMemorySpanExporter, KeyValue, TracerProvider};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let exporter = InMemorySpanExporter::default();
//! let provider = TracerProvider::builder()
//!     .with_service_name("billing")
//!     .with_simple_exporter(exporter.clone())
//!     .build()?;
//!
//! let tracer = provider.tracer("invoices");
//! tracer.trace("issue-invoice", vec![KeyValue::new("customer", "acme")], |_cx| {
//!     // spans started in here, including nested `trace` calls,
//!     // become children of "issue-invoice"
//!     tracer.add_span("pdf-rendered", vec![]);
//!     Ok::<_, std::io::Error>(())
//! })?;
//!
//! assert_eq!(exporter.get_finished_spans()?.len(), 2);
//! provider.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! Errors returned from the traced closure are recorded on the span and
//! re-propagated unchanged; see [`Tracer::trace`].
//!
//! ## Concurrency
//!
//! The current context lives in a per-thread cell and never leaks between
//! unrelated threads or tasks. Hand it to concurrent work explicitly:
//! capture [`Context::current`] before spawning, or wrap futures with
//! [`FutureExt::with_current_context`]. See the [`context`] module docs.
//!
//! ## Production pipelines
//!
//! Use [`TracerProviderBuilder::with_batch_exporter`] (or a
//! [`BatchSpanProcessor`] with a custom [`BatchConfig`]) so span completion
//! never waits on export I/O. The batch buffer is bounded: when spans are
//! produced faster than they can be exported, load is shed according to the
//! configured [`DropPolicy`] and counted, never surfaced to producers.

#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(test, deny(warnings))]

pub mod baggage;
pub mod common;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod id_generator;
pub mod provider;
pub mod resource;
mod retry;
pub mod sampler;
pub mod span;
pub mod span_context;
pub mod span_processor;
pub mod tracer;

pub use baggage::Baggage;
pub use common::{InstrumentationScope, Key, KeyValue, Value};
pub use config::{BatchConfig, BatchConfigBuilder, Config, DropPolicy};
pub use context::{get_active_span, Context, ContextGuard, FutureExt, SpanRef, WithContext};
pub use error::{ConfigError, SdkError, SdkResult};
pub use export::{ExportOutcome, InMemorySpanExporter, SpanExporter};
pub use id_generator::{IdGenerator, IncrementIdGenerator, RandomIdGenerator};
pub use provider::{TracerProvider, TracerProviderBuilder};
pub use resource::{Resource, ResourceBuilder};
pub use retry::RetryPolicy;
pub use sampler::{Sampler, SamplingDecision};
pub use span::{Event, Span, SpanData, Status};
pub use span_context::{SpanContext, SpanId, TraceId};
pub use span_processor::{
    BatchSpanProcessor, BatchSpanProcessorBuilder, SimpleSpanProcessor, SpanProcessor,
};
pub use tracer::Tracer;
