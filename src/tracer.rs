//! # Tracer
//!
//! The `Tracer` creates spans and establishes their parent-child
//! relationships from the ambient [`Context`]. It also exposes the two
//! operations business logic actually calls: [`Tracer::trace`], which wraps
//! a unit of work in a span, and [`Tracer::add_span`], which marks a
//! point-in-time occurrence.

use std::borrow::Cow;
use std::fmt;
use std::sync::Weak;
use std::time::{Instant, SystemTime};

use crate::common::{InstrumentationScope, KeyValue};
use crate::context::Context;
use crate::provider::TracerProviderInner;
use crate::sampler::SamplingDecision;
use crate::span::{
    upsert_attribute, Span, SpanData, SpanRecording, Status, EXCEPTION_EVENT_NAME,
    EXCEPTION_MESSAGE_KEY, EXCEPTION_TYPE_KEY,
};
use crate::span_context::{SpanContext, SpanId, TraceId};

/// Factory for spans, bound to one [`TracerProvider`].
///
/// Tracers are cheap to clone and are memoized by the provider per
/// instrumentation scope. A tracer holds only a weak reference to its
/// provider: once the provider is gone, the tracer keeps working but
/// produces non-recording spans.
///
/// [`TracerProvider`]: crate::provider::TracerProvider
#[derive(Clone)]
pub struct Tracer {
    scope: InstrumentationScope,
    provider: Weak<TracerProviderInner>,
}

impl fmt::Debug for Tracer {
    /// Omitting `provider` here is necessary to avoid cycles.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("name", &self.scope.name())
            .field("version", &self.scope.version())
            .finish()
    }
}

impl Tracer {
    pub(crate) fn new(scope: InstrumentationScope, provider: Weak<TracerProviderInner>) -> Self {
        Tracer { scope, provider }
    }

    pub(crate) fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Starts a new span with the ambient current context as parent.
    ///
    /// If a span is active in the current context, the new span becomes its
    /// child, inheriting trace id, sampling decision and baggage. Otherwise
    /// a new trace is started and the provider's sampler decides whether it
    /// is recorded.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        attributes: Vec<KeyValue>,
    ) -> Span {
        Context::map_current(|cx| self.start_span_with_context(name, attributes, cx))
    }

    /// Starts a new span using an explicitly provided parent context.
    pub fn start_span_with_context(
        &self,
        name: impl Into<Cow<'static, str>>,
        attributes: Vec<KeyValue>,
        parent_cx: &Context,
    ) -> Span {
        let provider = match self.provider.upgrade() {
            Some(provider) => provider,
            // The provider is gone; no processors remain to receive spans.
            None => {
                return Span::new(
                    SpanContext::new_root(TraceId::INVALID, SpanId::INVALID, false),
                    None,
                    self.clone(),
                )
            }
        };

        let config = provider.config();
        let span_id = config.id_generator.new_span_id();

        let span_context = match parent_cx.span_context() {
            Some(parent) => SpanContext::new_child(parent, span_id),
            None => {
                let trace_id = config.id_generator.new_trace_id();
                let sampled = config.sampler.should_sample(trace_id)
                    == SamplingDecision::RecordAndSample;
                SpanContext::new_root(trace_id, span_id, sampled)
            }
        };

        // No point recording when the trace is unsampled, the engine is
        // disabled, or the provider has begun shutting down.
        if !span_context.is_sampled() || !config.enabled || provider.is_shutdown() {
            return Span::new(span_context, None, self.clone());
        }

        let start_time = SystemTime::now();
        let mut deduped = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            upsert_attribute(&mut deduped, attribute);
        }

        let mut span = Span::new(
            span_context,
            Some(SpanRecording {
                name: name.into(),
                start_time,
                started_at: Instant::now(),
                attributes: deduped,
                events: Vec::new(),
                status: Status::Unset,
            }),
            self.clone(),
        );

        for processor in provider.span_processors() {
            processor.on_start(&mut span, parent_cx);
        }

        span
    }

    /// Wraps a unit of work in a span.
    ///
    /// Starts a span, installs it as the ambient current context for the
    /// duration of `f`, and ends it on every exit path. Nested calls to
    /// `trace` (or any other span started inside `f`) parent under this
    /// span automatically.
    ///
    /// If `f` fails, the error is recorded as an `exception` event, the span
    /// status is set to [`Status::Error`], and the error is returned to the
    /// caller unchanged; the tracing layer is transparent to the
    /// application's own error handling.
    ///
    /// # Examples
    ///
    /// ```
    /// use microtrace::{KeyValue, TracerProvider};
    ///
    /// let provider = TracerProvider::builder().build().unwrap();
    /// let tracer = provider.tracer("checkout");
    ///
    /// let total = tracer.trace("price-cart", vec![KeyValue::new("items", 3)], |_cx| {
    ///     Ok::<_, std::io::Error>(42)
    /// });
    /// assert_eq!(total.unwrap(), 42);
    /// ```
    pub fn trace<T, E, F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        attributes: Vec<KeyValue>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Context) -> Result<T, E>,
        E: std::error::Error,
    {
        let span = self.start_span(name, attributes);
        let cx = Context::current().with_span(span);

        // If `f` unwinds, the guard restores the previous context and the
        // span is ended by its own drop once `cx` goes away.
        let result = {
            let _guard = cx.clone().attach();
            f(&cx)
        };

        if let Err(err) = &result {
            cx.span().add_event(
                EXCEPTION_EVENT_NAME,
                vec![
                    KeyValue::new(EXCEPTION_TYPE_KEY, std::any::type_name::<E>()),
                    KeyValue::new(EXCEPTION_MESSAGE_KEY, err.to_string()),
                ],
            );
            cx.span().set_status(Status::error(err.to_string()));
        }
        cx.span().end();

        result
    }

    /// Creates and immediately ends a span marking a point-in-time
    /// occurrence, parented under the ambient current context.
    ///
    /// The resulting span has effectively zero duration; equal start and end
    /// times are a valid state. Fire-and-forget: the caller never holds a
    /// reference to it.
    pub fn add_span(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        let mut span = self.start_span(name, attributes);
        span.end();
    }

    /// Hands an ended span to every processor of the owning provider.
    pub(crate) fn on_span_end(&self, span: SpanData) {
        if let Some(provider) = self.provider.upgrade() {
            for processor in provider.span_processors() {
                processor.on_end(span.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::InMemorySpanExporter;
    use crate::id_generator::IncrementIdGenerator;
    use crate::provider::TracerProvider;
    use crate::sampler::Sampler;
    use crate::span_processor::SimpleSpanProcessor;

    fn test_pipeline() -> (InMemorySpanExporter, TracerProvider) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_span_processor(SimpleSpanProcessor::new(exporter.clone()))
            .with_id_generator(IncrementIdGenerator::new())
            .build()
            .expect("default configuration is valid");
        (exporter, provider)
    }

    #[test]
    fn parent_child_scenario_exports_consistent_tree() {
        let (exporter, provider) = test_pipeline();
        let tracer = provider.tracer("scenario");

        let a = tracer.start_span("A", vec![]);
        let a_context = a.span_context().clone();
        let cx = Context::current().with_span(a);
        {
            let _guard = cx.clone().attach();
            let mut b = tracer.start_span("B", vec![]);
            b.end();
        }
        cx.span().end();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        let b = &spans[0];
        let a = &spans[1];
        assert_eq!(a.name, "A");
        assert_eq!(b.name, "B");
        assert_eq!(a.span_context.trace_id(), b.span_context.trace_id());
        assert_eq!(b.span_context.parent_span_id(), Some(a_context.span_id()));
        assert!(a.span_context.is_root());
        assert!(b.end_time <= a.end_time);
        assert!(b.start_time >= a.start_time);
    }

    #[test]
    fn trace_records_and_repropagates_errors_unchanged() {
        let (exporter, provider) = test_pipeline();
        let tracer = provider.tracer("failing");

        let err = tracer
            .trace("x", vec![], |_cx| {
                Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"))
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
        assert_eq!(err.kind(), std::io::ErrorKind::Other);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(
            span.status,
            Status::Error {
                description: "disk on fire".into()
            }
        );
        assert_eq!(span.events.len(), 1);
        let event = &span.events[0];
        assert_eq!(event.name, EXCEPTION_EVENT_NAME);
        assert!(event
            .attributes
            .iter()
            .any(|kv| kv.key == EXCEPTION_MESSAGE_KEY && kv.value.as_str() == "disk on fire"));
    }

    #[test]
    fn trace_returns_success_value_and_sets_attributes() {
        let (exporter, provider) = test_pipeline();
        let tracer = provider.tracer("passing");

        let result = tracer.trace(
            "compute",
            vec![KeyValue::new("input", 7)],
            |cx| {
                cx.span().set_attribute(KeyValue::new("output", 14));
                Ok::<_, std::io::Error>(14)
            },
        );
        assert_eq!(result.unwrap(), 14);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::Unset);
        assert_eq!(spans[0].attributes.len(), 2);
    }

    #[test]
    fn nested_trace_calls_parent_automatically() {
        let (exporter, provider) = test_pipeline();
        let tracer = provider.tracer("nested");

        tracer
            .trace("outer", vec![], |_cx| {
                tracer.trace("inner", vec![], |_cx| Ok::<_, std::io::Error>(()))
            })
            .unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        let inner = &spans[0];
        let outer = &spans[1];
        assert_eq!(inner.span_context.trace_id(), outer.span_context.trace_id());
        assert_eq!(
            inner.span_context.parent_span_id(),
            Some(outer.span_context.span_id())
        );
    }

    #[test]
    fn trace_ends_span_when_body_panics() {
        let (exporter, provider) = test_pipeline();
        let tracer = provider.tracer("panicking");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tracer
                .trace("doomed", vec![], |_cx| -> Result<(), std::io::Error> {
                    panic!("unwind")
                })
                .ok();
        }));
        assert!(result.is_err());

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "doomed");
        assert!(!Context::current().has_active_span());
    }

    #[test]
    fn add_span_is_a_zero_duration_child() {
        let (exporter, provider) = test_pipeline();
        let tracer = provider.tracer("marks");

        tracer
            .trace("work", vec![], |_cx| {
                tracer.add_span("checkpoint", vec![KeyValue::new("step", 1)]);
                Ok::<_, std::io::Error>(())
            })
            .unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        let mark = &spans[0];
        let work = &spans[1];
        assert_eq!(mark.name, "checkpoint");
        assert_eq!(
            mark.span_context.parent_span_id(),
            Some(work.span_context.span_id())
        );
        // zero duration is a valid state for a point-in-time span
        assert!(mark.end_time >= mark.start_time);
        assert!(mark.end_time <= work.end_time);
    }

    #[test]
    fn unsampled_traces_produce_no_output() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_sampler(Sampler::AlwaysOff)
            .with_span_processor(SimpleSpanProcessor::new(exporter.clone()))
            .build()
            .unwrap();
        let tracer = provider.tracer("silent");

        tracer
            .trace("root", vec![], |cx| {
                let child = tracer.start_span("child", vec![]);
                // the child inherits the unsampled decision instead of
                // re-consulting the sampler
                assert!(!child.span_context().is_sampled());
                assert!(!child.is_recording());
                assert!(cx.span_context().is_some_and(|sc| !sc.is_sampled()));
                Ok::<_, std::io::Error>(())
            })
            .unwrap();

        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn baggage_flows_from_parent_to_child() {
        let (exporter, provider) = test_pipeline();
        let tracer = provider.tracer("baggage");

        let root = tracer.start_span("root", vec![]);
        let derived = root.span_context().with_baggage_entry("tenant", "acme");
        drop(root);

        let cx = Context::current().with_span_context(derived);
        let _guard = cx.attach();
        let child = tracer.start_span("child", vec![]);
        assert_eq!(child.span_context().baggage().get("tenant"), Some("acme"));
        drop(child);

        assert_eq!(exporter.get_finished_spans().unwrap().len(), 2);
    }

    #[test]
    fn mutations_after_end_are_ignored() {
        let (exporter, provider) = test_pipeline();
        let tracer = provider.tracer("frozen");

        let mut span = tracer.start_span("once", vec![]);
        span.set_attribute(KeyValue::new("before", true));
        span.end();
        span.set_attribute(KeyValue::new("after", true));
        span.add_event("too-late", vec![]);
        span.set_status(Status::error("too late"));
        span.end();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1, "end is idempotent");
        assert_eq!(spans[0].attributes.len(), 1);
        assert!(spans[0].events.is_empty());
        assert_eq!(spans[0].status, Status::Unset);
    }

    #[test]
    fn end_is_idempotent_for_end_time() {
        let (exporter, provider) = test_pipeline();
        let tracer = provider.tracer("idempotent");

        let mut span = tracer.start_span("timed", vec![]);
        span.end();
        let first_end = exporter.get_finished_spans().unwrap()[0].end_time;
        std::thread::sleep(std::time::Duration::from_millis(10));
        span.end();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].end_time, first_end);
    }

    #[test]
    fn span_ref_helpers_reach_the_live_span() {
        let (exporter, provider) = test_pipeline();
        let tracer = provider.tracer("helpers");

        tracer
            .trace("outer", vec![], |_cx| {
                crate::context::get_active_span(|span| {
                    span.set_attribute(KeyValue::new("via", "span-ref"));
                    span.record_error(&std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "transient glitch",
                    ));
                    span.update_name("renamed");
                    assert!(span.is_recording());
                });
                Ok::<_, std::io::Error>(())
            })
            .unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        let span = &spans[0];
        assert_eq!(span.name, "renamed");
        assert_eq!(span.events.len(), 1);
        assert_eq!(span.events[0].name, EXCEPTION_EVENT_NAME);
        // recording an error does not flip the status by itself
        assert_eq!(span.status, Status::Unset);
    }
}
