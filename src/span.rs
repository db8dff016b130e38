//! # Span
//!
//! A `Span` is the record of one unit of work within a trace. Spans nest to
//! form a trace tree: each trace has a root span describing the end-to-end
//! operation and zero or more child spans for its sub-operations.
//!
//! A span is mutable from creation until [`Span::end`] is called: its name,
//! attributes, events and status may all change. Ending freezes the span,
//! converts it into an immutable [`SpanData`] and hands it to the configured
//! span processors; any mutation after that point is a silent no-op. `end` is
//! idempotent so defensive double-calls are harmless, and dropping an
//! unended span ends it implicitly, which is what guarantees spans survive
//! unwinding.

use std::borrow::Cow;
use std::error::Error;
use std::time::{Instant, SystemTime};

use crate::common::{InstrumentationScope, Key, KeyValue};
use crate::span_context::SpanContext;
use crate::tracer::Tracer;

/// The status of a [`Span`] once its work has finished.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Status {
    /// The default status, meaning no explicit judgement was recorded.
    #[default]
    Unset,

    /// The operation completed successfully.
    Ok,

    /// The operation failed.
    Error {
        /// A developer-facing description of the failure.
        description: Cow<'static, str>,
    },
}

impl Status {
    /// Create an error status with the given description.
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }
}

/// A point-in-time annotation on a span.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// The event name.
    pub name: Cow<'static, str>,
    /// When the event was recorded.
    pub timestamp: SystemTime,
    /// Attributes describing the event.
    pub attributes: Vec<KeyValue>,
}

impl Event {
    /// Create a new event.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        timestamp: SystemTime,
        attributes: Vec<KeyValue>,
    ) -> Self {
        Event {
            name: name.into(),
            timestamp,
            attributes,
        }
    }
}

/// The immutable, exportable form of an ended span.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Identity and propagation state, including the parent span id.
    pub span_context: SpanContext,
    /// Span name.
    pub name: Cow<'static, str>,
    /// Wall-clock start time.
    pub start_time: SystemTime,
    /// Wall-clock end time, derived from the monotonic elapsed duration so
    /// it can never precede `start_time`.
    pub end_time: SystemTime,
    /// Span attributes, in insertion order.
    pub attributes: Vec<KeyValue>,
    /// Span events, in recording order.
    pub events: Vec<Event>,
    /// Span status.
    pub status: Status,
    /// The instrumentation that produced this span.
    pub instrumentation_scope: InstrumentationScope,
}

/// The mutable state of a live, recording span.
#[derive(Debug)]
pub(crate) struct SpanRecording {
    pub(crate) name: Cow<'static, str>,
    pub(crate) start_time: SystemTime,
    pub(crate) started_at: Instant,
    pub(crate) attributes: Vec<KeyValue>,
    pub(crate) events: Vec<Event>,
    pub(crate) status: Status,
}

/// Single operation within a trace.
#[derive(Debug)]
pub struct Span {
    span_context: SpanContext,
    data: Option<SpanRecording>,
    tracer: Tracer,
}

impl Span {
    pub(crate) fn new(
        span_context: SpanContext,
        data: Option<SpanRecording>,
        tracer: Tracer,
    ) -> Self {
        Span {
            span_context,
            data,
            tracer,
        }
    }

    /// Returns the `SpanContext` for the given `Span`.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// Returns `true` if this span is recording information.
    ///
    /// Always returns `false` for unsampled spans and after `end`.
    pub fn is_recording(&self) -> bool {
        self.data.is_some()
    }

    /// Operate on a mutable reference to span data.
    fn with_data<T, F>(&mut self, f: F) -> Option<T>
    where
        F: FnOnce(&mut SpanRecording) -> T,
    {
        self.data.as_mut().map(f)
    }

    /// Sets a single attribute, overwriting the value of an existing
    /// attribute with the same key.
    pub fn set_attribute(&mut self, attribute: KeyValue) {
        self.with_data(|data| upsert_attribute(&mut data.attributes, attribute));
    }

    /// Sets multiple attributes at once.
    pub fn set_attributes(&mut self, attributes: impl IntoIterator<Item = KeyValue>) {
        self.with_data(|data| {
            for attribute in attributes {
                upsert_attribute(&mut data.attributes, attribute);
            }
        });
    }

    /// Records an event at the current time.
    pub fn add_event<T>(&mut self, name: T, attributes: Vec<KeyValue>)
    where
        T: Into<Cow<'static, str>>,
    {
        self.add_event_with_timestamp(name, SystemTime::now(), attributes)
    }

    /// Records an event at a specific time.
    pub fn add_event_with_timestamp<T>(
        &mut self,
        name: T,
        timestamp: SystemTime,
        attributes: Vec<KeyValue>,
    ) where
        T: Into<Cow<'static, str>>,
    {
        self.with_data(|data| {
            data.events.push(Event::new(name.into(), timestamp, attributes));
        });
    }

    /// Records an error as an `exception` event on this span.
    ///
    /// This does not change the span status; call [`Span::set_status`] as
    /// well if the failure should mark the whole span as failed.
    pub fn record_error(&mut self, err: &dyn Error) {
        let attributes = vec![KeyValue::new(EXCEPTION_MESSAGE_KEY, err.to_string())];
        self.add_event(EXCEPTION_EVENT_NAME, attributes);
    }

    /// Sets the status of this span. Last write wins.
    pub fn set_status(&mut self, status: Status) {
        self.with_data(|data| data.status = status);
    }

    /// Updates the span's name.
    pub fn update_name<T>(&mut self, new_name: T)
    where
        T: Into<Cow<'static, str>>,
    {
        self.with_data(|data| data.name = new_name.into());
    }

    /// Signals that the operation described by this span has now ended.
    ///
    /// Idempotent: only the first call freezes the end time and hands the
    /// span to the processors.
    pub fn end(&mut self) {
        self.ensure_ended();
    }

    fn ensure_ended(&mut self) {
        // Take data, marking the span as ended; skip if already taken.
        let data = match self.data.take() {
            Some(data) => data,
            None => return,
        };

        // Anchoring the end to the monotonic elapsed time keeps duration
        // correct across wall-clock adjustments.
        let end_time = data.start_time + data.started_at.elapsed();
        let exported = SpanData {
            span_context: self.span_context.clone(),
            name: data.name,
            start_time: data.start_time,
            end_time,
            attributes: data.attributes,
            events: data.events,
            status: data.status,
            instrumentation_scope: self.tracer.scope().clone(),
        };

        self.tracer.on_span_end(exported);
    }
}

impl Drop for Span {
    /// Ends the span on drop so no exit path can leak an unended span.
    fn drop(&mut self) {
        self.ensure_ended();
    }
}

pub(crate) const EXCEPTION_EVENT_NAME: &str = "exception";
pub(crate) const EXCEPTION_TYPE_KEY: Key = Key::from_static_str("exception.type");
pub(crate) const EXCEPTION_MESSAGE_KEY: Key = Key::from_static_str("exception.message");

pub(crate) fn upsert_attribute(attributes: &mut Vec<KeyValue>, attribute: KeyValue) {
    match attributes.iter_mut().find(|kv| kv.key == attribute.key) {
        Some(existing) => existing.value = attribute.value,
        None => attributes.push(attribute),
    }
}
