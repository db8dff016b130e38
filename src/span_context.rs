//! Span identity and propagation state.

use std::fmt;

use crate::baggage::Baggage;

/// A 16-byte identifier shared by every span in one logical trace.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// The invalid trace id, all zeroes.
    pub const INVALID: TraceId = TraceId(0);

    /// Converts the trace id into a 16-byte big-endian array.
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        TraceId(value)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

/// An 8-byte identifier unique to one span within a trace.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// The invalid span id, all zeroes.
    pub const INVALID: SpanId = SpanId(0);
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        SpanId(value)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

/// Immutable identity and propagation state of one span.
///
/// A `SpanContext` is fixed at span creation and copied by value wherever the
/// span's identity needs to travel: into child spans, across threads, and
/// into exported [`SpanData`].
///
/// The trace id and the sampling decision are established once for the root
/// span of a trace and inherited unchanged by every descendant. [`Baggage`]
/// is likewise inherited; a child may *derive* a context with extra baggage
/// via [`SpanContext::with_baggage_entry`], which never affects the parent.
///
/// [`SpanData`]: crate::span::SpanData
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    sampled: bool,
    baggage: Baggage,
}

impl SpanContext {
    /// Constructs the context of a root span: a fresh trace with no parent
    /// and empty baggage.
    pub fn new_root(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        SpanContext {
            trace_id,
            span_id,
            parent_span_id: None,
            sampled,
            baggage: Baggage::EMPTY,
        }
    }

    /// Constructs the context of a child span: same trace id, same sampling
    /// decision and same baggage as the parent, with a fresh span id.
    pub fn new_child(parent: &SpanContext, span_id: SpanId) -> Self {
        SpanContext {
            trace_id: parent.trace_id,
            span_id,
            parent_span_id: Some(parent.span_id),
            sampled: parent.sampled,
            baggage: parent.baggage.clone(),
        }
    }

    /// The trace this span belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// This span's own id.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// The parent span's id, absent for root spans.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    /// Returns `true` if this span has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Whether this trace was sampled for export.
    ///
    /// Decided once when the root span is created and propagated unchanged
    /// to every child.
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    /// The baggage carried by this context.
    pub fn baggage(&self) -> &Baggage {
        &self.baggage
    }

    /// Derives a new context identical to this one but with the given
    /// baggage entry added.
    pub fn with_baggage_entry<K, V>(&self, key: K, value: V) -> SpanContext
    where
        K: Into<String>,
        V: Into<String>,
    {
        SpanContext {
            baggage: self.baggage.with_entry(key, value),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_trace_id_and_sampling() {
        let root = SpanContext::new_root(TraceId::from(1), SpanId::from(1), true);
        let child = SpanContext::new_child(&root, SpanId::from(2));

        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.parent_span_id(), Some(root.span_id()));
        assert!(child.is_sampled());
        assert!(!child.is_root());
        assert!(root.is_root());
    }

    #[test]
    fn child_inherits_baggage_without_sharing_mutations() {
        let root = SpanContext::new_root(TraceId::from(1), SpanId::from(1), true)
            .with_baggage_entry("tenant", "acme");
        let child = SpanContext::new_child(&root, SpanId::from(2));
        let derived = child.with_baggage_entry("request", "42");

        assert_eq!(child.baggage().get("tenant"), Some("acme"));
        assert!(child.baggage().get("request").is_none());
        assert_eq!(derived.baggage().get("request"), Some("42"));
        assert!(root.baggage().get("request").is_none());
    }

    #[test]
    fn ids_format_as_hex() {
        assert_eq!(TraceId::from(10).to_string(), format!("{:032x}", 10));
        assert_eq!(SpanId::from(10).to_string(), format!("{:016x}", 10));
    }
}
