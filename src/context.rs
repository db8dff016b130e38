//! # Context propagation
//!
//! A [`Context`] carries the identity of the currently active span through a
//! call chain. Each thread has its own ambient current context; installing a
//! context with [`Context::attach`] returns a [`ContextGuard`] that restores
//! the previous context when dropped, on every exit path including unwinds.
//! Contexts therefore nest naturally with the call stack.
//!
//! Propagation to concurrent units of work is pass-by-value: capture the
//! context with [`Context::current`] (or [`FutureExt::with_current_context`]
//! for futures) at launch time and attach the copy inside the child task.
//! The child never observes later changes to the launcher's ambient context,
//! and vice versa, so unrelated requests sharing a process can never bleed
//! into each other's traces.
//!
//! # Examples
//!
//! ```
//! use microtrace::{Context, TracerProvider};
//!
//! let provider = TracerProvider::builder().build().unwrap();
//! let tracer = provider.tracer("example");
//!
//! let span = tracer.start_span("outer", vec![]);
//! let outer = Context::current().with_span(span);
//! {
//!     let _guard = outer.clone().attach();
//!     // spans started here become children of "outer"
//!     tracer.add_span("point-of-interest", vec![]);
//! }
//! // the prior (empty) context is restored here
//! assert!(!Context::current().has_active_span());
//! ```

use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::Poll;

use pin_project_lite::pin_project;

use crate::common::KeyValue;
use crate::span::{Span, Status};
use crate::span_context::SpanContext;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Context> = RefCell::new(Context::default());
}

/// An execution-scoped value carrying the active span.
///
/// `Context` values are immutable; write operations return a new context.
#[derive(Clone, Default)]
pub struct Context {
    pub(crate) span: Option<Arc<SynchronizedSpan>>,
}

impl Context {
    /// Creates an empty `Context`.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns a snapshot of this thread's current context.
    pub fn current() -> Self {
        Context::map_current(|cx| cx.clone())
    }

    /// Applies a function to this thread's current context without cloning
    /// it.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| f(&cx.borrow()))
    }

    /// Returns the current context extended with the given span.
    pub fn current_with_span(span: Span) -> Self {
        Context::current().with_span(span)
    }

    /// Returns a copy of this context with the given span installed as the
    /// active span.
    pub fn with_span(&self, span: Span) -> Self {
        Context {
            span: Some(Arc::new(SynchronizedSpan::from_span(span))),
        }
    }

    /// Returns a copy of this context with the given span identity installed
    /// but no live span attached.
    ///
    /// Useful to parent new spans under a unit of work whose `Span` lives
    /// elsewhere, for example when only the [`SpanContext`] was handed across
    /// a task boundary.
    pub fn with_span_context(&self, span_context: SpanContext) -> Self {
        Context {
            span: Some(Arc::new(SynchronizedSpan::from_context(span_context))),
        }
    }

    /// A reference to the active span of this context.
    pub fn span(&self) -> SpanRef<'_> {
        SpanRef(self.span.as_deref())
    }

    /// The identity of the active span, if any.
    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span.as_deref().map(|span| &span.span_context)
    }

    /// Returns whether an active span has been set.
    pub fn has_active_span(&self) -> bool {
        self.span.is_some()
    }

    /// Replaces this thread's current context with this context.
    ///
    /// Dropping the returned [`ContextGuard`] restores the previous context.
    /// The guard is not `Send`: a context attached on one thread must be
    /// detached on the same thread.
    pub fn attach(self) -> ContextGuard {
        let previous_cx = CURRENT_CONTEXT
            .try_with(|current| current.replace(self))
            .ok();

        ContextGuard {
            previous_cx,
            _marker: PhantomData,
        }
    }

    /// Runs `f` with this context installed as the current context,
    /// restoring the previous context on any exit path.
    pub fn with_current<T>(self, f: impl FnOnce() -> T) -> T {
        let _guard = self.attach();
        f()
    }
}

impl fmt::Debug for Context {
    // Render only the span identity; the live span links back to the whole
    // provider.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("span", &self.span.as_deref().map(|span| &span.span_context))
            .finish()
    }
}

/// A guard that restores the previous context when dropped.
#[must_use = "Dropping the guard detaches the context."]
#[derive(Debug)]
pub struct ContextGuard {
    previous_cx: Option<Context>,
    // ensure the guard stays on the thread it was created on
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous_cx) = self.previous_cx.take() {
            let _ = CURRENT_CONTEXT.try_with(|current| current.replace(previous_cx));
        }
    }
}

/// The active span of a context: its immutable identity plus, when this
/// process owns the live span, synchronized mutable access to it.
#[derive(Debug)]
pub(crate) struct SynchronizedSpan {
    span_context: SpanContext,
    inner: Option<Mutex<Span>>,
}

impl SynchronizedSpan {
    fn from_span(span: Span) -> Self {
        SynchronizedSpan {
            span_context: span.span_context().clone(),
            inner: Some(Mutex::new(span)),
        }
    }

    fn from_context(span_context: SpanContext) -> Self {
        SynchronizedSpan {
            span_context,
            inner: None,
        }
    }
}

/// A reference to the active span of a [`Context`].
///
/// All mutating operations are no-ops when the context has no live span
/// (because none was set, or because only a span identity was propagated).
#[derive(Debug)]
pub struct SpanRef<'a>(Option<&'a SynchronizedSpan>);

impl SpanRef<'_> {
    fn with_inner_mut<F: FnOnce(&mut Span)>(&self, f: F) {
        if let Some(inner) = self.0.and_then(|span| span.inner.as_ref()) {
            if let Ok(mut locked) = inner.lock() {
                f(&mut locked)
            }
        }
    }

    /// The identity of the referenced span, if the context holds one.
    pub fn span_context(&self) -> Option<&SpanContext> {
        self.0.map(|span| &span.span_context)
    }

    /// Returns `true` if the referenced span is recording.
    pub fn is_recording(&self) -> bool {
        self.0
            .and_then(|span| span.inner.as_ref())
            .and_then(|inner| inner.lock().ok().map(|span| span.is_recording()))
            .unwrap_or(false)
    }

    /// Record an event on the referenced span.
    pub fn add_event<T>(&self, name: T, attributes: Vec<KeyValue>)
    where
        T: Into<std::borrow::Cow<'static, str>>,
    {
        self.with_inner_mut(|span| span.add_event(name, attributes))
    }

    /// Record an error as an event on the referenced span.
    pub fn record_error(&self, err: &dyn Error) {
        self.with_inner_mut(|span| span.record_error(err))
    }

    /// Set an attribute on the referenced span.
    pub fn set_attribute(&self, attribute: KeyValue) {
        self.with_inner_mut(|span| span.set_attribute(attribute))
    }

    /// Set the status of the referenced span.
    pub fn set_status(&self, status: Status) {
        self.with_inner_mut(|span| span.set_status(status))
    }

    /// Update the name of the referenced span.
    pub fn update_name<T>(&self, new_name: T)
    where
        T: Into<std::borrow::Cow<'static, str>>,
    {
        self.with_inner_mut(|span| span.update_name(new_name))
    }

    /// End the referenced span.
    pub fn end(&self) {
        self.with_inner_mut(|span| span.end())
    }
}

/// Executes a closure with a reference to this thread's current span.
pub fn get_active_span<F, T>(f: F) -> T
where
    F: FnOnce(SpanRef<'_>) -> T,
{
    Context::map_current(|cx| f(cx.span()))
}

pin_project! {
    /// A future with an associated tracing context.
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        cx: Context,
    }
}

impl<T: Future> Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.cx.clone().attach();

        this.inner.poll(task_cx)
    }
}

/// Extension trait for attaching a tracing context to a future.
///
/// The attached context is installed as the current context for the duration
/// of every `poll`, so spans started inside the future parent correctly even
/// when the future migrates between executor threads.
pub trait FutureExt: Sized {
    /// Attaches the given context to this future.
    fn with_context(self, cx: Context) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches a copy of this thread's current context to this future.
    ///
    /// The copy is taken now, at the point the future is built, not when it
    /// is first polled.
    fn with_current_context(self) -> WithContext<Self> {
        self.with_context(Context::current())
    }
}

impl<T: Sized> FutureExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span_context::{SpanId, TraceId};

    fn test_context(trace_id: u128) -> Context {
        Context::new().with_span_context(SpanContext::new_root(
            TraceId::from(trace_id),
            SpanId::from(1),
            true,
        ))
    }

    #[test]
    fn nested_attach_restores_in_order() {
        assert!(Context::current().span_context().is_none());

        let outer = test_context(1);
        {
            let _outer_guard = outer.attach();
            assert_eq!(
                Context::current().span_context().map(|sc| sc.trace_id()),
                Some(TraceId::from(1))
            );
            {
                let _inner_guard = test_context(2).attach();
                assert_eq!(
                    Context::current().span_context().map(|sc| sc.trace_id()),
                    Some(TraceId::from(2))
                );
            }
            assert_eq!(
                Context::current().span_context().map(|sc| sc.trace_id()),
                Some(TraceId::from(1))
            );
        }
        assert!(Context::current().span_context().is_none());
    }

    #[test]
    fn context_restored_after_panic() {
        let result = std::panic::catch_unwind(|| {
            let _guard = test_context(7).attach();
            panic!("boom");
        });

        assert!(result.is_err());
        assert!(Context::current().span_context().is_none());
    }

    #[test]
    fn with_current_runs_with_context_installed() {
        let observed = test_context(3).with_current(|| {
            Context::map_current(|cx| cx.span_context().map(|sc| sc.trace_id()))
        });
        assert_eq!(observed, Some(TraceId::from(3)));
        assert!(Context::current().span_context().is_none());
    }

    #[test]
    fn contexts_do_not_leak_across_threads() {
        let _guard = test_context(9).attach();

        let seen_in_thread = std::thread::spawn(|| Context::current().has_active_span())
            .join()
            .unwrap();
        assert!(!seen_in_thread);

        // explicit pass-by-value propagation
        let captured = Context::current();
        let seen_with_copy = std::thread::spawn(move || {
            captured.with_current(|| {
                Context::map_current(|cx| cx.span_context().map(|sc| sc.trace_id()))
            })
        })
        .join()
        .unwrap();
        assert_eq!(seen_with_copy, Some(TraceId::from(9)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn future_carries_context_across_polls() {
        let trace_id = {
            async {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Context::map_current(|cx| cx.span_context().map(|sc| sc.trace_id()))
            }
        }
        .with_context(test_context(11))
        .await;

        assert_eq!(trace_id, Some(TraceId::from(11)));
        assert!(!Context::current().has_active_span());
    }
}
