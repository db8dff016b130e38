//! # Span processors
//!
//! A span processor receives every ended span and decides how it reaches the
//! exporter. The batch processor is the component that decouples span
//! completion from export I/O so business logic never waits on a network
//! call:
//!
//! ```ascii
//!   +------------------+    +-----------------------+    +--------------+
//!   | Tracer.trace()   |    | (Batch)SpanProcessor  |    | SpanExporter |
//!   | Span.end()       +----> (Simple)SpanProcessor +---->  (backend)   |
//!   +------------------+    +-----------------------+    +--------------+
//! ```
//!
//! [`BatchSpanProcessor::on_end`] appends to a bounded buffer under a brief
//! lock and returns; it never blocks on I/O and never raises to the caller.
//! When the buffer is full, a configurable [`DropPolicy`] sheds load and a
//! dropped-span counter records the overflow. A dedicated background thread
//! wakes when the buffer reaches the batch size or when the oldest buffered
//! span has waited out the configured delay, swaps the buffer for a fresh
//! one, and drives the export, retrying retryable failures with bounded
//! exponential backoff.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures_executor::block_on;

use crate::config::{BatchConfig, DropPolicy};
use crate::context::Context;
use crate::error::{SdkError, SdkResult};
use crate::export::{ExportOutcome, SpanExporter};
use crate::resource::Resource;
use crate::retry::RetryPolicy;
use crate::span::{Span, SpanData};

/// How long `shutdown` waits for the final drain when no explicit timeout is
/// given.
pub(crate) const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Hooks into the lifecycle of every span produced by a provider.
pub trait SpanProcessor: Send + Sync + fmt::Debug {
    /// Called when a span starts, synchronously on the starting thread, so
    /// it must not block.
    fn on_start(&self, span: &mut Span, cx: &Context);

    /// Called when a span ends, synchronously within `Span::end`, so it must
    /// not block and must not raise to the caller.
    fn on_end(&self, span: SpanData);

    /// Exports whatever is currently buffered, blocking until the export
    /// settled or timed out.
    fn force_flush(&self) -> SdkResult;

    /// Stops accepting spans, drains the buffer through one final export,
    /// and returns once that completed or `timeout` elapsed. Expiry of the
    /// timeout is an accepted-loss boundary, not an error.
    fn shutdown_with_timeout(&self, timeout: Duration) -> SdkResult;

    /// [`SpanProcessor::shutdown_with_timeout`] with the default timeout.
    fn shutdown(&self) -> SdkResult {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Installs the resource for downstream exporters.
    fn set_resource(&mut self, _resource: &Resource) {}
}

/// A [`SpanProcessor`] that hands each span to the exporter as soon as it
/// ends, without batching. The export happens on the calling thread, which
/// makes this processor useful for debugging and tests but unsuitable for
/// hot paths.
#[derive(Debug)]
pub struct SimpleSpanProcessor {
    exporter: Mutex<Box<dyn SpanExporter>>,
}

impl SimpleSpanProcessor {
    /// Create a new [`SimpleSpanProcessor`] using the provided exporter.
    pub fn new<E: SpanExporter + 'static>(exporter: E) -> Self {
        Self {
            exporter: Mutex::new(Box::new(exporter)),
        }
    }
}

impl SpanProcessor for SimpleSpanProcessor {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {
        // Ignored
    }

    fn on_end(&self, span: SpanData) {
        if !span.span_context.is_sampled() {
            return;
        }

        if let Ok(mut exporter) = self.exporter.lock() {
            let outcome = block_on(exporter.export(vec![span]));
            if let ExportOutcome::Failure { retryable } = outcome {
                tracing::debug!(
                    name: "SimpleSpanProcessor.ExportFailed",
                    retryable,
                    "span dropped"
                );
            }
        }
    }

    fn force_flush(&self) -> SdkResult {
        // Nothing is ever buffered here.
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> SdkResult {
        match self.exporter.lock() {
            Ok(mut exporter) => {
                exporter.shutdown();
                Ok(())
            }
            Err(err) => Err(SdkError::InternalFailure(format!(
                "SimpleSpanProcessor mutex poison at shutdown: {err}"
            ))),
        }
    }

    fn set_resource(&mut self, resource: &Resource) {
        if let Ok(mut exporter) = self.exporter.lock() {
            exporter.set_resource(resource);
        }
    }
}

/// Messages exchanged between producers and the background thread.
#[derive(Debug)]
enum BatchMessage {
    Flush(SyncSender<SdkResult>),
    Shutdown(SyncSender<SdkResult>),
    SetResource(Resource),
}

#[derive(Debug, Default)]
struct Queue {
    spans: VecDeque<SpanData>,
    /// When the oldest span in `spans` was enqueued; `None` while empty.
    oldest_enqueued: Option<Instant>,
    control: VecDeque<BatchMessage>,
    shutdown_started: bool,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Queue>,
    work_available: Condvar,
    dropped_spans: AtomicUsize,
}

/// A batching [`SpanProcessor`] with a dedicated background export thread.
#[derive(Debug)]
pub struct BatchSpanProcessor {
    shared: Arc<Shared>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    config: BatchConfig,
}

impl BatchSpanProcessor {
    /// Creates a new processor exporting through `exporter` with the given
    /// configuration, spawning the background thread immediately.
    pub fn new<E>(exporter: E, config: BatchConfig) -> Self
    where
        E: SpanExporter + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                spans: VecDeque::with_capacity(config.max_queue_size),
                ..Queue::default()
            }),
            work_available: Condvar::new(),
            dropped_spans: AtomicUsize::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_config = config.clone();
        let handle = thread::Builder::new()
            .name("microtrace-batch-processor".to_string())
            .spawn(move || run_worker(worker_shared, Box::new(exporter), worker_config))
            .expect("failed to spawn batch span processor thread");

        Self {
            shared,
            handle: Mutex::new(Some(handle)),
            is_shutdown: AtomicBool::new(false),
            config,
        }
    }

    /// Creates a builder for a processor around the given exporter.
    pub fn builder<E>(exporter: E) -> BatchSpanProcessorBuilder<E>
    where
        E: SpanExporter + 'static,
    {
        BatchSpanProcessorBuilder {
            exporter,
            config: BatchConfig::default(),
        }
    }

    /// Number of spans shed so far: buffer overflow, post-shutdown arrivals,
    /// rejected and retry-exhausted exports.
    pub fn dropped_spans(&self) -> usize {
        self.shared.dropped_spans.load(Ordering::Relaxed)
    }

    fn count_dropped(&self, count: usize) {
        let previous = self.shared.dropped_spans.fetch_add(count, Ordering::Relaxed);
        if previous == 0 {
            tracing::warn!(
                name: "BatchSpanProcessor.SpanDroppingStarted",
                "spans are being dropped; the exact total is reported at shutdown"
            );
        }
    }

    fn enqueue_control(&self, message: BatchMessage) -> SdkResult {
        match self.shared.queue.lock() {
            Ok(mut queue) => {
                if queue.shutdown_started {
                    return Err(SdkError::AlreadyShutdown);
                }
                queue.control.push_back(message);
                Ok(())
            }
            Err(err) => Err(SdkError::InternalFailure(format!(
                "span queue mutex poisoned: {err}"
            ))),
        }
    }
}

/// Builder for [`BatchSpanProcessor`].
#[derive(Debug)]
pub struct BatchSpanProcessorBuilder<E>
where
    E: SpanExporter + 'static,
{
    exporter: E,
    config: BatchConfig,
}

impl<E> BatchSpanProcessorBuilder<E>
where
    E: SpanExporter + 'static,
{
    /// Set the [`BatchConfig`] for the processor.
    pub fn with_batch_config(self, config: BatchConfig) -> Self {
        BatchSpanProcessorBuilder { config, ..self }
    }

    /// Build the processor, spawning its background thread.
    pub fn build(self) -> BatchSpanProcessor {
        BatchSpanProcessor::new(self.exporter, self.config)
    }
}

impl SpanProcessor for BatchSpanProcessor {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {
        // Ignored
    }

    fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            // Late arrivals from in-flight work are shed silently; a caller
            // ending a span must never observe a tracing failure.
            self.count_dropped(1);
            return;
        }

        let Ok(mut queue) = self.shared.queue.lock() else {
            return;
        };

        if queue.shutdown_started {
            drop(queue);
            self.count_dropped(1);
            return;
        }

        let mut reached_batch_size = false;
        if queue.spans.len() >= self.config.max_queue_size {
            match self.config.drop_policy {
                DropPolicy::DropOldest => {
                    queue.spans.pop_front();
                    queue.spans.push_back(span);
                }
                DropPolicy::DropNewest => {}
            }
            drop(queue);
            self.count_dropped(1);
        } else {
            if queue.spans.is_empty() {
                queue.oldest_enqueued = Some(Instant::now());
            }
            queue.spans.push_back(span);
            reached_batch_size = queue.spans.len() >= self.config.max_export_batch_size;
            drop(queue);
        }

        if reached_batch_size {
            self.shared.work_available.notify_one();
        }
    }

    fn force_flush(&self) -> SdkResult {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(SdkError::AlreadyShutdown);
        }

        let (ack, done) = sync_channel(1);
        self.enqueue_control(BatchMessage::Flush(ack))?;
        self.shared.work_available.notify_one();

        done.recv_timeout(self.config.export_timeout)
            .map_err(|_| SdkError::Timeout(self.config.export_timeout))?
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> SdkResult {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(SdkError::AlreadyShutdown);
        }

        let (ack, done) = sync_channel(1);
        match self.shared.queue.lock() {
            Ok(mut queue) => {
                queue.shutdown_started = true;
                queue.control.push_back(BatchMessage::Shutdown(ack));
            }
            Err(err) => {
                return Err(SdkError::InternalFailure(format!(
                    "span queue mutex poisoned: {err}"
                )))
            }
        }
        self.shared.work_available.notify_one();

        match done.recv_timeout(timeout) {
            Ok(result) => {
                if let Ok(mut handle) = self.handle.lock() {
                    if let Some(handle) = handle.take() {
                        let _ = handle.join();
                    }
                }
                result
            }
            Err(_) => {
                // Accepted-loss boundary: the worker keeps draining in the
                // background and exits on its own once done.
                tracing::warn!(
                    name: "BatchSpanProcessor.ShutdownTimedOut",
                    timeout_ms = timeout.as_millis() as u64,
                    "shutdown returned before the final drain finished"
                );
                Ok(())
            }
        }
    }

    fn set_resource(&mut self, resource: &Resource) {
        let _ = self.enqueue_control(BatchMessage::SetResource(resource.clone()));
        self.shared.work_available.notify_one();
    }
}

impl Drop for BatchSpanProcessor {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            let _ = self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT);
        }
    }
}

fn run_worker(shared: Arc<Shared>, mut exporter: Box<dyn SpanExporter>, config: BatchConfig) {
    loop {
        let (batch, controls) = {
            let mut queue = match shared.queue.lock() {
                Ok(queue) => queue,
                Err(poisoned) => poisoned.into_inner(),
            };

            loop {
                if !queue.control.is_empty() {
                    break;
                }
                if queue.spans.len() >= config.max_export_batch_size {
                    break;
                }
                let wait = match queue.oldest_enqueued {
                    Some(enqueued_at) => {
                        let waited = enqueued_at.elapsed();
                        if waited >= config.scheduled_delay {
                            break;
                        }
                        config.scheduled_delay - waited
                    }
                    None => config.scheduled_delay,
                };
                queue = match shared.work_available.wait_timeout(queue, wait) {
                    Ok((queue, _)) => queue,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }

            // Swap the buffer out whole; producers only ever contend with
            // this brief exchange, never with the export below.
            queue.oldest_enqueued = None;
            let batch = Vec::from(std::mem::take(&mut queue.spans));
            let controls: Vec<BatchMessage> = queue.control.drain(..).collect();
            (batch, controls)
        };

        let mut flush_acks = Vec::new();
        let mut shutdown_ack = None;
        for control in controls {
            match control {
                BatchMessage::SetResource(resource) => exporter.set_resource(&resource),
                BatchMessage::Flush(ack) => flush_acks.push(ack),
                BatchMessage::Shutdown(ack) => shutdown_ack = Some(ack),
            }
        }

        let result = if batch.is_empty() {
            Ok(())
        } else {
            // The final drain gets a single attempt; retrying against a
            // struggling backend would hold process exit hostage.
            let max_attempts = if shutdown_ack.is_some() {
                1
            } else {
                config.retry_policy.max_attempts.max(1)
            };
            export_batch(
                exporter.as_mut(),
                batch,
                &config.retry_policy,
                max_attempts,
                &shared.dropped_spans,
            )
        };

        for ack in flush_acks {
            let _ = ack.send(result.clone());
        }

        if let Some(ack) = shutdown_ack {
            exporter.shutdown();
            let dropped = shared.dropped_spans.load(Ordering::Relaxed);
            if dropped > 0 {
                tracing::warn!(
                    name: "BatchSpanProcessor.Shutdown",
                    dropped_spans = dropped,
                    "spans were dropped over this pipeline's lifetime"
                );
            }
            let _ = ack.send(result);
            return;
        }
    }
}

fn export_batch(
    exporter: &mut dyn SpanExporter,
    batch: Vec<SpanData>,
    policy: &RetryPolicy,
    max_attempts: usize,
    dropped_spans: &AtomicUsize,
) -> SdkResult {
    let batch_len = batch.len();
    let mut delays = policy.delays();
    let mut attempt = 1usize;

    loop {
        match block_on(exporter.export(batch.clone())) {
            ExportOutcome::Success => return Ok(()),
            ExportOutcome::PartialSuccess { accepted } => {
                let rejected = batch_len.saturating_sub(accepted);
                if rejected > 0 {
                    dropped_spans.fetch_add(rejected, Ordering::Relaxed);
                    tracing::debug!(
                        name: "BatchSpanProcessor.PartialExport",
                        rejected,
                        "backend accepted only part of the batch"
                    );
                }
                return Ok(());
            }
            ExportOutcome::Failure { retryable: true } if attempt < max_attempts => {
                attempt += 1;
                let delay = delays.next().unwrap_or_default();
                tracing::debug!(
                    name: "BatchSpanProcessor.ExportRetry",
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying batch after retryable export failure"
                );
                thread::sleep(delay);
            }
            ExportOutcome::Failure { retryable } => {
                dropped_spans.fetch_add(batch_len, Ordering::Relaxed);
                tracing::warn!(
                    name: "BatchSpanProcessor.ExportFailed",
                    retryable,
                    attempts = attempt,
                    dropped = batch_len,
                    "dropping batch"
                );
                return Err(SdkError::ExportFailed { retryable });
            }
        }
    }
}
