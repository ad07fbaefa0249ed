//! Per-bucket execution pools.
//!
//! Matched handlers are executed on tokio tasks. The concurrency bucket of
//! a descriptor (`OrderKey::concurrency`) selects a semaphore: bucket `N > 0`
//! allows at most `N` executions of that bucket at once, bucket `0` and below
//! are unbounded. Executions never block the task that enqueues them.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use switchyard_core::{BoxedBot, BoxedEvent};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, debug_span};

use crate::awaiting::AwaitingProvider;
use crate::context::HandlerContext;
use crate::error::{BoxError, DispatchError, ErrorSink, HandlerResult};
use crate::provider::DescribedHandler;

/// Executes matched handlers under their bucket's concurrency limit.
pub struct HandlersPool {
    bot: BoxedBot,
    sink: Arc<dyn ErrorSink>,
    awaiting: Option<AwaitingProvider>,
    cancel: CancellationToken,
    buckets: Mutex<HashMap<i32, Arc<Semaphore>>>,
    tracker: TaskTracker,
}

impl HandlersPool {
    /// Creates a pool. Cancelling `cancel` cancels every execution.
    pub fn new(bot: BoxedBot, sink: Arc<dyn ErrorSink>, cancel: CancellationToken) -> Self {
        Self {
            bot,
            sink,
            awaiting: None,
            cancel,
            buckets: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Makes the await primitive available to executed handlers.
    pub fn with_awaiting(mut self, awaiting: AwaitingProvider) -> Self {
        self.awaiting = Some(awaiting);
        self
    }

    pub fn bot(&self) -> &BoxedBot {
        &self.bot
    }

    pub fn sink(&self) -> &Arc<dyn ErrorSink> {
        &self.sink
    }

    /// Number of executions that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    fn semaphore(&self, bucket: i32) -> Option<Arc<Semaphore>> {
        if bucket <= 0 {
            return None;
        }
        let mut buckets = self.buckets.lock();
        let semaphore = buckets
            .entry(bucket)
            .or_insert_with(|| Arc::new(Semaphore::new(bucket as usize)));
        Some(semaphore.clone())
    }

    /// Builds the context a matched handler runs with.
    pub(crate) fn context(&self, event: &BoxedEvent, matched: &DescribedHandler, cancel: CancellationToken) -> HandlerContext {
        let ctx = HandlerContext::new(event.clone(), self.bot.clone())
            .with_completed(matched.completed.clone())
            .with_descriptor(matched.descriptor.shared_name(), matched.descriptor.order_key())
            .with_cancellation(cancel)
            .with_lifetime(matched.lifetime.clone());
        match &self.awaiting {
            Some(awaiting) => ctx.with_awaiting(awaiting.clone()),
            None => ctx,
        }
    }

    /// Schedules `matched` for execution and returns immediately.
    ///
    /// The execution waits for a permit of its bucket, runs the handler,
    /// ends the handler's lifetime and reports a fault (error or panic) to
    /// the error sink. Each execution gets its own child cancellation token.
    pub fn enqueue(&self, event: &BoxedEvent, matched: DescribedHandler) -> JoinHandle<()> {
        let key = matched.descriptor.order_key();
        let cancel = self.cancel.child_token();
        let ctx = Arc::new(self.context(event, &matched, cancel.clone()));
        let semaphore = self.semaphore(key.concurrency);
        let sink = self.sink.clone();
        let name = matched.descriptor.shared_name();
        let kind = event.kind();
        let update_id = event.update_id();
        let DescribedHandler { handler, lifetime, .. } = matched;

        let span = debug_span!("handler", handler = %name, key = %key, kind = %kind);
        self.tracker.spawn(
            async move {
                let _permit = match semaphore {
                    Some(semaphore) => {
                        let permit = tokio::select! {
                            permit = semaphore.acquire_owned() => permit.ok(),
                            _ = cancel.cancelled() => None,
                        };
                        if permit.is_none() {
                            debug!("Cancelled while waiting for a bucket permit");
                            lifetime.end();
                            return;
                        }
                        permit
                    }
                    None => None,
                };

                let outcome = tokio::select! {
                    result = AssertUnwindSafe(handler.execute(ctx)).catch_unwind() => Some(result),
                    _ = cancel.cancelled() => None,
                };
                lifetime.end();

                let result: HandlerResult = match outcome {
                    Some(Ok(result)) => result,
                    Some(Err(panic)) => Err(panic_error(panic)),
                    None => {
                        debug!("Handler cancelled");
                        return;
                    }
                };

                match result {
                    Ok(()) => debug!("Handler completed"),
                    Err(source) => sink.report(DispatchError::HandlerFaulted {
                        handler: name.to_string(),
                        kind,
                        update_id,
                        source,
                    }),
                }
            }
            .instrument(span),
        )
    }

    /// Stops accepting executions and waits for the in-flight ones.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl std::fmt::Debug for HandlersPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlersPool")
            .field("in_flight", &self.in_flight())
            .field("buckets", &self.buckets.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> BoxError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("handler panicked: {message}").into()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use switchyard_core::EventKind;

    use super::*;
    use crate::descriptor::Descriptor;
    use crate::filter::CompletedFilters;
    use crate::filter::tests::event;
    use crate::handler::{LifetimeToken, UpdateHandler};
    use crate::testing::MockBot;

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    struct Busy(Arc<Gauge>);

    #[async_trait]
    impl UpdateHandler for Busy {
        async fn execute(&self, _ctx: Arc<HandlerContext>) -> HandlerResult {
            let now = self.0.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.0.current.fetch_sub(1, Ordering::SeqCst);
            self.0.done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl UpdateHandler for Panicking {
        async fn execute(&self, _ctx: Arc<HandlerContext>) -> HandlerResult {
            panic!("boom");
        }
    }

    struct Forever;

    #[async_trait]
    impl UpdateHandler for Forever {
        async fn execute(&self, _ctx: Arc<HandlerContext>) -> HandlerResult {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn matched<H: UpdateHandler>(handler: H, concurrency: i32) -> DescribedHandler {
        let descriptor = Arc::new(Descriptor::builder(EventKind::Message).order(concurrency, 0).ephemeral(handler));
        DescribedHandler {
            handler: descriptor.instantiate(None).unwrap(),
            descriptor,
            completed: CompletedFilters::new(),
            lifetime: LifetimeToken::new(),
        }
    }

    fn collecting() -> (Arc<dyn ErrorSink>, Arc<Mutex<Vec<DispatchError>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        (Arc::new(move |err: DispatchError| sink.lock().push(err)), errors)
    }

    #[tokio::test]
    async fn test_bucket_limits_concurrency() {
        let (sink, _) = collecting();
        let pool = HandlersPool::new(MockBot::boxed(), sink, CancellationToken::new());
        let gauge = Arc::new(Gauge::default());

        for _ in 0..4 {
            pool.enqueue(&event(), matched(Busy(gauge.clone()), 1));
        }
        pool.drain().await;

        assert_eq!(gauge.done.load(Ordering::SeqCst), 4);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unbounded_bucket_runs_in_parallel() {
        let (sink, _) = collecting();
        let pool = HandlersPool::new(MockBot::boxed(), sink, CancellationToken::new());
        let gauge = Arc::new(Gauge::default());

        for _ in 0..3 {
            pool.enqueue(&event(), matched(Busy(gauge.clone()), 0));
        }
        pool.drain().await;

        assert_eq!(gauge.done.load(Ordering::SeqCst), 3);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_fault() {
        let (sink, errors) = collecting();
        let pool = HandlersPool::new(MockBot::boxed(), sink, CancellationToken::new());
        let job = matched(Panicking, 0);
        let lifetime = job.lifetime.clone();

        pool.enqueue(&event(), job).await.unwrap();

        assert!(lifetime.has_ended());
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].handler(), "Panicking");
        assert!(errors[0].to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_cancellation_ends_lifetime_without_fault() {
        let (sink, errors) = collecting();
        let cancel = CancellationToken::new();
        let pool = HandlersPool::new(MockBot::boxed(), sink, cancel.clone());
        let job = matched(Forever, 0);
        let lifetime = job.lifetime.clone();

        let handle = pool.enqueue(&event(), job);
        tokio::task::yield_now().await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(lifetime.has_ended());
        assert!(errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight_executions() {
        let (sink, _) = collecting();
        let cancel = CancellationToken::new();
        let pool = HandlersPool::new(MockBot::boxed(), sink, cancel.clone());
        let handle = pool.enqueue(&event(), matched(Forever, 0));
        assert_eq!(pool.in_flight(), 1);

        let mut drain = tokio_test::task::spawn(pool.drain());
        tokio_test::assert_pending!(drain.poll());

        cancel.cancel();
        handle.await.unwrap();
        tokio_test::assert_ready!(drain.poll());
        assert_eq!(pool.in_flight(), 0);
    }
}
