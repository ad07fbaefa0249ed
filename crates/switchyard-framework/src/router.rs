//! Update routing.
//!
//! [`UpdateRouter`] is the dispatcher entry point. For each update it
//!
//! 1. offers the update to pending waits ([`AwaitingProvider`]); if any of
//!    them matches, the update is consumed there;
//! 2. otherwise resolves the regular matches ([`HandlerProvider`]) and
//!    enqueues each one on the [`HandlersPool`].
//!
//! Dispatch-time errors go to the [`ErrorSink`]; routing itself never fails.

use std::sync::Arc;

use switchyard_core::{BoxedBot, BoxedEvent};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span};

use crate::awaiting::AwaitingProvider;
use crate::error::{DispatchError, ErrorSink, TracingErrorSink};
use crate::pool::HandlersPool;
use crate::provider::{DescribedHandler, HandlerProvider};

/// What happened to one routed update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Pending waits the update was handed to.
    pub awaited: usize,
    /// Handlers scheduled on the pool.
    pub enqueued: usize,
    /// Dispatch errors reported to the sink.
    pub failed: usize,
}

impl RouteOutcome {
    /// Returns `true` if nothing took the update.
    pub fn is_unhandled(&self) -> bool {
        self.awaited == 0 && self.enqueued == 0
    }
}

/// Dispatches updates to pending waits and registered handlers.
pub struct UpdateRouter {
    provider: Arc<HandlerProvider>,
    awaiting: AwaitingProvider,
    pool: HandlersPool,
    bot: BoxedBot,
    sink: Arc<dyn ErrorSink>,
    cancel: CancellationToken,
}

impl UpdateRouter {
    /// Starts building a router over a frozen `provider`.
    pub fn builder(provider: HandlerProvider, bot: BoxedBot) -> RouterBuilder {
        RouterBuilder {
            provider,
            bot,
            sink: None,
            awaiting: None,
            cancel: None,
        }
    }

    pub fn provider(&self) -> &HandlerProvider {
        &self.provider
    }

    pub fn awaiting(&self) -> &AwaitingProvider {
        &self.awaiting
    }

    pub fn pool(&self) -> &HandlersPool {
        &self.pool
    }

    pub fn bot(&self) -> &BoxedBot {
        &self.bot
    }

    /// Token cancelling every execution started by this router.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Routes one update.
    ///
    /// Returns once pending waits have been released and regular handlers
    /// have been enqueued; it does not wait for those handlers to finish.
    pub async fn route(&self, event: BoxedEvent) -> RouteOutcome {
        let span = debug_span!("dispatch", kind = %event.kind(), update_id = ?event.update_id());
        async move {
            let bot = self.bot.info();
            let mut outcome = RouteOutcome::default();

            for matched in self.awaiting.get_matches(&event, bot) {
                match matched {
                    Ok(matched) => {
                        self.release(&event, matched).await;
                        outcome.awaited += 1;
                    }
                    Err(err) => {
                        outcome.failed += 1;
                        self.sink.report(err);
                    }
                }
            }
            if outcome.awaited > 0 {
                debug!(awaited = outcome.awaited, "Update consumed by pending waits");
                return outcome;
            }

            for matched in self.provider.get_matches(&event, bot) {
                match matched {
                    Ok(matched) => {
                        debug!(handler = %matched.display_name(), "Handler enqueued");
                        self.pool.enqueue(&event, matched);
                        outcome.enqueued += 1;
                    }
                    Err(err) => {
                        outcome.failed += 1;
                        self.sink.report(err);
                    }
                }
            }
            if outcome.is_unhandled() {
                debug!("No handler matched");
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Runs a matched awaiting handler in place.
    ///
    /// Awaiting handlers only hand the update over, so running them inline
    /// keeps the release ordered with later updates.
    async fn release(&self, event: &BoxedEvent, matched: DescribedHandler) {
        let ctx = Arc::new(self.pool.context(event, &matched, self.cancel.child_token()));
        let result = matched.handler.execute(ctx).await;
        matched.lifetime.end();
        if let Err(source) = result {
            self.sink.report(DispatchError::HandlerFaulted {
                handler: matched.display_name().to_string(),
                kind: event.kind(),
                update_id: event.update_id(),
                source,
            });
        }
    }

    /// Waits for every enqueued execution to finish.
    pub async fn shutdown(&self) {
        debug!(in_flight = self.pool.in_flight(), "Draining handler pool");
        self.pool.drain().await;
    }
}

impl std::fmt::Debug for UpdateRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateRouter")
            .field("provider", &self.provider)
            .field("awaiting", &self.awaiting)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Builder for [`UpdateRouter`].
pub struct RouterBuilder {
    provider: HandlerProvider,
    bot: BoxedBot,
    sink: Option<Arc<dyn ErrorSink>>,
    awaiting: Option<AwaitingProvider>,
    cancel: Option<CancellationToken>,
}

impl RouterBuilder {
    /// Replaces the default [`TracingErrorSink`].
    pub fn error_sink(mut self, sink: impl ErrorSink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Shares an existing awaiting provider.
    pub fn awaiting(mut self, awaiting: AwaitingProvider) -> Self {
        self.awaiting = Some(awaiting);
        self
    }

    /// Parent token for every execution.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> UpdateRouter {
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingErrorSink));
        let awaiting = self.awaiting.unwrap_or_default();
        let cancel = self.cancel.unwrap_or_default();
        let pool = HandlersPool::new(self.bot.clone(), sink.clone(), cancel.clone()).with_awaiting(awaiting.clone());

        UpdateRouter {
            provider: Arc::new(self.provider),
            awaiting,
            pool,
            bot: self.bot,
            sink,
            cancel,
        }
    }
}
