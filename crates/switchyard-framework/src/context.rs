//! Per-execution handler context.
//!
//! One [`HandlerContext`] is created for every matched descriptor of every
//! dispatched update. It carries the update, the bot, the ledger of filters
//! that passed for that descriptor, and the execution's cancellation and
//! lifetime tokens.

use std::sync::Arc;

use switchyard_core::{ApiError, ApiResult, BotInfo, BoxedBot, BoxedEvent};
use tokio_util::sync::CancellationToken;

use crate::awaiting::{Awaiter, AwaitingProvider};
use crate::descriptor::OrderKey;
use crate::filter::CompletedFilters;
use crate::handler::LifetimeToken;

/// The context handed to a handler execution.
pub struct HandlerContext {
    event: BoxedEvent,
    bot: BoxedBot,
    completed: CompletedFilters,
    display_name: Arc<str>,
    order: OrderKey,
    cancel: CancellationToken,
    lifetime: LifetimeToken,
    awaiting: Option<AwaitingProvider>,
}

impl HandlerContext {
    /// Creates a context for `event` with an empty ledger and fresh tokens.
    pub fn new(event: BoxedEvent, bot: BoxedBot) -> Self {
        Self {
            event,
            bot,
            completed: CompletedFilters::new(),
            display_name: Arc::from("anonymous"),
            order: OrderKey::default(),
            cancel: CancellationToken::new(),
            lifetime: LifetimeToken::new(),
            awaiting: None,
        }
    }

    pub fn with_completed(mut self, completed: CompletedFilters) -> Self {
        self.completed = completed;
        self
    }

    pub fn with_descriptor(mut self, display_name: Arc<str>, order: OrderKey) -> Self {
        self.display_name = display_name;
        self.order = order;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_lifetime(mut self, lifetime: LifetimeToken) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_awaiting(mut self, awaiting: AwaitingProvider) -> Self {
        self.awaiting = Some(awaiting);
        self
    }

    /// Returns a reference to the update being handled.
    pub fn event(&self) -> &BoxedEvent {
        &self.event
    }

    /// Returns a reference to the bot.
    pub fn bot(&self) -> &BoxedBot {
        &self.bot
    }

    pub fn bot_info(&self) -> &BotInfo {
        self.bot.info()
    }

    /// Filters that passed for this descriptor, in order.
    pub fn completed(&self) -> &CompletedFilters {
        &self.completed
    }

    /// Display name of the matched descriptor.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn order_key(&self) -> OrderKey {
        self.order
    }

    /// Cancellation token of this execution.
    ///
    /// Cancelling it does not affect sibling executions.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn lifetime(&self) -> &LifetimeToken {
        &self.lifetime
    }

    /// Returns an [`Awaiter`] bound to this update, if awaiting is available.
    pub fn awaiter(&self) -> Option<Awaiter> {
        self.awaiting
            .as_ref()
            .map(|provider| Awaiter::new(provider.clone(), self.event.clone(), self.cancel.clone()))
    }

    /// Sends `text` into the conversation the update came from.
    pub async fn reply(&self, text: &str) -> ApiResult<i64> {
        let chat_id = self
            .event
            .chat_id()
            .ok_or_else(|| ApiError::MissingSession(format!("{} update has no chat", self.event.kind())))?;
        self.bot.send_text(chat_id, text, &self.cancel).await
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("event", &self.event)
            .field("handler", &self.display_name)
            .field("order", &self.order)
            .field("completed", &self.completed.names())
            .finish_non_exhaustive()
    }
}
