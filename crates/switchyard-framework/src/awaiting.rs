//! The await primitive.
//!
//! Handler code can suspend until a follow-up update arrives that resolves
//! to the same correlation key as the update it is handling:
//!
//! ```rust,ignore
//! async fn confirm(awaiter: Awaiter, bot: BoxedBot) -> HandlerResult {
//!     let answer: CallbackQuery = awaiter
//!         .next(EventKind::CallbackQuery)
//!         .keyed_by(ChatIdResolver)
//!         .callback_filter(CallbackDataStartsWith::new("confirm:"))
//!         .wait_for()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! Each wait registers a synthetic descriptor in the [`AwaitingProvider`]
//! under a unique service key. The router consults that provider before the
//! regular handlers; when the synthetic descriptor matches, its handler
//! hands the update over a oneshot channel. The descriptor is removed when
//! the wait returns, whether it was released, cancelled or dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use switchyard_core::{BotInfo, BoxedEvent, CallbackQuery, EventKind, Message};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::context::HandlerContext;
use crate::descriptor::{Descriptor, OrderKey};
use crate::error::{AwaitError, AwaitResult, FilterResult, HandlerResult, RegistrationError, RegistrationResult};
use crate::extract::{FromUpdate, project};
use crate::filter::builtin::{on_callback, on_message};
use crate::filter::{BoxedFilter, Filter, FilterContext, FilterModifier};
use crate::handler::UpdateHandler;
use crate::options::DispatchOptions;
use crate::provider::Matches;
use crate::registry::DescriptorList;
use crate::state::{KeyResolver, SenderIdResolver, StateKeyFilter};

// ============================================================================
// Awaiting Provider
// ============================================================================

/// Unfrozen descriptor lists dedicated to awaiting, one per kind.
///
/// Cloning is cheap; clones share the same lists.
#[derive(Clone)]
pub struct AwaitingProvider {
    lists: Arc<HashMap<EventKind, DescriptorList>>,
}

impl AwaitingProvider {
    pub fn new() -> Self {
        let options = DispatchOptions::default();
        let lists = std::iter::once(EventKind::Unknown)
            .chain(EventKind::RECOGNIZED)
            .map(|kind| (kind, DescriptorList::for_kind(kind, &options)))
            .collect();
        Self { lists: Arc::new(lists) }
    }

    /// Registers `descriptor` until the returned guard is dropped.
    pub fn use_handler(&self, descriptor: Descriptor) -> RegistrationResult<AwaitGuard> {
        let kind = descriptor.kind();
        let Some(list) = self.lists.get(&kind) else {
            return Err(RegistrationError::KindMismatch {
                expected: EventKind::Unknown,
                got: kind,
            });
        };
        let key = list.add(descriptor)?;
        Ok(AwaitGuard {
            provider: self.clone(),
            kind,
            key,
        })
    }

    fn remove(&self, kind: EventKind, key: OrderKey) -> bool {
        self.lists.get(&kind).is_some_and(|list| list.remove(key))
    }

    /// Resolves the awaiting descriptors matching `event`.
    ///
    /// Waits for the update's own kind and any-kind waits are both
    /// consulted, highest key first.
    pub fn get_matches(&self, event: &BoxedEvent, bot: &BotInfo) -> Matches {
        Matches::new(event.clone(), bot.clone(), self.candidates(event.kind()), None, false)
    }

    fn candidates(&self, kind: EventKind) -> Vec<Arc<Descriptor>> {
        let mut descriptors = self.lists.get(&kind).map(DescriptorList::snapshot).unwrap_or_default();
        if !kind.is_any() {
            if let Some(any) = self.lists.get(&EventKind::Unknown) {
                descriptors.extend(any.snapshot());
                descriptors.sort_by(|a, b| b.order_key().cmp(&a.order_key()));
            }
        }
        descriptors
    }

    /// Number of pending waits.
    pub fn len(&self) -> usize {
        self.lists.values().map(DescriptorList::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if a wait registered under `service_key` is pending.
    pub fn contains_service_key(&self, service_key: &str) -> bool {
        self.lists.values().any(|list| {
            list.snapshot()
                .iter()
                .any(|descriptor| descriptor.service_key() == Some(service_key))
        })
    }
}

impl Default for AwaitingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AwaitingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwaitingProvider")
            .field("pending", &self.len())
            .finish()
    }
}

/// Keeps an awaiting descriptor registered. Removes it on drop.
pub struct AwaitGuard {
    provider: AwaitingProvider,
    kind: EventKind,
    key: OrderKey,
}

impl AwaitGuard {
    pub fn order_key(&self) -> OrderKey {
        self.key
    }
}

impl Drop for AwaitGuard {
    fn drop(&mut self) {
        let removed = self.provider.remove(self.kind, self.key);
        trace!(kind = %self.kind, key = %self.key, removed, "Awaiting descriptor removed");
    }
}

// ============================================================================
// Synthetic Handler
// ============================================================================

type Slot = Arc<Mutex<Option<oneshot::Sender<BoxedEvent>>>>;

/// Hands the matched update to the waiting task. Fires at most once.
struct AwaitHandler {
    slot: Slot,
}

#[async_trait]
impl UpdateHandler for AwaitHandler {
    async fn execute(&self, ctx: Arc<HandlerContext>) -> HandlerResult {
        if let Some(sender) = self.slot.lock().take() {
            // The waiter may already be gone.
            let _ = sender.send(ctx.event().clone());
        }
        Ok(())
    }
}

/// Passes until the wait has been released.
struct AwaitPending {
    slot: Slot,
}

impl Filter<BoxedEvent> for AwaitPending {
    fn can_pass(&self, _ctx: &mut FilterContext<'_, BoxedEvent>) -> FilterResult {
        Ok(self.slot.lock().is_some())
    }

    fn name(&self) -> &'static str {
        "AwaitPending"
    }
}

// ============================================================================
// Awaiter
// ============================================================================

/// Entry point of the await primitive, bound to the update being handled.
#[derive(Clone)]
pub struct Awaiter {
    provider: AwaitingProvider,
    origin: BoxedEvent,
    cancel: CancellationToken,
}

impl Awaiter {
    pub fn new(provider: AwaitingProvider, origin: BoxedEvent, cancel: CancellationToken) -> Self {
        Self {
            provider,
            origin,
            cancel,
        }
    }

    /// The update the wait is correlated with.
    pub fn origin(&self) -> &BoxedEvent {
        &self.origin
    }

    /// Starts describing the next update of `kind` to wait for.
    ///
    /// Correlates by sender unless [`keyed_by`](AwaitBuilder::keyed_by) says
    /// otherwise.
    pub fn next(&self, kind: EventKind) -> AwaitBuilder<SenderIdResolver> {
        AwaitBuilder {
            awaiter: self.clone(),
            kind,
            resolver: SenderIdResolver,
            key: OrderKey::default(),
            filters: Vec::new(),
            extra_cancel: None,
        }
    }
}

impl std::fmt::Debug for Awaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Awaiter")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Describes one wait. Created by [`Awaiter::next`].
pub struct AwaitBuilder<R: KeyResolver> {
    awaiter: Awaiter,
    kind: EventKind,
    resolver: R,
    key: OrderKey,
    filters: Vec<(FilterModifier, BoxedFilter)>,
    extra_cancel: Option<CancellationToken>,
}

impl<R: KeyResolver> AwaitBuilder<R> {
    /// Correlates updates with `resolver` instead.
    pub fn keyed_by<K: KeyResolver>(self, resolver: K) -> AwaitBuilder<K> {
        AwaitBuilder {
            awaiter: self.awaiter,
            kind: self.kind,
            resolver,
            key: self.key,
            filters: self.filters,
            extra_cancel: self.extra_cancel,
        }
    }

    /// Sets the order key of the synthetic descriptor.
    ///
    /// Colliding keys are shifted like regular registrations.
    pub fn order(mut self, concurrency: i32, priority: i32) -> Self {
        self.key = OrderKey::new(concurrency, priority);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.key.priority = priority;
        self
    }

    pub fn filter<F: Filter<BoxedEvent>>(self, filter: F) -> Self {
        self.filter_with(FilterModifier::empty(), filter)
    }

    pub fn filter_with<F: Filter<BoxedEvent>>(mut self, modifier: FilterModifier, filter: F) -> Self {
        self.filters.push((modifier, Arc::new(filter)));
        self
    }

    pub fn message_filter<F: Filter<Message>>(self, filter: F) -> Self {
        self.filter(on_message(filter))
    }

    pub fn callback_filter<F: Filter<CallbackQuery>>(self, filter: F) -> Self {
        self.filter(on_callback(filter))
    }

    /// Also gives up when `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.extra_cancel = Some(token);
        self
    }

    /// Suspends until a matching update arrives and returns it.
    ///
    /// # Errors
    ///
    /// - [`AwaitError::NoKey`] if the origin update has no correlation key.
    /// - [`AwaitError::Cancelled`] if the execution (or the extra token) is
    ///   cancelled first.
    /// - [`AwaitError::Closed`] if the synthetic handler was dropped.
    pub async fn wait(self) -> AwaitResult<BoxedEvent> {
        let AwaitBuilder {
            awaiter,
            kind,
            resolver,
            key: order,
            filters,
            extra_cancel,
        } = self;

        let resolver_name = resolver.name();
        let key = resolver
            .resolve_key(&awaiter.origin)
            .ok_or(AwaitError::NoKey { resolver: resolver_name })?;

        let (tx, rx) = oneshot::channel();
        let slot: Slot = Arc::new(Mutex::new(Some(tx)));
        let service_key = Uuid::new_v4().to_string();
        debug!(kind = %kind, key = ?key, service_key = %service_key, "Awaiting update");

        let mut builder = Descriptor::builder(kind)
            .name(format!("await {kind} by {resolver_name}"))
            .order(order.concurrency, order.priority)
            .service_key(service_key)
            .validator(StateKeyFilter::new(resolver, key))
            .state(AwaitPending { slot: slot.clone() });
        for (modifier, filter) in filters {
            builder = builder.filter_with(modifier, filter);
        }
        let guard = awaiter.provider.use_handler(builder.ephemeral(AwaitHandler { slot }))?;

        let result = tokio::select! {
            biased;
            received = rx => received.map_err(|_| AwaitError::Closed),
            _ = awaiter.cancel.cancelled() => Err(AwaitError::Cancelled),
            _ = cancelled(extra_cancel.as_ref()) => Err(AwaitError::Cancelled),
        };
        drop(guard);
        result
    }

    /// Like [`wait`](Self::wait), projecting the update onto `T`.
    pub async fn wait_for<T: FromUpdate>(self) -> AwaitResult<T> {
        let event = self.wait().await?;
        project::<T>(&event).ok_or(AwaitError::MissingProjection(T::NAME))
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::{Chat, Update, User};

    use super::*;
    use crate::filter::builtin::CallbackDataEquals;
    use crate::state::ChatIdResolver;
    use crate::testing::MockBot;

    fn bot() -> BotInfo {
        BotInfo::new(1, "yard_bot")
    }

    fn message(chat: i64) -> BoxedEvent {
        BoxedEvent::new(Update::from_message(
            1,
            Message::new(1, Chat::private(chat)).from_user(User::new(chat, "ann")),
        ))
    }

    fn callback(chat: i64, data: &str) -> BoxedEvent {
        let query = CallbackQuery::new("q", User::new(chat, "ann"))
            .on_message(Message::new(2, Chat::private(chat)))
            .data(data);
        BoxedEvent::new(Update::from_callback(2, query))
    }

    async fn registered(provider: &AwaitingProvider) {
        while provider.is_empty() {
            tokio::task::yield_now().await;
        }
    }

    async fn deliver(provider: &AwaitingProvider, event: &BoxedEvent) -> usize {
        let mut released = 0;
        for matched in provider.get_matches(event, &bot()) {
            let matched = matched.unwrap();
            let ctx = HandlerContext::new(event.clone(), MockBot::boxed());
            matched.handler.execute(Arc::new(ctx)).await.unwrap();
            released += 1;
        }
        released
    }

    #[tokio::test]
    async fn test_wait_is_released_by_correlated_update() {
        let provider = AwaitingProvider::new();
        let awaiter = Awaiter::new(provider.clone(), message(42), CancellationToken::new());
        let task = tokio::spawn(async move {
            awaiter
                .next(EventKind::CallbackQuery)
                .keyed_by(ChatIdResolver)
                .callback_filter(CallbackDataEquals::new("yes"))
                .wait_for::<CallbackQuery>()
                .await
        });
        registered(&provider).await;

        assert_eq!(deliver(&provider, &callback(99, "yes")).await, 0);
        assert_eq!(deliver(&provider, &callback(42, "no")).await, 0);
        assert_eq!(deliver(&provider, &callback(42, "yes")).await, 1);
        assert_eq!(deliver(&provider, &callback(42, "yes")).await, 0);

        let query = task.await.unwrap().unwrap();
        assert_eq!(query.data.as_deref(), Some("yes"));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_removes_descriptor() {
        let provider = AwaitingProvider::new();
        let cancel = CancellationToken::new();
        let awaiter = Awaiter::new(provider.clone(), message(42), cancel.clone());
        let task = tokio::spawn(async move { awaiter.next(EventKind::Message).wait().await });
        registered(&provider).await;

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(AwaitError::Cancelled)));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_extra_token_cancels() {
        let provider = AwaitingProvider::new();
        let extra = CancellationToken::new();
        let awaiter = Awaiter::new(provider.clone(), message(42), CancellationToken::new());
        let token = extra.clone();
        let task = tokio::spawn(async move { awaiter.next(EventKind::Message).cancel_on(token).wait().await });
        registered(&provider).await;

        extra.cancel();
        assert!(matches!(task.await.unwrap(), Err(AwaitError::Cancelled)));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_waits_do_not_interfere() {
        let provider = AwaitingProvider::new();
        let first = Awaiter::new(provider.clone(), message(1), CancellationToken::new());
        let second = Awaiter::new(provider.clone(), message(2), CancellationToken::new());
        let first = tokio::spawn(async move { first.next(EventKind::Message).keyed_by(ChatIdResolver).wait().await });
        let second = tokio::spawn(async move { second.next(EventKind::Message).keyed_by(ChatIdResolver).wait().await });
        while provider.len() < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(deliver(&provider, &message(2)).await, 1);
        assert_eq!(second.await.unwrap().unwrap().chat_id(), Some(2));
        assert_eq!(provider.len(), 1);

        assert_eq!(deliver(&provider, &message(1)).await, 1);
        assert_eq!(first.await.unwrap().unwrap().chat_id(), Some(1));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_any_kind_wait_sees_updates_while_kind_waits_pend() {
        let provider = AwaitingProvider::new();
        let any = Awaiter::new(provider.clone(), message(1), CancellationToken::new());
        let button = Awaiter::new(provider.clone(), message(2), CancellationToken::new());
        let any = tokio::spawn(async move { any.next(EventKind::Unknown).keyed_by(ChatIdResolver).wait().await });
        let button = tokio::spawn(async move {
            button
                .next(EventKind::CallbackQuery)
                .keyed_by(ChatIdResolver)
                .wait()
                .await
        });
        while provider.len() < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(deliver(&provider, &callback(1, "go")).await, 1);
        assert_eq!(any.await.unwrap().unwrap().chat_id(), Some(1));
        assert_eq!(provider.len(), 1);

        assert_eq!(deliver(&provider, &callback(2, "go")).await, 1);
        assert_eq!(button.await.unwrap().unwrap().chat_id(), Some(2));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_wait_order_key_is_applied() {
        let provider = AwaitingProvider::new();
        let low = Awaiter::new(provider.clone(), message(1), CancellationToken::new());
        let high = Awaiter::new(provider.clone(), message(1), CancellationToken::new());
        let cancel = CancellationToken::new();
        let (first, second) = (cancel.clone(), cancel.clone());
        let low = tokio::spawn(async move { low.next(EventKind::Message).cancel_on(first).wait().await });
        let high = tokio::spawn(async move {
            high.next(EventKind::Unknown)
                .order(2, 5)
                .cancel_on(second)
                .wait()
                .await
        });
        while provider.len() < 2 {
            tokio::task::yield_now().await;
        }

        let keys: Vec<OrderKey> = provider
            .candidates(EventKind::Message)
            .iter()
            .map(|descriptor| descriptor.order_key())
            .collect();
        assert_eq!(keys, [OrderKey::new(2, 5), OrderKey::new(0, 0)]);

        cancel.cancel();
        assert!(matches!(low.await.unwrap(), Err(AwaitError::Cancelled)));
        assert!(matches!(high.await.unwrap(), Err(AwaitError::Cancelled)));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_origin_without_key_fails_fast() {
        let provider = AwaitingProvider::new();
        let awaiter = Awaiter::new(provider.clone(), BoxedEvent::new(Update::default()), CancellationToken::new());

        let err = awaiter.next(EventKind::Message).wait().await.unwrap_err();
        assert!(matches!(err, AwaitError::NoKey { resolver: "sender id" }));
        assert!(provider.is_empty());
    }
}
