//! Keyed state routing.
//!
//! A [`KeyResolver`] extracts a correlation key from an update (the chat it
//! came from, the user who sent it, ...). Keys are used two ways:
//!
//! - [`StateKeyFilter`] passes when an update resolves to one fixed key. The
//!   await primitive binds one to the key of the update that started the
//!   wait.
//! - [`StateKeeper`] stores one state value per key in a [`StateStore`], and
//!   [`StateFilter`] matches handlers against the stored state. Store entries
//!   are keyed by [`StateKey`], the resolver type plus the resolved key, so
//!   keepers over different resolvers can share one store.
//!
//! ```rust,ignore
//! let keeper = StateKeeper::<_, Step>::new(ChatIdResolver);
//!
//! registry.register(
//!     Descriptor::builder(EventKind::Message)
//!         .state(keeper.filter(StateMatch::Exact(Step::AskName)))
//!         .handler(ask_name),
//! )?;
//! ```

use std::any::TypeId;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use switchyard_core::BoxedEvent;

use crate::error::FilterResult;
use crate::filter::{Filter, FilterContext};

// ============================================================================
// Key Resolvers
// ============================================================================

/// Resolves a correlation key from an update.
pub trait KeyResolver: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Returns `None` if the update carries no identifiable key.
    fn resolve_key(&self, event: &BoxedEvent) -> Option<Self::Key>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Keys updates by the chat they belong to.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatIdResolver;

impl KeyResolver for ChatIdResolver {
    type Key = i64;

    fn resolve_key(&self, event: &BoxedEvent) -> Option<i64> {
        event.chat_id()
    }

    fn name(&self) -> &'static str {
        "chat id"
    }
}

/// Keys updates by their sender.
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderIdResolver;

impl KeyResolver for SenderIdResolver {
    type Key = i64;

    fn resolve_key(&self, event: &BoxedEvent) -> Option<i64> {
        event.sender_id()
    }

    fn name(&self) -> &'static str {
        "sender id"
    }
}

/// Passes when the update resolves to `target`.
///
/// An update without a key does not pass.
pub struct StateKeyFilter<R: KeyResolver> {
    resolver: R,
    target: R::Key,
}

impl<R: KeyResolver> StateKeyFilter<R> {
    pub fn new(resolver: R, target: R::Key) -> Self {
        Self { resolver, target }
    }

    pub fn target(&self) -> &R::Key {
        &self.target
    }
}

impl<R: KeyResolver> Filter<BoxedEvent> for StateKeyFilter<R> {
    fn can_pass(&self, ctx: &mut FilterContext<'_, BoxedEvent>) -> FilterResult {
        Ok(self
            .resolver
            .resolve_key(ctx.event)
            .is_some_and(|key| key == self.target))
    }

    fn name(&self) -> &'static str {
        "StateKeyFilter"
    }
}

// ============================================================================
// State Store
// ============================================================================

/// Key of one store entry: which resolver produced it, and the key itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey<K> {
    resolver: TypeId,
    key: K,
}

impl<K> StateKey<K> {
    /// Key `key` as resolved by `R`.
    pub fn new<R: KeyResolver<Key = K>>(key: K) -> Self {
        Self {
            resolver: TypeId::of::<R>(),
            key,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }
}

/// Storage behind a [`StateKeeper`]. Last write wins.
pub trait StateStore<K, S>: Send + Sync + 'static {
    fn get(&self, key: &K) -> Option<S>;

    fn set(&self, key: K, state: S);

    /// Returns `true` if a value was removed.
    fn delete(&self, key: &K) -> bool;
}

/// In-memory [`StateStore`] over a concurrent map.
pub struct MemoryStateStore<K, S> {
    states: DashMap<K, S>,
}

impl<K: Eq + Hash, S> MemoryStateStore<K, S> {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl<K: Eq + Hash, S> Default for MemoryStateStore<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S> StateStore<K, S> for MemoryStateStore<K, S>
where
    K: Eq + Hash + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<S> {
        self.states.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: K, state: S) {
        self.states.insert(key, state);
    }

    fn delete(&self, key: &K) -> bool {
        self.states.remove(key).is_some()
    }
}

// ============================================================================
// State Keeper
// ============================================================================

/// Per-key state, resolved from updates through a [`KeyResolver`].
///
/// Cloning is cheap; clones share the same store.
pub struct StateKeeper<R: KeyResolver, S> {
    inner: Arc<KeeperInner<R, S>>,
}

struct KeeperInner<R: KeyResolver, S> {
    resolver: R,
    store: Arc<dyn StateStore<StateKey<R::Key>, S>>,
}

impl<R, S> StateKeeper<R, S>
where
    R: KeyResolver,
    S: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a keeper backed by a fresh [`MemoryStateStore`].
    pub fn new(resolver: R) -> Self {
        Self::with_store(resolver, Arc::new(MemoryStateStore::new()))
    }

    /// Creates a keeper over a shared store.
    pub fn with_store(resolver: R, store: Arc<dyn StateStore<StateKey<R::Key>, S>>) -> Self {
        Self {
            inner: Arc::new(KeeperInner { resolver, store }),
        }
    }

    pub fn resolver(&self) -> &R {
        &self.inner.resolver
    }

    fn state_key(key: R::Key) -> StateKey<R::Key> {
        StateKey::new::<R>(key)
    }

    /// Returns the state stored for the update's key.
    ///
    /// `None` if the key is unset or the update has no key.
    pub fn get_state(&self, event: &BoxedEvent) -> Option<S> {
        self.inner
            .resolver
            .resolve_key(event)
            .and_then(|key| self.inner.store.get(&Self::state_key(key)))
    }

    pub fn get(&self, key: &R::Key) -> Option<S> {
        self.inner.store.get(&Self::state_key(key.clone()))
    }

    /// Stores `state` under `key`. `None` clears the key.
    pub fn set_state(&self, key: R::Key, state: Option<S>) {
        let key = Self::state_key(key);
        match state {
            Some(state) => self.inner.store.set(key, state),
            None => {
                self.inner.store.delete(&key);
            }
        }
    }

    /// Stores `state` under the key of `event`.
    ///
    /// Returns `false` if the update has no key.
    pub fn set_state_for(&self, event: &BoxedEvent, state: Option<S>) -> bool {
        match self.inner.resolver.resolve_key(event) {
            Some(key) => {
                self.set_state(key, state);
                true
            }
            None => false,
        }
    }

    pub fn delete(&self, key: &R::Key) -> bool {
        self.inner.store.delete(&Self::state_key(key.clone()))
    }

    /// Builds a state validator matching `expected`.
    pub fn filter(&self, expected: StateMatch<S>) -> StateFilter<R, S> {
        StateFilter {
            keeper: self.clone(),
            expected,
        }
    }
}

impl<R: KeyResolver, S> Clone for StateKeeper<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

// ============================================================================
// State Filter
// ============================================================================

/// What a [`StateFilter`] expects the stored state to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateMatch<S> {
    /// Matches only when no state is stored.
    NoState,
    /// Matches whatever is stored, including nothing.
    AnyState,
    /// Matches when the stored state equals this value.
    Exact(S),
}

/// State validator backed by a [`StateKeeper`].
///
/// Apart from [`StateMatch::AnyState`], an update without a key does not pass.
pub struct StateFilter<R: KeyResolver, S> {
    keeper: StateKeeper<R, S>,
    expected: StateMatch<S>,
}

impl<R, S> Filter<BoxedEvent> for StateFilter<R, S>
where
    R: KeyResolver,
    S: Clone + PartialEq + Send + Sync + 'static,
{
    fn can_pass(&self, ctx: &mut FilterContext<'_, BoxedEvent>) -> FilterResult {
        if self.expected == StateMatch::AnyState {
            return Ok(true);
        }
        let Some(key) = self.keeper.resolver().resolve_key(ctx.event) else {
            return Ok(false);
        };

        let current = self.keeper.get(&key);
        Ok(match (&self.expected, current) {
            (StateMatch::NoState, None) => true,
            (StateMatch::Exact(expected), Some(current)) => *expected == current,
            _ => false,
        })
    }

    fn name(&self) -> &'static str {
        "StateFilter"
    }
}
