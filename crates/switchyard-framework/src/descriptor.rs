//! Handler descriptors.
//!
//! A [`Descriptor`] is the registration record of one handler: the update
//! kind it listens to, its [`OrderKey`], its [`FilterSet`] and how handler
//! instances are obtained ([`Instantiation`]). Descriptors are built with
//! [`Descriptor::builder`]:
//!
//! ```rust,ignore
//! let descriptor = Descriptor::builder(EventKind::Message)
//!     .order(1, 10)
//!     .command(["start"])
//!     .message_filter_with(FilterModifier::OR_NEXT, ChatKindIs(ChatKind::Private))
//!     .message_filter(Mentioned::bot())
//!     .handler(start);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use switchyard_core::{BoxedEvent, CallbackQuery, EventKind, Message};

use crate::error::DispatchError;
use crate::filter::builtin::{Command, on_callback, on_message};
use crate::filter::{BoxedFilter, Filter, FilterChain, FilterModifier, FilterSet, Targeted};
use crate::handler::{BoxedHandler, Handler, UpdateHandler, into_handler};

// ============================================================================
// Order Key
// ============================================================================

/// Ordering and bucketing key of a descriptor.
///
/// Keys compare by `concurrency` first, then by `priority`. Within one kind
/// no two descriptors share a key, and dispatch visits the highest key first.
/// `concurrency` also selects the execution pool: `0` (or below) is
/// unbounded, `N > 0` allows at most `N` concurrent executions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderKey {
    pub concurrency: i32,
    pub priority: i32,
}

impl OrderKey {
    pub const fn new(concurrency: i32, priority: i32) -> Self {
        Self {
            concurrency,
            priority,
        }
    }

    /// Returns the key with priority moved by one, or `None` on overflow.
    pub fn shifted(self, descend: bool) -> Option<Self> {
        let priority = if descend {
            self.priority.checked_sub(1)?
        } else {
            self.priority.checked_add(1)?
        };
        Some(Self { priority, ..self })
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(C:{}, P:{})", self.concurrency, self.priority)
    }
}

// ============================================================================
// Instantiation
// ============================================================================

/// Creates a handler instance.
pub type HandlerFactory = Arc<dyn Fn() -> BoxedHandler + Send + Sync>;

/// Resolves handlers for [`Instantiation::Keyed`] descriptors.
pub trait HandlerResolver: Send + Sync + 'static {
    fn resolve(&self, key: &str) -> Option<BoxedHandler>;
}

impl HandlerResolver for HashMap<String, BoxedHandler> {
    fn resolve(&self, key: &str) -> Option<BoxedHandler> {
        self.get(key).cloned()
    }
}

/// How handler instances are obtained for a matched descriptor.
pub enum Instantiation {
    /// A new instance per dispatch.
    Transient(HandlerFactory),
    /// One instance, created on first match and reused.
    Singleton {
        factory: HandlerFactory,
        instance: OnceLock<BoxedHandler>,
    },
    /// Resolved by a [`HandlerResolver`] under the given key.
    Keyed(String),
    /// A pre-built instance, used by self-removing descriptors.
    Ephemeral(BoxedHandler),
}

impl Instantiation {
    pub fn label(&self) -> &'static str {
        match self {
            Instantiation::Transient(_) => "transient",
            Instantiation::Singleton { .. } => "singleton",
            Instantiation::Keyed(_) => "keyed",
            Instantiation::Ephemeral(_) => "ephemeral",
        }
    }
}

impl fmt::Debug for Instantiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instantiation::Keyed(key) => f.debug_tuple("Keyed").field(key).finish(),
            other => f.write_str(other.label()),
        }
    }
}

// ============================================================================
// Descriptor
// ============================================================================

/// Registration record of one handler.
pub struct Descriptor {
    kind: EventKind,
    key: OrderKey,
    filters: FilterSet,
    strategy: Instantiation,
    display_name: Arc<str>,
    service_key: Option<String>,
    aliases: Vec<String>,
}

impl Descriptor {
    /// Starts building a descriptor for updates of `kind`.
    ///
    /// [`EventKind::Unknown`] registers into the "any kind" bucket.
    pub fn builder(kind: EventKind) -> DescriptorBuilder {
        DescriptorBuilder::new(kind)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The key this descriptor is registered under.
    ///
    /// It may differ from the declared key after collision shifting.
    pub fn order_key(&self) -> OrderKey {
        self.key
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn strategy(&self) -> &Instantiation {
        &self.strategy
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        self.display_name.clone()
    }

    pub fn service_key(&self) -> Option<&str> {
        self.service_key.as_deref()
    }

    /// Command aliases, lowercased.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub(crate) fn set_order_key(&mut self, key: OrderKey) {
        self.key = key;
    }

    /// Obtains a handler instance according to the instantiation strategy.
    pub fn instantiate(&self, resolver: Option<&dyn HandlerResolver>) -> Result<BoxedHandler, DispatchError> {
        match &self.strategy {
            Instantiation::Transient(factory) => Ok(factory()),
            Instantiation::Singleton { factory, instance } => Ok(instance.get_or_init(|| factory()).clone()),
            Instantiation::Ephemeral(handler) => Ok(handler.clone()),
            Instantiation::Keyed(key) => resolver
                .and_then(|resolver| resolver.resolve(key))
                .ok_or_else(|| DispatchError::Unresolved {
                    handler: self.display_name.to_string(),
                    key: key.clone(),
                }),
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.display_name)
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("strategy", &self.strategy)
            .field("filters", &self.filters)
            .field("aliases", &self.aliases)
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Fluent builder for [`Descriptor`].
pub struct DescriptorBuilder {
    kind: EventKind,
    key: OrderKey,
    name: Option<String>,
    validator: Option<BoxedFilter>,
    state: Option<BoxedFilter>,
    chain: FilterChain,
    aliases: Vec<String>,
    service_key: Option<String>,
}

impl DescriptorBuilder {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            key: OrderKey::default(),
            name: None,
            validator: None,
            state: None,
            chain: FilterChain::new(),
            aliases: Vec::new(),
            service_key: None,
        }
    }

    /// Sets the display name used in logs and fault reports.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the declared order key.
    pub fn order(mut self, concurrency: i32, priority: i32) -> Self {
        self.key = OrderKey::new(concurrency, priority);
        self
    }

    pub fn concurrency(mut self, concurrency: i32) -> Self {
        self.key.concurrency = concurrency;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.key.priority = priority;
        self
    }

    /// Sets the validator, evaluated before everything else.
    pub fn validator<F: Filter<BoxedEvent>>(mut self, filter: F) -> Self {
        self.validator = Some(Arc::new(filter));
        self
    }

    /// Sets the state validator, evaluated after the validator.
    pub fn state<F: Filter<BoxedEvent>>(mut self, filter: F) -> Self {
        self.state = Some(Arc::new(filter));
        self
    }

    /// Declares a filter over the raw event.
    pub fn filter<F: Filter<BoxedEvent>>(self, filter: F) -> Self {
        self.filter_with(FilterModifier::empty(), filter)
    }

    /// Declares a filter with modifiers.
    pub fn filter_with<F: Filter<BoxedEvent>>(mut self, modifier: FilterModifier, filter: F) -> Self {
        self.chain.push(modifier, Arc::new(filter));
        self
    }

    /// Declares a filter over the message payload.
    pub fn message_filter<F: Filter<Message>>(self, filter: F) -> Self {
        self.filter(on_message(filter))
    }

    pub fn message_filter_with<F: Filter<Message>>(self, modifier: FilterModifier, filter: F) -> Self {
        self.filter_with(modifier, on_message(filter))
    }

    /// Declares a filter over the callback query payload.
    pub fn callback_filter<F: Filter<CallbackQuery>>(self, filter: F) -> Self {
        self.filter(on_callback(filter))
    }

    /// Declares a filter over an arbitrary projection.
    pub fn targeted<T, P, F>(self, projection: P, filter: F) -> Self
    where
        T: ?Sized + 'static,
        P: for<'e> Fn(&'e BoxedEvent) -> Option<&'e T> + Send + Sync + 'static,
        F: Filter<T>,
    {
        self.filter(Targeted::new(projection, filter))
    }

    /// Declares a command filter and records its aliases.
    pub fn command<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = Command::new(aliases);
        for alias in command.aliases() {
            if !self.aliases.contains(alias) {
                self.aliases.push(alias.clone());
            }
        }
        self.message_filter(command)
    }

    /// Sets an explicit service key.
    pub fn service_key(mut self, key: impl Into<String>) -> Self {
        self.service_key = Some(key.into());
        self
    }

    // ─── Terminals ───────────────────────────────────────────────────────────

    /// Creates a new handler instance for every dispatch.
    pub fn transient<H, F>(self, factory: F) -> Descriptor
    where
        H: UpdateHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let default_name = short_type_name::<H>();
        self.finish(
            default_name,
            Instantiation::Transient(Arc::new(move || Arc::new(factory()) as BoxedHandler)),
        )
    }

    /// Creates one handler instance on first match and reuses it.
    pub fn singleton<H, F>(self, factory: F) -> Descriptor
    where
        H: UpdateHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let default_name = short_type_name::<H>();
        self.finish(
            default_name,
            Instantiation::Singleton {
                factory: Arc::new(move || Arc::new(factory()) as BoxedHandler),
                instance: OnceLock::new(),
            },
        )
    }

    /// Resolves the handler from a [`HandlerResolver`] under `key`.
    pub fn keyed(mut self, key: impl Into<String>) -> Descriptor {
        let key = key.into();
        self.service_key.get_or_insert_with(|| key.clone());
        let default_name = key.clone();
        self.finish(&default_name, Instantiation::Keyed(key))
    }

    /// Uses a pre-built handler instance.
    pub fn ephemeral<H: UpdateHandler>(self, handler: H) -> Descriptor {
        let default_name = short_type_name::<H>();
        self.finish(default_name, Instantiation::Ephemeral(Arc::new(handler)))
    }

    /// Uses a function handler.
    pub fn handler<F, T>(self, f: F) -> Descriptor
    where
        F: Handler<T>,
        T: 'static,
    {
        let default_name = short_type_name::<F>();
        self.finish(
            default_name,
            Instantiation::Transient(Arc::new(move || into_handler(f.clone()))),
        )
    }

    fn finish(self, default_name: &str, strategy: Instantiation) -> Descriptor {
        let display_name: Arc<str> = match self.name {
            Some(name) => Arc::from(name),
            None => Arc::from(default_name),
        };
        Descriptor {
            kind: self.kind,
            key: self.key,
            filters: FilterSet::new(self.validator, self.state, self.chain.into_filters()),
            strategy,
            display_name,
            service_key: self.service_key,
            aliases: self.aliases,
        }
    }
}

/// `path::to::Type<Args>` → `Type`.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::context::HandlerContext;
    use crate::error::HandlerResult;

    struct Noop;

    #[async_trait]
    impl UpdateHandler for Noop {
        async fn execute(&self, _ctx: Arc<HandlerContext>) -> HandlerResult {
            Ok(())
        }
    }

    #[test]
    fn test_order_key_compares_concurrency_first() {
        assert!(OrderKey::new(1, -100) > OrderKey::new(0, 100));
        assert!(OrderKey::new(1, 2) > OrderKey::new(1, 1));
        assert_eq!(OrderKey::new(2, 5).to_string(), "(C:2, P:5)");
        assert_eq!(OrderKey::new(0, 3).shifted(true), Some(OrderKey::new(0, 2)));
        assert_eq!(OrderKey::new(0, i32::MAX).shifted(false), None);
    }

    #[test]
    fn test_singleton_is_created_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let descriptor = Descriptor::builder(EventKind::Message).singleton(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Noop
        });

        let first = descriptor.instantiate(None).unwrap();
        let second = descriptor.instantiate(None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(descriptor.display_name(), "Noop");
    }

    #[test]
    fn test_transient_creates_per_call() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let descriptor = Descriptor::builder(EventKind::Message).transient(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Noop
        });

        descriptor.instantiate(None).unwrap();
        descriptor.instantiate(None).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_keyed_resolution() {
        let descriptor = Descriptor::builder(EventKind::Message).keyed("greeter");
        assert_eq!(descriptor.service_key(), Some("greeter"));

        let Err(err) = descriptor.instantiate(None) else {
            panic!("keyed handler resolved without a resolver");
        };
        assert!(matches!(err, DispatchError::Unresolved { ref key, .. } if key == "greeter"));

        let mut resolver: HashMap<String, BoxedHandler> = HashMap::new();
        resolver.insert("greeter".into(), Arc::new(Noop));
        assert!(descriptor.instantiate(Some(&resolver)).is_ok());
    }

    #[test]
    fn test_command_aliases_are_recorded() {
        async fn start() {}

        let descriptor = Descriptor::builder(EventKind::Message)
            .command(["/Start", "begin"])
            .name("start")
            .handler(start);
        assert_eq!(descriptor.aliases(), ["start", "begin"]);
        assert_eq!(descriptor.filters().slots(), 1);
        assert_eq!(descriptor.display_name(), "start");
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<Noop>(), "Noop");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }
}
