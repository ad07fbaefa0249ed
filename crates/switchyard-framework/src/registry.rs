//! Descriptor registry.
//!
//! A [`DescriptorList`] holds the descriptors of one bucket ordered by
//! [`OrderKey`]. Readers take a snapshot (an `Arc` of the current map) and
//! iterate it without holding any lock, so `add`/`remove` never disturb an
//! iteration in progress. Writers copy the map on write.
//!
//! [`HandlerRegistry`] is the startup-time builder that owns one list per
//! [`EventKind`] and turns into a read-only [`HandlerProvider`] on
//! [`freeze`](HandlerRegistry::freeze).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use switchyard_core::EventKind;
use tracing::{debug, info, trace};

use crate::descriptor::{Descriptor, HandlerResolver, OrderKey};
use crate::error::{RegistrationError, RegistrationResult};
use crate::options::DispatchOptions;
use crate::provider::HandlerProvider;

type Entries = BTreeMap<OrderKey, Arc<Descriptor>>;

// ============================================================================
// Descriptor List
// ============================================================================

/// An ordered, freezable collection of descriptors.
pub struct DescriptorList {
    kind: Option<EventKind>,
    entries: RwLock<Arc<Entries>>,
    frozen: AtomicBool,
    descend: bool,
    max_shifts: Option<usize>,
}

impl DescriptorList {
    /// Creates a list accepting descriptors of any kind.
    pub fn new(options: &DispatchOptions) -> Self {
        Self {
            kind: None,
            entries: RwLock::new(Arc::new(BTreeMap::new())),
            frozen: AtomicBool::new(false),
            descend: options.descend_conflicting_priority,
            max_shifts: options.max_priority_shifts,
        }
    }

    /// Creates a list dedicated to `kind`.
    pub fn for_kind(kind: EventKind, options: &DispatchOptions) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(options)
        }
    }

    pub fn kind(&self) -> Option<EventKind> {
        self.kind
    }

    /// Inserts `descriptor`, shifting its priority on collision.
    ///
    /// Returns the key the descriptor ended up under.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::Frozen`] once the list is frozen.
    /// - [`RegistrationError::KindMismatch`] if the list is dedicated to
    ///   another kind.
    /// - [`RegistrationError::PriorityShiftExhausted`] if no free key was
    ///   found within the shift cap (`max_priority_shifts`, or the list
    ///   length plus one).
    pub fn add(&self, mut descriptor: Descriptor) -> RegistrationResult<OrderKey> {
        let mut entries = self.entries.write();
        if self.frozen.load(Ordering::Acquire) {
            return Err(RegistrationError::Frozen);
        }
        if let Some(expected) = self.kind.filter(|expected| *expected != descriptor.kind()) {
            return Err(RegistrationError::KindMismatch {
                expected,
                got: descriptor.kind(),
            });
        }

        let declared = descriptor.order_key();
        let cap = self.max_shifts.unwrap_or(entries.len() + 1);
        let mut key = declared;
        let mut attempts = 0;
        while entries.contains_key(&key) {
            let exhausted = RegistrationError::PriorityShiftExhausted {
                key: declared,
                attempts,
            };
            if attempts >= cap {
                return Err(exhausted);
            }
            key = key.shifted(self.descend).ok_or(exhausted)?;
            attempts += 1;
        }

        if attempts > 0 {
            debug!(
                handler = %descriptor.display_name(),
                declared = %declared,
                key = %key,
                "Order key collision resolved"
            );
        }

        descriptor.set_order_key(key);
        Arc::make_mut(&mut *entries).insert(key, Arc::new(descriptor));
        Ok(key)
    }

    /// Removes the descriptor under `key`.
    ///
    /// Returns `false` if nothing was registered there or the list is frozen.
    pub fn remove(&self, key: OrderKey) -> bool {
        let mut entries = self.entries.write();
        if self.frozen.load(Ordering::Acquire) || !entries.contains_key(&key) {
            return false;
        }
        Arc::make_mut(&mut *entries).remove(&key).is_some()
    }

    /// Freezes the list. Idempotent.
    pub fn freeze(&self) {
        let _entries = self.entries.write();
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, key: OrderKey) -> bool {
        self.entries.read().contains_key(&key)
    }

    /// Returns the descriptors from the highest key to the lowest.
    ///
    /// The result is a consistent snapshot; later mutations do not affect it.
    pub fn snapshot(&self) -> Vec<Arc<Descriptor>> {
        let entries = self.entries.read().clone();
        entries.values().rev().cloned().collect()
    }

    /// Keys of the current snapshot, from the highest to the lowest.
    pub fn keys(&self) -> Vec<OrderKey> {
        self.entries.read().keys().rev().copied().collect()
    }
}

impl std::fmt::Debug for DescriptorList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorList")
            .field("kind", &self.kind)
            .field("len", &self.len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

// ============================================================================
// Handler Registry
// ============================================================================

/// Startup-time registry of handler descriptors.
///
/// # Example
///
/// ```rust,ignore
/// let mut registry = HandlerRegistry::new(DispatchOptions::default());
/// registry.register(Descriptor::builder(EventKind::Message).command(["start"]).handler(start))?;
/// registry.register(Descriptor::builder(EventKind::CallbackQuery).handler(on_button))?;
/// let provider = registry.freeze();
/// ```
pub struct HandlerRegistry {
    options: DispatchOptions,
    lists: HashMap<EventKind, DescriptorList>,
    // alias -> display name of its owner
    aliases: HashMap<String, String>,
    resolver: Option<Arc<dyn HandlerResolver>>,
}

impl HandlerRegistry {
    pub fn new(options: DispatchOptions) -> Self {
        Self {
            options,
            lists: HashMap::new(),
            aliases: HashMap::new(),
            resolver: None,
        }
    }

    /// Sets the resolver used for keyed descriptors.
    pub fn with_resolver(mut self, resolver: impl HandlerResolver) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Registers `descriptor` in the bucket of its kind.
    ///
    /// With `except_intersecting_aliases`, an alias already claimed by
    /// another descriptor is rejected with
    /// [`RegistrationError::DuplicateAlias`].
    pub fn register(&mut self, descriptor: Descriptor) -> RegistrationResult<OrderKey> {
        if self.options.except_intersecting_aliases {
            let mut seen = Vec::with_capacity(descriptor.aliases().len());
            for alias in descriptor.aliases() {
                if self.aliases.contains_key(alias) || seen.contains(&alias) {
                    return Err(RegistrationError::DuplicateAlias {
                        alias: alias.clone(),
                        handler: descriptor.display_name().to_string(),
                    });
                }
                seen.push(alias);
            }
        }

        let kind = descriptor.kind();
        let name = descriptor.display_name().to_string();
        let aliases = descriptor.aliases().to_vec();

        let options = &self.options;
        let key = self
            .lists
            .entry(kind)
            .or_insert_with(|| DescriptorList::for_kind(kind, options))
            .add(descriptor)?;

        for alias in aliases {
            self.aliases.entry(alias).or_insert_with(|| name.clone());
        }

        trace!(handler = %name, kind = %kind, key = %key, "Registered handler");
        Ok(key)
    }

    /// Number of registered descriptors over all kinds.
    pub fn len(&self) -> usize {
        self.lists.values().map(DescriptorList::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freezes every bucket and returns the read-only provider.
    pub fn freeze(self) -> HandlerProvider {
        for list in self.lists.values() {
            list.freeze();
        }
        info!(
            handlers = self.len(),
            kinds = self.lists.len(),
            "Handler registry frozen"
        );
        HandlerProvider::new(self.lists, self.options, self.resolver)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("options", &self.options)
            .field("handlers", &self.len())
            .field("aliases", &self.aliases.len())
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    async fn noop() {}

    fn descriptor(kind: EventKind, concurrency: i32, priority: i32) -> Descriptor {
        Descriptor::builder(kind).order(concurrency, priority).handler(noop)
    }

    fn options() -> DispatchOptions {
        DispatchOptions::default()
    }

    #[test]
    fn test_snapshot_is_descending() {
        let list = DescriptorList::new(&options());
        list.add(descriptor(EventKind::Message, 0, 5)).unwrap();
        list.add(descriptor(EventKind::Message, 1, -3)).unwrap();
        list.add(descriptor(EventKind::Message, 0, 7)).unwrap();

        assert_eq!(
            list.keys(),
            vec![OrderKey::new(1, -3), OrderKey::new(0, 7), OrderKey::new(0, 5)]
        );
    }

    #[test]
    fn test_collision_shifts_priority() {
        let list = DescriptorList::new(&options());
        assert_eq!(list.add(descriptor(EventKind::Message, 0, 0)).unwrap(), OrderKey::new(0, 0));
        assert_eq!(list.add(descriptor(EventKind::Message, 0, 0)).unwrap(), OrderKey::new(0, 1));
        assert_eq!(list.add(descriptor(EventKind::Message, 0, 0)).unwrap(), OrderKey::new(0, 2));

        let descending = DescriptorList::new(&options().descend_conflicting_priority(true));
        descending.add(descriptor(EventKind::Message, 0, 0)).unwrap();
        assert_eq!(
            descending.add(descriptor(EventKind::Message, 0, 0)).unwrap(),
            OrderKey::new(0, -1)
        );
    }

    #[test]
    fn test_shift_cap_is_enforced() {
        let list = DescriptorList::new(&options().max_priority_shifts(1));
        list.add(descriptor(EventKind::Message, 0, 0)).unwrap();
        list.add(descriptor(EventKind::Message, 0, 1)).unwrap();

        let err = list.add(descriptor(EventKind::Message, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::PriorityShiftExhausted { attempts: 1, .. }
        ));
        assert_eq!(list.len(), 2);

        let edge = DescriptorList::new(&options());
        edge.add(descriptor(EventKind::Message, 0, i32::MAX)).unwrap();
        assert!(edge.add(descriptor(EventKind::Message, 0, i32::MAX)).is_err());
    }

    #[test]
    fn test_freeze_rejects_add_and_keeps_contents() {
        let list = DescriptorList::new(&options());
        list.add(descriptor(EventKind::Message, 0, 1)).unwrap();
        list.freeze();
        list.freeze();

        let before = list.keys();
        assert!(matches!(
            list.add(descriptor(EventKind::Message, 0, 2)),
            Err(RegistrationError::Frozen)
        ));
        assert!(!list.remove(OrderKey::new(0, 1)));
        assert_eq!(list.keys(), before);
    }

    #[test]
    fn test_kind_specific_list_rejects_other_kinds() {
        let list = DescriptorList::for_kind(EventKind::Message, &options());
        let err = list.add(descriptor(EventKind::CallbackQuery, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::KindMismatch {
                expected: EventKind::Message,
                got: EventKind::CallbackQuery
            }
        ));
    }

    #[test]
    fn test_remove_does_not_disturb_snapshot() {
        let list = DescriptorList::new(&options());
        let key = list.add(descriptor(EventKind::Message, 0, 0)).unwrap();
        let snapshot = list.snapshot();

        assert!(list.remove(key));
        assert!(!list.remove(key));
        assert_eq!(snapshot.len(), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn test_duplicate_aliases_are_rejected_when_configured() {
        let mut strict = HandlerRegistry::new(options().except_intersecting_aliases(true));
        strict
            .register(Descriptor::builder(EventKind::Message).command(["start"]).handler(noop))
            .unwrap();
        let err = strict
            .register(
                Descriptor::builder(EventKind::Message)
                    .command(["START", "help"])
                    .name("other")
                    .handler(noop),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::DuplicateAlias { ref alias, ref handler } if alias == "start" && handler == "other"
        ));
        assert_eq!(strict.len(), 1);

        let mut lenient = HandlerRegistry::new(options());
        lenient
            .register(Descriptor::builder(EventKind::Message).command(["start"]).handler(noop))
            .unwrap();
        lenient
            .register(Descriptor::builder(EventKind::Message).command(["start"]).handler(noop))
            .unwrap();
        assert_eq!(lenient.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_distinct_keys_iterate_descending(
            keys in prop::collection::btree_set((-5i32..5, -100i32..100), 1..40)
        ) {
            let list = DescriptorList::new(&options());
            let mut shuffled: Vec<_> = keys.iter().copied().collect();
            shuffled.reverse();
            for (c, p) in shuffled {
                list.add(descriptor(EventKind::Message, c, p)).unwrap();
            }

            let iterated = list.keys();
            prop_assert_eq!(iterated.len(), keys.len());
            prop_assert!(iterated.windows(2).all(|w| w[0] > w[1]));
        }

        #[test]
        fn prop_collisions_converge_deterministically(
            count in 1usize..60,
            concurrency in -3i32..3,
            priority in -50i32..50,
            descend in any::<bool>(),
        ) {
            let opts = options().descend_conflicting_priority(descend);
            let run = || {
                let list = DescriptorList::new(&opts);
                (0..count)
                    .map(|_| list.add(descriptor(EventKind::Message, concurrency, priority)).unwrap())
                    .collect::<Vec<_>>()
            };

            let first = run();
            let unique: std::collections::BTreeSet<_> = first.iter().copied().collect();
            prop_assert_eq!(unique.len(), count);
            prop_assert_eq!(first, run());
        }
    }
}
