//! Match resolution.
//!
//! [`HandlerProvider`] is the frozen, read-only view of a
//! [`HandlerRegistry`](crate::registry::HandlerRegistry). For an incoming
//! update it produces [`Matches`]: a lazy sequence of handlers whose filters
//! passed, from the highest [`OrderKey`](crate::descriptor::OrderKey) to the
//! lowest.

use std::collections::HashMap;
use std::sync::Arc;

use switchyard_core::{BotInfo, BoxedEvent, EventKind};
use tracing::trace;

use crate::descriptor::{Descriptor, HandlerResolver};
use crate::error::DispatchError;
use crate::filter::{CompletedFilters, FilterContext};
use crate::handler::{BoxedHandler, LifetimeToken};
use crate::options::DispatchOptions;
use crate::registry::DescriptorList;

// ============================================================================
// Described Handler
// ============================================================================

/// A matched descriptor together with its handler instance.
pub struct DescribedHandler {
    pub descriptor: Arc<Descriptor>,
    pub handler: BoxedHandler,
    /// Filters that passed for this descriptor.
    pub completed: CompletedFilters,
    /// Ended by the pool once the execution completes.
    pub lifetime: LifetimeToken,
}

impl DescribedHandler {
    pub fn display_name(&self) -> &str {
        self.descriptor.display_name()
    }
}

impl std::fmt::Debug for DescribedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescribedHandler")
            .field("handler", &self.descriptor.display_name())
            .field("key", &self.descriptor.order_key())
            .field("completed", &self.completed.names())
            .finish()
    }
}

// ============================================================================
// Matches
// ============================================================================

/// Lazy sequence of matches for one update.
///
/// Each step evaluates descriptors until one passes. A descriptor whose
/// filters fail with an error, or whose handler cannot be instantiated,
/// yields an `Err` and iteration continues with the next descriptor.
pub struct Matches {
    event: BoxedEvent,
    bot: BotInfo,
    descriptors: std::vec::IntoIter<Arc<Descriptor>>,
    resolver: Option<Arc<dyn HandlerResolver>>,
    first_only: bool,
    done: bool,
}

impl Matches {
    pub(crate) fn new(
        event: BoxedEvent,
        bot: BotInfo,
        descriptors: Vec<Arc<Descriptor>>,
        resolver: Option<Arc<dyn HandlerResolver>>,
        first_only: bool,
    ) -> Self {
        Self {
            event,
            bot,
            descriptors: descriptors.into_iter(),
            resolver,
            first_only,
            done: false,
        }
    }

    pub fn event(&self) -> &BoxedEvent {
        &self.event
    }
}

impl Iterator for Matches {
    type Item = Result<DescribedHandler, DispatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        for descriptor in self.descriptors.by_ref() {
            let mut completed = CompletedFilters::new();
            let mut ctx = FilterContext::new(&self.bot, &self.event, &mut completed);
            match descriptor.filters().evaluate(&mut ctx) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(source) => {
                    return Some(Err(DispatchError::FilterEvaluation {
                        handler: descriptor.display_name().to_string(),
                        kind: self.event.kind(),
                        source,
                    }));
                }
            }

            let handler = match descriptor.instantiate(self.resolver.as_deref()) {
                Ok(handler) => handler,
                Err(err) => return Some(Err(err)),
            };

            trace!(
                handler = %descriptor.display_name(),
                key = %descriptor.order_key(),
                completed = ?completed.names(),
                "Descriptor matched"
            );

            if self.first_only {
                self.done = true;
            }
            return Some(Ok(DescribedHandler {
                descriptor,
                handler,
                completed,
                lifetime: LifetimeToken::new(),
            }));
        }

        self.done = true;
        None
    }
}

/// Snapshot of the bucket for `kind`, falling back to the any-kind bucket
/// when the kind's own bucket is absent or empty.
pub(crate) fn bucket_snapshot(
    lists: &HashMap<EventKind, DescriptorList>,
    kind: EventKind,
) -> Vec<Arc<Descriptor>> {
    let primary = lists.get(&kind).map(DescriptorList::snapshot).unwrap_or_default();
    if !primary.is_empty() || kind.is_any() {
        return primary;
    }
    lists
        .get(&EventKind::Unknown)
        .map(DescriptorList::snapshot)
        .unwrap_or_default()
}

// ============================================================================
// Handler Provider
// ============================================================================

/// Read-only descriptor lookup, produced by freezing a registry.
pub struct HandlerProvider {
    lists: HashMap<EventKind, DescriptorList>,
    options: DispatchOptions,
    resolver: Option<Arc<dyn HandlerResolver>>,
}

impl HandlerProvider {
    pub(crate) fn new(
        lists: HashMap<EventKind, DescriptorList>,
        options: DispatchOptions,
        resolver: Option<Arc<dyn HandlerResolver>>,
    ) -> Self {
        Self {
            lists,
            options,
            resolver,
        }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// The bucket registered for exactly `kind`, without fallback.
    pub fn list(&self, kind: EventKind) -> Option<&DescriptorList> {
        self.lists.get(&kind)
    }

    /// Descriptors an update of `kind` is evaluated against, in order.
    pub fn descriptors(&self, kind: EventKind) -> Vec<Arc<Descriptor>> {
        bucket_snapshot(&self.lists, kind)
    }

    /// Resolves the handlers matching `event`.
    ///
    /// With `execute_only_first_match`, at most one handler is yielded.
    pub fn get_matches(&self, event: &BoxedEvent, bot: &BotInfo) -> Matches {
        Matches::new(
            event.clone(),
            bot.clone(),
            self.descriptors(event.kind()),
            self.resolver.clone(),
            self.options.execute_only_first_match,
        )
    }

    /// Command aliases of message handlers, in dispatch order.
    pub fn commands(&self) -> Vec<String> {
        let mut commands: Vec<String> = Vec::new();
        let descriptors = self
            .lists
            .get(&EventKind::Message)
            .map(DescriptorList::snapshot)
            .unwrap_or_default();
        for descriptor in descriptors {
            for alias in descriptor.aliases() {
                if !commands.contains(alias) {
                    commands.push(alias.clone());
                }
            }
        }
        commands
    }
}

impl std::fmt::Debug for HandlerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerProvider")
            .field("lists", &self.lists)
            .field("options", &self.options)
            .finish()
    }
}
