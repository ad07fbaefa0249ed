//! Filter pipeline.
//!
//! A [`Filter`] is a predicate over a typed projection of an update. Filters
//! run inside a [`FilterContext`] which carries the bot identity, the raw
//! event, the projected input and the per-dispatch [`CompletedFilters`]
//! ledger.
//!
//! # Ledger
//!
//! Every filter that passes is appended to the ledger, in evaluation order,
//! together with the artifact it left (if any). Filters further down the
//! pipeline, and the handler itself, can read those artifacts back:
//!
//! ```rust,ignore
//! // HasEntity(Mention) leaves the entities it found...
//! let found = ctx.completed.artifact::<HasEntity, FoundEntities>(0);
//! // ...which Mentioned then inspects.
//! ```
//!
//! Failed filters leave nothing behind: when a filter fails, everything its
//! evaluation appended is rolled back.
//!
//! # Composition
//!
//! See [`And`], [`Or`], [`Not`], [`Targeted`] and [`FilterModifier`].

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use switchyard_core::{BotInfo, BoxedEvent};

use crate::error::FilterResult;

pub mod builtin;
mod compose;

pub use compose::{And, FilterChain, FilterExt, FilterModifier, Not, Or, Targeted};

/// A type-erased filter over the raw event.
pub type BoxedFilter = Arc<dyn Filter<BoxedEvent>>;

// ============================================================================
// Filter Trait
// ============================================================================

/// A predicate over `T` evaluated in a [`FilterContext`].
///
/// Returning `Err` is reserved for genuine failures (malformed input, missing
/// prerequisites). The pipeline propagates it untouched and the dispatcher
/// reports it.
pub trait Filter<T: ?Sized>: Send + Sync + 'static {
    /// Evaluates the predicate.
    fn can_pass(&self, ctx: &mut FilterContext<'_, T>) -> FilterResult;

    /// Name recorded in the ledger and in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Identity used for ledger lookups.
    fn filter_id(&self) -> TypeId {
        TypeId::of::<Self>()
    }

    /// Composite filters are not recorded themselves; their members are.
    fn is_transparent(&self) -> bool {
        false
    }
}

impl<T: ?Sized, F: Filter<T> + ?Sized> Filter<T> for Arc<F> {
    fn can_pass(&self, ctx: &mut FilterContext<'_, T>) -> FilterResult {
        (**self).can_pass(ctx)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn filter_id(&self) -> TypeId {
        (**self).filter_id()
    }

    fn is_transparent(&self) -> bool {
        (**self).is_transparent()
    }
}

// ============================================================================
// Filter Context
// ============================================================================

/// Everything a filter can look at during one evaluation.
pub struct FilterContext<'a, T: ?Sized> {
    /// Identity of the receiving bot.
    pub bot: &'a BotInfo,
    /// The raw update.
    pub event: &'a BoxedEvent,
    /// The projection this filter is typed over.
    pub input: &'a T,
    /// Filters that passed so far during this dispatch.
    pub completed: &'a mut CompletedFilters,
    artifact: Option<Artifact>,
}

impl<'a> FilterContext<'a, BoxedEvent> {
    /// Creates a top-level context whose input is the event itself.
    pub fn new(bot: &'a BotInfo, event: &'a BoxedEvent, completed: &'a mut CompletedFilters) -> Self {
        FilterContext::with_input(bot, event, event, completed)
    }
}

impl<'a, T: ?Sized> FilterContext<'a, T> {
    /// Creates a context over an explicit projection.
    pub fn with_input(
        bot: &'a BotInfo,
        event: &'a BoxedEvent,
        input: &'a T,
        completed: &'a mut CompletedFilters,
    ) -> Self {
        Self {
            bot,
            event,
            input,
            completed,
            artifact: None,
        }
    }

    /// Leaves an artifact for the filter currently being evaluated.
    ///
    /// It is stored with the filter's ledger entry if the filter passes.
    pub fn leave<A: Any + Send + Sync>(&mut self, artifact: A) {
        self.artifact = Some(Arc::new(artifact));
    }

    /// Evaluates `filter` and records the outcome in the ledger.
    ///
    /// On pass the filter (unless transparent) is appended together with its
    /// artifact. On failure or error the ledger is rolled back to where it
    /// was before the call.
    pub fn evaluate<F: Filter<T> + ?Sized>(&mut self, filter: &F) -> FilterResult {
        let mark = self.completed.len();
        let outer = self.artifact.take();
        let outcome = filter.can_pass(self);
        let artifact = std::mem::replace(&mut self.artifact, outer);

        match outcome {
            Ok(true) => {
                if !filter.is_transparent() {
                    self.completed.push(FilterRecord {
                        name: filter.name(),
                        id: filter.filter_id(),
                        artifact,
                    });
                }
                Ok(true)
            }
            other => {
                self.completed.truncate(mark);
                other
            }
        }
    }

    /// Reborrows this context over a different projection.
    pub fn project<'b, U: ?Sized>(&'b mut self, input: &'b U) -> FilterContext<'b, U> {
        FilterContext {
            bot: self.bot,
            event: self.event,
            input,
            completed: &mut *self.completed,
            artifact: None,
        }
    }
}

// ============================================================================
// Completed Filters Ledger
// ============================================================================

type Artifact = Arc<dyn Any + Send + Sync>;

/// One passed filter.
#[derive(Clone)]
pub struct FilterRecord {
    name: &'static str,
    id: TypeId,
    artifact: Option<Artifact>,
}

impl FilterRecord {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if this record was produced by filter type `F`.
    pub fn is<F: 'static>(&self) -> bool {
        self.id == TypeId::of::<F>()
    }

    /// Returns the artifact, downcast to `A`.
    pub fn artifact<A: Any>(&self) -> Option<&A> {
        self.artifact.as_deref().and_then(|a| a.downcast_ref())
    }
}

impl fmt::Debug for FilterRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRecord")
            .field("name", &self.name)
            .field("has_artifact", &self.artifact.is_some())
            .finish()
    }
}

/// Ordered record of the filters that passed during one dispatch.
///
/// Duplicates are allowed; lookups are by filter type and ordinal among the
/// records of that type.
#[derive(Debug, Clone, Default)]
pub struct CompletedFilters {
    records: Vec<FilterRecord>,
}

impl CompletedFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterRecord> {
        self.records.iter()
    }

    /// Names of the recorded filters, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.records.iter().map(|r| r.name).collect()
    }

    /// Returns the `ordinal`-th record produced by filter type `F`.
    pub fn get<F: 'static>(&self, ordinal: usize) -> Option<&FilterRecord> {
        self.records.iter().filter(|r| r.is::<F>()).nth(ordinal)
    }

    /// Returns `true` if filter type `F` passed at least once.
    pub fn contains<F: 'static>(&self) -> bool {
        self.records.iter().any(|r| r.is::<F>())
    }

    /// Counts the records produced by filter type `F`.
    pub fn count<F: 'static>(&self) -> usize {
        self.records.iter().filter(|r| r.is::<F>()).count()
    }

    /// Returns the artifact left by the `ordinal`-th `F`.
    pub fn artifact<F: 'static, A: Any>(&self, ordinal: usize) -> Option<&A> {
        self.get::<F>(ordinal).and_then(|r| r.artifact::<A>())
    }

    fn push(&mut self, record: FilterRecord) {
        self.records.push(record);
    }

    fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }
}

// ============================================================================
// Filter Set
// ============================================================================

/// The filters of one descriptor: `validator → state → filters`.
///
/// Evaluation short-circuits on the first failure. An empty set passes.
#[derive(Clone, Default)]
pub struct FilterSet {
    validator: Option<BoxedFilter>,
    state: Option<BoxedFilter>,
    filters: Vec<BoxedFilter>,
}

impl FilterSet {
    pub fn new(validator: Option<BoxedFilter>, state: Option<BoxedFilter>, filters: Vec<BoxedFilter>) -> Self {
        Self {
            validator,
            state,
            filters,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.validator.is_none() && self.state.is_none() && self.filters.is_empty()
    }

    /// Number of filter slots after modifier folding.
    pub fn slots(&self) -> usize {
        self.filters.len()
    }

    /// Evaluates the whole set against `ctx`.
    pub fn evaluate(&self, ctx: &mut FilterContext<'_, BoxedEvent>) -> FilterResult {
        let ordered = self
            .validator
            .iter()
            .chain(self.state.iter())
            .chain(self.filters.iter());

        for filter in ordered {
            if !ctx.evaluate(filter.as_ref())? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSet")
            .field("validator", &self.validator.as_ref().map(|v| v.name()))
            .field("state", &self.state.as_ref().map(|s| s.name()))
            .field("filters", &self.filters.iter().map(|f| f.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use switchyard_core::{Chat, Message, Update};

    use super::*;
    use crate::error::FilterError;

    /// Passes or fails as configured and counts its invocations.
    pub(crate) struct Counting {
        pub pass: bool,
        pub calls: Arc<AtomicUsize>,
    }

    impl Counting {
        pub(crate) fn new(pass: bool) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    pass,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl Filter<BoxedEvent> for Counting {
        fn can_pass(&self, ctx: &mut FilterContext<'_, BoxedEvent>) -> FilterResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.leave(self.pass);
            Ok(self.pass)
        }
    }

    pub(crate) struct Failing;

    impl Filter<BoxedEvent> for Failing {
        fn can_pass(&self, _ctx: &mut FilterContext<'_, BoxedEvent>) -> FilterResult {
            Err(FilterError::new("always fails"))
        }
    }

    pub(crate) fn event() -> BoxedEvent {
        BoxedEvent::new(Update::from_message(1, Message::new(1, Chat::private(42)).text("hi")))
    }

    #[test]
    fn test_passed_filters_are_recorded_with_artifacts() {
        let bot = BotInfo::new(1, "yard_bot");
        let event = event();
        let mut completed = CompletedFilters::new();
        let mut ctx = FilterContext::new(&bot, &event, &mut completed);

        let (first, _) = Counting::new(true);
        let (second, _) = Counting::new(true);
        assert!(ctx.evaluate(&first).unwrap());
        assert!(ctx.evaluate(&second).unwrap());

        assert_eq!(completed.count::<Counting>(), 2);
        assert_eq!(completed.artifact::<Counting, bool>(1), Some(&true));
        assert!(completed.get::<Counting>(2).is_none());
    }

    #[test]
    fn test_set_short_circuits_on_first_failure() {
        let bot = BotInfo::new(1, "yard_bot");
        let event = event();
        let (first, first_calls) = Counting::new(false);
        let (second, second_calls) = Counting::new(true);
        let set = FilterSet::new(None, None, vec![Arc::new(first), Arc::new(second)]);

        let mut completed = CompletedFilters::new();
        let mut ctx = FilterContext::new(&bot, &event, &mut completed);
        assert!(!set.evaluate(&mut ctx).unwrap());

        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert!(completed.is_empty());
    }

    #[test]
    fn test_set_evaluates_validator_then_state_then_filters() {
        let bot = BotInfo::new(1, "yard_bot");
        let event = event();
        let set = FilterSet::new(
            Some(Arc::new(builtin::FnFilter::new(|_: &BoxedEvent| true).named("validator"))),
            Some(Arc::new(builtin::FnFilter::new(|_: &BoxedEvent| true).named("state"))),
            vec![Arc::new(builtin::FnFilter::new(|_: &BoxedEvent| true).named("extra"))],
        );

        let mut completed = CompletedFilters::new();
        let mut ctx = FilterContext::new(&bot, &event, &mut completed);
        assert!(set.evaluate(&mut ctx).unwrap());
        assert_eq!(completed.names(), vec!["validator", "state", "extra"]);
    }

    #[test]
    fn test_errors_propagate_and_roll_back() {
        let bot = BotInfo::new(1, "yard_bot");
        let event = event();
        let (first, _) = Counting::new(true);
        let set = FilterSet::new(None, None, vec![Arc::new(first), Arc::new(Failing)]);

        let mut completed = CompletedFilters::new();
        let mut ctx = FilterContext::new(&bot, &event, &mut completed);
        let err = set.evaluate(&mut ctx).unwrap_err();
        assert_eq!(err.message(), "always fails");
        assert_eq!(completed.len(), 1);
    }

    #[test]
    fn test_empty_set_passes() {
        let bot = BotInfo::new(1, "yard_bot");
        let event = event();
        let mut completed = CompletedFilters::new();
        let mut ctx = FilterContext::new(&bot, &event, &mut completed);
        assert!(FilterSet::default().evaluate(&mut ctx).unwrap());
    }
}
