//! Filter composition: AND, OR, NOT, targeting and declaration modifiers.

use std::marker::PhantomData;
use std::sync::Arc;

use bitflags::bitflags;
use switchyard_core::BoxedEvent;

use super::{BoxedFilter, Filter, FilterContext};
use crate::error::FilterResult;

// ============================================================================
// AND
// ============================================================================

/// Passes only if every member passes. Stops at the first failure.
pub struct And<T: ?Sized + 'static> {
    members: Vec<Arc<dyn Filter<T>>>,
}

impl<T: ?Sized + 'static> And<T> {
    pub fn new(members: Vec<Arc<dyn Filter<T>>>) -> Self {
        Self { members }
    }
}

impl<T: ?Sized + 'static> Filter<T> for And<T> {
    fn can_pass(&self, ctx: &mut FilterContext<'_, T>) -> FilterResult {
        for member in &self.members {
            if !ctx.evaluate(member.as_ref())? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "And"
    }

    fn is_transparent(&self) -> bool {
        true
    }
}

// ============================================================================
// OR
// ============================================================================

/// Passes if any member passes. Only the winning member is recorded.
pub struct Or<T: ?Sized + 'static> {
    members: Vec<Arc<dyn Filter<T>>>,
}

impl<T: ?Sized + 'static> Or<T> {
    pub fn new(members: Vec<Arc<dyn Filter<T>>>) -> Self {
        Self { members }
    }
}

impl<T: ?Sized + 'static> Filter<T> for Or<T> {
    fn can_pass(&self, ctx: &mut FilterContext<'_, T>) -> FilterResult {
        for member in &self.members {
            if ctx.evaluate(member.as_ref())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn name(&self) -> &'static str {
        "Or"
    }

    fn is_transparent(&self) -> bool {
        true
    }
}

// ============================================================================
// NOT
// ============================================================================

/// Inverts the wrapped filter. Nothing is recorded either way.
pub struct Not<F>(pub F);

impl<T: ?Sized, F: Filter<T>> Filter<T> for Not<F> {
    fn can_pass(&self, ctx: &mut FilterContext<'_, T>) -> FilterResult {
        // A passing inner filter is rolled back by the caller once we fail.
        Ok(!ctx.evaluate(&self.0)?)
    }

    fn name(&self) -> &'static str {
        "Not"
    }

    fn is_transparent(&self) -> bool {
        true
    }
}

// ============================================================================
// Targeted
// ============================================================================

/// Runs a filter over a projection of the event.
///
/// If the projection yields nothing the filter does not pass.
///
/// ```rust,ignore
/// let only_hello = Targeted::new(projections::message, TextEquals::new("hello"));
/// ```
pub struct Targeted<T: ?Sized, P, F> {
    projection: P,
    filter: F,
    _target: PhantomData<fn(&T)>,
}

impl<T: ?Sized, P, F> Targeted<T, P, F>
where
    P: for<'e> Fn(&'e BoxedEvent) -> Option<&'e T>,
{
    pub fn new(projection: P, filter: F) -> Self {
        Self {
            projection,
            filter,
            _target: PhantomData,
        }
    }
}

impl<T, P, F> Filter<BoxedEvent> for Targeted<T, P, F>
where
    T: ?Sized + 'static,
    P: for<'e> Fn(&'e BoxedEvent) -> Option<&'e T> + Send + Sync + 'static,
    F: Filter<T>,
{
    fn can_pass(&self, ctx: &mut FilterContext<'_, BoxedEvent>) -> FilterResult {
        let event = ctx.event;
        let Some(target) = (self.projection)(event) else {
            return Ok(false);
        };
        ctx.project(target).evaluate(&self.filter)
    }

    fn name(&self) -> &'static str {
        self.filter.name()
    }

    fn is_transparent(&self) -> bool {
        true
    }
}

// ============================================================================
// Combinators
// ============================================================================

/// Fluent composition helpers available on every filter.
pub trait FilterExt<T: ?Sized + 'static>: Filter<T> + Sized {
    /// Inverts this filter.
    fn not(self) -> Not<Self> {
        Not(self)
    }

    /// Passes if this filter or `other` passes.
    fn or<G: Filter<T>>(self, other: G) -> Or<T> {
        let members: Vec<Arc<dyn Filter<T>>> = vec![Arc::new(self), Arc::new(other)];
        Or::new(members)
    }

    /// Passes if this filter and `other` pass.
    fn and<G: Filter<T>>(self, other: G) -> And<T> {
        let members: Vec<Arc<dyn Filter<T>>> = vec![Arc::new(self), Arc::new(other)];
        And::new(members)
    }
}

impl<T: ?Sized + 'static, F: Filter<T>> FilterExt<T> for F {}

// ============================================================================
// Declaration Modifiers
// ============================================================================

bitflags! {
    /// Modifiers attached to a filter when it is declared on a descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FilterModifier: u8 {
        /// Invert the filter.
        const NOT = 1;
        /// Combine the filter with the next declared one using OR.
        const OR_NEXT = 1 << 1;
    }
}

/// Folds declared filters and their modifiers into filter slots.
///
/// `NOT` wraps the filter it is attached to. `OR_NEXT` merges the filter
/// with the next declared one into a single [`Or`] slot; chains of any
/// length collapse into one slot. A trailing `OR_NEXT` has no effect.
#[derive(Default)]
pub struct FilterChain {
    slots: Vec<BoxedFilter>,
    or_pending: bool,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the next filter.
    pub fn push(&mut self, modifier: FilterModifier, filter: BoxedFilter) {
        let filter: BoxedFilter = if modifier.contains(FilterModifier::NOT) {
            Arc::new(Not(filter))
        } else {
            filter
        };

        let slot: BoxedFilter = match self.slots.pop() {
            Some(previous) if self.or_pending => Arc::new(Or::new(vec![previous, filter])),
            previous => {
                self.slots.extend(previous);
                filter
            }
        };
        self.slots.push(slot);
        self.or_pending = modifier.contains(FilterModifier::OR_NEXT);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn into_filters(self) -> Vec<BoxedFilter> {
        self.slots
    }
}
