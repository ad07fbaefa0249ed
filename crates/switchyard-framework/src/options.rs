//! Dispatch options.

use serde::{Deserialize, Serialize};

/// Options controlling registration and dispatch behavior.
///
/// Every option defaults to `false` / unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOptions {
    /// Shift colliding priorities downwards instead of upwards.
    pub descend_conflicting_priority: bool,
    /// Reject descriptors whose command aliases are already registered.
    pub except_intersecting_aliases: bool,
    /// Stop at the first passing descriptor per update.
    pub execute_only_first_match: bool,
    /// Maximum number of priority shifts per insert.
    ///
    /// When unset, the cap is the bucket size plus one, which is never
    /// reached for a bucket of distinct keys.
    pub max_priority_shifts: Option<usize>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descend_conflicting_priority(mut self, descend: bool) -> Self {
        self.descend_conflicting_priority = descend;
        self
    }

    pub fn except_intersecting_aliases(mut self, except: bool) -> Self {
        self.except_intersecting_aliases = except;
        self
    }

    pub fn execute_only_first_match(mut self, first_only: bool) -> Self {
        self.execute_only_first_match = first_only;
        self
    }

    pub fn max_priority_shifts(mut self, cap: usize) -> Self {
        self.max_priority_shifts = Some(cap);
        self
    }
}
