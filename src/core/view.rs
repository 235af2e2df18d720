//! Database view descriptors and visibility rules
//!
//! A view is a value: `as_of`, `since` and `history` each return a new
//! filter and never touch the one they were derived from. The filter decides
//! which datoms of an index scan are visible:
//!
//! - the window keeps datoms with `t <= min(basis, as_of)`;
//! - current-state views fold each `(e, a, v)` run down to its last event and
//!   keep it only when that event is an assertion;
//! - history views keep every event in the window;
//! - `since` then keeps datoms with `t > since`.

use crate::core::datom::Datom;
use crate::core::temporal::Basis;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::iter::Peekable;
use std::sync::Arc;
use uuid::Uuid;

/// Time filter of a view; as-of and since exclude each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeFilter {
    #[default]
    None,
    AsOf(Basis),
    Since(Basis),
}

/// Filter state carried by a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewFilter {
    pub time: TimeFilter,
    pub history: bool,
}

impl ViewFilter {
    /// Filter seeing data at or before `point`; clears since
    pub fn as_of(self, point: Basis) -> Self {
        Self {
            time: TimeFilter::AsOf(point),
            ..self
        }
    }

    /// Filter seeing data strictly after `point`; clears as-of
    pub fn since(self, point: Basis) -> Self {
        Self {
            time: TimeFilter::Since(point),
            ..self
        }
    }

    /// Filter exposing every assert/retract event
    pub fn history(self) -> Self {
        Self {
            history: true,
            ..self
        }
    }

    pub fn as_of_point(&self) -> Option<Basis> {
        match self.time {
            TimeFilter::AsOf(b) => Some(b),
            _ => None,
        }
    }

    pub fn since_point(&self) -> Option<Basis> {
        match self.time {
            TimeFilter::Since(b) => Some(b),
            _ => None,
        }
    }

    /// True when a time filter is set
    pub fn is_time_filtered(&self) -> bool {
        self.time != TimeFilter::None
    }

    /// Largest visible `t` for a database at `basis_t`
    pub fn upper_t(&self, basis_t: u64) -> u64 {
        match self.as_of_point() {
            Some(b) => b.t.min(basis_t),
            None => basis_t,
        }
    }

    /// Visible datoms of an index scan, in the scan's order.
    ///
    /// `datoms` must be ordered by one of the four index orders so that the
    /// events of one fact are adjacent and ascending in `t`.
    pub fn visible<'a, I>(&self, basis_t: u64, datoms: I) -> Box<dyn Iterator<Item = &'a Datom> + 'a>
    where
        I: Iterator<Item = &'a Datom> + 'a,
    {
        let upper = self.upper_t(basis_t);
        let since = self.since_point().map(|b| b.t);
        let after_since = move |d: &&'a Datom| since.map_or(true, |s| d.t() > s);
        let window = datoms.filter(move |d| d.t() <= upper);

        if self.history {
            Box::new(window.filter(after_since))
        } else {
            Box::new(CurrentState::new(window).filter(after_since))
        }
    }
}

/// Folds an ordered event stream down to the facts that are currently true
pub struct CurrentState<I: Iterator> {
    events: Peekable<I>,
}

impl<I: Iterator> CurrentState<I> {
    pub fn new(events: I) -> Self {
        Self {
            events: events.peekable(),
        }
    }
}

impl<'a, I: Iterator<Item = &'a Datom>> Iterator for CurrentState<I> {
    type Item = &'a Datom;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut last = self.events.next()?;
            while let Some(next) = self.events.next_if(|d| d.same_fact(last)) {
                last = next;
            }
            if last.added {
                return Some(last);
            }
        }
    }
}

/// Opaque handle to a speculative database state produced by `with`.
///
/// The payload belongs to the service that created it; two tokens are equal
/// when they name the same speculative state.
#[derive(Clone)]
pub struct SpeculativeToken {
    id: Uuid,
    payload: Arc<dyn Any + Send + Sync>,
}

impl SpeculativeToken {
    pub fn new(payload: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
        }
    }

    /// Payload downcast to the service's state type
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.payload.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for SpeculativeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SpeculativeToken").field(&self.id).finish()
    }
}

impl PartialEq for SpeculativeToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SpeculativeToken {}

/// Everything the service needs to identify a view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbRef {
    pub name: String,
    pub basis: Basis,
    pub filter: ViewFilter,
    pub speculative: Option<SpeculativeToken>,
}

impl DbRef {
    /// Unfiltered view of a durable state
    pub fn new(name: impl Into<String>, basis: Basis) -> Self {
        Self {
            name: name.into(),
            basis,
            filter: ViewFilter::default(),
            speculative: None,
        }
    }

    /// Same view with a different filter
    pub fn with_filter(&self, filter: ViewFilter) -> Self {
        Self {
            filter,
            ..self.clone()
        }
    }

    pub fn basis_t(&self) -> u64 {
        self.basis.t
    }

    pub fn is_speculative(&self) -> bool {
        self.speculative.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::datom::EntityId;
    use proptest::prelude::*;

    fn event(e: u64, v: &str, t: u64, added: bool) -> Datom {
        Datom::new(EntityId(e), EntityId(72), v, EntityId::from_t(t), added)
    }

    fn visible(filter: ViewFilter, basis_t: u64, datoms: &[Datom]) -> Vec<Datom> {
        filter.visible(basis_t, datoms.iter()).cloned().collect()
    }

    #[test]
    fn test_as_of_and_since_clear_each_other() {
        let filter = ViewFilter::default().since(Basis::new(3, None));
        let filter = filter.as_of(Basis::new(5, None));
        assert_eq!(filter.since_point(), None);
        assert_eq!(filter.as_of_point().map(|b| b.t), Some(5));

        let filter = filter.since(Basis::new(4, None));
        assert_eq!(filter.as_of_point(), None);
        assert!(filter.history().is_time_filtered());
    }

    #[test]
    fn test_current_state_hides_retracted_facts() {
        // Assert at t 2, retract at t 3, reassert at t 5
        let datoms = vec![
            event(1, "Commando", 2, true),
            event(1, "Commando", 3, false),
            event(1, "Commando", 5, true),
            event(2, "Repo Man", 2, true),
            event(2, "Repo Man", 4, false),
        ];

        let now = visible(ViewFilter::default(), 5, &datoms);
        assert_eq!(now, vec![datoms[2].clone()]);

        let at_3 = visible(ViewFilter::default().as_of(Basis::new(3, None)), 5, &datoms);
        assert_eq!(at_3, vec![datoms[3].clone()]);

        let history = visible(ViewFilter::default().history(), 5, &datoms);
        assert_eq!(history, datoms);
    }

    #[test]
    fn test_since_keeps_only_later_current_facts() {
        let datoms = vec![
            event(1, "Commando", 2, true),
            event(2, "Repo Man", 4, true),
        ];
        let since_2 = visible(ViewFilter::default().since(Basis::new(2, None)), 4, &datoms);
        assert_eq!(since_2, vec![datoms[1].clone()]);
    }

    #[test]
    fn test_speculative_tokens_compare_by_id() {
        let token = SpeculativeToken::new(Arc::new(7u64));
        assert_eq!(token.clone(), token);
        assert_ne!(SpeculativeToken::new(Arc::new(7u64)), token);
        assert_eq!(token.payload::<u64>().map(|p| *p), Some(7));
        assert!(token.payload::<String>().is_none());
    }

    proptest! {
        #[test]
        fn prop_fact_visible_iff_last_event_asserts(ops in proptest::collection::vec(any::<bool>(), 1..12)) {
            let datoms: Vec<Datom> = ops
                .iter()
                .enumerate()
                .map(|(i, added)| event(1, "x", i as u64 + 1, *added))
                .collect();
            let basis = datoms.len() as u64;
            for upper in 1..=basis {
                let filter = ViewFilter::default().as_of(Basis::new(upper, None));
                let seen = visible(filter, basis, &datoms);
                let expected = ops[upper as usize - 1];
                prop_assert_eq!(seen.len(), usize::from(expected));
            }
        }

        #[test]
        fn prop_as_of_is_monotone_under_assertions(n in 1u64..10, cut in 1u64..10) {
            let datoms: Vec<Datom> = (1..=n).map(|t| event(t, "x", t, true)).collect();
            let early = visible(ViewFilter::default().as_of(Basis::new(cut.min(n), None)), n, &datoms);
            let late = visible(ViewFilter::default(), n, &datoms);
            prop_assert!(early.iter().all(|d| late.contains(d)));
        }
    }
}
