//! Filter Evaluator
//!
//! Each filter slot is compared against the aggregate content of the
//! input region and yields a tri-state result:
//! - UNSET: filter slot empty
//! - INSUFFICIENT: filter item present, input holds fewer than its count
//! - MATCHED: input holds at least the filter's count

use crate::slots::SlotStore;
use crate::{FILTER_SLOTS_SIZE, INPUT_SLOTS_SIZE};
use serde::{Deserialize, Serialize};

/// Tri-state match result of one filter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMatch {
    /// Filter slot is empty
    #[default]
    Unset,
    /// Not enough matching items in the input region
    Insufficient,
    /// Input region holds at least the filter's count
    Matched,
}

impl FilterMatch {
    /// Field bus encoding (0, 1, 2)
    #[inline]
    pub fn as_field(self) -> i32 {
        match self {
            FilterMatch::Unset => 0,
            FilterMatch::Insufficient => 1,
            FilterMatch::Matched => 2,
        }
    }

    /// Decode from the low two bits of a field bus value
    pub fn from_field(value: i32) -> Self {
        match value & 0x3 {
            0 => FilterMatch::Unset,
            1 => FilterMatch::Insufficient,
            _ => FilterMatch::Matched,
        }
    }

    #[inline]
    pub fn is_defined(self) -> bool {
        self != FilterMatch::Unset
    }

    #[inline]
    pub fn is_matched(self) -> bool {
        self == FilterMatch::Matched
    }
}

/// Result of one filter evaluation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterEvaluation {
    /// Per-slot results, in filter slot order
    pub states: [FilterMatch; FILTER_SLOTS_SIZE],
    /// At least one filter slot is non-empty
    pub defined: bool,
    /// Filters request ejection (respecting the AND gate)
    pub trigger: bool,
    /// Any state differs from the previous pass
    pub changed: bool,
}

impl FilterEvaluation {
    /// Number of non-empty filter slots
    pub fn defined_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_defined()).count()
    }

    /// Number of matched filter slots
    pub fn matched_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_matched()).count()
    }
}

/// Evaluate all filter slots against the input region.
///
/// The input scan starts at the round-robin cursor and wraps around the
/// input region; counting stops as soon as the filter count is reached.
pub fn evaluate_filters(
    store: &SlotStore,
    cursor: usize,
    and_gate: bool,
    previous: &[FilterMatch; FILTER_SLOTS_SIZE],
) -> FilterEvaluation {
    let input = store.input();
    let start = cursor % INPUT_SLOTS_SIZE;
    let mut states = [FilterMatch::Unset; FILTER_SLOTS_SIZE];

    for (state, filter) in states.iter_mut().zip(store.filters()) {
        let Some(filter) = filter else {
            continue;
        };
        *state = FilterMatch::Insufficient;

        let mut counted: u32 = 0;
        for offset in 0..INPUT_SLOTS_SIZE {
            let Some(stack) = &input[(start + offset) % INPUT_SLOTS_SIZE] else {
                continue;
            };
            if !stack.same_item(filter) {
                continue;
            }
            counted = counted.saturating_add(stack.count);
            if counted >= filter.count {
                *state = FilterMatch::Matched;
                break;
            }
        }
    }

    let mut evaluation = FilterEvaluation {
        states,
        changed: states != *previous,
        ..Default::default()
    };

    let defined = evaluation.defined_count();
    let matched = evaluation.matched_count();
    evaluation.defined = defined > 0;
    evaluation.trigger = matched > 0 && (!and_gate || matched == defined);
    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::ItemStack;
    use crate::FILTER_SLOTS_FIRST;

    const NONE: [FilterMatch; FILTER_SLOTS_SIZE] = [FilterMatch::Unset; FILTER_SLOTS_SIZE];

    fn store_with(input: &[(usize, &str, u32)], filters: &[(usize, &str, u32)]) -> SlotStore {
        let mut store = SlotStore::new();
        for &(slot, item, count) in input {
            store.set(slot, Some(ItemStack::new(item, count, 64)));
        }
        for &(slot, item, count) in filters {
            store.set(FILTER_SLOTS_FIRST + slot, Some(ItemStack::new(item, count, 64)));
        }
        store
    }

    #[test]
    fn test_no_filters_defined() {
        let store = store_with(&[(0, "a", 10)], &[]);
        let eval = evaluate_filters(&store, 0, false, &NONE);
        assert!(!eval.defined);
        assert!(!eval.trigger);
        assert!(!eval.changed);
    }

    #[test]
    fn test_insufficient_then_matched() {
        let store = store_with(&[(0, "b", 3)], &[(0, "b", 5)]);
        let eval = evaluate_filters(&store, 0, false, &NONE);
        assert_eq!(eval.states[0], FilterMatch::Insufficient);
        assert!(eval.defined);
        assert!(!eval.trigger);
        assert!(eval.changed);

        let store = store_with(&[(0, "b", 3), (7, "b", 2)], &[(0, "b", 5)]);
        let eval = evaluate_filters(&store, 4, false, &eval.states);
        assert_eq!(eval.states[0], FilterMatch::Matched);
        assert!(eval.trigger);
        assert!(eval.changed);
    }

    #[test]
    fn test_identity_ignores_stack_size() {
        let mut store = SlotStore::new();
        store.set(0, Some(ItemStack::new("c", 4, 16)));
        store.set(FILTER_SLOTS_FIRST, Some(ItemStack::new("c", 4, 64)));

        let eval = evaluate_filters(&store, 0, false, &NONE);
        assert_eq!(eval.states[0], FilterMatch::Matched);
    }

    #[test]
    fn test_and_gate_requires_all_defined() {
        let store = store_with(&[(0, "a", 8)], &[(0, "a", 4), (2, "z", 1)]);

        let or_eval = evaluate_filters(&store, 0, false, &NONE);
        assert!(or_eval.trigger);

        let and_eval = evaluate_filters(&store, 0, true, &NONE);
        assert_eq!(and_eval.states[1], FilterMatch::Unset);
        assert!(!and_eval.trigger);
    }

    #[test]
    fn test_and_gate_single_filter_equals_or() {
        for count in [1, 5, 9] {
            let store = store_with(&[(3, "a", count)], &[(1, "a", 5)]);
            let or_eval = evaluate_filters(&store, 0, false, &NONE);
            let and_eval = evaluate_filters(&store, 0, true, &NONE);
            assert_eq!(or_eval.trigger, and_eval.trigger);
        }
    }

    #[test]
    fn test_field_encoding() {
        for state in [FilterMatch::Unset, FilterMatch::Insufficient, FilterMatch::Matched] {
            assert_eq!(FilterMatch::from_field(state.as_field()), state);
        }
        assert_eq!(FilterMatch::from_field(3), FilterMatch::Matched);
        assert_eq!(FilterMatch::from_field(5), FilterMatch::Insufficient);
    }
}
