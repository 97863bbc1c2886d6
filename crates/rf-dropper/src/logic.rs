//! Trigger Logic
//!
//! Combines the external signal, filter results and policy flags into a
//! single fire / no-fire decision per coarse evaluation cycle.
//!
//! The external signal is edge-detected: a level that stays asserted fires
//! once, unless continuous mode is set.

use crate::filter::FilterEvaluation;
use serde::{Deserialize, Serialize};

/// Drop policy flag set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DropLogic(u32);

impl DropLogic {
    /// All defined filters must match (instead of any)
    pub const FILTER_AND_GATE: u32 = 0x01;
    /// Filters AND external signal (instead of OR)
    pub const EXTERN_AND_GATE: u32 = 0x02;
    /// No drop sound
    pub const SILENT_DROP: u32 = 0x04;
    /// No shutter open/close sound
    pub const SILENT_OPEN: u32 = 0x08;
    /// Fire on every cycle the signal is asserted (instead of rising edge only)
    pub const CONTINUOUS: u32 = 0x10;
    /// Treat the external signal as always triggering
    pub const IGNORE_EXTERNAL: u32 = 0x20;
    /// All defined bits
    pub const ALL: u32 = 0x3f;

    const EXTERN_GATE_MASK: u32 = Self::EXTERN_AND_GATE | Self::IGNORE_EXTERNAL;

    /// Build from raw bits, dropping undefined ones
    #[inline]
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    /// Build from a field bus value
    #[inline]
    pub fn from_field(value: i32) -> Self {
        Self::from_bits_truncate(value as u32)
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    /// Set or clear a flag
    pub fn set(&mut self, flag: u32, on: bool) {
        if on {
            self.0 |= flag & Self::ALL;
        } else {
            self.0 &= !flag;
        }
    }

    pub fn with(mut self, flag: u32) -> Self {
        self.set(flag, true);
        self
    }

    pub fn without(mut self, flag: u32) -> Self {
        self.set(flag, false);
        self
    }

    #[inline]
    pub fn filter_and_gate(self) -> bool {
        self.contains(Self::FILTER_AND_GATE)
    }

    #[inline]
    pub fn extern_and_gate(self) -> bool {
        self.contains(Self::EXTERN_AND_GATE)
    }

    #[inline]
    pub fn silent_drop(self) -> bool {
        self.contains(Self::SILENT_DROP)
    }

    #[inline]
    pub fn silent_open(self) -> bool {
        self.contains(Self::SILENT_OPEN)
    }

    #[inline]
    pub fn continuous(self) -> bool {
        self.contains(Self::CONTINUOUS)
    }

    #[inline]
    pub fn ignore_external(self) -> bool {
        self.contains(Self::IGNORE_EXTERNAL)
    }

    /// Flip between edge-triggered and continuous mode
    pub fn toggle_continuous(&mut self) {
        self.0 ^= Self::CONTINUOUS;
    }

    /// Flip the filter gate between OR and AND
    pub fn toggle_filter_gate(&mut self) {
        self.0 ^= Self::FILTER_AND_GATE;
    }

    /// Rotate the external gate: AND -> OR -> IGNORE -> AND.
    /// Any other combination returns to AND.
    pub fn cycle_extern_gate(&mut self) {
        let next = match self.0 & Self::EXTERN_GATE_MASK {
            Self::EXTERN_AND_GATE => 0,
            0 => Self::IGNORE_EXTERNAL,
            _ => Self::EXTERN_AND_GATE,
        };
        self.0 = (self.0 & !Self::EXTERN_GATE_MASK) | next;
    }
}

impl Default for DropLogic {
    fn default() -> Self {
        Self(Self::EXTERN_AND_GATE)
    }
}

/// Cached external signal with edge detection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalEdge {
    /// Last known signal level
    pub level: bool,
    /// Level changed since the previous evaluation cycle
    pub updated: bool,
}

impl SignalEdge {
    /// Neighbor notification; both edges are recorded
    pub fn notify(&mut self, powered: bool) {
        if self.level != powered {
            self.updated = true;
        }
        self.level = powered;
    }

    /// Manual pulse: pretend a rising edge just happened
    pub fn pulse(&mut self) {
        self.level = true;
        self.updated = true;
    }

    /// End-of-cycle resample. Returns true if the level changed.
    pub fn resample(&mut self, powered: bool) -> bool {
        self.updated = self.level != powered;
        self.level = powered;
        self.updated
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Outcome of one trigger evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerDecision {
    /// External-signal trigger (edge or continuous level, or ignore flag)
    pub external: bool,
    /// Filter trigger
    pub filter: bool,
    /// Combined trigger
    pub fire: bool,
    /// Fired because of the one-shot manual latch
    pub manual: bool,
}

impl TriggerDecision {
    /// Any of the trigger sources is active
    #[inline]
    pub fn any(&self) -> bool {
        self.fire || self.filter || self.external
    }
}

/// Compute the external-signal trigger
#[inline]
pub fn external_trigger(edge: &SignalEdge, logic: DropLogic) -> bool {
    (edge.level && (edge.updated || logic.continuous())) || logic.ignore_external()
}

/// Combine signal, filters and policy into a trigger decision
pub fn evaluate_trigger(
    edge: &SignalEdge,
    logic: DropLogic,
    filters: &FilterEvaluation,
    manual_latch: bool,
) -> TriggerDecision {
    let external = external_trigger(edge, logic);

    let fire = if filters.defined {
        if logic.extern_and_gate() {
            filters.trigger && external
        } else {
            filters.trigger || external
        }
    } else {
        external
    };

    TriggerDecision {
        external,
        filter: filters.trigger,
        fire: fire || manual_latch,
        manual: manual_latch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(defined: bool, trigger: bool) -> FilterEvaluation {
        FilterEvaluation {
            defined,
            trigger,
            ..Default::default()
        }
    }

    fn rising() -> SignalEdge {
        SignalEdge {
            level: true,
            updated: true,
        }
    }

    fn held() -> SignalEdge {
        SignalEdge {
            level: true,
            updated: false,
        }
    }

    #[test]
    fn test_default_logic_is_extern_and() {
        let logic = DropLogic::default();
        assert!(logic.extern_and_gate());
        assert!(!logic.filter_and_gate());
        assert!(!logic.continuous());
    }

    #[test]
    fn test_from_bits_truncates() {
        assert_eq!(DropLogic::from_bits_truncate(0xff).bits(), DropLogic::ALL);
        assert_eq!(DropLogic::from_field(-1).bits(), DropLogic::ALL);
    }

    #[test]
    fn test_edge_only_fires_on_rising() {
        let logic = DropLogic::from_bits_truncate(0);
        assert!(external_trigger(&rising(), logic));
        assert!(!external_trigger(&held(), logic));
        assert!(!external_trigger(&SignalEdge::default(), logic));
    }

    #[test]
    fn test_continuous_fires_while_held() {
        let logic = DropLogic::from_bits_truncate(DropLogic::CONTINUOUS);
        assert!(external_trigger(&held(), logic));
        assert!(!external_trigger(&SignalEdge::default(), logic));
    }

    #[test]
    fn test_ignore_external_always_fires() {
        let logic = DropLogic::from_bits_truncate(DropLogic::IGNORE_EXTERNAL);
        assert!(external_trigger(&SignalEdge::default(), logic));
    }

    #[test]
    fn test_gate_combinations() {
        let and = DropLogic::default();
        let or = DropLogic::from_bits_truncate(0);

        // No filters: external signal alone decides
        assert!(evaluate_trigger(&rising(), and, &filters(false, false), false).fire);
        assert!(!evaluate_trigger(&held(), and, &filters(false, false), false).fire);

        // AND gate needs both
        assert!(!evaluate_trigger(&rising(), and, &filters(true, false), false).fire);
        assert!(!evaluate_trigger(&held(), and, &filters(true, true), false).fire);
        assert!(evaluate_trigger(&rising(), and, &filters(true, true), false).fire);

        // OR gate needs either
        assert!(evaluate_trigger(&held(), or, &filters(true, true), false).fire);
        assert!(evaluate_trigger(&rising(), or, &filters(true, false), false).fire);
        assert!(!evaluate_trigger(&held(), or, &filters(true, false), false).fire);
    }

    #[test]
    fn test_manual_latch_forces_fire() {
        let decision = evaluate_trigger(&held(), DropLogic::default(), &filters(true, false), true);
        assert!(decision.fire);
        assert!(decision.manual);
        assert!(!decision.filter);
        assert!(!decision.external);
    }

    #[test]
    fn test_signal_edge_resample() {
        let mut edge = SignalEdge::default();
        edge.notify(true);
        assert!(edge.updated && edge.level);

        assert!(!edge.resample(true));
        assert!(!edge.updated);

        assert!(edge.resample(false));
        assert!(edge.updated && !edge.level);
    }

    #[test]
    fn test_cycle_extern_gate() {
        let mut logic = DropLogic::default().with(DropLogic::CONTINUOUS);
        logic.cycle_extern_gate();
        assert!(!logic.extern_and_gate() && !logic.ignore_external());
        logic.cycle_extern_gate();
        assert!(logic.ignore_external());
        logic.cycle_extern_gate();
        assert!(logic.extern_and_gate() && !logic.ignore_external());
        assert!(logic.continuous());

        let mut both = DropLogic::from_bits_truncate(DropLogic::EXTERN_AND_GATE | DropLogic::IGNORE_EXTERNAL);
        both.cycle_extern_gate();
        assert_eq!(both.bits(), DropLogic::EXTERN_AND_GATE);
    }
}
