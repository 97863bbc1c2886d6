//! Timer & Animation Controller
//!
//! Three countdowns drive the device:
//! 1. Shutter timer - shutter is open while > 0
//! 2. Drop cooldown - ejection is allowed only at 0
//! 3. Coarse divider - full evaluation runs each time it elapses
//!
//! Short timers tick every simulation tick; the divider throttles the
//! expensive trigger evaluation to [`TICK_INTERVAL`].

use crate::{
    DROP_PERIOD_OFFSET, RETRIGGER_INTERVAL, SHUTTER_CLOSE_DELAY, SHUTTER_RESIDUAL_DELAY,
    TICK_INTERVAL,
};

/// Result of advancing the per-tick timers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerTick {
    /// Coarse divider elapsed; run a full evaluation
    pub evaluate: bool,
    /// Drop cooldown reached zero on this tick
    pub cooldown_expired: bool,
}

/// Device timers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropperTimers {
    /// Shutter open countdown (0 = closed)
    shutter: u32,
    /// Drop cooldown countdown (0 = ready)
    cooldown: u32,
    /// Ticks until the next coarse evaluation
    divider: u32,
    /// Shutter state last reported to the host
    shutter_open: bool,
}

impl Default for DropperTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl DropperTimers {
    pub fn new() -> Self {
        Self {
            shutter: 0,
            cooldown: 0,
            divider: 0,
            shutter_open: false,
        }
    }

    /// Advance by one simulation tick
    pub fn tick(&mut self) -> TimerTick {
        self.shutter = self.shutter.saturating_sub(1);

        let mut cooldown_expired = false;
        if self.cooldown > 0 {
            self.cooldown -= 1;
            cooldown_expired = self.cooldown == 0;
        }

        self.divider = self.divider.saturating_sub(1);
        let evaluate = self.divider == 0;
        if evaluate {
            self.divider = TICK_INTERVAL;
        }

        TimerTick {
            evaluate,
            cooldown_expired,
        }
    }

    /// Evaluate on the next tick
    pub fn request_evaluation(&mut self) {
        self.divider = 1;
    }

    /// Shorten the divider after a trigger so a follow-up evaluation comes sooner
    pub fn expedite(&mut self) {
        self.divider = self.divider.min(RETRIGGER_INTERVAL);
    }

    /// Keep the shutter open for the full close delay
    pub fn open_shutter(&mut self) {
        self.shutter = SHUTTER_CLOSE_DELAY;
    }

    /// Ejection is impossible; let the shutter close soon
    pub fn cap_shutter(&mut self) {
        self.shutter = self.shutter.min(SHUTTER_RESIDUAL_DELAY);
    }

    /// Start the drop cooldown for a period percent (0.1 s base, 100% = 10 s)
    pub fn start_cooldown(&mut self, period: u32) {
        self.cooldown = DROP_PERIOD_OFFSET + period * 2;
    }

    #[inline]
    pub fn cooldown_ready(&self) -> bool {
        self.cooldown == 0
    }

    #[inline]
    pub fn shutter(&self) -> u32 {
        self.shutter
    }

    #[inline]
    pub fn cooldown(&self) -> u32 {
        self.cooldown
    }

    #[inline]
    pub fn divider(&self) -> u32 {
        self.divider
    }

    pub fn set_shutter(&mut self, ticks: u32) {
        self.shutter = ticks;
    }

    pub fn set_cooldown(&mut self, ticks: u32) {
        self.cooldown = ticks;
    }

    /// Whether the shutter is currently reported open
    #[inline]
    pub fn is_shutter_open(&self) -> bool {
        self.shutter_open
    }

    /// Reconcile the reported shutter state with the timer.
    /// Returns the new state on a transition, None otherwise.
    pub fn sync_shutter(&mut self) -> Option<bool> {
        let open = self.shutter > 0;
        if open == self.shutter_open {
            return None;
        }
        self.shutter_open = open;
        Some(open)
    }

    /// Reset runtime-only countdowns (cooldown, divider); shutter timer is persisted
    pub fn reset_runtime(&mut self) {
        self.cooldown = 0;
        self.divider = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_evaluates() {
        let mut timers = DropperTimers::new();
        assert!(timers.tick().evaluate);
        assert_eq!(timers.divider(), TICK_INTERVAL);
    }

    #[test]
    fn test_divider_period() {
        let mut timers = DropperTimers::new();
        timers.tick();

        let evaluations = (0..TICK_INTERVAL * 3).filter(|_| timers.tick().evaluate).count();
        assert_eq!(evaluations, 3);
    }

    #[test]
    fn test_request_and_expedite() {
        let mut timers = DropperTimers::new();
        timers.tick();

        timers.request_evaluation();
        assert!(timers.tick().evaluate);

        timers.expedite();
        assert_eq!(timers.divider(), RETRIGGER_INTERVAL);
        let ticks = (1..=TICK_INTERVAL).find(|_| timers.tick().evaluate);
        assert_eq!(ticks, Some(RETRIGGER_INTERVAL));
    }

    #[test]
    fn test_cooldown() {
        let mut timers = DropperTimers::new();
        timers.start_cooldown(5);
        assert_eq!(timers.cooldown(), DROP_PERIOD_OFFSET + 10);
        assert!(!timers.cooldown_ready());

        let mut expired = 0;
        for _ in 0..40 {
            if timers.tick().cooldown_expired {
                expired += 1;
            }
        }
        assert_eq!(expired, 1);
        assert!(timers.cooldown_ready());
    }

    #[test]
    fn test_timers_never_negative() {
        let mut timers = DropperTimers::new();
        for _ in 0..5 {
            timers.tick();
        }
        assert_eq!(timers.shutter(), 0);
        assert_eq!(timers.cooldown(), 0);
    }

    #[test]
    fn test_shutter_transitions_reported_once() {
        let mut timers = DropperTimers::new();
        assert_eq!(timers.sync_shutter(), None);

        timers.open_shutter();
        assert_eq!(timers.sync_shutter(), Some(true));
        assert_eq!(timers.sync_shutter(), None);

        timers.cap_shutter();
        assert_eq!(timers.shutter(), SHUTTER_RESIDUAL_DELAY);
        for _ in 0..SHUTTER_RESIDUAL_DELAY {
            timers.tick();
        }
        assert_eq!(timers.sync_shutter(), Some(false));
    }
}
