//! Hardware dead-man timer.
//!
//! The timer period is a few milliseconds and the kick sits at the top of
//! the cooperative main loop, so any hang in the loop or an interrupt
//! handler resets the processor. Whether the previous reset came from the
//! timer is latched once at startup into a sticky bit that the host reads
//! (and thereby clears) through STATUS.

use super::physical::WatchdogHw;

/// Watchdog wrapper with the sticky reset-cause latch.
#[derive(Debug)]
pub struct SystemWatchdog<W> {
    hw: W,
    triggered: bool,
}

impl<W: WatchdogHw> SystemWatchdog<W> {
    /// Latch the reset cause, then arm the timer.
    pub fn new(mut hw: W) -> Self {
        let triggered = hw.reset_was_watchdog();
        hw.arm();
        Self { hw, triggered }
    }

    /// Reload the timer; called once per main-loop pass.
    pub fn kick(&mut self) {
        self.hw.kick();
    }
}

impl<W> SystemWatchdog<W> {
    /// Whether the previous reset was a watchdog reset (sticky).
    pub fn was_triggered(&self) -> bool {
        self.triggered
    }

    /// Host acknowledgement via the STATUS read path.
    pub fn clear_triggered(&mut self) {
        self.triggered = false;
    }

    pub fn hw(&self) -> &W {
        &self.hw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charger::physical::MockWatchdog;

    #[test]
    fn arms_and_latches_a_clean_boot() {
        let wd = SystemWatchdog::new(MockWatchdog::new());
        assert!(!wd.was_triggered());
        assert!(wd.hw.is_armed());
    }

    #[test]
    fn latches_watchdog_reset_until_cleared() {
        let mut hw = MockWatchdog::new();
        hw.set_reset_was_watchdog(true);
        let mut wd = SystemWatchdog::new(hw);
        assert!(wd.was_triggered());
        wd.clear_triggered();
        assert!(!wd.was_triggered());
    }

    #[test]
    fn kicks_reach_the_hardware() {
        let mut wd = SystemWatchdog::new(MockWatchdog::new());
        wd.kick();
        wd.kick();
        assert_eq!(wd.hw.kicks(), 2);
    }
}
