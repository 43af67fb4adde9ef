//! Hardware seams.
//!
//! The control core touches hardware only through these minimal traits. A
//! port implements them over the real peripherals; the mock types here let
//! the whole stack run in tests and simulation.

use super::sampler::Measurement;

/// The ADC peripheral with its input multiplexer.
pub trait AdcBus {
    /// Route the multiplexer to the input for `channel`.
    fn select(&mut self, channel: Measurement);
    /// Start a conversion of the selected input; completion is signalled by
    /// the conversion interrupt.
    fn start(&mut self);
    /// Read the result of the completed conversion (12-bit count).
    fn result(&mut self) -> u16;
    /// Polled single conversion, used only before interrupts are enabled.
    fn read_blocking(&mut self, channel: Measurement) -> u16;
}

/// The free-running timer that paces sampling.
pub trait SampleTimer {
    /// Load the reload count for the next period.
    fn set_reload(&mut self, counts: u8);
}

/// One PWM output compare channel, 10-bit, active low.
///
/// A compare value of 1023 keeps the output inactive for the whole period.
/// The output stage must be gated off entirely while disabled; a compare
/// write alone cannot produce a constant inactive level on this hardware.
pub trait PwmChannel {
    fn set_compare(&mut self, counts: u16);
    fn set_output_enabled(&mut self, enabled: bool);
}

/// The load-switch pins and the power-control strap.
pub trait PowerIo {
    /// Drive the external load switch.
    fn set_power_enable(&mut self, on: bool);
    /// Drive the active-low alert line; `asserted` pulls it low.
    fn set_alert(&mut self, asserted: bool);
    /// Drive the night indication output.
    fn set_night(&mut self, night: bool);
    /// Whether the strap selects load power only at night.
    fn night_only_mode(&self) -> bool;
}

/// The processor's dead-man timer.
pub trait WatchdogHw {
    /// Enable the timer with its fixed period.
    fn arm(&mut self);
    /// Reload the timer; must happen more often than the period.
    fn kick(&mut self);
    /// Whether the last reset was caused by this timer expiring.
    fn reset_was_watchdog(&self) -> bool;
}

/// Mock ADC holding one settable reading per channel.
#[derive(Debug, Clone, Copy)]
pub struct MockAdc {
    readings: [u16; 6],
    selected: Measurement,
    conversions: u32,
}

impl MockAdc {
    pub const fn new() -> Self {
        Self {
            readings: [0; 6],
            selected: Measurement::SolarVolts,
            conversions: 0,
        }
    }

    /// Set the raw count returned for `channel`.
    pub fn set_reading(&mut self, channel: Measurement, raw: u16) {
        self.readings[channel as usize] = raw;
    }

    pub fn selected(&self) -> Measurement {
        self.selected
    }

    pub fn conversions(&self) -> u32 {
        self.conversions
    }
}

impl Default for MockAdc {
    fn default() -> Self {
        Self::new()
    }
}

impl AdcBus for MockAdc {
    fn select(&mut self, channel: Measurement) {
        self.selected = channel;
    }

    fn start(&mut self) {
        self.conversions += 1;
    }

    fn result(&mut self) -> u16 {
        self.readings[self.selected as usize]
    }

    fn read_blocking(&mut self, channel: Measurement) -> u16 {
        self.readings[channel as usize]
    }
}

/// Mock sample timer remembering the last reload value.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockSampleTimer {
    reload: u8,
}

impl MockSampleTimer {
    pub const fn new() -> Self {
        Self { reload: 0 }
    }

    pub fn reload(&self) -> u8 {
        self.reload
    }
}

impl SampleTimer for MockSampleTimer {
    fn set_reload(&mut self, counts: u8) {
        self.reload = counts;
    }
}

/// Mock PWM channel remembering compare value and gating state.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockPwm {
    compare: u16,
    enabled: bool,
}

impl MockPwm {
    pub const fn new() -> Self {
        Self {
            compare: 0,
            enabled: false,
        }
    }

    pub fn compare(&self) -> u16 {
        self.compare
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl PwmChannel for MockPwm {
    fn set_compare(&mut self, counts: u16) {
        self.compare = counts;
    }

    fn set_output_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// Mock load-switch pins.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockPowerIo {
    power: bool,
    alert: bool,
    night: bool,
    night_only: bool,
}

impl MockPowerIo {
    pub const fn new() -> Self {
        Self {
            power: false,
            alert: false,
            night: false,
            night_only: false,
        }
    }

    /// Configure the power-control strap.
    pub fn set_night_only(&mut self, night_only: bool) {
        self.night_only = night_only;
    }

    pub fn power_enabled(&self) -> bool {
        self.power
    }

    pub fn alert_asserted(&self) -> bool {
        self.alert
    }

    pub fn night(&self) -> bool {
        self.night
    }
}

impl PowerIo for MockPowerIo {
    fn set_power_enable(&mut self, on: bool) {
        self.power = on;
    }

    fn set_alert(&mut self, asserted: bool) {
        self.alert = asserted;
    }

    fn set_night(&mut self, night: bool) {
        self.night = night;
    }

    fn night_only_mode(&self) -> bool {
        self.night_only
    }
}

/// Mock dead-man timer counting kicks.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockWatchdog {
    armed: bool,
    kicks: u32,
    reset_was_watchdog: bool,
}

impl MockWatchdog {
    pub const fn new() -> Self {
        Self {
            armed: false,
            kicks: 0,
            reset_was_watchdog: false,
        }
    }

    /// Pretend the previous reset was a watchdog reset.
    pub fn set_reset_was_watchdog(&mut self, value: bool) {
        self.reset_was_watchdog = value;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn kicks(&self) -> u32 {
        self.kicks
    }
}

impl WatchdogHw for MockWatchdog {
    fn arm(&mut self) {
        self.armed = true;
    }

    fn kick(&mut self) {
        self.kicks += 1;
    }

    fn reset_was_watchdog(&self) -> bool {
        self.reset_was_watchdog
    }
}
