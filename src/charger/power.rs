//! Load power, alert and host watchdog control.
//!
//! The machine runs once per second. It drives three pins: the load
//! switch, the active-low alert line, and the night indication. Every
//! planned power removal is preceded by a warning period with the alert
//! asserted so an attached host can shut down cleanly; the alert stays
//! asserted for as long as the load is off so the alert pin cannot feed a
//! sneak power path into the dead host.
//!
//! A low battery drops the load after a sustained undervoltage, and the
//! load stays off until the battery has both recovered past the power-on
//! threshold and spent a minimum time actually charging, so a recovering
//! open-circuit voltage alone cannot bounce the load back on. In
//! night-only mode the load additionally runs only while the charger sees
//! night.
//!
//! The host watchdog is armed by a magic enable plus a non-zero count;
//! once armed, the count is decremented every second and must be rewritten
//! by the host. Expiry forces a warned power cycle of the load with the
//! power-off duration taken from its own register, and the watchdog
//! disarms on restart.

use super::bus::{RegisterBus, status};
use super::charge::{Charge, ChargeState};
use super::config::{
    LOWPWR_TIMEOUT_S, PWR_LB_HYST_MV, PWROFF_DEF_WD_TIMEOUT_S, PWROFF_LB_CHG_TIMEOUT_S,
    PWROFF_WARN_TIMEOUT_S, V_BAD_BATTERY_MV,
};
use super::param::Param;
use super::physical::PowerIo;

/// Load/alert/watchdog machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum PowerState {
    /// Load off after a low-battery shutdown, waiting for recharge.
    OffLowBatt,
    /// Load off because it is daytime in night-only mode.
    OffDay,
    /// Pre-warn before a low-battery shutdown.
    AlertLowBatt,
    /// Pre-warn before a daytime shutdown.
    AlertDay,
    /// Load powered.
    On,
    /// Pre-warn before a watchdog power cycle.
    WdAlert,
    /// Timed watchdog power removal.
    WdOff,
}

/// The load controller and host watchdog.
#[derive(Debug)]
pub struct Power<P> {
    io: P,
    state: PowerState,
    bad_battery: bool,
    night_only: bool,
    is_night: bool,
    power_enabled: bool,

    off_count: u16,
    wd_global_enable: bool,
    wd_count_written: bool,
    wd_triggered: bool,
    wd_count: u8,
    wd_pwroff_timeout: u16,
}

impl<P: PowerIo> Power<P> {
    /// Derive the boot state from the measured battery voltage, the
    /// power-control strap, and the charger's initial state, then drive
    /// the pins.
    pub fn new(io: P, batt_mv: u16, params: &Param, charger_sees_night: bool) -> Self {
        let night_only = io.night_only_mode();
        let mut power = Self {
            io,
            state: PowerState::On,
            bad_battery: batt_mv < V_BAD_BATTERY_MV,
            night_only,
            is_night: charger_sees_night,
            power_enabled: true,
            off_count: 0,
            wd_global_enable: false,
            wd_count_written: false,
            wd_triggered: false,
            wd_count: 0,
            wd_pwroff_timeout: PWROFF_DEF_WD_TIMEOUT_S,
        };

        if batt_mv <= params.pwroff_mv() {
            power.state = PowerState::OffLowBatt;
            power.off_count = PWROFF_LB_CHG_TIMEOUT_S;
            power.power_enabled = false;
        } else if power.night_only && !power.is_night {
            power.state = PowerState::OffDay;
            power.power_enabled = false;
        } else {
            power.off_count = LOWPWR_TIMEOUT_S;
        }

        power.io.set_night(power.is_night);
        power.io.set_power_enable(power.power_enabled);
        power.io.set_alert(!power.power_enabled);
        power
    }

    /// One second of the load machine.
    pub fn update(&mut self, charge: &Charge, params: &Param, bus: &mut RegisterBus) {
        let batt_mv = charge.batt_mv();
        self.bad_battery = batt_mv < V_BAD_BATTERY_MV;
        self.night_only = self.io.night_only_mode();
        self.is_night = charge.state() == ChargeState::Night;

        let not_charging = matches!(charge.state(), ChargeState::Night | ChargeState::Idle);

        match self.state {
            PowerState::OffLowBatt => {
                // The recharge hold-off only runs down while the charger is
                // doing real work; a battery resting back up to voltage
                // does not count.
                if self.off_count != 0 {
                    if not_charging {
                        self.off_count = PWROFF_LB_CHG_TIMEOUT_S;
                    } else {
                        self.off_count -= 1;
                    }
                }

                if batt_mv >= params.pwron_mv() && self.off_count == 0 {
                    self.state = if self.night_only {
                        PowerState::OffDay
                    } else {
                        PowerState::On
                    };
                }
            }

            PowerState::OffDay => {
                if batt_mv <= params.pwroff_mv() {
                    self.state = PowerState::OffLowBatt;
                    self.off_count = PWROFF_LB_CHG_TIMEOUT_S;
                } else if batt_mv >= params.pwroff_mv() + PWR_LB_HYST_MV && self.is_night {
                    self.state = PowerState::On;
                }
            }

            PowerState::AlertLowBatt => {
                self.off_count = self.off_count.saturating_sub(1);
                if self.off_count == 0 {
                    self.state = PowerState::OffLowBatt;
                    self.off_count = PWROFF_LB_CHG_TIMEOUT_S;
                }
            }

            PowerState::AlertDay => {
                self.off_count = self.off_count.saturating_sub(1);
                if self.off_count == 0 {
                    self.state = PowerState::OffDay;
                }
            }

            PowerState::On => {
                let mut wd_fired = false;
                if self.watchdog_running() && self.wd_count != 0 {
                    self.wd_count -= 1;
                    if self.wd_count == 0 {
                        wd_fired = true;
                        self.wd_triggered = true;
                        bus.set_status_bit(status::SW_WD_TRIGGERED, true);
                    }
                }

                if wd_fired {
                    self.state = PowerState::WdAlert;
                    self.off_count = PWROFF_WARN_TIMEOUT_S;
                } else if batt_mv <= params.pwroff_mv() {
                    self.off_count = self.off_count.saturating_sub(1);
                    if self.off_count == 0 {
                        self.state = PowerState::AlertLowBatt;
                        self.off_count = PWROFF_WARN_TIMEOUT_S;
                    }
                } else if self.night_only && !self.is_night {
                    self.state = PowerState::AlertDay;
                    self.off_count = PWROFF_WARN_TIMEOUT_S;
                } else {
                    // Undervoltage must be sustained; any good second
                    // reloads the trigger timer.
                    self.off_count = LOWPWR_TIMEOUT_S;
                }
            }

            PowerState::WdAlert => {
                if self.watchdog_running() {
                    self.off_count = self.off_count.saturating_sub(1);
                    if self.off_count == 0 {
                        self.state = PowerState::WdOff;
                        self.off_count = self.wd_pwroff_timeout;
                    }
                } else {
                    self.state = PowerState::On;
                }
            }

            PowerState::WdOff => {
                if self.watchdog_running() {
                    self.off_count = self.off_count.saturating_sub(1);
                    if self.off_count == 0 {
                        self.state = PowerState::On;
                        self.disable_watchdog();
                    }
                } else {
                    self.state = PowerState::On;
                }
            }
        }

        self.power_enabled = !matches!(
            self.state,
            PowerState::OffLowBatt | PowerState::OffDay | PowerState::WdOff
        );
        self.io.set_power_enable(self.power_enabled);
        self.io.set_alert(self.state != PowerState::On);
        self.io.set_night(self.is_night);

        bus.set_status_bit(status::BAD_BATTERY, self.bad_battery);
        bus.set_status_bit(status::WD_RUNNING, self.watchdog_running());
        bus.set_status_bit(status::POWER_ENABLED, self.power_enabled);
        bus.set_status_bit(status::ALERT, self.is_alert());
        bus.set_status_bit(status::PCTRL, self.night_only);
        bus.set_status_bit(status::NIGHT, self.is_night);
    }

    pub fn io(&self) -> &P {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut P {
        &mut self.io
    }
}

impl<P> Power<P> {
    /// Host write to the watchdog enable register.
    ///
    /// Dropping the enable while armed tears the whole watchdog down.
    pub fn enable_watchdog(&mut self, enable: bool) {
        if self.wd_global_enable && !enable {
            self.disable_watchdog();
        }
        self.wd_global_enable = enable;
    }

    /// Host write to the watchdog seconds register; zero disarms the
    /// count, anything else starts it.
    pub fn set_watchdog_timeout(&mut self, seconds: u8) {
        self.wd_count_written = seconds != 0;
        self.wd_count = seconds;
    }

    /// Host write to the watchdog power-off duration; zero restores the
    /// default.
    pub fn set_watchdog_pwroff_timeout(&mut self, seconds: u16) {
        self.wd_pwroff_timeout = if seconds == 0 {
            PWROFF_DEF_WD_TIMEOUT_S
        } else {
            seconds
        };
    }

    /// Armed and counting.
    pub fn watchdog_running(&self) -> bool {
        self.wd_global_enable && self.wd_count_written
    }

    pub fn watchdog_global_enable(&self) -> bool {
        self.wd_global_enable
    }

    pub fn watchdog_timeout(&self) -> u8 {
        self.wd_count
    }

    pub fn watchdog_pwroff_timeout(&self) -> u16 {
        self.wd_pwroff_timeout
    }

    pub fn watchdog_was_triggered(&self) -> bool {
        self.wd_triggered
    }

    pub fn clear_watchdog_triggered(&mut self) {
        self.wd_triggered = false;
    }

    fn disable_watchdog(&mut self) {
        self.wd_global_enable = false;
        self.wd_count_written = false;
        self.wd_count = 0;
        self.wd_pwroff_timeout = PWROFF_DEF_WD_TIMEOUT_S;
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.power_enabled
    }

    /// Alert condition: anything but plain On.
    pub fn is_alert(&self) -> bool {
        self.state != PowerState::On
    }

    pub fn is_night(&self) -> bool {
        self.is_night
    }

    /// Whether the strap selects load power only at night.
    pub fn night_only(&self) -> bool {
        self.night_only
    }

    pub fn bad_battery(&self) -> bool {
        self.bad_battery
    }

    /// True while the load is off from a low-battery shutdown.
    pub fn low_batt_disabled(&self) -> bool {
        self.state == PowerState::OffLowBatt
    }
}
