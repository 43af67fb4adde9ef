//! Buck converter duty control.
//!
//! The converter regulates its *input* voltage: the panel sits at the MPPT
//! setpoint while the output follows the battery. Raising the duty loads
//! the panel harder and pulls its voltage down; lowering the duty lets the
//! panel voltage rise. The regulator therefore steps the 10-bit duty by at
//! most one count per 5 ms evaluation:
//!
//! - step down when the panel is below the setpoint, or the battery side
//!   has hit an over-voltage or over-current ceiling,
//! - step up when the panel is above the setpoint and the battery has
//!   headroom,
//! - hold otherwise.
//!
//! The PWM hardware takes the inverted compare value and its output stage
//! must be gated off completely at zero duty.

use super::bus::RegisterBus;
use super::config::{I_SOLAR_MAX_MA, V_BUCK_HYST_MV, V_MIN_GOOD_SOLAR_MV};
use super::physical::PwmChannel;
use super::sampler::{Measurement, MeasurementSource};

/// Full-scale 10-bit PWM duty.
pub const PWM_MAX: u16 = 1023;

// Measured conversion efficiency (percent) against input power (mW).
const EFF_POWER_MW: [u16; 22] = [
    250, 375, 500, 750, 1000, 1250, 1500, 1750, 2000, 2250, 2500, 2750, 3000, 3250, 3500, 4000,
    5000, 6000, 7500, 11500, 25000, 35000,
];
const EFF_PERCENT: [u8; 22] = [
    56, 62, 67, 71, 75, 77, 78, 80, 81, 83, 84, 85, 86, 87, 88, 89, 90, 91, 92, 93, 93, 92,
];

/// Converter efficiency in percent at `power_mw` input power.
///
/// Piecewise constant: the value of the first table point whose power
/// bound exceeds the input, saturating at the top entry.
pub fn efficiency(power_mw: u16) -> u8 {
    let i = EFF_POWER_MW
        .iter()
        .position(|&bound| power_mw < bound)
        .unwrap_or(EFF_POWER_MW.len() - 1);
    EFF_PERCENT[i]
}

/// The duty-step regulator and its limit flags.
#[derive(Debug)]
pub struct Buck<P> {
    pwm_out: P,
    pwm: u16,
    solar_setpoint_mv: u16,
    batt_setpoint_mv: u16,
    enabled: bool,
    batt_limit_enabled: bool,
    limit1: bool,
    limit2: bool,
    output_on: bool,
}

impl<P: PwmChannel> Buck<P> {
    /// Build the regulator disabled, with the battery setpoint at the float
    /// threshold.
    pub fn new(pwm_out: P, float_mv: u16) -> Self {
        let mut buck = Self {
            pwm_out,
            pwm: 0,
            solar_setpoint_mv: V_MIN_GOOD_SOLAR_MV,
            batt_setpoint_mv: float_mv,
            enabled: false,
            batt_limit_enabled: true,
            limit1: false,
            limit2: false,
            output_on: true,
        };
        buck.apply_pwm();
        buck
    }

    /// Panel-side regulation setpoint (mV).
    pub fn set_solar_setpoint(&mut self, mv: u16) {
        self.solar_setpoint_mv = mv;
    }

    /// Battery-side ceiling (mV), the active charge threshold.
    pub fn set_batt_setpoint(&mut self, mv: u16) {
        self.batt_setpoint_mv = mv;
    }

    /// Allow or suppress battery-side voltage limiting.
    pub fn enable_battery_limit(&mut self, enabled: bool) {
        self.batt_limit_enabled = enabled;
    }

    /// Enable or disable regulation.
    ///
    /// Enabling seeds the duty with the continuous-conduction first guess
    /// `PWM_MAX * batt / solar`; disabling drops the duty to zero, clears
    /// the limit flags and publishes a zero status word.
    pub fn set_enabled(&mut self, enable: bool, bus: &mut RegisterBus) {
        if enable {
            if !self.enabled {
                self.pwm = if self.solar_setpoint_mv == 0 {
                    PWM_MAX
                } else {
                    let guess = u32::from(PWM_MAX) * u32::from(self.batt_setpoint_mv)
                        / u32::from(self.solar_setpoint_mv);
                    (guess as u16).min(PWM_MAX)
                };
                self.apply_pwm();
                self.enabled = true;
            }
        } else if self.enabled {
            self.enabled = false;
            self.pwm = 0;
            self.limit1 = false;
            self.limit2 = false;
            self.apply_pwm();
            bus.set_buck_status(0);
        }
    }

    /// One regulation step; runs every 5 ms inside the sampling interrupt.
    pub fn update(&mut self, meas: &impl MeasurementSource, bus: &mut RegisterBus) {
        if !self.enabled {
            return;
        }

        let solar_mv = meas.value_for_isr(Measurement::SolarVolts);
        let batt_mv = meas.value_for_isr(Measurement::BattVolts);
        let solar_ma = meas.value_for_isr(Measurement::SolarAmps);

        // limit1: cut power transfer, the battery is over voltage or the
        // panel over current. limit2: no headroom left to add power.
        self.limit1 = (self.batt_limit_enabled
            && batt_mv > self.batt_setpoint_mv + V_BUCK_HYST_MV)
            || solar_ma > I_SOLAR_MAX_MA;
        self.limit2 =
            self.batt_limit_enabled && batt_mv >= self.batt_setpoint_mv - V_BUCK_HYST_MV;

        if solar_mv < self.solar_setpoint_mv || self.limit1 {
            if self.pwm > 0 {
                self.pwm -= 1;
                self.apply_pwm();
            }
        } else if solar_mv > self.solar_setpoint_mv && !self.limit2 {
            if self.pwm < PWM_MAX {
                self.pwm += 1;
                self.apply_pwm();
            }
        }

        bus.set_buck_status(self.status_word());
    }

    fn apply_pwm(&mut self) {
        self.pwm_out.set_compare(PWM_MAX - self.pwm);
        if self.pwm == 0 {
            if self.output_on {
                self.pwm_out.set_output_enabled(false);
                self.output_on = false;
            }
        } else if !self.output_on {
            self.pwm_out.set_output_enabled(true);
            self.output_on = true;
        }
    }

    fn status_word(&self) -> u16 {
        let mut word = self.pwm << 6;
        if self.limit1 {
            word |= 0x0001;
        }
        if self.limit2 {
            word |= 0x0002;
        }
        word
    }

    pub fn pwm(&self) -> u16 {
        self.pwm
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_limiting(&self) -> bool {
        self.limit1 || self.limit2
    }

    pub fn limit1(&self) -> bool {
        self.limit1
    }

    pub fn limit2(&self) -> bool {
        self.limit2
    }

    pub fn solar_setpoint_mv(&self) -> u16 {
        self.solar_setpoint_mv
    }

    pub fn batt_setpoint_mv(&self) -> u16 {
        self.batt_setpoint_mv
    }

    pub fn output(&self) -> &P {
        &self.pwm_out
    }
}
