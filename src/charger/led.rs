//! Status LED patterns.
//!
//! Driven every fast tick (10 ms). Normal indication: a short blink every
//! 10 s while the load is off on a flat battery, a short blink every 5 s
//! while idle, and a "breathing" ramp while charging whose peak brightness
//! scales with the panel current. Faults preempt all of that with groups
//! of short blinks every 5 s: two for a bad battery, three for a missing
//! external temperature sensor, four for temperature out of range. A
//! higher-priority fault takes over from a lower one immediately.

use super::charge::{Charge, ChargeState};
use super::config::I_SOLAR_MAX_MA;
use super::physical::PwmChannel;
use super::power::Power;
use super::temp::TempComp;

// Blink timing, in 10 ms evaluation periods unless noted.
const EVAL_MS: u16 = 10;
const PO_PERIOD_MS: u16 = 10000;
const IDLE_PERIOD_MS: u16 = 5000;
const FAULT_PERIOD_MS: u16 = 5000;
const BLINK_ON_MS: u16 = 60;
const BLINK_OFF_MS: u16 = 240;

// Brightness, out of 255.
const BLINK_PWM: u8 = 160;
const PULSE_MIN_PWM: u16 = 32;
// Evaluation periods per breathing half-ramp; power of two so the
// fractional interpolator cannot overflow.
const PULSE_STEPS: u16 = 64;

/// Indicator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum LedState {
    Init,
    IdleBlink,
    LowBatt,
    Charging,
    Fault,
}

/// Fault codes in priority order; smaller wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum LedFault {
    BadBattery = 1,
    MissingExtSensor = 2,
    TempRange = 3,
}

impl LedFault {
    fn blink_count(self) -> u8 {
        match self {
            LedFault::BadBattery => 2,
            LedFault::MissingExtSensor => 3,
            LedFault::TempRange => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    BlinkOff,
    BlinkOn,
    BlinkWait,
    PulseUp,
    PulseDown,
}

/// Pattern generator over one PWM channel.
#[derive(Debug)]
pub struct Led<P> {
    pwm_out: P,
    state: LedState,
    fault: Option<LedFault>,
    phase: Phase,

    cur_pwm: u8,
    output_on: bool,

    total_blinks: u8,
    cur_blink: u8,
    period: u16,
    wait_periods: u16,

    pulse_max: u8,
    // Fractional brightness, integer part in the top byte.
    pulse_value: u16,
    pulse_inc: u16,
}

impl<P: PwmChannel> Led<P> {
    pub fn new(pwm_out: P) -> Self {
        let mut led = Self {
            pwm_out,
            state: LedState::Init,
            fault: None,
            phase: Phase::BlinkOff,
            cur_pwm: 0,
            output_on: true,
            total_blinks: 0,
            cur_blink: 0,
            period: 0,
            wait_periods: 0,
            pulse_max: 0,
            pulse_value: 0,
            pulse_inc: 0,
        };
        led.apply_pwm();
        led
    }

    /// Advance the pattern one fast tick.
    pub fn update<PIO>(&mut self, charge: &Charge, power: &Power<PIO>, temp: &TempComp) {
        let fault = current_fault(charge, power, temp);

        if self.state == LedState::Fault {
            match fault {
                None => {
                    let normal = normal_state(charge, power);
                    self.enter_normal(normal, charge);
                }
                Some(f) => {
                    if f < self.fault.unwrap_or(LedFault::TempRange) {
                        self.enter_fault(f);
                    } else {
                        self.do_blink();
                    }
                }
            }
        } else if let Some(f) = fault {
            self.enter_fault(f);
        } else {
            let normal = normal_state(charge, power);
            if self.state != normal {
                self.enter_normal(normal, charge);
            } else if self.state == LedState::Charging {
                self.do_pulse(charge.solar_ma());
            } else {
                self.do_blink();
            }
        }
    }

    fn enter_normal(&mut self, state: LedState, charge: &Charge) {
        self.fault = None;
        if state == self.state {
            return;
        }
        self.state = state;
        match state {
            LedState::IdleBlink => self.setup_blink(IDLE_PERIOD_MS, 1),
            LedState::LowBatt => self.setup_blink(PO_PERIOD_MS, 1),
            LedState::Charging => self.setup_pulse(charge.solar_ma()),
            LedState::Init | LedState::Fault => {}
        }
        self.apply_pwm();
    }

    fn enter_fault(&mut self, fault: LedFault) {
        self.state = LedState::Fault;
        if self.fault != Some(fault) {
            self.fault = Some(fault);
            self.setup_blink(FAULT_PERIOD_MS, fault.blink_count());
            self.apply_pwm();
        }
    }

    fn setup_blink(&mut self, group_period_ms: u16, blinks: u8) {
        self.cur_pwm = 0;
        self.total_blinks = blinks;
        self.cur_blink = 0;
        self.wait_periods = group_period_ms / EVAL_MS;
        self.period = 0;
        self.phase = Phase::BlinkOff;
    }

    fn setup_pulse(&mut self, solar_ma: u16) {
        // Peak brightness scales with panel current between the floor and
        // full scale.
        let span = u32::from(255 - PULSE_MIN_PWM);
        let scaled =
            span * u32::from(solar_ma) / u32::from(I_SOLAR_MAX_MA) + u32::from(PULSE_MIN_PWM);
        self.pulse_max = scaled.min(255) as u8;
        self.pulse_inc = (u16::from(self.pulse_max) << 8) / PULSE_STEPS;
        self.cur_pwm = 0;
        self.pulse_value = 0;
        self.phase = Phase::PulseUp;
    }

    fn do_blink(&mut self) {
        match self.phase {
            Phase::BlinkOff => {
                self.period += 1;
                if self.period == BLINK_OFF_MS / EVAL_MS {
                    self.period = 0;
                    self.phase = Phase::BlinkOn;
                    self.cur_pwm = BLINK_PWM;
                    self.apply_pwm();
                }
            }
            Phase::BlinkOn => {
                self.period += 1;
                if self.period == BLINK_ON_MS / EVAL_MS {
                    self.period = 0;
                    self.cur_pwm = 0;
                    self.apply_pwm();
                    self.cur_blink += 1;
                    self.phase = if self.cur_blink == self.total_blinks {
                        Phase::BlinkWait
                    } else {
                        Phase::BlinkOff
                    };
                }
            }
            Phase::BlinkWait => {
                self.period += 1;
                if self.period == self.wait_periods {
                    self.period = 0;
                    self.cur_blink = 0;
                    self.phase = Phase::BlinkOff;
                }
            }
            // A pulse phase left over from a state change; restart clean.
            Phase::PulseUp | Phase::PulseDown => {
                self.period = 0;
                self.cur_blink = 0;
                self.phase = Phase::BlinkOff;
                self.cur_pwm = 0;
                self.apply_pwm();
            }
        }
    }

    fn do_pulse(&mut self, solar_ma: u16) {
        match self.phase {
            Phase::PulseUp => {
                self.pulse_value = self.pulse_value.saturating_add(self.pulse_inc);
                self.cur_pwm = (self.pulse_value >> 8) as u8;
                if self.cur_pwm >= self.pulse_max {
                    self.cur_pwm = self.pulse_max;
                    self.phase = Phase::PulseDown;
                }
            }
            Phase::PulseDown => {
                self.pulse_value = self.pulse_value.saturating_sub(self.pulse_inc);
                self.cur_pwm = (self.pulse_value >> 8) as u8;
                if self.pulse_value == 0 {
                    // Re-read the panel current once per full pulse.
                    self.setup_pulse(solar_ma);
                }
            }
            _ => self.setup_pulse(solar_ma),
        }
        self.apply_pwm();
    }

    fn apply_pwm(&mut self) {
        let compare = 1023 - (u16::from(self.cur_pwm) << 2);
        self.pwm_out.set_compare(compare);
        if self.cur_pwm == 0 {
            if self.output_on {
                self.pwm_out.set_output_enabled(false);
                self.output_on = false;
            }
        } else if !self.output_on {
            self.pwm_out.set_output_enabled(true);
            self.output_on = true;
        }
    }

    pub fn state(&self) -> LedState {
        self.state
    }

    pub fn fault(&self) -> Option<LedFault> {
        self.fault
    }

    /// Present brightness, out of 255.
    pub fn brightness(&self) -> u8 {
        self.cur_pwm
    }

    pub fn output(&self) -> &P {
        &self.pwm_out
    }
}

fn current_fault<PIO>(charge: &Charge, power: &Power<PIO>, temp: &TempComp) -> Option<LedFault> {
    if power.bad_battery() {
        Some(LedFault::BadBattery)
    } else if temp.ext_missing() {
        Some(LedFault::MissingExtSensor)
    } else if charge.is_temp_limited() {
        Some(LedFault::TempRange)
    } else {
        None
    }
}

fn normal_state<PIO>(charge: &Charge, power: &Power<PIO>) -> LedState {
    if power.low_batt_disabled() {
        LedState::LowBatt
    } else if matches!(charge.state(), ChargeState::Night | ChargeState::Idle) {
        LedState::IdleBlink
    } else {
        LedState::Charging
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charger::buck::Buck;
    use crate::charger::bus::RegisterBus;
    use crate::charger::config::{BatteryChemistry, ChargeProfile};
    use crate::charger::param::Param;
    use crate::charger::physical::{MockPowerIo, MockPwm};
    use crate::charger::sampler::{Measurement, MeasurementSource};

    struct FakeMeas {
        solar_mv: u16,
        solar_ma: u16,
        batt_mv: u16,
        ext_c10: i16,
    }

    impl MeasurementSource for FakeMeas {
        fn value(&self, m: Measurement) -> i16 {
            match m {
                Measurement::SolarVolts => self.solar_mv as i16,
                Measurement::SolarAmps => self.solar_ma as i16,
                Measurement::BattVolts => self.batt_mv as i16,
                Measurement::TempInternal => 250,
                Measurement::TempExternal => self.ext_c10,
                _ => 0,
            }
        }

        fn value_for_isr(&self, m: Measurement) -> u16 {
            self.value(m).max(0) as u16
        }
    }

    struct Rig {
        meas: FakeMeas,
        charge: Charge,
        buck: Buck<MockPwm>,
        power: Power<MockPowerIo>,
        temp: TempComp,
        led: Led<MockPwm>,
        params: Param,
        profile: ChargeProfile,
        bus: RegisterBus,
    }

    impl Rig {
        fn new(solar_mv: u16, batt_mv: u16) -> Self {
            let profile = ChargeProfile::load(BatteryChemistry::LeadAcid);
            let params = Param::new(&profile);
            let meas = FakeMeas {
                solar_mv,
                solar_ma: 1000,
                batt_mv,
                ext_c10: 250,
            };
            let mut bus = RegisterBus::new();
            let mut temp = TempComp::new();
            temp.update(&meas, &params, &profile, &mut bus);
            let mut buck = Buck::new(MockPwm::new(), params.float_mv());
            let mut charge = Charge::new(&meas, &params);
            charge.mppt_update(&meas, &mut buck, &mut bus);
            let power = Power::new(
                MockPowerIo::new(),
                batt_mv,
                &params,
                charge.state() == ChargeState::Night,
            );
            Self {
                meas,
                charge,
                buck,
                power,
                temp,
                led: Led::new(MockPwm::new()),
                params,
                profile,
                bus,
            }
        }

        fn refresh(&mut self) {
            self.temp
                .update(&self.meas, &self.params, &self.profile, &mut self.bus);
            self.charge
                .mppt_update(&self.meas, &mut self.buck, &mut self.bus);
        }

        fn ticks(&mut self, n: u32) {
            for _ in 0..n {
                self.led.update(&self.charge, &self.power, &self.temp);
            }
        }

        fn force_charging(&mut self) {
            for _ in 0..60 {
                self.charge
                    .mppt_update(&self.meas, &mut self.buck, &mut self.bus);
                self.charge.state_update(
                    &self.temp,
                    &self.power,
                    &self.profile,
                    &mut self.buck,
                    &mut self.bus,
                );
                if !matches!(self.charge.state(), ChargeState::Night | ChargeState::Idle) {
                    return;
                }
            }
            panic!("never started charging");
        }
    }

    #[test]
    fn idle_blinks_once_per_five_seconds() {
        let mut rig = Rig::new(19000, 12600);
        rig.ticks(1);
        assert_eq!(rig.led.state(), LedState::IdleBlink);

        // Off lead-in, one 60 ms blink, then darkness until the period.
        let mut on_ticks = 0;
        for _ in 0..500 {
            rig.ticks(1);
            if rig.led.brightness() > 0 {
                on_ticks += 1;
                assert_eq!(rig.led.brightness(), 160);
            }
        }
        assert_eq!(on_ticks, 6);
    }

    #[test]
    fn low_battery_blink_group_is_ten_seconds_apart() {
        let mut rig = Rig::new(19000, 11000);
        assert!(rig.power.low_batt_disabled());
        rig.ticks(1);
        assert_eq!(rig.led.state(), LedState::LowBatt);

        let mut on_ticks = 0;
        for _ in 0..1000 {
            rig.ticks(1);
            if rig.led.brightness() > 0 {
                on_ticks += 1;
            }
        }
        assert_eq!(on_ticks, 6);
    }

    #[test]
    fn charging_breathes_symmetrically() {
        let mut rig = Rig::new(19000, 12600);
        rig.force_charging();
        rig.ticks(1);
        assert_eq!(rig.led.state(), LedState::Charging);

        // Peak for 1000 mA panel current: 223 * 1000 / 2000 + 32 = 143.
        let mut peak = 0u8;
        let mut ramp_up = 0;
        while rig.led.brightness() < 143 && ramp_up < 200 {
            rig.ticks(1);
            peak = peak.max(rig.led.brightness());
            ramp_up += 1;
        }
        assert_eq!(peak, 143);
        assert!(ramp_up <= 65);

        // And back down to dark in the same number of steps.
        let mut ramp_down = 0;
        while rig.led.brightness() > 0 && ramp_down < 200 {
            rig.ticks(1);
            ramp_down += 1;
        }
        assert!(ramp_down <= 65);
        assert_eq!(rig.led.brightness(), 0);
    }

    #[test]
    fn breathing_peak_scales_with_current() {
        let mut rig = Rig::new(19000, 12600);
        rig.meas.solar_ma = 2000;
        rig.refresh();
        rig.force_charging();
        rig.ticks(1);
        let mut peak = 0u8;
        for _ in 0..200 {
            rig.ticks(1);
            peak = peak.max(rig.led.brightness());
        }
        assert_eq!(peak, 255);
    }

    #[test]
    fn bad_battery_shows_two_blinks() {
        let mut rig = Rig::new(19000, 12600);
        rig.ticks(1);
        rig.meas.batt_mv = 8000;
        rig.refresh();
        // The power machine latches the bad-battery flag.
        rig.power.update(&rig.charge, &rig.params, &mut rig.bus);
        rig.ticks(1);
        assert_eq!(rig.led.state(), LedState::Fault);
        assert_eq!(rig.led.fault(), Some(LedFault::BadBattery));

        let mut groups = 0;
        let mut on_run = false;
        let mut blinks_in_group = 0;
        for _ in 0..1000 {
            rig.ticks(1);
            let on = rig.led.brightness() > 0;
            if on && !on_run {
                blinks_in_group += 1;
            }
            on_run = on;
            if blinks_in_group == 2 && !on {
                groups += 1;
                blinks_in_group = 0;
            }
        }
        assert!(groups >= 1);
    }

    #[test]
    fn missing_sensor_shows_three_blinks_and_yields_to_bad_battery() {
        let mut rig = Rig::new(19000, 12600);
        rig.meas.ext_c10 = -470;
        rig.refresh();
        rig.ticks(1);
        assert_eq!(rig.led.fault(), Some(LedFault::MissingExtSensor));
        assert_eq!(rig.led.state(), LedState::Fault);

        // A bad battery outranks the sensor fault immediately.
        rig.meas.batt_mv = 8000;
        rig.refresh();
        rig.power.update(&rig.charge, &rig.params, &mut rig.bus);
        rig.ticks(1);
        assert_eq!(rig.led.fault(), Some(LedFault::BadBattery));
    }

    #[test]
    fn temperature_fault_clears_back_to_normal() {
        let mut rig = Rig::new(19000, 12600);
        rig.force_charging();
        rig.meas.ext_c10 = 550;
        rig.refresh();
        rig.charge.state_update(
            &rig.temp,
            &rig.power,
            &rig.profile,
            &mut rig.buck,
            &mut rig.bus,
        );
        assert!(rig.charge.is_temp_limited());
        rig.ticks(1);
        assert_eq!(rig.led.fault(), Some(LedFault::TempRange));

        rig.meas.ext_c10 = 250;
        rig.refresh();
        rig.charge.state_update(
            &rig.temp,
            &rig.power,
            &rig.profile,
            &mut rig.buck,
            &mut rig.bus,
        );
        rig.ticks(1);
        assert_ne!(rig.led.state(), LedState::Fault);
        assert_eq!(rig.led.fault(), None);
    }
}
