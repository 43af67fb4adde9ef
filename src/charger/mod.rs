//! The charger control core.
//!
//! [`Charger`] is the single owned root holding every component and the
//! hardware handles. The port wires four interrupt sources to it and runs
//! [`Charger::poll`] from the main loop:
//!
//! - 10 ms tick timer: [`Charger::on_tick_timer`] (flag only),
//! - ~4 kHz sample timer: [`Charger::on_sample_timer`],
//! - ADC conversion complete: [`Charger::on_adc_complete`],
//! - bus slave events: [`Charger::on_bus_event`].
//!
//! Sharing between those contexts goes through [`runtime::Shared`]; see
//! that module for the required interrupt priority discipline.
//!
//! Data flow: the sampler publishes filtered measurements. The buck
//! regulator consumes three of them every 5 ms inside the sampler's
//! interrupt chain. On the slow tick the temperature module refreshes the
//! compensated thresholds and the charge module runs MPPT; on the derived
//! one-second tick the charge state machine and the load controller run.
//! The bus mirrors everything for the host and routes host writes into the
//! thresholds and the watchdog.

pub mod buck;
pub mod bus;
pub mod charge;
pub mod config;
pub mod led;
pub mod param;
pub mod physical;
pub mod power;
pub mod runtime;
pub mod sampler;
pub mod temp;
pub mod tick;
pub mod watchdog;

use buck::Buck;
use bus::{BusEvent, RegisterBus, RoReg, status};
use charge::{Charge, ChargeState};
use config::{BatteryChemistry, ChargeProfile, ID_WORD};
use led::Led;
use param::Param;
use physical::{AdcBus, PowerIo, PwmChannel, SampleTimer, WatchdogHw};
use power::Power;
use sampler::{AdcCalibration, Measurement, MeasurementSource, Sampler};
use temp::TempComp;
use tick::TickScheduler;
use watchdog::SystemWatchdog;

/// The control root: all component state plus the hardware handles.
pub struct Charger<A, T, BP, LP, P, W> {
    sampler: Sampler<A, T>,
    buck: Buck<BP>,
    led: Led<LP>,
    power: Power<P>,
    watchdog: SystemWatchdog<W>,
    temp: TempComp,
    params: Param,
    charge: Charge,
    bus: RegisterBus,
    ticks: TickScheduler,
    profile: ChargeProfile,
}

impl<A, T, BP, LP, P, W> Charger<A, T, BP, LP, P, W>
where
    A: AdcBus,
    T: SampleTimer,
    BP: PwmChannel,
    LP: PwmChannel,
    P: PowerIo,
    W: WatchdogHw,
{
    /// Bring the whole core up in dependency order and derive the boot
    /// states from measured conditions.
    ///
    /// `chemistry` comes from the battery-type input, read once before
    /// construction; `calibration` from production programming.
    pub fn new(
        adc: A,
        sample_timer: T,
        buck_pwm: BP,
        led_pwm: LP,
        power_io: P,
        watchdog_hw: W,
        chemistry: BatteryChemistry,
        calibration: AdcCalibration,
    ) -> Self {
        let watchdog = SystemWatchdog::new(watchdog_hw);
        let profile = ChargeProfile::load(chemistry);
        let params = Param::new(&profile);
        let sampler = Sampler::new(adc, sample_timer, calibration);

        let mut bus = RegisterBus::new();
        let mut temp = TempComp::new();
        temp.update(&sampler, &params, &profile, &mut bus);

        let buck = Buck::new(buck_pwm, params.float_mv());
        let charge = Charge::new(&sampler, &params);
        let batt_mv = sampler.value(Measurement::BattVolts).max(0) as u16;
        let power = Power::new(
            power_io,
            batt_mv,
            &params,
            charge.state() == ChargeState::Night,
        );
        let led = Led::new(led_pwm);

        let mut charger = Self {
            sampler,
            buck,
            led,
            power,
            watchdog,
            temp,
            params,
            charge,
            bus,
            ticks: TickScheduler::new(),
            profile,
        };
        charger.init_mirror();
        charger
    }

    // Seed the read-only mirror; measurement registers fill in on the
    // first slow tick.
    fn init_mirror(&mut self) {
        self.bus.set_value(RoReg::Id, ID_WORD);
        self.bus.set_value(RoReg::Status, self.initial_status());
        self.bus.set_buck_status(0);
        self.bus
            .set_value(RoReg::TempInternal, self.temp.internal_c10() as u16);
        self.bus
            .set_value(RoReg::TempExternal, self.temp.external_c10() as u16);
        self.bus
            .set_value(RoReg::MpptSetpoint, self.charge.solar_setpoint_mv());
        self.bus
            .set_value(RoReg::CompThreshold, self.charge.comp_thresh_mv());
    }

    fn initial_status(&self) -> u16 {
        let mut word = 0;
        if self.watchdog.was_triggered() {
            word |= status::HW_WD_DETECT;
        }
        if self.power.watchdog_was_triggered() {
            word |= status::SW_WD_TRIGGERED;
        }
        if self.power.bad_battery() {
            word |= status::BAD_BATTERY;
        }
        if self.temp.ext_missing() {
            word |= status::EXT_TEMP_MISSING;
        }
        if self.power.watchdog_running() {
            word |= status::WD_RUNNING;
        }
        if self.power.is_enabled() {
            word |= status::POWER_ENABLED;
        }
        if self.power.is_alert() {
            word |= status::ALERT;
        }
        if self.power.night_only() {
            word |= status::PCTRL;
        }
        if self.charge.is_temp_limited() {
            word |= status::TEMP_LIMITED;
        }
        if self.power.is_night() {
            word |= status::NIGHT;
        }
        word | self.charge.state().code()
    }

    /// 10 ms tick timer interrupt: raise the flag and return.
    pub fn on_tick_timer(&mut self) {
        self.ticks.note_isr_tick();
    }

    /// Sample timer interrupt: run the regulator when due, start the next
    /// conversion, dither the period.
    pub fn on_sample_timer(&mut self) {
        if self.sampler.buck_due() {
            let Self {
                sampler, buck, bus, ..
            } = self;
            buck.update(sampler, bus);
        }
        self.sampler.start_conversion();
    }

    /// ADC conversion-complete interrupt.
    pub fn on_adc_complete(&mut self) {
        self.sampler.on_conversion();
    }

    /// Bus slave interrupt; returns the byte to transmit on read events.
    pub fn on_bus_event(&mut self, event: BusEvent) -> Option<u8> {
        let Self {
            bus,
            params,
            power,
            watchdog,
            ..
        } = self;
        bus.on_event(event, params, power, watchdog)
    }

    /// One main-loop pass: kick the dead-man timer and run whatever
    /// evaluation rates are due.
    pub fn poll(&mut self) {
        self.watchdog.kick();
        let due = self.ticks.advance();

        let Self {
            sampler,
            buck,
            led,
            power,
            temp,
            params,
            charge,
            bus,
            profile,
            ..
        } = self;

        if due.fast {
            led.update(charge, power, temp);
        }

        if due.slow {
            temp.update(sampler, params, profile, bus);
            charge.mppt_update(sampler, buck, bus);
        }

        if due.second {
            charge.state_update(temp, power, profile, buck, bus);
            power.update(charge, params, bus);
        }
    }

    pub fn charge(&self) -> &Charge {
        &self.charge
    }

    pub fn power(&self) -> &Power<P> {
        &self.power
    }

    pub fn buck(&self) -> &Buck<BP> {
        &self.buck
    }

    pub fn led(&self) -> &Led<LP> {
        &self.led
    }

    pub fn temp(&self) -> &TempComp {
        &self.temp
    }

    pub fn params(&self) -> &Param {
        &self.params
    }

    pub fn bus(&self) -> &RegisterBus {
        &self.bus
    }

    pub fn profile(&self) -> &ChargeProfile {
        &self.profile
    }

    pub fn watchdog(&self) -> &SystemWatchdog<W> {
        &self.watchdog
    }

    /// Direct access to the ADC handle, for ports that reconfigure it and
    /// for simulation.
    pub fn adc_mut(&mut self) -> &mut A {
        self.sampler.adc_mut()
    }
}
