//! Interrupt-scheduled analog acquisition.
//!
//! A free-running timer fires at roughly 4 kHz. Each fire starts one ADC
//! conversion and nudges the timer reload by one count, sweeping the sample
//! phase across the whole PWM period so the filters integrate over the
//! switching waveform instead of aliasing against it. The conversion
//! complete handler routes the result:
//!
//! - the four power-path channels cycle round-robin through their low-pass
//!   filters (voltages shallow, currents deep),
//! - every 500 ms the cycle is interrupted for one temperature conversion,
//!   alternating between the two sensors, after which the saved power-path
//!   channel resumes.
//!
//! Raw counts convert to engineering units with the stored reference
//! calibration; the internal temperature sensor additionally subtracts its
//! per-die offset.

use crate::filter::{LowPass, SlidingWindow};

use super::physical::{AdcBus, SampleTimer};

/// Filter depth for the voltage channels.
pub const V_FILTER_SHIFT: u32 = 3;
/// Filter depth for the current channels.
pub const I_FILTER_SHIFT: u32 = 6;
/// Temperature averaging window length.
pub const TEMP_WINDOW: usize = 8;

// One temperature conversion every 500 ms at the 4 kHz sample rate.
const TEMP_EVAL_FIRES: u16 = 2000;
// One buck regulator evaluation every 5 ms.
const BUCK_EVAL_FIRES: u8 = 20;

// Reload dither around the 250 us center, spanning one PWM period.
const RELOAD_CENTER: u8 = 0x80;
const RELOAD_MIN: u8 = 0x75;
const RELOAD_MAX: u8 = 0x8B;

const ADC_FULL_SCALE: u32 = 4092;
// External divider scale factor for the voltage inputs.
const V_SCALE: u32 = 15;
// Full scale times shunt gain times shunt resistance.
const I_DIVISOR: u32 = 2046;

/// One measured quantity; doubles as the ADC channel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Measurement {
    /// Solar panel voltage (mV).
    SolarVolts = 0,
    /// Solar panel current (mA).
    SolarAmps = 1,
    /// Battery voltage (mV).
    BattVolts = 2,
    /// Load current (mA).
    BattAmps = 3,
    /// Internal die temperature (tenths of a degree C).
    TempInternal = 4,
    /// External battery temperature sensor (tenths of a degree C).
    TempExternal = 5,
}

/// Reference and temperature-sensor calibration stored by production
/// programming.
#[derive(Debug, Clone, Copy)]
pub struct AdcCalibration {
    /// Measured internal reference in mV.
    pub vref_mv: u16,
    /// Internal temperature sensor offset count read from the die.
    pub int_temp_offset: i16,
}

impl AdcCalibration {
    pub const fn new(vref_mv: u16, int_temp_offset: i16) -> Self {
        Self {
            vref_mv,
            int_temp_offset,
        }
    }

    /// Nominal values for an uncalibrated part.
    pub const NOMINAL: Self = Self::new(1650, 0);
}

impl Default for AdcCalibration {
    fn default() -> Self {
        Self::NOMINAL
    }
}

/// Read access to the published measurements.
///
/// Engineering-unit values for the charge logic and a raw millivolt or
/// milliamp variant for the regulator running inside the sampling interrupt
/// chain, where no further synchronization is needed.
pub trait MeasurementSource {
    /// Engineering value: mV, mA, or tenths of a degree C.
    fn value(&self, m: Measurement) -> i16;
    /// Unsigned power-path value for in-interrupt use; temperature
    /// channels read zero.
    fn value_for_isr(&self, m: Measurement) -> u16;
}

/// The acquisition engine: scheduling state, filters, and conversions.
#[derive(Debug)]
pub struct Sampler<A, T> {
    adc: A,
    timer: T,
    cal: AdcCalibration,

    vs_filter: LowPass<V_FILTER_SHIFT>,
    is_filter: LowPass<I_FILTER_SHIFT>,
    vb_filter: LowPass<V_FILTER_SHIFT>,
    ib_filter: LowPass<I_FILTER_SHIFT>,

    temp_int: SlidingWindow<TEMP_WINDOW>,
    temp_ext: SlidingWindow<TEMP_WINDOW>,
    temp_int_avg: u16,
    temp_ext_avg: u16,

    current: Measurement,
    resume: Measurement,
    last_temp: Measurement,
    temp_countdown: u16,
    buck_countdown: u8,

    reload: u8,
    reload_rising: bool,
}

impl<A: AdcBus, T: SampleTimer> Sampler<A, T> {
    /// Build the sampler and seed every filter with a polled conversion so
    /// published values are valid from the first read.
    pub fn new(mut adc: A, timer: T, cal: AdcCalibration) -> Self {
        let vs = adc.read_blocking(Measurement::SolarVolts);
        let is = adc.read_blocking(Measurement::SolarAmps);
        let vb = adc.read_blocking(Measurement::BattVolts);
        let ib = adc.read_blocking(Measurement::BattAmps);
        let ti = adc.read_blocking(Measurement::TempInternal);
        let te = adc.read_blocking(Measurement::TempExternal);

        let mut vs_filter = LowPass::new();
        let mut is_filter = LowPass::new();
        let mut vb_filter = LowPass::new();
        let mut ib_filter = LowPass::new();
        vs_filter.seed(vs);
        is_filter.seed(is);
        vb_filter.seed(vb);
        ib_filter.seed(ib);

        let mut temp_int = SlidingWindow::new();
        let mut temp_ext = SlidingWindow::new();
        temp_int.fill(ti);
        temp_ext.fill(te);

        adc.select(Measurement::SolarVolts);

        Self {
            adc,
            timer,
            cal,
            vs_filter,
            is_filter,
            vb_filter,
            ib_filter,
            temp_int,
            temp_ext,
            temp_int_avg: ti,
            temp_ext_avg: te,
            current: Measurement::SolarVolts,
            resume: Measurement::SolarVolts,
            last_temp: Measurement::TempInternal,
            temp_countdown: TEMP_EVAL_FIRES,
            buck_countdown: BUCK_EVAL_FIRES,
            reload: RELOAD_CENTER,
            reload_rising: true,
        }
    }

    /// Count down to the next regulator evaluation; true once per 5 ms.
    ///
    /// Called from the sample timer interrupt before the conversion starts
    /// so the regulator sees the previous, complete filter state.
    pub fn buck_due(&mut self) -> bool {
        self.buck_countdown -= 1;
        if self.buck_countdown == 0 {
            self.buck_countdown = BUCK_EVAL_FIRES;
            true
        } else {
            false
        }
    }

    /// Kick off the conversion for this fire and dither the next period.
    pub fn start_conversion(&mut self) {
        self.adc.start();

        if self.reload_rising {
            self.reload += 1;
            if self.reload == RELOAD_MAX {
                self.reload_rising = false;
            }
        } else {
            self.reload -= 1;
            if self.reload == RELOAD_MIN {
                self.reload_rising = true;
            }
        }
        self.timer.set_reload(self.reload);
    }

    /// Conversion-complete handler: file the result and select the next
    /// channel.
    pub fn on_conversion(&mut self) {
        let raw = self.adc.result();

        match self.current {
            Measurement::SolarVolts => {
                self.vs_filter.push(raw);
            }
            Measurement::SolarAmps => {
                self.is_filter.push(raw);
            }
            Measurement::BattVolts => {
                self.vb_filter.push(raw);
            }
            Measurement::BattAmps => {
                self.ib_filter.push(raw);
            }
            Measurement::TempInternal => {
                self.temp_int_avg = self.temp_int.push(raw);
            }
            Measurement::TempExternal => {
                self.temp_ext_avg = self.temp_ext.push(raw);
            }
        }

        self.current = match self.current {
            // A temperature conversion interrupted the cycle; resume it.
            Measurement::TempInternal | Measurement::TempExternal => self.resume,
            power_path => {
                let mut next = match power_path {
                    Measurement::SolarVolts => Measurement::SolarAmps,
                    Measurement::SolarAmps => Measurement::BattVolts,
                    Measurement::BattVolts => Measurement::BattAmps,
                    _ => Measurement::SolarVolts,
                };
                self.temp_countdown -= 1;
                if self.temp_countdown == 0 {
                    self.temp_countdown = TEMP_EVAL_FIRES;
                    self.resume = next;
                    next = if self.last_temp == Measurement::TempExternal {
                        Measurement::TempInternal
                    } else {
                        Measurement::TempExternal
                    };
                    self.last_temp = next;
                }
                next
            }
        };

        self.adc.select(self.current);
    }

    /// Channel the next conversion will measure.
    pub fn current_channel(&self) -> Measurement {
        self.current
    }

    pub fn adc(&self) -> &A {
        &self.adc
    }

    pub fn adc_mut(&mut self) -> &mut A {
        &mut self.adc
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    fn to_mv(&self, raw: u16) -> u16 {
        (u32::from(raw) * u32::from(self.cal.vref_mv) * V_SCALE / ADC_FULL_SCALE) as u16
    }

    fn to_ma(&self, raw: u16) -> u16 {
        (u32::from(raw) * u32::from(self.cal.vref_mv) / I_DIVISOR) as u16
    }

    // Internal sensor: 3.4 mV/C slope, 940 mV nominal at 0 C, per-die
    // offset subtracted after rescaling the nominal to the reference.
    fn to_internal_c10(&self, raw: u16) -> i16 {
        let vref = i32::from(self.cal.vref_mv);
        let mut t = i32::from(raw) - 3_846_480 / vref - i32::from(self.cal.int_temp_offset);
        t = t * vref * 100 / 139_128;
        t as i16
    }

    // External sensor: 10 mV/C slope, 500 mV at 0 C.
    fn to_external_c10(&self, raw: u16) -> i16 {
        let vref = i32::from(self.cal.vref_mv);
        let t = i32::from(raw) - 2_046_000 / vref;
        (t * vref / ADC_FULL_SCALE as i32) as i16
    }
}

impl<A: AdcBus, T: SampleTimer> MeasurementSource for Sampler<A, T> {
    fn value(&self, m: Measurement) -> i16 {
        match m {
            Measurement::SolarVolts => self.to_mv(self.vs_filter.value()) as i16,
            Measurement::SolarAmps => self.to_ma(self.is_filter.value()) as i16,
            Measurement::BattVolts => self.to_mv(self.vb_filter.value()) as i16,
            Measurement::BattAmps => self.to_ma(self.ib_filter.value()) as i16,
            Measurement::TempInternal => self.to_internal_c10(self.temp_int_avg),
            Measurement::TempExternal => self.to_external_c10(self.temp_ext_avg),
        }
    }

    fn value_for_isr(&self, m: Measurement) -> u16 {
        match m {
            Measurement::SolarVolts => self.to_mv(self.vs_filter.value()),
            Measurement::SolarAmps => self.to_ma(self.is_filter.value()),
            Measurement::BattVolts => self.to_mv(self.vb_filter.value()),
            _ => 0,
        }
    }
}
