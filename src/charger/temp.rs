//! Temperature-compensated charge thresholds.
//!
//! The external sensor sits on the battery and is preferred. A missing
//! external sensor reads far below any real temperature because of its
//! pull-down, so it is detected by an implausibly low reading that the
//! internal die sensor does not corroborate; the internal sensor then
//! stands in and charging continues with the fault flagged.
//!
//! Both thresholds move with temperature at a per-chemistry slope anchored
//! at 25 C. Slopes are negative: a warm battery charges at a lower
//! voltage.

use super::bus::{RegisterBus, RoReg, status};
use super::config::ChargeProfile;
use super::param::Param;
use super::sampler::{Measurement, MeasurementSource};

/// External readings below this (tenths of a degree C) cannot come from a
/// connected sensor.
pub const MISSING_THRESH_C10: i16 = -425;
/// Required disagreement with the internal sensor (tenths of a degree C)
/// before the external sensor is declared missing.
pub const INT_DIFF_THRESH_C10: i16 = 200;

/// Compensated thresholds and sensor health.
#[derive(Debug, Clone, Copy)]
pub struct TempComp {
    ext_missing: bool,
    internal_c10: i16,
    external_c10: i16,
    effective_c10: i16,
    comp_bulk_mv: u16,
    comp_float_mv: u16,
}

impl TempComp {
    pub const fn new() -> Self {
        Self {
            ext_missing: false,
            internal_c10: 0,
            external_c10: 0,
            effective_c10: 0,
            comp_bulk_mv: 0,
            comp_float_mv: 0,
        }
    }

    /// Recompute sensor selection and both compensated thresholds, and
    /// publish the temperatures to the register mirror.
    pub fn update(
        &mut self,
        meas: &impl MeasurementSource,
        params: &Param,
        profile: &ChargeProfile,
        bus: &mut RegisterBus,
    ) {
        self.internal_c10 = meas.value(Measurement::TempInternal);
        self.external_c10 = meas.value(Measurement::TempExternal);

        let disagreement = i32::from(self.internal_c10) - i32::from(self.external_c10);
        if self.external_c10 < MISSING_THRESH_C10
            && disagreement.abs() > i32::from(INT_DIFF_THRESH_C10)
        {
            self.ext_missing = true;
            self.effective_c10 = self.internal_c10;
        } else {
            self.ext_missing = false;
            self.effective_c10 = self.external_c10;
        }

        let float_delta = comp_delta_mv(self.effective_c10, profile.float_comp_x10);
        self.comp_float_mv = (i32::from(params.float_mv()) + float_delta) as u16;
        let bulk_delta = comp_delta_mv(self.effective_c10, profile.bulk_comp_x10);
        self.comp_bulk_mv = (i32::from(params.bulk_mv()) + bulk_delta) as u16;

        bus.set_status_bit(status::EXT_TEMP_MISSING, self.ext_missing);
        bus.set_value(RoReg::TempInternal, self.internal_c10 as u16);
        bus.set_value(RoReg::TempExternal, self.external_c10 as u16);
    }

    pub fn ext_missing(&self) -> bool {
        self.ext_missing
    }

    pub fn internal_c10(&self) -> i16 {
        self.internal_c10
    }

    pub fn external_c10(&self) -> i16 {
        self.external_c10
    }

    /// Temperature of the sensor currently in charge of compensation.
    pub fn effective_c10(&self) -> i16 {
        self.effective_c10
    }

    pub fn comp_bulk_mv(&self) -> u16 {
        self.comp_bulk_mv
    }

    pub fn comp_float_mv(&self) -> u16 {
        self.comp_float_mv
    }
}

impl Default for TempComp {
    fn default() -> Self {
        Self::new()
    }
}

/// Threshold shift in mV for a temperature and a x10 slope.
///
/// Temperature and slope are both scaled by ten, so the product carries
/// two decimal digits; round half-up at the 0.5 mV boundary before
/// dropping them.
fn comp_delta_mv(t_c10: i16, slope_x10: i32) -> i32 {
    let hundredths = (i32::from(t_c10) - 250) * slope_x10;
    (hundredths + 50).div_euclid(100)
}
