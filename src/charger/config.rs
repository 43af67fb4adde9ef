//! Fixed control constants and per-chemistry charge profiles.
//!
//! Everything a host may tune at runtime lives in [`super::param`]; the
//! values here are design constants of the power stage and the charge
//! algorithm. Chemistry-dependent defaults are embedded TOML documents
//! selected once at boot from the battery-type input.

use serde::Deserialize;

// Firmware identity, 4 bits per field.
pub const FW_ID: u16 = 1;
pub const FW_VER_MAJOR: u16 = 2;
pub const FW_VER_MINOR: u16 = 0;

/// ID register value: board id and firmware version packed in one word.
pub const ID_WORD: u16 = (FW_ID << 12) | (FW_VER_MAJOR << 4) | FW_VER_MINOR;

// Charge voltage thresholds (mV).
pub const V_NIGHT_THRESH_MV: u16 = 3500;
pub const V_MAX_SOLAR_MV: u16 = 21000;
pub const V_MIN_GOOD_SOLAR_MV: u16 = 18000;
pub const V_MIN_SOLAR_MV: u16 = 12000;
pub const V_FLOAT_DEFAULT_MV: u16 = 13650;
/// Hysteresis applied wherever a charge threshold is crossed (mV).
pub const V_DELTA_CHANGE_MV: u16 = 20;

/// Load cut-off default (mV).
pub const V_LOAD_OFF_MV: u16 = 11500;
/// Below this the battery is treated as disconnected or destroyed (mV).
pub const V_BAD_BATTERY_MV: u16 = 10500;

// Host-adjustable threshold limits (mV). The power-off upper limit is the
// live power-on value, not a constant.
pub const V_BULK_MIN_MV: u16 = 14000;
pub const V_BULK_MAX_MV: u16 = 15000;
pub const V_FLOAT_MIN_MV: u16 = 13000;
pub const V_FLOAT_MAX_MV: u16 = 14000;
pub const V_LOAD_OFF_MIN_MV: u16 = 11000;
pub const V_LOAD_ON_MIN_MV: u16 = 12000;
pub const V_LOAD_ON_MAX_MV: u16 = 15000;

/// Keeps the night-mode load from toggling around a critically low battery
/// voltage (mV).
pub const PWR_LB_HYST_MV: u16 = 250;

// Current thresholds (mA).
pub const I_SOLAR_MAX_MA: u16 = 2000;
/// Absorption terminates once the charge current tapers below this (mA).
pub const I_ABS_CUTOFF_MA: i16 = 300;

/// Production below this power is treated as no production (mW).
pub const P_MIN_THRESH_MW: u16 = 100;

// Charging temperature limits (degrees C); the low limit is per-chemistry.
pub const TEMP_LIMIT_HIGH_C: i16 = 50;
pub const TEMP_LIMIT_HYST_C: i16 = 5;

/// Buck battery-side regulation hysteresis (mV).
pub const V_BUCK_HYST_MV: u16 = 15;

// Timeouts, all counted in seconds.
pub const WAKE_TIMEOUT_S: u16 = 60;
pub const NIGHT_TIMEOUT_S: u16 = 300;
pub const MPPT_SCAN_TIMEOUT_S: u16 = 600;
pub const HIGH_CHARGE_TIMEOUT_S: u16 = 36000;
pub const CHG_RCVR_PERIOD_S: u16 = 3;
pub const LOWPWR_TIMEOUT_S: u16 = 60;
pub const PWROFF_WARN_TIMEOUT_S: u16 = 60;
pub const PWROFF_DEF_WD_TIMEOUT_S: u16 = 10;
pub const PWROFF_LB_CHG_TIMEOUT_S: u16 = 3600;
pub const LOW_PROD_TIMEOUT_S: u8 = 15;
pub const ABS_TERM_TIMEOUT_S: u8 = 30;

/// Added to the battery voltage to set the lower end of an MPPT scan (mV).
pub const SCAN_END_DELTA_MV: u16 = 1500;

/// Battery chemistry selected by the battery-type input at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum BatteryChemistry {
    LeadAcid,
    LiFePo4,
}

impl BatteryChemistry {
    /// Decode the battery-type jumper (high selects lead-acid).
    pub fn from_jumper(high: bool) -> Self {
        if high {
            BatteryChemistry::LeadAcid
        } else {
            BatteryChemistry::LiFePo4
        }
    }
}

/// Chemistry-dependent charge parameters, loaded from an embedded TOML
/// document.
///
/// Compensation slopes are in mV per degree C times ten, negative so a
/// warmer battery charges at a lower voltage. LiFePO4 uses zero slopes.
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeProfile {
    /// Default bulk/absorption threshold (mV).
    pub bulk_mv: u16,
    /// Default load power-on threshold (mV).
    pub power_on_mv: u16,
    /// Battery voltage separating a bulk restart from a float restart (mV).
    pub idle_to_float_mv: u16,
    /// Lowest temperature at which charging is allowed (degrees C).
    pub temp_limit_low_c: i16,
    /// Bulk threshold compensation slope (mV/degree C, x10).
    pub bulk_comp_x10: i32,
    /// Float threshold compensation slope (mV/degree C, x10).
    pub float_comp_x10: i32,
}

impl ChargeProfile {
    /// Parse a profile from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, &'static str> {
        toml::from_str(toml_str).map_err(|_| "failed to parse charge profile")
    }

    /// Load the embedded profile for `chemistry`.
    pub fn load(chemistry: BatteryChemistry) -> Self {
        let doc = match chemistry {
            BatteryChemistry::LeadAcid => include_str!("params/lead_acid.toml"),
            BatteryChemistry::LiFePo4 => include_str!("params/lifepo4.toml"),
        };
        Self::from_toml_str(doc).expect("embedded charge profile should be valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lead_acid_profile_defaults() {
        let p = ChargeProfile::load(BatteryChemistry::LeadAcid);
        assert_eq!(p.bulk_mv, 14700);
        assert_eq!(p.power_on_mv, 12500);
        assert_eq!(p.idle_to_float_mv, 12700);
        assert_eq!(p.temp_limit_low_c, -20);
        assert_eq!(p.bulk_comp_x10, -300);
        assert_eq!(p.float_comp_x10, -198);
    }

    #[test]
    fn lifepo4_profile_has_no_compensation() {
        let p = ChargeProfile::load(BatteryChemistry::LiFePo4);
        assert_eq!(p.bulk_mv, 14400);
        assert_eq!(p.power_on_mv, 13600);
        assert_eq!(p.idle_to_float_mv, 13200);
        assert_eq!(p.temp_limit_low_c, 0);
        assert_eq!(p.bulk_comp_x10, 0);
        assert_eq!(p.float_comp_x10, 0);
    }

    #[test]
    fn jumper_selects_chemistry() {
        assert_eq!(
            BatteryChemistry::from_jumper(true),
            BatteryChemistry::LeadAcid
        );
        assert_eq!(
            BatteryChemistry::from_jumper(false),
            BatteryChemistry::LiFePo4
        );
    }

    #[test]
    fn malformed_profile_is_rejected() {
        assert!(ChargeProfile::from_toml_str("bulk_mv = \"high\"").is_err());
    }

    #[test]
    fn id_word_packs_version_fields() {
        assert_eq!(ID_WORD, 0x1020);
    }
}
