//! Maximum power point tracking.
//!
//! Two trackers cooperate to keep a photovoltaic panel near its maximum
//! power voltage:
//!
//! - [`scan::ScanSweep`] sweeps the operating voltage downward across the
//!   usable range and records the power at every step, locating the global
//!   maximum. It runs at startup of a charge cycle and periodically
//!   thereafter, which also recovers from local maxima on partially shaded
//!   panels.
//! - [`perturb_and_observe::PerturbObserve`] is the steady-state
//!   hill-climber. It perturbs the voltage setpoint each control period and
//!   observes the resulting power change to pick the next direction.
//!
//! Both work in integer millivolts and milliwatts.

pub mod perturb_and_observe;
pub mod scan;
