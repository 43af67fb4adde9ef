//! Perturb and Observe (P&O) MPPT tracker.
//!
//! The tracker is based on the hill-climbing principle: at the maximum
//! power point dP/dV = 0, to its left dP/dV > 0 and to its right
//! dP/dV < 0. Each iteration compares the measured power and panel voltage
//! against the previous iteration and steps the voltage setpoint toward
//! higher power:
//!
//! ```text
//! power up,   voltage up   -> raise the setpoint
//! power up,   voltage down -> lower the setpoint
//! power down, voltage up   -> lower the setpoint
//! power down, voltage down -> raise the setpoint
//! ```
//!
//! The step size adapts to the panel current: large steps move quickly
//! across the flat low-power region, small steps keep the steady-state
//! oscillation around the maximum tight.

/// Direction of the next setpoint perturbation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Increment,
    Decrement,
}

/// Step size (mV) applied while panel current exceeds [`HI_STEP_MA`].
pub const HI_CURRENT_STEP_MV: u16 = 50;
/// Step size (mV) applied while panel current exceeds [`LO_STEP_MA`].
pub const MID_CURRENT_STEP_MV: u16 = 100;
/// Step size (mV) applied at low panel current.
pub const LO_CURRENT_STEP_MV: u16 = 200;
/// Panel current (mA) above which the fine step is used.
pub const HI_STEP_MA: u16 = 200;
/// Panel current (mA) above which the middle step is used.
pub const LO_STEP_MA: u16 = 100;

/// Integer perturb-and-observe tracker over a bounded setpoint range.
#[derive(Debug, Clone, Copy)]
pub struct PerturbObserve {
    min_mv: u16,
    max_mv: u16,
    step_mv: u16,
    last_panel_mv: u16,
    last_power_mw: u16,
}

impl PerturbObserve {
    /// Create a tracker saturating its setpoint to `[min_mv, max_mv]`.
    pub const fn new(min_mv: u16, max_mv: u16) -> Self {
        Self {
            min_mv,
            max_mv,
            step_mv: LO_CURRENT_STEP_MV,
            last_panel_mv: 0,
            last_power_mw: 0,
        }
    }

    /// Pick the perturbation step from the present panel current.
    pub fn select_step(&mut self, panel_ma: u16) {
        self.step_mv = if panel_ma > HI_STEP_MA {
            HI_CURRENT_STEP_MV
        } else if panel_ma > LO_STEP_MA {
            MID_CURRENT_STEP_MV
        } else {
            LO_CURRENT_STEP_MV
        };
    }

    /// Currently selected step size in mV.
    pub fn step_mv(&self) -> u16 {
        self.step_mv
    }

    /// Store this period's observation without perturbing.
    ///
    /// Call on every control period in which the algorithm does not run
    /// (scan active, regulator limiting) so the next perturbation compares
    /// against fresh values.
    pub fn record(&mut self, panel_mv: u16, power_mw: u16) {
        self.last_panel_mv = panel_mv;
        self.last_power_mw = power_mw;
    }

    /// Run one P&O iteration and return the new setpoint.
    ///
    /// `setpoint_mv` is the present commanded setpoint, `panel_mv` and
    /// `power_mw` the measured operating point.
    pub fn update(&mut self, setpoint_mv: u16, panel_mv: u16, power_mw: u16) -> u16 {
        let climbing = power_mw > self.last_power_mw;
        let delta_v_pos = panel_mv >= self.last_panel_mv;
        let action = if climbing == delta_v_pos {
            Action::Increment
        } else {
            Action::Decrement
        };
        self.record(panel_mv, power_mw);

        match action {
            Action::Increment => {
                let raised = setpoint_mv.saturating_add(self.step_mv);
                raised.min(self.max_mv)
            }
            Action::Decrement => {
                let lowered = setpoint_mv.saturating_sub(self.step_mv);
                lowered.max(self.min_mv)
            }
        }
    }
}
