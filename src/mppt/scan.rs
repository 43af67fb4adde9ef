//! Open-loop MPPT scan.
//!
//! The sweep starts at the panel's present operating voltage and walks the
//! setpoint downward in fixed steps, recording the measured
//! `(voltage, power)` point at every stop. When the setpoint crosses the
//! lower bound the sweep ends and [`ScanSweep::best`] reports the voltage
//! of the highest recorded power, which the steady-state tracker then uses
//! as its starting point. Scanning the whole range finds the global
//! maximum even when partial shading gives the P-V curve several local
//! peaks.

use heapless::Vec;

/// Setpoint decrement per scan step (mV).
pub const SCAN_STEP_MV: u16 = 200;

/// Upper bound on recorded points; covers the widest usable sweep.
const TRACE_CAPACITY: usize = 128;

/// One recorded operating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPoint {
    pub panel_mv: u16,
    pub power_mw: u16,
}

/// Downward power sweep with a bounded measurement trace.
#[derive(Debug)]
pub struct ScanSweep {
    active: bool,
    end_mv: u16,
    trace: Vec<ScanPoint, TRACE_CAPACITY>,
}

impl ScanSweep {
    pub const fn new() -> Self {
        Self {
            active: false,
            end_mv: 0,
            trace: Vec::new(),
        }
    }

    /// Begin a sweep running down to `low_mv` from wherever the caller's
    /// setpoint currently sits.
    pub fn start(&mut self, low_mv: u16) {
        self.active = true;
        self.end_mv = low_mv;
        self.trace.clear();
    }

    /// Whether a sweep is in progress.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Record the measured point and return the next setpoint to command.
    ///
    /// Deactivates itself once the returned setpoint has crossed the lower
    /// bound of the sweep.
    pub fn step(&mut self, panel_mv: u16, power_mw: u16, setpoint_mv: u16) -> u16 {
        let _ = self.trace.push(ScanPoint { panel_mv, power_mw });
        let next = setpoint_mv.saturating_sub(SCAN_STEP_MV);
        if next < self.end_mv {
            self.active = false;
        }
        next
    }

    /// Panel voltage of the highest power seen, if any power was produced.
    ///
    /// Ties keep the earliest (highest-voltage) point.
    pub fn best(&self) -> Option<u16> {
        let mut best: Option<ScanPoint> = None;
        for point in &self.trace {
            if point.power_mw > best.map_or(0, |b| b.power_mw) {
                best = Some(*point);
            }
        }
        best.map(|b| b.panel_mv)
    }

    /// Recorded operating points of the most recent sweep.
    pub fn trace(&self) -> &[ScanPoint] {
        &self.trace
    }
}

impl Default for ScanSweep {
    fn default() -> Self {
        Self::new()
    }
}
