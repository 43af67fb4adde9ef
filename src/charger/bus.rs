//! Register bus slave.
//!
//! The device answers at a fixed 7-bit address with a register-pointer
//! protocol: the first byte of a write sets the register address, further
//! bytes are data, most significant byte first, and a 16-bit write commits
//! when its low byte arrives. Reads stream bytes from the current pointer,
//! which advances on every byte, so 16-bit values leave the wire
//! big-endian.
//!
//! Read-only registers are served from an in-RAM mirror. The control loops
//! are the mirror's only writers, through the setters here; the bus
//! interrupt is its only reader. Host writes flow the other way, through
//! the validating threshold setters and the watchdog registers. Reading
//! the high byte of STATUS clears both sticky watchdog-detect bits.
//!
//! The handler does a bounded amount of work per event; the port must give
//! this interrupt the highest priority so the hardware never stretches the
//! bus clock waiting for it.

use super::param::{Param, Threshold};
use super::power::Power;
use super::watchdog::SystemWatchdog;

/// Fixed 7-bit slave address.
pub const SLAVE_ADDRESS: u8 = 0x12;

/// Read-only 16-bit registers, in mirror order; byte address is twice the
/// index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum RoReg {
    Id = 0,
    Status = 1,
    Buck = 2,
    SolarVolts = 3,
    SolarAmps = 4,
    BattVolts = 5,
    BattAmps = 6,
    ChargeAmps = 7,
    TempInternal = 8,
    TempExternal = 9,
    MpptSetpoint = 10,
    CompThreshold = 11,
}

const NUM_RO: usize = 12;

// Byte addresses of the writable registers.
const REG_PARAM_START: u8 = 24;
const REG_WD_START: u8 = 32;
const REG_WD_ENABLE: u8 = 33;
const REG_WD_TIMEOUT: u8 = 35;
const REG_WD_PWROFF: u8 = 36;

/// Value that arms the watchdog enable register.
pub const WD_ENABLE_MAGIC: u16 = 0x00EA;

/// STATUS register bit masks.
pub mod status {
    /// The hardware dead-man timer caused the last reset (sticky).
    pub const HW_WD_DETECT: u16 = 0x8000;
    /// The host watchdog fired since STATUS was last read (sticky).
    pub const SW_WD_TRIGGERED: u16 = 0x4000;
    pub const BAD_BATTERY: u16 = 0x2000;
    pub const EXT_TEMP_MISSING: u16 = 0x1000;
    pub const WD_RUNNING: u16 = 0x0100;
    pub const POWER_ENABLED: u16 = 0x0080;
    pub const ALERT: u16 = 0x0040;
    pub const PCTRL: u16 = 0x0020;
    pub const TEMP_LIMITED: u16 = 0x0010;
    pub const NIGHT: u16 = 0x0008;
    pub const CHARGE_STATE: u16 = 0x0007;
}

/// Byte-level events decoded from the slave peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum BusEvent {
    /// Address match for a master write.
    AddressedForWrite,
    /// Address match for a master read; the reply byte is due now.
    AddressedForRead,
    /// One data byte arrived from the master.
    DataReceived(u8),
    /// The master acknowledged the previous byte and wants the next.
    DataAcked,
    /// Stop condition.
    Stop,
}

/// Slave state machine plus the read-only mirror.
#[derive(Debug)]
pub struct RegisterBus {
    mirror: [u16; NUM_RO],
    reg: u8,
    data: u16,
    first_byte: bool,
}

impl RegisterBus {
    pub const fn new() -> Self {
        Self {
            mirror: [0; NUM_RO],
            reg: 0,
            data: 0,
            first_byte: false,
        }
    }

    /// Publish a read-only value.
    pub fn set_value(&mut self, reg: RoReg, value: u16) {
        self.mirror[reg as usize] = value;
    }

    /// Publish the packed buck status word.
    pub fn set_buck_status(&mut self, value: u16) {
        self.mirror[RoReg::Buck as usize] = value;
    }

    /// Set or clear one STATUS bit.
    pub fn set_status_bit(&mut self, mask: u16, value: bool) {
        let status = &mut self.mirror[RoReg::Status as usize];
        *status &= !mask;
        if value {
            *status |= mask;
        }
    }

    /// Write the charge-state field of STATUS.
    pub fn set_charge_state(&mut self, code: u16) {
        let status = &mut self.mirror[RoReg::Status as usize];
        *status = (*status & !status::CHARGE_STATE) | (code & status::CHARGE_STATE);
    }

    /// Current mirror content, for the control loops and tests.
    pub fn ro(&self, reg: RoReg) -> u16 {
        self.mirror[reg as usize]
    }

    /// Feed one bus event through the slave state machine.
    ///
    /// Returns the byte to place on the wire for read events.
    pub fn on_event<P, W>(
        &mut self,
        event: BusEvent,
        params: &mut Param,
        power: &mut Power<P>,
        watchdog: &mut SystemWatchdog<W>,
    ) -> Option<u8> {
        match event {
            BusEvent::AddressedForWrite => {
                self.first_byte = true;
                None
            }
            BusEvent::AddressedForRead | BusEvent::DataAcked => {
                let byte = self.read_register(params, power, watchdog);
                self.reg = self.reg.wrapping_add(1);
                Some(byte)
            }
            BusEvent::DataReceived(byte) => {
                if self.first_byte {
                    self.first_byte = false;
                    self.reg = byte;
                    self.data = 0;
                } else {
                    self.data = (self.data << 8) | u16::from(byte);
                    if self.reg & 0x01 != 0 {
                        // Low half arrived; the word is complete.
                        self.write_register(self.reg, self.data, params, power);
                        self.data = 0;
                    }
                    self.reg = self.reg.wrapping_add(1);
                }
                None
            }
            BusEvent::Stop => None,
        }
    }

    fn read_register<P, W>(
        &mut self,
        params: &Param,
        power: &mut Power<P>,
        watchdog: &mut SystemWatchdog<W>,
    ) -> u8 {
        let reg = self.reg;
        let high_half = reg & 0x01 == 0;
        let index = reg >> 1;

        let word: u16 = if reg < REG_PARAM_START {
            let value = self.mirror[index as usize];
            // Watchdog-detect bits clear once their high byte has been
            // served; this read still carries them.
            if high_half
                && index as usize == RoReg::Status as usize
                && (power.watchdog_was_triggered() || watchdog.was_triggered())
            {
                power.clear_watchdog_triggered();
                watchdog.clear_triggered();
                self.mirror[RoReg::Status as usize] &=
                    !(status::SW_WD_TRIGGERED | status::HW_WD_DETECT);
            }
            value
        } else if reg < REG_WD_START {
            match Threshold::from_index(index - REG_PARAM_START / 2) {
                Some(threshold) => params.get(threshold),
                None => 0,
            }
        } else if reg == REG_WD_ENABLE {
            u16::from(power.watchdog_global_enable())
        } else if reg == REG_WD_TIMEOUT {
            u16::from(power.watchdog_timeout())
        } else if index == REG_WD_PWROFF / 2 {
            power.watchdog_pwroff_timeout()
        } else {
            0
        };

        if high_half { (word >> 8) as u8 } else { word as u8 }
    }

    fn write_register<P>(&mut self, reg: u8, value: u16, params: &mut Param, power: &mut Power<P>) {
        if (REG_PARAM_START..REG_WD_START).contains(&reg) {
            if let Some(threshold) = Threshold::from_index((reg >> 1) - REG_PARAM_START / 2) {
                params.set(threshold, value);
            }
        } else if reg == REG_WD_ENABLE {
            power.enable_watchdog(value == WD_ENABLE_MAGIC);
        } else if reg == REG_WD_TIMEOUT {
            power.set_watchdog_timeout(value as u8);
        } else if reg >> 1 == REG_WD_PWROFF / 2 {
            power.set_watchdog_pwroff_timeout(value);
        }
        // Writes to read-only or unmapped addresses are dropped.
    }
}

impl Default for RegisterBus {
    fn default() -> Self {
        Self::new()
    }
}
