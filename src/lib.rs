//! Control core for an MPPT solar battery charger.
//!
//! The crate implements the closed-loop control stack of a synchronous-buck
//! solar charge controller: interrupt-scheduled sampling and filtering, the
//! buck duty-step regulator, maximum power point tracking, the multi-stage
//! charge and load/watchdog state machines, and the register bus the host
//! talks to. All control arithmetic is integer (millivolts, milliamps,
//! milliwatts, tenths of a degree Celsius).
//!
//! Hardware is reached only through the small traits in
//! [`charger::physical`]; mock implementations of every trait ship with the
//! crate so the whole stack can run in tests or simulation.

#![no_std]

pub mod charger;
pub mod filter;
pub mod mppt;
