//! Interrupt-sharing glue.
//!
//! The whole control core lives in one owned root ([`super::Charger`]);
//! interrupt handlers and the main loop both reach it through a
//! [`Shared`] cell, which hands out a mutable borrow inside a
//! `critical-section` critical section. That gives every entry point the
//! same guarantee the bare-metal original obtained with per-variable
//! interrupt masking: no handler ever observes another context half-way
//! through an update.
//!
//! Discipline required from the port:
//!
//! - Every entry point does a small, bounded amount of work, so no
//!   critical section outlasts a couple of microseconds of bus traffic.
//!   The main loop must not hold the borrow across anything slow.
//! - The bus slave interrupt must be configured at the highest priority
//!   in the NVIC (or equivalent); the slave hardware would otherwise
//!   stretch the bus clock while a lower-priority handler runs, which
//!   some hosts cannot tolerate.
//! - The sample-timer interrupt calls [`super::Charger::on_sample_timer`]
//!   and the conversion-complete interrupt
//!   [`super::Charger::on_adc_complete`]; both are short by construction.

use core::cell::RefCell;

use critical_section::Mutex;

/// A critical-section cell owning the control root.
///
/// Initialized once at startup with [`Shared::put`]; afterwards every
/// context enters through [`Shared::with`].
pub struct Shared<T> {
    inner: Mutex<RefCell<Option<T>>>,
}

impl<T> Shared<T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Move `value` into the cell, dropping any previous occupant.
    pub fn put(&self, value: T) {
        critical_section::with(|cs| {
            *self.inner.borrow(cs).borrow_mut() = Some(value);
        });
    }

    /// Run `f` on the owned value inside a critical section.
    ///
    /// Returns `None` if the cell has not been initialized yet, which
    /// lets interrupt handlers fire harmlessly during early startup.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        critical_section::with(|cs| self.inner.borrow(cs).borrow_mut().as_mut().map(f))
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cell_reports_uninitialized() {
        let cell: Shared<u32> = Shared::new();
        assert_eq!(cell.with(|v| *v), None);
    }

    #[test]
    fn put_then_with_mutates_in_place() {
        let cell: Shared<u32> = Shared::new();
        cell.put(41);
        assert_eq!(cell.with(|v| *v), Some(41));
        cell.with(|v| *v += 1);
        assert_eq!(cell.with(|v| *v), Some(42));
    }

    #[test]
    fn works_as_a_static() {
        static CELL: Shared<u8> = Shared::new();
        CELL.put(7);
        assert_eq!(CELL.with(|v| *v), Some(7));
    }
}
