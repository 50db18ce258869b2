//! [`TickGate`] – sequencing and admission control for periodic ticks.
//!
//! Periodic timers fire independently of tick completion, so a slow backend
//! can leave several ticks in flight at once.  The gate solves two problems:
//!
//! * **Ordering** – every tick takes a monotonically increasing sequence
//!   number when it starts.  Publishers compare it against the sequence they
//!   last published and drop older completions instead of overwriting newer
//!   state.
//! * **Backpressure** – scheduled ticks must hold one of `max_in_flight`
//!   permits.  When none is free, [`TickGate::try_begin`] returns `None` and
//!   the timer skips that beat.  Out-of-band ticks ([`TickGate::begin`]) are
//!   sequenced but never skipped.
//!
//! # Example
//!
//! ```rust
//! use robowatch_engine::tick_gate::TickGate;
//!
//! let gate = TickGate::new(1);
//! let first = gate.try_begin().expect("gate is open");
//! assert!(gate.try_begin().is_none()); // one tick already in flight
//!
//! let forced = gate.begin();
//! assert!(forced.sequence() > first.sequence());
//!
//! drop(first);
//! assert!(gate.try_begin().is_some());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Issues sequence numbers and bounds the number of scheduled ticks in flight.
#[derive(Debug)]
pub struct TickGate {
    last_issued: AtomicU64,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

/// Proof that a tick was admitted. Dropping it frees the in-flight slot.
#[derive(Debug)]
pub struct TickTicket {
    sequence: u64,
    _permit: Option<OwnedSemaphorePermit>,
}

impl TickTicket {
    /// Sequence number assigned when the tick started. Starts at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl TickGate {
    /// Create a gate allowing `max_in_flight` concurrent scheduled ticks.
    /// Values below 1 are raised to 1.
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            last_issued: AtomicU64::new(0),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    fn next_sequence(&self) -> u64 {
        self.last_issued.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Start a scheduled tick, or return `None` when the in-flight limit is
    /// reached.
    pub fn try_begin(&self) -> Option<TickTicket> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;
        Some(TickTicket {
            sequence: self.next_sequence(),
            _permit: Some(permit),
        })
    }

    /// Start an out-of-band tick. Never refused.
    pub fn begin(&self) -> TickTicket {
        TickTicket {
            sequence: self.next_sequence(),
            _permit: None,
        }
    }

    /// Number of scheduled ticks currently in flight.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// The most recently issued sequence number (0 before the first tick).
    pub fn last_issued(&self) -> u64 {
        self.last_issued.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_strictly_increasing() {
        let gate = TickGate::new(4);
        let a = gate.begin();
        let b = gate.try_begin().unwrap();
        let c = gate.begin();
        assert_eq!(a.sequence(), 1);
        assert_eq!(b.sequence(), 2);
        assert_eq!(c.sequence(), 3);
        assert_eq!(gate.last_issued(), 3);
    }

    #[test]
    fn scheduled_ticks_are_bounded() {
        let gate = TickGate::new(2);
        let a = gate.try_begin().unwrap();
        let _b = gate.try_begin().unwrap();
        assert!(gate.try_begin().is_none());
        assert_eq!(gate.in_flight(), 2);
        drop(a);
        assert_eq!(gate.in_flight(), 1);
        assert!(gate.try_begin().is_some());
    }

    #[test]
    fn refused_tick_does_not_consume_a_sequence() {
        let gate = TickGate::new(1);
        let _held = gate.try_begin().unwrap();
        assert!(gate.try_begin().is_none());
        assert_eq!(gate.last_issued(), 1);
    }

    #[test]
    fn out_of_band_ticks_bypass_the_limit() {
        let gate = TickGate::new(1);
        let _held = gate.try_begin().unwrap();
        let forced = gate.begin();
        assert_eq!(forced.sequence(), 2);
        assert_eq!(gate.in_flight(), 1);
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        let gate = TickGate::new(0);
        assert!(gate.try_begin().is_some());
    }
}
