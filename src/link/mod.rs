//! Medium access: the in-process frame bus, spacing/hold-off timing, the
//! receive governor, and the transmit burst pacer.

pub mod bus;
pub mod governor;
pub mod pacing;

pub use bus::LocalBus;
pub use governor::Governor;
pub use pacing::BurstPacer;

use std::time::Duration;

use crate::core::constants::{
    COPY_GAP_PREAMBLES, DEFAULT_UNIT_MICROS, FRAME_GAP_PREAMBLES, HOLD_OFF_PREAMBLES,
    MIN_UNIT_MICROS, PREAMBLE_UNITS,
};

/// Spacing and hold-off durations, all derived from the symbol unit.
///
/// The preamble length (seven symbols of three units each) is the base unit
/// for every rule: copies within a burst sit 128 preambles apart, whole
/// frames 1024, and the post-fault receive silence is 64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// One symbol unit in microseconds, at least [`MIN_UNIT_MICROS`].
    pub unit_micros: u32,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            unit_micros: DEFAULT_UNIT_MICROS,
        }
    }
}

impl LinkTiming {
    /// Timing for the given symbol unit, clamped to the legal minimum.
    pub fn new(unit_micros: u32) -> Self {
        Self {
            unit_micros: unit_micros.max(MIN_UNIT_MICROS),
        }
    }

    /// Duration of one preamble.
    pub fn preamble(&self) -> Duration {
        Duration::from_micros(u64::from(PREAMBLE_UNITS) * u64::from(self.unit_micros))
    }

    /// Receive silence enforced after a fault.
    pub fn hold_off(&self) -> Duration {
        self.preamble() * HOLD_OFF_PREAMBLES
    }

    /// Spacing between copies within a burst.
    pub fn copy_gap(&self) -> Duration {
        self.preamble() * COPY_GAP_PREAMBLES
    }

    /// Spacing between whole frames or bursts.
    pub fn frame_gap(&self) -> Duration {
        self.preamble() * FRAME_GAP_PREAMBLES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let timing = LinkTiming::default();
        assert_eq!(timing.preamble(), Duration::from_micros(210));
        assert_eq!(timing.hold_off(), Duration::from_micros(210 * 64));
        assert_eq!(timing.copy_gap(), Duration::from_micros(210 * 128));
        assert_eq!(timing.frame_gap(), Duration::from_micros(210 * 1024));
    }

    #[test]
    fn test_unit_clamped() {
        assert_eq!(LinkTiming::new(1).unit_micros, MIN_UNIT_MICROS);
        assert_eq!(LinkTiming::new(50).unit_micros, 50);
    }
}
