//! Receive-side rate and error governor.
//!
//! Two duties: after a framing, decode, or authentication fault it mutes
//! reception for the hold-off silence; and it budgets how many frames of a
//! given type are admitted per accounting window. Replays are counted but
//! cause no user-visible feedback.

use tracing::debug;

use crate::codec::MessageType;

/// Admission and hold-off state for one receiver.
#[derive(Debug)]
pub struct Governor {
    muted: bool,
    act_budget: u32,
    act_admitted: u32,
    replays: u64,
    faults: u64,
}

impl Governor {
    /// A governor with the given per-window ACT budget (0 = unlimited).
    pub fn new(act_budget: u32) -> Self {
        Self {
            muted: false,
            act_budget,
            act_admitted: 0,
            replays: 0,
            faults: 0,
        }
    }

    /// Whether reception is currently muted by a hold-off.
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Record a framing/decode/authentication fault.
    ///
    /// Returns `true` when a hold-off must be armed; `false` when one is
    /// already running.
    pub fn on_fault(&mut self) -> bool {
        self.faults += 1;
        if self.muted {
            return false;
        }
        debug!("reception fault, arming hold-off");
        self.muted = true;
        true
    }

    /// The hold-off silence has elapsed; accept preambles again.
    pub fn on_hold_off_elapsed(&mut self) {
        self.muted = false;
    }

    /// Decide whether a decoded frame of `message_type` may proceed.
    ///
    /// Replayed frames pass through here before their sequence check, so
    /// replay attempts consume budget too.
    pub fn admit(&mut self, message_type: MessageType) -> bool {
        if self.muted {
            return false;
        }
        if message_type == MessageType::Act && self.act_budget > 0 {
            if self.act_admitted >= self.act_budget {
                debug!("ACT admission budget exhausted for this window");
                return false;
            }
            self.act_admitted += 1;
        }
        true
    }

    /// Record a replayed sequence number. No side effect beyond counting.
    pub fn on_replay(&mut self) {
        self.replays += 1;
    }

    /// The accounting window elapsed; refill budgets.
    pub fn on_window_reset(&mut self) {
        self.act_admitted = 0;
    }

    /// Reset everything, keeping only the configuration.
    pub fn reset(&mut self) {
        self.muted = false;
        self.act_admitted = 0;
        self.replays = 0;
        self.faults = 0;
    }

    /// Replays observed since construction or reset.
    pub fn replays(&self) -> u64 {
        self.replays
    }

    /// Faults observed since construction or reset.
    pub fn faults(&self) -> u64 {
        self.faults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_off_mutes_and_releases() {
        let mut governor = Governor::new(0);
        assert!(!governor.is_muted());

        assert!(governor.on_fault());
        assert!(governor.is_muted());
        assert!(!governor.admit(MessageType::Act));
        assert!(!governor.admit(MessageType::Configure));

        // A second fault while muted does not re-arm.
        assert!(!governor.on_fault());
        assert_eq!(governor.faults(), 2);

        governor.on_hold_off_elapsed();
        assert!(governor.admit(MessageType::Act));
    }

    #[test]
    fn test_act_budget() {
        let mut governor = Governor::new(3);
        for _ in 0..3 {
            assert!(governor.admit(MessageType::Act));
        }
        assert!(!governor.admit(MessageType::Act));
        // Other types stay unlimited.
        assert!(governor.admit(MessageType::Bind));

        governor.on_window_reset();
        assert!(governor.admit(MessageType::Act));
    }

    #[test]
    fn test_zero_budget_is_unlimited() {
        let mut governor = Governor::new(0);
        for _ in 0..100 {
            assert!(governor.admit(MessageType::Act));
        }
    }

    #[test]
    fn test_replay_counter() {
        let mut governor = Governor::new(0);
        governor.on_replay();
        governor.on_replay();
        assert_eq!(governor.replays(), 2);
        governor.reset();
        assert_eq!(governor.replays(), 0);
    }
}
