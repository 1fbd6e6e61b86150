//! Injected capabilities consumed by the protocol engine.
//!
//! The engine performs no I/O and keeps no clock of its own: media access,
//! deferred execution, and entropy all arrive through these traits. Every
//! implementation is called from a single execution context; none of the
//! traits require `Send` or `Sync`.

use std::cell::Cell;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;

/// A deferred one-shot callback.
pub type TimeoutCallback = Box<dyn FnOnce()>;

/// A deferred repeating callback.
pub type IntervalCallback = Box<dyn FnMut()>;

/// Bus delivery callback; receives one whole frame as wire bytes.
pub type FrameHandler = Box<dyn FnMut(&[u8])>;

/// One-shot and periodic deferred execution.
///
/// Time inside the engine advances only when the scheduler fires callbacks;
/// there is no other clock. Both operations return a [`CancelHandle`] that is
/// idempotent and safe to invoke after the callback has already run.
pub trait Scheduler {
    /// Run `callback` once after `delay`.
    fn set_timeout(&self, delay: Duration, callback: TimeoutCallback) -> CancelHandle;

    /// Run `callback` every `period` until cancelled.
    fn set_interval(&self, period: Duration, callback: IntervalCallback) -> CancelHandle;
}

/// Cancellation capability for a scheduled callback or a bus subscription.
///
/// Cancellation is idempotent: the second and later calls are no-ops, as is
/// cancelling a timer that has already fired.
pub struct CancelHandle {
    cancel: Cell<Option<Box<dyn FnOnce()>>>,
}

impl CancelHandle {
    /// Wrap a cancellation closure.
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Cell::new(Some(Box::new(cancel))),
        }
    }

    /// A handle with nothing behind it.
    pub fn noop() -> Self {
        Self {
            cancel: Cell::new(None),
        }
    }

    /// Cancel the underlying callback or subscription.
    pub fn cancel(&self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CancelHandle")
    }
}

/// Source of unbiased bytes for keys, session ids, and nonces.
///
/// Production deployments must supply a cryptographically suitable source;
/// [`OsRandom`] wraps the operating system CSPRNG. Deterministic sources for
/// tests live in [`crate::testing`].
pub trait RandomSource {
    /// Fill `dest` with random bytes.
    fn fill_bytes(&mut self, dest: &mut [u8]);
}

/// Operating-system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

/// A medium carrying whole frames, as a synchronous typed pub/sub channel.
///
/// `send` delivers the frame to every current subscriber before returning.
/// A handler may itself send on any bus, including the one delivering to
/// it; implementations must deliver such nested sends without re-entering
/// the handler that is currently executing (the in-process bus queues them
/// until the running delivery completes).
pub trait FrameBus {
    /// Publish one frame to all subscribers.
    fn send(&self, frame: &[u8]);

    /// Register `handler` for every subsequently sent frame.
    fn subscribe(&self, handler: FrameHandler) -> CancelHandle;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_cancel_handle_idempotent() {
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        let handle = CancelHandle::new(move || c.set(c.get() + 1));

        handle.cancel();
        handle.cancel();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_cancel_handle_noop() {
        let handle = CancelHandle::noop();
        handle.cancel(); // must not panic
    }

    #[test]
    fn test_os_random_fills() {
        let mut rng = OsRandom;
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        rng.fill_bytes(&mut a);
        rng.fill_bytes(&mut b);
        // Equality would mean a broken OS RNG (probability 2^-128).
        assert_ne!(a, b);
    }
}
