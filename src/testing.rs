//! Deterministic test doubles for the injected capabilities.
//!
//! The engine advances time only through its scheduler, so a manually
//! stepped clock plus scripted randomness makes whole pairing ceremonies
//! reproducible byte-for-byte.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::codec::Action;
use crate::core::{
    CancelHandle, IntervalCallback, RandomSource, Scheduler, TimeoutCallback,
};
use crate::receiver::{ReceiverHost, ReceiverState};
use crate::transmitter::{TransmitterHost, TransmitterState};

/// A scheduler driven by explicit [`advance`](ManualScheduler::advance)
/// calls. Callbacks fire in due order with deterministic tie-breaking.
pub struct ManualScheduler {
    inner: Rc<RefCell<SchedulerInner>>,
}

struct SchedulerInner {
    now: Duration,
    next_id: u64,
    entries: Vec<Entry>,
    in_flight: Option<u64>,
    in_flight_cancelled: bool,
}

struct Entry {
    id: u64,
    due: Duration,
    kind: EntryKind,
}

enum EntryKind {
    Once(TimeoutCallback),
    Every {
        period: Duration,
        callback: IntervalCallback,
    },
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    /// A scheduler at time zero with nothing queued.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SchedulerInner {
                now: Duration::ZERO,
                next_id: 0,
                entries: Vec::new(),
                in_flight: None,
                in_flight_cancelled: false,
            })),
        }
    }

    /// The current simulated time.
    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Number of pending entries.
    pub fn pending(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    /// Move the clock forward, firing everything that falls due, in due
    /// order. Callbacks may schedule or cancel freely while firing.
    pub fn advance(&self, delta: Duration) {
        let target = self.inner.borrow().now + delta;
        loop {
            let entry = {
                let mut inner = self.inner.borrow_mut();
                let index = inner
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.due <= target)
                    .min_by_key(|(_, e)| (e.due, e.id))
                    .map(|(i, _)| i);
                match index {
                    Some(index) => {
                        let entry = inner.entries.swap_remove(index);
                        inner.now = entry.due;
                        inner.in_flight = Some(entry.id);
                        inner.in_flight_cancelled = false;
                        entry
                    }
                    None => break,
                }
            };
            match entry.kind {
                EntryKind::Once(callback) => callback(),
                EntryKind::Every {
                    period,
                    mut callback,
                } => {
                    callback();
                    let mut inner = self.inner.borrow_mut();
                    if !inner.in_flight_cancelled {
                        inner.entries.push(Entry {
                            id: entry.id,
                            due: entry.due + period,
                            kind: EntryKind::Every { period, callback },
                        });
                    }
                }
            }
            self.inner.borrow_mut().in_flight = None;
        }
        self.inner.borrow_mut().now = target;
    }

    fn insert(&self, due: Duration, kind: EntryKind) -> CancelHandle {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.entries.push(Entry { id, due, kind });
            id
        };
        let weak = Rc::downgrade(&self.inner);
        CancelHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.borrow_mut();
                if inner.in_flight == Some(id) {
                    inner.in_flight_cancelled = true;
                }
                inner.entries.retain(|e| e.id != id);
            }
        })
    }
}

impl Scheduler for ManualScheduler {
    fn set_timeout(&self, delay: Duration, callback: TimeoutCallback) -> CancelHandle {
        let due = self.inner.borrow().now + delay;
        self.insert(due, EntryKind::Once(callback))
    }

    fn set_interval(&self, period: Duration, callback: IntervalCallback) -> CancelHandle {
        let due = self.inner.borrow().now + period;
        self.insert(due, EntryKind::Every { period, callback })
    }
}

/// A random source that replays a pre-loaded byte script.
///
/// Panics when the script runs dry, making an unexpected extra draw a loud
/// test failure rather than a silent divergence.
#[derive(Debug, Default)]
pub struct ScriptedRandom {
    queue: RefCell<VecDeque<u8>>,
}

impl ScriptedRandom {
    /// A source pre-loaded with `bytes`.
    pub fn with(bytes: &[u8]) -> Self {
        Self {
            queue: RefCell::new(bytes.iter().copied().collect()),
        }
    }

    /// Append more script bytes.
    pub fn push(&self, bytes: &[u8]) {
        self.queue.borrow_mut().extend(bytes.iter().copied());
    }
}

impl RandomSource for ScriptedRandom {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut queue = self.queue.borrow_mut();
        for slot in dest {
            *slot = queue
                .pop_front()
                .expect("scripted random exhausted; pre-load more bytes");
        }
    }
}

/// A seeded PRNG for tests that need plausible but reproducible randomness.
#[derive(Debug)]
pub struct SeededRandom(StdRng);

impl SeededRandom {
    /// A deterministic source derived from `seed`.
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for SeededRandom {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest);
    }
}

/// A receiver host that records everything it is told.
#[derive(Default)]
pub struct RecordingReceiverHost {
    /// Every state change, in order.
    pub states: RefCell<Vec<ReceiverState>>,
    /// Every dispatched action, in order.
    pub actions: RefCell<Vec<Action>>,
    /// How many reception attempts were indicated.
    pub reception_attempts: Cell<u32>,
}

impl RecordingReceiverHost {
    /// A fresh recorder behind an `Rc` for injection.
    pub fn shared() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// The most recent state change, if any.
    pub fn last_state(&self) -> Option<ReceiverState> {
        self.states.borrow().last().copied()
    }

    /// Number of dispatched actions.
    pub fn action_count(&self) -> usize {
        self.actions.borrow().len()
    }
}

impl ReceiverHost for RecordingReceiverHost {
    fn state_changed(&self, state: ReceiverState) {
        self.states.borrow_mut().push(state);
    }

    fn act(&self, action: Action) {
        self.actions.borrow_mut().push(action);
    }

    fn reception_attempt(&self) {
        self.reception_attempts.set(self.reception_attempts.get() + 1);
    }
}

/// A transmitter host that records everything it is told.
#[derive(Default)]
pub struct RecordingTransmitterHost {
    /// Every state change, in order.
    pub states: RefCell<Vec<TransmitterState>>,
    /// Every pairing flip, in order.
    pub pairing_changes: RefCell<Vec<bool>>,
}

impl RecordingTransmitterHost {
    /// A fresh recorder behind an `Rc` for injection.
    pub fn shared() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// The most recent pairing flip, if any.
    pub fn last_pairing_change(&self) -> Option<bool> {
        self.pairing_changes.borrow().last().copied()
    }
}

impl TransmitterHost for RecordingTransmitterHost {
    fn state_changed(&self, state: TransmitterState) {
        self.states.borrow_mut().push(state);
    }

    fn pairing_changed(&self, paired: bool) {
        self.pairing_changes.borrow_mut().push(paired);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_fires_in_order() {
        let scheduler = ManualScheduler::new();
        let log: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2) = (Rc::clone(&log), Rc::clone(&log));
        scheduler.set_timeout(Duration::from_millis(20), Box::new(move || l1.borrow_mut().push(2)));
        scheduler.set_timeout(Duration::from_millis(10), Box::new(move || l2.borrow_mut().push(1)));

        scheduler.advance(Duration::from_millis(15));
        assert_eq!(*log.borrow(), vec![1]);
        scheduler.advance(Duration::from_millis(15));
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_cancel_prevents_fire() {
        let scheduler = ManualScheduler::new();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        let handle = scheduler.set_timeout(Duration::from_millis(5), Box::new(move || f.set(true)));
        handle.cancel();
        scheduler.advance(Duration::from_millis(10));
        assert!(!fired.get());
    }

    #[test]
    fn test_interval_repeats_until_cancelled() {
        let scheduler = ManualScheduler::new();
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        let handle = scheduler.set_interval(
            Duration::from_millis(10),
            Box::new(move || c.set(c.get() + 1)),
        );

        scheduler.advance(Duration::from_millis(35));
        assert_eq!(count.get(), 3);

        handle.cancel();
        scheduler.advance(Duration::from_millis(50));
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn test_callback_may_schedule_more() {
        let scheduler = Rc::new(ManualScheduler::new());
        let fired = Rc::new(Cell::new(false));
        let (s, f) = (Rc::clone(&scheduler), Rc::clone(&fired));
        scheduler.set_timeout(
            Duration::from_millis(10),
            Box::new(move || {
                let f = Rc::clone(&f);
                s.set_timeout(Duration::from_millis(10), Box::new(move || f.set(true)));
            }),
        );

        // Both the outer and the nested timeout fall inside one advance.
        scheduler.advance(Duration::from_millis(25));
        assert!(fired.get());
    }

    #[test]
    fn test_interval_can_cancel_itself() {
        let scheduler = ManualScheduler::new();
        let count = Rc::new(Cell::new(0u32));
        let slot: Rc<RefCell<Option<CancelHandle>>> = Rc::new(RefCell::new(None));
        let (c, s) = (Rc::clone(&count), Rc::clone(&slot));
        let handle = scheduler.set_interval(
            Duration::from_millis(10),
            Box::new(move || {
                c.set(c.get() + 1);
                if let Some(handle) = s.borrow_mut().take() {
                    handle.cancel();
                }
            }),
        );
        *slot.borrow_mut() = Some(handle);

        scheduler.advance(Duration::from_millis(100));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_scripted_random_replays() {
        let mut random = ScriptedRandom::with(&[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        random.fill_bytes(&mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_seeded_random_is_deterministic() {
        let mut a = SeededRandom::new(7);
        let mut b = SeededRandom::new(7);
        let (mut ba, mut bb) = ([0u8; 16], [0u8; 16]);
        a.fill_bytes(&mut ba);
        b.fill_bytes(&mut bb);
        assert_eq!(ba, bb);
    }
}
