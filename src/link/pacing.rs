//! Transmit burst pacing.
//!
//! Frames marked for a burst go out three times with at least 128 preamble
//! lengths between copies; unbursted frames and whole bursts are spaced at
//! least 1024 preamble lengths apart. Delivery is not acknowledged at this
//! layer, so bursting is the only defence against collisions.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

use super::LinkTiming;
use crate::core::constants::BURST_COPIES;
use crate::core::{CancelHandle, FrameBus, Scheduler};

/// Paces frame emission onto one bus.
pub struct BurstPacer {
    inner: Rc<RefCell<Inner>>,
}

struct Inner {
    bus: Rc<dyn FrameBus>,
    scheduler: Rc<dyn Scheduler>,
    copy_gap: Duration,
    frame_gap: Duration,
    queue: VecDeque<QueuedFrame>,
    current: Option<InFlight>,
    cooling: bool,
    timer: Option<CancelHandle>,
    closed: bool,
}

struct QueuedFrame {
    bytes: Vec<u8>,
    copies: u8,
}

struct InFlight {
    frame: QueuedFrame,
    sent: u8,
}

impl BurstPacer {
    /// A pacer for `bus` with gaps derived from `timing`.
    pub fn new(bus: Rc<dyn FrameBus>, scheduler: Rc<dyn Scheduler>, timing: LinkTiming) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                bus,
                scheduler,
                copy_gap: timing.copy_gap(),
                frame_gap: timing.frame_gap(),
                queue: VecDeque::new(),
                current: None,
                cooling: false,
                timer: None,
                closed: false,
            })),
        }
    }

    /// Queue a frame; bursted frames are emitted [`BURST_COPIES`] times.
    ///
    /// When the pacer is idle the first copy goes out before this returns;
    /// otherwise the frame waits for the running burst and spacing gap.
    pub fn submit(&self, bytes: Vec<u8>, burst: bool) {
        let pump_now = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return;
            }
            inner.queue.push_back(QueuedFrame {
                bytes,
                copies: if burst { BURST_COPIES } else { 1 },
            });
            inner.current.is_none() && !inner.cooling
        };
        if pump_now {
            Self::pump(&self.inner);
        }
    }

    /// Drop queued frames and stop the current burst after the copy on air.
    pub fn clear(&self) {
        let timer = {
            let mut inner = self.inner.borrow_mut();
            inner.queue.clear();
            inner.current = None;
            inner.cooling = false;
            inner.timer.take()
        };
        if let Some(timer) = timer {
            timer.cancel();
        }
    }

    /// Permanently shut the pacer down.
    pub fn close(&self) {
        self.inner.borrow_mut().closed = true;
        self.clear();
    }

    /// Whether nothing is queued, in flight, or cooling down.
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.borrow();
        inner.queue.is_empty() && inner.current.is_none() && !inner.cooling
    }

    /// Emit the next copy and schedule the follow-up gap.
    fn pump(inner_rc: &Rc<RefCell<Inner>>) {
        let (bytes, delay, bus, scheduler) = {
            let mut inner = inner_rc.borrow_mut();
            if inner.closed {
                return;
            }
            inner.timer = None;
            inner.cooling = false;

            let mut inflight = match inner.current.take() {
                Some(inflight) => inflight,
                None => match inner.queue.pop_front() {
                    Some(frame) => InFlight { frame, sent: 0 },
                    None => return,
                },
            };
            let bytes = inflight.frame.bytes.clone();
            inflight.sent += 1;
            let delay = if inflight.sent < inflight.frame.copies {
                trace!(copy = inflight.sent, "burst copy sent, next after copy gap");
                inner.current = Some(inflight);
                inner.copy_gap
            } else {
                inner.cooling = true;
                inner.frame_gap
            };
            (bytes, delay, Rc::clone(&inner.bus), Rc::clone(&inner.scheduler))
        };

        bus.send(&bytes);

        let weak = Rc::downgrade(inner_rc);
        let timer = scheduler.set_timeout(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::pump(&inner);
                }
            }),
        );
        inner_rc.borrow_mut().timer = Some(timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LocalBus;
    use crate::testing::ManualScheduler;
    use std::cell::RefCell as StdRefCell;

    fn capture(bus: &LocalBus) -> (Rc<StdRefCell<Vec<Vec<u8>>>>, CancelHandle) {
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let sub = bus.subscribe(Box::new(move |frame: &[u8]| {
            s.borrow_mut().push(frame.to_vec());
        }));
        (seen, sub)
    }

    fn pacer(
        bus: &LocalBus,
        scheduler: &Rc<ManualScheduler>,
    ) -> BurstPacer {
        BurstPacer::new(
            Rc::new(bus.clone()),
            Rc::clone(scheduler) as Rc<dyn Scheduler>,
            LinkTiming::default(),
        )
    }

    #[test]
    fn test_burst_emits_three_copies() {
        let bus = LocalBus::new();
        let scheduler = Rc::new(ManualScheduler::new());
        let (seen, _sub) = capture(&bus);
        let pacer = pacer(&bus, &scheduler);

        pacer.submit(vec![0xAB], true);
        assert_eq!(seen.borrow().len(), 1, "first copy is synchronous");

        scheduler.advance(LinkTiming::default().copy_gap());
        assert_eq!(seen.borrow().len(), 2);
        scheduler.advance(LinkTiming::default().copy_gap());
        assert_eq!(seen.borrow().len(), 3);

        // No fourth copy.
        scheduler.advance(Duration::from_secs(5));
        assert_eq!(seen.borrow().len(), 3);
        assert!(pacer.is_idle());
    }

    #[test]
    fn test_unbursted_frame_sent_once() {
        let bus = LocalBus::new();
        let scheduler = Rc::new(ManualScheduler::new());
        let (seen, _sub) = capture(&bus);
        let pacer = pacer(&bus, &scheduler);

        pacer.submit(vec![0x01], false);
        scheduler.advance(Duration::from_secs(5));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_queued_frame_waits_for_frame_gap() {
        let bus = LocalBus::new();
        let scheduler = Rc::new(ManualScheduler::new());
        let (seen, _sub) = capture(&bus);
        let pacer = pacer(&bus, &scheduler);
        let timing = LinkTiming::default();

        pacer.submit(vec![0x01], false);
        pacer.submit(vec![0x02], false);
        assert_eq!(seen.borrow().len(), 1);

        // Just before the frame gap nothing further is sent.
        scheduler.advance(timing.frame_gap() - Duration::from_micros(1));
        assert_eq!(seen.borrow().len(), 1);
        scheduler.advance(Duration::from_micros(1));
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(seen.borrow()[1], vec![0x02]);
    }

    #[test]
    fn test_clear_drops_queue_and_copies() {
        let bus = LocalBus::new();
        let scheduler = Rc::new(ManualScheduler::new());
        let (seen, _sub) = capture(&bus);
        let pacer = pacer(&bus, &scheduler);

        pacer.submit(vec![0x01], true);
        pacer.submit(vec![0x02], true);
        pacer.clear();

        scheduler.advance(Duration::from_secs(10));
        assert_eq!(seen.borrow().len(), 1, "only the copy already on air");
        assert!(pacer.is_idle());
    }

    #[test]
    fn test_closed_pacer_refuses_frames() {
        let bus = LocalBus::new();
        let scheduler = Rc::new(ManualScheduler::new());
        let (seen, _sub) = capture(&bus);
        let pacer = pacer(&bus, &scheduler);

        pacer.close();
        pacer.submit(vec![0x01], true);
        scheduler.advance(Duration::from_secs(1));
        assert!(seen.borrow().is_empty());
    }
}
