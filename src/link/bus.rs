//! In-process frame bus.
//!
//! A synchronous pub/sub channel carrying whole frames as wire bytes. This
//! is the reference medium used by the integration tests and by hosts that
//! bridge the engine onto real drivers; a driver-side implementation of
//! [`FrameBus`] substitutes transparently.
//!
//! Delivery is run-to-completion: a frame sent from inside a handler on the
//! same bus is queued and delivered once the in-progress delivery finishes,
//! so handlers never re-enter and no frame is lost.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::core::{CancelHandle, FrameBus, FrameHandler};

/// A single-context, synchronous-delivery frame bus.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Default)]
struct Inner {
    // A slot is None while its handler is executing.
    handlers: BTreeMap<u64, Option<FrameHandler>>,
    next_id: u64,
    delivering: bool,
    queued: VecDeque<Vec<u8>>,
}

impl LocalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().handlers.len()
    }

    fn deliver(&self, frame: &[u8]) {
        let ids: Vec<u64> = self.inner.borrow().handlers.keys().copied().collect();
        for id in ids {
            let taken = self
                .inner
                .borrow_mut()
                .handlers
                .get_mut(&id)
                .and_then(|slot| slot.take());
            if let Some(mut handler) = taken {
                handler(frame);
                // Put the handler back unless it unsubscribed itself.
                if let Some(slot) = self.inner.borrow_mut().handlers.get_mut(&id) {
                    *slot = Some(handler);
                }
            }
        }
    }
}

impl FrameBus for LocalBus {
    fn send(&self, frame: &[u8]) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.delivering {
                inner.queued.push_back(frame.to_vec());
                return;
            }
            inner.delivering = true;
        }
        let mut current = frame.to_vec();
        loop {
            self.deliver(&current);
            let next = {
                let mut inner = self.inner.borrow_mut();
                let next = inner.queued.pop_front();
                if next.is_none() {
                    inner.delivering = false;
                }
                next
            };
            match next {
                Some(frame) => current = frame,
                None => break,
            }
        }
    }

    fn subscribe(&self, handler: FrameHandler) -> CancelHandle {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.handlers.insert(id, Some(handler));
            id
        };
        let weak = Rc::downgrade(&self.inner);
        CancelHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().handlers.remove(&id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delivery_to_all_subscribers() {
        let bus = LocalBus::new();
        let a = Rc::new(Cell::new(0u32));
        let b = Rc::new(Cell::new(0u32));
        let (ca, cb) = (Rc::clone(&a), Rc::clone(&b));
        let _sub_a = bus.subscribe(Box::new(move |_| ca.set(ca.get() + 1)));
        let _sub_b = bus.subscribe(Box::new(move |_| cb.set(cb.get() + 1)));

        bus.send(&[1, 2, 3]);
        assert_eq!((a.get(), b.get()), (1, 1));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = LocalBus::new();
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        let sub = bus.subscribe(Box::new(move |_| c.set(c.get() + 1)));

        bus.send(&[0]);
        sub.cancel();
        bus.send(&[0]);
        assert_eq!(count.get(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_nested_send_is_queued_not_reentrant() {
        let bus = LocalBus::new();
        let log: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let bus2 = bus.clone();
        let _sub = bus.subscribe(Box::new(move |frame| {
            l.borrow_mut().push(frame.to_vec());
            if frame == [0xFE] {
                bus2.send(&[0x01]);
                // The nested frame has not been delivered yet.
                assert_eq!(l.borrow().len(), 1);
            }
        }));

        bus.send(&[0xFE]);
        // ...but it is delivered before the outer send returns.
        assert_eq!(*log.borrow(), vec![vec![0xFE], vec![0x01]]);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = LocalBus::new();
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        let slot: Rc<RefCell<Option<CancelHandle>>> = Rc::new(RefCell::new(None));
        let slot2 = Rc::clone(&slot);
        let sub = bus.subscribe(Box::new(move |_| {
            c.set(c.get() + 1);
            if let Some(handle) = slot2.borrow_mut().take() {
                handle.cancel();
            }
        }));
        *slot.borrow_mut() = Some(sub);

        bus.send(&[0]);
        bus.send(&[0]);
        assert_eq!(count.get(), 1);
    }
}
