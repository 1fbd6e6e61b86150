//! Receiver state machine.
//!
//! Owns the session table and drives the STARTING / IDLE / CONFIGURING /
//! PAIRING / UNPAIRING lifecycle. Inputs arrive from the public bus, the
//! scheduler, and the host; outputs are HELLO/BOUND frames on the private
//! bus and host notifications. Everything runs on one execution context.

pub mod store;

pub use store::{SessionRecord, SessionStore};

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::codec::{
    decode_act, decode_bind, decode_sequenced, encode_sequenced, open_frame, seal_frame, Action,
    Frame, HelloAlgorithm, HelloBody, InterfaceDescriptor, MessageType, Payload, ProtectionHeader,
    SealedKind, SessionId,
};
use crate::core::constants::{
    ADMISSION_WINDOW, ACTIVITY_WINDOW, CONFIGURING_WINDOW, DEFAULT_ACT_BUDGET,
    DEFAULT_SESSION_CAPACITY, HELLO_PERIOD, PAIRING_WINDOW, SESSION_KEY_SIZE, STARTUP_DELAY,
};
use crate::core::{CancelHandle, FrameBus, FramingError, RandomSource, Scheduler};
use crate::crypto::{Algorithm, Protection, SessionKey};
use crate::link::{Governor, LinkTiming};
use crate::persist::SessionStorage;

/// Receiver lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Start-up delay; nothing is accepted yet.
    Starting,
    /// Normal operation, commissioning surface closed.
    Idle,
    /// Commissioning window open: host may start pairing or unpairing.
    Configuring,
    /// HELLO broadcast running, waiting for a BIND.
    Pairing,
    /// Waiting for an UNBIND to delete.
    Unpairing,
}

/// Callbacks into the owning host (UI, GPIO, actuator).
pub trait ReceiverHost {
    /// The receiver entered a new lifecycle state.
    fn state_changed(&self, state: ReceiverState);

    /// An authenticated, fresh ACT arrived.
    fn act(&self, action: Action);

    /// An ACT-shaped frame failed authentication (optional indicator).
    fn reception_attempt(&self) {}
}

/// Receiver tuning; the defaults implement the standard timings.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Session table capacity (at least 1).
    pub capacity: usize,
    /// Candidate protection algorithms offered in HELLO, preference first.
    pub algorithms: Vec<Algorithm>,
    /// Interfaces advertised in HELLO.
    pub interfaces: Vec<InterfaceDescriptor>,
    /// Symbol-unit derived spacing and hold-off timing.
    pub timing: LinkTiming,
    /// STARTING delay before the first frame is accepted.
    pub startup_delay: Duration,
    /// PAIRING and UNPAIRING window.
    pub pairing_window: Duration,
    /// CONFIGURING window after pairing or CONFIGURE.
    pub configuring_window: Duration,
    /// CONFIGURING window re-armed by each authenticated ACT.
    pub activity_window: Duration,
    /// HELLO broadcast period while PAIRING.
    pub hello_period: Duration,
    /// Per-window ACT admission budget (0 = unlimited).
    pub act_budget: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SESSION_CAPACITY,
            algorithms: vec![Algorithm::AesOcbTag64],
            interfaces: vec![InterfaceDescriptor::button_act()],
            timing: LinkTiming::default(),
            startup_delay: STARTUP_DELAY,
            pairing_window: PAIRING_WINDOW,
            configuring_window: CONFIGURING_WINDOW,
            activity_window: ACTIVITY_WINDOW,
            hello_period: HELLO_PERIOD,
            act_budget: DEFAULT_ACT_BUDGET,
        }
    }
}

/// Capabilities injected into a receiver.
pub struct ReceiverDeps {
    /// The untrusted radio medium; the receiver only listens here.
    pub public_bus: Rc<dyn FrameBus>,
    /// The trusted line-of-sight medium; the receiver only sends here.
    pub private_bus: Rc<dyn FrameBus>,
    /// Deferred execution.
    pub scheduler: Rc<dyn Scheduler>,
    /// Cryptographic randomness.
    pub random: Box<dyn RandomSource>,
    /// Host actor receiving state changes and actions.
    pub host: Rc<dyn ReceiverHost>,
    /// Optional persistent session table.
    pub storage: Option<Rc<dyn SessionStorage>>,
}

/// Pairing context alive between `set_pairing` and BIND or timeout.
struct PendingPairing {
    session_id: SessionId,
    key: SessionKey,
    algorithms: Vec<Algorithm>,
    hello: Vec<u8>,
}

/// Host-facing events collected while the core is borrowed.
enum Notice {
    State(ReceiverState),
    Act(Action),
    ReceptionAttempt,
}

/// Everything a state transition wants done once the borrow is released.
#[derive(Default)]
struct Directives {
    cancel_state_timer: bool,
    cancel_hello: bool,
    arm_state_timer: Option<Duration>,
    arm_hello: bool,
    arm_hold_off: bool,
    persist: bool,
    notices: Vec<Notice>,
    send_private: Vec<Vec<u8>>,
}

struct Core {
    cfg: ReceiverConfig,
    state: ReceiverState,
    store: SessionStore,
    pending: Option<PendingPairing>,
    governor: Governor,
    private_bus: Rc<dyn FrameBus>,
    scheduler: Rc<dyn Scheduler>,
    random: Box<dyn RandomSource>,
    host: Rc<dyn ReceiverHost>,
    storage: Option<Rc<dyn SessionStorage>>,
    state_timer: Option<CancelHandle>,
    hello_timer: Option<CancelHandle>,
    hold_off_timer: Option<CancelHandle>,
    window_timer: Option<CancelHandle>,
    closed: bool,
}

/// The receiver endpoint.
pub struct Receiver {
    core: Rc<RefCell<Core>>,
    subscription: CancelHandle,
}

impl Receiver {
    /// Build a receiver, restore its session table, subscribe to the public
    /// bus, and start the STARTING delay.
    pub fn new(cfg: ReceiverConfig, deps: ReceiverDeps) -> Self {
        let ReceiverDeps {
            public_bus,
            private_bus,
            scheduler,
            random,
            host,
            storage,
        } = deps;

        let mut store = SessionStore::new(cfg.capacity);
        if let Some(storage) = &storage {
            match storage.load() {
                Ok(records) => store.restore(records),
                Err(error) => warn!(%error, "session table restore failed"),
            }
        }

        let startup_delay = cfg.startup_delay;
        let governor = Governor::new(cfg.act_budget);
        let core = Rc::new(RefCell::new(Core {
            cfg,
            state: ReceiverState::Starting,
            store,
            pending: None,
            governor,
            private_bus,
            scheduler: Rc::clone(&scheduler),
            random,
            host,
            storage,
            state_timer: None,
            hello_timer: None,
            hold_off_timer: None,
            window_timer: None,
            closed: false,
        }));

        let weak = Rc::downgrade(&core);
        let subscription = public_bus.subscribe(Box::new(move |bytes: &[u8]| {
            if let Some(core) = weak.upgrade() {
                Self::dispatch(&core, |c| c.handle_public_frame(bytes));
            }
        }));

        let weak = Rc::downgrade(&core);
        let window_timer = scheduler.set_interval(
            ADMISSION_WINDOW,
            Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    core.borrow_mut().governor.on_window_reset();
                }
            }),
        );
        core.borrow_mut().window_timer = Some(window_timer);

        Self::apply(
            &core,
            Directives {
                arm_state_timer: Some(startup_delay),
                notices: vec![Notice::State(ReceiverState::Starting)],
                ..Default::default()
            },
        );
        Self { core, subscription }
    }

    /// Open a pairing window. Honored only from CONFIGURING.
    pub fn set_pairing(&self) {
        Self::dispatch(&self.core, Core::handle_set_pairing);
    }

    /// Open an unpairing window. Honored only from CONFIGURING.
    pub fn set_unpairing(&self) {
        Self::dispatch(&self.core, Core::handle_set_unpairing);
    }

    /// Drop every session and return to STARTING.
    pub fn factory_reset(&self) {
        Self::dispatch(&self.core, Core::handle_factory_reset);
    }

    /// Report a symbol-layer fault observed by the radio driver.
    pub fn on_framing_error(&self, error: FramingError) {
        Self::dispatch(&self.core, |c| c.handle_framing_error(error));
    }

    /// Unsubscribe, cancel every timer, and drop pending pairing state.
    pub fn close(&self) {
        self.subscription.cancel();
        let handles = {
            let mut core = self.core.borrow_mut();
            core.closed = true;
            core.pending = None;
            [
                core.state_timer.take(),
                core.hello_timer.take(),
                core.hold_off_timer.take(),
                core.window_timer.take(),
            ]
        };
        for handle in handles.into_iter().flatten() {
            handle.cancel();
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReceiverState {
        self.core.borrow().state
    }

    /// Number of paired transmitters.
    pub fn session_count(&self) -> usize {
        self.core.borrow().store.len()
    }

    /// Replays observed by the governor.
    pub fn replay_count(&self) -> u64 {
        self.core.borrow().governor.replays()
    }

    /// Faults observed by the governor.
    pub fn fault_count(&self) -> u64 {
        self.core.borrow().governor.faults()
    }

    fn dispatch(core: &Rc<RefCell<Core>>, f: impl FnOnce(&mut Core) -> Directives) {
        let directives = f(&mut core.borrow_mut());
        Self::apply(core, directives);
    }

    /// Run a transition's side effects: timers first (so nested dispatches
    /// see them), then notifications, then bus sends, which may re-enter.
    fn apply(core: &Rc<RefCell<Core>>, d: Directives) {
        let (old_state, old_hello, bus, host, storage, snapshot, scheduler, hello_period, hold_off) = {
            let mut c = core.borrow_mut();
            (
                (d.cancel_state_timer || d.arm_state_timer.is_some())
                    .then(|| c.state_timer.take())
                    .flatten(),
                (d.cancel_hello || d.arm_hello)
                    .then(|| c.hello_timer.take())
                    .flatten(),
                Rc::clone(&c.private_bus),
                Rc::clone(&c.host),
                c.storage.clone(),
                d.persist.then(|| c.store.records().to_vec()),
                Rc::clone(&c.scheduler),
                c.cfg.hello_period,
                c.cfg.timing.hold_off(),
            )
        };
        for handle in [old_state, old_hello].into_iter().flatten() {
            handle.cancel();
        }

        if let (Some(storage), Some(snapshot)) = (&storage, snapshot) {
            if let Err(error) = storage.save(&snapshot) {
                warn!(%error, "session table save failed");
            }
        }

        if let Some(delay) = d.arm_state_timer {
            let weak = Rc::downgrade(core);
            let handle = scheduler.set_timeout(
                delay,
                Box::new(move || {
                    if let Some(core) = weak.upgrade() {
                        Self::dispatch(&core, Core::handle_state_timeout);
                    }
                }),
            );
            core.borrow_mut().state_timer = Some(handle);
        }
        if d.arm_hello {
            let weak = Rc::downgrade(core);
            let handle = scheduler.set_interval(
                hello_period,
                Box::new(move || {
                    if let Some(core) = weak.upgrade() {
                        Self::on_hello_tick(&core);
                    }
                }),
            );
            core.borrow_mut().hello_timer = Some(handle);
        }
        if d.arm_hold_off {
            let weak = Rc::downgrade(core);
            let handle = scheduler.set_timeout(
                hold_off,
                Box::new(move || {
                    if let Some(core) = weak.upgrade() {
                        core.borrow_mut().governor.on_hold_off_elapsed();
                    }
                }),
            );
            let old = core.borrow_mut().hold_off_timer.replace(handle);
            if let Some(old) = old {
                old.cancel();
            }
        }

        for notice in d.notices {
            match notice {
                Notice::State(state) => host.state_changed(state),
                Notice::Act(action) => host.act(action),
                Notice::ReceptionAttempt => host.reception_attempt(),
            }
        }
        for frame in d.send_private {
            bus.send(&frame);
        }
    }

    fn on_hello_tick(core: &Rc<RefCell<Core>>) {
        let send = {
            let c = core.borrow();
            match (&c.pending, c.closed) {
                (Some(pending), false) => Some((Rc::clone(&c.private_bus), pending.hello.clone())),
                _ => None,
            }
        };
        if let Some((bus, frame)) = send {
            bus.send(&frame);
        }
    }
}

impl Core {
    /// Switch state, notifying on change, and re-arm or cancel the window.
    fn enter(&mut self, state: ReceiverState, window: Option<Duration>, d: &mut Directives) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "receiver state change");
            self.state = state;
            d.notices.push(Notice::State(state));
        }
        match window {
            Some(window) => d.arm_state_timer = Some(window),
            None => d.cancel_state_timer = true,
        }
    }

    fn fault(&mut self, d: &mut Directives) {
        if self.governor.on_fault() {
            d.arm_hold_off = true;
        }
    }

    fn handle_public_frame(&mut self, bytes: &[u8]) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        if self.governor.is_muted() {
            trace!("hold-off active, frame dropped unseen");
            return d;
        }
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%error, "frame decode failed");
                self.fault(&mut d);
                return d;
            }
        };
        if !self.governor.admit(frame.message_type()) {
            return d;
        }
        match (frame.message_type(), self.state) {
            (MessageType::Bind, ReceiverState::Pairing) => self.on_bind(frame, &mut d),
            (MessageType::Unbind, ReceiverState::Unpairing) => self.on_unbind(frame, &mut d),
            (MessageType::Configure, ReceiverState::Idle | ReceiverState::Configuring) => {
                self.on_configure(frame, &mut d)
            }
            (MessageType::Act, ReceiverState::Idle | ReceiverState::Configuring) => {
                self.on_act(frame, &mut d)
            }
            (message_type, state) => {
                trace!(?message_type, ?state, "frame illegal in state, dropped");
            }
        }
        d
    }

    fn on_bind(&mut self, frame: Frame, d: &mut Directives) {
        let Some(pending) = &self.pending else {
            return;
        };
        if frame.session_id != pending.session_id {
            debug!(session = %frame.session_id, "BIND names a foreign session id");
            return;
        }
        let Payload::Bind {
            algorithm_id,
            sealed,
        } = &frame.payload
        else {
            return;
        };
        let algorithm = match Algorithm::from_id(*algorithm_id) {
            Some(algorithm)
                if pending.algorithms.contains(&algorithm)
                    && sealed.protection.algorithm() == algorithm =>
            {
                algorithm
            }
            _ => {
                debug!(algorithm_id = *algorithm_id, "BIND algorithm is not a pending candidate");
                return;
            }
        };
        if self.store.is_full() {
            warn!("session table full, BIND not accepted");
            return;
        }
        let plaintext = match open_frame(&frame, &pending.key) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                debug!("BIND failed authentication");
                self.fault(d);
                return;
            }
        };
        let (sequence, fields) = match decode_bind(&plaintext) {
            Ok(parsed) => parsed,
            Err(error) => {
                debug!(%error, "BIND body malformed");
                self.fault(d);
                return;
            }
        };
        debug!(
            session = %frame.session_id,
            transmitter = fields.transmitter_id,
            "session bound"
        );

        let record = SessionRecord {
            session_id: pending.session_id,
            protection: Protection::new(algorithm, pending.key.clone()),
            last_accepted_seq_no: sequence,
        };
        if let Err(error) = self.store.insert_unique(record) {
            warn!(%error, "session install failed");
            return;
        }

        // The sole encrypted frame the receiver sends under this key.
        let nonce = ProtectionHeader::random(algorithm, self.random.as_mut());
        match seal_frame(
            pending.session_id,
            SealedKind::Bound,
            nonce,
            &pending.key,
            &encode_sequenced(1),
        ) {
            Ok(reply) => d.send_private.push(reply.encode()),
            Err(error) => warn!(%error, "BOUND seal failed"),
        }

        self.pending = None;
        d.cancel_hello = true;
        d.persist = true;
        let window = self.cfg.configuring_window;
        self.enter(ReceiverState::Configuring, Some(window), d);
    }

    fn on_unbind(&mut self, frame: Frame, d: &mut Directives) {
        let Some(record) = self.store.find(frame.session_id) else {
            trace!(session = %frame.session_id, "UNBIND for unknown session");
            return;
        };
        let plaintext = match open_frame(&frame, &record.protection.key) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                debug!("UNBIND failed authentication");
                self.fault(d);
                return;
            }
        };
        let sequence = match decode_sequenced(&plaintext) {
            Ok(sequence) => sequence,
            Err(error) => {
                debug!(%error, "UNBIND body malformed");
                self.fault(d);
                return;
            }
        };
        if sequence <= record.last_accepted_seq_no {
            self.governor.on_replay();
            return;
        }
        self.store.remove(frame.session_id);
        debug!(session = %frame.session_id, "session unbound");
        d.persist = true;
        if self.store.is_empty() {
            let window = self.cfg.configuring_window;
            self.enter(ReceiverState::Configuring, Some(window), d);
        } else {
            self.enter(ReceiverState::Idle, None, d);
        }
    }

    fn on_configure(&mut self, frame: Frame, d: &mut Directives) {
        let Some(record) = self.store.find_mut(frame.session_id) else {
            trace!(session = %frame.session_id, "CONFIGURE for unknown session");
            return;
        };
        let plaintext = match open_frame(&frame, &record.protection.key) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                debug!("CONFIGURE failed authentication");
                self.fault(d);
                return;
            }
        };
        let sequence = match decode_sequenced(&plaintext) {
            Ok(sequence) => sequence,
            Err(error) => {
                debug!(%error, "CONFIGURE body malformed");
                self.fault(d);
                return;
            }
        };
        if sequence <= record.last_accepted_seq_no {
            self.governor.on_replay();
            return;
        }
        record.last_accepted_seq_no = sequence;
        d.persist = true;
        let window = self.cfg.configuring_window;
        self.enter(ReceiverState::Configuring, Some(window), d);
    }

    fn on_act(&mut self, frame: Frame, d: &mut Directives) {
        let Some(record) = self.store.find_mut(frame.session_id) else {
            trace!(session = %frame.session_id, "ACT for unknown session");
            return;
        };
        let plaintext = match open_frame(&frame, &record.protection.key) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                debug!("ACT failed authentication");
                d.notices.push(Notice::ReceptionAttempt);
                self.fault(d);
                return;
            }
        };
        let (sequence, action) = match decode_act(&plaintext) {
            Ok(parsed) => parsed,
            Err(error) => {
                debug!(%error, "ACT body malformed");
                self.fault(d);
                return;
            }
        };
        if sequence <= record.last_accepted_seq_no {
            trace!(sequence, "replayed ACT dropped");
            self.governor.on_replay();
            return;
        }
        record.last_accepted_seq_no = sequence;
        d.persist = true;
        d.notices.push(Notice::Act(action));
        let window = self.cfg.activity_window;
        self.enter(ReceiverState::Configuring, Some(window), d);
    }

    fn handle_state_timeout(&mut self) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        debug!(state = ?self.state, "state window expired");
        match self.state {
            ReceiverState::Starting => {
                if self.store.is_empty() {
                    // Uncommissioned device: open the commissioning surface.
                    let window = self.cfg.configuring_window;
                    self.enter(ReceiverState::Configuring, Some(window), &mut d);
                } else {
                    self.enter(ReceiverState::Idle, None, &mut d);
                }
            }
            ReceiverState::Pairing => {
                self.pending = None;
                d.cancel_hello = true;
                let window = self.cfg.configuring_window;
                self.enter(ReceiverState::Configuring, Some(window), &mut d);
            }
            ReceiverState::Unpairing => {
                let window = self.cfg.configuring_window;
                self.enter(ReceiverState::Configuring, Some(window), &mut d);
            }
            ReceiverState::Configuring => {
                if self.store.is_empty() {
                    // Nothing to idle for; stay commissionable.
                    d.cancel_state_timer = true;
                } else {
                    self.enter(ReceiverState::Idle, None, &mut d);
                }
            }
            ReceiverState::Idle => {}
        }
        d
    }

    fn handle_set_pairing(&mut self) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        if self.state != ReceiverState::Configuring {
            debug!(state = ?self.state, "set_pairing ignored outside CONFIGURING");
            return d;
        }
        if self.cfg.algorithms.is_empty() {
            warn!("no candidate algorithms configured, pairing impossible");
            return d;
        }

        let session_id = self.store.mint_session_id(self.random.as_mut());
        let mut key_bytes = [0u8; SESSION_KEY_SIZE];
        self.random.fill_bytes(&mut key_bytes);

        let body = HelloBody {
            algorithms: self
                .cfg
                .algorithms
                .iter()
                .map(|algorithm| HelloAlgorithm {
                    algorithm_id: algorithm.id(),
                    key: key_bytes,
                })
                .collect(),
            interfaces: self.cfg.interfaces.clone(),
        };
        let hello = Frame {
            session_id,
            payload: Payload::Hello(body),
        }
        .encode();

        debug!(session = %session_id, "pairing window opened");
        self.pending = Some(PendingPairing {
            session_id,
            key: SessionKey::from_bytes(key_bytes),
            algorithms: self.cfg.algorithms.clone(),
            hello: hello.clone(),
        });
        let window = self.cfg.pairing_window;
        self.enter(ReceiverState::Pairing, Some(window), &mut d);
        d.arm_hello = true;
        d.send_private.push(hello);
        d
    }

    fn handle_set_unpairing(&mut self) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        if self.state != ReceiverState::Configuring {
            debug!(state = ?self.state, "set_unpairing ignored outside CONFIGURING");
            return d;
        }
        let window = self.cfg.pairing_window;
        self.enter(ReceiverState::Unpairing, Some(window), &mut d);
        d
    }

    fn handle_factory_reset(&mut self) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        debug!("factory reset");
        self.pending = None;
        self.store.clear();
        self.governor.reset();
        d.cancel_hello = true;
        d.persist = true;
        let delay = self.cfg.startup_delay;
        self.enter(ReceiverState::Starting, Some(delay), &mut d);
        d
    }

    fn handle_framing_error(&mut self, error: FramingError) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        debug!(%error, "framing error reported by driver");
        self.fault(&mut d);
        d
    }
}
