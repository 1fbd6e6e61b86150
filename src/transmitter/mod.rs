//! Transmitter state machine.
//!
//! A transmitter idles until the host opens a pairing window, adopts the
//! first usable HELLO it hears on the private medium, and from then on
//! emits encrypted BIND/UNBIND/CONFIGURE/ACT frames onto the public medium
//! through the burst pacer. Delivery is never acknowledged at this layer,
//! so the key and session id survive until a factory reset.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::codec::{
    decode_sequenced, encode_act, encode_bind, encode_sequenced, open_frame, seal_frame, Action,
    BindFields, Frame, InterfaceType, MessageType, Payload, ProtectionHeader, SealedKind,
};
use crate::core::constants::{PAIRING_WINDOW, TRANSMITTER_ID_SIZE};
use crate::core::{CancelHandle, FrameBus, RandomSource, Scheduler};
use crate::crypto::{Protection, SessionKey};
use crate::link::{BurstPacer, LinkTiming};
use crate::persist::{Pairing, PairingStorage, TransmitterRecord};

/// Transmitter lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitterState {
    /// Normal operation.
    Idle,
    /// Listening for HELLO on the private medium.
    Pairing,
}

/// Callbacks into the owning host (button matrix, LED, UI).
pub trait TransmitterHost {
    /// The transmitter entered a new lifecycle state.
    fn state_changed(&self, state: TransmitterState);

    /// Pairing was confirmed (BOUND received) or given up (unpair).
    fn pairing_changed(&self, paired: bool);
}

/// Transmitter tuning; the defaults implement the standard timings.
#[derive(Debug, Clone)]
pub struct TransmitterConfig {
    /// Symbol-unit derived burst spacing.
    pub timing: LinkTiming,
    /// PAIRING window.
    pub pairing_window: Duration,
    /// Interfaces this device can drive; `None` accepts everything the
    /// receiver offers.
    pub capabilities: Option<Vec<InterfaceType>>,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            timing: LinkTiming::default(),
            pairing_window: PAIRING_WINDOW,
            capabilities: None,
        }
    }
}

/// Capabilities injected into a transmitter.
pub struct TransmitterDeps {
    /// The untrusted radio medium; the transmitter only sends here.
    pub public_bus: Rc<dyn FrameBus>,
    /// The trusted line-of-sight medium; the transmitter only listens here.
    pub private_bus: Rc<dyn FrameBus>,
    /// Deferred execution.
    pub scheduler: Rc<dyn Scheduler>,
    /// Cryptographic randomness.
    pub random: Box<dyn RandomSource>,
    /// Host actor receiving state and pairing changes.
    pub host: Rc<dyn TransmitterHost>,
    /// Optional persistent pairing record.
    pub storage: Option<Rc<dyn PairingStorage>>,
}

enum Notice {
    State(TransmitterState),
    PairingChanged(bool),
}

#[derive(Default)]
struct Directives {
    cancel_state_timer: bool,
    arm_state_timer: Option<Duration>,
    clear_pacer: bool,
    persist: bool,
    notices: Vec<Notice>,
    send_public: Vec<(Vec<u8>, bool)>,
}

struct Core {
    cfg: TransmitterConfig,
    state: TransmitterState,
    transmitter_id: u64,
    pairing: Option<Pairing>,
    hello_adopted: bool,
    pacer: Rc<BurstPacer>,
    scheduler: Rc<dyn Scheduler>,
    random: Box<dyn RandomSource>,
    host: Rc<dyn TransmitterHost>,
    storage: Option<Rc<dyn PairingStorage>>,
    state_timer: Option<CancelHandle>,
    closed: bool,
}

/// The transmitter endpoint.
pub struct Transmitter {
    core: Rc<RefCell<Core>>,
    subscription: CancelHandle,
}

impl Transmitter {
    /// Build a transmitter, restore its record, and subscribe to the
    /// private bus. A first boot draws a fresh transmitter id.
    pub fn new(cfg: TransmitterConfig, deps: TransmitterDeps) -> Self {
        let TransmitterDeps {
            public_bus,
            private_bus,
            scheduler,
            mut random,
            host,
            storage,
        } = deps;

        let mut restored_id = None;
        let mut pairing = None;
        if let Some(storage) = &storage {
            match storage.load() {
                Ok(Some(record)) => {
                    restored_id = Some(record.transmitter_id);
                    pairing = record.pairing;
                }
                Ok(None) => {}
                Err(error) => warn!(%error, "pairing record restore failed"),
            }
        }
        let first_boot = restored_id.is_none();
        let transmitter_id = restored_id.unwrap_or_else(|| {
            let mut bytes = [0u8; TRANSMITTER_ID_SIZE];
            random.fill_bytes(&mut bytes);
            u64::from_be_bytes(bytes)
        });

        let pacer = Rc::new(BurstPacer::new(
            Rc::clone(&public_bus),
            Rc::clone(&scheduler),
            cfg.timing,
        ));
        let core = Rc::new(RefCell::new(Core {
            cfg,
            state: TransmitterState::Idle,
            transmitter_id,
            pairing,
            hello_adopted: false,
            pacer,
            scheduler,
            random,
            host,
            storage,
            state_timer: None,
            closed: false,
        }));

        let weak = Rc::downgrade(&core);
        let subscription = private_bus.subscribe(Box::new(move |bytes: &[u8]| {
            if let Some(core) = weak.upgrade() {
                Self::dispatch(&core, |c| c.handle_private_frame(bytes));
            }
        }));

        Self::apply(
            &core,
            Directives {
                persist: first_boot,
                notices: vec![Notice::State(TransmitterState::Idle)],
                ..Default::default()
            },
        );
        Self { core, subscription }
    }

    /// Open a pairing window and wait for HELLO.
    pub fn set_pairing(&self) {
        Self::dispatch(&self.core, Core::handle_set_pairing);
    }

    /// Emit an encrypted ACT. Silently a no-op while unpaired or unbound.
    pub fn act(&self, action: Action) {
        Self::dispatch(&self.core, |c| c.handle_act(action));
    }

    /// Emit an encrypted CONFIGURE. Silently a no-op while unpaired or
    /// unbound.
    pub fn set_configuring(&self) {
        Self::dispatch(&self.core, Core::handle_set_configuring);
    }

    /// Emit UNBIND and mark the pairing unusable for ACT.
    ///
    /// The key and session id are retained: delivery is unconfirmed, and a
    /// retained key still allows the receiver-side unpair ceremony to be
    /// repeated. Only a factory reset wipes them.
    pub fn unpair(&self) {
        Self::dispatch(&self.core, Core::handle_unpair);
    }

    /// Wipe the pairing, draw a fresh transmitter id, return to IDLE.
    pub fn factory_reset(&self) {
        Self::dispatch(&self.core, Core::handle_factory_reset);
    }

    /// Unsubscribe, cancel the window timer, and stop the pacer.
    pub fn close(&self) {
        self.subscription.cancel();
        let (timer, pacer) = {
            let mut core = self.core.borrow_mut();
            core.closed = true;
            (core.state_timer.take(), Rc::clone(&core.pacer))
        };
        if let Some(timer) = timer {
            timer.cancel();
        }
        pacer.close();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransmitterState {
        self.core.borrow().state
    }

    /// Whether a confirmed (BOUND) pairing exists.
    pub fn is_paired(&self) -> bool {
        self.core
            .borrow()
            .pairing
            .as_ref()
            .is_some_and(|pairing| !pairing.unbound)
    }

    /// The persistent transmitter id.
    pub fn transmitter_id(&self) -> u64 {
        self.core.borrow().transmitter_id
    }

    fn dispatch(core: &Rc<RefCell<Core>>, f: impl FnOnce(&mut Core) -> Directives) {
        let directives = f(&mut core.borrow_mut());
        Self::apply(core, directives);
    }

    fn apply(core: &Rc<RefCell<Core>>, d: Directives) {
        let (old_timer, pacer, host, storage, snapshot, scheduler) = {
            let mut c = core.borrow_mut();
            (
                (d.cancel_state_timer || d.arm_state_timer.is_some())
                    .then(|| c.state_timer.take())
                    .flatten(),
                Rc::clone(&c.pacer),
                Rc::clone(&c.host),
                c.storage.clone(),
                d.persist.then(|| TransmitterRecord {
                    transmitter_id: c.transmitter_id,
                    pairing: c.pairing.clone(),
                }),
                Rc::clone(&c.scheduler),
            )
        };
        if let Some(timer) = old_timer {
            timer.cancel();
        }
        if d.clear_pacer {
            pacer.clear();
        }
        if let (Some(storage), Some(record)) = (&storage, snapshot) {
            if let Err(error) = storage.save(&record) {
                warn!(%error, "pairing record save failed");
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
        for notice in d.notices {
            match notice {
                Notice::State(state) => host.state_changed(state),
                Notice::PairingChanged(paired) => host.pairing_changed(paired),
            }
        }
        for (frame, burst) in d.send_public {
            pacer.submit(frame, burst);
        }
    }
}

impl Core {
    fn enter(&mut self, state: TransmitterState, d: &mut Directives) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "transmitter state change");
            self.state = state;
            d.notices.push(Notice::State(state));
        }
    }

    fn handle_private_frame(&mut self, bytes: &[u8]) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%error, "private frame decode failed");
                return d;
            }
        };
        match (frame.message_type(), self.state) {
            (MessageType::Hello, TransmitterState::Pairing) if !self.hello_adopted => {
                self.on_hello(frame, &mut d)
            }
            (MessageType::Bound, TransmitterState::Pairing) => self.on_bound(frame, &mut d),
            (message_type, state) => {
                trace!(?message_type, ?state, "private frame ignored");
            }
        }
        d
    }

    fn on_hello(&mut self, frame: Frame, d: &mut Directives) {
        let Payload::Hello(body) = &frame.payload else {
            return;
        };
        // First supported algorithm wins; its key is adopted with it.
        let Some((algorithm, key_bytes)) = body
            .algorithms
            .iter()
            .find_map(|candidate| candidate.algorithm().map(|a| (a, candidate.key)))
        else {
            trace!("HELLO offers no supported algorithm");
            return;
        };
        let offered: Vec<InterfaceType> = body.interfaces.iter().map(|i| i.kind).collect();
        let interfaces: Vec<InterfaceType> = match &self.cfg.capabilities {
            Some(capabilities) => offered
                .into_iter()
                .filter(|iface| capabilities.contains(iface))
                .collect(),
            None => offered,
        };
        if interfaces.is_empty() {
            debug!("interface intersection empty, HELLO ignored");
            return;
        }

        let mut pairing = Pairing {
            session_id: frame.session_id,
            protection: Protection::new(algorithm, SessionKey::from_bytes(key_bytes)),
            tx_seq: 0,
            unbound: true,
            interfaces: interfaces.clone(),
        };
        let Some(sequence) = pairing.next_seq() else {
            return;
        };
        let fields = BindFields {
            transmitter_id: self.transmitter_id,
            interface_types: interfaces,
        };
        let nonce = ProtectionHeader::from_counter(algorithm, sequence);
        match seal_frame(
            frame.session_id,
            SealedKind::Bind {
                algorithm_id: algorithm.id(),
            },
            nonce,
            &pairing.protection.key,
            &encode_bind(sequence, &fields),
        ) {
            Ok(bind) => d.send_public.push((bind.encode(), true)),
            Err(error) => warn!(%error, "BIND seal failed"),
        }

        debug!(session = %frame.session_id, "HELLO adopted, BIND queued");
        self.hello_adopted = true;
        self.pairing = Some(pairing);
        d.persist = true;
    }

    fn on_bound(&mut self, frame: Frame, d: &mut Directives) {
        let Some(pairing) = &mut self.pairing else {
            return;
        };
        if frame.session_id != pairing.session_id {
            debug!(session = %frame.session_id, "BOUND names a foreign session id");
            return;
        }
        let Some(sealed) = frame.sealed() else {
            return;
        };
        if sealed.protection.algorithm() != pairing.protection.algorithm {
            debug!("BOUND algorithm differs from the adopted one");
            return;
        }
        let plaintext = match open_frame(&frame, &pairing.protection.key) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                debug!("BOUND failed authentication");
                return;
            }
        };
        if let Err(error) = decode_sequenced(&plaintext) {
            debug!(%error, "BOUND body malformed");
            return;
        }

        debug!(session = %pairing.session_id, "pairing confirmed");
        pairing.unbound = false;
        d.persist = true;
        d.cancel_state_timer = true;
        self.enter(TransmitterState::Idle, d);
        d.notices.push(Notice::PairingChanged(true));
    }

    fn handle_set_pairing(&mut self) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        debug!("pairing window opened");
        self.hello_adopted = false;
        self.enter(TransmitterState::Pairing, &mut d);
        d.arm_state_timer = Some(self.cfg.pairing_window);
        d
    }

    fn handle_state_timeout(&mut self) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        if self.state == TransmitterState::Pairing {
            debug!("pairing window expired");
            self.hello_adopted = false;
            self.enter(TransmitterState::Idle, &mut d);
        }
        d
    }

    fn handle_act(&mut self, action: Action) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        let Some(pairing) = &mut self.pairing else {
            trace!("act ignored, not paired");
            return d;
        };
        if pairing.unbound {
            trace!("act ignored, pairing not confirmed");
            return d;
        }
        if !pairing.interfaces.contains(&action.interface) {
            debug!(interface = ?action.interface, "act ignored, interface not negotiated");
            return d;
        }
        let Some(sequence) = pairing.next_seq() else {
            warn!("sequence counter exhausted, pairing must be renewed");
            return d;
        };
        let nonce = ProtectionHeader::from_counter(pairing.protection.algorithm, sequence);
        match seal_frame(
            pairing.session_id,
            SealedKind::Act,
            nonce,
            &pairing.protection.key,
            &encode_act(sequence, &action),
        ) {
            Ok(frame) => {
                d.send_public.push((frame.encode(), true));
                d.persist = true;
            }
            Err(error) => warn!(%error, "ACT seal failed"),
        }
        d
    }

    fn handle_set_configuring(&mut self) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        let Some(pairing) = &mut self.pairing else {
            trace!("set_configuring ignored, not paired");
            return d;
        };
        if pairing.unbound {
            trace!("set_configuring ignored, pairing not confirmed");
            return d;
        }
        let Some(sequence) = pairing.next_seq() else {
            warn!("sequence counter exhausted, pairing must be renewed");
            return d;
        };
        let nonce = ProtectionHeader::from_counter(pairing.protection.algorithm, sequence);
        match seal_frame(
            pairing.session_id,
            SealedKind::Configure,
            nonce,
            &pairing.protection.key,
            &encode_sequenced(sequence),
        ) {
            Ok(frame) => {
                d.send_public.push((frame.encode(), true));
                d.persist = true;
            }
            Err(error) => warn!(%error, "CONFIGURE seal failed"),
        }
        d
    }

    fn handle_unpair(&mut self) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        let Some(pairing) = &mut self.pairing else {
            trace!("unpair ignored, not paired");
            return d;
        };
        let Some(sequence) = pairing.next_seq() else {
            warn!("sequence counter exhausted, pairing must be renewed");
            return d;
        };
        let nonce = ProtectionHeader::from_counter(pairing.protection.algorithm, sequence);
        match seal_frame(
            pairing.session_id,
            SealedKind::Unbind,
            nonce,
            &pairing.protection.key,
            &encode_sequenced(sequence),
        ) {
            Ok(frame) => d.send_public.push((frame.encode(), true)),
            Err(error) => warn!(%error, "UNBIND seal failed"),
        }
        debug!(session = %pairing.session_id, "unpair requested, key retained");
        pairing.unbound = true;
        d.persist = true;
        d.notices.push(Notice::PairingChanged(false));
        d
    }

    fn handle_factory_reset(&mut self) -> Directives {
        let mut d = Directives::default();
        if self.closed {
            return d;
        }
        debug!("factory reset");
        let was_paired = self
            .pairing
            .as_ref()
            .is_some_and(|pairing| !pairing.unbound);
        self.pairing = None;
        self.hello_adopted = false;
        let mut id = [0u8; TRANSMITTER_ID_SIZE];
        self.random.fill_bytes(&mut id);
        self.transmitter_id = u64::from_be_bytes(id);
        d.clear_pacer = true;
        d.cancel_state_timer = true;
        self.enter(TransmitterState::Idle, &mut d);
        if was_paired {
            d.notices.push(Notice::PairingChanged(false));
        }
        d.persist = true;
        d
    }
}
