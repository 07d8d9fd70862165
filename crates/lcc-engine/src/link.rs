//! Link-layer state machine: 12-bit alias reservation and defence per the
//! OpenLCB-over-CAN link specification, plus the message-layer gate that
//! sits on top of it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::watch;

use lcc_core::repr::{build_cc_frame, build_mti_message};
use lcc_core::{EventId, LccFrame, NodeAlias, NodeId, ParsedFrame};

use crate::error::{EngineError, Result};
use crate::FrameSink;

const RESERVATION_WINDOW: Duration = Duration::from_millis(200);
const COLLISION_BACKOFF: Duration = Duration::from_secs(1);
const TRANSMIT_FAILURE_BACKOFF: Duration = Duration::from_secs(2);
const RID_FAILURE_BACKOFF: Duration = Duration::from_millis(500);

/// Alias-reservation control state. This is behavior, not data: the alias
/// value itself lives on [`NodeAlias`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Inhibited,
    Reserving { candidate: NodeAlias },
    Permitted { alias: NodeAlias },
    Collision,
}

impl ControlState {
    pub fn alias(&self) -> Option<NodeAlias> {
        match self {
            ControlState::Permitted { alias } => Some(*alias),
            _ => None,
        }
    }
}

/// Independent message-layer sub-state gated by the control state: only
/// `Initialized` while control state is `Permitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Ready,
    Initialized,
}

/// A cancelable, idempotent-safe wall-clock timer. Canceling (or a
/// late-firing callback whose precondition no longer holds) is always a
/// safe no-op, per Design Note (iii).
#[derive(Default)]
struct Timer {
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Timer {
    fn arm(
        &self,
        runtime: &tokio::runtime::Handle,
        after: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) {
        self.cancel();
        let join_handle = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            callback();
        });
        *self.handle.lock().expect("timer mutex poisoned") = Some(join_handle);
    }

    fn cancel(&self) {
        if let Some(handle) = self.handle.lock().expect("timer mutex poisoned").take() {
            handle.abort();
        }
    }
}

struct Inner {
    node_id: NodeId,
    control_state: ControlState,
    message_state: MessageState,
    alias_to_node: HashMap<NodeAlias, NodeId>,
    rng: ChaCha8Rng,
}

/// The link-layer state machine. Owns the alias reservation sequence, its
/// defence against collisions, the alias ↔ Node ID map, and the
/// message-layer gate that downstream MTI sends go through.
pub struct LinkLayer {
    inner: Mutex<Inner>,
    runtime: tokio::runtime::Handle,
    send: FrameSink,
    advertise_events: Arc<dyn Fn() + Send + Sync>,
    control_tx: watch::Sender<ControlState>,
    reservation_timer: Timer,
    backoff_timer: Timer,
}

fn seed_rng(node_id: &NodeId) -> ChaCha8Rng {
    let mut seed = [0u8; 32];
    for (i, byte) in seed.iter_mut().enumerate() {
        *byte = node_id.as_bytes()[i % 6];
    }
    ChaCha8Rng::from_seed(seed)
}

impl LinkLayer {
    pub fn new(
        node_id: NodeId,
        runtime: tokio::runtime::Handle,
        send: FrameSink,
        advertise_events: Arc<dyn Fn() + Send + Sync>,
    ) -> (Arc<Self>, watch::Receiver<ControlState>) {
        let (control_tx, control_rx) = watch::channel(ControlState::Inhibited);
        let link = Arc::new(Self {
            inner: Mutex::new(Inner {
                rng: seed_rng(&node_id),
                node_id,
                control_state: ControlState::Inhibited,
                message_state: MessageState::Ready,
                alias_to_node: HashMap::new(),
            }),
            runtime,
            send,
            advertise_events,
            control_tx,
            reservation_timer: Timer::default(),
            backoff_timer: Timer::default(),
        });
        (link, control_rx)
    }

    pub fn control_state(&self) -> ControlState {
        self.inner.lock().expect("link mutex poisoned").control_state
    }

    pub fn message_state(&self) -> MessageState {
        self.inner.lock().expect("link mutex poisoned").message_state
    }

    pub fn our_alias(&self) -> Option<NodeAlias> {
        self.control_state().alias()
    }

    /// Change the Node ID this link layer reserves an alias for. If
    /// currently `Permitted`, sends AMR for the old alias first, then
    /// reseeds the PRNG and restarts reservation.
    pub fn update_node_id(self: &Arc<Self>, node_id: NodeId) {
        let previous_alias = {
            let mut inner = self.inner.lock().expect("link mutex poisoned");
            let previous = inner.control_state.alias();
            inner.node_id = node_id;
            inner.rng = seed_rng(&node_id);
            previous
        };
        if let Some(alias) = previous_alias {
            let _ = self.send_cc(LccFrame::AliasMapReset { node_id }, alias);
        }
        self.set_message_state(MessageState::Ready);
        self.reserve_node_alias();
    }

    /// Kick off (or restart) the reservation sequence with a freshly drawn
    /// candidate alias.
    pub fn reserve_node_alias(self: &Arc<Self>) {
        self.reservation_timer.cancel();
        self.backoff_timer.cancel();
        let candidate = {
            let mut inner = self.inner.lock().expect("link mutex poisoned");
            let candidate = draw_candidate(&mut inner.rng);
            inner.control_state = ControlState::Reserving { candidate };
            candidate
        };
        let _ = self.control_tx.send(ControlState::Reserving { candidate });
        self.transmit_cid_sequence(candidate);
    }

    fn transmit_cid_sequence(self: &Arc<Self>, candidate: NodeAlias) {
        let node_id = self.inner.lock().expect("link mutex poisoned").node_id;
        let slices = node_id.cid_slices();
        let sequence_numbers = [7u8, 6, 5, 4];
        for (sequence_number, slice) in sequence_numbers.iter().zip(slices.iter()) {
            let message = LccFrame::CanControlCheckId {
                frame_sequence_number: *sequence_number,
                partial_node_id: *slice,
            };
            if self.send_cc(message, candidate).is_err() {
                self.backoff_then(TRANSMIT_FAILURE_BACKOFF, candidate, true);
                return;
            }
        }
        let link = Arc::clone(self);
        self.reservation_timer.arm(&self.runtime, RESERVATION_WINDOW, move || {
            link.on_reservation_window_elapsed(candidate);
        });
    }

    fn on_reservation_window_elapsed(self: &Arc<Self>, candidate: NodeAlias) {
        let still_reserving = matches!(
            self.inner.lock().expect("link mutex poisoned").control_state,
            ControlState::Reserving { candidate: c } if c == candidate
        );
        if !still_reserving {
            return;
        }
        if self.send_cc(LccFrame::ReserveId, candidate).is_err() {
            self.backoff_then(RID_FAILURE_BACKOFF, candidate, false);
            return;
        }
        if self
            .send_cc(
                LccFrame::AliasMapDefinition {
                    node_id: self.inner.lock().expect("link mutex poisoned").node_id,
                },
                candidate,
            )
            .is_err()
        {
            self.backoff_then(RID_FAILURE_BACKOFF, candidate, false);
            return;
        }
        let mut inner = self.inner.lock().expect("link mutex poisoned");
        inner.control_state = ControlState::Permitted { alias: candidate };
        drop(inner);
        let _ = self.control_tx.send(ControlState::Permitted { alias: candidate });
        self.enter_permitted();
    }

    /// Arm the backoff timer; on expiry, either redraw a candidate
    /// (`redraw == true`, used after a CID collision or transmit failure) or
    /// retry with the same candidate (used after an RID transmit failure).
    fn backoff_then(self: &Arc<Self>, after: Duration, candidate: NodeAlias, redraw: bool) {
        let link = Arc::clone(self);
        self.backoff_timer.arm(&self.runtime, after, move || {
            if redraw {
                link.reserve_node_alias();
            } else {
                link.transmit_cid_sequence(candidate);
            }
        });
    }

    fn enter_permitted(self: &Arc<Self>) {
        let alias = match self.our_alias() {
            Some(alias) => alias,
            None => return,
        };
        let node_id = self.inner.lock().expect("link mutex poisoned").node_id;
        self.set_message_state(MessageState::Initialized);
        let _ = self.send_mti_ungated(
            LccFrame::InitializationComplete { node_id },
            alias,
            None,
        );
        (self.advertise_events)();
    }

    fn set_message_state(&self, state: MessageState) {
        self.inner.lock().expect("link mutex poisoned").message_state = state;
    }

    /// Handle an incoming parsed frame: post-reservation defence and
    /// link-layer query service. Must be called for every frame received,
    /// from the I/O task.
    pub fn handle_frame(self: &Arc<Self>, frame: &ParsedFrame) {
        let our_alias = self.our_alias();
        let reserving_candidate = match self.control_state() {
            ControlState::Reserving { candidate } => Some(candidate),
            _ => None,
        };

        if let Some(candidate) = reserving_candidate {
            if frame.source_alias == candidate {
                self.reservation_timer.cancel();
                self.backoff_then(COLLISION_BACKOFF, candidate, true);
            }
            return;
        }

        let our_alias = match our_alias {
            Some(alias) => alias,
            None => return,
        };

        if frame.source_alias == our_alias {
            let is_check_id = matches!(frame.message, LccFrame::CanControlCheckId { .. });
            if is_check_id {
                let _ = self.send_cc(LccFrame::ReserveId, our_alias);
            } else {
                self.inner.lock().expect("link mutex poisoned").control_state = ControlState::Inhibited;
                let _ = self.control_tx.send(ControlState::Inhibited);
                self.set_message_state(MessageState::Ready);
                let node_id = self.inner.lock().expect("link mutex poisoned").node_id;
                let _ = self.send_cc(LccFrame::AliasMapReset { node_id }, our_alias);
                self.backoff_then(COLLISION_BACKOFF, our_alias, true);
            }
            return;
        }

        match &frame.message {
            LccFrame::AliasMappingEnquiry { node_id } => {
                let our_node_id = self.inner.lock().expect("link mutex poisoned").node_id;
                let matches_us = node_id.is_none() || *node_id == Some(our_node_id);
                if matches_us {
                    let _ = self.send_cc(
                        LccFrame::AliasMapDefinition { node_id: our_node_id },
                        our_alias,
                    );
                }
            }
            LccFrame::AliasMapDefinition { node_id } => {
                let our_node_id = self.inner.lock().expect("link mutex poisoned").node_id;
                if *node_id == our_node_id {
                    let _ = self.emit_event_ungated(EventId::DUPLICATE_NODE_ID_DETECTED, our_alias);
                    self.inner.lock().expect("link mutex poisoned").control_state = ControlState::Collision;
                    let _ = self.control_tx.send(ControlState::Collision);
                } else {
                    self.inner
                        .lock()
                        .expect("link mutex poisoned")
                        .alias_to_node
                        .insert(frame.source_alias, *node_id);
                }
            }
            LccFrame::AliasMapReset { .. } => {
                self.inner
                    .lock()
                    .expect("link mutex poisoned")
                    .alias_to_node
                    .remove(&frame.source_alias);
            }
            LccFrame::VerifiedNodeId { node_id, .. } => {
                self.inner
                    .lock()
                    .expect("link mutex poisoned")
                    .alias_to_node
                    .insert(frame.source_alias, *node_id);
            }
            _ => {}
        }
    }

    /// Look up the Node ID currently mapped to `alias`, if any.
    pub fn node_id_of(&self, alias: NodeAlias) -> Option<NodeId> {
        self.inner
            .lock()
            .expect("link mutex poisoned")
            .alias_to_node
            .get(&alias)
            .copied()
    }

    fn send_cc(&self, message: LccFrame, source_alias: NodeAlias) -> lcc_transport::Result<()> {
        let (id, payload) = build_cc_frame(source_alias, &message);
        (self.send)(id, &payload)
    }

    /// Send an MTI message, subject to the message-layer gate: rejected
    /// (no-op, `Err(EngineError::NotInitialized)`) unless the message state
    /// is `Initialized`, with the sole exception of the messages that drive
    /// the transition into `Initialized` itself.
    pub fn send_mti(
        &self,
        message: LccFrame,
        addressing: Option<(NodeAlias, lcc_core::MultipartFlag)>,
    ) -> Result<()> {
        let alias = self.our_alias().ok_or(EngineError::NotInitialized)?;
        let is_init_message = matches!(
            message,
            LccFrame::InitializationComplete { .. } | LccFrame::InitializationCompleteSimple { .. }
        );
        if self.message_state() != MessageState::Initialized && !is_init_message {
            return Err(EngineError::NotInitialized);
        }
        self.send_mti_ungated(message, alias, addressing)
            .map_err(EngineError::from)
    }

    fn send_mti_ungated(
        &self,
        message: LccFrame,
        alias: NodeAlias,
        addressing: Option<(NodeAlias, lcc_core::MultipartFlag)>,
    ) -> lcc_transport::Result<()> {
        let (id, payload) = build_mti_message(alias, &message, addressing);
        (self.send)(id, &payload)
    }

    /// Emit a Producer/Consumer event report, gated like any other MTI send.
    pub fn emit_event(&self, event_id: EventId) -> Result<()> {
        self.send_mti(LccFrame::ProducerConsumerEventReport { event_id }, None)
    }

    fn emit_event_ungated(&self, event_id: EventId, alias: NodeAlias) -> lcc_transport::Result<()> {
        self.send_mti_ungated(LccFrame::ProducerConsumerEventReport { event_id }, alias, None)
    }
}

fn draw_candidate(rng: &mut ChaCha8Rng) -> NodeAlias {
    loop {
        let candidate = (rng.next_u32() & 0x0FFF) as u16;
        if candidate != 0 {
            return NodeAlias::new(candidate);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_node_id() -> NodeId {
        NodeId::from_bytes(&[0x02, 0x01, 0x0D, 0x00, 0x00, 0x01])
    }

    #[tokio::test(start_paused = true)]
    async fn test_reservation_draws_deterministic_candidate_from_node_id() {
        let sent = Arc::new(Mutex::new(Vec::<u32>::new()));
        let sent_clone = Arc::clone(&sent);
        let sink: FrameSink = Arc::new(move |id: u32, _payload: &[u8]| {
            sent_clone.lock().unwrap().push(id);
            Ok(())
        });
        let runtime = tokio::runtime::Handle::current();
        let (link, mut control_rx) =
            LinkLayer::new(test_node_id(), runtime, sink, Arc::new(|| {}));

        link.reserve_node_alias();
        control_rx.changed().await.unwrap();
        let candidate_a = link.our_alias();
        assert!(candidate_a.is_none());
        let state = link.control_state();
        assert!(matches!(state, ControlState::Reserving { .. }));

        // Re-seeding from the same Node ID must reproduce the same candidate.
        let sink2: FrameSink = Arc::new(|_id, _payload| Ok(()));
        let runtime2 = tokio::runtime::Handle::current();
        let (link2, _rx2) = LinkLayer::new(test_node_id(), runtime2, sink2, Arc::new(|| {}));
        link2.reserve_node_alias();
        assert_eq!(link.control_state(), link2.control_state());
    }

    #[tokio::test(start_paused = true)]
    async fn test_s3_collision_during_reserving_restarts_with_new_candidate() {
        let cid_count = Arc::new(AtomicUsize::new(0));
        let cid_count_clone = Arc::clone(&cid_count);
        let sink: FrameSink = Arc::new(move |_id: u32, _payload: &[u8]| {
            cid_count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let runtime = tokio::runtime::Handle::current();
        let (link, mut control_rx) =
            LinkLayer::new(test_node_id(), runtime, sink, Arc::new(|| {}));

        link.reserve_node_alias();
        control_rx.changed().await.unwrap();
        let candidate = match link.control_state() {
            ControlState::Reserving { candidate } => candidate,
            other => panic!("expected Reserving, got {other:?}"),
        };
        let cid_frames_after_first_attempt = cid_count.load(Ordering::SeqCst);
        assert_eq!(cid_frames_after_first_attempt, 4);

        // Inject a colliding frame.
        link.handle_frame(&ParsedFrame {
            source_alias: candidate,
            destination_alias: None,
            multipart: None,
            message: LccFrame::ProducerConsumerEventReport {
                event_id: EventId::from_bytes(&[0; 8]),
            },
        });

        // Reservation restarts after a 1s backoff, not immediately.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(cid_count.load(Ordering::SeqCst), cid_frames_after_first_attempt);

        tokio::time::advance(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;
        assert_eq!(cid_count.load(Ordering::SeqCst), cid_frames_after_first_attempt + 4);

        let new_candidate = match link.control_state() {
            ControlState::Reserving { candidate } => candidate,
            other => panic!("expected Reserving, got {other:?}"),
        };
        assert_ne!(new_candidate, candidate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reservation_completes_to_permitted() {
        let sink: FrameSink = Arc::new(|_id, _payload| Ok(()));
        let runtime = tokio::runtime::Handle::current();
        let advertised = Arc::new(AtomicUsize::new(0));
        let advertised_clone = Arc::clone(&advertised);
        let (link, mut control_rx) = LinkLayer::new(
            test_node_id(),
            runtime,
            sink,
            Arc::new(move || {
                advertised_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        link.reserve_node_alias();
        control_rx.changed().await.unwrap();
        tokio::time::advance(RESERVATION_WINDOW + Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        control_rx.changed().await.unwrap();

        assert!(matches!(link.control_state(), ControlState::Permitted { .. }));
        assert_eq!(link.message_state(), MessageState::Initialized);
        assert_eq!(advertised.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gate_rejects_non_init_mti_before_permitted() {
        let sink: FrameSink = Arc::new(|_id, _payload| Ok(()));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (link, _rx) =
            LinkLayer::new(test_node_id(), runtime.handle().clone(), sink, Arc::new(|| {}));
        let result = link.emit_event(EventId::from_bytes(&[0; 8]));
        assert!(matches!(result, Err(EngineError::NotInitialized)));
    }
}
