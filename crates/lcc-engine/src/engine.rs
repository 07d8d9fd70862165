//! The top-level handle applications hold: owns the transport connection,
//! the dedicated runtime that drives link-layer timers, and the I/O
//! callback that feeds every received frame through reassembly, the
//! link layer, the pending-response registry and an optional observer.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};

use lcc_core::memcfg;
use lcc_core::snip::SimpleNodeInformation;
use lcc_core::{frame, mti, EventId, LccFrame, NodeAlias, NodeId, ParsedFrame};
use lcc_transport::{CanFrame, CanTransport};

use crate::api::{Api, DatagramOutcome};
use crate::error::{EngineError, Result};
use crate::link::{ControlState, LinkLayer, MessageState};
use crate::reassembly::{Reassembled, ReassemblyBuffers};
use crate::registry::{Predicate, PendingResponseRegistry};
use crate::FrameSink;

type TransportSlot = Arc<Mutex<Option<Box<dyn CanTransport + Send>>>>;
type FrameObserver = Arc<Mutex<Option<Box<dyn Fn(&ParsedFrame) + Send + Sync>>>>;

/// Owns the link-layer state machine, the request/response API and the
/// transport connection. Nothing here is generic over the transport type;
/// [`Engine::set_connection`] accepts anything implementing
/// [`CanTransport`] and boxes it, since a host holds exactly one `Engine`
/// for exactly one physical connection at a time.
pub struct Engine {
    link: Arc<LinkLayer>,
    registry: Arc<PendingResponseRegistry>,
    api: Arc<Api>,
    transport: TransportSlot,
    frame_observer: FrameObserver,
    control_rx: watch::Receiver<ControlState>,
    driver: Option<std::thread::JoinHandle<()>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Engine {
    /// Build an engine for `node_id`. The link layer starts `Inhibited`;
    /// call [`Engine::set_connection`] and then [`Engine::reserve_node_alias`]
    /// to bring it up.
    pub fn new(node_id: NodeId) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| EngineError::ProtocolError(format!("failed to start engine runtime: {source}")))?;
        let handle = runtime.handle().clone();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = std::thread::Builder::new()
            .name("lcc-engine-io".into())
            .spawn(move || {
                // A current-thread runtime only makes progress while
                // something drives it; this thread's only job is to keep
                // doing that until shutdown fires, so link-layer timers
                // (CID/RID retries, backoff) fire even with no caller
                // awaiting an API method.
                let _ = runtime.block_on(shutdown_rx);
            })
            .expect("failed to spawn lcc-engine I/O thread");

        let transport: TransportSlot = Arc::new(Mutex::new(None));
        let sink_transport = Arc::clone(&transport);
        let send: FrameSink = Arc::new(move |id: u32, data: &[u8]| {
            let mut guard = sink_transport.lock().expect("transport mutex poisoned");
            match guard.as_mut() {
                Some(transport) => transport.send(&CanFrame::new(id, data)),
                None => Err(lcc_transport::TransportError::NotConnected),
            }
        });

        let (link, control_rx) = LinkLayer::new(node_id, handle, send.clone(), Arc::new(|| {}));
        let registry = Arc::new(PendingResponseRegistry::new());
        let api = Arc::new(Api::new(Arc::clone(&link), Arc::clone(&registry), send));

        Ok(Self {
            link,
            registry,
            api,
            transport,
            frame_observer: Arc::new(Mutex::new(None)),
            control_rx,
            driver: Some(driver),
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    /// Connect `transport` and start feeding its received frames through
    /// this engine. Replaces any previously set connection.
    pub fn set_connection(&self, mut transport: Box<dyn CanTransport + Send>) -> Result<()> {
        transport.connect()?;

        let link = Arc::clone(&self.link);
        let registry = Arc::clone(&self.registry);
        let observer = Arc::clone(&self.frame_observer);
        let reassembly = RefCell::new(ReassemblyBuffers::new());

        transport.start(Box::new(move |can_frame: CanFrame| {
            dispatch_frame(&link, &registry, &observer, &reassembly, can_frame);
        }))?;

        *self.transport.lock().expect("transport mutex poisoned") = Some(transport);
        Ok(())
    }

    /// Disconnect and drop the current transport, if any.
    pub fn disconnect(&self) -> Result<()> {
        if let Some(mut transport) = self.transport.lock().expect("transport mutex poisoned").take() {
            transport.join();
            transport.disconnect()?;
        }
        Ok(())
    }

    /// Register a callback invoked for every fully-parsed frame (after
    /// reassembly), in addition to the link layer and pending-response
    /// registry. Replaces any previously registered callback.
    pub fn set_frame_callback(&self, callback: impl Fn(&ParsedFrame) + Send + Sync + 'static) {
        *self.frame_observer.lock().expect("frame observer mutex poisoned") = Some(Box::new(callback));
    }

    /// Subscribe to control-state transitions (`Inhibited` → `Reserving` →
    /// `Permitted`, or `Collision`).
    pub fn control_state_receiver(&self) -> watch::Receiver<ControlState> {
        self.control_rx.clone()
    }

    pub fn control_state(&self) -> ControlState {
        self.link.control_state()
    }

    pub fn message_state(&self) -> MessageState {
        self.link.message_state()
    }

    pub fn our_alias(&self) -> Option<NodeAlias> {
        self.link.our_alias()
    }

    pub fn node_id_of(&self, alias: NodeAlias) -> Option<NodeId> {
        self.link.node_id_of(alias)
    }

    /// Change the Node ID this engine reserves an alias for.
    pub fn update_node_id(&self, node_id: NodeId) {
        self.link.update_node_id(node_id);
    }

    /// Kick off (or restart) alias reservation.
    pub fn reserve_node_alias(&self) {
        self.link.reserve_node_alias();
    }

    /// Emit a Producer/Consumer event report. Rejected with
    /// `EngineError::NotInitialized` before the message layer reaches
    /// `Initialized`.
    pub fn emit_event(&self, event_id: EventId) -> Result<()> {
        self.link.emit_event(event_id)
    }

    pub async fn protocol_support_inquiry(&self, dst: NodeAlias) -> Result<lcc_core::ProtocolSupport> {
        self.api.protocol_support_inquiry(dst).await
    }

    pub async fn simple_node_information(&self, dst: NodeAlias) -> Result<SimpleNodeInformation> {
        self.api.simple_node_information(dst).await
    }

    pub async fn send_datagram(
        &self,
        dst: NodeAlias,
        protocol_type: u8,
        payload: &[u8],
        expected_response: Option<Predicate>,
    ) -> Result<DatagramOutcome> {
        self.api.send_datagram(dst, protocol_type, payload, expected_response).await
    }

    pub async fn read_memory_configuration_block(
        &self,
        dst: NodeAlias,
        space: u8,
        addr: u32,
        size: u8,
    ) -> Result<Vec<u8>> {
        self.api.read_memory_configuration_block(dst, space, addr, size).await
    }

    pub async fn read_memory_configuration(
        &self,
        dst: NodeAlias,
        space: u8,
        addr: u32,
        size: u32,
        progress: impl FnMut(u32),
    ) -> Result<Vec<u8>> {
        self.api.read_memory_configuration(dst, space, addr, size, progress).await
    }

    pub async fn write_memory_configuration_block(
        &self,
        dst: NodeAlias,
        space: u8,
        addr: u32,
        data: &[u8],
    ) -> Result<()> {
        self.api.write_memory_configuration_block(dst, space, addr, data).await
    }

    pub async fn write_memory_configuration(
        &self,
        dst: NodeAlias,
        space: u8,
        addr: u32,
        data: &[u8],
        progress: impl FnMut(u32),
    ) -> Result<()> {
        self.api.write_memory_configuration(dst, space, addr, data, progress).await
    }

    pub async fn read_memory_options(&self, dst: NodeAlias) -> Result<memcfg::MemoryConfigurationOptions> {
        self.api.read_memory_options(dst).await
    }

    pub async fn read_cdi(&self, dst: NodeAlias, progress: impl FnMut(u32)) -> Result<Vec<u8>> {
        self.api.read_cdi(dst, progress).await
    }

    /// Disconnect the transport (if any) and stop the I/O-driving thread,
    /// blocking until it exits.
    pub fn join(&mut self) {
        let _ = self.disconnect();
        if let Some(shutdown) = self.shutdown.lock().expect("shutdown mutex poisoned").take() {
            let _ = shutdown.send(());
        }
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.join();
    }
}

/// Feed one received CAN frame through reassembly and dispatch. Runs on
/// the transport's own background thread (see `CanTransport::start`), not
/// on the engine's internal runtime, so everything here is synchronous.
fn dispatch_frame(
    link: &Arc<LinkLayer>,
    registry: &PendingResponseRegistry,
    observer: &FrameObserver,
    reassembly: &RefCell<ReassemblyBuffers>,
    can_frame: CanFrame,
) {
    let id_bytes = can_frame.id.to_be_bytes();
    let raw = frame::Frame::new_unchecked(&id_bytes[..]);

    if !raw.is_openlcb_message() {
        return deliver(link, registry, observer, lcc_core::parse(can_frame.id, &can_frame.data));
    }

    let frame_type = raw.frame_type();
    let source_alias = NodeAlias::new(raw.source_alias());

    if frame_type == 1 && mti::is_addressed(raw.variable_field()) {
        if let Some((destination_alias, multipart, fragment)) =
            lcc_core::repr::split_addressed_mti(&can_frame.data)
        {
            match reassembly
                .borrow_mut()
                .feed_addressed_mti(source_alias, destination_alias, multipart, fragment)
            {
                Reassembled::Pending => return,
                Reassembled::Complete(body) => {
                    let mut full = Vec::with_capacity(2 + body.len());
                    full.push((destination_alias.value() >> 8) as u8);
                    full.push((destination_alias.value() & 0xFF) as u8);
                    full.extend_from_slice(&body);
                    return deliver(link, registry, observer, lcc_core::parse(can_frame.id, &full));
                }
            }
        }
    }

    let parsed = lcc_core::parse(can_frame.id, &can_frame.data);

    if (2..=5).contains(&frame_type) {
        if let (Some(destination_alias), Some(multipart)) = (parsed.destination_alias, parsed.multipart) {
            // `lcc_core::parse` strips what it thinks is `protocol_type` off every
            // datagram frame, not just the first one of a sequence, so a middle or
            // last frame's stripped body is missing its genuine leading data byte.
            // Reassemble from each frame's untouched `data` instead, and take
            // `protocol_type` from the reassembled buffer's own first byte.
            match reassembly.borrow_mut().feed_datagram(
                parsed.source_alias,
                destination_alias,
                multipart,
                &can_frame.data,
            ) {
                Reassembled::Pending => return,
                Reassembled::Complete(mut full) => {
                    if full.is_empty() {
                        return;
                    }
                    let protocol_type = full.remove(0);
                    let complete = ParsedFrame {
                        source_alias: parsed.source_alias,
                        destination_alias: Some(destination_alias),
                        multipart: None,
                        message: LccFrame::DatagramComplete {
                            protocol_type,
                            body: full,
                        },
                    };
                    return deliver(link, registry, observer, complete);
                }
            }
        }
    }

    deliver(link, registry, observer, parsed);
}

fn deliver(link: &Arc<LinkLayer>, registry: &PendingResponseRegistry, observer: &FrameObserver, frame: ParsedFrame) {
    link.handle_frame(&frame);
    registry.dispatch(&frame);
    if let Some(callback) = observer.lock().expect("frame observer mutex poisoned").as_ref() {
        callback(&frame);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullTransport {
        on_frame: Option<Box<dyn FnMut(CanFrame) + Send>>,
    }

    impl CanTransport for NullTransport {
        fn connect(&mut self) -> lcc_transport::Result<()> {
            Ok(())
        }
        fn send(&mut self, _frame: &CanFrame) -> lcc_transport::Result<()> {
            Ok(())
        }
        fn receive(&mut self) -> lcc_transport::Result<Option<CanFrame>> {
            Ok(None)
        }
        fn disconnect(&mut self) -> lcc_transport::Result<()> {
            Ok(())
        }
        fn start(&mut self, on_frame: Box<dyn FnMut(CanFrame) + Send>) -> lcc_transport::Result<()> {
            self.on_frame = Some(on_frame);
            Ok(())
        }
        fn join(&mut self) {}
    }

    fn test_node_id() -> NodeId {
        NodeId::from_bytes(&[0x02, 0x01, 0x0D, 0x00, 0x00, 0x02])
    }

    #[test]
    fn test_engine_starts_inhibited_and_reports_no_alias() {
        let engine = Engine::new(test_node_id()).unwrap();
        assert_eq!(engine.control_state(), ControlState::Inhibited);
        assert!(engine.our_alias().is_none());
    }

    #[test]
    fn test_set_connection_without_reserving_leaves_link_inhibited() {
        let mut engine = Engine::new(test_node_id()).unwrap();
        engine
            .set_connection(Box::new(NullTransport { on_frame: None }))
            .unwrap();
        assert_eq!(engine.control_state(), ControlState::Inhibited);
        engine.join();
    }

    #[test]
    fn test_frame_callback_fires_for_complete_single_frame_message() {
        let mut engine = Engine::new(test_node_id()).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        engine.set_frame_callback(move |_frame| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        let link = Arc::clone(&engine.link);
        let registry = Arc::clone(&engine.registry);
        let observer = Arc::clone(&engine.frame_observer);
        let reassembly = RefCell::new(ReassemblyBuffers::new());

        let id = frame::openlcb_id(1, mti::PRODUCER_CONSUMER_EVENT_REPORT, 0x123);
        let event_bytes = [0u8; 8];
        dispatch_frame(&link, &registry, &observer, &reassembly, CanFrame::new(id, &event_bytes));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        engine.join();
    }

    #[test]
    fn test_multi_frame_datagram_reassembles_before_delivery() {
        let mut engine = Engine::new(test_node_id()).unwrap();
        let seen: Arc<Mutex<Vec<ParsedFrame>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        engine.set_frame_callback(move |frame| {
            seen_clone.lock().unwrap().push(frame.clone());
        });

        let link = Arc::clone(&engine.link);
        let registry = Arc::clone(&engine.registry);
        let observer = Arc::clone(&engine.frame_observer);
        let reassembly = RefCell::new(ReassemblyBuffers::new());

        let destination = 0x555u16;
        let source = 0x777u16;
        let protocol_type = 0x20u8;
        let payload: Vec<u8> = (0..20u8).collect();
        let mut body = vec![protocol_type];
        body.extend_from_slice(&payload);
        let chunks: Vec<&[u8]> = body.chunks(8).collect();

        let frame_types = [3u8, 4, 5];
        for (frame_type, chunk) in frame_types.iter().zip(chunks.iter()) {
            let id = frame::openlcb_id(*frame_type, destination, source);
            dispatch_frame(&link, &registry, &observer, &reassembly, CanFrame::new(id, chunk));
        }

        let delivered = seen.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        match &delivered[0].message {
            LccFrame::DatagramComplete { protocol_type: pt, body: full } => {
                assert_eq!(*pt, protocol_type);
                assert_eq!(full, &payload);
            }
            other => panic!("expected DatagramComplete, got {other:?}"),
        }
        engine.join();
    }
}
