//! Pending-response registry: predicate-keyed one-shot waiters resolved from
//! the I/O task.
//!
//! Modeled as an ordered `Vec` of `(id, predicate, slot)` triples behind one
//! mutex rather than a map keyed by predicate identity, since closures have
//! no stable identity to key on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lcc_core::{NodeAlias, ParsedFrame};
use tokio::sync::oneshot;

pub type Predicate = Box<dyn Fn(&ParsedFrame) -> bool + Send>;

struct Waiter {
    id: u64,
    predicate: Predicate,
    slot: oneshot::Sender<ParsedFrame>,
}

#[derive(Default)]
pub struct PendingResponseRegistry {
    waiters: Mutex<Vec<Waiter>>,
    next_id: AtomicU64,
}

/// Handle returned by [`PendingResponseRegistry::add`]. Dropping it without
/// calling [`PendingResponseRegistry::remove`] leaves the waiter installed;
/// callers that cancel an in-flight operation must remove it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterHandle(u64);

impl PendingResponseRegistry {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Install a new predicate and return the handle plus the receiving end
    /// of its one-shot slot.
    pub fn add(&self, predicate: Predicate) -> (WaiterHandle, oneshot::Receiver<ParsedFrame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().expect("registry mutex poisoned").push(Waiter {
            id,
            predicate,
            slot: tx,
        });
        (WaiterHandle(id), rx)
    }

    /// Drop an entry even if it was never fulfilled. Used when an operation
    /// is canceled or times out.
    pub fn remove(&self, handle: WaiterHandle) {
        let mut waiters = self.waiters.lock().expect("registry mutex poisoned");
        waiters.retain(|w| w.id != handle.0);
    }

    /// Offer a freshly parsed frame to every installed predicate. The first
    /// match is fulfilled and removed; a fulfilled slot whose receiver was
    /// already dropped (a canceled caller) is discarded silently. Must be
    /// called only from the I/O task.
    pub fn dispatch(&self, frame: &ParsedFrame) {
        let mut waiters = self.waiters.lock().expect("registry mutex poisoned");
        if let Some(pos) = waiters.iter().position(|w| (w.predicate)(frame)) {
            let waiter = waiters.remove(pos);
            let _ = waiter.slot.send(frame.clone());
        }
    }
}

/// Matches `DatagramReceivedOk` or `DatagramRejected` from `responder`
/// addressed to `requestor`.
pub fn datagram_response_filter(requestor: NodeAlias, responder: NodeAlias) -> Predicate {
    Box::new(move |frame: &ParsedFrame| {
        frame.source_alias == responder
            && frame.destination_alias == Some(requestor)
            && matches!(
                frame.message,
                lcc_core::LccFrame::DatagramReceivedOk | lcc_core::LccFrame::DatagramRejected
            )
    })
}

/// Matches a datagram from `responder` to `requestor` whose inner
/// memory-configuration `command` equals the computed reply command for
/// `request_command` under the protocol-defined mask.
pub fn memory_config_response_filter(
    request_command: u8,
    requestor: NodeAlias,
    responder: NodeAlias,
) -> Predicate {
    let (expected_reply, mask) = expected_reply_command(request_command);
    Box::new(move |frame: &ParsedFrame| {
        if frame.source_alias != responder || frame.destination_alias != Some(requestor) {
            return false;
        }
        let (protocol_type, first_byte) = match &frame.message {
            lcc_core::LccFrame::Datagram { protocol_type, body } => (*protocol_type, body.first().copied()),
            lcc_core::LccFrame::DatagramComplete { protocol_type, body } => {
                (*protocol_type, body.first().copied())
            }
            _ => return false,
        };
        protocol_type == 0x20
            && first_byte
                .map(|command| command & mask == expected_reply & mask)
                .unwrap_or(false)
    })
}

/// The reply `command` byte and comparison mask for a given memory-config
/// request command: `req+0x10` for reads/writes under `0xF0`, `0x82` for
/// options under `0xFF`, `0x86` for address-space-info under `0xFE`, `0x8A`
/// for lock and `0x8D` for unique-id under `0xFF`.
fn expected_reply_command(request_command: u8) -> (u8, u8) {
    use lcc_core::memcfg;
    match request_command {
        memcfg::GET_OPTIONS => (memcfg::GET_OPTIONS_REPLY, 0xFF),
        memcfg::GET_ADDRESS_SPACE_INFO => (memcfg::GET_ADDRESS_SPACE_INFO_REPLY_ABSENT, 0xFE),
        memcfg::LOCK => (memcfg::LOCK_REPLY, 0xFF),
        memcfg::GET_UNIQUE_ID => (memcfg::GET_UNIQUE_ID_REPLY, 0xFF),
        read if (memcfg::READ..=0x43).contains(&read) => (read + 0x10, 0xF0),
        write if (memcfg::WRITE..=0x03).contains(&write) => (write + 0x10, 0xF0),
        other => (other + 0x10, 0xF0),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use lcc_core::LccFrame;

    fn frame(source: u16, destination: Option<u16>, message: LccFrame) -> ParsedFrame {
        ParsedFrame {
            source_alias: NodeAlias::new(source),
            destination_alias: destination.map(NodeAlias::new),
            multipart: None,
            message,
        }
    }

    #[tokio::test]
    async fn test_first_matching_predicate_fulfills_once() {
        let registry = PendingResponseRegistry::new();
        let (_handle, rx) = registry.add(datagram_response_filter(
            NodeAlias::new(0x777),
            NodeAlias::new(0x555),
        ));

        registry.dispatch(&frame(0x555, Some(0x777), LccFrame::DatagramReceivedOk));
        let resolved = rx.await.unwrap();
        assert_eq!(resolved.source_alias, NodeAlias::new(0x555));
    }

    #[tokio::test]
    async fn test_non_matching_frame_leaves_waiter_installed() {
        let registry = PendingResponseRegistry::new();
        let (_handle, rx) = registry.add(datagram_response_filter(
            NodeAlias::new(0x777),
            NodeAlias::new(0x555),
        ));

        registry.dispatch(&frame(0x999, Some(0x777), LccFrame::DatagramReceivedOk));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remove_drops_unfulfilled_waiter() {
        let registry = PendingResponseRegistry::new();
        let (handle, rx) = registry.add(datagram_response_filter(
            NodeAlias::new(0x777),
            NodeAlias::new(0x555),
        ));
        registry.remove(handle);
        registry.dispatch(&frame(0x555, Some(0x777), LccFrame::DatagramReceivedOk));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_memory_config_reply_command_mapping() {
        assert_eq!(expected_reply_command(lcc_core::memcfg::READ), (0x50, 0xF0));
        assert_eq!(
            expected_reply_command(lcc_core::memcfg::GET_OPTIONS),
            (0x82, 0xFF)
        );
        assert_eq!(
            expected_reply_command(lcc_core::memcfg::GET_ADDRESS_SPACE_INFO),
            (0x86, 0xFE)
        );
    }
}
