//! Multi-frame reassembly for addressed MTI messages and datagrams.
//!
//! Owned exclusively by the engine's I/O task: never shared across threads,
//! never locked. Two independent buffers, keyed by `(source_alias,
//! destination_alias)`, because the two channels never interleave with each
//! other on the wire.

use std::collections::HashMap;

use lcc_core::{MultipartFlag, NodeAlias};

type Key = (NodeAlias, NodeAlias);

#[derive(Debug, Default)]
pub struct ReassemblyBuffers {
    addressed_mti: HashMap<Key, Vec<u8>>,
    datagram: HashMap<Key, Vec<u8>>,
}

/// Outcome of feeding one frame's worth of bytes into a reassembly buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembled {
    /// The message isn't complete yet; nothing to deliver.
    Pending,
    /// The message is complete; here are all its bytes in wire order.
    Complete(Vec<u8>),
}

impl ReassemblyBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_addressed_mti(
        &mut self,
        source: NodeAlias,
        destination: NodeAlias,
        multipart: MultipartFlag,
        chunk: &[u8],
    ) -> Reassembled {
        feed(&mut self.addressed_mti, (source, destination), multipart, chunk)
    }

    pub fn feed_datagram(
        &mut self,
        source: NodeAlias,
        destination: NodeAlias,
        multipart: MultipartFlag,
        chunk: &[u8],
    ) -> Reassembled {
        feed(&mut self.datagram, (source, destination), multipart, chunk)
    }
}

/// Shared logic for both buffers. `first`/`only` start (or restart) the
/// entry; `middle` appends; `last` appends and delivers, dropping the entry.
/// A stray `last` with no prior entry is best-effort: deliver only its own
/// bytes, matching the "receiving a first while an entry exists overwrites
/// it" and "stray last delivers just itself" rules.
fn feed(
    buffers: &mut HashMap<Key, Vec<u8>>,
    key: Key,
    multipart: MultipartFlag,
    chunk: &[u8],
) -> Reassembled {
    match multipart {
        MultipartFlag::Only => Reassembled::Complete(chunk.to_vec()),
        MultipartFlag::First => {
            buffers.insert(key, chunk.to_vec());
            Reassembled::Pending
        }
        MultipartFlag::Middle => {
            buffers.entry(key).or_default().extend_from_slice(chunk);
            Reassembled::Pending
        }
        MultipartFlag::Last => {
            let mut data = buffers.remove(&key).unwrap_or_default();
            data.extend_from_slice(chunk);
            Reassembled::Complete(data)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_s5_multi_frame_datagram_reassembly() {
        let mut buffers = ReassemblyBuffers::new();
        let src = NodeAlias::new(0x777);
        let dst = NodeAlias::new(0x555);
        let payload: Vec<u8> = (0..20u8).collect();

        let chunks: Vec<&[u8]> = payload.chunks(8).collect();
        assert_eq!(chunks.len(), 3);

        assert_eq!(
            buffers.feed_datagram(src, dst, MultipartFlag::First, chunks[0]),
            Reassembled::Pending
        );
        assert_eq!(
            buffers.feed_datagram(src, dst, MultipartFlag::Middle, chunks[1]),
            Reassembled::Pending
        );
        assert_eq!(
            buffers.feed_datagram(src, dst, MultipartFlag::Last, chunks[2]),
            Reassembled::Complete(payload.clone())
        );
    }

    #[test]
    fn test_entry_dropped_after_delivery() {
        let mut buffers = ReassemblyBuffers::new();
        let src = NodeAlias::new(0x1);
        let dst = NodeAlias::new(0x2);
        buffers.feed_addressed_mti(src, dst, MultipartFlag::First, &[1, 2]);
        buffers.feed_addressed_mti(src, dst, MultipartFlag::Last, &[3, 4]);
        assert!(buffers.addressed_mti.is_empty());
    }

    #[test]
    fn test_first_while_entry_exists_overwrites() {
        let mut buffers = ReassemblyBuffers::new();
        let src = NodeAlias::new(0x1);
        let dst = NodeAlias::new(0x2);
        buffers.feed_addressed_mti(src, dst, MultipartFlag::First, &[0xFF, 0xFF]);
        buffers.feed_addressed_mti(src, dst, MultipartFlag::First, &[1, 2]);
        let result = buffers.feed_addressed_mti(src, dst, MultipartFlag::Last, &[3, 4]);
        assert_eq!(result, Reassembled::Complete(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_stray_last_delivers_only_itself() {
        let mut buffers = ReassemblyBuffers::new();
        let src = NodeAlias::new(0x1);
        let dst = NodeAlias::new(0x2);
        let result = buffers.feed_addressed_mti(src, dst, MultipartFlag::Last, &[9, 9]);
        assert_eq!(result, Reassembled::Complete(vec![9, 9]));
    }

    #[test]
    fn test_distinct_pairs_interleave_independently() {
        let mut buffers = ReassemblyBuffers::new();
        let a = (NodeAlias::new(0x1), NodeAlias::new(0x2));
        let b = (NodeAlias::new(0x3), NodeAlias::new(0x4));
        buffers.feed_addressed_mti(a.0, a.1, MultipartFlag::First, &[1]);
        buffers.feed_addressed_mti(b.0, b.1, MultipartFlag::First, &[2]);
        let a_done = buffers.feed_addressed_mti(a.0, a.1, MultipartFlag::Last, &[3]);
        let b_done = buffers.feed_addressed_mti(b.0, b.1, MultipartFlag::Last, &[4]);
        assert_eq!(a_done, Reassembled::Complete(vec![1, 3]));
        assert_eq!(b_done, Reassembled::Complete(vec![2, 4]));
    }
}
