//! Accumulates written bytes and carves them into part payloads.

use bytes::{Bytes, BytesMut};

/// Buffer that turns an arbitrary sequence of writes into fixed size parts.
///
/// Bytes leave the buffer in the order they were appended. Every emitted part
/// is exactly `part_size` long except the one produced by [`PartBuffer::flush`].
#[derive(Debug)]
pub struct PartBuffer {
    pending: BytesMut,
    part_size: usize,
    emitted: usize,
    total: u64,
}

impl PartBuffer {
    pub fn new(part_size: usize) -> Self {
        assert!(part_size > 0, "part size must be positive");
        Self {
            pending: BytesMut::new(),
            part_size,
            emitted: 0,
            total: 0,
        }
    }

    /// Append data, returning every part that became complete.
    pub fn append(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.total += data.len() as u64;
        self.pending.extend_from_slice(data);

        let mut parts = Vec::new();
        while self.pending.len() >= self.part_size {
            parts.push(self.pending.split_to(self.part_size).freeze());
        }
        self.emitted += parts.len();
        parts
    }

    /// Drain the remaining bytes as the final part.
    ///
    /// A buffer that never emitted anything yields one empty part, so an
    /// empty input still produces a single-part upload.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() && self.emitted > 0 {
            return None;
        }
        self.emitted += 1;
        Some(self.pending.split().freeze())
    }

    /// Number of bytes waiting for the next part
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Number of bytes appended since creation
    pub fn total_bytes(&self) -> u64 {
        self.total
    }
}
