use crate::error::{Resource, WalkError};

/// Default ceiling for a decision stream.
pub const DEFAULT_STREAM_CAPACITY: usize = 65536;

/// The byte sequence that fully determines a generated file.
///
/// In generate mode decisions are read from it; in parse mode (and when generation
/// decodes already materialized bytes) the decisions that reproduce the file are written
/// back at the cursor. Either way the cursor advances by the same amount, which keeps the
/// two directions in lockstep.
#[derive(Debug, Clone)]
pub struct DecisionStream {
    bytes: Vec<u8>,
    pos: usize,
    capacity: usize,
}

impl DecisionStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::new(),
            pos: 0,
            capacity,
        }
    }

    /// Resets the stream to `bytes` with the cursor at the start.
    pub fn seed(&mut self, bytes: Vec<u8>) -> Result<(), WalkError> {
        if bytes.len() > self.capacity {
            return Err(WalkError::CapacityExceeded {
                resource: Resource::DecisionStream,
                limit: self.capacity,
            });
        }
        self.bytes = bytes;
        self.pos = 0;
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The decisions consumed so far.
    pub fn consumed(&self) -> &[u8] {
        &self.bytes[..self.pos]
    }

    /// Reads `n` decision bytes as a little-endian integer.
    pub fn take_le(&mut self, n: usize) -> Result<u64, WalkError> {
        debug_assert!(n <= 8);
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(WalkError::CapacityExceeded {
                resource: Resource::DecisionStream,
                limit: self.bytes.len(),
            });
        }
        let value = self.bytes[self.pos..end]
            .iter()
            .rev()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        self.pos = end;
        Ok(value)
    }

    /// Writes the low `n` bytes of `value` little-endian at the cursor, overwriting or
    /// extending the stream.
    pub fn put_le(&mut self, value: u64, n: usize) -> Result<(), WalkError> {
        debug_assert!(n <= 8);
        let end = self.pos + n;
        if end > self.capacity {
            return Err(WalkError::CapacityExceeded {
                resource: Resource::DecisionStream,
                limit: self.capacity,
            });
        }
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[self.pos..end].copy_from_slice(&value.to_le_bytes()[..n]);
        self.pos = end;
        Ok(())
    }

    /// Replaces everything from `at` onwards with `tail`, truncated to capacity.
    pub fn replace_tail(&mut self, at: usize, tail: &[u8]) {
        self.bytes.truncate(at);
        let room = self.capacity.saturating_sub(at);
        self.bytes.extend_from_slice(&tail[..tail.len().min(room)]);
    }
}
