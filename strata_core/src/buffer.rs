use crate::error::{Resource, WalkError};
use std::ops::Range;

/// Default ceiling for a generated file.
pub const DEFAULT_FILE_CAPACITY: usize = 4096;

/// State of a byte range with respect to the current walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// No byte of the range has been produced or examined yet.
    Fresh,
    /// Every byte of the range was already fixed by an earlier primitive.
    Materialized,
    /// Some bytes are fixed and some are not.
    Mixed,
}

/// The materialized file.
///
/// In generate mode `bytes` grows as primitives emit data; in parse mode it holds the
/// input being validated. In both modes a per-byte map records which bytes earlier
/// primitives have already fixed, and `size` is the high-water mark of that map.
#[derive(Debug, Clone)]
pub struct FileBuffer {
    bytes: Vec<u8>,
    materialized: Vec<bool>,
    cursor: usize,
    size: usize,
    capacity: usize,
    input_len: Option<usize>,
}

impl FileBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::new(),
            materialized: Vec::new(),
            cursor: 0,
            size: 0,
            capacity,
            input_len: None,
        }
    }

    /// Prepares an empty buffer for generation.
    pub fn seed_output(&mut self) {
        self.bytes.clear();
        self.materialized.clear();
        self.cursor = 0;
        self.size = 0;
        self.input_len = None;
    }

    /// Loads `input` for parsing.
    pub fn seed_input(&mut self, input: Vec<u8>) {
        self.materialized = vec![false; input.len()];
        self.input_len = Some(input.len());
        self.bytes = input;
        self.cursor = 0;
        self.size = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, pos: usize) {
        self.cursor = pos;
    }

    /// High-water mark of materialized bytes: the logical file size so far.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Length of the parse input, `None` while generating.
    pub fn input_len(&self) -> Option<usize> {
        self.input_len
    }

    /// Highest offset a primitive may touch: the input length when parsing, the capacity
    /// when generating.
    pub fn limit(&self) -> usize {
        self.input_len.unwrap_or(self.capacity)
    }

    pub fn region(&self, pos: usize, len: usize) -> Region {
        if len == 0 {
            return Region::Materialized;
        }
        let end = (pos + len).min(self.materialized.len());
        let fixed = if pos >= end {
            0
        } else {
            self.materialized[pos..end].iter().filter(|m| **m).count()
        };
        match fixed {
            0 => Region::Fresh,
            n if n == len => Region::Materialized,
            _ => Region::Mixed,
        }
    }

    /// Whether any byte at or after `pos` is materialized.
    pub fn materialized_from(&self, pos: usize) -> bool {
        self.size > pos
    }

    pub fn slice(&self, range: Range<usize>) -> Option<&[u8]> {
        self.bytes.get(range)
    }

    /// Copies `data` to `pos`, growing the buffer up to its capacity.
    pub fn write(&mut self, pos: usize, data: &[u8]) -> Result<(), WalkError> {
        let end = pos + data.len();
        if end > self.capacity {
            return Err(WalkError::CapacityExceeded {
                resource: Resource::FileBuffer,
                limit: self.capacity,
            });
        }
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
            self.materialized.resize(end, false);
        }
        self.bytes[pos..end].copy_from_slice(data);
        self.mark(pos, data.len());
        Ok(())
    }

    /// Records `pos..pos + len` as materialized without changing the bytes.
    pub fn mark(&mut self, pos: usize, len: usize) {
        let end = pos + len;
        if end > self.materialized.len() {
            self.materialized.resize(end, false);
            self.bytes.resize(end, 0);
        }
        self.materialized[pos..end].iter_mut().for_each(|m| *m = true);
        self.size = self.size.max(end);
    }

    /// The generated file, or the parsed prefix of the input.
    pub fn into_output(mut self) -> Vec<u8> {
        if self.input_len.is_none() {
            self.bytes.truncate(self.size);
        }
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_track_materialized_bytes() {
        let mut buffer = FileBuffer::new(32);
        buffer.seed_output();
        buffer.write(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.size(), 8);
        assert_eq!(buffer.region(0, 4), Region::Fresh);
        assert_eq!(buffer.region(4, 4), Region::Materialized);
        assert_eq!(buffer.region(2, 4), Region::Mixed);
        assert_eq!(buffer.region(8, 2), Region::Fresh);
    }

    #[test]
    fn writes_past_capacity_are_rejected() {
        let mut buffer = FileBuffer::new(4);
        buffer.seed_output();
        let err = buffer.write(2, &[0, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            WalkError::CapacityExceeded {
                resource: Resource::FileBuffer,
                limit: 4
            }
        );
    }

    #[test]
    fn parse_input_starts_unmaterialized() {
        let mut buffer = FileBuffer::new(4);
        buffer.seed_input(vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(buffer.limit(), 6, "parse limit is the input, not the capacity");
        assert_eq!(buffer.region(0, 6), Region::Fresh);
        buffer.mark(0, 2);
        assert_eq!(buffer.size(), 2);
        assert_eq!(buffer.into_output(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn output_is_truncated_to_the_high_water_mark() {
        let mut buffer = FileBuffer::new(16);
        buffer.seed_output();
        buffer.write(0, &[7, 7]).unwrap();
        assert_eq!(buffer.into_output(), vec![7, 7]);
    }
}
