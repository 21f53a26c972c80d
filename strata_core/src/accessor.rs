use crate::buffer::{DEFAULT_FILE_CAPACITY, FileBuffer, Region};
use crate::checksum;
use crate::error::{Resource, WalkError};
use crate::evil::{EVIL_COIN, EvilBit, GOOD_COIN};
use crate::grammar::Walk;
use crate::sampler::{self, ALPHABET, RESTRICTED_FROM, TINY_VALUES, Tier};
use crate::stream::{DEFAULT_STREAM_CAPACITY, DecisionStream};
use crate::tracker::{ChunkTracker, DEFAULT_MAX_DEPTH, ProductionKind};
use std::ops::Range;
use tracing::trace;

/// Which direction a walk runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Materialize a file from the decision stream.
    Generate,
    /// Reconstruct the decision stream that produces a given file.
    Parse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Resource ceilings and defaults for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub stream_capacity: usize,
    pub file_capacity: usize,
    pub max_depth: usize,
    /// Initial value of the evil bit at the start of every walk.
    pub allow_evil: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            file_capacity: DEFAULT_FILE_CAPACITY,
            max_depth: DEFAULT_MAX_DEPTH,
            allow_evil: true,
        }
    }
}

/// A placeholder field written now and patched once its value is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reserved {
    pos: usize,
    width: usize,
    parsed: Option<u64>,
}

impl Reserved {
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The value already present in the file: always `Some` while parsing.
    pub fn parsed(&self) -> Option<u64> {
        self.parsed
    }
}

/// A splice point the mutation engine watches during a replayed walk.
#[derive(Debug, Clone)]
pub(crate) struct SpliceWatch<K> {
    pub start: usize,
    /// Kind the chunk must have; `None` accepts any production.
    pub kind: Option<K>,
    /// Nesting depth the chunk must have; `None` accepts the first scope at `start`.
    pub depth: Option<usize>,
    pub expected_end: Option<usize>,
    /// Decisions to splice back in once the watched chunk closes.
    pub restore: Option<Vec<u8>>,
    armed: Option<usize>,
    pub observed_end: Option<usize>,
}

impl<K> SpliceWatch<K> {
    pub fn new(start: usize, kind: Option<K>, expected_end: Option<usize>) -> Self {
        Self {
            start,
            kind,
            depth: None,
            expected_end,
            restore: None,
            armed: None,
            observed_end: None,
        }
    }

    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn restoring(mut self, tail: Vec<u8>) -> Self {
        self.restore = Some(tail);
        self
    }
}

/// The engine every grammar walks against.
///
/// It owns the decision stream, the file buffer, the evil bit and the chunk tracker of a
/// single walk. All byte-producing primitives decide a value (drawing it from the stream,
/// or decoding it from bytes that are already fixed and recording the decisions that
/// reproduce it) and then funnel the bytes through [`FileAccessor::write_or_match`].
#[derive(Debug)]
pub struct FileAccessor<K> {
    mode: Mode,
    stream: DecisionStream,
    file: FileBuffer,
    endian: Endian,
    evil: EvilBit,
    allow_evil: bool,
    tracker: ChunkTracker<K>,
    watches: Vec<SpliceWatch<K>>,
}

impl<K: ProductionKind> FileAccessor<K> {
    pub fn new(limits: &Limits) -> Self {
        Self {
            mode: Mode::Generate,
            stream: DecisionStream::new(limits.stream_capacity),
            file: FileBuffer::new(limits.file_capacity),
            endian: Endian::default(),
            evil: EvilBit::new(limits.allow_evil),
            allow_evil: limits.allow_evil,
            tracker: ChunkTracker::new(limits.max_depth),
            watches: Vec::new(),
        }
    }

    /// Resets every piece of per-walk state.
    ///
    /// Generation reads `decisions`; parsing validates `input` and rebuilds the stream
    /// from scratch.
    pub fn seed(
        &mut self,
        mode: Mode,
        decisions: Vec<u8>,
        input: Option<Vec<u8>>,
    ) -> Result<(), WalkError> {
        self.mode = mode;
        match mode {
            Mode::Generate => {
                self.stream.seed(decisions)?;
                self.file.seed_output();
            }
            Mode::Parse => {
                self.stream.seed(Vec::new())?;
                self.file.seed_input(input.unwrap_or_default());
            }
        }
        self.endian = Endian::default();
        self.evil = EvilBit::new(self.allow_evil);
        self.tracker.reset();
        self.watches.clear();
        Ok(())
    }

    pub(crate) fn set_watches(&mut self, watches: Vec<SpliceWatch<K>>) {
        self.watches = watches;
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn tell(&self) -> usize {
        self.file.cursor()
    }

    /// Logical size of the file so far.
    pub fn file_size(&self) -> usize {
        self.file.size()
    }

    /// Bytes left after the cursor: the rest of the input when parsing, the remaining
    /// capacity when generating.
    pub fn remaining_file_size(&self) -> usize {
        self.file.limit().saturating_sub(self.tell())
    }

    fn violation(&self, reason: impl Into<String>) -> WalkError {
        WalkError::Structural {
            offset: self.file.size(),
            path: self.tracker.path(),
            reason: reason.into(),
        }
    }

    // Decisions.

    fn decide_below(&mut self, bound: u64, forced: Option<u64>) -> Result<u64, WalkError> {
        let width = sampler::decision_width(bound);
        if width == 0 {
            return Ok(0);
        }
        match forced {
            Some(value) => {
                debug_assert!(value < bound);
                self.stream.put_le(value, width)?;
                Ok(value)
            }
            None => Ok(self.stream.take_le(width)? % bound),
        }
    }

    fn decide_raw(&mut self, width: usize, forced: Option<u64>) -> Result<u64, WalkError> {
        if width == 0 {
            return Ok(0);
        }
        match forced {
            Some(value) => {
                let value = value & sampler::width_mask(width);
                self.stream.put_le(value, width)?;
                Ok(value)
            }
            None => self.stream.take_le(width),
        }
    }

    fn sample_small(&mut self, width: usize, forced: Option<u64>) -> Result<u64, WalkError> {
        let selector = self.decide_below(256, forced.map(sampler::selector_for))?;
        let tier = Tier::from_selector(selector);
        let raw_forced = forced.map(|value| sampler::encode(value).1);
        let raw = match tier {
            Tier::Tiny => self.decide_below(TINY_VALUES, raw_forced)?,
            other => self.decide_raw(other.raw_width(width), raw_forced)?,
        };
        Ok(sampler::decode(tier, width, raw))
    }

    /// Draws one of `known`, or, when the evil bit allows it, something else.
    fn choose_known<T: PartialEq + Clone>(
        &mut self,
        existing: Option<T>,
        known: &[T],
        evil_draw: impl FnOnce(&mut Self, Option<T>) -> Result<T, WalkError>,
    ) -> Result<T, WalkError> {
        if known.is_empty() {
            return Err(self.violation("known-value set is empty"));
        }
        let index = existing
            .as_ref()
            .map(|value| known.iter().position(|k| k == value));
        if index == Some(None) && !self.evil.allowed() {
            return Err(self.violation("value is not in the known-value set"));
        }

        let forced_coin = index.map(|found| if found.is_some() { GOOD_COIN } else { EVIL_COIN });
        let coin = self.decide_below(256, forced_coin)?;
        if self.evil.is_evil(coin) {
            trace!(path = %self.tracker.path(), "evil substitution");
            return evil_draw(self, existing);
        }
        let choice = self.decide_below(known.len() as u64, index.flatten().map(|i| i as u64))?;
        Ok(known[choice as usize].clone())
    }

    // File bytes.

    /// Bytes already fixed at `pos`, if the primitive there must decode rather than draw.
    fn existing(&self, pos: usize, len: usize) -> Result<Option<Vec<u8>>, WalkError> {
        match self.mode {
            Mode::Parse => match self.file.slice(pos..pos + len) {
                Some(bytes) if self.file.input_len().is_some_and(|n| pos + len <= n) => {
                    Ok(Some(bytes.to_vec()))
                }
                _ => Err(self.violation(format!(
                    "unexpected end of input: {len} bytes needed at offset {pos}"
                ))),
            },
            Mode::Generate => match self.file.region(pos, len) {
                Region::Fresh => Ok(None),
                Region::Materialized => Ok(self.file.slice(pos..pos + len).map(<[u8]>::to_vec)),
                Region::Mixed => Err(self.violation(format!(
                    "{len} bytes at offset {pos} straddle already materialized data"
                ))),
            },
        }
    }

    /// Emits `bytes` at the cursor when generating, or checks that the input holds them
    /// when parsing. Every byte-producing primitive ends here.
    pub fn write_or_match(&mut self, bytes: &[u8]) -> Result<(), WalkError> {
        let pos = self.tell();
        let end = pos + bytes.len();
        match self.mode {
            Mode::Generate => self.file.write(pos, bytes)?,
            Mode::Parse => {
                if end > self.file.limit() {
                    return Err(self.violation(format!(
                        "unexpected end of input: {} bytes needed at offset {pos}",
                        bytes.len()
                    )));
                }
                if self.file.slice(pos..end) != Some(bytes) {
                    return Err(self.violation(format!(
                        "expected {bytes:02x?} at offset {pos}, found {:02x?}",
                        self.file.slice(pos..end).unwrap_or_default()
                    )));
                }
                self.file.mark(pos, bytes.len());
            }
        }
        self.tracker.touch(pos..end);
        self.file.set_cursor(end);
        Ok(())
    }

    fn int_to_bytes(&self, value: u64, width: usize) -> Vec<u8> {
        match self.endian {
            Endian::Little => value.to_le_bytes()[..width].to_vec(),
            Endian::Big => value.to_be_bytes()[8 - width..].to_vec(),
        }
    }

    fn int_from_bytes(&self, bytes: &[u8]) -> u64 {
        let fold = |acc: u64, byte: &u8| (acc << 8) | u64::from(*byte);
        match self.endian {
            Endian::Little => bytes.iter().rev().fold(0, fold),
            Endian::Big => bytes.iter().fold(0, fold),
        }
    }

    fn check_width(&self, width: usize) -> Result<(), WalkError> {
        if (1..=8).contains(&width) {
            Ok(())
        } else {
            Err(self.violation(format!("integer width {width} is outside 1..=8")))
        }
    }

    fn existing_int(&self, width: usize) -> Result<Option<u64>, WalkError> {
        Ok(self
            .existing(self.tell(), width)?
            .map(|bytes| self.int_from_bytes(&bytes)))
    }

    // Integers.

    /// Reads an unsigned integer biased towards small values.
    pub fn read_uint(&mut self, width: usize) -> Result<u64, WalkError> {
        self.check_width(width)?;
        let existing = self.existing_int(width)?;
        let value = self.sample_small(width, existing)?;
        self.write_or_match(&self.int_to_bytes(value, width))?;
        Ok(value)
    }

    /// Reads an unsigned integer drawn uniformly over its full width.
    pub fn read_uint_full(&mut self, width: usize) -> Result<u64, WalkError> {
        self.check_width(width)?;
        let existing = self.existing_int(width)?;
        let value = self.decide_raw(width, existing)?;
        self.write_or_match(&self.int_to_bytes(value, width))?;
        Ok(value)
    }

    /// Reads an unsigned integer constrained to `known`.
    pub fn read_uint_known(&mut self, width: usize, known: &[u64]) -> Result<u64, WalkError> {
        self.check_width(width)?;
        let existing = self.existing_int(width)?;
        let value = self.choose_known(existing, known, |fa, forced| {
            fa.sample_small(width, forced)
        })?;
        self.write_or_match(&self.int_to_bytes(value, width))?;
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8, WalkError> {
        Ok(self.read_uint(1)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16, WalkError> {
        Ok(self.read_uint(2)? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, WalkError> {
        Ok(self.read_uint(4)? as u32)
    }

    pub fn read_u64(&mut self) -> Result<u64, WalkError> {
        self.read_uint(8)
    }

    // Byte strings.

    fn draw_bytes(&mut self, len: usize, existing: Option<Vec<u8>>) -> Result<Vec<u8>, WalkError> {
        (0..len)
            .map(|i| {
                let forced = existing.as_ref().map(|bytes| u64::from(bytes[i]));
                self.decide_raw(1, forced).map(|byte| byte as u8)
            })
            .collect()
    }

    /// Reads `len` unconstrained bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, WalkError> {
        let existing = self.existing(self.tell(), len)?;
        let bytes = self.draw_bytes(len, existing)?;
        self.write_or_match(&bytes)?;
        Ok(bytes)
    }

    /// Reads `len` bytes constrained to one of `known`.
    pub fn read_bytes_known(&mut self, len: usize, known: &[&[u8]]) -> Result<Vec<u8>, WalkError> {
        if let Some(bad) = known.iter().find(|k| k.len() != len) {
            return Err(self.violation(format!(
                "known value {bad:02x?} does not have length {len}"
            )));
        }
        let known: Vec<Vec<u8>> = known.iter().map(|k| k.to_vec()).collect();
        let existing = self.existing(self.tell(), len)?;
        let bytes = self.choose_known(existing, &known, |fa, forced| fa.draw_bytes(len, forced))?;
        self.write_or_match(&bytes)?;
        Ok(bytes)
    }

    fn string_coin(&mut self, existing: Option<&[u8]>) -> Result<bool, WalkError> {
        let forced = existing.map(|bytes| {
            if bytes.iter().all(|b| sampler::alphabet_index(*b).is_some()) {
                255
            } else {
                0
            }
        });
        Ok(self.decide_below(256, forced)? >= RESTRICTED_FROM)
    }

    /// Reads a fixed-length string, usually from the printable alphabet.
    pub fn read_string(&mut self, len: usize) -> Result<Vec<u8>, WalkError> {
        let existing = self.existing(self.tell(), len)?;
        let restricted = self.string_coin(existing.as_deref())?;
        let mut bytes = Vec::with_capacity(len);
        for i in 0..len {
            let old = existing.as_ref().map(|e| e[i]);
            let byte = if restricted {
                let forced = old.and_then(sampler::alphabet_index);
                ALPHABET[self.decide_below(ALPHABET.len() as u64, forced)? as usize]
            } else {
                self.decide_raw(1, old.map(u64::from))? as u8
            };
            bytes.push(byte);
        }
        self.write_or_match(&bytes)?;
        Ok(bytes)
    }

    fn existing_cstring(&self, max: usize) -> Result<Option<Vec<u8>>, WalkError> {
        let pos = self.tell();
        if self.mode == Mode::Generate && self.file.region(pos, 1) == Region::Fresh {
            return Ok(None);
        }
        let limit = (pos + max + 1).min(self.file.limit());
        let window = self.file.slice(pos..limit).unwrap_or_default();
        match window.iter().position(|b| *b == 0) {
            Some(len) => {
                if self.mode == Mode::Generate
                    && self.file.region(pos, len + 1) != Region::Materialized
                {
                    return Err(self.violation("C string straddles materialized data"));
                }
                Ok(Some(window[..len].to_vec()))
            }
            None => Err(self.violation(format!(
                "no NUL terminator within {} bytes of offset {pos}",
                max + 1
            ))),
        }
    }

    /// Reads a NUL-terminated string of at most `max` characters and returns it without
    /// the terminator.
    pub fn read_cstring(&mut self, max: usize) -> Result<Vec<u8>, WalkError> {
        let existing = self.existing_cstring(max)?;
        let bound = max as u64 + 1;
        let width = sampler::decision_width(bound).max(1);
        let len = self.sample_small(width, existing.as_ref().map(|s| s.len() as u64))? % bound;
        let restricted = self.string_coin(existing.as_deref())?;
        let mut bytes = Vec::with_capacity(len as usize + 1);
        for i in 0..len as usize {
            let old = existing.as_ref().map(|e| e[i]);
            let byte = if restricted {
                let forced = old.and_then(sampler::alphabet_index);
                ALPHABET[self.decide_below(ALPHABET.len() as u64, forced)? as usize]
            } else {
                let forced = old.map(|b| u64::from(b) - 1);
                self.decide_below(255, forced)? as u8 + 1
            };
            bytes.push(byte);
        }
        bytes.push(0);
        self.write_or_match(&bytes)?;
        bytes.pop();
        Ok(bytes)
    }

    /// A decision-only count the grammar derives from other fields when parsing, e.g. the
    /// length of a payload inside an enclosing length field.
    pub fn decide_count(&mut self, max: u64, parsed: Option<u64>) -> Result<u64, WalkError> {
        let forced = match (self.mode, parsed) {
            (Mode::Parse, None) => {
                return Err(self.violation("a count must be derivable while parsing"));
            }
            (_, Some(value)) if value > max => {
                return Err(self.violation(format!("count {value} exceeds maximum {max}")));
            }
            (_, forced) => forced,
        };
        // Full width: `max` may differ between parsing and generating.
        let value = self.sample_small(8, forced)?;
        Ok(match max.checked_add(1) {
            Some(bound) => value % bound,
            None => value,
        })
    }

    // Positioning and backpatching.

    /// Moves the cursor. Seeking past the logical size pads with drawn bytes.
    pub fn seek(&mut self, pos: usize) -> Result<(), WalkError> {
        if pos > self.file.limit() {
            return match self.mode {
                Mode::Parse => Err(self.violation(format!("seek to {pos} past end of input"))),
                Mode::Generate => Err(WalkError::CapacityExceeded {
                    resource: Resource::FileBuffer,
                    limit: self.file.capacity(),
                }),
            };
        }
        if pos > self.file.size() {
            self.file.set_cursor(self.file.size());
            while self.tell() < pos {
                self.read_uint_full(1)?;
            }
        }
        self.file.set_cursor(pos);
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), WalkError> {
        self.seek(self.tell() + n)
    }

    /// Writes a placeholder for a field whose value is only known later. Consumes no
    /// decisions.
    pub fn reserve(&mut self, width: usize) -> Result<Reserved, WalkError> {
        self.check_width(width)?;
        let pos = self.tell();
        let existing = self.existing(pos, width)?;
        let parsed = existing.as_deref().map(|bytes| self.int_from_bytes(bytes));
        match existing {
            Some(bytes) => self.write_or_match(&bytes)?,
            None => self.write_or_match(&vec![0; width])?,
        }
        Ok(Reserved { pos, width, parsed })
    }

    /// Stores `value` into a reserved field and returns to the current position.
    pub fn patch(&mut self, reserved: &Reserved, value: u64) -> Result<(), WalkError> {
        if self.mode == Mode::Parse && reserved.parsed != Some(value) {
            return Err(self.violation(format!(
                "field at offset {} holds {:?}, the walk computed {value}",
                reserved.pos, reserved.parsed
            )));
        }
        let back = self.tell();
        self.seek(reserved.pos)?;
        self.write_or_match(&self.int_to_bytes(value, reserved.width))?;
        self.seek(back)
    }

    // Lookahead.

    /// Biased coin deciding whether the file ends here; `probability` is the chance of
    /// ending while generating.
    pub fn at_end_of_file(&mut self, probability: f64) -> Result<bool, WalkError> {
        let threshold = ((probability * 256.0).round() as i64).clamp(1, 255) as u64;
        let start = self.stream.position();
        let forced = match self.mode {
            Mode::Parse => Some(self.tell() >= self.file.limit()),
            Mode::Generate if self.file.materialized_from(self.tell()) => Some(false),
            Mode::Generate => None,
        };
        let coin = self.decide_below(256, forced.map(|end| if end { 0 } else { 255 }))?;
        let end = coin < threshold;
        self.tracker.lookahead(start..self.stream.position());
        trace!(offset = self.tell(), end, "end-of-file lookahead");
        Ok(end)
    }

    /// Peeks at an integer `offset` bytes ahead without moving the cursor. When
    /// generating, the chosen value is materialized so the later read reproduces it.
    pub fn lookahead_uint_known(
        &mut self,
        offset: usize,
        width: usize,
        known: &[u64],
    ) -> Result<u64, WalkError> {
        let back = self.tell();
        let start = self.stream.position();
        self.file.set_cursor(back + offset);
        let value = self.read_uint_known(width, known);
        self.file.set_cursor(back);
        let value = value?;
        self.tracker.lookahead(start..self.stream.position());
        trace!(offset = back + offset, value, "integer lookahead");
        Ok(value)
    }

    /// Byte-string counterpart of [`FileAccessor::lookahead_uint_known`].
    pub fn lookahead_bytes_known(
        &mut self,
        offset: usize,
        len: usize,
        known: &[&[u8]],
    ) -> Result<Vec<u8>, WalkError> {
        let back = self.tell();
        let start = self.stream.position();
        self.file.set_cursor(back + offset);
        let bytes = self.read_bytes_known(len, known);
        self.file.set_cursor(back);
        let bytes = bytes?;
        self.tracker.lookahead(start..self.stream.position());
        trace!(offset = back + offset, ?bytes, "byte lookahead");
        Ok(bytes)
    }

    // Evil bit.

    /// Sets the evil bit and returns its previous value.
    pub fn set_evil_bit(&mut self, allow: bool) -> bool {
        self.evil.set(allow)
    }

    pub fn evil_bit(&self) -> bool {
        self.evil.allowed()
    }

    /// Runs `f` with the evil bit set to `allow`, restoring the previous value afterwards.
    pub fn with_evil_bit<T>(
        &mut self,
        allow: bool,
        f: impl FnOnce(&mut Self) -> Result<T, WalkError>,
    ) -> Result<T, WalkError> {
        let previous = self.set_evil_bit(allow);
        let result = f(self);
        self.set_evil_bit(previous);
        result
    }

    // Checksums.

    fn materialized_slice(&self, range: Range<usize>) -> Result<&[u8], WalkError> {
        if self.file.region(range.start, range.len()) != Region::Materialized {
            return Err(self.violation(format!(
                "checksum over {range:?} covers bytes that are not materialized"
            )));
        }
        self.file
            .slice(range.clone())
            .ok_or_else(|| self.violation(format!("checksum range {range:?} is out of bounds")))
    }

    pub fn crc32(&self, range: Range<usize>) -> Result<u32, WalkError> {
        self.materialized_slice(range).map(checksum::crc32)
    }

    pub fn crc16(&self, range: Range<usize>) -> Result<u16, WalkError> {
        self.materialized_slice(range).map(checksum::crc16)
    }

    /// Aborts the walk because the input is not of this format.
    pub fn stop<T>(&self, code: i32, reason: impl Into<String>) -> Result<T, WalkError> {
        Err(WalkError::GrammarStop {
            code,
            reason: reason.into(),
        })
    }

    // Productions.

    /// Runs `f` as one named instance of a production; this bracket is what the chunk
    /// tracker observes.
    pub fn scope<T>(
        &mut self,
        name: &'static str,
        kind: K,
        f: impl FnOnce(&mut Self) -> Result<T, WalkError>,
    ) -> Result<T, WalkError> {
        let entered = self
            .tracker
            .enter(name, kind, self.stream.position(), self.tell())?;
        let depth = self.tracker.depth();
        for watch in &mut self.watches {
            if watch.armed.is_none()
                && watch.observed_end.is_none()
                && watch.start == entered.rand_start
                && watch.kind.is_none_or(|expected| expected == kind)
                && watch.depth.is_none_or(|expected| expected + 1 == depth)
            {
                watch.armed = Some(depth);
            }
        }

        let value = f(self)?;

        self.tracker.exit(self.stream.position(), self.tell());
        let pos = self.stream.position();
        for watch in &mut self.watches {
            if watch.armed == Some(depth) {
                watch.armed = None;
                watch.observed_end = Some(pos);
                if let Some(tail) = watch.restore.take() {
                    self.stream.replace_tail(pos, &tail);
                }
            }
        }
        Ok(value)
    }

    /// Ends the walk: a grammar stop with code 0 counts as success, a parse must cover
    /// the whole input.
    pub(crate) fn finish(
        mut self,
        outcome: Result<(), WalkError>,
    ) -> Result<(Walk<K>, Vec<SpliceWatch<K>>), WalkError> {
        match outcome {
            Ok(()) | Err(WalkError::GrammarStop { code: 0, .. }) => {}
            Err(err) => return Err(err),
        }
        if let Some(input_len) = self.file.input_len() {
            if self.file.size() < input_len {
                return Err(self.violation(format!(
                    "{} trailing bytes are not covered by the grammar",
                    input_len - self.file.size()
                )));
            }
        }
        let (chunks, insertion_points) = self
            .tracker
            .finish(self.stream.position(), self.file.cursor());
        let decisions = self.stream.consumed().to_vec();
        let watches = std::mem::take(&mut self.watches);
        Ok((
            Walk {
                mode: self.mode,
                file: self.file.into_output(),
                decisions,
                chunks,
                insertion_points,
            },
            watches,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::test_utils::{Toy, limits};

    fn accessor(mode: Mode, decisions: Vec<u8>) -> FileAccessor<Toy> {
        let mut fa = FileAccessor::new(&limits());
        let input = (mode == Mode::Parse).then(Vec::new);
        fa.seed(mode, decisions, input).unwrap();
        fa
    }

    #[test]
    fn counts_reach_the_top_of_an_unbounded_range() {
        let mut parsing = accessor(Mode::Parse, Vec::new());
        assert_eq!(parsing.decide_count(u64::MAX, Some(u64::MAX)).unwrap(), u64::MAX);

        let recorded = parsing.stream.consumed().to_vec();
        let mut generating = accessor(Mode::Generate, recorded);
        assert_eq!(generating.decide_count(u64::MAX, None).unwrap(), u64::MAX);
    }

    #[test]
    fn counts_wrap_below_a_bounded_maximum() {
        let mut parsing = accessor(Mode::Parse, Vec::new());
        assert_eq!(parsing.decide_count(10, Some(7)).unwrap(), 7);
        assert!(parsing.decide_count(10, Some(11)).is_err());

        let recorded = parsing.stream.consumed().to_vec();
        let mut generating = accessor(Mode::Generate, recorded);
        assert_eq!(generating.decide_count(10, None).unwrap(), 7);
    }

    #[test]
    fn integer_lookahead_leaves_the_cursor_in_place() {
        let mut fa = accessor(Mode::Generate, vec![1, 2, 0, 0]);
        let value = fa
            .with_evil_bit(false, |fa| fa.lookahead_uint_known(0, 1, &[5, 6, 7]))
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(fa.tell(), 0);
        assert_eq!(fa.read_uint_known(1, &[5, 6, 7]).unwrap(), 7);
        assert_eq!(fa.tell(), 1);
    }
}
