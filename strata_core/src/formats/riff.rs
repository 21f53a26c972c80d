//! A RIFF/WAVE subset with a CRC-16 trailer on the sample data.

use crate::accessor::{Endian, FileAccessor};
use crate::error::WalkError;
use crate::grammar::Grammar;
use crate::tracker::ProductionKind;

const RIFF: &[u8] = b"RIFF";
const FMT: &[u8] = b"fmt ";
const LIST: &[u8] = b"LIST";
const DATA: &[u8] = b"data";
const JUNK: &[u8] = b"JUNK";
const INFO: &[u8] = b"INFO";

const FORM_TYPES: [&[u8]; 2] = [b"WAVE", b"AVI "];
const SAMPLE_RATES: [u64; 5] = [8000, 11025, 22050, 44100, 48000];

/// Chance that generation stops before another trailing JUNK chunk.
const END_PROBABILITY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiffKind {
    Container,
    Format,
    List,
    Data,
    Junk,
}

impl ProductionKind for RiffKind {
    fn name(self) -> &'static str {
        match self {
            RiffKind::Container => "riff",
            RiffKind::Format => "fmt",
            RiffKind::List => "list",
            RiffKind::Data => "data",
            RiffKind::Junk => "junk",
        }
    }
}

type Fa = FileAccessor<RiffKind>;

fn tag(fa: &mut Fa, expected: &[u8]) -> Result<(), WalkError> {
    fa.with_evil_bit(false, |fa| fa.read_bytes_known(4, &[expected]))
        .map(drop)
}

/// Reads a payload size that must fit in what is left of the file.
fn payload_size(fa: &mut Fa, what: &str) -> Result<usize, WalkError> {
    let size = fa.read_u32()? as usize;
    if size > fa.remaining_file_size() {
        return fa.stop(1, format!("{what} size {size} runs past the end of the file"));
    }
    Ok(size)
}

/// Chunk payloads are padded to an even length.
fn pad(fa: &mut Fa, size: usize) -> Result<(), WalkError> {
    if size % 2 == 1 {
        fa.skip(1)
    } else {
        Ok(())
    }
}

fn format(fa: &mut Fa) -> Result<(), WalkError> {
    tag(fa, FMT)?;
    fa.read_uint_known(4, &[16])?;
    fa.read_uint_known(2, &[1, 3])?;
    fa.read_u16()?;
    fa.read_uint_known(4, &SAMPLE_RATES)?;
    fa.read_u32()?;
    fa.read_u16()?;
    fa.read_uint_known(2, &[8, 16, 24, 32])?;
    Ok(())
}

fn list(fa: &mut Fa) -> Result<(), WalkError> {
    tag(fa, LIST)?;
    let size = payload_size(fa, "LIST")?;
    if size < 4 {
        return fa.stop(1, format!("LIST size {size} cannot hold its list type"));
    }
    fa.read_bytes_known(4, &[INFO])?;
    fa.read_string(size - 4)?;
    pad(fa, size)
}

fn data(fa: &mut Fa) -> Result<(), WalkError> {
    tag(fa, DATA)?;
    let size = payload_size(fa, "data")?;
    let start = fa.tell();
    fa.read_bytes(size)?;
    let crc = fa.crc16(start..fa.tell())?;
    fa.read_uint_known(2, &[u64::from(crc)])?;
    pad(fa, size)
}

fn junk(fa: &mut Fa) -> Result<(), WalkError> {
    tag(fa, JUNK)?;
    let size = payload_size(fa, "JUNK")?;
    fa.read_bytes(size)?;
    pad(fa, size)
}

fn container(fa: &mut Fa) -> Result<(), WalkError> {
    tag(fa, RIFF)?;
    let total = fa.reserve(4)?;
    fa.read_bytes_known(4, &FORM_TYPES)?;
    fa.scope("fmt", RiffKind::Format, format)?;

    let next = fa.with_evil_bit(false, |fa| fa.lookahead_bytes_known(0, 4, &[LIST, DATA]))?;
    if next == LIST {
        fa.scope("list", RiffKind::List, list)?;
    }
    fa.scope("data", RiffKind::Data, data)?;

    while !fa.at_end_of_file(END_PROBABILITY)? {
        fa.scope("junk", RiffKind::Junk, junk)?;
    }

    let size = fa.file_size().saturating_sub(8) as u64;
    fa.patch(&total, size)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Riff;

impl Grammar for Riff {
    type Kind = RiffKind;

    fn name(&self) -> &'static str {
        "riff"
    }

    fn file_extension(&self) -> &'static str {
        "wav"
    }

    fn walk(&self, fa: &mut Fa) -> Result<(), WalkError> {
        fa.set_endian(Endian::Little);
        fa.scope("riff", RiffKind::Container, container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::Limits;
    use crate::checksum::crc16;
    use crate::grammar::{generate, parse};

    fn wave(list: Option<&[u8]>, samples: &[u8], junk: &[&[u8]]) -> Vec<u8> {
        let mut body = b"WAVE".to_vec();
        body.extend_from_slice(FMT);
        body.extend_from_slice(&16u32.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.extend_from_slice(&44100u32.to_le_bytes());
        body.extend_from_slice(&176400u32.to_le_bytes());
        body.extend_from_slice(&4u16.to_le_bytes());
        body.extend_from_slice(&16u16.to_le_bytes());
        let mut chunk = |tag: &[u8], payload: &[u8], trailer: &[u8]| {
            body.extend_from_slice(tag);
            body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            body.extend_from_slice(payload);
            body.extend_from_slice(trailer);
            if payload.len() % 2 == 1 {
                body.push(0);
            }
        };
        if let Some(text) = list {
            let mut payload = INFO.to_vec();
            payload.extend_from_slice(text);
            chunk(LIST, &payload, &[]);
        }
        chunk(DATA, samples, &crc16(samples).to_le_bytes());
        for payload in junk {
            chunk(JUNK, payload, &[]);
        }
        let mut file = RIFF.to_vec();
        file.extend_from_slice(&(body.len() as u32).to_le_bytes());
        file.extend(body);
        file
    }

    #[test]
    fn round_trips_a_file_with_every_chunk() {
        let file = wave(Some(&b"name"[..]), b"\x01\x02\x03", &[&b"xyz"[..], &[]]);
        let walk = parse(&Riff, &file, &Limits::default()).unwrap();
        let kinds: Vec<_> = walk.chunks.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            [
                RiffKind::Container,
                RiffKind::Format,
                RiffKind::List,
                RiffKind::Data,
                RiffKind::Junk,
                RiffKind::Junk
            ]
        );
        let regenerated = generate(&Riff, &walk.decisions, &Limits::default()).unwrap();
        assert_eq!(regenerated.file, file);
    }

    #[test]
    fn list_is_optional_but_data_after_it_is_not() {
        let file = wave(Some(&b"name"[..]), b"\x01\x02", &[]);
        let walk = parse(&Riff, &file, &Limits::default()).unwrap();
        let list = walk.chunks_of(RiffKind::List).next().unwrap();
        let data = walk.chunks_of(RiffKind::Data).next().unwrap();
        assert!(list.optional);
        assert!(!list.appendable);
        assert!(!data.optional);
        assert_eq!(data.decisions.start, list.decisions.end);
    }

    #[test]
    fn oversized_junk_stops_the_walk() {
        let mut file = wave(None, b"\x01\x02", &[&b"ab"[..]]);
        let junk_size = file.len() - 6;
        file[junk_size..junk_size + 4].copy_from_slice(&1000u32.to_le_bytes());
        let err = parse(&Riff, &file, &Limits::default()).unwrap_err();
        assert!(matches!(err, WalkError::GrammarStop { code: 1, .. }));
    }

    #[test]
    fn wrong_total_size_is_a_structural_violation() {
        let mut file = wave(None, b"\x01\x02", &[]);
        file[4] ^= 1;
        let err = parse(&Riff, &file, &Limits::default()).unwrap_err();
        assert!(matches!(err, WalkError::Structural { .. }));
    }
}
