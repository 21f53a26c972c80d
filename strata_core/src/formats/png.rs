//! A PNG subset: signature, IHDR, then IDAT, tEXt, pHYs and tIME chunks until IEND.
//!
//! Every chunk carries its big-endian length and a CRC-32 over type and body, so any
//! splice of whole chunks regenerates a well-formed file.

use crate::accessor::{Endian, FileAccessor};
use crate::error::WalkError;
use crate::grammar::Grammar;
use crate::tracker::ProductionKind;

pub const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

const IHDR: &[u8] = b"IHDR";
const IDAT: &[u8] = b"IDAT";
const TEXT: &[u8] = b"tEXt";
const PHYS: &[u8] = b"pHYs";
const TIME: &[u8] = b"tIME";
const IEND: &[u8] = b"IEND";

/// Chunk types that may follow the header.
const CHUNK_TYPES: [&[u8]; 5] = [IDAT, TEXT, PHYS, TIME, IEND];

const KEYWORD_MAX: usize = 79;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PngKind {
    File,
    Signature,
    Header,
    Data,
    Text,
    PhysicalDims,
    Time,
    End,
}

impl ProductionKind for PngKind {
    fn name(self) -> &'static str {
        match self {
            PngKind::File => "png",
            PngKind::Signature => "signature",
            PngKind::Header => "ihdr",
            PngKind::Data => "idat",
            PngKind::Text => "text",
            PngKind::PhysicalDims => "phys",
            PngKind::Time => "time",
            PngKind::End => "iend",
        }
    }
}

type Fa = FileAccessor<PngKind>;

fn range_set(lo: u64, hi: u64) -> Vec<u64> {
    (lo..=hi).collect()
}

/// Length, type, `body`, CRC. The CRC covers the type and the body.
fn chunk(
    fa: &mut Fa,
    ty: &'static [u8],
    length: Option<u64>,
    body: impl FnOnce(&mut Fa) -> Result<(), WalkError>,
) -> Result<(), WalkError> {
    if let Some(length) = length {
        fa.read_uint_known(4, &[length])?;
    }
    let crc_start = fa.tell();
    fa.with_evil_bit(false, |fa| fa.read_bytes_known(4, &[ty]))?;
    body(fa)?;
    let crc = fa.crc32(crc_start..fa.tell())?;
    fa.read_uint_known(4, &[u64::from(crc)])?;
    Ok(())
}

fn header(fa: &mut Fa) -> Result<(), WalkError> {
    chunk(fa, IHDR, Some(13), |fa| {
        fa.read_u32()?;
        fa.read_u32()?;
        fa.read_uint_known(1, &[1, 2, 4, 8, 16])?;
        fa.read_uint_known(1, &[0, 2, 3, 4, 6])?;
        fa.read_uint_known(1, &[0])?;
        fa.read_uint_known(1, &[0])?;
        fa.read_uint_known(1, &[0, 1])?;
        Ok(())
    })
}

fn data(fa: &mut Fa) -> Result<(), WalkError> {
    let length = fa.read_u32()? as usize;
    // Type, data and CRC must still fit.
    if length + 8 > fa.remaining_file_size() {
        return fa.stop(1, format!("IDAT length {length} runs past the end of the file"));
    }
    chunk(fa, IDAT, None, |fa| fa.read_bytes(length).map(drop))
}

fn text(fa: &mut Fa) -> Result<(), WalkError> {
    let length = fa.reserve(4)?;
    chunk(fa, TEXT, None, |fa| {
        let keyword = fa.read_cstring(KEYWORD_MAX)?;
        let used = keyword.len() as u64 + 1;
        let parsed = length.parsed().map(|total| total.saturating_sub(used));
        let max = fa.remaining_file_size().saturating_sub(4) as u64;
        let text_len = fa.decide_count(max, parsed)?;
        fa.read_string(text_len as usize)?;
        fa.patch(&length, used + text_len)
    })
}

fn physical_dims(fa: &mut Fa) -> Result<(), WalkError> {
    chunk(fa, PHYS, Some(9), |fa| {
        fa.read_u32()?;
        fa.read_u32()?;
        fa.read_uint_known(1, &[0, 1])?;
        Ok(())
    })
}

fn time(fa: &mut Fa) -> Result<(), WalkError> {
    chunk(fa, TIME, Some(7), |fa| {
        fa.read_u16()?;
        fa.read_uint_known(1, &range_set(1, 12))?;
        fa.read_uint_known(1, &range_set(1, 31))?;
        fa.read_uint_known(1, &range_set(0, 23))?;
        fa.read_uint_known(1, &range_set(0, 59))?;
        fa.read_uint_known(1, &range_set(0, 60))?;
        Ok(())
    })
}

fn end(fa: &mut Fa) -> Result<(), WalkError> {
    chunk(fa, IEND, Some(0), |_| Ok(()))
}

fn file(fa: &mut Fa) -> Result<(), WalkError> {
    fa.scope("signature", PngKind::Signature, |fa| {
        fa.with_evil_bit(false, |fa| fa.read_bytes_known(8, &[SIGNATURE]))
            .map(drop)
    })?;
    fa.scope("ihdr", PngKind::Header, header)?;
    loop {
        let ty = fa.with_evil_bit(false, |fa| fa.lookahead_bytes_known(4, 4, &CHUNK_TYPES))?;
        match ty.as_slice() {
            IDAT => fa.scope("idat", PngKind::Data, data)?,
            TEXT => fa.scope("text", PngKind::Text, text)?,
            PHYS => fa.scope("phys", PngKind::PhysicalDims, physical_dims)?,
            TIME => fa.scope("time", PngKind::Time, time)?,
            _ => return fa.scope("iend", PngKind::End, end),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Png;

impl Grammar for Png {
    type Kind = PngKind;

    fn name(&self) -> &'static str {
        "png"
    }

    fn file_extension(&self) -> &'static str {
        "png"
    }

    fn walk(&self, fa: &mut Fa) -> Result<(), WalkError> {
        fa.set_endian(Endian::Big);
        fa.scope("png", PngKind::File, file)
    }
}
