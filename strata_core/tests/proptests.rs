//! Property-based tests for the decision codec using proptest.
//!
//! Each property checks one direction of the generate/parse duality: whatever a parse
//! walk records must replay to the same bytes, and whatever a random stream generates
//! must parse back to a stream that replays to the same bytes.

use proptest::prelude::*;
use strata_core::formats::{Png, Riff};
use strata_core::sampler::{self, Tier};
use strata_core::{Endian, FileAccessor, Grammar, Limits, ProductionKind, WalkError};
use strata_core::{generate, parse};

// ============================================================================
// A single-field grammar
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Field;

impl ProductionKind for Field {
    fn name(self) -> &'static str {
        "field"
    }
}

/// One biased integer of `width` bytes, then a raw tail of `tail` bytes.
struct UintThenTail {
    width: usize,
    tail: usize,
    endian: Endian,
}

impl Grammar for UintThenTail {
    type Kind = Field;

    fn name(&self) -> &'static str {
        "uint-then-tail"
    }

    fn file_extension(&self) -> &'static str {
        "bin"
    }

    fn walk(&self, fa: &mut FileAccessor<Field>) -> Result<(), WalkError> {
        fa.set_endian(self.endian);
        fa.scope("field", Field, |fa| {
            fa.read_uint(self.width)?;
            fa.read_string(self.tail)?;
            Ok(())
        })
    }
}

/// A NUL-terminated string followed by a small count of raw bytes.
struct CString;

impl Grammar for CString {
    type Kind = Field;

    fn name(&self) -> &'static str {
        "cstring"
    }

    fn file_extension(&self) -> &'static str {
        "txt"
    }

    fn walk(&self, fa: &mut FileAccessor<Field>) -> Result<(), WalkError> {
        fa.scope("field", Field, |fa| {
            fa.read_cstring(32)?;
            let count = fa.read_u8()?;
            fa.read_bytes(count as usize)?;
            Ok(())
        })
    }
}

// ============================================================================
// Strategies for generating random test data
// ============================================================================

fn arb_width() -> impl Strategy<Value = usize> {
    prop_oneof![Just(1usize), Just(2), Just(4), Just(8)]
}

fn arb_value_of_width() -> impl Strategy<Value = (usize, u64)> {
    arb_width().prop_flat_map(|width| {
        let max = sampler::width_mask(width);
        (Just(width), 0..=max)
    })
}

fn arb_endian() -> impl Strategy<Value = Endian> {
    prop_oneof![Just(Endian::Little), Just(Endian::Big)]
}

fn arb_stream() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

fn arb_cstring_file() -> impl Strategy<Value = Vec<u8>> {
    (
        prop::collection::vec(1u8..=255, 0..=32),
        prop::collection::vec(any::<u8>(), 0..40),
    )
        .prop_map(|(text, tail)| {
            let mut file = text;
            file.push(0);
            file.push(tail.len() as u8);
            file.extend(tail);
            file
        })
}

fn limits() -> Limits {
    Limits {
        stream_capacity: 8192,
        file_capacity: 4096,
        ..Limits::default()
    }
}

fn encode_int(value: u64, width: usize, endian: Endian) -> Vec<u8> {
    match endian {
        Endian::Little => value.to_le_bytes()[..width].to_vec(),
        Endian::Big => value.to_be_bytes()[8 - width..].to_vec(),
    }
}

// ============================================================================
// Sampler properties
// ============================================================================

proptest! {
    /// Every value representable in a field has a selector and raw draw that decode
    /// back to it.
    #[test]
    fn prop_sampler_encode_decode((width, value) in arb_value_of_width()) {
        let (tier, raw) = sampler::encode(value);
        prop_assert_eq!(Tier::from_selector(sampler::selector_for(value)), tier);
        prop_assert_eq!(sampler::decode(tier, width, raw), value);
    }

    /// Tiers partition the selector byte.
    #[test]
    fn prop_tier_is_total(selector in 0u64..256) {
        let tier = Tier::from_selector(selector);
        let expected = if selector < sampler::FULL_WIDTH_BELOW {
            Tier::Full
        } else if selector < sampler::WIDE_BELOW {
            Tier::Wide
        } else if selector < sampler::BYTE_BELOW {
            Tier::Byte
        } else {
            Tier::Tiny
        };
        prop_assert_eq!(tier, expected);
    }

    /// Raw draws never escape the field width.
    #[test]
    fn prop_decode_fits_width(width in arb_width(), selector in 0u64..256, raw in any::<u64>()) {
        let value = sampler::decode(Tier::from_selector(selector), width, raw);
        prop_assert!(value <= sampler::width_mask(width));
    }
}

// ============================================================================
// Codec properties
// ============================================================================

proptest! {
    /// Parsing any integer and replaying its decisions reproduces the file.
    #[test]
    fn prop_uint_parse_generate_identity(
        (width, value) in arb_value_of_width(),
        endian in arb_endian(),
        tail in prop::collection::vec(any::<u8>(), 0..16),
    ) {
        let grammar = UintThenTail { width, tail: tail.len(), endian };
        let mut file = encode_int(value, width, endian);
        file.extend_from_slice(&tail);

        let parsed = parse(&grammar, &file, &limits()).unwrap();
        prop_assert_eq!(&parsed.file, &file);
        let regenerated = generate(&grammar, &parsed.decisions, &limits()).unwrap();
        prop_assert_eq!(&regenerated.file, &file);
        prop_assert_eq!(regenerated.decisions, parsed.decisions);
    }

    /// C strings of any printable or binary content round-trip.
    #[test]
    fn prop_cstring_parse_generate_identity(file in arb_cstring_file()) {
        let parsed = parse(&CString, &file, &limits()).unwrap();
        let regenerated = generate(&CString, &parsed.decisions, &limits()).unwrap();
        prop_assert_eq!(regenerated.file, file);
    }

    /// Generated PNG files parse back to decisions that regenerate them.
    #[test]
    fn prop_png_generate_parse_generate(stream in arb_stream()) {
        if let Ok(first) = generate(&Png, &stream, &limits()) {
            let parsed = parse(&Png, &first.file, &limits()).unwrap();
            let second = generate(&Png, &parsed.decisions, &limits()).unwrap();
            prop_assert_eq!(second.file, first.file);
        }
    }

    /// Generated WAVE files parse back to decisions that regenerate them.
    #[test]
    fn prop_riff_generate_parse_generate(stream in arb_stream()) {
        if let Ok(first) = generate(&Riff, &stream, &limits()) {
            let parsed = parse(&Riff, &first.file, &limits()).unwrap();
            let second = generate(&Riff, &parsed.decisions, &limits()).unwrap();
            prop_assert_eq!(second.file, first.file);
        }
    }

    /// A walk never consumes more decisions than it was given, and what it records
    /// replays to the same file. Reads over bytes a lookahead already materialized
    /// record the canonical decision, so the record need not equal the input prefix.
    #[test]
    fn prop_generation_records_a_replayable_stream(stream in arb_stream()) {
        if let Ok(walk) = generate(&Riff, &stream, &limits()) {
            prop_assert!(walk.decisions.len() <= stream.len());
            let replayed = generate(&Riff, &walk.decisions, &limits()).unwrap();
            prop_assert_eq!(&replayed.file, &walk.file);
            prop_assert_eq!(replayed.decisions, walk.decisions);
        }
    }
}
