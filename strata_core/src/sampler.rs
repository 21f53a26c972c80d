//! The biased value sampler.
//!
//! Unconstrained integers are drawn in two steps: a one-byte tier selector, then a value
//! of the tier's width. The law favours the values 1 to 16 (224 of 256 selectors) while
//! still reaching every magnitude, and the selector can always be recomputed from a
//! parsed value, so every sampled value has a canonical decision encoding.

/// Selectors below this pick a value of the field's full width (2/256).
pub const FULL_WIDTH_BELOW: u64 = 2;
/// Selectors below this pick a 16-bit value (6/256).
pub const WIDE_BELOW: u64 = 8;
/// Selectors below this pick an 8-bit value (24/256). Everything above is a tiny value.
pub const BYTE_BELOW: u64 = 32;
/// Number of distinct tiny values, drawn as `1..=TINY_VALUES`.
pub const TINY_VALUES: u64 = 16;

/// Printable subset used by restricted strings.
pub const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789 ._-";

/// String coin bytes at or above this choose the restricted alphabet.
pub const RESTRICTED_FROM: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Full,
    Wide,
    Byte,
    Tiny,
}

impl Tier {
    pub fn from_selector(selector: u64) -> Self {
        match selector {
            s if s < FULL_WIDTH_BELOW => Tier::Full,
            s if s < WIDE_BELOW => Tier::Wide,
            s if s < BYTE_BELOW => Tier::Byte,
            _ => Tier::Tiny,
        }
    }

    /// Number of raw value bytes this tier draws for a field `width` bytes wide.
    /// The tiny tier is drawn as an index instead.
    pub fn raw_width(self, width: usize) -> usize {
        match self {
            Tier::Full => width,
            Tier::Wide => width.min(2),
            Tier::Byte => 1,
            Tier::Tiny => 0,
        }
    }
}

/// The selector a parse walk records for an observed magnitude.
pub fn selector_for(value: u64) -> u64 {
    match value {
        1..=TINY_VALUES => BYTE_BELOW,
        v if v < 0x100 => WIDE_BELOW,
        v if v < 0x1_0000 => FULL_WIDTH_BELOW,
        _ => 0,
    }
}

/// Bytes needed to draw an index below `bound`; zero for single-choice draws.
pub fn decision_width(bound: u64) -> usize {
    if bound <= 1 {
        0
    } else {
        let bits = 64 - (bound - 1).leading_zeros() as usize;
        bits.div_ceil(8)
    }
}

/// Mask selecting the low `width` bytes of a value.
pub fn width_mask(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

pub fn alphabet_index(byte: u8) -> Option<u64> {
    ALPHABET.iter().position(|c| *c == byte).map(|i| i as u64)
}

/// Decodes a value from the raw draws of a tier, mirroring what generation does.
pub fn decode(tier: Tier, width: usize, raw: u64) -> u64 {
    match tier {
        Tier::Tiny => raw % TINY_VALUES + 1,
        other => raw & width_mask(other.raw_width(width)),
    }
}

/// The raw draw that makes `decode` return `value` under the tier `selector_for(value)`.
pub fn encode(value: u64) -> (Tier, u64) {
    let tier = Tier::from_selector(selector_for(value));
    match tier {
        Tier::Tiny => (tier, value - 1),
        other => (other, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_partition_the_selector_space() {
        let mut counts = [0usize; 4];
        for selector in 0..256u64 {
            let slot = match Tier::from_selector(selector) {
                Tier::Full => 0,
                Tier::Wide => 1,
                Tier::Byte => 2,
                Tier::Tiny => 3,
            };
            counts[slot] += 1;
        }
        assert_eq!(counts, [2, 6, 24, 224]);
        assert_eq!(counts.iter().sum::<usize>(), 256);
    }

    #[test]
    fn forced_selectors_land_in_the_right_tier() {
        assert_eq!(Tier::from_selector(selector_for(0)), Tier::Byte);
        assert_eq!(Tier::from_selector(selector_for(1)), Tier::Tiny);
        assert_eq!(Tier::from_selector(selector_for(16)), Tier::Tiny);
        assert_eq!(Tier::from_selector(selector_for(17)), Tier::Byte);
        assert_eq!(Tier::from_selector(selector_for(255)), Tier::Byte);
        assert_eq!(Tier::from_selector(selector_for(256)), Tier::Wide);
        assert_eq!(Tier::from_selector(selector_for(65535)), Tier::Wide);
        assert_eq!(Tier::from_selector(selector_for(65536)), Tier::Full);
        assert_eq!(Tier::from_selector(selector_for(u64::MAX)), Tier::Full);
    }

    #[test]
    fn decision_widths_cover_the_bound() {
        assert_eq!(decision_width(0), 0);
        assert_eq!(decision_width(1), 0);
        assert_eq!(decision_width(2), 1);
        assert_eq!(decision_width(256), 1);
        assert_eq!(decision_width(257), 2);
        assert_eq!(decision_width(1 << 16), 2);
        assert_eq!(decision_width(u64::MAX), 8);
    }

    #[test]
    fn alphabet_has_no_nul_and_no_duplicates() {
        assert!(!ALPHABET.contains(&0));
        for (i, byte) in ALPHABET.iter().enumerate() {
            assert_eq!(alphabet_index(*byte), Some(i as u64));
        }
        assert!((ALPHABET.len() as u64) < 256);
    }
}
