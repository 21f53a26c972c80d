/// One in this many coin bytes is "evil" when the evil bit is set.
pub const EVIL_ONE_IN: u64 = 128;

/// Coin byte a parse walk records for an in-domain value.
pub const GOOD_COIN: u64 = 1;
/// Coin byte a parse walk records for an out-of-domain value.
pub const EVIL_COIN: u64 = 0;

/// The scoped permission to substitute out-of-domain values for known-value draws.
///
/// Grammars clear it around fields that must stay valid (magic numbers, type tags that
/// drive control flow) and restore the previous value afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvilBit {
    allowed: bool,
}

impl EvilBit {
    pub fn new(allowed: bool) -> Self {
        Self { allowed }
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    /// Sets the bit and returns the previous value so callers can restore it.
    pub fn set(&mut self, allowed: bool) -> bool {
        std::mem::replace(&mut self.allowed, allowed)
    }

    /// Interprets a drawn coin byte.
    pub fn is_evil(&self, coin: u64) -> bool {
        self.allowed && coin % EVIL_ONE_IN == 0
    }
}

impl Default for EvilBit {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_bit_is_never_evil() {
        let bit = EvilBit::new(false);
        assert!((0..256).all(|coin| !bit.is_evil(coin)));
    }

    #[test]
    fn set_bit_is_evil_one_time_in_128() {
        let bit = EvilBit::new(true);
        let evil = (0..256).filter(|coin| bit.is_evil(*coin)).count();
        assert_eq!(evil, 2);
        assert!(bit.is_evil(EVIL_COIN));
        assert!(!bit.is_evil(GOOD_COIN));
    }

    #[test]
    fn set_returns_the_previous_value() {
        let mut bit = EvilBit::default();
        assert!(bit.set(false));
        assert!(!bit.set(true));
        assert!(bit.allowed());
    }
}
