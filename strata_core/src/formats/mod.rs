//! Reference grammars.

pub mod png;
pub mod riff;

pub use png::{Png, PngKind};
pub use riff::{Riff, RiffKind};
