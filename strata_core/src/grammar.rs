use crate::accessor::{FileAccessor, Limits, Mode, SpliceWatch};
use crate::error::WalkError;
use crate::tracker::{Chunk, ChunkSummary, InsertionPoint, ProductionKind};
use tracing::debug;

/// A binary format described as a fixed sequence of calls into [`FileAccessor`].
///
/// The same `walk` runs in both directions: it generates a file from a decision stream
/// and parses a file back into the decision stream that produces it.
pub trait Grammar {
    type Kind: ProductionKind;

    fn name(&self) -> &'static str;

    /// Extension given to generated files, without the dot.
    fn file_extension(&self) -> &'static str;

    fn walk(&self, fa: &mut FileAccessor<Self::Kind>) -> Result<(), WalkError>;
}

/// Everything a completed walk produced.
#[derive(Debug, Clone)]
pub struct Walk<K> {
    pub mode: Mode,
    /// The generated file, or the parsed input.
    pub file: Vec<u8>,
    /// The consumed decisions: replaying them regenerates `file`.
    pub decisions: Vec<u8>,
    /// Production instances in the order they were entered.
    pub chunks: Vec<Chunk<K>>,
    pub insertion_points: Vec<InsertionPoint<K>>,
}

impl<K: ProductionKind> Walk<K> {
    /// Outermost chunk covering exactly the inclusive file byte range `start..=end`.
    pub fn find_chunk(&self, start: usize, end: usize) -> Option<&Chunk<K>> {
        self.chunks
            .iter()
            .find(|chunk| chunk.file.start == start && chunk.file.end == end + 1)
    }

    pub fn chunks_of(&self, kind: K) -> impl Iterator<Item = &Chunk<K>> {
        self.chunks.iter().filter(move |chunk| chunk.kind == kind)
    }

    pub fn insertion_point_at(&self, file_offset: usize) -> Option<&InsertionPoint<K>> {
        self.insertion_points
            .iter()
            .find(|point| point.file_offset == file_offset)
    }

    pub fn decisions_of(&self, chunk: &Chunk<K>) -> &[u8] {
        &self.decisions[chunk.decisions.clone()]
    }

    pub fn summaries(&self) -> Vec<ChunkSummary> {
        self.chunks.iter().map(ChunkSummary::from).collect()
    }
}

fn run<G: Grammar>(
    grammar: &G,
    mode: Mode,
    decisions: Vec<u8>,
    input: Option<Vec<u8>>,
    limits: &Limits,
    watches: Vec<SpliceWatch<G::Kind>>,
) -> Result<(Walk<G::Kind>, Vec<SpliceWatch<G::Kind>>), WalkError> {
    let mut fa = FileAccessor::new(limits);
    fa.seed(mode, decisions, input)?;
    fa.set_watches(watches);
    let outcome = grammar.walk(&mut fa);
    if let Err(err) = &outcome {
        debug!(grammar = grammar.name(), ?mode, %err, "walk ended early");
    }
    let (walk, watches) = fa.finish(outcome)?;
    debug!(
        grammar = grammar.name(),
        ?mode,
        file_len = walk.file.len(),
        decisions = walk.decisions.len(),
        chunks = walk.chunks.len(),
        "walk complete"
    );
    Ok((walk, watches))
}

/// Materializes a file from `decisions`.
pub fn generate<G: Grammar>(
    grammar: &G,
    decisions: &[u8],
    limits: &Limits,
) -> Result<Walk<G::Kind>, WalkError> {
    run(grammar, Mode::Generate, decisions.to_vec(), None, limits, Vec::new())
        .map(|(walk, _)| walk)
}

/// Reconstructs the canonical decision stream for `input`.
pub fn parse<G: Grammar>(
    grammar: &G,
    input: &[u8],
    limits: &Limits,
) -> Result<Walk<G::Kind>, WalkError> {
    run(grammar, Mode::Parse, Vec::new(), Some(input.to_vec()), limits, Vec::new())
        .map(|(walk, _)| walk)
}

/// Regenerates from a spliced stream while observing the given splice points.
pub(crate) fn replay<G: Grammar>(
    grammar: &G,
    decisions: Vec<u8>,
    limits: &Limits,
    watches: Vec<SpliceWatch<G::Kind>>,
) -> Result<(Walk<G::Kind>, Vec<SpliceWatch<G::Kind>>), WalkError> {
    run(grammar, Mode::Generate, decisions, None, limits, watches)
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::accessor::Endian;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Toy {
        Header,
        Record,
    }

    impl ProductionKind for Toy {
        fn name(self) -> &'static str {
            match self {
                Toy::Header => "header",
                Toy::Record => "record",
            }
        }
    }

    /// Magic, then records of `tag len payload` until the file ends.
    pub struct Records;

    impl Grammar for Records {
        type Kind = Toy;

        fn name(&self) -> &'static str {
            "records"
        }

        fn file_extension(&self) -> &'static str {
            "rec"
        }

        fn walk(&self, fa: &mut FileAccessor<Toy>) -> Result<(), WalkError> {
            fa.set_endian(Endian::Big);
            fa.scope("header", Toy::Header, |fa| {
                fa.with_evil_bit(false, |fa| fa.read_bytes_known(2, &[b"RC"]))?;
                fa.read_u8()?;
                Ok(())
            })?;
            while !fa.at_end_of_file(0.25)? {
                fa.scope("record", Toy::Record, |fa| {
                    fa.read_uint_known(1, &[1, 2, 3])?;
                    let len = fa.read_u8()?;
                    fa.read_bytes(len as usize)?;
                    Ok(())
                })?;
            }
            Ok(())
        }
    }

    /// Magic byte, then `tag value` records picked by peeking at the tag, then a zero.
    pub struct Tagged;

    impl Grammar for Tagged {
        type Kind = Toy;

        fn name(&self) -> &'static str {
            "tagged"
        }

        fn file_extension(&self) -> &'static str {
            "tag"
        }

        fn walk(&self, fa: &mut FileAccessor<Toy>) -> Result<(), WalkError> {
            fa.scope("header", Toy::Header, |fa| fa.read_u8().map(drop))?;
            loop {
                let tag = fa.with_evil_bit(false, |fa| fa.lookahead_uint_known(0, 1, &[0, 1, 2]))?;
                if tag == 0 {
                    fa.read_uint_known(1, &[0])?;
                    return Ok(());
                }
                fa.scope("record", Toy::Record, |fa| {
                    fa.with_evil_bit(false, |fa| fa.read_uint_known(1, &[1, 2]))?;
                    fa.read_u8()?;
                    Ok(())
                })?;
            }
        }
    }

    pub fn limits() -> Limits {
        Limits {
            stream_capacity: 1024,
            file_capacity: 512,
            ..Limits::default()
        }
    }
}
