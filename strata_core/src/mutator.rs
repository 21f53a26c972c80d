use crate::accessor::{Limits, SpliceWatch};
use crate::corpus::ChunkCorpus;
use crate::error::MutationError;
use crate::grammar::{self, Grammar, Walk};
use crate::tracker::{Chunk, InsertionPoint, ProductionKind};
use rand::Rng;
use std::fmt;
use tracing::debug;

/// A `Mutator` derives a new file from one file of a chunk corpus.
///
/// # Type Parameters
/// * `K`: The production kind of the grammar the corpus was parsed with.
/// * `R`: The type of random number generator used for mutation decisions.
pub trait Mutator<K, R: Rng + ?Sized> {
    /// Mutates the corpus file with index `target`, drawing donors from `corpus`.
    fn mutate(
        &mut self,
        target: usize,
        corpus: &ChunkCorpus<K>,
        rng: &mut R,
    ) -> Result<Mutation<K>, MutationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Replace,
    Insert,
    Delete,
    Abstract,
    Swap,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Replace => "replace",
            Operation::Insert => "insert",
            Operation::Delete => "delete",
            Operation::Abstract => "abstract",
            Operation::Swap => "swap",
        })
    }
}

/// How closely the regenerated chunks matched the spliced decision ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceOutcome {
    Exact,
    /// Signed difference in decision bytes between where a watched chunk ended and where
    /// the splice expected it to end.
    Mismatch(i64),
}

impl SpliceOutcome {
    /// Process exit status used by the command-line front end.
    pub fn exit_code(self) -> i32 {
        match self {
            SpliceOutcome::Exact => 0,
            SpliceOutcome::Mismatch(diff) => diff.clamp(i32::MIN.into(), i32::MAX.into()) as i32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mutation<K> {
    pub operation: Operation,
    /// The regenerated walk; its decisions reproduce the mutated file.
    pub walk: Walk<K>,
    pub outcome: SpliceOutcome,
}

fn compatible<K: ProductionKind>(a: &Chunk<K>, b: &Chunk<K>) -> bool {
    match (a.optional, b.optional) {
        (true, true) => true,
        (false, false) => a.kind == b.kind,
        _ => false,
    }
}

fn describe<K: ProductionKind>(chunk: &Chunk<K>) -> String {
    format!(
        "`{}` ({}, {})",
        chunk.name,
        chunk.kind.name(),
        if chunk.optional { "optional" } else { "mandatory" }
    )
}

/// Structure-aware mutations performed by splicing decision streams and regenerating.
///
/// File bytes are never edited directly: regeneration recomputes every length field and
/// checksum the grammar derives from the spliced chunks.
#[derive(Debug, Clone, Copy)]
pub struct SmartMutator<'g, G> {
    grammar: &'g G,
    limits: Limits,
}

impl<'g, G: Grammar> SmartMutator<'g, G> {
    pub fn new(grammar: &'g G, limits: Limits) -> Self {
        Self { grammar, limits }
    }

    pub fn grammar(&self) -> &'g G {
        self.grammar
    }

    /// Concatenates `parts` and tops the stream up to capacity with fresh entropy.
    fn splice<R: Rng + ?Sized>(
        &self,
        parts: &[&[u8]],
        rng: &mut R,
    ) -> Result<Vec<u8>, MutationError> {
        let capacity = self.limits.stream_capacity;
        let len: usize = parts.iter().map(|part| part.len()).sum();
        if len > capacity {
            return Err(MutationError::CapacityExceeded { len, capacity });
        }
        let mut stream = Vec::with_capacity(capacity);
        for part in parts {
            stream.extend_from_slice(part);
        }
        stream.resize(capacity, 0);
        rng.fill_bytes(&mut stream[len..]);
        Ok(stream)
    }

    fn regenerate(
        &self,
        operation: Operation,
        stream: Vec<u8>,
        watches: Vec<SpliceWatch<G::Kind>>,
    ) -> Result<Mutation<G::Kind>, MutationError> {
        let (walk, watches) = grammar::replay(self.grammar, stream, &self.limits, watches)?;
        let mut outcome = SpliceOutcome::Exact;
        for watch in &watches {
            let observed = watch
                .observed_end
                .ok_or(MutationError::ChunkNotCreated(watch.start))?;
            let Some(expected) = watch.expected_end else {
                continue;
            };
            let diff = observed as i64 - expected as i64;
            if diff != 0 && outcome == SpliceOutcome::Exact {
                outcome = SpliceOutcome::Mismatch(diff);
            }
        }
        debug!(
            grammar = self.grammar.name(),
            %operation,
            ?outcome,
            file_len = walk.file.len(),
            "mutation regenerated"
        );
        Ok(Mutation {
            operation,
            walk,
            outcome,
        })
    }

    fn check_donor(donor: &Chunk<G::Kind>, decisions: &[u8]) -> Result<(), MutationError> {
        if decisions.len() != donor.decision_len() {
            return Err(MutationError::Precondition(format!(
                "donor {} spans {} decision bytes, {} were supplied",
                describe(donor),
                donor.decision_len(),
                decisions.len()
            )));
        }
        Ok(())
    }

    /// Replaces `chunk` of `target` with `donor`, whose decisions are `donor_decisions`.
    pub fn replace<R: Rng + ?Sized>(
        &self,
        target: &Walk<G::Kind>,
        chunk: &Chunk<G::Kind>,
        donor: &Chunk<G::Kind>,
        donor_decisions: &[u8],
        rng: &mut R,
    ) -> Result<Mutation<G::Kind>, MutationError> {
        if !compatible(chunk, donor) {
            return Err(MutationError::Precondition(format!(
                "cannot replace {} with {}",
                describe(chunk),
                describe(donor)
            )));
        }
        Self::check_donor(donor, donor_decisions)?;

        let at = chunk.decisions.start;
        let stream = self.splice(
            &[
                &target.decisions[..at],
                donor_decisions,
                &target.decisions[chunk.decisions.end..],
            ],
            rng,
        )?;
        let watch = SpliceWatch::new(at, Some(donor.kind), Some(at + donor_decisions.len()))
            .at_depth(chunk.depth);
        self.regenerate(Operation::Replace, stream, vec![watch])
    }

    /// Inserts the optional `donor` at one of `target`'s insertion points.
    pub fn insert<R: Rng + ?Sized>(
        &self,
        target: &Walk<G::Kind>,
        point: &InsertionPoint<G::Kind>,
        donor: &Chunk<G::Kind>,
        donor_decisions: &[u8],
        rng: &mut R,
    ) -> Result<Mutation<G::Kind>, MutationError> {
        if !donor.optional {
            return Err(MutationError::Precondition(format!(
                "cannot insert {}: only optional chunks can be inserted",
                describe(donor)
            )));
        }
        if !target.insertion_points.contains(point) {
            return Err(MutationError::Precondition(format!(
                "decision offset {} is not an insertion point of the target",
                point.decision_offset
            )));
        }
        Self::check_donor(donor, donor_decisions)?;

        let at = point.decision_offset;
        let stream = self.splice(
            &[&target.decisions[..at], donor_decisions, &target.decisions[at..]],
            rng,
        )?;
        let watch = SpliceWatch::new(at, Some(donor.kind), Some(at + donor_decisions.len()));
        self.regenerate(Operation::Insert, stream, vec![watch])
    }

    /// Removes the optional `chunk` from `target`.
    ///
    /// Allowed only where another optional chunk follows it directly, or where the chunk
    /// is appendable, so that the walk can continue past the gap.
    pub fn delete<R: Rng + ?Sized>(
        &self,
        target: &Walk<G::Kind>,
        chunk: &Chunk<G::Kind>,
        rng: &mut R,
    ) -> Result<Mutation<G::Kind>, MutationError> {
        if !chunk.optional {
            return Err(MutationError::Precondition(format!(
                "cannot delete mandatory chunk {}",
                describe(chunk)
            )));
        }
        let successor = target
            .chunks
            .iter()
            .find(|next| {
                next.decisions.start == chunk.decisions.end && !next.decisions.is_empty()
            });
        if !chunk.appendable && !successor.is_some_and(|next| next.optional) {
            return Err(MutationError::Precondition(format!(
                "cannot delete {}: it is not appendable and {} follows it",
                describe(chunk),
                successor.map_or_else(|| "no optional chunk".to_string(), describe)
            )));
        }

        let at = chunk.decisions.start;
        let stream = self.splice(
            &[&target.decisions[..at], &target.decisions[chunk.decisions.end..]],
            rng,
        )?;
        let watches = successor
            .map(|next| SpliceWatch::new(at, Some(next.kind), Some(at + next.decision_len())))
            .into_iter()
            .collect();
        self.regenerate(Operation::Delete, stream, watches)
    }

    /// Regenerates `chunk` from fresh entropy and keeps everything after it.
    pub fn abstract_chunk<R: Rng + ?Sized>(
        &self,
        target: &Walk<G::Kind>,
        chunk: &Chunk<G::Kind>,
        rng: &mut R,
    ) -> Result<Mutation<G::Kind>, MutationError> {
        let at = chunk.decisions.start;
        let stream = self.splice(&[&target.decisions[..at]], rng)?;

        let stash = &target.decisions[chunk.decisions.end..];
        let mut tail = stash.to_vec();
        tail.resize(self.limits.stream_capacity.max(stash.len()), 0);
        rng.fill_bytes(&mut tail[stash.len()..]);

        let kind = (!chunk.optional).then_some(chunk.kind);
        let watch = SpliceWatch::new(at, kind, None)
            .at_depth(chunk.depth)
            .restoring(tail);
        self.regenerate(Operation::Abstract, stream, vec![watch])
    }

    /// Exchanges two disjoint chunks of `target`.
    pub fn swap<R: Rng + ?Sized>(
        &self,
        target: &Walk<G::Kind>,
        a: &Chunk<G::Kind>,
        b: &Chunk<G::Kind>,
        rng: &mut R,
    ) -> Result<Mutation<G::Kind>, MutationError> {
        if !compatible(a, b) {
            return Err(MutationError::Precondition(format!(
                "cannot swap {} with {}",
                describe(a),
                describe(b)
            )));
        }
        let (first, second) = if a.decisions.start <= b.decisions.start {
            (a, b)
        } else {
            (b, a)
        };
        if first.decisions.end > second.decisions.start {
            return Err(MutationError::Precondition(format!(
                "cannot swap overlapping chunks {} and {}",
                describe(first),
                describe(second)
            )));
        }

        let decisions = &target.decisions;
        let moved_second = &decisions[second.decisions.clone()];
        let middle = &decisions[first.decisions.end..second.decisions.start];
        let moved_first = &decisions[first.decisions.clone()];
        let at = first.decisions.start;
        let stream = self.splice(
            &[
                &decisions[..at],
                moved_second,
                middle,
                moved_first,
                &decisions[second.decisions.end..],
            ],
            rng,
        )?;

        let second_at = at + moved_second.len() + middle.len();
        let watches = vec![
            SpliceWatch::new(at, Some(second.kind), Some(at + moved_second.len())),
            SpliceWatch::new(
                second_at,
                Some(first.kind),
                Some(second_at + moved_first.len()),
            ),
        ];
        self.regenerate(Operation::Swap, stream, watches)
    }

    fn pick<'c, T, R: Rng + ?Sized>(
        items: &'c [T],
        what: &str,
        rng: &mut R,
    ) -> Result<&'c T, MutationError> {
        if items.is_empty() {
            return Err(MutationError::Precondition(format!("no {what} available")));
        }
        Ok(&items[rng.random_range(0..items.len())])
    }
}

impl<'g, G, R> Mutator<G::Kind, R> for SmartMutator<'g, G>
where
    G: Grammar,
    R: Rng + ?Sized,
{
    /// Picks an operation at random, then suitable chunks from the target and donors
    /// from the whole corpus.
    fn mutate(
        &mut self,
        target: usize,
        corpus: &ChunkCorpus<G::Kind>,
        rng: &mut R,
    ) -> Result<Mutation<G::Kind>, MutationError> {
        let walk = &corpus
            .file(target)
            .map_err(|err| MutationError::Precondition(err.to_string()))?
            .walk;
        let donor_decisions = |donor: &Chunk<G::Kind>| {
            corpus
                .decisions_of(donor)
                .map_err(|err| MutationError::Precondition(err.to_string()))
        };

        match rng.random_range(0..5) {
            0 => {
                let chunk = Self::pick(&walk.chunks, "chunk", rng)?;
                let donor = corpus.random_donor(chunk, rng).ok_or_else(|| {
                    MutationError::Precondition(format!("no donor for {}", describe(chunk)))
                })?;
                self.replace(walk, chunk, donor, donor_decisions(donor)?, rng)
            }
            1 => {
                let point = Self::pick(&walk.insertion_points, "insertion point", rng)?;
                let donor = corpus
                    .random_optional(rng)
                    .ok_or_else(|| MutationError::Precondition("no optional donor".into()))?;
                self.insert(walk, point, donor, donor_decisions(donor)?, rng)
            }
            2 => {
                let optional: Vec<_> =
                    walk.chunks.iter().filter(|c| c.optional).cloned().collect();
                let chunk = Self::pick(&optional, "optional chunk", rng)?;
                self.delete(walk, chunk, rng)
            }
            3 => {
                let chunk = Self::pick(&walk.chunks, "chunk", rng)?;
                self.abstract_chunk(walk, chunk, rng)
            }
            _ => {
                let a = Self::pick(&walk.chunks, "chunk", rng)?;
                let partners: Vec<_> = walk
                    .chunks
                    .iter()
                    .filter(|b| {
                        compatible(a, b)
                            && (a.decisions.end <= b.decisions.start
                                || b.decisions.end <= a.decisions.start)
                    })
                    .cloned()
                    .collect();
                let b = Self::pick(&partners, "swap partner", rng)?;
                self.swap(walk, a, b, rng)
            }
        }
    }
}
