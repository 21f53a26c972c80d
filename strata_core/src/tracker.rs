use crate::error::{Resource, WalkError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Range;

/// Default bound on nested productions.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// The type tag of a grammar production.
///
/// Each grammar defines a closed enum of its node kinds; the tracker only needs to copy,
/// compare and name them.
pub trait ProductionKind: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    fn name(self) -> &'static str;
}

/// One completed instance of a named production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<K> {
    /// Index of the originating file in a corpus; zero until a corpus adopts the walk.
    pub file_index: usize,
    /// Dotted instance path, e.g. `png.chunk[2].crc`.
    pub name: String,
    pub kind: K,
    /// File bytes touched by the instance; empty (`cursor..cursor`) when it wrote nothing.
    pub file: Range<usize>,
    /// Decisions consumed by the instance, including the lookahead that gated it.
    pub decisions: Range<usize>,
    pub optional: bool,
    pub appendable: bool,
    pub depth: usize,
    pub parent: Option<usize>,
}

impl<K> Chunk<K> {
    pub fn decision_len(&self) -> usize {
        self.decisions.len()
    }

    /// Whether `other` lies entirely within this chunk's decision range.
    pub fn contains_decisions_of(&self, other: &Chunk<K>) -> bool {
        self.decisions.start <= other.decisions.start && other.decisions.end <= self.decisions.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    BeforeOptional,
    AfterAppendable,
}

/// A decision offset where an optional chunk can legally be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertionPoint<K> {
    pub decision_offset: usize,
    pub file_offset: usize,
    pub kind: K,
    pub name: String,
    pub placement: Placement,
}

/// Serializable view of a chunk for reports.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkSummary {
    pub name: String,
    pub kind: &'static str,
    pub file_start: usize,
    pub file_end: usize,
    pub decision_start: usize,
    pub decision_end: usize,
    pub optional: bool,
    pub appendable: bool,
}

impl<K: ProductionKind> From<&Chunk<K>> for ChunkSummary {
    fn from(chunk: &Chunk<K>) -> Self {
        Self {
            name: chunk.name.clone(),
            kind: chunk.kind.name(),
            file_start: chunk.file.start,
            file_end: chunk.file.end,
            decision_start: chunk.decisions.start,
            decision_end: chunk.decisions.end,
            optional: chunk.optional,
            appendable: chunk.appendable,
        }
    }
}

#[derive(Debug)]
struct StackCell<K> {
    path: String,
    kind: K,
    slot: usize,
    rand_start: usize,
    optional: bool,
    min: usize,
    max: usize,
    touched: bool,
    children: HashMap<&'static str, usize>,
}

/// What `enter` decided about a new production instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entered {
    pub slot: usize,
    pub rand_start: usize,
    pub optional: bool,
}

/// Derives chunks from the call structure of one walk.
///
/// Chunks live in an arena indexed by entry order; the whole arena is handed out (or
/// dropped) when the walk ends.
#[derive(Debug)]
pub struct ChunkTracker<K> {
    stack: Vec<StackCell<K>>,
    chunks: Vec<Chunk<K>>,
    /// The production closed most recently, cleared by the next `enter`.
    last_exit: Option<usize>,
    insertion_points: Vec<InsertionPoint<K>>,
    lookahead: Option<Range<usize>>,
    root_children: HashMap<&'static str, usize>,
    max_depth: usize,
}

impl<K: ProductionKind> ChunkTracker<K> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            stack: Vec::new(),
            chunks: Vec::new(),
            last_exit: None,
            insertion_points: Vec::new(),
            lookahead: None,
            root_children: HashMap::new(),
            max_depth,
        }
    }

    pub fn reset(&mut self) {
        self.stack.clear();
        self.chunks.clear();
        self.last_exit = None;
        self.insertion_points.clear();
        self.lookahead = None;
        self.root_children.clear();
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Name path of the innermost active production.
    pub fn path(&self) -> String {
        self.stack
            .last()
            .map_or_else(|| "<root>".to_string(), |cell| cell.path.clone())
    }

    pub fn enter(
        &mut self,
        name: &'static str,
        kind: K,
        stream_pos: usize,
        file_cursor: usize,
    ) -> Result<Entered, WalkError> {
        if self.stack.len() >= self.max_depth {
            return Err(WalkError::CapacityExceeded {
                resource: Resource::RecursionDepth,
                limit: self.max_depth,
            });
        }

        let siblings = match self.stack.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.root_children,
        };
        let count = siblings.entry(name).or_insert(0);
        let instance = if *count == 0 {
            name.to_string()
        } else {
            format!("{name}[{count}]")
        };
        *count += 1;
        let path = match self.stack.last() {
            Some(parent) => format!("{}.{instance}", parent.path),
            None => instance,
        };

        let gate = self.lookahead.take_if(|gate| gate.end == stream_pos);
        let (rand_start, optional) = match gate {
            Some(gate) => (gate.start, true),
            None => (stream_pos, false),
        };

        let slot = self.chunks.len();
        self.chunks.push(Chunk {
            file_index: 0,
            name: path.clone(),
            kind,
            file: file_cursor..file_cursor,
            decisions: rand_start..rand_start,
            optional,
            appendable: false,
            depth: self.stack.len(),
            parent: self.stack.last().map(|cell| cell.slot),
        });
        self.last_exit = None;

        if optional {
            self.insertion_points.push(InsertionPoint {
                decision_offset: rand_start,
                file_offset: file_cursor,
                kind,
                name: path.clone(),
                placement: Placement::BeforeOptional,
            });
        }

        self.stack.push(StackCell {
            path,
            kind,
            slot,
            rand_start,
            optional,
            min: usize::MAX,
            max: 0,
            touched: false,
            children: HashMap::new(),
        });
        Ok(Entered {
            slot,
            rand_start,
            optional,
        })
    }

    /// Closes the innermost production and returns its arena slot.
    pub fn exit(&mut self, stream_pos: usize, file_cursor: usize) -> Option<usize> {
        let cell = self.stack.pop()?;
        let file = if cell.touched {
            cell.min..cell.max
        } else {
            file_cursor..file_cursor
        };
        if cell.touched {
            if let Some(parent) = self.stack.last_mut() {
                parent.min = parent.min.min(cell.min);
                parent.max = parent.max.max(cell.max);
                parent.touched = true;
            }
        }

        let chunk = &mut self.chunks[cell.slot];
        chunk.file = file;
        chunk.decisions = cell.rand_start..stream_pos;
        debug_assert_eq!(chunk.kind, cell.kind);
        debug_assert_eq!(chunk.optional, cell.optional);
        self.last_exit = Some(cell.slot);
        Some(cell.slot)
    }

    /// Records that the innermost production touched `range` of the file.
    pub fn touch(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        if let Some(cell) = self.stack.last_mut() {
            cell.min = cell.min.min(range.start);
            cell.max = cell.max.max(range.end);
            cell.touched = true;
        }
    }

    /// Records a lookahead whose decisions occupy `decisions`.
    ///
    /// The outermost production that closed exactly where the lookahead starts becomes
    /// appendable, optional or not, and the next production entered where the lookahead
    /// ends becomes optional.
    pub fn lookahead(&mut self, decisions: Range<usize>) {
        if let Some(slot) = self.last_exit.take() {
            let chunk = &mut self.chunks[slot];
            if chunk.decisions.end == decisions.start && !chunk.appendable {
                chunk.appendable = true;
                self.insertion_points.push(InsertionPoint {
                    decision_offset: decisions.start,
                    file_offset: chunk.file.end,
                    kind: chunk.kind,
                    name: chunk.name.clone(),
                    placement: Placement::AfterAppendable,
                });
            }
        }
        self.lookahead = Some(decisions);
    }

    /// Closes productions still open (a walk that stopped early) and hands out the arena.
    pub fn finish(
        &mut self,
        stream_pos: usize,
        file_cursor: usize,
    ) -> (Vec<Chunk<K>>, Vec<InsertionPoint<K>>) {
        while self.exit(stream_pos, file_cursor).is_some() {}
        let chunks = std::mem::take(&mut self.chunks);
        let mut points = std::mem::take(&mut self.insertion_points);
        points.sort_by_key(|point| {
            (
                point.decision_offset,
                point.placement == Placement::BeforeOptional,
            )
        });
        self.reset();
        (chunks, points)
    }
}
