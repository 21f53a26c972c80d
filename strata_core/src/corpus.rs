use crate::accessor::Limits;
use crate::grammar::{self, Grammar, Walk};
use crate::tracker::{Chunk, InsertionPoint, ProductionKind};
use rand::Rng;
use std::collections::HashMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can arise while filling a chunk corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// A seed file or directory could not be read.
    #[error("Corpus I/O error: {0}")]
    Io(String),

    /// The requested file index is not in the corpus.
    #[error("File index {0} not found in corpus")]
    FileNotFound(usize),
}

/// One parsed input file.
#[derive(Debug, Clone)]
pub struct CorpusFile<K> {
    /// Where the file came from, for reports.
    pub label: String,
    pub walk: Walk<K>,
}

/// The non-optional chunks of one kind that a file contributed, as a slice of the
/// kind-keyed index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSpan<K> {
    pub kind: K,
    pub start: usize,
    pub count: usize,
}

/// Per-session indexes over parsed input files.
///
/// Every chunk copied in is stamped with the index of the file it came from, so donor
/// decisions can always be recovered from [`ChunkCorpus::decisions_of`]. The indexes are
/// built once per file and only read afterwards.
#[derive(Debug)]
pub struct ChunkCorpus<K> {
    files: Vec<CorpusFile<K>>,
    optional: Vec<Chunk<K>>,
    optional_bounds: Vec<Range<usize>>,
    non_optional: HashMap<K, Vec<Chunk<K>>>,
    spans: Vec<Vec<TypeSpan<K>>>,
}

impl<K: ProductionKind> ChunkCorpus<K> {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            optional: Vec::new(),
            optional_bounds: Vec::new(),
            non_optional: HashMap::new(),
            spans: Vec::new(),
        }
    }

    /// Indexes a parsed file and returns its file index.
    pub fn add(&mut self, label: impl Into<String>, walk: Walk<K>) -> usize {
        let file_index = self.files.len();

        let first_optional = self.optional.len();
        let mut by_kind: Vec<(K, Vec<Chunk<K>>)> = Vec::new();
        for chunk in &walk.chunks {
            let mut chunk = chunk.clone();
            chunk.file_index = file_index;
            if chunk.optional {
                self.optional.push(chunk);
                continue;
            }
            match by_kind.iter_mut().find(|(kind, _)| *kind == chunk.kind) {
                Some((_, chunks)) => chunks.push(chunk),
                None => by_kind.push((chunk.kind, vec![chunk])),
            }
        }
        self.optional_bounds.push(first_optional..self.optional.len());

        let mut spans = Vec::with_capacity(by_kind.len());
        for (kind, chunks) in by_kind {
            let index = self.non_optional.entry(kind).or_default();
            spans.push(TypeSpan {
                kind,
                start: index.len(),
                count: chunks.len(),
            });
            index.extend(chunks);
        }
        self.spans.push(spans);

        let label = label.into();
        debug!(
            file_index,
            label = %label,
            chunks = walk.chunks.len(),
            insertion_points = walk.insertion_points.len(),
            "indexed corpus file"
        );
        self.files.push(CorpusFile { label, walk });
        file_index
    }

    /// Parses every seed file under `seed_paths` and indexes those that parse.
    ///
    /// A path may be a file or a directory; directories are read one level deep and hidden
    /// files are skipped. Files the grammar rejects are logged and skipped.
    pub fn load_seeds<G>(
        &mut self,
        grammar: &G,
        limits: &Limits,
        seed_paths: &[PathBuf],
    ) -> Result<usize, CorpusError>
    where
        G: Grammar<Kind = K>,
    {
        let mut loaded_count = 0;
        for path_buf in seed_paths {
            let path_ref = path_buf.as_path();
            if path_ref.is_file() {
                loaded_count += usize::from(self.load_seed(grammar, limits, path_ref)?);
            } else if path_ref.is_dir() {
                let mut entries = Vec::new();
                for entry_result in fs::read_dir(path_ref).map_err(|e| {
                    CorpusError::Io(format!("Failed to read seed directory {path_ref:?}: {e}"))
                })? {
                    let entry = entry_result.map_err(|e| {
                        CorpusError::Io(format!("Error reading entry in {path_ref:?}: {e}"))
                    })?;
                    entries.push(entry.path());
                }
                entries.sort();
                for file_path_in_dir in entries {
                    let hidden = file_path_in_dir
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with('.'));
                    if hidden || !file_path_in_dir.is_file() {
                        continue;
                    }
                    loaded_count +=
                        usize::from(self.load_seed(grammar, limits, &file_path_in_dir)?);
                }
            } else {
                warn!(path = ?path_ref, "seed path does not exist");
            }
        }
        Ok(loaded_count)
    }

    fn load_seed<G>(
        &mut self,
        grammar: &G,
        limits: &Limits,
        path: &Path,
    ) -> Result<bool, CorpusError>
    where
        G: Grammar<Kind = K>,
    {
        let data = fs::read(path)
            .map_err(|e| CorpusError::Io(format!("Failed to read seed file {path:?}: {e}")))?;
        match grammar::parse(grammar, &data, limits) {
            Ok(walk) => {
                self.add(path.display().to_string(), walk);
                Ok(true)
            }
            Err(err) => {
                warn!(
                    path = ?path,
                    grammar = grammar.name(),
                    validity = err.validity(data.len()),
                    %err,
                    "skipping seed that does not parse"
                );
                Ok(false)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file(&self, file_index: usize) -> Result<&CorpusFile<K>, CorpusError> {
        self.files
            .get(file_index)
            .ok_or(CorpusError::FileNotFound(file_index))
    }

    pub fn optional_chunks(&self) -> &[Chunk<K>] {
        &self.optional
    }

    /// Optional chunks contributed by one file.
    pub fn optional_in(&self, file_index: usize) -> &[Chunk<K>] {
        self.optional_bounds
            .get(file_index)
            .map(|bounds| &self.optional[bounds.clone()])
            .unwrap_or_default()
    }

    pub fn chunks_of_kind(&self, kind: K) -> &[Chunk<K>] {
        self.non_optional
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Non-optional chunks of `kind` contributed by one file.
    pub fn chunks_of_kind_in(&self, file_index: usize, kind: K) -> &[Chunk<K>] {
        let span = self
            .spans
            .get(file_index)
            .and_then(|spans| spans.iter().find(|span| span.kind == kind));
        match span {
            Some(span) => &self.chunks_of_kind(kind)[span.start..span.start + span.count],
            None => &[],
        }
    }

    pub fn insertion_points(&self, file_index: usize) -> &[InsertionPoint<K>] {
        self.files
            .get(file_index)
            .map(|file| file.walk.insertion_points.as_slice())
            .unwrap_or_default()
    }

    /// The decision bytes a chunk spans in the file it came from.
    pub fn decisions_of(&self, chunk: &Chunk<K>) -> Result<&[u8], CorpusError> {
        Ok(&self.file(chunk.file_index)?.walk.decisions[chunk.decisions.clone()])
    }

    pub fn random_file<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        (!self.files.is_empty()).then(|| rng.random_range(0..self.files.len()))
    }

    /// A donor that could legally stand in for `target`: any optional chunk for an
    /// optional target, a chunk of the same kind otherwise.
    pub fn random_donor<R: Rng + ?Sized>(
        &self,
        target: &Chunk<K>,
        rng: &mut R,
    ) -> Option<&Chunk<K>> {
        let pool = if target.optional {
            self.optional_chunks()
        } else {
            self.chunks_of_kind(target.kind)
        };
        (!pool.is_empty()).then(|| &pool[rng.random_range(0..pool.len())])
    }

    pub fn random_optional<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Chunk<K>> {
        let pool = self.optional_chunks();
        (!pool.is_empty()).then(|| &pool[rng.random_range(0..pool.len())])
    }
}

impl<K: ProductionKind> Default for ChunkCorpus<K> {
    fn default() -> Self {
        Self::new()
    }
}
