use std::fmt;
use thiserror::Error;

/// The bounded resources a walk can run out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    DecisionStream,
    FileBuffer,
    RecursionDepth,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::DecisionStream => f.write_str("decision stream"),
            Resource::FileBuffer => f.write_str("file buffer"),
            Resource::RecursionDepth => f.write_str("recursion depth"),
        }
    }
}

/// Errors that abort a grammar walk.
///
/// Every variant unwinds the walk that raised it; the partially built file and
/// decision stream are discarded by the runner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalkError {
    /// The bytes seen do not match what generation would have produced, or a primitive
    /// was asked to do something the buffers cannot represent.
    /// `offset` is the number of file bytes that were materialized before the failure.
    #[error("structural violation at file offset {offset} in `{path}`: {reason}")]
    Structural {
        offset: usize,
        path: String,
        reason: String,
    },

    /// The grammar itself decided the input is not of its format. Code 0 means
    /// "stop here, but keep what was produced".
    #[error("grammar stopped with status {code}: {reason}")]
    GrammarStop { code: i32, reason: String },

    /// A stream, file or depth ceiling was reached.
    #[error("{resource} capacity of {limit} exceeded")]
    CapacityExceeded { resource: Resource, limit: usize },
}

impl WalkError {
    /// Fraction of `input_len` that was successfully parsed before a structural violation.
    pub fn validity(&self, input_len: usize) -> Option<f64> {
        match self {
            WalkError::Structural { offset, .. } if input_len > 0 => {
                Some((*offset).min(input_len) as f64 / input_len as f64)
            }
            _ => None,
        }
    }
}

/// Errors raised by the smart-mutation engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Chunk types, optionality or positions do not allow the operation.
    /// Raised before any decision byte is moved.
    #[error("mutation precondition failed: {0}")]
    Precondition(String),

    /// The spliced decision stream would not fit the stream capacity.
    #[error("spliced decision stream of {len} bytes exceeds capacity {capacity}")]
    CapacityExceeded { len: usize, capacity: usize },

    /// The replayed walk never opened the chunk expected at the splice point.
    #[error("chunk expected at decision offset {0} was not created by the replayed walk")]
    ChunkNotCreated(usize),

    /// The replayed walk itself failed.
    #[error("replayed walk failed: {0}")]
    Walk(#[from] WalkError),
}

impl MutationError {
    /// Process exit status used by the command-line front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            MutationError::Precondition(_) => -1,
            MutationError::ChunkNotCreated(_) => -2,
            MutationError::CapacityExceeded { .. } => -3,
            MutationError::Walk(walk_error) => walk_exit_code(walk_error),
        }
    }
}

/// Process exit status for a failed walk.
pub fn walk_exit_code(error: &WalkError) -> i32 {
    match error {
        WalkError::GrammarStop { code, .. } => *code,
        WalkError::CapacityExceeded { .. } => -3,
        WalkError::Structural { .. } => -4,
    }
}
