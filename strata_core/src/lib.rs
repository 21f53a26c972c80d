pub mod accessor;
pub mod buffer;
pub mod checksum;
pub mod config;
pub mod corpus;
pub mod error;
pub mod evil;
pub mod formats;
pub mod grammar;
pub mod mutator;
pub mod sampler;
pub mod stream;
pub mod tracker;

pub use accessor::{Endian, FileAccessor, Limits, Mode, Reserved};
pub use config::StrataConfig;
pub use corpus::{ChunkCorpus, CorpusError, CorpusFile};
pub use error::{MutationError, Resource, WalkError};
pub use grammar::{Grammar, Walk, generate, parse};
pub use mutator::{Mutation, Mutator, Operation, SmartMutator, SpliceOutcome};
pub use tracker::{Chunk, ChunkSummary, InsertionPoint, Placement, ProductionKind};
