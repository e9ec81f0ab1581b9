//! Clause and unit exchange between workers: per-producer ring buffers with
//! per-reader cursors, and the chunked work pool used by complete
//! vivification passes.

pub mod pool;
pub mod ring;

pub use pool::ChunkPool;
pub use ring::{LockRing, ReferenceSharer};

/// Index of a worker thread, also indexing its exchange rings and stats slot.
pub type WorkerId = usize;
