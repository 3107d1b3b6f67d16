//! # Blocked Sequence Set Engine
//!
//! A file organization built from fixed-size disk blocks holding
//! variable-length records, doubly linked into ascending-key order
//! independent of physical placement.
//!
//! ## Core idea
//! Records live packed inside 512-byte (configurable) block slots. Blocks
//! chain through successor/predecessor links, so logical key order never
//! requires moving data between slots — an insert that overflows a block
//! splits it, a delete that underflows one merges or redistributes with a
//! neighbor, and freed slots queue on an avail free-list for reuse. A
//! sparse index maps each block's highest key to its block number so a
//! point lookup reads exactly one block.

pub mod block;
pub mod error;
pub mod file;
pub mod index;
pub mod ingest;
pub mod record;

// Public re-exports for the top-level API
pub use block::{Block, BlockType};
pub use error::{DecodeError, Error, Result};
pub use file::{BlockSummary, BssFile, LoadStats};
pub use index::SparseIndex;
pub use record::ZipRecord;
