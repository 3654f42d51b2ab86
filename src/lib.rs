//! Integrity checking for chunked package downloads.
//!
//! A `.bpkg` descriptor splits a data file into fixed-size chunks and records
//! the expected hash of every node of a perfect binary hash tree over them.
//! [`Package::load`] parses and validates a descriptor,
//! [`MerkleTree::build`] rebuilds the tree from the bytes on disk, and the
//! tree's query methods report which chunks are already correct, the minimal
//! hash set certifying the current completion state, and the chunks covered
//! by any ancestor hash.

pub mod descriptor;
pub mod hash;
pub mod merkle;

pub use descriptor::{Chunk, FileStatus, Package, ParseError};
pub use merkle::{BuildError, MerkleTree, Node, NodeKind, QueryResult};
