//! Hash tree construction and queries.
//!
//! The tree shape is fully determined by the chunk count: a perfect binary
//! tree whose leaves are the package's chunks in ascending offset order.
//! Nodes live in an arena in heap order (root at index 0, children of `i` at
//! `2i + 1` and `2i + 2`), so internal nodes occupy indices `0..n-1` in
//! exactly the descriptor's flat hash order and leaves occupy `n-1..2n-1` in
//! chunk order.

use std::fs::File;
use std::io::{BufReader, Read};

use log::debug;
use thiserror::Error;

use crate::descriptor::Package;
use crate::hash;

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("cannot read data file {path}")]
  UnreadableDataFile {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("chunk count {0} is not a power of two")]
  NonPowerOfTwoChunks(usize),
  #[error("descriptor declares {declared} internal hashes for {chunks} chunks")]
  InternalHashMismatch { declared: usize, chunks: usize },
}

/// Uniform output shape of every query: an ordered list of hash strings.
pub type QueryResult = Vec<String>;

#[derive(Debug, Clone)]
pub enum NodeKind {
  Leaf { data: Vec<u8> },
  Branch { left: usize, right: usize },
}

/// One vertex of the hash tree.
#[derive(Debug, Clone)]
pub struct Node {
  /// Binary path from the root; the root itself carries the sentinel `root`.
  pub key: String,
  /// Hash the descriptor declares for this position.
  pub expected_hash: String,
  /// Hash derived from the on-disk bytes, bottom-up.
  pub computed_hash: String,
  pub kind: NodeKind,
}

impl Node {
  pub fn is_leaf(&self) -> bool {
    matches!(self.kind, NodeKind::Leaf { .. })
  }

  /// A node is completed when the bytes on disk hash to the declared value.
  pub fn is_completed(&self) -> bool {
    self.computed_hash == self.expected_hash
  }
}

/// A built hash tree. Owns every node; queries borrow and never mutate.
pub struct MerkleTree {
  nodes: Vec<Node>,
  leaf_count: usize,
}

impl MerkleTree {
  /// Reconstruct the tree for `package`, reading the data file once.
  ///
  /// The block size is `total_size / chunk_count` with integer division;
  /// blocks cut short by EOF are zero-filled, so a partially written data
  /// file builds a tree whose missing ranges simply fail verification.
  pub fn build(package: &Package) -> Result<MerkleTree, BuildError> {
    let n = package.chunk_count();
    if n == 0 || !n.is_power_of_two() {
      return Err(BuildError::NonPowerOfTwoChunks(n));
    }
    if package.hashes.len() != n - 1 {
      return Err(BuildError::InternalHashMismatch { declared: package.hashes.len(), chunks: n });
    }

    let height = n.trailing_zeros();
    let block_size = package.total_size as usize / n;
    debug!("building tree of height {height}: {n} blocks of {block_size} bytes from {}", package.filename);

    let file = File::open(&package.filename).map_err(|e| BuildError::UnreadableDataFile {
      path: package.filename.clone(),
      source: e,
    })?;
    let mut reader = BufReader::new(file);

    // Leaves first, one block per chunk in ascending offset order.
    let mut leaves = Vec::with_capacity(n);
    for (i, chunk) in package.chunks.iter().enumerate() {
      let data = read_block(&mut reader, block_size).map_err(|e| BuildError::UnreadableDataFile {
        path: package.filename.clone(),
        source: e,
      })?;
      leaves.push(Node {
        key: node_key(n - 1 + i),
        expected_hash: chunk.hash.clone(),
        computed_hash: hash::digest(&data),
        kind: NodeKind::Leaf { data },
      });
    }

    // Internal levels bottom-up, pairing adjacent nodes left to right. The
    // heap index doubles as the index into the descriptor's flat hash list.
    let mut levels = vec![leaves];
    for depth in (0..height).rev() {
      let children = levels.last().expect("at least the leaf level");
      let first = (1usize << depth) - 1;
      let mut parents = Vec::with_capacity(1 << depth);
      for (j, pair) in children.chunks_exact(2).enumerate() {
        let index = first + j;
        parents.push(Node {
          key: node_key(index),
          expected_hash: package.hashes[index].clone(),
          computed_hash: hash::combine(&pair[0].computed_hash, &pair[1].computed_hash),
          kind: NodeKind::Branch { left: 2 * index + 1, right: 2 * index + 2 },
        });
      }
      levels.push(parents);
    }

    let nodes = levels.into_iter().rev().flatten().collect::<Vec<_>>();
    Ok(MerkleTree { nodes, leaf_count: n })
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn leaf_count(&self) -> usize {
    self.leaf_count
  }

  pub fn root(&self) -> &Node {
    &self.nodes[0]
  }

  /// Raw payload of leaf `index`, in left-to-right leaf order.
  pub fn chunk_data(&self, index: usize) -> Option<&[u8]> {
    if index >= self.leaf_count {
      return None;
    }
    match &self.nodes[self.leaf_count - 1 + index].kind {
      NodeKind::Leaf { data } => Some(data),
      NodeKind::Branch { .. } => None,
    }
  }

  /// Every node's expected hash: internal nodes in the descriptor's flat
  /// order, then chunk hashes left to right.
  pub fn all_hashes(&self) -> QueryResult {
    self.nodes.iter().map(|node| node.expected_hash.clone()).collect()
  }

  /// Hashes of the chunks whose on-disk bytes are already correct, left to
  /// right. Mismatching chunks are omitted.
  pub fn completed_chunks(&self) -> QueryResult {
    self.leaves().filter(|node| node.is_completed()).map(|node| node.computed_hash.clone()).collect()
  }

  /// The smallest hash set certifying the current completion state: every
  /// node whose subtree is fully verified but whose parent's is not. A fully
  /// verified tree yields the root hash alone.
  pub fn min_completed_hashes(&self) -> QueryResult {
    let mut out = Vec::new();
    if self.collect_frontier(0, &mut out) {
      out.push(self.nodes[0].computed_hash.clone());
    }
    out
  }

  /// All chunk hashes beneath the first node, in left-to-right in-order
  /// traversal, whose expected hash equals `hash`. A malformed query hash or
  /// one matching no node yields an empty result.
  pub fn chunk_hashes_from(&self, hash: &str) -> QueryResult {
    if !hash::is_well_formed(hash) {
      return Vec::new();
    }
    let mut out = Vec::new();
    if let Some(index) = self.find_node(0, hash) {
      self.collect_chunks(index, &mut out);
    }
    out
  }

  fn leaves(&self) -> impl Iterator<Item = &Node> {
    self.nodes[self.leaf_count - 1..].iter()
  }

  /// Returns whether every leaf beneath `index` is completed. A completed
  /// child whose sibling is not is pushed onto `out`; together with the root
  /// case in the caller this emits exactly the highest fully verified
  /// ancestors, in post-order.
  fn collect_frontier(&self, index: usize, out: &mut Vec<String>) -> bool {
    match self.nodes[index].kind {
      NodeKind::Leaf { .. } => self.nodes[index].is_completed(),
      NodeKind::Branch { left, right } => {
        let left_done = self.collect_frontier(left, out);
        let right_done = self.collect_frontier(right, out);
        if left_done && right_done {
          return true;
        }
        if left_done {
          out.push(self.nodes[left].computed_hash.clone());
        } else if right_done {
          out.push(self.nodes[right].computed_hash.clone());
        }
        false
      }
    }
  }

  fn find_node(&self, index: usize, hash: &str) -> Option<usize> {
    match self.nodes[index].kind {
      NodeKind::Leaf { .. } => (self.nodes[index].expected_hash == hash).then_some(index),
      NodeKind::Branch { left, right } => self
        .find_node(left, hash)
        .or_else(|| (self.nodes[index].expected_hash == hash).then_some(index))
        .or_else(|| self.find_node(right, hash)),
    }
  }

  fn collect_chunks(&self, index: usize, out: &mut Vec<String>) {
    match self.nodes[index].kind {
      NodeKind::Leaf { .. } => out.push(self.nodes[index].expected_hash.clone()),
      NodeKind::Branch { left, right } => {
        self.collect_chunks(left, out);
        self.collect_chunks(right, out);
      }
    }
  }
}

/// Binary path of the node at heap `index`; `root` for the root.
fn node_key(index: usize) -> String {
  if index == 0 {
    return "root".to_string();
  }
  let depth = (index + 1).ilog2() as usize;
  let position = index + 1 - (1usize << depth);
  format!("{:0width$b}", position, width = depth)
}

/// Read up to `len` bytes, zero-filling whatever EOF leaves unread.
fn read_block<R: Read>(reader: &mut R, len: usize) -> std::io::Result<Vec<u8>> {
  let mut block = vec![0u8; len];
  let mut filled = 0;
  while filled < len {
    let n = reader.read(&mut block[filled..])?;
    if n == 0 {
      break;
    }
    filled += n;
  }
  Ok(block)
}
