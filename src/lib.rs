//! # artree
//!
//! An in-memory Adaptive Radix Tree (ART) index over byte-string keys.
//!
//! Based on "The Adaptive Radix Tree: ARTful Indexing for Main-Memory
//! Databases" by Leis et al., 2013.
//!
//! ## Features
//!
//! - **Adaptive node sizes**: 4, 16, 48 or 256 children per node, chosen
//!   by fan-out
//! - **Path compression**: unary chains collapse into per-node prefixes
//! - **Arena-backed**: all node bodies and key bytes live in one bump
//!   arena, addressed through one-word tagged references
//! - **Ordered**: in-order iteration and prefix scans over byte keys
//!
//! ## Example
//!
//! ```rust
//! use artree::ArtTree;
//!
//! let mut tree: ArtTree<u64> = ArtTree::new();
//! tree.insert(b"hello", 1);
//! tree.insert(b"world", 2);
//!
//! assert_eq!(tree.get(b"hello"), Some(&1));
//! assert_eq!(tree.get(b"world"), Some(&2));
//!
//! let mut keys = Vec::new();
//! tree.iterate_prefix(b"he", |key, _value| {
//!     keys.push(key.to_vec());
//!     false
//! });
//! assert_eq!(keys, vec![b"hello".to_vec()]);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod art;
mod bytes;

pub use arena::Arena;
pub use art::{ArtStats, ArtTree, NodeKind};
pub use bytes::ByteSlice;

#[cfg(test)]
mod proptests;
