//! In-memory file tree and its on-disk cache
//!
//! - `arena`: nodes in a flat `Vec`, linked by `NodeId`
//! - `build`: assembles the tree from scan listings once the workers are done
//! - `cache`: linearizes the tree into fixed-size records and back

pub mod arena;
pub mod build;
pub mod cache;

pub use arena::{FileNode, FileTree, NodeId};
pub use build::build_tree;
pub use cache::{delinearize, linearize, load, save, CacheHeader, NodeRecord};
