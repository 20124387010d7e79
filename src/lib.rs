//! An in-memory B+ tree index with duplicate-key value buckets.
//!
//! This crate provides [`BPlusTree`], an ordered index mapping each key to a
//! bucket of values, plus the small tabular layer ([`Table`], [`TableIndex`])
//! that the demo shell indexes with it:
//!
//! - [`insert`](BPlusTree::insert) - Append a value to a key's bucket
//! - [`find`](BPlusTree::find) - Look up a key's bucket (empty when absent)
//! - [`find_range`](BPlusTree::find_range) - Lazily scan an inclusive key range
//! - [`delete`](BPlusTree::delete) - Remove one value, rebalancing on underflow
//!
//! # Example
//!
//! ```
//! use ivy_tree::BPlusTree;
//!
//! let mut index = BPlusTree::new(2);
//! index.insert(("2024".to_string(), "ORD-3".to_string()), 1);
//! index.insert(("2024".to_string(), "ORD-7".to_string()), 2);
//! index.insert(("2024".to_string(), "ORD-3".to_string()), 5);
//!
//! // Duplicate-key inserts accumulate in arrival order.
//! let key = ("2024".to_string(), "ORD-3".to_string());
//! assert_eq!(index.find(&key), [1, 5]);
//!
//! // Range scans walk the leaf chain in key order.
//! let low = ("2024".to_string(), "ORD-0".to_string());
//! let high = ("2024".to_string(), "ORD-9".to_string());
//! assert_eq!(index.find_range(low, high).count(), 2);
//!
//! assert!(index.delete(&key, &1));
//! assert_eq!(index.find(&key), [5]);
//! ```
//!
//! # Implementation
//!
//! The tree is a classic B+ tree: all entries live in leaves, internal nodes
//! hold separator keys only, and the leaves form a doubly linked chain in key
//! order so range scans never re-descend. Nodes are stored in an arena and
//! reference each other by integer handle, which keeps parent back-references
//! and sibling links free of ownership cycles. A node splits on reaching
//! `2 * order` keys; a non-root node that drops below `order - 1` keys
//! borrows from a sibling or merges with one, cascading toward the root.

#![forbid(unsafe_code)]
#![forbid(keyword_idents)]
#![forbid(non_ascii_idents)]
#![forbid(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::cargo)]
#![warn(clippy::pedantic)]

mod raw;

pub mod bplus_tree;
pub mod store;

pub use bplus_tree::{BPlusTree, Iter, NodeRef, RangeScan};
pub use store::{CompositeKey, StoreError, Table, TableIndex, TupleId};
