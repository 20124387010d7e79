use core::fmt;
use core::iter::FusedIterator;

use crate::raw::{Handle, RawBPlusTree};

/// An ordered index based on a [B+ tree], mapping each key to a *bucket* of
/// values.
///
/// Keys must have a [total order] (implement [`Ord`]); composite keys such as
/// string pairs compare lexicographically by component. Inserting under an
/// existing key appends to that key's bucket, so duplicate-key associations
/// keep their arrival order. Values are opaque to the tree; only
/// [`delete`](BPlusTree::delete) compares them.
///
/// Every non-root node keeps its key count between `order - 1` and
/// `2 * order - 1`: a node splits on reaching `2 * order` keys and a node
/// that falls below `order - 1` borrows from or merges with a sibling. All
/// entries live in leaves, which form a doubly linked chain in key order;
/// range scans walk the chain instead of re-descending per key.
///
/// Absence is never an error: [`find`](BPlusTree::find) on a missing key
/// returns an empty slice and [`delete`](BPlusTree::delete) of a missing pair
/// returns `false`.
///
/// # Examples
///
/// ```
/// use ivy_tree::BPlusTree;
///
/// let mut index = BPlusTree::new(2);
/// index.insert((1, 1), "A");
/// index.insert((1, 2), "D");
/// index.insert((1, 1), "B");
///
/// assert_eq!(index.find(&(1, 1)), ["A", "B"]);
/// assert_eq!(index.find(&(9, 9)), [""; 0]);
///
/// assert!(index.delete(&(1, 1), &"A"));
/// assert!(!index.delete(&(1, 1), &"A"));
/// assert_eq!(index.find(&(1, 1)), ["B"]);
/// ```
///
/// [B+ tree]: https://en.wikipedia.org/wiki/B%2B_tree
/// [total order]: https://en.wikipedia.org/wiki/Total_order
pub struct BPlusTree<K, V> {
    raw: RawBPlusTree<K, V>,
}

impl<K, V> BPlusTree<K, V> {
    /// Creates an empty tree of the given order: non-root nodes hold between
    /// `order - 1` and `2 * order - 1` keys.
    ///
    /// # Panics
    ///
    /// Panics if `order` is zero.
    #[must_use]
    pub fn new(order: usize) -> Self {
        Self {
            raw: RawBPlusTree::new(order),
        }
    }

    /// The order parameter the tree was built with.
    #[must_use]
    pub fn order(&self) -> usize {
        self.raw.order()
    }

    /// Number of stored values, counting every bucket entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Drops every entry, leaving an empty tree of the same order.
    pub fn clear(&mut self) {
        self.raw.clear();
    }

    /// A read-only cursor at the root, for diagnostic traversal and
    /// printing. The cursor walks structure the tree never exposes through
    /// its query methods: node kinds, separator keys, child arity, and the
    /// leaf chain.
    #[must_use]
    pub fn root(&self) -> NodeRef<'_, K, V> {
        NodeRef {
            tree: self,
            handle: self.raw.root(),
        }
    }

    /// Iterates every `(key, bucket)` entry in ascending key order by
    /// walking the leaf chain.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            tree: self,
            leaf: Some(self.raw.first_leaf()),
            index: 0,
        }
    }
}

impl<K: Ord + Clone, V> BPlusTree<K, V> {
    /// Inserts `value` under `key`. An existing key keeps its bucket and the
    /// value is appended; a new key opens a single-value bucket at its
    /// sorted position, splitting the leaf if it overflows.
    ///
    /// # Examples
    ///
    /// ```
    /// use ivy_tree::BPlusTree;
    ///
    /// let mut index = BPlusTree::new(2);
    /// index.insert(7, "first");
    /// index.insert(7, "second");
    /// assert_eq!(index.find(&7), ["first", "second"]);
    /// assert_eq!(index.len(), 2);
    /// ```
    pub fn insert(&mut self, key: K, value: V) {
        self.raw.insert(key, value);
    }

    /// Returns the bucket stored under `key`, empty when the key is absent.
    #[must_use]
    pub fn find(&self, key: &K) -> &[V] {
        self.raw.find(key)
    }

    /// Removes one occurrence of `value` from `key`'s bucket, dropping the
    /// key once its bucket empties and rebalancing the tree as needed.
    /// Returns `false`, leaving the tree untouched, when the key is absent
    /// or the value is not in its bucket.
    pub fn delete(&mut self, key: &K, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.raw.delete(key, value)
    }

    /// Scans entries with `low <= key <= high` lazily, in ascending key
    /// order, walking the leaf chain from the first qualifying leaf. An
    /// empty or inverted range yields nothing.
    ///
    /// # Examples
    ///
    /// ```
    /// use ivy_tree::BPlusTree;
    ///
    /// let mut index = BPlusTree::new(2);
    /// for id in 0..6 {
    ///     index.insert(id, id * 10);
    /// }
    ///
    /// let hits: Vec<_> = index.find_range(1, 3).map(|(key, bucket)| (*key, bucket[0])).collect();
    /// assert_eq!(hits, [(1, 10), (2, 20), (3, 30)]);
    /// assert_eq!(index.find_range(3, 1).count(), 0);
    /// ```
    pub fn find_range(&self, low: K, high: K) -> RangeScan<'_, K, V> {
        let (leaf, index) = self.raw.scan_start(&low);
        RangeScan {
            tree: self,
            leaf: Some(leaf),
            index,
            high,
        }
    }
}

/// The default tree has order 2: nodes hold one to three keys.
impl<K, V> Default for BPlusTree<K, V> {
    fn default() -> Self {
        Self::new(2)
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for BPlusTree<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Ord + Clone, V> Extend<(K, V)> for BPlusTree<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iterable: I) {
        for (key, value) in iterable {
            self.insert(key, value);
        }
    }
}

/// Collects into a tree of the default order.
impl<K: Ord + Clone, V> FromIterator<(K, V)> for BPlusTree<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iterable: I) -> Self {
        let mut tree = Self::default();
        tree.extend(iterable);
        tree
    }
}

impl<'a, K, V> IntoIterator for &'a BPlusTree<K, V> {
    type Item = (&'a K, &'a [V]);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over a tree's `(key, bucket)` entries in key order.
///
/// Created by [`BPlusTree::iter`].
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Iter<'a, K, V> {
    tree: &'a BPlusTree<K, V>,
    leaf: Option<Handle>,
    index: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a [V]);

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        loop {
            let leaf = tree.raw.node(self.leaf?).as_leaf();
            if self.index < leaf.key_count() {
                let entry = (leaf.key(self.index), tree.raw.bucket(leaf.bucket(self.index)));
                self.index += 1;
                return Some(entry);
            }
            self.leaf = leaf.next();
            self.index = 0;
        }
    }
}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// A lazy scan over the entries with keys in an inclusive range.
///
/// Created by [`BPlusTree::find_range`].
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct RangeScan<'a, K, V> {
    tree: &'a BPlusTree<K, V>,
    leaf: Option<Handle>,
    index: usize,
    high: K,
}

impl<'a, K: Ord, V> Iterator for RangeScan<'a, K, V> {
    type Item = (&'a K, &'a [V]);

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        loop {
            let leaf = tree.raw.node(self.leaf?).as_leaf();
            if self.index < leaf.key_count() {
                let key = leaf.key(self.index);
                if *key > self.high {
                    self.leaf = None;
                    return None;
                }
                let entry = (key, tree.raw.bucket(leaf.bucket(self.index)));
                self.index += 1;
                return Some(entry);
            }
            self.leaf = leaf.next();
            self.index = 0;
        }
    }
}

impl<K: Ord, V> FusedIterator for RangeScan<'_, K, V> {}

/// A read-only cursor over a tree's node structure.
///
/// Created by [`BPlusTree::root`]; [`child`](NodeRef::child) and the
/// leaf-chain accessors move it around the tree. The cursor exists for
/// diagnostics — dumping the tree level by level, checking node occupancy —
/// and cannot observe anything mid-mutation, since it borrows the tree.
pub struct NodeRef<'a, K, V> {
    tree: &'a BPlusTree<K, V>,
    handle: Handle,
}

impl<K, V> Clone for NodeRef<'_, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for NodeRef<'_, K, V> {}

impl<K, V> PartialEq for NodeRef<'_, K, V> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.tree, other.tree) && self.handle == other.handle
    }
}

impl<K, V> Eq for NodeRef<'_, K, V> {}

impl<K: fmt::Debug, V> fmt::Debug for NodeRef<'_, K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct(if self.is_leaf() { "Leaf" } else { "Internal" })
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}

impl<'a, K, V> NodeRef<'a, K, V> {
    #[must_use]
    pub fn is_leaf(self) -> bool {
        self.tree.raw.node(self.handle).is_leaf()
    }

    /// The node's keys: entry keys for a leaf, separators for an internal
    /// node.
    #[must_use]
    pub fn keys(self) -> &'a [K] {
        self.tree.raw.node(self.handle).keys()
    }

    /// Number of children; zero for a leaf.
    #[must_use]
    pub fn child_count(self) -> usize {
        match self.tree.raw.node(self.handle) {
            crate::raw::Node::Internal(internal) => internal.child_count(),
            crate::raw::Node::Leaf(_) => 0,
        }
    }

    /// Moves to the child at `index`.
    ///
    /// # Panics
    ///
    /// Panics on a leaf or an out-of-range index.
    #[must_use]
    pub fn child(self, index: usize) -> Self {
        Self {
            tree: self.tree,
            handle: self.tree.raw.node(self.handle).as_internal().child(index),
        }
    }

    /// The bucket stored at the leaf's slot `index`.
    ///
    /// # Panics
    ///
    /// Panics on an internal node or an out-of-range index.
    #[must_use]
    pub fn bucket(self, index: usize) -> &'a [V] {
        self.tree.raw.bucket(self.tree.raw.node(self.handle).as_leaf().bucket(index))
    }

    /// The leaf to the right in the chain, if any.
    ///
    /// # Panics
    ///
    /// Panics on an internal node.
    #[must_use]
    pub fn next_leaf(self) -> Option<Self> {
        let next = self.tree.raw.node(self.handle).as_leaf().next()?;
        Some(Self {
            tree: self.tree,
            handle: next,
        })
    }

    /// The leaf to the left in the chain, if any.
    ///
    /// # Panics
    ///
    /// Panics on an internal node.
    #[must_use]
    pub fn prev_leaf(self) -> Option<Self> {
        let prev = self.tree.raw.node(self.handle).as_leaf().prev()?;
        Some(Self {
            tree: self.tree,
            handle: prev,
        })
    }
}
