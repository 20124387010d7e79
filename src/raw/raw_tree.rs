use super::arena::Arena;
use super::handle::Handle;
use super::node::{InternalNode, LeafNode, Node, SearchResult};

/// The core B+ tree engine backing `BPlusTree`.
///
/// Nodes live in one arena and value buckets in another; every edge between
/// nodes (parent, child, leaf chain) is a handle, so there is no owning cycle
/// to break. The root always exists: an empty tree is a single leaf root with
/// no keys.
pub(crate) struct RawBPlusTree<K, V> {
    /// Arena storing all tree nodes.
    nodes: Arena<Node<K>>,
    /// Arena storing all value buckets, separate from nodes so bucket growth
    /// never touches node storage.
    buckets: Arena<Vec<V>>,
    /// Handle to the root node. Always valid.
    root: Handle,
    /// Handle to the leftmost leaf, the head of the leaf chain.
    first_leaf: Handle,
    /// Occupancy parameter: a node splits on reaching `2 * order` keys and a
    /// non-root node rebalances on dropping below `order - 1`.
    order: usize,
    /// Total number of stored values across all buckets.
    len: usize,
}

impl<K, V> RawBPlusTree<K, V> {
    /// Creates an empty tree of the given order.
    ///
    /// # Panics
    ///
    /// Panics if `order` is zero.
    pub(crate) fn new(order: usize) -> Self {
        assert!(order >= 1, "`RawBPlusTree::new()` - `order` must be at least 1!");
        let mut nodes = Arena::new();
        let root = nodes.alloc(Node::Leaf(LeafNode::new(None)));
        Self {
            nodes,
            buckets: Arena::new(),
            root,
            first_leaf: root,
            order,
            len: 0,
        }
    }

    pub(crate) const fn order(&self) -> usize {
        self.order
    }

    /// Number of stored values (sum of all bucket sizes).
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.buckets.clear();
        self.root = self.nodes.alloc(Node::Leaf(LeafNode::new(None)));
        self.first_leaf = self.root;
        self.len = 0;
    }

    pub(crate) fn root(&self) -> Handle {
        self.root
    }

    pub(crate) fn first_leaf(&self) -> Handle {
        self.first_leaf
    }

    pub(crate) fn node(&self, handle: Handle) -> &Node<K> {
        self.nodes.get(handle)
    }

    pub(crate) fn bucket(&self, handle: Handle) -> &[V] {
        self.buckets.get(handle)
    }
}

impl<K: Ord + Clone, V> RawBPlusTree<K, V> {
    /// Descends from the root to the leaf whose key range contains `key`:
    /// at each internal node, the child before the first separator greater
    /// than the key, or the last child when no separator is.
    pub(crate) fn locate_leaf(&self, key: &K) -> Handle {
        let mut current = self.root;
        loop {
            match self.nodes.get(current) {
                Node::Internal(internal) => current = internal.child(internal.descend_index(key)),
                Node::Leaf(_) => return current,
            }
        }
    }

    /// Returns the bucket stored under `key`, or an empty slice when the key
    /// is absent.
    pub(crate) fn find(&self, key: &K) -> &[V] {
        let leaf = self.nodes.get(self.locate_leaf(key)).as_leaf();
        match leaf.search(key) {
            SearchResult::Found(index) => self.buckets.get(leaf.bucket(index)),
            SearchResult::NotFound(_) => &[],
        }
    }

    /// Positions a range scan: the leaf covering `low` and the slot of the
    /// first key `>= low` within it (possibly one past the last slot, in
    /// which case the scan starts on the next leaf in the chain).
    pub(crate) fn scan_start(&self, low: &K) -> (Handle, usize) {
        let handle = self.locate_leaf(low);
        let index = self.nodes.get(handle).as_leaf().lower_bound(low);
        (handle, index)
    }

    /// Inserts `value` under `key`: appends to the existing bucket, or opens
    /// a fresh single-value bucket at the key's sorted slot and splits the
    /// leaf if that brings it to `2 * order` keys.
    pub(crate) fn insert(&mut self, key: K, value: V) {
        let handle = self.locate_leaf(&key);
        let leaf = self.nodes.get_mut(handle).as_leaf_mut();
        match leaf.search(&key) {
            SearchResult::Found(index) => {
                let bucket = leaf.bucket(index);
                self.buckets.get_mut(bucket).push(value);
            }
            SearchResult::NotFound(index) => {
                let bucket = self.buckets.alloc(vec![value]);
                leaf.insert_slot(index, key, bucket);
                if self.nodes.get(handle).is_overfull(self.order) {
                    self.split(handle);
                }
            }
        }
        self.len += 1;
    }

    /// Removes one occurrence of `value` from `key`'s bucket. Returns `false`
    /// without touching the tree when the key is absent or the value is not
    /// in its bucket. Removing the last value drops the key's slot and
    /// rebalances the leaf if it underflows.
    pub(crate) fn delete(&mut self, key: &K, value: &V) -> bool
    where
        V: PartialEq,
    {
        let handle = self.locate_leaf(key);
        let leaf = self.nodes.get(handle).as_leaf();
        let SearchResult::Found(position) = leaf.search(key) else {
            return false;
        };

        let bucket_handle = leaf.bucket(position);
        let bucket = self.buckets.get_mut(bucket_handle);
        let Some(at) = bucket.iter().position(|stored| stored == value) else {
            return false;
        };
        bucket.remove(at);
        self.len -= 1;

        if !self.buckets.get(bucket_handle).is_empty() {
            return true;
        }
        self.buckets.free(bucket_handle);
        self.remove_slot(handle, position);
        true
    }

    /// Splits an overfull node, then climbs while the parent overflows in
    /// turn. The new sibling takes the left half `[0, order)` and the split
    /// node keeps the right half and its identity; the promoted separator is
    /// the old `keys[order]`. A splitting root first gets a fresh internal
    /// root installed above it, which is how the tree gains height.
    fn split(&mut self, mut handle: Handle) {
        loop {
            if self.nodes.get(handle).parent().is_none() {
                let mut new_root = InternalNode::new(None);
                new_root.adopt_first_child(handle);
                let root = self.nodes.alloc(Node::Internal(new_root));
                self.nodes.get_mut(handle).set_parent(Some(root));
                self.root = root;
            }
            let parent_handle = self.nodes.get(handle).parent().expect("split node has a parent");

            let (promoted, sibling) = if self.nodes.get(handle).is_leaf() {
                self.split_leaf(handle, parent_handle)
            } else {
                self.split_internal(handle, parent_handle)
            };

            let parent = self.nodes.get_mut(parent_handle).as_internal_mut();
            let position = parent.descend_index(&promoted);
            parent.insert_split(position, promoted, sibling);

            if !self.nodes.get(parent_handle).is_overfull(self.order) {
                return;
            }
            handle = parent_handle;
        }
    }

    /// Carves the left half of a leaf into a new sibling and rewires the
    /// leaf chain around it, both directions in the same step.
    fn split_leaf(&mut self, handle: Handle, parent: Handle) -> (K, Handle) {
        let leaf = self.nodes.get_mut(handle).as_leaf_mut();
        let (keys, buckets) = leaf.split_off_left(self.order);
        let promoted = leaf.key(0).clone();
        let old_prev = leaf.prev();

        let mut sibling = LeafNode::from_parts(Some(parent), keys, buckets);
        sibling.set_prev(old_prev);
        sibling.set_next(Some(handle));
        let sibling_handle = self.nodes.alloc(Node::Leaf(sibling));

        self.nodes.get_mut(handle).as_leaf_mut().set_prev(Some(sibling_handle));
        match old_prev {
            Some(prev) => self.nodes.get_mut(prev).as_leaf_mut().set_next(Some(sibling_handle)),
            None => self.first_leaf = sibling_handle,
        }
        (promoted, sibling_handle)
    }

    /// Carves the left half of an internal node (keys `[0, order)`, children
    /// `[0, order]`) into a new sibling. The separator between the halves is
    /// promoted rather than kept on either side; the moved children reparent
    /// to the sibling.
    fn split_internal(&mut self, handle: Handle, parent: Handle) -> (K, Handle) {
        let internal = self.nodes.get_mut(handle).as_internal_mut();
        let (keys, children, promoted) = internal.split_off_left(self.order);

        let moved = children.clone();
        let sibling_handle = self
            .nodes
            .alloc(Node::Internal(InternalNode::from_parts(Some(parent), keys, children)));
        for child in moved {
            self.nodes.get_mut(child).set_parent(Some(sibling_handle));
        }
        (promoted, sibling_handle)
    }

    /// Removes slot `position` from the node at `handle` and repairs the
    /// tree: ancestor separator replacement when the first key changed, root
    /// collapse, then borrow-or-merge while a node sits below `order - 1`
    /// keys. A merge continues the same removal on the parent, so each call
    /// walks at most one leaf-to-root path.
    fn remove_slot(&mut self, mut handle: Handle, mut position: usize) {
        loop {
            let old_key = match self.nodes.get_mut(handle) {
                Node::Leaf(leaf) => leaf.remove_slot(position).0,
                // The child past the separator was merged away by the
                // previous iteration; only its slot remains here.
                Node::Internal(internal) => internal.remove_slot(position).0,
            };

            let node = self.nodes.get(handle);
            if position == 0 && node.key_count() > 0 {
                let replacement = node.first_key().clone();
                let start = node.parent();
                self.replace_separator(start, &old_key, replacement);
            }

            if handle == self.root {
                let root = self.nodes.get(handle);
                if root.key_count() == 0 && !root.is_leaf() {
                    let child = root.as_internal().child(0);
                    self.nodes.free(handle);
                    self.nodes.get_mut(child).set_parent(None);
                    self.root = child;
                }
                return;
            }

            if !self.nodes.get(handle).is_deficient(self.order) {
                return;
            }

            let parent_handle = self.nodes.get(handle).parent().expect("non-root node has a parent");
            let (index, left, right) = {
                let parent = self.nodes.get(parent_handle).as_internal();
                let index = parent.position_of(handle);
                let left = (index > 0).then(|| parent.child(index - 1));
                let right = (index + 1 < parent.child_count()).then(|| parent.child(index + 1));
                (index, left, right)
            };

            if let Some(left) = left
                && self.nodes.get(left).can_lend(self.order)
            {
                self.borrow_from_left(handle, left, parent_handle, index);
                return;
            }
            if let Some(right) = right
                && self.nodes.get(right).can_lend(self.order)
            {
                self.borrow_from_right(handle, right, parent_handle, index);
                return;
            }

            // Merge, preferring the left sibling when both exist; the loop
            // continues on the parent at the now-redundant separator.
            if let Some(left) = left {
                self.merge_pair(left, handle, parent_handle, index - 1);
                position = index - 1;
            } else {
                let right = right.expect("a deficient non-root node has at least one sibling");
                self.merge_pair(handle, right, parent_handle, index);
                position = index;
            }
            handle = parent_handle;
        }
    }

    /// Replaces `old_key` with `new_key` in every ancestor that still stores
    /// it as a separator, walking parent handles to the root. A removed first
    /// key may sit in any one ancestor, or in none.
    fn replace_separator(&mut self, start: Option<Handle>, old_key: &K, new_key: K) {
        let mut current = start;
        while let Some(handle) = current {
            let internal = self.nodes.get_mut(handle).as_internal_mut();
            if let Some(index) = internal.keys().iter().position(|key| key == old_key) {
                internal.set_key(index, new_key.clone());
            }
            current = self.nodes.get(handle).parent();
        }
    }

    /// Moves the left sibling's last slot to the front of the deficient node.
    /// For leaves the moved key becomes the new separator between the two;
    /// for internal nodes the move rotates through the parent instead, the
    /// old separator coming down and the lender's last key going up.
    fn borrow_from_left(&mut self, handle: Handle, left: Handle, parent: Handle, index: usize) {
        if self.nodes.get(handle).is_leaf() {
            let (key, bucket) = self.nodes.get_mut(left).as_leaf_mut().pop_back_slot();
            let separator = key.clone();
            self.nodes.get_mut(handle).as_leaf_mut().push_front_slot(key, bucket);
            self.nodes.get_mut(parent).as_internal_mut().set_key(index - 1, separator);
        } else {
            let old_separator = self.nodes.get(parent).as_internal().key(index - 1).clone();
            let (key, child) = self.nodes.get_mut(left).as_internal_mut().pop_back_slot();
            self.nodes.get_mut(parent).as_internal_mut().set_key(index - 1, key);
            self.nodes.get_mut(child).set_parent(Some(handle));
            self.nodes.get_mut(handle).as_internal_mut().push_front_slot(old_separator, child);
        }
    }

    /// Mirror image of [`Self::borrow_from_left`]: moves the right sibling's
    /// first slot to the end of the deficient node.
    fn borrow_from_right(&mut self, handle: Handle, right: Handle, parent: Handle, index: usize) {
        if self.nodes.get(handle).is_leaf() {
            let lender = self.nodes.get_mut(right).as_leaf_mut();
            let (key, bucket) = lender.pop_front_slot();
            let separator = lender.key(0).clone();
            self.nodes.get_mut(handle).as_leaf_mut().push_back_slot(key, bucket);
            self.nodes.get_mut(parent).as_internal_mut().set_key(index, separator);
        } else {
            let old_separator = self.nodes.get(parent).as_internal().key(index).clone();
            let (key, child) = self.nodes.get_mut(right).as_internal_mut().pop_front_slot();
            self.nodes.get_mut(parent).as_internal_mut().set_key(index, key);
            self.nodes.get_mut(child).set_parent(Some(handle));
            self.nodes.get_mut(handle).as_internal_mut().push_back_slot(old_separator, child);
        }
    }

    /// Merges the right-hand node of an adjacent sibling pair into the
    /// left-hand survivor. A leaf merge repairs the chain across the boundary
    /// in the same step; an internal merge pulls the parent separator down
    /// between the two key runs and reparents the moved children.
    fn merge_pair(&mut self, survivor: Handle, absorbed: Handle, parent: Handle, separator_index: usize) {
        match self.nodes.take(absorbed) {
            Node::Leaf(mut leaf) => {
                let (keys, buckets) = leaf.take_all();
                let next = leaf.next();
                let left = self.nodes.get_mut(survivor).as_leaf_mut();
                left.absorb(keys, buckets);
                left.set_next(next);
                if let Some(next) = next {
                    self.nodes.get_mut(next).as_leaf_mut().set_prev(Some(survivor));
                }
            }
            Node::Internal(mut internal) => {
                let separator = self.nodes.get(parent).as_internal().key(separator_index).clone();
                let (keys, children) = internal.take_all();
                for &child in &children {
                    self.nodes.get_mut(child).set_parent(Some(survivor));
                }
                self.nodes.get_mut(survivor).as_internal_mut().absorb(separator, keys, children);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;

    impl<K: Ord + Clone + core::fmt::Debug, V> RawBPlusTree<K, V> {
        /// Walks the whole tree and panics on any violated invariant.
        pub(crate) fn validate_invariants(&self) {
            assert!(self.nodes.get(self.root).parent().is_none(), "root has a parent");

            let mut leaves = Vec::new();
            let mut leaf_depth = None;
            let mut total = 0;
            self.validate_node(self.root, 0, None, None, &mut leaf_depth, &mut leaves, &mut total);
            assert_eq!(total, self.len, "stored value count does not match len");

            // The chain must cover exactly the leaves, in tree order, with
            // both directions consistent.
            assert_eq!(leaves.first(), Some(&self.first_leaf), "first_leaf is not the leftmost leaf");
            let mut walked = Vec::new();
            let mut prev = None;
            let mut current = Some(self.first_leaf);
            while let Some(handle) = current {
                let leaf = self.nodes.get(handle).as_leaf();
                assert_eq!(leaf.prev(), prev, "broken prev link at {handle:?}");
                walked.push(handle);
                assert!(walked.len() <= leaves.len(), "leaf chain has a cycle");
                prev = Some(handle);
                current = leaf.next();
            }
            assert_eq!(walked, leaves, "leaf chain does not match tree order");
        }

        fn validate_node(
            &self,
            handle: Handle,
            depth: usize,
            lower: Option<&K>,
            upper: Option<&K>,
            leaf_depth: &mut Option<usize>,
            leaves: &mut Vec<Handle>,
            total: &mut usize,
        ) {
            let node = self.nodes.get(handle);

            let keys = node.keys();
            for pair in keys.windows(2) {
                assert!(pair[0] < pair[1], "keys out of order at {handle:?}");
            }
            // A separator may only lower-bound its right subtree's minimum
            // after deletions, so the lower edge is inclusive; the upper edge
            // is always strict.
            if let Some(lower) = lower {
                assert!(keys.iter().all(|key| key >= lower), "key below subtree range at {handle:?}");
            }
            if let Some(upper) = upper {
                assert!(keys.iter().all(|key| key < upper), "key above subtree range at {handle:?}");
            }

            if handle == self.root {
                if !node.is_leaf() {
                    assert!(node.key_count() >= 1, "internal root with no keys");
                }
            } else {
                assert!(node.key_count() >= self.order - 1, "node below minimum occupancy at {handle:?}");
            }
            assert!(node.key_count() < self.order * 2, "node at split threshold at {handle:?}");

            match node {
                Node::Leaf(leaf) => {
                    match *leaf_depth {
                        None => *leaf_depth = Some(depth),
                        Some(expected) => assert_eq!(depth, expected, "leaves at different depths"),
                    }
                    assert_eq!(leaf.keys().len(), leaf.buckets().len(), "keys/buckets misaligned");
                    for index in 0..leaf.key_count() {
                        let bucket = self.buckets.get(leaf.bucket(index));
                        assert!(!bucket.is_empty(), "empty bucket left behind at {handle:?}");
                        *total += bucket.len();
                    }
                    leaves.push(handle);
                }
                Node::Internal(internal) => {
                    assert_eq!(
                        internal.child_count(),
                        internal.key_count() + 1,
                        "children/keys arity broken at {handle:?}"
                    );
                    for index in 0..internal.child_count() {
                        let child = internal.child(index);
                        assert_eq!(self.nodes.get(child).parent(), Some(handle), "stale parent handle");
                        let child_lower = if index == 0 { lower } else { Some(internal.key(index - 1)) };
                        let child_upper = if index == internal.key_count() {
                            upper
                        } else {
                            Some(internal.key(index))
                        };
                        self.validate_node(child, depth + 1, child_lower, child_upper, leaf_depth, leaves, total);
                    }
                }
            }
        }
    }

    #[derive(Clone, Debug)]
    enum Operation {
        Insert(u8, u8),
        Delete(u8, u8),
        Find(u8),
        Scan(u8, u8),
    }

    // A small key space so buckets grow and deletes actually hit.
    fn strategy() -> impl Strategy<Value = Operation> {
        let key = 0u8..32;
        let value = 0u8..8;
        prop_oneof![
            8 => (key.clone(), value.clone()).prop_map(|(k, v)| Operation::Insert(k, v)),
            6 => (key.clone(), value).prop_map(|(k, v)| Operation::Delete(k, v)),
            2 => key.clone().prop_map(Operation::Find),
            1 => (key.clone(), key).prop_map(|(low, high)| Operation::Scan(low, high)),
        ]
    }

    fn scan_to_vec(tree: &RawBPlusTree<u8, u8>, low: u8, high: u8) -> Vec<(u8, Vec<u8>)> {
        let mut collected = Vec::new();
        let (mut leaf, mut index) = tree.scan_start(&low);
        'walk: loop {
            let node = tree.node(leaf).as_leaf();
            while index < node.key_count() {
                if *node.key(index) > high {
                    break 'walk;
                }
                collected.push((*node.key(index), tree.bucket(node.bucket(index)).to_vec()));
                index += 1;
            }
            match node.next() {
                Some(next) => {
                    leaf = next;
                    index = 0;
                }
                None => break,
            }
        }
        collected
    }

    proptest! {
        /// Replays a random operation sequence against a `BTreeMap` of
        /// buckets and revalidates every invariant after each step.
        #[test]
        fn tree_behaves_like_btreemap(
            order in 1usize..5,
            operations in prop::collection::vec(strategy(), 0..400),
        ) {
            let mut tree: RawBPlusTree<u8, u8> = RawBPlusTree::new(order);
            let mut model: BTreeMap<u8, Vec<u8>> = BTreeMap::new();

            for operation in operations {
                match operation {
                    Operation::Insert(key, value) => {
                        tree.insert(key, value);
                        model.entry(key).or_default().push(value);
                    }
                    Operation::Delete(key, value) => {
                        let expected = match model.get_mut(&key) {
                            Some(bucket) => match bucket.iter().position(|&stored| stored == value) {
                                Some(at) => {
                                    bucket.remove(at);
                                    if bucket.is_empty() {
                                        model.remove(&key);
                                    }
                                    true
                                }
                                None => false,
                            },
                            None => false,
                        };
                        prop_assert_eq!(tree.delete(&key, &value), expected);
                    }
                    Operation::Find(key) => {
                        let expected = model.get(&key).map_or(&[][..], Vec::as_slice);
                        prop_assert_eq!(tree.find(&key), expected);
                    }
                    Operation::Scan(low, high) => {
                        let expected: Vec<(u8, Vec<u8>)> = if low <= high {
                            model.range(low..=high).map(|(key, bucket)| (*key, bucket.clone())).collect()
                        } else {
                            Vec::new()
                        };
                        prop_assert_eq!(scan_to_vec(&tree, low, high), expected);
                    }
                }

                tree.validate_invariants();
                prop_assert_eq!(tree.len(), model.values().map(Vec::len).sum::<usize>());
            }
        }

        /// Inserting then deleting every pair leaves an empty single-leaf
        /// root behind. Orders below 2 have a balance floor of zero keys and
        /// keep their skeleton instead of collapsing, so they are excluded.
        #[test]
        fn full_deletion_restores_empty_tree(
            order in 2usize..5,
            pairs in prop::collection::vec((0u8..64, 0u8..8), 0..200),
        ) {
            let mut tree: RawBPlusTree<u8, u8> = RawBPlusTree::new(order);
            for &(key, value) in &pairs {
                tree.insert(key, value);
            }
            for &(key, value) in &pairs {
                prop_assert!(tree.delete(&key, &value));
                tree.validate_invariants();
            }
            prop_assert!(tree.is_empty());
            let root = tree.node(tree.root());
            prop_assert!(root.is_leaf());
            prop_assert_eq!(root.key_count(), 0);
        }
    }

    #[test]
    #[should_panic(expected = "`RawBPlusTree::new()` - `order` must be at least 1!")]
    fn zero_order_is_rejected() {
        let _ = RawBPlusTree::<u8, u8>::new(0);
    }

    #[test]
    fn split_keeps_node_identity_on_the_right() {
        // Order 2: the fourth distinct key splits the root leaf. The new
        // sibling takes the left half, so the old root leaf keeps the upper
        // keys and its place in the chain.
        let mut tree: RawBPlusTree<i32, i32> = RawBPlusTree::new(2);
        let old_root = tree.root();
        for key in [10, 20, 30, 40] {
            tree.insert(key, key);
        }

        let root = tree.node(tree.root()).as_internal();
        assert_eq!(root.keys(), &[30]);
        assert_eq!(root.child_count(), 2);
        assert_eq!(root.child(1), old_root);
        assert_eq!(tree.node(root.child(0)).keys(), &[10, 20]);
        assert_eq!(tree.node(root.child(1)).keys(), &[30, 40]);
        assert_eq!(tree.first_leaf(), root.child(0));
        tree.validate_invariants();
    }
}
