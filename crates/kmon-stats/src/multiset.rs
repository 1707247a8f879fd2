//! Order-statistic multiset over `i64`.
//!
//! Duplicates are held as a per-node count and every node carries the
//! total number of occurrences in its subtree, so rank queries walk a
//! single root-to-leaf path. The tree is height-balanced (AVL); rotations
//! recompute both height and subtree size.

use std::cmp::Ordering;

#[derive(Debug)]
struct Node {
    key: i64,
    count: usize,
    /// Occurrences in this subtree, duplicates included.
    size: usize,
    height: i32,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

impl Node {
    fn new(key: i64, count: usize) -> Self {
        Self {
            key,
            count,
            size: count,
            height: 1,
            left: None,
            right: None,
        }
    }
}

/// Balanced BST over `i64` keys with multiplicity and O(log N) rank lookup.
#[derive(Debug, Default)]
pub struct SortedMultiset {
    root: Option<Box<Node>>,
    len: usize,
}

fn height(node: &Option<Box<Node>>) -> i32 {
    node.as_ref().map_or(0, |n| n.height)
}

fn subtree_size(node: &Option<Box<Node>>) -> usize {
    node.as_ref().map_or(0, |n| n.size)
}

fn update(node: &mut Node) {
    node.height = 1 + height(&node.left).max(height(&node.right));
    node.size = node.count + subtree_size(&node.left) + subtree_size(&node.right);
}

fn balance_factor(node: &Node) -> i32 {
    height(&node.left) - height(&node.right)
}

fn rotate_left(mut node: Box<Node>) -> Box<Node> {
    match node.right.take() {
        None => node,
        Some(mut pivot) => {
            node.right = pivot.left.take();
            update(&mut node);
            pivot.left = Some(node);
            update(&mut pivot);
            pivot
        }
    }
}

fn rotate_right(mut node: Box<Node>) -> Box<Node> {
    match node.left.take() {
        None => node,
        Some(mut pivot) => {
            node.left = pivot.right.take();
            update(&mut node);
            pivot.right = Some(node);
            update(&mut pivot);
            pivot
        }
    }
}

fn rebalance(mut node: Box<Node>) -> Box<Node> {
    update(&mut node);
    let factor = balance_factor(&node);
    if factor > 1 {
        if node.left.as_ref().map_or(0, |l| balance_factor(l)) < 0 {
            if let Some(left) = node.left.take() {
                node.left = Some(rotate_left(left));
                update(&mut node);
            }
        }
        rotate_right(node)
    } else if factor < -1 {
        if node.right.as_ref().map_or(0, |r| balance_factor(r)) > 0 {
            if let Some(right) = node.right.take() {
                node.right = Some(rotate_right(right));
                update(&mut node);
            }
        }
        rotate_left(node)
    } else {
        node
    }
}

fn insert_n(node: Option<Box<Node>>, key: i64, count: usize) -> Box<Node> {
    let mut node = match node {
        None => return Box::new(Node::new(key, count)),
        Some(node) => node,
    };
    match key.cmp(&node.key) {
        Ordering::Equal => node.count += count,
        Ordering::Less => node.left = Some(insert_n(node.left.take(), key, count)),
        Ordering::Greater => node.right = Some(insert_n(node.right.take(), key, count)),
    }
    rebalance(node)
}

/// Removes one occurrence of `key`; returns the new subtree and whether
/// anything was removed.
fn remove_one(node: Option<Box<Node>>, key: i64) -> (Option<Box<Node>>, bool) {
    let mut node = match node {
        None => return (None, false),
        Some(node) => node,
    };
    let removed = match key.cmp(&node.key) {
        Ordering::Less => {
            let (left, removed) = remove_one(node.left.take(), key);
            node.left = left;
            removed
        }
        Ordering::Greater => {
            let (right, removed) = remove_one(node.right.take(), key);
            node.right = right;
            removed
        }
        Ordering::Equal => {
            if node.count > 1 {
                node.count -= 1;
                true
            } else {
                return (unlink(node), true);
            }
        }
    };
    if removed {
        (Some(rebalance(node)), true)
    } else {
        (Some(node), false)
    }
}

/// Detaches a node whose last occurrence is being removed.
fn unlink(mut node: Box<Node>) -> Option<Box<Node>> {
    match (node.left.take(), node.right.take()) {
        (None, None) => None,
        (Some(child), None) | (None, Some(child)) => Some(child),
        (Some(left), Some(right)) => {
            let (rest, mut successor) = take_min(right);
            successor.left = Some(left);
            successor.right = rest;
            Some(rebalance(successor))
        }
    }
}

/// Splits off the minimum node of a subtree.
fn take_min(mut node: Box<Node>) -> (Option<Box<Node>>, Box<Node>) {
    match node.left.take() {
        None => {
            let rest = node.right.take();
            (rest, node)
        }
        Some(left) => {
            let (rest, min) = take_min(left);
            node.left = rest;
            (Some(rebalance(node)), min)
        }
    }
}

impl SortedMultiset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total occurrences, duplicates included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds one occurrence of `key`.
    pub fn insert(&mut self, key: i64) {
        self.insert_count(key, 1);
    }

    fn insert_count(&mut self, key: i64, count: usize) {
        if count == 0 {
            return;
        }
        self.root = Some(insert_n(self.root.take(), key, count));
        self.len += count;
    }

    /// Removes one occurrence of `key`; absent keys are a silent no-op.
    pub fn delete_one(&mut self, key: i64) {
        let (root, removed) = remove_one(self.root.take(), key);
        self.root = root;
        if removed {
            self.len -= 1;
        }
    }

    /// The `rank`-th smallest occurrence (0-based), or `None` out of range.
    pub fn select(&self, rank: usize) -> Option<i64> {
        if rank >= self.len {
            return None;
        }
        let mut node = self.root.as_deref();
        let mut remaining = rank;
        while let Some(n) = node {
            let left = subtree_size(&n.left);
            if remaining < left {
                node = n.left.as_deref();
            } else if remaining < left + n.count {
                return Some(n.key);
            } else {
                remaining -= left + n.count;
                node = n.right.as_deref();
            }
        }
        None
    }

    /// All occurrences in ascending order.
    pub fn keys_ascending(&self) -> Vec<i64> {
        fn walk(node: &Option<Box<Node>>, out: &mut Vec<i64>) {
            if let Some(n) = node {
                walk(&n.left, out);
                out.extend(std::iter::repeat(n.key).take(n.count));
                walk(&n.right, out);
            }
        }
        let mut out = Vec::with_capacity(self.len);
        walk(&self.root, &mut out);
        out
    }

    /// Absorbs a copy of every occurrence held by `other`.
    pub fn merge_from(&mut self, other: &SortedMultiset) {
        fn collect(node: &Option<Box<Node>>, out: &mut Vec<(i64, usize)>) {
            if let Some(n) = node {
                collect(&n.left, out);
                out.push((n.key, n.count));
                collect(&n.right, out);
            }
        }
        let mut pairs = Vec::new();
        collect(&other.root, &mut pairs);
        for (key, count) in pairs {
            self.insert_count(key, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn duplicates_and_rank() {
        let mut set = SortedMultiset::new();
        for key in [10, 20, 5, 10, 15] {
            set.insert(key);
        }
        assert_eq!(set.len(), 5);
        let ranks: Vec<i64> = (0..5).filter_map(|i| set.select(i)).collect();
        assert_eq!(ranks, vec![5, 10, 10, 15, 20]);

        set.delete_one(10);
        assert_eq!(set.len(), 4);
        assert_eq!(set.select(1), Some(10));

        set.delete_one(10);
        assert_eq!(set.len(), 3);
        assert_eq!(set.select(1), Some(15));
    }

    #[test]
    fn select_out_of_range() {
        let set = SortedMultiset::new();
        assert_eq!(set.select(0), None);

        let mut set = SortedMultiset::new();
        set.insert(7);
        assert_eq!(set.select(0), Some(7));
        assert_eq!(set.select(1), None);
    }

    #[test]
    fn delete_absent_is_noop() {
        let mut set = SortedMultiset::new();
        set.insert(1);
        set.delete_one(42);
        assert_eq!(set.len(), 1);
        assert_eq!(set.keys_ascending(), vec![1]);
    }

    #[test]
    fn all_keys_equal() {
        let mut set = SortedMultiset::new();
        for _ in 0..10 {
            set.insert(99);
        }
        for i in 0..10 {
            assert_eq!(set.select(i), Some(99));
        }
    }

    #[test]
    fn select_enumerates_sorted_under_churn() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut set = SortedMultiset::new();
        let mut reference: Vec<i64> = Vec::new();

        for _ in 0..5_000 {
            if rng.gen_bool(0.7) || reference.is_empty() {
                let key = rng.gen_range(-500..500);
                set.insert(key);
                reference.push(key);
            } else {
                let key = reference.swap_remove(rng.gen_range(0..reference.len()));
                set.delete_one(key);
            }
        }

        reference.sort_unstable();
        assert_eq!(set.len(), reference.len());
        let enumerated: Vec<i64> = (0..set.len()).filter_map(|i| set.select(i)).collect();
        assert_eq!(enumerated, reference);
        assert_eq!(set.keys_ascending(), reference);
    }

    #[test]
    fn merge_absorbs_counts() {
        let mut a = SortedMultiset::new();
        let mut b = SortedMultiset::new();
        for key in [1, 2, 2, 3] {
            a.insert(key);
        }
        for key in [2, 3, 4] {
            b.insert(key);
        }
        a.merge_from(&b);
        assert_eq!(a.len(), 7);
        assert_eq!(a.keys_ascending(), vec![1, 2, 2, 2, 3, 3, 4]);
        // The source side is left intact.
        assert_eq!(b.keys_ascending(), vec![2, 3, 4]);
    }
}
