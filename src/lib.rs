//! # strmap-rs
//!
//! An ordered map from byte-string keys to values, built on a crit-bit trie.
//!
//! Branches store only the index of the first bit at which their two subtrees
//! differ, so lookups touch `O(key length)` nodes regardless of how many keys
//! are stored. The map borrows its keys from the caller and never copies them.
//!
//! The distinguishing operation is [`StrMap::prefix`]: it returns a read-only
//! [`Prefix`] view over exactly the entries sharing a prefix, in
//! `O(prefix length)` and without scanning or copying anything.
//!
//! ## Example
//!
//! ```rust
//! use strmap_rs::StrMap;
//!
//! let mut map: StrMap<'_, u64> = StrMap::new();
//! map.insert(b"apple", 1).unwrap();
//! map.insert(b"apricot", 2).unwrap();
//! map.insert(b"banana", 3).unwrap();
//!
//! assert_eq!(map.get(b"apple"), Some(&1));
//!
//! let ap: Vec<_> = map.prefix(b"ap").iter().map(|(k, v)| (k, *v)).collect();
//! assert_eq!(ap, vec![(&b"apple"[..], 1), (&b"apricot"[..], 2)]);
//! ```

#![forbid(unsafe_code)]

mod error;

pub use error::StrMapError;

use std::ops::ControlFlow;

use tracing::{debug, trace, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Construction options for [`StrMap`].
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Number of keys to pre-size the node arena for.
    pub initial_capacity: usize,
}

impl Config {
    /// Nodes needed to hold `initial_capacity` keys: one leaf per key plus one
    /// branch per key after the first.
    fn node_capacity(&self) -> usize {
        self.initial_capacity.saturating_mul(2).saturating_sub(1)
    }
}

// =============================================================================
// Bit utilities
// =============================================================================

/// Bit positions per key byte: a presence bit followed by eight data bits.
///
/// The presence bit is 0 past the end of a key, which orders a key before
/// every longer key it is a prefix of.
const BITS_PER_BYTE: usize = 9;

#[inline]
fn bit_byte_index(bit: usize) -> usize {
    bit / BITS_PER_BYTE
}

/// Position within the byte's 9-bit group; `0` is the presence bit, `1..=8`
/// are the data bits from MSB to LSB.
#[inline]
fn bit_in_byte(bit: usize) -> usize {
    bit % BITS_PER_BYTE
}

/// Value (0 or 1) of `key` at bit position `bit`.
#[inline]
fn key_bit(key: &[u8], bit: usize) -> usize {
    match key.get(bit_byte_index(bit)) {
        None => 0,
        Some(&byte) => match bit_in_byte(bit) {
            0 => 1,
            data => usize::from((byte >> (8 - data)) & 1),
        },
    }
}

/// First bit position at which `a` and `b` differ, or `None` if they are equal.
fn first_diff_bit(a: &[u8], b: &[u8]) -> Option<usize> {
    match a.iter().zip(b).position(|(x, y)| x != y) {
        Some(i) => {
            let diff = a[i] ^ b[i];
            Some(i * BITS_PER_BYTE + 1 + diff.leading_zeros() as usize)
        }
        None if a.len() == b.len() => None,
        None => Some(a.len().min(b.len()) * BITS_PER_BYTE),
    }
}

#[inline]
fn prefix_bit_len(prefix: &[u8]) -> usize {
    prefix.len() * BITS_PER_BYTE
}

// =============================================================================
// Node arena
// =============================================================================

/// Stable index of a node in the [`NodeArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct NodeId(usize);

#[derive(Clone)]
enum Node<'k, V> {
    Leaf {
        key: &'k [u8],
        value: V,
    },
    /// `child[0]` holds keys with a 0 at `crit`, `child[1]` keys with a 1.
    Branch { crit: usize, child: [NodeId; 2] },
}

#[derive(Clone)]
enum Slot<'k, V> {
    Occupied(Node<'k, V>),
    Vacant { next: Option<NodeId> },
}

/// Node storage with an intrusive free list of vacated slots.
#[derive(Clone)]
struct NodeArena<'k, V> {
    slots: Vec<Slot<'k, V>>,
    free_head: Option<NodeId>,
    free_len: usize,
}

impl<'k, V> NodeArena<'k, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            free_len: 0,
        }
    }

    fn live(&self) -> usize {
        self.slots.len() - self.free_len
    }

    fn capacity_bytes(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<Slot<'k, V>>()
    }

    fn shrink_to_fit(&mut self) {
        // Vacant slots in the middle cannot move without renumbering, so only
        // the trailing capacity is released.
        self.slots.shrink_to_fit();
    }

    /// Guarantees the next `n` calls to [`alloc`](Self::alloc) do not allocate.
    fn reserve(&mut self, n: usize) -> Result<(), StrMapError> {
        let missing = n.saturating_sub(self.free_len);
        self.slots.try_reserve(missing)?;
        Ok(())
    }

    fn alloc(&mut self, node: Node<'k, V>) -> NodeId {
        match self.free_head {
            Some(id) => {
                self.free_head = match self.slots[id.0] {
                    Slot::Vacant { next } => next,
                    Slot::Occupied(_) => unreachable!("free list points at a live node"),
                };
                self.free_len -= 1;
                self.slots[id.0] = Slot::Occupied(node);
                id
            }
            None => {
                let id = NodeId(self.slots.len());
                self.slots.push(Slot::Occupied(node));
                id
            }
        }
    }

    fn free(&mut self, id: NodeId) -> Node<'k, V> {
        let vacant = Slot::Vacant {
            next: self.free_head,
        };
        match std::mem::replace(&mut self.slots[id.0], vacant) {
            Slot::Occupied(node) => {
                self.free_head = Some(id);
                self.free_len += 1;
                node
            }
            Slot::Vacant { .. } => unreachable!("node freed twice"),
        }
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free_head = None;
        self.free_len = 0;
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node<'k, V> {
        match &self.slots[id.0] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("link to a vacant slot"),
        }
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node<'k, V> {
        match &mut self.slots[id.0] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("link to a vacant slot"),
        }
    }

    #[inline]
    fn leaf_key(&self, id: NodeId) -> &'k [u8] {
        match self.node(id) {
            Node::Leaf { key, .. } => *key,
            Node::Branch { .. } => unreachable!("expected a leaf"),
        }
    }

    /// Follows the bit decisions for `key` from `from` down to a leaf.
    ///
    /// The leaf is structurally closest to `key`; only a full comparison tells
    /// whether it is `key`.
    fn descend(&self, from: NodeId, key: &[u8]) -> NodeId {
        let mut current = from;
        while let Node::Branch { crit, child } = self.node(current) {
            current = child[key_bit(key, *crit)];
        }
        current
    }

    fn leftmost_leaf(&self, from: NodeId) -> NodeId {
        let mut current = from;
        while let Node::Branch { child, .. } = self.node(current) {
            current = child[0];
        }
        current
    }

    /// Exact lookup of `key` in the subtree rooted at `from`.
    fn find(&self, from: NodeId, key: &[u8]) -> Option<NodeId> {
        let leaf = self.descend(from, key);
        (self.leaf_key(leaf) == key).then_some(leaf)
    }
}

// =============================================================================
// StrMap
// =============================================================================

/// An ordered map from borrowed byte-string keys to values.
///
/// Iteration is in ascending byte-wise lexicographic key order. Keys are
/// referenced, not copied, and must outlive the map (`'k`).
#[derive(Clone)]
pub struct StrMap<'k, V> {
    nodes: NodeArena<'k, V>,
    root: Option<NodeId>,
    count: usize,
}

/// Outcome of [`StrMap::iterate`] and [`Prefix::iterate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Walk {
    /// Every entry was visited.
    Completed,
    /// The callback asked to stop before the last entry.
    Stopped,
}

impl<'k, V> StrMap<'k, V> {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_capacity(keys: usize) -> Self {
        Self::with_config(Config {
            initial_capacity: keys,
        })
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            nodes: NodeArena::with_capacity(config.node_capacity()),
            root: None,
            count: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Bytes reserved for nodes. Key bytes are owned by the caller and not
    /// included.
    pub fn memory_usage(&self) -> usize {
        self.nodes.capacity_bytes()
    }

    pub fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let leaf = self.nodes.find(self.root?, key)?;
        match self.nodes.node(leaf) {
            Node::Leaf { value, .. } => Some(value),
            Node::Branch { .. } => unreachable!("expected a leaf"),
        }
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let leaf = self.nodes.find(self.root?, key)?;
        match self.nodes.node_mut(leaf) {
            Node::Leaf { value, .. } => Some(value),
            Node::Branch { .. } => unreachable!("expected a leaf"),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Inserts `key`, returning the previous value if the key was present.
    ///
    /// An existing key keeps its stored key reference and gets the new value.
    /// On allocation failure the map is unchanged and `value` is dropped.
    pub fn insert(&mut self, key: &'k [u8], value: V) -> Result<Option<V>, StrMapError> {
        self.insert_leaf(key, value, true)
    }

    /// Inserts `key` only if it is absent.
    ///
    /// # Errors
    ///
    /// [`StrMapError::KeyExists`] if the key is present (the stored value is
    /// kept), [`StrMapError::Alloc`] if the node arena cannot grow.
    pub fn insert_new(&mut self, key: &'k [u8], value: V) -> Result<(), StrMapError> {
        match self.insert_leaf(key, value, false)? {
            None => Ok(()),
            Some(_) => unreachable!("insert_new never replaces"),
        }
    }

    fn insert_leaf(
        &mut self,
        key: &'k [u8],
        value: V,
        replace: bool,
    ) -> Result<Option<V>, StrMapError> {
        let Some(root) = self.root else {
            self.reserve_nodes(1)?;
            self.root = Some(self.nodes.alloc(Node::Leaf { key, value }));
            self.count += 1;
            trace!(key_len = key.len(), "insert into empty map");
            return Ok(None);
        };

        let nearest = self.nodes.descend(root, key);
        let Some(diff) = first_diff_bit(key, self.nodes.leaf_key(nearest)) else {
            if !replace {
                return Err(StrMapError::KeyExists);
            }
            let Node::Leaf { value: slot, .. } = self.nodes.node_mut(nearest) else {
                unreachable!("expected a leaf");
            };
            trace!(key_len = key.len(), "replace value");
            return Ok(Some(std::mem::replace(slot, value)));
        };

        // Nothing below may fail once both nodes are reserved.
        self.reserve_nodes(2)?;

        let mut link: Option<(NodeId, usize)> = None;
        let mut current = root;
        while let Node::Branch { crit, child } = self.nodes.node(current) {
            if *crit > diff {
                break;
            }
            let dir = key_bit(key, *crit);
            link = Some((current, dir));
            current = child[dir];
        }

        let leaf = self.nodes.alloc(Node::Leaf { key, value });
        let mut child = [current; 2];
        child[key_bit(key, diff)] = leaf;
        let branch = self.nodes.alloc(Node::Branch { crit: diff, child });
        self.set_link(link, branch);
        self.count += 1;

        trace!(key_len = key.len(), crit = diff, "insert");
        Ok(None)
    }

    fn reserve_nodes(&mut self, n: usize) -> Result<(), StrMapError> {
        self.nodes.reserve(n).map_err(|err| {
            warn!(error = %err, len = self.count, "node allocation failed");
            err
        })
    }

    /// Points `link` (a branch and direction, or the root slot) at `target`.
    fn set_link(&mut self, link: Option<(NodeId, usize)>, target: NodeId) {
        match link {
            None => self.root = Some(target),
            Some((branch, dir)) => match self.nodes.node_mut(branch) {
                Node::Branch { child, .. } => child[dir] = target,
                Node::Leaf { .. } => unreachable!("link owner must be a branch"),
            },
        }
    }

    /// Removes `key`, returning the stored key reference and its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<(&'k [u8], V)> {
        let mut current = self.root?;
        let mut parent: Option<(NodeId, usize)> = None;
        let mut grandparent: Option<(NodeId, usize)> = None;
        while let Node::Branch { crit, child } = self.nodes.node(current) {
            let dir = key_bit(key, *crit);
            grandparent = parent;
            parent = Some((current, dir));
            current = child[dir];
        }

        if self.nodes.leaf_key(current) != key {
            return None;
        }

        match parent {
            None => self.root = None,
            Some((branch, dir)) => {
                let Node::Branch { child, .. } = self.nodes.node(branch) else {
                    unreachable!("parent must be a branch");
                };
                let sibling = child[1 - dir];
                self.set_link(grandparent, sibling);
                self.nodes.free(branch);
            }
        }

        let Node::Leaf { key, value } = self.nodes.free(current) else {
            unreachable!("expected a leaf");
        };
        self.count -= 1;
        trace!(key_len = key.len(), len = self.count, "remove");

        if self.root.is_none() {
            debug!(slots = self.nodes.slots.len(), "map emptied; resetting arena");
            self.nodes.clear();
        }
        Some((key, value))
    }

    /// Removes `key`, reporting whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.remove(key).is_some()
    }

    /// Removes every entry. Allocated node capacity is kept.
    pub fn clear(&mut self) {
        debug!(len = self.count, nodes = self.nodes.live(), "clear");
        self.nodes.clear();
        self.root = None;
        self.count = 0;
    }

    /// Returns a read-only view over the entries whose key starts with `prefix`.
    ///
    /// Never fails: a prefix no key carries yields an empty view. The empty
    /// prefix yields the whole map.
    pub fn prefix(&self, prefix: &[u8]) -> Prefix<'_, 'k, V> {
        let Some(mut top) = self.root else {
            return Prefix::new(self, None);
        };

        // Below a branch at or past the prefix's last bit, every key agrees
        // with every other on all prefix bits.
        let bits = prefix_bit_len(prefix);
        while let Node::Branch { crit, child } = self.nodes.node(top) {
            if *crit >= bits {
                break;
            }
            top = child[key_bit(prefix, *crit)];
        }

        // The descent only consulted the branch bits; any leaf below `top`
        // decides whether the prefix is actually present.
        let representative = self.nodes.leftmost_leaf(top);
        if self.nodes.leaf_key(representative).starts_with(prefix) {
            Prefix::new(self, Some(top))
        } else {
            Prefix::new(self, None)
        }
    }

    pub fn iter(&self) -> Iter<'_, 'k, V> {
        Iter::new(&self.nodes, self.root)
    }

    /// Calls `f` on every entry in ascending key order until it breaks.
    pub fn iterate<F>(&self, f: F) -> Walk
    where
        F: FnMut(&'k [u8], &V) -> ControlFlow<()>,
    {
        walk(self.iter(), f)
    }
}

impl<V> Default for StrMap<'_, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for StrMap<'_, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(k, v)| (String::from_utf8_lossy(k), v)))
            .finish()
    }
}

impl<'a, 'k, V> IntoIterator for &'a StrMap<'k, V> {
    type Item = (&'k [u8], &'a V);
    type IntoIter = Iter<'a, 'k, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn walk<'a, 'k: 'a, V: 'a, F>(iter: Iter<'a, 'k, V>, mut f: F) -> Walk
where
    F: FnMut(&'k [u8], &V) -> ControlFlow<()>,
{
    for (key, value) in iter {
        if f(key, value).is_break() {
            return Walk::Stopped;
        }
    }
    Walk::Completed
}

// =============================================================================
// Prefix views
// =============================================================================

/// A read-only view over the entries of a [`StrMap`] sharing a prefix.
///
/// The view aliases the map's nodes; it borrows the map, so the map cannot be
/// mutated while the view is alive.
pub struct Prefix<'a, 'k, V> {
    map: &'a StrMap<'k, V>,
    root: Option<NodeId>,
}

impl<'a, 'k, V> Prefix<'a, 'k, V> {
    fn new(map: &'a StrMap<'k, V>, root: Option<NodeId>) -> Self {
        Self { map, root }
    }

    /// True iff no entry has the prefix.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// True iff the view covers the same subtree as the whole map.
    #[inline]
    pub fn is_whole_map(&self) -> bool {
        self.root == self.map.root
    }

    /// Number of entries in the view. `O(1)` for a whole-map view, otherwise
    /// a full traversal.
    pub fn len(&self) -> usize {
        if self.is_whole_map() {
            self.map.count
        } else {
            self.iter().count()
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&'a V> {
        let map = self.map;
        let nodes = &map.nodes;
        let leaf = nodes.find(self.root?, key)?;
        match nodes.node(leaf) {
            Node::Leaf { value, .. } => Some(value),
            Node::Branch { .. } => unreachable!("expected a leaf"),
        }
    }

    pub fn iter(&self) -> Iter<'a, 'k, V> {
        let map = self.map;
        Iter::new(&map.nodes, self.root)
    }

    /// Calls `f` on every entry in the view in ascending key order until it
    /// breaks.
    pub fn iterate<F>(&self, f: F) -> Walk
    where
        F: FnMut(&'k [u8], &V) -> ControlFlow<()>,
    {
        walk(self.iter(), f)
    }
}

impl<V> Clone for Prefix<'_, '_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Prefix<'_, '_, V> {}

impl<V: std::fmt::Debug> std::fmt::Debug for Prefix<'_, '_, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(k, v)| (String::from_utf8_lossy(k), v)))
            .finish()
    }
}

impl<'a, 'k, V> IntoIterator for Prefix<'a, 'k, V> {
    type Item = (&'k [u8], &'a V);
    type IntoIter = Iter<'a, 'k, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// Ascending-order iterator over a map or a prefix view.
///
/// Uses an explicit stack whose depth is bounded by the longest key's bit
/// length, not by the number of entries.
pub struct Iter<'a, 'k, V> {
    nodes: &'a NodeArena<'k, V>,
    stack: Vec<NodeId>,
}

impl<'a, 'k, V> Iter<'a, 'k, V> {
    fn new(nodes: &'a NodeArena<'k, V>, root: Option<NodeId>) -> Self {
        Self {
            nodes,
            stack: root.into_iter().collect(),
        }
    }
}

impl<'a, 'k, V> Iterator for Iter<'a, 'k, V> {
    type Item = (&'k [u8], &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let nodes = self.nodes;
        while let Some(id) = self.stack.pop() {
            match nodes.node(id) {
                Node::Leaf { key, value } => return Some((*key, value)),
                Node::Branch { child, .. } => {
                    self.stack.push(child[1]);
                    self.stack.push(child[0]);
                }
            }
        }
        None
    }
}


#[cfg(test)]
mod proptests;
