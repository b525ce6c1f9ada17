//! Adaptive Radix Tree over byte-string keys.
//!
//! Based on "The Adaptive Radix Tree: ARTful Indexing for Main-Memory
//! Databases" by Leis et al., 2013.
//!
//! Key features:
//! - Adaptive node sizes (4, 16, 48, 256 children)
//! - Path compression for common prefixes
//! - Arena-backed node bodies addressed through one-word tagged references
//! - Ordered iteration and prefix scans
//!
//! Every mutation threads the parent's reference slot (`&mut NodeRef`), so
//! a grow, shrink or collapse can splice a replacement node into the tree
//! without back pointers.

#![allow(unsafe_op_in_unsafe_fn)]

mod debug;
pub(crate) mod node;
pub(crate) mod search;
mod tagged;

pub use tagged::NodeKind;

use std::marker::PhantomData;
use std::ptr;

use crate::arena::Arena;
use crate::bytes::ByteSlice;

use node::{Leaf, Node4};
use tagged::NodeRef;

/// Node population counts, gathered by walking the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArtStats {
    /// Number of leaves (== number of keys).
    pub leaf_count: usize,
    /// Number of Node4 bodies.
    pub node4_count: usize,
    /// Number of Node16 bodies.
    pub node16_count: usize,
    /// Number of Node48 bodies.
    pub node48_count: usize,
    /// Number of Node256 bodies.
    pub node256_count: usize,
}

/// An Adaptive Radix Tree mapping byte-string keys to values of type `V`.
///
/// Keys are arbitrary byte strings; each key maps to at most one value.
/// Lookups walk one key byte per level, iteration yields keys in
/// lexicographic order. A tree instance is single-threaded: it is `Send`
/// but shared access must be wrapped by the caller.
pub struct ArtTree<V> {
    arena: Arena,
    root: NodeRef,
    len: usize,
    _values: PhantomData<V>,
}

impl<V> ArtTree<V> {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            root: NodeRef::EMPTY,
            len: 0,
            _values: PhantomData,
        }
    }

    /// Number of keys in the tree.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True iff the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total bytes handed out by the tree's arena.
    pub fn allocated_bytes(&self) -> usize {
        self.arena.allocated()
    }

    /// Get a reference to the value for `key`.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let mut r = self.root;
        let mut depth = 0usize;
        while !r.is_empty() {
            unsafe {
                if r.kind() == NodeKind::Leaf {
                    let leaf = r.ptr::<Leaf<V>>().as_ptr();
                    if (*leaf).matches(key) {
                        return Some(&(*leaf).value);
                    }
                    return None;
                }
                let partial = (*r.ptr::<node::Header>().as_ptr()).partial;
                if !partial.is_empty() {
                    if check_prefix(partial, key, depth) != partial.len() {
                        return None;
                    }
                    depth += partial.len();
                }
                let b = key.get(depth).copied();
                let slot = node::find_child(r, b);
                if slot.is_null() {
                    return None;
                }
                r = *slot;
                if b.is_some() {
                    depth += 1;
                }
            }
        }
        None
    }

    /// True iff `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Insert a key-value pair, replacing any existing value.
    ///
    /// Returns the previous value if the key already existed.
    pub fn insert(&mut self, key: &[u8], value: V) -> Option<V> {
        self.insert_impl(key, value, true)
    }

    /// Insert only if `key` is not already present.
    ///
    /// Returns `None` after inserting; when the key already existed the
    /// stored value is kept and `value` is handed back untouched.
    pub fn insert_if_absent(&mut self, key: &[u8], value: V) -> Option<V> {
        self.insert_impl(key, value, false)
    }

    fn insert_impl(&mut self, key: &[u8], value: V, replace: bool) -> Option<V> {
        let displaced = unsafe { insert_rec(&self.arena, &mut self.root, key, value, 0, replace) };
        if displaced.is_none() {
            self.len += 1;
        }
        displaced
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let removed = unsafe { remove_rec(&self.arena, &mut self.root, key, 0) };
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// The smallest key and its value.
    pub fn minimum(&self) -> Option<(&[u8], &V)> {
        unsafe {
            let leaf = node::minimum::<V>(self.root)?.as_ptr();
            Some(((*leaf).key.as_bytes(), &(*leaf).value))
        }
    }

    /// The largest key and its value.
    pub fn maximum(&self) -> Option<(&[u8], &V)> {
        unsafe {
            let leaf = node::maximum::<V>(self.root)?.as_ptr();
            Some(((*leaf).key.as_bytes(), &(*leaf).value))
        }
    }

    /// In-order traversal of every key. `f` returning `true` stops the
    /// walk; the call reports whether it was stopped.
    pub fn iterate<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&[u8], &V) -> bool,
    {
        unsafe { iterate_rec::<V, F>(self.root, &mut f) }
    }

    /// Visit every key starting with `prefix`, in ascending order. `f`
    /// returning `true` stops the walk; the call reports whether it was
    /// stopped.
    pub fn iterate_prefix<F>(&self, prefix: &[u8], mut f: F) -> bool
    where
        F: FnMut(&[u8], &V) -> bool,
    {
        unsafe { iterate_prefix_walk::<V, F>(self.root, prefix, &mut f) }
    }

    /// Node population counts.
    pub fn stats(&self) -> ArtStats {
        let mut stats = ArtStats::default();
        unsafe {
            collect_stats(self.root, &mut stats);
        }
        stats
    }

    /// Remove every entry and release all nodes.
    pub fn clear(&mut self) {
        let root = NodeRef::replace(&mut self.root, NodeRef::EMPTY);
        unsafe {
            node::release::<V>(&self.arena, root);
        }
        self.len = 0;
    }
}

impl<V> Default for ArtTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for ArtTree<V> {
    fn drop(&mut self) {
        self.clear();
    }
}

// Safety: the tree owns its arena and every node in it; `&self` methods
// never mutate.
unsafe impl<V: Send> Send for ArtTree<V> {}
unsafe impl<V: Sync> Sync for ArtTree<V> {}

/// Number of bytes of `partial` matched by `key` starting at `depth`,
/// capped at the remaining key length. A result shorter than the partial
/// is a miss for search and delete, and a split point for insert.
unsafe fn check_prefix(partial: ByteSlice, key: &[u8], depth: usize) -> usize {
    let limit = partial.len().min(key.len().saturating_sub(depth));
    let p = partial.as_bytes();
    let mut i = 0;
    while i < limit && p[i] == key[depth + i] {
        i += 1;
    }
    i
}

/// Longest common prefix of two keys starting at `depth`.
fn longest_common_prefix(a: &[u8], b: &[u8], depth: usize) -> usize {
    let limit = a.len().min(b.len()).saturating_sub(depth);
    let mut i = 0;
    while i < limit && a[depth + i] == b[depth + i] {
        i += 1;
    }
    i
}

/// Recursive insert into the subtree referenced by `slot`.
///
/// Returns the displaced value when the key was already present: the old
/// value under `replace`, or `value` handed back untouched otherwise.
unsafe fn insert_rec<V>(
    arena: &Arena,
    slot: &mut NodeRef,
    key: &[u8],
    value: V,
    depth: usize,
    replace: bool,
) -> Option<V> {
    let r = *slot;
    if r.is_empty() {
        let leaf = Leaf::alloc(arena, key, value);
        *slot = NodeRef::new(NodeKind::Leaf, leaf);
        return None;
    }

    if r.kind() == NodeKind::Leaf {
        let leaf = r.ptr::<Leaf<V>>().as_ptr();
        if (*leaf).matches(key) {
            return Some(if replace {
                std::mem::replace(&mut (*leaf).value, value)
            } else {
                value
            });
        }
        // Two distinct keys in one position: a fresh Node4 takes over,
        // holding their common prefix past `depth`. Either key may end at
        // the split point, in which case it becomes the zero-sized child.
        let existing = (*leaf).key.as_bytes();
        let lcp = longest_common_prefix(existing, key, depth);
        let split = depth + lcp;
        let n4 = Node4::alloc(arena);
        if lcp > 0 {
            (*n4.as_ptr()).header.partial = ByteSlice::from_bytes(arena, &key[depth..split]);
        }
        let n4_ref = NodeRef::new(NodeKind::Node4, n4);
        node::add_child(n4_ref, existing.get(split).copied(), r);
        let new_leaf = NodeRef::new(NodeKind::Leaf, Leaf::alloc(arena, key, value));
        node::add_child(n4_ref, key.get(split).copied(), new_leaf);
        *slot = n4_ref;
        return None;
    }

    let header = r.ptr::<node::Header>().as_ptr();
    let partial = (*header).partial;
    if !partial.is_empty() {
        let matched = check_prefix(partial, key, depth);
        if matched < partial.len() {
            // The key diverges inside the compressed prefix: split it.
            // The upper part is cloned into a new Node4; this node keeps
            // the part past the edge byte as a view of its old storage.
            let n4 = Node4::alloc(arena);
            (*n4.as_ptr()).header.partial = partial.slice(0, matched).clone_in(arena);
            let n4_ref = NodeRef::new(NodeKind::Node4, n4);
            let edge = partial.load(matched);
            (*header).partial = partial.slice(matched + 1, partial.len());
            node::add_child(n4_ref, Some(edge), r);
            let new_leaf = NodeRef::new(NodeKind::Leaf, Leaf::alloc(arena, key, value));
            node::add_child(n4_ref, key.get(depth + matched).copied(), new_leaf);
            *slot = n4_ref;
            return None;
        }
    }

    let depth = depth + partial.len();
    let b = key.get(depth).copied();
    let child = node::find_child(r, b);
    if !child.is_null() {
        let next_depth = if b.is_some() { depth + 1 } else { depth };
        return insert_rec(arena, &mut *child, key, value, next_depth, replace);
    }

    // New edge below this node. The zero-sized slot always exists; a keyed
    // add may first need the next-larger layout.
    let mut target = r;
    if b.is_some() && node::is_full(r) {
        let grown = node::grow(arena, r);
        let old = NodeRef::replace(slot, grown);
        node::free_body(arena, old);
        target = grown;
    }
    let new_leaf = NodeRef::new(NodeKind::Leaf, Leaf::alloc(arena, key, value));
    node::add_child(target, b, new_leaf);
    None
}

/// Move the value out of a leaf and release its storage.
unsafe fn take_leaf<V>(arena: &Arena, r: NodeRef) -> V {
    let leaf = r.ptr::<Leaf<V>>().as_ptr();
    let value = ptr::read(ptr::addr_of!((*leaf).value));
    (*leaf).key.release(arena);
    arena.free(r.ptr::<Leaf<V>>());
    value
}

/// Recursive delete from the subtree referenced by `slot`.
unsafe fn remove_rec<V>(arena: &Arena, slot: &mut NodeRef, key: &[u8], depth: usize) -> Option<V> {
    let r = *slot;
    if r.is_empty() {
        return None;
    }

    if r.kind() == NodeKind::Leaf {
        // Only the root slot can hold a bare leaf; deeper leaves are
        // unlinked through their parent below.
        let leaf = r.ptr::<Leaf<V>>().as_ptr();
        if !(*leaf).matches(key) {
            return None;
        }
        *slot = NodeRef::EMPTY;
        return Some(take_leaf(arena, r));
    }

    let partial = (*r.ptr::<node::Header>().as_ptr()).partial;
    if !partial.is_empty() && check_prefix(partial, key, depth) != partial.len() {
        return None;
    }
    let depth = depth + partial.len();
    let b = key.get(depth).copied();
    let child_slot = node::find_child(r, b);
    if child_slot.is_null() {
        return None;
    }

    let child = *child_slot;
    if child.kind() == NodeKind::Leaf {
        let leaf = child.ptr::<Leaf<V>>().as_ptr();
        if !(*leaf).matches(key) {
            return None;
        }
        node::remove_child(r, b);
        let value = take_leaf::<V>(arena, child);
        let shrunk = node::shrink(arena, r);
        if shrunk != r {
            *slot = shrunk;
        }
        return Some(value);
    }

    let next_depth = if b.is_some() { depth + 1 } else { depth };
    remove_rec(arena, &mut *child_slot, key, next_depth)
}

/// In-order walk: the zero-sized child first (it holds the shorter key),
/// then children in ascending key-byte order.
unsafe fn iterate_rec<V, F>(r: NodeRef, f: &mut F) -> bool
where
    F: FnMut(&[u8], &V) -> bool,
{
    if r.is_empty() {
        return false;
    }
    match r.kind() {
        NodeKind::Leaf => {
            let leaf = r.ptr::<Leaf<V>>().as_ptr();
            f((*leaf).key.as_bytes(), &(*leaf).value)
        }
        NodeKind::Node4 => {
            let n = r.ptr::<node::Node4>().as_ptr();
            if iterate_rec::<V, F>((*n).zero_child, f) {
                return true;
            }
            for i in 0..(*n).header.num_children as usize {
                if iterate_rec::<V, F>((*n).children[i], f) {
                    return true;
                }
            }
            false
        }
        NodeKind::Node16 => {
            let n = r.ptr::<node::Node16>().as_ptr();
            if iterate_rec::<V, F>((*n).zero_child, f) {
                return true;
            }
            for i in 0..(*n).header.num_children as usize {
                if iterate_rec::<V, F>((*n).children[i], f) {
                    return true;
                }
            }
            false
        }
        NodeKind::Node48 => {
            let n = r.ptr::<node::Node48>().as_ptr();
            if iterate_rec::<V, F>((*n).zero_child, f) {
                return true;
            }
            for byte in 0..256 {
                let slot = (*n).index[byte];
                if slot != 0 && iterate_rec::<V, F>((*n).children[slot as usize - 1], f) {
                    return true;
                }
            }
            false
        }
        NodeKind::Node256 => {
            let n = r.ptr::<node::Node256>().as_ptr();
            if iterate_rec::<V, F>((*n).zero_child, f) {
                return true;
            }
            for byte in 0..256 {
                if iterate_rec::<V, F>((*n).children[byte], f) {
                    return true;
                }
            }
            false
        }
    }
}

/// Descend along `prefix`; once the whole prefix is accounted for (by path
/// bytes or by a compressed prefix running past it) the subtree is handed
/// to the full in-order walk.
unsafe fn iterate_prefix_walk<V, F>(root: NodeRef, prefix: &[u8], f: &mut F) -> bool
where
    F: FnMut(&[u8], &V) -> bool,
{
    let mut r = root;
    let mut depth = 0usize;
    while !r.is_empty() {
        if r.kind() == NodeKind::Leaf {
            let leaf = r.ptr::<Leaf<V>>().as_ptr();
            if (*leaf).matches_prefix(prefix) {
                return f((*leaf).key.as_bytes(), &(*leaf).value);
            }
            return false;
        }
        if depth == prefix.len() {
            // The path so far spells the whole prefix; every descendant
            // leaf starts with it.
            return iterate_rec::<V, F>(r, f);
        }
        let partial = (*r.ptr::<node::Header>().as_ptr()).partial;
        if !partial.is_empty() {
            let limit = partial.len().min(prefix.len() - depth);
            if check_prefix(partial, prefix, depth) < limit {
                return false;
            }
            if depth + partial.len() >= prefix.len() {
                // The compressed prefix covers the rest of the query while
                // matching it; the whole subtree qualifies.
                return iterate_rec::<V, F>(r, f);
            }
            depth += partial.len();
        }
        let slot = node::find_child(r, Some(prefix[depth]));
        if slot.is_null() {
            return false;
        }
        r = *slot;
        depth += 1;
    }
    false
}

unsafe fn collect_stats(r: NodeRef, stats: &mut ArtStats) {
    if r.is_empty() {
        return;
    }
    match r.kind() {
        NodeKind::Leaf => stats.leaf_count += 1,
        NodeKind::Node4 => {
            stats.node4_count += 1;
            let n = r.ptr::<node::Node4>().as_ptr();
            collect_stats((*n).zero_child, stats);
            for i in 0..(*n).header.num_children as usize {
                collect_stats((*n).children[i], stats);
            }
        }
        NodeKind::Node16 => {
            stats.node16_count += 1;
            let n = r.ptr::<node::Node16>().as_ptr();
            collect_stats((*n).zero_child, stats);
            for i in 0..(*n).header.num_children as usize {
                collect_stats((*n).children[i], stats);
            }
        }
        NodeKind::Node48 => {
            stats.node48_count += 1;
            let n = r.ptr::<node::Node48>().as_ptr();
            collect_stats((*n).zero_child, stats);
            for slot in 0..node::NODE48_CAP {
                collect_stats((*n).children[slot], stats);
            }
        }
        NodeKind::Node256 => {
            stats.node256_count += 1;
            let n = r.ptr::<node::Node256>().as_ptr();
            collect_stats((*n).zero_child, stats);
            for byte in 0..256 {
                collect_stats((*n).children[byte], stats);
            }
        }
    }
}
