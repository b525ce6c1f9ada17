//! ART node bodies with adaptive sizing.
//!
//! Four inner layouts cover the fan-out range:
//!
//! - [`Node4`]: up to 4 children, sorted keys
//! - [`Node16`]: 5-16 children, sorted keys searched with SIMD
//! - [`Node48`]: 17-48 children, 256-byte one-based index
//! - [`Node256`]: 49-256 children, direct array indexing
//!
//! Every inner node also carries one zero-sized child slot: the edge taken
//! when the search key is exhausted at this node. It holds a key that is a
//! proper prefix of its siblings ("a" next to "ab") and sorts before any
//! keyed child.
//!
//! All four inner bodies start with the same [`Header`], so a tagged
//! reference can reach the prefix and child count without decoding the
//! kind first.

#![allow(unsafe_op_in_unsafe_fn)]

use std::ptr::{self, NonNull};

use smallvec::SmallVec;

use crate::arena::Arena;
use crate::bytes::ByteSlice;

use super::search;
use super::tagged::{NodeKind, NodeRef};

/// Child capacity of a [`Node4`].
pub(crate) const NODE4_CAP: usize = 4;
/// Child capacity of a [`Node16`].
pub(crate) const NODE16_CAP: usize = 16;
/// Child capacity of a [`Node48`].
pub(crate) const NODE48_CAP: usize = 48;
/// Child capacity of a [`Node256`].
pub(crate) const NODE256_CAP: usize = 256;

/// A [`Node16`] shrinks to a [`Node4`] below this keyed-child count.
pub(crate) const NODE16_SHRINK: usize = 3;
/// A [`Node48`] shrinks to a [`Node16`] below this keyed-child count.
pub(crate) const NODE48_SHRINK: usize = 12;
/// A [`Node256`] shrinks to a [`Node48`] below this keyed-child count.
pub(crate) const NODE256_SHRINK: usize = 37;

/// State shared by every inner kind. Must be the first field of each inner
/// body so any inner node can be reached through a header pointer.
#[repr(C)]
pub(crate) struct Header {
    /// Path-compressed prefix shared by all keys below this node.
    pub partial: ByteSlice,
    /// Number of keyed children. The zero-sized child is tracked apart.
    pub num_children: u16,
}

impl Header {
    fn empty() -> Header {
        Header {
            partial: ByteSlice::EMPTY,
            num_children: 0,
        }
    }
}

/// A leaf owns the full key and the value.
#[repr(C)]
pub(crate) struct Leaf<V> {
    pub key: ByteSlice,
    pub value: V,
}

impl<V> Leaf<V> {
    pub fn alloc(arena: &Arena, key: &[u8], value: V) -> NonNull<Leaf<V>> {
        arena.alloc(Leaf {
            key: ByteSlice::from_bytes(arena, key),
            value,
        })
    }

    /// Byte equality over the full stored key.
    #[inline]
    pub unsafe fn matches(&self, key: &[u8]) -> bool {
        self.key.equals(key)
    }

    /// True iff the stored key begins with `prefix`.
    #[inline]
    pub unsafe fn matches_prefix(&self, prefix: &[u8]) -> bool {
        let key = self.key.as_bytes();
        key.len() >= prefix.len() && &key[..prefix.len()] == prefix
    }
}

/// Inner node for fan-out up to 4. `keys[..num_children]` is sorted.
#[repr(C)]
pub(crate) struct Node4 {
    pub header: Header,
    pub keys: [u8; NODE4_CAP],
    pub children: [NodeRef; NODE4_CAP],
    pub zero_child: NodeRef,
}

/// Inner node for fan-out 5-16. `keys[..num_children]` is sorted and
/// searched with the SIMD primitives.
#[repr(C)]
pub(crate) struct Node16 {
    pub header: Header,
    pub keys: [u8; NODE16_CAP],
    pub children: [NodeRef; NODE16_CAP],
    pub zero_child: NodeRef,
}

/// Inner node for fan-out 17-48. `index[b]` is the one-based position of
/// byte `b`'s child in `children`; 0 means no child.
#[repr(C)]
pub(crate) struct Node48 {
    pub header: Header,
    pub index: [u8; 256],
    pub children: [NodeRef; NODE48_CAP],
    pub zero_child: NodeRef,
}

/// Inner node for fan-out 49-256: direct indexing by key byte.
#[repr(C)]
pub(crate) struct Node256 {
    pub header: Header,
    pub children: [NodeRef; NODE256_CAP],
    pub zero_child: NodeRef,
}

impl Node4 {
    pub fn alloc(arena: &Arena) -> NonNull<Node4> {
        arena.alloc(Node4 {
            header: Header::empty(),
            keys: [0; NODE4_CAP],
            children: [NodeRef::EMPTY; NODE4_CAP],
            zero_child: NodeRef::EMPTY,
        })
    }
}

impl Node16 {
    pub fn alloc(arena: &Arena) -> NonNull<Node16> {
        arena.alloc(Node16 {
            header: Header::empty(),
            keys: [0; NODE16_CAP],
            children: [NodeRef::EMPTY; NODE16_CAP],
            zero_child: NodeRef::EMPTY,
        })
    }
}

impl Node48 {
    pub fn alloc(arena: &Arena) -> NonNull<Node48> {
        arena.alloc(Node48 {
            header: Header::empty(),
            index: [0; 256],
            children: [NodeRef::EMPTY; NODE48_CAP],
            zero_child: NodeRef::EMPTY,
        })
    }
}

impl Node256 {
    pub fn alloc(arena: &Arena) -> NonNull<Node256> {
        arena.alloc(Node256 {
            header: Header::empty(),
            children: [NodeRef::EMPTY; NODE256_CAP],
            zero_child: NodeRef::EMPTY,
        })
    }
}

/// The zero-sized-child slot of an inner node.
pub(crate) unsafe fn zero_child_slot(r: NodeRef) -> *mut NodeRef {
    match r.kind() {
        NodeKind::Leaf => panic!("zero_child_slot on a leaf"),
        NodeKind::Node4 => ptr::addr_of_mut!((*r.ptr::<Node4>().as_ptr()).zero_child),
        NodeKind::Node16 => ptr::addr_of_mut!((*r.ptr::<Node16>().as_ptr()).zero_child),
        NodeKind::Node48 => ptr::addr_of_mut!((*r.ptr::<Node48>().as_ptr()).zero_child),
        NodeKind::Node256 => ptr::addr_of_mut!((*r.ptr::<Node256>().as_ptr()).zero_child),
    }
}

/// True iff the keyed-child table is at the kind's capacity.
pub(crate) unsafe fn is_full(r: NodeRef) -> bool {
    let count = (*r.ptr::<Header>().as_ptr()).num_children as usize;
    match r.kind() {
        NodeKind::Leaf => true,
        NodeKind::Node4 => count == NODE4_CAP,
        NodeKind::Node16 => count == NODE16_CAP,
        NodeKind::Node48 => count == NODE48_CAP,
        NodeKind::Node256 => count == NODE256_CAP,
    }
}

/// Locate the child slot for effective index `key` (`None` selects the
/// zero-sized child). Returns null when no child is present there.
pub(crate) unsafe fn find_child(r: NodeRef, key: Option<u8>) -> *mut NodeRef {
    let b = match key {
        Some(b) => b,
        None => {
            let slot = zero_child_slot(r);
            return if (*slot).is_empty() { ptr::null_mut() } else { slot };
        }
    };
    match r.kind() {
        NodeKind::Leaf => panic!("find_child on a leaf"),
        NodeKind::Node4 => {
            let n = r.ptr::<Node4>().as_ptr();
            let count = (*n).header.num_children as usize;
            for i in 0..count {
                if (*n).keys[i] == b {
                    return ptr::addr_of_mut!((*n).children[i]);
                }
            }
            ptr::null_mut()
        }
        NodeKind::Node16 => {
            let n = r.ptr::<Node16>().as_ptr();
            let count = (*n).header.num_children as usize;
            match search::find_key_index(&(*n).keys, count, b) {
                Some(i) => ptr::addr_of_mut!((*n).children[i]),
                None => ptr::null_mut(),
            }
        }
        NodeKind::Node48 => {
            let n = r.ptr::<Node48>().as_ptr();
            let slot = (*n).index[b as usize];
            if slot == 0 {
                ptr::null_mut()
            } else {
                ptr::addr_of_mut!((*n).children[slot as usize - 1])
            }
        }
        NodeKind::Node256 => {
            let n = r.ptr::<Node256>().as_ptr();
            let slot = ptr::addr_of_mut!((*n).children[b as usize]);
            if (*slot).is_empty() {
                ptr::null_mut()
            } else {
                slot
            }
        }
    }
}

/// Insert `child` under effective index `key`.
///
/// The caller must grow the node first when the keyed table is full;
/// adding under an already-present key byte overwrites the slot in place
/// without touching the child count.
pub(crate) unsafe fn add_child(r: NodeRef, key: Option<u8>, child: NodeRef) {
    let b = match key {
        Some(b) => b,
        None => {
            *zero_child_slot(r) = child;
            return;
        }
    };
    match r.kind() {
        NodeKind::Leaf => panic!("add_child on a leaf"),
        NodeKind::Node4 => {
            let n = r.ptr::<Node4>().as_ptr();
            let count = (*n).header.num_children as usize;
            for i in 0..count {
                if (*n).keys[i] == b {
                    (*n).children[i] = child;
                    return;
                }
            }
            debug_assert!(count < NODE4_CAP, "Node4 is full, grow first");
            let mut pos = count;
            for i in 0..count {
                if (*n).keys[i] > b {
                    pos = i;
                    break;
                }
            }
            for i in (pos..count).rev() {
                (*n).keys[i + 1] = (*n).keys[i];
                (*n).children[i + 1] = (*n).children[i];
            }
            (*n).keys[pos] = b;
            (*n).children[pos] = child;
            (*n).header.num_children += 1;
        }
        NodeKind::Node16 => {
            let n = r.ptr::<Node16>().as_ptr();
            let count = (*n).header.num_children as usize;
            if let Some(i) = search::find_key_index(&(*n).keys, count, b) {
                (*n).children[i] = child;
                return;
            }
            debug_assert!(count < NODE16_CAP, "Node16 is full, grow first");
            let pos = search::find_insert_position(&(*n).keys, count, b);
            for i in (pos..count).rev() {
                (*n).keys[i + 1] = (*n).keys[i];
                (*n).children[i + 1] = (*n).children[i];
            }
            (*n).keys[pos] = b;
            (*n).children[pos] = child;
            (*n).header.num_children += 1;
        }
        NodeKind::Node48 => {
            let n = r.ptr::<Node48>().as_ptr();
            let existing = (*n).index[b as usize];
            if existing != 0 {
                (*n).children[existing as usize - 1] = child;
                return;
            }
            let count = (*n).header.num_children as usize;
            debug_assert!(count < NODE48_CAP, "Node48 is full, grow first");
            // First zeroed slot; remove_child keeps vacated slots zeroed.
            let mut slot = 0;
            while slot < NODE48_CAP && !(*n).children[slot].is_empty() {
                slot += 1;
            }
            debug_assert!(slot < NODE48_CAP);
            (*n).children[slot] = child;
            (*n).index[b as usize] = (slot + 1) as u8;
            (*n).header.num_children += 1;
        }
        NodeKind::Node256 => {
            let n = r.ptr::<Node256>().as_ptr();
            if (*n).children[b as usize].is_empty() {
                (*n).header.num_children += 1;
            }
            (*n).children[b as usize] = child;
        }
    }
}

/// Remove the child at effective index `key`. A missing Node48 index entry
/// is a no-op; elsewhere a missing child is a caller bug.
pub(crate) unsafe fn remove_child(r: NodeRef, key: Option<u8>) {
    let b = match key {
        Some(b) => b,
        None => {
            *zero_child_slot(r) = NodeRef::EMPTY;
            return;
        }
    };
    match r.kind() {
        NodeKind::Leaf => panic!("remove_child on a leaf"),
        NodeKind::Node4 => {
            let n = r.ptr::<Node4>().as_ptr();
            let count = (*n).header.num_children as usize;
            let mut idx = count;
            for i in 0..count {
                if (*n).keys[i] == b {
                    idx = i;
                    break;
                }
            }
            debug_assert!(idx < count, "remove_child: byte {} not present", b);
            if idx == count {
                return;
            }
            for i in idx..count - 1 {
                (*n).keys[i] = (*n).keys[i + 1];
                (*n).children[i] = (*n).children[i + 1];
            }
            (*n).keys[count - 1] = 0;
            (*n).children[count - 1] = NodeRef::EMPTY;
            (*n).header.num_children -= 1;
        }
        NodeKind::Node16 => {
            let n = r.ptr::<Node16>().as_ptr();
            let count = (*n).header.num_children as usize;
            let found = search::find_key_index(&(*n).keys, count, b);
            debug_assert!(found.is_some(), "remove_child: byte {} not present", b);
            let idx = match found {
                Some(i) => i,
                None => return,
            };
            for i in idx..count - 1 {
                (*n).keys[i] = (*n).keys[i + 1];
                (*n).children[i] = (*n).children[i + 1];
            }
            (*n).keys[count - 1] = 0;
            (*n).children[count - 1] = NodeRef::EMPTY;
            (*n).header.num_children -= 1;
        }
        NodeKind::Node48 => {
            let n = r.ptr::<Node48>().as_ptr();
            let slot = (*n).index[b as usize];
            if slot == 0 {
                return;
            }
            (*n).children[slot as usize - 1] = NodeRef::EMPTY;
            (*n).index[b as usize] = 0;
            (*n).header.num_children -= 1;
        }
        NodeKind::Node256 => {
            let n = r.ptr::<Node256>().as_ptr();
            if !(*n).children[b as usize].is_empty() {
                (*n).children[b as usize] = NodeRef::EMPTY;
                (*n).header.num_children -= 1;
            }
        }
    }
}

/// Allocate the next-larger kind and migrate children into it, preserving
/// the key-to-child mapping. The caller replaces the parent slot with the
/// returned reference and then frees the old body with [`free_body`]; the
/// prefix slice moves over as-is.
pub(crate) unsafe fn grow(arena: &Arena, r: NodeRef) -> NodeRef {
    match r.kind() {
        NodeKind::Node4 => {
            let old = r.ptr::<Node4>().as_ptr();
            let count = (*old).header.num_children as usize;
            let new = Node16::alloc(arena);
            let n = new.as_ptr();
            (*n).header.partial = (*old).header.partial;
            (*n).header.num_children = (*old).header.num_children;
            (&mut (*n).keys)[..count].copy_from_slice(&(&(*old).keys)[..count]);
            (&mut (*n).children)[..count].copy_from_slice(&(&(*old).children)[..count]);
            (*n).zero_child = (*old).zero_child;
            NodeRef::new(NodeKind::Node16, new)
        }
        NodeKind::Node16 => {
            let old = r.ptr::<Node16>().as_ptr();
            let count = (*old).header.num_children as usize;
            let new = Node48::alloc(arena);
            let n = new.as_ptr();
            (*n).header.partial = (*old).header.partial;
            (*n).header.num_children = (*old).header.num_children;
            for i in 0..count {
                (*n).index[(*old).keys[i] as usize] = (i + 1) as u8;
                (*n).children[i] = (*old).children[i];
            }
            (*n).zero_child = (*old).zero_child;
            NodeRef::new(NodeKind::Node48, new)
        }
        NodeKind::Node48 => {
            let old = r.ptr::<Node48>().as_ptr();
            let new = Node256::alloc(arena);
            let n = new.as_ptr();
            (*n).header.partial = (*old).header.partial;
            (*n).header.num_children = (*old).header.num_children;
            for byte in 0..256 {
                let slot = (*old).index[byte];
                if slot != 0 {
                    (*n).children[byte] = (*old).children[slot as usize - 1];
                }
            }
            (*n).zero_child = (*old).zero_child;
            NodeRef::new(NodeKind::Node256, new)
        }
        kind => panic!("grow on {:?}", kind),
    }
}

/// Shrink after a removal once the keyed-child count falls under the
/// kind's threshold. Returns the replacement reference, which may be `r`
/// unchanged; when a new body is produced the old one is freed here.
///
/// The Node4 case is the path-compression rule: at one remaining child the
/// node disappears, folding its prefix and edge byte into an inner child.
pub(crate) unsafe fn shrink(arena: &Arena, r: NodeRef) -> NodeRef {
    match r.kind() {
        NodeKind::Leaf => panic!("shrink on a leaf"),
        NodeKind::Node4 => shrink_node4(arena, r),
        NodeKind::Node16 => {
            let old = r.ptr::<Node16>().as_ptr();
            let count = (*old).header.num_children as usize;
            if count >= NODE16_SHRINK {
                return r;
            }
            let new = Node4::alloc(arena);
            let n = new.as_ptr();
            (*n).header.partial = (*old).header.partial;
            (*n).header.num_children = (*old).header.num_children;
            (&mut (*n).keys)[..count].copy_from_slice(&(&(*old).keys)[..count]);
            (&mut (*n).children)[..count].copy_from_slice(&(&(*old).children)[..count]);
            (*n).zero_child = (*old).zero_child;
            arena.free(r.ptr::<Node16>());
            NodeRef::new(NodeKind::Node4, new)
        }
        NodeKind::Node48 => {
            let old = r.ptr::<Node48>().as_ptr();
            let count = (*old).header.num_children as usize;
            if count >= NODE48_SHRINK {
                return r;
            }
            let new = Node16::alloc(arena);
            let n = new.as_ptr();
            (*n).header.partial = (*old).header.partial;
            (*n).header.num_children = (*old).header.num_children;
            let mut next = 0;
            for byte in 0..256 {
                let slot = (*old).index[byte];
                if slot != 0 {
                    (*n).keys[next] = byte as u8;
                    (*n).children[next] = (*old).children[slot as usize - 1];
                    next += 1;
                }
            }
            debug_assert_eq!(next, count);
            (*n).zero_child = (*old).zero_child;
            arena.free(r.ptr::<Node48>());
            NodeRef::new(NodeKind::Node16, new)
        }
        NodeKind::Node256 => {
            let old = r.ptr::<Node256>().as_ptr();
            let count = (*old).header.num_children as usize;
            if count >= NODE256_SHRINK {
                return r;
            }
            let new = Node48::alloc(arena);
            let n = new.as_ptr();
            (*n).header.partial = (*old).header.partial;
            (*n).header.num_children = (*old).header.num_children;
            let mut next = 0;
            for byte in 0..256 {
                let child = (*old).children[byte];
                if !child.is_empty() {
                    (*n).index[byte] = (next + 1) as u8;
                    (*n).children[next as usize] = child;
                    next += 1;
                }
            }
            debug_assert_eq!(next as usize, count);
            (*n).zero_child = (*old).zero_child;
            arena.free(r.ptr::<Node256>());
            NodeRef::new(NodeKind::Node48, new)
        }
    }
}

unsafe fn shrink_node4(arena: &Arena, r: NodeRef) -> NodeRef {
    let n = r.ptr::<Node4>().as_ptr();
    let count = (*n).header.num_children as usize;
    let zero = (*n).zero_child;
    if count + usize::from(!zero.is_empty()) > 1 {
        return r;
    }
    if count == 0 {
        // Only the zero-sized child remains; its key is already complete,
        // so it stands in for the whole subtree. An empty result means the
        // node lost its last child.
        (*n).header.partial.release(arena);
        arena.free(r.ptr::<Node4>());
        return zero;
    }
    let child = (*n).children[0];
    if child.kind() == NodeKind::Leaf {
        (*n).header.partial.release(arena);
        arena.free(r.ptr::<Node4>());
        return child;
    }
    // Fold this node's prefix and the edge byte into the inner child.
    let edge = (*n).keys[0];
    let child_header = child.ptr::<Header>().as_ptr();
    let mut joined: SmallVec<[u8; 32]> = SmallVec::new();
    joined.extend_from_slice((*n).header.partial.as_bytes());
    joined.push(edge);
    joined.extend_from_slice((*child_header).partial.as_bytes());
    let old_partial = (*child_header).partial;
    (*child_header).partial = ByteSlice::from_bytes(arena, &joined);
    old_partial.release(arena);
    (*n).header.partial.release(arena);
    arena.free(r.ptr::<Node4>());
    child
}

/// Leftmost descendant leaf. The zero-sized child sorts before any keyed
/// child.
pub(crate) unsafe fn minimum<V>(mut r: NodeRef) -> Option<NonNull<Leaf<V>>> {
    while !r.is_empty() {
        match r.kind() {
            NodeKind::Leaf => return Some(r.ptr()),
            NodeKind::Node4 => {
                let n = r.ptr::<Node4>().as_ptr();
                r = if !(*n).zero_child.is_empty() {
                    (*n).zero_child
                } else {
                    (*n).children[0]
                };
            }
            NodeKind::Node16 => {
                let n = r.ptr::<Node16>().as_ptr();
                r = if !(*n).zero_child.is_empty() {
                    (*n).zero_child
                } else {
                    (*n).children[0]
                };
            }
            NodeKind::Node48 => {
                let n = r.ptr::<Node48>().as_ptr();
                r = if !(*n).zero_child.is_empty() {
                    (*n).zero_child
                } else {
                    match search::find_first_nonzero(&(*n).index) {
                        Some(byte) => (*n).children[(*n).index[byte] as usize - 1],
                        None => NodeRef::EMPTY,
                    }
                };
            }
            NodeKind::Node256 => {
                let n = r.ptr::<Node256>().as_ptr();
                r = if !(*n).zero_child.is_empty() {
                    (*n).zero_child
                } else {
                    let mut next = NodeRef::EMPTY;
                    for byte in 0..256 {
                        if !(*n).children[byte].is_empty() {
                            next = (*n).children[byte];
                            break;
                        }
                    }
                    next
                };
            }
        }
    }
    None
}

/// Rightmost descendant leaf. The zero-sized child is only the maximum
/// when no keyed child exists.
pub(crate) unsafe fn maximum<V>(mut r: NodeRef) -> Option<NonNull<Leaf<V>>> {
    while !r.is_empty() {
        match r.kind() {
            NodeKind::Leaf => return Some(r.ptr()),
            NodeKind::Node4 => {
                let n = r.ptr::<Node4>().as_ptr();
                let count = (*n).header.num_children as usize;
                r = if count > 0 {
                    (*n).children[count - 1]
                } else {
                    (*n).zero_child
                };
            }
            NodeKind::Node16 => {
                let n = r.ptr::<Node16>().as_ptr();
                let count = (*n).header.num_children as usize;
                r = if count > 0 {
                    (*n).children[count - 1]
                } else {
                    (*n).zero_child
                };
            }
            NodeKind::Node48 => {
                let n = r.ptr::<Node48>().as_ptr();
                r = match search::find_last_nonzero(&(*n).index) {
                    Some(byte) => (*n).children[(*n).index[byte] as usize - 1],
                    None => (*n).zero_child,
                };
            }
            NodeKind::Node256 => {
                let n = r.ptr::<Node256>().as_ptr();
                let mut next = (*n).zero_child;
                for byte in (0..256).rev() {
                    if !(*n).children[byte].is_empty() {
                        next = (*n).children[byte];
                        break;
                    }
                }
                r = next;
            }
        }
    }
    None
}

/// Free just the node body, after a grow moved its prefix and children
/// into a replacement.
pub(crate) unsafe fn free_body(arena: &Arena, r: NodeRef) {
    match r.kind() {
        NodeKind::Leaf => panic!("free_body on a leaf"),
        NodeKind::Node4 => arena.free(r.ptr::<Node4>()),
        NodeKind::Node16 => arena.free(r.ptr::<Node16>()),
        NodeKind::Node48 => arena.free(r.ptr::<Node48>()),
        NodeKind::Node256 => arena.free(r.ptr::<Node256>()),
    }
}

/// Post-order release of a whole subtree: children first, then the prefix
/// slice, then the body. Leaf values are dropped in place.
pub(crate) unsafe fn release<V>(arena: &Arena, r: NodeRef) {
    if r.is_empty() {
        return;
    }
    match r.kind() {
        NodeKind::Leaf => {
            let leaf = r.ptr::<Leaf<V>>().as_ptr();
            ptr::drop_in_place(ptr::addr_of_mut!((*leaf).value));
            (*leaf).key.release(arena);
            arena.free(r.ptr::<Leaf<V>>());
        }
        NodeKind::Node4 => {
            let n = r.ptr::<Node4>().as_ptr();
            release::<V>(arena, (*n).zero_child);
            for i in 0..(*n).header.num_children as usize {
                release::<V>(arena, (*n).children[i]);
            }
            (*n).header.partial.release(arena);
            arena.free(r.ptr::<Node4>());
        }
        NodeKind::Node16 => {
            let n = r.ptr::<Node16>().as_ptr();
            release::<V>(arena, (*n).zero_child);
            for i in 0..(*n).header.num_children as usize {
                release::<V>(arena, (*n).children[i]);
            }
            (*n).header.partial.release(arena);
            arena.free(r.ptr::<Node16>());
        }
        NodeKind::Node48 => {
            let n = r.ptr::<Node48>().as_ptr();
            release::<V>(arena, (*n).zero_child);
            for slot in 0..NODE48_CAP {
                release::<V>(arena, (*n).children[slot]);
            }
            (*n).header.partial.release(arena);
            arena.free(r.ptr::<Node48>());
        }
        NodeKind::Node256 => {
            let n = r.ptr::<Node256>().as_ptr();
            release::<V>(arena, (*n).zero_child);
            for byte in 0..256 {
                release::<V>(arena, (*n).children[byte]);
            }
            (*n).header.partial.release(arena);
            arena.free(r.ptr::<Node256>());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn leaf_ref(arena: &Arena, key: &[u8], value: u64) -> NodeRef {
        NodeRef::new(NodeKind::Leaf, Leaf::alloc(arena, key, value))
    }

    unsafe fn keyed_children(r: NodeRef) -> Vec<(u8, NodeRef)> {
        let mut out = Vec::new();
        for byte in 0..=255u8 {
            let slot = find_child(r, Some(byte));
            if !slot.is_null() {
                out.push((byte, *slot));
            }
        }
        out
    }

    #[test]
    fn test_node4_sorted_insert() {
        let arena = Arena::new();
        unsafe {
            let r = NodeRef::new(NodeKind::Node4, Node4::alloc(&arena));
            for b in [9u8, 3, 200, 40] {
                add_child(r, Some(b), leaf_ref(&arena, &[b], b as u64));
            }
            let n = r.ptr::<Node4>().as_ptr();
            assert_eq!((*n).header.num_children, 4);
            assert_eq!(&(*n).keys, &[3, 9, 40, 200]);
            assert!(is_full(r));
            assert!(find_child(r, Some(40)) != std::ptr::null_mut());
            assert!(find_child(r, Some(41)).is_null());
        }
    }

    #[test]
    fn test_add_existing_byte_overwrites_in_place() {
        let arena = Arena::new();
        unsafe {
            let r = NodeRef::new(NodeKind::Node4, Node4::alloc(&arena));
            add_child(r, Some(7), leaf_ref(&arena, b"a", 1));
            let replacement = leaf_ref(&arena, b"b", 2);
            add_child(r, Some(7), replacement);
            let n = r.ptr::<Node4>().as_ptr();
            assert_eq!((*n).header.num_children, 1);
            assert_eq!(*find_child(r, Some(7)), replacement);
        }
    }

    #[test]
    fn test_zero_child_slot() {
        let arena = Arena::new();
        unsafe {
            let r = NodeRef::new(NodeKind::Node4, Node4::alloc(&arena));
            assert!(find_child(r, None).is_null());
            let leaf = leaf_ref(&arena, b"", 0);
            add_child(r, None, leaf);
            assert_eq!(*find_child(r, None), leaf);
            let n = r.ptr::<Node4>().as_ptr();
            assert_eq!((*n).header.num_children, 0);
            remove_child(r, None);
            assert!(find_child(r, None).is_null());
        }
    }

    #[test]
    fn test_node4_remove_compacts() {
        let arena = Arena::new();
        unsafe {
            let r = NodeRef::new(NodeKind::Node4, Node4::alloc(&arena));
            for b in [1u8, 2, 3, 4] {
                add_child(r, Some(b), leaf_ref(&arena, &[b], b as u64));
            }
            remove_child(r, Some(2));
            let n = r.ptr::<Node4>().as_ptr();
            assert_eq!((*n).header.num_children, 3);
            assert_eq!(&(&(*n).keys)[..3], &[1, 3, 4]);
            assert!((*n).children[3].is_empty());
        }
    }

    #[test]
    fn test_node16_simd_paths() {
        let arena = Arena::new();
        unsafe {
            let r = NodeRef::new(NodeKind::Node16, Node16::alloc(&arena));
            let bytes: Vec<u8> = (0..16).map(|i| (i * 16 + 1) as u8).rev().collect();
            for &b in &bytes {
                add_child(r, Some(b), leaf_ref(&arena, &[b], b as u64));
            }
            let n = r.ptr::<Node16>().as_ptr();
            assert!(is_full(r));
            let mut sorted = bytes.clone();
            sorted.sort_unstable();
            assert_eq!(&(&(*n).keys)[..], &sorted[..]);
            for &b in &bytes {
                assert!(!find_child(r, Some(b)).is_null());
            }
            assert!(find_child(r, Some(0)).is_null());
        }
    }

    #[test]
    fn test_node48_slot_reuse_and_zeroing() {
        let arena = Arena::new();
        unsafe {
            let r = NodeRef::new(NodeKind::Node48, Node48::alloc(&arena));
            for b in 0..20u8 {
                add_child(r, Some(b), leaf_ref(&arena, &[b], b as u64));
            }
            let n = r.ptr::<Node48>().as_ptr();
            let vacated = (*n).index[5] as usize - 1;
            remove_child(r, Some(5));
            assert_eq!((*n).index[5], 0);
            assert!((*n).children[vacated].is_empty());

            // The vacated slot is the first zeroed one, so it is reused.
            add_child(r, Some(99), leaf_ref(&arena, &[99], 99));
            assert_eq!((*n).index[99] as usize - 1, vacated);
            assert_eq!((*n).header.num_children, 20);

            // Removing an absent byte is a no-op.
            remove_child(r, Some(5));
            assert_eq!((*n).header.num_children, 20);
        }
    }

    #[test]
    fn test_node256_add_remove() {
        let arena = Arena::new();
        unsafe {
            let r = NodeRef::new(NodeKind::Node256, Node256::alloc(&arena));
            for b in [0u8, 128, 255] {
                add_child(r, Some(b), leaf_ref(&arena, &[b], b as u64));
            }
            let n = r.ptr::<Node256>().as_ptr();
            assert_eq!((*n).header.num_children, 3);
            remove_child(r, Some(128));
            assert_eq!((*n).header.num_children, 2);
            assert!(find_child(r, Some(128)).is_null());
        }
    }

    #[test]
    fn test_grow_chain_preserves_mapping() {
        let arena = Arena::new();
        unsafe {
            let mut r = NodeRef::new(NodeKind::Node4, Node4::alloc(&arena));
            let zero = leaf_ref(&arena, b"", 0);
            add_child(r, None, zero);

            let mut expected = Vec::new();
            for b in (0..=255u8).step_by(5) {
                if is_full(r) {
                    let grown = grow(&arena, r);
                    free_body(&arena, r);
                    r = grown;
                }
                let child = leaf_ref(&arena, &[b], b as u64);
                add_child(r, Some(b), child);
                expected.push((b, child));
            }

            assert_eq!(r.kind(), NodeKind::Node256);
            assert_eq!(keyed_children(r), expected);
            assert_eq!(*find_child(r, None), zero);
        }
    }

    #[test]
    fn test_shrink_node48_to_node16_sorted() {
        let arena = Arena::new();
        unsafe {
            let mut r = NodeRef::new(NodeKind::Node4, Node4::alloc(&arena));
            let mut present: Vec<u8> = (0..20).map(|i| (i * 7 + 3) as u8).collect();
            for &b in &present {
                if is_full(r) {
                    let grown = grow(&arena, r);
                    free_body(&arena, r);
                    r = grown;
                }
                add_child(r, Some(b), leaf_ref(&arena, &[b], b as u64));
            }
            assert_eq!(r.kind(), NodeKind::Node48);

            while present.len() >= NODE48_SHRINK {
                let b = present.remove(3);
                remove_child(r, Some(b));
                r = shrink(&arena, r);
            }
            assert_eq!(r.kind(), NodeKind::Node16);
            let n = r.ptr::<Node16>().as_ptr();
            present.sort_unstable();
            assert_eq!(&(&(*n).keys)[..present.len()], &present[..]);
            for &b in &present {
                assert!(!find_child(r, Some(b)).is_null());
            }
        }
    }

    #[test]
    fn test_shrink_node256_to_node48_remaps_index() {
        let arena = Arena::new();
        unsafe {
            let r = NodeRef::new(NodeKind::Node256, Node256::alloc(&arena));
            let present: Vec<u8> = (0..36).map(|i| (i * 3 + 1) as u8).collect();
            for &b in &present {
                add_child(r, Some(b), leaf_ref(&arena, &[b], b as u64));
            }
            let shrunk = shrink(&arena, r);
            assert_eq!(shrunk.kind(), NodeKind::Node48);
            let n = shrunk.ptr::<Node48>().as_ptr();
            assert_eq!((*n).header.num_children as usize, present.len());
            for &b in &present {
                let slot = (*n).index[b as usize];
                assert!(slot != 0);
                assert!(!(*n).children[slot as usize - 1].is_empty());
            }
        }
    }

    #[test]
    fn test_minimum_prefers_zero_child() {
        let arena = Arena::new();
        unsafe {
            let r = NodeRef::new(NodeKind::Node4, Node4::alloc(&arena));
            add_child(r, Some(b'b'), leaf_ref(&arena, b"ab", 1));
            add_child(r, None, leaf_ref(&arena, b"a", 0));
            let min = minimum::<u64>(r).unwrap();
            assert!((*min.as_ptr()).matches(b"a"));
            let max = maximum::<u64>(r).unwrap();
            assert!((*max.as_ptr()).matches(b"ab"));
        }
    }

    #[test]
    fn test_release_drops_values() {
        use std::rc::Rc;

        let arena = Arena::new();
        let marker = Rc::new(());
        unsafe {
            let r = NodeRef::new(NodeKind::Node4, Node4::alloc(&arena));
            add_child(
                r,
                Some(b'a'),
                NodeRef::new(NodeKind::Leaf, Leaf::alloc(&arena, b"a", Rc::clone(&marker))),
            );
            add_child(
                r,
                Some(b'b'),
                NodeRef::new(NodeKind::Leaf, Leaf::alloc(&arena, b"b", Rc::clone(&marker))),
            );
            assert_eq!(Rc::strong_count(&marker), 3);
            release::<Rc<()>>(&arena, r);
            assert_eq!(Rc::strong_count(&marker), 1);
        }
    }
}
