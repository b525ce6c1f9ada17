//! Debug utilities for tree troubleshooting.

#![allow(unsafe_op_in_unsafe_fn)]

use smallvec::SmallVec;

use super::node::{self, Leaf, Node16, Node256, Node4, Node48};
use super::tagged::{NodeKind, NodeRef};
use super::ArtTree;

type Path = SmallVec<[u8; 64]>;

impl<V> ArtTree<V> {
    /// Print the tree structure for debugging.
    pub fn debug_print(&self)
    where
        V: std::fmt::Debug,
    {
        println!("=== ART Debug ===");
        println!("Size: {}", self.len());
        if self.root.is_empty() {
            println!("(empty)");
        } else {
            unsafe {
                self.debug_node(self.root, 0);
            }
        }
        println!("=================");
    }

    unsafe fn debug_node(&self, r: NodeRef, depth: usize)
    where
        V: std::fmt::Debug,
    {
        let indent = "  ".repeat(depth);
        let print_inner = |name: &str, partial: &[u8], count: u16| {
            println!(
                "{}{} (partial={:?}, children={})",
                indent,
                name,
                String::from_utf8_lossy(partial),
                count
            );
        };
        match r.kind() {
            NodeKind::Leaf => {
                let leaf = r.ptr::<Leaf<V>>().as_ptr();
                println!(
                    "{}Leaf: {:?} -> {:?}",
                    indent,
                    String::from_utf8_lossy((*leaf).key.as_bytes()),
                    (*leaf).value
                );
            }
            NodeKind::Node4 => {
                let n = r.ptr::<Node4>().as_ptr();
                print_inner("Node4", (*n).header.partial.as_bytes(), (*n).header.num_children);
                self.debug_children(r, depth);
            }
            NodeKind::Node16 => {
                let n = r.ptr::<Node16>().as_ptr();
                print_inner("Node16", (*n).header.partial.as_bytes(), (*n).header.num_children);
                self.debug_children(r, depth);
            }
            NodeKind::Node48 => {
                let n = r.ptr::<Node48>().as_ptr();
                print_inner("Node48", (*n).header.partial.as_bytes(), (*n).header.num_children);
                self.debug_children(r, depth);
            }
            NodeKind::Node256 => {
                let n = r.ptr::<Node256>().as_ptr();
                print_inner("Node256", (*n).header.partial.as_bytes(), (*n).header.num_children);
                self.debug_children(r, depth);
            }
        }
    }

    unsafe fn debug_children(&self, r: NodeRef, depth: usize)
    where
        V: std::fmt::Debug,
    {
        let indent = "  ".repeat(depth);
        let zero = *node::zero_child_slot(r);
        if !zero.is_empty() {
            println!("{}  [--] ->", indent);
            self.debug_node(zero, depth + 2);
        }
        for byte in 0..=255u8 {
            let slot = node::find_child(r, Some(byte));
            if !slot.is_null() {
                println!("{}  [{:?}] ->", indent, byte as char);
                self.debug_node(*slot, depth + 2);
            }
        }
    }

    /// Verify tree integrity; returns the list of issues found.
    ///
    /// Checks the per-kind structural invariants: sorted keys, consistent
    /// counts, Node48 index/children agreement with strict zeroing, the
    /// zero-sized child being a leaf whose key ends at its node, leaf keys
    /// agreeing with their path, and no inner node with fewer than two
    /// children.
    pub fn verify_integrity(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.root.is_empty() {
            let mut path = Path::new();
            unsafe {
                self.verify_node(self.root, &mut path, &mut issues);
            }
        }
        issues
    }

    unsafe fn verify_node(&self, r: NodeRef, path: &mut Path, issues: &mut Vec<String>) {
        if r.kind() == NodeKind::Leaf {
            let leaf = r.ptr::<Leaf<V>>().as_ptr();
            let key = (*leaf).key.as_bytes();
            if !key.starts_with(path) {
                issues.push(format!(
                    "leaf key {:?} does not start with its path {:?}",
                    key, path
                ));
            }
            return;
        }

        let partial = (*r.ptr::<super::node::Header>().as_ptr()).partial;
        let count = (*r.ptr::<super::node::Header>().as_ptr()).num_children as usize;
        let depth_before = path.len();
        path.extend_from_slice(partial.as_bytes());

        let zero = *node::zero_child_slot(r);
        if count + usize::from(!zero.is_empty()) < 2 {
            issues.push(format!(
                "{:?} at path {:?} has fewer than two children",
                r.kind(),
                path
            ));
        }
        if !zero.is_empty() {
            if zero.kind() != NodeKind::Leaf {
                issues.push(format!("zero-sized child at path {:?} is not a leaf", path));
            } else {
                let leaf = zero.ptr::<Leaf<V>>().as_ptr();
                if !(*leaf).key.equals(path) {
                    issues.push(format!(
                        "zero-sized child key {:?} differs from its path {:?}",
                        (*leaf).key.as_bytes(),
                        path
                    ));
                }
            }
        }

        match r.kind() {
            NodeKind::Leaf => unreachable!(),
            NodeKind::Node4 => {
                let n = r.ptr::<Node4>().as_ptr();
                self.verify_sorted_keys(&(*n).keys, &(*n).children, count, node::NODE4_CAP, "Node4", issues);
                for i in 0..count.min(node::NODE4_CAP) {
                    path.push((*n).keys[i]);
                    self.verify_node((*n).children[i], path, issues);
                    path.pop();
                }
            }
            NodeKind::Node16 => {
                let n = r.ptr::<Node16>().as_ptr();
                self.verify_sorted_keys(&(*n).keys, &(*n).children, count, node::NODE16_CAP, "Node16", issues);
                for i in 0..count.min(node::NODE16_CAP) {
                    path.push((*n).keys[i]);
                    self.verify_node((*n).children[i], path, issues);
                    path.pop();
                }
            }
            NodeKind::Node48 => {
                let n = r.ptr::<Node48>().as_ptr();
                let mut used = [false; node::NODE48_CAP];
                let mut mapped = 0;
                for byte in 0..256 {
                    let slot = (*n).index[byte] as usize;
                    if slot == 0 {
                        continue;
                    }
                    mapped += 1;
                    if slot > node::NODE48_CAP {
                        issues.push(format!("Node48 index[{}] = {} out of range", byte, slot));
                        continue;
                    }
                    if used[slot - 1] {
                        issues.push(format!("Node48 slot {} mapped twice", slot - 1));
                    }
                    used[slot - 1] = true;
                    if (*n).children[slot - 1].is_empty() {
                        issues.push(format!("Node48 index[{}] points at an empty slot", byte));
                        continue;
                    }
                    path.push(byte as u8);
                    self.verify_node((*n).children[slot - 1], path, issues);
                    path.pop();
                }
                if mapped != count {
                    issues.push(format!(
                        "Node48 has {} mapped bytes but num_children={}",
                        mapped, count
                    ));
                }
                for slot in 0..node::NODE48_CAP {
                    if !used[slot] && !(*n).children[slot].is_empty() {
                        issues.push(format!("Node48 slot {} occupied but unmapped", slot));
                    }
                }
            }
            NodeKind::Node256 => {
                let n = r.ptr::<Node256>().as_ptr();
                let mut populated = 0;
                for byte in 0..256 {
                    if (*n).children[byte].is_empty() {
                        continue;
                    }
                    populated += 1;
                    path.push(byte as u8);
                    self.verify_node((*n).children[byte], path, issues);
                    path.pop();
                }
                if populated != count {
                    issues.push(format!(
                        "Node256 has {} children but num_children={}",
                        populated, count
                    ));
                }
            }
        }

        path.truncate(depth_before);
    }

    fn verify_sorted_keys(
        &self,
        keys: &[u8],
        children: &[NodeRef],
        count: usize,
        cap: usize,
        kind: &str,
        issues: &mut Vec<String>,
    ) {
        if count > cap {
            issues.push(format!("{} has {} children (max {})", kind, count, cap));
            return;
        }
        for i in 0..count {
            if children[i].is_empty() {
                issues.push(format!("{} child slot {} is empty", kind, i));
            }
        }
        for i in 1..count {
            if keys[i - 1] >= keys[i] {
                issues.push(format!(
                    "{} keys not strictly sorted: {} then {}",
                    kind,
                    keys[i - 1],
                    keys[i]
                ));
            }
        }
        for i in count..cap {
            if !children[i].is_empty() {
                issues.push(format!("{} child slot {} past count is not empty", kind, i));
            }
        }
    }
}
