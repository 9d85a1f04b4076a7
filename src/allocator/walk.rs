//! Iterates live allocations in leaf-order.

use super::Allocator;
use crate::tree::BuddyTree;

/// What a [`Allocator::walk`] callback wants to happen next.
pub enum WalkAction<T> {
    /// Keep iterating.
    Continue,
    /// Stop iterating now and return this value from `walk`.
    Stop(T),
}

/// Handed to the `walk` callback alongside each slot's address and size.
/// Lets the callback free the slot it was just called with without needing
/// its own borrow of the [`Allocator`] (the walker already holds one).
pub struct WalkCursor<'t> {
    tree: &'t mut BuddyTree,
    pos: u64,
    freed: bool,
}

impl<'t> WalkCursor<'t> {
    /// Releases the slot this callback invocation was called with. A no-op
    /// if called more than once for the same slot.
    pub fn free_current(&mut self) {
        if !self.freed {
            self.tree.release(self.pos);
            self.freed = true;
        }
    }
}

impl Allocator {
    /// Invokes `callback(addr, size, cursor)` for every currently-allocated
    /// slot, in left-to-right leaf order (equivalently, a pre-order that
    /// visits each allocated subtree exactly once without descending into
    /// it).
    ///
    /// If `callback` returns [`WalkAction::Stop`], iteration halts and that
    /// value is returned. The callback may call `cursor.free_current()` —
    /// the walker always re-reads status before advancing, so it stays
    /// correct whether or not the current slot was just freed.
    ///
    /// Runs in `O(order · 2^order)`: up to `2^order` leaf positions are
    /// visited, and recognizing that a position begins an allocated
    /// subtree costs up to `O(order)` (walking up to its parent).
    pub fn walk<T>(
        &mut self,
        mut callback: impl FnMut(*mut u8, usize, &mut WalkCursor) -> WalkAction<T>,
    ) -> Option<T> {
        let mut tree = self.tree();
        let mut pos = tree.leftmost_child();
        let upper = tree.upper_pos_bound();

        while pos < upper {
            let status = tree.status(pos);
            if status != 0 {
                pos = tree.right_adjacent(pos);
                if pos == 0 {
                    break;
                }
                continue;
            }

            // `pos` is allocated. Find the depth at which its allocation
            // actually begins: walk up while the parent is also status 0.
            let mut owner = pos;
            loop {
                let parent = tree.parent(owner);
                if parent == 0 || tree.status(parent) != 0 {
                    break;
                }
                owner = parent;
            }

            let addr = self.address_for_position(&tree, owner);
            let size = self.slot_size_at_depth(tree.depth(owner));

            let mut cursor = WalkCursor {
                tree: &mut tree,
                pos: owner,
                freed: false,
            };
            let action = callback(addr, size, &mut cursor);
            if let WalkAction::Stop(v) = action {
                return Some(v);
            }

            // advance past the whole slot rooted at `owner`, whether or
            // not the callback just freed it
            let (_, to) = tree.interval(owner);
            pos = to + 1;
            if !tree.valid(pos) {
                break;
            }
        }
        None
    }
}
