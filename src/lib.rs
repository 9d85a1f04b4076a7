//! A bounded-time binary buddy allocator over a caller-supplied arena.
//!
//! Every allocation request is rounded up to a power-of-two slot; free slots
//! are tracked by a bit-packed perfect binary tree ([`BuddyTree`]) in which
//! each node records the largest free order reachable beneath it, so the
//! allocator can find, split, and merge slots in time bounded by the tree's
//! order rather than by the number of outstanding allocations. [`Allocator`]
//! is the arena-facing entry point; it owns no memory of its own and never
//! performs a heap allocation on its own behalf — both its own metadata and
//! the arena it serves are buffers the caller provides.
//!
//! The crate has no required dependencies and builds under `no_std`; the
//! `std` standard library is only linked in for this crate's own test suite.

#![cfg_attr(not(test), no_std)]

mod allocator;
mod bits;
mod bitset;
mod error;
mod span;
mod tree;

pub use allocator::{Allocator, AllocatorDebug, Mode, WalkAction};
pub use error::{InitError, SafeFreeStatus};
pub use span::Span;
pub use tree::BuddyTree;

/// The largest tree order this crate will plan for on the host's pointer
/// width: one less than the number of bits in a `usize`, so a slot count of
/// `2^MAX_ORDER` units never overflows when counted in `usize` arithmetic.
pub const MAX_ORDER: u32 = (core::mem::size_of::<usize>() * 8 - 1) as u32;
