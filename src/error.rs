//! Error and status types returned across the public API.

use core::fmt;

/// Failure reasons for the constructors (`init`, `init_alignment`, `embed`,
/// `embed_alignment`). Distinct from "out of space", which the allocation
/// entry points report via a null/`None` return instead, per the arena's
/// stable C-shaped contract.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// `size < alignment`, or the arena cannot hold even one minimum slot.
    ArenaTooSmall,
    /// `alignment` is zero or not a power of two.
    AlignmentNotPowerOfTwo,
    /// Computing the effective (power-of-two) arena size would overflow.
    SizeOverflow,
    /// A caller-supplied pointer does not meet its required alignment.
    MisalignedBuffer,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            InitError::ArenaTooSmall => "arena is smaller than one minimum-alignment slot",
            InitError::AlignmentNotPowerOfTwo => "alignment is not a power of two",
            InitError::SizeOverflow => "effective arena size overflows",
            InitError::MisalignedBuffer => "buffer does not meet the required alignment",
        };
        f.write_str(msg)
    }
}

/// The stable, exhaustive result of [`crate::Allocator::safe_free`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SafeFreeStatus {
    Success = 0,
    BuddyIsNull = 1,
    InvalidAddress = 2,
    SizeMismatch = 3,
}

impl fmt::Display for SafeFreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SafeFreeStatus::Success => "success",
            SafeFreeStatus::BuddyIsNull => "allocator handle is null",
            SafeFreeStatus::InvalidAddress => "pointer is not a live allocation of this allocator",
            SafeFreeStatus::SizeMismatch => "declared size does not match the allocation's slot",
        };
        f.write_str(msg)
    }
}
