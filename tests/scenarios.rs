//! End-to-end scenarios exercising `Allocator` through its public API only,
//! mirroring the concrete walk-throughs this crate's behavior is specified
//! against.

use buddy_arena::{Allocator, Mode, SafeFreeStatus};
use core::ptr::NonNull;

fn new_standard(arena_size: usize) -> (Vec<u8>, Vec<u8>, &'static mut Allocator) {
    let meta_len = Allocator::sizeof(arena_size);
    let mut meta = vec![0u8; meta_len];
    let mut arena = vec![0u8; arena_size];
    let at = NonNull::new(meta.as_mut_ptr()).unwrap();
    let main = NonNull::new(arena.as_mut_ptr()).unwrap();
    let alloc = unsafe { Allocator::init(at, main, arena_size) }.unwrap();
    (meta, arena, alloc)
}

#[test]
fn basic_split_and_merge() {
    let (_meta, arena, alloc) = new_standard(4096);
    let base = arena.as_ptr() as usize;

    let a = alloc.malloc(2048).unwrap();
    assert_eq!(a.as_ptr() as usize - base, 0);
    let b = alloc.malloc(2048).unwrap();
    assert_eq!(b.as_ptr() as usize - base, 2048);
    assert!(alloc.malloc(2048).is_none());

    unsafe {
        alloc.free(a.as_ptr());
        alloc.free(b.as_ptr());
    }
    let c = alloc.malloc(2048).unwrap();
    assert_eq!(c.as_ptr() as usize - base, 0);
    assert!(alloc.check_invariant());
}

#[test]
fn mixed_depths() {
    let (_meta, arena, alloc) = new_standard(4096);
    let base = arena.as_ptr() as usize;

    let a = alloc.malloc(1024).unwrap();
    assert_eq!(a.as_ptr() as usize - base, 0);
    let b = alloc.malloc(2048).unwrap();
    assert_eq!(b.as_ptr() as usize - base, 2048);
    let c = alloc.malloc(1024).unwrap();
    assert_eq!(c.as_ptr() as usize - base, 1024);
    assert!(alloc.malloc(1024).is_none());
    assert!(alloc.check_invariant());
}

#[test]
fn virtual_slots_bound_the_real_arena() {
    let arena_size = 4096 - 256;
    let (_meta, _arena, alloc) = new_standard(arena_size);
    for _ in 0..60 {
        assert!(alloc.malloc(64).is_some());
    }
    assert!(alloc.malloc(64).is_none());
    assert!(alloc.check_invariant());
}

#[test]
fn left_bias_fragments_large_requests_after_freeing_evens() {
    let (_meta, _arena, alloc) = new_standard(512);
    let mut ptrs = Vec::new();
    for _ in 0..8 {
        ptrs.push(alloc.malloc(64).unwrap());
    }
    for i in [0usize, 2, 4, 6] {
        unsafe { alloc.free(ptrs[i].as_ptr()) };
    }
    assert!(alloc.malloc(256).is_none());
    for _ in 0..4 {
        assert!(alloc.malloc(64).is_some());
    }
    assert!(alloc.malloc(64).is_none());
}

#[test]
fn safe_free_reports_size_mismatch_and_leaves_metadata_untouched() {
    let (meta, _arena, alloc) = new_standard(4096);
    let p = alloc.malloc(64).unwrap();
    let before = meta.clone();
    assert_eq!(alloc.safe_free(p.as_ptr(), 128), SafeFreeStatus::SizeMismatch);
    assert_eq!(meta, before);
    assert_eq!(alloc.safe_free(p.as_ptr(), 64), SafeFreeStatus::Success);
}

#[test]
fn safe_free_is_idempotent_only_the_first_time() {
    let (_meta, _arena, alloc) = new_standard(1024);
    let p = alloc.malloc(64).unwrap();
    assert_eq!(alloc.safe_free(p.as_ptr(), 64), SafeFreeStatus::Success);
    assert_eq!(alloc.safe_free(p.as_ptr(), 64), SafeFreeStatus::InvalidAddress);
}

#[test]
fn non_overlap_alignment_and_bounds_hold_across_many_allocations() {
    let arena_size = 8192;
    let (_meta, arena, alloc) = new_standard(arena_size);
    let base = arena.as_ptr() as usize;
    let alignment = alloc.alignment();

    let mut live: Vec<(usize, usize)> = Vec::new();
    let sizes = [16usize, 32, 64, 128, 256, 512];
    for &size in sizes.iter().cycle().take(40) {
        if let Some(p) = alloc.malloc(size) {
            let addr = p.as_ptr() as usize;
            assert_eq!(addr % alignment, 0, "returned address must respect alignment");
            assert!(addr >= base && addr + size <= base + arena_size, "must lie within arena");
            for &(a, s) in &live {
                let disjoint = addr + size <= a || a + s <= addr;
                assert!(disjoint, "allocations must not overlap");
            }
            live.push((addr, size));
        }
    }
    assert!(alloc.check_invariant());
}

#[test]
fn round_trip_free_restores_prior_tree_state() {
    let (_meta, _arena, alloc) = new_standard(4096);
    alloc.malloc(512).unwrap();
    let free_before = alloc.arena_free_size();
    let frag_before = alloc.fragmentation();

    let p = alloc.malloc(256).unwrap();
    unsafe { alloc.free(p.as_ptr()) };

    assert_eq!(alloc.arena_free_size(), free_before);
    assert_eq!(alloc.fragmentation(), frag_before);
}

#[test]
fn relocation_equivalence_for_embedded_allocators() {
    let arena_size = 4096;
    let mut block = vec![0u8; arena_size];
    let main = NonNull::new(block.as_mut_ptr()).unwrap();
    let alloc = unsafe { Allocator::embed(main, arena_size) }.unwrap();
    assert_eq!(alloc.mode(), Mode::Embedded);

    let base = alloc.arena_span().base() as usize;
    let a = alloc.malloc(128).unwrap();
    let a_off = a.as_ptr() as usize - base;
    let b = alloc.malloc(256).unwrap();
    let b_off = b.as_ptr() as usize - base;
    let free_before = alloc.arena_free_size();

    let mut relocated = block.clone();
    let new_main = NonNull::new(relocated.as_mut_ptr()).unwrap();
    let reopened = unsafe { Allocator::get_embed_at(new_main, arena_size) }.unwrap();

    assert_eq!(reopened.arena_free_size(), free_before);
    assert_eq!(reopened.mode(), Mode::Embedded);
    assert!(reopened.check_invariant());

    let new_base = reopened.arena_span().base() as usize;
    let a_ptr = (new_base + a_off) as *mut u8;
    let b_ptr = (new_base + b_off) as *mut u8;
    assert_eq!(reopened.safe_free(a_ptr, 128), SafeFreeStatus::Success);
    assert_eq!(reopened.safe_free(b_ptr, 256), SafeFreeStatus::Success);
    assert!(reopened.is_empty());
}

#[test]
fn fragmentation_metric_matches_reference_scenario() {
    let (_meta, _arena, alloc) = new_standard(256);
    assert_eq!(alloc.fragmentation(), 0);

    let a = alloc.malloc(64).unwrap();
    assert_eq!(alloc.fragmentation(), 143);

    let b = alloc.malloc(64).unwrap();
    let c = alloc.malloc(64).unwrap();
    let d = alloc.malloc(64).unwrap();
    unsafe {
        alloc.free(a.as_ptr());
        alloc.free(c.as_ptr());
    }
    assert_eq!(alloc.fragmentation(), 191);

    unsafe {
        alloc.free(b.as_ptr());
        alloc.free(d.as_ptr());
    }
    assert_eq!(alloc.fragmentation(), 0);
}

#[test]
fn resize_within_the_same_tree_order_adjusts_virtual_slots() {
    let (_meta, _arena, alloc) = new_standard(2000);
    for _ in 0..250 {
        assert!(alloc.malloc(8).is_some());
    }
    assert!(alloc.malloc(8).is_none());

    assert!(unsafe { alloc.resize(2048) });
    assert_eq!(alloc.arena_size(), 2048);
    assert!(alloc.malloc(8).is_some(), "growing within the tree order frees up more virtual slots");
    assert!(alloc.check_invariant());
}

#[test]
fn resize_refuses_to_grow_past_the_constructed_tree_order() {
    let (_meta, _arena, alloc) = new_standard(2000);
    let free_before = alloc.arena_free_size();

    assert!(!unsafe { alloc.resize(4096) });
    assert_eq!(alloc.arena_size(), 2000);
    assert_eq!(alloc.arena_free_size(), free_before);
    assert!(alloc.check_invariant());
}

#[test]
fn resize_shrinks_across_a_tree_order_when_the_right_half_is_free() {
    let (_meta, arena, alloc) = new_standard(4096);
    let base = arena.as_ptr() as usize;
    let p = alloc.malloc(512).unwrap();
    assert_eq!(p.as_ptr() as usize - base, 0);

    assert!(unsafe { alloc.resize(2048) });
    assert_eq!(alloc.arena_size(), 2048);
    assert!(alloc.check_invariant());
    assert_eq!(alloc.safe_free(p.as_ptr(), 512), SafeFreeStatus::Success);
}

#[test]
fn resize_refuses_a_shrink_that_would_discard_a_live_allocation() {
    let (_meta, arena, alloc) = new_standard(4096);
    let base = arena.as_ptr() as usize;
    // force an allocation into the tree's right half
    let mut ptrs = Vec::new();
    while let Some(p) = alloc.malloc(512) {
        ptrs.push(p);
    }
    let in_right_half = ptrs
        .iter()
        .find(|p| p.as_ptr() as usize - base >= 2048)
        .copied()
        .expect("eight 512-byte slots cover both halves of a 4096-byte arena");

    assert!(!unsafe { alloc.resize(2048) });
    assert_eq!(alloc.arena_size(), 4096);
    assert_eq!(alloc.safe_free(in_right_half.as_ptr(), 512), SafeFreeStatus::Success);
}

#[test]
fn boundary_behaviors() {
    let (_meta, _arena, alloc) = new_standard(4096);

    assert!(alloc.malloc(0).is_some());
    assert!(alloc.calloc(0, 8).is_some());
    assert!(alloc.calloc(8, 0).is_some());
    assert!(alloc.calloc(usize::MAX, 2).is_none());
    assert!(unsafe { alloc.reallocarray(core::ptr::null_mut(), usize::MAX, 2, false) }.is_none());

    let p = alloc.malloc(64).unwrap();
    let same_size = unsafe { alloc.realloc(p.as_ptr(), 64, false) };
    assert_eq!(same_size, Some(p));
}
