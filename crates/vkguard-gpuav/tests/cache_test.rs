//! Integration test: instrumentation cache and slot budget
//!
//! Verifies that identical bytecode is instrumented once, that entries are
//! counted per user, and the reservation and padding rules of the binding
//! budget.

use std::cell::Cell;

use vkguard_gpuav::budget::{BindingBudget, LayoutPlan, MAX_RESERVED_SLOTS};
use vkguard_gpuav::cache::{ContentHash, InstrumentationCache};
use vkguard_gpuav::SetupError;

fn make_shader(seed: u32) -> Vec<u32> {
    vec![0x0723_0203, 0x0001_0000, 0, 8, 0, seed, seed + 1]
}

fn fake_pass(counter: &Cell<u32>) -> impl FnOnce(&[u32], u16) -> Result<(Vec<u32>, u32), String> + '_ {
    move |words, shader_id| {
        counter.set(counter.get() + 1);
        let mut out = words.to_vec();
        out.push(u32::from(shader_id));
        Ok((out, 1))
    }
}

#[test]
fn test_identical_bytecode_is_instrumented_once() {
    let cache = InstrumentationCache::new();
    let calls = Cell::new(0);
    let shader = make_shader(1);

    let first = match cache.acquire(&shader, fake_pass(&calls)) {
        Ok(s) => s,
        Err(e) => panic!("first acquire failed: {e}"),
    };
    let second = match cache.acquire(&shader.clone(), fake_pass(&calls)) {
        Ok(s) => s,
        Err(e) => panic!("second acquire failed: {e}"),
    };

    assert_eq!(calls.get(), 1);
    assert_eq!(cache.runs(), 1);
    assert_eq!(first.words, second.words);
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.original_size, shader.len() * 4);
    assert_eq!(cache.users(first.hash), 2);

    // Different bytecode gets its own entry.
    assert!(cache.acquire(&make_shader(2), fake_pass(&calls)).is_ok());
    assert_eq!(calls.get(), 2);
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_entries_are_evicted_after_last_user() {
    let cache = InstrumentationCache::new();
    let calls = Cell::new(0);
    let shader = make_shader(7);

    let hash = cache
        .acquire(&shader, fake_pass(&calls))
        .map(|s| s.hash)
        .unwrap_or_else(|e| panic!("acquire failed: {e}"));
    assert!(cache.acquire(&shader, fake_pass(&calls)).is_ok());

    assert!(!cache.release(hash));
    assert!(cache.get(hash).is_some());
    assert!(cache.release(hash));
    assert!(cache.get(hash).is_none());
    assert!(!cache.release(hash), "releasing an evicted entry is a no-op");

    // A later module with the same bytecode runs the pass again.
    assert!(cache.acquire(&shader, fake_pass(&calls)).is_ok());
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_failed_pass_leaves_no_entry() {
    let cache = InstrumentationCache::new();
    let result = cache.acquire(&make_shader(3), |_, _| Err::<(Vec<u32>, u32), _>("unsupported"));
    assert_eq!(result.err(), Some("unsupported"));
    assert!(cache.is_empty());
    assert_eq!(cache.runs(), 0);
}

#[test]
fn test_content_hash_is_stable() {
    let a = ContentHash::of_words(&make_shader(5));
    let b = ContentHash::of_words(&make_shader(5));
    let c = ContentHash::of_words(&make_shader(6));
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_entries_get_distinct_shader_ids() {
    let cache = InstrumentationCache::new();
    let calls = Cell::new(0);
    let mut ids = Vec::new();
    for seed in 0..64 {
        match cache.acquire(&make_shader(seed * 10), fake_pass(&calls)) {
            Ok(shader) => {
                println!("seed {seed} -> id {}", shader.shader_id);
                assert_eq!(shader.words.last().copied(), Some(u32::from(shader.shader_id)));
                ids.push(shader.shader_id);
            }
            Err(e) => panic!("acquire failed: {e}"),
        }
    }
    let mut unique = ids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
    assert!(!ids.contains(&0));

    // A repeat of cached bytecode keeps its id.
    let again = cache.acquire(&make_shader(0), fake_pass(&calls)).map(|s| s.shader_id).ok();
    assert_eq!(again, ids.first().copied());
    assert_eq!(calls.get(), 64);
}

#[test]
fn test_budget_reservation() {
    match BindingBudget::reserve(1, MAX_RESERVED_SLOTS) {
        Err(SetupError::BindingSlotsExhausted { limit }) => assert_eq!(limit, 1),
        other => panic!("expected exhaustion, got {:?}", other),
    }

    let small = match BindingBudget::reserve(8, MAX_RESERVED_SLOTS) {
        Ok(b) => b,
        Err(e) => panic!("reserve failed: {e}"),
    };
    assert_eq!(small.reserved(), 8);
    assert_eq!(small.debug_set_index(), 7);
    assert_eq!(small.reported_limit(), 7);

    let large = match BindingBudget::reserve(u32::MAX, MAX_RESERVED_SLOTS) {
        Ok(b) => b,
        Err(e) => panic!("reserve failed: {e}"),
    };
    assert_eq!(large.reserved(), 33);

    // A configured cap above the hard ceiling is clamped.
    let capped = BindingBudget::reserve(64, 100).map(|b| b.reserved()).ok();
    assert_eq!(capped, Some(33));
}

#[test]
fn test_layout_padding() {
    let budget = match BindingBudget::reserve(6, MAX_RESERVED_SLOTS) {
        Ok(b) => b,
        Err(e) => panic!("reserve failed: {e}"),
    };

    match budget.pad_layouts(&["a", "b"], &"empty", &"debug") {
        LayoutPlan::Padded(layouts) => {
            assert_eq!(layouts, vec!["a", "b", "empty", "empty", "empty", "debug"]);
        }
        other => panic!("expected padding, got {:?}", other),
    }

    // Exactly one slot left: no padding, debug goes right after.
    match budget.pad_layouts(&["a", "b", "c", "d", "e"], &"empty", &"debug") {
        LayoutPlan::Padded(layouts) => assert_eq!(layouts.last(), Some(&"debug")),
        other => panic!("expected padding, got {:?}", other),
    }

    let full = ["a"; 6];
    match budget.pad_layouts(&full, &"empty", &"debug") {
        LayoutPlan::NoRoom { app_slots, reserved } => {
            assert_eq!(app_slots, 6);
            assert_eq!(reserved, 6);
        }
        other => panic!("expected NoRoom, got {:?}", other),
    }
}
