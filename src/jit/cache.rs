//! JIT entry cache keyed by `(function_id, loop_id)`, with per-entry
//! generation counters and a permanent blocklist for keys the translator or
//! codegen will never succeed on again.
//!
//! Grounded on the reference `jit::runtime::code_cache::CodeCache`: an
//! `RwLock`-protected `FxHashMap` keyed by a composite id, size-accounted
//! insert, invalidate-in-place rather than remove. This cache swaps the
//! `(module_id, func_index)` key for `(function_id, loop_id)` and adds the
//! monotonic generation counter and deferred-invalidation flag this design calls for.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::ir::NativeBlock;
use super::memory::ExecutableMemory;

/// Composite key identifying one tier-up unit: a function plus, for
/// loop-scoped compilation, which loop within it (`0` for the whole function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Function this entry belongs to.
    pub function_id: u32,
    /// Loop index within the function, or `0` for a function-level entry.
    pub loop_id: u32,
}

/// One compiled entry: the executable region plus bookkeeping the tier
/// controller and deopt path both need.
pub struct JitEntry {
    /// The mapped, W^X-protected native code.
    pub code: ExecutableMemory,
    /// Byte offset of the entry point within `code`.
    pub entry_offset: usize,
    /// Monotonically increasing per-key generation, bumped on every install.
    pub generation: u64,
    /// Whether a safepoint-deferred invalidation is pending for this entry
    /// (invalidation during in-flight execution is deferred to the
    /// next safepoint rather than applied immediately).
    pub pending_invalidate: bool,
    /// Backend name this entry was compiled with (`"orus_jit_x86_64"`,
    /// `"orus_jit_aarch64"`, or `"orus_jit_helper_stub"`), surfaced for
    /// diagnostics and for telling the execution path when it must fall
    /// back to interpreting `native_block` directly instead of jumping into
    /// `code`.
    pub debug_name: &'static str,
    /// Owned copy of the IR this entry was compiled from (NativeBlock).
    /// Kept alongside the native code so the helper-stub execution path
    /// never needs to re-translate to run a block.
    pub native_block: NativeBlock,
}

#[derive(Default)]
struct CacheState {
    entries: FxHashMap<CacheKey, JitEntry>,
    blocklist: FxHashMap<CacheKey, &'static str>,
}

/// The process-wide JIT entry cache.
pub struct JitCache {
    state: RwLock<CacheState>,
    next_generation: AtomicU64,
}

impl Default for JitCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JitCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Installs (or replaces) the compiled entry for `key`, bumping its
    /// generation counter, and returns the new generation.
    pub fn install(
        &self,
        key: CacheKey,
        code: ExecutableMemory,
        entry_offset: usize,
        debug_name: &'static str,
        native_block: NativeBlock,
    ) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write();
        state.entries.insert(
            key,
            JitEntry {
                code,
                entry_offset,
                generation,
                pending_invalidate: false,
                debug_name,
                native_block,
            },
        );
        generation
    }

    /// Returns the debug name and native block recorded for `key`, if an
    /// entry is installed (regardless of pending-invalidate state — callers
    /// executing via the helper-stub path need this even while a deferred
    /// invalidation is outstanding, since the entry is still valid until the
    /// next safepoint resolves it).
    pub fn entry_info(&self, key: CacheKey) -> Option<(&'static str, NativeBlock)> {
        let state = self.state.read();
        let entry = state.entries.get(&key)?;
        Some((entry.debug_name, entry.native_block.clone()))
    }

    /// Returns the entry point pointer and generation for `key`, if present,
    /// not blocklisted, and not pending invalidation.
    pub fn lookup(&self, key: CacheKey) -> Option<(*const u8, u64)> {
        let state = self.state.read();
        if state.blocklist.contains_key(&key) {
            return None;
        }
        let entry = state.entries.get(&key)?;
        if entry.pending_invalidate {
            return None;
        }
        // Safety: entry_offset was recorded by the installing backend and is
        // within `code`'s bounds.
        let ptr = unsafe { entry.code.fn_ptr_at(entry.entry_offset) };
        Some((ptr, entry.generation))
    }

    /// Marks `key` as permanently ineligible for compilation (blocklisting:
    /// `UNSUPPORTED_*`, `UNHANDLED_OPCODE`, `ROLLOUT_DISABLED`).
    pub fn blocklist(&self, key: CacheKey, reason: &'static str) {
        self.state.write().blocklist.insert(key, reason);
    }

    /// Whether `key` is permanently blocklisted.
    pub fn is_blocklisted(&self, key: CacheKey) -> bool {
        self.state.read().blocklist.contains_key(&key)
    }

    /// Requests invalidation of `key`. If `defer` is set (an execution of
    /// this entry may currently be on the stack), the entry is only marked
    /// `pending_invalidate` and is actually dropped at the next
    /// [`JitCache::resolve_pending`] call (normally driven from a safepoint).
    pub fn invalidate(&self, key: CacheKey, defer: bool) {
        let mut state = self.state.write();
        if defer {
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.pending_invalidate = true;
            }
        } else {
            state.entries.remove(&key);
        }
    }

    /// Drops every entry whose `pending_invalidate` flag is set. Called at
    /// a safepoint once no JIT frame for the entry is on the stack.
    pub fn resolve_pending(&self) {
        let mut state = self.state.write();
        state.entries.retain(|_, entry| !entry.pending_invalidate);
    }

    /// Removes every cached entry and blocklist record (`flush_entries`).
    pub fn flush(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.blocklist.clear();
    }

    /// Number of live (non-blocklisted) entries currently cached.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(function_id: u32, loop_id: u32) -> CacheKey {
        CacheKey { function_id, loop_id }
    }

    fn block() -> NativeBlock {
        NativeBlock::default()
    }

    #[test]
    fn install_then_lookup_returns_matching_generation() {
        let cache = JitCache::new();
        let code = ExecutableMemory::install(&[0xC3]).unwrap();
        let gen = cache.install(key(1, 0), code, 0, "orus_jit_x86_64", block());
        let (_ptr, looked_up_gen) = cache.lookup(key(1, 0)).unwrap();
        assert_eq!(gen, looked_up_gen);
        assert_eq!(cache.entry_info(key(1, 0)).unwrap().0, "orus_jit_x86_64");
    }

    #[test]
    fn blocklisted_key_never_resolves() {
        let cache = JitCache::new();
        cache.blocklist(key(2, 0), "unhandled_opcode");
        assert!(cache.is_blocklisted(key(2, 0)));
        assert!(cache.lookup(key(2, 0)).is_none());
    }

    #[test]
    fn deferred_invalidate_hides_entry_until_resolved() {
        let cache = JitCache::new();
        let code = ExecutableMemory::install(&[0xC3]).unwrap();
        cache.install(key(3, 0), code, 0, "orus_jit_x86_64", block());
        cache.invalidate(key(3, 0), true);
        assert!(cache.lookup(key(3, 0)).is_none());
        assert_eq!(cache.len(), 1, "entry still present until resolved");
        cache.resolve_pending();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn immediate_invalidate_drops_entry_right_away() {
        let cache = JitCache::new();
        let code = ExecutableMemory::install(&[0xC3]).unwrap();
        cache.install(key(4, 0), code, 0, "orus_jit_x86_64", block());
        cache.invalidate(key(4, 0), false);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn flush_clears_entries_and_blocklist() {
        let cache = JitCache::new();
        let code = ExecutableMemory::install(&[0xC3]).unwrap();
        cache.install(key(5, 0), code, 0, "orus_jit_x86_64", block());
        cache.blocklist(key(6, 0), "rollout_disabled");
        cache.flush();
        assert!(cache.is_empty());
        assert!(!cache.is_blocklisted(key(6, 0)));
    }

    #[test]
    fn reinstall_bumps_generation() {
        let cache = JitCache::new();
        let code_a = ExecutableMemory::install(&[0xC3]).unwrap();
        let gen_a = cache.install(key(7, 0), code_a, 0, "orus_jit_x86_64", block());
        let code_b = ExecutableMemory::install(&[0xC3, 0xC3]).unwrap();
        let gen_b = cache.install(key(7, 0), code_b, 0, "orus_jit_x86_64", block());
        assert!(gen_b > gen_a);
    }
}
