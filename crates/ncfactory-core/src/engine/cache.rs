//! Keyed store of lazily built, shared objects with single-flight construction.
//!
//! For every key the build closure runs at most once over the lifetime of the cache.
//! Concurrent requesters of a key that is being built block until that build finishes
//! and then observe the same object (or the same error). The map lock is held only to
//! find or insert an entry, so building one key never blocks requests for another.

use crate::core::cfg::CacheKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

enum SlotState<V: ?Sized, E> {
    InProgress,
    Ready(Arc<V>),
    Failed(E),
    /// The builder unwound without producing an outcome; the entry has been removed.
    Abandoned,
}

struct Slot<V: ?Sized, E> {
    state: Mutex<SlotState<V, E>>,
    done: Condvar,
}

impl<V: ?Sized, E> Slot<V, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::InProgress),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<V, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, state: SlotState<V, E>) {
        *self.lock() = state;
        self.done.notify_all();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub ready: usize,
    pub failed: usize,
    pub in_progress: usize,
    /// Number of times a build closure has been invoked.
    pub builds: usize,
}

impl CacheStats {
    pub fn entries(&self) -> usize {
        self.ready + self.failed + self.in_progress
    }
}

pub struct ObjectCache<V: ?Sized, E> {
    name: &'static str,
    entries: Mutex<HashMap<CacheKey, Arc<Slot<V, E>>>>,
    builds: AtomicUsize,
}

impl<V: ?Sized, E: Clone> ObjectCache<V, E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<Slot<V, E>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the object for `key`, running `build` only if no other call ever has.
    ///
    /// A failed build is remembered: later calls for the same key return a clone of the
    /// recorded error without invoking their closure.
    pub fn get_or_build<F>(&self, key: &CacheKey, build: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<Arc<V>, E>,
    {
        let mut build = Some(build);
        loop {
            let (slot, is_builder) = {
                let mut entries = self.entries();
                match entries.get(key) {
                    Some(slot) => (Arc::clone(slot), false),
                    None => {
                        let slot = Arc::new(Slot::new());
                        entries.insert(key.clone(), Arc::clone(&slot));
                        (slot, true)
                    }
                }
            };

            if is_builder {
                if let Some(build) = build.take() {
                    return self.run_build(key, &slot, build);
                }
            }

            let mut state = slot.lock();
            while matches!(*state, SlotState::InProgress) {
                debug!(cache = self.name, %key, "Waiting for in-flight build.");
                state = slot.done.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            match &*state {
                SlotState::Ready(object) => {
                    debug!(cache = self.name, %key, "Cache hit.");
                    return Ok(Arc::clone(object));
                }
                SlotState::Failed(err) => return Err(err.clone()),
                SlotState::Abandoned | SlotState::InProgress => continue,
            }
        }
    }

    fn run_build<F>(&self, key: &CacheKey, slot: &Arc<Slot<V, E>>, build: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<Arc<V>, E>,
    {
        debug!(cache = self.name, %key, "Cache miss, building.");
        self.builds.fetch_add(1, Ordering::Relaxed);
        let mut guard = AbandonGuard {
            cache: self,
            key,
            slot,
            armed: true,
        };
        let outcome = build();
        guard.armed = false;

        match &outcome {
            Ok(object) => slot.complete(SlotState::Ready(Arc::clone(object))),
            Err(err) => {
                warn!(cache = self.name, %key, "Build failed; the failure is kept for this key.");
                slot.complete(SlotState::Failed(err.clone()));
            }
        }
        outcome
    }

    /// The completed outcome for `key`, without building or waiting.
    pub fn peek(&self, key: &CacheKey) -> Option<Result<Arc<V>, E>> {
        let slot = self.entries().get(key).cloned()?;
        let state = slot.lock();
        match &*state {
            SlotState::Ready(object) => Some(Ok(Arc::clone(object))),
            SlotState::Failed(err) => Some(Err(err.clone())),
            SlotState::InProgress | SlotState::Abandoned => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let slots: Vec<_> = self.entries().values().cloned().collect();
        let mut stats = CacheStats {
            builds: self.builds.load(Ordering::Relaxed),
            ..CacheStats::default()
        };
        for slot in slots {
            match &*slot.lock() {
                SlotState::Ready(_) => stats.ready += 1,
                SlotState::Failed(_) => stats.failed += 1,
                SlotState::InProgress => stats.in_progress += 1,
                SlotState::Abandoned => {}
            }
        }
        stats
    }
}

/// Optional eviction, separate from the unbounded core behaviour.
impl<V: ?Sized, E: Clone> ObjectCache<V, E> {
    /// Drops ready entries whose object is referenced only by the cache and returns how
    /// many were removed.
    ///
    /// Failed entries stay, so known-bad keys keep failing fast. Objects still held
    /// elsewhere are untouched; a swept key is rebuilt on its next request.
    pub fn sweep_unreferenced(&self) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, slot| match &*slot.lock() {
            SlotState::Ready(object) => Arc::strong_count(object) > 1,
            SlotState::Failed(_) | SlotState::InProgress | SlotState::Abandoned => true,
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(cache = self.name, removed, "Swept unreferenced entries.");
        }
        removed
    }
}

/// Unblocks waiters if a build closure unwinds, so a panic never leaves a key stuck.
struct AbandonGuard<'a, V: ?Sized, E: Clone> {
    cache: &'a ObjectCache<V, E>,
    key: &'a CacheKey,
    slot: &'a Arc<Slot<V, E>>,
    armed: bool,
}

impl<V: ?Sized, E: Clone> Drop for AbandonGuard<'_, V, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut entries = self.cache.entries();
        if entries
            .get(self.key)
            .is_some_and(|current| Arc::ptr_eq(current, self.slot))
        {
            entries.remove(self.key);
        }
        drop(entries);
        self.slot.complete(SlotState::Abandoned);
    }
}
