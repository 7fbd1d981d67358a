//! Compilation cache.
//!
//! Maps a [`ContentHash`] to a successful [`CompilationResult`]. Bounded by
//! a capacity; when an insert pushes the cache over it, the entry with the
//! oldest last-access time is evicted (ties broken by access order).
//! Failed compilations are never stored.
//!
//! Concurrent `get_or_compile` calls for the same uncached hash are
//! coalesced: the first caller compiles, the others block on a condition
//! variable and receive the same outcome, failures included.

use crate::clock::Clock;
use crate::hash::ContentHash;
use crate::result::CompilationResult;
use agentflow_core::Diagnostic;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub type Outcome = Result<Arc<CompilationResult>, Vec<Diagnostic>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Callers that waited on another caller's compilation.
    pub coalesced: u64,
    pub evictions: u64,
}

struct Entry {
    result: Arc<CompilationResult>,
    last_access: u64,
    seq: u64,
}

/// One compilation in progress.
#[derive(Default)]
struct Flight {
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
}

impl Flight {
    fn finish(&self, outcome: Outcome) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Outcome {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(done) = outcome.as_ref() {
                return done.clone();
            }
            self.done.wait(&mut outcome);
        }
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<ContentHash, Entry>,
    flights: HashMap<ContentHash, Arc<Flight>>,
    seq: u64,
    stats: CacheStats,
}

impl State {
    fn touch(&mut self, hash: &ContentHash, now: u64) -> Option<Arc<CompilationResult>> {
        self.seq += 1;
        let seq = self.seq;
        let entry = self.entries.get_mut(hash)?;
        entry.last_access = now;
        entry.seq = seq;
        Some(Arc::clone(&entry.result))
    }
}

pub struct CompilationCache {
    capacity: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl CompilationCache {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        CompilationCache {
            capacity,
            clock,
            state: Mutex::new(State::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.state.lock().entries.contains_key(hash)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }

    /// Cached result for `hash`, refreshing its recency.
    pub fn get(&self, hash: &ContentHash) -> Option<Arc<CompilationResult>> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let hit = state.touch(hash, now);
        if hit.is_some() {
            state.stats.hits += 1;
        }
        hit
    }

    /// Return the cached result for `hash`, or run `compile` and cache its
    /// result if it succeeds.
    pub fn get_or_compile<F>(&self, hash: &ContentHash, compile: F) -> Outcome
    where
        F: FnOnce() -> Result<CompilationResult, Vec<Diagnostic>>,
    {
        let now = self.clock.now_millis();
        let flight = {
            let mut state = self.state.lock();
            if let Some(hit) = state.touch(hash, now) {
                state.stats.hits += 1;
                tracing::trace!(%hash, "cache hit");
                return Ok(hit);
            }
            if let Some(flight) = state.flights.get(hash) {
                let flight = Arc::clone(flight);
                state.stats.coalesced += 1;
                drop(state);
                tracing::trace!(%hash, "waiting for in-flight compilation");
                return flight.wait();
            }
            state.stats.misses += 1;
            let flight = Arc::new(Flight::default());
            state.flights.insert(hash.clone(), Arc::clone(&flight));
            flight
        };

        tracing::debug!(%hash, "cache miss; compiling");
        let mut guard = FlightGuard {
            cache: self,
            hash,
            flight,
            finished: false,
        };
        let outcome = compile().map(Arc::new);
        guard.complete(outcome.clone());
        outcome
    }

    fn settle(&self, hash: &ContentHash, outcome: &Outcome) {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        state.flights.remove(hash);
        let Ok(result) = outcome else {
            return;
        };
        if self.capacity == 0 {
            return;
        }
        state.seq += 1;
        let seq = state.seq;
        state.entries.insert(
            hash.clone(),
            Entry {
                result: Arc::clone(result),
                last_access: now,
                seq,
            },
        );
        while state.entries.len() > self.capacity {
            let Some(oldest) = state
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.last_access, e.seq))
                .map(|(h, _)| h.clone())
            else {
                break;
            };
            state.entries.remove(&oldest);
            state.stats.evictions += 1;
            tracing::debug!(hash = %oldest, "evicted least recently used compilation");
        }
    }
}

/// Publishes the outcome of one compilation. If the compiling caller
/// unwinds, waiters receive an internal error instead of blocking forever.
struct FlightGuard<'c> {
    cache: &'c CompilationCache,
    hash: &'c ContentHash,
    flight: Arc<Flight>,
    finished: bool,
}

impl FlightGuard<'_> {
    fn complete(&mut self, outcome: Outcome) {
        self.cache.settle(self.hash, &outcome);
        self.flight.finish(outcome);
        self.finished = true;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let outcome = Err(vec![Diagnostic::internal(
                "",
                None,
                format!("compilation for {} did not complete", self.hash),
            )]);
            self.complete(outcome);
        }
    }
}
