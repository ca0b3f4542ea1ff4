//! Borrower registry: the shared store plus per-borrower advisory locks.
//!
//! Records live in a concurrent map keyed by address; the advisory locks
//! live in a separate set so a lock can be probed without touching the
//! record. Critical sections here are map operations only, never I/O; the
//! pipeline holds the advisory lock, not the map shard, across its RPC
//! calls.

use alloy::primitives::Address;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tracing::{debug, info};

use crate::borrower::Borrower;
use crate::state::{classify, Bands, BorrowerState};

/// Per-state record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub safe: usize,
    pub watch: usize,
    pub critical: usize,
    pub liquidatable: usize,
}

impl RegistryStats {
    pub fn total(&self) -> usize {
        self.safe + self.watch + self.critical + self.liquidatable
    }
}

/// Concurrent borrower store.
pub struct BorrowerRegistry {
    records: DashMap<Address, Borrower>,
    locks: DashSet<Address>,
}

/// Advisory lock handle. Releasing happens on drop, so every exit path of
/// prepare/execute frees the borrower.
pub struct BorrowerLock<'a> {
    registry: &'a BorrowerRegistry,
    address: Address,
}

impl Drop for BorrowerLock<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.address);
    }
}

impl BorrowerRegistry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            locks: DashSet::new(),
        }
    }

    /// Snapshot of one borrower.
    pub fn get(&self, address: &Address) -> Option<Borrower> {
        self.records.get(address).map(|b| b.clone())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.records.contains_key(address)
    }

    /// Insert-if-absent. Returns true when a new record was created.
    pub fn upsert(&self, address: Address, initial_state: BorrowerState, hydrated: bool) -> bool {
        let mut inserted = false;
        self.records.entry(address).or_insert_with(|| {
            inserted = true;
            debug!(borrower = %address, state = %initial_state, "borrower inserted");
            Borrower::new(address, initial_state, hydrated)
        });
        inserted
    }

    /// Delete a record, logging its final state.
    pub fn remove(&self, address: &Address) -> Option<Borrower> {
        let removed = self.records.remove(address).map(|(_, b)| b);
        if let Some(b) = &removed {
            info!(
                borrower = %address,
                state = %b.state,
                hf = b.predicted_hf,
                "borrower removed"
            );
        }
        removed
    }

    /// Mutate a record in place under its map entry. The closure must not
    /// perform I/O.
    pub fn with_mut<R>(&self, address: &Address, f: impl FnOnce(&mut Borrower) -> R) -> Option<R> {
        self.records.get_mut(address).map(|mut b| f(&mut b))
    }

    /// All records, snapshotted.
    pub fn all(&self) -> Vec<Borrower> {
        self.records.iter().map(|b| b.clone()).collect()
    }

    pub fn by_state(&self, state: BorrowerState) -> Vec<Borrower> {
        self.records
            .iter()
            .filter(|b| b.state == state)
            .map(|b| b.clone())
            .collect()
    }

    pub fn by_states(&self, states: &[BorrowerState]) -> Vec<Borrower> {
        self.records
            .iter()
            .filter(|b| states.contains(&b.state))
            .map(|b| b.clone())
            .collect()
    }

    /// Write new health factors, reclassify, and maintain the transition
    /// log. Returns `(old, new)` when the band changed.
    ///
    /// Leaving {Critical, Liquidatable} for {Safe, Watch} drops the cached
    /// transaction: the position recovered and the prepared call is void.
    pub fn update_hf(
        &self,
        address: &Address,
        predicted: f64,
        oracle: Option<f64>,
        bands: &Bands,
    ) -> Option<(BorrowerState, BorrowerState)> {
        let mut entry = self.records.get_mut(address)?;
        let old_state = entry.state;
        let new_state = classify(predicted, bands);

        entry.predicted_hf = predicted;
        if let Some(oracle_hf) = oracle {
            entry.oracle_hf = oracle_hf;
        }
        entry.last_updated_at = Utc::now();

        if new_state == old_state {
            return None;
        }

        entry.state = new_state;
        entry.record_transition(new_state, predicted);

        let was_armed = matches!(
            old_state,
            BorrowerState::Critical | BorrowerState::Liquidatable
        );
        let now_relaxed = matches!(new_state, BorrowerState::Safe | BorrowerState::Watch);
        if was_armed && now_relaxed && entry.cached_tx.is_some() {
            entry.clear_cached_tx();
            debug!(borrower = %address, "cached tx cleared on recovery");
        }

        info!(
            borrower = %address,
            from = %old_state,
            to = %new_state,
            hf = predicted,
            "state transition"
        );

        Some((old_state, new_state))
    }

    /// Drop a cached transaction. No-op when absent (idempotent).
    pub fn invalidate_cache(&self, address: &Address, reason: &str) {
        self.with_mut(address, |b| {
            if b.cached_tx.is_some() {
                b.clear_cached_tx();
                debug!(borrower = %address, reason, "cached tx invalidated");
            }
        });
    }

    /// True iff a cached transaction exists and has outlived its TTL.
    pub fn is_cache_stale(&self, address: &Address, current_block: u64, ttl_blocks: u64) -> bool {
        self.records
            .get(address)
            .map(|b| match (&b.cached_tx, b.prepared_block) {
                (Some(_), Some(prepared)) => current_block.saturating_sub(prepared) > ttl_blocks,
                _ => false,
            })
            .unwrap_or(false)
    }

    /// Non-blocking advisory acquisition.
    pub fn try_acquire(&self, address: &Address) -> bool {
        self.locks.insert(*address)
    }

    pub fn release(&self, address: &Address) {
        self.locks.remove(address);
    }

    pub fn is_locked(&self, address: &Address) -> bool {
        self.locks.contains(address)
    }

    /// Guarded acquisition; the lock releases when the guard drops.
    pub fn try_lock(&self, address: Address) -> Option<BorrowerLock<'_>> {
        if self.try_acquire(&address) {
            Some(BorrowerLock {
                registry: self,
                address,
            })
        } else {
            None
        }
    }

    /// Idempotent monotonic hydration flag.
    pub fn mark_hydrated(&self, address: &Address) {
        self.with_mut(address, |b| {
            if !b.hydrated {
                b.hydrated = true;
                debug!(borrower = %address, "borrower hydrated");
            }
        });
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for b in self.records.iter() {
            match b.state {
                BorrowerState::Safe => stats.safe += 1,
                BorrowerState::Watch => stats.watch += 1,
                BorrowerState::Critical => stats.critical += 1,
                BorrowerState::Liquidatable => stats.liquidatable += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for BorrowerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
