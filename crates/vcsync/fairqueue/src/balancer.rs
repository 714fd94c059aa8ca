//! Credit-based weighted round robin
//!
//! Each entry holds a credit initialised to its weight. Every call to
//! [`WeightedRoundRobin::next`] picks the entry with the most credit left
//! (earliest inserted on ties) and spends one credit. Once every credit is
//! spent all entries are refilled from their weights, so over any window of
//! `total_weight()` calls starting at a refill each key is returned exactly
//! `weight` times.

use crate::error::{FairQueueError, Result};

#[derive(Debug, Clone)]
struct WeightEntry<K> {
    key: K,
    weight: u32,
    credit: u32,
}

/// Weighted fair selector over keys of type `K`
#[derive(Debug, Clone)]
pub struct WeightedRoundRobin<K> {
    /// Insertion order is the tie-break order.
    entries: Vec<WeightEntry<K>>,
}

impl<K> Default for WeightedRoundRobin<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K: Clone + Eq> WeightedRoundRobin<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key`, or replace its weight if already present.
    ///
    /// A replaced entry keeps its position and gets a full credit of the new
    /// weight.
    ///
    /// # Errors
    ///
    /// [`FairQueueError::InvalidWeight`] when `weight` is zero.
    pub fn add(&mut self, key: K, weight: u32) -> Result<()> {
        if weight == 0 {
            return Err(FairQueueError::InvalidWeight(weight));
        }

        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => {
                entry.weight = weight;
                entry.credit = weight;
            }
            None => self.entries.push(WeightEntry {
                key,
                weight,
                credit: weight,
            }),
        }

        Ok(())
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&mut self, key: &K) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.key != key);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Key selected for this turn, `None` when the set is empty.
    pub fn next(&mut self) -> Option<K> {
        if self.entries.iter().all(|e| e.credit == 0) {
            for entry in &mut self.entries {
                entry.credit = entry.weight;
            }
        }

        let mut best: Option<usize> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.credit == 0 {
                continue;
            }
            match best {
                Some(b) if self.entries[b].credit >= entry.credit => {}
                _ => best = Some(idx),
            }
        }

        let entry = &mut self.entries[best?];
        entry.credit -= 1;
        Some(entry.key.clone())
    }

    pub fn weight(&self, key: &K) -> Option<u32> {
        self.entries.iter().find(|e| &e.key == key).map(|e| e.weight)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.iter().any(|e| &e.key == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all weights, i.e. the length of one full cycle
    pub fn total_weight(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.weight)).sum()
    }

    /// Sum of credits still available in the current cycle
    pub fn remaining_credit(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.credit)).sum()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|e| &e.key)
    }
}
