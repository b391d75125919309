//! Tiered account store.
//!
//! Three buckets keyed by owning authority. All three live behind one lock so a move
//! between buckets is a single critical section: an account is in at most one bucket
//! at any instant, never two and never transiently none.

use liquidator_chain::Pubkey;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::account::{AccountIdentity, Bucket, TrackedAccount};

#[derive(Default)]
struct Buckets {
    high: HashMap<Pubkey, TrackedAccount>,
    medium: HashMap<Pubkey, TrackedAccount>,
    low: HashMap<Pubkey, TrackedAccount>,
}

impl Buckets {
    fn map(&self, bucket: Bucket) -> &HashMap<Pubkey, TrackedAccount> {
        match bucket {
            Bucket::High => &self.high,
            Bucket::Medium => &self.medium,
            Bucket::Low => &self.low,
        }
    }

    fn map_mut(&mut self, bucket: Bucket) -> &mut HashMap<Pubkey, TrackedAccount> {
        match bucket {
            Bucket::High => &mut self.high,
            Bucket::Medium => &mut self.medium,
            Bucket::Low => &mut self.low,
        }
    }

    fn locate(&self, key: &Pubkey) -> Option<Bucket> {
        Bucket::ALL.into_iter().find(|b| self.map(*b).contains_key(key))
    }

    fn take(&mut self, key: &Pubkey) -> Option<(Bucket, TrackedAccount)> {
        let bucket = self.locate(key)?;
        self.map_mut(bucket).remove(key).map(|account| (bucket, account))
    }
}

/// Process-wide tier buckets.
#[derive(Default)]
pub struct TierStore {
    buckets: RwLock<Buckets>,
}

impl TierStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or move an account into `bucket`, returning the bucket it was in before.
    pub fn upsert(&self, bucket: Bucket, account: TrackedAccount) -> Option<Bucket> {
        let key = account.key();
        let mut buckets = self.buckets.write();
        let previous = buckets.take(&key).map(|(b, _)| b);
        buckets.map_mut(bucket).insert(key, account);
        previous
    }

    /// Remove an account from whichever bucket holds it.
    pub fn remove(&self, authority: &Pubkey) -> Option<TrackedAccount> {
        self.buckets.write().take(authority).map(|(_, account)| account)
    }

    /// Identities currently in `bucket`.
    pub fn keys_of(&self, bucket: Bucket) -> Vec<AccountIdentity> {
        self.buckets
            .read()
            .map(bucket)
            .values()
            .map(|a| a.identity)
            .collect()
    }

    pub fn tier_of(&self, authority: &Pubkey) -> Option<Bucket> {
        self.buckets.read().locate(authority)
    }

    pub fn get(&self, authority: &Pubkey) -> Option<TrackedAccount> {
        let buckets = self.buckets.read();
        let bucket = buckets.locate(authority)?;
        buckets.map(bucket).get(authority).cloned()
    }

    pub fn contains(&self, authority: &Pubkey) -> bool {
        self.tier_of(authority).is_some()
    }

    pub fn len(&self) -> usize {
        self.stats().total()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> TierStats {
        let buckets = self.buckets.read();
        TierStats {
            high_count: buckets.high.len(),
            medium_count: buckets.medium.len(),
            low_count: buckets.low.len(),
        }
    }
}

/// Bucket sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
}

impl TierStats {
    pub fn total(&self) -> usize {
        self.high_count + self.medium_count + self.low_count
    }
}
