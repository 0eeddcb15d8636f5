//! Lease table and acquisition protocol.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use forgeerp_core::{Clock, LockToken, SystemClock};

use crate::key::LockKey;

/// Lock manager configuration.
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Minimum time between two sweeps of expired leases.
    pub sweep_interval: Duration,
    /// Floor applied to every `retry_after` hint.
    pub min_retry_after: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            min_retry_after: Duration::from_millis(100),
        }
    }
}

impl LockManagerConfig {
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_min_retry_after(mut self, floor: Duration) -> Self {
        self.min_retry_after = floor;
        self
    }
}

/// A granted lease, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockLease {
    pub key: LockKey,
    pub token: LockToken,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A key that could not be leased because someone else holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("lock on {key} is held until {held_until} (retry after {retry_after:?})")]
pub struct LockConflict {
    pub key: LockKey,
    pub held_until: DateTime<Utc>,
    pub retry_after: Duration,
}

/// Outcome of a failed multi-key acquisition.
///
/// Every lease taken during the call has already been released when this is
/// returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{} of the requested locks are held elsewhere (retry after {retry_after:?})", .conflicts.len())]
pub struct MultiLockFailure {
    /// Conflicting keys, in acquisition order.
    pub conflicts: Vec<LockConflict>,
    /// Keys that were acquired and then released again by this call.
    pub rolled_back: Vec<LockKey>,
    /// Largest per-key hint.
    pub retry_after: Duration,
}

/// Leases granted together by [`LockManager::try_acquire_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockSet {
    leases: Vec<LockLease>,
}

impl LockSet {
    pub fn leases(&self) -> &[LockLease] {
        &self.leases
    }

    pub fn tokens(&self) -> Vec<LockToken> {
        self.leases.iter().map(|l| l.token).collect()
    }

    /// Earliest expiry across the set (the set is only fully held until then).
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.leases.iter().map(|l| l.expires_at).min()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }
}

/// Scope guard over a [`LockSet`].
///
/// Releases every lease when dropped (error path, panic or a cancelled
/// future) unless [`HeldLocks::keep`] hands the set over to the caller.
#[must_use = "dropping the guard releases the locks immediately"]
pub struct HeldLocks<'a> {
    manager: &'a LockManager,
    set: Option<LockSet>,
}

impl HeldLocks<'_> {
    pub fn set(&self) -> Option<&LockSet> {
        self.set.as_ref()
    }

    /// Stop guarding; the caller becomes responsible for releasing.
    pub fn keep(mut self) -> LockSet {
        self.set.take().unwrap_or_default()
    }

    /// Release now; returns how many live leases were removed.
    pub fn release(mut self) -> usize {
        self.set
            .take()
            .map_or(0, |set| self.manager.release_all(set.tokens()))
    }
}

impl Drop for HeldLocks<'_> {
    fn drop(&mut self) {
        if let Some(set) = self.set.take() {
            self.manager.release_all(set.tokens());
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HeldLease {
    token: LockToken,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// In-process lease table.
///
/// All mutation of a key goes through one `DashMap` entry operation
/// (insert-if-vacant or replace-if-expired) while the shard is held, so two
/// callers can never both observe the key as free.
pub struct LockManager {
    leases: DashMap<LockKey, HeldLease>,
    owners: DashMap<LockToken, LockKey>,
    clock: Arc<dyn Clock>,
    config: LockManagerConfig,
    last_sweep_ms: AtomicI64,
}

impl core::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockManager")
            .field("leases", &self.leases.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), LockManagerConfig::default())
    }
}

impl LockManager {
    pub fn new(clock: Arc<dyn Clock>, config: LockManagerConfig) -> Self {
        let now_ms = clock.now().timestamp_millis();
        Self {
            leases: DashMap::new(),
            owners: DashMap::new(),
            clock,
            config,
            last_sweep_ms: AtomicI64::new(now_ms),
        }
    }

    /// Try to take an exclusive lease on `key` for `duration`.
    ///
    /// Never waits. A live lease held by someone else yields a [`LockConflict`]
    /// with a retry hint; an expired lease is simply replaced.
    pub fn try_acquire(&self, key: LockKey, duration: Duration) -> Result<LockLease, LockConflict> {
        let now = self.clock.now();
        self.maybe_sweep(now);

        let lease = HeldLease {
            token: LockToken::new(),
            acquired_at: now,
            expires_at: expiry_after(now, duration),
        };

        // The shard guard must be gone before `owners` is touched.
        let replaced = match self.leases.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let held = *occupied.get();
                if held.expires_at > now {
                    let conflict = self.conflict(key, held.expires_at, now);
                    debug!(key = %conflict.key, held_until = %held.expires_at, "lock held");
                    return Err(conflict);
                }
                occupied.insert(lease);
                Some(held.token)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(lease);
                None
            }
        };

        if let Some(stale) = replaced {
            self.owners.remove(&stale);
        }
        self.owners.insert(lease.token, key.clone());

        Ok(LockLease {
            key,
            token: lease.token,
            acquired_at: lease.acquired_at,
            expires_at: lease.expires_at,
        })
    }

    /// Acquire every key or none of them.
    ///
    /// Keys are deduplicated and taken in lexicographic order of their rendered
    /// form, so two callers with overlapping key sets always contend on the
    /// same key first and can never wait on each other in a cycle. On the first
    /// conflict everything acquired so far is released; the remaining keys are
    /// then only probed so the caller sees every conflicting key.
    pub fn try_acquire_all<I>(&self, keys: I, duration: Duration) -> Result<LockSet, MultiLockFailure>
    where
        I: IntoIterator<Item = LockKey>,
    {
        let mut ordered: Vec<LockKey> = keys.into_iter().collect();
        ordered.sort_by_cached_key(|k| k.to_string());
        ordered.dedup();

        let mut acquired: Vec<LockLease> = Vec::with_capacity(ordered.len());
        for (position, key) in ordered.iter().enumerate() {
            match self.try_acquire(key.clone(), duration) {
                Ok(lease) => acquired.push(lease),
                Err(first) => {
                    let rolled_back: Vec<LockKey> = acquired.iter().map(|l| l.key.clone()).collect();
                    self.release_all(acquired.iter().map(|l| l.token));

                    let mut conflicts = vec![first];
                    conflicts.extend(ordered.iter().skip(position + 1).filter_map(|k| self.probe(k)));

                    let retry_after = conflicts
                        .iter()
                        .map(|c| c.retry_after)
                        .max()
                        .unwrap_or(self.config.min_retry_after);

                    warn!(
                        conflicts = conflicts.len(),
                        rolled_back = rolled_back.len(),
                        retry_after_ms = retry_after.as_millis() as u64,
                        "multi-key lock acquisition failed; released partial set"
                    );

                    return Err(MultiLockFailure {
                        conflicts,
                        rolled_back,
                        retry_after,
                    });
                }
            }
        }

        Ok(LockSet { leases: acquired })
    }

    /// Guard `set` so it is released when the guard goes out of scope.
    pub fn hold(&self, set: LockSet) -> HeldLocks<'_> {
        HeldLocks {
            manager: self,
            set: Some(set),
        }
    }

    /// Release the lease behind `token`.
    ///
    /// Returns `true` if a live lease was removed. Unknown, already released or
    /// expired-and-replaced tokens are a no-op.
    pub fn release(&self, token: LockToken) -> bool {
        let Some((_, key)) = self.owners.remove(&token) else {
            return false;
        };
        let now = self.clock.now();
        self.leases
            .remove_if(&key, |_, held| held.token == token)
            .is_some_and(|(_, held)| held.expires_at > now)
    }

    /// Release several leases; returns how many live leases were removed.
    pub fn release_all<I>(&self, tokens: I) -> usize
    where
        I: IntoIterator<Item = LockToken>,
    {
        tokens.into_iter().filter(|t| self.release(*t)).count()
    }

    /// Whether `token` still owns a live lease.
    pub fn is_valid(&self, token: LockToken) -> bool {
        let Some(key) = self.owners.get(&token).map(|k| k.value().clone()) else {
            return false;
        };
        let now = self.clock.now();
        self.leases
            .get(&key)
            .is_some_and(|held| held.token == token && held.expires_at > now)
    }

    /// Push back the expiry of a live lease; returns the new expiry.
    ///
    /// A lease that has already expired cannot be revived.
    pub fn extend(&self, token: LockToken, extension: Duration) -> Option<DateTime<Utc>> {
        let key = self.owners.get(&token).map(|k| k.value().clone())?;
        let now = self.clock.now();
        let mut held = self.leases.get_mut(&key)?;
        if held.token != token || held.expires_at <= now {
            return None;
        }
        held.expires_at = expiry_after(held.expires_at, extension);
        Some(held.expires_at)
    }

    /// Number of entries in the table, expired-but-unswept ones included.
    pub fn active_lease_count(&self) -> usize {
        self.leases.len()
    }

    /// Purge every expired entry now; returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        self.last_sweep_ms.store(now.timestamp_millis(), Ordering::Relaxed);
        self.purge(now)
    }

    fn maybe_sweep(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        let interval_ms = self.config.sweep_interval.as_millis() as i64;
        if now_ms - last < interval_ms {
            return;
        }
        // Only the caller that wins the exchange sweeps for this interval.
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let purged = self.purge(now);
            if purged > 0 {
                debug!(purged, "swept expired locks");
            }
        }
    }

    fn purge(&self, now: DateTime<Utc>) -> usize {
        let mut stale = Vec::new();
        self.leases.retain(|_, held| {
            if held.expires_at > now {
                true
            } else {
                stale.push(held.token);
                false
            }
        });
        for token in &stale {
            self.owners.remove(token);
        }
        stale.len()
    }

    fn probe(&self, key: &LockKey) -> Option<LockConflict> {
        let now = self.clock.now();
        let held_until = self.leases.get(key).map(|held| held.expires_at)?;
        (held_until > now).then(|| self.conflict(key.clone(), held_until, now))
    }

    fn conflict(&self, key: LockKey, held_until: DateTime<Utc>, now: DateTime<Utc>) -> LockConflict {
        let remaining = (held_until - now).to_std().unwrap_or_default();
        LockConflict {
            key,
            held_until,
            retry_after: remaining.max(self.config.min_retry_after),
        }
    }
}

fn expiry_after(from: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeerp_core::ManualClock;

    fn manager() -> (Arc<ManualClock>, LockManager) {
        let clock = Arc::new(ManualClock::default());
        let manager = LockManager::new(clock.clone(), LockManagerConfig::default());
        (clock, manager)
    }

    #[test]
    fn second_acquire_on_live_key_conflicts() {
        let (_clock, locks) = manager();
        let key = LockKey::item("ITEM-1", "WH1");

        let lease = locks.try_acquire(key.clone(), Duration::from_secs(30)).unwrap();
        let conflict = locks.try_acquire(key.clone(), Duration::from_secs(30)).unwrap_err();

        assert_eq!(conflict.key, key);
        assert_eq!(conflict.held_until, lease.expires_at);
        assert_eq!(conflict.retry_after, Duration::from_secs(30));
    }

    #[test]
    fn expired_lease_is_replaced() {
        let (clock, locks) = manager();
        let key = LockKey::item("ITEM-1", "WH1");

        let first = locks.try_acquire(key.clone(), Duration::from_secs(5)).unwrap();
        clock.advance(chrono::Duration::seconds(6));

        let second = locks.try_acquire(key, Duration::from_secs(5)).unwrap();
        assert_ne!(first.token, second.token);
        assert!(!locks.is_valid(first.token));
        assert!(locks.is_valid(second.token));
        // Releasing the stale token must not drop the new holder's lease.
        assert!(!locks.release(first.token));
        assert!(locks.is_valid(second.token));
    }

    #[test]
    fn retry_after_is_floored() {
        let (clock, locks) = manager();
        let key = LockKey::item("ITEM-1", "WH1");
        locks.try_acquire(key.clone(), Duration::from_secs(1)).unwrap();
        clock.advance(chrono::Duration::milliseconds(990));

        let conflict = locks.try_acquire(key, Duration::from_secs(1)).unwrap_err();
        assert_eq!(conflict.retry_after, Duration::from_millis(100));
    }

    #[test]
    fn release_frees_key() {
        let (_clock, locks) = manager();
        let key = LockKey::batch("ITEM-1", "WH1", "B1");
        let lease = locks.try_acquire(key.clone(), Duration::from_secs(30)).unwrap();

        assert!(locks.release(lease.token));
        assert!(!locks.release(lease.token));
        assert!(locks.try_acquire(key, Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn extend_pushes_expiry_of_live_lease_only() {
        let (clock, locks) = manager();
        let lease = locks
            .try_acquire(LockKey::item("ITEM-1", "WH1"), Duration::from_secs(10))
            .unwrap();

        let extended = locks.extend(lease.token, Duration::from_secs(20)).unwrap();
        assert_eq!(extended, lease.expires_at + chrono::Duration::seconds(20));

        clock.advance(chrono::Duration::seconds(31));
        assert!(locks.extend(lease.token, Duration::from_secs(20)).is_none());
    }

    #[test]
    fn acquire_all_dedups_and_orders_keys() {
        let (_clock, locks) = manager();
        let keys = vec![
            LockKey::item("B", "WH"),
            LockKey::item("A", "WH"),
            LockKey::batch("A", "WH", "L1"),
            LockKey::item("A", "WH"),
        ];

        let set = locks.try_acquire_all(keys, Duration::from_secs(30)).unwrap();
        let rendered: Vec<String> = set.leases().iter().map(|l| l.key.to_string()).collect();
        assert_eq!(rendered, vec!["A|WH", "A|WH|L1", "B|WH"]);
        assert_eq!(locks.release_all(set.tokens()), 3);
    }

    #[test]
    fn dropped_guard_releases_its_set() {
        let (_clock, locks) = manager();
        let keys = vec![LockKey::item("A", "WH"), LockKey::item("B", "WH")];
        {
            let set = locks.try_acquire_all(keys.clone(), Duration::from_secs(30)).unwrap();
            let _held = locks.hold(set);
            assert!(locks.try_acquire_all(keys.clone(), Duration::from_secs(30)).is_err());
        }
        let set = locks.try_acquire_all(keys, Duration::from_secs(30)).unwrap();
        let kept = locks.hold(set).keep();
        assert_eq!(locks.active_lease_count(), 2);
        assert_eq!(locks.release_all(kept.tokens()), 2);
    }

    #[test]
    fn lazy_sweep_purges_expired_entries() {
        let clock = Arc::new(ManualClock::default());
        let locks = LockManager::new(
            clock.clone(),
            LockManagerConfig::default().with_sweep_interval(Duration::from_secs(10)),
        );
        locks.try_acquire(LockKey::item("A", "WH"), Duration::from_secs(1)).unwrap();
        locks.try_acquire(LockKey::item("B", "WH"), Duration::from_secs(1)).unwrap();
        assert_eq!(locks.active_lease_count(), 2);

        clock.advance(chrono::Duration::seconds(11));
        locks.try_acquire(LockKey::item("C", "WH"), Duration::from_secs(30)).unwrap();
        assert_eq!(locks.active_lease_count(), 1);
    }
}
