//! Lease records, the store capability trait, and the in-memory store.
//!
//! The store keeps one address lease and one prefix lease per
//! [`LeaseKey`], with reverse uniqueness indices (address → key,
//! (prefix, len) → key) that back the allocator's in-use predicates, plus
//! quarantine maps for declined addresses and prefixes.
//!
//! Lease state machine: a SOLICIT produces an [`Offered`](LeaseState::Offered)
//! lease held until `hold_until`; a committing message (REQUEST/RENEW/REBIND
//! or SOLICIT with rapid commit) moves it to
//! [`Allocated`](LeaseState::Allocated), valid until `valid_until`. Garbage
//! collection runs once per inbound packet and evicts anything past its
//! deadline, keeping the indices consistent.

use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hasher};
use std::net::Ipv6Addr;

use crate::duid::LeaseKey;
use crate::error::{Error, Result};
use crate::hash::mix64;

/// Whether a lease is a tentative offer or a committed binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Advertised to the client, reserved until `hold_until`.
    Offered,
    /// Committed, valid until `valid_until`.
    Allocated,
}

/// A non-temporary address lease (IA_NA binding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaLease {
    pub key: LeaseKey,
    pub addr: Ipv6Addr,
    /// Preferred lifetime in seconds, echoed to the client.
    pub preferred_lft: u32,
    /// Valid lifetime in seconds, echoed to the client.
    pub valid_lft: u32,
    /// Absolute epoch when the address stops being preferred.
    pub preferred_until: u64,
    /// Absolute epoch when the lease expires.
    pub valid_until: u64,
    pub subnet_id: u32,
    pub pool_id: u32,
    pub state: LeaseState,
    /// Absolute epoch until which an offer is held; unused once allocated.
    pub hold_until: u64,
}

impl NaLease {
    /// True while the lease binds its address: an offer inside its hold
    /// window, or a committed lease inside its valid lifetime.
    pub fn is_active(&self, now: u64) -> bool {
        match self.state {
            LeaseState::Offered => self.hold_until > now,
            LeaseState::Allocated => self.valid_until > now,
        }
    }
}

/// A delegated-prefix lease (IA_PD binding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdLease {
    pub key: LeaseKey,
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    pub preferred_lft: u32,
    pub valid_lft: u32,
    pub preferred_until: u64,
    pub valid_until: u64,
    pub subnet_id: u32,
    pub pool_id: u32,
    pub state: LeaseState,
    pub hold_until: u64,
}

impl PdLease {
    /// See [`NaLease::is_active`].
    pub fn is_active(&self, now: u64) -> bool {
        match self.state {
            LeaseState::Offered => self.hold_until > now,
            LeaseState::Allocated => self.valid_until > now,
        }
    }
}

/// Counters exposed over the control socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub na_leases: usize,
    pub pd_leases: usize,
    pub declined_addrs: usize,
    pub declined_prefixes: usize,
}

/// Lease storage capability.
///
/// The engine owns a `Box<dyn LeaseStore>` and is the only caller; a
/// durable backend can replace [`MemoryStore`] without engine changes.
/// All methods take `&mut self` — the single-threaded event loop never
/// accesses the store concurrently.
pub trait LeaseStore {
    fn get_na(&self, key: &LeaseKey) -> Option<NaLease>;
    /// Inserts or replaces the lease for its key, keeping the address
    /// index consistent if the address changed.
    fn put_na(&mut self, lease: NaLease) -> Result<()>;
    fn delete_na(&mut self, key: &LeaseKey);

    fn get_pd(&self, key: &LeaseKey) -> Option<PdLease>;
    fn put_pd(&mut self, lease: PdLease) -> Result<()>;
    fn delete_pd(&mut self, key: &LeaseKey);

    /// True if any stored lease currently binds this address.
    fn addr_in_use(&self, addr: &Ipv6Addr) -> bool;
    /// True if any stored lease currently binds this exact prefix.
    fn prefix_in_use(&self, prefix: &Ipv6Addr, prefix_len: u8) -> bool;

    /// Quarantines an address until the given epoch.
    fn decline_addr(&mut self, addr: Ipv6Addr, until: u64) -> Result<()>;
    /// Quarantines a prefix until the given epoch.
    fn decline_prefix(&mut self, prefix: Ipv6Addr, prefix_len: u8, until: u64) -> Result<()>;

    fn is_addr_declined(&self, addr: &Ipv6Addr, now: u64) -> bool;
    fn is_prefix_declined(&self, prefix: &Ipv6Addr, prefix_len: u8, now: u64) -> bool;

    /// Evicts offers past their hold deadline, allocated leases past their
    /// valid deadline, and expired quarantine records. Idempotent; returns
    /// the number of evicted entries.
    fn gc(&mut self, now: u64) -> usize;

    fn stats(&self) -> StoreStats;
}

/// Hasher over [`mix64`]; the composite keys already carry a keyed
/// SipHash-derived component, so a fast finalizer is all the tables need.
#[derive(Default)]
struct Mix64Hasher(u64);

impl Hasher for Mix64Hasher {
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = (self.0 ^ b as u64).wrapping_mul(0x100_0000_01b3);
        }
    }

    fn finish(&self) -> u64 {
        mix64(self.0)
    }
}

type Table<K, V> = HashMap<K, V, BuildHasherDefault<Mix64Hasher>>;

/// Growable in-memory lease store with an explicit capacity ceiling.
///
/// The maps resize freely up to `capacity` entries per table; hitting the
/// ceiling surfaces as [`Error::StoreFull`], which the engine reports the
/// same way as pool exhaustion but keeps distinct in logs. Decline tables
/// have their own ceiling of the same size, so one cannot starve the other.
#[derive(Debug, Default)]
pub struct MemoryStore {
    capacity: usize,
    na: Table<LeaseKey, NaLease>,
    pd: Table<LeaseKey, PdLease>,
    addr_index: Table<Ipv6Addr, LeaseKey>,
    prefix_index: Table<(Ipv6Addr, u8), LeaseKey>,
    declined_addrs: Table<Ipv6Addr, u64>,
    declined_prefixes: Table<(Ipv6Addr, u8), u64>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }
}

impl LeaseStore for MemoryStore {
    fn get_na(&self, key: &LeaseKey) -> Option<NaLease> {
        self.na.get(key).cloned()
    }

    fn put_na(&mut self, lease: NaLease) -> Result<()> {
        match self.na.get(&lease.key) {
            Some(old) => {
                // Renewal normally keeps the address; drop the stale index
                // entry when it did not.
                if old.addr != lease.addr {
                    self.addr_index.remove(&old.addr);
                }
            }
            None => {
                if self.na.len() >= self.capacity {
                    return Err(Error::StoreFull(self.capacity));
                }
            }
        }
        self.addr_index.insert(lease.addr, lease.key);
        self.na.insert(lease.key, lease);
        Ok(())
    }

    fn delete_na(&mut self, key: &LeaseKey) {
        if let Some(lease) = self.na.remove(key) {
            self.addr_index.remove(&lease.addr);
        }
    }

    fn get_pd(&self, key: &LeaseKey) -> Option<PdLease> {
        self.pd.get(key).cloned()
    }

    fn put_pd(&mut self, lease: PdLease) -> Result<()> {
        match self.pd.get(&lease.key) {
            Some(old) => {
                if (old.prefix, old.prefix_len) != (lease.prefix, lease.prefix_len) {
                    self.prefix_index.remove(&(old.prefix, old.prefix_len));
                }
            }
            None => {
                if self.pd.len() >= self.capacity {
                    return Err(Error::StoreFull(self.capacity));
                }
            }
        }
        self.prefix_index
            .insert((lease.prefix, lease.prefix_len), lease.key);
        self.pd.insert(lease.key, lease);
        Ok(())
    }

    fn delete_pd(&mut self, key: &LeaseKey) {
        if let Some(lease) = self.pd.remove(key) {
            self.prefix_index.remove(&(lease.prefix, lease.prefix_len));
        }
    }

    fn addr_in_use(&self, addr: &Ipv6Addr) -> bool {
        self.addr_index.contains_key(addr)
    }

    fn prefix_in_use(&self, prefix: &Ipv6Addr, prefix_len: u8) -> bool {
        self.prefix_index.contains_key(&(*prefix, prefix_len))
    }

    fn decline_addr(&mut self, addr: Ipv6Addr, until: u64) -> Result<()> {
        if !self.declined_addrs.contains_key(&addr) && self.declined_addrs.len() >= self.capacity {
            return Err(Error::StoreFull(self.capacity));
        }
        self.declined_addrs.insert(addr, until);
        Ok(())
    }

    fn decline_prefix(&mut self, prefix: Ipv6Addr, prefix_len: u8, until: u64) -> Result<()> {
        let entry = (prefix, prefix_len);
        if !self.declined_prefixes.contains_key(&entry)
            && self.declined_prefixes.len() >= self.capacity
        {
            return Err(Error::StoreFull(self.capacity));
        }
        self.declined_prefixes.insert(entry, until);
        Ok(())
    }

    fn is_addr_declined(&self, addr: &Ipv6Addr, now: u64) -> bool {
        self.declined_addrs
            .get(addr)
            .is_some_and(|&until| until > now)
    }

    fn is_prefix_declined(&self, prefix: &Ipv6Addr, prefix_len: u8, now: u64) -> bool {
        self.declined_prefixes
            .get(&(*prefix, prefix_len))
            .is_some_and(|&until| until > now)
    }

    fn gc(&mut self, now: u64) -> usize {
        let expired_na: Vec<LeaseKey> = self
            .na
            .values()
            .filter(|lease| !lease.is_active(now))
            .map(|lease| lease.key)
            .collect();
        let expired_pd: Vec<LeaseKey> = self
            .pd
            .values()
            .filter(|lease| !lease.is_active(now))
            .map(|lease| lease.key)
            .collect();

        let mut evicted = expired_na.len() + expired_pd.len();
        for key in &expired_na {
            self.delete_na(key);
        }
        for key in &expired_pd {
            self.delete_pd(key);
        }

        let before = self.declined_addrs.len() + self.declined_prefixes.len();
        self.declined_addrs.retain(|_, &mut until| until > now);
        self.declined_prefixes.retain(|_, &mut until| until > now);
        evicted += before - (self.declined_addrs.len() + self.declined_prefixes.len());

        evicted
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            na_leases: self.na.len(),
            pd_leases: self.pd.len(),
            declined_addrs: self.declined_addrs.len(),
            declined_prefixes: self.declined_prefixes.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duid::{Duid, IaKind};

    fn key(tag: u8, iaid: u32, kind: IaKind) -> LeaseKey {
        let duid = Duid::from_bytes(&[0, 1, tag], 42).unwrap();
        LeaseKey::new(&duid, iaid, kind)
    }

    fn na_lease(tag: u8, addr: &str, state: LeaseState, now: u64) -> NaLease {
        NaLease {
            key: key(tag, 1, IaKind::Na),
            addr: addr.parse().unwrap(),
            preferred_lft: 43200,
            valid_lft: 86400,
            preferred_until: now + 43200,
            valid_until: now + 86400,
            subnet_id: 1,
            pool_id: 1,
            state,
            hold_until: if state == LeaseState::Offered { now + 30 } else { 0 },
        }
    }

    fn pd_lease(tag: u8, prefix: &str, len: u8, state: LeaseState, now: u64) -> PdLease {
        PdLease {
            key: key(tag, 1, IaKind::Pd),
            prefix: prefix.parse().unwrap(),
            prefix_len: len,
            preferred_lft: 43200,
            valid_lft: 86400,
            preferred_until: now + 43200,
            valid_until: now + 86400,
            subnet_id: 1,
            pool_id: 2,
            state,
            hold_until: if state == LeaseState::Offered { now + 30 } else { 0 },
        }
    }

    #[test]
    fn test_put_get_roundtrip() {
        let mut store = MemoryStore::new(16);
        let now = 1000;

        let na = na_lease(1, "2001:db8:1::a", LeaseState::Allocated, now);
        store.put_na(na.clone()).unwrap();
        assert_eq!(store.get_na(&na.key), Some(na.clone()));

        let pd = pd_lease(1, "2001:db8:1234::", 48, LeaseState::Allocated, now);
        store.put_pd(pd.clone()).unwrap();
        assert_eq!(store.get_pd(&pd.key), Some(pd));

        // NA and PD tables are keyed separately even for the same client.
        assert!(store.get_na(&key(1, 1, IaKind::Pd)).is_none());
    }

    #[test]
    fn test_index_tracks_put_and_delete() {
        let mut store = MemoryStore::new(16);
        let now = 1000;
        let na = na_lease(1, "2001:db8:1::a", LeaseState::Allocated, now);
        let addr = na.addr;

        assert!(!store.addr_in_use(&addr));
        store.put_na(na.clone()).unwrap();
        assert!(store.addr_in_use(&addr));

        store.delete_na(&na.key);
        assert!(!store.addr_in_use(&addr));
    }

    #[test]
    fn test_put_with_changed_addr_drops_stale_index() {
        let mut store = MemoryStore::new(16);
        let now = 1000;
        let first = na_lease(1, "2001:db8:1::a", LeaseState::Allocated, now);
        store.put_na(first.clone()).unwrap();

        let mut moved = first.clone();
        moved.addr = "2001:db8:1::b".parse().unwrap();
        store.put_na(moved.clone()).unwrap();

        assert!(!store.addr_in_use(&first.addr));
        assert!(store.addr_in_use(&moved.addr));
        assert_eq!(store.get_na(&first.key).unwrap().addr, moved.addr);
    }

    #[test]
    fn test_prefix_index() {
        let mut store = MemoryStore::new(16);
        let now = 1000;
        let pd = pd_lease(1, "2001:db8:1234::", 48, LeaseState::Allocated, now);
        let prefix = pd.prefix;

        store.put_pd(pd.clone()).unwrap();
        assert!(store.prefix_in_use(&prefix, 48));
        // Same bits but a different length is a different delegation.
        assert!(!store.prefix_in_use(&prefix, 56));

        store.delete_pd(&pd.key);
        assert!(!store.prefix_in_use(&prefix, 48));
    }

    #[test]
    fn test_capacity_ceiling() {
        let mut store = MemoryStore::new(2);
        let now = 1000;
        store
            .put_na(na_lease(1, "2001:db8:1::1", LeaseState::Allocated, now))
            .unwrap();
        store
            .put_na(na_lease(2, "2001:db8:1::2", LeaseState::Allocated, now))
            .unwrap();

        let third = na_lease(3, "2001:db8:1::3", LeaseState::Allocated, now);
        assert!(matches!(store.put_na(third), Err(Error::StoreFull(2))));

        // Replacing an existing key is not an insert and still succeeds.
        let mut renewed = na_lease(1, "2001:db8:1::1", LeaseState::Allocated, now);
        renewed.valid_until = now + 172_800;
        assert!(store.put_na(renewed).is_ok());
    }

    #[test]
    fn test_gc_evicts_expired_and_indices() {
        let mut store = MemoryStore::new(16);
        let now = 1000;

        let stale_offer = na_lease(1, "2001:db8:1::a", LeaseState::Offered, now - 100);
        let live = na_lease(2, "2001:db8:1::b", LeaseState::Allocated, now);
        let mut dead = na_lease(3, "2001:db8:1::c", LeaseState::Allocated, now);
        dead.valid_until = now;

        store.put_na(stale_offer.clone()).unwrap();
        store.put_na(live.clone()).unwrap();
        store.put_na(dead.clone()).unwrap();

        let evicted = store.gc(now);
        assert_eq!(evicted, 2);

        assert!(store.get_na(&stale_offer.key).is_none());
        assert!(!store.addr_in_use(&stale_offer.addr));
        assert!(store.get_na(&dead.key).is_none());
        assert!(!store.addr_in_use(&dead.addr));
        assert!(store.get_na(&live.key).is_some());
        assert!(store.addr_in_use(&live.addr));

        // A second sweep with the same clock is a no-op.
        assert_eq!(store.gc(now), 0);
    }

    #[test]
    fn test_gc_expires_declines() {
        let mut store = MemoryStore::new(16);
        let addr: Ipv6Addr = "2001:db8:1::a".parse().unwrap();

        store.decline_addr(addr, 2000).unwrap();
        store
            .decline_prefix("2001:db8:1234::".parse().unwrap(), 48, 1500)
            .unwrap();

        assert_eq!(store.gc(1600), 1);
        assert!(store.is_addr_declined(&addr, 1600));
        assert!(!store.is_prefix_declined(&"2001:db8:1234::".parse().unwrap(), 48, 1600));

        assert_eq!(store.gc(2000), 1);
        assert!(!store.is_addr_declined(&addr, 2000));
    }

    #[test]
    fn test_decline_quarantine_window() {
        let mut store = MemoryStore::new(16);
        let addr: Ipv6Addr = "2001:db8:1::a".parse().unwrap();

        store.decline_addr(addr, 1500).unwrap();
        assert!(store.is_addr_declined(&addr, 1000));
        assert!(store.is_addr_declined(&addr, 1499));
        // The boundary epoch is already expired.
        assert!(!store.is_addr_declined(&addr, 1500));
    }

    #[test]
    fn test_decline_capacity_independent_of_leases() {
        let mut store = MemoryStore::new(1);
        let now = 1000;
        store
            .put_na(na_lease(1, "2001:db8:1::1", LeaseState::Allocated, now))
            .unwrap();

        // The lease table is full, the decline table is not.
        store.decline_addr("2001:db8:1::9".parse().unwrap(), 2000).unwrap();
        let second = store.decline_addr("2001:db8:1::8".parse().unwrap(), 2000);
        assert!(matches!(second, Err(Error::StoreFull(1))));

        // Re-declining an already quarantined address just extends it.
        assert!(store.decline_addr("2001:db8:1::9".parse().unwrap(), 3000).is_ok());
    }

    #[test]
    fn test_stats() {
        let mut store = MemoryStore::new(16);
        let now = 1000;
        store
            .put_na(na_lease(1, "2001:db8:1::1", LeaseState::Allocated, now))
            .unwrap();
        store
            .put_pd(pd_lease(1, "2001:db8:1234::", 48, LeaseState::Allocated, now))
            .unwrap();
        store.decline_addr("2001:db8:1::9".parse().unwrap(), 2000).unwrap();

        assert_eq!(
            store.stats(),
            StoreStats {
                na_leases: 1,
                pd_leases: 1,
                declined_addrs: 1,
                declined_prefixes: 0,
            }
        );
    }
}
