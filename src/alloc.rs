//! Deterministic address and prefix allocation.
//!
//! Both allocators are pure functions of (pool, identity, association id,
//! store contents, now): they never mutate anything, and the same client
//! asking again converges on the same candidate as long as nothing else
//! claimed it. Seeding by the keyed identity hash spreads clients across
//! the pool; linear probing from the seed resolves collisions without any
//! free-list.

use std::net::Ipv6Addr;

use crate::duid::Duid;
use crate::error::{Error, Result};
use crate::hash::hash64;
use crate::lease::LeaseStore;
use crate::pool::{AddressPool, PrefixPool};

/// Probe budget per allocation. Bounds worst-case work on a nearly full
/// pool; a pool smaller than this is scanned completely.
pub const MAX_PROBES: u64 = 1024;

/// Seed for the probe sequence: keyed hash of the identity bytes, spread
/// by the association id so a client's NA and PD associations (or several
/// IA_NAs) do not chase the same candidates.
fn probe_seed(duid: &Duid, iaid: u32, secret: u64) -> u64 {
    hash64(duid.as_bytes(), secret) ^ ((u64::from(iaid) << 32) | u64::from(iaid))
}

/// Picks a free address from the pool for the given identity.
///
/// Candidates are rejected while declined-and-unexpired or bound by any
/// lease; the first acceptable one wins.
///
/// # Errors
///
/// Returns [`Error::PoolExhausted`] when the probe budget (or the whole
/// pool, if smaller) is exhausted, or the pool's host range is empty.
pub fn allocate_addr(
    pool: &AddressPool,
    duid: &Duid,
    iaid: u32,
    store: &dyn LeaseStore,
    now: u64,
) -> Result<Ipv6Addr> {
    if pool.host_end < pool.host_start {
        return Err(Error::PoolExhausted);
    }
    let range = pool.range();
    let seed = probe_seed(duid, iaid, pool.secret);

    for probe in 0..MAX_PROBES.min(range) {
        let host = pool.host_start + (seed.wrapping_add(probe) % range);
        let candidate = pool.make_addr(host);

        if store.is_addr_declined(&candidate, now) {
            continue;
        }
        if store.addr_in_use(&candidate) {
            continue;
        }
        return Ok(candidate);
    }
    Err(Error::PoolExhausted)
}

/// Picks a free delegated prefix for the given identity.
///
/// A hinted prefix length is honored only when it equals the pool's
/// configured delegation length; any other hint is silently ignored.
///
/// # Errors
///
/// Returns [`Error::PoolExhausted`] on probe-budget exhaustion, or when
/// the delegation width `delegated_len - base_len` is not strictly
/// between 0 and 63 (the block index must fit a u64 shift).
pub fn allocate_prefix(
    pool: &PrefixPool,
    duid: &Duid,
    iaid: u32,
    hint_len: Option<u8>,
    store: &dyn LeaseStore,
    now: u64,
) -> Result<(Ipv6Addr, u8)> {
    let plen = match hint_len {
        Some(len) if len == pool.delegated_len => len,
        _ => pool.delegated_len,
    };

    let bits = i32::from(plen) - i32::from(pool.base_len);
    if bits <= 0 || bits >= 63 {
        return Err(Error::PoolExhausted);
    }

    let blocks = 1u64 << bits;
    let seed = probe_seed(duid, iaid, pool.secret) % blocks;

    for probe in 0..MAX_PROBES.min(blocks) {
        let index = (seed + probe) % blocks;
        let candidate = pool.make_prefix(plen, index);

        if store.is_prefix_declined(&candidate, plen, now) {
            continue;
        }
        if store.prefix_in_use(&candidate, plen) {
            continue;
        }
        return Ok((candidate, plen));
    }
    Err(Error::PoolExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duid::{IaKind, LeaseKey};
    use crate::lease::{LeaseState, MemoryStore, NaLease, PdLease};

    fn addr_pool() -> AddressPool {
        AddressPool {
            pool_id: 1,
            subnet_id: 1,
            prefix: "2001:db8:1::".parse().unwrap(),
            host_start: 10,
            host_end: 20,
            secret: 0x5eed,
        }
    }

    fn pd_pool() -> PrefixPool {
        PrefixPool {
            pool_id: 2,
            subnet_id: 1,
            base_prefix: "2001:db8::".parse().unwrap(),
            base_len: 32,
            delegated_len: 48,
            secret: 0x5eed,
        }
    }

    fn duid(tag: u8) -> Duid {
        Duid::from_bytes(&[0, 3, 0, 1, tag, tag, tag, tag, tag, tag], 42).unwrap()
    }

    fn na_for(addr: Ipv6Addr, tag: u8, now: u64) -> NaLease {
        NaLease {
            key: LeaseKey::new(&duid(tag), 1, IaKind::Na),
            addr,
            preferred_lft: 43200,
            valid_lft: 86400,
            preferred_until: now + 43200,
            valid_until: now + 86400,
            subnet_id: 1,
            pool_id: 1,
            state: LeaseState::Allocated,
            hold_until: 0,
        }
    }

    #[test]
    fn test_addr_in_range_and_deterministic() {
        let store = MemoryStore::new(16);
        let pool = addr_pool();

        let first = allocate_addr(&pool, &duid(1), 7, &store, 1000).unwrap();
        let host = u64::from_be_bytes(first.octets()[8..].try_into().unwrap());
        assert!((10..=20).contains(&host));

        // Same inputs against an empty store, any number of times.
        for _ in 0..5 {
            assert_eq!(allocate_addr(&pool, &duid(1), 7, &store, 1000).unwrap(), first);
        }
    }

    #[test]
    fn test_addr_full_width_host_range() {
        // The whole /64 as one pool is a legal config and must not trip
        // the range arithmetic.
        let mut pool = addr_pool();
        pool.host_start = 0;
        pool.host_end = u64::MAX;

        let config = crate::config::Config {
            address_pool: pool.clone(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let store = MemoryStore::new(16);
        let addr = allocate_addr(&pool, &duid(1), 7, &store, 1000).unwrap();
        assert!(pool.is_on_link(&addr));
    }

    #[test]
    fn test_addr_skips_in_use() {
        let mut store = MemoryStore::new(16);
        let pool = addr_pool();
        let now = 1000;

        let first = allocate_addr(&pool, &duid(1), 7, &store, now).unwrap();
        store.put_na(na_for(first, 9, now)).unwrap();

        let second = allocate_addr(&pool, &duid(1), 7, &store, now).unwrap();
        assert_ne!(second, first);
    }

    #[test]
    fn test_addr_skips_declined_until_expiry() {
        let mut store = MemoryStore::new(16);
        let pool = addr_pool();
        let now = 1000;

        let first = allocate_addr(&pool, &duid(1), 7, &store, now).unwrap();
        store.decline_addr(first, now + 600).unwrap();

        let during = allocate_addr(&pool, &duid(1), 7, &store, now).unwrap();
        assert_ne!(during, first);

        // Quarantine elapsed: the deterministic candidate comes back.
        let after = allocate_addr(&pool, &duid(1), 7, &store, now + 600).unwrap();
        assert_eq!(after, first);
    }

    #[test]
    fn test_addr_pool_exhaustion() {
        let mut store = MemoryStore::new(32);
        let pool = AddressPool {
            host_start: 10,
            host_end: 11,
            ..addr_pool()
        };
        let now = 1000;

        for tag in 0..2 {
            let addr = allocate_addr(&pool, &duid(tag), 1, &store, now).unwrap();
            store.put_na(na_for(addr, tag, now)).unwrap();
        }

        let result = allocate_addr(&pool, &duid(5), 1, &store, now);
        assert!(matches!(result, Err(Error::PoolExhausted)));
    }

    #[test]
    fn test_addr_empty_range() {
        let store = MemoryStore::new(16);
        let pool = AddressPool {
            host_start: 20,
            host_end: 10,
            ..addr_pool()
        };
        assert!(matches!(
            allocate_addr(&pool, &duid(1), 1, &store, 1000),
            Err(Error::PoolExhausted)
        ));
    }

    #[test]
    fn test_prefix_retains_base_and_is_deterministic() {
        let store = MemoryStore::new(16);
        let pool = pd_pool();

        let (prefix, plen) = allocate_prefix(&pool, &duid(1), 7, None, &store, 1000).unwrap();
        assert_eq!(plen, 48);
        assert!(pool.is_on_link(&prefix));
        // Nothing beyond the delegated length.
        assert_eq!(&prefix.octets()[6..], &[0u8; 10]);

        let again = allocate_prefix(&pool, &duid(1), 7, None, &store, 1000).unwrap();
        assert_eq!(again, (prefix, plen));
    }

    #[test]
    fn test_prefix_hint_honored_only_when_exact() {
        let store = MemoryStore::new(16);
        let pool = pd_pool();

        let (_, plen) = allocate_prefix(&pool, &duid(1), 7, Some(48), &store, 1000).unwrap();
        assert_eq!(plen, 48);

        // A /56 hint does not match the configured /48 and is ignored.
        let (_, plen) = allocate_prefix(&pool, &duid(1), 7, Some(56), &store, 1000).unwrap();
        assert_eq!(plen, 48);
    }

    #[test]
    fn test_prefix_skips_in_use() {
        let mut store = MemoryStore::new(16);
        let pool = pd_pool();
        let now = 1000;

        let (first, plen) = allocate_prefix(&pool, &duid(1), 7, None, &store, now).unwrap();
        store
            .put_pd(PdLease {
                key: LeaseKey::new(&duid(9), 1, IaKind::Pd),
                prefix: first,
                prefix_len: plen,
                preferred_lft: 43200,
                valid_lft: 86400,
                preferred_until: now + 43200,
                valid_until: now + 86400,
                subnet_id: 1,
                pool_id: 2,
                state: LeaseState::Allocated,
                hold_until: 0,
            })
            .unwrap();

        let (second, _) = allocate_prefix(&pool, &duid(1), 7, None, &store, now).unwrap();
        assert_ne!(second, first);
    }

    #[test]
    fn test_prefix_rejects_bad_widths() {
        let store = MemoryStore::new(16);

        // Zero-width delegation.
        let pool = PrefixPool {
            base_len: 48,
            delegated_len: 48,
            ..pd_pool()
        };
        assert!(matches!(
            allocate_prefix(&pool, &duid(1), 1, None, &store, 1000),
            Err(Error::PoolExhausted)
        ));

        // Wider than a u64 block index can express.
        let pool = PrefixPool {
            base_len: 32,
            delegated_len: 127,
            ..pd_pool()
        };
        assert!(matches!(
            allocate_prefix(&pool, &duid(1), 1, None, &store, 1000),
            Err(Error::PoolExhausted)
        ));
    }
}
