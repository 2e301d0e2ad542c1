//! Address and prefix pools.
//!
//! An [`AddressPool`] hands out single /128 addresses from a /64 prefix by
//! filling the low 64 bits with a host index. A [`PrefixPool`] delegates
//! fixed-width sub-prefixes of a base prefix, addressed by a block index.
//!
//! Prefixes are manipulated as 16-byte arrays with explicit bit indexing;
//! nothing here relies on integer widths beyond 64 bits.

use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

/// Pool of single addresses under a /64 prefix.
///
/// Only the upper 64 bits of `prefix` are significant; validation rejects
/// configs where the low half is non-zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressPool {
    /// Operator-assigned pool identifier, copied into every lease.
    pub pool_id: u32,
    /// Operator-assigned subnet identifier, copied into every lease.
    pub subnet_id: u32,
    /// The /64 prefix addresses are built under.
    pub prefix: Ipv6Addr,
    /// First host index handed out (inclusive).
    pub host_start: u64,
    /// Last host index handed out (inclusive).
    pub host_end: u64,
    /// Secret mixed into allocation seeds so probe order is not guessable.
    pub secret: u64,
}

impl AddressPool {
    /// Number of host indices in the pool. A full-width range (start 0,
    /// end `u64::MAX`) saturates to `u64::MAX`, undercounting by one
    /// instead of overflowing; that last index is unreachable by probing
    /// anyway.
    pub fn range(&self) -> u64 {
        (self.host_end - self.host_start).saturating_add(1)
    }

    /// Builds the full address for a host index: the pool prefix with its
    /// low 64 bits overwritten by `host`, most-significant byte first.
    pub fn make_addr(&self, host: u64) -> Ipv6Addr {
        let mut octets = self.prefix.octets();
        octets[8..16].copy_from_slice(&host.to_be_bytes());
        Ipv6Addr::from(octets)
    }

    /// True when `addr` falls under this pool's /64 prefix. Used by the
    /// on-link check in CONFIRM handling; it deliberately ignores the host
    /// range, since an address outside the range is still on this link.
    pub fn is_on_link(&self, addr: &Ipv6Addr) -> bool {
        addr.octets()[..8] == self.prefix.octets()[..8]
    }
}

/// Pool of delegated prefixes carved out of a base prefix.
///
/// Each delegation covers `delegated_len` bits; the bits between `base_len`
/// and `delegated_len` select the block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixPool {
    /// Operator-assigned pool identifier, copied into every lease.
    pub pool_id: u32,
    /// Operator-assigned subnet identifier, copied into every lease.
    pub subnet_id: u32,
    /// Base prefix all delegations share.
    pub base_prefix: Ipv6Addr,
    /// Significant bits of `base_prefix`, e.g. 32 or 48.
    pub base_len: u8,
    /// Length of each delegated prefix, e.g. 48 or 56.
    pub delegated_len: u8,
    /// Secret mixed into allocation seeds.
    pub secret: u64,
}

impl PrefixPool {
    /// Builds the delegated prefix for a block index: the base prefix with
    /// bits `[base_len, plen)` set from `block_index` most-significant bit
    /// first, and every bit from `plen` onward zeroed.
    pub fn make_prefix(&self, plen: u8, block_index: u64) -> Ipv6Addr {
        let mut octets = self.base_prefix.octets();
        let bits = plen as i32 - self.base_len as i32;
        for i in 0..bits {
            let bit = (block_index >> (bits - 1 - i)) & 1 == 1;
            set_bit(&mut octets, (self.base_len as i32 + i) as usize, bit);
        }
        for pos in plen as usize..128 {
            set_bit(&mut octets, pos, false);
        }
        Ipv6Addr::from(octets)
    }

    /// True when the leading `base_len` bits of `prefix` match the base.
    pub fn is_on_link(&self, prefix: &Ipv6Addr) -> bool {
        prefix_match_bits(prefix, &self.base_prefix, self.base_len)
    }
}

/// Compares the first `plen` bits of two addresses.
pub fn prefix_match_bits(a: &Ipv6Addr, b: &Ipv6Addr, plen: u8) -> bool {
    let pa = a.octets();
    let pb = b.octets();
    let full = (plen / 8) as usize;
    let rem = plen % 8;

    if pa[..full] != pb[..full] {
        return false;
    }
    if rem == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rem);
    (pa[full] & mask) == (pb[full] & mask)
}

fn set_bit(octets: &mut [u8; 16], bit: usize, value: bool) {
    let byte = bit / 8;
    let shift = 7 - (bit % 8);
    if value {
        octets[byte] |= 1 << shift;
    } else {
        octets[byte] &= !(1 << shift);
    }
}
