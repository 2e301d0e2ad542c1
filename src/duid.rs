//! Client and server identity: DUIDs and lease keys.
//!
//! A DUID (RFC 8415 §11) is an opaque blob of 1 to 128 bytes. The server
//! never interprets its internal structure; identity is byte equality.
//! Each [`Duid`] carries a keyed hash computed once at parse time, used as
//! a fast-reject for equality and as the identity half of a [`LeaseKey`].

use crate::error::{Error, Result};
use crate::hash::hash64;

/// Maximum DUID length accepted on the wire (RFC 8415 §11.1 allows 128).
pub const MAX_DUID_LEN: usize = 128;

/// An opaque client or server identifier with its precomputed keyed hash.
#[derive(Debug, Clone)]
pub struct Duid {
    bytes: Vec<u8>,
    hash: u64,
}

impl Duid {
    /// Builds a DUID from a Client/Server Identifier option payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the payload is empty or longer
    /// than [`MAX_DUID_LEN`] bytes.
    pub fn from_bytes(value: &[u8], seed: u64) -> Result<Self> {
        if value.is_empty() || value.len() > MAX_DUID_LEN {
            return Err(Error::InvalidPacket(format!(
                "DUID length {} outside 1..={}",
                value.len(),
                MAX_DUID_LEN
            )));
        }
        Ok(Self {
            bytes: value.to_vec(),
            hash: hash64(value, seed),
        })
    }

    /// The raw identifier bytes, echoed verbatim into replies.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The keyed hash of the identifier bytes. Stable for the lifetime of
    /// the server process and across restarts with the same seed.
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for Duid {
    fn eq(&self, other: &Self) -> bool {
        // Length then hash reject cheaply; only then compare bytes.
        self.bytes.len() == other.bytes.len()
            && self.hash == other.hash
            && self.bytes == other.bytes
    }
}

impl Eq for Duid {}

impl std::fmt::Display for Duid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.bytes {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Which kind of binding an identity association covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IaKind {
    /// Non-temporary address (IA_NA).
    Na,
    /// Delegated prefix (IA_PD).
    Pd,
}

/// Composite lease lookup key: client identity hash, the client-chosen
/// association id, and the binding kind.
///
/// The DUID hash stands in for the full identifier, so a hash collision
/// between two DUIDs of the same length would alias their leases. With a
/// keyed 64-bit hash this is not reachable in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    pub duid_hash: u64,
    pub iaid: u32,
    pub kind: IaKind,
}

impl LeaseKey {
    pub fn new(duid: &Duid, iaid: u32, kind: IaKind) -> Self {
        Self {
            duid_hash: duid.hash(),
            iaid,
            kind,
        }
    }
}
