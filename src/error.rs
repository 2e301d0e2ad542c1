//! Error types for the DHCPv6 server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

/// Errors that can occur during DHCPv6 server operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed DHCPv6 packet received.
    ///
    /// This includes packets that are too short, declare option lengths that
    /// run past the end of the input, omit the client identifier, or carry
    /// structurally invalid option bodies. Malformed packets are dropped
    /// without a reply.
    #[error("Invalid DHCPv6 packet: {0}")]
    InvalidPacket(String),

    /// A write ran past the end of the fixed-capacity encode buffer.
    ///
    /// Aborts reply construction; no packet is sent for this exchange.
    #[error("Encode buffer full at offset {0}")]
    BufferFull(usize),

    /// An option payload exceeded the 16-bit wire length field.
    #[error("Option payload of {0} bytes exceeds 65535")]
    OptionTooLong(usize),

    /// The allocator exhausted its probe budget without finding a free
    /// address or prefix.
    ///
    /// Reported to the client as a NoAddrsAvail status inside an otherwise
    /// valid reply, never as a dropped packet.
    #[error("No available addresses or prefixes in pool")]
    PoolExhausted,

    /// The lease store reached its configured capacity.
    ///
    /// Distinct from [`PoolExhausted`](Self::PoolExhausted): the pool may
    /// still have free candidates, but the store cannot record another lease.
    #[error("Lease store capacity of {0} reached")]
    StoreFull(usize),

    /// Invalid server configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate) when the
    /// configuration contains invalid values (e.g., host_start > host_end).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 547 without administrator
    /// privileges, or when the specified network interface doesn't exist.
    #[error("Socket error: {0}")]
    Socket(String),
}

/// A specialized Result type for DHCPv6 operations.
pub type Result<T> = std::result::Result<T, Error>;
