use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::path::Path;

use crate::duid::MAX_DUID_LEN;
use crate::error::{Error, Result};
use crate::pool::{AddressPool, PrefixPool};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server DUID as a hex string, 1 to 128 bytes once decoded.
    pub server_duid: String,
    /// Seed for all DUID hashing; changing it invalidates every lease key.
    pub duid_seed: u64,
    pub preferred_lifetime_seconds: u32,
    pub valid_lifetime_seconds: u32,
    /// How long an uncommitted offer reserves its address.
    pub offer_hold_seconds: u32,
    /// How long a declined address or prefix stays quarantined.
    pub decline_quarantine_seconds: u32,
    pub address_pool: AddressPool,
    pub prefix_pool: PrefixPool,
    pub dns_servers: Vec<Ipv6Addr>,
    /// Per-table lease store capacity.
    pub store_capacity: usize,
    /// Interface to serve on; also scopes multicast replies.
    pub interface_index: u32,
    /// Unix socket path for the control interface, if enabled.
    pub control_socket: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // DUID-EN (type 2) with a private enterprise number slot.
            server_duid: "000200000afe73697806".to_string(),
            duid_seed: 0x5132_7de1_99ce_9d66,
            preferred_lifetime_seconds: 43200,
            valid_lifetime_seconds: 86400,
            offer_hold_seconds: 30,
            decline_quarantine_seconds: 600,
            address_pool: AddressPool {
                pool_id: 1,
                subnet_id: 1,
                prefix: Ipv6Addr::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, 0),
                host_start: 0x1000,
                host_end: 0x1fff,
                secret: 0x243f_6a88_85a3_08d3,
            },
            prefix_pool: PrefixPool {
                pool_id: 2,
                subnet_id: 1,
                base_prefix: Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0),
                base_len: 32,
                delegated_len: 48,
                secret: 0x1319_8a2e_0370_7344,
            },
            dns_servers: vec![Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888)],
            store_capacity: 4096,
            interface_index: 0,
            control_socket: None,
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Decodes the configured server DUID from hex.
    pub fn server_duid_bytes(&self) -> Result<Vec<u8>> {
        let hex = &self.server_duid;
        if hex.is_empty() || !hex.len().is_multiple_of(2) {
            return Err(Error::InvalidConfig(
                "server_duid must be a non-empty even-length hex string".to_string(),
            ));
        }
        let mut bytes = Vec::with_capacity(hex.len() / 2);
        for i in (0..hex.len()).step_by(2) {
            let byte = u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| {
                Error::InvalidConfig(format!("server_duid contains non-hex data: {}", hex))
            })?;
            bytes.push(byte);
        }
        Ok(bytes)
    }

    pub fn validate(&self) -> Result<()> {
        let duid = self.server_duid_bytes()?;
        if duid.is_empty() || duid.len() > MAX_DUID_LEN {
            return Err(Error::InvalidConfig(format!(
                "server_duid must decode to 1..={} bytes",
                MAX_DUID_LEN
            )));
        }

        if self.address_pool.host_start > self.address_pool.host_end {
            return Err(Error::InvalidConfig(
                "address_pool.host_start must not exceed host_end".to_string(),
            ));
        }

        if self.address_pool.prefix.octets()[8..] != [0u8; 8] {
            return Err(Error::InvalidConfig(
                "address_pool.prefix must have a zero low 64 bits (a /64)".to_string(),
            ));
        }

        let width = i32::from(self.prefix_pool.delegated_len) - i32::from(self.prefix_pool.base_len);
        if width <= 0 || width >= 63 {
            return Err(Error::InvalidConfig(format!(
                "delegation width {} must be strictly between 0 and 63",
                width
            )));
        }
        if self.prefix_pool.delegated_len > 128 {
            return Err(Error::InvalidConfig(
                "prefix_pool.delegated_len must not exceed 128".to_string(),
            ));
        }

        if self.preferred_lifetime_seconds == 0 || self.valid_lifetime_seconds == 0 {
            return Err(Error::InvalidConfig(
                "lifetimes must be greater than 0".to_string(),
            ));
        }
        if self.preferred_lifetime_seconds > self.valid_lifetime_seconds {
            return Err(Error::InvalidConfig(
                "preferred lifetime must not exceed valid lifetime".to_string(),
            ));
        }

        if self.store_capacity == 0 {
            return Err(Error::InvalidConfig(
                "store_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
