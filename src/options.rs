//! DHCPv6 message types, option codes, and status codes from RFC 8415.
//!
//! DHCPv6 carries everything as TLV options after a fixed 4-byte header:
//! a 2-byte option code, a 2-byte big-endian length, then the payload.
//! This module defines the code enums; the cursor-based option parsing and
//! encoding live in [`crate::packet`].

/// DHCPv6 option codes (RFC 8415 §21).
///
/// Only codes consumed or emitted by this implementation are defined;
/// unrecognized codes are skipped during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OptionCode {
    /// Client Identifier (DUID) (§21.2).
    ClientId = 1,
    /// Server Identifier (DUID) (§21.3).
    ServerId = 2,
    /// Identity Association for Non-temporary Addresses (§21.4).
    IaNa = 3,
    /// IA Address, nested inside IA_NA (§21.6).
    IaAddr = 5,
    /// Option Request (§21.7).
    Oro = 6,
    /// Status Code (§21.13).
    Status = 13,
    /// Rapid Commit flag (§21.14).
    RapidCommit = 14,
    /// DNS Recursive Name Servers (RFC 3646).
    DnsServers = 23,
    /// Identity Association for Prefix Delegation (§21.21).
    IaPd = 25,
    /// IA Prefix, nested inside IA_PD (§21.22).
    IaPrefix = 26,
}

impl TryFrom<u16> for OptionCode {
    type Error = u16;

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ClientId),
            2 => Ok(Self::ServerId),
            3 => Ok(Self::IaNa),
            5 => Ok(Self::IaAddr),
            6 => Ok(Self::Oro),
            13 => Ok(Self::Status),
            14 => Ok(Self::RapidCommit),
            23 => Ok(Self::DnsServers),
            25 => Ok(Self::IaPd),
            26 => Ok(Self::IaPrefix),
            other => Err(other),
        }
    }
}

/// DHCPv6 message types (RFC 8415 §7.3).
///
/// Relay message types (12/13) are not listed; this server only speaks
/// directly to clients on-link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client multicast to locate servers.
    Solicit = 1,
    /// Server response to SOLICIT with offered bindings.
    Advertise = 2,
    /// Client commits to an advertised server.
    Request = 3,
    /// Client asks whether its addresses are still on-link.
    Confirm = 4,
    /// Client extends lifetimes with the server that granted them.
    Renew = 5,
    /// Client extends lifetimes with any server.
    Rebind = 6,
    /// Server answer to everything except SOLICIT-without-rapid-commit.
    Reply = 7,
    /// Client gives bindings back.
    Release = 8,
    /// Client reports an address already in use on the link.
    Decline = 9,
    /// Server-initiated reconfiguration (not produced by this server).
    Reconfigure = 10,
    /// Client requests configuration without any bindings.
    InformationRequest = 11,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Solicit),
            2 => Ok(Self::Advertise),
            3 => Ok(Self::Request),
            4 => Ok(Self::Confirm),
            5 => Ok(Self::Renew),
            6 => Ok(Self::Rebind),
            7 => Ok(Self::Reply),
            8 => Ok(Self::Release),
            9 => Ok(Self::Decline),
            10 => Ok(Self::Reconfigure),
            11 => Ok(Self::InformationRequest),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solicit => write!(f, "SOLICIT"),
            Self::Advertise => write!(f, "ADVERTISE"),
            Self::Request => write!(f, "REQUEST"),
            Self::Confirm => write!(f, "CONFIRM"),
            Self::Renew => write!(f, "RENEW"),
            Self::Rebind => write!(f, "REBIND"),
            Self::Reply => write!(f, "REPLY"),
            Self::Release => write!(f, "RELEASE"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Reconfigure => write!(f, "RECONFIGURE"),
            Self::InformationRequest => write!(f, "INFORMATION-REQUEST"),
        }
    }
}

/// Status codes carried in Status Code options inside IA containers.
///
/// Success is written explicitly only in CONFIRM replies; elsewhere success
/// is implied by the presence of an address or prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusCode {
    /// The request succeeded.
    Success = 0,
    /// No addresses (or prefixes) available for this client.
    NoAddrsAvail = 2,
    /// The client's address or prefix is not appropriate for this link.
    NotOnLink = 6,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversions() {
        for value in 1..=11u8 {
            let msg_type = MessageType::try_from(value).unwrap();
            assert_eq!(msg_type as u8, value);
        }
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(12).is_err());
        assert!(MessageType::try_from(255).is_err());
    }

    #[test]
    fn test_option_code_conversions() {
        for value in [1u16, 2, 3, 5, 6, 13, 14, 23, 25, 26] {
            let code = OptionCode::try_from(value).unwrap();
            assert_eq!(code as u16, value);
        }
        assert!(OptionCode::try_from(0).is_err());
        assert!(OptionCode::try_from(4).is_err());
        assert!(OptionCode::try_from(82).is_err());
    }

    #[test]
    fn test_message_type_display() {
        assert_eq!(format!("{}", MessageType::Solicit), "SOLICIT");
        assert_eq!(format!("{}", MessageType::Advertise), "ADVERTISE");
        assert_eq!(format!("{}", MessageType::Reply), "REPLY");
        assert_eq!(
            format!("{}", MessageType::InformationRequest),
            "INFORMATION-REQUEST"
        );
    }

    #[test]
    fn test_status_code_values() {
        assert_eq!(StatusCode::Success as u16, 0);
        assert_eq!(StatusCode::NoAddrsAvail as u16, 2);
        assert_eq!(StatusCode::NotOnLink as u16, 6);
    }
}
