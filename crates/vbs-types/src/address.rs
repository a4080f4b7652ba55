use std::fmt;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Transport kind of a chunk-server endpoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u16)]
pub enum AddressType {
    TCP = 0,
    RDMA = 1,
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressType::TCP => write!(f, "TCP"),
            AddressType::RDMA => write!(f, "RDMA"),
        }
    }
}

/// A chunk-server endpoint: IPv4 host, port, and transport kind.
///
/// The textual form is `"ip:port"` with an optional `"SCHEME://"` prefix;
/// redirect hints in chunk responses arrive without the scheme.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// IPv4 host in network byte order.
    pub ip: u32,
    pub port: u16,
    pub addr_type: AddressType,
}

impl Address {
    pub fn new(ip: u32, port: u16, addr_type: AddressType) -> Self {
        Self {
            ip,
            port,
            addr_type,
        }
    }

    /// Build a TCP address from four octets and a port.
    pub fn from_octets(a: u8, b: u8, c: u8, d: u8, port: u16) -> Self {
        Self {
            ip: u32::from_be_bytes([a, b, c, d]),
            port,
            addr_type: AddressType::TCP,
        }
    }

    pub fn octets(&self) -> [u8; 4] {
        self.ip.to_be_bytes()
    }

    /// The host part alone, used to group chunk servers by machine.
    pub fn host_ip(&self) -> u32 {
        self.ip
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets();
        write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Parse `"10.0.0.7:8200"` or `"RDMA://10.0.0.7:8200"`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr_type, rest) = match s.split_once("://") {
            Some(("TCP", rest)) => (AddressType::TCP, rest),
            Some(("RDMA", rest)) => (AddressType::RDMA, rest),
            Some((other, _)) => return Err(AddressParseError::UnknownType(other.to_string())),
            None => (AddressType::TCP, s),
        };

        let (ip_str, port_str) = rest.rsplit_once(':').ok_or(AddressParseError::MissingPort)?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| AddressParseError::InvalidPort)?;

        let parts: Vec<&str> = ip_str.split('.').collect();
        if parts.len() != 4 {
            return Err(AddressParseError::InvalidIp);
        }
        let octets: std::result::Result<Vec<u8>, _> = parts.iter().map(|p| p.parse()).collect();
        let octets = octets.map_err(|_| AddressParseError::InvalidIp)?;

        Ok(Self {
            ip: u32::from_be_bytes([octets[0], octets[1], octets[2], octets[3]]),
            port,
            addr_type,
        })
    }
}

/// Errors when parsing an `Address` from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("unknown address type: {0}")]
    UnknownType(String),
    #[error("missing port")]
    MissingPort,
    #[error("invalid port number")]
    InvalidPort,
    #[error("invalid IP address")]
    InvalidIp,
}
