//! Service address in the 18-byte wire form (IPv6 or IPv4-mapped, port big-endian).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct NetworkAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn unspecified(port: u16) -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
        }
    }

    fn ip_bytes(&self) -> [u8; 16] {
        match self.ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        }
    }
}

impl Default for NetworkAddress {
    fn default() -> Self {
        Self::unspecified(0)
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&SocketAddr::new(self.ip, self.port), f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrParseError(pub String);

impl fmt::Display for AddrParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid service address {}", self.0)
    }
}

impl std::error::Error for AddrParseError {}

impl FromStr for NetworkAddress {
    type Err = AddrParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let addr = SocketAddr::from_str(value.trim())
            .map_err(|_| AddrParseError(value.to_string()))?;
        Ok(Self::new(addr.ip(), addr.port()))
    }
}

impl Encodable for NetworkAddress {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_bytes(&self.ip_bytes());
        encoder.write_u16_be(self.port);
    }
}

impl Decodable for NetworkAddress {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let octets = decoder.read_fixed::<16>()?;
        let port = decoder.read_u16_be()?;
        let v6 = Ipv6Addr::from(octets);
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        Ok(Self { ip, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    #[test]
    fn ipv4_is_mapped_on_the_wire() {
        let addr: NetworkAddress = "192.168.1.101:9333".parse().expect("addr");
        assert_eq!(
            spv_consensus::bytes_to_hex(&encode(&addr)),
            "00000000000000000000ffffc0a801652475"
        );
        assert_eq!(decode::<NetworkAddress>(&encode(&addr)).expect("decode"), addr);
    }

    #[test]
    fn display_matches_signing_text() {
        let addr: NetworkAddress = "0.0.0.0:9333".parse().expect("addr");
        assert_eq!(addr.to_string(), "0.0.0.0:9333");
        let v6: NetworkAddress = "[2001:db8::1]:9333".parse().expect("addr");
        assert_eq!(v6.to_string(), "[2001:db8::1]:9333");
    }

    #[test]
    fn rejects_missing_port() {
        assert!("192.168.1.101".parse::<NetworkAddress>().is_err());
    }
}
