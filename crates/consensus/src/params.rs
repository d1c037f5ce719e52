//! Per-network chain parameters.

use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Network::Mainnet),
            "testnet" | "test" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: i32,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    /// Serialized genesis header; its hash is the genesis block hash.
    pub genesis_header: [u8; 80],
    pub pow_limit: Hash256,
    pub checkpoints: Vec<Checkpoint>,
    pub pubkey_address_prefix: u8,
    pub script_address_prefix: u8,
    pub secret_key_prefix: u8,
    pub default_port: u16,
}

impl ChainParams {
    /// Highest checkpointed height, or 0 when no checkpoints are configured.
    pub fn max_checkpoint(&self) -> i32 {
        self.checkpoints
            .iter()
            .map(|checkpoint| checkpoint.height)
            .max()
            .unwrap_or(0)
    }

    pub fn checkpoint_at(&self, height: i32) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .find(|checkpoint| checkpoint.height == height)
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hex length"),
            HexError::InvalidHex => write!(f, "invalid hex character"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses display-order (big-endian) hex into an internal little-endian hash.
///
/// Short inputs are left-padded with zeroes.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.is_empty() || hex.len() > 64 {
        return Err(HexError::InvalidLength);
    }

    let mut padded = String::with_capacity(64);
    for _ in 0..(64 - hex.len()) {
        padded.push('0');
    }
    padded.push_str(hex);

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out = u8::from_str_radix(&padded[start..start + 2], 16)
            .map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();
    Ok(bytes)
}

/// Renders an internal hash in display order.
pub fn hash256_to_hex(hash: &Hash256) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len().saturating_mul(2));
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

pub fn hex_to_bytes(input: &str) -> Result<Vec<u8>, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.len() % 2 == 1 {
        return Err(HexError::InvalidLength);
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    let mut iter = hex.as_bytes().iter().copied();
    while let (Some(high), Some(low)) = (iter.next(), iter.next()) {
        let high = (high as char).to_digit(16).ok_or(HexError::InvalidHex)? as u8;
        let low = (low as char).to_digit(16).ok_or(HexError::InvalidHex)? as u8;
        bytes.push(high << 4 | low);
    }
    Ok(bytes)
}

// Audax genesis header (version 1, bits 0x1e0ffff0). Regtest reuses it.
const GENESIS_HEADER_HEX: &str = "010000000000000000000000000000000000000000000000000000000000000000000000cff763175904c6cedff80a31fc686ab943fa58223105ebbba6fb22c8cfcacb07dc766a5af0ff0f1ea1594401";

fn genesis_header() -> [u8; 80] {
    let bytes = hex_to_bytes(GENESIS_HEADER_HEX).expect("genesis header hex");
    let mut out = [0u8; 80];
    out.copy_from_slice(&bytes);
    out
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => ChainParams {
            network,
            genesis_header: genesis_header(),
            pow_limit: hash256_from_hex(
                "00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
            )
            .expect("mainnet pow limit"),
            checkpoints: Vec::new(),
            pubkey_address_prefix: 38,
            script_address_prefix: 16,
            secret_key_prefix: 0x2e,
            default_port: 9333,
        },
        Network::Testnet => ChainParams {
            network,
            genesis_header: genesis_header(),
            pow_limit: hash256_from_hex(
                "00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
            )
            .expect("testnet pow limit"),
            checkpoints: Vec::new(),
            pubkey_address_prefix: 111,
            script_address_prefix: 196,
            secret_key_prefix: 0xef,
            default_port: 19333,
        },
        Network::Regtest => ChainParams {
            network,
            genesis_header: genesis_header(),
            pow_limit: hash256_from_hex(
                "7fffff0000000000000000000000000000000000000000000000000000000000",
            )
            .expect("regtest pow limit"),
            checkpoints: Vec::new(),
            pubkey_address_prefix: 111,
            script_address_prefix: 196,
            secret_key_prefix: 0xef,
            default_port: 19444,
        },
    }
}
