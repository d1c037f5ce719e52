//! Network parameters and protocol constants shared across the header store.

pub mod constants;
pub mod params;

pub use params::{
    bytes_to_hex, chain_params, hash256_from_hex, hash256_to_hex, hex_to_bytes, ChainParams,
    Checkpoint, HexError, Network,
};

/// 32-byte hash in internal (little-endian) byte order.
pub type Hash256 = [u8; 32];
