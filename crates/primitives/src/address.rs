//! Base58check P2PKH addresses and WIF secret keys.

use spv_consensus::ChainParams;

use crate::hash::{hash160, sha256d};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
    UnknownPrefix,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::InvalidLength => write!(f, "invalid base58 payload length"),
            AddressError::InvalidCharacter => write!(f, "invalid base58 character"),
            AddressError::InvalidChecksum => write!(f, "invalid base58 checksum"),
            AddressError::UnknownPrefix => write!(f, "address prefix does not match network"),
        }
    }
}

impl std::error::Error for AddressError {}

pub fn hash160_to_address(hash: &[u8; 20], params: &ChainParams) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(params.pubkey_address_prefix);
    payload.extend_from_slice(hash);
    base58check_encode(&payload)
}

/// P2PKH address of a serialized (compressed or uncompressed) public key.
pub fn pubkey_to_address(pubkey: &[u8], params: &ChainParams) -> String {
    hash160_to_address(&hash160(pubkey), params)
}

pub fn address_to_hash160(address: &str, params: &ChainParams) -> Result<[u8; 20], AddressError> {
    let payload = base58check_decode(address)?;
    if payload.len() != 21 {
        return Err(AddressError::InvalidLength);
    }
    if payload[0] != params.pubkey_address_prefix {
        return Err(AddressError::UnknownPrefix);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    Ok(hash)
}

pub fn secret_key_to_wif(secret: &[u8; 32], params: &ChainParams, compressed: bool) -> String {
    let mut payload = Vec::with_capacity(1 + secret.len() + usize::from(compressed));
    payload.push(params.secret_key_prefix);
    payload.extend_from_slice(secret);
    if compressed {
        payload.push(0x01);
    }
    base58check_encode(&payload)
}

pub fn wif_to_secret_key(
    wif: &str,
    params: &ChainParams,
) -> Result<([u8; 32], bool), AddressError> {
    let payload = base58check_decode(wif.trim())?;
    if payload.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    if payload[0] != params.secret_key_prefix {
        return Err(AddressError::UnknownPrefix);
    }

    let mut secret = [0u8; 32];
    match payload.len() {
        33 => {
            secret.copy_from_slice(&payload[1..33]);
            Ok((secret, false))
        }
        34 if payload[33] == 0x01 => {
            secret.copy_from_slice(&payload[1..33]);
            Ok((secret, true))
        }
        _ => Err(AddressError::InvalidLength),
    }
}

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = base58_decode(input)?;
    if bytes.len() < 4 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    let digest = sha256d(payload);
    if checksum != &digest[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    let checksum = sha256d(payload);
    data.extend_from_slice(&checksum[..4]);
    base58_encode(&data)
}

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let mut bytes = Vec::new();
    for ch in input.bytes() {
        let mut carry = ALPHABET
            .iter()
            .position(|value| *value == ch)
            .ok_or(AddressError::InvalidCharacter)? as u32;
        for byte in bytes.iter_mut().rev() {
            let val = (*byte as u32) * 58 + carry;
            *byte = (val & 0xff) as u8;
            carry = val >> 8;
        }
        while carry > 0 {
            bytes.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let leading_zeros = input.bytes().take_while(|b| *b == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend_from_slice(&bytes);
    Ok(out)
}

fn base58_encode(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }
    let mut digits = vec![0u8];
    for byte in data {
        let mut carry = *byte as u32;
        for digit in digits.iter_mut().rev() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 58) as u8;
            carry = value / 58;
        }
        while carry > 0 {
            digits.insert(0, (carry % 58) as u8);
            carry /= 58;
        }
    }
    let leading_zeros = data.iter().take_while(|b| **b == 0u8).count();
    let mut out = String::with_capacity(leading_zeros + digits.len());
    for _ in 0..leading_zeros {
        out.push('1');
    }
    let skip = digits.iter().take_while(|digit| **digit == 0).count();
    for digit in &digits[skip..] {
        out.push(ALPHABET[*digit as usize] as char);
    }
    out
}
