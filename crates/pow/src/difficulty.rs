//! Difficulty and compact target utilities.

use std::cmp::Ordering;

use primitive_types::U256;
use spv_consensus::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let word = bits & 0x007f_ffff;
    let negative = (bits & 0x0080_0000) != 0;

    // A zero mantissa is neither negative nor overflowing.
    if word != 0 {
        if negative {
            return Err(CompactError::Negative);
        }
        let overflow = size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32);
        if overflow {
            return Err(CompactError::Overflow);
        }
    }

    if size <= 3 {
        Ok(U256::from(word >> (8 * (3 - size))))
    } else {
        Ok(U256::from(word) << (8 * (size - 3)))
    }
}

pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact: u32 = if size <= 3 {
        value.low_u32() << (8 * (3 - size))
    } else {
        (value >> (8 * (size - 3))).low_u32()
    };

    if (compact & 0x0080_0000) != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

pub fn compact_to_target(bits: u32) -> Result<Hash256, CompactError> {
    Ok(compact_to_u256(bits)?.to_little_endian())
}

pub fn target_to_compact(target: &Hash256) -> u32 {
    u256_to_compact(U256::from_little_endian(target))
}

pub fn hash_meets_target(hash: &Hash256, target: &Hash256) -> bool {
    cmp_le(hash, target) != Ordering::Greater
}

/// Expected number of hashes to meet `bits`; zero for an empty target.
pub fn block_proof(bits: u32) -> Result<U256, CompactError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Ok(U256::zero());
    }
    let one = U256::from(1u64);
    Ok((!target / (target + one)) + one)
}

/// Numeric comparison of two little-endian 256-bit values.
pub fn cmp_le(a: &Hash256, b: &Hash256) -> Ordering {
    U256::from_little_endian(a).cmp(&U256::from_little_endian(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_bit_on_zero_mantissa_is_zero() {
        assert_eq!(compact_to_u256(0x0180_0000), Ok(U256::zero()));
        assert_eq!(compact_to_u256(0x0000_0000), Ok(U256::zero()));
    }

    #[test]
    fn rejects_negative_and_overflow() {
        assert_eq!(compact_to_u256(0x04923456), Err(CompactError::Negative));
        assert_eq!(compact_to_u256(0xff123456), Err(CompactError::Overflow));
        assert_eq!(compact_to_u256(0x2301_0000), Err(CompactError::Overflow));
    }

    #[test]
    fn small_sizes_shift_right() {
        assert_eq!(compact_to_u256(0x01123456), Ok(U256::from(0x12u64)));
        assert_eq!(compact_to_u256(0x02123456), Ok(U256::from(0x1234u64)));
        assert_eq!(compact_to_u256(0x05009234), Ok(U256::from(0x92340000u64)));
    }

    #[test]
    fn block_proof_grows_with_difficulty() {
        let easy = block_proof(0x207fffff).expect("easy");
        let hard = block_proof(0x1d00ffff).expect("hard");
        assert_eq!(easy, U256::from(2u64));
        assert!(hard > easy);
        assert_eq!(block_proof(0).expect("zero"), U256::zero());
    }
}
