//! Height-tagged headers and their fixed-width codec.

use spv_consensus::constants::HEADER_SIZE;
use spv_consensus::Hash256;
use spv_primitives::encoding::DecodeError;
use spv_primitives::BlockHeader;

use crate::error::ChainError;

/// A header together with the height it claims on its chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChainHeader {
    pub height: i32,
    pub header: BlockHeader,
}

impl ChainHeader {
    pub fn new(header: BlockHeader, height: i32) -> Self {
        Self { height, header }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn prev_hash(&self) -> &Hash256 {
        &self.header.prev_block
    }

    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        self.header.to_bytes()
    }
}

pub fn deserialize_header(bytes: &[u8], height: i32) -> Result<ChainHeader, ChainError> {
    if bytes.len() != HEADER_SIZE {
        return Err(ChainError::MalformedHeader(DecodeError::InvalidData(
            "header must be 80 bytes",
        )));
    }
    Ok(ChainHeader::new(BlockHeader::from_bytes(bytes)?, height))
}

pub fn serialize_header(header: &ChainHeader) -> [u8; HEADER_SIZE] {
    header.serialize()
}

/// Block identity; the height does not take part.
pub fn hash_header(header: &ChainHeader) -> Hash256 {
    header.hash()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_is_not_hashed() {
        let header = BlockHeader {
            version: 1,
            bits: 0x207fffff,
            nonce: 7,
            ..BlockHeader::default()
        };
        let low = ChainHeader::new(header.clone(), 1);
        let high = ChainHeader::new(header, 500);
        assert_eq!(hash_header(&low), hash_header(&high));
    }

    #[test]
    fn deserialize_checks_length() {
        let header = ChainHeader::new(BlockHeader::default(), 3);
        let bytes = serialize_header(&header);
        assert_eq!(deserialize_header(&bytes, 3).expect("decode"), header);
        assert!(matches!(
            deserialize_header(&bytes[..79], 3),
            Err(ChainError::MalformedHeader(_))
        ));
        assert!(matches!(
            deserialize_header(&[0u8; 81], 3),
            Err(ChainError::MalformedHeader(_))
        ));
    }
}
