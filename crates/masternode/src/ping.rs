//! Masternode liveness ping.

use spv_consensus::{hash256_to_hex, Hash256};
use spv_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use spv_primitives::TxIn;
use spv_script::verify_signed_message;

use crate::error::MasternodeError;
use crate::keys::SigningKey;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MasternodePing {
    pub vin: TxIn,
    pub block_hash: Hash256,
    pub sig_time: i64,
    pub sig: Vec<u8>,
}

impl MasternodePing {
    pub fn new(vin: TxIn, block_hash: Hash256) -> Self {
        Self {
            vin,
            block_hash,
            sig_time: 0,
            sig: Vec::new(),
        }
    }

    pub fn serialize_for_sig(&self) -> Vec<u8> {
        format!(
            "{}{}{}",
            self.vin,
            hash256_to_hex(&self.block_hash),
            self.sig_time
        )
        .into_bytes()
    }

    /// Stamps the ping with `sig_time` and signs it with the masternode key.
    pub fn sign(&mut self, key: &SigningKey, sig_time: i64) -> Result<[u8; 65], MasternodeError> {
        self.sig_time = sig_time;
        let sig = key.sign(&self.serialize_for_sig())?;
        self.sig = sig.to_vec();
        Ok(sig)
    }

    /// Checks the signature against the masternode public key.
    pub fn verify(&self, masternode_pubkey: &[u8]) -> Result<(), MasternodeError> {
        verify_signed_message(masternode_pubkey, &self.sig, &self.serialize_for_sig())
            .map_err(|_| MasternodeError::InvalidSignature)
    }
}

impl Encodable for MasternodePing {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.vin.consensus_encode(encoder);
        encoder.write_hash_le(&self.block_hash);
        encoder.write_i64_le(self.sig_time);
        encoder.write_var_bytes(&self.sig);
    }
}

impl Decodable for MasternodePing {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let vin = TxIn::consensus_decode(decoder)?;
        let block_hash = decoder.read_hash_le()?;
        let sig_time = decoder.read_i64_le()?;
        let sig = decoder.read_var_bytes()?;
        Ok(Self {
            vin,
            block_hash,
            sig_time,
            sig,
        })
    }
}
