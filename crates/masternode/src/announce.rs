//! Masternode announce (broadcast) record.

use spv_consensus::{bytes_to_hex, hex_to_bytes, ChainParams, Hash256};
use spv_consensus::constants::PROTOCOL_VERSION;
use spv_primitives::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use spv_primitives::{pubkey_to_address, sha256d, NetworkAddress, TxIn};
use spv_script::verify_message_address;

use crate::error::MasternodeError;
use crate::keys::SigningKey;
use crate::ping::MasternodePing;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MasternodeAnnounce {
    pub vin: TxIn,
    pub addr: NetworkAddress,
    pub collateral_key: Vec<u8>,
    pub masternode_pubkey: Vec<u8>,
    pub sig: Vec<u8>,
    pub sig_time: i64,
    pub protocol_version: i32,
    pub last_ping: MasternodePing,
    pub last_dsq: i64,
}

impl MasternodeAnnounce {
    pub fn new(
        vin: TxIn,
        addr: NetworkAddress,
        collateral_key: Vec<u8>,
        masternode_pubkey: Vec<u8>,
        last_ping: MasternodePing,
    ) -> Self {
        Self {
            vin,
            addr,
            collateral_key,
            masternode_pubkey,
            sig: Vec::new(),
            sig_time: 0,
            protocol_version: PROTOCOL_VERSION,
            last_ping,
            last_dsq: 0,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, MasternodeError> {
        Ok(decode(bytes)?)
    }

    /// Hex payload for the broadcast call: a one-element vector of announces.
    pub fn to_broadcast_hex(&self) -> String {
        let mut encoder = Encoder::new();
        encoder.write_varint(1);
        self.consensus_encode(&mut encoder);
        bytes_to_hex(&encoder.into_inner())
    }

    pub fn from_broadcast_hex(raw: &str) -> Result<Self, MasternodeError> {
        let bytes = hex_to_bytes(raw.trim())
            .map_err(|_| DecodeError::InvalidData("announce is not hex"))?;
        let mut decoder = Decoder::new(&bytes);
        if decoder.read_varint()? != 1 {
            return Err(DecodeError::InvalidData("expected a single announce").into());
        }
        let announce = Self::consensus_decode(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes.into());
        }
        Ok(announce)
    }

    /// Identity the network answers broadcasts under.
    pub fn get_hash(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        encoder.write_i64_le(self.sig_time);
        encoder.write_var_bytes(&self.collateral_key);
        sha256d(&encoder.into_inner())
    }

    /// `<txid>-<index>`, the key masternode status queries use.
    pub fn get_collateral_str(&self) -> String {
        format!(
            "{}-{}",
            spv_consensus::hash256_to_hex(&self.vin.prevout.hash),
            self.vin.prevout.index
        )
    }

    pub fn serialize_for_sig(&self) -> Vec<u8> {
        let mut message = format!("{}{}", self.addr, self.sig_time).into_bytes();
        message.extend_from_slice(&self.collateral_key);
        message.extend_from_slice(&self.masternode_pubkey);
        message.extend_from_slice(self.protocol_version.to_string().as_bytes());
        message
    }

    /// Stamps the announce with `sig_time` and signs it with the collateral key.
    pub fn sign(&mut self, key: &SigningKey, sig_time: i64) -> Result<[u8; 65], MasternodeError> {
        if key.pubkey() != self.collateral_key.as_slice() {
            return Err(MasternodeError::KeyMismatch);
        }
        self.sig_time = sig_time;
        let sig = key.sign(&self.serialize_for_sig())?;
        self.sig = sig.to_vec();
        Ok(sig)
    }

    /// Checks that the announce was signed by the key behind `address`.
    pub fn verify(&self, address: &str, params: &ChainParams) -> Result<(), MasternodeError> {
        verify_message_address(address, &self.sig, &self.serialize_for_sig(), params)
            .map_err(|_| MasternodeError::InvalidSignature)
    }

    /// Verifies against the address of the record's own collateral key.
    pub fn verify_collateral(&self, params: &ChainParams) -> Result<(), MasternodeError> {
        self.verify(&pubkey_to_address(&self.collateral_key, params), params)
    }
}

impl Encodable for MasternodeAnnounce {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.vin.consensus_encode(encoder);
        self.addr.consensus_encode(encoder);
        encoder.write_var_bytes(&self.collateral_key);
        encoder.write_var_bytes(&self.masternode_pubkey);
        encoder.write_var_bytes(&self.sig);
        encoder.write_i64_le(self.sig_time);
        encoder.write_i32_le(self.protocol_version);
        self.last_ping.consensus_encode(encoder);
        encoder.write_i64_le(self.last_dsq);
    }
}

impl Decodable for MasternodeAnnounce {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let vin = TxIn::consensus_decode(decoder)?;
        let addr = NetworkAddress::consensus_decode(decoder)?;
        let collateral_key = decoder.read_var_bytes()?;
        let masternode_pubkey = decoder.read_var_bytes()?;
        let sig = decoder.read_var_bytes()?;
        let sig_time = decoder.read_i64_le()?;
        let protocol_version = decoder.read_i32_le()?;
        let last_ping = MasternodePing::consensus_decode(decoder)?;
        let last_dsq = decoder.read_i64_le()?;
        Ok(Self {
            vin,
            addr,
            collateral_key,
            masternode_pubkey,
            sig,
            sig_time,
            protocol_version,
            last_ping,
            last_dsq,
        })
    }
}
