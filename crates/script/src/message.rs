//! Bitcoin-style signed messages (used by masternode announce and ping records).

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey};
use spv_consensus::constants::SIGNED_MESSAGE_MAGIC;
use spv_consensus::{ChainParams, Hash256};
use spv_primitives::encoding::Encoder;
use spv_primitives::hash::sha256d;
use spv_primitives::pubkey_to_address;

use crate::secp::{secp256k1_sign, secp256k1_verify};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedMessageError {
    InvalidPubkey,
    InvalidSecretKey,
    InvalidSignature,
    InvalidRecoveryId,
    InvalidMessage,
    RecoverFailed,
    PubkeyMismatch,
    AddressMismatch,
}

impl std::fmt::Display for SignedMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignedMessageError::InvalidPubkey => write!(f, "invalid pubkey"),
            SignedMessageError::InvalidSecretKey => write!(f, "invalid secret key"),
            SignedMessageError::InvalidSignature => write!(f, "invalid signature"),
            SignedMessageError::InvalidRecoveryId => write!(f, "invalid recovery id"),
            SignedMessageError::InvalidMessage => write!(f, "invalid message"),
            SignedMessageError::RecoverFailed => write!(f, "failed to recover pubkey"),
            SignedMessageError::PubkeyMismatch => write!(f, "pubkey mismatch"),
            SignedMessageError::AddressMismatch => write!(f, "signer address mismatch"),
        }
    }
}

impl std::error::Error for SignedMessageError {}

pub fn signed_message_hash(message: &[u8]) -> Hash256 {
    let mut encoder = Encoder::new();
    encoder.write_var_str(SIGNED_MESSAGE_MAGIC);
    encoder.write_var_bytes(message);
    sha256d(&encoder.into_inner())
}

pub fn pubkey_from_secret(
    secret: &[u8; 32],
    compressed: bool,
) -> Result<Vec<u8>, SignedMessageError> {
    let secret =
        SecretKey::from_slice(secret).map_err(|_| SignedMessageError::InvalidSecretKey)?;
    let pubkey = PublicKey::from_secret_key(secp256k1_sign(), &secret);
    if compressed {
        Ok(pubkey.serialize().to_vec())
    } else {
        Ok(pubkey.serialize_uncompressed().to_vec())
    }
}

/// Produces a 65-byte compact recoverable signature (RFC6979 nonce).
pub fn sign_message(
    secret: &[u8; 32],
    compressed: bool,
    message: &[u8],
) -> Result<[u8; 65], SignedMessageError> {
    let secret =
        SecretKey::from_slice(secret).map_err(|_| SignedMessageError::InvalidSecretKey)?;
    let digest = signed_message_hash(message);
    let msg = Message::from_digest(digest);
    let sig = secp256k1_sign().sign_ecdsa_recoverable(&msg, &secret);
    Ok(encode_compact_signature(&sig, compressed))
}

pub fn verify_signed_message(
    expected_pubkey: &[u8],
    signature: &[u8],
    message: &[u8],
) -> Result<(), SignedMessageError> {
    if expected_pubkey.is_empty() {
        return Err(SignedMessageError::InvalidPubkey);
    }
    let (recoverable, compressed) = decode_compact_signature(signature)?;
    let expected_compressed = expected_pubkey.len() == 33;
    if compressed != expected_compressed {
        return Err(SignedMessageError::PubkeyMismatch);
    }
    let msg = Message::from_digest(signed_message_hash(message));
    let pubkey =
        PublicKey::from_slice(expected_pubkey).map_err(|_| SignedMessageError::InvalidPubkey)?;
    let sig = recoverable.to_standard();
    secp256k1_verify()
        .verify_ecdsa(&msg, &sig, &pubkey)
        .map_err(|_| SignedMessageError::InvalidSignature)?;
    Ok(())
}

pub fn recover_signed_message_pubkey(
    signature: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, SignedMessageError> {
    let (recoverable, compressed) = decode_compact_signature(signature)?;
    let msg = Message::from_digest(signed_message_hash(message));
    let pubkey = secp256k1_verify()
        .recover_ecdsa(&msg, &recoverable)
        .map_err(|_| SignedMessageError::RecoverFailed)?;
    if compressed {
        Ok(pubkey.serialize().to_vec())
    } else {
        Ok(pubkey.serialize_uncompressed().to_vec())
    }
}

/// Recovers the signer and checks that its P2PKH address is `address`.
pub fn verify_message_address(
    address: &str,
    signature: &[u8],
    message: &[u8],
    params: &ChainParams,
) -> Result<(), SignedMessageError> {
    let pubkey = recover_signed_message_pubkey(signature, message)?;
    if pubkey_to_address(&pubkey, params) != address {
        return Err(SignedMessageError::AddressMismatch);
    }
    Ok(())
}

fn encode_compact_signature(sig: &RecoverableSignature, compressed: bool) -> [u8; 65] {
    let (rec_id, bytes) = sig.serialize_compact();
    let mut out = [0u8; 65];
    out[0] = 27u8 + (rec_id.to_i32() as u8) + if compressed { 4 } else { 0 };
    out[1..].copy_from_slice(&bytes);
    out
}

fn decode_compact_signature(
    signature: &[u8],
) -> Result<(RecoverableSignature, bool), SignedMessageError> {
    if signature.len() != 65 {
        return Err(SignedMessageError::InvalidSignature);
    }
    let header = signature[0];
    if !(27..=34).contains(&header) {
        return Err(SignedMessageError::InvalidSignature);
    }
    let compressed = header >= 31;
    let recovery = if compressed { header - 31 } else { header - 27 };
    let rec_id =
        RecoveryId::from_i32(recovery as i32).map_err(|_| SignedMessageError::InvalidRecoveryId)?;
    let sig = RecoverableSignature::from_compact(&signature[1..65], rec_id)
        .map_err(|_| SignedMessageError::InvalidSignature)?;
    Ok((sig, compressed))
}
