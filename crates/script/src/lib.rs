//! Signed-message hashing, signing and verification.

pub mod message;
mod secp;

pub use message::{
    pubkey_from_secret, recover_signed_message_pubkey, sign_message, signed_message_hash,
    verify_message_address, verify_signed_message, SignedMessageError,
};
