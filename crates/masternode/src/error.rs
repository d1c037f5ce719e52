use std::fmt;

use spv_chainstate::ChainError;
use spv_primitives::encoding::DecodeError;
use spv_storage::StoreError;

#[derive(Debug)]
pub enum MasternodeError {
    Decode(DecodeError),
    InvalidSignature,
    KeyMismatch,
    InvalidKey(String),
    InvalidAddress(String),
    Conf(String),
    NotFound(String),
    AlreadyExists(String),
    NotReady(String),
    Rejected(String),
    Chain(ChainError),
    Store(StoreError),
}

impl fmt::Display for MasternodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasternodeError::Decode(err) => write!(f, "malformed masternode record: {err}"),
            MasternodeError::InvalidSignature => write!(f, "invalid masternode signature"),
            MasternodeError::KeyMismatch => {
                write!(f, "signing key does not match the collateral key")
            }
            MasternodeError::InvalidKey(message) => write!(f, "invalid key: {message}"),
            MasternodeError::InvalidAddress(message) => write!(f, "invalid address: {message}"),
            MasternodeError::Conf(message) => write!(f, "{message}"),
            MasternodeError::NotFound(alias) => write!(f, "nonexistent masternode {alias}"),
            MasternodeError::AlreadyExists(alias) => {
                write!(f, "a masternode with alias \"{alias}\" already exists")
            }
            MasternodeError::NotReady(message) => write!(f, "{message}"),
            MasternodeError::Rejected(message) => write!(f, "announce was rejected: {message}"),
            MasternodeError::Chain(err) => write!(f, "{err}"),
            MasternodeError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for MasternodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MasternodeError::Decode(err) => Some(err),
            MasternodeError::Chain(err) => Some(err),
            MasternodeError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for MasternodeError {
    fn from(err: DecodeError) -> Self {
        MasternodeError::Decode(err)
    }
}

impl From<ChainError> for MasternodeError {
    fn from(err: ChainError) -> Self {
        MasternodeError::Chain(err)
    }
}

impl From<StoreError> for MasternodeError {
    fn from(err: StoreError) -> Self {
        MasternodeError::Store(err)
    }
}
