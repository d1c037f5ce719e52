use std::fmt;

use spv_consensus::{hash256_to_hex, Hash256};
use spv_pow::difficulty::CompactError;
use spv_pow::PowError;
use spv_primitives::encoding::DecodeError;

use crate::config::ConfigError;
use crate::registry::SegmentId;

#[derive(Debug)]
pub enum ChainError {
    Io(std::io::Error),
    MalformedHeader(DecodeError),
    InvalidTarget(String),
    ProofOfWorkFailed { height: i32 },
    CannotConnect { height: i32 },
    NonContiguousWrite { expected: i32, got: i32 },
    ForkAtTip { height: i32 },
    ForkBelowCheckpoint { height: i32 },
    DuplicateFork(Hash256),
    MissingHeader(i32),
    SwapLimitExceeded,
    /// The header was stored, but swapping its chain with a parent failed.
    PromotionFailed { height: i32, source: Box<ChainError> },
    UnknownChain(SegmentId),
    BestChainRemoval,
    DirectoryLocked(String),
    Config(ConfigError),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Io(err) => write!(f, "{err}"),
            ChainError::MalformedHeader(err) => write!(f, "malformed header: {err}"),
            ChainError::InvalidTarget(message) => write!(f, "invalid target: {message}"),
            ChainError::ProofOfWorkFailed { height } => {
                write!(f, "insufficient proof of work at height {height}")
            }
            ChainError::CannotConnect { height } => {
                write!(f, "header at height {height} does not connect")
            }
            ChainError::NonContiguousWrite { expected, got } => {
                write!(f, "non-contiguous write: expected height {expected}, got {got}")
            }
            ChainError::ForkAtTip { height } => {
                write!(f, "header at height {height} extends the parent tip")
            }
            ChainError::ForkBelowCheckpoint { height } => {
                write!(f, "fork at height {height} is at or below the last checkpoint")
            }
            ChainError::DuplicateFork(hash) => {
                write!(f, "chain starting at {} already exists", hash256_to_hex(hash))
            }
            ChainError::MissingHeader(height) => write!(f, "missing header at height {height}"),
            ChainError::SwapLimitExceeded => write!(f, "swapping fork with parent too many times"),
            ChainError::PromotionFailed { height, source } => write!(
                f,
                "header at height {height} was stored but promoting its chain failed: {source}"
            ),
            ChainError::UnknownChain(id) => write!(f, "unknown chain {id}"),
            ChainError::BestChainRemoval => write!(f, "the best chain cannot be unregistered"),
            ChainError::DirectoryLocked(message) => write!(f, "{message}"),
            ChainError::Config(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ChainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChainError::Io(err) => Some(err),
            ChainError::MalformedHeader(err) => Some(err),
            ChainError::Config(err) => Some(err),
            ChainError::PromotionFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err)
    }
}

impl From<DecodeError> for ChainError {
    fn from(err: DecodeError) -> Self {
        ChainError::MalformedHeader(err)
    }
}

impl From<CompactError> for ChainError {
    fn from(err: CompactError) -> Self {
        ChainError::InvalidTarget(err.to_string())
    }
}

impl From<ConfigError> for ChainError {
    fn from(err: ConfigError) -> Self {
        ChainError::Config(err)
    }
}

impl ChainError {
    /// Maps a proof-of-work failure for the header at `height`.
    pub fn from_pow(err: PowError, height: i32) -> Self {
        match err {
            PowError::HashMismatch => ChainError::ProofOfWorkFailed { height },
            PowError::InvalidBits(message) => ChainError::InvalidTarget(message.to_string()),
            PowError::Compact(err) => err.into(),
        }
    }
}
