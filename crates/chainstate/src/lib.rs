//! File-backed header chains: segment files, fork tracking and best-chain selection.

pub mod blockchain;
pub mod config;
pub mod error;
pub mod header;
pub mod lock;
pub mod registry;
pub mod store;

pub use blockchain::Blockchain;
pub use config::{ConfigError, HeaderStoreConfig};
pub use error::ChainError;
pub use header::{deserialize_header, hash_header, serialize_header, ChainHeader};
pub use registry::{ChainRegistry, SegmentId};
pub use store::ChainStore;
