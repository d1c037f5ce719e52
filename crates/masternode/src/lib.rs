//! Masternode announce and ping records, their signatures, and the local masternode manager.

pub mod announce;
pub mod conf;
pub mod error;
pub mod keys;
pub mod manager;
pub mod ping;

pub use announce::MasternodeAnnounce;
pub use conf::{parse_masternode_conf, MasternodeConfLine};
pub use error::MasternodeError;
pub use keys::SigningKey;
pub use manager::{confirmations, Masternode, MasternodeManager, SpendableOutput};
pub use ping::MasternodePing;
