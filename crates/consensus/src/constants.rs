//! Protocol-wide constants.

/// Serialized size of a block header on disk and on the wire.
pub const HEADER_SIZE: usize = 80;
/// Number of headers delivered per retarget chunk.
pub const CHUNK_SIZE: i32 = 2016;

/// File name of the canonical (best chain) headers file.
pub const MAIN_HEADERS_FILE_NAME: &str = "blockchain_headers";
/// Subdirectory holding one file per competing branch.
pub const FORKS_DIR_NAME: &str = "forks";
/// Prefix of fork file names; the suffix encodes forkpoint and hashes.
pub const FORK_FILE_PREFIX: &str = "fork2_";

/// Message magic used for `signmessage`/`verifymessage` style signatures.
///
/// Matches `strMessageMagic` of the masternode-enabled daemons.
pub const SIGNED_MESSAGE_MAGIC: &str = "DarkNet Signed Message:\n";

/// Protocol version advertised in masternode announces.
pub const PROTOCOL_VERSION: i32 = 70_914;
/// Collateral outputs need this many confirmations before an announce is signed.
pub const MASTERNODE_MIN_CONFIRMATIONS: i32 = 15;
/// Pings reference the block this many headers below the local tip.
pub const MASTERNODE_PING_DEPTH: i32 = 12;

/// Base units per coin.
pub const COIN: i64 = 100_000_000;
/// Exact value a masternode collateral output must carry.
pub const MASTERNODE_COLLATERAL: i64 = 2_500 * COIN;
