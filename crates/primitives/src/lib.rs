//! Header, outpoint and address types with their wire serialization.

pub mod address;
pub mod encoding;
pub mod hash;
pub mod header;
pub mod netaddr;
pub mod outpoint;

pub use address::{
    address_to_hash160, hash160_to_address, pubkey_to_address, secret_key_to_wif,
    wif_to_secret_key, AddressError,
};
pub use header::BlockHeader;
pub use hash::{hash160, sha256, sha256d};
pub use netaddr::NetworkAddress;
pub use outpoint::{OutPoint, TxIn};
