//! WIF-encoded signing keys for collateral and masternode (delegate) keys.

use std::fmt;

use spv_consensus::ChainParams;
use spv_primitives::{pubkey_to_address, wif_to_secret_key};
use spv_script::{pubkey_from_secret, sign_message};

use crate::error::MasternodeError;

/// Script-type tag some wallets put in front of exported keys.
const P2PKH_WIF_TAG: &str = "p2pkh:";

#[derive(Clone)]
pub struct SigningKey {
    secret: [u8; 32],
    compressed: bool,
    pubkey: Vec<u8>,
}

impl SigningKey {
    pub fn from_wif(wif: &str, params: &ChainParams) -> Result<Self, MasternodeError> {
        let wif = wif.trim();
        let wif = wif.strip_prefix(P2PKH_WIF_TAG).unwrap_or(wif);
        let (secret, compressed) = wif_to_secret_key(wif, params)
            .map_err(|err| MasternodeError::InvalidKey(err.to_string()))?;
        let pubkey = pubkey_from_secret(&secret, compressed)
            .map_err(|err| MasternodeError::InvalidKey(err.to_string()))?;
        Ok(Self {
            secret,
            compressed,
            pubkey,
        })
    }

    pub fn pubkey(&self) -> &[u8] {
        &self.pubkey
    }

    pub fn address(&self, params: &ChainParams) -> String {
        pubkey_to_address(&self.pubkey, params)
    }

    pub fn sign(&self, message: &[u8]) -> Result<[u8; 65], MasternodeError> {
        sign_message(&self.secret, self.compressed, message)
            .map_err(|err| MasternodeError::InvalidKey(err.to_string()))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("pubkey", &spv_consensus::bytes_to_hex(&self.pubkey))
            .finish_non_exhaustive()
    }
}
